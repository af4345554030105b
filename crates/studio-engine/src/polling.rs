use std::thread;
use std::time::{Duration, Instant};

use studio_contracts::{StudioError, StudioResult};
use tracing::debug;

/// Cadence and deadline of a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Added to the delay after every attempt.
    pub backoff_step: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
    /// Sleep before each probe instead of after it.
    pub sleep_first: bool,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            backoff_step: Duration::ZERO,
            max_interval: interval,
            timeout,
            sleep_first: false,
        }
    }

    pub fn backoff(initial: Duration, step: Duration, max_interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: initial,
            backoff_step: step,
            max_interval,
            timeout,
            sleep_first: false,
        }
    }

    pub fn sleeping_first(mut self) -> Self {
        self.sleep_first = true;
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.interval + self.backoff_step.saturating_mul(attempt);
        delay.min(self.max_interval.max(self.interval))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    /// Still running; carries the vendor status.
    Pending(String),
    Ready(T),
}

/// Calls `probe` until it returns `Ready`, an error, or the policy times out.
///
/// The probe receives the zero-based attempt number. Terminal job failures
/// are reported by the probe as errors and end the loop immediately.
pub fn poll_until<T, F>(label: &str, policy: &PollPolicy, mut probe: F) -> StudioResult<T>
where
    F: FnMut(u32) -> StudioResult<PollState<T>>,
{
    let started = Instant::now();
    let mut last_status = "unknown".to_string();
    let mut attempt: u32 = 0;
    loop {
        if started.elapsed() > policy.timeout {
            return Err(StudioError::timeout(format!(
                "Timed out waiting for result. Last status: {last_status}"
            )));
        }
        let delay = policy.delay_for_attempt(attempt);
        if policy.sleep_first {
            thread::sleep(delay);
        }
        match probe(attempt)? {
            PollState::Ready(value) => return Ok(value),
            PollState::Pending(status) => {
                debug!(provider = label, attempt, status = %status, "job still pending");
                last_status = status;
            }
        }
        if !policy.sleep_first {
            thread::sleep(delay);
        }
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy() -> PollPolicy {
        PollPolicy::fixed(Duration::ZERO, Duration::from_secs(5))
    }

    #[test]
    fn backoff_grows_until_capped() {
        let policy = PollPolicy::backoff(
            Duration::from_millis(2000),
            Duration::from_millis(500),
            Duration::from_millis(15000),
            Duration::from_secs(1800),
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_millis(15000));
    }

    #[test]
    fn fixed_policy_never_changes() {
        let policy = PollPolicy::fixed(Duration::from_millis(600), Duration::from_secs(90));
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(9));
    }

    #[test]
    fn returns_ready_value_after_pending_attempts() -> StudioResult<()> {
        let mut seen = Vec::new();
        let value = poll_until("test", &instant_policy(), |attempt| {
            seen.push(attempt);
            if attempt < 2 {
                Ok(PollState::Pending("Processing".to_string()))
            } else {
                Ok(PollState::Ready("https://cdn/out.png"))
            }
        })?;
        assert_eq!(value, "https://cdn/out.png");
        assert_eq!(seen, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn probe_errors_stop_the_loop() {
        let mut calls = 0;
        let result: StudioResult<()> = poll_until("test", &instant_policy(), |_| {
            calls += 1;
            Err(StudioError::job_failed("Generation failed", None))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.err().map(|err| err.http_status()), Some(502));
    }

    #[test]
    fn timeout_reports_last_status() {
        let policy = PollPolicy::fixed(Duration::from_millis(5), Duration::from_millis(20))
            .sleeping_first();
        let result: StudioResult<()> =
            poll_until("test", &policy, |_| Ok(PollState::Pending("Queued".to_string())));
        let err = result.err();
        assert_eq!(err.as_ref().map(|err| err.http_status()), Some(504));
        assert_eq!(
            err.map(|err| err.to_string()),
            Some("Timed out waiting for result. Last status: Queued".to_string())
        );
    }
}
