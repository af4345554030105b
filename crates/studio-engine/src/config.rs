use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use studio_contracts::graph::ExecutionOrder;
use studio_contracts::{StudioError, StudioResult};

use crate::http::non_empty_env;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Process-level settings, read from the environment and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub bind: SocketAddr,
    pub events_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub execution_order: ExecutionOrder,
    /// Routes every generation to the offline dryrun providers.
    pub dryrun: bool,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            events_path: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            execution_order: ExecutionOrder::default(),
            dryrun: false,
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> StudioResult<Self> {
        let mut config = Self::default();
        if let Some(bind) = non_empty_env("STUDIO_BIND") {
            config.bind = bind
                .parse()
                .map_err(|_| StudioError::validation(format!("Invalid STUDIO_BIND '{bind}'")))?;
        }
        config.events_path = non_empty_env("STUDIO_EVENTS").map(PathBuf::from);
        if let Some(raw) = non_empty_env("STUDIO_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                StudioError::validation(format!("Invalid STUDIO_REQUEST_TIMEOUT_SECS '{raw}'"))
            })?;
            config.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(order) = non_empty_env("STUDIO_EXECUTION_ORDER") {
            config.execution_order = order.parse()?;
        }
        config.dryrun = non_empty_env("STUDIO_DRYRUN")
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(config)
    }
}

/// An API key looked up at call time.
///
/// Environment keys are tried in order; the first one is the name reported
/// when none is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    env_keys: Vec<&'static str>,
    fixed: Option<String>,
}

impl Credential {
    pub fn from_env(env_key: &'static str) -> Self {
        Self::with_fallbacks(&[env_key])
    }

    pub fn with_fallbacks(env_keys: &[&'static str]) -> Self {
        Self {
            env_keys: env_keys.to_vec(),
            fixed: None,
        }
    }

    pub fn fixed(value: impl Into<String>) -> Self {
        Self {
            env_keys: Vec::new(),
            fixed: Some(value.into()),
        }
    }

    pub fn env_key(&self) -> &str {
        self.env_keys.first().copied().unwrap_or("API key")
    }

    pub fn resolve(&self) -> StudioResult<String> {
        if let Some(value) = self.fixed.as_deref().filter(|value| !value.trim().is_empty()) {
            return Ok(value.to_string());
        }
        self.env_keys
            .iter()
            .find_map(|key| non_empty_env(key))
            .ok_or_else(|| StudioError::missing_credential(self.env_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_with_insertion_order() {
        let config = StudioConfig::default();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.execution_order, ExecutionOrder::Insertion);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert!(!config.dryrun);
    }

    #[test]
    fn fixed_credential_wins() -> StudioResult<()> {
        assert_eq!(Credential::fixed("sk-test").resolve()?, "sk-test");
        Ok(())
    }

    #[test]
    fn missing_credential_names_primary_key() {
        let credential = Credential::with_fallbacks(&[
            "STUDIO_TEST_UNSET_PRIMARY_KEY",
            "STUDIO_TEST_UNSET_FALLBACK_KEY",
        ]);
        let err = credential.resolve().err();
        assert_eq!(
            err.map(|err| err.to_string()),
            Some("Missing STUDIO_TEST_UNSET_PRIMARY_KEY on server".to_string())
        );
    }

    #[test]
    fn blank_fixed_credential_is_missing() {
        let credential = Credential::fixed("  ");
        assert_eq!(
            credential.resolve().err().map(|err| err.http_status()),
            Some(500)
        );
    }
}
