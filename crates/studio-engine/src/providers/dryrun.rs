use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use studio_contracts::providers::NamedProvider;
use studio_contracts::{StudioError, StudioResult};

use super::{
    ImageOutput, ImageProvider, ImageRequest, JobStatus, TextOutput, TextProvider, TextRequest,
    VideoOutput, VideoProvider, VideoRequest,
};
use crate::media::to_data_url;
use crate::polling::PollPolicy;

const PREVIEW_EDGE: u32 = 64;

/// Offline provider: deterministic text, solid-color images and video jobs
/// that finish after a fixed number of polls.
#[derive(Debug)]
pub struct DryrunProvider {
    polls_until_ready: u32,
    counter: AtomicU64,
    jobs: Mutex<HashMap<String, u32>>,
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DryrunProvider {
    pub fn new() -> Self {
        Self {
            polls_until_ready: 1,
            counter: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = polls;
        self
    }
}

impl NamedProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl TextProvider for DryrunProvider {
    fn generate(&self, request: &TextRequest) -> StudioResult<TextOutput> {
        let prompt = request.prompt.trim();
        let mut text = format!("[dryrun {}] {prompt}", request.model);
        if !request.images.is_empty() {
            text.push_str(&format!(" ({} image(s) attached)", request.images.len()));
        }
        Ok(TextOutput { text })
    }
}

impl ImageProvider for DryrunProvider {
    fn generate(&self, request: &ImageRequest) -> StudioResult<ImageOutput> {
        let (width, height) = preview_dims(request.ratio.as_deref());
        let seed = request.images.len() as u64;
        let (r, g, b) = color_from_prompt(&request.prompt, seed);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| StudioError::internal(format!("dryrun image encode failed: {err}")))?;
        Ok(ImageOutput::Base64 {
            data: BASE64.encode(bytes),
            mime: Some("image/png".to_string()),
        })
    }
}

impl VideoProvider for DryrunProvider {
    fn generate(&self, request: &VideoRequest) -> StudioResult<VideoOutput> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("dryrun-{}", short_id(&request.prompt, index));
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| StudioError::internal("dryrun job table poisoned"))?;
        jobs.insert(job_id.clone(), 0);
        Ok(VideoOutput::Job(job_id))
    }

    fn poll(&self, job_id: &str) -> StudioResult<JobStatus> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| StudioError::internal("dryrun job table poisoned"))?;
        let polls = jobs
            .get_mut(job_id)
            .ok_or_else(|| StudioError::not_found(format!("Unknown job '{job_id}'")))?;
        *polls += 1;
        if *polls < self.polls_until_ready {
            return Ok(JobStatus::Pending(Some("processing".to_string())));
        }
        jobs.remove(job_id);
        let body = format!("dryrun video {job_id}");
        Ok(JobStatus::Ready(to_data_url("video/mp4", body.as_bytes())))
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(5))
    }
}

fn preview_dims(ratio: Option<&str>) -> (u32, u32) {
    let parsed = ratio.and_then(|ratio| {
        let (w, h) = ratio.split_once(':')?;
        let w: u32 = w.trim().parse().ok()?;
        let h: u32 = h.trim().parse().ok()?;
        (w > 0 && h > 0).then_some((w, h))
    });
    match parsed {
        Some((w, h)) if w >= h => (PREVIEW_EDGE, (PREVIEW_EDGE * h / w).max(1)),
        Some((w, h)) => ((PREVIEW_EDGE * w / h).max(1), PREVIEW_EDGE),
        None => (PREVIEW_EDGE, PREVIEW_EDGE),
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::parse_data_url;

    #[test]
    fn text_echoes_prompt_and_image_count() -> StudioResult<()> {
        let provider = DryrunProvider::new();
        let output = TextProvider::generate(
            &provider,
            &TextRequest {
                prompt: "  haiku  ".to_string(),
                model: "dryrun-text-1".to_string(),
                images: vec!["data:image/png;base64,AA==".to_string()],
            },
        )?;
        assert_eq!(output.text, "[dryrun dryrun-text-1] haiku (1 image(s) attached)");
        Ok(())
    }

    #[test]
    fn image_is_a_png_shaped_by_ratio() -> StudioResult<()> {
        let provider = DryrunProvider::new();
        let output = ImageProvider::generate(
            &provider,
            &ImageRequest {
                prompt: "fern".to_string(),
                ratio: Some("16:9".to_string()),
                ..ImageRequest::default()
            },
        )?;
        let ImageOutput::Base64 { data, mime } = output else {
            panic!("expected inline image");
        };
        assert_eq!(mime.as_deref(), Some("image/png"));
        let bytes = BASE64.decode(data).map_err(|err| StudioError::internal(err.to_string()))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|err| StudioError::internal(err.to_string()))?;
        assert_eq!((decoded.width(), decoded.height()), (64, 36));
        Ok(())
    }

    #[test]
    fn same_prompt_same_color() {
        assert_eq!(color_from_prompt("fern", 0), color_from_prompt("fern", 0));
        assert_ne!(color_from_prompt("fern", 0), color_from_prompt("fern", 1));
        assert_eq!(preview_dims(Some("2:3")), (42, 64));
        assert_eq!(preview_dims(Some("auto")), (64, 64));
    }

    #[test]
    fn video_job_finishes_after_configured_polls() -> StudioResult<()> {
        let provider = DryrunProvider::new().with_polls_until_ready(2);
        let VideoOutput::Job(job_id) = VideoProvider::generate(
            &provider,
            &VideoRequest {
                prompt: "leaves".to_string(),
                ..VideoRequest::default()
            },
        )?
        else {
            panic!("expected job id");
        };
        assert!(job_id.starts_with("dryrun-"));
        assert_eq!(
            provider.poll(&job_id)?,
            JobStatus::Pending(Some("processing".to_string()))
        );
        let JobStatus::Ready(url) = provider.poll(&job_id)? else {
            panic!("expected ready");
        };
        assert_eq!(parse_data_url(&url)?.mime, "video/mp4");
        // Finished jobs are forgotten.
        assert_eq!(
            provider.poll(&job_id).err().map(|err| err.http_status()),
            Some(404)
        );
        assert_eq!(
            provider.poll("dryrun-missing").err().map(|err| err.http_status()),
            Some(404)
        );
        Ok(())
    }
}
