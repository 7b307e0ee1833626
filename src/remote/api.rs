use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, SynclipError};
use crate::provision::Identity;

use super::{JobHandle, JobStatus, RemoteJobService};

/// Maximum retries for transient API failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// HTTP adapter for the rendering service API.
pub struct HttpJobService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn session_token(identity: &Identity) -> Result<&str> {
        identity.session_token.as_deref().ok_or_else(|| {
            SynclipError::SubmissionRejected(format!(
                "Identity {} has no session token",
                identity.address
            ))
        })
    }

    /// Upload the shared video only if the remote does not already hold it.
    /// Detection is a presence check against the asset store, not local
    /// bookkeeping, so a re-run after a crash skips the upload too.
    async fn ensure_shared_video(&self, video: &Path, token: &str) -> Result<String> {
        let name = video
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video_safe.mp4")
            .to_string();

        let check_url = format!("{}/v1/assets/{}", self.base_url, name);
        let response = self
            .client
            .get(&check_url)
            .bearer_auth(token)
            .send()
            .await?;

        if response.status().is_success() {
            debug!("Shared video {name} already uploaded, skipping");
            return Ok(name);
        }

        debug!("Uploading shared video {name}");
        let bytes = tokio::fs::read(video).await?;
        let upload_url = format!("{}/v1/assets", self.base_url);

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                debug!("Retry attempt {} after {}ms delay", attempt, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let part = multipart::Part::bytes(bytes.clone())
                .file_name(name.clone())
                .mime_str("video/mp4")
                .map_err(|e| SynclipError::SubmissionRejected(e.to_string()))?;
            let form = multipart::Form::new().part("file", part);

            let response = self
                .client
                .post(&upload_url)
                .bearer_auth(token)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: AssetResponse = resp.json().await?;
                        return Ok(parsed.name);
                    }

                    let body = resp.text().await.unwrap_or_default();

                    // Don't retry on client errors
                    if status.is_client_error() {
                        return Err(SynclipError::SubmissionRejected(format!(
                            "Video upload rejected ({status}): {body}"
                        )));
                    }

                    warn!("Video upload server error ({status}): {body}");
                    last_error = Some(SynclipError::SubmissionRejected(format!(
                        "Video upload server error: {status}"
                    )));
                }
                Err(e) => {
                    warn!("Video upload request failed: {e}");
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SynclipError::SubmissionRejected("Unknown error".to_string())))
    }
}

#[async_trait]
impl RemoteJobService for HttpJobService {
    async fn submit(&self, audio: &Path, video: &Path, identity: &Identity) -> Result<JobHandle> {
        let token = Self::session_token(identity)?.to_string();

        let video_asset = self.ensure_shared_video(video, &token).await?;

        let audio_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment.mp3")
            .to_string();
        let audio_bytes = tokio::fs::read(audio).await?;

        let url = format!("{}/v1/jobs", self.base_url);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                debug!("Retry attempt {} after {}ms delay", attempt, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let part = multipart::Part::bytes(audio_bytes.clone())
                .file_name(audio_name.clone())
                .mime_str("audio/mpeg")
                .map_err(|e| SynclipError::SubmissionRejected(e.to_string()))?;
            let form = multipart::Form::new()
                .part("audio", part)
                .text("video_asset", video_asset.clone());

            let response = self
                .client
                .post(&url)
                .bearer_auth(&token)
                .multipart(form)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    debug!("Job submission response status: {status}");

                    if status.is_success() {
                        let parsed: JobResponse = resp.json().await?;
                        return Ok(JobHandle {
                            id: parsed.id,
                            session_token: token,
                        });
                    }

                    let body = resp.text().await.unwrap_or_default();

                    if status.is_client_error() {
                        return Err(SynclipError::SubmissionRejected(format!(
                            "Job rejected ({status}): {body}"
                        )));
                    }

                    warn!("Job submission server error ({status}): {body}");
                    last_error = Some(SynclipError::SubmissionRejected(format!(
                        "Server error: {status}"
                    )));
                }
                Err(e) => {
                    warn!("Job submission request failed: {e}");
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SynclipError::SubmissionRejected("Unknown error".to_string())))
    }

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let url = format!("{}/v1/jobs/{}", self.base_url, job.id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&job.session_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynclipError::JobFailed(format!(
                "Status poll returned {status} for job {}",
                job.id
            )));
        }

        let parsed: StatusResponse = response.json().await?;
        Ok(parsed.status)
    }

    async fn fetch_result(&self, job: &JobHandle) -> Result<Vec<u8>> {
        let url = format!("{}/v1/jobs/{}/result", self.base_url, job.id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&job.session_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynclipError::JobFailed(format!(
                "Result fetch returned {status} for job {}",
                job.id
            )));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynclipError::JobFailed(format!(
                "Result for job {} was empty",
                job.id
            )));
        }

        Ok(bytes.to_vec())
    }
}

// Response types

#[derive(Deserialize)]
struct AssetResponse {
    name: String,
}

#[derive(Deserialize)]
struct JobResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: JobStatus,
}
