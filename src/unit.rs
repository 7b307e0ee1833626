use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::SegmentClip;
use crate::config::UnitConfig;
use crate::error::{Result, SynclipError};
use crate::provision::{CodeInbox, Identity, IdentityProvider, OperatorPrompt, ProfileRecord};
use crate::remote::{JobHandle, JobStatus, RemoteJobService};

/// Consecutive status-poll transport errors tolerated before a unit gives up.
/// Remote processing time itself is unbounded; this only guards against a
/// dead endpoint.
const MAX_POLL_ERRORS: u32 = 5;

/// Stages of one segment's journey through the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    PendingIdentity,
    IdentityReady,
    Submitting,
    Submitted,
    Polling,
    Done,
    /// Terminal: an error was contained to this unit; the batch continues.
    Failed,
    /// Terminal: automation exhausted and the operator declined to step in.
    NeedsManualInput,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Done | UnitState::Failed | UnitState::NeedsManualInput
        )
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitState::PendingIdentity => "pending-identity",
            UnitState::IdentityReady => "identity-ready",
            UnitState::Submitting => "submitting",
            UnitState::Submitted => "submitted",
            UnitState::Polling => "polling",
            UnitState::Done => "done",
            UnitState::Failed => "failed",
            UnitState::NeedsManualInput => "needs-manual-input",
        };
        write!(f, "{name}")
    }
}

/// Everything a unit needs to advance, borrowed from the batch.
pub struct UnitContext<'a> {
    pub identities: &'a dyn IdentityProvider,
    pub inbox: &'a dyn CodeInbox,
    pub service: &'a dyn RemoteJobService,
    pub prompt: &'a dyn OperatorPrompt,
    pub config: &'a UnitConfig,
    /// Shared safe video, uploaded at most once per run.
    pub video: &'a Path,
    pub output_dir: &'a Path,
    pub profiles_dir: &'a Path,
}

/// A finished unit's output, addressed by segment index.
#[derive(Debug, Clone)]
pub struct ResultArtifact {
    pub index: usize,
    pub path: PathBuf,
}

/// Result artifact file name, zero-padded by segment index.
pub fn artifact_name(index: usize) -> String {
    format!("result_seg_{:02}.mp4", index)
}

/// State machine driving one segment through identity acquisition,
/// verification, submission, and retrieval.
///
/// A unit owns exactly one segment, at most one identity, and at most one job
/// handle; nothing is shared with sibling units. Errors never escape the
/// unit: every failure path lands in a terminal state and the batch moves on.
pub struct UnitPipeline {
    clip: SegmentClip,
    state: UnitState,
    identity: Option<Identity>,
    job: Option<JobHandle>,
    artifact: Option<ResultArtifact>,
    resets_used: u8,
    failure: Option<String>,
}

impl UnitPipeline {
    pub fn new(clip: SegmentClip) -> Self {
        Self {
            clip,
            state: UnitState::PendingIdentity,
            identity: None,
            job: None,
            artifact: None,
            resets_used: 0,
            failure: None,
        }
    }

    pub fn index(&self) -> usize {
        self.clip.index()
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn artifact(&self) -> Option<&ResultArtifact> {
        self.artifact.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Drive the unit from `PendingIdentity` up to `Polling` (job observed
    /// running). Returns the reached state; terminal states mean the unit is
    /// out of the batch.
    pub async fn run_submission(&mut self, cx: &UnitContext<'_>) -> UnitState {
        debug_assert_eq!(self.state, UnitState::PendingIdentity);

        // Identity acquisition, with the single bounded reset retry.
        let identity = match cx.identities.acquire().await {
            Ok(identity) => identity,
            Err(SynclipError::InvalidIdentity { address }) => {
                match self.reset_once(cx, Identity::unverified(address)).await {
                    Some(identity) => identity,
                    None => return self.abandon("identity rejected and reset exhausted"),
                }
            }
            Err(e) => return self.fail(e),
        };
        info!("[unit {}] identity {}", self.index(), identity.address);
        self.identity = Some(identity);
        self.state = UnitState::IdentityReady;

        // Verification.
        if let Some(state) = self.verify_identity(cx).await {
            return state;
        }
        self.state = UnitState::Submitting;

        // Submission.
        let identity = self.identity.as_ref().expect("identity set after verify");
        let job = match cx
            .service
            .submit(&self.clip.path, cx.video, identity)
            .await
        {
            Ok(job) => job,
            Err(e) => return self.fail(e),
        };
        info!("[unit {}] submitted job {}", self.index(), job.id);
        self.job = Some(job);
        self.state = UnitState::Submitted;

        // Bounded wait for the job to leave the queue. Not observing a start
        // is a soft failure: this unit is dropped, the batch continues.
        match self.wait_for_start(cx).await {
            Ok(()) => {
                self.state = UnitState::Polling;
                self.state
            }
            Err(e) => self.fail(e),
        }
    }

    /// Drive a unit that reached `Polling` to completion: wait out the remote
    /// render, fetch the result, write the artifact.
    pub async fn run_collection(&mut self, cx: &UnitContext<'_>) -> UnitState {
        if self.state != UnitState::Polling {
            return self.state;
        }

        let job = self.job.clone().expect("job set before polling");
        let mut consecutive_errors = 0u32;

        // Remote processing duration is externally controlled; this loop has
        // no deadline by design.
        loop {
            match cx.service.poll_status(&job).await {
                Ok(JobStatus::Done) => break,
                Ok(JobStatus::Failed) => {
                    return self.fail(SynclipError::JobFailed(format!(
                        "job {} reported failure",
                        job.id
                    )));
                }
                Ok(status) => {
                    consecutive_errors = 0;
                    debug!("[unit {}] job {} {status}", self.index(), job.id);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "[unit {}] status poll error ({consecutive_errors}/{MAX_POLL_ERRORS}): {e}",
                        self.index()
                    );
                    if consecutive_errors >= MAX_POLL_ERRORS {
                        return self.fail(e);
                    }
                }
            }
            tokio::time::sleep(cx.config.status_poll_interval()).await;
        }

        let expected = cx.output_dir.join(artifact_name(self.index()));

        match cx.service.fetch_result(&job).await {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&expected, bytes) {
                    return self.fail(e.into());
                }
                info!("[unit {}] result saved to {}", self.index(), expected.display());
            }
            Err(e) => {
                warn!("[unit {}] automated retrieval failed: {e}", self.index());
                if !self.manual_retrieve(cx, &expected) {
                    return self.fail(e);
                }
            }
        }

        self.artifact = Some(ResultArtifact {
            index: self.index(),
            path: expected,
        });
        // Identities are single-use: discarded the moment the unit terminates.
        self.identity = None;
        self.state = UnitState::Done;
        self.state
    }

    /// Poll the inbox for a verification code, then verify. An invalid
    /// identity at this stage consumes the same single reset retry as an
    /// acquire-time rejection.
    async fn verify_identity(&mut self, cx: &UnitContext<'_>) -> Option<UnitState> {
        let code = match self.wait_for_code(cx).await {
            Some(code) => code,
            None => return Some(self.abandon("no verification code obtained")),
        };

        let identity = self.identity.take().expect("identity set before verify");
        let verified = match cx.identities.verify(identity, &code).await {
            Ok(verified) => verified,
            Err(SynclipError::InvalidIdentity { address }) => {
                let fresh = match self.reset_once(cx, Identity::unverified(address)).await {
                    Some(fresh) => fresh,
                    None => return Some(self.abandon("identity rejected and reset exhausted")),
                };
                // A fresh address means a fresh code.
                self.identity = Some(fresh.clone());
                let code = match self.wait_for_code(cx).await {
                    Some(code) => code,
                    None => return Some(self.abandon("no verification code after reset")),
                };
                self.identity = None;
                match cx.identities.verify(fresh, &code).await {
                    Ok(verified) => verified,
                    Err(e) => return Some(self.fail(e)),
                }
            }
            Err(e) => return Some(self.fail(e)),
        };

        let record = ProfileRecord::new(self.index(), &verified);
        if let Err(e) = record.save(cx.profiles_dir) {
            warn!("[unit {}] could not persist profile: {e}", self.index());
        }

        self.identity = Some(verified);
        None
    }

    /// Sweep the inbox until the code arrives or the timeout passes, then
    /// fall back to asking the operator.
    async fn wait_for_code(&self, cx: &UnitContext<'_>) -> Option<String> {
        let identity = self.identity.as_ref()?;
        let deadline = Instant::now() + cx.config.otp_timeout();

        info!("[unit {}] waiting for verification code", self.index());
        while Instant::now() < deadline {
            match cx.inbox.fetch_code(identity).await {
                Ok(Some(code)) => {
                    debug!("[unit {}] code received", self.index());
                    return Some(code);
                }
                Ok(None) => {}
                // Transient inbox errors just cost one poll interval.
                Err(e) => warn!("[unit {}] inbox sweep failed: {e}", self.index()),
            }
            tokio::time::sleep(cx.config.otp_poll_interval()).await;
        }

        warn!(
            "[unit {}] no code within {}s, asking operator",
            self.index(),
            cx.config.otp_timeout_secs
        );
        cx.prompt.request_code(&identity.address)
    }

    async fn wait_for_start(&self, cx: &UnitContext<'_>) -> Result<()> {
        let job = self.job.as_ref().expect("job set before start wait");

        for attempt in 1..=cx.config.started_poll_attempts {
            match cx.service.poll_status(job).await {
                Ok(JobStatus::Queued) => {
                    debug!(
                        "[unit {}] still queued ({attempt}/{})",
                        self.index(),
                        cx.config.started_poll_attempts
                    );
                }
                Ok(_) => return Ok(()),
                Err(e) => warn!("[unit {}] start poll error: {e}", self.index()),
            }
            tokio::time::sleep(cx.config.started_poll_interval()).await;
        }

        Err(SynclipError::Timeout(format!(
            "job for unit {} never left the queue",
            self.index()
        )))
    }

    /// Compatibility shim for a download that fired outside our control: the
    /// operator confirms the file landed, and the newest file that appeared
    /// in the output directory during the wait is renamed to the expected
    /// artifact name.
    fn manual_retrieve(&self, cx: &UnitContext<'_>, expected: &Path) -> bool {
        let before = list_files(cx.output_dir);

        if !cx.prompt.confirm_result_on_disk(expected) {
            return false;
        }

        if expected.exists() {
            return true;
        }

        let after = list_files(cx.output_dir);
        let mut new_files: Vec<PathBuf> = after.into_iter().filter(|p| !before.contains(p)).collect();
        new_files.sort_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        match new_files.last() {
            Some(newest) => match std::fs::rename(newest, expected) {
                Ok(()) => {
                    info!(
                        "[unit {}] renamed {} to {}",
                        self.index(),
                        newest.display(),
                        expected.display()
                    );
                    true
                }
                Err(e) => {
                    warn!("[unit {}] rename failed: {e}", self.index());
                    false
                }
            },
            None => {
                warn!("[unit {}] no new file appeared in output", self.index());
                false
            }
        }
    }

    async fn reset_once(&mut self, cx: &UnitContext<'_>, stale: Identity) -> Option<Identity> {
        if self.resets_used >= 1 {
            return None;
        }
        self.resets_used += 1;
        match cx.identities.reset(stale).await {
            Ok(fresh) => {
                info!("[unit {}] replacement identity {}", self.index(), fresh.address);
                Some(fresh)
            }
            Err(e) => {
                warn!("[unit {}] identity reset failed: {e}", self.index());
                None
            }
        }
    }

    fn fail(&mut self, error: SynclipError) -> UnitState {
        warn!("[unit {}] failed at {}: {error}", self.index(), self.state);
        self.failure = Some(error.to_string());
        self.release();
        self.state = UnitState::Failed;
        self.state
    }

    fn abandon(&mut self, reason: &str) -> UnitState {
        warn!("[unit {}] needs manual input: {reason}", self.index());
        self.failure = Some(reason.to_string());
        self.release();
        self.state = UnitState::NeedsManualInput;
        self.state
    }

    fn release(&mut self) {
        self.identity = None;
        self.job = None;
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default()
}
