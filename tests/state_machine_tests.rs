//! State machine tests for the unit pipeline and batch coordinator.
//!
//! All remote capabilities are mocked; no network or FFmpeg required.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use synclip::audio::{Segment, SegmentClip};
use synclip::batch::BatchCoordinator;
use synclip::config::UnitConfig;
use synclip::error::{Result, SynclipError};
use synclip::provision::{CodeInbox, Identity, IdentityProvider, OperatorPrompt};
use synclip::remote::{JobHandle, JobStatus, RemoteJobService};
use synclip::unit::{UnitContext, UnitPipeline, UnitState};

// ============================================================================
// Mock capabilities
// ============================================================================

/// Identity provider with an optional poisoned acquire call (0-based) whose
/// replacement attempts can also be poisoned.
#[derive(Default)]
struct MockProvider {
    acquire_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    poison_acquire_call: Option<usize>,
    poison_resets: bool,
}

impl MockProvider {
    fn poisoned(call: usize, poison_resets: bool) -> Self {
        Self {
            poison_acquire_call: Some(call),
            poison_resets,
            ..Default::default()
        }
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn acquire(&self) -> Result<Identity> {
        let call = self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let address = format!("user{call}@mail.test");
        if self.poison_acquire_call == Some(call) {
            return Err(SynclipError::InvalidIdentity { address });
        }
        Ok(Identity::unverified(address))
    }

    async fn reset(&self, stale: Identity) -> Result<Identity> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if self.poison_resets {
            return Err(SynclipError::InvalidIdentity {
                address: stale.address,
            });
        }
        Ok(Identity::unverified(format!("fresh-{}", stale.address)))
    }

    async fn verify(&self, identity: Identity, code: &str) -> Result<Identity> {
        assert_eq!(code, "482913");
        Ok(Identity {
            session_token: Some(format!("tok-{}", identity.address)),
            address: identity.address,
        })
    }
}

struct MockInbox {
    code: Option<String>,
}

#[async_trait]
impl CodeInbox for MockInbox {
    async fn fetch_code(&self, _identity: &Identity) -> Result<Option<String>> {
        Ok(self.code.clone())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ServiceMode {
    /// First poll sees processing, second sees done.
    Completes,
    /// Every poll sees queued; the job never starts.
    NeverStarts,
    /// The job starts, then reports failure.
    FailsAfterStart,
}

struct MockService {
    mode: ServiceMode,
    fail_fetch: bool,
    submit_calls: AtomicUsize,
    polls: Mutex<HashMap<String, usize>>,
}

impl MockService {
    fn new(mode: ServiceMode) -> Self {
        Self {
            mode,
            fail_fetch: false,
            submit_calls: AtomicUsize::new(0),
            polls: Mutex::new(HashMap::new()),
        }
    }

    fn failing_fetch(mode: ServiceMode) -> Self {
        Self {
            fail_fetch: true,
            ..Self::new(mode)
        }
    }
}

#[async_trait]
impl RemoteJobService for MockService {
    async fn submit(&self, _audio: &Path, _video: &Path, identity: &Identity) -> Result<JobHandle> {
        assert!(identity.is_verified(), "submit requires a verified identity");
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JobHandle {
            id: format!("job_{n}"),
            session_token: identity.session_token.clone().unwrap(),
        })
    }

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job.id.clone()).or_insert(0);
        let seen = *count;
        *count += 1;

        Ok(match self.mode {
            ServiceMode::NeverStarts => JobStatus::Queued,
            ServiceMode::Completes => {
                if seen == 0 {
                    JobStatus::Processing
                } else {
                    JobStatus::Done
                }
            }
            ServiceMode::FailsAfterStart => {
                if seen == 0 {
                    JobStatus::Processing
                } else {
                    JobStatus::Failed
                }
            }
        })
    }

    async fn fetch_result(&self, job: &JobHandle) -> Result<Vec<u8>> {
        if self.fail_fetch {
            return Err(SynclipError::JobFailed(format!(
                "download did not fire for {}",
                job.id
            )));
        }
        Ok(format!("render of {}", job.id).into_bytes())
    }
}

/// Operator prompt that optionally plants a file in the output directory
/// before confirming, simulating a manual download.
#[derive(Default)]
struct MockPrompt {
    code: Option<String>,
    confirm: bool,
    plant_file: Option<PathBuf>,
    code_requests: AtomicUsize,
}

impl OperatorPrompt for MockPrompt {
    fn request_code(&self, _address: &str) -> Option<String> {
        self.code_requests.fetch_add(1, Ordering::SeqCst);
        self.code.clone()
    }

    fn confirm_result_on_disk(&self, _expected: &Path) -> bool {
        if let Some(path) = &self.plant_file {
            std::fs::write(path, b"manually downloaded").unwrap();
        }
        self.confirm
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn fast_config() -> UnitConfig {
    UnitConfig {
        otp_timeout_secs: 1,
        otp_poll_interval_secs: 0,
        started_poll_attempts: 3,
        started_poll_interval_secs: 0,
        status_poll_interval_secs: 0,
    }
}

/// Config with a zero code timeout, so the inbox is never swept and the
/// prompt is consulted immediately.
fn no_code_config() -> UnitConfig {
    UnitConfig {
        otp_timeout_secs: 0,
        ..fast_config()
    }
}

fn clip(index: usize) -> SegmentClip {
    SegmentClip {
        segment: Segment {
            index,
            start_ms: (index as u64 - 1) * 59_000,
            end_ms: index as u64 * 59_000,
        },
        path: PathBuf::from(format!("/tmp/seg_{index:02}.mp3")),
    }
}

struct Fixture {
    provider: MockProvider,
    inbox: MockInbox,
    service: MockService,
    prompt: MockPrompt,
    config: UnitConfig,
    video: PathBuf,
    output_dir: tempfile::TempDir,
    profiles_dir: tempfile::TempDir,
}

impl Fixture {
    fn new(provider: MockProvider, service: MockService) -> Self {
        Self {
            provider,
            inbox: MockInbox {
                code: Some("482913".to_string()),
            },
            service,
            prompt: MockPrompt::default(),
            config: fast_config(),
            video: PathBuf::from("/tmp/video_safe.mp4"),
            output_dir: tempfile::tempdir().unwrap(),
            profiles_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn context(&self) -> UnitContext<'_> {
        UnitContext {
            identities: &self.provider,
            inbox: &self.inbox,
            service: &self.service,
            prompt: &self.prompt,
            config: &self.config,
            video: &self.video,
            output_dir: self.output_dir.path(),
            profiles_dir: self.profiles_dir.path(),
        }
    }
}

async fn drive(unit: &mut UnitPipeline, cx: &UnitContext<'_>) -> UnitState {
    let state = unit.run_submission(cx).await;
    if state == UnitState::Polling {
        unit.run_collection(cx).await
    } else {
        state
    }
}

// ============================================================================
// Unit pipeline tests
// ============================================================================

#[tokio::test]
async fn test_unit_happy_path() {
    let fixture = Fixture::new(MockProvider::default(), MockService::new(ServiceMode::Completes));
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Done);
    let artifact = unit.artifact().expect("artifact recorded");
    assert_eq!(artifact.index, 1);
    assert_eq!(
        artifact.path,
        fixture.output_dir.path().join("result_seg_01.mp4")
    );
    let bytes = std::fs::read(&artifact.path).unwrap();
    assert_eq!(bytes, b"render of job_0");
}

#[tokio::test]
async fn test_unit_persists_profile_record() {
    let fixture = Fixture::new(MockProvider::default(), MockService::new(ServiceMode::Completes));
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    drive(&mut unit, &cx).await;

    let profile = fixture.profiles_dir.path().join("profile_01.json");
    let raw = std::fs::read_to_string(profile).unwrap();
    assert!(raw.contains("user0@mail.test"));
    assert!(raw.contains("tok-user0@mail.test"));
}

#[tokio::test]
async fn test_unit_recovers_with_single_reset() {
    let fixture = Fixture::new(
        MockProvider::poisoned(0, false),
        MockService::new(ServiceMode::Completes),
    );
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Done);
    assert_eq!(fixture.provider.reset_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unit_exhausting_reset_needs_manual_input() {
    let fixture = Fixture::new(
        MockProvider::poisoned(0, true),
        MockService::new(ServiceMode::Completes),
    );
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = unit.run_submission(&cx).await;

    assert_eq!(state, UnitState::NeedsManualInput);
    assert_eq!(fixture.provider.reset_calls.load(Ordering::SeqCst), 1);
    assert!(unit.failure().is_some());
}

#[tokio::test]
async fn test_unit_no_code_falls_back_to_prompt() {
    let mut fixture = Fixture::new(
        MockProvider::default(),
        MockService::new(ServiceMode::Completes),
    );
    fixture.config = no_code_config();
    fixture.inbox = MockInbox { code: None };
    fixture.prompt = MockPrompt {
        code: Some("482913".to_string()),
        ..Default::default()
    };
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Done);
    assert_eq!(fixture.prompt.code_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unit_skipped_prompt_abandons() {
    let mut fixture = Fixture::new(
        MockProvider::default(),
        MockService::new(ServiceMode::Completes),
    );
    fixture.config = no_code_config();
    fixture.inbox = MockInbox { code: None };
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = unit.run_submission(&cx).await;

    assert_eq!(state, UnitState::NeedsManualInput);
    // The job was never submitted.
    assert_eq!(fixture.service.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unit_never_starting_job_is_soft_failure() {
    let fixture = Fixture::new(
        MockProvider::default(),
        MockService::new(ServiceMode::NeverStarts),
    );
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = unit.run_submission(&cx).await;

    assert_eq!(state, UnitState::Failed);
    assert!(unit.failure().unwrap().contains("never left the queue"));
}

#[tokio::test]
async fn test_unit_remote_job_failure() {
    let fixture = Fixture::new(
        MockProvider::default(),
        MockService::new(ServiceMode::FailsAfterStart),
    );
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Failed);
    assert!(unit.artifact().is_none());
}

#[tokio::test]
async fn test_unit_manual_retrieval_renames_new_file() {
    let mut fixture = Fixture::new(
        MockProvider::default(),
        MockService::failing_fetch(ServiceMode::Completes),
    );
    let planted = fixture.output_dir.path().join("download (3).mp4");
    fixture.prompt = MockPrompt {
        confirm: true,
        plant_file: Some(planted),
        ..Default::default()
    };
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Done);
    let expected = fixture.output_dir.path().join("result_seg_01.mp4");
    assert_eq!(std::fs::read(expected).unwrap(), b"manually downloaded");
}

#[tokio::test]
async fn test_unit_manual_retrieval_declined_fails() {
    let fixture = Fixture::new(
        MockProvider::default(),
        MockService::failing_fetch(ServiceMode::Completes),
    );
    let cx = fixture.context();

    let mut unit = UnitPipeline::new(clip(1));
    let state = drive(&mut unit, &cx).await;

    assert_eq!(state, UnitState::Failed);
    assert!(unit.artifact().is_none());
}

// ============================================================================
// Batch coordinator tests
// ============================================================================

#[tokio::test]
async fn test_batch_all_units_complete() {
    let fixture = Fixture::new(MockProvider::default(), MockService::new(ServiceMode::Completes));
    let cancelled = Arc::new(AtomicBool::new(false));
    let coordinator = BatchCoordinator::new(fixture.context(), cancelled).with_progress(false);

    let report = coordinator
        .run(vec![clip(1), clip(2), clip(3)])
        .await
        .unwrap();

    assert_eq!(report.stats.total_units, 3);
    assert_eq!(report.stats.completed_units, 3);
    assert_eq!(report.stats.failed_units, 0);
    let indices: Vec<usize> = report.artifacts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_batch_poisoned_unit_does_not_affect_siblings() {
    // Second acquire (unit 2) is rejected and its reset is rejected too;
    // units 1 and 3 must still complete.
    let fixture = Fixture::new(
        MockProvider::poisoned(1, true),
        MockService::new(ServiceMode::Completes),
    );
    let cancelled = Arc::new(AtomicBool::new(false));
    let coordinator = BatchCoordinator::new(fixture.context(), cancelled).with_progress(false);

    let report = coordinator
        .run(vec![clip(1), clip(2), clip(3)])
        .await
        .unwrap();

    assert_eq!(report.stats.completed_units, 2);
    assert_eq!(report.stats.manual_units, 1);
    assert_eq!(report.stats.failed_units, 0);

    let indices: Vec<usize> = report.artifacts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![1, 3], "failed unit is simply absent");
}

#[tokio::test]
async fn test_batch_soft_failures_continue() {
    let fixture = Fixture::new(
        MockProvider::default(),
        MockService::new(ServiceMode::NeverStarts),
    );
    let cancelled = Arc::new(AtomicBool::new(false));
    let coordinator = BatchCoordinator::new(fixture.context(), cancelled).with_progress(false);

    let report = coordinator.run(vec![clip(1), clip(2)]).await.unwrap();

    assert_eq!(report.stats.total_units, 2);
    assert_eq!(report.stats.submitted_units, 0);
    assert_eq!(report.stats.failed_units, 2);
    assert!(report.artifacts.is_empty());
}

#[tokio::test]
async fn test_batch_empty_input() {
    let fixture = Fixture::new(MockProvider::default(), MockService::new(ServiceMode::Completes));
    let cancelled = Arc::new(AtomicBool::new(false));
    let coordinator = BatchCoordinator::new(fixture.context(), cancelled).with_progress(false);

    let report = coordinator.run(Vec::new()).await.unwrap();
    assert_eq!(report.stats.total_units, 0);
    assert!(report.artifacts.is_empty());
}

#[tokio::test]
async fn test_batch_cancellation_before_first_unit() {
    let fixture = Fixture::new(MockProvider::default(), MockService::new(ServiceMode::Completes));
    let cancelled = Arc::new(AtomicBool::new(true));
    let coordinator = BatchCoordinator::new(fixture.context(), cancelled).with_progress(false);

    let result = coordinator.run(vec![clip(1)]).await;
    assert!(matches!(result, Err(SynclipError::Cancelled)));
}
