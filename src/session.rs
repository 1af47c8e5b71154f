//! Generation session: the polling state machine.
//!
//! Bridges the slow asynchronous provider job (2-5 minutes of rendering) to
//! a responsive front-end. One session owns at most one polling loop; the
//! loop runs on a single spawned task, and the repeating poll timer and the
//! one-shot deadline live inside that task so aborting it cancels both
//! together. State is published through a `tokio::sync::watch` channel that
//! the UI observes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::kie::{build_prompt, GenerationRequest, JobStatus, KieClient, KieError, QualityMode};

/// Default interval between status polls (5 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default overall deadline from submission (300 seconds).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

/// Poll count at which the open-loop progress estimate saturates
/// (36 polls at 5 s is roughly the typical 3-minute render).
const PROGRESS_FULL_SCALE_POLLS: f32 = 36.0;

/// Ceiling for displayed progress while the job is still pending.
const PROGRESS_CAP: f32 = 0.9;

static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Install a Ctrl+C handler that flips a flag checked by the render loop.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
    })
}

/// Consume a pending Ctrl+C, clearing the flag. Lets the interactive flow
/// cancel one generation and still offer another.
pub fn take_ctrlc_received() -> bool {
    CTRLC_RECEIVED.swap(false, Ordering::SeqCst)
}

/// User-supplied parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub product: String,
    pub hook: String,
    pub image_url: String,
    pub mode: QualityMode,
}

impl GenerationParams {
    /// Build the provider request: templated prompt plus the fixed
    /// vertical-ad settings.
    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest::new(build_prompt(&self.product, &self.hook), &self.image_url)
            .with_mode(self.mode)
    }
}

/// Timing policy for the polling loop. Defaults match production; tests
/// shrink both values.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// Single source of truth driving rendering. Replaced, never mutated;
/// transitions are one-directional and terminal states only leave via an
/// explicit [`GenerationSession::reset`].
#[derive(Debug, Clone, PartialEq)]
pub enum UiState {
    /// No job in flight; the form is shown.
    Idle,
    /// Submission request is in flight.
    Submitting,
    /// Job accepted; polling for completion.
    InProgress { task_id: String, polls: u32 },
    /// Job finished with a deliverable video.
    Done { video_url: String },
    /// Submission or generation failed.
    Failed { message: String },
    /// The deadline elapsed before the job reached a terminal state.
    TimedOut,
}

impl UiState {
    /// Terminal states end the polling loop and require a reset to leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UiState::Done { .. } | UiState::Failed { .. } | UiState::TimedOut
        )
    }
}

/// Displayed progress fraction for a pending job.
///
/// Open-loop heuristic: true render time is unknown, so progress climbs
/// with the poll count and saturates below 1.0 until the provider actually
/// completes.
pub fn progress_fraction(polls: u32) -> f32 {
    (polls as f32 / PROGRESS_FULL_SCALE_POLLS).min(PROGRESS_CAP)
}

/// Publishes state on behalf of one spawned polling loop.
///
/// Carries the generation number it was spawned under. The check against
/// the session's current generation happens inside the watch channel's
/// lock, so once [`GenerationSession::cancel_job`] has bumped the
/// generation, a straggling publish from the old loop is a no-op rather
/// than a late overwrite.
struct StatePublisher {
    tx: watch::Sender<UiState>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl StatePublisher {
    fn publish(&self, state: UiState) {
        self.tx.send_if_modified(|slot| {
            if self.current.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            *slot = state;
            true
        });
    }
}

/// Owns the polling loop for one UI session.
pub struct GenerationSession {
    client: Arc<KieClient>,
    config: SessionConfig,
    state_tx: watch::Sender<UiState>,
    generation: Arc<AtomicU64>,
    job: Option<JoinHandle<()>>,
}

impl GenerationSession {
    pub fn new(client: Arc<KieClient>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(UiState::Idle);
        Self {
            client,
            config,
            state_tx,
            generation: Arc::new(AtomicU64::new(0)),
            job: None,
        }
    }

    /// Subscribe to state transitions. The receiver always sees the latest
    /// state; intermediate states may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> UiState {
        self.state_tx.borrow().clone()
    }

    /// Submit a job and start polling.
    ///
    /// Any previous polling loop is cancelled first: at most one loop is
    /// active per session. The first status check happens one full poll
    /// interval after submission.
    pub fn start_generation(&mut self, params: GenerationParams) {
        self.cancel_job();

        let client = Arc::clone(&self.client);
        let config = self.config;
        let publisher = StatePublisher {
            tx: self.state_tx.clone(),
            current: Arc::clone(&self.generation),
            generation: self.generation.load(Ordering::SeqCst),
        };

        self.job = Some(tokio::spawn(run_generation(
            client, config, publisher, params,
        )));
    }

    /// Abort the polling loop (if any) and return to `Idle`, clearing the
    /// job id, video URL, and poll counter.
    pub fn reset(&mut self) {
        self.cancel_job();
        self.state_tx.send_replace(UiState::Idle);
    }

    /// Abort the spawned task. The poll interval and the deadline timer
    /// both live on that task, so this cancels them together. Abort alone
    /// is not enough on a multithreaded runtime: a task already past its
    /// last await point can still run to its next publish, so the
    /// generation is bumped first and that publish becomes a no-op.
    fn cancel_job(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }
}

impl Drop for GenerationSession {
    fn drop(&mut self) {
        self.cancel_job();
    }
}

/// The submit-then-poll loop, run on its own task.
async fn run_generation(
    client: Arc<KieClient>,
    config: SessionConfig,
    publisher: StatePublisher,
    params: GenerationParams,
) {
    publisher.publish(UiState::Submitting);

    let request = params.to_request();
    let handle = match client.submit_job(&request).await {
        Ok(handle) => handle,
        Err(e) => {
            // Submission errors abort the whole attempt; the UI shows the
            // message and the session is immediately retryable.
            log::error!("Submission failed: {}", e);
            publisher.publish(UiState::Failed {
                message: format!("Submission failed: {}", e),
            });
            return;
        }
    };

    let mut polls: u32 = 0;
    publisher.publish(UiState::InProgress {
        task_id: handle.task_id.clone(),
        polls,
    });

    // Two timers, one task: the repeating poll interval and the one-shot
    // deadline. The deadline, not the attempt count, is authoritative.
    let start = tokio::time::Instant::now();
    let deadline = tokio::time::sleep_until(start + config.deadline);
    tokio::pin!(deadline);
    let mut interval =
        tokio::time::interval_at(start + config.poll_interval, config.poll_interval);

    loop {
        tokio::select! {
            biased;

            _ = &mut deadline => {
                log::error!(
                    "Job {} did not finish within {:?}",
                    handle.task_id,
                    config.deadline
                );
                publisher.publish(UiState::TimedOut);
                return;
            }

            _ = interval.tick() => {
                polls += 1;
                match client.job_status(&handle).await {
                    Ok(JobStatus::Pending) => {
                        log::debug!("Job {} still pending (poll {})", handle.task_id, polls);
                        publisher.publish(UiState::InProgress {
                            task_id: handle.task_id.clone(),
                            polls,
                        });
                    }
                    Ok(JobStatus::Completed { video_url }) => {
                        log::info!("Job {} completed: {}", handle.task_id, video_url);
                        publisher.publish(UiState::Done { video_url });
                        return;
                    }
                    Ok(JobStatus::Failed { reason }) => {
                        log::error!("Job {} failed: {}", handle.task_id, reason);
                        publisher.publish(UiState::Failed {
                            message: format!("Video generation failed: {}", reason),
                        });
                        return;
                    }
                    // One flaky network blip or gateway 5xx must not cancel
                    // a multi-minute job; transport-level errors are
                    // swallowed and the next scheduled poll proceeds.
                    Err(KieError::Http(e)) => {
                        log::warn!("Poll {} failed, will retry: {}", polls, e);
                        publisher.publish(UiState::InProgress {
                            task_id: handle.task_id.clone(),
                            polls,
                        });
                    }
                    // A success record with no retrievable asset is
                    // terminal; only the response body can declare the job
                    // dead.
                    Err(e) => {
                        log::error!("Poll {} failed fatally: {}", polls, e);
                        publisher.publish(UiState::Failed {
                            message: e.to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_starts_at_zero() {
        assert_eq!(progress_fraction(0), 0.0);
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut last = -1.0f32;
        for polls in 0..120 {
            let p = progress_fraction(polls);
            assert!(p >= last, "progress must be non-decreasing");
            assert!((0.0..=PROGRESS_CAP).contains(&p));
            last = p;
        }
        assert_eq!(progress_fraction(36), PROGRESS_CAP);
        assert_eq!(progress_fraction(1000), PROGRESS_CAP);
    }

    #[test]
    fn progress_midpoint() {
        let p = progress_fraction(18);
        assert!((p - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ui_state_terminality() {
        assert!(!UiState::Idle.is_terminal());
        assert!(!UiState::Submitting.is_terminal());
        assert!(!UiState::InProgress {
            task_id: "t".to_string(),
            polls: 3
        }
        .is_terminal());
        assert!(UiState::Done {
            video_url: "https://cdn/out.mp4".to_string()
        }
        .is_terminal());
        assert!(UiState::Failed {
            message: "boom".to_string()
        }
        .is_terminal());
        assert!(UiState::TimedOut.is_terminal());
    }

    #[test]
    fn params_build_templated_request() {
        let params = GenerationParams {
            product: "AirPods".to_string(),
            hook: "All day battery".to_string(),
            image_url: "https://img/a.jpg".to_string(),
            mode: QualityMode::Pro,
        };
        let request = params.to_request();
        assert!(request.prompt.contains("unboxing AirPods"));
        assert!(request.prompt.contains("All day battery"));
        assert_eq!(request.source_image_url, "https://img/a.jpg");
        assert_eq!(request.duration, "15");
        assert_eq!(request.aspect_ratio, "9:16");
    }

    #[test]
    fn default_policy_values() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.deadline, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn session_starts_idle() {
        let client = Arc::new(KieClient::with_api_key("test-key".to_string()).unwrap());
        let session = GenerationSession::new(client, SessionConfig::default());
        assert_eq!(session.state(), UiState::Idle);
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let client = Arc::new(KieClient::with_api_key("test-key".to_string()).unwrap());
        let mut session = GenerationSession::new(client, SessionConfig::default());
        let mut rx = session.subscribe();

        session.start_generation(GenerationParams {
            product: "X".to_string(),
            hook: "Y".to_string(),
            // The spawned task never gets to run before the abort below,
            // so no real request is issued.
            image_url: "https://img/a.jpg".to_string(),
            mode: QualityMode::Standard,
        });

        session.reset();
        assert_eq!(*rx.borrow_and_update(), UiState::Idle);
        assert_eq!(session.state(), UiState::Idle);
    }
}
