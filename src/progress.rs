//! Advisory progress notifications.
//!
//! Observers see what the pipeline is doing; nothing they do (including
//! panicking) changes the outcome of a query.

use indicatif::{ProgressBar, ProgressStyle};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::executor::ExecutionState;
use crate::job::JobState;

/// Pipeline stage an event or retry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Submit,
    Poll,
    Fetch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Submit => "submit",
            Stage::Poll => "poll",
            Stage::Fetch => "fetch",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// An execution began. Every execution ends with `Completed` or `Ended`.
    Started,
    Submitted {
        job_queue: bool,
    },
    Deferred {
        job_id: String,
    },
    JobStatus {
        job_id: String,
        state: JobState,
        elapsed: Duration,
    },
    RetryScheduled {
        stage: Stage,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Fetching {
        job_id: String,
    },
    Decoding {
        bytes: usize,
    },
    Completed {
        elapsed: Duration,
    },
    /// The execution ended without a result.
    Ended {
        state: ExecutionState,
        error: String,
    },
}

pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Delivers `event`, swallowing observer panics.
pub(crate) fn notify(observer: &dyn ProgressObserver, event: ProgressEvent) {
    if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
        tracing::warn!(?event, "progress observer panicked; ignoring");
    }
}

/// Logs every event through `tracing`. The default observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started => tracing::debug!("query started"),
            ProgressEvent::Submitted { job_queue } => {
                tracing::debug!(job_queue, "query submitted")
            }
            ProgressEvent::Deferred { job_id } => {
                tracing::info!(%job_id, "query deferred to job queue")
            }
            ProgressEvent::JobStatus {
                job_id,
                state,
                elapsed,
            } => tracing::info!(%job_id, %state, elapsed_s = elapsed.as_secs(), "job status"),
            ProgressEvent::RetryScheduled {
                stage,
                attempt,
                delay,
                error,
            } => tracing::warn!(
                %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "request failed, retrying"
            ),
            ProgressEvent::Fetching { job_id } => tracing::debug!(%job_id, "fetching job result"),
            ProgressEvent::Decoding { bytes } => tracing::debug!(bytes, "decoding payload"),
            ProgressEvent::Completed { elapsed } => {
                tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "query completed")
            }
            ProgressEvent::Ended { state, error } => {
                tracing::warn!(%state, %error, "query ended without result")
            }
        }
    }
}

/// Terminal spinner showing the latest state of the running queries.
///
/// One spinner covers every execution reported to this observer. It stays up
/// until the last running execution has completed or ended.
#[derive(Debug, Clone, Default)]
pub struct SpinnerObserver {
    state: Arc<Mutex<SpinnerState>>,
}

#[derive(Debug, Default)]
struct SpinnerState {
    bar: Option<ProgressBar>,
    active: usize,
}

impl SpinnerState {
    fn bar(&mut self) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        })
    }

    fn show(&mut self, msg: String) {
        let msg = if self.active > 1 {
            format!("[{} running] {msg}", self.active)
        } else {
            msg
        };
        self.bar().set_message(msg);
    }

    /// One execution left; the spinner goes away with the last one.
    fn leave(&mut self, last_words: Option<String>) {
        self.active = self.active.saturating_sub(1);
        if self.active > 0 {
            let still = self.active;
            self.show(format!("{still} quer{} still running", if still == 1 { "y" } else { "ies" }));
            return;
        }
        if let Some(pb) = self.bar.take() {
            match last_words {
                Some(msg) => pb.abandon_with_message(msg),
                None => pb.finish_and_clear(),
            }
        }
    }
}

impl SpinnerObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SpinnerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executions currently shown by the spinner.
    pub fn active(&self) -> usize {
        self.state().active
    }

    pub fn is_visible(&self) -> bool {
        self.state().bar.is_some()
    }
}

impl ProgressObserver for SpinnerObserver {
    fn on_event(&self, event: &ProgressEvent) {
        let mut st = self.state();
        match event {
            ProgressEvent::Started => {
                st.active += 1;
                st.show("starting".to_string());
            }
            ProgressEvent::Submitted { job_queue: false } => st.show("querying".to_string()),
            ProgressEvent::Submitted { job_queue: true } => {
                st.show("submitting to job queue".to_string())
            }
            ProgressEvent::Deferred { job_id } => st.show(format!("job {job_id}: queued")),
            ProgressEvent::JobStatus { job_id, state, .. } => {
                st.show(format!("job {job_id}: {state}"))
            }
            ProgressEvent::RetryScheduled {
                stage,
                attempt,
                delay,
                ..
            } => st.show(format!(
                "{stage} failed, retry {attempt} in {:.1}s",
                delay.as_secs_f64()
            )),
            ProgressEvent::Fetching { job_id } => st.show(format!("job {job_id}: downloading")),
            ProgressEvent::Decoding { bytes } => st.show(format!("decoding {bytes} bytes")),
            ProgressEvent::Completed { .. } => st.leave(None),
            ProgressEvent::Ended { state, .. } => st.leave(Some(format!("query {state}"))),
        }
    }
}

/// Forwards events into a channel; a closed receiver is ignored.
impl ProgressObserver for UnboundedSender<ProgressEvent> {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicky;

    impl ProgressObserver for Panicky {
        fn on_event(&self, _event: &ProgressEvent) {
            panic!("observer bug");
        }
    }

    #[test]
    fn panicking_observer_is_contained() {
        notify(&Panicky, ProgressEvent::Decoding { bytes: 1 });
    }

    #[test]
    fn channel_observer_forwards_and_ignores_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        notify(&tx, ProgressEvent::Submitted { job_queue: true });
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Submitted { job_queue: true }
        );
        drop(rx);
        notify(&tx, ProgressEvent::Decoding { bytes: 3 });
    }

    #[test]
    fn spinner_accepts_every_event() {
        let obs = SpinnerObserver::new();
        obs.on_event(&ProgressEvent::Deferred {
            job_id: "7".into(),
        });
        obs.on_event(&ProgressEvent::JobStatus {
            job_id: "7".into(),
            state: JobState::Running,
            elapsed: Duration::from_secs(3),
        });
        obs.on_event(&ProgressEvent::Completed {
            elapsed: Duration::from_secs(4),
        });
        assert!(!obs.is_visible());
    }

    #[test]
    fn spinner_outlives_the_first_of_two_queries() {
        let obs = SpinnerObserver::new();
        obs.on_event(&ProgressEvent::Started);
        obs.on_event(&ProgressEvent::Started);
        assert_eq!(obs.active(), 2);

        obs.on_event(&ProgressEvent::Completed {
            elapsed: Duration::from_secs(1),
        });
        assert_eq!(obs.active(), 1);
        assert!(obs.is_visible());
        obs.on_event(&ProgressEvent::Deferred {
            job_id: "9".into(),
        });

        obs.on_event(&ProgressEvent::Ended {
            state: ExecutionState::Failed,
            error: "boom".into(),
        });
        assert_eq!(obs.active(), 0);
        assert!(!obs.is_visible());

        // A later query gets a fresh spinner.
        obs.on_event(&ProgressEvent::Started);
        assert!(obs.is_visible());
        obs.on_event(&ProgressEvent::Completed {
            elapsed: Duration::from_secs(1),
        });
        assert!(!obs.is_visible());
    }
}
