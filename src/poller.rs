use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{PollSettings, RetrySettings};
use crate::error::Result;
use crate::executor::bounded;
use crate::job::{JobHandle, JobStatus, parse_status};
use crate::progress::{ProgressEvent, ProgressObserver, Stage, TracingObserver, notify};
use crate::retry::send_with_retry;
use crate::transport::{HttpRequest, Transport};
use crate::util::{Backoff, append_query};

/// Polls one job until it reaches a terminal state.
///
/// Intervals follow [`PollSettings`]: exponential, capped, jittered and never
/// decreasing. Once a terminal status has been seen it is cached, and later
/// calls to [`poll`](Self::poll) return it without touching the network.
pub struct JobStatusPoller {
    transport: Arc<dyn Transport>,
    handle: JobHandle,
    status_url: String,
    retry: RetrySettings,
    observer: Arc<dyn ProgressObserver>,
    backoff: Backoff,
    started: Instant,
    polls: u32,
    terminal: Option<JobStatus>,
}

impl JobStatusPoller {
    pub fn new(transport: Arc<dyn Transport>, handle: JobHandle, credential: &str) -> Self {
        let settings = PollSettings::default();
        Self {
            transport,
            status_url: append_query(&handle.status_url, &[("apikey", credential)]),
            handle,
            retry: RetrySettings::default(),
            observer: Arc::new(TracingObserver),
            backoff: backoff_for(&settings),
            started: Instant::now(),
            polls: 0,
            terminal: None,
        }
    }

    pub fn with_settings(mut self, settings: PollSettings) -> Self {
        self.backoff = backoff_for(&settings);
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// Status requests sent so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Waits for a terminal state, or fails with `Timeout` at `deadline`.
    pub async fn poll(
        &mut self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<JobStatus> {
        if let Some(done) = &self.terminal {
            return Ok(done.clone());
        }

        let status = bounded(self.poll_until_terminal(), deadline, cancel).await?;
        self.terminal = Some(status.clone());
        Ok(status)
    }

    async fn poll_until_terminal(&mut self) -> Result<JobStatus> {
        loop {
            let status = self.poll_once().await?;
            notify(
                self.observer.as_ref(),
                ProgressEvent::JobStatus {
                    job_id: self.handle.id.clone(),
                    state: status.state,
                    elapsed: self.started.elapsed(),
                },
            );
            if status.state.is_terminal() {
                return Ok(status);
            }
            let delay = self.backoff.next_delay();
            tracing::debug!(
                job_id = %self.handle.id,
                state = %status.state,
                delay_ms = delay.as_millis() as u64,
                "job not finished yet"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn poll_once(&mut self) -> Result<JobStatus> {
        self.polls += 1;
        let request = HttpRequest::get(self.status_url.clone());
        let resp = send_with_retry(
            self.transport.as_ref(),
            &request,
            &self.retry,
            Stage::Poll,
            self.observer.as_ref(),
        )
        .await?;
        parse_status(&resp.body, &self.handle.status_url)
    }
}

fn backoff_for(settings: &PollSettings) -> Backoff {
    Backoff::new(
        settings.base_interval,
        settings.max_interval,
        settings.multiplier,
        settings.jitter,
    )
}
