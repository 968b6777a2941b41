//! One query, end to end: submit, poll if deferred, fetch, decode.

use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::config::ClientConfig;
use crate::error::{Error, JOB_QUEUE_REQUIRED, Result};
use crate::job::{JobHandle, JobState, parse_job_id};
use crate::model::DatasetResult;
use crate::poller::JobStatusPoller;
use crate::progress::{ProgressEvent, ProgressObserver, Stage, notify};
use crate::query::Query;
use crate::retry::send_with_retry;
use crate::transport::{HttpRequest, Transport};
use crate::util::{append_query, urljoin};

/// Where an execution is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Submitted,
    Polling,
    Fetching,
    Decoding,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExecutionState::Submitted => "submitted",
            ExecutionState::Polling => "polling",
            ExecutionState::Fetching => "fetching",
            ExecutionState::Decoding => "decoding",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::TimedOut => "timed out",
            ExecutionState::Cancelled => "cancelled",
        })
    }
}

impl ExecutionState {
    fn for_error(err: &Error) -> Self {
        match err {
            Error::Timeout(_) => ExecutionState::TimedOut,
            Error::Cancelled => ExecutionState::Cancelled,
            _ => ExecutionState::Failed,
        }
    }
}

enum Submission {
    Immediate(Vec<u8>),
    Deferred(JobHandle),
}

/// Runs queries against the Dataset API.
///
/// Holds no per-query state; one executor can serve many concurrent
/// executions.
#[derive(Clone)]
pub struct QueryExecutor {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    observer: Arc<dyn ProgressObserver>,
}

impl QueryExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<ClientConfig>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            transport,
            config,
            observer,
        }
    }

    /// Executes `query` and decodes the protobuf payload.
    pub async fn execute(
        &self,
        query: &Query,
        credential: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DatasetResult> {
        let started = Instant::now();
        notify(self.observer.as_ref(), ProgressEvent::Started);
        let outcome = async {
            let format = [("format", json!("protobuf"))];
            let bytes =
                bounded(self.fetch_payload(query, credential, &format, deadline, cancel), deadline, cancel)
                    .await?;
            enter(ExecutionState::Decoding);
            notify(
                self.observer.as_ref(),
                ProgressEvent::Decoding { bytes: bytes.len() },
            );
            Ok::<_, Error>(codec::decode(&bytes)?)
        }
        .await;
        self.finish(outcome, started)
    }

    /// Executes `query` with the caller's own `format` and returns the body as is.
    pub async fn execute_raw(
        &self,
        query: &Query,
        credential: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let started = Instant::now();
        notify(self.observer.as_ref(), ProgressEvent::Started);
        let outcome = bounded(
            self.fetch_payload(query, credential, &[], deadline, cancel),
            deadline,
            cancel,
        )
        .await;
        self.finish(outcome, started)
    }

    fn finish<T>(&self, outcome: Result<T>, started: Instant) -> Result<T> {
        match &outcome {
            Ok(_) => {
                enter(ExecutionState::Completed);
                notify(
                    self.observer.as_ref(),
                    ProgressEvent::Completed {
                        elapsed: started.elapsed(),
                    },
                );
            }
            Err(e) => {
                let state = ExecutionState::for_error(e);
                tracing::debug!(%state, error = %e, "execution ended");
                notify(
                    self.observer.as_ref(),
                    ProgressEvent::Ended {
                        state,
                        error: e.to_string(),
                    },
                );
            }
        }
        outcome
    }

    /// Submitted → (Polling → Fetching)? → payload bytes.
    async fn fetch_payload(
        &self,
        query: &Query,
        credential: &str,
        overrides: &[(&str, Value)],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let handle = match self.submit(query, credential, overrides).await? {
            Submission::Immediate(bytes) => return Ok(bytes),
            Submission::Deferred(handle) => handle,
        };

        enter(ExecutionState::Polling);
        let mut poller = JobStatusPoller::new(self.transport.clone(), handle.clone(), credential)
            .with_settings(self.config.poll)
            .with_retry(self.config.retry)
            .with_observer(self.observer.clone());
        let status = poller.poll(deadline, cancel).await?;
        if status.state == JobState::Failed {
            return Err(Error::JobFailed {
                job_id: handle.id,
                message: status
                    .message
                    .unwrap_or_else(|| "job failed".to_string()),
            });
        }

        enter(ExecutionState::Fetching);
        notify(
            self.observer.as_ref(),
            ProgressEvent::Fetching {
                job_id: handle.id.clone(),
            },
        );
        let request = HttpRequest::get(append_query(&handle.result_url, &[("apikey", credential)]));
        let resp = send_with_retry(
            self.transport.as_ref(),
            &request,
            &self.config.retry,
            Stage::Fetch,
            self.observer.as_ref(),
        )
        .await?;
        Ok(resp.body)
    }

    async fn submit(
        &self,
        query: &Query,
        credential: &str,
        overrides: &[(&str, Value)],
    ) -> Result<Submission> {
        enter(ExecutionState::Submitted);
        let url = append_query(
            &urljoin(&self.config.base_url, "/dataset/query"),
            &[("apikey", credential)],
        );

        if !self.config.run_on_job_queue {
            notify(
                self.observer.as_ref(),
                ProgressEvent::Submitted { job_queue: false },
            );
            let request = HttpRequest::post_json(&url, query.wire_body(overrides));
            match self.send(&request, Stage::Submit).await {
                Ok(resp) if resp.status == 202 => {
                    return Ok(Submission::Deferred(self.deferred(&resp.body)?));
                }
                Ok(resp) => return Ok(Submission::Immediate(resp.body)),
                Err(Error::Service { status: 400, message }) if message == JOB_QUEUE_REQUIRED => {
                    tracing::info!("query too large for a direct answer, starting job on queue");
                }
                Err(e) => return Err(e),
            }
        }

        notify(
            self.observer.as_ref(),
            ProgressEvent::Submitted { job_queue: true },
        );
        let mut queued = overrides.to_vec();
        queued.push(("runOnJobQueue", Value::Bool(true)));
        let request = HttpRequest::post_json(&url, query.wire_body(&queued));
        let resp = self.send(&request, Stage::Submit).await?;
        Ok(Submission::Deferred(self.deferred(&resp.body)?))
    }

    fn deferred(&self, body: &[u8]) -> Result<JobHandle> {
        let id = parse_job_id(body)?;
        tracing::info!(job_id = %id, "waiting until job has finished");
        notify(
            self.observer.as_ref(),
            ProgressEvent::Deferred { job_id: id.clone() },
        );
        Ok(JobHandle::new(
            id,
            &self.config.base_url,
            &self.config.result_url,
        ))
    }

    async fn send(
        &self,
        request: &HttpRequest,
        stage: Stage,
    ) -> Result<crate::transport::HttpResponse> {
        send_with_retry(
            self.transport.as_ref(),
            request,
            &self.config.retry,
            stage,
            self.observer.as_ref(),
        )
        .await
    }
}

fn enter(state: ExecutionState) {
    tracing::debug!(%state, "execution state changed");
}

/// Runs `fut` until it finishes, `deadline` passes, or `cancel` fires.
/// Whatever `fut` was waiting on is dropped in the latter two cases.
pub(crate) async fn bounded<F, T>(
    fut: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let budget = deadline.saturating_duration_since(Instant::now());
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = tokio::time::timeout_at(deadline, fut) => res.unwrap_or(Err(Error::Timeout(budget))),
    }
}
