use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, PollSettings, RetrySettings, load_config};
use crate::error::{Error, Result};
use crate::executor::{QueryExecutor, bounded};
use crate::gate::ConcurrencyGate;
use crate::model::DatasetResult;
use crate::progress::{ProgressObserver, SpinnerObserver, TracingObserver};
use crate::query::Query;
use crate::transport::{ReqwestTransport, Transport};

/// Dataset API client.
///
/// Owns one [`ConcurrencyGate`], one transport and one credential. Clones
/// share all three, so a single client can be handed to many tasks.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    gate: ConcurrencyGate,
    observer: Arc<dyn ProgressObserver>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("result_url", &self.config.result_url)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.mbdatasetrc`.
    ///
    /// This is equivalent to `Client::new(None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None)
    }

    /// Creates a client using (in order of precedence):
    /// - the explicit `apikey` argument
    /// - environment variables `MBDATASET_APIKEY`, `MBDATASET_URL`, `MBDATASET_RESULT_URL`
    /// - config file from `MBDATASET_RC` or `.mbdatasetrc`
    pub fn new(apikey: Option<String>) -> Result<Self> {
        let cfg = load_config(apikey).map_err(Error::Config)?;
        Self::with_config(cfg)
    }

    /// Creates a client from a fully specified configuration.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let transport = ReqwestTransport::new(config.request_timeout, config.verify)?;
        Ok(Self {
            gate: ConcurrencyGate::new(config.max_concurrent_requests),
            config: Arc::new(config),
            transport: Arc::new(transport),
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replaces the HTTP transport, e.g. to share a `reqwest::Client`.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Shows a terminal spinner instead of only logging progress.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.observer = if progress {
            Arc::new(SpinnerObserver::new())
        } else {
            Arc::new(TracingObserver)
        };
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.update_config(|c| c.max_concurrent_requests = max.max(1));
        self.gate = ConcurrencyGate::new(self.config.max_concurrent_requests);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.update_config(|c| c.overall_timeout = timeout);
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.update_config(|c| c.poll = poll);
        self
    }

    pub fn with_retry_settings(mut self, retry: RetrySettings) -> Self {
        self.update_config(|c| c.retry = retry);
        self
    }

    pub fn with_run_on_job_queue(mut self, run_on_job_queue: bool) -> Self {
        self.update_config(|c| c.run_on_job_queue = run_on_job_queue);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Runs `query` and decodes the protobuf result.
    pub async fn query(&self, query: &Query) -> Result<DatasetResult> {
        self.query_with_cancel(query, CancellationToken::new()).await
    }

    /// Like [`query`](Self::query), but stops with [`Error::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn query_with_cancel(
        &self,
        query: &Query,
        cancel: CancellationToken,
    ) -> Result<DatasetResult> {
        let deadline = Instant::now() + self.config.overall_timeout;
        let executor = self.executor();
        self.gated(deadline, &cancel, async {
            executor
                .execute(query, &self.config.apikey, deadline, &cancel)
                .await
        })
        .await
    }

    /// Runs `query` with the caller's own `format` and returns the body undecoded.
    pub async fn query_raw(&self, query: &Query) -> Result<Vec<u8>> {
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + self.config.overall_timeout;
        let executor = self.executor();
        self.gated(deadline, &cancel, async {
            executor
                .execute_raw(query, &self.config.apikey, deadline, &cancel)
                .await
        })
        .await
    }

    /// Starts `query` on the current tokio runtime.
    ///
    /// The returned handle resolves to the same result as
    /// [`query`](Self::query) and can be cancelled.
    pub fn spawn(&self, query: Query) -> QueryHandle {
        let cancel = CancellationToken::new();
        let client = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { client.query_with_cancel(&query, token).await });
        QueryHandle { join, cancel }
    }

    /// Blocking variant of [`query`](Self::query).
    ///
    /// Must not be called from inside an async runtime.
    pub fn query_sync(&self, query: &Query) -> Result<DatasetResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Config(anyhow::anyhow!(
                "query_sync called from within an async runtime; use `query(..).await` instead"
            )));
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(anyhow::Error::new(e).context("failed to start runtime")))?;
        rt.block_on(self.query(query))
    }

    fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(
            self.transport.clone(),
            self.config.clone(),
            self.observer.clone(),
        )
    }

    /// Holds a gate permit for the duration of `work`. Waiting for the permit
    /// counts against the deadline.
    async fn gated<T, F>(&self, deadline: Instant, cancel: &CancellationToken, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = bounded(self.gate.acquire(), deadline, cancel).await?;
        let out = work.await;
        self.gate.release(permit);
        out
    }

    fn update_config(&mut self, f: impl FnOnce(&mut ClientConfig)) {
        let mut cfg = (*self.config).clone();
        f(&mut cfg);
        self.config = Arc::new(cfg);
    }
}

/// A query running in the background.
///
/// Await it for the result. Dropping the handle does not stop the query;
/// call [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct QueryHandle {
    join: JoinHandle<Result<DatasetResult>>,
    cancel: CancellationToken,
}

impl QueryHandle {
    /// Requests cancellation. The handle then resolves to [`Error::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for QueryHandle {
    type Output = Result<DatasetResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
        }
    }
}
