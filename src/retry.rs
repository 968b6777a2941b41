//! Bounded retries with jittered exponential backoff for transient failures.

use std::future::Future;

use crate::config::RetrySettings;
use crate::error::{Error, IsRetryable, Result, service_error};
use crate::progress::{ProgressEvent, ProgressObserver, Stage, notify};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::util::Backoff;

/// Runs `operation` until it succeeds, fails permanently, or has been retried
/// `settings.max_retries` times. The caller bounds the total time.
pub(crate) async fn with_retry<F, Fut, T>(
    settings: &RetrySettings,
    stage: Stage,
    observer: &dyn ProgressObserver,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut backoff = Backoff::new(settings.base_delay, settings.max_delay, 2.0, settings.jitter);

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(%stage, attempts = attempt + 1, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < settings.max_retries => {
                attempt += 1;
                let delay = backoff.next_delay();
                notify(
                    observer,
                    ProgressEvent::RetryScheduled {
                        stage,
                        attempt,
                        delay,
                        error: e.to_string(),
                    },
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(%stage, error = %e, attempts = attempt + 1, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Sends `request` once and maps non-2xx responses to [`Error::Service`].
pub(crate) async fn send_checked(
    transport: &dyn Transport,
    request: HttpRequest,
) -> Result<HttpResponse> {
    let url = request.url.clone();
    tracing::debug!(method = ?request.method, url = %crate::error::redact_apikey(&url), "sending request");
    let resp = transport.send(request).await.map_err(Error::Transport)?;
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(service_error(resp.status, &url, &resp.body))
    }
}

pub(crate) async fn send_with_retry(
    transport: &dyn Transport,
    request: &HttpRequest,
    settings: &RetrySettings,
    stage: Stage,
    observer: &dyn ProgressObserver,
) -> Result<HttpResponse> {
    with_retry(settings, stage, observer, || {
        send_checked(transport, request.clone())
    })
    .await
}
