//! A Rust client for the meteoblue Dataset API.
//!
//! Small queries are answered directly. Large ones are deferred to a job
//! queue, which this crate polls until the job finishes before downloading
//! and decoding the protobuf result.
//!
//! ## Quick start
//! - Configure the key via the environment (`MBDATASET_APIKEY`) or a
//!   `.mbdatasetrc` file (in the current directory or your home directory).
//! - Build a [`Query`] and call [`Client::query`] (async) or
//!   [`Client::query_sync`] (blocking).
//!
//! ```no_run
//! use mbdataset::{Client, Query};
//! use serde_json::json;
//!
//! # async fn run() -> mbdataset::Result<()> {
//! let client = Client::from_env()?;
//! let query = Query::from_value(json!({
//!     "units": {"temperature": "C", "velocity": "km/h", "length": "metric", "energy": "watts"},
//!     "geometry": {"type": "MultiPoint", "coordinates": [[7.57327, 47.558399, 279]], "locationNames": ["Basel"]},
//!     "timeIntervals": ["2019-01-01T+00:00/2019-01-01T+00:00"],
//!     "timeIntervalsAlignment": "none",
//!     "queries": [{"domain": "NEMSGLOBAL", "gapFillDomain": null, "timeResolution": "hourly",
//!                  "codes": [{"code": 11, "level": "2 m above gnd"}]}]
//! }))?;
//! let result = client.query(&query).await?;
//! for g in &result.geometries {
//!     println!("{} {:?}: {} code(s)", g.domain, g.location_name, g.codes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Many queries may run at once; the client admits at most
//! `max_concurrent_requests` of them to the network and queues the rest.

#![forbid(unsafe_code)]

mod client;
pub mod codec;
mod config;
mod error;
mod executor;
mod gate;
mod job;
mod model;
mod poller;
pub mod progress;
pub mod proto;
mod query;
mod retry;
pub mod transport;
mod util;

pub use client::{Client, QueryHandle};
pub use config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_RESULT_URL, PollSettings, RetrySettings};
pub use error::{DecodeError, Error, IsRetryable, Result, TransportError, TransportErrorKind};
pub use executor::{ExecutionState, QueryExecutor};
pub use gate::{ConcurrencyGate, GatePermit};
pub use job::{JobHandle, JobState, JobStatus};
pub use model::{CodeSeries, DatasetResult, Geometry, TimeInterval};
pub use poller::JobStatusPoller;
pub use progress::{ProgressEvent, ProgressObserver, SpinnerObserver, Stage, TracingObserver};
pub use query::Query;
pub use tokio_util::sync::CancellationToken;
