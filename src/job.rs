use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::urljoin;

/// Remote job as issued by the queue. Valid for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub status_url: String,
    pub result_url: String,
}

impl JobHandle {
    pub(crate) fn new(id: String, base_url: &str, result_base_url: &str) -> Self {
        Self {
            status_url: urljoin(base_url, &format!("/queue/status/{}", id)),
            result_url: urljoin(result_base_url, &id),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        })
    }
}

/// One observation of a job: its state and, for failures, the server's reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct StatusReply {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct SubmitReply {
    // The queue has returned both numeric and string ids.
    id: Value,
}

pub(crate) fn parse_status(body: &[u8], url: &str) -> Result<JobStatus> {
    let reply: StatusReply = serde_json::from_slice(body).map_err(|e| Error::Service {
        status: 200,
        message: format!("unreadable job status from {url}: {e}"),
    })?;

    let status = match reply.status.as_str() {
        "finished" => JobStatus {
            state: JobState::Succeeded,
            message: None,
        },
        "error" => JobStatus {
            state: JobState::Failed,
            message: Some(
                reply
                    .error_message
                    .unwrap_or_else(|| "job reported an error".to_string()),
            ),
        },
        "deleted" => JobStatus {
            state: JobState::Failed,
            message: Some("job was cancelled".to_string()),
        },
        "running" => JobStatus {
            state: JobState::Running,
            message: None,
        },
        "waiting" | "queued" | "pending" | "created" => JobStatus {
            state: JobState::Queued,
            message: None,
        },
        other => {
            return Err(Error::Service {
                status: 200,
                message: format!("unknown job status [{other}]"),
            });
        }
    };
    Ok(status)
}

pub(crate) fn parse_job_id(body: &[u8]) -> Result<String> {
    let reply: SubmitReply = serde_json::from_slice(body).map_err(|e| Error::Service {
        status: 200,
        message: format!("job submission reply has no job id: {e}"),
    })?;
    match reply.id {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::Service {
            status: 200,
            message: format!("job submission reply has an invalid id: {other}"),
        }),
    }
}
