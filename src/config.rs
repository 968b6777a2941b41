use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://my.meteoblue.com";
pub const DEFAULT_RESULT_URL: &str = "http://queueresults.meteoblue.com";

/// Everything a [`crate::Client`] needs, resolved and validated.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Dataset API key, sent with every request.
    pub apikey: String,
    /// Host serving `/dataset/query` and `/queue/status/{id}`.
    pub base_url: String,
    /// Host serving finished job payloads at `/{id}`.
    pub result_url: String,
    /// Upper bound on executions holding a network slot at once.
    pub max_concurrent_requests: usize,
    pub poll: PollSettings,
    pub retry: RetrySettings,
    /// Deadline for a whole execution, including the wait for a slot.
    pub overall_timeout: Duration,
    /// Timeout for a single HTTP exchange.
    pub request_timeout: Duration,
    /// Skip the direct attempt and always submit to the job queue.
    pub run_on_job_queue: bool,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

/// Job status polling schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Extra random delay as a fraction of the nominal interval, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: 0.2,
        }
    }
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl ClientConfig {
    pub fn new(apikey: impl Into<String>) -> Self {
        Self {
            apikey: apikey.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            result_url: DEFAULT_RESULT_URL.to_string(),
            max_concurrent_requests: 4,
            poll: PollSettings::default(),
            retry: RetrySettings::default(),
            overall_timeout: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(120),
            run_on_job_queue: false,
            verify: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.apikey.trim().is_empty() {
            bail!("apikey must not be empty");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be at least 1");
        }
        if self.poll.base_interval.is_zero() {
            bail!("poll_base_interval must be greater than zero");
        }
        if self.poll.max_interval < self.poll.base_interval {
            bail!(
                "poll_max_interval ({:?}) must not be below poll_base_interval ({:?})",
                self.poll.max_interval,
                self.poll.base_interval
            );
        }
        if !(self.poll.multiplier >= 1.0) {
            bail!("poll multiplier must be >= 1.0");
        }
        if self.overall_timeout.is_zero() {
            bail!("overall_timeout must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    apikey: Option<String>,
    base_url: Option<String>,
    result_url: Option<String>,
    max_concurrent_requests: Option<usize>,
    poll_base_interval: Option<Duration>,
    poll_max_interval: Option<Duration>,
    overall_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    retry_max: Option<u32>,
    retry_delay: Option<Duration>,
    run_on_job_queue: Option<bool>,
    verify: Option<bool>,
}

/// Resolves configuration from (in order of precedence) the explicit key,
/// environment variables, then the first rc file found.
pub(crate) fn load_config(apikey: Option<String>) -> Result<ClientConfig> {
    let mut apikey = apikey.or_else(|| non_empty_env("MBDATASET_APIKEY"));
    let mut base_url = non_empty_env("MBDATASET_URL");
    let mut result_url = non_empty_env("MBDATASET_RESULT_URL");

    let rc_candidates = rc_candidates();
    let mut rc = RcConfig::default();
    for rc_path in &rc_candidates {
        if rc_path.exists() {
            rc = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;
            break;
        }
    }

    apikey = apikey.or(rc.apikey);
    base_url = base_url.or(rc.base_url);
    result_url = result_url.or(rc.result_url);

    let apikey = match apikey {
        Some(v) => v,
        None => {
            if !rc_candidates.is_empty() {
                bail!(
                    "Missing configuration: apikey (set MBDATASET_APIKEY or put `apikey:` in one of: {})",
                    rc_candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            bail!("Missing configuration: apikey (set MBDATASET_APIKEY or create .mbdatasetrc)");
        }
    };

    let mut cfg = ClientConfig::new(apikey);
    if let Some(v) = base_url {
        cfg.base_url = v;
    }
    if let Some(v) = result_url {
        cfg.result_url = v;
    }
    if let Some(v) = rc.max_concurrent_requests {
        cfg.max_concurrent_requests = v;
    }
    if let Some(v) = rc.poll_base_interval {
        cfg.poll.base_interval = v;
    }
    if let Some(v) = rc.poll_max_interval {
        cfg.poll.max_interval = v;
    }
    if let Some(v) = rc.overall_timeout {
        cfg.overall_timeout = v;
    }
    if let Some(v) = rc.request_timeout {
        cfg.request_timeout = v;
    }
    if let Some(v) = rc.retry_max {
        cfg.retry.max_retries = v;
    }
    if let Some(v) = rc.retry_delay {
        cfg.retry.base_delay = v;
        cfg.retry.max_delay = cfg.retry.max_delay.max(v);
    }
    if let Some(v) = rc.run_on_job_queue {
        cfg.run_on_job_queue = v;
    }
    if let Some(v) = rc.verify {
        cfg.verify = v;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_rc(&text)
}

fn parse_rc(text: &str) -> Result<RcConfig> {
    let mut cfg = RcConfig::default();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once(':') else {
            bail!("line {}: expected `key: value`", lineno + 1);
        };
        let k = k.trim();
        let v = strip_quotes(v.trim());
        if v.is_empty() {
            continue;
        }
        match k {
            "apikey" | "key" => cfg.apikey = Some(v.to_string()),
            "url" | "base_url" => cfg.base_url = Some(v.to_string()),
            "result_url" => cfg.result_url = Some(v.to_string()),
            "max_concurrent_requests" => {
                cfg.max_concurrent_requests = Some(
                    v.parse()
                        .with_context(|| format!("line {}: invalid integer {v:?}", lineno + 1))?,
                )
            }
            "poll_base_interval" => cfg.poll_base_interval = Some(parse_secs(v, lineno)?),
            "poll_max_interval" => cfg.poll_max_interval = Some(parse_secs(v, lineno)?),
            "timeout" | "overall_timeout" => cfg.overall_timeout = Some(parse_secs(v, lineno)?),
            "request_timeout" => cfg.request_timeout = Some(parse_secs(v, lineno)?),
            "retry_max" => {
                cfg.retry_max = Some(
                    v.parse()
                        .with_context(|| format!("line {}: invalid integer {v:?}", lineno + 1))?,
                )
            }
            "retry_delay" => cfg.retry_delay = Some(parse_secs(v, lineno)?),
            "run_on_job_queue" => cfg.run_on_job_queue = Some(parse_flag(v)),
            "verify" => cfg.verify = Some(parse_flag(v)),
            _ => {}
        }
    }

    Ok(cfg)
}

fn parse_secs(v: &str, lineno: usize) -> Result<Duration> {
    let secs: f64 = v
        .parse()
        .with_context(|| format!("line {}: invalid number of seconds {v:?}", lineno + 1))?;
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("line {}: seconds out of range {v:?}", lineno + 1))
}

fn parse_flag(v: &str) -> bool {
    v != "0" && !v.eq_ignore_ascii_case("false") && !v.eq_ignore_ascii_case("no")
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) MBDATASET_RC (explicit)
    // 2) ./.mbdatasetrc
    // 3) ~/.mbdatasetrc
    if let Ok(p) = std::env::var("MBDATASET_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".mbdatasetrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".mbdatasetrc"));
    }
    v
}
