use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Exponential backoff with a cap and bounded jitter.
///
/// Emitted delays never decrease and never exceed `max`. Jitter is a random
/// extra of up to `jitter * nominal`, clamped into `[previous, max]`.
#[derive(Debug)]
pub(crate) struct Backoff {
    nominal: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    last: Duration,
    rng: StdRng,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self::with_rng(base, max, multiplier, jitter, StdRng::from_entropy())
    }

    pub(crate) fn with_rng(
        base: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
        rng: StdRng,
    ) -> Self {
        let max = max.max(base);
        Self {
            nominal: base,
            max,
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
            last: Duration::ZERO,
            rng,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let extra = if self.jitter > 0.0 {
            let factor: f64 = self.rng.gen_range(0.0..=self.jitter);
            self.nominal.mul_f64(factor)
        } else {
            Duration::ZERO
        };
        let delay = self.nominal.saturating_add(extra).clamp(self.last, self.max);
        self.last = delay;
        self.nominal = grow(self.nominal, self.multiplier, self.max);
        delay
    }
}

fn grow(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let next = Duration::try_from_secs_f64(current.as_secs_f64() * multiplier).unwrap_or(max);
    if next > max { max } else { next }
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn append_query(url: &str, params: &[(&str, &str)]) -> String {
    let mut out = url.to_string();
    let sep = if url.contains('?') { '&' } else { '?' };
    out.push(sep);
    let mut first = true;
    for (k, v) in params {
        if !first {
            out.push('&');
        }
        first = false;
        out.push_str(k);
        out.push('=');
        out.push_str(&urlencoding::encode(v));
    }
    out
}
