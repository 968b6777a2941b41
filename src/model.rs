//! Decoded, immutable query results.

use serde::Serialize;

/// Top-level result of one query. Geometries keep the server's order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetResult {
    pub geometries: Vec<Geometry>,
}

/// One queried location or area with its time axis and variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    pub domain: String,
    pub latitude: f32,
    pub longitude: f32,
    /// Elevation above sea level in metres.
    pub elevation: f32,
    pub location_name: Option<String>,
    pub nx: i32,
    pub ny: i32,
    pub time_resolution: String,
    pub time_intervals: Vec<TimeInterval>,
    pub codes: Vec<CodeSeries>,
}

/// Equally spaced timestamps `start, start + stride, ...` strictly below `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeInterval {
    /// Unix seconds.
    pub start: i64,
    /// Unix seconds, exclusive.
    pub end: i64,
    /// Seconds.
    pub stride: i32,
}

impl TimeInterval {
    /// Number of timestamps in the interval, or `None` if it is malformed.
    pub fn len(&self) -> Option<usize> {
        if self.stride <= 0 || self.end < self.start {
            return None;
        }
        // Bounds come straight from the payload; widen so no input can overflow.
        let span = i128::from(self.end) - i128::from(self.start);
        let stride = i128::from(self.stride);
        usize::try_from((span + stride - 1) / stride).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        let stride = i64::from(self.stride.max(1));
        let count = self.len().unwrap_or(0);
        std::iter::successors(Some(self.start), move |t| t.checked_add(stride))
            .take(count)
    }
}

/// One variable at one level, with a sample sequence per time interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSeries {
    pub code: i32,
    pub level: String,
    pub unit: String,
    pub aggregation: String,
    /// Aligned by index with [`Geometry::time_intervals`].
    pub timeseries: Vec<Vec<f32>>,
}

impl Geometry {
    /// Pairs each time interval with the given code's samples.
    pub fn series(&self, code: i32) -> Option<impl Iterator<Item = (&TimeInterval, &[f32])>> {
        let series = self.codes.iter().find(|c| c.code == code)?;
        Some(
            self.time_intervals
                .iter()
                .zip(series.timeseries.iter().map(Vec::as_slice)),
        )
    }
}
