//! Payload decoding: optional gzip, then protobuf, then invariant checks.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::GzDecoder;
use prost::Message;

use crate::error::DecodeError;
use crate::model::{CodeSeries, DatasetResult, Geometry, TimeInterval};
use crate::proto::{
    CodeProtobuf, DatasetApiProtobuf, GeometryProtobuf, TimeIntervalDataProtobuf,
    TimeIntervalProtobuf,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decodes a response body into a [`DatasetResult`].
pub fn decode(bytes: &[u8]) -> Result<DatasetResult, DecodeError> {
    let raw = decompress(bytes)?;
    let msg = DatasetApiProtobuf::decode(raw.as_ref())?;
    from_proto(msg)
}

/// Encodes a result in the wire format (uncompressed).
pub fn encode(result: &DatasetResult) -> Vec<u8> {
    to_proto(result).encode_to_vec()
}

fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(DecodeError::Decompress)?;
    Ok(Cow::Owned(out))
}

fn from_proto(msg: DatasetApiProtobuf) -> Result<DatasetResult, DecodeError> {
    let geometries = msg
        .geometries
        .into_iter()
        .enumerate()
        .map(|(idx, g)| geometry_from_proto(idx, g))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DatasetResult { geometries })
}

fn geometry_from_proto(idx: usize, g: GeometryProtobuf) -> Result<Geometry, DecodeError> {
    let time_intervals: Vec<TimeInterval> = g
        .time_intervals
        .iter()
        .map(|t| TimeInterval {
            start: t.start,
            end: t.end,
            stride: t.stride,
        })
        .collect();

    let mut lengths = Vec::with_capacity(time_intervals.len());
    for (index, ti) in time_intervals.iter().enumerate() {
        let len = ti.len().ok_or(DecodeError::InvalidInterval {
            geometry: idx,
            index,
            start: ti.start,
            end: ti.end,
            stride: ti.stride,
        })?;
        lengths.push(len);
    }

    let mut codes = Vec::with_capacity(g.codes.len());
    for c in g.codes {
        if c.timeintervals.len() != lengths.len() {
            return Err(DecodeError::IntervalCountMismatch {
                geometry: idx,
                code: c.code,
                expected: lengths.len(),
                actual: c.timeintervals.len(),
            });
        }
        for (interval, (data, expected)) in c.timeintervals.iter().zip(&lengths).enumerate() {
            if data.data.len() != *expected {
                return Err(DecodeError::SampleCountMismatch {
                    geometry: idx,
                    code: c.code,
                    interval,
                    expected: *expected,
                    actual: data.data.len(),
                });
            }
        }
        codes.push(CodeSeries {
            code: c.code,
            level: c.level,
            unit: c.unit,
            aggregation: c.aggregation,
            timeseries: c.timeintervals.into_iter().map(|t| t.data).collect(),
        });
    }

    Ok(Geometry {
        domain: g.domain,
        latitude: g.lat,
        longitude: g.lon,
        elevation: g.asl,
        location_name: g.location_name,
        nx: g.nx,
        ny: g.ny,
        time_resolution: g.time_resolution,
        time_intervals,
        codes,
    })
}

fn to_proto(result: &DatasetResult) -> DatasetApiProtobuf {
    DatasetApiProtobuf {
        geometries: result
            .geometries
            .iter()
            .map(|g| GeometryProtobuf {
                domain: g.domain.clone(),
                lat: g.latitude,
                lon: g.longitude,
                asl: g.elevation,
                location_name: g.location_name.clone(),
                nx: g.nx,
                ny: g.ny,
                time_resolution: g.time_resolution.clone(),
                time_intervals: g
                    .time_intervals
                    .iter()
                    .map(|t| TimeIntervalProtobuf {
                        start: t.start,
                        end: t.end,
                        stride: t.stride,
                    })
                    .collect(),
                codes: g
                    .codes
                    .iter()
                    .map(|c| CodeProtobuf {
                        code: c.code,
                        level: c.level.clone(),
                        unit: c.unit.clone(),
                        aggregation: c.aggregation.clone(),
                        timeintervals: c
                            .timeseries
                            .iter()
                            .map(|d| TimeIntervalDataProtobuf { data: d.clone() })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;

    pub(crate) const DAY_START: i64 = 1546300800;
    pub(crate) const DAY_END: i64 = 1546387200;

    /// Basel, one day of hourly 2 m temperature.
    pub(crate) fn basel_day() -> DatasetResult {
        DatasetResult {
            geometries: vec![Geometry {
                domain: "NEMSGLOBAL".to_string(),
                latitude: 47.558399,
                longitude: 7.57327,
                elevation: 279.0,
                location_name: Some("Basel".to_string()),
                nx: 1,
                ny: 1,
                time_resolution: "hourly".to_string(),
                time_intervals: vec![TimeInterval {
                    start: DAY_START,
                    end: DAY_END,
                    stride: 3600,
                }],
                codes: vec![CodeSeries {
                    code: 11,
                    level: "2 m above gnd".to_string(),
                    unit: "°C".to_string(),
                    aggregation: "none".to_string(),
                    timeseries: vec![(0..24).map(|h| -1.5 + h as f32 * 0.25).collect()],
                }],
            }],
        }
    }

    pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    fn random_result(rng: &mut StdRng) -> DatasetResult {
        let geometries = (0..rng.gen_range(0..4))
            .map(|gi| {
                let time_intervals: Vec<TimeInterval> = (0..rng.gen_range(0..4))
                    .map(|_| {
                        let stride = *[900, 3600, 86400].get(rng.gen_range(0..3)).unwrap();
                        let start = 1_500_000_000 + rng.gen_range(0..1000) * 3600;
                        let end = start + rng.gen_range(0..60) * i64::from(stride);
                        TimeInterval { start, end, stride }
                    })
                    .collect();
                let codes = (0..rng.gen_range(0..4))
                    .map(|ci| CodeSeries {
                        code: 11 + ci,
                        level: "2 m above gnd".to_string(),
                        unit: "°C".to_string(),
                        aggregation: "mean".to_string(),
                        timeseries: time_intervals
                            .iter()
                            .map(|ti| {
                                (0..ti.len().unwrap())
                                    .map(|_| rng.gen_range(-40.0f32..40.0))
                                    .collect()
                            })
                            .collect(),
                    })
                    .collect();
                Geometry {
                    domain: format!("DOMAIN{gi}"),
                    latitude: rng.gen_range(-90.0..90.0),
                    longitude: rng.gen_range(-180.0..180.0),
                    elevation: rng.gen_range(0.0..4000.0),
                    location_name: rng.gen_bool(0.5).then(|| format!("loc{gi}")),
                    nx: 1,
                    ny: 1,
                    time_resolution: "hourly".to_string(),
                    time_intervals,
                    codes,
                }
            })
            .collect();
        DatasetResult { geometries }
    }

    #[test]
    fn decodes_one_day_hourly_into_24_samples() {
        let result = decode(&encode(&basel_day())).unwrap();
        let g = &result.geometries[0];
        assert_eq!(g.time_intervals.len(), 1);
        assert_eq!(g.codes.len(), 1);
        assert_eq!(g.codes[0].timeseries.len(), 1);
        assert_eq!(g.codes[0].timeseries[0].len(), 24);
        assert_eq!(g.location_name.as_deref(), Some("Basel"));
    }

    #[test]
    fn gzip_payload_is_transparent() {
        let plain = encode(&basel_day());
        assert_eq!(decode(&gzip(&plain)).unwrap(), basel_day());
    }

    #[test]
    fn corrupt_gzip_is_a_decompression_error() {
        let mut bytes = gzip(&encode(&basel_day()));
        let len = bytes.len();
        bytes.truncate(len / 2);
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::Decompress(_)), "{err:?}");
        assert!(err.is_transport_corruption());
    }

    #[test]
    fn truncated_protobuf_is_a_parse_error() {
        let bytes = encode(&basel_day());
        let err = decode(&bytes[..bytes.len() - 7]).unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)), "{err:?}");
        assert!(!err.is_transport_corruption());
    }

    #[test]
    fn empty_result_round_trips_through_zero_bytes() {
        let bytes = encode(&DatasetResult::default());
        assert!(bytes.is_empty());
        assert_eq!(decode(&bytes).unwrap(), DatasetResult::default());
        assert_eq!(decode(&gzip(&bytes)).unwrap(), DatasetResult::default());
    }

    #[test]
    fn extreme_interval_bounds_are_rejected_not_overflowed() {
        let mut r = basel_day();
        r.geometries[0].time_intervals[0] = TimeInterval {
            start: i64::MIN,
            end: i64::MAX,
            stride: 3600,
        };
        let err = decode(&encode(&r)).unwrap_err();
        assert!(
            matches!(
                err,
                DecodeError::InvalidInterval { .. } | DecodeError::SampleCountMismatch { .. }
            ),
            "{err:?}"
        );

        r.geometries[0].time_intervals[0] = TimeInterval {
            start: i64::MIN,
            end: i64::MAX,
            stride: 1,
        };
        assert!(matches!(
            decode(&encode(&r)),
            Err(DecodeError::InvalidInterval { .. }) | Err(DecodeError::SampleCountMismatch { .. })
        ));
    }

    #[test]
    fn geometry_without_codes_is_valid() {
        let mut r = basel_day();
        r.geometries[0].codes.clear();
        let decoded = decode(&encode(&r)).unwrap();
        assert!(decoded.geometries[0].codes.is_empty());
        assert_eq!(decoded.geometries[0].time_intervals.len(), 1);
    }

    #[test]
    fn short_sample_sequence_is_surfaced() {
        let mut r = basel_day();
        r.geometries[0].codes[0].timeseries[0].pop();
        match decode(&encode(&r)) {
            Err(DecodeError::SampleCountMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 24);
                assert_eq!(actual, 23);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_interval_data_is_surfaced() {
        let mut r = basel_day();
        r.geometries[0].codes[0].timeseries.clear();
        assert!(matches!(
            decode(&encode(&r)),
            Err(DecodeError::IntervalCountMismatch {
                expected: 1,
                actual: 0,
                ..
            })
        ));
    }

    #[test]
    fn zero_stride_is_invalid() {
        let mut r = basel_day();
        r.geometries[0].time_intervals[0].stride = 0;
        assert!(matches!(
            decode(&encode(&r)),
            Err(DecodeError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn generated_payloads_satisfy_the_sample_invariant() {
        for seed in 0..300u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let generated = random_result(&mut rng);
            let decoded = decode(&encode(&generated)).unwrap();
            assert_eq!(decoded, generated, "seed {seed}");
            for g in &decoded.geometries {
                for c in &g.codes {
                    assert_eq!(c.timeseries.len(), g.time_intervals.len());
                    for (ti, samples) in g.time_intervals.iter().zip(&c.timeseries) {
                        assert_eq!(Some(samples.len()), ti.len());
                    }
                }
            }
        }
    }

    #[test]
    fn round_trip_many_codes_and_intervals() {
        let mut r = basel_day();
        let g = &mut r.geometries[0];
        g.time_intervals.push(TimeInterval {
            start: DAY_END,
            end: DAY_END + 2 * 86400,
            stride: 86400,
        });
        g.codes[0].timeseries.push(vec![1.0, 2.0]);
        g.codes.push(CodeSeries {
            code: 61,
            level: "sfc".to_string(),
            unit: "mm".to_string(),
            aggregation: "sum".to_string(),
            timeseries: vec![vec![0.0; 24], vec![f32::MIN_POSITIVE, 1e-7]],
        });
        r.geometries.push(Geometry {
            domain: "ERA5".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            location_name: None,
            nx: 3,
            ny: 2,
            time_resolution: "daily".to_string(),
            time_intervals: Vec::new(),
            codes: Vec::new(),
        });
        assert_eq!(decode(&encode(&r)).unwrap(), r);
    }

    #[test]
    fn geometry_order_is_preserved() {
        let mut r = DatasetResult::default();
        for name in ["a", "b", "c", "d"] {
            let mut g = basel_day().geometries.remove(0);
            g.domain = name.to_string();
            r.geometries.push(g);
        }
        let decoded = decode(&encode(&r)).unwrap();
        let order: Vec<_> = decoded.geometries.iter().map(|g| g.domain.as_str()).collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }
}
