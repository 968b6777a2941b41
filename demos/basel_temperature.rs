use anyhow::Result;
use mbdataset::{Client, Query};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Configure the key via MBDATASET_APIKEY or a `.mbdatasetrc` file.
    let client = Client::from_env()?.with_progress(true);

    let basel = Query::from_value(json!({
        "units": {"temperature": "C", "velocity": "km/h", "length": "metric", "energy": "watts"},
        "geometry": {"type": "MultiPoint", "coordinates": [[7.57327, 47.558399, 279]], "locationNames": ["Basel"]},
        "timeIntervals": ["2019-01-01T+00:00/2019-01-01T+00:00"],
        "timeIntervalsAlignment": "none",
        "queries": [{"domain": "NEMSGLOBAL", "gapFillDomain": null, "timeResolution": "hourly",
                     "codes": [{"code": 11, "level": "2 m above gnd"}]}]
    }))?;

    // Two years over central France: large enough to go through the job queue.
    let france = Query::from_value(json!({
        "units": {"temperature": "C", "velocity": "km/h", "length": "metric", "energy": "watts"},
        "geometry": {"type": "Polygon", "coordinates": [[[2.96894, 46.041886], [2.96894, 48.216537],
            [10.989692, 48.216537], [10.989692, 46.041886], [2.96894, 46.041886]]]},
        "timeIntervals": ["2017-01-01T+00:00/2019-01-31T+00:00"],
        "timeIntervalsAlignment": "none",
        "queries": [{"domain": "NEMSGLOBAL", "gapFillDomain": null, "timeResolution": "hourly",
                     "codes": [{"code": 11, "level": "2 m above gnd"}],
                     "transformations": [{"type": "aggregateTimeInterval", "aggregation": "mean"},
                                         {"type": "spatialTotalAggregate", "aggregation": "mean"}]}]
    }))?;

    let small = client.spawn(basel);
    let large = client.spawn(france);

    for result in [small.await?, large.await?] {
        for g in &result.geometries {
            println!(
                "{} ({}, {}) {}",
                g.domain,
                g.latitude,
                g.longitude,
                g.location_name.as_deref().unwrap_or("-")
            );
            for code in &g.codes {
                for (ti, samples) in g.time_intervals.iter().zip(&code.timeseries) {
                    println!(
                        "  code {} @ {} [{}]: {} sample(s) from {}",
                        code.code,
                        code.level,
                        code.unit,
                        samples.len(),
                        ti.start
                    );
                }
            }
        }
    }
    Ok(())
}
