use std::sync::Arc;
use std::time::Duration;

use mbdataset::{
    ClientConfig, Client, CodeSeries, DatasetResult, Error, Geometry, PollSettings,
    ProgressEvent, Query, RetrySettings, TimeInterval, codec,
};
use serde_json::json;
use tokio::sync::mpsc::unbounded_channel;
use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JOB_QUEUE_REQUIRED: &str = "This job must be executed on a job-queue";

fn basel_day() -> DatasetResult {
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
                start: 1546300800,
                end: 1546387200,
                stride: 3600,
            }],
            codes: vec![CodeSeries {
                code: 11,
                level: "2 m above gnd".to_string(),
                unit: "°C".to_string(),
                aggregation: "none".to_string(),
                timeseries: vec![(0..24).map(|h| h as f32 * 0.5).collect()],
            }],
        }],
    }
}

fn query() -> Query {
    Query::from_value(json!({
        "units": {"temperature": "C"},
        "geometry": {"type": "MultiPoint", "coordinates": [[7.57327, 47.558399, 279]], "locationNames": ["Basel"]},
        "timeIntervals": ["2019-01-01T+00:00/2019-01-01T+00:00"],
        "queries": [{"domain": "NEMSGLOBAL", "timeResolution": "hourly",
                     "codes": [{"code": 11, "level": "2 m above gnd"}]}]
    }))
    .unwrap()
}

fn client_for(server: &MockServer, apikey: &str) -> Client {
    let mut cfg = ClientConfig::new(apikey);
    cfg.base_url = server.uri();
    cfg.result_url = format!("{}/results", server.uri());
    cfg.poll = PollSettings {
        base_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        multiplier: 2.0,
        jitter: 0.1,
    };
    cfg.retry = RetrySettings {
        max_retries: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: 0.0,
    };
    cfg.overall_timeout = Duration::from_secs(10);
    Client::with_config(cfg).unwrap()
}

#[tokio::test]
async fn immediate_protobuf_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .and(query_param("apikey", "secret"))
        .and(body_partial_json(json!({"format": "protobuf"})))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(codec::encode(&basel_day())))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server, "secret").query(&query()).await.unwrap();
    let samples = &result.geometries[0].codes[0].timeseries[0];
    assert_eq!(samples.len(), 24);
    assert_eq!(result, basel_day());
}

#[tokio::test]
async fn job_queue_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .and(body_partial_json(json!({"runOnJobQueue": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "abc"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": true, "error_message": JOB_QUEUE_REQUIRED})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/queue/status/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "waiting"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/status/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/status/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "finished"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/results/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(codec::encode(&basel_day())))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server, "k").query(&query()).await.unwrap();
    assert_eq!(result, basel_day());
}

#[tokio::test]
async fn failed_job_surfaces_job_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": 17})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/queue/status/17"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "error", "error_message": "domain unavailable"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/17"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    match client_for(&server, "k").query(&query()).await {
        Err(Error::JobFailed { job_id, message }) => {
            assert_eq!(job_id, "17");
            assert_eq!(message, "domain unavailable");
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_key_fails_without_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": true, "error_message": "Invalid apikey"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, "nope").query(&query()).await.unwrap_err();
    match err {
        Error::Service { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("Invalid apikey"));
            assert!(!message.contains("nope"), "key must be redacted");
        }
        other => panic!("expected Service, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(codec::encode(&basel_day())))
        .mount(&server)
        .await;

    let result = client_for(&server, "k").query(&query()).await.unwrap();
    assert_eq!(result, basel_day());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error_without_the_key() {
    let mut cfg = ClientConfig::new("SUPERSECRETKEY");
    // Nothing listens on the discard port.
    cfg.base_url = "http://127.0.0.1:9".to_string();
    cfg.retry = RetrySettings {
        max_retries: 1,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        jitter: 0.0,
    };
    let (tx, mut rx) = unbounded_channel::<ProgressEvent>();
    let client = Client::with_config(cfg).unwrap().with_observer(Arc::new(tx));
    let err = client.query(&query()).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
    assert!(!err.to_string().contains("SUPERSECRETKEY"), "{err}");
    assert!(!format!("{err:?}").contains("SUPERSECRETKEY"));

    let mut retries = 0;
    while let Ok(event) = rx.try_recv() {
        if let ProgressEvent::RetryScheduled { error, .. } = &event {
            assert!(!error.contains("SUPERSECRETKEY"), "{error}");
            retries += 1;
        }
        if let ProgressEvent::Ended { error, .. } = &event {
            assert!(!error.contains("SUPERSECRETKEY"), "{error}");
        }
    }
    assert_eq!(retries, 1);
}

#[tokio::test]
async fn empty_result_body_decodes_to_no_geometries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(codec::encode(&DatasetResult::default())),
        )
        .mount(&server)
        .await;

    let result = client_for(&server, "k").query(&query()).await.unwrap();
    assert!(result.geometries.is_empty());
}

#[tokio::test]
async fn query_document_is_forwarded_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .and(body_json(json!({
            "queries": [],
            "units": null,
            "timeIntervals": [{"start": "2019-01-01"}],
            "format": "protobuf"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(codec::encode(&basel_day())))
        .expect(1)
        .mount(&server)
        .await;

    let q = Query::from_value(json!({
        "queries": [],
        "units": null,
        "timeIntervals": [{"start": "2019-01-01"}]
    }))
    .unwrap();
    assert_eq!(client_for(&server, "k").query(&q).await.unwrap(), basel_day());
}

#[tokio::test]
async fn raw_query_forwards_caller_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .and(body_partial_json(json!({"format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"geometries": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut q = query();
    q.insert("format", json!("json"));
    let body = client_for(&server, "k").query_raw(&q).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"geometries": []}));
}

#[tokio::test]
async fn many_concurrent_queries_share_one_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/dataset/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(codec::encode(&basel_day()))
                .set_delay(Duration::from_millis(20)),
        )
        .expect(10)
        .mount(&server)
        .await;

    let client = client_for(&server, "k").with_max_concurrent_requests(2);
    let handles: Vec<_> = (0..10).map(|_| client.spawn(query())).collect();
    for h in handles {
        assert_eq!(h.await.unwrap(), basel_day());
    }
}

#[test]
fn query_sync_blocks_for_the_result() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dataset/query"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(codec::encode(&basel_day())))
            .mount(&server)
            .await;
        server
    });

    let result = client_for(&server, "k").query_sync(&query()).unwrap();
    assert_eq!(result, basel_day());
    drop(server);
}
