//! Batch materialization: request/response models and parallel status
//! polling.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rda_common::{RdaError, RdaResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::endpoints::Endpoints;
use crate::http::HttpClient;

/// Job state reported while the server is still rendering.
pub const JOB_STATE_PROCESSING: &str = "processing";
/// Job state reported once every artifact has been written.
pub const JOB_STATE_COMPLETE: &str = "complete";

/// The output formats batch materialization can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchFormat {
    /// Cloud optimized geotiff.
    #[default]
    Tif,
    /// A stream of tiles.
    TileStream,
    /// A TMS tile stack.
    Tms,
    /// Geojson output; requires a binary image.
    Vector,
    /// Mapbox vector tile output; requires a binary image.
    VectorTile,
}

impl BatchFormat {
    /// The textual token RDA expects on the wire.
    pub fn as_token(self) -> &'static str {
        match self {
            BatchFormat::Tif => "TIF",
            BatchFormat::TileStream => "TILE_STREAM",
            BatchFormat::Tms => "TMS",
            BatchFormat::Vector => "VECTOR",
            BatchFormat::VectorTile => "VECTOR_TILE",
        }
    }
}

impl fmt::Display for BatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for BatchFormat {
    type Err = RdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TIF" => Ok(BatchFormat::Tif),
            "TILE_STREAM" => Ok(BatchFormat::TileStream),
            "TMS" => Ok(BatchFormat::Tms),
            "VECTOR" => Ok(BatchFormat::Vector),
            "VECTOR_TILE" => Ok(BatchFormat::VectorTile),
            _ => Err(RdaError::UnknownBatchFormat(s.to_string())),
        }
    }
}

impl Serialize for BatchFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_token())
    }
}

impl<'de> Deserialize<'de> for BatchFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The HTTP body POSTed to the materialize endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchRequest {
    pub image_reference: ImageReference,
    pub output_format: BatchFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_options: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(rename = "cropGeometryWKT", skip_serializing_if = "Option::is_none")]
    pub crop_geometry_wkt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// The template the batch request is asking the server to render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageReference {
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

/// A batch materialization job as the server reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchJob {
    pub job_id: String,
    pub request: BatchRequest,
    pub status: BatchStatus,
}

/// Status of a batch materialization job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchStatus {
    pub internal_job_id: String,
    #[serde(rename = "jobStatus")]
    pub state: String,
    #[serde(with = "epoch_ms")]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(with = "epoch_ms")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(with = "duration_ms")]
    pub elapsed_time: Option<Duration>,
    #[serde(rename = "statusMessage", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchStatus {
    pub fn is_complete(&self) -> bool {
        self.state == JOB_STATE_COMPLETE
    }

    pub fn is_processing(&self) -> bool {
        self.state == JOB_STATE_PROCESSING
    }
}

/// Timestamps arrive as integer milliseconds since the epoch; zero or null
/// means unset.
mod epoch_ms {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let ms = Option::<i64>::deserialize(d)?;
        Ok(ms
            .filter(|&ms| ms > 0)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => s.serialize_some(&t.timestamp_millis()),
            None => s.serialize_none(),
        }
    }
}

/// Elapsed durations arrive as integer milliseconds; zero or null means
/// unset.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<i64>::deserialize(d)?;
        Ok(ms
            .filter(|&ms| ms > 0)
            .map(|ms| Duration::from_millis(ms as u64)))
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}

/// Fetch the status of every job id, polling up to `4 x logical CPUs` at a
/// time. Individual failures accumulate into a composite error; the
/// cancellation sentinel is suppressed.
#[instrument(skip(client, endpoints, job_ids, cancel), fields(num_jobs = job_ids.len()))]
pub async fn fetch_batch_status(
    client: &HttpClient,
    endpoints: &Endpoints,
    job_ids: &[String],
    cancel: &CancellationToken,
) -> RdaResult<Vec<BatchJob>> {
    if job_ids.is_empty() {
        return Ok(Vec::new());
    }
    let num_parallel = (4 * num_cpus::get()).min(job_ids.len()).max(1);

    let results: Vec<RdaResult<BatchJob>> = stream::iter(job_ids.iter())
        .take_until(cancel.clone().cancelled_owned())
        .map(|job_id| fetch_job_status(client, endpoints, job_id, cancel))
        .buffer_unordered(num_parallel)
        .collect()
        .await;

    let mut jobs = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(job) => jobs.push(job),
            Err(err) => errors.push(err),
        }
    }

    match RdaError::aggregate(errors) {
        Some(err) => Err(err),
        None => Ok(jobs),
    }
}

/// Fetch the status of a single batch job.
pub async fn fetch_job_status(
    client: &HttpClient,
    endpoints: &Endpoints,
    job_id: &str,
    cancel: &CancellationToken,
) -> RdaResult<BatchJob> {
    client
        .get_json::<BatchJob>(endpoints.job_status(job_id), cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::request, responders::json_encoded, Expectation, Server};

    #[test]
    fn test_batch_format_round_trip() {
        let cases = [
            (BatchFormat::Tif, "TIF"),
            (BatchFormat::TileStream, "TILE_STREAM"),
            (BatchFormat::Tms, "TMS"),
            (BatchFormat::Vector, "VECTOR"),
            (BatchFormat::VectorTile, "VECTOR_TILE"),
        ];
        for (format, token) in cases {
            assert_eq!(format.to_string(), token);
            assert_eq!(token.parse::<BatchFormat>().unwrap(), format);
        }
        assert!(matches!(
            "NOT-A-FORMAT".parse::<BatchFormat>(),
            Err(RdaError::UnknownBatchFormat(_))
        ));
    }

    #[test]
    fn test_parse_batch_job() {
        let body = r#"{
            "jobId": "e08e1dd0-7366-451a-9cb3-d942827aeb96",
            "request": {
                "imageReference": {
                    "templateId": "DigitalGlobeStrip",
                    "nodeId": null,
                    "parameters": {"GSD": "15", "bands": "MS"}
                },
                "outputFormat": "TIF",
                "formatOptions": {},
                "callbackUrl": null,
                "cropGeometryWKT": null,
                "accountId": "b265b97f",
                "emailAddress": "someone@example.com"
            },
            "status": {
                "internalJobId": "8f37d137",
                "jobStatus": "processing",
                "startTime": 1540583795477,
                "endTime": null,
                "elapsedTime": null,
                "statusMessage": null
            }
        }"#;

        let job: BatchJob = serde_json::from_str(body).unwrap();
        assert_eq!(job.job_id, "e08e1dd0-7366-451a-9cb3-d942827aeb96");
        assert_eq!(job.request.output_format, BatchFormat::Tif);
        assert_eq!(job.request.image_reference.template_id, "DigitalGlobeStrip");
        assert_eq!(job.request.image_reference.node_id, None);
        assert_eq!(
            job.request
                .image_reference
                .parameters
                .as_ref()
                .unwrap()
                .get("GSD")
                .map(String::as_str),
            Some("15")
        );
        assert!(job.status.is_processing());
        assert_eq!(
            job.status.start_time.unwrap().timestamp_millis(),
            1540583795477
        );
        assert_eq!(job.status.end_time, None);
        assert_eq!(job.status.elapsed_time, None);
    }

    #[test]
    fn test_parse_completed_job_times() {
        let body = r#"{
            "internalJobId": "ce858655",
            "jobStatus": "complete",
            "startTime": 1540580617754,
            "endTime": 1540580773435,
            "elapsedTime": 155681
        }"#;
        let status: BatchStatus = serde_json::from_str(body).unwrap();
        assert!(status.is_complete());
        assert_eq!(status.elapsed_time, Some(Duration::from_millis(155681)));
        assert_eq!(
            status.end_time.unwrap().timestamp_millis(),
            1540580773435
        );
    }

    #[test]
    fn test_zero_times_deserialize_as_unset() {
        let status: BatchStatus = serde_json::from_str(
            r#"{"jobStatus": "processing", "startTime": 0, "elapsedTime": 0}"#,
        )
        .unwrap();
        assert_eq!(status.start_time, None);
        assert_eq!(status.elapsed_time, None);
    }

    #[test]
    fn test_status_round_trip() {
        let body = r#"{"internalJobId":"x","jobStatus":"complete","startTime":1540580617754,"endTime":1540580773435,"elapsedTime":155681}"#;
        let status: BatchStatus = serde_json::from_str(body).unwrap();
        let encoded = serde_json::to_string(&status).unwrap();
        let again: BatchStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(status, again);
    }

    #[tokio::test]
    async fn test_fetch_batch_status_fan_out() {
        let server = Server::run();
        for i in 0..20 {
            let job_id = format!("job-{}", i);
            server.expect(
                Expectation::matching(request::method_path(
                    "GET",
                    format!("/template/materialize/status/{}", job_id),
                ))
                .respond_with(json_encoded(serde_json::json!({
                    "jobId": job_id,
                    "status": {"jobStatus": "processing"}
                }))),
            );
        }

        let endpoints = Endpoints::new(&server.url_str("")).unwrap();
        let client = HttpClient::new(Default::default()).unwrap();
        let cancel = CancellationToken::new();

        let job_ids: Vec<String> = (0..20).map(|i| format!("job-{}", i)).collect();
        let mut jobs = fetch_batch_status(&client, &endpoints, &job_ids, &cancel)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 20);

        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        let mut expected = job_ids.clone();
        expected.sort();
        let got: Vec<String> = jobs.into_iter().map(|j| j.job_id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_fetch_batch_status_aggregates_failures() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/template/materialize/status/good",
            ))
            .respond_with(json_encoded(serde_json::json!({
                "jobId": "good",
                "status": {"jobStatus": "complete"}
            }))),
        );
        server.expect(
            Expectation::matching(request::method_path(
                "GET",
                "/template/materialize/status/bad",
            ))
            .respond_with(
                httptest::responders::status_code(404).body(r#"{"error":"no such job"}"#),
            ),
        );

        let endpoints = Endpoints::new(&server.url_str("")).unwrap();
        let client = HttpClient::new(Default::default()).unwrap();
        let cancel = CancellationToken::new();

        let err = fetch_batch_status(
            &client,
            &endpoints,
            &["good".to_string(), "bad".to_string()],
            &cancel,
        )
        .await
        .unwrap_err();
        match err {
            RdaError::Aggregate(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("no such job"));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }
}
