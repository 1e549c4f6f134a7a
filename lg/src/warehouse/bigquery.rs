//! BigQuery REST client
//!
//! Implements WarehouseClient against the BigQuery v2 jobs API: listing
//! running jobs for all users of the project, and inserting load jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobHandle, LoadJobSpec, WarehouseClient, WarehouseError};
use crate::config::WarehouseConfig;

/// Page size requested when listing jobs
const LIST_PAGE_SIZE: &str = "1000";

/// BigQuery jobs API client
pub struct BigQueryClient {
    project: String,
    base_url: String,
    access_token: String,
    job_id_prefix: String,
    location: Option<String>,
    http: Client,
}

impl BigQueryClient {
    /// Create a new client from configuration
    ///
    /// Reads the access token from the environment variable named in config.
    pub fn from_config(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        debug!(project = %config.project, base_url = %config.base_url, "BigQueryClient::from_config: called");
        let access_token = config
            .get_access_token()
            .map_err(|e| WarehouseError::MissingCredentials(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(WarehouseError::Network)?;

        Ok(Self {
            project: config.project.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token,
            job_id_prefix: config.job_id_prefix.clone(),
            location: config.location.clone(),
            http,
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/projects/{}/jobs", self.base_url, self.project)
    }

    fn new_job_id(&self) -> String {
        format!("{}_{}", self.job_id_prefix, Uuid::now_v7().simple())
    }

    /// Build the jobs.insert body for a load job
    fn build_load_body(&self, spec: &LoadJobSpec, job_id: &str) -> serde_json::Value {
        debug!(%job_id, destination = %spec.destination, "build_load_body: called");
        let mut job_reference = serde_json::json!({
            "projectId": self.project,
            "jobId": job_id,
        });
        if let Some(location) = &self.location {
            job_reference["location"] = serde_json::json!(location);
        }

        serde_json::json!({
            "jobReference": job_reference,
            "configuration": {
                "load": {
                    "sourceUris": [spec.source_uri],
                    "destinationTable": spec.destination,
                    "sourceFormat": spec.source_format,
                    "useAvroLogicalTypes": spec.use_logical_types,
                    "writeDisposition": spec.write_disposition,
                    "schemaUpdateOptions": spec.schema_update_options,
                }
            }
        })
    }

    async fn insert_job(&self, body: &serde_json::Value) -> Result<JobHandle, WarehouseError> {
        let job: ApiJob = self.send_json(self.http.post(self.jobs_url()).json(body)).await?;
        job.into_handle()
    }

    async fn get_job(&self, job_id: &str) -> Result<JobHandle, WarehouseError> {
        debug!(%job_id, "BigQueryClient::get_job: called");
        let mut request = self.http.get(format!("{}/{}", self.jobs_url(), job_id));
        if let Some(location) = &self.location {
            request = request.query(&[("location", location.as_str())]);
        }
        let job: ApiJob = self.send_json(request).await?;
        job.into_handle()
    }

    /// Send a request and decode a JSON body, mapping HTTP failures to Api errors
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, WarehouseError> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(status, "send_json: API error");
            return Err(WarehouseError::Api {
                status,
                message: error_message(&text),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    async fn list_running_jobs(&self) -> Result<Vec<JobHandle>, WarehouseError> {
        debug!(project = %self.project, "BigQueryClient::list_running_jobs: called");
        let url = self.jobs_url();
        let mut jobs = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut request = self.http.get(&url).query(&[
                ("allUsers", "true"),
                ("stateFilter", "running"),
                ("maxResults", LIST_PAGE_SIZE),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: JobListResponse = self.send_json(request).await?;
            pages += 1;
            for job in page.jobs {
                jobs.push(job.into_handle()?);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => {
                    debug!(pages, "list_running_jobs: fetching next page");
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        info!(running = jobs.len(), pages, "Listed running warehouse jobs");
        Ok(jobs)
    }

    async fn create_load_job(&self, spec: &LoadJobSpec) -> Result<JobHandle, WarehouseError> {
        let job_id = self.new_job_id();
        debug!(%job_id, destination = %spec.destination, "BigQueryClient::create_load_job: called");
        let body = self.build_load_body(spec, &job_id);

        let handle = match self.insert_job(&body).await {
            // The insert may have landed; repeat it under the same job id
            Err(WarehouseError::Network(e)) => {
                warn!(%job_id, error = %e, "Load job insert outcome unknown, retrying with the same job id");
                match self.insert_job(&body).await {
                    Err(e) if e.is_conflict() => {
                        info!(%job_id, "Load job already exists, fetching it");
                        self.get_job(&job_id).await?
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        info!(job_id = %handle.qualified_id(), destination = %spec.destination, "Created load job");
        Ok(handle)
    }
}

/// Pull the service's message out of an error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

/// creationTime is Unix ms encoded as a string
fn parse_creation_time(raw: &str) -> Result<DateTime<Utc>, WarehouseError> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| WarehouseError::InvalidResponse(format!("Bad creationTime: {}", raw)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobListResponse {
    #[serde(default)]
    jobs: Vec<ApiJob>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJob {
    job_reference: Option<ApiJobReference>,
    statistics: Option<ApiJobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiJobStatistics {
    creation_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl ApiJob {
    fn into_handle(self) -> Result<JobHandle, WarehouseError> {
        let reference = self
            .job_reference
            .ok_or_else(|| WarehouseError::InvalidResponse("Job without jobReference".to_string()))?;

        let created = match self.statistics.and_then(|s| s.creation_time) {
            Some(raw) => Some(parse_creation_time(&raw)?),
            None => None,
        };

        Ok(JobHandle {
            job_id: reference.job_id,
            project_id: reference.project_id,
            location: reference.location,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::TableRef;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client(location: Option<&str>) -> BigQueryClient {
        BigQueryClient {
            project: "acme".to_string(),
            base_url: "https://bigquery.example.com/bigquery/v2".to_string(),
            access_token: "token".to_string(),
            job_id_prefix: "bq-load".to_string(),
            location: location.map(str::to_string),
            http: Client::new(),
        }
    }

    #[test]
    fn test_jobs_url() {
        assert_eq!(
            client(None).jobs_url(),
            "https://bigquery.example.com/bigquery/v2/projects/acme/jobs"
        );
    }

    #[test]
    fn test_job_id_prefix() {
        let id = client(None).new_job_id();
        assert!(id.starts_with("bq-load_"));
        assert_ne!(id, client(None).new_job_id());
    }

    #[test]
    fn test_build_load_body() {
        let spec = LoadJobSpec::append_avro(TableRef::new("acme", "events", "clicks"), "gs://b/2024/*.avro");
        let body = client(Some("EU")).build_load_body(&spec, "bq-load_1");

        assert_eq!(body["jobReference"]["jobId"], "bq-load_1");
        assert_eq!(body["jobReference"]["location"], "EU");

        let load = &body["configuration"]["load"];
        assert_eq!(load["sourceUris"][0], "gs://b/2024/*.avro");
        assert_eq!(load["destinationTable"]["datasetId"], "events");
        assert_eq!(load["destinationTable"]["tableId"], "clicks");
        assert_eq!(load["sourceFormat"], "AVRO");
        assert_eq!(load["useAvroLogicalTypes"], true);
        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(
            load["schemaUpdateOptions"],
            serde_json::json!(["ALLOW_FIELD_ADDITION", "ALLOW_FIELD_RELAXATION"])
        );
    }

    #[test]
    fn test_build_load_body_without_location() {
        let spec = LoadJobSpec::append_avro(TableRef::new("acme", "d", "t"), "gs://b/x");
        let body = client(None).build_load_body(&spec, "j");
        assert!(body["jobReference"].get("location").is_none());
    }

    #[test]
    fn test_parse_list_page() {
        let json = r#"{
            "kind": "bigquery#jobList",
            "nextPageToken": "abc",
            "jobs": [
                {
                    "id": "acme:US.job_1",
                    "state": "RUNNING",
                    "jobReference": {"projectId": "acme", "jobId": "job_1", "location": "US"},
                    "statistics": {"creationTime": "1700000000000"}
                },
                {
                    "jobReference": {"projectId": "other", "jobId": "job_2"}
                }
            ]
        }"#;

        let page: JobListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let handles: Vec<_> = page.jobs.into_iter().map(|j| j.into_handle().unwrap()).collect();
        assert_eq!(handles[0].qualified_id(), "acme:US.job_1");
        assert_eq!(handles[0].created_millis(), 1_700_000_000_000);
        assert_eq!(handles[1].project_id, "other");
        assert!(handles[1].created.is_none());
    }

    #[test]
    fn test_parse_empty_list_page() {
        let page: JobListResponse = serde_json::from_str(r#"{"kind": "bigquery#jobList"}"#).unwrap();
        assert!(page.jobs.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_bad_creation_time() {
        let job: ApiJob = serde_json::from_str(
            r#"{"jobReference": {"projectId": "a", "jobId": "b"}, "statistics": {"creationTime": "soon"}}"#,
        )
        .unwrap();
        assert!(matches!(job.into_handle(), Err(WarehouseError::InvalidResponse(_))));
    }

    /// Answer one connection per entry with a canned response; `None` hangs
    /// up without answering. Yields the raw requests received.
    async fn serve(responses: Vec<Option<(u16, &'static str)>>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v2", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut stream).await);
                if let Some((status, body)) = response {
                    let reply = format!(
                        concat!(
                            "HTTP/1.1 {} Canned\r\n",
                            "content-type: application/json\r\n",
                            "content-length: {}\r\n",
                            "connection: close\r\n\r\n{}"
                        ),
                        status,
                        body.len(),
                        body
                    );
                    stream.write_all(reply.as_bytes()).await.unwrap();
                }
            }
            seen
        });
        (base_url, handle)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn request_body(request: &str) -> serde_json::Value {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    fn served_client(base_url: String) -> BigQueryClient {
        BigQueryClient {
            base_url,
            http: Client::builder().no_proxy().build().unwrap(),
            ..client(Some("US"))
        }
    }

    const FOUND_JOB: &str = r#"{"jobReference": {"projectId": "acme", "jobId": "bq-load_found", "location": "US"},
        "statistics": {"creationTime": "1700000000000"}}"#;

    #[tokio::test]
    async fn test_lost_insert_response_reuses_job_id() {
        let (base_url, server) = serve(vec![
            None,
            Some((409, r#"{"error": {"message": "Already Exists"}}"#)),
            Some((200, FOUND_JOB)),
        ])
        .await;
        let spec = LoadJobSpec::append_avro(TableRef::new("acme", "events", "clicks"), "gs://b/x");

        let handle = served_client(base_url).create_load_job(&spec).await.unwrap();
        assert_eq!(handle.qualified_id(), "acme:US.bq-load_found");

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 3);
        let first = request_body(&seen[0]);
        let second = request_body(&seen[1]);
        let job_id = first["jobReference"]["jobId"].as_str().unwrap();
        assert_eq!(second["jobReference"]["jobId"], job_id);
        assert!(seen[2].starts_with(&format!("GET /v2/projects/acme/jobs/{}?location=US ", job_id)));
    }

    #[tokio::test]
    async fn test_insert_repeated_once_after_network_error() {
        let (base_url, server) = serve(vec![None, None]).await;
        let spec = LoadJobSpec::append_avro(TableRef::new("acme", "events", "clicks"), "gs://b/x");

        let result = served_client(base_url).create_load_job(&spec).await;
        assert!(matches!(result, Err(WarehouseError::Network(_))));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_api_error_is_not_repeated() {
        let (base_url, server) = serve(vec![Some((500, r#"{"error": {"message": "backendError"}}"#))]).await;
        let spec = LoadJobSpec::append_avro(TableRef::new("acme", "events", "clicks"), "gs://b/x");

        let result = served_client(base_url).create_load_job(&spec).await;
        match result {
            Err(e @ WarehouseError::Api { status: 500, .. }) => assert!(e.is_service_error()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[test]
    fn test_error_message() {
        let body = r#"{"error": {"code": 503, "message": "Service unavailable", "status": "UNAVAILABLE"}}"#;
        assert_eq!(error_message(body), "Service unavailable");
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
