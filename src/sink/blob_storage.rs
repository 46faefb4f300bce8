use super::credentials::{put_string_to_sign, sign, BlobAuth, BlobCredentials};
use super::{report_file_name, ContainerMap, ReportSink};
use crate::error::ReportError;
use crate::history_store::EntityId;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Storage REST API version sent with every request.
pub const BLOB_API_VERSION: &str = "2021-08-06";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Uploads reports as block blobs named `{row_count}.html` into the
/// container mapped from the entity id.
///
/// Uses a blocking HTTP client, so it must not be created or used from
/// inside an async context.
pub struct BlobStorageSink {
    client: Client,
    credentials: BlobCredentials,
    containers: ContainerMap,
}

impl BlobStorageSink {
    pub fn new(
        credentials: BlobCredentials,
        containers: ContainerMap,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        debug!(
            "Blob sink at {} with {} mapped containers",
            credentials.endpoint,
            containers.len()
        );
        Ok(Self {
            client,
            credentials,
            containers,
        })
    }

    pub fn from_connection_string(connection_string: &str, containers: ContainerMap) -> Result<Self> {
        let credentials = BlobCredentials::parse(connection_string)
            .context("Invalid blob storage connection string")?;
        Self::new(credentials, containers, DEFAULT_TIMEOUT)
    }

    fn blob_url(&self, container: &str, blob: &str) -> Result<Url, ReportError> {
        let raw = format!("{}/{}/{}", self.credentials.endpoint, container, blob);
        Url::parse(&raw).map_err(|e| ReportError::Upload(format!("Invalid blob URL {}: {}", raw, e)))
    }
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl ReportSink for BlobStorageSink {
    fn write_report(
        &self,
        uid: EntityId,
        row_count: usize,
        html: &str,
    ) -> Result<String, ReportError> {
        let container = self.containers.resolve(uid)?;
        let mut url = self.blob_url(container, &report_file_name(row_count))?;
        // Logged location never carries the SAS token
        let location = url.to_string();
        if let BlobAuth::Sas(token) = &self.credentials.auth {
            url.set_query(Some(token));
        }
        let body = html.as_bytes().to_vec();
        let date = http_date();
        let x_ms_headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("x-ms-date", date.as_str()),
            ("x-ms-version", BLOB_API_VERSION),
        ];

        let mut request = self
            .client
            .put(url.clone())
            .header(CONTENT_TYPE, HTML_CONTENT_TYPE);
        for (name, value) in x_ms_headers {
            request = request.header(name, value);
        }
        if let BlobAuth::SharedKey { account, key } = &self.credentials.auth {
            let string_to_sign = put_string_to_sign(
                body.len(),
                HTML_CONTENT_TYPE,
                &x_ms_headers,
                account,
                url.path(),
            );
            let signature = sign(key, &string_to_sign)
                .map_err(|e| ReportError::Upload(format!("{:#}", e)))?;
            request = request.header(AUTHORIZATION, format!("SharedKey {}:{}", account, signature));
        }

        let response = request
            .body(body)
            .send()
            .map_err(|e| ReportError::Upload(format!("PUT {} failed: {}", location, e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ReportError::Upload(format!(
                "PUT {} returned {}: {}",
                location,
                status,
                detail.trim()
            )));
        }
        debug!("Uploaded {} bytes to {}", html.len(), location);

        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::routing::put;
    use axum::Router;
    use std::sync::{Arc, Mutex};
    use tokio::runtime::Runtime;

    const ACCOUNT_KEY: &str = "c2VjcmV0";

    struct RecordedPut {
        path: String,
        query: Option<String>,
        headers: HeaderMap,
        body: Vec<u8>,
    }

    #[derive(Clone)]
    struct MockStore {
        puts: Arc<Mutex<Vec<RecordedPut>>>,
        status: StatusCode,
    }

    async fn record_put(
        State(store): State<MockStore>,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, &'static str) {
        store.puts.lock().unwrap().push(RecordedPut {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body: body.to_vec(),
        });
        let detail = if store.status.is_success() {
            ""
        } else {
            "<Error><Code>AuthenticationFailed</Code></Error>"
        };
        (store.status, detail)
    }

    /// Serves PUT requests on a random local port from a background runtime.
    /// The runtime must outlive the requests, so it is returned to the caller.
    fn start_mock_store(status: StatusCode) -> (Runtime, String, Arc<Mutex<Vec<RecordedPut>>>) {
        let runtime = Runtime::new().unwrap();
        let puts = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/{*path}", put(record_put))
            .with_state(MockStore {
                puts: puts.clone(),
                status,
            });
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let endpoint = format!("http://{}/reports", listener.local_addr().unwrap());
        runtime.spawn(async move { axum::serve(listener, app).await });
        (runtime, endpoint, puts)
    }

    fn shared_key_sink(endpoint: &str) -> BlobStorageSink {
        BlobStorageSink::from_connection_string(
            &format!(
                "BlobEndpoint={};AccountName=reports;AccountKey={}",
                endpoint, ACCOUNT_KEY
            ),
            ContainerMap::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_upload_with_shared_key() {
        let (_runtime, endpoint, puts) = start_mock_store(StatusCode::CREATED);
        let sink = shared_key_sink(&endpoint);

        let location = sink.write_report(99, 1, "<p>Widget</p>").unwrap();
        assert_eq!(location, format!("{}/99-fau/1.html", endpoint));

        let puts = puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let put = &puts[0];
        assert_eq!(put.path, "/reports/99-fau/1.html");
        assert_eq!(put.query, None);
        assert_eq!(put.body, b"<p>Widget</p>");
        assert_eq!(put.headers["x-ms-blob-type"], "BlockBlob");
        assert_eq!(put.headers["x-ms-version"], BLOB_API_VERSION);
        assert_eq!(put.headers["content-type"], HTML_CONTENT_TYPE);

        // The signature covers exactly what was sent
        let date = put.headers["x-ms-date"].to_str().unwrap();
        let expected = sign(
            b"secret",
            &put_string_to_sign(
                put.body.len(),
                HTML_CONTENT_TYPE,
                &[
                    ("x-ms-blob-type", "BlockBlob"),
                    ("x-ms-date", date),
                    ("x-ms-version", BLOB_API_VERSION),
                ],
                "reports",
                &put.path,
            ),
        )
        .unwrap();
        assert_eq!(
            put.headers["authorization"].to_str().unwrap(),
            format!("SharedKey reports:{}", expected)
        );
    }

    #[test]
    fn test_upload_with_sas_token() {
        let (_runtime, endpoint, puts) = start_mock_store(StatusCode::CREATED);
        let sink = BlobStorageSink::from_connection_string(
            &format!(
                "BlobEndpoint={};SharedAccessSignature=sv=2022-11-02&sig=abc",
                endpoint
            ),
            ContainerMap::default(),
        )
        .unwrap();

        let location = sink.write_report(100, 3, "<p/>").unwrap();
        assert!(!location.contains("sig="));

        let puts = puts.lock().unwrap();
        assert_eq!(puts[0].path, "/reports/100-fau/3.html");
        assert_eq!(puts[0].query.as_deref(), Some("sv=2022-11-02&sig=abc"));
        assert!(!puts[0].headers.contains_key("authorization"));
    }

    #[test]
    fn test_rejected_upload_is_upload_error() {
        let (_runtime, endpoint, _puts) = start_mock_store(StatusCode::FORBIDDEN);
        let sink = shared_key_sink(&endpoint);

        match sink.write_report(99, 1, "<p/>") {
            Err(ReportError::Upload(message)) => {
                assert!(message.contains("403"), "{}", message);
                assert!(message.contains("AuthenticationFailed"), "{}", message);
            }
            other => panic!("Expected Upload error, got {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_entity_sends_nothing() {
        let (_runtime, endpoint, puts) = start_mock_store(StatusCode::CREATED);
        let sink = shared_key_sink(&endpoint);

        assert!(matches!(
            sink.write_report(5, 1, "<p/>"),
            Err(ReportError::UnknownContainer(5))
        ));
        assert!(puts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_endpoint_is_upload_error() {
        // Bind and drop a listener to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let sink = shared_key_sink(&format!("http://127.0.0.1:{}", port));

        assert!(matches!(
            sink.write_report(99, 1, "<p/>"),
            Err(ReportError::Upload(_))
        ));
    }
}
