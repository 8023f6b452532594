//! Command/query transport to the ClickHouse server.
//!
//! The reconciliation core talks to the backend through the [`Transport`]
//! trait: one synchronous-in-spirit call per statement, optionally returning
//! tabular output. [`HttpTransport`] implements it over the ClickHouse HTTP
//! interface; tests script a [`MockTransport`] instead.
//!
//! Timeouts and credentials belong to the transport configuration; the core
//! issues a statement and waits, nothing more.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::debug;

use crate::config::ClickHouseConfig;
use crate::errors::TransportError;

/// Which shape of result the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    /// Raw text, split into lines.
    Raw,
    /// Structured rows via `FORMAT JSON`.
    Json,
}

/// Fully-materialized result of one statement. Queries are one-shot; there is
/// no streaming.
#[derive(Debug, Clone)]
pub enum RawResult {
    Lines(Vec<String>),
    Table(Vec<serde_json::Map<String, Value>>),
}

impl RawResult {
    /// The result as lines; a tabular result yields nothing.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            RawResult::Lines(lines) => lines,
            RawResult::Table(_) => vec![],
        }
    }

    /// The result as rows; a raw result yields nothing.
    pub fn into_rows(self) -> Vec<serde_json::Map<String, Value>> {
        match self {
            RawResult::Lines(_) => vec![],
            RawResult::Table(rows) => rows,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, sql: &str, format: ResultFormat) -> Result<RawResult, TransportError>;
}

/// Collapse whitespace runs (statement templates are written multi-line).
pub fn flatten_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Transport over the ClickHouse HTTP interface.
///
/// Statements are POSTed as the request body; credentials travel in the
/// `X-ClickHouse-User`/`X-ClickHouse-Key` headers; tabular reads append
/// `FORMAT JSON` and deserialize the `data` array.
pub struct HttpTransport {
    client: reqwest::Client,
    url: url::Url,
    user: String,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClickHouseConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, sql: &str, format: ResultFormat) -> Result<RawResult, TransportError> {
        let sql = flatten_sql(sql);
        let body = match format {
            ResultFormat::Raw => sql.clone(),
            ResultFormat::Json => format!("{sql} FORMAT JSON"),
        };
        debug!(statement = %sql, "executing statement");

        let mut request = self.client.post(self.url.clone()).header("X-ClickHouse-User", &self.user).body(body);
        if let Some(password) = &self.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Server {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        match format {
            ResultFormat::Raw => Ok(RawResult::Lines(
                text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect(),
            )),
            ResultFormat::Json => {
                let parsed: Value = serde_json::from_str(&text).map_err(|e| TransportError::Malformed(e.to_string()))?;
                let rows = parsed
                    .get("data")
                    .and_then(Value::as_array)
                    .ok_or_else(|| TransportError::Malformed("missing 'data' array in JSON result".to_string()))?
                    .iter()
                    .map(|row| {
                        row.as_object()
                            .cloned()
                            .ok_or_else(|| TransportError::Malformed("non-object row in JSON result".to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(RawResult::Table(rows))
            }
        }
    }
}

/// Resolve the server version, preferring a configured override.
///
/// Absent is not an error: version-gated behavior simply stays disabled.
pub async fn resolve_server_version(transport: &dyn Transport, configured: Option<&str>) -> Option<String> {
    if let Some(version) = configured {
        return Some(version.to_string());
    }
    match transport.execute("SELECT version()", ResultFormat::Raw).await {
        Ok(result) => result.into_lines().into_iter().next(),
        Err(e) => {
            debug!("could not resolve server version: {e}");
            None
        }
    }
}

/// Resolve the local cluster name, preferring a configured override.
///
/// Absent is not an error; it just disables the cluster directive.
pub async fn resolve_cluster_name(transport: &dyn Transport, configured: Option<&str>) -> Option<String> {
    if let Some(name) = configured {
        return Some(name.to_string());
    }
    let sql = "SELECT cluster FROM system.clusters WHERE is_local = 1 LIMIT 1";
    match transport.execute(sql, ResultFormat::Json).await {
        Ok(result) => result
            .into_rows()
            .into_iter()
            .next()
            .and_then(|row| row.get("cluster").and_then(Value::as_str).map(str::to_string))
            .filter(|name| !name.is_empty()),
        Err(e) => {
            debug!("could not resolve cluster name: {e}");
            None
        }
    }
}

/// Compare two dotted-numeric version strings.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|part| part.trim().parse().unwrap_or(0)).collect() };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Releases at or below 20.8.11.17 mishandle profile inheritance in
/// CREATE/ALTER USER/ROLE; the reconcilers split the profile assignment into
/// a follow-up statement there.
pub fn has_profile_inheritance_bug(version: &str) -> bool {
    version_cmp(version, "20.8.11.17") != Ordering::Greater
}

/// Scriptable transport double: canned responses matched by statement
/// prefix, every executed statement recorded for golden assertions.
#[cfg(test)]
pub struct MockTransport {
    calls: std::sync::Mutex<Vec<String>>,
    stubs: std::sync::Mutex<Vec<(String, StubResponse)>>,
}

#[cfg(test)]
#[derive(Clone)]
enum StubResponse {
    Lines(Vec<String>),
    Table(Vec<serde_json::Map<String, Value>>),
    Failure(String),
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            calls: std::sync::Mutex::new(vec![]),
            stubs: std::sync::Mutex::new(vec![]),
        }
    }

    /// Respond to statements starting with `prefix` with raw lines.
    pub fn stub_lines(&self, prefix: &str, lines: &[&str]) {
        self.stubs
            .lock()
            .unwrap()
            .push((prefix.to_string(), StubResponse::Lines(lines.iter().map(|l| l.to_string()).collect())));
    }

    /// Respond to statements starting with `prefix` with tabular rows
    /// (pass a `serde_json::json!` array of objects).
    pub fn stub_table(&self, prefix: &str, rows: Value) {
        let rows = rows
            .as_array()
            .expect("stub_table expects a JSON array")
            .iter()
            .map(|row| row.as_object().expect("stub_table expects objects").clone())
            .collect();
        self.stubs.lock().unwrap().push((prefix.to_string(), StubResponse::Table(rows)));
    }

    /// Fail statements starting with `prefix` with a server error.
    pub fn fail(&self, prefix: &str, message: &str) {
        self.stubs
            .lock()
            .unwrap()
            .push((prefix.to_string(), StubResponse::Failure(message.to_string())));
    }

    /// Every statement executed so far, in order, whitespace-flattened.
    pub fn executed(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, sql: &str, format: ResultFormat) -> Result<RawResult, TransportError> {
        let sql = flatten_sql(sql);
        self.calls.lock().unwrap().push(sql.clone());
        let stub = self
            .stubs
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone());
        match stub {
            Some(StubResponse::Lines(lines)) => Ok(RawResult::Lines(lines)),
            Some(StubResponse::Table(rows)) => Ok(RawResult::Table(rows)),
            Some(StubResponse::Failure(message)) => Err(TransportError::Server { status: 500, message }),
            None => match format {
                ResultFormat::Raw => Ok(RawResult::Lines(vec![])),
                ResultFormat::Json => Ok(RawResult::Table(vec![])),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> ClickHouseConfig {
        ClickHouseConfig {
            url: url::Url::parse(url).unwrap(),
            user: "default".to_string(),
            password: Some("secret".to_string()),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn raw_results_split_into_trimmed_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string("SELECT name FROM system.users WHERE storage = 'local directory'"))
            .and(header("X-ClickHouse-User", "default"))
            .and(header("X-ClickHouse-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("alice\nbob\n"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server.uri())).unwrap();
        let result = transport
            .execute(
                "SELECT name\n  FROM system.users\n  WHERE storage = 'local directory'",
                ResultFormat::Raw,
            )
            .await
            .unwrap();
        assert_eq!(result.into_lines(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn json_results_deserialize_the_data_array() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "meta": [{"name": "name", "type": "String"}],
            "data": [{"name": "q1", "max_queries": "100"}],
            "rows": 1
        });
        Mock::given(method("POST"))
            .and(body_string("SELECT * FROM system.quotas FORMAT JSON"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server.uri())).unwrap();
        let rows = transport
            .execute("SELECT * FROM system.quotas", ResultFormat::Json)
            .await
            .unwrap()
            .into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "q1");
    }

    #[tokio::test]
    async fn server_errors_surface_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Code: 497. DB::Exception: Not enough privileges."))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server.uri())).unwrap();
        let err = transport.execute("DROP USER 'alice'", ResultFormat::Raw).await.unwrap_err();
        match err {
            TransportError::Server { status, message } => {
                assert_eq!(status, 403);
                assert!(message.contains("Not enough privileges"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cluster_name_resolution_prefers_configured_override() {
        let mock = MockTransport::new();
        assert_eq!(resolve_cluster_name(&mock, Some("main")).await.as_deref(), Some("main"));
        assert!(mock.executed().is_empty(), "override must not query the server");

        mock.stub_table("SELECT cluster FROM system.clusters", serde_json::json!([{"cluster": "prod"}]));
        assert_eq!(resolve_cluster_name(&mock, None).await.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn version_resolution_degrades_to_none() {
        let mock = MockTransport::new();
        mock.fail("SELECT version()", "boom");
        assert_eq!(resolve_server_version(&mock, None).await, None);

        let mock = MockTransport::new();
        mock.stub_lines("SELECT version()", &["21.3.2.5"]);
        assert_eq!(resolve_server_version(&mock, None).await.as_deref(), Some("21.3.2.5"));
    }

    #[test]
    fn version_ordering() {
        assert_eq!(version_cmp("20.8.11.17", "20.8.11.17"), Ordering::Equal);
        assert_eq!(version_cmp("20.8.11.16", "20.8.11.17"), Ordering::Less);
        assert_eq!(version_cmp("20.8.12.2", "20.8.11.17"), Ordering::Greater);
        assert_eq!(version_cmp("21.1", "20.8.11.17"), Ordering::Greater);
    }

    #[test]
    fn profile_bug_gate() {
        assert!(has_profile_inheritance_bug("20.8.11.17"));
        assert!(has_profile_inheritance_bug("20.7.1.1"));
        assert!(!has_profile_inheritance_bug("20.8.12.1"));
        assert!(!has_profile_inheritance_bug("21.3.2.5"));
    }
}
