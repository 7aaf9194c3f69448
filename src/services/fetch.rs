use crate::error::{AqError, Result};
use crate::services::store::write_quarantine;
use crate::types::*;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use std::thread;
use std::time::Duration;
use url::Url;

/// Column injected into tables that arrive without one.
pub const DEVICE_ID_COLUMN: &str = "deviceid";

/// Leading token of the API's CSV header row.
const CSV_HEADER_PREFIX: &str = "dt_time,";

/// What one HTTP round trip produced, before any body interpretation.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking transport seam. Production wraps `reqwest::blocking`; tests
/// substitute a deterministic mock.
pub trait Transport {
    fn name(&self) -> &'static str;
    fn get(&self, url: &str) -> Result<HttpReply>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    headers: HeaderMap,
}

impl ReqwestTransport {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&cfg.accept).unwrap_or(HeaderValue::from_static("*/*")),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&cfg.user_agent).unwrap_or(HeaderValue::from_static("aqfetch")),
        );
        let client = reqwest::blocking::Client::builder()
            .timeout(cfg.timeout())
            .build()?;
        Ok(Self { client, headers })
    }
}

impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        "reqwest-blocking"
    }

    fn get(&self, url: &str) -> Result<HttpReply> {
        let parsed = Url::parse(url).map_err(|_| AqError::InvalidUrl(url.into()))?;
        let resp = self.client.get(parsed).headers(self.headers.clone()).send()?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.text()?;
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}

/// Render the request URL for one site. Pure; the caller's fields pass
/// through the template unvalidated.
pub fn build_url(cfg: &FetchConfig, req: &FetchRequest) -> String {
    format!(
        "{}/adp/v4/getDeviceDataParam/imei/{}/params/{}/startdate/{}/enddate/{}/ts/mm/avg/{}/api/{}?gaps=1&gap_value=NaN",
        cfg.base_url.trim_end_matches('/'),
        req.site,
        req.params.join(","),
        req.start,
        req.end,
        cfg.avg_minutes,
        cfg.api_key,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Csv,
    Json,
}

/// Ordered classifier predicates for CSV; first match wins, anything else
/// goes down the JSON path (with a last-resort CSV fallback there).
const CSV_CLASSIFIERS: &[(&str, fn(Option<&str>, &str) -> bool)] = &[
    ("content-type", |ct, _| {
        ct.map_or(false, |c| c.to_ascii_lowercase().contains("csv"))
    }),
    ("body-prefix", |_, body| {
        body.trim_start().starts_with(CSV_HEADER_PREFIX)
    }),
];

pub(crate) fn classify(content_type: Option<&str>, body: &str) -> BodyKind {
    for (_name, matches) in CSV_CLASSIFIERS {
        if matches(content_type, body) {
            return BodyKind::Csv;
        }
    }
    BodyKind::Json
}

/// Turns one [`FetchRequest`] into one [`FetchOutcome`]: a single GET with
/// bounded retries, then heuristic interpretation of the body. Stateless
/// between calls, so instances are freely reusable.
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    config: FetchConfig,
}

impl<'a> Fetcher<'a> {
    pub fn new(transport: &'a dyn Transport, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn build_url(&self, req: &FetchRequest) -> String {
        build_url(&self.config, req)
    }

    pub fn fetch(&self, req: &FetchRequest) -> FetchOutcome {
        let url = self.build_url(req);
        let reply = match self.get_with_retries(&url) {
            Ok(r) => r,
            Err(e) => {
                return FetchOutcome::Failure {
                    kind: FailureKind::Transport,
                    detail: e.to_string(),
                }
            }
        };
        eprintln!(
            "Response status: {} ({}, {} bytes)",
            reply.status,
            reply.content_type.as_deref().unwrap_or("unknown"),
            reply.body.len()
        );

        let mut outcome = self.interpret(&reply);
        if let FetchOutcome::Table(table) = &mut outcome {
            if !table.has_column(DEVICE_ID_COLUMN) {
                table.add_column(DEVICE_ID_COLUMN, req.site.as_str());
            }
        }
        outcome
    }

    /// Backoff before retry `attempt` (1-based): base * attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config.backoff_base() * attempt
    }

    fn get_with_retries(&self, url: &str) -> Result<HttpReply> {
        let attempts = self.config.max_retries.max(1);
        let mut last_err: Option<AqError> = None;

        for attempt in 1..=attempts {
            match self.transport.get(url) {
                Ok(reply) if reply.is_success() => return Ok(reply),
                Ok(reply) => {
                    last_err = Some(AqError::Other(format!("HTTP status {}", reply.status)));
                }
                Err(e) => last_err = Some(e),
            }
            if attempt < attempts {
                let delay = self.backoff_delay(attempt);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AqError::Other("no attempts made".into())))
    }

    fn interpret(&self, reply: &HttpReply) -> FetchOutcome {
        let body = &reply.body;
        if body.trim().is_empty() {
            return FetchOutcome::Empty;
        }

        match classify(reply.content_type.as_deref(), body) {
            BodyKind::Csv => match parse_csv(body) {
                Ok(table) => FetchOutcome::Table(table),
                Err(detail) => {
                    self.quarantine(body, "csv");
                    FetchOutcome::Failure {
                        kind: FailureKind::MalformedCsv,
                        detail,
                    }
                }
            },
            BodyKind::Json => self.interpret_json(body),
        }
    }

    fn interpret_json(&self, body: &str) -> FetchOutcome {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => {
                if let Some(detail) = api_error_detail(&value) {
                    return FetchOutcome::Failure {
                        kind: FailureKind::ApiError,
                        detail,
                    };
                }
                match coerce_json_table(&value) {
                    Some(table) => FetchOutcome::Table(table),
                    None => {
                        self.quarantine(body, "txt");
                        FetchOutcome::Failure {
                            kind: FailureKind::Unparseable,
                            detail: "json body is not an array of records".into(),
                        }
                    }
                }
            }
            Err(_) => match parse_csv_fallback(body) {
                Ok(table) => FetchOutcome::Table(table),
                Err(detail) => {
                    self.quarantine(body, "txt");
                    FetchOutcome::Failure {
                        kind: FailureKind::Unparseable,
                        detail,
                    }
                }
            },
        }
    }

    // Best effort; losing the dump only costs us the inspection artifact.
    fn quarantine(&self, body: &str, ext: &str) {
        let _ = write_quarantine(&self.config.quarantine_dir, body, ext);
    }
}

/// Explicit API-signaled failure: `{"message": "unsuccessful", "error": ...}`.
fn api_error_detail(value: &serde_json::Value) -> Option<String> {
    let map = value.as_object()?;
    if map.get("message").and_then(|m| m.as_str()) != Some("unsuccessful") {
        return None;
    }
    Some(
        map.get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("Unknown error")
            .to_string(),
    )
}

pub(crate) fn parse_csv(text: &str) -> std::result::Result<Table, String> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    if headers.is_empty() {
        return Err("no header row".into());
    }
    let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut table = Table::new(columns.clone());
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let mut row = Record::new();
        for (name, field) in columns.iter().zip(record.iter()) {
            row.insert(name.clone(), field.to_string());
        }
        table.push(row);
    }
    Ok(table)
}

/// Last-resort CSV parse after a failed JSON parse. A lenient reader will
/// happily read prose as a one-column table, so require at least two
/// columns before believing the result.
pub(crate) fn parse_csv_fallback(text: &str) -> std::result::Result<Table, String> {
    let table = parse_csv(text)?;
    if table.columns.len() < 2 {
        return Err(format!(
            "only {} column(s); not tabular",
            table.columns.len()
        ));
    }
    Ok(table)
}

/// Coerce a JSON array of records into the same [`Table`] shape CSV
/// produces. Column order is first-seen across rows; scalars are
/// stringified and null becomes an empty cell. Nested structures mean the
/// value is not row-shaped.
fn coerce_json_table(value: &serde_json::Value) -> Option<Table> {
    let rows = value.as_array()?;
    let mut columns: Vec<String> = Vec::new();
    let mut records: Vec<Record> = Vec::with_capacity(rows.len());

    for row in rows {
        let obj = row.as_object()?;
        let mut record = Record::new();
        for (key, cell) in obj {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
            record.insert(key.clone(), stringify_cell(cell)?);
        }
        records.push(record);
    }

    let mut table = Table::new(columns);
    for record in records {
        table.push(record);
    }
    Some(table)
}

fn stringify_cell(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
