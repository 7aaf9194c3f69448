use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Opaque identifier for a monitored sensor/device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub String);

impl SiteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable parameter set for one API call. Built once per site; none of
/// the fields are validated here (they flow straight into the URL template).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub site: SiteId,
    pub params: Vec<String>,
    pub start: String,
    pub end: String,
}

/// Fetcher configuration, passed in explicitly so the component stays
/// testable in isolation (no process-wide constants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    pub api_key: String,
    /// Averaging window requested from the API, in minutes.
    pub avg_minutes: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Backoff before retry n is `backoff_base_secs * n`.
    pub backoff_base_secs: u64,
    pub accept: String,
    pub user_agent: String,
    /// Where unparseable response bodies are dumped for inspection.
    pub quarantine_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://atmos.urbansciences.in".into(),
            api_key: "63h3AckbgtY".into(),
            avg_minutes: 15,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_secs: 2,
            accept: "*/*".into(),
            user_agent: "aqfetch/0.1 data collection client".into(),
            quarantine_dir: PathBuf::from("."),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
}

/// Shared per-run fetch parameters; combined with each site ID to form a
/// [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPlan {
    pub params: Vec<String>,
    pub start: String,
    pub end: String,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            params: vec!["pm2.5cnc".into(), "pm10cnc".into()],
            start: "2023-12-29T00:00".into(),
            end: "2024-12-31T00:00".into(),
        }
    }
}

impl FetchPlan {
    pub fn request_for(&self, site: &SiteId) -> FetchRequest {
        FetchRequest {
            site: site.clone(),
            params: self.params.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
        }
    }
}

/// One row, keyed by column name.
pub type Record = BTreeMap<String, String>;

/// Ordered tabular data parsed from a response body or read back from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn push(&mut self, row: Record) {
        self.rows.push(row);
    }

    /// Append a column with the same value in every row.
    pub fn add_column(&mut self, name: &str, value: &str) {
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        for row in &mut self.rows {
            row.insert(name.to_string(), value.to_string());
        }
    }
}

/// Outcome of one fetch. Every failure path resolves to a variant here;
/// nothing escapes `Fetcher::fetch` as an error, so callers match instead
/// of catching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FetchOutcome {
    Table(Table),
    Empty,
    Failure { kind: FailureKind, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// All retries exhausted (connect error, timeout, non-2xx status).
    Transport,
    /// The API explicitly signaled failure in a JSON body.
    ApiError,
    /// Declared or sniffed CSV that would not parse.
    MalformedCsv,
    /// Body that is neither usable CSV nor row-shaped JSON.
    Unparseable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transport => "transport",
            FailureKind::ApiError => "api-error",
            FailureKind::MalformedCsv => "malformed-csv",
            FailureKind::Unparseable => "unparseable",
        };
        f.write_str(s)
    }
}

/// Per-run accounting from the batch driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows: usize,
    /// Combined output file, when one was written.
    pub output: Option<PathBuf>,
}

/// Handy wrapper for printing any result as a single JSON envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_column_fills_every_row() {
        let mut t = Table::new(vec!["dt_time".into()]);
        let mut r = Record::new();
        r.insert("dt_time".into(), "2024-01-01 00:00:00".into());
        t.push(r.clone());
        t.push(r);

        t.add_column("deviceid", "SITE_1");
        assert_eq!(t.columns, vec!["dt_time", "deviceid"]);
        assert!(t.rows.iter().all(|r| r["deviceid"] == "SITE_1"));
    }

    #[test]
    fn plan_builds_one_request_per_site() {
        let plan = FetchPlan::default();
        let req = plan.request_for(&SiteId("ABC".into()));
        assert_eq!(req.site.as_str(), "ABC");
        assert_eq!(req.params, plan.params);
        assert_eq!(req.start, plan.start);
    }
}
