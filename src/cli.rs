use crate::api::{self, OutputMode};
use crate::services::clean::DEFAULT_VALUE_COLUMNS;
use crate::services::log::ActivityLogger;
use crate::types::{ApiResponse, FetchConfig, FetchPlan, SiteId};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "aqfetch",
    version,
    about = "Fetch and clean air-quality sensor data (JSON output)"
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch readings for every site in the list and write CSV output
    Fetch(FetchArgs),
    /// Clean previously fetched CSV files (gap filling + interpolation)
    Clean(CleanArgs),
    /// Print the API URL that would be fetched for one site
    Url(UrlArgs),
    /// Show recent activity log entries
    Logs(LogsArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// JSON file listing the sites to fetch
    #[arg(long, default_value = "site_ids.json")]
    sites: PathBuf,
    /// Comma-separated parameter names
    #[arg(long, default_value = "pm2.5cnc,pm10cnc")]
    params: String,
    /// Start of the date range (passed through to the API unvalidated)
    #[arg(long, default_value = "2023-12-29T00:00")]
    start: String,
    /// End of the date range
    #[arg(long, default_value = "2024-12-31T00:00")]
    end: String,
    /// Output directory for CSV files and quarantine dumps
    #[arg(long, default_value = "data")]
    out: PathBuf,
    /// Write one combined CSV instead of per-site files
    #[arg(long)]
    combined: bool,
    /// Attempts per site before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Seconds to wait between site requests
    #[arg(long, default_value_t = 1)]
    pace_secs: u64,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
    /// Override the API base URL
    #[arg(long)]
    base_url: Option<String>,
    /// Override the API key baked into the URL template
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Args)]
struct CleanArgs {
    /// Directory holding the fetched CSV files
    #[arg(long, default_value = "data")]
    dir: PathBuf,
    /// Comma-separated measurement columns to clean
    #[arg(long)]
    columns: Option<String>,
}

#[derive(Args)]
struct UrlArgs {
    /// Site identifier to render the URL for
    site: String,
    #[arg(long, default_value = "pm2.5cnc,pm10cnc")]
    params: String,
    #[arg(long, default_value = "2023-12-29T00:00")]
    start: String,
    #[arg(long, default_value = "2024-12-31T00:00")]
    end: String,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Args)]
struct LogsArgs {
    /// Only show error entries
    #[arg(long)]
    errors_only: bool,
    /// Only show entries mentioning this site
    #[arg(long)]
    site: Option<String>,
}

pub fn run() {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Fetch(args) => fetch_cmd(args),
        Command::Clean(args) => clean_cmd(args),
        Command::Url(args) => url_cmd(args),
        Command::Logs(args) => logs_cmd(args),
    }
}

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn config_from(
    base_url: Option<String>,
    api_key: Option<String>,
    max_retries: u32,
    timeout_secs: u64,
    quarantine_dir: PathBuf,
) -> FetchConfig {
    let mut config = FetchConfig {
        max_retries,
        timeout_secs,
        quarantine_dir,
        ..FetchConfig::default()
    };
    if let Some(base_url) = base_url {
        config.base_url = base_url;
    }
    if let Some(api_key) = api_key {
        config.api_key = api_key;
    }
    config
}

fn fetch_cmd(args: FetchArgs) {
    let config = config_from(
        args.base_url,
        args.api_key,
        args.max_retries,
        args.timeout_secs,
        args.out.clone(),
    );
    let plan = FetchPlan {
        params: split_params(&args.params),
        start: args.start,
        end: args.end,
    };
    let mode = if args.combined {
        OutputMode::Combined
    } else {
        OutputMode::PerSite
    };

    finish(api::fetch_sites(
        &config,
        &plan,
        &args.sites,
        &args.out,
        mode,
        Duration::from_secs(args.pace_secs),
    ));
}

fn clean_cmd(args: CleanArgs) {
    let columns: Vec<String> = match args.columns {
        Some(raw) => split_params(&raw),
        None => DEFAULT_VALUE_COLUMNS.iter().map(|c| c.to_string()).collect(),
    };
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    finish(api::clean_data_dir(&args.dir, &column_refs));
}

fn url_cmd(args: UrlArgs) {
    let config = config_from(args.base_url, args.api_key, 3, 30, PathBuf::from("."));
    let plan = FetchPlan {
        params: split_params(&args.params),
        start: args.start,
        end: args.end,
    };
    let request = plan.request_for(&SiteId(args.site));
    print_json(ApiResponse::ok(api::build_url(&config, &request)));
}

fn logs_cmd(args: LogsArgs) {
    finish(
        ActivityLogger::new()
            .and_then(|logger| logger.read_logs(args.site.as_deref(), args.errors_only)),
    );
}

// Errors are reported in the JSON envelope; the process still exits 0 so a
// partially failed batch never aborts surrounding scripts.
fn finish<T: serde::Serialize>(res: crate::error::Result<T>) {
    match res {
        Ok(v) => print_json(ApiResponse::ok(v)),
        Err(e) => print_json(ApiResponse::<()>::err(e.to_string())),
    }
}

fn print_json<T: serde::Serialize>(val: T) {
    match serde_json::to_string_pretty(&val) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to encode output: {e}"),
    }
}
