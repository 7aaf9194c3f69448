use crate::error::Result;
use crate::services::clean::{self, CleanReport};
use crate::services::fetch::{self, Fetcher, ReqwestTransport};
use crate::services::log::ActivityLogger;
use crate::services::sites::load_site_ids;
use crate::services::store::DataStore;
use crate::types::*;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

// Helper functions for logging - ignore setup errors so logging never
// breaks the main operations
fn log_info(site: Option<&str>, event: &str, details: Option<&str>) {
    if let Ok(logger) = ActivityLogger::new() {
        let _ = logger.info(site, event, details);
    }
}

fn log_error(site: Option<&str>, event: &str, details: Option<&str>) {
    if let Ok(logger) = ActivityLogger::new() {
        let _ = logger.error(site, event, details);
    }
}

/// How fetched tables land on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One `{site}_data.csv` per site.
    PerSite,
    /// A single `air_quality_data.csv` concatenating every site.
    Combined,
}

/// Render the URL one site's request would hit. Pure convenience wrapper.
pub fn build_url(config: &FetchConfig, request: &FetchRequest) -> String {
    fetch::build_url(config, request)
}

/// Fetch readings for every site in the list, sequentially, writing CSV
/// output under `out_dir`. One site's failure never halts the batch; the
/// summary carries the per-run counts.
pub fn fetch_sites(
    config: &FetchConfig,
    plan: &FetchPlan,
    sites_file: &Path,
    out_dir: &Path,
    mode: OutputMode,
    pacing: Duration,
) -> Result<BatchSummary> {
    let start_time = Instant::now();

    let store = DataStore::new(out_dir)?;
    let transport = ReqwestTransport::new(config)?;
    let fetcher = Fetcher::new(&transport, config.clone());

    let site_ids = load_site_ids(sites_file)?;
    eprintln!("Found {} site IDs", site_ids.len());

    let mut summary = BatchSummary {
        total: site_ids.len(),
        ..Default::default()
    };
    let mut collected: Vec<Table> = Vec::new();

    for (i, site) in site_ids.iter().enumerate() {
        eprintln!("Processing site {}/{}: {}", i + 1, site_ids.len(), site);
        let request = plan.request_for(site);

        match fetcher.fetch(&request) {
            FetchOutcome::Table(table) => {
                eprintln!("Collected {} rows of data for {}", table.len(), site);
                summary.rows += table.len();
                summary.succeeded += 1;
                match mode {
                    OutputMode::PerSite => {
                        let path = store.write_site(site, &table)?;
                        log_info(
                            Some(site.as_str()),
                            "fetch_site",
                            Some(&format!("{} rows -> {}", table.len(), path.display())),
                        );
                    }
                    OutputMode::Combined => {
                        log_info(
                            Some(site.as_str()),
                            "fetch_site",
                            Some(&format!("{} rows collected", table.len())),
                        );
                        collected.push(table);
                    }
                }
            }
            FetchOutcome::Empty => {
                eprintln!("No data retrieved for {}", site);
                summary.failed += 1;
                log_info(Some(site.as_str()), "fetch_site", Some("empty response"));
            }
            FetchOutcome::Failure { kind, detail } => {
                eprintln!("Fetch failed for {}: {}: {}", site, kind, detail);
                summary.failed += 1;
                log_error(
                    Some(site.as_str()),
                    "fetch_site",
                    Some(&format!("{kind}: {detail}")),
                );
            }
        }

        // Politeness throttle between requests; skipped after the last.
        if i + 1 < site_ids.len() && !pacing.is_zero() {
            thread::sleep(pacing);
        }
    }

    if mode == OutputMode::Combined && !collected.is_empty() {
        summary.output = Some(store.write_combined(&collected)?);
    }

    log_info(
        None,
        "fetch_sites",
        Some(&format!(
            "{}/{} sites, {} rows in {}ms",
            summary.succeeded,
            summary.total,
            summary.rows,
            start_time.elapsed().as_millis()
        )),
    );
    Ok(summary)
}

/// Clean every raw CSV file under `dir`: parse `dt_time`, fill gaps in the
/// measurement columns, write `final_cleaned_*` copies.
pub fn clean_data_dir(dir: &Path, value_columns: &[&str]) -> Result<Vec<CleanReport>> {
    let start_time = Instant::now();
    let result = clean::clean_dir(dir, value_columns);
    let duration = start_time.elapsed();

    match &result {
        Ok(reports) => {
            let cleaned = reports.iter().filter(|r| r.skipped.is_none()).count();
            log_info(
                None,
                "clean_data_dir",
                Some(&format!(
                    "{cleaned}/{} files in {}ms",
                    reports.len(),
                    duration.as_millis()
                )),
            );
        }
        Err(_) => {
            log_error(
                None,
                "clean_data_dir",
                Some(&format!("failed in {}ms", duration.as_millis())),
            );
        }
    }
    result
}
