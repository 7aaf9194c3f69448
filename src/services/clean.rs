use crate::error::Result;
use crate::services::store::{read_table, write_table, CLEANED_PREFIX, QUARANTINE_PREFIX};
use crate::types::Table;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TIME_COLUMN: &str = "dt_time";
pub const DEFAULT_VALUE_COLUMNS: [&str; 2] = ["pm2.5cnc", "pm10cnc"];

/// Timestamp layouts accepted in the `dt_time` column. The API emits
/// second precision; minute precision matches its start/end parameters.
const TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// What cleaning one file did: how many cells were filled per column and
/// how many are still missing afterwards. An all-missing column is never
/// fabricated; it shows up under `remaining_missing` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanReport {
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub rows: usize,
    pub filled: BTreeMap<String, usize>,
    pub remaining_missing: BTreeMap<String, usize>,
    pub skipped: Option<String>,
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
}

/// Blank cells, `NaN` sentinels, and unparseable numbers all count as
/// missing.
fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

fn format_value(v: f64) -> String {
    format!("{v}")
}

/// Fill gaps in one measurement series. Interior gaps get time-weighted
/// linear interpolation between the nearest known neighbours; the edges
/// are forward- then backward-filled. Returns how many cells were filled.
fn fill_series(times: &[Option<NaiveDateTime>], values: &mut [Option<f64>]) -> usize {
    let known: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_some())
        .map(|(i, _)| i)
        .collect();
    if known.is_empty() {
        return 0;
    }
    let mut filled = 0;

    for pair in known.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let va = values[a].unwrap_or_default();
        let vb = values[b].unwrap_or_default();
        for i in a + 1..b {
            if values[i].is_some() {
                continue;
            }
            let interpolated = match (times[a], times[i], times[b]) {
                (Some(ta), Some(ti), Some(tb)) if tb > ta => {
                    let span = (tb - ta).num_seconds() as f64;
                    let offset = (ti - ta).num_seconds() as f64;
                    va + (vb - va) * (offset / span)
                }
                // No usable timestamps to weight by: carry the left value.
                _ => va,
            };
            values[i] = Some(interpolated);
            filled += 1;
        }
    }

    // Leading edge: backfill from the first known value.
    let first = known[0];
    for i in 0..first {
        values[i] = values[first];
        filled += 1;
    }
    // Trailing edge: carry the last known value forward.
    if let Some(&last) = known.last() {
        for i in last + 1..values.len() {
            values[i] = values[last];
            filled += 1;
        }
    }
    filled
}

/// Clean the given measurement columns in place. Columns the table does
/// not have are skipped. Returns (filled, remaining-missing) per column.
pub fn clean_table(
    table: &mut Table,
    value_columns: &[&str],
) -> (BTreeMap<String, usize>, BTreeMap<String, usize>) {
    let times: Vec<Option<NaiveDateTime>> = table
        .rows
        .iter()
        .map(|row| row.get(TIME_COLUMN).and_then(|t| parse_time(t)))
        .collect();

    let mut filled = BTreeMap::new();
    let mut remaining = BTreeMap::new();

    for column in value_columns {
        if !table.has_column(column) {
            continue;
        }
        let mut values: Vec<Option<f64>> = table
            .rows
            .iter()
            .map(|row| row.get(*column).and_then(|v| parse_value(v)))
            .collect();

        let count = fill_series(&times, &mut values);

        let mut missing = 0;
        for (row, value) in table.rows.iter_mut().zip(values) {
            match value {
                Some(v) => {
                    row.insert(column.to_string(), format_value(v));
                }
                None => missing += 1,
            }
        }
        filled.insert(column.to_string(), count);
        remaining.insert(column.to_string(), missing);
    }

    (filled, remaining)
}

/// Clean one CSV file and write the result next to it as
/// `final_cleaned_{name}`. Files without a `dt_time` column are skipped.
pub fn clean_file(path: &Path, value_columns: &[&str]) -> Result<CleanReport> {
    let mut table = read_table(path)?;

    if !table.has_column(TIME_COLUMN) {
        return Ok(CleanReport {
            file: path.to_path_buf(),
            output: None,
            rows: table.len(),
            filled: BTreeMap::new(),
            remaining_missing: BTreeMap::new(),
            skipped: Some(format!("'{TIME_COLUMN}' column not found")),
        });
    }

    let (filled, remaining_missing) = clean_table(&mut table, value_columns);

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data.csv");
    let output = path.with_file_name(format!("{CLEANED_PREFIX}{name}"));
    write_table(&output, &table)?;

    Ok(CleanReport {
        file: path.to_path_buf(),
        output: Some(output),
        rows: table.len(),
        filled,
        remaining_missing,
        skipped: None,
    })
}

/// Clean every raw CSV file in a directory, skipping already-cleaned
/// output and quarantine dumps. One bad file does not stop the rest.
pub fn clean_dir(dir: &Path, value_columns: &[&str]) -> Result<Vec<CleanReport>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("csv") {
            continue;
        }
        let name = match path.file_name().and_then(|s| s.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if name.starts_with(CLEANED_PREFIX) || name.starts_with(QUARANTINE_PREFIX) {
            continue;
        }
        files.push(path);
    }
    files.sort();

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        match clean_file(&file, value_columns) {
            Ok(report) => reports.push(report),
            Err(e) => reports.push(CleanReport {
                file,
                output: None,
                rows: 0,
                filled: BTreeMap::new(),
                remaining_missing: BTreeMap::new(),
                skipped: Some(e.to_string()),
            }),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    fn series_table(cells: &[(&str, &str)]) -> Table {
        let mut t = Table::new(vec![TIME_COLUMN.into(), "pm2.5cnc".into()]);
        for (time, value) in cells {
            let mut row = Record::new();
            row.insert(TIME_COLUMN.into(), time.to_string());
            row.insert("pm2.5cnc".into(), value.to_string());
            t.push(row);
        }
        t
    }

    #[test]
    fn interior_gap_is_time_weighted() {
        // 00:00 -> 10.0, 01:00 -> 40.0, gap at 00:15 sits a quarter in.
        let mut t = series_table(&[
            ("2024-01-01 00:00:00", "10.0"),
            ("2024-01-01 00:15:00", "NaN"),
            ("2024-01-01 01:00:00", "40.0"),
        ]);
        let (filled, remaining) = clean_table(&mut t, &["pm2.5cnc"]);
        assert_eq!(filled["pm2.5cnc"], 1);
        assert_eq!(remaining["pm2.5cnc"], 0);
        assert_eq!(t.rows[1]["pm2.5cnc"], "17.5");
    }

    #[test]
    fn edges_are_filled_from_nearest_known_value() {
        let mut t = series_table(&[
            ("2024-01-01 00:00:00", ""),
            ("2024-01-01 00:15:00", "12.0"),
            ("2024-01-01 00:30:00", "14.0"),
            ("2024-01-01 00:45:00", "NaN"),
        ]);
        let (filled, remaining) = clean_table(&mut t, &["pm2.5cnc"]);
        assert_eq!(filled["pm2.5cnc"], 2);
        assert_eq!(remaining["pm2.5cnc"], 0);
        assert_eq!(t.rows[0]["pm2.5cnc"], "12");
        assert_eq!(t.rows[3]["pm2.5cnc"], "14");
    }

    #[test]
    fn all_missing_column_stays_missing_and_is_reported() {
        let mut t = series_table(&[
            ("2024-01-01 00:00:00", "NaN"),
            ("2024-01-01 00:15:00", ""),
        ]);
        let (filled, remaining) = clean_table(&mut t, &["pm2.5cnc"]);
        assert_eq!(filled["pm2.5cnc"], 0);
        assert_eq!(remaining["pm2.5cnc"], 2);
        assert_eq!(t.rows[0]["pm2.5cnc"], "NaN");
    }

    #[test]
    fn absent_column_is_skipped() {
        let mut t = series_table(&[("2024-01-01 00:00:00", "1.0")]);
        let (filled, _) = clean_table(&mut t, &["pm10cnc"]);
        assert!(filled.is_empty());
    }

    #[test]
    fn clean_file_writes_prefixed_output() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("IMEI1_data.csv");
        std::fs::write(
            &input,
            "dt_time,pm2.5cnc\n2024-01-01 00:00:00,10.0\n2024-01-01 00:30:00,NaN\n2024-01-01 01:00:00,20.0\n",
        )
        .unwrap();

        let report = clean_file(&input, &DEFAULT_VALUE_COLUMNS).unwrap();
        let output = report.output.expect("cleaned output path");
        assert!(output.ends_with("final_cleaned_IMEI1_data.csv"));

        let cleaned = read_table(&output).unwrap();
        assert_eq!(cleaned.rows[1]["pm2.5cnc"], "15");
    }

    #[test]
    fn file_without_time_column_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("weird.csv");
        std::fs::write(&input, "a,b\n1,2\n").unwrap();

        let report = clean_file(&input, &DEFAULT_VALUE_COLUMNS).unwrap();
        assert!(report.skipped.is_some());
        assert!(report.output.is_none());
    }

    #[test]
    fn clean_dir_ignores_cleaned_and_quarantine_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("IMEI1_data.csv"),
            "dt_time,pm2.5cnc\n2024-01-01 00:00:00,1.0\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("final_cleaned_IMEI0_data.csv"),
            "dt_time,pm2.5cnc\n2024-01-01 00:00:00,1.0\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("error_response_20240101_000000_000_0.csv"),
            "garbage",
        )
        .unwrap();

        let reports = clean_dir(tmp.path(), &DEFAULT_VALUE_COLUMNS).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].file.ends_with("IMEI1_data.csv"));
    }
}
