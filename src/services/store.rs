use crate::error::Result;
use crate::types::{Record, SiteId, Table};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const COMBINED_FILE: &str = "air_quality_data.csv";
pub const CLEANED_PREFIX: &str = "final_cleaned_";
pub const QUARANTINE_PREFIX: &str = "error_response_";

/// Tabular output rooted at one directory: per-site files, a combined
/// file, and cleaned copies all land here.
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_site(&self, site: &SiteId) -> PathBuf {
        self.root.join(format!("{}_data.csv", site.0))
    }

    pub fn write_site(&self, site: &SiteId, table: &Table) -> Result<PathBuf> {
        let path = self.path_for_site(site);
        write_table(&path, table)?;
        Ok(path)
    }

    /// Concatenate per-site tables into one file. Columns are the union
    /// across all tables in first-seen order; absent cells stay blank.
    pub fn write_combined(&self, tables: &[Table]) -> Result<PathBuf> {
        let combined = concat_tables(tables);
        let path = self.root.join(COMBINED_FILE);
        write_table(&path, &combined)?;
        Ok(path)
    }
}

pub fn concat_tables(tables: &[Table]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for table in tables {
        for col in &table.columns {
            if !columns.iter().any(|c| c == col) {
                columns.push(col.clone());
            }
        }
    }
    let mut combined = Table::new(columns);
    for table in tables {
        for row in &table.rows {
            combined.push(row.clone());
        }
    }
    combined
}

pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        let record: Vec<&str> = table
            .columns
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_table(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut table = Table::new(columns.clone());
    for record in reader.records() {
        let record = record?;
        let mut row = Record::new();
        for (name, field) in columns.iter().zip(record.iter()) {
            row.insert(name.clone(), field.to_string());
        }
        table.push(row);
    }
    Ok(table)
}

static QUARANTINE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Dump an unparseable response body for manual inspection, preserving the
/// exact bytes. A millisecond timestamp plus a per-process counter keeps
/// names unique under rapid repeated failures.
pub fn write_quarantine(dir: &Path, body: &str, ext: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let seq = QUARANTINE_SEQ.fetch_add(1, Ordering::Relaxed);
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("{QUARANTINE_PREFIX}{stamp}_{seq}.{ext}"));
    fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        let mut t = Table::new(columns.iter().map(|c| c.to_string()).collect());
        for cells in rows {
            let mut row = Record::new();
            for (col, cell) in columns.iter().zip(cells.iter()) {
                row.insert(col.to_string(), cell.to_string());
            }
            t.push(row);
        }
        t
    }

    #[test]
    fn site_file_lands_under_root_with_expected_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DataStore::new(tmp.path().join("out")).unwrap();
        let t = table(
            &["dt_time", "pm2.5cnc"],
            &[&["2024-01-01 00:00:00", "12.5"]],
        );
        let path = store.write_site(&SiteId("IMEI1".into()), &t).unwrap();
        assert!(path.ends_with("IMEI1_data.csv"));
        assert_eq!(read_table(&path).unwrap(), t);
    }

    #[test]
    fn combined_output_unions_columns_across_sites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DataStore::new(tmp.path()).unwrap();
        let a = table(
            &["dt_time", "pm2.5cnc"],
            &[&["2024-01-01 00:00:00", "12.5"]],
        );
        let b = table(
            &["dt_time", "pm10cnc"],
            &[&["2024-01-01 00:00:00", "30.0"]],
        );

        let path = store.write_combined(&[a, b]).unwrap();
        let combined = read_table(&path).unwrap();
        assert_eq!(combined.columns, vec!["dt_time", "pm2.5cnc", "pm10cnc"]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined.rows[0]["pm10cnc"], "");
        assert_eq!(combined.rows[1]["pm2.5cnc"], "");
    }

    #[test]
    fn quarantine_preserves_bytes_and_names_stay_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let body = "garbage <<>> body\nwith lines";
        let a = write_quarantine(tmp.path(), body, "txt").unwrap();
        let b = write_quarantine(tmp.path(), body, "txt").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read_to_string(&a).unwrap(), body);
        assert!(a
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(QUARANTINE_PREFIX)));
    }
}
