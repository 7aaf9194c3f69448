use crate::error::{AqError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub site: Option<String>,
    pub event: String,
    pub details: Option<String>,
}

/// Append-only activity log in the user's home directory. Logging is best
/// effort throughout the crate; a failure here never fails an operation.
pub struct ActivityLogger {
    log_path: PathBuf,
}

impl ActivityLogger {
    pub fn new() -> Result<Self> {
        let user_dirs = directories::UserDirs::new()
            .ok_or_else(|| AqError::Other("could not determine home directory".into()))?;
        let home = user_dirs.home_dir();
        let aq_dir = home.join(".aqfetch");
        fs::create_dir_all(&aq_dir)?;

        Ok(Self {
            log_path: aq_dir.join("activity.log"),
        })
    }

    pub fn log(
        &self,
        level: LogLevel,
        site: Option<&str>,
        event: &str,
        details: Option<&str>,
    ) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            site: site.map(|s| s.to_string()),
            event: event.to_string(),
            details: details.map(|d| d.to_string()),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let level_str = match entry.level {
            LogLevel::Info => "INFO ",
            LogLevel::Error => "ERROR",
        };

        let site_str = entry.site.as_deref().unwrap_or("*");
        let details_str = entry.details.as_deref().unwrap_or("");

        writeln!(
            file,
            "{} {} {} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            level_str,
            entry.event,
            site_str,
            details_str
        )?;

        Ok(())
    }

    pub fn read_logs(&self, site_filter: Option<&str>, errors_only: bool) -> Result<Vec<String>> {
        if !self.log_path.exists() {
            return Ok(vec![]);
        }

        let file = fs::File::open(&self.log_path)?;
        let reader = BufReader::new(file);
        let mut matching_lines = Vec::new();

        for line in reader.lines() {
            let line = line?;

            if errors_only && !line.contains(" ERROR ") {
                continue;
            }
            if let Some(site) = site_filter {
                if !line.contains(site) {
                    continue;
                }
            }

            matching_lines.push(line);
        }

        // Most recent entries first
        matching_lines.reverse();
        Ok(matching_lines)
    }

    pub fn info(&self, site: Option<&str>, event: &str, details: Option<&str>) -> Result<()> {
        self.log(LogLevel::Info, site, event, details)
    }

    pub fn error(&self, site: Option<&str>, event: &str, details: Option<&str>) -> Result<()> {
        self.log(LogLevel::Error, site, event, details)
    }
}
