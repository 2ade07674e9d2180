//! Attendance events, kept as an append-only JSON array.

use crate::store::{read_json, write_json, StoreError};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATUS_PRESENT: &str = "Present";

/// Number of records `Stats` carries in `recent_records`.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub rfid: String,
    pub name: String,
    /// `%Y-%m-%d %H:%M:%S`, local time.
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub status: String,
}

impl AttendanceRecord {
    /// All three time fields come from the same instant.
    pub fn present(rfid: &str, name: &str, at: DateTime<Local>) -> Self {
        Self {
            rfid: rfid.to_string(),
            name: name.to_string(),
            timestamp: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            status: STATUS_PRESENT.to_string(),
        }
    }
}

/// Dashboard summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_users: usize,
    pub total_attendance: usize,
    pub today_attendance: usize,
    /// Newest first.
    pub recent_records: Vec<AttendanceRecord>,
}

#[derive(Clone)]
pub struct AttendanceLog {
    path: PathBuf,
    records: Vec<AttendanceRecord>,
}

impl AttendanceLog {
    /// Load the log. A missing file starts a fresh one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match read_json::<Vec<AttendanceRecord>>(&path)? {
            Some(r) => {
                tracing::info!(path = %path.display(), count = r.len(), "loaded attendance records");
                r
            }
            None => {
                tracing::warn!(path = %path.display(), "no attendance file found; starting fresh");
                Vec::new()
            }
        };
        Ok(Self { path, records })
    }

    pub fn record(&mut self, rfid: &str, name: &str, at: DateTime<Local>) -> AttendanceRecord {
        let rec = AttendanceRecord::present(rfid, name, at);
        self.records.push(rec.clone());
        rec
    }

    /// Drop the newest record; used when persisting it failed.
    pub fn rollback_last(&mut self) -> Option<AttendanceRecord> {
        self.records.pop()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_json(&self.path, &self.records)?;
        tracing::info!(path = %self.path.display(), count = self.records.len(), "saved attendance");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn newest_first(&self) -> Vec<AttendanceRecord> {
        self.records.iter().rev().cloned().collect()
    }

    /// The last `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<AttendanceRecord> {
        self.records.iter().rev().take(n).cloned().collect()
    }

    pub fn count_on(&self, date: NaiveDate) -> usize {
        let key = date.format("%Y-%m-%d").to_string();
        self.records.iter().filter(|r| r.date == key).count()
    }

    pub fn stats(&self, total_users: usize, today: NaiveDate) -> Stats {
        Stats {
            total_users,
            total_attendance: self.len(),
            today_attendance: self.count_on(today),
            recent_records: self.recent(RECENT_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).single().unwrap()
    }

    #[test]
    fn test_record_fields() {
        let rec = AttendanceRecord::present("AB12", "Alice", at(2024, 3, 5, 8, 7, 9));
        assert_eq!(rec.timestamp, "2024-03-05 08:07:09");
        assert_eq!(rec.date, "2024-03-05");
        assert_eq!(rec.time, "08:07:09");
        assert_eq!(rec.status, "Present");
    }

    #[test]
    fn test_open_missing_starts_empty() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::open(dir.path().join("attendance.json")).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_save_and_reload_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.json");
        let mut log = AttendanceLog::open(&path).unwrap();
        log.record("A1", "Alice", at(2024, 1, 1, 9, 0, 0));
        log.record("B2", "Bob", at(2024, 1, 1, 9, 5, 0));
        log.save().unwrap();

        let reloaded = AttendanceLog::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let names: Vec<String> = reloaded.newest_first().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.is_array());
        assert_eq!(raw[0]["rfid"], "A1");
    }

    #[test]
    fn test_recent_caps_and_reverses() {
        let dir = TempDir::new().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("a.json")).unwrap();
        for i in 0..15 {
            log.record(&format!("R{i}"), "x", at(2024, 1, 1, 10, i, 0));
        }
        let recent = log.recent(RECENT_LIMIT);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].rfid, "R14");
        assert_eq!(recent[9].rfid, "R5");
    }

    #[test]
    fn test_stats_counts_today_only() {
        let dir = TempDir::new().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("a.json")).unwrap();
        log.record("A1", "Alice", at(2024, 6, 1, 8, 0, 0));
        log.record("A1", "Alice", at(2024, 6, 2, 8, 0, 0));
        log.record("B2", "Bob", at(2024, 6, 2, 8, 30, 0));

        let today = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let stats = log.stats(4, today);
        assert_eq!(stats.total_users, 4);
        assert_eq!(stats.total_attendance, 3);
        assert_eq!(stats.today_attendance, 2);
        assert_eq!(stats.recent_records[0].name, "Bob");
    }

    #[test]
    fn test_rollback_last() {
        let dir = TempDir::new().unwrap();
        let mut log = AttendanceLog::open(dir.path().join("a.json")).unwrap();
        log.record("A1", "Alice", at(2024, 6, 1, 8, 0, 0));
        assert_eq!(log.rollback_last().unwrap().rfid, "A1");
        assert!(log.is_empty());
    }
}
