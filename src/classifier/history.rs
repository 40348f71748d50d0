//! Historical report sources for training
//!
//! The engine only reads history; where it lives is the caller's business.
//! A JSONL store (one `ReportRecord` per line) ships for the CLI and the
//! scheduler.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{PredictorError, Result};
use crate::models::{Priority, ReportRecord};

/// Read-only supplier of past reports
pub trait HistoryProvider: Send + Sync {
    fn reports(&self) -> Result<Vec<ReportRecord>>;
}

impl HistoryProvider for Vec<ReportRecord> {
    fn reports(&self) -> Result<Vec<ReportRecord>> {
        Ok(self.clone())
    }
}

/// Report history stored as JSON lines
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one report
    pub fn append(&self, report: &ReportRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(report)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Append several reports, returning how many were written
    pub fn append_batch(&self, reports: &[ReportRecord]) -> std::io::Result<usize> {
        let mut count = 0;
        for report in reports {
            self.append(report)?;
            count += 1;
        }
        Ok(count)
    }

    /// Load every parseable report. A missing file is an empty history.
    /// Returns the reports and the number of malformed lines skipped.
    pub fn load(&self) -> std::io::Result<(Vec<ReportRecord>, usize)> {
        if !self.path.exists() {
            return Ok((Vec::new(), 0));
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut reports = Vec::new();
        let mut skipped = 0;

        // Raw bytes so one line of bad UTF-8 is skipped rather than failing the file
        for (lineno, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ReportRecord>(&line) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::debug!("{}:{}: skipping malformed report: {}", self.path.display(), lineno + 1, e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} malformed lines in {}", skipped, self.path.display());
        }

        Ok((reports, skipped))
    }

    pub fn stats(&self) -> std::io::Result<HistoryStats> {
        let (reports, malformed) = self.load()?;

        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_priority = [0usize; Priority::COUNT];
        let mut unlabeled = 0;
        for report in &reports {
            *by_category.entry(report.category.clone()).or_default() += 1;
            match report.priority {
                Some(p) => by_priority[p.index()] += 1,
                None => unlabeled += 1,
            }
        }

        Ok(HistoryStats {
            total: reports.len(),
            malformed,
            unlabeled,
            by_priority,
            by_category,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryProvider for JsonlHistory {
    fn reports(&self) -> Result<Vec<ReportRecord>> {
        self.load()
            .map(|(reports, _)| reports)
            .map_err(|e| PredictorError::History(format!("{}: {}", self.path.display(), e)))
    }
}

/// Summary of a history file
#[derive(Debug)]
pub struct HistoryStats {
    pub total: usize,
    pub malformed: usize,
    pub unlabeled: usize,
    pub by_priority: [usize; Priority::COUNT],
    pub by_category: BTreeMap<String, usize>,
}

impl std::fmt::Display for HistoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |n: usize| {
            if self.total > 0 {
                n as f64 / self.total as f64 * 100.0
            } else {
                0.0
            }
        };

        writeln!(f, "History Statistics:")?;
        writeln!(f, "  Total reports: {}", self.total)?;
        if self.malformed > 0 {
            writeln!(f, "  Malformed lines: {}", self.malformed)?;
        }
        writeln!(f, "  Unlabeled: {} ({:.1}%)", self.unlabeled, pct(self.unlabeled))?;
        writeln!(f, "\n  By priority:")?;
        for p in Priority::ALL {
            let n = self.by_priority[p.index()];
            writeln!(f, "    {}: {} ({:.1}%)", p, n, pct(n))?;
        }
        writeln!(f, "\n  By category:")?;

        let mut categories: Vec<_> = self.by_category.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, n) in categories.iter().take(10) {
            writeln!(f, "    {}: {}", category, n)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn report(id: &str, priority: Option<Priority>) -> ReportRecord {
        let r = ReportRecord::new("Theft", Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()).with_id(id);
        match priority {
            Some(p) => r.labeled(p),
            None => r,
        }
    }

    #[test]
    fn test_append_and_load() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::new(dir.path().join("nested").join("history.jsonl"));

        history.append(&report("a", Some(Priority::High))).unwrap();
        history.append_batch(&[report("b", None), report("c", Some(Priority::Low))]).unwrap();

        let (loaded, skipped) = history.load().unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].id, "a");
        assert_eq!(loaded[0].priority, Some(Priority::High));
        assert_eq!(loaded[1].priority, None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::new(dir.path().join("absent.jsonl"));
        assert!(history.reports().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let good = serde_json::to_string(&report("ok", Some(Priority::Medium))).unwrap();
        std::fs::write(&path, format!("{good}\n\n{{not json\n{good}\n")).unwrap();

        let (loaded, skipped) = JsonlHistory::new(&path).load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let good = serde_json::to_string(&report("ok", Some(Priority::Low))).unwrap();
        let mut bytes = Vec::new();
        for _ in 0..40 {
            bytes.extend_from_slice(good.as_bytes());
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(b"\xff\xfe x\n");
        std::fs::write(&path, bytes).unwrap();

        let history = JsonlHistory::new(&path);
        let (loaded, skipped) = history.load().unwrap();
        assert_eq!(loaded.len(), 40);
        assert_eq!(skipped, 1);
        assert_eq!(history.reports().unwrap().len(), 40);
        assert_eq!(history.stats().unwrap().malformed, 1);
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let history = JsonlHistory::new(dir.path().join("h.jsonl"));
        history
            .append_batch(&[
                report("a", Some(Priority::High)),
                report("b", Some(Priority::High)),
                report("c", None),
            ])
            .unwrap();

        let stats = history.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unlabeled, 1);
        assert_eq!(stats.by_priority[Priority::High.index()], 2);
        assert_eq!(stats.by_category["Theft"], 3);
        assert!(stats.to_string().contains("Total reports: 3"));
    }

    #[test]
    fn test_vec_provider() {
        let reports = vec![report("a", None)];
        assert_eq!(reports.reports().unwrap().len(), 1);
    }
}
