//! In-memory progress record and its on-disk JSON form.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Durable crawl progress: what is finished, what was seen, what was tried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    /// Locators whose files were fully received and verified.
    pub completed_locators: HashSet<String>,
    /// Pages already crawled.
    pub visited_pages: HashSet<String>,
    /// Minimum duration in effect when the record was last written.
    pub min_duration_secs: u64,
    /// Attempts per locator, counted across runs.
    pub attempt_counters: HashMap<String, u32>,
}

impl ProgressRecord {
    /// Restores the counter invariant: every completed locator has at least
    /// one recorded attempt. Returns how many counters were repaired.
    pub(crate) fn repair_counters(&mut self) -> usize {
        let mut repaired = 0;
        for locator in &self.completed_locators {
            let counter = self.attempt_counters.entry(locator.clone()).or_insert(0);
            if *counter == 0 {
                *counter = 1;
                repaired += 1;
            }
        }
        repaired
    }
}

/// JSON layout of `download_progress.json`. Arrays are sorted so the file
/// diffs cleanly between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressFile {
    #[serde(default)]
    completed_locators: Vec<String>,
    #[serde(default)]
    visited_pages: Vec<String>,
    #[serde(default)]
    min_duration_seconds: u64,
    #[serde(default)]
    attempt_counters: BTreeMap<String, u32>,
}

impl From<&ProgressRecord> for ProgressFile {
    fn from(record: &ProgressRecord) -> Self {
        let mut completed_locators: Vec<String> =
            record.completed_locators.iter().cloned().collect();
        completed_locators.sort();
        let mut visited_pages: Vec<String> = record.visited_pages.iter().cloned().collect();
        visited_pages.sort();
        Self {
            completed_locators,
            visited_pages,
            min_duration_seconds: record.min_duration_secs,
            attempt_counters: record
                .attempt_counters
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

impl From<ProgressFile> for ProgressRecord {
    fn from(file: ProgressFile) -> Self {
        Self {
            completed_locators: file.completed_locators.into_iter().collect(),
            visited_pages: file.visited_pages.into_iter().collect(),
            min_duration_secs: file.min_duration_seconds,
            attempt_counters: file.attempt_counters.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_form_uses_camel_case_and_sorted_arrays() {
        let mut record = ProgressRecord {
            min_duration_secs: 300,
            ..ProgressRecord::default()
        };
        record.completed_locators.insert("https://b/2.mp4".into());
        record.completed_locators.insert("https://a/1.mp4".into());
        record.attempt_counters.insert("https://a/1.mp4".into(), 1);

        let json = serde_json::to_value(ProgressFile::from(&record)).unwrap();
        assert_eq!(
            json["completedLocators"],
            serde_json::json!(["https://a/1.mp4", "https://b/2.mp4"])
        );
        assert_eq!(json["minDurationSeconds"], 300);
        assert_eq!(json["attemptCounters"]["https://a/1.mp4"], 1);
        assert!(json["visitedPages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let file: ProgressFile = serde_json::from_str(r#"{"visitedPages": ["https://x/"]}"#).unwrap();
        let record = ProgressRecord::from(file);
        assert!(record.visited_pages.contains("https://x/"));
        assert!(record.completed_locators.is_empty());
        assert_eq!(record.min_duration_secs, 0);
    }

    #[test]
    fn test_repair_counters_gives_completed_locators_one_attempt() {
        let mut record = ProgressRecord::default();
        record.completed_locators.insert("https://a/1.mp4".into());
        record.completed_locators.insert("https://a/2.mp4".into());
        record.attempt_counters.insert("https://a/2.mp4".into(), 3);

        assert_eq!(record.repair_counters(), 1);
        assert_eq!(record.attempt_counters["https://a/1.mp4"], 1);
        assert_eq!(record.attempt_counters["https://a/2.mp4"], 3);
    }
}
