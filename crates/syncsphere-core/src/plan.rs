//! Synchronization plans
//!
//! The peer diffs both manifests and sends back which paths to upload,
//! download or flag as conflicting. The client only executes plans;
//! [`SyncPlan::compute`] is a reference planner used by tools and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::manifest::{Entry, Manifest};

/// A single path referenced by a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PlanItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }

    fn from_entry(entry: &Entry) -> Self {
        Self {
            path: entry.path.clone(),
            size: Some(entry.size),
        }
    }
}

/// Decision for one synchronization round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    #[serde(default)]
    pub upload: Vec<PlanItem>,
    #[serde(default)]
    pub download: Vec<PlanItem>,
    /// Reported only, never resolved automatically
    #[serde(default)]
    pub conflicts: Vec<PlanItem>,
}

impl SyncPlan {
    /// Number of transfers this plan asks for
    pub fn transfer_count(&self) -> usize {
        self.upload.len() + self.download.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upload.is_empty() && self.download.is_empty() && self.conflicts.is_empty()
    }

    /// Diff a local manifest against a remote one
    ///
    /// Files missing on one side, or newer on one side, move towards the
    /// other. A file/directory clash, or equal timestamps with different
    /// sizes, is a conflict. Directories are recreated implicitly and never
    /// transferred.
    pub fn compute(local: &Manifest, remote: &Manifest) -> Self {
        let remote_by_path: HashMap<&str, &Entry> = remote
            .entries()
            .iter()
            .map(|e| (e.path.as_str(), e))
            .collect();
        let local_by_path: HashMap<&str, &Entry> = local
            .entries()
            .iter()
            .map(|e| (e.path.as_str(), e))
            .collect();

        let mut plan = SyncPlan::default();

        for entry in local.entries() {
            match remote_by_path.get(entry.path.as_str()) {
                None if !entry.is_directory => plan.upload.push(PlanItem::from_entry(entry)),
                None => {}
                Some(theirs) if theirs.is_directory != entry.is_directory => {
                    plan.conflicts.push(PlanItem::new(&entry.path))
                }
                Some(_) if entry.is_directory => {}
                Some(theirs) => {
                    if entry.modified_at > theirs.modified_at {
                        plan.upload.push(PlanItem::from_entry(entry));
                    } else if entry.modified_at < theirs.modified_at {
                        plan.download.push(PlanItem::from_entry(theirs));
                    } else if entry.size != theirs.size {
                        plan.conflicts.push(PlanItem::new(&entry.path));
                    }
                }
            }
        }

        for entry in remote.entries() {
            if !entry.is_directory && !local_by_path.contains_key(entry.path.as_str()) {
                plan.download.push(PlanItem::from_entry(entry));
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn file(path: &str, size: u64, millis: i64) -> Entry {
        Entry::file(path, size, DateTime::from_timestamp_millis(millis).unwrap())
    }

    fn paths(items: &[PlanItem]) -> Vec<&str> {
        items.iter().map(|i| i.path.as_str()).collect()
    }

    #[test]
    fn test_identical_manifests_produce_empty_plan() {
        let manifest = Manifest::new(vec![Entry::directory("a"), file("a/x.txt", 3, 1000)]);
        let plan = SyncPlan::compute(&manifest, &manifest);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_one_sided_files() {
        let local = Manifest::new(vec![file("mine.txt", 1, 1000)]);
        let remote = Manifest::new(vec![Entry::directory("d"), file("d/theirs.txt", 2, 1000)]);

        let plan = SyncPlan::compute(&local, &remote);
        assert_eq!(paths(&plan.upload), vec!["mine.txt"]);
        assert_eq!(paths(&plan.download), vec!["d/theirs.txt"]);
        assert_eq!(plan.download[0].size, Some(2));
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_newer_side_wins() {
        let local = Manifest::new(vec![file("a.txt", 1, 2000), file("b.txt", 1, 1000)]);
        let remote = Manifest::new(vec![file("a.txt", 1, 1000), file("b.txt", 5, 3000)]);

        let plan = SyncPlan::compute(&local, &remote);
        assert_eq!(paths(&plan.upload), vec!["a.txt"]);
        assert_eq!(paths(&plan.download), vec!["b.txt"]);
        assert_eq!(plan.transfer_count(), 2);
    }

    #[test]
    fn test_ambiguous_entries_are_conflicts() {
        let local = Manifest::new(vec![file("same-time.txt", 1, 1000), file("kind", 1, 1000)]);
        let remote = Manifest::new(vec![file("same-time.txt", 9, 1000), Entry::directory("kind")]);

        let plan = SyncPlan::compute(&local, &remote);
        assert_eq!(paths(&plan.conflicts), vec!["same-time.txt", "kind"]);
        assert_eq!(plan.transfer_count(), 0);
    }

    #[test]
    fn test_plan_deserializes_path_only_items() {
        let json = r#"{"upload":[{"path":"a.txt"}],"download":[],"conflicts":[{"path":"c"}]}"#;
        let plan: SyncPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.upload, vec![PlanItem::new("a.txt")]);
        assert_eq!(paths(&plan.conflicts), vec!["c"]);
    }

    #[test]
    fn test_plan_missing_lists_default_to_empty() {
        let plan: SyncPlan = serde_json::from_str(r#"{"download":[{"path":"x"}]}"#).unwrap();
        assert!(plan.upload.is_empty());
        assert_eq!(plan.download.len(), 1);
    }
}
