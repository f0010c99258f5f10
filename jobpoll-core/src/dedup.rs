//! Per-job-class deduplication-key exclusions
//!
//! FIFO enqueues derive a content deduplication key from the serialized
//! job. Some job fields (timestamps, enqueue metadata) would make every
//! enqueue unique, so each job class may declare field names to exclude
//! from the key. Resolved by job class name at serialization time by the
//! enqueue-side collaborator.

use std::collections::{HashMap, HashSet};

/// Registry of excluded deduplication fields, keyed by job class
#[derive(Debug, Clone, Default)]
pub struct DedupKeyExclusions {
    by_class: HashMap<String, HashSet<String>>,
}

impl DedupKeyExclusions {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare excluded field names for a job class, replacing any
    /// previous declaration
    pub fn exclude<I, S>(&mut self, job_class: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_class.insert(
            job_class.into(),
            fields.into_iter().map(Into::into).collect(),
        );
    }

    /// Whether a field is excluded from the deduplication key of a class
    pub fn is_excluded(&self, job_class: &str, field: &str) -> bool {
        self.by_class
            .get(job_class)
            .map(|fields| fields.contains(field))
            .unwrap_or(false)
    }

    /// Excluded fields for a job class (empty when none declared)
    pub fn excluded_fields(&self, job_class: &str) -> HashSet<String> {
        self.by_class.get(job_class).cloned().unwrap_or_default()
    }
}
