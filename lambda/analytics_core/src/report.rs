//! Response bodies shared by the token jobs.

use crate::config::DateRange;
use crate::processing::ProcessingOutcome;
use crate::usage::UsageStatistics;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub scanned: usize,
    pub processed: usize,
    pub filtered: usize,
    pub errors: usize,
}

impl RecordCounts {
    pub fn from_outcome(scanned: usize, outcome: &ProcessingOutcome) -> Self {
        Self {
            scanned,
            processed: outcome.processed,
            filtered: outcome.filtered,
            errors: outcome.errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
    pub records: RecordCounts,
    pub date_range: DateRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<UsageStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// One warning per distinct tag seen during the run.
pub fn log_unknown_content_types(tags: &BTreeSet<String>) {
    for tag in tags {
        warn!(content_type = %tag, "Unrecognized content type counted as zero tokens");
    }
}
