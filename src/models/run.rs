use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::VerdictCounts;

/// Pipeline run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Scraping,
    Deduplicating,
    Validating,
    Merging,
    Publishing,
    Done,
    Failed,
}

impl RunState {
    /// Next state on success; terminal states have none
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Scraping => Some(RunState::Deduplicating),
            RunState::Deduplicating => Some(RunState::Validating),
            RunState::Validating => Some(RunState::Merging),
            RunState::Merging => Some(RunState::Publishing),
            RunState::Publishing => Some(RunState::Done),
            RunState::Done | RunState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Scraping => "scraping",
            RunState::Deduplicating => "deduplicating",
            RunState::Validating => "validating",
            RunState::Merging => "merging",
            RunState::Publishing => "publishing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-source scrape outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub name: String,
    pub entries: usize,
    pub malformed_lines: usize,
    pub quarantined: usize,
    pub blacklisted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entries published for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierReport {
    pub tier: String,
    pub file: String,
    pub entries: usize,
}

/// Run summary, published as run-summary.json and served over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub state: RunState,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    pub sources: Vec<SourceReport>,
    pub scraped: usize,
    pub duplicates_removed: usize,
    pub deduplicated: usize,
    pub verdicts: VerdictCounts,
    /// Entries forced to unreachable by the run deadline
    pub forced_unreachable: usize,
    pub tiers: Vec<TierReport>,
    /// Wall time per stage, keyed by state name
    #[serde(default)]
    pub stage_millis: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            state: RunState::Scraping,
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
            sources: Vec::new(),
            scraped: 0,
            duplicates_removed: 0,
            deduplicated: 0,
            verdicts: VerdictCounts::default(),
            forced_unreachable: 0,
            tiers: Vec::new(),
            stage_millis: BTreeMap::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn published(&self) -> usize {
        self.tiers.iter().map(|t| t.entries).sum()
    }
}
