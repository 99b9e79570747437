use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of probing one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Playable,
    Unreachable,
    TimedOut,
    Malformed,
}

impl Verdict {
    pub const ALL: [Verdict; 4] = [
        Verdict::Playable,
        Verdict::Unreachable,
        Verdict::TimedOut,
        Verdict::Malformed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Playable => "playable",
            Verdict::Unreachable => "unreachable",
            Verdict::TimedOut => "timed-out",
            Verdict::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run verdict map keyed by fingerprint
///
/// Workers write concurrently; the first verdict written for a key is kept.
#[derive(Debug, Default)]
pub struct ValidationResults {
    verdicts: DashMap<String, Verdict>,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verdict; returns false if the key already had one
    pub fn record(&self, fingerprint: &str, verdict: Verdict) -> bool {
        match self.verdicts.entry(fingerprint.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(verdict);
                true
            }
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Verdict> {
        self.verdicts.get(fingerprint).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn counts(&self) -> VerdictCounts {
        let mut counts = VerdictCounts::default();
        for item in self.verdicts.iter() {
            counts.add(*item.value());
        }
        counts
    }

    /// Sorted snapshot, used for the staging file
    pub fn snapshot(&self) -> BTreeMap<String, Verdict> {
        self.verdicts
            .iter()
            .map(|item| (item.key().clone(), *item.value()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictCounts {
    pub playable: usize,
    pub unreachable: usize,
    pub timed_out: usize,
    pub malformed: usize,
}

impl VerdictCounts {
    pub fn add(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Playable => self.playable += 1,
            Verdict::Unreachable => self.unreachable += 1,
            Verdict::TimedOut => self.timed_out += 1,
            Verdict::Malformed => self.malformed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.playable + self.unreachable + self.timed_out + self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let results = ValidationResults::new();
        assert!(results.record("abc", Verdict::Playable));
        assert!(!results.record("abc", Verdict::Unreachable));
        assert_eq!(results.get("abc"), Some(Verdict::Playable));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_counts() {
        let results = ValidationResults::new();
        results.record("a", Verdict::Playable);
        results.record("b", Verdict::TimedOut);
        results.record("c", Verdict::TimedOut);
        let counts = results.counts();
        assert_eq!(counts.playable, 1);
        assert_eq!(counts.timed_out, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_verdict_serializes_kebab_case() {
        let json = serde_json::to_string(&Verdict::TimedOut).unwrap();
        assert_eq!(json, "\"timed-out\"");
    }
}
