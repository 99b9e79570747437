use crate::models::{Collection, SourceCollection, Trust, ValidationResults, Verdict};
use crate::services::dedup::{deduplicate, ConflictStrategy, DedupOutcome};
use crate::services::fingerprint::Fingerprinter;

/// Which entries a named output playlist admits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    pub name: String,
    pub file: String,
    pub verdicts: Vec<Verdict>,
    /// Only admit representatives taken from trusted sources
    pub trusted_only: bool,
}

impl TierPolicy {
    pub fn new(name: &str, verdicts: &[Verdict], trusted_only: bool) -> Self {
        Self {
            name: name.to_string(),
            file: format!("{}.m3u", name),
            verdicts: verdicts.to_vec(),
            trusted_only,
        }
    }

    pub fn stable() -> Self {
        Self::new("stable", &[Verdict::Playable], true)
    }

    pub fn beta() -> Self {
        Self::new("beta", &[Verdict::Playable, Verdict::TimedOut], false)
    }

    pub fn ultra() -> Self {
        Self::new("ultra", &Verdict::ALL, false)
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::stable(), Self::beta(), Self::ultra()]
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "stable" => Some(Self::stable()),
            "beta" => Some(Self::beta()),
            "ultra" => Some(Self::ultra()),
            _ => None,
        }
    }

    pub fn admits(&self, verdict: Verdict, trust: Trust) -> bool {
        self.verdicts.contains(&verdict) && (!self.trusted_only || trust == Trust::Trusted)
    }
}

#[derive(Debug, Clone)]
pub struct TierOutput {
    pub policy: TierPolicy,
    pub collection: Collection,
}

/// Builds the tiered output playlists from validated sources
#[derive(Debug, Clone)]
pub struct Merger {
    fingerprinter: Fingerprinter,
    strategy: ConflictStrategy,
    tiers: Vec<TierPolicy>,
}

impl Merger {
    pub fn new(fingerprinter: Fingerprinter, strategy: ConflictStrategy, tiers: Vec<TierPolicy>) -> Self {
        Self {
            fingerprinter,
            strategy,
            tiers,
        }
    }

    /// Concatenate sources in precedence order, deduplicate, then filter per tier
    pub fn merge(&self, sources: &[SourceCollection], results: &ValidationResults) -> Vec<TierOutput> {
        let deduped = deduplicate(
            sources.iter().map(|s| &s.collection),
            &self.fingerprinter,
            self.strategy,
        );
        let trust: Vec<Trust> = deduped.origins.iter().map(|&i| sources[i].trust).collect();

        self.tiers
            .iter()
            .map(|policy| {
                let collection = filter_tier(&deduped, &trust, results, policy);
                tracing::info!(tier = %policy.name, entries = collection.len(), "Tier merged");
                TierOutput {
                    policy: policy.clone(),
                    collection,
                }
            })
            .collect()
    }
}

/// Entries without a verdict count as unreachable
fn filter_tier(
    deduped: &DedupOutcome,
    trust: &[Trust],
    results: &ValidationResults,
    policy: &TierPolicy,
) -> Collection {
    deduped
        .collection
        .iter()
        .zip(&deduped.fingerprints)
        .zip(trust)
        .filter(|((_, fingerprint), trust)| {
            let verdict = results.get(fingerprint).unwrap_or(Verdict::Unreachable);
            policy.admits(verdict, **trust)
        })
        .map(|((entry, _), _)| entry.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelEntry;
    use std::collections::HashSet;

    fn source(name: &str, trust: Trust, entries: Vec<ChannelEntry>) -> SourceCollection {
        SourceCollection {
            source: name.to_string(),
            trust,
            collection: Collection::new(entries),
        }
    }

    fn fixture() -> (Vec<SourceCollection>, ValidationResults) {
        let sources = vec![
            source(
                "official",
                Trust::Trusted,
                vec![
                    ChannelEntry::new("Playable", "http://a/1"),
                    ChannelEntry::new("Slow", "http://a/2"),
                    ChannelEntry::new("Dead", "http://a/3"),
                ],
            ),
            source(
                "community",
                Trust::Untrusted,
                vec![
                    ChannelEntry::new("Playable copy", "http://a/1/"),
                    ChannelEntry::new("Community", "http://b/1"),
                    ChannelEntry::new("Unprobed", "http://b/2"),
                ],
            ),
        ];

        let fp = Fingerprinter::default();
        let results = ValidationResults::new();
        results.record(&fp.fingerprint(&ChannelEntry::new("", "http://a/1")), Verdict::Playable);
        results.record(&fp.fingerprint(&ChannelEntry::new("", "http://a/2")), Verdict::TimedOut);
        results.record(&fp.fingerprint(&ChannelEntry::new("", "http://a/3")), Verdict::Unreachable);
        results.record(&fp.fingerprint(&ChannelEntry::new("", "http://b/1")), Verdict::Playable);
        (sources, results)
    }

    fn names(collection: &Collection) -> Vec<&str> {
        collection.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_default_tiers() {
        let (sources, results) = fixture();
        let merger = Merger::new(Fingerprinter::default(), ConflictStrategy::First, TierPolicy::defaults());
        let tiers = merger.merge(&sources, &results);

        assert_eq!(tiers.len(), 3);
        assert_eq!(names(&tiers[0].collection), vec!["Playable"]);
        assert_eq!(names(&tiers[1].collection), vec!["Playable", "Slow", "Community"]);
        assert_eq!(
            names(&tiers[2].collection),
            vec!["Playable", "Slow", "Dead", "Community", "Unprobed"]
        );
        assert_eq!(tiers[0].policy.file, "stable.m3u");
    }

    #[test]
    fn test_ultra_contains_stable() {
        let (sources, results) = fixture();
        let fp = Fingerprinter::default();
        let merger = Merger::new(fp, ConflictStrategy::Richest, TierPolicy::defaults());
        let tiers = merger.merge(&sources, &results);

        let ultra: HashSet<String> = tiers[2].collection.iter().map(|e| fp.fingerprint(e)).collect();
        for entry in tiers[0].collection.iter() {
            assert!(ultra.contains(&fp.fingerprint(entry)));
        }
    }

    #[test]
    fn test_merge_is_deterministic() {
        let (sources, results) = fixture();
        let merger = Merger::new(Fingerprinter::default(), ConflictStrategy::First, TierPolicy::defaults());
        let first = merger.merge(&sources, &results);
        let second = merger.merge(&sources, &results);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.collection, b.collection);
        }
    }

    #[test]
    fn test_tier_by_name() {
        assert_eq!(TierPolicy::by_name("Beta"), Some(TierPolicy::beta()));
        assert!(TierPolicy::by_name("gold").is_none());
        assert!(!TierPolicy::stable().admits(Verdict::Playable, Trust::Untrusted));
        assert!(TierPolicy::ultra().admits(Verdict::Malformed, Trust::Untrusted));
    }
}
