use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{ChannelEntry, Collection};
use crate::services::fingerprint::Fingerprinter;

/// How a duplicate found in a later collection is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Earlier collection always wins
    #[default]
    First,
    /// Entry with the most metadata wins; collection order breaks ties
    Richest,
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" => Ok(Self::First),
            "richest" | "longest" => Ok(Self::Richest),
            other => Err(format!("unknown conflict strategy: {}", other)),
        }
    }
}

/// Deduplicated collection plus bookkeeping for later stages
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub collection: Collection,
    /// Index of the input collection each output entry came from
    pub origins: Vec<usize>,
    /// Fingerprint of each output entry
    pub fingerprints: Vec<String>,
    pub removed: usize,
}

struct Slot {
    entry: ChannelEntry,
    origin: usize,
    fingerprint: String,
}

/// Total order on entry content, so same-collection ties never depend on position
fn content_cmp(a: &ChannelEntry, b: &ChannelEntry) -> Ordering {
    (&a.name, &a.group, &a.logo, &a.url, &a.tvg_id, a.duration, &a.extra).cmp(&(
        &b.name,
        &b.group,
        &b.logo,
        &b.url,
        &b.tvg_id,
        b.duration,
        &b.extra,
    ))
}

fn replaces(strategy: ConflictStrategy, current: &Slot, candidate: &ChannelEntry, origin: usize) -> bool {
    let same_collection = current.origin == origin;
    if strategy == ConflictStrategy::First && !same_collection {
        return false;
    }

    match candidate.richness().cmp(&current.entry.richness()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => same_collection && content_cmp(candidate, &current.entry) == Ordering::Less,
    }
}

/// Collapse entries that share a fingerprint across collections given in precedence order
///
/// Output order is the position of each fingerprint's first occurrence.
pub fn deduplicate<'a, I>(collections: I, fingerprinter: &Fingerprinter, strategy: ConflictStrategy) -> DedupOutcome
where
    I: IntoIterator<Item = &'a Collection>,
{
    let collections: Vec<&Collection> = collections.into_iter().collect();
    let capacity = collections.iter().map(|c| c.len()).sum();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(capacity);
    let mut slots: Vec<Slot> = Vec::with_capacity(capacity);
    let mut removed = 0usize;

    for (origin, collection) in collections.iter().enumerate() {
        for entry in collection.iter() {
            let fingerprint = fingerprinter.fingerprint(entry);
            match index.get(&fingerprint) {
                Some(&pos) => {
                    removed += 1;
                    let slot = &mut slots[pos];
                    if replaces(strategy, slot, entry, origin) {
                        slot.entry = entry.clone();
                        slot.origin = origin;
                    }
                }
                None => {
                    index.insert(fingerprint.clone(), slots.len());
                    slots.push(Slot {
                        entry: entry.clone(),
                        origin,
                        fingerprint,
                    });
                }
            }
        }
    }

    tracing::info!(
        input = capacity,
        output = slots.len(),
        removed = removed,
        "Deduplicated entries"
    );

    let mut outcome = DedupOutcome {
        removed,
        ..Default::default()
    };
    for slot in slots {
        outcome.collection.entries.push(slot.entry);
        outcome.origins.push(slot.origin);
        outcome.fingerprints.push(slot.fingerprint);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup(collections: &[Collection]) -> DedupOutcome {
        deduplicate(collections, &Fingerprinter::default(), ConflictStrategy::First)
    }

    #[test]
    fn test_earlier_collection_wins() {
        let a = Collection::new(vec![ChannelEntry::new("X", "http://a/1")]);
        let b = Collection::new(vec![ChannelEntry::new("X copy", "http://a/1?").with_group("News")]);

        let outcome = dedup(&[a, b]);
        assert_eq!(outcome.collection.len(), 1);
        assert_eq!(outcome.collection.entries[0].name, "X");
        assert_eq!(outcome.origins, vec![0]);
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn test_richest_strategy_prefers_metadata() {
        let a = Collection::new(vec![ChannelEntry::new("X", "http://a/1")]);
        let b = Collection::new(vec![ChannelEntry::new("X copy", "http://a/1/").with_logo("http://l/x.png")]);

        let outcome = deduplicate(&[a, b], &Fingerprinter::default(), ConflictStrategy::Richest);
        assert_eq!(outcome.collection.entries[0].name, "X copy");
        assert_eq!(outcome.origins, vec![1]);
    }

    #[test]
    fn test_same_collection_choice_ignores_position() {
        let plain = ChannelEntry::new("B", "http://a/1");
        let rich = ChannelEntry::new("Z", "http://a/1").with_group("G");
        let other = ChannelEntry::new("A", "http://a/1/");

        let forward = dedup(&[Collection::new(vec![plain.clone(), rich.clone(), other.clone()])]);
        let backward = dedup(&[Collection::new(vec![other, rich.clone(), plain])]);
        assert_eq!(forward.collection.entries, vec![rich.clone()]);
        assert_eq!(backward.collection.entries, vec![rich]);

        // Equal richness falls back to content order
        let x = ChannelEntry::new("Beta", "http://a/2");
        let y = ChannelEntry::new("Alpha", "http://a/2?");
        let one = dedup(&[Collection::new(vec![x.clone(), y.clone()])]);
        let two = dedup(&[Collection::new(vec![y.clone(), x])]);
        assert_eq!(one.collection.entries, vec![y.clone()]);
        assert_eq!(two.collection.entries, vec![y]);
    }

    #[test]
    fn test_order_follows_first_occurrence() {
        let a = Collection::new(vec![
            ChannelEntry::new("1", "http://a/1"),
            ChannelEntry::new("2", "http://a/2"),
        ]);
        let b = Collection::new(vec![
            ChannelEntry::new("3", "http://a/3"),
            ChannelEntry::new("1b", "http://a/1"),
        ]);

        let outcome = dedup(&[a, b]);
        let names: Vec<&str> = outcome.collection.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["1", "2", "3"]);
        assert_eq!(outcome.origins, vec![0, 0, 1]);
    }

    #[test]
    fn test_idempotent_and_deterministic() {
        let a = Collection::new(vec![
            ChannelEntry::new("A", "http://a/1?b=2&a=1"),
            ChannelEntry::new("A2", "http://a/1?a=1&b=2").with_group("G"),
            ChannelEntry::new("C", "http://c/1"),
        ]);
        let b = Collection::new(vec![
            ChannelEntry::new("C", "HTTP://C/1"),
            ChannelEntry::new("D", "http://d/1"),
        ]);
        let inputs = [a, b];

        let once = dedup(&inputs);
        let again = dedup(&inputs);
        assert_eq!(once.collection, again.collection);

        let twice = dedup(std::slice::from_ref(&once.collection));
        assert_eq!(twice.collection, once.collection);
        assert_eq!(twice.removed, 0);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("first".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::First);
        assert_eq!("Richest".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Richest);
        assert!("random".parse::<ConflictStrategy>().is_err());
    }
}
