//! Cross-source near-duplicate removal.
//!
//! Items are compared by the Jaccard similarity of their normalized
//! title+body token sets; identical fingerprints short-circuit to 1.0.
//! A later item more similar than the threshold to any kept item is
//! dropped, so survivors keep their relative order and are pairwise below
//! the threshold.

use std::collections::HashSet;

use harvester_shared::ContentItem;
use harvester_shared::text::token_set;
use tracing::debug;

/// Similarity above which two items are duplicates.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Tolerance for treating a similarity as exactly at the threshold.
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Comparison key of one item.
#[derive(Debug, Clone)]
struct Signature {
    fingerprint: String,
    tokens: HashSet<String>,
}

impl Signature {
    fn of(item: &ContentItem) -> Self {
        Self {
            fingerprint: item.fingerprint(),
            tokens: token_set(&format!("{} {}", item.title, item.body)),
        }
    }
}

/// Jaccard similarity of two token sets; two empty sets are identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Similarity of two items in [0, 1].
pub fn similarity(a: &ContentItem, b: &ContentItem) -> f64 {
    signature_similarity(&Signature::of(a), &Signature::of(b))
}

fn signature_similarity(a: &Signature, b: &Signature) -> f64 {
    if a.fingerprint == b.fingerprint {
        1.0
    } else {
        jaccard(&a.tokens, &b.tokens)
    }
}

/// Removes near-duplicates from a merged item list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Drop near-duplicates, preserving the relative order of survivors.
    ///
    /// An item exactly at the threshold with a kept item replaces it only
    /// when both carry a quality score and the later one's is strictly
    /// higher; otherwise the earlier item stays.
    pub fn dedupe(&self, items: Vec<ContentItem>) -> Vec<ContentItem> {
        let signatures: Vec<Signature> = items.iter().map(Signature::of).collect();
        // Indices into `items`, ascending
        let mut kept: Vec<usize> = Vec::with_capacity(items.len());

        'candidates: for (i, sig) in signatures.iter().enumerate() {
            let mut boundary: Vec<usize> = Vec::new();
            for (pos, &k) in kept.iter().enumerate() {
                let sim = signature_similarity(&signatures[k], sig);
                if sim > self.threshold + BOUNDARY_EPSILON {
                    debug!(
                        dropped = %items[i].url_or_identifier,
                        kept = %items[k].url_or_identifier,
                        similarity = sim,
                        "duplicate dropped"
                    );
                    continue 'candidates;
                }
                if (sim - self.threshold).abs() <= BOUNDARY_EPSILON {
                    boundary.push(pos);
                }
            }

            if boundary.is_empty() {
                kept.push(i);
                continue;
            }

            let replaces = items[i].quality_score.is_some_and(|candidate| {
                boundary.iter().all(|&pos| {
                    items[kept[pos]]
                        .quality_score
                        .is_some_and(|existing| candidate > existing)
                })
            });
            if replaces {
                for &pos in boundary.iter().rev() {
                    kept.remove(pos);
                }
                kept.push(i);
            }
        }

        let before = items.len();
        let mut keep = vec![false; before];
        for &k in &kept {
            keep[k] = true;
        }
        let survivors: Vec<ContentItem> = items
            .into_iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then_some(item))
            .collect();

        debug!(
            before,
            after = survivors.len(),
            threshold = self.threshold,
            "deduplication complete"
        );
        survivors
    }
}

/// Deduplicate with the default threshold.
pub fn dedupe(items: Vec<ContentItem>) -> Vec<ContentItem> {
    Deduplicator::default().dedupe(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvester_shared::SourceKind;

    fn item(source: SourceKind, title: &str, body: &str, id: &str) -> ContentItem {
        ContentItem::new(source, title, body, id)
    }

    /// `n` distinct tokens with a shared prefix.
    fn words(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{prefix}{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn jaccard_basics() {
        let a = token_set("alpha beta gamma");
        let b = token_set("alpha beta delta");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-12);
        assert!((jaccard(&a, &a) - 1.0).abs() < 1e-12);
        assert!((jaccard(&HashSet::new(), &HashSet::new()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identical_fingerprint_is_full_similarity() {
        let a = item(SourceKind::Web, "Gut Brain", "Axis!", "a");
        let b = item(SourceKind::Academic, "gut   brain", "axis", "b");
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ninety_two_percent_similar_keeps_earlier_source() {
        // 23 shared tokens out of a 25-token union: Jaccard 0.92
        let shared = words("w", 23);
        let web = item(SourceKind::Web, "", &shared, "web-1");
        let academic = item(
            SourceKind::Academic,
            "",
            &format!("{shared} extra1 extra2"),
            "arxiv-1",
        );
        assert!((similarity(&web, &academic) - 0.92).abs() < 1e-9);

        let survivors = dedupe(vec![web, academic]);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].source, SourceKind::Web);
    }

    #[test]
    fn dissimilar_items_all_survive_in_order() {
        let items = vec![
            item(SourceKind::Web, "One", &words("a", 10), "1"),
            item(SourceKind::Academic, "Two", &words("b", 10), "2"),
            item(SourceKind::Biomedical, "Three", &words("c", 10), "3"),
        ];
        let survivors = dedupe(items.clone());
        assert_eq!(survivors, items);
    }

    #[test]
    fn preserves_relative_order_of_survivors() {
        let base = words("t", 30);
        let items = vec![
            item(SourceKind::Web, "first", &words("x", 10), "1"),
            item(SourceKind::Web, "", &base, "2"),
            item(SourceKind::Academic, "third", &words("y", 10), "3"),
            item(SourceKind::Academic, "", &base, "4"),
            item(SourceKind::Biomedical, "fifth", &words("z", 10), "5"),
        ];
        let ids: Vec<String> = dedupe(items)
            .into_iter()
            .map(|i| i.url_or_identifier)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "5"]);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let base = words("t", 20);
        let items = vec![
            item(SourceKind::Web, "", &base, "1"),
            item(SourceKind::Web, "", &format!("{base} extra"), "2"),
            item(SourceKind::Academic, "", &words("u", 20), "3"),
            item(SourceKind::Biomedical, "", &format!("{} v0", words("u", 19)), "4"),
            item(SourceKind::Biomedical, "", &words("q", 5), "5"),
        ];
        let once = dedupe(items);
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn boundary_prefers_strictly_higher_computed_score() {
        // 17 shared of a 20-token union: exactly 0.85
        let shared = words("s", 17);
        let earlier = item(SourceKind::Web, "", &format!("{shared} a1 a2"), "earlier")
            .with_quality_score(0.4);
        let later = item(SourceKind::Academic, "", &format!("{shared} b1"), "later")
            .with_quality_score(0.9);
        assert!((similarity(&earlier, &later) - 0.85).abs() < 1e-9);

        let survivors = dedupe(vec![earlier.clone(), later.clone()]);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].url_or_identifier, "later");

        // Equal scores keep the earlier item
        let tied = later.clone().with_quality_score(0.4);
        let survivors = dedupe(vec![earlier.clone(), tied]);
        assert_eq!(survivors[0].url_or_identifier, "earlier");

        // An unscored later item never replaces
        let unscored = ContentItem {
            quality_score: None,
            ..later
        };
        let survivors = dedupe(vec![earlier, unscored]);
        assert_eq!(survivors[0].url_or_identifier, "earlier");
    }

    #[test]
    fn custom_threshold() {
        let a = item(SourceKind::Web, "", "alpha beta gamma delta", "a");
        let b = item(SourceKind::Web, "", "alpha beta gamma epsilon", "b");
        // Jaccard 3/5 = 0.6
        assert_eq!(Deduplicator::new(0.5).dedupe(vec![a.clone(), b.clone()]).len(), 1);
        assert_eq!(Deduplicator::new(0.85).dedupe(vec![a, b]).len(), 2);
    }

    #[test]
    fn empty_input() {
        assert!(dedupe(Vec::new()).is_empty());
    }
}
