//! Time-bounded memoization of code-matching results
//!
//! One slot for the whole process. Recomputation is a pure function of the
//! inputs, so concurrent misses may recompute redundantly; the last writer wins.

use crate::ebkp::{find_best_match, normalize, KnownCostCodes};
use crate::models::BimElement;
use costsync_types::CodeMatch;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedMatches {
    matches: Arc<Vec<CodeMatch>>,
    computed_at: Instant,
    fingerprint: u64,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct MatchCache {
    ttl: Duration,
    slot: RwLock<Option<CachedMatches>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MatchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Matches for every distinct code across `elements`.
    ///
    /// Served from the slot while it is younger than the TTL and was computed
    /// from the same inputs, unless `force_refresh` is set.
    pub fn get_matches(
        &self,
        elements: &[BimElement],
        known: &KnownCostCodes,
        force_refresh: bool,
    ) -> Arc<Vec<CodeMatch>> {
        let fingerprint = fingerprint(elements, known);

        if !force_refresh {
            let slot = self.slot.read();
            if let Some(cached) = slot.as_ref() {
                if cached.fingerprint == fingerprint && cached.computed_at.elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(matches = cached.matches.len(), "Match cache hit");
                    return Arc::clone(&cached.matches);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let matches = Arc::new(compute_matches(elements, known));
        debug!(
            matches = matches.len(),
            elements = elements.len(),
            known_codes = known.len(),
            force_refresh,
            "Match cache recomputed"
        );

        *self.slot.write() = Some(CachedMatches {
            matches: Arc::clone(&matches),
            computed_at: Instant::now(),
            fingerprint,
        });

        matches
    }

    /// Drop the cached slot
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }

    pub fn is_fresh(&self) -> bool {
        self.slot
            .read()
            .as_ref()
            .is_some_and(|cached| cached.computed_at.elapsed() < self.ttl)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Match the first element of each distinct code; later ones only add to the count
fn compute_matches(elements: &[BimElement], known: &KnownCostCodes) -> Vec<CodeMatch> {
    let mut matches: Vec<CodeMatch> = Vec::new();
    let mut seen: HashMap<String, Option<usize>> = HashMap::new();

    for element in elements {
        let Some(raw) = element.classification_code() else {
            continue;
        };
        let code = normalize(raw);

        match seen.get(&code) {
            Some(Some(index)) => {
                matches[*index].element_count += 1;
                continue;
            }
            Some(None) => continue,
            None => {}
        }

        let slot = find_best_match(&code, known).map(|hit| {
            matches.push(CodeMatch {
                code: code.clone(),
                matched_code: hit.code.to_string(),
                method: hit.method,
                unit_price: hit.info.unit_price,
                currency: hit.info.currency.clone(),
                element_id: Some(element.external_id().to_string()),
                element_count: 1,
            });
            matches.len() - 1
        });
        seen.insert(code, slot);
    }

    matches
}

fn fingerprint(elements: &[BimElement], known: &KnownCostCodes) -> u64 {
    let mut hasher = DefaultHasher::new();
    elements.len().hash(&mut hasher);
    for element in elements {
        element.id.hash(&mut hasher);
        element.classification_code().hash(&mut hasher);
    }
    known.len().hash(&mut hasher);
    for (code, info) in known.iter() {
        code.hash(&mut hasher);
        info.unit_price.to_bits().hash(&mut hasher);
        info.currency.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use costsync_types::MatchMethod;

    fn element(id: &str, code: &str) -> BimElement {
        BimElement {
            id: id.to_string(),
            project_id: "p1".to_string(),
            ebkp_code: Some(code.to_string()),
            ..Default::default()
        }
    }

    fn known(codes: &[(&str, f64)]) -> KnownCostCodes {
        let mut known = KnownCostCodes::new();
        for (code, price) in codes {
            known.insert(code, *price, "CHF");
        }
        known
    }

    #[test]
    fn test_first_occurrence_per_code() {
        let cache = MatchCache::new(Duration::from_secs(300));
        let elements = vec![
            element("e1", "C01.01"),
            element("e2", "C1.1"),
            element("e3", "C2.1"),
            element("e4", "X9"),
        ];
        let known = known(&[("C1.1", 50.0), ("C2", 30.0)]);

        let matches = cache.get_matches(&elements, &known, false);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].code, "C1.1");
        assert_eq!(matches[0].element_id.as_deref(), Some("e1"));
        assert_eq!(matches[0].element_count, 2);
        assert_eq!(matches[1].method, MatchMethod::MajorSegment);
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = MatchCache::new(Duration::from_secs(300));
        let elements = vec![element("e1", "C1.1")];
        let known = known(&[("C1.1", 50.0)]);

        let first = cache.get_matches(&elements, &known, false);
        let second = cache.get_matches(&elements, &known, false);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert!(cache.is_fresh());
    }

    #[test]
    fn test_force_refresh_recomputes() {
        let cache = MatchCache::new(Duration::from_secs(300));
        let elements = vec![element("e1", "C1.1")];
        let known = known(&[("C1.1", 50.0)]);

        let first = cache.get_matches(&elements, &known, false);
        let second = cache.get_matches(&elements, &known, true);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_changed_inputs_miss() {
        let cache = MatchCache::new(Duration::from_secs(300));
        let elements = vec![element("e1", "C1.1")];

        let before = cache.get_matches(&elements, &known(&[("C1.1", 50.0)]), false);
        let after = cache.get_matches(&elements, &known(&[("C1.1", 75.0)]), false);
        assert_eq!(before[0].unit_price, 50.0);
        assert_eq!(after[0].unit_price, 75.0);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = MatchCache::new(Duration::ZERO);
        let elements = vec![element("e1", "C1.1")];
        let known = known(&[("C1.1", 50.0)]);

        cache.get_matches(&elements, &known, false);
        cache.get_matches(&elements, &known, false);
        assert_eq!(cache.stats().hits, 0);

        cache.invalidate();
        assert!(!cache.is_fresh());
    }

    #[test]
    fn test_empty_inputs() {
        let cache = MatchCache::new(Duration::from_secs(300));
        let matches = cache.get_matches(&[], &KnownCostCodes::new(), false);
        assert!(matches.is_empty());
    }
}
