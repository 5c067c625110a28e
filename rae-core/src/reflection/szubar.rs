//! Failure fingerprints (Szubar mode).
//!
//! When a reflection records a failure, the underlying query's
//! fingerprint is stored with it. Later retrievals whose query matches
//! the fingerprint surface that failure reflection as a visible
//! negative exemplar, steering the agent away from a known trap.
//!
//! A fingerprint is the query's normalized token set — sorted, deduped,
//! space-joined — so match checking can fall back to Jaccard overlap
//! when the queries are near but not identical.

use crate::scoring::lexical::tokenize;
use std::collections::HashSet;

/// Jaccard similarity at or above which two fingerprints match.
pub const MATCH_THRESHOLD: f64 = 0.6;

/// Compute the fingerprint of a query.
#[must_use]
pub fn fingerprint(query: &str) -> String {
    let mut tokens = tokenize(query);
    tokens.sort();
    tokens.dedup();
    tokens.join(" ")
}

/// Whether two fingerprints match: exact equality, or Jaccard overlap
/// of their token sets at or above [`MATCH_THRESHOLD`].
#[must_use]
pub fn matches(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let set_a: HashSet<&str> = a.split(' ').collect();
    let set_b: HashSet<&str> = b.split(' ').collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return false;
    }
    (intersection as f64 / union as f64) >= MATCH_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_and_case_insensitive() {
        assert_eq!(
            fingerprint("Deploy to Production"),
            fingerprint("production deploy TO")
        );
    }

    #[test]
    fn test_exact_match() {
        let fp = fingerprint("drop the users table");
        assert!(matches(&fp, &fp));
    }

    #[test]
    fn test_near_match_via_jaccard() {
        let a = fingerprint("deploy the billing service to production");
        let b = fingerprint("deploy billing service to production now");
        assert!(matches(&a, &b));
    }

    #[test]
    fn test_unrelated_queries_do_not_match() {
        let a = fingerprint("deploy to production");
        let b = fingerprint("write unit tests for parser");
        assert!(!matches(&a, &b));
    }

    #[test]
    fn test_empty_fingerprints_never_match() {
        assert!(!matches("", ""));
        assert!(!matches("", "token"));
    }
}
