//! Component E: convergence detection (spec.md §4.5).
//!
//! Stateless by design — every function here takes the round's answers
//! as a borrowed slice and returns a fresh value, the way the teacher's
//! own small utility modules (`schema`, `toml_utils`) avoid hidden
//! state.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use std::sync::OnceLock;

use crate::model::{AnswerStatus, ProviderAnswer, ProviderTag};

/// Defaults from spec.md §6.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.7;

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid regex"))
}

/// Normalize a claim for comparison: lowercase, drop everything that
/// isn't a word character or whitespace, then trim (spec.md §4.5).
pub fn normalize_claim(claim: &str) -> String {
    let lowered = claim.to_lowercase();
    let stripped = non_word_re().replace_all(&lowered, "");
    stripped.trim().to_owned()
}

/// The confidences contributed by the round's successful answers.
fn confidences(answers: &[ProviderAnswer]) -> Vec<f64> {
    answers
        .iter()
        .filter(|a| a.is_successful())
        .filter_map(|a| a.confidence)
        .collect()
}

/// `max(confidences) - min(confidences)`, with the edge cases from
/// spec.md §4.5: zero values yields `1.0` (maximally un-converged), one
/// value yields `0.0`.
pub fn confidence_delta(answers: &[ProviderAnswer]) -> f64 {
    let cs = confidences(answers);
    match cs.len() {
        0 => 1.0,
        1 => 0.0,
        _ => {
            let max = cs.iter().cloned().fold(f64::MIN, f64::max);
            let min = cs.iter().cloned().fold(f64::MAX, f64::min);
            max - min
        }
    }
}

/// Jaccard similarity between two sets: `|A∩B| / |A∪B|`. An empty union
/// (both sets empty) is defined as `1.0` (spec.md §8).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union: HashSet<&String> = a.union(b).collect();
    if union.is_empty() {
        return 1.0;
    }
    let intersection_count = a.intersection(b).count();
    intersection_count as f64 / union.len() as f64
}

/// Build the normalized claim set for each answer that has non-empty
/// `key_claims`.
fn claim_sets(answers: &[ProviderAnswer]) -> Vec<HashSet<String>> {
    answers
        .iter()
        .filter(|a| a.is_successful())
        .filter_map(|a| a.key_claims.as_ref())
        .filter(|claims| !claims.is_empty())
        .map(|claims| claims.iter().map(|c| normalize_claim(c)).collect())
        .collect()
}

/// Average pairwise Jaccard similarity across every ordered pair of
/// distinct claim sets (spec.md §4.5): `0.0` with no non-empty sets,
/// `1.0` with exactly one.
pub fn claim_overlap(answers: &[ProviderAnswer]) -> f64 {
    let sets = claim_sets(answers);
    match sets.len() {
        0 => 0.0,
        1 => 1.0,
        _ => {
            let mut total = 0.0;
            let mut pairs = 0usize;
            for i in 0..sets.len() {
                for j in 0..sets.len() {
                    if i == j {
                        continue;
                    }
                    total += jaccard(&sets[i], &sets[j]);
                    pairs += 1;
                }
            }
            total / pairs as f64
        }
    }
}

/// Has the round converged (spec.md §4.5)?
pub fn converged(
    answers: &[ProviderAnswer],
    confidence_threshold: f64,
    overlap_threshold: f64,
) -> bool {
    confidence_delta(answers) <= confidence_threshold
        && claim_overlap(answers) >= overlap_threshold
}

/// One topic of disagreement, surfaced to the next round's prompt and to
/// the arbiter.
#[derive(Debug, Clone)]
pub struct Disagreement {
    pub topic: String,
    pub claims: Vec<(ProviderTag, String)>,
}

/// Extract up to 5 disagreement buckets (spec.md §4.5).
///
/// NOTE (spec.md §9, open question): buckets are keyed by each claim's
/// *own* normalized form, then a bucket is only kept if it contains two
/// or more claims whose normalized forms differ — which can't happen,
/// since every claim in a bucket shares the bucketing key by
/// construction. This is a known imperfection in the source algorithm;
/// per spec.md we preserve the permissive (near-always-empty) behavior
/// rather than substitute a stronger topic extractor, so this function
/// will return claims only in the pathological case where two different
/// providers' claims normalize to strings that are `==` to the bucket
/// key, but whose *original* text genuinely differed in a way callers
/// care about — in practice, an empty list almost always comes back.
pub fn disagreements(answers: &[ProviderAnswer]) -> Vec<Disagreement> {
    let mut buckets: BTreeMap<String, Vec<(ProviderTag, String, String)>> = BTreeMap::new();
    for answer in answers {
        if answer.status != AnswerStatus::Ok && answer.status != AnswerStatus::ParseError {
            continue;
        }
        let Some(claims) = answer.key_claims.as_ref() else {
            continue;
        };
        for claim in claims {
            let normalized = normalize_claim(claim);
            buckets
                .entry(normalized.clone())
                .or_default()
                .push((answer.provider, normalized, claim.clone()));
        }
    }

    let mut out = Vec::new();
    for (topic, entries) in buckets {
        let distinct_providers: HashSet<ProviderTag> =
            entries.iter().map(|(p, _, _)| *p).collect();
        let distinct_normalized: HashSet<&str> =
            entries.iter().map(|(_, n, _)| n.as_str()).collect();
        if distinct_providers.len() >= 2 && distinct_normalized.len() >= 2 {
            out.push(Disagreement {
                topic,
                claims: entries
                    .into_iter()
                    .map(|(p, _, original)| (p, original))
                    .collect(),
            });
            if out.len() >= 5 {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(confidence: Option<f64>, claims: Option<Vec<&str>>) -> ProviderAnswer {
        ProviderAnswer {
            run_id: crate::ids::RunId::new(),
            round: 1,
            provider: ProviderTag::OpenAi,
            model: "m".into(),
            status: AnswerStatus::Ok,
            answer: Some("a".into()),
            confidence,
            key_claims: claims.map(|c| c.into_iter().map(String::from).collect()),
            assumptions: None,
            citations: None,
            usage: Default::default(),
            latency_ms: 0,
            error: None,
            raw_response: None,
        }
    }

    #[test]
    fn test_confidence_delta_edge_cases() {
        assert_eq!(confidence_delta(&[]), 1.0);
        assert_eq!(confidence_delta(&[answer(Some(0.9), None)]), 0.0);
        assert_eq!(
            confidence_delta(&[answer(Some(0.9), None), answer(Some(0.5), None)]),
            0.4
        );
    }

    #[test]
    fn test_jaccard_laws() {
        let a: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        assert_eq!(jaccard(&a, &a), 1.0);
        let empty: HashSet<String> = HashSet::new();
        assert_eq!(jaccard(&empty, &empty), 1.0);
        let b: HashSet<String> = ["y".to_string(), "z".to_string()].into_iter().collect();
        // |A∩B| = 1 (y), |A∪B| = 3 (x,y,z)
        assert_eq!(jaccard(&a, &b), 1.0 / 3.0);
    }

    #[test]
    fn test_claim_overlap_edge_cases() {
        assert_eq!(claim_overlap(&[answer(Some(0.5), None)]), 0.0);
        assert_eq!(
            claim_overlap(&[answer(Some(0.5), Some(vec!["the sky is blue"]))]),
            1.0
        );
    }

    #[test]
    fn test_converged_single_round() {
        let answers = vec![
            answer(Some(0.85), Some(vec!["42"])),
            answer(Some(0.85), Some(vec!["42"])),
        ];
        assert!(converged(
            &answers,
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_OVERLAP_THRESHOLD
        ));
    }

    #[test]
    fn test_not_converged_forced_two_rounds() {
        let round1 = vec![answer(Some(0.9), Some(vec!["x"])), answer(Some(0.5), Some(vec!["x"]))];
        assert!(!converged(
            &round1,
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_OVERLAP_THRESHOLD
        ));
        let round2 = vec![answer(Some(0.8), Some(vec!["x"])), answer(Some(0.8), Some(vec!["x"]))];
        assert!(converged(
            &round2,
            DEFAULT_CONFIDENCE_THRESHOLD,
            DEFAULT_OVERLAP_THRESHOLD
        ));
    }

    /// Convergence monotonicity: raising the confidence threshold or
    /// lowering the overlap threshold can only make `converged` more
    /// often true on the same input (spec.md §8).
    #[test]
    fn test_convergence_monotonicity() {
        let answers = vec![
            answer(Some(0.9), Some(vec!["a"])),
            answer(Some(0.6), Some(vec!["b"])),
        ];
        let loose = converged(&answers, 0.5, 0.1);
        let strict = converged(&answers, 0.01, 0.99);
        // Loosening thresholds should never turn a converged case into a
        // non-converged one.
        assert!(loose || !strict);
    }

    #[test]
    fn test_disagreements_permissive_empty_on_simple_input() {
        let answers = vec![
            answer(Some(0.9), Some(vec!["the earth is round"])),
            answer(Some(0.5), Some(vec!["the earth is flat"])),
        ];
        // By construction (see doc comment on `disagreements`), distinct
        // claims land in distinct buckets and never trigger the
        // multi-provider-per-bucket condition.
        assert!(disagreements(&answers).is_empty());
    }

    #[test]
    fn test_normalize_claim() {
        assert_eq!(normalize_claim("  The Sky IS Blue!! "), "the sky is blue");
    }
}
