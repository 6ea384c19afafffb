//! Link cleaning threshold selection.
//!
//! Models per-branch read arrival as Poisson: estimate the effective
//! per-kmer coverage `λ` as the median of sampled trie coverages, then
//! pick the smallest count `t` whose upper tail probability
//! `P(X >= t | X ~ Poisson(λ))` drops to the target false-positive
//! rate. Everything below the resulting threshold is treated as error
//! paths by the cleaner.

use tracing::info;

/// Default target false-positive rate.
pub const DEFAULT_FPR: f64 = 1e-3;

/// How many tries the estimator samples at most.
pub const MAX_SAMPLES: usize = 10_000;

/// `P(X >= t)` for `X ~ Poisson(lambda)`.
pub fn poisson_tail(lambda: f64, t: u32) -> f64 {
    if t == 0 {
        return 1.0;
    }
    // Sum the pmf up to t-1 iteratively and take the complement.
    let mut pmf = (-lambda).exp();
    let mut cdf = pmf;
    for i in 1..t {
        pmf *= lambda / i as f64;
        cdf += pmf;
    }
    (1.0 - cdf).max(0.0)
}

/// Pick the link cleaning threshold from sampled per-trie coverages.
///
/// `fpr` is the acceptable probability that a genuine link falls below
/// the threshold; `cap` bounds the result. Returns 1 (prune nothing
/// beyond zero-coverage paths) when there is nothing to estimate from.
pub fn pick_link_threshold(trie_coverages: &mut Vec<u32>, fpr: f64, cap: u32) -> u32 {
    if trie_coverages.is_empty() {
        return 1;
    }
    if trie_coverages.len() > MAX_SAMPLES {
        // Deterministic systematic sample: every n-th trie.
        let step = trie_coverages.len() / MAX_SAMPLES;
        let sampled: Vec<u32> = trie_coverages.iter().step_by(step.max(1)).copied().collect();
        *trie_coverages = sampled;
    }
    let mid = trie_coverages.len() / 2;
    let (_, median, _) = trie_coverages.select_nth_unstable(mid);
    let lambda = *median as f64;
    if lambda <= 0.0 {
        return 1;
    }

    let mut t = 1u32;
    while t < cap && poisson_tail(lambda, t) > fpr {
        t += 1;
    }
    info!(lambda, fpr, threshold = t, "link threshold selected");
    t
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisson_tail_basics() {
        // P(X >= 0) is always 1.
        assert!((poisson_tail(3.0, 0) - 1.0).abs() < 1e-12);
        // P(X >= 1) = 1 - e^-lambda.
        let lambda = 2.0f64;
        assert!((poisson_tail(lambda, 1) - (1.0 - (-lambda).exp())).abs() < 1e-12);
        // Tail is monotone decreasing in t.
        assert!(poisson_tail(5.0, 3) > poisson_tail(5.0, 8));
    }

    #[test]
    fn test_threshold_scales_with_coverage() {
        let mut low: Vec<u32> = vec![2; 100];
        let mut high: Vec<u32> = vec![40; 100];
        let t_low = pick_link_threshold(&mut low, DEFAULT_FPR, 100);
        let t_high = pick_link_threshold(&mut high, DEFAULT_FPR, 100);
        assert!(t_low < t_high);
        // Lambda 2 at FPR 1e-3: the tail first dips below 1e-3 at t=9.
        assert_eq!(t_low, 9);
    }

    #[test]
    fn test_threshold_respects_cap() {
        let mut samples: Vec<u32> = vec![200; 50];
        assert_eq!(pick_link_threshold(&mut samples, DEFAULT_FPR, 10), 10);
    }

    #[test]
    fn test_threshold_degenerate_inputs() {
        assert_eq!(pick_link_threshold(&mut Vec::new(), DEFAULT_FPR, 100), 1);
        let mut zeros = vec![0u32; 10];
        assert_eq!(pick_link_threshold(&mut zeros, DEFAULT_FPR, 100), 1);
    }
}
