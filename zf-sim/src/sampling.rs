//! Random draws for the stochastic simulation algorithm.
use rand::Rng;
use rand_distr::{
    Distribution,
    Exp,
};

/// Outcome of one Gillespie draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Draw {
    /// Index of the reaction that fires, `None` when nothing can happen.
    pub reaction: Option<usize>,
    /// Waiting time until it fires; `+∞` when nothing can happen.
    pub tau: f64,
}

impl Draw {
    /// No reaction has positive propensity.
    pub const ABSORBED: Self = Self { reaction: None, tau: f64::INFINITY };

    /// True for [`Draw::ABSORBED`].
    #[must_use]
    pub const fn is_absorbed(&self) -> bool {
        self.reaction.is_none()
    }
}

/// Inverse-CDF selection of an index with probability proportional to `weights`, using a uniform
/// variate `u ∈ [0, 1)`.
///
/// Zero-weight entries are never selected. If rounding carries the target past the cumulative sum,
/// the last positive-weight index is returned. `None` means the weights do not sum to a positive
/// value.
#[must_use]
pub fn sample_categorical(weights: &[f64], u: f64) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return None;
    }

    let target = u * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        cumulative += w;
        last_positive = Some(i);
        if target < cumulative {
            return Some(i);
        }
    }
    last_positive
}

/// [`sample_categorical`] with a fresh uniform variate from `rng`.
pub fn categorical<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    sample_categorical(weights, rng.gen())
}

/// Draw the next reaction and its waiting time from `propensities`.
///
/// The waiting time is exponential with rate `S = Σ propensities`; the reaction is chosen with
/// probability `a_i / S`. A zero total gives [`Draw::ABSORBED`].
pub fn draw<R: Rng + ?Sized>(propensities: &[f64], rng: &mut R) -> Draw {
    let total: f64 = propensities.iter().sum();
    if total.is_nan() || total <= 0.0 {
        return Draw::ABSORBED;
    }
    let Ok(exp) = Exp::new(total) else { return Draw::ABSORBED };

    let tau = exp.sample(rng);
    match categorical(propensities, rng) {
        Some(reaction) => Draw { reaction: Some(reaction), tau },
        None => Draw::ABSORBED,
    }
}

/// Seed for replicate `stream` of a run seeded with `base`: a SplitMix64 mix of both, so that
/// neighbouring replicates get unrelated generators.
#[must_use]
pub const fn derive_seed(base: u64, stream: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut z = (base ^ stream.wrapping_mul(GOLDEN_GAMMA)).wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use assertables::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::*;

    use super::*;

    #[fixture]
    fn rng() -> StdRng {
        StdRng::seed_from_u64(1234)
    }

    #[rstest]
    fn test_fair_coin(mut rng: StdRng) {
        let hits: usize = (0..100_000).filter_map(|_| categorical(&[0.5, 0.5], &mut rng)).sum();
        #[allow(clippy::cast_precision_loss)]
        let fraction = hits as f64 / 100_000.0;
        assert_in_delta!(fraction, 0.5, 0.01);
    }

    #[rstest]
    #[case::first(&[1.0, 0.0], 0)]
    #[case::second(&[0.0, 1.0], 1)]
    #[case::middle(&[0.0, 3.0, 0.0], 1)]
    fn test_degenerate_weights(mut rng: StdRng, #[case] weights: &[f64], #[case] expected: usize) {
        for _ in 0..1000 {
            assert_eq!(categorical(weights, &mut rng), Some(expected));
        }
    }

    #[rstest]
    #[case::zeros(&[0.0, 0.0])]
    #[case::empty(&[])]
    #[case::nan(&[f64::NAN, 1.0])]
    fn test_no_mass(#[case] weights: &[f64]) {
        assert_none!(sample_categorical(weights, 0.3));
    }

    #[rstest]
    fn test_rounding_overrun_clamps_to_last_positive() {
        // 0.1 + 0.2 rounds above 0.3, so u = 1 lands exactly on the total
        assert_eq!(sample_categorical(&[0.1, 0.2, 0.0], 1.0), Some(1));
        assert_eq!(sample_categorical(&[0.1, 0.2, 0.0], 0.999_999_999_999), Some(1));
    }

    #[rstest]
    fn test_inverse_cdf_boundaries() {
        let weights = [1.0, 2.0, 1.0];
        assert_eq!(sample_categorical(&weights, 0.0), Some(0));
        assert_eq!(sample_categorical(&weights, 0.25), Some(1));
        assert_eq!(sample_categorical(&weights, 0.749), Some(1));
        assert_eq!(sample_categorical(&weights, 0.75), Some(2));
    }

    #[rstest]
    fn test_draw_absorbed(mut rng: StdRng) {
        assert_eq!(draw(&[0.0; 8], &mut rng), Draw::ABSORBED);
        assert!(draw(&[], &mut rng).is_absorbed());
    }

    #[rstest]
    fn test_draw_single_channel(mut rng: StdRng) {
        let mut propensities = [0.0; 8];
        propensities[5] = 2.5;
        for _ in 0..1000 {
            let d = draw(&propensities, &mut rng);
            assert_eq!(d.reaction, Some(5));
            assert!(d.tau.is_finite());
            assert_ge!(d.tau, 0.0);
        }
    }

    #[rstest]
    fn test_draw_waiting_time_mean(mut rng: StdRng) {
        let mean = (0..20_000).map(|_| draw(&[3.0, 1.0], &mut rng).tau).sum::<f64>() / 20_000.0;
        assert_in_delta!(mean, 0.25, 0.01);
    }

    #[rstest]
    fn test_derive_seed_separates_streams() {
        let seeds: Vec<_> = (0..64).map(|r| derive_seed(42, r)).collect();
        let mut unique = seeds.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), seeds.len());
        assert_eq!(derive_seed(42, 3), derive_seed(42, 3));
        assert_ne!(derive_seed(42, 3), derive_seed(43, 3));
    }
}
