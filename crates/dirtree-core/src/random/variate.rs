//! Random variate generators used by the Dirichlet-tree.
//!
//! Every generator takes a caller-owned engine; nothing here touches global
//! randomness.

use rand::Rng;
use rand_distr::{Binomial, Distribution, Gamma};
use thiserror::Error;

/// Errors raised when a distribution is asked for with unusable parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariateError {
    #[error("at least one category is required")]
    NoCategories,
    #[error("gamma shape must be positive and finite, got {shape}")]
    InvalidShape { shape: f64 },
}

/// Draws a single Gamma(shape, 1) variate.
fn gamma<R: Rng + ?Sized>(shape: f64, rng: &mut R) -> Result<f64, VariateError> {
    if !(shape.is_finite() && shape > 0.0) {
        return Err(VariateError::InvalidShape { shape });
    }
    let dist = Gamma::new(shape, 1.0).map_err(|_| VariateError::InvalidShape { shape })?;
    Ok(dist.sample(rng))
}

/// Draws `p ~ Dirichlet(alpha)`.
///
/// If every Gamma draw underflows to zero, a single category chosen uniformly
/// at random receives all of the mass.
pub fn dirichlet<R: Rng + ?Sized>(alpha: &[f64], rng: &mut R) -> Result<Vec<f64>, VariateError> {
    if alpha.is_empty() {
        return Err(VariateError::NoCategories);
    }

    let mut draws = Vec::with_capacity(alpha.len());
    let mut total = 0.0;
    for &a in alpha {
        let g = gamma(a, rng)?;
        total += g;
        draws.push(g);
    }

    if total == 0.0 {
        let chosen = rng.gen_range(0..draws.len());
        for (idx, p) in draws.iter_mut().enumerate() {
            *p = if idx == chosen { 1.0 } else { 0.0 };
        }
        return Ok(draws);
    }

    for p in &mut draws {
        *p /= total;
    }
    Ok(draws)
}

/// Draws category counts from `Multinomial(n, p)`.
///
/// The counts are produced from sequential binomial marginals. Whatever is
/// left after the second-to-last category goes to the last one, so the output
/// always sums to exactly `n`.
pub fn multinomial<R: Rng + ?Sized>(
    n: u64,
    p: &[f64],
    rng: &mut R,
) -> Result<Vec<u64>, VariateError> {
    let Some(last) = p.len().checked_sub(1) else {
        return Err(VariateError::NoCategories);
    };

    let mut out = vec![0u64; p.len()];
    // `p` rarely sums to exactly one, so conditionals are taken against the
    // mass that is actually left.
    let mut mass_left: f64 = p.iter().sum();
    let mut remaining = n;

    for (idx, &pi) in p.iter().enumerate().take(last) {
        if remaining == 0 {
            break;
        }
        let conditional = if mass_left > 0.0 {
            (pi / mass_left).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let drawn = match conditional {
            c if c <= 0.0 => 0,
            c if c >= 1.0 => remaining,
            c => Binomial::new(remaining, c)
                .map(|b| b.sample(rng))
                .unwrap_or(0),
        };
        out[idx] = drawn;
        remaining -= drawn;
        mass_left -= pi;
    }

    out[last] += remaining;
    Ok(out)
}

/// Draws `Multinomial(n, Dirichlet(alpha))`.
pub fn dirichlet_multinomial<R: Rng + ?Sized>(
    n: u64,
    alpha: &[f64],
    rng: &mut R,
) -> Result<Vec<u64>, VariateError> {
    let p = dirichlet(alpha, rng)?;
    multinomial(n, &p, rng)
}

/// Draws `x ~ Beta(a, b)` as a ratio of Gamma variates.
///
/// Both Gamma draws are offset by machine epsilon so the denominator is never
/// zero.
pub fn beta<R: Rng + ?Sized>(a: f64, b: f64, rng: &mut R) -> Result<f64, VariateError> {
    let x = gamma(a, rng)? + f64::EPSILON;
    let y = gamma(b, rng)? + f64::EPSILON;
    Ok(x / (x + y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn dirichlet_lies_on_the_simplex() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = dirichlet(&[0.5, 1.0, 2.0, 4.0], &mut rng).unwrap();
        assert_eq!(p.len(), 4);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dirichlet_with_vanishing_alpha_puts_all_mass_on_one_category() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let p = dirichlet(&[1e-300, 1e-300, 1e-300], &mut rng).unwrap();
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(p.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn dirichlet_rejects_bad_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dirichlet(&[], &mut rng), Err(VariateError::NoCategories));
        assert!(matches!(
            dirichlet(&[1.0, 0.0], &mut rng),
            Err(VariateError::InvalidShape { .. })
        ));
        assert!(matches!(
            dirichlet(&[1.0, f64::NAN], &mut rng),
            Err(VariateError::InvalidShape { .. })
        ));
    }

    #[test]
    fn multinomial_assigns_remainder_to_last_category() {
        let mut rng = StdRng::seed_from_u64(11);
        let counts = multinomial(100, &[0.0, 0.0, 0.0], &mut rng).unwrap();
        assert_eq!(counts, vec![0, 0, 100]);

        let counts = multinomial(100, &[1.0, 0.0, 0.0], &mut rng).unwrap();
        assert_eq!(counts, vec![100, 0, 0]);
    }

    #[test]
    fn multinomial_tolerates_unnormalised_probabilities() {
        let mut rng = StdRng::seed_from_u64(5);
        let counts = multinomial(1_000, &[0.2, 0.2, 0.2000001], &mut rng).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 1_000);
    }

    #[test]
    fn dirichlet_multinomial_is_deterministic_for_a_seed() {
        let alpha = [1.0, 2.0, 3.0];
        let a = dirichlet_multinomial(500, &alpha, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = dirichlet_multinomial(500, &alpha, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iter().sum::<u64>(), 500);
    }

    #[test]
    fn beta_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..200 {
            let x = beta(0.01, 0.01, &mut rng).unwrap();
            assert!((0.0..=1.0).contains(&x) && x.is_finite());
        }
    }

    #[test]
    fn beta_mean_tracks_parameters() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 5_000;
        let mean = (0..draws)
            .map(|_| beta(2.0, 6.0, &mut rng).unwrap())
            .sum::<f64>()
            / draws as f64;
        assert!((mean - 0.25).abs() < 0.02, "mean was {mean}");
    }
}
