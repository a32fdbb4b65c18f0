use rand::Rng;
use rand_distr::{Distribution, Exp1, Uniform};

use crate::array::Array;

/// Rewards of random instances are drawn uniformly from this range.
pub const REWARD_RANGE: (f64, f64) = (-10.0, 10.0);

/// Sample a point uniformly from the probability simplex over `n` outcomes
/// by normalizing standard exponential variates.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn distribution(n: usize, rng: &mut impl Rng) -> Vec<f64> {
    assert!(n > 0, "distribution over zero outcomes");
    let mut xs: Vec<f64> = (0..n).map(|_| rng.sample(Exp1)).collect();
    let sum: f64 = xs.iter().sum();
    xs.iter_mut().for_each(|x| *x /= sum);
    xs
}

/// Array whose rows along the last axis are independent random
/// distributions.
pub(crate) fn distributions<const D: usize>(shape: [usize; D], rng: &mut impl Rng) -> Array<D> {
    let mut array = Array::zeros(shape);
    for row in array.rows_mut() {
        row.copy_from_slice(&distribution(row.len(), rng));
    }
    array
}

pub(crate) fn rewards(states: usize, actions: usize, rng: &mut impl Rng) -> Array<2> {
    let uniform = Uniform::new(REWARD_RANGE.0, REWARD_RANGE.1);
    Array::from_fn([states, actions], |_| uniform.sample(rng))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::{distribution, distributions, rewards, REWARD_RANGE};

    #[test]
    fn distributions_are_on_the_simplex() {
        for seed in 0..200 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for n in 2..10 {
                let p = distribution(n, &mut rng);
                assert_eq!(p.len(), n);
                assert!(p.iter().all(|&x| x >= 0.0));
                assert!(p.iter().all(|&x| x != 1.0), "degenerate draw {p:?}");
                let sum: f64 = p.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn single_outcome_is_certain() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(distribution(1, &mut rng), vec![1.0]);
    }

    #[test]
    fn simplex_draws_are_not_biased() {
        // Every coordinate of a uniform point on the simplex has mean 1/n.
        const DRAWS: usize = 20_000;
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let mut mean = [0.0; 4];
        for _ in 0..DRAWS {
            for (m, p) in mean.iter_mut().zip(distribution(4, &mut rng)) {
                *m += p / DRAWS as f64;
            }
        }
        for m in mean {
            assert!((m - 0.25).abs() < 0.01, "mean {m}");
        }
    }

    #[test]
    fn tables() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let table = distributions([3, 2, 5], &mut rng);
        for row in table.rows() {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        let r = rewards(10, 10, &mut rng);
        let (min, max) = r.bounds().unwrap();
        assert!(min >= REWARD_RANGE.0 && max < REWARD_RANGE.1);
        assert!(min < 0.0 && max > 0.0);
    }
}
