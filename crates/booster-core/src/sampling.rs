//! Floored normal distributions for the call simulator.
//!
//! Sampling goes through a caller-supplied `rand::Rng` so a seeded
//! `StdRng` reproduces a whole simulated run.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Normal distribution with a lower floor applied after sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normal {
    pub mean: f64,
    pub std_dev: f64,
    #[serde(default)]
    pub floor: f64,
}

impl Normal {
    pub fn new(mean: f64, std_dev: f64, floor: f64) -> Self {
        Self {
            mean,
            std_dev,
            floor,
        }
    }

    /// Box-Muller transform over two uniform draws.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
        let u2: f64 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        (self.mean + self.std_dev.abs() * z).max(self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn samples_respect_floor() {
        let mut rng = StdRng::seed_from_u64(7);
        let dist = Normal::new(1.0, 5.0, 0.5);
        for _ in 0..1_000 {
            assert!(dist.sample(&mut rng) >= 0.5);
        }
    }

    #[test]
    fn sample_mean_is_close_to_configured_mean() {
        let mut rng = StdRng::seed_from_u64(42);
        let dist = Normal::new(20.0, 3.0, 0.0);
        let n = 20_000;
        let mean = (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64;
        assert!((mean - 20.0).abs() < 0.2, "mean {mean}");
    }

    #[test]
    fn zero_deviation_is_constant() {
        let mut rng = StdRng::seed_from_u64(1);
        let dist = Normal::new(14.3, 0.0, 0.0);
        assert_eq!(dist.sample(&mut rng), 14.3);
    }

    #[test]
    fn floor_defaults_to_zero_in_yaml() {
        let dist: Normal = serde_yaml::from_str("mean: 0.21\nstd_dev: 0.03\n").unwrap();
        assert_eq!(dist.floor, 0.0);
    }
}
