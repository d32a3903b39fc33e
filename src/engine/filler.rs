//! Parameter fillers for engines created without explicit weights.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{ConvError, Result};

/// How to initialize a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FillerConfig {
    /// Every element set to `value`.
    Constant { value: f32 },
    /// Uniform in `[min, max]`.
    Uniform { min: f32, max: f32 },
    /// Normal with the given mean and standard deviation.
    Gaussian { mean: f32, std: f32 },
    /// Uniform in `[-sqrt(3 / fan_in), sqrt(3 / fan_in)]`.
    Xavier,
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self::Constant { value: 0.0 }
    }
}

impl FillerConfig {
    /// Fill `data`; `fan_in` is the number of inputs feeding one output.
    pub fn fill(&self, data: &mut [f32], fan_in: usize, rng: &mut impl Rng) -> Result<()> {
        match *self {
            Self::Constant { value } => data.fill(value),
            Self::Uniform { min, max } => fill_uniform(data, min, max, rng)?,
            Self::Gaussian { mean, std } => {
                let normal = Normal::new(mean, std).map_err(|e| {
                    ConvError::config(format!("invalid gaussian filler (std {}): {}", std, e))
                })?;
                for v in data.iter_mut() {
                    *v = normal.sample(rng);
                }
            }
            Self::Xavier => {
                if fan_in == 0 {
                    return Err(ConvError::config("xavier filler needs a positive fan_in"));
                }
                let scale = (3.0 / fan_in as f32).sqrt();
                fill_uniform(data, -scale, scale, rng)?;
            }
        }
        Ok(())
    }
}

fn fill_uniform(data: &mut [f32], min: f32, max: f32, rng: &mut impl Rng) -> Result<()> {
    if !(min <= max) {
        return Err(ConvError::config(format!(
            "uniform filler needs min <= max, got [{}, {}]",
            min, max
        )));
    }
    if !(min.is_finite() && max.is_finite() && (max - min).is_finite()) {
        return Err(ConvError::config(format!(
            "uniform filler range [{}, {}] is not representable",
            min, max
        )));
    }
    let dist = Uniform::new_inclusive(min, max);
    for v in data.iter_mut() {
        *v = dist.sample(rng);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_constant_filler() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let mut data = vec![1.0f32; 8];
        FillerConfig::default().fill(&mut data, 8, &mut rng).unwrap();
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_uniform_filler_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut data = vec![0.0f32; 1000];
        FillerConfig::Uniform { min: -0.5, max: 0.25 }
            .fill(&mut data, 1, &mut rng)
            .unwrap();
        assert!(data.iter().all(|&v| (-0.5..=0.25).contains(&v)));
    }

    #[test]
    fn test_xavier_filler_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut data = vec![0.0f32; 500];
        FillerConfig::Xavier.fill(&mut data, 27, &mut rng).unwrap();
        let scale = (3.0f32 / 27.0).sqrt();
        assert!(data.iter().all(|v| v.abs() <= scale));
        assert!(data.iter().any(|&v| v < 0.0) && data.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_gaussian_filler_is_seeded() {
        let filler = FillerConfig::Gaussian { mean: 0.0, std: 0.1 };
        let mut a = vec![0.0f32; 16];
        let mut b = vec![0.0f32; 16];
        filler.fill(&mut a, 1, &mut rand::rngs::StdRng::seed_from_u64(9)).unwrap();
        filler.fill(&mut b, 1, &mut rand::rngs::StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_fillers() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut data = vec![0.0f32; 4];
        assert!(FillerConfig::Uniform { min: 1.0, max: 0.0 }
            .fill(&mut data, 1, &mut rng)
            .is_err());
        assert!(FillerConfig::Gaussian { mean: 0.0, std: -1.0 }
            .fill(&mut data, 1, &mut rng)
            .is_err());
        assert!(FillerConfig::Xavier.fill(&mut data, 0, &mut rng).is_err());
    }

    #[test]
    fn test_uniform_filler_rejects_unbounded_range() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let mut data = vec![0.0f32; 4];
        for (min, max) in [(-3.0e38, 3.0e38), (f32::NEG_INFINITY, 0.0), (0.0, f32::INFINITY)] {
            let err = FillerConfig::Uniform { min, max }
                .fill(&mut data, 1, &mut rng)
                .unwrap_err();
            assert!(matches!(err, ConvError::Config(_)), "[{}, {}]", min, max);
        }
    }
}
