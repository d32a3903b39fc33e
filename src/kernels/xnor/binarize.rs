//! FP32 filter binarization.
//!
//! Each output channel's flattened filter of K values becomes one row of sign
//! bits plus a scale `alpha = mean(|w|)` that restores the magnitude lost by
//! keeping only the sign.

use rayon::prelude::*;

use super::bit_tensor::{pack_row, BitTensor};
use crate::error::{ConvError, Result};

/// Sign-packed filters and their per-channel scales.
#[derive(Debug, Clone, PartialEq)]
pub struct BinarizedWeights {
    /// One row of K sign bits per output channel.
    pub bits: BitTensor,
    /// Mean absolute filter value per output channel.
    pub alpha: Vec<f32>,
}

impl BinarizedWeights {
    pub fn out_channels(&self) -> usize {
        self.bits.rows()
    }

    /// Filter length K (input channels per group x kernel area).
    pub fn kernel_dim(&self) -> usize {
        self.bits.len()
    }
}

pub(crate) fn check_weights(weights: &[f32], out_channels: usize, kernel_dim: usize) -> Result<()> {
    if kernel_dim == 0 {
        return Err(ConvError::shape("kernel dimension", "> 0", 0));
    }
    if weights.len() != out_channels * kernel_dim {
        return Err(ConvError::shape(
            "weights",
            format!("{} ({} x {})", out_channels * kernel_dim, out_channels, kernel_dim),
            weights.len(),
        ));
    }
    Ok(())
}

#[inline]
fn mean_abs(filter: &[f32]) -> f32 {
    filter.iter().map(|w| w.abs()).sum::<f32>() / filter.len() as f32
}

/// Binarize filters `[out_channels, kernel_dim]` on the calling thread.
pub fn binarize_weights(
    weights: &[f32],
    out_channels: usize,
    kernel_dim: usize,
) -> Result<BinarizedWeights> {
    check_weights(weights, out_channels, kernel_dim)?;
    Ok(binarize_rows(weights, out_channels, kernel_dim, false))
}

/// Binarize filters with one rayon task per output channel.
///
/// Channels write disjoint rows and alpha slots, so the result is identical to
/// [`binarize_weights`].
pub fn binarize_weights_par(
    weights: &[f32],
    out_channels: usize,
    kernel_dim: usize,
) -> Result<BinarizedWeights> {
    check_weights(weights, out_channels, kernel_dim)?;
    Ok(binarize_rows(weights, out_channels, kernel_dim, true))
}

/// Infallible core of the binarizers; callers validate the shape first.
pub(crate) fn binarize_rows(
    weights: &[f32],
    out_channels: usize,
    kernel_dim: usize,
    parallel: bool,
) -> BinarizedWeights {
    assert_eq!(weights.len(), out_channels * kernel_dim, "weights length mismatch");
    assert!(kernel_dim > 0, "kernel_dim must be positive");

    let mut bits = BitTensor::zeros(out_channels, kernel_dim);
    let mut alpha = vec![0.0f32; out_channels];

    if parallel {
        let words_per_row = bits.words_per_row();
        bits.words_mut()
            .par_chunks_exact_mut(words_per_row)
            .zip(alpha.par_iter_mut())
            .zip(weights.par_chunks_exact(kernel_dim))
            .for_each(|((row, a), filter)| {
                pack_row(filter, row);
                *a = mean_abs(filter);
            });
    } else {
        for ((filter, row), a) in weights
            .chunks_exact(kernel_dim)
            .zip(bits.rows_mut())
            .zip(alpha.iter_mut())
        {
            pack_row(filter, row);
            *a = mean_abs(filter);
        }
    }

    BinarizedWeights { bits, alpha }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_weights(n: usize, seed: u64) -> Vec<f32> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-2.0f32..2.0)).collect()
    }

    #[test]
    fn test_binarize_small_filter() {
        let weights = [1.0, -1.0, -1.0, 1.0];
        let binarized = binarize_weights(&weights, 1, 4).unwrap();

        assert_eq!(binarized.out_channels(), 1);
        assert_eq!(binarized.kernel_dim(), 4);
        assert_eq!(binarized.bits.word_at(0, 0), 0b1001);
        assert_eq!(binarized.alpha, vec![1.0]);
    }

    #[test]
    fn test_sign_roundtrip() {
        let (out_channels, kernel_dim) = (7, 75);
        let weights = random_weights(out_channels * kernel_dim, 3);
        let binarized = binarize_weights(&weights, out_channels, kernel_dim).unwrap();

        for c in 0..out_channels {
            for k in 0..kernel_dim {
                let w = weights[c * kernel_dim + k];
                assert_eq!(binarized.bits.bit(c, k), w >= 0.0, "channel {} bit {}", c, k);
            }
        }
    }

    #[test]
    fn test_alpha_is_mean_abs() {
        let (out_channels, kernel_dim) = (5, 27);
        let weights = random_weights(out_channels * kernel_dim, 11);
        let binarized = binarize_weights(&weights, out_channels, kernel_dim).unwrap();

        for c in 0..out_channels {
            let filter = &weights[c * kernel_dim..(c + 1) * kernel_dim];
            let expected = filter.iter().map(|w| w.abs()).sum::<f32>() / kernel_dim as f32;
            assert!((binarized.alpha[c] - expected).abs() < 1e-6);
            assert!(binarized.alpha[c] >= 0.0);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        for (out_channels, kernel_dim, seed) in [(1, 9, 1), (64, 576, 2), (33, 130, 3)] {
            let weights = random_weights(out_channels * kernel_dim, seed);
            let seq = binarize_weights(&weights, out_channels, kernel_dim).unwrap();
            let par = binarize_weights_par(&weights, out_channels, kernel_dim).unwrap();
            assert_eq!(seq.bits, par.bits);
            // Same per-channel summation order, so bit-identical floats
            let seq_bits: Vec<u32> = seq.alpha.iter().map(|a| a.to_bits()).collect();
            let par_bits: Vec<u32> = par.alpha.iter().map(|a| a.to_bits()).collect();
            assert_eq!(seq_bits, par_bits);
        }
    }

    #[test]
    fn test_padding_bits_zero_after_binarize() {
        let weights = vec![3.0f32; 2 * 100];
        let binarized = binarize_weights_par(&weights, 2, 100).unwrap();
        for c in 0..2 {
            assert_eq!(binarized.bits.word_at(c, 1), (1u64 << 36) - 1);
        }
    }

    #[test]
    fn test_binarize_shape_error() {
        let err = binarize_weights(&[1.0; 10], 3, 4).unwrap_err();
        assert!(matches!(err, ConvError::Shape { what: "weights", .. }));

        let err = binarize_weights_par(&[], 3, 0).unwrap_err();
        assert!(matches!(err, ConvError::Shape { .. }));
    }
}
