//! XNOR-Net binarized convolution kernels.
//!
//! Filters and activations are reduced to sign bits packed into 64-bit words;
//! the convolution becomes an XNOR + popcount GEMM scaled by a per-channel
//! alpha.
//!
//! # Features
//! - Packed sign-bit tensors with zeroed tail bits
//! - Per-channel weight binarization (sequential or Rayon-parallel)
//! - Fused im2col + binarization of activations
//! - Baseline and tiled/unrolled XNOR GEMM with identical results
//!
//! # Example
//! ```ignore
//! use xnor_conv::kernels::xnor::{BinaryKernel, GemmStrategy};
//!
//! let kernel = BinaryKernel::new(GemmStrategy::default());
//! kernel.forward_sample(&geometry, &weights, &input, height, width, &mut output)?;
//! ```

pub mod bias;
pub mod binarize;
pub mod bit_tensor;
pub mod gemm;
pub mod gemm_scalar;
pub mod im2col;
pub mod types;

use std::sync::{Arc, OnceLock};

pub use bias::add_bias;
pub use binarize::{binarize_weights, binarize_weights_par, BinarizedWeights};
pub use bit_tensor::{sign_bit, BitTensor};
pub use gemm::{xnor_dot_unrolled, xnor_gemm_tiled, GemmStrategy};
pub use gemm_scalar::{xnor_dot, xnor_gemm_baseline};
pub use im2col::binarize_patches;
pub use types::{popcount_backend, words_for, TileConfig, Word, WORD_BITS};

use super::geometry::ConvGeometry;
use super::ConvolutionKernel;
use crate::error::{ConvError, Result};

/// State of the binarized-weight cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No binary weights yet; the next forward call binarizes.
    Unbound,
    /// Binary weights and alpha are cached and reused.
    Binarized,
}

/// Binarized convolution kernel.
///
/// Binarizes the filters on the first forward call and keeps the result until
/// [`invalidate_weight_cache`](ConvolutionKernel::invalidate_weight_cache) is
/// called. Concurrent first calls are serialized by the `OnceLock`, so the
/// filters are binarized exactly once.
#[derive(Debug, Default)]
pub struct BinaryKernel {
    strategy: GemmStrategy,
    cache: OnceLock<Arc<BinarizedWeights>>,
}

impl BinaryKernel {
    pub fn new(strategy: GemmStrategy) -> Self {
        Self {
            strategy,
            cache: OnceLock::new(),
        }
    }

    pub fn strategy(&self) -> GemmStrategy {
        self.strategy
    }

    pub fn cache_state(&self) -> CacheState {
        if self.cache.get().is_some() {
            CacheState::Binarized
        } else {
            CacheState::Unbound
        }
    }

    /// Cached binary weights, if the kernel has been bound.
    pub fn binarized_weights(&self) -> Option<Arc<BinarizedWeights>> {
        self.cache.get().cloned()
    }

    /// Return the cached binary weights, binarizing `weights` on first use.
    pub fn bind(&self, geometry: &ConvGeometry, weights: &[f32]) -> Result<Arc<BinarizedWeights>> {
        let out_channels = geometry.num_output;
        let kernel_dim = geometry.kernel_dim();

        let cached = match self.cache.get() {
            Some(cached) => cached,
            None => {
                binarize::check_weights(weights, out_channels, kernel_dim)?;
                self.cache.get_or_init(|| {
                    let binarized =
                        binarize::binarize_rows(weights, out_channels, kernel_dim, true);
                    tracing::debug!(
                        "Binarized weights: {} channels x {} bits ({} words per row)",
                        out_channels,
                        kernel_dim,
                        binarized.bits.words_per_row()
                    );
                    Arc::new(binarized)
                })
            }
        };

        if cached.out_channels() != out_channels || cached.kernel_dim() != kernel_dim {
            return Err(ConvError::WeightCacheMismatch {
                expected: format!("{} x {}", out_channels, kernel_dim),
                actual: format!("{} x {}", cached.out_channels(), cached.kernel_dim()),
            });
        }
        Ok(Arc::clone(cached))
    }

    /// Binarized receptive fields of one sample, one tensor per group.
    pub fn binarize_input(
        &self,
        geometry: &ConvGeometry,
        input: &[f32],
        height: usize,
        width: usize,
    ) -> Result<Vec<BitTensor>> {
        let channels = geometry.channels_per_group();
        let group_len = channels * height * width;
        if input.len() != geometry.channels * height * width {
            return Err(ConvError::shape(
                "input sample",
                geometry.channels * height * width,
                input.len(),
            ));
        }

        // Empty planes still yield one all-padding tensor per group
        (0..geometry.group)
            .map(|g| {
                let x = &input[g * group_len..(g + 1) * group_len];
                binarize_patches(x, channels, height, width, geometry)
            })
            .collect()
    }
}

impl ConvolutionKernel for BinaryKernel {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn forward_sample(
        &self,
        geometry: &ConvGeometry,
        weights: &[f32],
        input: &[f32],
        height: usize,
        width: usize,
        output: &mut [f32],
    ) -> Result<()> {
        let cached = self.bind(geometry, weights)?;
        let [out_h, out_w] = geometry.output_spatial(height, width)?;
        let spatial = out_h * out_w;
        if output.len() != geometry.num_output * spatial {
            return Err(ConvError::shape(
                "output sample",
                geometry.num_output * spatial,
                output.len(),
            ));
        }

        let outputs = geometry.outputs_per_group();
        let kernel_dim = geometry.kernel_dim();
        let patches = self.binarize_input(geometry, input, height, width)?;

        for (g, x) in patches.iter().enumerate() {
            let (c0, c1) = (g * outputs, (g + 1) * outputs);
            tracing::trace!("XNOR GEMM group {}: {} x {} x {}", g, outputs, spatial, kernel_dim);
            self.strategy.run(
                outputs,
                spatial,
                kernel_dim,
                cached.bits.row_span(c0, c1),
                &cached.alpha[c0..c1],
                x.as_words(),
                &mut output[c0 * spatial..c1 * spatial],
            );
        }
        Ok(())
    }

    fn invalidate_weight_cache(&mut self) {
        if self.cache.take().is_some() {
            tracing::debug!("Binary weight cache invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross_filter_geometry() -> ConvGeometry {
        ConvGeometry::new(1, 1, 2).with_bias(false)
    }

    #[test]
    fn test_kernel_starts_unbound() {
        let kernel = BinaryKernel::new(GemmStrategy::Baseline);
        assert_eq!(kernel.cache_state(), CacheState::Unbound);
        assert!(kernel.binarized_weights().is_none());
        assert_eq!(kernel.name(), "binary");
    }

    #[test]
    fn test_forward_sample_fixed_case() {
        let kernel = BinaryKernel::new(GemmStrategy::Baseline);
        let geometry = cross_filter_geometry();
        let weights = [1.0, -1.0, -1.0, 1.0];
        let input = [1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let mut output = [0.0f32; 4];

        kernel
            .forward_sample(&geometry, &weights, &input, 3, 3, &mut output)
            .unwrap();

        assert_eq!(output, [-2.0, 2.0, 2.0, -2.0]);
        assert_eq!(kernel.cache_state(), CacheState::Binarized);
    }

    #[test]
    fn test_bind_reuses_cache() {
        let kernel = BinaryKernel::default();
        let geometry = cross_filter_geometry();
        let first = kernel.bind(&geometry, &[1.0, -1.0, -1.0, 1.0]).unwrap();
        // Different weights are ignored until the cache is invalidated
        let second = kernel.bind(&geometry, &[-5.0, -5.0, -5.0, -5.0]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_invalidate_rebinarizes() {
        let mut kernel = BinaryKernel::default();
        let geometry = cross_filter_geometry();
        let first = kernel.bind(&geometry, &[1.0, -1.0, -1.0, 1.0]).unwrap();

        kernel.invalidate_weight_cache();
        assert_eq!(kernel.cache_state(), CacheState::Unbound);

        let second = kernel.bind(&geometry, &[-2.0, -2.0, -2.0, -2.0]).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.alpha, vec![2.0]);
        assert_eq!(second.bits.word_at(0, 0), 0);
    }

    #[test]
    fn test_cache_mismatch_on_reentry() {
        let kernel = BinaryKernel::default();
        kernel.bind(&cross_filter_geometry(), &[1.0; 4]).unwrap();

        let wider = ConvGeometry::new(1, 2, 2);
        let err = kernel.bind(&wider, &[1.0; 8]).unwrap_err();
        assert!(matches!(err, ConvError::WeightCacheMismatch { .. }));
    }

    #[test]
    fn test_bind_rejects_bad_weights() {
        let kernel = BinaryKernel::default();
        let err = kernel.bind(&cross_filter_geometry(), &[1.0; 3]).unwrap_err();
        assert!(matches!(err, ConvError::Shape { .. }));
        assert_eq!(kernel.cache_state(), CacheState::Unbound);
    }

    #[test]
    fn test_concurrent_first_calls_bind_once() {
        let kernel = BinaryKernel::default();
        let geometry = ConvGeometry::new(8, 16, 3);
        let weights: Vec<f32> = (0..16 * 8 * 9).map(|i| (i as f32 * 0.37).sin()).collect();

        let bound: Vec<Arc<BinarizedWeights>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| kernel.bind(&geometry, &weights).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for b in &bound[1..] {
            assert!(Arc::ptr_eq(&bound[0], b));
        }
    }

    #[test]
    fn test_grouped_forward_uses_group_slices() {
        // Two groups, one channel and one output each; a 1x1 kernel copies signs
        let kernel = BinaryKernel::new(GemmStrategy::Baseline);
        let geometry = ConvGeometry::new(2, 2, 1).with_group(2);
        let weights = [1.0, -3.0];
        let input = [1.0, -1.0, 2.0, 2.0];
        let mut output = [0.0f32; 4];

        kernel
            .forward_sample(&geometry, &weights, &input, 1, 2, &mut output)
            .unwrap();

        assert_eq!(output, [1.0, -1.0, -3.0, -3.0]);
    }

    #[test]
    fn test_empty_plane_reads_as_padding() {
        // Zero-height input with pad 1: every tap is padding, so every bit is 1
        let kernel = BinaryKernel::new(GemmStrategy::Baseline);
        let geometry = ConvGeometry::new(1, 1, 1).with_pad(1);
        let mut output = [f32::NAN; 6];

        kernel
            .forward_sample(&geometry, &[1.0], &[], 0, 1, &mut output)
            .unwrap();
        assert_eq!(output, [1.0; 6]);

        let patches = kernel.binarize_input(&geometry, &[], 0, 1).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].rows(), 6);
    }

    #[test]
    fn test_forward_output_length_checked() {
        let kernel = BinaryKernel::default();
        let mut output = [0.0f32; 3];
        let err = kernel
            .forward_sample(&cross_filter_geometry(), &[1.0; 4], &[1.0; 9], 3, 3, &mut output)
            .unwrap_err();
        assert!(matches!(err, ConvError::Shape { what: "output sample", .. }));
    }
}
