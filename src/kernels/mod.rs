//! Convolution kernels.
//!
//! Every kernel implements [`ConvolutionKernel`]: convolve one `[C, H, W]`
//! sample into `[num_output, out_h * out_w]`, without bias. The engine picks
//! one [`KernelKind`] at construction.
//!
//! ## Variants
//! - [`BinaryKernel`]: XNOR + popcount over sign-packed operands
//! - [`ReferenceKernel`]: exact full-precision direct convolution

pub mod geometry;
pub mod reference;
pub mod xnor;

use serde::{Deserialize, Serialize};

pub use geometry::{output_dim, ConvGeometry, NUM_SPATIAL_AXES};
pub use reference::ReferenceKernel;
pub use xnor::{BinaryKernel, CacheState, GemmStrategy, TileConfig};

use crate::error::{ConvError, Result};

/// Capability shared by all convolution implementations.
pub trait ConvolutionKernel: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Convolve one sample without bias.
    ///
    /// # Arguments
    /// * `geometry` - Validated convolution geometry
    /// * `weights` - Filters `[num_output, channels / group, kh, kw]`
    /// * `input` - Sample `[channels, height, width]`
    /// * `output` - Destination `[num_output, out_h, out_w]`
    fn forward_sample(
        &self,
        geometry: &ConvGeometry,
        weights: &[f32],
        input: &[f32],
        height: usize,
        width: usize,
        output: &mut [f32],
    ) -> Result<()>;

    /// Gradient computation. No kernel supports it.
    fn backward_sample(
        &self,
        _geometry: &ConvGeometry,
        _weights: &[f32],
        _input: &[f32],
        _output_diff: &[f32],
    ) -> Result<Vec<f32>> {
        Err(ConvError::NotImplemented("backward pass of binarized convolution"))
    }

    /// Drop any state derived from the weights.
    fn invalidate_weight_cache(&mut self) {}
}

/// Kernel selector for configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    #[default]
    Binary,
    Reference,
}

/// The kernel an engine runs, chosen at construction.
#[derive(Debug)]
pub enum KernelKind {
    Binary(BinaryKernel),
    Reference(ReferenceKernel),
}

impl KernelKind {
    pub fn new(kernel_type: KernelType, strategy: GemmStrategy) -> Self {
        match kernel_type {
            KernelType::Binary => Self::Binary(BinaryKernel::new(strategy)),
            KernelType::Reference => Self::Reference(ReferenceKernel),
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryKernel> {
        match self {
            Self::Binary(kernel) => Some(kernel),
            Self::Reference(_) => None,
        }
    }

    fn inner(&self) -> &dyn ConvolutionKernel {
        match self {
            Self::Binary(kernel) => kernel,
            Self::Reference(kernel) => kernel,
        }
    }
}

impl ConvolutionKernel for KernelKind {
    fn name(&self) -> &'static str {
        self.inner().name()
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
        self.inner()
            .forward_sample(geometry, weights, input, height, width, output)
    }

    fn backward_sample(
        &self,
        geometry: &ConvGeometry,
        weights: &[f32],
        input: &[f32],
        output_diff: &[f32],
    ) -> Result<Vec<f32>> {
        self.inner()
            .backward_sample(geometry, weights, input, output_diff)
    }

    fn invalidate_weight_cache(&mut self) {
        match self {
            Self::Binary(kernel) => kernel.invalidate_weight_cache(),
            Self::Reference(kernel) => kernel.invalidate_weight_cache(),
        }
    }
}
