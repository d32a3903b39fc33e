//! XNOR-Net binarized 2-D convolution.
//!
//! Both operands of the convolution are reduced to their signs and packed
//! 64 to a word; inner products become XNOR + popcount, scaled by the mean
//! absolute value of each filter.
//!
//! ## Pipeline
//! 1. Filters are binarized once (sign bits + per-channel alpha) and cached
//! 2. Each input sample is unrolled into receptive fields and binarized in one pass
//! 3. An XNOR GEMM produces `alpha[c] * (matches - mismatches)` per output cell
//! 4. The per-channel bias is broadcast over the output
//!
//! ```ignore
//! use xnor_conv::{ConvParams, ConvolutionEngine, FeatureMap};
//!
//! let params = ConvParams::new(16, 3).with_pad(1);
//! let engine = ConvolutionEngine::new(&params, 3)?;
//! let output = engine.forward(&FeatureMap::zeros([1, 3, 32, 32]))?;
//! ```

pub mod engine;
pub mod error;
pub mod kernels;

pub use engine::{ConvParams, ConvolutionEngine, FeatureMap, FillerConfig};
pub use error::{ConvError, Result};
pub use kernels::xnor::{BinarizedWeights, BitTensor};
pub use kernels::{CacheState, ConvGeometry, ConvolutionKernel, GemmStrategy, KernelType, TileConfig};
