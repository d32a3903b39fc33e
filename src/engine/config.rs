//! Convolution layer configuration.
//!
//! `ConvParams` is the user-facing description of a layer: sizes given once for
//! every spatial axis or once per axis, optional `*_h`/`*_w` forms, fillers and
//! kernel selection. [`ConvParams::geometry`] validates it into an immutable
//! [`ConvGeometry`].

use serde::{Deserialize, Serialize};

use super::filler::FillerConfig;
use crate::error::{ConvError, Result};
use crate::kernels::{ConvGeometry, GemmStrategy, KernelType, NUM_SPATIAL_AXES};

/// Configuration of a binarized convolution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvParams {
    /// Output channels (required, positive)
    pub num_output: usize,
    /// Add a learned per-channel bias
    pub bias_term: bool,
    /// Channel groups
    pub group: usize,
    /// Kernel size, once or per spatial axis
    pub kernel_size: Vec<usize>,
    pub kernel_h: Option<usize>,
    pub kernel_w: Option<usize>,
    /// Stride, once or per spatial axis (default 1)
    pub stride: Vec<usize>,
    pub stride_h: Option<usize>,
    pub stride_w: Option<usize>,
    /// Zero padding, once or per spatial axis (default 0)
    pub pad: Vec<usize>,
    pub pad_h: Option<usize>,
    pub pad_w: Option<usize>,
    /// Dilation, once or per spatial axis (default 1)
    pub dilation: Vec<usize>,
    pub weight_filler: FillerConfig,
    pub bias_filler: FillerConfig,
    /// Seed for the fillers
    pub seed: u64,
    pub kernel: KernelType,
    pub strategy: GemmStrategy,
}

impl Default for ConvParams {
    fn default() -> Self {
        Self {
            num_output: 0,
            bias_term: true,
            group: 1,
            kernel_size: Vec::new(),
            kernel_h: None,
            kernel_w: None,
            stride: Vec::new(),
            stride_h: None,
            stride_w: None,
            pad: Vec::new(),
            pad_h: None,
            pad_w: None,
            dilation: Vec::new(),
            weight_filler: FillerConfig::default(),
            bias_filler: FillerConfig::default(),
            seed: 0,
            kernel: KernelType::default(),
            strategy: GemmStrategy::default(),
        }
    }
}

impl ConvParams {
    /// Square kernel, everything else at defaults.
    pub fn new(num_output: usize, kernel_size: usize) -> Self {
        Self {
            num_output,
            kernel_size: vec![kernel_size],
            ..Default::default()
        }
    }

    /// Parse a TOML table.
    ///
    /// # Example
    /// ```ignore
    /// let params = ConvParams::from_toml_str(r#"
    ///     num_output = 64
    ///     kernel_size = [3]
    ///     pad = [1]
    ///     strategy = "baseline"
    /// "#)?;
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ConvError::config(format!("failed to parse TOML: {}", e)))
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = vec![stride];
        self
    }

    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = vec![pad];
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = vec![dilation];
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn with_bias_term(mut self, bias_term: bool) -> Self {
        self.bias_term = bias_term;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelType) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_strategy(mut self, strategy: GemmStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_weight_filler(mut self, filler: FillerConfig) -> Self {
        self.weight_filler = filler;
        self
    }

    pub fn with_bias_filler(mut self, filler: FillerConfig) -> Self {
        self.bias_filler = filler;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate against an input with `channels` channels.
    pub fn geometry(&self, channels: usize) -> Result<ConvGeometry> {
        let kernel = resolve_axes(
            "kernel_size",
            &self.kernel_size,
            (self.kernel_h, self.kernel_w),
            None,
            None,
        )?;
        let stride = resolve_axes("stride", &self.stride, (self.stride_h, self.stride_w), Some(1), None)?;
        // A lone pad_h or pad_w leaves the other side unpadded
        let pad = resolve_axes("pad", &self.pad, (self.pad_h, self.pad_w), Some(0), Some(0))?;
        let dilation = resolve_axes("dilation", &self.dilation, (None, None), Some(1), None)?;

        let geometry = ConvGeometry {
            channels,
            num_output: self.num_output,
            group: self.group,
            kernel,
            stride,
            pad,
            dilation,
            bias_term: self.bias_term,
        };
        geometry.validate()?;
        Ok(geometry)
    }
}

/// Expand a per-axis setting given as a list or as an `_h`/`_w` pair.
///
/// `default` applies when nothing is given; `missing_side` fills the absent
/// half of an incomplete `_h`/`_w` pair, which is an error when `None`.
fn resolve_axes(
    name: &str,
    values: &[usize],
    (h, w): (Option<usize>, Option<usize>),
    default: Option<usize>,
    missing_side: Option<usize>,
) -> Result<[usize; NUM_SPATIAL_AXES]> {
    if h.is_some() || w.is_some() {
        if !values.is_empty() {
            return Err(ConvError::config(format!(
                "Either {name} or {name}_h/w should be specified; not both."
            )));
        }
        return match (h.or(missing_side), w.or(missing_side)) {
            (Some(h), Some(w)) => Ok([h, w]),
            _ => Err(ConvError::config(format!(
                "{name}_h and {name}_w must be specified together"
            ))),
        };
    }

    match values {
        [] => default
            .map(|d| [d; NUM_SPATIAL_AXES])
            .ok_or_else(|| ConvError::config(format!("{name} must be specified"))),
        [v] => Ok([*v; NUM_SPATIAL_AXES]),
        [vh, vw] => Ok([*vh, *vw]),
        _ => Err(ConvError::config(format!(
            "{name} must be specified once, or once per spatial dimension \
             ({name} specified {} times; {} spatial dims)",
            values.len(),
            NUM_SPATIAL_AXES
        ))),
    }
}
