//! Convolution geometry shared by the binary and reference kernels.

use crate::error::{ConvError, Result};

/// Number of spatial axes supported by the kernels (height, width).
pub const NUM_SPATIAL_AXES: usize = 2;

/// Output size of one spatial axis.
///
/// `floor((input + 2*pad - dilation*(kernel-1) - 1) / stride) + 1`, rejected
/// when the padded input is smaller than the dilated kernel.
pub fn output_dim(
    input: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
    dilation: usize,
) -> Result<usize> {
    if kernel == 0 || stride == 0 || dilation == 0 {
        return Err(ConvError::config(format!(
            "kernel ({}), stride ({}) and dilation ({}) must be nonzero",
            kernel, stride, dilation
        )));
    }
    let extent = dilation * (kernel - 1) + 1;
    let padded = input + 2 * pad;
    if padded < extent {
        return Err(ConvError::config(format!(
            "padded input {} is smaller than kernel extent {}",
            padded, extent
        )));
    }
    Ok((padded - extent) / stride + 1)
}

/// Immutable convolution geometry, validated once at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Input channels.
    pub channels: usize,
    /// Output channels.
    pub num_output: usize,
    /// Group count; channels and outputs are split evenly between groups.
    pub group: usize,
    /// Kernel size `[h, w]`.
    pub kernel: [usize; NUM_SPATIAL_AXES],
    /// Stride `[h, w]`.
    pub stride: [usize; NUM_SPATIAL_AXES],
    /// Zero padding `[h, w]`, applied on both sides.
    pub pad: [usize; NUM_SPATIAL_AXES],
    /// Dilation `[h, w]`.
    pub dilation: [usize; NUM_SPATIAL_AXES],
    /// Whether a per-channel bias is added.
    pub bias_term: bool,
}

impl ConvGeometry {
    /// Square kernel with unit stride, no padding, no dilation, one group and bias.
    pub fn new(channels: usize, num_output: usize, kernel_size: usize) -> Self {
        Self {
            channels,
            num_output,
            group: 1,
            kernel: [kernel_size; NUM_SPATIAL_AXES],
            stride: [1; NUM_SPATIAL_AXES],
            pad: [0; NUM_SPATIAL_AXES],
            dilation: [1; NUM_SPATIAL_AXES],
            bias_term: true,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = [stride; NUM_SPATIAL_AXES];
        self
    }

    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = [pad; NUM_SPATIAL_AXES];
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = [dilation; NUM_SPATIAL_AXES];
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn with_bias(mut self, bias_term: bool) -> Self {
        self.bias_term = bias_term;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(ConvError::config("channels must be positive"));
        }
        if self.num_output == 0 {
            return Err(ConvError::config("num_output must be positive"));
        }
        if self.kernel.contains(&0) {
            return Err(ConvError::config("Filter dimensions must be nonzero"));
        }
        if self.stride.contains(&0) {
            return Err(ConvError::config("Stride dimensions must be nonzero"));
        }
        if self.dilation.contains(&0) {
            return Err(ConvError::config("Dilation dimensions must be nonzero"));
        }
        if self.group == 0 {
            return Err(ConvError::config("group must be positive"));
        }
        if self.channels % self.group != 0 {
            return Err(ConvError::config(format!(
                "channels ({}) must be a multiple of group ({})",
                self.channels, self.group
            )));
        }
        if self.num_output % self.group != 0 {
            return Err(ConvError::config(format!(
                "Number of output ({}) should be multiples of group ({})",
                self.num_output, self.group
            )));
        }
        Ok(())
    }

    pub fn channels_per_group(&self) -> usize {
        self.channels / self.group
    }

    pub fn outputs_per_group(&self) -> usize {
        self.num_output / self.group
    }

    /// Filter length K = input channels per group x kernel area.
    pub fn kernel_dim(&self) -> usize {
        self.channels_per_group() * self.kernel[0] * self.kernel[1]
    }

    /// Weight tensor shape `[num_output, channels / group, kh, kw]`.
    pub fn weight_shape(&self) -> [usize; 4] {
        [
            self.num_output,
            self.channels_per_group(),
            self.kernel[0],
            self.kernel[1],
        ]
    }

    /// Kernel 1x1 with unit stride and no padding: patch extraction is the identity.
    pub fn is_1x1(&self) -> bool {
        (0..NUM_SPATIAL_AXES)
            .all(|i| self.kernel[i] == 1 && self.stride[i] == 1 && self.pad[i] == 0)
    }

    /// Output `[h, w]` for an `[h, w]` input.
    pub fn output_spatial(&self, height: usize, width: usize) -> Result<[usize; 2]> {
        let out_h = output_dim(height, self.kernel[0], self.stride[0], self.pad[0], self.dilation[0])?;
        let out_w = output_dim(width, self.kernel[1], self.stride[1], self.pad[1], self.dilation[1])?;
        Ok([out_h, out_w])
    }
}
