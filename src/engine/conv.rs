//! Binarized convolution engine.
//!
//! Owns the real-valued weights and bias, the validated geometry and the
//! kernel. With the binary kernel, the filters are binarized on the first
//! forward call and cached until the weights change.

use std::sync::Arc;

use rand::SeedableRng;

use super::config::ConvParams;
use crate::error::{ConvError, Result};
use crate::kernels::xnor::{add_bias, popcount_backend, BinarizedWeights, BitTensor};
use crate::kernels::{CacheState, ConvGeometry, ConvolutionKernel, KernelKind};

/// Dense NCHW tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl FeatureMap {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ConvError::shape(
                "feature map",
                format!("{} ({:?})", expected, shape),
                data.len(),
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: [usize; 4]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn num(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Values of sample `n`, `[C, H, W]`.
    pub fn sample(&self, n: usize) -> &[f32] {
        let len = self.shape[1] * self.shape[2] * self.shape[3];
        &self.data[n * len..(n + 1) * len]
    }
}

/// XNOR-Net convolution layer.
#[derive(Debug)]
pub struct ConvolutionEngine {
    geometry: ConvGeometry,
    weights: Vec<f32>,
    bias: Option<Vec<f32>>,
    kernel: KernelKind,
}

impl ConvolutionEngine {
    /// Create an engine whose weights and bias come from the configured fillers.
    pub fn new(params: &ConvParams, channels: usize) -> Result<Self> {
        let geometry = params.geometry(channels)?;
        let mut rng = rand::rngs::StdRng::seed_from_u64(params.seed);

        let fan_in = geometry.kernel_dim();
        let mut weights = vec![0.0f32; geometry.num_output * fan_in];
        params.weight_filler.fill(&mut weights, fan_in, &mut rng)?;

        let bias = if geometry.bias_term {
            let mut bias = vec![0.0f32; geometry.num_output];
            params.bias_filler.fill(&mut bias, fan_in, &mut rng)?;
            Some(bias)
        } else {
            None
        };

        let kernel = KernelKind::new(params.kernel, params.strategy);
        Self::from_parts(geometry, weights, bias, kernel)
    }

    /// Create an engine with explicit weights `[num_output, channels / group, kh, kw]`
    /// and bias `[num_output]` (required exactly when `bias_term` is set).
    pub fn with_parameters(
        params: &ConvParams,
        channels: usize,
        weights: Vec<f32>,
        bias: Option<Vec<f32>>,
    ) -> Result<Self> {
        let geometry = params.geometry(channels)?;
        let kernel = KernelKind::new(params.kernel, params.strategy);
        Self::from_parts(geometry, weights, bias, kernel)
    }

    /// Assemble an engine from an already validated geometry and a kernel.
    pub fn from_parts(
        geometry: ConvGeometry,
        weights: Vec<f32>,
        bias: Option<Vec<f32>>,
        kernel: KernelKind,
    ) -> Result<Self> {
        geometry.validate()?;
        check_weight_shape(&geometry, &weights)?;
        match (&bias, geometry.bias_term) {
            (Some(b), true) => check_bias_shape(&geometry, b)?,
            (None, false) => {}
            (Some(_), false) => {
                return Err(ConvError::config("bias given but bias_term is disabled"))
            }
            (None, true) => return Err(ConvError::config("bias_term is enabled but no bias given")),
        }

        tracing::info!(
            "Convolution engine: {} -> {} channels, kernel {:?}, stride {:?}, pad {:?}, \
             dilation {:?}, group {}, kernel impl {} (CPU: {})",
            geometry.channels,
            geometry.num_output,
            geometry.kernel,
            geometry.stride,
            geometry.pad,
            geometry.dilation,
            geometry.group,
            kernel.name(),
            popcount_backend(),
        );

        Ok(Self {
            geometry,
            weights,
            bias,
            kernel,
        })
    }

    pub fn geometry(&self) -> &ConvGeometry {
        &self.geometry
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn bias(&self) -> Option<&[f32]> {
        self.bias.as_deref()
    }

    pub fn kernel(&self) -> &KernelKind {
        &self.kernel
    }

    /// Binary weight cache state; `None` for kernels without a cache.
    pub fn cache_state(&self) -> Option<CacheState> {
        self.kernel.as_binary().map(|k| k.cache_state())
    }

    /// Cached binary weights and alpha, once bound.
    pub fn binarized_weights(&self) -> Option<Arc<BinarizedWeights>> {
        self.kernel.as_binary().and_then(|k| k.binarized_weights())
    }

    /// Output shape `[N, num_output, out_h, out_w]` for an NCHW input shape.
    pub fn output_shape(&self, input_shape: [usize; 4]) -> Result<[usize; 4]> {
        let [num, channels, height, width] = input_shape;
        if channels != self.geometry.channels {
            return Err(ConvError::shape(
                "input channels (input size incompatible with convolution kernel)",
                self.geometry.channels,
                channels,
            ));
        }
        if height == 0 || width == 0 {
            return Err(ConvError::shape("input spatial size", "> 0", format!("{}x{}", height, width)));
        }
        let [out_h, out_w] = self.geometry.output_spatial(height, width)?;
        Ok([num, self.geometry.num_output, out_h, out_w])
    }

    /// Convolve a batch.
    pub fn forward(&self, input: &FeatureMap) -> Result<FeatureMap> {
        let out_shape = self.output_shape(input.shape())?;
        let mut output = FeatureMap::zeros(out_shape);
        let spatial = out_shape[2] * out_shape[3];
        let top_dim = out_shape[1] * spatial;
        if top_dim == 0 {
            return Ok(output);
        }

        for (n, out) in output.data.chunks_exact_mut(top_dim).enumerate() {
            tracing::trace!("Forward sample {} through {} kernel", n, self.kernel.name());
            self.kernel.forward_sample(
                &self.geometry,
                &self.weights,
                input.sample(n),
                input.height(),
                input.width(),
                out,
            )?;
            if let Some(bias) = &self.bias {
                add_bias(out, bias, spatial);
            }
        }
        Ok(output)
    }

    /// Gradient pass. Always fails: binarized convolution is inference-only.
    pub fn backward(&self, input: &FeatureMap, output_diff: &FeatureMap) -> Result<FeatureMap> {
        let diff = self.kernel.backward_sample(
            &self.geometry,
            &self.weights,
            input.data(),
            output_diff.data(),
        )?;
        FeatureMap::new(input.shape(), diff)
    }

    /// Binarized receptive fields of sample `n`, one tensor per group.
    pub fn binarize_input(&self, input: &FeatureMap, n: usize) -> Result<Vec<BitTensor>> {
        self.output_shape(input.shape())?;
        if n >= input.num() {
            return Err(ConvError::shape("sample index", format!("< {}", input.num()), n));
        }
        match self.kernel.as_binary() {
            Some(kernel) => {
                kernel.binarize_input(&self.geometry, input.sample(n), input.height(), input.width())
            }
            None => Err(ConvError::config("the reference kernel does not binarize inputs")),
        }
    }

    /// Replace the weights and drop the binary weight cache.
    pub fn set_weights(&mut self, weights: Vec<f32>) -> Result<()> {
        check_weight_shape(&self.geometry, &weights)?;
        self.weights = weights;
        self.invalidate_weight_cache();
        Ok(())
    }

    /// Replace the bias.
    pub fn set_bias(&mut self, bias: Vec<f32>) -> Result<()> {
        if !self.geometry.bias_term {
            return Err(ConvError::config("bias_term is disabled"));
        }
        check_bias_shape(&self.geometry, &bias)?;
        self.bias = Some(bias);
        Ok(())
    }

    /// Force re-binarization on the next forward call.
    ///
    /// Call this after mutating the weights through any path other than
    /// [`set_weights`](Self::set_weights).
    pub fn invalidate_weight_cache(&mut self) {
        self.kernel.invalidate_weight_cache();
    }
}

fn check_weight_shape(geometry: &ConvGeometry, weights: &[f32]) -> Result<()> {
    let expected = geometry.num_output * geometry.kernel_dim();
    if weights.len() != expected {
        return Err(ConvError::shape(
            "weights (incorrect weight shape)",
            format!("{} {:?}", expected, geometry.weight_shape()),
            weights.len(),
        ));
    }
    Ok(())
}

fn check_bias_shape(geometry: &ConvGeometry, bias: &[f32]) -> Result<()> {
    if bias.len() != geometry.num_output {
        return Err(ConvError::shape(
            "bias (incorrect bias shape)",
            geometry.num_output,
            bias.len(),
        ));
    }
    Ok(())
}
