//! Full-precision direct convolution.
//!
//! Same geometry contract as the binary kernel; padded taps contribute
//! nothing. Used to cross-check the XNOR path and as a drop-in exact kernel.

use super::geometry::ConvGeometry;
use super::ConvolutionKernel;
use crate::error::{ConvError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceKernel;

impl ConvolutionKernel for ReferenceKernel {
    fn name(&self) -> &'static str {
        "reference"
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
        let [out_h, out_w] = geometry.output_spatial(height, width)?;
        let [kh, kw] = geometry.kernel;
        let ic_per_group = geometry.channels_per_group();
        let oc_per_group = geometry.outputs_per_group();

        if weights.len() != geometry.num_output * geometry.kernel_dim() {
            return Err(ConvError::shape(
                "weights",
                geometry.num_output * geometry.kernel_dim(),
                weights.len(),
            ));
        }
        if input.len() != geometry.channels * height * width {
            return Err(ConvError::shape(
                "input sample",
                geometry.channels * height * width,
                input.len(),
            ));
        }
        if output.len() != geometry.num_output * out_h * out_w {
            return Err(ConvError::shape(
                "output sample",
                geometry.num_output * out_h * out_w,
                output.len(),
            ));
        }

        for g in 0..geometry.group {
            for oc in 0..oc_per_group {
                let abs_oc = g * oc_per_group + oc;
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = 0.0f32;
                        for ic in 0..ic_per_group {
                            let abs_ic = g * ic_per_group + ic;
                            for ki in 0..kh {
                                let ih = (oh * geometry.stride[0] + ki * geometry.dilation[0])
                                    as isize
                                    - geometry.pad[0] as isize;
                                if ih < 0 || ih as usize >= height {
                                    continue;
                                }
                                for kj in 0..kw {
                                    let iw = (ow * geometry.stride[1] + kj * geometry.dilation[1])
                                        as isize
                                        - geometry.pad[1] as isize;
                                    if iw < 0 || iw as usize >= width {
                                        continue;
                                    }
                                    let in_idx =
                                        (abs_ic * height + ih as usize) * width + iw as usize;
                                    let w_idx = ((abs_oc * ic_per_group + ic) * kh + ki) * kw + kj;
                                    sum += input[in_idx] * weights[w_idx];
                                }
                            }
                        }
                        output[(abs_oc * out_h + oh) * out_w + ow] = sum;
                    }
                }
            }
        }
        Ok(())
    }
}
