//! Fused im2col + sign binarization.
//!
//! Produces one row of K sign bits per output position directly from the
//! activation planes, without materializing a floating-point column buffer.
//! Bit order within a row is `(channel, kernel_row, kernel_col)`, the same
//! order the filters are flattened in, so weight and patch words line up for
//! the XNOR.
//!
//! Out-of-bounds taps read as 0.0, and 0.0 binarizes to 1 like any other
//! non-negative value.

use rayon::prelude::*;

use super::bit_tensor::{sign_bit, BitTensor};
use super::types::WORD_BITS;
use crate::error::{ConvError, Result};
use crate::kernels::geometry::ConvGeometry;

/// Binarize the receptive fields of a single sample.
///
/// `input` holds `channels` planes of `height x width` values. The result has
/// `out_h * out_w` rows of `channels * kh * kw` bits.
pub fn binarize_patches(
    input: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    geometry: &ConvGeometry,
) -> Result<BitTensor> {
    let expected = channels * height * width;
    if input.len() != expected {
        return Err(ConvError::shape(
            "input sample",
            format!("{} ({} x {} x {})", expected, channels, height, width),
            input.len(),
        ));
    }

    if geometry.is_1x1() {
        Ok(binarize_pointwise(input, channels, height * width))
    } else {
        binarize_general(input, channels, height, width, geometry)
    }
}

/// 1x1 / stride 1 / no pad: row `p` is the channel vector at position `p`.
fn binarize_pointwise(input: &[f32], channels: usize, spatial: usize) -> BitTensor {
    let mut patches = BitTensor::zeros(spatial, channels);
    let words_per_row = patches.words_per_row();
    if words_per_row == 0 {
        return patches;
    }

    patches
        .words_mut()
        .par_chunks_exact_mut(words_per_row)
        .enumerate()
        .for_each(|(p, row)| {
            for c in 0..channels {
                row[c / WORD_BITS] |= sign_bit(input[c * spatial + p]) << (c % WORD_BITS);
            }
        });
    patches
}

pub(crate) fn binarize_general(
    input: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    geometry: &ConvGeometry,
) -> Result<BitTensor> {
    let [out_h, out_w] = geometry.output_spatial(height, width)?;
    let [kh, kw] = geometry.kernel;
    let [sh, sw] = geometry.stride;
    let [ph, pw] = geometry.pad;
    let [dh, dw] = geometry.dilation;
    let kernel_dim = channels * kh * kw;
    let plane = height * width;

    let mut patches = BitTensor::zeros(out_h * out_w, kernel_dim);
    let words_per_row = patches.words_per_row();
    if words_per_row == 0 {
        return Ok(patches);
    }

    patches
        .words_mut()
        .par_chunks_exact_mut(words_per_row)
        .enumerate()
        .for_each(|(p, row)| {
            let (oh, ow) = (p / out_w, p % out_w);
            let mut k = 0;
            for c in 0..channels {
                let channel = &input[c * plane..(c + 1) * plane];
                for ki in 0..kh {
                    let ih = (oh * sh + ki * dh) as isize - ph as isize;
                    let row_inside = ih >= 0 && (ih as usize) < height;
                    for kj in 0..kw {
                        let iw = (ow * sw + kj * dw) as isize - pw as isize;
                        let value = if row_inside && iw >= 0 && (iw as usize) < width {
                            channel[ih as usize * width + iw as usize]
                        } else {
                            0.0
                        };
                        row[k / WORD_BITS] |= sign_bit(value) << (k % WORD_BITS);
                        k += 1;
                    }
                }
            }
        });

    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    /// Dense im2col followed by packing, for comparison.
    fn reference_patches(
        input: &[f32],
        channels: usize,
        height: usize,
        width: usize,
        geometry: &ConvGeometry,
    ) -> BitTensor {
        let [out_h, out_w] = geometry.output_spatial(height, width).unwrap();
        let [kh, kw] = geometry.kernel;
        let mut columns = Vec::new();
        for oh in 0..out_h {
            for ow in 0..out_w {
                for c in 0..channels {
                    for ki in 0..kh {
                        for kj in 0..kw {
                            let ih = (oh * geometry.stride[0] + ki * geometry.dilation[0]) as isize
                                - geometry.pad[0] as isize;
                            let iw = (ow * geometry.stride[1] + kj * geometry.dilation[1]) as isize
                                - geometry.pad[1] as isize;
                            let inside = ih >= 0
                                && iw >= 0
                                && (ih as usize) < height
                                && (iw as usize) < width;
                            columns.push(if inside {
                                input[(c * height + ih as usize) * width + iw as usize]
                            } else {
                                0.0
                            });
                        }
                    }
                }
            }
        }
        BitTensor::pack(&columns, channels * kh * kw).unwrap()
    }

    fn random_input(n: usize, seed: u64) -> Vec<f32> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    #[test]
    fn test_patches_3x3_input_2x2_kernel() {
        let input = [1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0];
        let geometry = ConvGeometry::new(1, 1, 2);
        let patches = binarize_patches(&input, 1, 3, 3, &geometry).unwrap();

        assert_eq!(patches.rows(), 4);
        assert_eq!(patches.len(), 4);
        assert_eq!(patches.word_at(0, 0), 0b0111);
        assert_eq!(patches.word_at(1, 0), 0b1011);
        assert_eq!(patches.word_at(2, 0), 0b1101);
        assert_eq!(patches.word_at(3, 0), 0b1110);
    }

    #[test]
    fn test_padding_binarizes_to_one() {
        // All-negative input: only the padded taps may be set
        let input = vec![-1.0f32; 2 * 2];
        let geometry = ConvGeometry::new(1, 1, 3).with_pad(1);
        let patches = binarize_patches(&input, 1, 2, 2, &geometry).unwrap();

        assert_eq!(patches.rows(), 4);
        // Position (0,0): taps at kernel row 0 and kernel col 0 fall in padding
        for k in 0..9 {
            let (ki, kj) = (k / 3, k % 3);
            let padded = ki == 0 || kj == 0;
            assert_eq!(patches.bit(0, k), padded, "tap {}", k);
        }
        // 5 padded taps per corner position
        for p in 0..4 {
            assert_eq!(patches.word_at(p, 0).count_ones(), 5);
        }
    }

    #[test]
    fn test_matches_dense_im2col() {
        let cases = [
            (3, 7, 6, ConvGeometry::new(3, 1, 3)),
            (2, 9, 9, ConvGeometry::new(2, 1, 3).with_stride(2).with_pad(1)),
            (4, 8, 7, ConvGeometry::new(4, 1, 2).with_dilation(2).with_pad(2)),
            (30, 5, 5, ConvGeometry::new(30, 1, 3).with_pad(1)),
        ];
        for (i, (channels, height, width, geometry)) in cases.into_iter().enumerate() {
            let input = random_input(channels * height * width, i as u64);
            let fused = binarize_patches(&input, channels, height, width, &geometry).unwrap();
            let dense = reference_patches(&input, channels, height, width, &geometry);
            assert_eq!(fused, dense, "case {}", i);
        }
    }

    #[test]
    fn test_pointwise_path_matches_general() {
        let (channels, height, width) = (70, 20, 15);
        let input = random_input(channels * height * width, 42);
        let geometry = ConvGeometry::new(channels, 1, 1);
        assert!(geometry.is_1x1());

        let pointwise = binarize_patches(&input, channels, height, width, &geometry).unwrap();
        let general = binarize_general(&input, channels, height, width, &geometry).unwrap();
        assert_eq!(pointwise, general);
        assert_eq!(pointwise.padding_bits(), 128 - 70);
    }

    #[test]
    fn test_tail_bits_stay_zero() {
        let input = vec![0.5f32; 3 * 4 * 4];
        let geometry = ConvGeometry::new(3, 1, 3).with_pad(1);
        let patches = binarize_patches(&input, 3, 4, 4, &geometry).unwrap();
        for p in 0..patches.rows() {
            assert_eq!(patches.word_at(p, 0), (1u64 << 27) - 1);
        }
    }

    #[test]
    fn test_input_length_mismatch() {
        let geometry = ConvGeometry::new(1, 1, 2);
        let err = binarize_patches(&[1.0; 8], 1, 3, 3, &geometry).unwrap_err();
        assert!(matches!(err, ConvError::Shape { what: "input sample", .. }));
    }
}
