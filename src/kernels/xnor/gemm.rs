//! Tiled XNOR GEMM with Rayon parallelization.
//!
//! Implements: output = alpha * (2 * popcount(XNOR(weights, patches)) - K)
//! Where both operands are packed sign bits with K bits per row.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::gemm_scalar::{check_operands, xnor_gemm_baseline};
use super::types::{TileConfig, Word, WORD_BITS};

/// XNOR dot product with the popcount loop unrolled by four words.
///
/// Integer accumulation, so the result is identical to
/// [`xnor_dot`](super::gemm_scalar::xnor_dot).
#[inline]
pub fn xnor_dot_unrolled(a: &[Word], b: &[Word], k: usize) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    let padding = a.len() * WORD_BITS - k;

    let mut acc = [0u32; 4];
    let mut a_chunks = a.chunks_exact(4);
    let mut b_chunks = b.chunks_exact(4);
    for (wa, wb) in a_chunks.by_ref().zip(b_chunks.by_ref()) {
        acc[0] += (!(wa[0] ^ wb[0])).count_ones();
        acc[1] += (!(wa[1] ^ wb[1])).count_ones();
        acc[2] += (!(wa[2] ^ wb[2])).count_ones();
        acc[3] += (!(wa[3] ^ wb[3])).count_ones();
    }
    let mut matches = acc[0] + acc[1] + acc[2] + acc[3];
    for (&wa, &wb) in a_chunks.remainder().iter().zip(b_chunks.remainder()) {
        matches += (!(wa ^ wb)).count_ones();
    }

    2 * (matches as i32 - padding as i32) - k as i32
}

/// Parallel XNOR GEMM over (channel block x position block) tiles.
///
/// Same arguments and layout as
/// [`xnor_gemm_baseline`](super::gemm_scalar::xnor_gemm_baseline). The output
/// is cut into tiles of `tile.bm` channels by `tile.bn` positions and every
/// tile is an independent Rayon task. Every output cell is written by exactly
/// one task, so results do not depend on the partitioning.
#[allow(clippy::too_many_arguments)]
pub fn xnor_gemm_tiled(
    m: usize,
    n: usize,
    k: usize,
    weights: &[Word],
    alpha: &[f32],
    patches: &[Word],
    output: &mut [f32],
    tile: &TileConfig,
) {
    let words = k.div_ceil(WORD_BITS);
    check_operands(m, n, words, weights, alpha, patches, output);
    if m == 0 || n == 0 {
        return;
    }

    let TileConfig { bm, bn } = tile.normalized();
    let position_blocks = n.div_ceil(bn);

    // Each tile owns one `bn`-wide slice of each of its `bm` output rows
    let mut tiles: Vec<(usize, usize, Vec<&mut [f32]>)> =
        Vec::with_capacity(m.div_ceil(bm) * position_blocks);
    for (block, out_block) in output[..m * n].chunks_mut(bm * n).enumerate() {
        let mut rows: Vec<_> = out_block.chunks_mut(n).map(|row| row.chunks_mut(bn)).collect();
        for pb in 0..position_blocks {
            let cells: Vec<&mut [f32]> = rows.iter_mut().filter_map(Iterator::next).collect();
            tiles.push((block * bm, pb * bn, cells));
        }
    }

    tiles.into_par_iter().for_each(|(c0, p0, rows)| {
        for (r, out) in rows.into_iter().enumerate() {
            let c = c0 + r;
            let w_row = &weights[c * words..(c + 1) * words];
            for (j, cell) in out.iter_mut().enumerate() {
                let p = p0 + j;
                let x_row = &patches[p * words..(p + 1) * words];
                *cell = alpha[c] * xnor_dot_unrolled(w_row, x_row, k) as f32;
            }
        }
    });
}

/// Runtime-selectable XNOR GEMM implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GemmStrategy {
    /// Single-threaded scalar loop.
    Baseline,
    /// Rayon-parallel tiles with an unrolled popcount loop.
    Tiled(TileConfig),
}

impl Default for GemmStrategy {
    fn default() -> Self {
        Self::Tiled(TileConfig::default())
    }
}

impl GemmStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Tiled(_) => "tiled",
        }
    }

    /// `output[c * n + p] = alpha[c] * (2 * matches - k)`, see [`xnor_gemm_baseline`].
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        m: usize,
        n: usize,
        k: usize,
        weights: &[Word],
        alpha: &[f32],
        patches: &[Word],
        output: &mut [f32],
    ) {
        match self {
            Self::Baseline => xnor_gemm_baseline(m, n, k, weights, alpha, patches, output),
            Self::Tiled(tile) => xnor_gemm_tiled(m, n, k, weights, alpha, patches, output, tile),
        }
    }
}
