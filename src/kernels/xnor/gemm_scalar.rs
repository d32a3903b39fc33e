//! Scalar baseline for the XNOR GEMM.
//!
//! This is the reference the parallel kernel is tested against: one
//! (channel, position) cell at a time, one word at a time.

use super::types::{Word, WORD_BITS};

/// Signed agreement count of two packed sign rows over their first `k` bits.
///
/// Returns `2 * matches - k`, the sign-only estimate of the dot product.
/// Both rows must have zero tail bits; XNOR turns those into ones, so the
/// padding count is subtracted from the raw popcount.
#[inline]
pub fn xnor_dot(a: &[Word], b: &[Word], k: usize) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    let padding = a.len() * WORD_BITS - k;

    let mut matches = 0u32;
    for (&wa, &wb) in a.iter().zip(b.iter()) {
        matches += (!(wa ^ wb)).count_ones();
    }
    let matches = matches as i32 - padding as i32;

    2 * matches - k as i32
}

/// Baseline XNOR GEMM: `output[c * n + p] = alpha[c] * xnor_dot(w[c], x[p])`.
///
/// # Arguments
/// * `m` - Output channels (rows of `weights`)
/// * `n` - Output positions (rows of `patches`)
/// * `k` - Logical bits per row
/// * `weights` - Packed filters `[m, words]`
/// * `alpha` - Per-channel scale `[m]`
/// * `patches` - Packed receptive fields `[n, words]`
/// * `output` - Row-major `[m, n]`
pub fn xnor_gemm_baseline(
    m: usize,
    n: usize,
    k: usize,
    weights: &[Word],
    alpha: &[f32],
    patches: &[Word],
    output: &mut [f32],
) {
    let words = k.div_ceil(WORD_BITS);
    check_operands(m, n, words, weights, alpha, patches, output);

    for c in 0..m {
        let w_row = &weights[c * words..(c + 1) * words];
        for p in 0..n {
            let x_row = &patches[p * words..(p + 1) * words];
            output[c * n + p] = alpha[c] * xnor_dot(w_row, x_row, k) as f32;
        }
    }
}

pub(crate) fn check_operands(
    m: usize,
    n: usize,
    words: usize,
    weights: &[Word],
    alpha: &[f32],
    patches: &[Word],
    output: &[f32],
) {
    assert!(
        weights.len() >= m * words,
        "weights too short: {} < {}",
        weights.len(),
        m * words
    );
    assert!(alpha.len() >= m, "alpha too short: {} < {}", alpha.len(), m);
    assert!(
        patches.len() >= n * words,
        "patches too short: {} < {}",
        patches.len(),
        n * words
    );
    assert!(
        output.len() >= m * n,
        "output too short: {} < {}",
        output.len(),
        m * n
    );
}
