//! Per-channel bias broadcast.

/// `output[c * spatial + p] += bias[c]` for every position `p`.
///
/// Equivalent to adding the rank-1 product `bias * ones(spatial)^T`.
pub fn add_bias(output: &mut [f32], bias: &[f32], spatial: usize) {
    assert!(
        output.len() >= bias.len() * spatial,
        "output too short: {} < {}",
        output.len(),
        bias.len() * spatial
    );
    if spatial == 0 {
        return;
    }
    for (row, &b) in output.chunks_exact_mut(spatial).zip(bias.iter()) {
        for v in row.iter_mut() {
            *v += b;
        }
    }
}
