//! XNOR kernel type definitions.
//!
//! Constants for the packed sign-bit layout and tiling parameters for the
//! parallel GEMM.

/// Storage word for packed sign bits.
pub type Word = u64;

/// Bits per storage word.
pub const WORD_BITS: usize = Word::BITS as usize;

/// Number of words needed to hold `bits` packed bits.
#[inline]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Mask selecting the valid bits of the final word of a `bits`-long row.
///
/// All ones when `bits` is a multiple of the word width.
#[inline]
pub const fn tail_mask(bits: usize) -> Word {
    let rem = bits % WORD_BITS;
    if rem == 0 {
        Word::MAX
    } else {
        (1 << rem) - 1
    }
}

/// Tile configuration for the parallel XNOR GEMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TileConfig {
    /// Output channels per tile.
    pub bm: usize,
    /// Output positions per tile.
    pub bn: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self { bm: 16, bn: 64 }
    }
}

impl TileConfig {
    /// Clamp zero-sized tiles to 1 so partitioning always makes progress.
    pub(crate) fn normalized(self) -> Self {
        Self {
            bm: self.bm.max(1),
            bn: self.bn.max(1),
        }
    }
}

/// Popcount implementation the target CPU offers, for engine logs.
///
/// `count_ones` lowers to the hardware instruction where one is available;
/// the kernels themselves do not branch on it.
#[cfg(target_arch = "x86_64")]
pub fn popcount_backend() -> &'static str {
    if is_x86_feature_detected!("popcnt") {
        "POPCNT"
    } else {
        "Scalar popcount"
    }
}

#[cfg(target_arch = "aarch64")]
pub fn popcount_backend() -> &'static str {
    "NEON"
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub fn popcount_backend() -> &'static str {
    "Scalar popcount"
}
