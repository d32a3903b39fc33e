//! Packed sign-bit storage.
//!
//! A `BitTensor` holds `rows` rows of `len` sign bits each. Every row occupies
//! `words_for(len)` words; bit `k` of a row lives in word `k / 64` at bit
//! position `k % 64`. Bits past `len` in the last word of a row are always zero,
//! which the XNOR GEMM relies on when it corrects for padding.

use super::types::{tail_mask, words_for, Word, WORD_BITS};
use crate::error::{ConvError, Result};

/// Sign bit of a real value: 1 for `value >= 0`, 0 otherwise.
#[inline]
pub fn sign_bit(value: f32) -> Word {
    (value >= 0.0) as Word
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitTensor {
    rows: usize,
    len: usize,
    words_per_row: usize,
    words: Vec<Word>,
}

impl BitTensor {
    /// All-zero tensor of `rows` rows with `len` bits each.
    pub fn zeros(rows: usize, len: usize) -> Self {
        let words_per_row = words_for(len);
        Self {
            rows,
            len,
            words_per_row,
            words: vec![0; rows * words_per_row],
        }
    }

    /// Pack `values` row by row, `axis_len` values per row.
    ///
    /// Fails if `values` is not a whole number of rows.
    pub fn pack(values: &[f32], axis_len: usize) -> Result<Self> {
        if axis_len == 0 {
            return Err(ConvError::shape("packing axis", "> 0", 0));
        }
        if values.len() % axis_len != 0 {
            return Err(ConvError::shape(
                "packed values",
                format!("multiple of {}", axis_len),
                values.len(),
            ));
        }

        let mut tensor = Self::zeros(values.len() / axis_len, axis_len);
        for (src, dst) in values
            .chunks_exact(axis_len)
            .zip(tensor.words.chunks_exact_mut(tensor.words_per_row))
        {
            pack_row(src, dst);
        }
        Ok(tensor)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Logical bits per row.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.len == 0
    }

    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    /// Number of zero bits padding the last word of each row.
    pub fn padding_bits(&self) -> usize {
        self.words_per_row * WORD_BITS - self.len
    }

    /// Word `word_index` of row `row`.
    ///
    /// # Panics
    /// Panics if either index is out of range.
    #[inline]
    pub fn word_at(&self, row: usize, word_index: usize) -> Word {
        assert!(row < self.rows, "row {} out of range ({} rows)", row, self.rows);
        assert!(
            word_index < self.words_per_row,
            "word {} out of range ({} words per row)",
            word_index,
            self.words_per_row
        );
        self.words[row * self.words_per_row + word_index]
    }

    /// Sign bit `k` of row `row`.
    #[inline]
    pub fn bit(&self, row: usize, k: usize) -> bool {
        assert!(k < self.len, "bit {} out of range ({} bits)", k, self.len);
        (self.word_at(row, k / WORD_BITS) >> (k % WORD_BITS)) & 1 == 1
    }

    /// Words of a single row.
    #[inline]
    pub fn row(&self, row: usize) -> &[Word] {
        let start = row * self.words_per_row;
        &self.words[start..start + self.words_per_row]
    }

    /// Contiguous words of rows `start..end`.
    pub fn row_span(&self, start: usize, end: usize) -> &[Word] {
        &self.words[start * self.words_per_row..end * self.words_per_row]
    }

    /// Mutable per-row chunks, for writers that fill rows independently.
    pub(crate) fn rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, Word> {
        // chunks_exact_mut rejects a zero chunk size
        let chunk = self.words_per_row.max(1);
        self.words.chunks_exact_mut(chunk)
    }

    pub(crate) fn words_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }

    pub fn as_words(&self) -> &[Word] {
        &self.words
    }
}

/// Pack one row of real values into `dst`, leaving tail bits zero.
pub(crate) fn pack_row(values: &[f32], dst: &mut [Word]) {
    debug_assert_eq!(dst.len(), words_for(values.len()));
    for (chunk, word) in values.chunks(WORD_BITS).zip(dst.iter_mut()) {
        let mut packed: Word = 0;
        for (bit, &v) in chunk.iter().enumerate() {
            packed |= sign_bit(v) << bit;
        }
        *word = packed;
    }
    if let Some(last) = dst.last_mut() {
        *last &= tail_mask(values.len());
    }
}
