// Packed-bit encoding of digital samples.
use ndarray::{Array1, Array2, Axis};

use crate::error::CompileError;

/// Lines held by one packed word.
pub const WORD_BITS: usize = u32::BITS as usize;

fn check_lines(requested: usize) -> Result<(), CompileError> {
    if requested > WORD_BITS {
        return Err(CompileError::TooManyLines {
            requested,
            available: WORD_BITS,
        });
    }
    Ok(())
}

/// Packs per-line states into one word per tick.
///
/// `lines` has shape `(ticks, n)`; column `i` is written to bit `bits[i]`. Any non-zero entry
/// counts as high.
pub fn pack_lines(lines: &Array2<u8>, bits: &[usize]) -> Result<Array1<u32>, CompileError> {
    if let Some(&bit) = bits.iter().max() {
        check_lines(bit + 1)?;
    }
    assert_eq!(
        lines.ncols(),
        bits.len(),
        "Packing {} columns with {} bit positions",
        lines.ncols(),
        bits.len()
    );
    Ok(lines
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .zip(bits)
                .filter(|(state, _)| **state != 0)
                .fold(0u32, |word, (_, &bit)| word | (1 << bit))
        })
        .collect())
}

/// Expands each packed word into `num_lines` bytes, column `i` holding bit `i`.
/// Fails when `num_lines` exceeds [`WORD_BITS`].
pub fn unpack_bitfield(bitfield: &Array1<u32>, num_lines: usize) -> Result<Array2<u8>, CompileError> {
    check_lines(num_lines)?;
    let mut unpacked = Array2::<u8>::zeros((bitfield.len(), num_lines));
    for i in 0..num_lines {
        unpacked
            .column_mut(i)
            .assign(&bitfield.mapv(|word| ((word >> i) & 1) as u8));
    }
    Ok(unpacked)
}
