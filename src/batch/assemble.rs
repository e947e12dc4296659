//! Assembler: stitch chunk results into the final document, in index order.

use crate::error::BatchError;
use std::collections::BTreeMap;

/// Join `mapping[0..num_chunks]` with a blank line between chunks.
///
/// # Errors
/// [`BatchError::Integrity`] naming every missing index. A gap is never
/// skipped over.
pub fn assemble(mapping: &BTreeMap<usize, String>, num_chunks: usize) -> Result<String, BatchError> {
    let missing: Vec<usize> = (0..num_chunks)
        .filter(|i| !mapping.contains_key(i))
        .collect();
    if !missing.is_empty() {
        return Err(BatchError::Integrity {
            missing,
            num_chunks,
        });
    }

    Ok(mapping
        .range(..num_chunks)
        .map(|(_, md)| md.as_str())
        .collect::<Vec<_>>()
        .join("\n\n"))
}
