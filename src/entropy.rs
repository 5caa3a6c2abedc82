//! Deterministic entropy-based selection.
//!
//! Given a shared entropy value and a candidate list of byte strings, every
//! node independently computes the same `count`-element subset: hash
//! `entropy || candidate` for each candidate, sort ascending by hash bytes,
//! take the first `count` original indices. The sort key includes the
//! original index, so even an exact hash collision resolves identically on
//! every implementation.

use sha2::digest::Digest;
use sha2::Sha256;

use crate::error::NetError;

/// Select exactly `count` candidate indices, deterministically seeded by
/// `entropy`. Fails when `count` exceeds the candidate pool. The input is
/// never mutated; returned indices let the caller control materialization.
pub fn select_by_entropy<D: Digest>(
    entropy: &[u8],
    values: &[impl AsRef<[u8]>],
    count: usize,
) -> Result<Vec<usize>, NetError> {
    if count > values.len() {
        return Err(NetError::SelectionSize {
            count,
            pool: values.len(),
        });
    }

    let mut scored: Vec<(Vec<u8>, usize)> = values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            let mut hasher = D::new();
            hasher.update(entropy);
            hasher.update(value.as_ref());
            (hasher.finalize().to_vec(), idx)
        })
        .collect();

    // Bytewise hash order, original index as the explicit tie-break.
    scored.sort();

    Ok(scored.into_iter().take(count).map(|(_, idx)| idx).collect())
}

/// The crate-default selector over SHA-256.
pub fn select(entropy: &[u8], values: &[impl AsRef<[u8]>], count: usize) -> Result<Vec<usize>, NetError> {
    select_by_entropy::<Sha256>(entropy, values, count)
}
