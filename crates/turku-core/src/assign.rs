//! Weighted storage assignment for newly registered machines.

use rand::Rng;
use rand::distributions::WeightedIndex;
use rand::seq::SliceRandom;

/// Errors from picking a candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignError {
    #[error("No candidates available")]
    NoCandidates,
}

/// Pick one candidate with probability proportional to its weight.
///
/// Negative weights count as zero. When every weight is zero the pick is
/// uniform.
pub fn assign<K: Clone>(candidates: &[(K, i64)]) -> Result<K, AssignError> {
    assign_with_rng(candidates, &mut rand::thread_rng())
}

/// [`assign`] with a caller-supplied random source.
pub fn assign_with_rng<K: Clone, R: Rng + ?Sized>(
    candidates: &[(K, i64)],
    rng: &mut R,
) -> Result<K, AssignError> {
    if candidates.is_empty() {
        return Err(AssignError::NoCandidates);
    }
    let weights: Vec<u64> = candidates
        .iter()
        .map(|(_, w)| u64::try_from(*w).unwrap_or(0))
        .collect();

    match WeightedIndex::new(&weights) {
        Ok(dist) => Ok(candidates[rng.sample(dist)].0.clone()),
        // All-zero weights.
        Err(_) => candidates
            .choose(rng)
            .map(|(k, _)| k.clone())
            .ok_or(AssignError::NoCandidates),
    }
}
