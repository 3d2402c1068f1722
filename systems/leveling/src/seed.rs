//! Deterministic per-cell random streams.

use pic_resampling_core::{CellId, SeedContext, SpeciesId, RNG_STREAM_LEVELING};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// Builds the generator owned by one cell for one resampling event.
///
/// The stream depends only on the run seed, step, species and cell, so the
/// outcome is independent of how cells are spread across workers.
pub(crate) fn cell_rng(context: SeedContext, species: SpeciesId, cell: CellId) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(context.global_seed().to_le_bytes());
    hasher.update(RNG_STREAM_LEVELING.as_bytes());
    hasher.update(context.step().to_le_bytes());
    hasher.update(species.get().to_le_bytes());
    hasher.update(cell.get().to_le_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    ChaCha8Rng::from_seed(seed)
}
