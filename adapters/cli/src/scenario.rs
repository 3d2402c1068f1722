//! Initial particle populations.

use pic_resampling_core::{CellGrid, CellId, Particle, SpeciesId, RNG_STREAM_INJECTION};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};

use crate::config::{ConfigError, Population};

/// Generates the initial particles of `species`.
pub(crate) fn populate(
    grid: &CellGrid,
    species: SpeciesId,
    name: &str,
    population: &Population,
    seed: u64,
) -> Result<Vec<Particle>, ConfigError> {
    let mut rng = injection_rng(seed, species);
    match *population {
        Population::Uniform {
            particles_per_cell,
            weight,
        } => {
            let mut particles =
                Vec::with_capacity(grid.cell_count() as usize * particles_per_cell as usize);
            for cell in 0..grid.cell_count() {
                let cell = CellId::new(cell);
                for _ in 0..particles_per_cell {
                    particles.push(Particle::at_rest(
                        position_in(grid, cell, &mut rng),
                        weight,
                    ));
                }
            }
            Ok(particles)
        }
        Population::Gaussian {
            cell,
            particles,
            mean,
            deviation,
        } => {
            let normal =
                Normal::new(mean, deviation).map_err(|error| ConfigError::Population {
                    species: name.to_owned(),
                    reason: error.to_string(),
                })?;
            let cell = CellId::new(cell);
            let mut generated = Vec::with_capacity(particles as usize);
            while generated.len() < particles as usize {
                let weight = normal.sample(&mut rng);
                if weight > 0.0 {
                    generated.push(Particle::at_rest(position_in(grid, cell, &mut rng), weight));
                }
            }
            Ok(generated)
        }
    }
}

fn position_in(grid: &CellGrid, cell: CellId, rng: &mut ChaCha8Rng) -> [f64; 3] {
    let origin = grid.cell_origin(cell);
    let size = grid.cell_size();
    // Offsets stay clear of the faces so positions never round onto a neighbour.
    std::array::from_fn(|axis| origin[axis] + rng.gen_range(0.05..0.95) * size[axis])
}

fn injection_rng(seed: u64, species: SpeciesId) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(RNG_STREAM_INJECTION.as_bytes());
    hasher.update(species.get().to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    ChaCha8Rng::from_seed(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_population_fills_every_cell() {
        let grid = CellGrid::new([3, 2, 1], [0.5, 1.0, 1.0]);
        let population = Population::Uniform {
            particles_per_cell: 5,
            weight: 2.0,
        };
        let particles =
            populate(&grid, SpeciesId::new(0), "u", &population, 1).expect("population");
        assert_eq!(particles.len(), 30);
        for cell in 0..grid.cell_count() {
            let inside = particles
                .iter()
                .filter(|particle| grid.cell_of(particle.position) == CellId::new(cell))
                .count();
            assert_eq!(inside, 5);
        }
        assert!(particles.iter().all(|particle| particle.weight == 2.0));
    }

    #[test]
    fn gaussian_population_is_positive_and_reproducible() {
        let grid = CellGrid::new([2, 2, 1], [1.0; 3]);
        let population = Population::Gaussian {
            cell: 3,
            particles: 2_000,
            mean: 0.5,
            deviation: 1.0,
        };
        let first = populate(&grid, SpeciesId::new(1), "g", &population, 9).expect("population");
        let second = populate(&grid, SpeciesId::new(1), "g", &population, 9).expect("population");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2_000);
        assert!(first.iter().all(|particle| particle.weight > 0.0));
        assert!(first
            .iter()
            .all(|particle| grid.cell_of(particle.position) == CellId::new(3)));

        let other = populate(&grid, SpeciesId::new(2), "g", &population, 9).expect("population");
        assert_ne!(first, other);
    }
}
