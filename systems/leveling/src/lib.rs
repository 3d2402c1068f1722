#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Leveling thinning resampling system.
//!
//! For every cell of a species the system sorts the cell's weights, derives a
//! level weight, and flips a weight-conserving coin for each particle at or
//! below the level: survivors carry exactly the level weight, the rest are
//! removed, and heavier particles are left untouched. Cells are planned in
//! parallel, each with its own random stream derived from the run seed, so
//! results do not depend on the number of worker threads. The system never
//! mutates the store; it answers `RequestResampling` commands with
//! `ApplyResamplePlan` commands followed by a `CompactSpecies` command.

mod level;
mod seed;
mod thinning;

use std::collections::BTreeMap;

use pic_resampling_core::{
    CellId, Command, ResamplePlan, ResamplingConfig, ResamplingError, SeedContext, SpeciesId,
    SpeciesWeightsView,
};
use rayon::prelude::*;
use tracing::{info, warn};

pub use crate::thinning::{plan, plan_with, resample, LevelingScratch};

/// Configuration parameters required to construct the leveling system.
#[derive(Clone, Debug)]
pub struct Config {
    global_seed: u64,
    species: BTreeMap<SpeciesId, ResamplingConfig>,
}

impl Config {
    /// Creates a configuration with no resampled species.
    #[must_use]
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            species: BTreeMap::new(),
        }
    }

    /// Enables resampling of `species` with the provided parameters.
    #[must_use]
    pub fn with_species(mut self, species: SpeciesId, config: ResamplingConfig) -> Self {
        let _ = self.species.insert(species, config);
        self
    }

    /// Parameters configured for `species`, if it is resampled.
    #[must_use]
    pub fn species(&self, species: SpeciesId) -> Option<&ResamplingConfig> {
        self.species.get(&species)
    }
}

/// Counters describing one species' resampling pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanningSummary {
    /// Species that was resampled.
    pub species: SpeciesId,
    /// Step at which the pass ran.
    pub step: u64,
    /// Cells that received a plan.
    pub cells_resampled: u32,
    /// Non-empty cells left alone because they held too few particles.
    pub cells_skipped: u32,
    /// Particles held by the resampled cells before the pass.
    pub particles_in: u64,
    /// Particles kept by the plans.
    pub particles_out: u64,
    /// Weight held by the resampled cells before the pass.
    pub weight_in: f64,
    /// Weight carried by the particles kept by the plans.
    pub weight_out: f64,
}

impl PlanningSummary {
    fn empty(species: SpeciesId, step: u64) -> Self {
        Self {
            species,
            step,
            cells_resampled: 0,
            cells_skipped: 0,
            particles_in: 0,
            particles_out: 0,
            weight_in: 0.0,
            weight_out: 0.0,
        }
    }

    fn record(&mut self, plan: &ResamplePlan) {
        self.cells_resampled += 1;
        self.particles_in += plan.input_len() as u64;
        self.particles_out += plan.output_len() as u64;
        self.weight_in += plan.input_weight();
        self.weight_out += plan.output_weight();
    }
}

/// Pure system that turns resampling requests into per-cell plans.
#[derive(Debug)]
pub struct LevelingThinning {
    config: Config,
}

impl LevelingThinning {
    /// Creates a new leveling system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Consumes `RequestResampling` commands and emits plan commands into `out`.
    ///
    /// `lookup` resolves a species to its current weights and cell bins.
    /// Requests for species without a configuration, or unknown to `lookup`,
    /// are ignored. An error from any cell aborts the whole call and leaves
    /// `out` as it was on entry.
    pub fn handle<'w, F>(
        &mut self,
        commands: &[Command],
        lookup: F,
        out: &mut Vec<Command>,
    ) -> Result<Vec<PlanningSummary>, ResamplingError>
    where
        F: Fn(SpeciesId) -> Option<SpeciesWeightsView<'w>>,
    {
        let emitted = out.len();
        let mut summaries = Vec::new();
        for command in commands {
            let Command::RequestResampling { species, step } = command else {
                continue;
            };
            let Some(config) = self.config.species(*species).copied() else {
                warn!(species = species.get(), "no resampling configuration for species");
                continue;
            };
            let Some(view) = lookup(*species) else {
                warn!(species = species.get(), "resampling requested for unknown species");
                continue;
            };

            let context = SeedContext::new(self.config.global_seed, *step);
            match self.resample_species(view, &config, context, out) {
                Ok(summary) => summaries.push(summary),
                Err(error) => {
                    out.truncate(emitted);
                    return Err(error);
                }
            }
        }
        Ok(summaries)
    }

    /// Plans every eligible cell of one species and appends the resulting commands to `out`.
    pub fn resample_species(
        &self,
        view: SpeciesWeightsView<'_>,
        config: &ResamplingConfig,
        context: SeedContext,
        out: &mut Vec<Command>,
    ) -> Result<PlanningSummary, ResamplingError> {
        let species = view.species();
        let min_particles = config.min_particles_per_cell.max(1) as usize;
        let (eligible, skipped): (Vec<(CellId, &[u32])>, Vec<(CellId, &[u32])>) = view
            .bins()
            .iter()
            .filter(|(_, indices)| !indices.is_empty())
            .partition(|(_, indices)| indices.len() >= min_particles);

        let plans = eligible
            .par_iter()
            .map_init(
                || (Vec::<f64>::new(), LevelingScratch::new()),
                |(sample, scratch), &(cell, indices)| {
                    view.gather(cell, sample);
                    let mut rng = seed::cell_rng(context, species, cell);
                    plan_with(sample, |local| indices[local], config, &mut rng, scratch)
                        .map(|plan| (cell, plan))
                },
            )
            .collect::<Result<Vec<(CellId, ResamplePlan)>, ResamplingError>>()?;

        let mut summary = PlanningSummary::empty(species, context.step());
        summary.cells_skipped = skipped.len() as u32;
        for (cell, plan) in plans {
            summary.record(&plan);
            out.push(Command::ApplyResamplePlan {
                species,
                cell,
                plan,
            });
        }
        out.push(Command::CompactSpecies { species });

        info!(
            species = species.get(),
            step = context.step(),
            cells = summary.cells_resampled,
            skipped = summary.cells_skipped,
            particles_in = summary.particles_in,
            particles_out = summary.particles_out,
            "planned leveling thinning"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pic_resampling_core::{CellBinsView, TargetRatio};

    fn config(min_particles_per_cell: u32) -> ResamplingConfig {
        ResamplingConfig::new(TargetRatio::new(2.0).expect("valid ratio"))
            .with_min_particles_per_cell(min_particles_per_cell)
    }

    #[test]
    fn sparse_cells_are_skipped() {
        let weights = [1.0, 1.0, 1.0, 1.0, 5.0];
        let offsets = [0, 4, 5, 5];
        let indices = [0, 1, 2, 3, 4];
        let view = SpeciesWeightsView::new(
            SpeciesId::new(0),
            &weights,
            CellBinsView::new(&offsets, &indices),
        );

        let system = LevelingThinning::new(Config::new(1));
        let mut out = Vec::new();
        let summary = system
            .resample_species(view, &config(2), SeedContext::new(1, 1), &mut out)
            .expect("planning succeeds");

        assert_eq!(summary.cells_resampled, 1);
        assert_eq!(summary.cells_skipped, 1);
        assert_eq!(summary.particles_in, 4);
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out.as_slice(),
            [
                Command::ApplyResamplePlan { cell, .. },
                Command::CompactSpecies { .. }
            ] if *cell == CellId::new(0)
        ));
    }

    #[test]
    fn a_failing_species_discards_the_whole_batch() {
        let valid = [1.0, 2.0, 3.0];
        let valid_offsets = [0, 3];
        let valid_indices = [0, 1, 2];
        let invalid = [1.0, -1.0];
        let invalid_offsets = [0, 2];
        let invalid_indices = [0, 1];

        let mut system = LevelingThinning::new(
            Config::new(1)
                .with_species(SpeciesId::new(0), config(1))
                .with_species(SpeciesId::new(1), config(1)),
        );
        let requests = [
            Command::RequestResampling {
                species: SpeciesId::new(0),
                step: 1,
            },
            Command::RequestResampling {
                species: SpeciesId::new(1),
                step: 1,
            },
        ];
        let mut out = vec![Command::Tick];
        let result = system.handle(
            &requests,
            |species| match species.get() {
                0 => Some(SpeciesWeightsView::new(
                    species,
                    &valid,
                    CellBinsView::new(&valid_offsets, &valid_indices),
                )),
                1 => Some(SpeciesWeightsView::new(
                    species,
                    &invalid,
                    CellBinsView::new(&invalid_offsets, &invalid_indices),
                )),
                _ => None,
            },
            &mut out,
        );

        assert!(matches!(
            result,
            Err(ResamplingError::InvalidResamplingInput(_))
        ));
        assert_eq!(out, vec![Command::Tick]);
    }

    #[test]
    fn unconfigured_species_are_ignored() {
        let mut system = LevelingThinning::new(Config::new(1));
        let mut out = Vec::new();
        let summaries = system
            .handle(
                &[Command::RequestResampling {
                    species: SpeciesId::new(3),
                    step: 1,
                }],
                |_| None,
                &mut out,
            )
            .expect("no planning performed");
        assert!(summaries.is_empty());
        assert!(out.is_empty());
    }
}
