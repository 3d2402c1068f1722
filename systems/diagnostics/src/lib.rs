#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Diagnostics system that summarises resampling passes into a report.
//!
//! The system observes store events to count resampled cells and particle
//! fates, records weight statistics before and after resampling, and collects
//! the outcomes of the statistical checks in [`checks`].

pub mod checks;
mod statistics;

use std::collections::BTreeSet;

use pic_resampling_core::{Event, SpeciesId};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use crate::{checks::CheckOutcome, statistics::WeightStatistics};

/// Resampling activity observed for one species.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeciesReport {
    /// Species described by the entry.
    pub species: SpeciesId,
    /// Name of the species.
    pub name: String,
    /// Weight statistics before the first resampling pass.
    pub before: Option<WeightStatistics>,
    /// Weight statistics after the last resampling pass.
    pub after: Option<WeightStatistics>,
    /// Completed resampling passes.
    pub passes: u32,
    /// Plans applied across all passes.
    pub cells_resampled: u32,
    /// Cells left alone because they held too few particles.
    pub cells_skipped: u32,
    /// Plans refused by the store.
    pub plans_rejected: u32,
    /// Particles copied through unchanged.
    pub untouched: u64,
    /// Particles now carrying a level weight.
    pub leveled: u64,
    /// Particles removed.
    pub removed: u64,
    /// Smallest level weight applied to a cell.
    pub level_weight_min: Option<f64>,
    /// Largest level weight applied to a cell.
    pub level_weight_max: Option<f64>,
}

impl SpeciesReport {
    fn new(species: SpeciesId, name: &str) -> Self {
        Self {
            species,
            name: name.to_owned(),
            before: None,
            after: None,
            passes: 0,
            cells_resampled: 0,
            cells_skipped: 0,
            plans_rejected: 0,
            untouched: 0,
            leveled: 0,
            removed: 0,
            level_weight_min: None,
            level_weight_max: None,
        }
    }

    fn record_level(&mut self, level: f64) {
        self.level_weight_min = Some(self.level_weight_min.map_or(level, |min| min.min(level)));
        self.level_weight_max = Some(self.level_weight_max.map_or(level, |max| max.max(level)));
    }
}

/// Serializable summary of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResamplingReport {
    /// Per-species activity in registration order.
    pub species: Vec<SpeciesReport>,
    /// Outcomes of the checks evaluated for the run.
    pub checks: Vec<CheckOutcome>,
}

impl ResamplingReport {
    /// Reports whether every evaluated check passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Looks up the entry of a species by name.
    #[must_use]
    pub fn species_named(&self, name: &str) -> Option<&SpeciesReport> {
        self.species.iter().find(|entry| entry.name == name)
    }
}

/// Pure system that accumulates a [`ResamplingReport`] from store events.
#[derive(Debug, Default)]
pub struct Diagnostics {
    report: ResamplingReport,
    open_passes: BTreeSet<SpeciesId>,
}

impl Diagnostics {
    /// Creates a diagnostics system with an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `species` and records the statistics of its initial weights.
    pub fn track(&mut self, species: SpeciesId, name: &str, weights: &[f64]) {
        let index = match self.position(species) {
            Some(index) => index,
            None => {
                self.report.species.push(SpeciesReport::new(species, name));
                self.report.species.len() - 1
            }
        };
        self.report.species[index].before = WeightStatistics::from_weights(weights);
    }

    /// Records the statistics of the final weights of `species`.
    pub fn observe_final(&mut self, species: SpeciesId, weights: &[f64]) {
        if let Some(entry) = self.entry_mut(species) {
            entry.after = WeightStatistics::from_weights(weights);
        }
    }

    /// Adds cells that a resampling pass left alone.
    pub fn record_skipped(&mut self, species: SpeciesId, cells: u32) {
        if let Some(entry) = self.entry_mut(species) {
            entry.cells_skipped += cells;
        }
    }

    /// Appends the outcome of a check to the report.
    pub fn push_check(&mut self, outcome: CheckOutcome) {
        if !outcome.passed {
            warn!(
                check = %outcome.name,
                observed = outcome.observed,
                expected = outcome.expected,
                tolerance = outcome.tolerance,
                "check failed"
            );
        }
        self.report.checks.push(outcome);
    }

    /// Consumes store events and updates the per-species counters.
    pub fn handle(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::CellResampled {
                    species, summary, ..
                } => {
                    let species = *species;
                    let Some(entry) = self.entry_mut(species) else {
                        continue;
                    };
                    entry.cells_resampled += 1;
                    entry.untouched += u64::from(summary.untouched);
                    entry.leveled += u64::from(summary.leveled);
                    entry.removed += u64::from(summary.removed);
                    entry.record_level(summary.level_weight.get());
                    let _ = self.open_passes.insert(species);
                }
                Event::ResamplePlanRejected { species, .. } => {
                    if let Some(entry) = self.entry_mut(*species) {
                        entry.plans_rejected += 1;
                    }
                }
                Event::SpeciesCompacted { species, .. } => {
                    if self.open_passes.remove(species) {
                        if let Some(entry) = self.entry_mut(*species) {
                            entry.passes += 1;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Returns the report accumulated so far.
    #[must_use]
    pub fn report(&self) -> &ResamplingReport {
        &self.report
    }

    /// Consumes the system and returns its report.
    #[must_use]
    pub fn into_report(self) -> ResamplingReport {
        self.report
    }

    fn position(&self, species: SpeciesId) -> Option<usize> {
        self.report
            .species
            .iter()
            .position(|entry| entry.species == species)
    }

    fn entry_mut(&mut self, species: SpeciesId) -> Option<&mut SpeciesReport> {
        self.report
            .species
            .iter_mut()
            .find(|entry| entry.species == species)
    }
}
