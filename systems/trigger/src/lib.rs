#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Resampling trigger that decides when each species is resampled.
//!
//! The trigger watches `StepAdvanced` events and requests resampling of a
//! species when the new step lies on the species' interval expression, or when
//! the species' average number of particles per cell exceeds a threshold.

mod intervals;

use std::collections::BTreeMap;

use pic_resampling_core::{Command, Event, SpeciesId, SpeciesPopulation};
use thiserror::Error;
use tracing::debug;

pub use crate::intervals::{IntervalSet, StepSlice};

/// Errors raised while building trigger conditions.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TriggerError {
    /// A field of an interval slice is not a non-negative integer.
    #[error("invalid integer `{token}` in interval slice `{slice}`")]
    InvalidInteger {
        /// Slice containing the field.
        slice: String,
        /// Offending field.
        token: String,
    },
    /// An interval slice has more than `start:stop:period`.
    #[error("interval slice `{0}` has more than three fields")]
    TooManyFields(String),
    /// The particles-per-cell threshold is not a positive finite value.
    #[error("maximum average particles per cell must be positive and finite, got {0}")]
    InvalidThreshold(f64),
}

/// Conditions under which a single species is resampled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerCondition {
    intervals: IntervalSet,
    max_avg_ppc: Option<f64>,
}

impl TriggerCondition {
    /// Creates a condition that fires on the provided steps.
    #[must_use]
    pub fn new(intervals: IntervalSet) -> Self {
        Self {
            intervals,
            max_avg_ppc: None,
        }
    }

    /// Also fires whenever the average particles per cell exceeds `threshold`.
    pub fn with_max_avg_ppc(mut self, threshold: f64) -> Result<Self, TriggerError> {
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(TriggerError::InvalidThreshold(threshold));
        }
        self.max_avg_ppc = Some(threshold);
        Ok(self)
    }

    /// Steps on which the condition fires regardless of occupancy.
    #[must_use]
    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    /// Reports whether the species should be resampled at `step`.
    #[must_use]
    pub fn fires(&self, step: u64, particles: u64, cells: u32) -> bool {
        self.intervals.contains(step) || self.crowded(particles, cells)
    }

    fn crowded(&self, particles: u64, cells: u32) -> bool {
        match self.max_avg_ppc {
            Some(threshold) if cells > 0 => particles as f64 / f64::from(cells) > threshold,
            _ => false,
        }
    }
}

/// Configuration parameters required to construct the trigger.
#[derive(Clone, Debug, Default)]
pub struct Config {
    species: BTreeMap<SpeciesId, TriggerCondition>,
}

impl Config {
    /// Creates a configuration that never fires.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the condition for `species`, replacing any previous one.
    #[must_use]
    pub fn with_species(mut self, species: SpeciesId, condition: TriggerCondition) -> Self {
        let _ = self.species.insert(species, condition);
        self
    }
}

/// Pure system that emits resampling requests as steps advance.
#[derive(Debug)]
pub struct ResamplingTrigger {
    species: BTreeMap<SpeciesId, TriggerCondition>,
}

impl ResamplingTrigger {
    /// Creates a new trigger using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            species: config.species,
        }
    }

    /// Consumes events and emits `RequestResampling` commands into `out`.
    pub fn handle(&mut self, events: &[Event], out: &mut Vec<Command>) {
        for event in events {
            if let Event::StepAdvanced {
                step,
                cells,
                populations,
            } = event
            {
                self.request(*step, *cells, populations, out);
            }
        }
    }

    fn request(
        &self,
        step: u64,
        cells: u32,
        populations: &[SpeciesPopulation],
        out: &mut Vec<Command>,
    ) {
        for (&species, condition) in &self.species {
            let particles = populations
                .iter()
                .find(|population| population.species == species)
                .map_or(0, |population| population.particles);
            if particles == 0 || !condition.fires(step, particles, cells) {
                continue;
            }
            debug!(
                species = species.get(),
                step,
                particles,
                crowded = condition.crowded(particles, cells),
                "requesting resampling"
            );
            out.push(Command::RequestResampling { species, step });
        }
    }
}
