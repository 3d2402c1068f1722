//! Scenario files: parsing, validation and command-line overrides.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use pic_resampling_core::{
    CellGrid, LevelStrategy, ResamplingConfig, ResamplingError, TargetRatio,
    DEFAULT_MIN_PARTICLES_PER_CELL,
};
use pic_resampling_system_trigger::{IntervalSet, TriggerCondition, TriggerError};
use serde::Deserialize;
use thiserror::Error;

/// Built-in scenario used when no file is supplied.
const REFERENCE_SCENARIO: &str = include_str!("../scenarios/reference.toml");

const DEFAULT_TARGET_RATIO: f64 = 1.3;

/// Errors raised while validating a scenario.
#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("scenario defines no species")]
    NoSpecies,
    #[error("species `{0}` is defined more than once")]
    DuplicateSpecies(String),
    #[error("grid cell size must be positive and finite, got {0:?}")]
    CellSize([f64; 3]),
    #[error("invalid target ratio for species `{species}`")]
    TargetRatio {
        species: String,
        #[source]
        source: ResamplingError,
    },
    #[error("invalid resampling trigger for species `{species}`")]
    Trigger {
        species: String,
        #[source]
        source: TriggerError,
    },
    #[error("invalid population for species `{species}`: {reason}")]
    Population { species: String, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioFile {
    #[serde(default)]
    seed: u64,
    #[serde(default = "default_steps")]
    steps: u64,
    #[serde(default = "default_target_ratio")]
    target_ratio: f64,
    grid: GridFile,
    species: Vec<SpeciesFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridFile {
    dimensions: [u32; 3],
    #[serde(default = "unit_cell")]
    cell_size: [f64; 3],
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpeciesFile {
    name: String,
    target_ratio: Option<f64>,
    #[serde(default = "default_min_particles_per_cell")]
    min_particles_per_cell: u32,
    #[serde(default)]
    strategy: LevelStrategy,
    #[serde(default)]
    intervals: String,
    max_avg_ppc: Option<f64>,
    population: Population,
}

/// How the initial particles of a species are laid out.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Population {
    /// The same number of equal-weight particles in every cell.
    Uniform { particles_per_cell: u32, weight: f64 },
    /// Normally distributed weights, restricted to positive draws, in a single cell.
    Gaussian {
        #[serde(default)]
        cell: u32,
        particles: u32,
        mean: f64,
        deviation: f64,
    },
}

/// Validated species entry.
#[derive(Clone, Debug)]
pub(crate) struct SpeciesSpec {
    pub(crate) name: String,
    pub(crate) resampling: ResamplingConfig,
    pub(crate) trigger: TriggerCondition,
    pub(crate) population: Population,
}

/// Validated scenario ready to run.
#[derive(Clone, Debug)]
pub(crate) struct Scenario {
    pub(crate) seed: u64,
    pub(crate) steps: u64,
    pub(crate) grid: CellGrid,
    pub(crate) species: Vec<SpeciesSpec>,
}

impl Scenario {
    /// Reads and validates the scenario stored at `path`.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid scenario {}", path.display()))
    }

    /// Built-in two-species scenario.
    pub(crate) fn reference() -> Result<Self> {
        Self::parse(REFERENCE_SCENARIO).context("invalid built-in scenario")
    }

    /// Parses and validates scenario TOML.
    pub(crate) fn parse(text: &str) -> Result<Self> {
        let file: ScenarioFile = toml::from_str(text).context("failed to parse scenario TOML")?;
        Ok(Self::validate(file)?)
    }

    fn validate(file: ScenarioFile) -> Result<Self, ConfigError> {
        if file.species.is_empty() {
            return Err(ConfigError::NoSpecies);
        }
        let cell_size = file.grid.cell_size;
        if !cell_size.iter().all(|size| size.is_finite() && *size > 0.0) {
            return Err(ConfigError::CellSize(cell_size));
        }
        let grid = CellGrid::new(file.grid.dimensions, cell_size);

        let mut species: Vec<SpeciesSpec> = Vec::with_capacity(file.species.len());
        for entry in file.species {
            if species.iter().any(|known| known.name == entry.name) {
                return Err(ConfigError::DuplicateSpecies(entry.name));
            }
            let ratio = entry.target_ratio.unwrap_or(file.target_ratio);
            species.push(SpeciesSpec::validate(entry, ratio, &grid)?);
        }

        Ok(Self {
            seed: file.seed,
            steps: file.steps,
            grid,
            species,
        })
    }

    /// Replaces the target ratio of every species.
    pub(crate) fn override_target_ratio(&mut self, ratio: f64) -> Result<(), ConfigError> {
        for spec in &mut self.species {
            spec.resampling.target_ratio = target_ratio(&spec.name, ratio)?;
        }
        Ok(())
    }
}

impl SpeciesSpec {
    fn validate(entry: SpeciesFile, ratio: f64, grid: &CellGrid) -> Result<Self, ConfigError> {
        let name = entry.name;
        let resampling = ResamplingConfig::new(target_ratio(&name, ratio)?)
            .with_min_particles_per_cell(entry.min_particles_per_cell)
            .with_strategy(entry.strategy);

        let trigger_error = |source: TriggerError| ConfigError::Trigger {
            species: name.clone(),
            source,
        };
        let intervals = IntervalSet::parse(&entry.intervals).map_err(trigger_error)?;
        let mut trigger = TriggerCondition::new(intervals);
        if let Some(threshold) = entry.max_avg_ppc {
            trigger = trigger.with_max_avg_ppc(threshold).map_err(trigger_error)?;
        }

        if let Err(reason) = check_population(&entry.population, grid) {
            return Err(ConfigError::Population {
                species: name,
                reason: reason.to_owned(),
            });
        }

        Ok(Self {
            name,
            resampling,
            trigger,
            population: entry.population,
        })
    }
}

fn target_ratio(species: &str, ratio: f64) -> Result<TargetRatio, ConfigError> {
    TargetRatio::new(ratio).map_err(|source| ConfigError::TargetRatio {
        species: species.to_owned(),
        source,
    })
}

fn check_population(population: &Population, grid: &CellGrid) -> Result<(), &'static str> {
    match *population {
        Population::Uniform { weight, .. } if !(weight.is_finite() && weight > 0.0) => {
            Err("weight must be positive and finite")
        }
        Population::Gaussian { cell, .. } if cell >= grid.cell_count() => {
            Err("cell lies outside the grid")
        }
        Population::Gaussian { mean, .. } if !(mean.is_finite() && mean > 0.0) => {
            Err("mean must be positive and finite")
        }
        Population::Gaussian { deviation, .. } if !(deviation.is_finite() && deviation > 0.0) => {
            Err("deviation must be positive and finite")
        }
        _ => Ok(()),
    }
}

const fn default_steps() -> u64 {
    1
}

const fn default_target_ratio() -> f64 {
    DEFAULT_TARGET_RATIO
}

const fn default_min_particles_per_cell() -> u32 {
    DEFAULT_MIN_PARTICLES_PER_CELL
}

const fn unit_cell() -> [f64; 3] {
    [1.0; 3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_scenario_is_valid() {
        let scenario = Scenario::reference().expect("built-in scenario");
        assert_eq!(scenario.steps, 2);
        assert_eq!(scenario.grid.cell_count(), 256);
        let names: Vec<&str> = scenario.species.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, vec!["uniform", "gaussian"]);
        assert!(scenario.species[0].trigger.intervals().contains(2));
        assert!(!scenario.species[1].trigger.intervals().contains(2));
        assert_eq!(scenario.species[1].resampling.target_ratio.get(), 1.3);
    }

    #[test]
    fn species_ratio_overrides_the_default() {
        let scenario = Scenario::parse(
            r#"
            target_ratio = 2.0
            [grid]
            dimensions = [2, 1, 1]
            [[species]]
            name = "a"
            target_ratio = 1.5
            strategy = "count_target"
            population = { kind = "uniform", particles_per_cell = 4, weight = 1.0 }
            [[species]]
            name = "b"
            population = { kind = "uniform", particles_per_cell = 4, weight = 1.0 }
            "#,
        )
        .expect("valid scenario");
        assert_eq!(scenario.species[0].resampling.target_ratio.get(), 1.5);
        assert_eq!(
            scenario.species[0].resampling.strategy,
            LevelStrategy::CountTarget
        );
        assert_eq!(scenario.species[1].resampling.target_ratio.get(), 2.0);
        assert!(!scenario.species[1].trigger.intervals().is_active());
    }

    #[test]
    fn invalid_entries_are_reported() {
        let duplicate = r#"
            [grid]
            dimensions = [1, 1, 1]
            [[species]]
            name = "a"
            population = { kind = "uniform", particles_per_cell = 1, weight = 1.0 }
            [[species]]
            name = "a"
            population = { kind = "uniform", particles_per_cell = 1, weight = 1.0 }
        "#;
        let error = Scenario::parse(duplicate).expect_err("duplicate species");
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::DuplicateSpecies(name)) if name == "a"
        ));

        let bad_interval = r#"
            [grid]
            dimensions = [1, 1, 1]
            [[species]]
            name = "a"
            intervals = "1:x"
            population = { kind = "uniform", particles_per_cell = 1, weight = 1.0 }
        "#;
        let error = Scenario::parse(bad_interval).expect_err("bad interval");
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::Trigger { .. })
        ));

        let outside = r#"
            [grid]
            dimensions = [1, 1, 1]
            [[species]]
            name = "a"
            population = { kind = "gaussian", cell = 3, particles = 10, mean = 1.0, deviation = 0.5 }
        "#;
        let error = Scenario::parse(outside).expect_err("cell outside grid");
        assert!(matches!(
            error.downcast_ref::<ConfigError>(),
            Some(ConfigError::Population { .. })
        ));
    }

    #[test]
    fn target_ratio_override_is_validated() {
        let mut scenario = Scenario::reference().expect("built-in scenario");
        assert!(matches!(
            scenario.override_target_ratio(0.5),
            Err(ConfigError::TargetRatio { .. })
        ));
        scenario.override_target_ratio(2.0).expect("valid ratio");
        assert!(scenario
            .species
            .iter()
            .all(|spec| spec.resampling.target_ratio.get() == 2.0));
    }
}
