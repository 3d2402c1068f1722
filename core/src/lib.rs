#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the particle resampling workspace.
//!
//! This crate defines the message surface that connects the command-line
//! adapter, the authoritative particle store, and the pure resampling systems.
//! Adapters submit [`Command`] values describing desired mutations, the store
//! executes those commands via its `apply` entry point, and then broadcasts
//! [`Event`] values for systems to react to deterministically. Systems consume
//! event streams, query immutable views of the store, and respond exclusively
//! with new command batches.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label mixed into seed derivation for the leveling thinning random streams.
pub const RNG_STREAM_LEVELING: &str = "leveling-thinning";

/// Label mixed into seed derivation for population injection streams.
pub const RNG_STREAM_INJECTION: &str = "injection";

/// Default minimum number of particles a cell must hold before it is resampled.
pub const DEFAULT_MIN_PARTICLES_PER_CELL: u32 = 1;

/// Unique identifier assigned to a particle species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(u32);

impl SpeciesId {
    /// Creates a new species identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Linear index of a spatial cell within the [`CellGrid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(u32);

impl CellId {
    /// Creates a new cell identifier with the provided linear index.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the linear index of the cell.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Stable identity of a particle, preserved across resampling and compaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleId(u64);

impl ParticleId {
    /// Creates a new particle identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Uniform Cartesian grid partitioning the simulation domain into cells.
///
/// Cells are numbered row-major with `x` varying fastest. Positions outside
/// the domain are clamped into the nearest boundary cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellGrid {
    dimensions: [u32; 3],
    cell_size: [f64; 3],
}

impl CellGrid {
    /// Creates a grid with the provided cell counts and cell edge lengths.
    ///
    /// Zero cell counts are raised to one so every grid holds at least one cell.
    #[must_use]
    pub fn new(dimensions: [u32; 3], cell_size: [f64; 3]) -> Self {
        Self {
            dimensions: dimensions.map(|count| count.max(1)),
            cell_size,
        }
    }

    /// Edge lengths of a single cell along each axis.
    #[must_use]
    pub const fn cell_size(&self) -> [f64; 3] {
        self.cell_size
    }

    /// Total number of cells contained in the grid.
    #[must_use]
    pub fn cell_count(&self) -> u32 {
        self.dimensions
            .iter()
            .fold(1u32, |acc, count| acc.saturating_mul(*count))
    }

    /// Resolves the cell containing the provided position.
    #[must_use]
    pub fn cell_of(&self, position: [f64; 3]) -> CellId {
        let mut index = [0u32; 3];
        for axis in 0..3 {
            let extent = self.dimensions[axis];
            let size = self.cell_size[axis];
            let raw = if size > 0.0 && position[axis].is_finite() {
                (position[axis] / size).floor()
            } else {
                0.0
            };
            index[axis] = raw.clamp(0.0, f64::from(extent - 1)) as u32;
        }
        let [nx, ny, _] = self.dimensions;
        CellId::new(index[0] + nx * (index[1] + ny * index[2]))
    }

    /// Returns the lower corner of the provided cell.
    #[must_use]
    pub fn cell_origin(&self, cell: CellId) -> [f64; 3] {
        let [nx, ny, _] = self.dimensions;
        let linear = cell.get();
        let x = linear % nx;
        let y = (linear / nx) % ny;
        let z = linear / (nx * ny);
        [
            f64::from(x) * self.cell_size[0],
            f64::from(y) * self.cell_size[1],
            f64::from(z) * self.cell_size[2],
        ]
    }
}

/// Desired reduction factor driving the level-weight search.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct TargetRatio(f64);

impl TargetRatio {
    /// Validates and wraps a target ratio, which must be finite and strictly greater than one.
    pub fn new(value: f64) -> Result<Self, ResamplingError> {
        if value.is_finite() && value > 1.0 {
            Ok(Self(value))
        } else {
            Err(ResamplingError::InvalidResamplingInput(
                InvalidInput::TargetRatio(value),
            ))
        }
    }

    /// Retrieves the ratio as a float.
    #[must_use]
    pub const fn get(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for TargetRatio {
    type Error = ResamplingError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetRatio> for f64 {
    fn from(ratio: TargetRatio) -> Self {
        ratio.0
    }
}

/// Threshold separating untouched particles from leveling candidates.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct LevelWeight(f64);

impl LevelWeight {
    /// Wraps a computed level weight.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Retrieves the level weight as a float.
    #[must_use]
    pub const fn get(&self) -> f64 {
        self.0
    }

    /// Reports whether a particle of the provided weight is a leveling candidate.
    #[must_use]
    pub fn is_candidate(&self, weight: f64) -> bool {
        weight <= self.0
    }
}

/// Method used to derive the level weight from a cell's weight sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStrategy {
    /// Level weight equals the target ratio times the sample mean weight.
    #[default]
    AverageWeight,
    /// Level weight solves `count(w > L) + sum(w <= L) / L = n / ratio` over the sorted sample.
    CountTarget,
}

/// Parameters consumed by the leveling thinning resampler.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResamplingConfig {
    /// Reduction factor applied at each resampling event.
    pub target_ratio: TargetRatio,
    /// Cells holding fewer particles than this are left untouched.
    #[serde(default = "default_min_particles_per_cell")]
    pub min_particles_per_cell: u32,
    /// Level-weight search method.
    #[serde(default)]
    pub strategy: LevelStrategy,
}

impl ResamplingConfig {
    /// Creates a configuration using the default cell threshold and strategy.
    #[must_use]
    pub const fn new(target_ratio: TargetRatio) -> Self {
        Self {
            target_ratio,
            min_particles_per_cell: DEFAULT_MIN_PARTICLES_PER_CELL,
            strategy: LevelStrategy::AverageWeight,
        }
    }

    /// Overrides the minimum number of particles a cell needs to be resampled.
    #[must_use]
    pub const fn with_min_particles_per_cell(mut self, min_particles_per_cell: u32) -> Self {
        self.min_particles_per_cell = min_particles_per_cell;
        self
    }

    /// Overrides the level-weight search method.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: LevelStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

const fn default_min_particles_per_cell() -> u32 {
    DEFAULT_MIN_PARTICLES_PER_CELL
}

/// Errors raised by a resampling invocation. The input is never modified when one is returned.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum ResamplingError {
    /// The caller supplied input that violates the resampler's preconditions.
    #[error("invalid resampling input: {0}")]
    InvalidResamplingInput(InvalidInput),
    /// The level-weight search produced a value no fallback could repair.
    #[error("numerical degeneracy while computing the level weight: {0}")]
    NumericalDegeneracy(Degeneracy),
}

/// Precondition violations detected before any random draw is made.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum InvalidInput {
    /// The target ratio was not a finite value greater than one.
    #[error("target ratio {0} must be finite and greater than 1")]
    TargetRatio(f64),
    /// The weight sample contained no particles.
    #[error("weight sample is empty")]
    EmptyWeights,
    /// A weight was zero, negative, or not finite.
    #[error("weight {weight} at index {index} is not a positive finite value")]
    NonPositiveWeight {
        /// Position of the offending weight within the sample.
        index: usize,
        /// Offending weight value.
        weight: f64,
    },
}

/// Numerical failures of the level-weight search.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum Degeneracy {
    /// The summed weight of the sample overflowed.
    #[error("total weight is not finite")]
    NonFiniteTotalWeight,
    /// The computed level weight was not a positive finite value.
    #[error("level weight {0} is not a positive finite value")]
    NonFiniteLevelWeight(f64),
}

/// Outcome assigned to an individual particle by a resampling plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticleFate {
    /// The particle weighs more than the level weight and is copied through unchanged.
    Untouched,
    /// The particle survived the coin flip and now carries exactly the level weight.
    Leveled,
    /// The particle lost the coin flip and is removed.
    Removed,
}

/// Selection descriptor returned by the resampler.
///
/// Indices refer to positions within the weight sample handed to the
/// resampler, or to store indices when the plan was built for a cell of the
/// particle store. Every input index appears in exactly one of the three
/// lists, and each list is sorted by ascending input weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResamplePlan {
    level_weight: LevelWeight,
    input_weight: f64,
    untouched_weight: f64,
    untouched: Vec<u32>,
    leveled: Vec<u32>,
    removed: Vec<u32>,
}

impl ResamplePlan {
    /// Assembles a plan from its index partition.
    #[must_use]
    pub fn new(
        level_weight: LevelWeight,
        input_weight: f64,
        untouched_weight: f64,
        untouched: Vec<u32>,
        leveled: Vec<u32>,
        removed: Vec<u32>,
    ) -> Self {
        Self {
            level_weight,
            input_weight,
            untouched_weight,
            untouched,
            leveled,
            removed,
        }
    }

    /// Level weight carried by every leveled particle.
    #[must_use]
    pub const fn level_weight(&self) -> LevelWeight {
        self.level_weight
    }

    /// Total weight of the sample before resampling.
    #[must_use]
    pub const fn input_weight(&self) -> f64 {
        self.input_weight
    }

    /// Total weight of the sample after resampling.
    #[must_use]
    pub fn output_weight(&self) -> f64 {
        self.untouched_weight + self.level_weight.get() * self.leveled.len() as f64
    }

    /// Indices of particles copied through unchanged.
    #[must_use]
    pub fn untouched(&self) -> &[u32] {
        &self.untouched
    }

    /// Indices of particles that now carry the level weight.
    #[must_use]
    pub fn leveled(&self) -> &[u32] {
        &self.leveled
    }

    /// Indices of particles removed by the plan.
    #[must_use]
    pub fn removed(&self) -> &[u32] {
        &self.removed
    }

    /// Number of particles the plan was computed for.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.untouched.len() + self.leveled.len() + self.removed.len()
    }

    /// Number of particles surviving the plan.
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.untouched.len() + self.leveled.len()
    }

    /// Reports whether applying the plan leaves every particle unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.leveled.is_empty() && self.removed.is_empty()
    }

    /// Looks up the fate assigned to the particle at `index`.
    #[must_use]
    pub fn fate(&self, index: u32) -> Option<ParticleFate> {
        if self.untouched.contains(&index) {
            Some(ParticleFate::Untouched)
        } else if self.leveled.contains(&index) {
            Some(ParticleFate::Leveled)
        } else if self.removed.contains(&index) {
            Some(ParticleFate::Removed)
        } else {
            None
        }
    }

    /// Condenses the plan into the counters reported by the particle store.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            level_weight: self.level_weight,
            untouched: self.untouched.len() as u32,
            leveled: self.leveled.len() as u32,
            removed: self.removed.len() as u32,
            input_weight: self.input_weight,
            output_weight: self.output_weight(),
        }
    }
}

/// Output of [`ResamplePlan`] evaluation against the sampled weights.
#[derive(Clone, Debug, PartialEq)]
pub struct ResampledWeights {
    weights: Vec<f64>,
    plan: ResamplePlan,
}

impl ResampledWeights {
    /// Pairs output weights with the plan that produced them.
    #[must_use]
    pub fn new(weights: Vec<f64>, plan: ResamplePlan) -> Self {
        Self { weights, plan }
    }

    /// Output weights, untouched particles first.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Selection descriptor used to produce the weights.
    #[must_use]
    pub fn plan(&self) -> &ResamplePlan {
        &self.plan
    }
}

/// Counters describing a plan applied to a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Level weight used for the cell.
    pub level_weight: LevelWeight,
    /// Particles copied through unchanged.
    pub untouched: u32,
    /// Particles now carrying the level weight.
    pub leveled: u32,
    /// Particles removed.
    pub removed: u32,
    /// Total cell weight before resampling.
    pub input_weight: f64,
    /// Total cell weight after resampling.
    pub output_weight: f64,
}

/// Physical attributes of a particle handed to the store at injection time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Position in domain units.
    pub position: [f64; 3],
    /// Momentum in arbitrary units.
    pub momentum: [f64; 3],
    /// Number of physical particles represented by this macro-particle.
    pub weight: f64,
}

impl Particle {
    /// Creates a particle at rest at the provided position.
    #[must_use]
    pub const fn at_rest(position: [f64; 3], weight: f64) -> Self {
        Self {
            position,
            momentum: [0.0; 3],
            weight,
        }
    }
}

/// Particle count of a species observed after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesPopulation {
    /// Species the count refers to.
    pub species: SpeciesId,
    /// Live particles of the species.
    pub particles: u64,
}

/// Seed material used to derive deterministic per-cell random streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedContext {
    global_seed: u64,
    step: u64,
}

impl SeedContext {
    /// Creates a seed context for the provided run seed and step.
    #[must_use]
    pub const fn new(global_seed: u64, step: u64) -> Self {
        Self { global_seed, step }
    }

    /// Seed shared by the whole run.
    #[must_use]
    pub const fn global_seed(&self) -> u64 {
        self.global_seed
    }

    /// Step at which the random streams are consumed.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }
}

/// Read-only arena-of-cells view: each cell is a contiguous range of store indices.
#[derive(Clone, Copy, Debug)]
pub struct CellBinsView<'a> {
    offsets: &'a [u32],
    indices: &'a [u32],
}

impl<'a> CellBinsView<'a> {
    /// Captures a view over the provided offsets and grouped indices.
    ///
    /// `offsets` holds one entry per cell plus a trailing end marker; cell `c`
    /// owns `indices[offsets[c]..offsets[c + 1]]`.
    #[must_use]
    pub fn new(offsets: &'a [u32], indices: &'a [u32]) -> Self {
        Self { offsets, indices }
    }

    /// Number of cells described by the view.
    #[must_use]
    pub fn cell_count(&self) -> u32 {
        self.offsets.len().saturating_sub(1) as u32
    }

    /// Number of particles binned across all cells.
    #[must_use]
    pub fn particle_count(&self) -> usize {
        self.indices.len()
    }

    /// Store indices of the particles located in `cell`, in ascending order.
    #[must_use]
    pub fn cell(&self, cell: CellId) -> &'a [u32] {
        let index = cell.get() as usize;
        match (self.offsets.get(index), self.offsets.get(index + 1)) {
            (Some(&start), Some(&stop)) => self
                .indices
                .get(start as usize..stop as usize)
                .unwrap_or(&[]),
            _ => &[],
        }
    }

    /// Iterator over every cell and its store indices, including empty cells.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, &'a [u32])> + 'a {
        let view = *self;
        (0..view.cell_count()).map(move |cell| (CellId::new(cell), view.cell(CellId::new(cell))))
    }
}

/// Read-only view over the weights of one species together with its cell bins.
#[derive(Clone, Copy, Debug)]
pub struct SpeciesWeightsView<'a> {
    species: SpeciesId,
    weights: &'a [f64],
    bins: CellBinsView<'a>,
}

impl<'a> SpeciesWeightsView<'a> {
    /// Captures a view for the provided species.
    #[must_use]
    pub fn new(species: SpeciesId, weights: &'a [f64], bins: CellBinsView<'a>) -> Self {
        Self {
            species,
            weights,
            bins,
        }
    }

    /// Species the view describes.
    #[must_use]
    pub const fn species(&self) -> SpeciesId {
        self.species
    }

    /// Weights of every stored particle, indexed by store index.
    #[must_use]
    pub fn weights(&self) -> &'a [f64] {
        self.weights
    }

    /// Arena-of-cells grouping of the live particles.
    #[must_use]
    pub const fn bins(&self) -> CellBinsView<'a> {
        self.bins
    }

    /// Copies the weights of the particles in `cell` into `out`, replacing its contents.
    pub fn gather(&self, cell: CellId, out: &mut Vec<f64>) {
        out.clear();
        out.extend(
            self.bins
                .cell(cell)
                .iter()
                .filter_map(|&index| self.weights.get(index as usize).copied()),
        );
    }
}

/// Reasons the particle store refuses to apply a resampling plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanRejection {
    /// The species is not registered with the store.
    UnknownSpecies,
    /// An index in the plan does not address a particle of the species.
    IndexOutOfRange,
    /// An index in the plan addresses a particle outside the targeted cell.
    ForeignParticle,
    /// An index in the plan addresses a particle already removed.
    DeadParticle,
    /// An index appears more than once across the plan's lists.
    DuplicateIndex,
}

/// Commands that express all permissible particle store mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Registers a new species with the store.
    AddSpecies {
        /// Human-readable name of the species.
        name: String,
    },
    /// Appends particles to a species.
    InjectParticles {
        /// Species receiving the particles.
        species: SpeciesId,
        /// Particles to append.
        particles: Vec<Particle>,
    },
    /// Advances the simulation step counter.
    Tick,
    /// Asks the resampling system to process a species at the current step.
    RequestResampling {
        /// Species to resample.
        species: SpeciesId,
        /// Step at which the request was raised.
        step: u64,
    },
    /// Applies a resampling plan expressed in store indices to one cell.
    ApplyResamplePlan {
        /// Species owning the particles.
        species: SpeciesId,
        /// Cell the plan was computed for.
        cell: CellId,
        /// Plan to apply.
        plan: ResamplePlan,
    },
    /// Removes particles marked dead and rebuilds the species' cell bins.
    CompactSpecies {
        /// Species to compact.
        species: SpeciesId,
    },
}

/// Events broadcast by the particle store after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Confirms that a species was registered.
    SpeciesAdded {
        /// Identifier assigned to the species.
        species: SpeciesId,
    },
    /// Confirms that particles were appended to a species.
    ParticlesInjected {
        /// Species receiving the particles.
        species: SpeciesId,
        /// Particles stored.
        accepted: u32,
        /// Particles dropped because their weight was not a positive finite value.
        rejected: u32,
    },
    /// Indicates that the step counter advanced.
    StepAdvanced {
        /// Step reached after the tick.
        step: u64,
        /// Number of cells in the grid.
        cells: u32,
        /// Live particle counts per species.
        populations: Vec<SpeciesPopulation>,
    },
    /// Confirms that a resampling plan was applied to a cell.
    CellResampled {
        /// Species owning the particles.
        species: SpeciesId,
        /// Cell the plan was applied to.
        cell: CellId,
        /// Counters describing the applied plan.
        summary: PlanSummary,
    },
    /// Reports that a resampling plan was refused.
    ResamplePlanRejected {
        /// Species targeted by the plan.
        species: SpeciesId,
        /// Cell targeted by the plan.
        cell: CellId,
        /// Specific reason the plan was refused.
        reason: PlanRejection,
    },
    /// Confirms that dead particles were removed from a species.
    SpeciesCompacted {
        /// Species that was compacted.
        species: SpeciesId,
        /// Particles removed by the compaction.
        removed: u32,
        /// Particles remaining after compaction.
        remaining: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ResamplePlan {
        ResamplePlan::new(
            LevelWeight::new(2.0),
            5.5,
            3.0,
            vec![3],
            vec![0, 2],
            vec![1],
        )
    }

    #[test]
    fn target_ratio_rejects_values_not_above_one() {
        assert!(TargetRatio::new(1.0).is_err());
        assert!(TargetRatio::new(0.5).is_err());
        assert!(TargetRatio::new(f64::NAN).is_err());
        assert!(TargetRatio::new(f64::INFINITY).is_err());
        assert_eq!(TargetRatio::new(1.3).map(|ratio| ratio.get()), Ok(1.3));
    }

    #[test]
    fn plan_reports_fates_and_lengths() {
        let plan = sample_plan();
        assert_eq!(plan.input_len(), 4);
        assert_eq!(plan.output_len(), 3);
        assert_eq!(plan.fate(3), Some(ParticleFate::Untouched));
        assert_eq!(plan.fate(2), Some(ParticleFate::Leveled));
        assert_eq!(plan.fate(1), Some(ParticleFate::Removed));
        assert_eq!(plan.fate(9), None);
        assert!((plan.output_weight() - 7.0).abs() < f64::EPSILON);
        assert!(!plan.is_noop());
    }

    #[test]
    fn grid_clamps_positions_into_boundary_cells() {
        let grid = CellGrid::new([4, 4, 1], [1.0, 1.0, 1.0]);
        assert_eq!(grid.cell_count(), 16);
        assert_eq!(grid.cell_of([0.5, 0.5, 0.0]), CellId::new(0));
        assert_eq!(grid.cell_of([1.5, 2.5, 0.0]), CellId::new(9));
        assert_eq!(grid.cell_of([-3.0, 9.0, 0.0]), CellId::new(12));
        assert_eq!(grid.cell_origin(CellId::new(9)), [1.0, 2.0, 0.0]);
    }

    #[test]
    fn bins_view_exposes_cell_ranges() {
        let offsets = [0, 2, 2, 5];
        let indices = [4, 1, 0, 2, 3];
        let bins = CellBinsView::new(&offsets, &indices);
        assert_eq!(bins.cell_count(), 3);
        assert_eq!(bins.particle_count(), 5);
        assert_eq!(bins.cell(CellId::new(0)), &[4, 1]);
        assert!(bins.cell(CellId::new(1)).is_empty());
        assert_eq!(bins.cell(CellId::new(2)), &[0, 2, 3]);
        assert!(bins.cell(CellId::new(7)).is_empty());

        let weights = [1.0, 2.0, 3.0, 4.0, 5.0];
        let view = SpeciesWeightsView::new(SpeciesId::new(0), &weights, bins);
        let mut gathered = Vec::new();
        view.gather(CellId::new(0), &mut gathered);
        assert_eq!(gathered, vec![5.0, 2.0]);
    }

    #[test]
    fn resampling_plan_round_trips_through_bincode() {
        let plan = sample_plan();
        let bytes = bincode::serialize(&plan).expect("serialize");
        let restored: ResamplePlan = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(restored, plan);
    }
}
