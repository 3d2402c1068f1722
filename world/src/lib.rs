#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative particle store for the resampling workspace.
//!
//! Each species keeps its particles in struct-of-arrays form. Resampling plans
//! mutate weights in place and mark removed particles dead; a later
//! compaction pass moves every attribute array identically so companion
//! attributes always travel with their weight.

mod bins;

use pic_resampling_core::{
    CellGrid, CellId, Command, Event, Particle, ParticleId, PlanRejection, ResamplePlan,
    SpeciesId, SpeciesPopulation,
};
use tracing::debug;

use crate::bins::CellBins;

/// Struct-of-arrays storage for the particles of one species.
#[derive(Debug, Default)]
struct ParticleArrays {
    ids: Vec<ParticleId>,
    positions: Vec<[f64; 3]>,
    momenta: Vec<[f64; 3]>,
    weights: Vec<f64>,
    cells: Vec<CellId>,
    alive: Vec<bool>,
}

impl ParticleArrays {
    fn len(&self) -> usize {
        self.weights.len()
    }

    fn push(&mut self, id: ParticleId, particle: Particle, cell: CellId) {
        self.ids.push(id);
        self.positions.push(particle.position);
        self.momenta.push(particle.momentum);
        self.weights.push(particle.weight);
        self.cells.push(cell);
        self.alive.push(true);
    }

    fn kill(&mut self, index: usize) {
        self.weights[index] = 0.0;
        self.alive[index] = false;
    }

    /// Removes dead particles in one stable pass and returns how many were dropped.
    fn retain_alive(&mut self) -> usize {
        let mut write = 0;
        for read in 0..self.len() {
            if !self.alive[read] {
                continue;
            }
            if write != read {
                self.ids[write] = self.ids[read];
                self.positions[write] = self.positions[read];
                self.momenta[write] = self.momenta[read];
                self.weights[write] = self.weights[read];
                self.cells[write] = self.cells[read];
                self.alive[write] = true;
            }
            write += 1;
        }

        let removed = self.len() - write;
        self.ids.truncate(write);
        self.positions.truncate(write);
        self.momenta.truncate(write);
        self.weights.truncate(write);
        self.cells.truncate(write);
        self.alive.truncate(write);
        removed
    }
}

/// Particles and cell bins belonging to a single species.
#[derive(Debug)]
struct SpeciesStore {
    id: SpeciesId,
    name: String,
    particles: ParticleArrays,
    bins: CellBins,
    live: usize,
}

impl SpeciesStore {
    fn new(id: SpeciesId, name: String, cell_count: u32) -> Self {
        let mut bins = CellBins::default();
        bins.rebuild(&[], &[], cell_count);
        Self {
            id,
            name,
            particles: ParticleArrays::default(),
            bins,
            live: 0,
        }
    }

    fn rebuild_bins(&mut self, cell_count: u32) {
        self.bins
            .rebuild(&self.particles.cells, &self.particles.alive, cell_count);
    }

    /// Every index must address a distinct live particle of `cell`.
    fn validate(&self, cell: CellId, plan: &ResamplePlan) -> Result<(), PlanRejection> {
        let mut seen = vec![false; self.particles.len()];
        let lists = [plan.untouched(), plan.leveled(), plan.removed()];
        for &index in lists.iter().flat_map(|list| list.iter()) {
            let index = index as usize;
            if index >= self.particles.len() {
                return Err(PlanRejection::IndexOutOfRange);
            }
            if !self.particles.alive[index] {
                return Err(PlanRejection::DeadParticle);
            }
            if self.particles.cells[index] != cell {
                return Err(PlanRejection::ForeignParticle);
            }
            if std::mem::replace(&mut seen[index], true) {
                return Err(PlanRejection::DuplicateIndex);
            }
        }
        Ok(())
    }
}

/// Represents the authoritative particle store.
#[derive(Debug)]
pub struct World {
    grid: CellGrid,
    step: u64,
    species: Vec<SpeciesStore>,
    next_particle_id: u64,
}

impl World {
    /// Creates an empty store over the provided grid.
    #[must_use]
    pub fn new(grid: CellGrid) -> Self {
        Self {
            grid,
            step: 0,
            species: Vec::new(),
            next_particle_id: 0,
        }
    }

    fn species_mut(&mut self, species: SpeciesId) -> Option<&mut SpeciesStore> {
        self.species.iter_mut().find(|store| store.id == species)
    }

    fn species(&self, species: SpeciesId) -> Option<&SpeciesStore> {
        self.species.iter().find(|store| store.id == species)
    }

    fn populations(&self) -> Vec<SpeciesPopulation> {
        self.species
            .iter()
            .map(|store| SpeciesPopulation {
                species: store.id,
                particles: store.live as u64,
            })
            .collect()
    }
}

/// Applies the provided command to the store, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::AddSpecies { name } => {
            let species = SpeciesId::new(world.species.len() as u32);
            let cell_count = world.grid.cell_count();
            world
                .species
                .push(SpeciesStore::new(species, name, cell_count));
            out_events.push(Event::SpeciesAdded { species });
        }
        Command::InjectParticles { species, particles } => {
            let grid = world.grid;
            let mut next_id = world.next_particle_id;
            let Some(store) = world.species_mut(species) else {
                return;
            };

            let mut accepted = 0u32;
            let mut rejected = 0u32;
            for particle in particles {
                if !(particle.weight.is_finite() && particle.weight > 0.0) {
                    rejected += 1;
                    continue;
                }
                let cell = grid.cell_of(particle.position);
                store.particles.push(ParticleId::new(next_id), particle, cell);
                next_id += 1;
                accepted += 1;
            }
            store.live += accepted as usize;
            store.rebuild_bins(grid.cell_count());
            world.next_particle_id = next_id;

            out_events.push(Event::ParticlesInjected {
                species,
                accepted,
                rejected,
            });
        }
        Command::Tick => {
            world.step = world.step.saturating_add(1);
            out_events.push(Event::StepAdvanced {
                step: world.step,
                cells: world.grid.cell_count(),
                populations: world.populations(),
            });
        }
        Command::RequestResampling { .. } => {}
        Command::ApplyResamplePlan {
            species,
            cell,
            plan,
        } => {
            let Some(store) = world.species_mut(species) else {
                out_events.push(Event::ResamplePlanRejected {
                    species,
                    cell,
                    reason: PlanRejection::UnknownSpecies,
                });
                return;
            };

            if let Err(reason) = store.validate(cell, &plan) {
                debug!(species = species.get(), cell = cell.get(), ?reason, "rejected plan");
                out_events.push(Event::ResamplePlanRejected {
                    species,
                    cell,
                    reason,
                });
                return;
            }

            if plan.is_noop() {
                debug!(species = species.get(), cell = cell.get(), "no-op plan");
            } else {
                let level = plan.level_weight().get();
                for &index in plan.leveled() {
                    store.particles.weights[index as usize] = level;
                }
                for &index in plan.removed() {
                    store.particles.kill(index as usize);
                }
                store.live -= plan.removed().len();
            }

            out_events.push(Event::CellResampled {
                species,
                cell,
                summary: plan.summary(),
            });
        }
        Command::CompactSpecies { species } => {
            let cell_count = world.grid.cell_count();
            let Some(store) = world.species_mut(species) else {
                return;
            };
            let removed = store.particles.retain_alive();
            store.rebuild_bins(cell_count);
            debug!(
                species = species.get(),
                removed,
                remaining = store.live,
                "compacted species"
            );
            out_events.push(Event::SpeciesCompacted {
                species,
                removed: removed as u32,
                remaining: store.live as u32,
            });
        }
    }
}

/// Query functions that provide read-only access to the store.
pub mod query {
    use pic_resampling_core::{
        CellBinsView, CellGrid, CellId, ParticleId, SpeciesId, SpeciesWeightsView,
    };

    use super::{SpeciesStore, World};

    /// Provides read-only access to the cell grid.
    #[must_use]
    pub fn grid(world: &World) -> &CellGrid {
        &world.grid
    }

    /// Step counter reached by the store.
    #[must_use]
    pub fn step(world: &World) -> u64 {
        world.step
    }

    /// Identifiers of every registered species in registration order.
    #[must_use]
    pub fn species_ids(world: &World) -> Vec<SpeciesId> {
        world.species.iter().map(|store| store.id).collect()
    }

    /// Looks up a species by name.
    #[must_use]
    pub fn species_by_name(world: &World, name: &str) -> Option<SpeciesId> {
        world
            .species
            .iter()
            .find(|store| store.name == name)
            .map(|store| store.id)
    }

    /// Captures a read-only view of one species.
    #[must_use]
    pub fn species(world: &World, species: SpeciesId) -> Option<SpeciesView<'_>> {
        world.species(species).map(|store| SpeciesView { store })
    }

    /// Read-only view of a single species' particles.
    #[derive(Clone, Copy, Debug)]
    pub struct SpeciesView<'a> {
        store: &'a SpeciesStore,
    }

    impl<'a> SpeciesView<'a> {
        /// Identifier of the species.
        #[must_use]
        pub fn id(&self) -> SpeciesId {
            self.store.id
        }

        /// Name the species was registered with.
        #[must_use]
        pub fn name(&self) -> &'a str {
            &self.store.name
        }

        /// Live particles of the species.
        #[must_use]
        pub fn particle_count(&self) -> usize {
            self.store.live
        }

        /// Slots in the store, including dead particles awaiting compaction.
        #[must_use]
        pub fn slot_count(&self) -> usize {
            self.store.particles.len()
        }

        /// Weights indexed by store index; dead particles carry zero.
        #[must_use]
        pub fn weights(&self) -> &'a [f64] {
            &self.store.particles.weights
        }

        /// Positions indexed by store index.
        #[must_use]
        pub fn positions(&self) -> &'a [[f64; 3]] {
            &self.store.particles.positions
        }

        /// Momenta indexed by store index.
        #[must_use]
        pub fn momenta(&self) -> &'a [[f64; 3]] {
            &self.store.particles.momenta
        }

        /// Particle identifiers indexed by store index.
        #[must_use]
        pub fn ids(&self) -> &'a [ParticleId] {
            &self.store.particles.ids
        }

        /// Cell owning each particle, indexed by store index.
        #[must_use]
        pub fn cells(&self) -> &'a [CellId] {
            &self.store.particles.cells
        }

        /// Reports whether the particle at `index` is still alive.
        #[must_use]
        pub fn is_alive(&self, index: usize) -> bool {
            self.store.particles.alive.get(index).copied().unwrap_or(false)
        }

        /// Sum of live particle weights.
        #[must_use]
        pub fn total_weight(&self) -> f64 {
            self.store
                .particles
                .weights
                .iter()
                .zip(&self.store.particles.alive)
                .filter(|(_, alive)| **alive)
                .map(|(weight, _)| *weight)
                .sum()
        }

        /// Arena-of-cells grouping of the live particles.
        #[must_use]
        pub fn bins(&self) -> CellBinsView<'a> {
            self.store.bins.view()
        }

        /// Weights and bins bundled for the resampling system.
        #[must_use]
        pub fn weights_view(&self) -> SpeciesWeightsView<'a> {
            SpeciesWeightsView::new(self.store.id, self.weights(), self.bins())
        }
    }
}
