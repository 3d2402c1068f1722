use std::collections::HashMap;

use approx::assert_relative_eq;
use pic_resampling_core::{
    CellGrid, Command, Event, LevelStrategy, Particle, ParticleFate, ParticleId,
    ResamplingConfig, SpeciesId, TargetRatio,
};
use pic_resampling_system_diagnostics::{checks, WeightStatistics};
use pic_resampling_system_leveling::{plan, Config, LevelingThinning};
use pic_resampling_world::{self as world, query, World};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const TARGET_RATIO: f64 = 1.3;
const SEED: u64 = 0x5eed_1e7e1;

#[test]
fn uniform_weights_shrink_by_the_squared_ratio_over_two_events() {
    let grid = CellGrid::new([16, 16, 1], [1.0; 3]);
    let mut world = World::new(grid);
    let species = add_species(&mut world, "uniform");

    let mut particles = Vec::new();
    for cell in 0..grid.cell_count() {
        let [x, y, z] = grid.cell_origin(pic_resampling_core::CellId::new(cell));
        for _ in 0..400 {
            particles.push(Particle::at_rest([x + 0.5, y + 0.5, z + 0.5], 1.0));
        }
    }
    let initial = particles.len() as f64;
    inject(&mut world, species, particles);

    let mut system = leveling(species);
    let first = resample(&mut world, &mut system, species);
    let second = resample(&mut world, &mut system, species);
    assert!(first.iter().chain(&second).all(|event| !matches!(
        event,
        Event::ResamplePlanRejected { .. }
    )));

    let view = query::species(&world, species).expect("species exists");
    let survival = (1.0 / TARGET_RATIO).powi(2);
    let expected = initial * survival;
    let sigma = (initial * survival * (1.0 - survival)).sqrt();
    let observed = view.particle_count() as f64;
    assert!(
        (observed - expected).abs() <= 5.0 * sigma,
        "observed {observed} particles, expected {expected} +/- {}",
        5.0 * sigma
    );

    for &weight in view.weights() {
        assert_relative_eq!(weight, TARGET_RATIO * TARGET_RATIO, max_relative = 1e-13);
    }
}

#[test]
fn gaussian_weights_level_below_the_threshold_and_keep_the_tail() {
    let grid = CellGrid::new([1, 1, 1], [1.0; 3]);
    let mut world = World::new(grid);
    let species = add_species(&mut world, "gaussian");

    let mean = 2.0 * std::f64::consts::SQRT_2;
    let deviation = std::f64::consts::FRAC_1_SQRT_2;
    let normal = Normal::new(mean, deviation).expect("valid distribution");
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut particles = Vec::with_capacity(100_000);
    while particles.len() < 100_000 {
        let weight = normal.sample(&mut rng);
        if weight > 0.0 {
            let position = [rng.gen(), rng.gen(), rng.gen()];
            particles.push(Particle::at_rest(position, weight));
        }
    }
    inject(&mut world, species, particles);

    let before = snapshot(&world, species);
    let count = before.len() as f64;
    let total_before = total(&before);
    let sample_mean = total_before / count;

    let mut system = leveling(species);
    let events = resample(&mut world, &mut system, species);
    let summary = events
        .iter()
        .find_map(|event| match event {
            Event::CellResampled { summary, .. } => Some(*summary),
            _ => None,
        })
        .expect("cell was resampled");
    let level = summary.level_weight.get();
    assert_relative_eq!(level, sample_mean * TARGET_RATIO, max_relative = 1e-13);

    let after = snapshot(&world, species);

    let leveled = after.values().filter(|&&weight| weight == level).count() as u64;
    let outcome = checks::gaussian_leveled_count_check(
        before.len() as u64,
        leveled,
        mean,
        deviation,
        TARGET_RATIO,
    );
    assert!(outcome.passed, "{outcome:?}");

    let heavy_before: Vec<_> = before
        .iter()
        .filter(|(_, weight)| **weight > level)
        .collect();
    let heavy_after = after.values().filter(|&&weight| weight > level).count();
    assert_eq!(heavy_before.len(), heavy_after);
    for (id, weight) in heavy_before {
        assert_eq!(after.get(id).map(|value| value.to_bits()), Some(weight.to_bits()));
    }

    let total_after = total(&after);
    let tolerance = 5.0 / count.sqrt();
    assert!(
        ((total_after - total_before) / total_before).abs() <= tolerance,
        "weight drifted from {total_before} to {total_after}"
    );
}

#[test]
fn count_target_conserves_weight_on_a_heavy_tailed_sample() {
    const RUNS: u64 = 500;
    let ratio = 1.7;

    // Pareto weights with shape 1.5: finite mean, infinite variance.
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let weights: Vec<f64> = (0..2_000)
        .map(|_| (1.0 - rng.gen::<f64>()).powf(-1.0 / 1.5))
        .collect();
    let config = ResamplingConfig::new(TargetRatio::new(ratio).expect("valid ratio"))
        .with_strategy(LevelStrategy::CountTarget);

    let reference = plan(&weights, &config, &mut ChaCha8Rng::seed_from_u64(0)).expect("plan");
    let level = reference.level_weight().get();
    let n = weights.len() as f64;
    let heavy = weights.iter().filter(|&&weight| weight > level).count();
    let light: Vec<f64> = weights.iter().copied().filter(|&weight| weight <= level).collect();
    let light_weight: f64 = light.iter().sum();
    assert_relative_eq!(
        heavy as f64 + light_weight / level,
        n / ratio,
        max_relative = 1e-9
    );

    let variance: f64 = light
        .iter()
        .map(|&weight| weight / level * (1.0 - weight / level))
        .sum();
    let input_weight = reference.input_weight();
    let (mut counts, mut totals) = (0.0, 0.0);
    for seed in 0..RUNS {
        let plan = plan(&weights, &config, &mut ChaCha8Rng::seed_from_u64(seed)).expect("plan");
        assert_eq!(plan.level_weight().get().to_bits(), level.to_bits());
        assert_eq!(plan.untouched().len(), heavy);
        for (index, &weight) in weights.iter().enumerate() {
            if weight > level {
                assert_eq!(plan.fate(index as u32), Some(ParticleFate::Untouched));
            }
        }
        counts += plan.output_len() as f64;
        totals += plan.output_weight();
    }

    let runs = RUNS as f64;
    let count_sigma = (variance / runs).sqrt();
    let mean_count = counts / runs;
    assert!(
        (mean_count - n / ratio).abs() <= 5.0 * count_sigma,
        "mean count {mean_count}, expected {} +/- {}",
        n / ratio,
        5.0 * count_sigma
    );

    let weight_sigma = level * count_sigma;
    let mean_total = totals / runs;
    assert!(
        (mean_total - input_weight).abs() <= 5.0 * weight_sigma,
        "mean output weight {mean_total}, input {input_weight} +/- {}",
        5.0 * weight_sigma
    );
}

#[test]
fn cells_below_the_minimum_occupancy_are_left_alone() {
    let grid = CellGrid::new([2, 1, 1], [1.0; 3]);
    let mut world = World::new(grid);
    let species = add_species(&mut world, "sparse");
    let mut particles: Vec<Particle> = (0..50)
        .map(|_| Particle::at_rest([0.5, 0.5, 0.5], 1.0))
        .collect();
    particles.extend((0..3).map(|_| Particle::at_rest([1.5, 0.5, 0.5], 1.0)));
    inject(&mut world, species, particles);

    let config = ResamplingConfig::new(TargetRatio::new(2.0).expect("valid ratio"))
        .with_min_particles_per_cell(10);
    let mut system = LevelingThinning::new(Config::new(SEED).with_species(species, config));
    let events = resample(&mut world, &mut system, species);

    let resampled: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::CellResampled { cell, .. } => Some(cell.get()),
            _ => None,
        })
        .collect();
    assert_eq!(resampled, vec![0]);

    let view = query::species(&world, species).expect("species exists");
    let sparse = view
        .bins()
        .cell(pic_resampling_core::CellId::new(1))
        .iter()
        .map(|&index| view.weights()[index as usize])
        .collect::<Vec<_>>();
    assert_eq!(sparse, vec![1.0; 3]);
}

fn leveling(species: SpeciesId) -> LevelingThinning {
    let config = ResamplingConfig::new(TargetRatio::new(TARGET_RATIO).expect("valid ratio"));
    LevelingThinning::new(Config::new(SEED).with_species(species, config))
}

fn add_species(world: &mut World, name: &str) -> SpeciesId {
    let mut events = Vec::new();
    world::apply(
        world,
        Command::AddSpecies {
            name: name.to_owned(),
        },
        &mut events,
    );
    match events.as_slice() {
        [Event::SpeciesAdded { species }] => *species,
        other => panic!("unexpected events {other:?}"),
    }
}

fn inject(world: &mut World, species: SpeciesId, particles: Vec<Particle>) {
    let mut events = Vec::new();
    world::apply(world, Command::InjectParticles { species, particles }, &mut events);
}

/// Advances one step, resamples `species` and applies every emitted plan.
fn resample(world: &mut World, system: &mut LevelingThinning, species: SpeciesId) -> Vec<Event> {
    let mut events = Vec::new();
    world::apply(world, Command::Tick, &mut events);
    let request = Command::RequestResampling {
        species,
        step: query::step(world),
    };

    let store: &World = world;
    let mut commands = Vec::new();
    let _ = system
        .handle(
            &[request],
            |id| query::species(store, id).map(|view| view.weights_view()),
            &mut commands,
        )
        .expect("planning succeeds");

    events.clear();
    for command in commands {
        world::apply(world, command, &mut events);
    }
    events
}

fn snapshot(world: &World, species: SpeciesId) -> HashMap<ParticleId, f64> {
    let view = query::species(world, species).expect("species exists");
    view.ids()
        .iter()
        .copied()
        .zip(view.weights().iter().copied())
        .collect()
}

fn total(weights: &HashMap<ParticleId, f64>) -> f64 {
    let values: Vec<f64> = weights.values().copied().collect();
    WeightStatistics::from_weights(&values).map_or(0.0, |stats| stats.sum)
}
