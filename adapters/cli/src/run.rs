//! Step loop wiring the store, trigger, leveling and diagnostics together.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use pic_resampling_core::{Command, Event, LevelStrategy, SpeciesId};
use pic_resampling_system_diagnostics::{
    checks, CheckOutcome, Diagnostics, ResamplingReport, SpeciesReport, WeightStatistics,
};
use pic_resampling_system_leveling::{self as leveling, LevelingThinning};
use pic_resampling_system_trigger::{self as trigger, ResamplingTrigger};
use pic_resampling_world::{self as world, query, World};
use tracing::{debug, info};

use crate::{
    config::{Population, Scenario, SpeciesSpec},
    scenario::populate,
};

struct Tracked<'a> {
    species: SpeciesId,
    spec: &'a SpeciesSpec,
    initial: Vec<f64>,
}

/// Runs `scenario` to completion and returns the accumulated report.
pub(crate) fn run(scenario: &Scenario, evaluate_checks: bool) -> Result<ResamplingReport> {
    let mut world = World::new(scenario.grid);
    let mut diagnostics = Diagnostics::new();
    let mut leveling_config = leveling::Config::new(scenario.seed);
    let mut trigger_config = trigger::Config::new();
    let mut tracked = Vec::with_capacity(scenario.species.len());

    for spec in &scenario.species {
        let species = add_species(&mut world, &spec.name)?;
        let particles = populate(
            &scenario.grid,
            species,
            &spec.name,
            &spec.population,
            scenario.seed,
        )?;
        let mut events = Vec::new();
        world::apply(
            &mut world,
            Command::InjectParticles { species, particles },
            &mut events,
        );

        let initial = query::species(&world, species)
            .context("injected species is missing from the store")?
            .weights()
            .to_vec();
        info!(species = %spec.name, particles = initial.len(), "injected population");
        diagnostics.track(species, &spec.name, &initial);

        leveling_config = leveling_config.with_species(species, spec.resampling);
        trigger_config = trigger_config.with_species(species, spec.trigger.clone());
        tracked.push(Tracked {
            species,
            spec,
            initial,
        });
    }

    let mut trigger = ResamplingTrigger::new(trigger_config);
    let mut leveling = LevelingThinning::new(leveling_config);
    let mut events = Vec::new();
    let mut requests = Vec::new();
    let mut commands = Vec::new();

    for _ in 0..scenario.steps {
        events.clear();
        world::apply(&mut world, Command::Tick, &mut events);

        requests.clear();
        trigger.handle(&events, &mut requests);
        if requests.is_empty() {
            continue;
        }

        commands.clear();
        let summaries = leveling
            .handle(
                &requests,
                |species| query::species(&world, species).map(|view| view.weights_view()),
                &mut commands,
            )
            .with_context(|| format!("resampling failed at step {}", query::step(&world)))?;
        for summary in &summaries {
            diagnostics.record_skipped(summary.species, summary.cells_skipped);
        }

        events.clear();
        for command in commands.drain(..) {
            world::apply(&mut world, command, &mut events);
        }
        diagnostics.handle(&events);
    }

    let mut outcomes = Vec::new();
    for entry in &tracked {
        let weights = query::species(&world, entry.species)
            .context("tracked species is missing from the store")?
            .weights();
        diagnostics.observe_final(entry.species, weights);

        if evaluate_checks {
            let report = diagnostics
                .report()
                .species
                .iter()
                .find(|report| report.species == entry.species)
                .context("tracked species is missing from the report")?;
            outcomes.extend(species_checks(entry, weights, report));
        }
    }
    for outcome in outcomes {
        diagnostics.push_check(outcome);
    }

    Ok(diagnostics.into_report())
}

fn add_species(world: &mut World, name: &str) -> Result<SpeciesId> {
    let mut events = Vec::new();
    world::apply(
        world,
        Command::AddSpecies {
            name: name.to_owned(),
        },
        &mut events,
    );
    events
        .iter()
        .find_map(|event| match event {
            Event::SpeciesAdded { species } => Some(*species),
            _ => None,
        })
        .with_context(|| format!("store did not register species `{name}`"))
}

/// Checks whose analytic expectation applies to the species' population and history.
fn species_checks(entry: &Tracked<'_>, weights: &[f64], report: &SpeciesReport) -> Vec<CheckOutcome> {
    let initial = entry.initial.len() as u64;
    let ratio = entry.spec.resampling.target_ratio.get();
    let mut outcomes = vec![checks::conservation_check(&entry.initial, weights, initial)];

    match entry.spec.population {
        Population::Uniform { weight, .. } => {
            outcomes.push(checks::uniform_count_check(
                initial,
                weights.len() as u64,
                ratio,
                report.passes,
            ));
            let expected = weight * ratio.powi(report.passes as i32);
            outcomes.push(checks::uniform_weight_check(weights, expected));
        }
        Population::Gaussian {
            mean, deviation, ..
        } => {
            let (Some(level), 1) = (report.level_weight_min, report.passes) else {
                debug!(
                    species = %entry.spec.name,
                    passes = report.passes,
                    "gaussian checks need exactly one resampling pass"
                );
                return outcomes;
            };

            let mut before = entry.initial.clone();
            let mut after = weights.to_vec();
            before.sort_unstable_by(f64::total_cmp);
            after.sort_unstable_by(f64::total_cmp);
            outcomes.push(checks::tail_invariance_check(&before, &after, level));

            if entry.spec.resampling.strategy == LevelStrategy::AverageWeight {
                if let Some(stats) = report.before {
                    outcomes.push(checks::level_weight_check(level, stats.mean, ratio));
                }
                let leveled = weights.iter().filter(|&&weight| weight == level).count();
                outcomes.push(checks::gaussian_leveled_count_check(
                    initial,
                    leveled as u64,
                    mean,
                    deviation,
                    ratio,
                ));
            }
        }
    }
    outcomes
}

/// Formats the report for terminal output.
pub(crate) fn render(report: &ResamplingReport) -> String {
    let mut out = String::new();
    for entry in &report.species {
        let count = |stats: Option<WeightStatistics>| stats.map_or(0, |stats| stats.count);
        let _ = writeln!(
            out,
            "{}: {} -> {} particles over {} pass(es), {} cells resampled, {} skipped",
            entry.name,
            count(entry.before),
            count(entry.after),
            entry.passes,
            entry.cells_resampled,
            entry.cells_skipped,
        );
        if let (Some(before), Some(after)) = (entry.before, entry.after) {
            let _ = writeln!(
                out,
                "  weight: total {:.6} -> {:.6}, mean {:.6} -> {:.6}",
                before.sum, after.sum, before.mean, after.mean
            );
        }
        if let (Some(min), Some(max)) = (entry.level_weight_min, entry.level_weight_max) {
            let _ = writeln!(out, "  level weight: {min:.6} .. {max:.6}");
        }
    }
    for check in &report.checks {
        let verdict = if check.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(
            out,
            "[{verdict}] {}: observed {:.6}, expected {:.6}, tolerance {:.3e}",
            check.name, check.observed, check.expected, check.tolerance
        );
    }
    out
}
