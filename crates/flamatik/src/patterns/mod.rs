//! The show's pattern library

pub mod basic;
pub mod diagnostic;
pub mod geometry;
pub mod spatial;

use tracing::warn;

use crate::pattern::{PatternContext, PatternError, PatternParams, PatternRegistry};

pub const MULTIPATTERN: &str = "multipattern";

/// Register every built-in routine under its show name
pub fn register_builtin(registry: &mut PatternRegistry) {
    registry.register("stop", basic::stop);
    registry.register("start", basic::start);
    registry.register("manual", basic::manual);
    registry.register("poof", basic::poof);
    registry.register("pulse", basic::pulse);
    registry.register("group", basic::group);
    registry.register("fast", basic::fast);
    registry.register("aperture", basic::aperture);
    registry.register("appoof", basic::appoof);

    registry.register("comet", spatial::comet);
    registry.register("random_nozzle_poof", spatial::random_nozzle_poof);
    registry.register("point_up", spatial::point_up);
    registry.register("snake", spatial::snake);
    registry.register(
        "random_star_with_opposites_poof",
        spatial::random_star_with_opposites_poof,
    );
    registry.register("equator_wave", spatial::equator_wave);
    registry.register("rings", spatial::rings);
    registry.register("trail", spatial::trail);
    registry.register("trail_up", spatial::trail_up);
    registry.register("snake_retreat", spatial::snake_retreat);
    registry.register("random_star_fade", spatial::random_star_fade);
    registry.register("random_star_spin_poof", spatial::random_star_spin_poof);
    registry.register("random_equator_spin_poof", spatial::random_equator_spin_poof);
    registry.register("equator_imu_single", spatial::equator_imu_single);
    registry.register("equator_imu_ortho", spatial::equator_imu_ortho);

    registry.register("test_equators", diagnostic::test_equators);
    registry.register("test_halos", diagnostic::test_halos);
    registry.register("test_neighbors", diagnostic::test_neighbors);
    registry.register("test_opposite", diagnostic::test_opposite);
    registry.register("test_orthogonals", diagnostic::test_orthogonals);
    registry.register("test_triples", diagnostic::test_triples);

    registry.register(MULTIPATTERN, multipattern);
}

/// Every other registered pattern once, in name order, `repeat` times.
/// A pattern that fails is logged and skipped.
pub fn multipattern(ctx: &PatternContext) -> Result<(), PatternError> {
    let names: Vec<String> = ctx
        .registry()
        .names()
        .into_iter()
        .filter(|name| *name != MULTIPATTERN)
        .map(str::to_string)
        .collect();

    for _ in 0..ctx.params().repeat {
        for name in &names {
            let params = PatternParams {
                repeat: 1,
                ..ctx.params().clone()
            };
            match ctx.run_nested_with(name, params) {
                Ok(()) => {}
                Err(PatternError::Terminated) => return Err(PatternError::Terminated),
                Err(e) => warn!(pattern = %name, error = %e, "skipping in multipattern"),
            }
        }
    }
    Ok(())
}
