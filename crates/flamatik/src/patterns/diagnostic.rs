//! Wiring checks: light each geometric grouping in turn so a crew can see
//! the layout file matches the physical sculpture

use std::time::Duration;

use super::geometry::{EQUATORS, FACES, HALOS, NEIGHBORS, OPPOSITE, ORTHOGONALS, TRIPLES};
use super::spatial::require_faces;
use crate::pattern::{PatternContext, PatternError};

const FRAME: f64 = 0.3;

pub fn test_equators(ctx: &PatternContext) -> Result<(), PatternError> {
    flash_groups(ctx, EQUATORS.iter().map(|e| e.as_slice()), FRAME)
}

pub fn test_halos(ctx: &PatternContext) -> Result<(), PatternError> {
    let frame = ctx.params().delay.unwrap_or(FRAME);
    flash_groups(ctx, HALOS.iter().map(|h| h.as_slice()), frame)
}

pub fn test_neighbors(ctx: &PatternContext) -> Result<(), PatternError> {
    flash_groups(ctx, NEIGHBORS.iter().map(|n| n.as_slice()), FRAME)
}

pub fn test_orthogonals(ctx: &PatternContext) -> Result<(), PatternError> {
    flash_groups(ctx, ORTHOGONALS.iter().map(|o| o.as_slice()), FRAME)
}

pub fn test_triples(ctx: &PatternContext) -> Result<(), PatternError> {
    flash_groups(ctx, TRIPLES.iter().map(|t| t.as_slice()), FRAME)
}

/// Each face together with its opposite, one pair after another
pub fn test_opposite(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let frame = ctx.params().delay_or(FRAME);
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    for face in 0..FACES {
        for on in [true, false] {
            ctx.set_solenoid(Some(face), on)?;
            ctx.set_solenoid(Some(OPPOSITE[face]), on)?;
            if on {
                ctx.sleep(frame)?;
            }
        }
    }

    finish(ctx)
}

/// Each group on for `frame` seconds, then off for as long
fn flash_groups<'a>(
    ctx: &PatternContext,
    groups: impl Iterator<Item = &'a [usize]>,
    frame: f64,
) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    for group in groups {
        for on in [true, false] {
            for &n in group {
                ctx.set_solenoid(Some(n), on)?;
            }
            ctx.sleep_secs(frame)?;
        }
    }

    finish(ctx)
}

fn finish(ctx: &PatternContext) -> Result<(), PatternError> {
    ctx.fill_solenoids(false)?;
    ctx.sleep(Duration::from_millis(300))
}
