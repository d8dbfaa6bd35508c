//! Patterns that don't care about the sculpture's shape

use std::time::Duration;

use crate::pattern::{PatternContext, PatternError};

/// Valves settle slower than solenoids
const SETTLE: Duration = Duration::from_millis(500);

/// All fire off, apertures closed
pub fn stop(ctx: &PatternContext) -> Result<(), PatternError> {
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;
    ctx.sleep(SETTLE)
}

/// Apertures open, solenoids closed: ready to fire
pub fn start(ctx: &PatternContext) -> Result<(), PatternError> {
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;
    ctx.sleep(SETTLE)
}

/// Same outputs as `start`, meant to be left running while an operator
/// plays the buttons
pub fn manual(ctx: &PatternContext) -> Result<(), PatternError> {
    start(ctx)
}

/// Fire one nozzle, a group, or everything, on and off `repeat` times
pub fn poof(ctx: &PatternContext) -> Result<(), PatternError> {
    let params = ctx.params();
    let wait = params.delay_or(3.0);
    let group = params.group_or(1);
    params.check_span(ctx.nozzles(), group)?;

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;
    ctx.sleep(SETTLE)?;

    for _ in 0..params.repeat {
        set_span(ctx, params.nozzle, group, true)?;
        ctx.sleep(wait)?;
        set_span(ctx, params.nozzle, group, false)?;
        ctx.sleep(wait)?;
    }
    Ok(())
}

/// Like `poof`, but with the solenoids held closed and the apertures
/// doing the switching
pub fn appoof(ctx: &PatternContext) -> Result<(), PatternError> {
    let params = ctx.params();
    let wait = params.delay_or(3.0);
    let group = params.group_or(1);
    params.check_span(ctx.nozzles(), group)?;

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;
    ctx.sleep(SETTLE)?;

    for _ in 0..params.repeat {
        set_aperture_span(ctx, params.nozzle, group, 1.0)?;
        ctx.sleep(wait)?;
        set_aperture_span(ctx, params.nozzle, group, 0.0)?;
        ctx.sleep(wait)?;
    }
    Ok(())
}

/// Solenoids open, apertures ramp from closed to open over `delay` seconds
pub fn pulse(ctx: &PatternContext) -> Result<(), PatternError> {
    const UPDATE: f64 = 0.2;
    let settle = Duration::from_millis(100);

    let params = ctx.params();
    let period = params.delay.unwrap_or(5.0);
    let group = params.group_or(1);
    params.check_span(ctx.nozzles(), group)?;

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;
    ctx.sleep(settle)?;
    ctx.fill_solenoids(true)?;
    ctx.sleep(settle)?;

    let steps = ((period / UPDATE) as usize).max(1);
    for _ in 0..params.repeat {
        for step in 0..steps {
            let flow = step as f32 / steps as f32;
            match params.nozzle {
                Some(n) => {
                    for i in n..n + group {
                        ctx.set_aperture(Some(i), flow)?;
                    }
                }
                None => ctx.fill_apertures(flow)?,
            }
            ctx.sleep_secs(UPDATE)?;
        }
    }

    ctx.fill_apertures(0.0)?;
    ctx.sleep(settle)
}

/// Walk a block of `group` nozzles around the sculpture
pub fn group(ctx: &PatternContext) -> Result<(), PatternError> {
    let params = ctx.params();
    let wait = params.delay_or(3.0);
    let size = params.group_or(5);
    let nozzles = ctx.nozzles();
    if size == 0 || size > nozzles {
        return Err(PatternError::InvalidParams(format!(
            "group size {size} must be between 1 and {nozzles}"
        )));
    }

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;
    ctx.sleep(Duration::from_secs(1))?;
    ctx.fill_apertures(1.0)?;
    ctx.sleep(Duration::from_secs(1))?;

    let mut first = 0;
    for _ in 0..params.repeat {
        let end = (first + size).min(nozzles);
        for i in first..end {
            ctx.set_solenoid(Some(i), true)?;
        }
        ctx.sleep(wait)?;
        for i in first..end {
            ctx.set_solenoid(Some(i), false)?;
        }

        first += size;
        if first >= nozzles {
            first = 0;
        }
    }
    Ok(())
}

/// One nozzle at a time, three laps
pub fn fast(ctx: &PatternContext) -> Result<(), PatternError> {
    let step = Duration::from_millis(300);
    let nozzles = ctx.nozzles();

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;
    ctx.sleep(step)?;

    for lit in (0..nozzles).cycle().take(nozzles * 3) {
        for i in 0..nozzles {
            ctx.set_solenoid(Some(i), i == lit)?;
        }
        ctx.sleep(step)?;
    }

    ctx.fill_solenoids(false)?;
    ctx.sleep(step)
}

/// Sweep the aperture through its full range with fire on, up then down
pub fn aperture(ctx: &PatternContext) -> Result<(), PatternError> {
    const STEPS: usize = 20;

    let params = ctx.params();
    let sweep = params.delay.unwrap_or(3.0);
    let group = params.group_or(1);
    params.check_span(ctx.nozzles(), group)?;
    let per_step = sweep / STEPS as f64;

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;
    ctx.sleep(SETTLE)?;

    for _ in 0..params.repeat {
        ctx.set_solenoid(params.nozzle, true)?;
        ctx.sleep(Duration::from_secs(2))?;
        for t in linspace(0.0, 1.0, STEPS) {
            ctx.fill_apertures(t)?;
            ctx.sleep_secs(per_step)?;
        }
        ctx.sleep(Duration::from_secs(2))?;
        ctx.fill_solenoids(false)?;
        ctx.sleep(Duration::from_secs(1))?;

        ctx.set_solenoid(params.nozzle, true)?;
        ctx.sleep(Duration::from_secs(1))?;
        for t in linspace(1.0, 0.0, STEPS) {
            ctx.fill_apertures(t)?;
            ctx.sleep_secs(per_step)?;
        }
        ctx.sleep(Duration::from_secs(2))?;

        ctx.fill_solenoids(false)?;
        ctx.fill_apertures(0.0)?;
        ctx.sleep(Duration::from_secs(1))?;
    }
    Ok(())
}

/// `count` evenly spaced values from `from` to `to`, both included
fn linspace(from: f32, to: f32, count: usize) -> impl Iterator<Item = f32> {
    let span = (count.max(2) - 1) as f32;
    (0..count).map(move |i| from + (to - from) * i as f32 / span)
}

fn set_span(ctx: &PatternContext, nozzle: Option<usize>, group: usize, on: bool) -> Result<(), PatternError> {
    match nozzle {
        Some(n) => {
            for i in n..n + group {
                ctx.set_solenoid(Some(i), on)?;
            }
            Ok(())
        }
        None => ctx.fill_solenoids(on),
    }
}

fn set_aperture_span(
    ctx: &PatternContext,
    nozzle: Option<usize>,
    group: usize,
    value: f32,
) -> Result<(), PatternError> {
    match nozzle {
        Some(n) => {
            for i in n..n + group {
                ctx.set_aperture(Some(i), value)?;
            }
            Ok(())
        }
        None => ctx.fill_apertures(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::pattern::{PatternHandle, PatternParams, PatternRegistry, JOIN_GRACE};
    use crate::state::StateStore;

    #[test]
    fn test_appoof_switches_apertures_only() {
        let store = StateStore::with_size(5, 0);
        let params = PatternParams {
            nozzle: Some(1),
            delay: Some(0.001),
            group: Some(2),
            repeat: 2,
        };
        let handle = PatternHandle::start(
            "appoof",
            Arc::new(appoof),
            store.clone(),
            params,
            Arc::new(PatternRegistry::new()),
        )
        .unwrap();
        assert!(handle.join(JOIN_GRACE));

        assert_eq!(store.solenoids(), vec![false; 5]);
        assert_eq!(store.apertures(), vec![1.0, 0.0, 0.0, 1.0, 1.0]);
    }


    #[test]
    fn test_linspace_endpoints() {
        let up: Vec<f32> = linspace(0.0, 1.0, 20).collect();
        assert_eq!(up.len(), 20);
        assert_eq!(up[0], 0.0);
        assert_eq!(up[19], 1.0);

        let down: Vec<f32> = linspace(1.0, 0.0, 5).collect();
        assert_eq!(down, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
    }
}
