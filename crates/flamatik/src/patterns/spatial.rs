//! Patterns built on the sculpture's faces and the IMU
//!
//! Most of these are short one-shots meant to be repeated by the playlist;
//! `snake`, `equator_wave` and `trail` loop `repeat` times on their own.

use std::f64::consts::TAU;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use super::geometry::{self, EQUATORS, FACES, NEIGHBORS, NOZZLE_VECTORS, OPPOSITE, RINGS, STARS};
use crate::pattern::{PatternContext, PatternError};

pub(super) fn require_faces(ctx: &PatternContext) -> Result<(), PatternError> {
    if ctx.nozzles() < FACES {
        return Err(PatternError::InvalidParams(format!(
            "needs {FACES} nozzles on the sculpture, have {}",
            ctx.nozzles()
        )));
    }
    Ok(())
}

/// Half an equator lit one face at a time, in a random direction
pub fn comet(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    let (equator, offset, forward, rest) = {
        let mut rng = rand::thread_rng();
        let equator = EQUATORS[rng.gen_range(0..EQUATORS.len())];
        (
            equator,
            rng.gen_range(0..equator.len()),
            rng.gen_bool(0.5),
            0.3 + 0.7 * rng.gen::<f64>(),
        )
    };

    let len = equator.len();
    for i in 0..5 {
        let index = if forward {
            (offset + i) % len
        } else {
            (offset + len - i) % len
        };
        let nozzle = equator[index];
        ctx.set_solenoid(Some(nozzle), true)?;
        ctx.sleep(Duration::from_millis(200))?;
        ctx.set_solenoid(Some(nozzle), false)?;
    }

    ctx.sleep_secs(rest)
}

/// One random nozzle, on then off
pub fn random_nozzle_poof(ctx: &PatternContext) -> Result<(), PatternError> {
    let frame = ctx.params().delay_or(0.3);
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    let nozzle = rand::thread_rng().gen_range(0..ctx.nozzles().max(1));
    ctx.set_solenoid(Some(nozzle), true)?;
    ctx.sleep(frame)?;
    ctx.set_solenoid(Some(nozzle), false)?;
    ctx.sleep(frame)
}

/// A random star of five faces, and the faces opposite it
pub fn random_star_with_opposites_poof(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    let star = STARS[rand::thread_rng().gen_range(0..STARS.len())];
    for on in [true, false] {
        for &n in &star {
            ctx.set_solenoid(Some(n), on)?;
            ctx.set_solenoid(Some(OPPOSITE[n]), on)?;
        }
        ctx.sleep(Duration::from_millis(if on { 300 } else { 600 }))?;
    }
    Ok(())
}

/// Fire the face pointing most directly up, per the gravity vector.
/// Meant to be repeated many times (about 20 per second).
pub fn point_up(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    let up = ctx.sensors().gravity.map(|g| -(g as f64));
    if let Some(nozzle) = geometry::closest_nozzle(up, &geometry::all_faces()) {
        ctx.set_solenoid(Some(nozzle), true)?;
    }
    ctx.sleep(Duration::from_millis(50))
}

/// A ring of fire rolling around the horizontal equator, once per `delay`
/// seconds (default 2)
pub fn equator_wave(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let equator = EQUATORS[0];
    let count = equator.len() as f64;
    let frames = 4 * equator.len();
    let period = ctx.params().delay.unwrap_or(2.0);

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;
    for &n in &equator {
        ctx.set_solenoid(Some(n), true)?;
    }

    for _ in 0..ctx.params().repeat {
        for frame in 0..frames {
            let progress = frame as f64 / frames as f64;
            for &n in &equator {
                let phase = (n as f64 / count + progress) * TAU;
                let value = (0.5 + 0.5 * phase.cos()).max(0.0);
                ctx.set_aperture(Some(n), value as f32)?;
            }
            ctx.sleep_secs(period / frames as f64)?;
        }
    }

    ctx.fill_solenoids(false)
}

/// Bands of fire climbing from the lower star to the upper star
pub fn rings(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let frame = ctx.params().delay_or(0.15);
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    for ring in RINGS {
        set_faces(ctx, ring, true)?;
        ctx.sleep(frame)?;
        set_faces(ctx, ring, false)?;
    }
    Ok(())
}

/// Fire one random star, fading it in and back out over two seconds
pub fn random_star_fade(ctx: &PatternContext) -> Result<(), PatternError> {
    const FRAMES: usize = 25;
    const FADE: f64 = 1.0;

    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;

    let star = STARS[rand::thread_rng().gen_range(0..STARS.len())];
    set_faces(ctx, &star, true)?;

    for fading_out in [false, true] {
        for frame in 0..FRAMES {
            let progress = frame as f32 / FRAMES as f32;
            let value = if fading_out { 1.0 - progress } else { progress };
            for &n in &star {
                ctx.set_aperture(Some(n), value)?;
            }
            ctx.sleep_secs(FADE / FRAMES as f64)?;
        }
    }

    set_faces(ctx, &star, false)
}

/// Walk a random star one face at a time
pub fn random_star_spin_poof(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let star = STARS[rand::thread_rng().gen_range(0..STARS.len())];
    spin_poof(ctx, &star, 1)
}

/// Walk a random equator one face at a time, three laps
pub fn random_equator_spin_poof(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let equator = EQUATORS[rand::thread_rng().gen_range(0..EQUATORS.len())];
    spin_poof(ctx, &equator, 3)
}

fn spin_poof(ctx: &PatternContext, faces: &[usize], laps: usize) -> Result<(), PatternError> {
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    for _ in 0..laps {
        for &n in faces {
            ctx.set_solenoid(Some(n), true)?;
            ctx.sleep(Duration::from_millis(200))?;
            ctx.set_solenoid(Some(n), false)?;
        }
    }
    // a longer rest reads better when repeated
    ctx.sleep(Duration::from_millis(600))
}

/// Every face pointing up, stronger the more directly it points.
/// Meant to be repeated many times (about 20 per second).
pub fn trail_up(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(0.0)?;

    let up = ctx.sensors().gravity.map(|g| -(g as f64));
    fire_toward(ctx, up, |d| d)?;
    ctx.sleep(Duration::from_millis(50))
}

/// Fire trailing away from the direction the sculpture is swinging, as
/// seen by successive gravity readings. One frame per `repeat`.
pub fn trail(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let mut previous: Option<[f32; 3]> = None;

    for _ in 0..ctx.params().repeat {
        let gravity = ctx.sensors().gravity;
        match previous {
            None => previous = Some(gravity),
            // only a reading that moved on every axis counts as motion
            Some(p) if p.iter().zip(&gravity).all(|(a, b)| a != b) => {
                previous = Some(gravity);
                ctx.fill_solenoids(false)?;
                ctx.fill_apertures(0.0)?;
                let delta = std::array::from_fn(|k| f64::from(gravity[k] - p[k]));
                if let Some(motion) = normalize(delta) {
                    fire_toward(ctx, motion, |d| (d * d).min(1.0))?;
                }
            }
            Some(_) => {}
        }
        ctx.sleep(Duration::from_millis(50))?;
    }

    ctx.fill_solenoids(false)
}

/// The horizontal-equator face the sculpture is tilting toward.
/// Meant to be repeated.
pub fn equator_imu_single(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    if let Some(nozzle) = tilt_face(ctx) {
        ctx.set_solenoid(Some(nozzle), true)?;
    }
    ctx.sleep(Duration::from_millis(100))
}

/// The two horizontal-equator faces two steps either side of the one the
/// sculpture is tilting toward, roughly at right angles to the tilt.
/// Meant to be repeated.
pub fn equator_imu_ortho(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(1.0)?;

    let equator = EQUATORS[0];
    let len = equator.len();
    if let Some(i) = tilt_face(ctx).and_then(|n| equator.iter().position(|&e| e == n)) {
        ctx.set_solenoid(Some(equator[(i + len - 2) % len]), true)?;
        ctx.set_solenoid(Some(equator[(i + 2) % len]), true)?;
    }
    ctx.sleep(Duration::from_millis(100))
}

fn tilt_face(ctx: &PatternContext) -> Option<usize> {
    let gravity = ctx.sensors().gravity.map(f64::from);
    geometry::closest_nozzle(gravity, &EQUATORS[0])
}

/// Open every face with a positive component along `direction`, aperture
/// from `strength` of that component
fn fire_toward(
    ctx: &PatternContext,
    direction: [f64; 3],
    strength: impl Fn(f64) -> f64,
) -> Result<(), PatternError> {
    for (n, v) in NOZZLE_VECTORS.iter().enumerate() {
        let d = geometry::dot(*v, direction);
        if d > 0.0 {
            ctx.set_solenoid(Some(n), true)?;
            ctx.set_aperture(Some(n), strength(d) as f32)?;
        }
    }
    Ok(())
}

fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let norm = geometry::dot(v, v).sqrt();
    (norm.is_finite() && norm > 0.0).then(|| v.map(|x| x / norm))
}

fn set_faces(ctx: &PatternContext, faces: &[usize], on: bool) -> Result<(), PatternError> {
    for &n in faces {
        ctx.set_solenoid(Some(n), on)?;
    }
    Ok(())
}

const SNAKE_LENGTH: usize = 4;
const SNAKE_FRAMES: usize = 25;
const SNAKE_STEP: f64 = 0.5;
const SNAKE_MIN: f32 = 0.1;
const SNAKE_MAX: f32 = 1.0;

/// Faces the snake covers, head last
#[derive(Debug, Clone, PartialEq)]
struct Snake {
    body: Vec<usize>,
}

impl Snake {
    fn new(head: usize) -> Self {
        Self { body: vec![head] }
    }

    fn head(&self) -> usize {
        self.body[self.body.len() - 1]
    }

    fn tail(&self) -> usize {
        self.body[0]
    }

    /// Extend the head onto a free neighbor. Returns false if boxed in.
    fn grow(&mut self, rng: &mut impl Rng) -> bool {
        let mut options = NEIGHBORS[self.head()];
        options.shuffle(rng);
        match options.into_iter().find(|n| !self.body.contains(n)) {
            Some(n) => {
                self.body.push(n);
                true
            }
            None => false,
        }
    }

    /// Drop the tail, keeping at least the head
    fn shrink(&mut self) {
        if self.body.len() > 1 {
            self.body.remove(0);
        }
    }

    /// Drop the tail and grow a new head
    fn advance(&mut self, rng: &mut impl Rng) {
        self.shrink();
        self.grow(rng);
    }
}

/// A snake that emerges from a random face and crawls one face per step,
/// fading in at the head and out at the tail
pub fn snake(ctx: &PatternContext) -> Result<(), PatternError> {
    require_faces(ctx)?;
    let mut rng = rand::thread_rng();
    let mut snake = Snake::new(rng.gen_range(0..FACES));
    let range = SNAKE_MAX - SNAKE_MIN;

    ctx.fill_solenoids(false)?;

    for step in 0..params_steps(ctx) {
        ctx.fill_apertures(SNAKE_MIN)?;
        for &n in &snake.body {
            ctx.set_aperture(Some(n), SNAKE_MAX)?;
        }

        let emerging = step + 1 < SNAKE_LENGTH;
        for frame in 0..SNAKE_FRAMES {
            let progress = frame as f32 / SNAKE_FRAMES as f32;
            let head = snake.head();
            if frame == 0 {
                ctx.set_solenoid(Some(head), true)?;
            }
            ctx.set_aperture(Some(head), SNAKE_MIN + progress * range)?;

            if !emerging {
                let tail = snake.tail();
                ctx.set_aperture(Some(tail), SNAKE_MAX - progress * range)?;
                if frame == SNAKE_FRAMES - 1 {
                    ctx.set_solenoid(Some(tail), false)?;
                }
            }
            ctx.sleep_secs(SNAKE_STEP / SNAKE_FRAMES as f64)?;
        }

        if emerging {
            snake.grow(&mut rng);
        } else {
            snake.advance(&mut rng);
        }
    }

    ctx.fill_solenoids(false)
}

/// A snake that emerges, crawls, then shrinks back into its last face
/// over a fixed ten steps
pub fn snake_retreat(ctx: &PatternContext) -> Result<(), PatternError> {
    const STEPS: usize = 10;

    require_faces(ctx)?;
    let mut rng = rand::thread_rng();
    let mut snake = Snake::new(rng.gen_range(0..FACES));
    let range = SNAKE_MAX - SNAKE_MIN;

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(SNAKE_MIN)?;

    for step in 0..STEPS {
        ctx.fill_solenoids(false)?;
        set_faces(ctx, &snake.body, true)?;

        let growing = step + SNAKE_LENGTH <= STEPS;
        let shrinking = step + 1 >= SNAKE_LENGTH;
        for frame in 0..SNAKE_FRAMES {
            let progress = frame as f32 / SNAKE_FRAMES as f32;
            if growing {
                ctx.set_aperture(Some(snake.head()), SNAKE_MIN + progress * range)?;
            }
            if shrinking {
                ctx.set_aperture(Some(snake.tail()), SNAKE_MAX - progress * range)?;
            }
            if let Some(middle) = snake.body.get(1..snake.body.len().saturating_sub(1)) {
                for &n in middle {
                    ctx.set_aperture(Some(n), SNAKE_MAX)?;
                }
            }
            ctx.sleep_secs(SNAKE_STEP / SNAKE_FRAMES as f64)?;
        }

        if step + 1 < SNAKE_LENGTH {
            snake.grow(&mut rng);
        } else if step + SNAKE_LENGTH < STEPS {
            snake.advance(&mut rng);
        } else if step + 1 < STEPS {
            snake.shrink();
        }
    }

    ctx.fill_solenoids(false)?;
    ctx.fill_apertures(SNAKE_MIN)
}

fn params_steps(ctx: &PatternContext) -> usize {
    ctx.params().repeat.max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flameproto::SensorKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::pattern::{PatternHandle, PatternParams, PatternRegistry, JOIN_GRACE};
    use crate::state::StateStore;

    fn run_with_gravity(
        routine: fn(&PatternContext) -> Result<(), PatternError>,
        gravity: [f32; 3],
    ) -> StateStore {
        let store = StateStore::with_size(FACES, 0);
        store.update_sensor(SensorKind::Gravity, &gravity);
        let params = PatternParams {
            nozzle: None,
            delay: None,
            group: None,
            repeat: 1,
        };
        let handle = PatternHandle::start(
            "imu",
            Arc::new(routine),
            store.clone(),
            params,
            Arc::new(PatternRegistry::new()),
        )
        .unwrap();
        assert!(handle.join(JOIN_GRACE));
        store
    }

    fn lit(store: &StateStore) -> Vec<usize> {
        let solenoids = store.solenoids();
        (0..solenoids.len()).filter(|&n| solenoids[n]).collect()
    }

    #[test]
    fn test_equator_imu_single_follows_tilt() {
        let store = run_with_gravity(equator_imu_single, [1.0, 0.0, 0.0]);
        assert_eq!(lit(&store), vec![17]);
    }

    #[test]
    fn test_equator_imu_ortho_fires_either_side() {
        let store = run_with_gravity(equator_imu_ortho, [1.0, 0.0, 0.0]);
        assert_eq!(lit(&store), vec![15, 19]);
    }

    #[test]
    fn test_trail_up_scales_with_elevation() {
        let store = run_with_gravity(trail_up, [0.0, 0.0, -1.0]);
        assert_eq!(lit(&store), (0..10).collect::<Vec<_>>());

        let apertures = store.apertures();
        assert_eq!(apertures[0], 1.0);
        assert!((apertures[5] - 0.769).abs() < 1e-3);
        assert_eq!(apertures[12], 0.0);
    }

    #[test]
    fn test_small_sculpture_is_refused() {
        let store = StateStore::with_size(4, 0);
        let params = PatternParams {
            nozzle: None,
            delay: None,
            group: None,
            repeat: 1,
        };
        let registry = Arc::new(PatternRegistry::new());
        let handle =
            PatternHandle::start("rings", Arc::new(rings), store.clone(), params, registry).unwrap();
        assert!(handle.join(JOIN_GRACE));
        assert_eq!(store.solenoids(), vec![false; 4]);
    }

    #[test]
    fn test_snake_shrinks_to_its_head() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut snake = Snake::new(20);
        for _ in 0..SNAKE_LENGTH - 1 {
            snake.grow(&mut rng);
        }
        let head = snake.head();
        for _ in 0..SNAKE_LENGTH + 2 {
            snake.shrink();
        }
        assert_eq!(snake.body, vec![head]);
    }

    #[test]
    fn test_snake_moves_along_neighbors() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut snake = Snake::new(12);
        for _ in 0..SNAKE_LENGTH - 1 {
            assert!(snake.grow(&mut rng));
        }
        assert_eq!(snake.body.len(), SNAKE_LENGTH);

        for _ in 0..50 {
            snake.advance(&mut rng);
            for pair in snake.body.windows(2) {
                assert!(NEIGHBORS[pair[0]].contains(&pair[1]), "{:?}", snake.body);
            }
            let mut unique = snake.body.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique.len(), snake.body.len());
        }
    }

    #[test]
    fn test_single_face_snake_never_empties() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut snake = Snake::new(0);
        snake.advance(&mut rng);
        assert!(!snake.body.is_empty());
    }
}
