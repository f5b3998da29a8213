//! "Dodge" arena: a small built-in simulation for training brains.
//!
//! The brain controls a paddle at the bottom of a unit square while hazards
//! fall from the top. A run ends on the first collision or after
//! [`MAX_STEPS`] steps. The score is the number of steps survived plus a
//! bonus for every hazard that left the arena.
//!
//! # Sensor
//!
//! [`ArenaSensor`] produces [`SENSOR_FEATURES`] values, all roughly in `[-1, 1]`:
//!
//! | index | feature                                                  |
//! |-------|----------------------------------------------------------|
//! | 0     | paddle position                                          |
//! | 1..7  | `(dx, dy)` of the three lowest hazards, `(0, 1)` if none |
//! | 7     | elapsed fraction of the run                              |
//!
//! # Actions
//!
//! [`ACTIONS`] booleans: move left, move right, sprint, hold still.

use neurevo_genome::{Genome, Sense, ThinkParams};
use neurevo_training::{Simulation, SimulationError};
use rand::{Rng, SeedableRng as _};
use rand_distr::{Distribution as _, Normal, NormalError};
use rand_pcg::Pcg32;

pub const SENSOR_FEATURES: usize = 8;
pub const ACTIONS: usize = 4;

pub const MAX_STEPS: usize = 600;
const SPAWN_INTERVAL: usize = 12;
const SENSED_HAZARDS: usize = 3;

const PADDLE_Y: f32 = 0.95;
const PADDLE_SPEED: f32 = 0.015;
const PADDLE_HALF_WIDTH: f32 = 0.04;
const HAZARD_RADIUS: f32 = 0.025;
const MIN_HAZARD_SPEED: f32 = 0.004;
const DODGE_BONUS: f32 = 5.0;

const ACTION_LEFT: usize = 0;
const ACTION_RIGHT: usize = 1;
const ACTION_SPRINT: usize = 2;
const ACTION_HOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Hazard {
    x: f32,
    y: f32,
    speed: f32,
}

/// Arena state. Reused across runs to keep the hazard buffer allocated.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    paddle_x: f32,
    hazards: Vec<Hazard>,
    step: usize,
    dodged: usize,
}

impl Arena {
    fn reset(&mut self) {
        self.paddle_x = 0.5;
        self.hazards.clear();
        self.step = 0;
        self.dodged = 0;
    }

    #[expect(clippy::cast_precision_loss)]
    fn score(&self) -> f32 {
        self.step as f32 + self.dodged as f32 * DODGE_BONUS
    }

    fn spawn<R>(&mut self, speed: &Normal<f32>, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        self.hazards.push(Hazard {
            x: rng.random_range(0.0..1.0),
            y: 0.0,
            speed: speed.sample(rng).max(MIN_HAZARD_SPEED),
        });
    }

    /// Advances one step; returns `false` if the paddle was hit.
    fn advance(&mut self, actions: &[bool]) -> bool {
        let action = |i: usize| actions.get(i).copied().unwrap_or(false);
        if !action(ACTION_HOLD) {
            let direction = match (action(ACTION_LEFT), action(ACTION_RIGHT)) {
                (true, false) => -1.0,
                (false, true) => 1.0,
                _ => 0.0,
            };
            let speed = if action(ACTION_SPRINT) {
                PADDLE_SPEED * 2.0
            } else {
                PADDLE_SPEED
            };
            self.paddle_x = (self.paddle_x + direction * speed).clamp(0.0, 1.0);
        }

        for hazard in &mut self.hazards {
            hazard.y += hazard.speed;
        }
        let before = self.hazards.len();
        self.hazards.retain(|h| h.y <= 1.0 + HAZARD_RADIUS);
        self.dodged += before - self.hazards.len();
        self.step += 1;

        !self.hazards.iter().any(|h| {
            (h.y - PADDLE_Y).abs() < HAZARD_RADIUS
                && (h.x - self.paddle_x).abs() < PADDLE_HALF_WIDTH + HAZARD_RADIUS
        })
    }
}

/// Reads the paddle's surroundings from an [`Arena`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ArenaSensor;

impl Sense<Arena> for ArenaSensor {
    #[expect(clippy::cast_precision_loss)]
    fn sense(&self, arena: &Arena) -> Vec<f32> {
        let mut lowest = arena.hazards.iter().collect::<Vec<_>>();
        lowest.sort_by(|a, b| b.y.total_cmp(&a.y));

        let mut features = Vec::with_capacity(SENSOR_FEATURES);
        features.push(arena.paddle_x * 2.0 - 1.0);
        for i in 0..SENSED_HAZARDS {
            match lowest.get(i) {
                Some(h) => features.extend([h.x - arena.paddle_x, PADDLE_Y - h.y]),
                None => features.extend([0.0, 1.0]),
            }
        }
        features.push(arena.step as f32 / MAX_STEPS as f32);
        features
    }
}

/// One simulation context: an arena plus the parameters brains think with.
#[derive(Debug, Clone)]
pub struct DodgeSimulation {
    params: ThinkParams,
    arena: Arena,
    hazard_speed: Normal<f32>,
}

impl DodgeSimulation {
    pub fn new(params: ThinkParams) -> Result<Self, NormalError> {
        Ok(Self {
            params,
            arena: Arena::default(),
            hazard_speed: Normal::new(0.012, 0.004)?,
        })
    }
}

impl Simulation for DodgeSimulation {
    fn run(&mut self, genome: &Genome, seed: Option<u64>) -> Result<f32, SimulationError> {
        let mut rng = match seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_rng(&mut rand::rng()),
        };
        self.arena.reset();
        while self.arena.step < MAX_STEPS {
            if self.arena.step % SPAWN_INTERVAL == 0 {
                self.arena.spawn(&self.hazard_speed, &mut rng);
            }
            let actions = genome.sense_and_think(&ArenaSensor, &self.arena, &self.params)?;
            if !self.arena.advance(&actions) {
                break;
            }
        }
        Ok(self.arena.score())
    }
}

#[cfg(test)]
mod tests {
    use neurevo_genome::{GenomeFactory, GenomeKind, NetworkShape};

    use super::*;

    #[test]
    fn test_sensor_shape_matches_default_network() {
        let mut arena = Arena::default();
        arena.reset();
        assert_eq!(ArenaSensor.sense(&arena).len(), SENSOR_FEATURES);
        assert_eq!(NetworkShape::default().inputs, SENSOR_FEATURES);
        assert_eq!(NetworkShape::default().outputs, ACTIONS);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let mut rng = Pcg32::seed_from_u64(42);
        let genome = GenomeFactory::new(GenomeKind::WeightMatrix, NetworkShape::default())
            .create(&mut rng);
        let mut sim = DodgeSimulation::new(ThinkParams::default()).unwrap();
        let first = sim.run(&genome, Some(7)).unwrap();
        let second = sim.run(&genome, Some(7)).unwrap();
        assert_eq!(first, second);
        assert!(first >= 1.0);
    }

    #[test]
    fn test_parameterless_brain_plays() {
        let mut sim = DodgeSimulation::new(ThinkParams::default()).unwrap();
        let score = sim.run(&Genome::Parameterless, Some(3)).unwrap();
        assert!(score.is_finite() && score > 0.0);
    }

    #[test]
    fn test_hold_keeps_paddle_still() {
        let mut arena = Arena::default();
        arena.reset();
        assert!(arena.advance(&[true, false, true, true]));
        assert_eq!(arena.paddle_x, 0.5);
        assert!(arena.advance(&[false, true, false, false]));
        assert!((arena.paddle_x - (0.5 + PADDLE_SPEED)).abs() < 1e-6);
    }
}
