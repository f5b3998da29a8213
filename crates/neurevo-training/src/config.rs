//! Immutable training configuration.
//!
//! A [`TrainingConfig`] is built once (usually deserialized from JSON and then
//! adjusted by command-line overrides), checked with
//! [`TrainingConfig::validate`], and shared as `Arc<TrainingConfig>` by every
//! component that needs it. Nothing in this crate reads configuration from
//! global state.

use neurevo_genome::{
    CrossoverPolicy, GenomeError, GenomeFactory, GenomeKind, NetworkShape, ThinkParams,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    #[display("population size must be at least 2, got {population}")]
    PopulationTooSmall { population: usize },
    #[display(
        "population {population} with survivor rate {survivor_rate} keeps {survivors} survivors, at least 2 required"
    )]
    TooFewSurvivors {
        population: usize,
        survivor_rate: f64,
        survivors: usize,
    },
    #[display("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[display("{name} must be a finite number, got {value}")]
    NotFinite { name: &'static str, value: f32 },
    #[display("worker count must be at least 1")]
    NoWorkers,
    #[display("seed policy yields no simulations")]
    NoSeeds,
    #[display("invalid network shape")]
    Network(GenomeError),
}

/// Which survivors are exempt from mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "kebab-case")]
pub enum ChampionPolicy {
    /// Every survivor; survivors are carried forward verbatim.
    AllSurvivors,
    /// The best `count` survivors (at most all survivors).
    Fixed { count: usize },
    /// Leading survivors whose fitness is strictly greater than
    /// `mean fitness * threshold_multiplier`.
    Performance { threshold_multiplier: f32 },
}

impl Default for ChampionPolicy {
    fn default() -> Self {
        Self::AllSurvivors
    }
}

/// Seeds passed to the simulation for every brain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedPolicy {
    /// Every brain plays the same seeded simulations; results are reproducible.
    Predetermined(Vec<u64>),
    /// Every brain plays `simulations` unseeded runs.
    Random { simulations: usize },
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self::Predetermined(vec![11, 23, 37, 41, 59])
    }
}

impl SeedPolicy {
    /// Per-simulation seeds; `None` lets the simulation pick its own.
    #[must_use]
    pub fn seeds(&self) -> Vec<Option<u64>> {
        match self {
            Self::Predetermined(seeds) => seeds.iter().copied().map(Some).collect(),
            Self::Random { simulations } => vec![None; *simulations],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Genome representation evolved by the experiment.
    pub algorithm: GenomeKind,
    pub population_size: usize,
    /// Fraction of each generation carried into the next one.
    pub survivor_rate: f64,
    /// Per-weight mutation probability.
    pub mutation_rate: f64,
    pub crossover: CrossoverPolicy,
    pub champions: ChampionPolicy,
    pub max_generations: usize,
    pub max_generations_without_progress: usize,
    /// Minimum gain over the best fitness so far that counts as progress.
    pub progress_improvement_threshold: f32,
    /// Number of evaluation workers (and simulation contexts required).
    pub worker_count: usize,
    pub seeds: SeedPolicy,
    pub network: NetworkShape,
    pub think: ThinkParams,
    /// Mirror every experiment log line to stderr.
    pub echo_logs: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithm: GenomeKind::WeightMatrix,
            population_size: 50,
            survivor_rate: 0.2,
            mutation_rate: 0.05,
            crossover: CrossoverPolicy::Uniform,
            champions: ChampionPolicy::default(),
            max_generations: 100,
            max_generations_without_progress: 20,
            progress_improvement_threshold: 1.0,
            worker_count: 4,
            seeds: SeedPolicy::default(),
            network: NetworkShape::default(),
            think: ThinkParams::default(),
            echo_logs: false,
        }
    }
}

impl TrainingConfig {
    /// Number of survivors kept from a generation of `population` brains.
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    #[must_use]
    pub fn survivor_count(&self, population: usize) -> usize {
        (population as f64 * self.survivor_rate).floor() as usize
    }

    #[must_use]
    pub fn genome_factory(&self) -> GenomeFactory {
        GenomeFactory::new(self.algorithm, self.network)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size < 2 {
            return Err(ConfigError::PopulationTooSmall {
                population: self.population_size,
            });
        }
        for (name, value) in [
            ("survivor rate", self.survivor_rate),
            ("mutation rate", self.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RateOutOfRange { name, value });
            }
        }
        let survivors = self.survivor_count(self.population_size);
        if survivors < 2 {
            return Err(ConfigError::TooFewSurvivors {
                population: self.population_size,
                survivor_rate: self.survivor_rate,
                survivors,
            });
        }
        if !self.progress_improvement_threshold.is_finite() {
            return Err(ConfigError::NotFinite {
                name: "progress improvement threshold",
                value: self.progress_improvement_threshold,
            });
        }
        if let ChampionPolicy::Performance {
            threshold_multiplier,
        } = self.champions
        {
            if !threshold_multiplier.is_finite() {
                return Err(ConfigError::NotFinite {
                    name: "champion threshold multiplier",
                    value: threshold_multiplier,
                });
            }
        }
        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.seeds.seeds().is_empty() {
            return Err(ConfigError::NoSeeds);
        }
        if self.algorithm == GenomeKind::WeightMatrix {
            self.network.validate().map_err(ConfigError::Network)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_survivor_count_floors() {
        let config = TrainingConfig {
            survivor_rate: 0.4,
            ..TrainingConfig::default()
        };
        assert_eq!(config.survivor_count(10), 4);
        assert_eq!(config.survivor_count(9), 3);
        assert_eq!(config.survivor_count(4), 1);
    }

    #[test]
    fn test_rejects_fewer_than_two_survivors() {
        let config = TrainingConfig {
            population_size: 9,
            survivor_rate: 0.2,
            ..TrainingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooFewSurvivors { survivors: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            TrainingConfig {
                population_size: 1,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                mutation_rate: 1.5,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                worker_count: 0,
                ..TrainingConfig::default()
            },
            TrainingConfig {
                seeds: SeedPolicy::Predetermined(vec![]),
                ..TrainingConfig::default()
            },
            TrainingConfig {
                seeds: SeedPolicy::Random { simulations: 0 },
                ..TrainingConfig::default()
            },
            TrainingConfig {
                champions: ChampionPolicy::Performance {
                    threshold_multiplier: f32::NAN,
                },
                ..TrainingConfig::default()
            },
            TrainingConfig {
                network: NetworkShape {
                    outputs: 0,
                    ..NetworkShape::default()
                },
                ..TrainingConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_parameterless_ignores_network_shape() {
        let config = TrainingConfig {
            algorithm: GenomeKind::Parameterless,
            network: NetworkShape {
                outputs: 0,
                ..NetworkShape::default()
            },
            ..TrainingConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_json_uses_defaults_for_missing_fields() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{
                "population_size": 10,
                "champions": { "scheme": "performance", "threshold_multiplier": 2.0 },
                "seeds": { "random": { "simulations": 3 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.population_size, 10);
        assert_eq!(
            config.champions,
            ChampionPolicy::Performance {
                threshold_multiplier: 2.0
            }
        );
        assert_eq!(config.seeds.seeds(), vec![None, None, None]);
        assert_eq!(config.survivor_rate, TrainingConfig::default().survivor_rate);

        let config: TrainingConfig =
            serde_json::from_str(r#"{ "champions": { "scheme": "all-survivors" } }"#).unwrap();
        assert_eq!(config.champions, ChampionPolicy::AllSurvivors);
        assert_eq!(TrainingConfig::default().champions, ChampionPolicy::AllSurvivors);

        assert!(serde_json::from_str::<TrainingConfig>(r#"{ "populaton_size": 10 }"#).is_err());
    }
}
