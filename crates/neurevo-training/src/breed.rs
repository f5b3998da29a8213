//! Breeding of the next population from an evaluated one.
//!
//! # Algorithm
//!
//! 1. Rank brains by fitness, descending (stable, so equal fitness keeps id order)
//! 2. Keep the top `floor(P * survivor_rate)` brains as survivors
//! 3. Pick the champions among the survivors (see [`ChampionPolicy`])
//! 4. Fill half of the remaining slots with children of survivor pairs and the
//!    other half with children of pairs drawn from the whole population
//! 5. Mutate every new brain except the champions
//!
//! Survivors keep their lineage even when mutated. Parents of a pair are
//! distinct and drawn proportionally to fitness.

use std::collections::BTreeSet;

use rand::{
    Rng,
    distr::{Distribution as _, weighted::WeightedIndex},
};

use crate::{
    brain::Brain,
    config::{ChampionPolicy, TrainingConfig},
    generation::GenerationError,
};

pub(crate) fn next_brains<R>(
    brains: &[Brain],
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<Vec<Brain>, GenerationError>
where
    R: Rng + ?Sized,
{
    let population = brains.len();
    let survivor_count = config.survivor_count(population);
    if survivor_count < 2 {
        return Err(GenerationError::TooFewSurvivors {
            population,
            survivors: survivor_count,
        });
    }

    let mut ranked = brains
        .iter()
        .map(|brain| {
            brain
                .fitness()
                .map(|fitness| (brain, fitness))
                .ok_or(GenerationError::NotEvaluated)
        })
        .collect::<Result<Vec<_>, _>>()?;
    ranked.sort_by(|(_, a), (_, b)| b.total_cmp(a));

    let fitnesses = ranked.iter().map(|(_, f)| *f).collect::<Vec<_>>();
    let champions = champion_ranks(&fitnesses[..survivor_count], &fitnesses, config.champions);

    let remaining = population - survivor_count;
    let survivor_children = remaining / 2;

    let mut next = Vec::with_capacity(population);
    next.extend(ranked[..survivor_count].iter().map(|(brain, _)| brain.carry_forward()));

    let mut children = Vec::with_capacity(remaining);
    for (pool, count) in [
        (&ranked[..survivor_count], survivor_children),
        (&ranked[..], remaining - survivor_children),
    ] {
        if count == 0 {
            continue;
        }
        let weights = pool.iter().map(|(_, f)| *f).collect::<Vec<_>>();
        let selector = PairSelector::new(&weights)?;
        for _ in 0..count {
            let (i, j) = selector.sample(rng);
            let child = pool[i]
                .0
                .genome()
                .crossover(pool[j].0.genome(), config.crossover, rng)?;
            children.push(child);
        }
    }

    for (rank, brain) in next.iter_mut().enumerate() {
        if !champions.contains(&rank) {
            brain.mutate(config.mutation_rate, rng);
        }
    }
    next.extend(children.into_iter().map(|mut genome| {
        genome.mutate(config.mutation_rate, rng);
        Brain::new(genome)
    }));

    debug_assert_eq!(next.len(), population);
    tracing::debug!(
        population,
        survivors = survivor_count,
        champions = champions.len(),
        "bred next generation"
    );
    Ok(next)
}

/// Ranks (positions in the descending order) of the survivors exempt from mutation.
fn champion_ranks(survivors: &[f32], all: &[f32], policy: ChampionPolicy) -> BTreeSet<usize> {
    match policy {
        ChampionPolicy::AllSurvivors => (0..survivors.len()).collect(),
        ChampionPolicy::Fixed { count } => (0..count.min(survivors.len())).collect(),
        ChampionPolicy::Performance {
            threshold_multiplier,
        } => {
            let threshold = mean(all) * threshold_multiplier;
            survivors
                .iter()
                .take_while(|fitness| **fitness > threshold)
                .enumerate()
                .map(|(rank, _)| rank)
                .collect()
        }
    }
}

#[expect(clippy::cast_precision_loss)]
fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

/// Draws two distinct indices with probability proportional to their weight.
#[derive(Debug)]
struct PairSelector<'a> {
    weights: &'a [f32],
    first: WeightedIndex<f32>,
}

impl<'a> PairSelector<'a> {
    fn new(weights: &'a [f32]) -> Result<Self, GenerationError> {
        let total = weights.iter().sum::<f32>();
        let invalid = GenerationError::InvalidFitness { total };
        if weights.len() < 2
            || !total.is_finite()
            || total <= 0.0
            || weights.iter().any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(invalid);
        }
        let first = WeightedIndex::new(weights).map_err(|_| invalid)?;
        Ok(Self { weights, first })
    }

    fn sample<R>(&self, rng: &mut R) -> (usize, usize)
    where
        R: Rng + ?Sized,
    {
        let i = self.first.sample(rng);
        let rest = self
            .weights
            .iter()
            .enumerate()
            .map(|(k, w)| if k == i { 0.0 } else { *w });
        let j = match WeightedIndex::new(rest) {
            Ok(second) => second.sample(rng),
            // only `i` had any weight left
            Err(_) => {
                let k = rng.random_range(0..self.weights.len() - 1);
                if k >= i { k + 1 } else { k }
            }
        };
        (i, j)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use neurevo_genome::{Genome, GenomeKind};
    use rand::SeedableRng as _;
    use rand_pcg::Pcg32;

    use super::*;
    use crate::{
        generation::Generation,
        test_util::{evaluated_generation, small_config},
    };

    #[expect(clippy::cast_precision_loss)]
    fn ascending(population: usize) -> Vec<f32> {
        (1..=population).map(|i| i as f32).collect()
    }

    #[test]
    fn test_breed_keeps_population_size() {
        let mut rng = Pcg32::seed_from_u64(7);
        let cases = [(2, 1.0), (5, 0.4), (10, 0.2), (17, 0.3), (100, 0.1), (33, 0.5)];
        for (population, rate) in cases {
            let generation =
                evaluated_generation(small_config(population, rate), &ascending(population));
            let next = generation.breed_with(&mut rng).unwrap();
            assert_eq!(next.len(), population, "P={population} r={rate}");
            assert_eq!(next.index(), 1);
            assert!(!next.is_evaluated());
            assert!(next.brains().iter().all(|b| b.fitness().is_none()));
        }
    }

    #[test]
    fn test_champions_survive_and_children_are_new() {
        let mut rng = Pcg32::seed_from_u64(3);
        let config = TrainingConfig {
            champions: ChampionPolicy::Fixed { count: 4 },
            ..small_config(10, 0.4)
        };
        let generation = evaluated_generation(config, &ascending(10));
        let next = generation.breed_with(&mut rng).unwrap();

        // The four fittest brains (ids 9, 8, 7, 6) lead the new generation.
        for (rank, id) in [9, 8, 7, 6].into_iter().enumerate() {
            assert!(next.brains()[rank].same_lineage(generation.brain(id).unwrap()));
        }
        for child in &next.brains()[4..] {
            assert!(
                generation
                    .brains()
                    .iter()
                    .all(|parent| !child.same_lineage(parent))
            );
        }
    }

    #[test]
    fn test_performance_champions_are_not_mutated() {
        let mut rng = Pcg32::seed_from_u64(11);
        let config = TrainingConfig {
            mutation_rate: 1.0,
            champions: ChampionPolicy::Performance {
                threshold_multiplier: 2.0,
            },
            ..small_config(10, 0.4)
        };
        // mean 10, so only fitness above 20 qualifies
        let fitnesses = [5.0, 25.0, 3.0, 18.0, 2.0, 22.0, 5.0, 15.0, 3.0, 2.0];
        let generation = evaluated_generation(config, &fitnesses);
        let next = generation.breed_with(&mut rng).unwrap();

        let best = generation.brain(1).unwrap();
        let second = generation.brain(5).unwrap();
        assert!(next.brains()[0].same_lineage(best));
        assert_eq!(next.brains()[0].genome(), best.genome());
        assert!(next.brains()[1].same_lineage(second));
        assert_eq!(next.brains()[1].genome(), second.genome());

        // Mutated survivors are still the same logical brains.
        for (rank, id) in [(2, 3), (3, 7)] {
            let parent = generation.brain(id).unwrap();
            assert!(next.brains()[rank].same_lineage(parent));
            assert_ne!(next.brains()[rank].genome(), parent.genome());
        }
    }

    #[test]
    fn test_default_config_carries_every_survivor_unmutated() {
        let mut rng = Pcg32::seed_from_u64(13);
        let config = TrainingConfig {
            population_size: 10,
            survivor_rate: 0.4,
            ..TrainingConfig::default()
        };
        let generation = evaluated_generation(config, &ascending(10));
        let next = generation.breed_with(&mut rng).unwrap();

        let unmutated_survivors = next
            .brains()
            .iter()
            .filter(|brain| {
                generation
                    .brains()
                    .iter()
                    .any(|parent| brain.same_lineage(parent) && brain.genome() == parent.genome())
            })
            .count();
        assert_eq!(unmutated_survivors, 4);
        for (rank, id) in [9, 8, 7, 6].into_iter().enumerate() {
            let parent = generation.brain(id).unwrap();
            assert!(next.brains()[rank].same_lineage(parent));
            assert_eq!(next.brains()[rank].genome(), parent.genome());
        }
        for child in &next.brains()[4..] {
            assert!(
                generation
                    .brains()
                    .iter()
                    .all(|parent| !child.same_lineage(parent))
            );
        }
    }

    #[test]
    fn test_champion_ranks() {
        let all = [25.0, 22.0, 18.0, 15.0, 5.0, 5.0, 3.0, 3.0, 2.0, 2.0];
        let performance = ChampionPolicy::Performance {
            threshold_multiplier: 2.0,
        };
        assert_eq!(
            champion_ranks(&all[..4], &all, performance),
            BTreeSet::from([0, 1])
        );
        assert_eq!(
            champion_ranks(&all[..4], &all, ChampionPolicy::Fixed { count: 9 }),
            BTreeSet::from([0, 1, 2, 3])
        );
        assert_eq!(
            champion_ranks(&all[..4], &all, ChampionPolicy::AllSurvivors),
            BTreeSet::from([0, 1, 2, 3])
        );
        assert!(champion_ranks(&all[..4], &all, ChampionPolicy::Fixed { count: 0 }).is_empty());
    }

    #[test]
    fn test_zero_fitness_cannot_be_selected_from() {
        let mut rng = Pcg32::seed_from_u64(5);
        let generation = evaluated_generation(small_config(6, 0.5), &[0.0; 6]);
        assert!(matches!(
            generation.breed_with(&mut rng),
            Err(GenerationError::InvalidFitness { .. })
        ));

        let generation = evaluated_generation(small_config(4, 0.5), &[3.0, -1.0, 2.0, 1.0]);
        assert!(matches!(
            generation.breed_with(&mut rng),
            Err(GenerationError::InvalidFitness { .. })
        ));
    }

    #[test]
    fn test_pair_is_distinct_even_when_one_weight_dominates() {
        let mut rng = Pcg32::seed_from_u64(9);
        let weights = [0.0, 4.0, 0.0];
        let selector = PairSelector::new(&weights).unwrap();
        for _ in 0..50 {
            let (i, j) = selector.sample(&mut rng);
            assert_eq!(i, 1);
            assert_ne!(i, j);
        }
    }

    #[test]
    fn test_breed_parameterless_population() {
        let mut rng = Pcg32::seed_from_u64(1);
        let config = Arc::new(TrainingConfig {
            algorithm: GenomeKind::Parameterless,
            ..small_config(8, 0.25)
        });
        let brains = (0..8u8)
            .map(|i| Brain::with_fitness(Genome::Parameterless, f32::from(i) + 1.0))
            .collect();
        let generation = Generation::restore(4, config, brains, true);
        let next = generation.breed_with(&mut rng).unwrap();
        assert_eq!(next.index(), 5);
        assert_eq!(next.len(), 8);
        assert!(next.brains().iter().all(|b| b.genome().is_parameterless()));
    }
}
