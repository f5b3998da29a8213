//! Weight operations used by the genetic operators.
//!
//! These helpers work on raw weight slices and single layer matrices. They are
//! used by [`WeightMatrixGenome`](crate::WeightMatrixGenome) to implement
//! initialization, crossover and mutation.
//!
//! # Operations
//!
//! - **Initialization**: [`random`] draws weights uniformly from `[-1, 1]`
//! - **Crossover**: [`uniform_crossover`] and [`split_crossover`]
//! - **Mutation**: [`mutate`] replaces weights with fresh uniform values
//!
//! # Design Decisions
//!
//! ## Replacement Mutation
//!
//! Mutation does not perturb a weight; it throws the old value away and draws a
//! new one from the same distribution used at initialization. A mutated weight
//! always differs from the value it replaces, so a rate of `1.0` rewrites the
//! whole genome.
//!
//! ## Split Crossover
//!
//! Split crossover keeps a rectangular block of the first parent's layer (the
//! top-left corner bounded by a random row cut and a random column cut) and
//! takes everything else from the second parent. Both cuts may be zero, in
//! which case the child is a copy of the second parent's layer.

use rand::Rng;

use crate::matrix::Matrix;

/// Lower bound of the weight range.
pub const MIN_WEIGHT: f32 = -1.0;
/// Upper bound of the weight range.
pub const MAX_WEIGHT: f32 = 1.0;

/// Creates a weight vector by applying a function to each index.
///
/// # Examples
///
/// ```
/// use neurevo_genome::weights;
///
/// let weights = weights::from_fn(|i| 1.0 / (i as f32 + 1.0), 3);
/// assert_eq!(weights, vec![1.0, 0.5, 1.0 / 3.0]);
/// ```
pub fn from_fn<F>(f: F, len: usize) -> Vec<f32>
where
    F: FnMut(usize) -> f32,
{
    (0..len).map(f).collect()
}

/// Samples one weight uniformly from `[MIN_WEIGHT, MAX_WEIGHT]`.
pub fn random_weight<R>(rng: &mut R) -> f32
where
    R: Rng + ?Sized,
{
    rng.random_range(MIN_WEIGHT..=MAX_WEIGHT)
}

/// Generates `len` weights uniformly distributed in `[MIN_WEIGHT, MAX_WEIGHT]`.
pub fn random<R>(rng: &mut R, len: usize) -> Vec<f32>
where
    R: Rng + ?Sized,
{
    from_fn(|_| random_weight(rng), len)
}

/// Inherits every weight independently from either parent with equal probability.
///
/// # Panics
///
/// Panics if parent slices have different lengths.
pub fn uniform_crossover<R>(p1: &[f32], p2: &[f32], rng: &mut R) -> Vec<f32>
where
    R: Rng + ?Sized,
{
    assert_eq!(p1.len(), p2.len());
    from_fn(
        |i| if rng.random::<bool>() { p1[i] } else { p2[i] },
        p1.len(),
    )
}

/// Crosses two layer matrices at a random row cut and column cut.
///
/// Weights at `row < row_cut && col < col_cut` come from `p1`; all others come
/// from `p2`. Cuts are drawn from `0..rows` and `0..cols`.
///
/// # Panics
///
/// Panics if the matrices have different shapes.
pub fn split_crossover<R>(p1: &Matrix, p2: &Matrix, rng: &mut R) -> Matrix
where
    R: Rng + ?Sized,
{
    assert_eq!(p1.shape(), p2.shape());
    let row_cut = rng.random_range(0..p1.rows());
    let col_cut = rng.random_range(0..p1.cols());
    split_at(p1, p2, row_cut, col_cut)
}

pub(crate) fn split_at(p1: &Matrix, p2: &Matrix, row_cut: usize, col_cut: usize) -> Matrix {
    let cols = p1.cols();
    Matrix::from_fn(p1.rows(), cols, |row, col| {
        let parent = if row < row_cut && col < col_cut {
            p1
        } else {
            p2
        };
        parent.values()[row * cols + col]
    })
}

/// Replaces each weight, with probability `rate`, by a fresh uniform value.
///
/// A rate of `0.0` (or below, or NaN) leaves the weights untouched; a rate of
/// `1.0` (or above) replaces every weight with a value different from the old one.
pub fn mutate<R>(weights: &mut [f32], rate: f64, rng: &mut R)
where
    R: Rng + ?Sized,
{
    if rate.is_nan() || rate <= 0.0 {
        return;
    }
    let rate = rate.min(1.0);
    for w in weights {
        if rng.random_bool(rate) {
            *w = replacement_weight(*w, rng);
        }
    }
}

fn replacement_weight<R>(old: f32, rng: &mut R) -> f32
where
    R: Rng + ?Sized,
{
    loop {
        let w = random_weight(rng);
        if w != old {
            break w;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use rand_pcg::Pcg32;

    use super::*;

    #[test]
    fn test_random_weights_stay_in_range() {
        let mut rng = Pcg32::seed_from_u64(1);
        let weights = random(&mut rng, 1000);
        assert!(weights.iter().all(|w| (MIN_WEIGHT..=MAX_WEIGHT).contains(w)));
    }

    #[test]
    fn test_uniform_crossover_picks_from_parents() {
        let mut rng = Pcg32::seed_from_u64(2);
        let p1 = vec![1.0; 200];
        let p2 = vec![-1.0; 200];
        let child = uniform_crossover(&p1, &p2, &mut rng);
        let from_p1 = child.iter().filter(|w| **w == 1.0).count();
        assert_eq!(child.iter().filter(|w| **w == -1.0).count(), 200 - from_p1);
        // Both parents contribute with equal probability.
        assert!((50..150).contains(&from_p1), "got {from_p1}");
    }

    #[test]
    fn test_split_at_takes_top_left_block_from_first_parent() {
        let p1 = Matrix::from_fn(3, 3, |_, _| 1.0);
        let p2 = Matrix::from_fn(3, 3, |_, _| 2.0);
        let child = split_at(&p1, &p2, 2, 1);
        let nested: Vec<Vec<f32>> = child.into();
        assert_eq!(
            nested,
            vec![
                vec![1.0, 2.0, 2.0],
                vec![1.0, 2.0, 2.0],
                vec![2.0, 2.0, 2.0]
            ]
        );

        let copy_of_second = split_at(&p1, &p2, 0, 3);
        assert_eq!(copy_of_second, p2);
    }

    #[test]
    fn test_mutate_rate_bounds() {
        let mut rng = Pcg32::seed_from_u64(3);
        let original = random(&mut rng, 64);

        let mut unchanged = original.clone();
        mutate(&mut unchanged, 0.0, &mut rng);
        assert_eq!(unchanged, original);

        let mut replaced = original.clone();
        mutate(&mut replaced, 1.0, &mut rng);
        assert!(replaced.iter().zip(&original).all(|(a, b)| a != b));
        assert!(replaced.iter().all(|w| (MIN_WEIGHT..=MAX_WEIGHT).contains(w)));
    }
}
