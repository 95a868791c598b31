//! Train/validation/test partitioning
//!
//! Stratified splits are seeded so the same request on the same data
//! always yields the same partitions; stratifying by outcome class
//! keeps small leagues from collapsing a class out of the test set.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::Outcome;

/// How the settled matches are partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    Stratified,
    Chronological,
}

impl std::str::FromStr for SplitStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stratified" => Ok(SplitStrategy::Stratified),
            "chronological" => Ok(SplitStrategy::Chronological),
            _ => Err(format!(
                "Unknown split strategy: {}. Use stratified or chronological.",
                s
            )),
        }
    }
}

/// Row indices for the three partitions
#[derive(Debug, Clone, Default)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split per strategy. `test_size` is the test fraction; validation is
/// carved from the remainder at the same fraction. Inputs are assumed
/// to be in chronological order.
pub fn split(
    labels: &[Outcome],
    strategy: SplitStrategy,
    test_size: f64,
    seed: u64,
) -> SplitIndices {
    match strategy {
        SplitStrategy::Stratified => stratified(labels, test_size, seed),
        SplitStrategy::Chronological => chronological(labels.len(), test_size),
    }
}

fn stratified(labels: &[Outcome], test_size: f64, seed: u64) -> SplitIndices {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut result = SplitIndices::default();

    // Per-class shuffle keeps class proportions in every partition
    for class in [Outcome::Home, Outcome::Draw, Outcome::Away] {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        rows.shuffle(&mut rng);

        let n = rows.len();
        let n_test = ((n as f64) * test_size).round() as usize;
        let n_valid = (((n - n_test) as f64) * test_size).round() as usize;

        result.test.extend(rows.drain(..n_test.min(n)));
        result.valid.extend(rows.drain(..n_valid.min(rows.len())));
        result.train.extend(rows);
    }

    result.train.sort_unstable();
    result.valid.sort_unstable();
    result.test.sort_unstable();
    result
}

fn chronological(n: usize, test_size: f64) -> SplitIndices {
    let n_test = ((n as f64) * test_size).round() as usize;
    let n_valid = (((n - n_test) as f64) * test_size).round() as usize;
    let train_end = n - n_test - n_valid;
    let valid_end = n - n_test;

    SplitIndices {
        train: (0..train_end).collect(),
        valid: (train_end..valid_end).collect(),
        test: (valid_end..n).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<Outcome> {
        (0..n)
            .map(|i| match i % 3 {
                0 => Outcome::Home,
                1 => Outcome::Draw,
                _ => Outcome::Away,
            })
            .collect()
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let labels = labels(90);
        let s = split(&labels, SplitStrategy::Stratified, 0.2, 42);

        let mut all: Vec<usize> = s
            .train
            .iter()
            .chain(s.valid.iter())
            .chain(s.test.iter())
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..90).collect::<Vec<_>>());
        assert_eq!(s.test.len(), 18);
        assert!(s.train.len() > s.valid.len());
    }

    #[test]
    fn test_stratified_keeps_every_class_in_test() {
        let labels = labels(90);
        let s = split(&labels, SplitStrategy::Stratified, 0.2, 42);
        for class in [Outcome::Home, Outcome::Draw, Outcome::Away] {
            assert!(
                s.test.iter().any(|&i| labels[i] == class),
                "class {} missing from test partition",
                class
            );
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let labels = labels(120);
        let a = split(&labels, SplitStrategy::Stratified, 0.25, 7);
        let b = split(&labels, SplitStrategy::Stratified, 0.25, 7);
        assert_eq!(a.train, b.train);
        assert_eq!(a.valid, b.valid);
        assert_eq!(a.test, b.test);

        let c = split(&labels, SplitStrategy::Stratified, 0.25, 8);
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_chronological_puts_latest_in_test() {
        let labels = labels(100);
        let s = split(&labels, SplitStrategy::Chronological, 0.2, 0);
        assert_eq!(s.test, (80..100).collect::<Vec<_>>());
        assert_eq!(s.valid, (64..80).collect::<Vec<_>>());
        assert_eq!(s.train, (0..64).collect::<Vec<_>>());
    }
}
