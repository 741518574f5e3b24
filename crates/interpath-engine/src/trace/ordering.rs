//! Submission order of block formulas.
//!
//! An ordering is a permutation of the positions `0..n`: entry `k` names the
//! logical position of the formula submitted `k`-th. Orderings only change
//! when formulas reach the solver; interpolants are always reported by
//! logical position.

use std::collections::BTreeMap;

use interpath_smt::terms::{is_internal_symbol, program_variable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::program::{LoopStructure, VariableClassification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation(Vec<usize>);

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Self((0..n).collect())
    }

    /// Accept `order` only when it is a permutation of `0..order.len()`.
    pub fn from_vec(order: Vec<usize>) -> Option<Self> {
        let mut seen = vec![false; order.len()];
        for &pos in &order {
            if pos >= seen.len() || std::mem::replace(&mut seen[pos], true) {
                return None;
            }
        }
        Some(Self(order))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    pub fn into_vec(self) -> Vec<usize> {
        self.0
    }
}

const BOOL_LIKE_SCORE: u32 = 2;
const EQUALITY_ONLY_SCORE: u32 = 4;
const ARITHMETIC_SCORE: u32 = 16;
const INCREMENT_SCORE: u32 = 100;

/// Compute the submission order of `formulas` under `strategy`.
///
/// `states[i]` is the abstract state reached after formula `i`. Orderings
/// that need states or program facts that are not available degrade to
/// forwards order.
pub fn order_formulas(
    strategy: OrderingStrategy,
    formulas: &[SmtTerm],
    states: Option<&[AbstractionState]>,
    facts: &ProgramFacts,
    seed: u64,
) -> Permutation {
    let n = formulas.len();
    let order = match strategy {
        OrderingStrategy::Forwards => Permutation::identity(n),
        OrderingStrategy::Backwards => Permutation::identity(n).reversed(),
        OrderingStrategy::ZigZag => zigzag(n),
        OrderingStrategy::Random => shuffled(n, seed),
        OrderingStrategy::LoopFreeFirst | OrderingStrategy::LoopFreeFirstBackwards => {
            let states = states.filter(|states| states.len() == n);
            match (states, facts.loops.as_ref()) {
                (Some(states), Some(loops)) => {
                    loop_free_first(states, loops, strategy.is_backwards())
                }
                _ => {
                    debug!(%strategy, "loop structure or states missing, ordering forwards");
                    Permutation::identity(n)
                }
            }
        }
        OrderingStrategy::LowestAvgScore | OrderingStrategy::HighestAvgScore => {
            match facts.classification.as_ref() {
                Some(classification) => by_average_score(
                    formulas,
                    classification,
                    facts.loops.as_ref(),
                    strategy == OrderingStrategy::HighestAvgScore,
                ),
                None => {
                    debug!(%strategy, "variable classification missing, ordering forwards");
                    Permutation::identity(n)
                }
            }
        }
    };
    debug!(%strategy, order = ?order.as_slice(), "formula order");
    order
}

/// `0, n-1, 1, n-2, ...`
fn zigzag(n: usize) -> Permutation {
    let mut order = Vec::with_capacity(n);
    let (mut lo, mut hi) = (0, n);
    let mut front = true;
    while lo < hi {
        if front {
            order.push(lo);
            lo += 1;
        } else {
            hi -= 1;
            order.push(hi);
        }
        front = !front;
    }
    Permutation(order)
}

fn shuffled(n: usize, seed: u64) -> Permutation {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    Permutation(order)
}

/// Loop nesting level of every state: the number of loops entered through
/// their head and not yet left.
pub(crate) fn loop_levels(states: &[AbstractionState], loops: &LoopStructure) -> Vec<usize> {
    let mut open: Vec<usize> = Vec::new();
    let mut levels = Vec::with_capacity(states.len());
    for state in states {
        while let Some(&innermost) = open.last() {
            if loops.loops()[innermost].contains(state) {
                break;
            }
            open.pop();
        }
        if let Some(entered) = loops.loop_headed_at(&state.location) {
            if !open.contains(&entered) {
                open.push(entered);
            }
        }
        levels.push(open.len());
    }
    levels
}

/// Formulas outside loops first, then each deeper nesting level. Within a
/// level the original order is kept, or reversed for the backwards variant.
fn loop_free_first(
    states: &[AbstractionState],
    loops: &LoopStructure,
    backwards: bool,
) -> Permutation {
    let mut buckets: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (pos, level) in loop_levels(states, loops).into_iter().enumerate() {
        buckets.entry(level).or_default().push(pos);
    }
    let order = buckets
        .into_values()
        .flat_map(|mut bucket| {
            if backwards {
                bucket.reverse();
            }
            bucket
        })
        .collect();
    Permutation(order)
}

/// Average per-variable score of a formula's program variables; internal
/// symbols are ignored and a formula without program variables scores 0.
pub(crate) fn average_score(
    formula: &SmtTerm,
    classification: &VariableClassification,
    loops: Option<&LoopStructure>,
) -> f64 {
    let names: BTreeSet<String> = formula
        .free_vars()
        .into_iter()
        .filter(|name| !is_internal_symbol(name))
        .map(|name| program_variable(&name).to_string())
        .collect();
    if names.is_empty() {
        return 0.0;
    }
    let total: u32 = names
        .iter()
        .map(|name| {
            let base = if classification.is_bool_like(name) {
                BOOL_LIKE_SCORE
            } else if classification.is_equality_only(name) {
                EQUALITY_ONLY_SCORE
            } else {
                ARITHMETIC_SCORE
            };
            let increment = loops
                .filter(|loops| loops.is_increment_var(name))
                .map_or(0, |_| INCREMENT_SCORE);
            base + increment
        })
        .sum();
    f64::from(total) / names.len() as f64
}

fn by_average_score(
    formulas: &[SmtTerm],
    classification: &VariableClassification,
    loops: Option<&LoopStructure>,
    descending: bool,
) -> Permutation {
    let scores: Vec<f64> = formulas
        .iter()
        .map(|f| average_score(f, classification, loops))
        .collect();
    let mut order: Vec<usize> = (0..formulas.len()).collect();
    // Stable sort keeps ties in their original order.
    order.sort_by(|&a, &b| {
        let cmp = scores[a].total_cmp(&scores[b]);
        if descending {
            cmp.reverse()
        } else {
            cmp
        }
    });
    Permutation(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Location, Loop};
    use proptest::prelude::*;

    fn blocks(n: usize) -> Vec<SmtTerm> {
        (0..n)
            .map(|i| SmtTerm::var(format!("x@{i}")).eq(SmtTerm::int(i as i64)))
            .collect()
    }

    fn order(strategy: OrderingStrategy, n: usize) -> Vec<usize> {
        order_formulas(strategy, &blocks(n), None, &ProgramFacts::default(), 0).into_vec()
    }

    #[test]
    fn fixed_orders() {
        assert_eq!(order(OrderingStrategy::Forwards, 4), vec![0, 1, 2, 3]);
        assert_eq!(order(OrderingStrategy::Backwards, 4), vec![3, 2, 1, 0]);
        assert_eq!(order(OrderingStrategy::ZigZag, 5), vec![0, 4, 1, 3, 2]);
        assert_eq!(order(OrderingStrategy::ZigZag, 4), vec![0, 3, 1, 2]);
        assert!(order(OrderingStrategy::ZigZag, 0).is_empty());
    }

    #[test]
    fn missing_facts_degrade_to_forwards() {
        for strategy in [
            OrderingStrategy::LoopFreeFirst,
            OrderingStrategy::LoopFreeFirstBackwards,
            OrderingStrategy::LowestAvgScore,
            OrderingStrategy::HighestAvgScore,
        ] {
            assert_eq!(order(strategy, 3), vec![0, 1, 2], "{strategy}");
        }
    }

    #[test]
    fn loop_free_first_puts_loop_body_last() {
        let main = |node| Location::new("main", node);
        let states: Vec<AbstractionState> = [0, 1, 2, 3, 9]
            .into_iter()
            .enumerate()
            .map(|(id, node)| AbstractionState::new(id, main(node)))
            .collect();
        let loops = LoopStructure::new(vec![Loop::new(main(1), [main(2), main(3)])]);
        let facts = ProgramFacts::new().with_loops(loops);

        let forwards = order_formulas(
            OrderingStrategy::LoopFreeFirst,
            &blocks(5),
            Some(&states),
            &facts,
            0,
        );
        assert_eq!(forwards.into_vec(), vec![0, 4, 1, 2, 3]);

        let backwards = order_formulas(
            OrderingStrategy::LoopFreeFirstBackwards,
            &blocks(5),
            Some(&states),
            &facts,
            0,
        );
        assert_eq!(backwards.into_vec(), vec![4, 0, 3, 2, 1]);
    }

    #[test]
    fn nested_loops_get_deeper_levels() {
        let main = |node| Location::new("main", node);
        let loops = LoopStructure::new(vec![
            Loop::new(main(1), [main(2), main(3), main(4)]),
            Loop::new(main(2), [main(3)]),
        ]);
        let states: Vec<AbstractionState> = [1, 2, 3, 4, 7]
            .into_iter()
            .enumerate()
            .map(|(id, node)| AbstractionState::new(id, main(node)))
            .collect();
        assert_eq!(loop_levels(&states, &loops), vec![1, 2, 2, 1, 0]);
    }

    #[test]
    fn scores_prefer_cheap_variables() {
        let classification = VariableClassification::new()
            .with_bool_like(["flag"])
            .with_equality_only(["id"]);
        let loops = LoopStructure::default().with_increment_vars(["i"]);
        let flag = SmtTerm::var("flag@1").eq(SmtTerm::int(1));
        let id = SmtTerm::var("id@2").eq(SmtTerm::var("id@3"));
        let counter = SmtTerm::var("i@4").eq(SmtTerm::var("i@3").add(SmtTerm::int(1)));
        let internal = SmtTerm::var("__tmp").eq(SmtTerm::int(0));

        assert_eq!(average_score(&flag, &classification, Some(&loops)), 2.0);
        assert_eq!(average_score(&id, &classification, Some(&loops)), 4.0);
        assert_eq!(average_score(&counter, &classification, Some(&loops)), 116.0);
        assert_eq!(average_score(&internal, &classification, Some(&loops)), 0.0);

        let facts = ProgramFacts::new()
            .with_classification(classification)
            .with_loops(loops);
        let formulas = vec![counter, flag, internal, id];
        let lowest =
            order_formulas(OrderingStrategy::LowestAvgScore, &formulas, None, &facts, 0);
        assert_eq!(lowest.into_vec(), vec![2, 1, 3, 0]);
        let highest =
            order_formulas(OrderingStrategy::HighestAvgScore, &formulas, None, &facts, 0);
        assert_eq!(highest.into_vec(), vec![0, 3, 1, 2]);
    }

    #[test]
    fn from_vec_rejects_non_permutations() {
        assert!(Permutation::from_vec(vec![1, 0, 2]).is_some());
        assert!(Permutation::from_vec(vec![0, 0]).is_none());
        assert!(Permutation::from_vec(vec![0, 2]).is_none());
    }

    fn any_strategy() -> impl Strategy<Value = OrderingStrategy> {
        proptest::sample::select(OrderingStrategy::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn every_ordering_is_a_permutation(strategy in any_strategy(), n in 0usize..40, seed in any::<u64>()) {
            let formulas = blocks(n);
            let order = order_formulas(strategy, &formulas, None, &ProgramFacts::default(), seed);
            prop_assert!(Permutation::from_vec(order.into_vec()).is_some_and(|p| p.len() == n));
        }

        #[test]
        fn random_ordering_is_deterministic_per_seed(n in 0usize..40, seed in any::<u64>()) {
            let formulas = blocks(n);
            let facts = ProgramFacts::default();
            let first = order_formulas(OrderingStrategy::Random, &formulas, None, &facts, seed);
            let second = order_formulas(OrderingStrategy::Random, &formulas, None, &facts, seed);
            prop_assert_eq!(first, second);
        }
    }
}
