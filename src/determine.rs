//! Generic determinization and minimization harnesses.
//!
//! Both algorithms are written once, against small *task* traits, and are
//! shared by every client in the crate: the plain subset construction on
//! [`Fsm`](crate::Fsm), the multi-track counting determinizers, the
//! scanner glue product, and the action-preserving minimizer.
//!
//! A determinization task supplies the state universe (any `Clone + Eq +
//! Hash` value — a subset, a tagged 4-tuple of subsets, a pair of scanner
//! states) plus `initial`/`next`, and receives the discovered state list
//! back through `accept_states` followed by one `connect` call per
//! `(state, letter)` edge.  The harness owns nothing but the memo table.

use indexmap::IndexSet;
use std::hash::Hash;

use crate::fsm::{Char, LettersTbl};

// ---------------------------------------------------------------------------
// Determinization
// ---------------------------------------------------------------------------

/// A subset-construction task.
///
/// `next` takes `&mut self` because several implementors record
/// per-transition side channels (action words) while computing the
/// successor; the mutability stays confined to the task value.
pub trait DetermineTask {
    /// Key type for the memo table.  Must order/hash canonically:
    /// two equal states must always compare equal regardless of how they
    /// were built (use ordered containers internally).
    type State: Clone + Eq + Hash;

    /// The letter-class partition driving the construction.
    fn letters(&self) -> &LettersTbl;

    /// The start state of the output automaton.
    fn initial(&self) -> Self::State;

    /// Successor of `state` on the class represented by `letter`.
    fn next(&mut self, state: &Self::State, letter: Char) -> Self::State;

    /// Whether `state` deserves a slot in the output.  Returning `false`
    /// leaves the `(from, letter)` edge undefined (sparse output).
    fn is_required(&self, state: &Self::State) -> bool {
        let _ = state;
        true
    }

    /// Called once with every discovered state, in discovery order.
    /// The state at index 0 is always `initial()`.
    fn accept_states(&mut self, states: &[Self::State]);

    /// Called once per defined `(from, letter)` edge, after
    /// `accept_states`.
    fn connect(&mut self, from: usize, to: usize, letter: Char);
}

/// Run the subset construction.  Returns `false` (leaving the task's
/// output untouched) as soon as more than `max_size` states have been
/// discovered.
pub fn determine<T: DetermineTask>(task: &mut T, max_size: usize) -> bool {
    let letters: Vec<Char> = task.letters().representatives().collect();

    let mut states: IndexSet<T::State> = IndexSet::new();
    states.insert(task.initial());

    // transitions[from][letter index] = discovered successor index.
    let mut transitions: Vec<Vec<Option<usize>>> = Vec::new();

    let mut from = 0;
    while from < states.len() {
        let state = states[from].clone();
        let mut row = Vec::with_capacity(letters.len());
        for &letter in &letters {
            let next = task.next(&state, letter);
            if !task.is_required(&next) {
                row.push(None);
                continue;
            }
            let (to, _) = states.insert_full(next);
            if states.len() > max_size {
                return false;
            }
            row.push(Some(to));
        }
        transitions.push(row);
        from += 1;
    }

    let accepted: Vec<T::State> = states.iter().cloned().collect();
    task.accept_states(&accepted);
    for (from, row) in transitions.iter().enumerate() {
        for (li, to) in row.iter().enumerate() {
            if let Some(to) = to {
                task.connect(from, *to, letters[li]);
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Minimization
// ---------------------------------------------------------------------------

/// The result of partition refinement: a map from original state to
/// equivalence-class index.  Classes are numbered by first occurrence, so
/// the class of state 0 is always 0.
#[derive(Debug)]
pub struct Partition {
    class_of: Vec<usize>,
    len: usize,
}

impl Partition {
    /// Equivalence-class index of `state`.
    pub fn index(&self, state: usize) -> usize {
        self.class_of[state]
    }

    /// Number of equivalence classes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A partition-refinement task over a *total, deterministic* automaton.
pub trait MinimizeTask {
    /// Number of states.
    fn size(&self) -> usize;

    /// The letter-class partition.
    fn letters(&self) -> &LettersTbl;

    /// The unique successor of `state` on the class of `letter`.
    fn next(&self, state: usize, letter: Char) -> usize;

    /// Finality, used for the initial split.
    fn is_final(&self, state: usize) -> bool;

    /// Extra equivalence constraint folded into the initial split.
    /// States for which this returns `false` are never merged.
    fn same_classes(&self, first: usize, second: usize) -> bool {
        let _ = (first, second);
        true
    }

    /// Receives the stable partition; the task rebuilds its output from
    /// it.
    fn accept_partition(&mut self, partition: &Partition);
}

/// Partition refinement: start from the finality/`same_classes` split and
/// split classes until every class agrees, letter by letter, on successor
/// classes.
pub fn minimize<T: MinimizeTask>(task: &mut T) {
    let n = task.size();
    let letters: Vec<Char> = task.letters().representatives().collect();

    // Initial split: finality plus the task's extra equivalence.  Classes
    // are numbered in first-occurrence order.
    let mut class_of = vec![0usize; n];
    let mut reps: Vec<usize> = Vec::new();
    for state in 0..n {
        let found = reps
            .iter()
            .position(|&r| task.is_final(r) == task.is_final(state) && task.same_classes(r, state));
        match found {
            Some(class) => class_of[state] = class,
            None => {
                class_of[state] = reps.len();
                reps.push(state);
            }
        }
    }
    let mut classes = reps.len();

    loop {
        let mut signatures: IndexSet<(usize, Vec<usize>)> = IndexSet::new();
        let mut next_class_of = vec![0usize; n];
        for state in 0..n {
            let signature = (
                class_of[state],
                letters
                    .iter()
                    .map(|&letter| class_of[task.next(state, letter)])
                    .collect(),
            );
            let (class, _) = signatures.insert_full(signature);
            next_class_of[state] = class;
        }
        let next_classes = signatures.len();
        class_of = next_class_of;
        if next_classes == classes {
            break;
        }
        classes = next_classes;
    }

    task.accept_partition(&Partition {
        class_of,
        len: classes,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Fsm;

    // A toy task determinizing a hard-coded two-state NFA over {a, b}:
    // 0 --a--> {0,1}, 0 --b--> {0}, 1 final.
    struct ToyTask {
        letters: LettersTbl,
        out_states: Vec<Vec<usize>>,
        edges: Vec<(usize, usize, Char)>,
    }

    impl ToyTask {
        fn new() -> Self {
            let mut fsm = Fsm::default();
            let a = fsm.size();
            fsm.resize(a + 1);
            fsm.connect(0, 0, b'a' as Char);
            fsm.connect(0, 0, b'b' as Char);
            fsm.connect(0, a, b'a' as Char);
            Self {
                letters: fsm.letters(),
                out_states: Vec::new(),
                edges: Vec::new(),
            }
        }
    }

    impl DetermineTask for ToyTask {
        type State = Vec<usize>;

        fn letters(&self) -> &LettersTbl {
            &self.letters
        }

        fn initial(&self) -> Vec<usize> {
            vec![0]
        }

        fn next(&mut self, state: &Vec<usize>, letter: Char) -> Vec<usize> {
            let mut out = std::collections::BTreeSet::new();
            for &s in state {
                if s == 0 {
                    out.insert(0);
                    if letter == b'a' as Char {
                        out.insert(1);
                    }
                }
            }
            out.into_iter().collect()
        }

        fn accept_states(&mut self, states: &[Vec<usize>]) {
            self.out_states = states.to_vec();
        }

        fn connect(&mut self, from: usize, to: usize, letter: Char) {
            self.edges.push((from, to, letter));
        }
    }

    #[test]
    fn test_determine_discovers_subsets_in_order() {
        let mut task = ToyTask::new();
        assert!(determine(&mut task, usize::MAX));
        assert_eq!(task.out_states[0], vec![0]);
        assert!(task.out_states.contains(&vec![0, 1]));
        // Every (state, letter) pair got connected.
        assert_eq!(
            task.edges.len(),
            task.out_states.len() * task.letters.representatives().count()
        );
    }

    #[test]
    fn test_determine_respects_max_size() {
        let mut task = ToyTask::new();
        assert!(!determine(&mut task, 1));
        // Failure leaves the output untouched.
        assert!(task.out_states.is_empty());
        assert!(task.edges.is_empty());
    }

    // Minimization of a 4-state cycle where states 1 and 3 are equivalent.
    struct CycleTask {
        letters: LettersTbl,
        finals: Vec<bool>,
        next: Vec<usize>,
        result: Option<Vec<usize>>,
    }

    impl MinimizeTask for CycleTask {
        fn size(&self) -> usize {
            self.next.len()
        }

        fn letters(&self) -> &LettersTbl {
            &self.letters
        }

        fn next(&self, state: usize, _letter: Char) -> usize {
            self.next[state]
        }

        fn is_final(&self, state: usize) -> bool {
            self.finals[state]
        }

        fn accept_partition(&mut self, partition: &Partition) {
            self.result = Some((0..self.size()).map(|s| partition.index(s)).collect());
        }
    }

    #[test]
    fn test_minimize_merges_equivalent_states() {
        // Single-letter alphabet; 0 -> 1 -> 2 -> 3 -> 2, finals {1, 3}.
        let mut fsm = Fsm::default();
        fsm.connect(0, 0, b'x' as Char);
        let mut task = CycleTask {
            letters: fsm.letters(),
            finals: vec![false, true, false, true],
            next: vec![1, 2, 3, 2],
            result: None,
        };
        minimize(&mut task);
        let classes = task.result.expect("partition accepted");
        assert_eq!(classes[0], 0);
        assert_eq!(classes[1], classes[3]);
        assert_ne!(classes[0], classes[1]);
        assert_ne!(classes[1], classes[2]);
    }

    #[test]
    fn test_minimize_is_idempotent() {
        let mut fsm = Fsm::default();
        fsm.connect(0, 0, b'x' as Char);
        // Already minimal: 0 -> 1 -> 0, final {1}.
        let mut task = CycleTask {
            letters: fsm.letters(),
            finals: vec![false, true],
            next: vec![1, 0],
            result: None,
        };
        minimize(&mut task);
        assert_eq!(task.result, Some(vec![0, 1]));
    }
}
