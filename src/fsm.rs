//! The automaton value type and its algebra.
//!
//! [`Fsm`] is a plain `(Vec<row>, initial, finals)` NFA/DFA with integer
//! state ids — no pointer graphs.  Every operation the counting-scanner
//! pipelines consume lives here: ε-elimination, subset construction,
//! partition-refinement minimization, concatenation/union/intersection/
//! complement, `Σ*` prefixing, totalization, and dead-state analysis.
//!
//! # Alphabet
//!
//! The input alphabet is bytes `0..=255` plus two virtual symbols fed by
//! the run-time around the payload: [`BEGIN_MARK`] and [`END_MARK`].
//! [`EPSILON`] (`256`) is reserved for ε-edges and is never an input
//! letter; index `259` exists only as table padding.  The letter-class
//! partition ([`LettersTbl`]) groups chars that behave identically from
//! every state, and all automaton edges are driven per class
//! representative.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::io::Write;

use indexmap::{IndexMap, IndexSet};

use crate::determine::{determine, minimize, DetermineTask, MinimizeTask, Partition};

// ---------------------------------------------------------------------------
// Alphabet
// ---------------------------------------------------------------------------

/// An input alphabet symbol.
pub type Char = u16;

/// Reserved ε slot; used for ε-edges during construction, never as input.
pub const EPSILON: Char = 256;

/// Virtual symbol fed once before the payload bytes.
pub const BEGIN_MARK: Char = 257;

/// Virtual symbol fed once after the payload bytes.
pub const END_MARK: Char = 258;

/// Exclusive upper bound of meaningful chars.
pub const MAX_CHAR_UNALIGNED: Char = 259;

/// Size of char-indexed tables (one padding slot past the meaningful
/// chars).
pub const MAX_CHAR: usize = 260;

/// All symbols that can actually occur in input: bytes plus the two
/// marks.  Excludes ε and the padding slot.
pub(crate) fn real_chars() -> impl Iterator<Item = Char> {
    (0..MAX_CHAR as Char).filter(|&c| c != EPSILON && c < MAX_CHAR_UNALIGNED)
}

/// A char range is invalid when no char in it can occur in input: all of
/// them at or past [`MAX_CHAR_UNALIGNED`] and none equal to the ε slot.
/// Invalid letter classes still need transitions (totality), but those
/// transitions reset to the initial state.
pub(crate) fn invalid_char_range(chars: &[Char]) -> bool {
    chars
        .iter()
        .all(|&c| c >= MAX_CHAR_UNALIGNED && c != EPSILON)
}

// ---------------------------------------------------------------------------
// Letter classes
// ---------------------------------------------------------------------------

/// One letter class: a representative char plus every raw char whose
/// transition column is identical to the representative's in every state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LetterClass {
    representative: Char,
    chars: Vec<Char>,
}

impl LetterClass {
    pub fn representative(&self) -> Char {
        self.representative
    }

    pub fn chars(&self) -> &[Char] {
        &self.chars
    }
}

/// The partition of the alphabet (ε excluded) into letter classes.
#[derive(Clone, Debug)]
pub struct LettersTbl {
    classes: Vec<LetterClass>,
    /// Char → class index; the ε slot maps to class 0 and is never used.
    index_of: Vec<usize>,
}

impl LettersTbl {
    pub fn classes(&self) -> &[LetterClass] {
        &self.classes
    }

    /// Class index of a char.
    pub fn index(&self, c: Char) -> usize {
        self.index_of[c as usize]
    }

    /// Iterate class representatives in class order.
    pub fn representatives(&self) -> impl Iterator<Item = Char> + '_ {
        self.classes.iter().map(|class| class.representative)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Build a table directly from a char → class-key mapping.  Used by
    /// the scanner glue to intersect two letter partitions.
    pub(crate) fn from_keys<K: Eq + std::hash::Hash>(keys: impl Fn(Char) -> K) -> Self {
        let mut groups: IndexMap<K, Vec<Char>> = IndexMap::new();
        for c in (0..MAX_CHAR as Char).filter(|&c| c != EPSILON) {
            groups.entry(keys(c)).or_default().push(c);
        }
        let classes: Vec<LetterClass> = groups
            .into_iter()
            .map(|(_, chars)| LetterClass {
                representative: chars[0],
                chars,
            })
            .collect();
        let mut index_of = vec![0usize; MAX_CHAR];
        for (idx, class) in classes.iter().enumerate() {
            for &c in &class.chars {
                index_of[c as usize] = idx;
            }
        }
        Self { classes, index_of }
    }
}

// ---------------------------------------------------------------------------
// Fsm
// ---------------------------------------------------------------------------

type StatesSet = BTreeSet<usize>;

static NO_DESTINATIONS: StatesSet = StatesSet::new();

/// A finite automaton over [`Char`], nondeterministic unless noted.
///
/// States are `0..size-1`.  Each state carries a `u32` tag (semantic
/// bits used by the counting constructions) and each `(from, to)` pair
/// may carry a `u32` output word (side-channel signals installed by the
/// basic scanner's product construction and merged by determinization).
#[derive(Clone, Debug)]
pub struct Fsm {
    transitions: Vec<BTreeMap<Char, StatesSet>>,
    initial: usize,
    finals: StatesSet,
    tags: BTreeMap<usize, u32>,
    outputs: BTreeMap<(usize, usize), u32>,
    determined: bool,
}

impl Default for Fsm {
    /// The unit automaton: one state, initial and final — accepts ε.
    fn default() -> Self {
        Self {
            transitions: vec![BTreeMap::new()],
            initial: 0,
            finals: [0].into_iter().collect(),
            tags: BTreeMap::new(),
            outputs: BTreeMap::new(),
            determined: false,
        }
    }
}

impl Fsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.transitions.len()
    }

    pub fn initial(&self) -> usize {
        self.initial
    }

    pub fn set_initial(&mut self, state: usize) {
        self.initial = state;
    }

    pub fn is_final(&self, state: usize) -> bool {
        self.finals.contains(&state)
    }

    pub fn set_final(&mut self, state: usize, is_final: bool) {
        if is_final {
            self.finals.insert(state);
        } else {
            self.finals.remove(&state);
        }
    }

    pub fn finals(&self) -> &StatesSet {
        &self.finals
    }

    pub fn tag(&self, state: usize) -> u32 {
        self.tags.get(&state).copied().unwrap_or(0)
    }

    pub fn set_tag(&mut self, state: usize, tag: u32) {
        if tag == 0 {
            self.tags.remove(&state);
        } else {
            self.tags.insert(state, tag);
        }
    }

    pub fn output(&self, from: usize, to: usize) -> u32 {
        self.outputs.get(&(from, to)).copied().unwrap_or(0)
    }

    pub fn set_output(&mut self, from: usize, to: usize, value: u32) {
        if value == 0 {
            self.outputs.remove(&(from, to));
        } else {
            self.outputs.insert((from, to), value);
        }
    }

    pub fn is_determined(&self) -> bool {
        self.determined
    }

    pub(crate) fn set_determined(&mut self, determined: bool) {
        self.determined = determined;
    }

    /// Grow the state array to `size` states.
    pub fn resize(&mut self, size: usize) {
        debug_assert!(size >= self.transitions.len());
        self.transitions.resize_with(size, BTreeMap::new);
    }

    /// Add a lettered edge (or an ε-edge when `on == EPSILON`).
    pub fn connect(&mut self, from: usize, to: usize, on: Char) {
        self.transitions[from].entry(on).or_default().insert(to);
        self.determined = false;
    }

    /// Add an ε-edge.
    pub fn connect_eps(&mut self, from: usize, to: usize) {
        self.connect(from, to, EPSILON);
    }

    /// Successor set of `state` on `on`.  For a letter class, pass the
    /// representative — every char of a class has the same column.
    pub fn destinations(&self, state: usize, on: Char) -> &StatesSet {
        self.transitions[state]
            .get(&on)
            .unwrap_or(&NO_DESTINATIONS)
    }

    /// The unique successor of a determined state.
    pub(crate) fn only_destination(&self, state: usize, on: Char) -> usize {
        let dests = self.destinations(state, on);
        debug_assert_eq!(dests.len(), 1, "state {state} is not deterministic on {on}");
        *dests.iter().next().expect("determined transition")
    }

    // -----------------------------------------------------------------------
    // Construction primitives
    // -----------------------------------------------------------------------

    /// Append one symbol drawn from `chars`: a fresh state becomes the
    /// sole final, reachable from every old final on each char.
    pub fn append(&mut self, chars: impl IntoIterator<Item = Char>) {
        let next = self.size();
        self.resize(next + 1);
        let finals: Vec<usize> = self.finals.iter().copied().collect();
        for c in chars {
            for &f in &finals {
                self.connect(f, next, c);
            }
        }
        self.finals.clear();
        self.finals.insert(next);
    }

    /// Append `.` — any byte.
    pub fn append_dot(&mut self) {
        self.append(0..=255u16);
    }

    /// Append a single (possibly virtual) symbol.
    pub fn append_special(&mut self, c: Char) {
        self.append([c]);
    }

    /// Copy `other`'s states in after ours (ids shifted by our old size),
    /// merging finals, tags, and outputs.  The initial stays ours.
    /// Returns the shift.
    pub fn import(&mut self, other: &Fsm) -> usize {
        let shift = self.size();
        self.resize(shift + other.size());
        for (state, row) in other.transitions.iter().enumerate() {
            for (&c, dests) in row {
                for &d in dests {
                    self.connect(shift + state, shift + d, c);
                }
            }
        }
        for &f in &other.finals {
            self.finals.insert(shift + f);
        }
        for (&s, &t) in &other.tags {
            self.tags.insert(shift + s, t);
        }
        for (&(from, to), &v) in &other.outputs {
            self.outputs.insert((shift + from, shift + to), v);
        }
        self.determined = false;
        shift
    }

    /// Concatenation: every final of `self` ε-connects to `other`'s
    /// initial; the finals become `other`'s.
    pub fn concat(&mut self, other: &Fsm) {
        let old_finals: Vec<usize> = self.finals.iter().copied().collect();
        let shift = self.import(other);
        for &f in &old_finals {
            self.connect_eps(f, shift + other.initial);
            self.finals.remove(&f);
        }
    }

    /// Union via a fresh initial state ε-connected to both operands'
    /// initials.  (An in-place ε from our initial would be wrong once the
    /// initial has incoming edges: a loop back to it could leak into the
    /// other operand mid-word.)
    pub fn union_with(&mut self, other: &Fsm) {
        let shift = self.import(other);
        let fresh = self.size();
        self.resize(fresh + 1);
        self.connect_eps(fresh, self.initial);
        self.connect_eps(fresh, shift + other.initial);
        self.initial = fresh;
    }

    /// Repeat one or more times: ε from each final back to the initial.
    pub fn plus(&mut self) {
        let finals: Vec<usize> = self.finals.iter().copied().collect();
        for f in finals {
            self.connect_eps(f, self.initial);
        }
    }

    /// Repeat zero or more times.
    pub fn star(&mut self) {
        self.plus();
        self.union_with(&Fsm::new());
    }

    /// Prefix `Σ*`: a fresh initial that loops on every real char and
    /// ε-steps into the old initial.
    pub fn prepend_anything(&mut self) {
        let fresh = self.size();
        self.resize(fresh + 1);
        for c in real_chars() {
            self.connect(fresh, fresh, c);
        }
        self.connect_eps(fresh, self.initial);
        self.initial = fresh;
    }

    /// Suffix `Σ*`: a fresh final looping on every real char, ε-reachable
    /// from every old final.
    pub fn append_anything(&mut self) {
        let fresh = self.size();
        self.resize(fresh + 1);
        for c in real_chars() {
            self.connect(fresh, fresh, c);
        }
        let finals: Vec<usize> = self.finals.iter().copied().collect();
        for f in finals {
            self.connect_eps(f, fresh);
        }
        self.finals.insert(fresh);
    }

    /// Wrap with `Σ* … Σ*` — the "find anywhere" form.
    pub fn surround(&mut self) {
        self.prepend_anything();
        self.append_anything();
    }

    // -----------------------------------------------------------------------
    // ε-elimination
    // -----------------------------------------------------------------------

    /// ε-closure of every state, including the state itself.
    fn eps_closures(&self) -> Vec<StatesSet> {
        (0..self.size())
            .map(|start| {
                let mut closure: StatesSet = [start].into_iter().collect();
                let mut queue: VecDeque<usize> = [start].into_iter().collect();
                while let Some(s) = queue.pop_front() {
                    for &t in self.destinations(s, EPSILON) {
                        if closure.insert(t) {
                            queue.push_back(t);
                        }
                    }
                }
                closure
            })
            .collect()
    }

    /// Erase ε-edges: each state absorbs the lettered transitions,
    /// finality, and edge outputs of its ε-closure.  Tags are per-state
    /// semantic markers and are deliberately not merged.
    pub fn remove_epsilons(&mut self) {
        let closures = self.eps_closures();
        for (state, closure) in closures.iter().enumerate() {
            for &t in closure {
                if t == state {
                    continue;
                }
                let row: Vec<(Char, StatesSet)> = self.transitions[t]
                    .iter()
                    .filter(|(&c, _)| c != EPSILON)
                    .map(|(&c, dests)| (c, dests.clone()))
                    .collect();
                for (c, dests) in row {
                    for d in dests {
                        self.connect(state, d, c);
                        let carried = self.output(t, d);
                        if carried != 0 {
                            let merged = self.output(state, d) | carried;
                            self.set_output(state, d, merged);
                        }
                    }
                }
                if self.finals.contains(&t) {
                    self.finals.insert(state);
                }
            }
        }
        for row in &mut self.transitions {
            row.remove(&EPSILON);
        }
    }

    // -----------------------------------------------------------------------
    // Letter classes
    // -----------------------------------------------------------------------

    /// Compute the letter-class partition: chars grouped by identical
    /// transition columns across all states.
    pub fn letters(&self) -> LettersTbl {
        let mut groups: IndexMap<Vec<&StatesSet>, Vec<Char>> = IndexMap::new();
        for c in (0..MAX_CHAR as Char).filter(|&c| c != EPSILON) {
            let column: Vec<&StatesSet> =
                (0..self.size()).map(|s| self.destinations(s, c)).collect();
            groups.entry(column).or_default().push(c);
        }
        let classes: Vec<LetterClass> = groups
            .into_values()
            .map(|chars| LetterClass {
                representative: chars[0],
                chars,
            })
            .collect();
        let mut index_of = vec![0usize; MAX_CHAR];
        for (idx, class) in classes.iter().enumerate() {
            for &c in &class.chars {
                index_of[c as usize] = idx;
            }
        }
        LettersTbl { classes, index_of }
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    /// States from which no final state is reachable.
    pub fn dead_states(&self) -> StatesSet {
        let mut reversed: Vec<Vec<usize>> = vec![Vec::new(); self.size()];
        for (from, row) in self.transitions.iter().enumerate() {
            for dests in row.values() {
                for &to in dests {
                    reversed[to].push(from);
                }
            }
        }
        let mut alive: StatesSet = self.finals.clone();
        let mut queue: VecDeque<usize> = alive.iter().copied().collect();
        while let Some(s) = queue.pop_front() {
            for &p in &reversed[s] {
                if alive.insert(p) {
                    queue.push_back(p);
                }
            }
        }
        (0..self.size()).filter(|s| !alive.contains(s)).collect()
    }

    // -----------------------------------------------------------------------
    // Determinization, totalization, minimization
    // -----------------------------------------------------------------------

    /// Classic subset construction.  ε-edges are eliminated first; the
    /// result is deterministic but sparse (letters nobody accepts stay
    /// undefined).  Subset finality is any-member, subset tags are the
    /// bitwise OR of member tags, and edge outputs are the OR of the
    /// member edges' outputs.
    pub fn determinize(&mut self) {
        self.remove_epsilons();
        let output = {
            let mut task = FsmDetermineTask::new(self);
            let ok = determine(&mut task, usize::MAX);
            debug_assert!(ok, "unbudgeted subset construction cannot fail");
            task.output
        };
        *self = output;
    }

    /// Make the transition function total over every real char by
    /// routing missing entries to a non-final sink.  No-op when already
    /// total.
    pub fn unsparse(&mut self) {
        let mut missing: Vec<(usize, Char)> = Vec::new();
        for state in 0..self.size() {
            for c in real_chars() {
                if self.destinations(state, c).is_empty() {
                    missing.push((state, c));
                }
            }
        }
        if missing.is_empty() {
            return;
        }
        let was_determined = self.determined;
        let sink = self.size();
        self.resize(sink + 1);
        for c in real_chars() {
            self.connect(sink, sink, c);
        }
        for (state, c) in missing {
            self.connect(state, sink, c);
        }
        self.determined = was_determined;
    }

    /// Merge equivalent states of a determined automaton (totalizing it
    /// first).  Tags and outputs do not survive; callers minimize before
    /// attaching either.
    pub fn minimize(&mut self) {
        debug_assert!(self.determined, "minimize requires a determined fsm");
        self.unsparse();
        let output = {
            let mut task = FsmMinimizeTask::new(self);
            minimize(&mut task);
            task.output
        };
        *self = output;
    }

    /// Canonical form: ε-free, deterministic, minimal.  Removes
    /// unreachable states and unifies equivalent finals.
    pub fn canonize(&mut self) {
        self.determinize();
        self.minimize();
    }

    /// Language intersection.  Both operands are determinized and
    /// totalized, then paired.
    pub fn intersect(&self, other: &Fsm) -> Fsm {
        let mut lhs = self.clone();
        lhs.determinize();
        lhs.unsparse();
        let mut rhs = other.clone();
        rhs.determinize();
        rhs.unsparse();

        let mut pairs: IndexSet<(usize, usize)> = IndexSet::new();
        pairs.insert((lhs.initial, rhs.initial));
        let mut product = Fsm::new();
        product.set_final(0, false);

        let mut from = 0;
        while from < pairs.len() {
            let (a, b) = pairs[from];
            product.resize(product.size().max(from + 1));
            if lhs.is_final(a) && rhs.is_final(b) {
                product.set_final(from, true);
            }
            for c in real_chars() {
                let pair = (lhs.only_destination(a, c), rhs.only_destination(b, c));
                let (to, _) = pairs.insert_full(pair);
                product.resize(product.size().max(to + 1));
                product.connect(from, to, c);
            }
            from += 1;
        }
        product.initial = 0;
        product.determined = true;
        product
    }

    /// Language complement over real-char words.
    pub fn complement(&self) -> Fsm {
        let mut out = self.clone();
        out.determinize();
        out.unsparse();
        out.tags.clear();
        out.outputs.clear();
        let inverted: StatesSet = (0..out.size()).filter(|s| !out.finals.contains(s)).collect();
        out.finals = inverted;
        out
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Emit a Graphviz DOT representation of the automaton.
    pub fn to_dot(&self, mut buffer: impl Write) {
        writeln!(buffer, "digraph fsm {{").unwrap();
        writeln!(buffer, "\trankdir=LR;").unwrap();
        writeln!(buffer, "\t{} [shape=box];", self.initial).unwrap();
        for &f in &self.finals {
            writeln!(buffer, "\t{f} [peripheries=2];").unwrap();
        }
        for (from, row) in self.transitions.iter().enumerate() {
            for (&c, dests) in row {
                for &to in dests {
                    writeln!(buffer, "\t{from} -> {to} [label=\"{}\"];", DotChar(c)).unwrap();
                }
            }
        }
        writeln!(buffer, "}}").unwrap();
    }
}

struct DotChar(Char);

impl fmt::Display for DotChar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            EPSILON => write!(f, "eps"),
            BEGIN_MARK => write!(f, "^"),
            END_MARK => write!(f, "$"),
            c if (0x21..=0x7e).contains(&c) => write!(f, "{}", c as u8 as char),
            c => write!(f, "\\\\x{c:02x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subset-construction task for Fsm itself
// ---------------------------------------------------------------------------

struct FsmDetermineTask<'a> {
    fsm: &'a Fsm,
    letters: LettersTbl,
    states: Vec<StatesSet>,
    output: Fsm,
}

impl<'a> FsmDetermineTask<'a> {
    fn new(fsm: &'a Fsm) -> Self {
        Self {
            fsm,
            letters: fsm.letters(),
            states: Vec::new(),
            output: Fsm::new(),
        }
    }
}

impl DetermineTask for FsmDetermineTask<'_> {
    type State = StatesSet;

    fn letters(&self) -> &LettersTbl {
        &self.letters
    }

    fn initial(&self) -> StatesSet {
        [self.fsm.initial].into_iter().collect()
    }

    fn next(&mut self, state: &StatesSet, letter: Char) -> StatesSet {
        let mut out = StatesSet::new();
        for &s in state {
            out.extend(self.fsm.destinations(s, letter).iter().copied());
        }
        out
    }

    fn is_required(&self, state: &StatesSet) -> bool {
        !state.is_empty()
    }

    fn accept_states(&mut self, states: &[StatesSet]) {
        self.states = states.to_vec();
        self.output = Fsm::new();
        self.output.set_final(0, false);
        self.output.resize(states.len());
        self.output.set_initial(0);
        for (idx, subset) in states.iter().enumerate() {
            if subset.iter().any(|s| self.fsm.is_final(*s)) {
                self.output.set_final(idx, true);
            }
            let tag = subset.iter().fold(0u32, |acc, &s| acc | self.fsm.tag(s));
            self.output.set_tag(idx, tag);
        }
        self.output.set_determined(true);
    }

    fn connect(&mut self, from: usize, to: usize, letter: Char) {
        let class = self.letters.classes()[self.letters.index(letter)].clone();
        let mut output_word = 0u32;
        for &a in &self.states[from] {
            for &d in self.fsm.destinations(a, letter) {
                output_word |= self.fsm.output(a, d);
            }
        }
        for &c in class.chars() {
            self.output.connect(from, to, c);
        }
        self.output.set_determined(true);
        if output_word != 0 {
            let merged = self.output.output(from, to) | output_word;
            self.output.set_output(from, to, merged);
        }
    }
}

// ---------------------------------------------------------------------------
// Partition-refinement task for Fsm itself
// ---------------------------------------------------------------------------

struct FsmMinimizeTask<'a> {
    fsm: &'a Fsm,
    letters: LettersTbl,
    output: Fsm,
}

impl<'a> FsmMinimizeTask<'a> {
    fn new(fsm: &'a Fsm) -> Self {
        Self {
            fsm,
            letters: fsm.letters(),
            output: Fsm::new(),
        }
    }
}

impl MinimizeTask for FsmMinimizeTask<'_> {
    fn size(&self) -> usize {
        self.fsm.size()
    }

    fn letters(&self) -> &LettersTbl {
        &self.letters
    }

    fn next(&self, state: usize, letter: Char) -> usize {
        self.fsm.only_destination(state, letter)
    }

    fn is_final(&self, state: usize) -> bool {
        self.fsm.is_final(state)
    }

    fn accept_partition(&mut self, partition: &Partition) {
        let mut output = Fsm::new();
        output.set_final(0, false);
        output.resize(partition.len());
        for state in 0..self.fsm.size() {
            let class = partition.index(state);
            if self.fsm.is_final(state) {
                output.set_final(class, true);
            }
            for class_def in self.letters.classes() {
                let rep = class_def.representative();
                let to = partition.index(self.fsm.only_destination(state, rep));
                for &c in class_def.chars() {
                    output.connect(class, to, c);
                }
            }
        }
        output.set_initial(partition.index(self.fsm.initial()));
        output.set_determined(true);
        self.output = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A linear automaton accepting exactly `word`.
    fn literal(word: &[u8]) -> Fsm {
        let mut fsm = Fsm::new();
        for &b in word {
            fsm.append_special(b as Char);
        }
        fsm
    }

    /// Deterministic acceptance check; requires a determined, ε-free fsm.
    fn accepts(fsm: &Fsm, word: &[u8]) -> bool {
        let mut state = fsm.initial();
        for &b in word {
            let dests = fsm.destinations(state, b as Char);
            match dests.iter().next() {
                Some(&next) if dests.len() == 1 => state = next,
                _ => return false,
            }
        }
        fsm.is_final(state)
    }

    #[test]
    fn test_default_accepts_empty() {
        let fsm = Fsm::new();
        assert!(fsm.is_final(fsm.initial()));
    }

    #[test]
    fn test_literal_chain() {
        let mut fsm = literal(b"ab");
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b"ab"));
        assert!(!accepts(&fsm, b"a"));
        assert!(!accepts(&fsm, b"abc"));
        assert!(!accepts(&fsm, b""));
    }

    #[test]
    fn test_concat_and_union() {
        let mut fsm = literal(b"ab");
        fsm.concat(&literal(b"cd"));
        fsm.union_with(&literal(b"x"));
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b"abcd"));
        assert!(accepts(&fsm, b"x"));
        assert!(!accepts(&fsm, b"ab"));
        assert!(!accepts(&fsm, b"cd"));
    }

    #[test]
    fn test_concat_with_empty_accepting_rhs() {
        // ab · ε accepts "ab": the ε-link to an accepting initial keeps
        // the lhs finals effectively final.
        let mut fsm = literal(b"ab");
        fsm.concat(&Fsm::new());
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b"ab"));
    }

    #[test]
    fn test_plus_and_star() {
        let mut fsm = literal(b"a");
        fsm.plus();
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b"a"));
        assert!(accepts(&fsm, b"aaa"));
        assert!(!accepts(&fsm, b""));

        let mut fsm = literal(b"a");
        fsm.star();
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b""));
        assert!(accepts(&fsm, b"aa"));
        assert!(!accepts(&fsm, b"b"));
    }

    #[test]
    fn test_determinize_is_deterministic_and_total_after_unsparse() {
        let mut fsm = literal(b"ab");
        fsm.union_with(&literal(b"ac"));
        fsm.determinize();
        fsm.unsparse();
        for state in 0..fsm.size() {
            for c in real_chars() {
                assert_eq!(fsm.destinations(state, c).len(), 1);
            }
        }
    }

    #[test]
    fn test_determinize_merges_tags_and_outputs() {
        // Two parallel edges into tagged states; the subset inherits the
        // OR of tags and the OR of edge outputs.
        let mut fsm = Fsm::new();
        fsm.resize(3);
        fsm.connect(0, 1, b'a' as Char);
        fsm.connect(0, 2, b'a' as Char);
        fsm.set_tag(1, 2);
        fsm.set_tag(2, 4);
        fsm.set_final(1, true);
        fsm.set_output(0, 1, 1);
        fsm.set_output(0, 2, 2);
        fsm.determinize();
        let to = fsm.only_destination(fsm.initial(), b'a' as Char);
        assert_eq!(fsm.tag(to), 6);
        assert_eq!(fsm.output(fsm.initial(), to), 3);
    }

    #[test]
    fn test_canonize_unifies_equivalent_finals() {
        // a|a built as a two-branch union must canonize to the minimal
        // two-live-state machine.
        let mut fsm = literal(b"a");
        fsm.union_with(&literal(b"a"));
        fsm.canonize();
        let live = fsm.size() - fsm.dead_states().len();
        assert_eq!(live, 2);
    }

    #[test]
    fn test_minimize_idempotent() {
        let mut fsm = literal(b"ab");
        fsm.union_with(&literal(b"cb"));
        fsm.canonize();
        let size = fsm.size();
        fsm.minimize();
        assert_eq!(fsm.size(), size);
    }

    #[test]
    fn test_dead_states() {
        let mut fsm = Fsm::new();
        fsm.resize(3);
        fsm.set_final(0, false);
        fsm.connect(0, 1, b'a' as Char);
        fsm.connect(0, 2, b'b' as Char);
        fsm.set_final(1, true);
        // State 2 loops forever without reaching a final.
        fsm.connect(2, 2, b'b' as Char);
        let dead = fsm.dead_states();
        assert!(dead.contains(&2));
        assert!(!dead.contains(&0));
        assert!(!dead.contains(&1));
    }

    #[test]
    fn test_intersect() {
        // (ab|cd) ∩ (ab|xy) = ab
        let mut lhs = literal(b"ab");
        lhs.union_with(&literal(b"cd"));
        let mut rhs = literal(b"ab");
        rhs.union_with(&literal(b"xy"));
        let mut both = lhs.intersect(&rhs);
        both.unsparse();
        assert!(accepts(&both, b"ab"));
        assert!(!accepts(&both, b"cd"));
        assert!(!accepts(&both, b"xy"));
    }

    #[test]
    fn test_complement() {
        let mut not_ab = literal(b"ab").complement();
        not_ab.unsparse();
        assert!(!accepts(&not_ab, b"ab"));
        assert!(accepts(&not_ab, b"a"));
        assert!(accepts(&not_ab, b""));
        assert!(accepts(&not_ab, b"abx"));
    }

    #[test]
    fn test_surround_matches_anywhere() {
        let mut fsm = literal(b"ab");
        fsm.surround();
        fsm.determinize();
        fsm.unsparse();
        assert!(accepts(&fsm, b"ab"));
        assert!(accepts(&fsm, b"xxabyy"));
        assert!(!accepts(&fsm, b"axb"));
    }

    #[test]
    fn test_letters_partition() {
        // In a·(b|c), chars b and c are interchangeable; a is not.
        let mut tail = literal(b"b");
        tail.union_with(&literal(b"c"));
        let mut fsm = literal(b"a");
        fsm.concat(&tail);
        fsm.remove_epsilons();
        let letters = fsm.letters();
        assert_eq!(letters.index(b'b' as Char), letters.index(b'c' as Char));
        assert_ne!(letters.index(b'a' as Char), letters.index(b'b' as Char));
        // Every char belongs to exactly one class.
        let total: usize = letters.classes().iter().map(|c| c.chars().len()).sum();
        assert_eq!(total, MAX_CHAR - 1);
    }

    #[test]
    fn test_invalid_char_range() {
        assert!(invalid_char_range(&[259]));
        assert!(!invalid_char_range(&[EPSILON]));
        assert!(!invalid_char_range(&[5, 259]));
        assert!(!invalid_char_range(&[BEGIN_MARK]));
    }

    #[test]
    fn test_padding_char_forms_invalid_class_after_prepend() {
        let mut fsm = literal(b"a");
        fsm.prepend_anything();
        fsm.remove_epsilons();
        let letters = fsm.letters();
        let padding_class = &letters.classes()[letters.index(259)];
        assert!(invalid_char_range(padding_class.chars()));
    }
}
