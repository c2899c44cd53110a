//! Compiled counting scanners: the packed transition table, the two
//! public constructors, the glue product, and the run-time driving
//! loop.
//!
//! # Action word layout
//!
//! Both scanner variants store one `u32` action word per transition:
//! bit `i` increments the counter of regexp `i`, bit
//! `MAX_RE_COUNT + i` folds-and-zeroes it.  The advanced pipeline's
//! internal `{Increment, Reset}` bits and the basic pipeline's
//! `{DeadFlag, Matched}` edge outputs both remap into this layout, which
//! is what lets [`glue`](CountingScanner::glue) combine two scanners
//! with plain shifts: `L.action | (R.action << L.regexps_count)` moves
//! both halves of the word at once.

use indexmap::IndexSet;

use crate::count::{CountingFsm, INCREMENT_ACTION, RESET_ACTION};
use crate::determine::{determine, DetermineTask};
use crate::fsm::{invalid_char_range, Char, Fsm, LettersTbl, BEGIN_MARK, END_MARK, EPSILON, MAX_CHAR};
use crate::Error;

/// Maximum number of regexps a single (glued) scanner can track; one
/// increment and one reset bit per regexp must fit the action word.
pub const MAX_RE_COUNT: usize = 16;

/// Basic-pipeline edge output: the main copy died on this transition.
const DEAD_FLAG: u32 = 1;
/// Basic-pipeline state tag and edge output: the state belongs to the
/// duplicate entered after a completed match.
const MATCHED: u32 = 2;

const DEFAULT_GLUE_MAX_SIZE: usize = 250_000;

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
struct Jump {
    next: u32,
    action: u32,
}

/// The packed `(state, letter) → (next, action)` table shared by both
/// scanner variants, immutable once built.
#[derive(Clone, Debug)]
struct ScannerTable {
    /// Char → letter index; one entry per possible char.
    letters: Vec<u32>,
    letters_count: usize,
    regexps_count: usize,
    initial: usize,
    tags: Vec<u32>,
    jumps: Vec<Jump>,
}

impl ScannerTable {
    fn init(size: usize, letters: &LettersTbl, initial: usize, regexps_count: usize) -> Self {
        let mut map = vec![0u32; MAX_CHAR];
        for c in (0..MAX_CHAR as Char).filter(|&c| c != EPSILON) {
            map[c as usize] = letters.index(c) as u32;
        }
        Self {
            letters: map,
            letters_count: letters.len(),
            regexps_count,
            initial,
            tags: vec![0; size],
            jumps: vec![Jump::default(); size * letters.len()],
        }
    }

    fn set_jump(&mut self, state: usize, on: Char, next: usize, action: u32) {
        let letter = self.letters[on as usize] as usize;
        self.jumps[state * self.letters_count + letter] = Jump {
            next: next as u32,
            action,
        };
    }

    fn set_tag(&mut self, state: usize, tag: u32) {
        self.tags[state] = tag;
    }

    fn jump(&self, state: usize, on: Char) -> Jump {
        let letter = self.letters[on as usize] as usize;
        self.jumps[state * self.letters_count + letter]
    }

    fn next_state(&self, state: usize, on: Char) -> usize {
        self.jump(state, on).next as usize
    }

    fn action(&self, state: usize, on: Char) -> u32 {
        self.jump(state, on).action
    }

    fn size(&self) -> usize {
        self.tags.len()
    }

    fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.letters.len() * std::mem::size_of::<u32>()
            + self.tags.len() * std::mem::size_of::<u32>()
            + self.jumps.len() * std::mem::size_of::<Jump>()
    }

    // -----------------------------------------------------------------------
    // Run-time
    // -----------------------------------------------------------------------

    fn begin(&self) -> ScanState {
        let mut state = ScanState {
            state: self.initial,
            current: [0; MAX_RE_COUNT],
            total: [0; MAX_RE_COUNT],
        };
        self.step_char(&mut state, BEGIN_MARK);
        state
    }

    fn take_action(&self, state: &mut ScanState, action: u32) {
        let resets = action >> MAX_RE_COUNT;
        if resets != 0 {
            for i in 0..self.regexps_count {
                if resets & (1 << i) != 0 {
                    state.total[i] = state.total[i].max(state.current[i]);
                    state.current[i] = 0;
                }
            }
        }
        let increments = action & ((1 << MAX_RE_COUNT) - 1);
        if increments != 0 {
            for i in 0..self.regexps_count {
                if increments & (1 << i) != 0 {
                    state.current[i] += 1;
                }
            }
        }
    }

    fn step_char(&self, state: &mut ScanState, on: Char) {
        let jump = self.jump(state.state, on);
        state.state = jump.next as usize;
        self.take_action(state, jump.action);
    }

    fn finish(&self, state: &mut ScanState) {
        self.step_char(state, END_MARK);
    }

    fn result(&self, state: &ScanState, index: usize) -> u32 {
        state.current[index].max(state.total[index])
    }

    fn run(&self, input: &[u8]) -> Vec<u32> {
        let mut state = self.begin();
        for &b in input {
            self.step_char(&mut state, b as Char);
        }
        self.finish(&mut state);
        (0..self.regexps_count)
            .map(|i| self.result(&state, i))
            .collect()
    }
}

/// Per-scan mutable state: the DFA state plus one current/high-water
/// counter pair per tracked regexp.
#[derive(Clone, Debug)]
pub struct ScanState {
    state: usize,
    current: [u32; MAX_RE_COUNT],
    total: [u32; MAX_RE_COUNT],
}

// ---------------------------------------------------------------------------
// Action remapping
// ---------------------------------------------------------------------------

/// Advanced pipeline: internal `{Increment, Reset}` bits to the packed
/// word (single-regexp position).
fn remap_action(action: u32) -> u32 {
    let mut word = 0;
    if action & INCREMENT_ACTION != 0 {
        word |= 1;
    }
    if action & RESET_ACTION != 0 {
        word |= 1 << MAX_RE_COUNT;
    }
    word
}

/// Basic pipeline: a `Matched` death advances the counter, a plain
/// death folds it.
fn remap_basic_action(outputs: u32) -> u32 {
    if outputs & MATCHED != 0 {
        1
    } else if outputs & DEAD_FLAG != 0 {
        1 << MAX_RE_COUNT
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Glue
// ---------------------------------------------------------------------------

/// Product determinization of two scanner tables over the intersection
/// of their letter partitions.
struct GlueTask<'a> {
    lhs: &'a ScannerTable,
    rhs: &'a ScannerTable,
    letters: LettersTbl,
    states: Vec<(usize, usize)>,
    output: Option<ScannerTable>,
}

impl<'a> GlueTask<'a> {
    fn new(lhs: &'a ScannerTable, rhs: &'a ScannerTable) -> Self {
        // Chars are equivalent for the product iff they are equivalent
        // for both operands.
        let letters = LettersTbl::from_keys(|c| {
            (lhs.letters[c as usize], rhs.letters[c as usize])
        });
        Self {
            lhs,
            rhs,
            letters,
            states: Vec::new(),
            output: None,
        }
    }
}

impl DetermineTask for GlueTask<'_> {
    type State = (usize, usize);

    fn letters(&self) -> &LettersTbl {
        &self.letters
    }

    fn initial(&self) -> (usize, usize) {
        (self.lhs.initial, self.rhs.initial)
    }

    fn next(&mut self, state: &(usize, usize), letter: Char) -> (usize, usize) {
        (
            self.lhs.next_state(state.0, letter),
            self.rhs.next_state(state.1, letter),
        )
    }

    fn accept_states(&mut self, states: &[(usize, usize)]) {
        self.states = states.to_vec();
        let mut output = ScannerTable::init(
            states.len(),
            &self.letters,
            0,
            self.lhs.regexps_count + self.rhs.regexps_count,
        );
        for (index, &(lhs_state, rhs_state)) in states.iter().enumerate() {
            output.set_tag(index, self.lhs.tags[lhs_state] | (self.rhs.tags[rhs_state] << 3));
        }
        self.output = Some(output);
    }

    fn connect(&mut self, from: usize, to: usize, letter: Char) {
        let (lhs_state, rhs_state) = self.states[from];
        let action = self.lhs.action(lhs_state, letter)
            | (self.rhs.action(rhs_state, letter) << self.lhs.regexps_count);
        if let Some(output) = self.output.as_mut() {
            output.set_jump(from, letter, to, action);
        }
    }
}

fn glue_tables(
    lhs: &ScannerTable,
    rhs: &ScannerTable,
    max_size: usize,
) -> Result<ScannerTable, Error> {
    debug_assert!(lhs.regexps_count + rhs.regexps_count <= MAX_RE_COUNT);
    let mut task = GlueTask::new(lhs, rhs);
    let budget = if max_size != 0 {
        max_size
    } else {
        DEFAULT_GLUE_MAX_SIZE
    };
    if determine(&mut task, budget) {
        Ok(task.output.expect("accept_states ran on success"))
    } else {
        Err(Error::ScannerTooLarge)
    }
}

// ---------------------------------------------------------------------------
// Advanced scanner
// ---------------------------------------------------------------------------

/// The advanced counting scanner: per-transition `{Increment, Reset}`
/// actions compiled by the multi-track determinizer.
#[derive(Clone, Debug)]
pub struct AdvancedCountingScanner {
    table: ScannerTable,
}

impl AdvancedCountingScanner {
    /// Compile `(re, sep)`.
    pub fn new(re: &Fsm, sep: &Fsm) -> Result<Self, Error> {
        Self::with_simple_flag(re, sep).map(|(scanner, _)| scanner)
    }

    /// Compile `(re, sep)`, also reporting whether the simple fallback
    /// determinizer was used (`true`) or the precise one succeeded
    /// within its budget (`false`).
    pub fn with_simple_flag(re: &Fsm, sep: &Fsm) -> Result<(Self, bool), Error> {
        let mut counting = CountingFsm::new(re, sep);
        if !counting.determine() {
            return Err(Error::TooComplicated);
        }
        counting.minimize();

        let determined = counting.determined();
        let letters = counting.letters();
        let mut table = ScannerTable::init(determined.size(), letters, determined.initial(), 1);
        for from in 0..determined.size() {
            for class in letters.classes() {
                let representative = class.representative();
                let to = determined.only_destination(from, representative);
                table.set_jump(
                    from,
                    representative,
                    to,
                    remap_action(counting.output(from, representative)),
                );
            }
        }
        Ok((Self { table }, counting.simple()))
    }

    /// Combine two scanners into one tracking both regexp sets.
    /// `max_size == 0` selects the default budget of 250000 states.
    pub fn glue(lhs: &Self, rhs: &Self, max_size: usize) -> Result<Self, Error> {
        glue_tables(&lhs.table, &rhs.table, max_size).map(|table| Self { table })
    }

    /// Scan `input` (wrapped in the begin/end marks) and return one
    /// count per tracked regexp.
    pub fn run(&self, input: &[u8]) -> Vec<u32> {
        self.table.run(input)
    }

    pub fn begin(&self) -> ScanState {
        self.table.begin()
    }

    pub fn step(&self, state: &mut ScanState, byte: u8) {
        self.table.step_char(state, byte as Char);
    }

    pub fn finish(&self, state: &mut ScanState) {
        self.table.finish(state);
    }

    pub fn result(&self, state: &ScanState, index: usize) -> u32 {
        self.table.result(state, index)
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn regexps_count(&self) -> usize {
        self.table.regexps_count
    }

    /// Total memory footprint (in bytes), inline and heap-allocated.
    pub fn memory_size(&self) -> usize {
        self.table.memory_size()
    }
}

// ---------------------------------------------------------------------------
// Basic scanner
// ---------------------------------------------------------------------------

/// The basic counting scanner: a main×backup product over the
/// determinized separator-then-regexp automaton, counting on
/// `DeadFlag | Matched` transitions.
#[derive(Clone, Debug)]
pub struct CountingScanner {
    table: ScannerTable,
}

impl CountingScanner {
    /// Compile `(re, sep)`.
    pub fn new(re: &Fsm, sep: &Fsm) -> Self {
        let mut res = re.clone();
        res.surround();
        // The gap before each counted occurrence: contains a separator
        // match but no occurrence of the regexp itself.
        let mut sep_any = sep.clone();
        sep_any.surround();
        let mut sep_re = sep_any.intersect(&res.complement());
        sep_re.concat(re);
        sep_re.determinize();

        // Duplicate into a Matched-tagged copy, entered by ε from every
        // final: being inside the copy means one occurrence has been
        // counted.
        let mut dup = sep_re.clone();
        for state in 0..dup.size() {
            dup.set_tag(state, MATCHED);
        }
        let oldsize = sep_re.size();
        sep_re.import(&dup);
        let finals: Vec<usize> = sep_re
            .finals()
            .iter()
            .copied()
            .filter(|&f| f < oldsize)
            .collect();
        for f in finals {
            sep_re.connect_eps(f, oldsize + f);
        }

        // Totality over the alphabet: any byte, and both marks.
        let mut any = Fsm::new();
        any.append_dot();
        let mut begin = Fsm::new();
        begin.append_special(BEGIN_MARK);
        let mut end = Fsm::new();
        end.append_special(END_MARK);
        any.union_with(&begin);
        any.union_with(&end);
        sep_re.union_with(&any);

        sep_re.determinize();
        sep_re.unsparse();
        let dead = sep_re.dead_states();
        let letters = sep_re.letters();

        // Cartesian square: (main, backup) pairs.  The main component
        // carries tag and finality; when it dies the backup takes over,
        // and the backup resets whenever the main is ahead of it.
        let mut sq = Fsm::new();
        sq.set_final(0, false);
        let mut pairs: IndexSet<(usize, usize)> = IndexSet::new();
        pairs.insert((sep_re.initial(), sep_re.initial()));

        let mut current = 0;
        while current < pairs.len() {
            let (main, backup) = pairs[current];
            sq.resize(sq.size().max(current + 1));
            let tag = sep_re.tag(main);
            if tag != 0 {
                sq.set_tag(current, tag);
            }
            sq.set_final(current, sep_re.is_final(main));

            for class in letters.classes() {
                if invalid_char_range(class.chars()) {
                    continue;
                }
                let representative = class.representative();
                let main_next = sep_re.only_destination(main, representative);
                let backup_next = sep_re.only_destination(backup, representative);

                let mut pair = (main_next, backup_next);
                let mut outputs = 0;
                if dead.contains(&pair.0) {
                    outputs = DEAD_FLAG | (sep_re.tag(pair.0) & MATCHED);
                    pair.0 = pair.1;
                }
                if sep_re.is_final(pair.0)
                    || (sep_re.is_final(pair.1) && sep_re.tag(pair.0) & MATCHED == 0)
                {
                    pair.1 = sep_re.initial();
                }

                let (to, _) = pairs.insert_full(pair);
                sq.resize(sq.size().max(to + 1));
                for &c in class.chars() {
                    sq.connect(current, to, c);
                }
                if outputs != 0 {
                    let merged = sq.output(current, to) | outputs;
                    sq.set_output(current, to, merged);
                }
            }
            current += 1;
        }

        sq.determinize();

        let sq_letters = sq.letters();
        let mut table = ScannerTable::init(sq.size(), &sq_letters, sq.initial(), 1);
        for from in 0..sq.size() {
            for class in sq_letters.classes() {
                let representative = class.representative();
                let dests = sq.destinations(from, representative);
                if dests.is_empty() {
                    // Letters no real input char maps to reset to the
                    // initial state.
                    table.set_jump(from, representative, sq.initial(), 0);
                    continue;
                }
                let to = sq.only_destination(from, representative);
                table.set_jump(
                    from,
                    representative,
                    to,
                    remap_basic_action(sq.output(from, to)),
                );
            }
            table.set_tag(from, sq.tag(from));
        }

        Self { table }
    }

    /// Combine two scanners into one tracking both regexp sets.
    /// `max_size == 0` selects the default budget of 250000 states.
    pub fn glue(lhs: &Self, rhs: &Self, max_size: usize) -> Result<Self, Error> {
        glue_tables(&lhs.table, &rhs.table, max_size).map(|table| Self { table })
    }

    /// Scan `input` (wrapped in the begin/end marks) and return one
    /// count per tracked regexp.
    pub fn run(&self, input: &[u8]) -> Vec<u32> {
        self.table.run(input)
    }

    pub fn begin(&self) -> ScanState {
        self.table.begin()
    }

    pub fn step(&self, state: &mut ScanState, byte: u8) {
        self.table.step_char(state, byte as Char);
    }

    pub fn finish(&self, state: &mut ScanState) {
        self.table.finish(state);
    }

    pub fn result(&self, state: &ScanState, index: usize) -> u32 {
        self.table.result(state, index)
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    pub fn regexps_count(&self) -> usize {
        self.table.regexps_count
    }

    /// Total memory footprint (in bytes), inline and heap-allocated.
    pub fn memory_size(&self) -> usize {
        self.table.memory_size()
    }
}
