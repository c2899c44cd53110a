//! Counting-FSM compilation: the tagged NFA, the precise multi-track
//! determinizer, the simple fallback determinizer, and the
//! action-preserving minimizer.
//!
//! # Tagged subsets
//!
//! A determinized state is not a plain subset of NFA states but a
//! 4-tuple of disjoint tagged groups:
//!
//! ```text
//! { matched | unmatched | separated | lagging }
//! ```
//!
//! `unmatched` tracks live parses of the regexp, `separated` tracks the
//! separator component (entered from a completed match), `matched` is a
//! staging bucket for freshly completed matches (absorbed into
//! `unmatched` by normalization), and `lagging` retains superseded
//! parses that can only re-enter play after a `Reset`.  Which buckets a
//! transition fills decides the `{Increment, Reset}` action it emits.
//!
//! Both determinizers run through the same [`CountingTask`] plumbing
//! and bucket operations; a [`CountingStrategy`] supplies the four
//! hooks where they diverge (`prepare`/`post`/`tag`/`initial group`).
//! The precise strategy keeps every candidate NFA state per bucket; the
//! fallback keeps at most one live state per bucket with deterministic
//! tie-breaks.

use std::collections::{BTreeMap, BTreeSet};

use crate::determine::{determine, minimize, DetermineTask, MinimizeTask, Partition};
use crate::fsm::{invalid_char_range, Char, Fsm, LettersTbl};

// ---------------------------------------------------------------------------
// Tags and actions
// ---------------------------------------------------------------------------

/// State descends from the regexp and has not completed a match yet.
pub(crate) const NOT_MATCHED: u32 = 1;
/// State corresponds to a final state of the regexp.
pub(crate) const MATCHED: u32 = 1 << 1;
/// State belongs to the separator component.
pub(crate) const SEPARATED: u32 = 1 << 2;

/// Internal transition action: bump the occurrence counter.
pub(crate) const INCREMENT_ACTION: u32 = 1;
/// Internal transition action: fold and zero the occurrence counter.
pub(crate) const RESET_ACTION: u32 = 2;

type RawState = usize;
type TaggedState = (RawState, u32);
type StateGroup = BTreeSet<TaggedState>;

/// Non-zero actions of one DFA state, keyed by letter representative.
pub(crate) type TransitionTagRow = BTreeMap<Char, u32>;

// ---------------------------------------------------------------------------
// DeterminedState
// ---------------------------------------------------------------------------

/// The multi-track subset keying the subset-construction memo.
///
/// Ordering is derived, hence lexicographic on
/// `(matched, unmatched, separated, lagging)` — totality matters because
/// these values key maps; insertion order must not.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct DeterminedState {
    matched: StateGroup,
    unmatched: StateGroup,
    separated: StateGroup,
    lagging: StateGroup,
}

impl DeterminedState {
    fn is_empty(&self) -> bool {
        self.matched.is_empty()
            && self.unmatched.is_empty()
            && self.separated.is_empty()
            && self.lagging.is_empty()
    }
}

/// Destination buckets produced by one splitting pass.
#[derive(Debug, Default)]
struct Split {
    matched: StateGroup,
    unmatched: StateGroup,
    separated: StateGroup,
}

impl Split {
    /// Collapse the three buckets into one group, preserving the
    /// computed tags.  Used where all destinations flow into a single
    /// bucket of the successor state.
    fn merged(self) -> StateGroup {
        let mut all = self.matched;
        all.extend(self.unmatched);
        all.extend(self.separated);
        all
    }
}

// ---------------------------------------------------------------------------
// Shared task core
// ---------------------------------------------------------------------------

/// State shared by both determinize strategies: the tagged NFA, the
/// memoized action rows, and the output under construction.
struct TaskCore<'a> {
    fsm: &'a Fsm,
    letters: &'a LettersTbl,
    re_initial: RawState,
    dead_states: BTreeSet<RawState>,
    /// Representatives of classes no real input char belongs to.
    invalid_letters: BTreeSet<Char>,
    action_by_state: BTreeMap<DeterminedState, TransitionTagRow>,
    output: Fsm,
    actions: Vec<TransitionTagRow>,
}

impl<'a> TaskCore<'a> {
    fn new(fsm: &'a Fsm, letters: &'a LettersTbl, re_initial: RawState) -> Self {
        let invalid_letters = letters
            .classes()
            .iter()
            .filter(|class| invalid_char_range(class.chars()))
            .map(|class| class.representative())
            .collect();
        Self {
            fsm,
            letters,
            re_initial,
            dead_states: fsm.dead_states(),
            invalid_letters,
            action_by_state: BTreeMap::new(),
            output: Fsm::new(),
            actions: Vec::new(),
        }
    }

    /// Classify `destinations` (reached with `source_tag`) into buckets:
    /// a fresh match goes to `matched` with its own tag, anything on the
    /// separator side goes to `separated` re-tagged `Separated`, the
    /// rest continues in `unmatched` under the source tag.  Dead states
    /// are dropped.
    fn make_tagged_states(
        &self,
        out: &mut Split,
        destinations: impl IntoIterator<Item = RawState>,
        source_tag: u32,
    ) {
        for dest in destinations {
            if self.dead_states.contains(&dest) {
                continue;
            }
            let dest_tag = self.fsm.tag(dest);
            if source_tag != MATCHED && dest_tag == MATCHED {
                out.matched.insert((dest, dest_tag));
            } else if source_tag == SEPARATED || dest_tag == SEPARATED {
                out.separated.insert((dest, SEPARATED));
            } else {
                out.unmatched.insert((dest, source_tag));
            }
        }
    }

    /// Per-letter successors of a whole group.  A final source state
    /// additionally fires the implicit ε-jump back to the regexp start
    /// (a separator match may immediately begin the next occurrence);
    /// its results land in the separated bucket with their computed
    /// tags.
    fn split_destinations(&self, source: &StateGroup, letter: Char) -> Split {
        let mut out = Split::default();
        for &(raw, tag) in source {
            self.make_tagged_states(
                &mut out,
                self.fsm.destinations(raw, letter).iter().copied(),
                tag,
            );
            if self.fsm.is_final(raw) {
                let mut jump = Split::default();
                self.make_tagged_states(
                    &mut jump,
                    self.fsm.destinations(self.re_initial, letter).iter().copied(),
                    SEPARATED,
                );
                out.separated.extend(jump.merged());
            }
        }
        out
    }

    /// The action a transition into `dest` emits, judged on the raw
    /// buckets before post-processing:
    /// - a fresh match increments;
    /// - no live parse but a separator track that itself carries a
    ///   `Matched` tag increments (zero-length separator chains);
    /// - nothing live at all resets, plus an increment if any lagging
    ///   entry had progressed past `NotMatched`.
    fn calculate_transition_tag_impl(&self, dest: &DeterminedState) -> u32 {
        let mut result = 0;
        if !dest.matched.is_empty() {
            result = INCREMENT_ACTION;
        } else if dest.unmatched.is_empty() {
            if !dest.separated.is_empty() {
                for state in &dest.separated {
                    if state.1 == MATCHED {
                        result = INCREMENT_ACTION;
                    }
                }
            } else {
                result = RESET_ACTION;
                for state in &dest.lagging {
                    if state.1 != NOT_MATCHED {
                        result |= INCREMENT_ACTION;
                    }
                }
            }
        }
        result
    }

    fn tags_of_group(&self, group: &StateGroup) -> u32 {
        group.iter().fold(0, |acc, state| acc | state.1)
    }

    /// Split a group three ways by tag — the stored tag, or the NFA
    /// state's own tag when `use_fsm_tag` is set.
    fn split_group_by_tag(&self, source: &StateGroup, use_fsm_tag: bool) -> Split {
        let mut out = Split::default();
        for &(raw, stored) in source {
            let tag = if use_fsm_tag { self.fsm.tag(raw) } else { stored };
            if tag == MATCHED {
                out.matched.insert((raw, stored));
            } else if tag == SEPARATED {
                out.separated.insert((raw, stored));
            } else {
                out.unmatched.insert((raw, stored));
            }
        }
        out
    }

    /// A fresh match supersedes every live parse: push `unmatched` and
    /// `separated` into `lagging` (when tracking laggards at all) and
    /// clear them.  A separator bucket mixing `Matched` with other tags
    /// keeps only the `Matched` entries, demoting the rest.
    fn update_lagging_states(&self, state: &mut DeterminedState, move_to_lagging: bool) {
        if !state.matched.is_empty() {
            if move_to_lagging {
                state.lagging.extend(state.unmatched.iter().copied());
                state.lagging.extend(state.separated.iter().copied());
            }
            state.unmatched.clear();
            state.separated.clear();
        }
        if state.unmatched.is_empty() && !state.separated.is_empty() {
            let tags = self.tags_of_group(&state.separated);
            if tags & MATCHED != 0 && tags != MATCHED {
                let mut kept = StateGroup::new();
                for &separated_state in &state.separated {
                    if separated_state.1 == MATCHED {
                        kept.insert(separated_state);
                    } else if move_to_lagging {
                        state.lagging.insert(separated_state);
                    }
                }
                state.separated = kept;
            }
        }
    }

    /// Raw states of `groups` whose tag has no bit in `excluded_tags`.
    /// The bitmask test is deliberate: with `excluded_tags == 0` every
    /// entry contributes, with `NotMatched` only entries carrying some
    /// other tag do.
    fn raw_states(&self, groups: &[&StateGroup], excluded_tags: u32) -> BTreeSet<RawState> {
        let mut result = BTreeSet::new();
        for group in groups {
            for &(raw, tag) in group.iter() {
                if tag & excluded_tags == 0 {
                    result.insert(raw);
                }
            }
        }
        result
    }

    /// Drop lagging entries shadowed by a live bucket, then drop
    /// `NotMatched` laggards whose raw state also lags with a stronger
    /// tag.
    fn remove_duplicate_lagging_states(&self, state: &mut DeterminedState) {
        let states_to_remove =
            self.raw_states(&[&state.matched, &state.unmatched, &state.separated], 0);
        let unmatched_states_to_remove = self.raw_states(&[&state.lagging], NOT_MATCHED);

        let mut kept = StateGroup::new();
        for &tagged in &state.lagging {
            if !states_to_remove.contains(&tagged.0)
                && (tagged.1 != NOT_MATCHED || !unmatched_states_to_remove.contains(&tagged.0))
            {
                kept.insert(tagged);
            }
        }
        state.lagging = kept;
    }

    /// Drop separated entries whose raw state is already live in
    /// `matched` or `unmatched`.
    fn remove_duplicate_separated_states(&self, state: &mut DeterminedState) {
        if state.separated.is_empty() {
            return;
        }
        let states_to_remove = self.raw_states(&[&state.matched, &state.unmatched], 0);
        state
            .separated
            .retain(|tagged| !states_to_remove.contains(&tagged.0));
    }

    /// Canonicalize the bucket layout so equal configurations compare
    /// equal: `matched` drains into `unmatched`; an empty `unmatched`
    /// is refilled from `separated`, or failing that from `lagging`
    /// split by stored tag (preferring matched, then separated
    /// entries).
    fn normalize_state(&self, state: &mut DeterminedState) {
        if !state.matched.is_empty() {
            debug_assert!(state.unmatched.is_empty());
            std::mem::swap(&mut state.unmatched, &mut state.matched);
        }

        if state.unmatched.is_empty() && !state.separated.is_empty() {
            std::mem::swap(&mut state.unmatched, &mut state.separated);
        }

        if state.unmatched.is_empty() && !state.lagging.is_empty() {
            let groups = self.split_group_by_tag(&state.lagging, false);
            if !groups.matched.is_empty() {
                state.unmatched = groups.matched;
                state.separated = groups.separated;
                state.lagging = groups.unmatched;
            } else if !groups.separated.is_empty() {
                state.unmatched = groups.separated;
                state.lagging = groups.unmatched;
            } else {
                state.unmatched = groups.unmatched;
                state.lagging = StateGroup::new();
            }
        }
    }

    fn add_action(&mut self, from: &DeterminedState, letter: Char, value: u32) {
        if value == 0 {
            return;
        }
        self.action_by_state
            .entry(from.clone())
            .or_default()
            .insert(letter, value);
    }

    fn has_finals(&self, group: &StateGroup) -> bool {
        group.iter().any(|state| self.fsm.is_final(state.0))
    }
}

// ---------------------------------------------------------------------------
// Determinize strategies
// ---------------------------------------------------------------------------

/// The four points where the precise and the simple determinizer
/// diverge.  Everything else — including the subset-construction
/// plumbing — is shared by [`CountingTask`].
trait CountingStrategy {
    fn prepare_next_state(
        &self,
        core: &TaskCore<'_>,
        state: &DeterminedState,
        letter: Char,
    ) -> DeterminedState;

    fn post_process_next_state(&self, core: &TaskCore<'_>, next: &mut DeterminedState);

    fn calculate_transition_tag(
        &self,
        core: &TaskCore<'_>,
        source: &DeterminedState,
        dest: &DeterminedState,
    ) -> u32 {
        let _ = source;
        core.calculate_transition_tag_impl(dest)
    }

    fn initial_group(&self, core: &TaskCore<'_>) -> StateGroup {
        [(core.fsm.initial(), NOT_MATCHED)].into_iter().collect()
    }
}

/// Subset-construction task shared by both strategies.
struct CountingTask<'a, S> {
    core: TaskCore<'a>,
    strategy: S,
}

impl<'a, S: CountingStrategy> CountingTask<'a, S> {
    fn new(fsm: &'a Fsm, letters: &'a LettersTbl, re_initial: RawState, strategy: S) -> Self {
        Self {
            core: TaskCore::new(fsm, letters, re_initial),
            strategy,
        }
    }

    fn into_outputs(self) -> (Fsm, Vec<TransitionTagRow>) {
        (self.core.output, self.core.actions)
    }
}

impl<S: CountingStrategy> DetermineTask for CountingTask<'_, S> {
    type State = DeterminedState;

    fn letters(&self) -> &LettersTbl {
        self.core.letters
    }

    fn initial(&self) -> DeterminedState {
        DeterminedState {
            unmatched: self.strategy.initial_group(&self.core),
            ..DeterminedState::default()
        }
    }

    fn next(&mut self, state: &DeterminedState, letter: Char) -> DeterminedState {
        if self.core.invalid_letters.contains(&letter) {
            // Letters no real input char maps to still need transitions;
            // they reset to the initial state.
            self.core.add_action(state, letter, NOT_MATCHED);
            return DetermineTask::initial(self);
        }

        let mut next = self.strategy.prepare_next_state(&self.core, state, letter);
        let action = self.strategy.calculate_transition_tag(&self.core, state, &next);
        self.core.add_action(state, letter, action);
        self.strategy.post_process_next_state(&self.core, &mut next);
        self.core.normalize_state(&mut next);
        next
    }

    fn accept_states(&mut self, states: &[DeterminedState]) {
        let mut output = Fsm::new();
        output.set_final(0, false);
        output.resize(states.len());
        output.set_initial(0);
        self.core.actions = vec![TransitionTagRow::new(); states.len()];
        for (ns, state) in states.iter().enumerate() {
            output.set_final(ns, self.core.has_finals(&state.unmatched));
            if let Some(row) = self.core.action_by_state.remove(state) {
                self.core.actions[ns] = row;
            }
        }
        output.set_determined(true);
        self.core.output = output;
    }

    fn connect(&mut self, from: usize, to: usize, letter: Char) {
        let class = &self.core.letters.classes()[self.core.letters.index(letter)];
        for &c in class.chars() {
            self.core.output.connect(from, to, c);
        }
        self.core.output.set_determined(true);
    }
}

/// The precise strategy: keep every candidate NFA state in its bucket.
struct PreciseStrategy;

impl CountingStrategy for PreciseStrategy {
    fn prepare_next_state(
        &self,
        core: &TaskCore<'_>,
        state: &DeterminedState,
        letter: Char,
    ) -> DeterminedState {
        let mut next = DeterminedState::default();
        let split = core.split_destinations(&state.unmatched, letter);
        next.matched = split.matched;
        next.unmatched = split.unmatched;
        next.separated = split.separated;
        // Successors of the separator track stay on the separator track;
        // successors of laggards keep lagging.
        next.separated
            .extend(core.split_destinations(&state.separated, letter).merged());
        next.lagging
            .extend(core.split_destinations(&state.lagging, letter).merged());
        next
    }

    fn post_process_next_state(&self, core: &TaskCore<'_>, next: &mut DeterminedState) {
        core.update_lagging_states(next, true);
        core.remove_duplicate_lagging_states(next);
        core.remove_duplicate_separated_states(next);
    }
}

/// The fallback strategy: at most one live state per bucket, no lagging
/// track, and resets suppressed until a match has been seen.
struct SimpleStrategy {
    start_state: TaggedState,
}

impl SimpleStrategy {
    const MIXED_TAGS: u32 = SEPARATED | MATCHED;

    fn is_valid_state(&self, state: &DeterminedState) -> bool {
        state.matched.is_empty()
            && state.unmatched.len() <= 1
            && state.separated.len() <= 1
            && state.lagging.is_empty()
    }

    /// Re-bucket the separated group by the NFA tags of its states.
    fn split_separated_by_fsm_tag(&self, core: &TaskCore<'_>, state: &mut DeterminedState) {
        debug_assert!(state.unmatched.is_empty());
        let separated = std::mem::take(&mut state.separated);
        let groups = core.split_group_by_tag(&separated, true);
        state.matched.extend(groups.matched);
        state.unmatched.extend(groups.unmatched);
        state.separated.extend(groups.separated);
    }

    /// Follow `source` one letter and keep the most progressed
    /// destination bucket: matched over separated over unmatched.
    fn choose_one_dest_state(
        &self,
        core: &TaskCore<'_>,
        dest: &mut StateGroup,
        source: &StateGroup,
        letter: Char,
    ) {
        let split = core.split_destinations(source, letter);
        if !split.matched.is_empty() {
            *dest = split.matched;
        } else if !split.separated.is_empty() {
            *dest = split.separated;
        } else if !split.unmatched.is_empty() {
            *dest = split.unmatched;
        }
    }

    /// Thin a multi-candidate separated bucket: drop duplicates of live
    /// states, then prefer separator-tagged over matched-tagged NFA
    /// states.
    fn choose_one_separated_state(&self, core: &TaskCore<'_>, state: &mut DeterminedState) {
        if state.separated.len() <= 1 {
            return;
        }
        core.remove_duplicate_separated_states(state);
        let groups = core.split_group_by_tag(&state.separated, true);
        if !groups.separated.is_empty() {
            state.separated = groups.separated;
        } else if !groups.matched.is_empty() {
            state.separated = groups.matched;
        }
    }
}

impl CountingStrategy for SimpleStrategy {
    fn prepare_next_state(
        &self,
        core: &TaskCore<'_>,
        state: &DeterminedState,
        letter: Char,
    ) -> DeterminedState {
        let mut next = DeterminedState::default();
        let mut from = state.clone();
        let from_is_empty = from.is_empty();
        if from_is_empty {
            from.unmatched.insert(self.start_state);
        }
        debug_assert!(self.is_valid_state(&from));

        let split = core.split_destinations(&from.unmatched, letter);
        next.matched = split.matched;
        next.unmatched = split.unmatched;
        next.separated = split.separated;

        if next.matched.is_empty() && !next.separated.is_empty() {
            if next.unmatched.is_empty() {
                self.split_separated_by_fsm_tag(core, &mut next);
                if next.separated.len() > 1 {
                    core.remove_duplicate_separated_states(&mut next);
                }
                if next.unmatched.is_empty() {
                    std::mem::swap(&mut next.unmatched, &mut next.separated);
                }
            } else {
                self.choose_one_separated_state(core, &mut next);
            }
        }

        if next.matched.is_empty() && next.separated.is_empty() && !from.separated.is_empty() {
            if !next.unmatched.is_empty() {
                let mut separated = std::mem::take(&mut next.separated);
                self.choose_one_dest_state(core, &mut separated, &from.separated, letter);
                next.separated = separated;
            } else {
                let split = core.split_destinations(&from.separated, letter);
                next.matched = split.matched;
                next.unmatched = split.unmatched;
                next.separated = split.separated;
                if next.matched.is_empty() && !next.separated.is_empty() {
                    self.split_separated_by_fsm_tag(core, &mut next);
                }
            }
            self.choose_one_separated_state(core, &mut next);
        }

        if !from_is_empty && next.is_empty() {
            // Refill from the start state so the scanner can pick up a
            // fresh occurrence after the reset.
            let source: StateGroup = [self.start_state].into_iter().collect();
            let mut lagging = std::mem::take(&mut next.lagging);
            self.choose_one_dest_state(core, &mut lagging, &source, letter);
            next.lagging = lagging;
        }

        next
    }

    fn post_process_next_state(&self, core: &TaskCore<'_>, next: &mut DeterminedState) {
        if !next.lagging.is_empty() {
            std::mem::swap(&mut next.unmatched, &mut next.lagging);
        }
        core.update_lagging_states(next, false);
        core.remove_duplicate_separated_states(next);
    }

    fn calculate_transition_tag(
        &self,
        core: &TaskCore<'_>,
        source: &DeterminedState,
        dest: &DeterminedState,
    ) -> u32 {
        let mut tag = core.calculate_transition_tag_impl(dest);
        let source_tags =
            core.tags_of_group(&source.unmatched) | core.tags_of_group(&source.separated);
        if source_tags & Self::MIXED_TAGS == 0 {
            // Declines to reset while no match has been seen yet.
            tag &= INCREMENT_ACTION;
        }
        tag
    }

    fn initial_group(&self, _core: &TaskCore<'_>) -> StateGroup {
        StateGroup::new()
    }
}

// ---------------------------------------------------------------------------
// Action-preserving minimizer
// ---------------------------------------------------------------------------

struct CountingFsmMinimizeTask<'a> {
    counting: &'a CountingFsm,
    output: Fsm,
    actions: Vec<TransitionTagRow>,
}

impl<'a> CountingFsmMinimizeTask<'a> {
    fn new(counting: &'a CountingFsm) -> Self {
        Self {
            counting,
            output: Fsm::new(),
            actions: Vec::new(),
        }
    }
}

impl MinimizeTask for CountingFsmMinimizeTask<'_> {
    fn size(&self) -> usize {
        self.counting.determined.size()
    }

    fn letters(&self) -> &LettersTbl {
        &self.counting.letters
    }

    fn next(&self, state: usize, letter: Char) -> usize {
        self.counting.determined.only_destination(state, letter)
    }

    fn is_final(&self, state: usize) -> bool {
        self.counting.determined.is_final(state)
    }

    /// Two states are mergeable only when they agree on the emitted
    /// action for every letter.
    fn same_classes(&self, first: usize, second: usize) -> bool {
        self.counting.letters.representatives().all(|letter| {
            self.counting.output(first, letter) == self.counting.output(second, letter)
        })
    }

    fn accept_partition(&mut self, partition: &Partition) {
        let mut output = Fsm::new();
        output.set_final(0, false);
        output.resize(partition.len());
        output.set_initial(0);
        self.actions = vec![TransitionTagRow::new(); partition.len()];

        // Unite equivalence classes into new states.
        for from in 0..self.size() {
            let from_minimized = partition.index(from);
            for class in self.counting.letters.classes() {
                let representative = class.representative();
                let next = self.next(from, representative);
                let next_minimized = partition.index(next);
                for &c in class.chars() {
                    output.connect(from_minimized, next_minimized, c);
                }
                let outputs = self.counting.output(from, representative);
                if outputs != 0 {
                    self.actions[from_minimized].insert(representative, outputs);
                }
            }
            if self.counting.determined.is_final(from) {
                output.set_final(from_minimized, true);
            }
        }

        output.set_determined(true);
        self.output = output;
    }
}

// ---------------------------------------------------------------------------
// CountingFsm
// ---------------------------------------------------------------------------

/// The compilation context of the advanced scanner: the tagged NFA and,
/// once built, its determined and minimized annotated DFA.
pub(crate) struct CountingFsm {
    fsm: Fsm,
    re_initial: RawState,
    letters: LettersTbl,
    determined: Fsm,
    actions: Vec<TransitionTagRow>,
    simple: bool,
}

impl CountingFsm {
    /// Merge `re` and `sep` into the tagged NFA: canonize both, tag the
    /// separator's states `Separated`, link every final of `re` into
    /// the separator, tag those finals `Matched` (final as well when
    /// the separator accepts ε), then prefix `Σ*` and eliminate ε.
    ///
    /// The separator is wrapped `Σ* sep Σ*` first: the gap between two
    /// counted occurrences must *contain* a separator match, not *be*
    /// one, and the trailing `Σ*` is what keeps the scanner armed
    /// through garbage until the next occurrence starts.
    pub fn new(re: &Fsm, sep: &Fsm) -> Self {
        let mut fsm = re.clone();
        fsm.canonize();
        let re_matched_states: Vec<RawState> = fsm.finals().iter().copied().collect();

        let mut sep_only = sep.clone();
        sep_only.surround();
        sep_only.canonize();
        for state in 0..sep_only.size() {
            sep_only.set_tag(state, SEPARATED);
        }
        let allow_empty_separator = sep_only.is_final(sep_only.initial());
        fsm.concat(&sep_only);

        let re_initial = fsm.initial();
        for re_matched_state in re_matched_states {
            fsm.set_tag(re_matched_state, MATCHED);
            if allow_empty_separator {
                fsm.set_final(re_matched_state, true);
            }
        }

        fsm.prepend_anything();
        fsm.remove_epsilons();
        let letters = fsm.letters();

        Self {
            fsm,
            re_initial,
            letters,
            determined: Fsm::new(),
            actions: Vec::new(),
            simple: false,
        }
    }

    pub fn letters(&self) -> &LettersTbl {
        &self.letters
    }

    pub fn determined(&self) -> &Fsm {
        &self.determined
    }

    /// Action word of the `from --letter-->` transition (letter given by
    /// class representative); zero when the transition emits nothing.
    pub fn output(&self, from: usize, letter: Char) -> u32 {
        self.actions[from].get(&letter).copied().unwrap_or(0)
    }

    pub fn simple(&self) -> bool {
        self.simple
    }

    /// Determinize with the precise multi-track strategy under the
    /// `4096 × |NFA|` budget, falling back to the simple strategy.
    /// Returns `false` when both fail.
    pub fn determine(&mut self) -> bool {
        let max_size = self.fsm.size().saturating_mul(4096);
        let precise = {
            let mut task =
                CountingTask::new(&self.fsm, &self.letters, self.re_initial, PreciseStrategy);
            determine(&mut task, max_size).then(|| task.into_outputs())
        };
        if let Some((output, actions)) = precise {
            self.determined = output;
            self.actions = actions;
            self.simple = false;
            return true;
        }

        let simple = {
            let strategy = SimpleStrategy {
                start_state: (self.re_initial, NOT_MATCHED),
            };
            let mut task = CountingTask::new(&self.fsm, &self.letters, self.re_initial, strategy);
            determine(&mut task, usize::MAX).then(|| task.into_outputs())
        };
        match simple {
            Some((output, actions)) => {
                self.determined = output;
                self.actions = actions;
                self.simple = true;
                true
            }
            None => false,
        }
    }

    /// Merge action-equivalent states of the determined DFA.
    pub fn minimize(&mut self) {
        let (output, actions) = {
            let mut task = CountingFsmMinimizeTask::new(self);
            minimize(&mut task);
            (task.output, task.actions)
        };
        self.determined = output;
        self.actions = actions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(re: &str, sep: &str) -> CountingFsm {
        let re = Fsm::parse(re).expect("re parses");
        let sep = Fsm::parse(sep).expect("sep parses");
        CountingFsm::new(&re, &sep)
    }

    fn group(entries: &[(RawState, u32)]) -> StateGroup {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_tagged_nfa_tags() {
        let counting = counting("a", "b");
        let fsm = &counting.fsm;
        let tags: Vec<u32> = (0..fsm.size()).map(|s| fsm.tag(s)).collect();
        assert!(tags.contains(&MATCHED), "some state carries the regexp-final tag");
        assert!(tags.contains(&SEPARATED), "separator states are tagged");
        // Non-empty separator: regexp finals are not finals of the union.
        let matched_final = (0..fsm.size()).any(|s| fsm.tag(s) == MATCHED && fsm.is_final(s));
        assert!(!matched_final);
    }

    #[test]
    fn test_tagged_nfa_empty_separator_finals() {
        let counting = counting("x", "");
        let fsm = &counting.fsm;
        let matched_final = (0..fsm.size()).any(|s| fsm.tag(s) == MATCHED && fsm.is_final(s));
        assert!(matched_final, "ε-separator keeps regexp finals final");
    }

    #[test]
    fn test_determine_produces_total_deterministic_output() {
        let mut counting = counting("a", "b");
        assert!(counting.determine());
        assert!(!counting.simple());
        let determined = counting.determined();
        for state in 0..determined.size() {
            for letter in counting.letters().representatives() {
                assert_eq!(
                    determined.destinations(state, letter).len(),
                    1,
                    "state {state} must have exactly one successor on {letter}"
                );
            }
        }
    }

    #[test]
    fn test_determine_emits_increment_somewhere() {
        let mut counting = counting("a", "b");
        assert!(counting.determine());
        let any_increment = counting
            .actions
            .iter()
            .flat_map(|row| row.values())
            .any(|&action| action & INCREMENT_ACTION != 0);
        assert!(any_increment);
    }

    #[test]
    fn test_minimize_preserves_actions_and_shrinks() {
        let mut counting = counting("foo", "bar");
        assert!(counting.determine());
        let before = counting.determined.size();
        counting.minimize();
        let after = counting.determined.size();
        assert!(after <= before);
        // Minimizing again is a no-op.
        counting.minimize();
        assert_eq!(counting.determined.size(), after);
    }

    /// Walk `input` through the determined DFA, collecting the action
    /// of every transition taken.
    fn action_trace(counting: &CountingFsm, input: &[u8]) -> Vec<u32> {
        let letters = counting.letters();
        let mut state = counting.determined().initial();
        let mut trace = Vec::new();
        for &b in input {
            let representative = letters.classes()[letters.index(b as Char)].representative();
            trace.push(counting.output(state, representative));
            state = counting.determined().only_destination(state, representative);
        }
        trace
    }

    #[test]
    fn test_minimize_preserves_action_traces() {
        let mut counting = counting("ab", "c");
        assert!(counting.determine());
        let inputs: [&[u8]; 4] = [b"abcab", b"ababab", b"abxab", b"ccabab"];
        let before: Vec<Vec<u32>> = inputs.iter().map(|i| action_trace(&counting, i)).collect();
        counting.minimize();
        let after: Vec<Vec<u32>> = inputs.iter().map(|i| action_trace(&counting, i)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_normalize_state_invariants() {
        let counting = counting("a", "b");
        let core = TaskCore::new(&counting.fsm, &counting.letters, counting.re_initial);

        let mut state = DeterminedState {
            matched: group(&[(1, MATCHED)]),
            unmatched: StateGroup::new(),
            separated: group(&[(2, SEPARATED)]),
            lagging: group(&[(1, NOT_MATCHED), (3, NOT_MATCHED)]),
        };
        core.update_lagging_states(&mut state, true);
        core.remove_duplicate_lagging_states(&mut state);
        core.remove_duplicate_separated_states(&mut state);
        core.normalize_state(&mut state);

        // matched drained into unmatched; no raw state appears both live
        // and lagging.
        assert!(state.matched.is_empty());
        assert!(!state.unmatched.is_empty());
        let live: BTreeSet<RawState> = state
            .unmatched
            .iter()
            .chain(state.separated.iter())
            .map(|ts| ts.0)
            .collect();
        assert!(state.lagging.iter().all(|ts| !live.contains(&ts.0)));
    }

    #[test]
    fn test_normalize_refills_unmatched_from_lagging_by_stored_tag() {
        let counting = counting("a", "b");
        let core = TaskCore::new(&counting.fsm, &counting.letters, counting.re_initial);

        let mut state = DeterminedState {
            lagging: group(&[(1, NOT_MATCHED), (2, MATCHED)]),
            ..DeterminedState::default()
        };
        core.normalize_state(&mut state);
        assert_eq!(state.unmatched, group(&[(2, MATCHED)]));
        assert_eq!(state.lagging, group(&[(1, NOT_MATCHED)]));
        assert!(state.separated.is_empty());
    }

    #[test]
    fn test_remove_duplicate_lagging_bitmask_semantics() {
        let counting = counting("a", "b");
        let core = TaskCore::new(&counting.fsm, &counting.letters, counting.re_initial);

        // Raw state 5 lags with both a NotMatched and a Separated tag:
        // the NotMatched copy is shadowed, the Separated one stays.
        let mut state = DeterminedState {
            lagging: group(&[(5, NOT_MATCHED), (5, SEPARATED)]),
            ..DeterminedState::default()
        };
        core.remove_duplicate_lagging_states(&mut state);
        assert_eq!(state.lagging, group(&[(5, SEPARATED)]));

        // Two NotMatched-only laggards never shadow each other.
        let mut state = DeterminedState {
            lagging: group(&[(5, NOT_MATCHED), (6, NOT_MATCHED)]),
            ..DeterminedState::default()
        };
        core.remove_duplicate_lagging_states(&mut state);
        assert_eq!(state.lagging.len(), 2);
    }

    #[test]
    fn test_transition_tag_reset_and_increment() {
        let counting = counting("a", "b");
        let core = TaskCore::new(&counting.fsm, &counting.letters, counting.re_initial);

        // Fresh match: increment.
        let dest = DeterminedState {
            matched: group(&[(1, MATCHED)]),
            ..DeterminedState::default()
        };
        assert_eq!(core.calculate_transition_tag_impl(&dest), INCREMENT_ACTION);

        // Nothing live, laggards not yet matched: plain reset.
        let dest = DeterminedState {
            lagging: group(&[(1, NOT_MATCHED)]),
            ..DeterminedState::default()
        };
        assert_eq!(core.calculate_transition_tag_impl(&dest), RESET_ACTION);

        // Nothing live, a progressed laggard: reset plus increment.
        let dest = DeterminedState {
            lagging: group(&[(1, MATCHED)]),
            ..DeterminedState::default()
        };
        assert_eq!(
            core.calculate_transition_tag_impl(&dest),
            RESET_ACTION | INCREMENT_ACTION
        );

        // Separator track carrying a matched tag: increment.
        let dest = DeterminedState {
            separated: group(&[(1, MATCHED)]),
            ..DeterminedState::default()
        };
        assert_eq!(core.calculate_transition_tag_impl(&dest), INCREMENT_ACTION);
    }

    #[test]
    fn test_simple_strategy_also_determinizes() {
        let counting = counting("a", "b");
        let strategy = SimpleStrategy {
            start_state: (counting.re_initial, NOT_MATCHED),
        };
        let mut task =
            CountingTask::new(&counting.fsm, &counting.letters, counting.re_initial, strategy);
        assert!(determine(&mut task, usize::MAX));
        let (output, _) = task.into_outputs();
        for state in 0..output.size() {
            for letter in counting.letters.representatives() {
                assert_eq!(output.destinations(state, letter).len(), 1);
            }
        }
    }

    #[test]
    fn test_invalid_letter_routes_to_initial() {
        let mut counting = counting("a", "b");
        assert!(counting.determine());
        let determined = counting.determined();
        let invalid: Vec<Char> = counting
            .letters()
            .classes()
            .iter()
            .filter(|class| invalid_char_range(class.chars()))
            .map(|class| class.representative())
            .collect();
        assert!(!invalid.is_empty(), "the padding char forms an invalid class");
        for state in 0..determined.size() {
            for &letter in &invalid {
                assert_eq!(
                    determined.only_destination(state, letter),
                    determined.initial()
                );
            }
        }
    }
}
