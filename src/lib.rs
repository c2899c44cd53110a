//! Counting scanners: compile a pair of regexps `(R, S)` into a DFA that,
//! driven over a byte stream, counts non-overlapping occurrences of `R`
//! delimited by matches of the *separator* `S`.
//!
//! # Architecture
//!
//! Two scanner variants are built from the same `(R, S)` input:
//!
//! ```text
//! advanced:  R, S ──tagged NFA──> multi-track determinizer ──> action-preserving
//!            (Matched/Separated     (4 tag buckets, budget      minimizer ──> table
//!             tags, Σ* prefix)       4096×|NFA|, simple         encoder
//!                                    fallback on overflow)
//!
//! basic:     R, S ──(S ∧ ¬Σ*RΣ*)·R──> main×backup square ──> determinize ──> table
//!                                      (DeadFlag/Matched        encoder
//!                                       edge outputs)
//! ```
//!
//! The advanced pipeline annotates every DFA transition with an action
//! word over `{Increment, Reset}`; the run-time sums increments and
//! folds the counter on resets.  The basic pipeline runs two copies of
//! the separator-then-regexp automaton ("main" and "backup") and counts
//! whenever the main copy dies in a matched configuration.
//!
//! ## Multi-track determinization
//!
//! The precise determinizer's DFA states are 4-tuples of tagged NFA
//! state sets — `{matched, unmatched, separated, lagging}`.  The
//! `lagging` bucket retains "historical" NFA states that can re-enter
//! play after a `Reset`; the bucket bookkeeping (splitting, duplicate
//! removal, normalization) is what decides which of `{Increment, Reset}`
//! each transition emits while preserving counting equivalence.  When
//! the precise construction exceeds its state budget, a heuristic
//! single-track variant of the same framework takes over (at most one
//! state per live bucket, deterministic tie-breaks) and the scanner
//! reports itself as *simple*.
//!
//! # Example
//!
//! ```
//! use recount::{AdvancedCountingScanner, Fsm};
//!
//! let re = Fsm::parse("[0-9]+").unwrap();
//! let sep = Fsm::parse(",").unwrap();
//! let scanner = AdvancedCountingScanner::new(&re, &sep).unwrap();
//! assert_eq!(scanner.run(b"1,2,3"), vec![3]);
//! ```

use std::fmt;

use regex_syntax::hir;

mod count;
mod determine;
mod fsm;
mod parse;
mod scanner;

pub use fsm::{
    Char, Fsm, LetterClass, LettersTbl, BEGIN_MARK, END_MARK, EPSILON, MAX_CHAR,
    MAX_CHAR_UNALIGNED,
};
pub use scanner::{AdvancedCountingScanner, CountingScanner, ScanState, MAX_RE_COUNT};

/// Re-export so users do not need a direct `regex-syntax` dependency.
pub use regex_syntax::hir::Hir;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// An error from pattern lowering or scanner compilation.
#[derive(Debug)]
pub enum Error {
    /// A Unicode character class that cannot be lowered to single bytes
    /// (i.e. contains codepoints above U+00FF).
    UnsupportedClass(hir::Class),
    /// A look-around assertion other than `^` (Start) or `$` (End) was
    /// encountered (e.g. `\b`, `\B`).
    UnsupportedLook(hir::Look),
    /// The pattern did not parse.
    Parse(Box<regex_syntax::Error>),
    /// Both the precise and the fallback determinizer exhausted their
    /// state budgets.
    TooComplicated,
    /// A glue product did not fit the requested size budget.
    ScannerTooLarge,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedClass(class) => {
                write!(f, "unsupported character class: {:?}", class)
            }
            Self::UnsupportedLook(look) => {
                write!(f, "unsupported look-around assertion: {:?}", look)
            }
            Self::Parse(err) => write!(f, "{}", err),
            Self::TooComplicated => write!(f, "regexp pattern too complicated"),
            Self::ScannerTooLarge => write!(f, "required scanner size is too large"),
        }
    }
}

impl std::error::Error for Error {}
