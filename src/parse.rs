//! `regex-syntax` front-end: lowers a parsed [`Hir`] into an [`Fsm`].
//!
//! The lowering is compositional over the automaton algebra — literals
//! become chains, classes one-symbol fans, alternations unions,
//! repetitions ε-loops (with `{min,max}` unrolled).  `^` and `$` lower
//! to the virtual [`BEGIN_MARK`]/[`END_MARK`] symbols that the scanner
//! run-time feeds around the payload.

use regex_syntax::hir::{self, Hir, HirKind};

use crate::fsm::{Char, Fsm, BEGIN_MARK, END_MARK};
use crate::Error;

/// Bounded repetitions are unrolled; anything past this is rejected
/// rather than exploding the NFA.
const MAX_REPETITION: u32 = 1000;

impl Fsm {
    /// Parse a pattern and lower it to an NFA.
    ///
    /// Patterns are byte-oriented: `(?s-u)` semantics, no Unicode
    /// classes beyond single-byte ranges, no look-around except `^`/`$`.
    pub fn parse(pattern: &str) -> Result<Fsm, Error> {
        let hir = regex_syntax::ParserBuilder::new()
            .utf8(false)
            .unicode(false)
            .dot_matches_new_line(true)
            .build()
            .parse(pattern)
            .map_err(|err| Error::Parse(Box::new(err)))?;
        Fsm::from_hir(&hir)
    }

    /// Lower an already-parsed [`Hir`].
    pub fn from_hir(hir: &Hir) -> Result<Fsm, Error> {
        match hir.kind() {
            HirKind::Empty => Ok(Fsm::new()),
            HirKind::Literal(lit) => {
                let mut fsm = Fsm::new();
                for &b in lit.0.iter() {
                    fsm.append_special(b as Char);
                }
                Ok(fsm)
            }
            HirKind::Class(hir::Class::Bytes(class)) => {
                let mut chars: Vec<Char> = Vec::new();
                for range in class.ranges() {
                    for b in range.start()..=range.end() {
                        chars.push(b as Char);
                    }
                }
                let mut fsm = Fsm::new();
                fsm.append(chars);
                Ok(fsm)
            }
            HirKind::Class(hir::Class::Unicode(class)) => {
                // regex-syntax may produce Unicode classes for ASCII-only
                // patterns.  If all ranges fit in a single byte, lower
                // them; otherwise reject.
                let ranges = class.ranges();
                let all_single_byte = ranges
                    .iter()
                    .all(|r| (r.start() as u32) <= 0xFF && (r.end() as u32) <= 0xFF);
                if !all_single_byte {
                    return Err(Error::UnsupportedClass(hir::Class::Unicode(class.clone())));
                }
                let mut chars: Vec<Char> = Vec::new();
                for range in ranges {
                    for b in (range.start() as u8)..=(range.end() as u8) {
                        chars.push(b as Char);
                    }
                }
                let mut fsm = Fsm::new();
                fsm.append(chars);
                Ok(fsm)
            }
            HirKind::Look(hir::Look::Start) => {
                let mut fsm = Fsm::new();
                fsm.append_special(BEGIN_MARK);
                Ok(fsm)
            }
            HirKind::Look(hir::Look::End) => {
                let mut fsm = Fsm::new();
                fsm.append_special(END_MARK);
                Ok(fsm)
            }
            HirKind::Look(look) => Err(Error::UnsupportedLook(*look)),
            HirKind::Capture(cap) => Fsm::from_hir(&cap.sub),
            HirKind::Concat(children) => {
                let mut fsm = Fsm::new();
                for child in children {
                    fsm.concat(&Fsm::from_hir(child)?);
                }
                Ok(fsm)
            }
            HirKind::Alternation(children) => {
                let mut alternatives = children.iter();
                let mut fsm = match alternatives.next() {
                    Some(first) => Fsm::from_hir(first)?,
                    None => Fsm::new(),
                };
                for child in alternatives {
                    fsm.union_with(&Fsm::from_hir(child)?);
                }
                Ok(fsm)
            }
            HirKind::Repetition(rep) => {
                let body = Fsm::from_hir(&rep.sub)?;
                lower_repetition(body, rep.min, rep.max)
            }
        }
    }
}

fn lower_repetition(body: Fsm, min: u32, max: Option<u32>) -> Result<Fsm, Error> {
    match (min, max) {
        (0, Some(1)) => {
            let mut fsm = body;
            fsm.union_with(&Fsm::new());
            Ok(fsm)
        }
        (0, None) => {
            let mut fsm = body;
            fsm.star();
            Ok(fsm)
        }
        (1, None) => {
            let mut fsm = body;
            fsm.plus();
            Ok(fsm)
        }
        (min, max) => {
            if min > MAX_REPETITION || max.is_some_and(|m| m > MAX_REPETITION) {
                return Err(Error::TooComplicated);
            }
            let mut fsm = Fsm::new();
            for _ in 0..min {
                fsm.concat(&body);
            }
            match max {
                None => {
                    let mut tail = body;
                    tail.star();
                    fsm.concat(&tail);
                }
                Some(max) => {
                    let mut optional = body;
                    optional.union_with(&Fsm::new());
                    for _ in min..max {
                        fsm.concat(&optional);
                    }
                }
            }
            Ok(fsm)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::real_chars;

    fn accepts(fsm: &Fsm, word: &[u8]) -> bool {
        let mut dfa = fsm.clone();
        dfa.determinize();
        dfa.unsparse();
        let mut state = dfa.initial();
        for &b in word {
            state = dfa.only_destination(state, b as Char);
        }
        dfa.is_final(state)
    }

    #[test]
    fn test_literal() {
        let fsm = Fsm::parse("abc").unwrap();
        assert!(accepts(&fsm, b"abc"));
        assert!(!accepts(&fsm, b"ab"));
        assert!(!accepts(&fsm, b"abcd"));
    }

    #[test]
    fn test_empty_pattern_accepts_empty() {
        let fsm = Fsm::parse("").unwrap();
        assert!(accepts(&fsm, b""));
        assert!(!accepts(&fsm, b"a"));
    }

    #[test]
    fn test_class_and_alternation() {
        let fsm = Fsm::parse("[0-9]|x").unwrap();
        assert!(accepts(&fsm, b"0"));
        assert!(accepts(&fsm, b"7"));
        assert!(accepts(&fsm, b"x"));
        assert!(!accepts(&fsm, b"a"));
    }

    #[test]
    fn test_quantifiers() {
        let fsm = Fsm::parse("ab*c+").unwrap();
        assert!(accepts(&fsm, b"ac"));
        assert!(accepts(&fsm, b"abbccc"));
        assert!(!accepts(&fsm, b"ab"));
        assert!(!accepts(&fsm, b"c"));
    }

    #[test]
    fn test_bounded_repetition() {
        let fsm = Fsm::parse("a{2,3}").unwrap();
        assert!(!accepts(&fsm, b"a"));
        assert!(accepts(&fsm, b"aa"));
        assert!(accepts(&fsm, b"aaa"));
        assert!(!accepts(&fsm, b"aaaa"));

        let fsm = Fsm::parse("a{2,}").unwrap();
        assert!(!accepts(&fsm, b"a"));
        assert!(accepts(&fsm, b"aaaa"));
    }

    #[test]
    fn test_anchors_lower_to_marks() {
        let fsm = Fsm::parse("^a$").unwrap();
        let mut dfa = fsm.clone();
        dfa.determinize();
        dfa.unsparse();
        let mut state = dfa.initial();
        for c in [BEGIN_MARK, b'a' as Char, END_MARK] {
            state = dfa.only_destination(state, c);
        }
        assert!(dfa.is_final(state));
    }

    #[test]
    fn test_unsupported_look() {
        assert!(matches!(
            Fsm::parse(r"a\b"),
            Err(Error::UnsupportedLook(_))
        ));
    }

    #[test]
    fn test_huge_repetition_rejected() {
        assert!(matches!(
            Fsm::parse("a{1,5000}"),
            Err(Error::TooComplicated)
        ));
    }

    #[test]
    fn test_dot_is_any_byte() {
        let fsm = Fsm::parse(".").unwrap();
        let mut dfa = fsm.clone();
        dfa.determinize();
        dfa.unsparse();
        for c in real_chars().filter(|&c| c <= 255) {
            let state = dfa.only_destination(dfa.initial(), c);
            assert!(dfa.is_final(state), "byte {c} should match `.`");
        }
    }
}
