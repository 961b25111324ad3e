//! Recursive-descent regular-expression parser.
//!
//! Produces a small AST; no lowering decisions are made here. The supported
//! surface is the pragmatic JavaScript subset: sequences, alternation,
//! greedy/lazy quantifiers (`* + ? {m} {m,} {m,n}` with `?` suffix),
//! character classes with ranges and predefined escapes, anchors, dot,
//! capturing/non-capturing groups, lookahead and lookbehind in both
//! polarities, and backreferences `\1`..`\9`.

use crate::error::{CResult, CompileError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexAst {
    Empty,
    Char(char),
    Dot,
    Seq(Vec<RegexAst>),
    Alt(Vec<RegexAst>),
    Repeat {
        inner: Box<RegexAst>,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    },
    Class {
        negated: bool,
        items: Vec<ClassItem>,
    },
    /// One of `d D w W s S`.
    Predef(char),
    Anchor(Anchor),
    Group {
        inner: Box<RegexAst>,
        /// 1-based capture index; `None` for `(?:...)`.
        index: Option<u32>,
    },
    Look {
        inner: Box<RegexAst>,
        behind: bool,
        negative: bool,
    },
    BackRef(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
    WordBoundary,
    NotWordBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassItem {
    Ch(char),
    Range(char, char),
    Predef(char),
}

/// A parsed pattern together with its flag string and capture count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub ast: RegexAst,
    pub flags: String,
    pub groups: u32,
}

impl Pattern {
    pub fn case_insensitive(&self) -> bool {
        self.flags.contains('i')
    }

    pub fn dot_all(&self) -> bool {
        self.flags.contains('s')
    }

    pub fn global(&self) -> bool {
        self.flags.contains('g')
    }
}

pub fn parse(pattern: &str, flags: &str) -> CResult<Pattern> {
    for f in flags.chars() {
        if !matches!(f, 'i' | 's' | 'g' | 'm') {
            return Err(CompileError::parse_regex(format!("unsupported flag `{f}`")));
        }
    }
    let mut p = Parser {
        chars: pattern.chars().collect(),
        pos: 0,
        groups: 0,
    };
    let ast = p.alternation()?;
    if p.pos != p.chars.len() {
        return Err(CompileError::parse_regex(format!(
            "unexpected `{}` at offset {}",
            p.chars[p.pos], p.pos
        )));
    }
    Ok(Pattern {
        ast,
        flags: flags.to_string(),
        groups: p.groups,
    })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    groups: u32,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> CResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(CompileError::parse_regex(format!(
                "expected `{c}` at offset {}",
                self.pos
            )))
        }
    }

    fn alternation(&mut self) -> CResult<RegexAst> {
        let mut branches = vec![self.sequence()?];
        while self.eat('|') {
            branches.push(self.sequence()?);
        }
        Ok(if branches.len() == 1 {
            branches.pop().unwrap()
        } else {
            RegexAst::Alt(branches)
        })
    }

    fn sequence(&mut self) -> CResult<RegexAst> {
        let mut items = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            items.push(self.quantified()?);
        }
        Ok(match items.len() {
            0 => RegexAst::Empty,
            1 => items.pop().unwrap(),
            _ => RegexAst::Seq(items),
        })
    }

    fn quantified(&mut self) -> CResult<RegexAst> {
        let atom = self.atom()?;
        let (min, max) = match self.peek() {
            Some('*') => {
                self.pos += 1;
                (0, None)
            }
            Some('+') => {
                self.pos += 1;
                (1, None)
            }
            Some('?') => {
                self.pos += 1;
                (0, Some(1))
            }
            Some('{') => match self.braces()? {
                Some(mm) => mm,
                None => return Ok(atom),
            },
            _ => return Ok(atom),
        };
        if matches!(
            atom,
            RegexAst::Anchor(_) | RegexAst::Look { .. } | RegexAst::Empty
        ) {
            return Err(CompileError::parse_regex("nothing to repeat"));
        }
        let greedy = !self.eat('?');
        Ok(RegexAst::Repeat {
            inner: Box::new(atom),
            min,
            max,
            greedy,
        })
    }

    /// `{m}`, `{m,}`, `{m,n}`. A brace that opens no valid counted repeat is
    /// a literal `{`, mirroring the lenient host-language behaviour - the
    /// caller re-parses from the brace as an atom.
    fn braces(&mut self) -> CResult<Option<(u32, Option<u32>)>> {
        let save = self.pos;
        self.pos += 1; // '{'
        let Some(min) = self.number() else {
            self.pos = save;
            return Ok(None);
        };
        if self.eat('}') {
            return Ok(Some((min, Some(min))));
        }
        if !self.eat(',') {
            self.pos = save;
            return Ok(None);
        }
        if self.eat('}') {
            return Ok(Some((min, None)));
        }
        let Some(max) = self.number() else {
            self.pos = save;
            return Ok(None);
        };
        if !self.eat('}') {
            self.pos = save;
            return Ok(None);
        }
        if max < min {
            return Err(CompileError::parse_regex(format!("invalid repeat range {{{min},{max}}}")));
        }
        Ok(Some((min, Some(max))))
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn atom(&mut self) -> CResult<RegexAst> {
        match self.bump() {
            Some('.') => Ok(RegexAst::Dot),
            Some('^') => Ok(RegexAst::Anchor(Anchor::Start)),
            Some('$') => Ok(RegexAst::Anchor(Anchor::End)),
            Some('(') => self.group(),
            Some('[') => self.class(),
            Some('\\') => self.escape(),
            Some(c @ ('*' | '+' | '?')) => {
                Err(CompileError::parse_regex(format!("dangling quantifier `{c}`")))
            }
            Some(c) => Ok(RegexAst::Char(c)),
            None => Err(CompileError::parse_regex("unexpected end of pattern")),
        }
    }

    fn group(&mut self) -> CResult<RegexAst> {
        if self.eat('?') {
            let look = match self.peek() {
                Some('=') => Some((false, false)),
                Some('!') => Some((false, true)),
                Some(':') => None,
                Some('<') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('=') => Some((true, false)),
                        Some('!') => Some((true, true)),
                        other => {
                            return Err(CompileError::parse_regex(format!(
                                "unsupported group modifier `?<{}`",
                                other.map(String::from).unwrap_or_default()
                            )))
                        }
                    }
                }
                other => {
                    return Err(CompileError::parse_regex(format!(
                        "unsupported group modifier `?{}`",
                        other.map(String::from).unwrap_or_default()
                    )))
                }
            };
            self.pos += 1;
            let inner = self.alternation()?;
            self.expect(')')?;
            return Ok(match look {
                Some((behind, negative)) => RegexAst::Look {
                    inner: Box::new(inner),
                    behind,
                    negative,
                },
                None => RegexAst::Group {
                    inner: Box::new(inner),
                    index: None,
                },
            });
        }
        self.groups += 1;
        let index = self.groups;
        let inner = self.alternation()?;
        self.expect(')')?;
        Ok(RegexAst::Group {
            inner: Box::new(inner),
            index: Some(index),
        })
    }

    fn class(&mut self) -> CResult<RegexAst> {
        let negated = self.eat('^');
        let mut items = Vec::new();
        loop {
            let c = match self.bump() {
                None => return Err(CompileError::parse_regex("unterminated character class")),
                // `[]` matches nothing; the empty class is kept as-is.
                Some(']') => break,
                Some('\\') => match self.bump() {
                    Some(p @ ('d' | 'D' | 'w' | 'W' | 's' | 'S')) => {
                        items.push(ClassItem::Predef(p));
                        continue;
                    }
                    Some(e) => class_escape(e)?,
                    None => return Err(CompileError::parse_regex("trailing backslash in class")),
                },
                Some(c) => c,
            };
            if self.peek() == Some('-') && self.chars.get(self.pos + 1).is_some_and(|&n| n != ']') {
                self.pos += 1;
                let hi = match self.bump() {
                    Some('\\') => match self.bump() {
                        Some(e) => class_escape(e)?,
                        None => return Err(CompileError::parse_regex("trailing backslash in class")),
                    },
                    Some(hi) => hi,
                    None => return Err(CompileError::parse_regex("unterminated character class")),
                };
                if hi < c {
                    return Err(CompileError::parse_regex(format!("inverted class range {c}-{hi}")));
                }
                items.push(ClassItem::Range(c, hi));
            } else {
                items.push(ClassItem::Ch(c));
            }
        }
        Ok(RegexAst::Class { negated, items })
    }

    fn escape(&mut self) -> CResult<RegexAst> {
        match self.bump() {
            Some(p @ ('d' | 'D' | 'w' | 'W' | 's' | 'S')) => Ok(RegexAst::Predef(p)),
            Some('b') => Ok(RegexAst::Anchor(Anchor::WordBoundary)),
            Some('B') => Ok(RegexAst::Anchor(Anchor::NotWordBoundary)),
            Some(d) if ('1'..='9').contains(&d) => Ok(RegexAst::BackRef(d as u32 - '0' as u32)),
            Some('n') => Ok(RegexAst::Char('\n')),
            Some('r') => Ok(RegexAst::Char('\r')),
            Some('t') => Ok(RegexAst::Char('\t')),
            Some('0') => Ok(RegexAst::Char('\0')),
            Some(c) => Ok(RegexAst::Char(c)),
            None => Err(CompileError::parse_regex("trailing backslash")),
        }
    }
}

fn class_escape(e: char) -> CResult<char> {
    Ok(match e {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        '0' => '\0',
        other => other,
    })
}

/// Minimum number of code units `ast` can consume; lookbehind compiles by
/// backing up exactly this far before attempting the inner match.
pub fn min_len(ast: &RegexAst) -> u32 {
    match ast {
        RegexAst::Empty | RegexAst::Anchor(_) | RegexAst::Look { .. } | RegexAst::BackRef(_) => 0,
        RegexAst::Char(_) | RegexAst::Dot | RegexAst::Class { .. } | RegexAst::Predef(_) => 1,
        RegexAst::Seq(items) => items.iter().map(min_len).sum(),
        RegexAst::Alt(branches) => branches.iter().map(min_len).min().unwrap_or(0),
        RegexAst::Repeat { inner, min, .. } => min_len(inner) * min,
        RegexAst::Group { inner, .. } => min_len(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternation_of_three_literals_has_no_groups() {
        let p = parse("a|b|c", "").unwrap();
        assert_eq!(p.groups, 0);
        match p.ast {
            RegexAst::Alt(branches) => assert_eq!(branches.len(), 3),
            other => panic!("expected alternation, got {other:?}"),
        }
    }

    #[test]
    fn group_count_is_monotone_left_to_right() {
        let p = parse("(a)((b)c)", "").unwrap();
        assert_eq!(p.groups, 3);
        // The outer second group is index 2, its nested group 3.
        let RegexAst::Seq(items) = p.ast else { panic!() };
        let RegexAst::Group { index: Some(1), .. } = items[0] else {
            panic!("first group should be #1")
        };
        let RegexAst::Group { index: Some(2), .. } = items[1] else {
            panic!("second group should be #2")
        };
    }

    #[test]
    fn quantifiers_parse_with_lazy_suffix() {
        let p = parse("a+?", "").unwrap();
        assert_eq!(
            p.ast,
            RegexAst::Repeat {
                inner: Box::new(RegexAst::Char('a')),
                min: 1,
                max: None,
                greedy: false
            }
        );
    }

    #[test]
    fn counted_repeats_parse_all_three_forms() {
        assert!(matches!(
            parse("a{3}", "").unwrap().ast,
            RegexAst::Repeat { min: 3, max: Some(3), .. }
        ));
        assert!(matches!(
            parse("a{2,}", "").unwrap().ast,
            RegexAst::Repeat { min: 2, max: None, .. }
        ));
        assert!(matches!(
            parse("a{2,5}", "").unwrap().ast,
            RegexAst::Repeat { min: 2, max: Some(5), .. }
        ));
    }

    #[test]
    fn a_brace_that_is_not_a_repeat_is_a_literal() {
        let p = parse("a{x}", "").unwrap();
        let RegexAst::Seq(items) = p.ast else { panic!() };
        assert_eq!(items[1], RegexAst::Char('{'));
    }

    #[test]
    fn class_ranges_and_negation() {
        let p = parse("[^a-z0]", "").unwrap();
        let RegexAst::Class { negated: true, items } = p.ast else { panic!() };
        assert_eq!(items, vec![ClassItem::Range('a', 'z'), ClassItem::Ch('0')]);
    }

    #[test]
    fn lookbehind_parses_both_polarities() {
        assert!(matches!(
            parse("(?<=a)b", "").unwrap().ast,
            RegexAst::Seq(_)
        ));
        let p = parse("(?<!x)", "").unwrap();
        assert!(matches!(
            p.ast,
            RegexAst::Look { behind: true, negative: true, .. }
        ));
    }

    #[test]
    fn unbalanced_parens_are_a_parse_error() {
        let err = parse("(ab", "").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ParseRegex);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse("a", "x").is_err());
        assert!(parse("a", "gis").is_ok());
    }

    #[test]
    fn min_len_accounts_for_nesting_and_repeats() {
        assert_eq!(min_len(&parse("abc", "").unwrap().ast), 3);
        assert_eq!(min_len(&parse("a|bc", "").unwrap().ast), 1);
        assert_eq!(min_len(&parse("(ab){2}", "").unwrap().ast), 4);
        assert_eq!(min_len(&parse("a*", "").unwrap().ast), 0);
    }
}
