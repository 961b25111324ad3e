//! Lowers a parsed pattern to a pair of WASM functions.
//!
//! `$regex_N_exec(base, len, start, groups) -> end | -1` attempts a match at
//! exactly `start`, recording each group's (start, end) i32 pair into the
//! caller's buffer; `$regex_N` is the buffer-less wrapper over a scratch
//! allocation. Scanning for the leftmost match belongs to the callers (the
//! `rt_re_*` drivers), not to these functions.
//!
//! Backtracking is the redirectable fail label: every node emits code that
//! branches to `self.fail` when it cannot match. Alternation and repetition
//! rebind the label to a local block, restore the saved position when control
//! lands there, and try the next branch or end the loop. Greedy repetition
//! therefore max-munches with per-iteration position restore; a lazy
//! quantifier matches its minimum and leaves expansion to outer context.

use super::parser::{min_len, Anchor, ClassItem, Pattern, RegexAst};
use crate::error::CResult;

pub struct CompiledRegex {
    /// WAT text of both functions.
    pub wat: String,
}

pub fn compile(id: u32, pattern: &Pattern) -> CResult<CompiledRegex> {
    let mut c = Compiler {
        out: String::new(),
        fail: "$re_fail".to_string(),
        locals: Vec::new(),
        next_label: 0,
        ci: pattern.case_insensitive(),
        dot_all: pattern.dot_all(),
        char_tmp: None,
        backref_tmps: None,
    };
    c.node(&pattern.ast);

    let slots = pattern.groups + 1;
    let mut wat = String::new();

    // The exec variant carries the body; group 0 brackets the whole match.
    wat.push_str(&format!(
        "(func $regex_{id}_exec (param $base i32) (param $len i32) (param $start i32) (param $groups i32) (result i32) (local $pos i32)"
    ));
    for l in &c.locals {
        wat.push_str(&format!(" (local {l} i32)"));
    }
    wat.push(' ');
    let mut init = String::new();
    for g in 0..slots {
        init.push_str(&format!(
            "(i32.store offset={} (local.get $groups) (i32.const -1))",
            g * 8
        ));
        init.push_str(&format!(
            "(i32.store offset={} (local.get $groups) (i32.const -1))",
            g * 8 + 4
        ));
    }
    wat.push_str(&init);
    wat.push_str("(local.set $pos (local.get $start))");
    wat.push_str("(block $re_fail ");
    wat.push_str(&c.out);
    wat.push_str("(i32.store (local.get $groups) (local.get $start))");
    wat.push_str("(i32.store offset=4 (local.get $groups) (local.get $pos))");
    wat.push_str("(return (local.get $pos)))");
    wat.push_str("(i32.const -1))");

    // Match-only wrapper: same semantics over a scratch group buffer (the
    // body still records groups, because backreferences read them).
    wat.push_str(&format!(
        "(func $regex_{id} (param $base i32) (param $len i32) (param $start i32) (result i32) \
           (call $regex_{id}_exec (local.get $base) (local.get $len) (local.get $start) (call $rt_bump (i32.const {}))))",
        slots * 8
    ));

    Ok(CompiledRegex { wat })
}

struct Compiler {
    out: String,
    /// The label a failed sub-match branches to; rebound by alternation,
    /// repetition, and negative lookaround.
    fail: String,
    locals: Vec<String>,
    next_label: u32,
    ci: bool,
    dot_all: bool,
    char_tmp: Option<String>,
    backref_tmps: Option<(String, String, String)>,
}

impl Compiler {
    fn emit(&mut self, s: impl AsRef<str>) {
        self.out.push_str(s.as_ref());
    }

    fn fresh_label(&mut self, hint: &str) -> String {
        self.next_label += 1;
        format!("$re_{hint}{}", self.next_label)
    }

    fn fresh_local(&mut self, hint: &str) -> String {
        let name = format!("${hint}{}", self.locals.len());
        self.locals.push(name.clone());
        name
    }

    fn char_tmp(&mut self) -> String {
        if self.char_tmp.is_none() {
            let l = self.fresh_local("c");
            self.char_tmp = Some(l);
        }
        self.char_tmp.clone().unwrap()
    }

    /// The code unit at an arbitrary position expression.
    fn char_at(&self, pos_expr: &str) -> String {
        let raw = format!("(i32.load16_u (i32.add (local.get $base) (i32.shl {pos_expr} (i32.const 1))))");
        if self.ci {
            format!("(call $rt_re_ci_fold {raw})")
        } else {
            raw
        }
    }

    fn cur_char(&self) -> String {
        self.char_at("(local.get $pos)")
    }

    fn fold(&self, c: char) -> u32 {
        if self.ci && c.is_ascii_uppercase() {
            c as u32 + 32
        } else {
            c as u32
        }
    }

    fn bounds_check(&mut self) {
        let fail = self.fail.clone();
        self.emit(format!("(br_if {fail} (i32.ge_s (local.get $pos) (local.get $len)))"));
    }

    fn advance(&mut self) {
        self.emit("(local.set $pos (i32.add (local.get $pos) (i32.const 1)))");
    }

    fn node(&mut self, ast: &RegexAst) {
        match ast {
            RegexAst::Empty => {}
            RegexAst::Char(c) => {
                self.bounds_check();
                let fail = self.fail.clone();
                let cur = self.cur_char();
                self.emit(format!("(br_if {fail} (i32.ne {cur} (i32.const {})))", self.fold(*c)));
                self.advance();
            }
            RegexAst::Dot => {
                self.bounds_check();
                if !self.dot_all {
                    let fail = self.fail.clone();
                    let cur = self.cur_char();
                    self.emit(format!("(br_if {fail} (i32.eq {cur} (i32.const 10)))"));
                }
                self.advance();
            }
            RegexAst::Predef(p) => {
                self.bounds_check();
                let fail = self.fail.clone();
                let cur = self.cur_char();
                let test = predef_test(&cur, *p);
                self.emit(format!("(br_if {fail} (i32.eqz {test}))"));
                self.advance();
            }
            RegexAst::Class { negated, items } => {
                self.bounds_check();
                let tmp = self.char_tmp();
                let cur = self.cur_char();
                self.emit(format!("(local.set {tmp} {cur})"));
                let test = self.class_test(&format!("(local.get {tmp})"), items);
                let fail = self.fail.clone();
                if *negated {
                    self.emit(format!("(br_if {fail} {test})"));
                } else {
                    self.emit(format!("(br_if {fail} (i32.eqz {test}))"));
                }
                self.advance();
            }
            RegexAst::Anchor(a) => self.anchor(*a),
            RegexAst::Seq(items) => {
                for item in items {
                    self.node(item);
                }
            }
            RegexAst::Alt(branches) => self.alternation(branches),
            RegexAst::Repeat { inner, min, max, greedy } => self.repeat(inner, *min, *max, *greedy),
            RegexAst::Group { inner, index } => {
                if let Some(g) = index {
                    self.emit(format!(
                        "(i32.store offset={} (local.get $groups) (local.get $pos))",
                        g * 8
                    ));
                    self.node(inner);
                    self.emit(format!(
                        "(i32.store offset={} (local.get $groups) (local.get $pos))",
                        g * 8 + 4
                    ));
                } else {
                    self.node(inner);
                }
            }
            RegexAst::Look { inner, behind, negative } => self.look(inner, *behind, *negative),
            RegexAst::BackRef(g) => self.backref(*g),
        }
    }

    fn class_test(&self, c: &str, items: &[ClassItem]) -> String {
        if items.is_empty() {
            return "(i32.const 0)".to_string();
        }
        let mut test = String::new();
        for item in items {
            let t = match item {
                ClassItem::Ch(ch) => format!("(i32.eq {c} (i32.const {}))", self.fold(*ch)),
                ClassItem::Range(lo, hi) => {
                    let plain = format!(
                        "(i32.and (i32.ge_u {c} (i32.const {})) (i32.le_u {c} (i32.const {})))",
                        *lo as u32, *hi as u32
                    );
                    if self.ci && lo.is_ascii_uppercase() && hi.is_ascii_uppercase() {
                        // The current char arrives folded to lowercase; an
                        // uppercase range must be tested in folded space too.
                        format!(
                            "(i32.or {plain} (i32.and (i32.ge_u {c} (i32.const {})) (i32.le_u {c} (i32.const {}))))",
                            *lo as u32 + 32,
                            *hi as u32 + 32
                        )
                    } else {
                        plain
                    }
                }
                ClassItem::Predef(p) => predef_test(c, *p),
            };
            test = if test.is_empty() { t } else { format!("(i32.or {test} {t})") };
        }
        test
    }

    fn anchor(&mut self, a: Anchor) {
        let fail = self.fail.clone();
        match a {
            Anchor::Start => self.emit(format!("(br_if {fail} (i32.ne (local.get $pos) (i32.const 0)))")),
            Anchor::End => self.emit(format!("(br_if {fail} (i32.ne (local.get $pos) (local.get $len)))")),
            Anchor::WordBoundary | Anchor::NotWordBoundary => {
                let prev = format!(
                    "(if (result i32) (i32.gt_s (local.get $pos) (i32.const 0)) \
                       (then (call $rt_re_is_word {})) (else (i32.const 0)))",
                    self.char_at("(i32.sub (local.get $pos) (i32.const 1))")
                );
                let cur = format!(
                    "(if (result i32) (i32.lt_s (local.get $pos) (local.get $len)) \
                       (then (call $rt_re_is_word {})) (else (i32.const 0)))",
                    self.cur_char()
                );
                let cmp = if a == Anchor::WordBoundary { "i32.eq" } else { "i32.ne" };
                self.emit(format!("(br_if {fail} ({cmp} {prev} {cur}))"));
            }
        }
    }

    fn alternation(&mut self, branches: &[RegexAst]) {
        let save = self.fresh_local("s");
        let alt_done = self.fresh_label("alt_done");
        self.emit(format!("(local.set {save} (local.get $pos))"));
        self.emit(format!("(block {alt_done} "));
        for (i, branch) in branches.iter().enumerate() {
            if i + 1 == branches.len() {
                // Last branch fails to whatever the alternation's caller
                // designated.
                self.node(branch);
                self.emit(format!("(br {alt_done})"));
            } else {
                let try_next = self.fresh_label("alt_next");
                self.emit(format!("(block {try_next} "));
                let saved_fail = std::mem::replace(&mut self.fail, try_next.clone());
                self.node(branch);
                self.fail = saved_fail;
                self.emit(format!("(br {alt_done}))"));
                self.emit(format!("(local.set $pos (local.get {save}))"));
            }
        }
        self.emit(")");
    }

    fn repeat(&mut self, inner: &RegexAst, min: u32, max: Option<u32>, greedy: bool) {
        for _ in 0..min {
            self.node(inner);
        }
        if max == Some(min) {
            return;
        }
        if !greedy {
            // Lazy: the minimum is the match; outer context decides the rest.
            return;
        }
        let save = self.fresh_local("s");
        let rep = self.fresh_label("rep");
        let iter_fail = self.fresh_label("rep_fail");
        let counted = max.map(|m| m - min);
        let cnt = counted.map(|_| self.fresh_local("n"));
        if let Some(c) = &cnt {
            self.emit(format!("(local.set {c} (i32.const 0))"));
        }
        self.emit(format!("(loop {rep} "));
        self.emit(format!("(local.set {save} (local.get $pos))"));
        self.emit(format!("(block {iter_fail} "));
        if let (Some(c), Some(limit)) = (&cnt, counted) {
            self.emit(format!(
                "(br_if {iter_fail} (i32.ge_s (local.get {c}) (i32.const {limit})))"
            ));
        }
        let saved_fail = std::mem::replace(&mut self.fail, iter_fail.clone());
        self.node(inner);
        self.fail = saved_fail;
        // A repetition that consumed nothing would loop forever.
        self.emit(format!("(br_if {iter_fail} (i32.eq (local.get $pos) (local.get {save})))"));
        if let Some(c) = &cnt {
            self.emit(format!("(local.set {c} (i32.add (local.get {c}) (i32.const 1)))"));
        }
        self.emit(format!("(br {rep}))"));
        self.emit(format!("(local.set $pos (local.get {save})))"));
    }

    fn look(&mut self, inner: &RegexAst, behind: bool, negative: bool) {
        let save = self.fresh_local("s");
        self.emit(format!("(local.set {save} (local.get $pos))"));
        match (behind, negative) {
            (false, false) => {
                self.node(inner);
                self.emit(format!("(local.set $pos (local.get {save}))"));
            }
            (false, true) => {
                let unmatched = self.fresh_label("nla");
                let fail = self.fail.clone();
                self.emit(format!("(block {unmatched} "));
                let saved_fail = std::mem::replace(&mut self.fail, unmatched.clone());
                self.node(inner);
                self.fail = saved_fail;
                self.emit(format!("(local.set $pos (local.get {save}))"));
                self.emit(format!("(br {fail}))"));
                self.emit(format!("(local.set $pos (local.get {save}))"));
            }
            (true, false) => {
                // Fixed-distance lookbehind: back up by the inner pattern's
                // minimum length and require the match to land exactly here.
                let dist = min_len(inner);
                let fail = self.fail.clone();
                self.emit(format!(
                    "(br_if {fail} (i32.lt_s (local.get $pos) (i32.const {dist})))"
                ));
                self.emit(format!(
                    "(local.set $pos (i32.sub (local.get $pos) (i32.const {dist})))"
                ));
                self.node(inner);
                self.emit(format!("(br_if {fail} (i32.ne (local.get $pos) (local.get {save})))"));
                self.emit(format!("(local.set $pos (local.get {save}))"));
            }
            (true, true) => {
                let dist = min_len(inner);
                let unmatched = self.fresh_label("nlb");
                let fail = self.fail.clone();
                self.emit(format!("(block {unmatched} "));
                self.emit(format!(
                    "(br_if {unmatched} (i32.lt_s (local.get $pos) (i32.const {dist})))"
                ));
                self.emit(format!(
                    "(local.set $pos (i32.sub (local.get $pos) (i32.const {dist})))"
                ));
                let saved_fail = std::mem::replace(&mut self.fail, unmatched.clone());
                self.node(inner);
                self.fail = saved_fail;
                self.emit(format!(
                    "(br_if {unmatched} (i32.ne (local.get $pos) (local.get {save})))"
                ));
                self.emit(format!("(local.set $pos (local.get {save}))"));
                self.emit(format!("(br {fail}))"));
                self.emit(format!("(local.set $pos (local.get {save}))"));
            }
        }
    }

    fn backref(&mut self, g: u32) {
        if self.backref_tmps.is_none() {
            let bs = self.fresh_local("bs");
            let be = self.fresh_local("be");
            let bi = self.fresh_local("bi");
            self.backref_tmps = Some((bs, be, bi));
        }
        let (bs, be, bi) = self.backref_tmps.clone().unwrap();
        let fail = self.fail.clone();
        let cmp = self.fresh_label("bref");
        let cmp_done = self.fresh_label("bref_done");
        let at_hay = self.char_at(&format!("(i32.add (local.get $pos) (local.get {bi}))"));
        let at_group = self.char_at(&format!("(i32.add (local.get {bs}) (local.get {bi}))"));
        self.emit(format!(
            "(local.set {bs} (i32.load offset={} (local.get $groups)))",
            g * 8
        ));
        self.emit(format!(
            "(local.set {be} (i32.load offset={} (local.get $groups)))",
            g * 8 + 4
        ));
        // An unmatched group backreference matches the empty string.
        self.emit(format!(
            "(if (i32.ne (local.get {bs}) (i32.const -1)) (then \
               (br_if {fail} (i32.gt_s (i32.add (local.get $pos) (i32.sub (local.get {be}) (local.get {bs}))) (local.get $len))) \
               (local.set {bi} (i32.const 0)) \
               (block {cmp_done} (loop {cmp} \
                 (br_if {cmp_done} (i32.ge_s (local.get {bi}) (i32.sub (local.get {be}) (local.get {bs})))) \
                 (br_if {fail} (i32.ne {at_hay} {at_group})) \
                 (local.set {bi} (i32.add (local.get {bi}) (i32.const 1))) \
                 (br {cmp}))) \
               (local.set $pos (i32.add (local.get $pos) (i32.sub (local.get {be}) (local.get {bs}))))))"
        ));
    }
}

fn predef_test(c: &str, p: char) -> String {
    match p {
        'd' => format!("(call $rt_re_is_digit {c})"),
        'D' => format!("(i32.eqz (call $rt_re_is_digit {c}))"),
        'w' => format!("(call $rt_re_is_word {c})"),
        'W' => format!("(i32.eqz (call $rt_re_is_word {c}))"),
        's' => format!("(call $rt_re_is_space {c})"),
        'S' => format!("(i32.eqz (call $rt_re_is_space {c}))"),
        other => unreachable!("not a predefined class: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex::parser::parse;

    fn compiled(pattern: &str, flags: &str) -> String {
        compile(7, &parse(pattern, flags).unwrap()).unwrap().wat
    }

    #[test]
    fn emits_the_match_and_exec_pair() {
        let wat = compiled("abc", "");
        assert!(wat.contains("func $regex_7_exec"));
        assert!(wat.contains("func $regex_7 "));
        assert!(wat.contains("(block $re_fail"));
    }

    #[test]
    fn literal_chars_fold_under_the_i_flag() {
        let wat = compiled("A", "i");
        // 'A' folds to 'a' (97) and the input char goes through the folder.
        assert!(wat.contains("i32.const 97"));
        assert!(wat.contains("rt_re_ci_fold"));
    }

    #[test]
    fn dot_excludes_newline_unless_dotall() {
        assert!(compiled(".", "").contains("i32.const 10"));
        assert!(!compiled(".", "s").contains("(br_if $re_fail (i32.eq"));
    }

    #[test]
    fn alternation_rebinds_the_fail_label_per_branch() {
        let wat = compiled("a|b", "");
        assert!(wat.contains("$re_alt_next"));
        assert!(wat.contains("$re_alt_done"));
    }

    #[test]
    fn greedy_repetition_guards_zero_length_iterations() {
        let wat = compiled("(a?)*", "");
        // The no-progress break keeps a nullable body from spinning.
        assert!(wat.contains("(i32.eq (local.get $pos) (local.get $s"));
    }

    #[test]
    fn capturing_group_records_start_and_end() {
        let wat = compiled("(a)", "");
        assert!(wat.contains("(i32.store offset=8 (local.get $groups) (local.get $pos))"));
        assert!(wat.contains("(i32.store offset=12 (local.get $groups) (local.get $pos))"));
    }

    #[test]
    fn lookbehind_backs_up_by_the_minimum_length() {
        let wat = compiled("(?<=ab)c", "");
        assert!(wat.contains("(i32.sub (local.get $pos) (i32.const 2))"));
    }
}
