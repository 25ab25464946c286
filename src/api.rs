// api.rs - Pattern handle and the matching API.
//
// Wraps the bridge primitives (arena, typed calls, decoder) with
// Rust-native types: Regex, RegexBuilder, Match, Captures, FindIter.
// Every operation reserves one arena sized for the whole call and releases
// it before returning; match results cross the boundary as offsets only.

use std::fmt;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use memchr::memchr;
use smallvec::SmallVec;

use crate::abi;
use crate::arena::Arena;
use crate::decode;
use crate::engine::{Engine, GuestPtr, GuestSlice, NULL_PTR};
use crate::error::CompileError;

bitflags::bitflags! {
    /// Compile-time options, forwarded to the engine as integer flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Options: u32 {
        /// Restrict patterns to POSIX egrep syntax.
        const POSIX = 1 << 0;
        /// Prefer the leftmost-longest match.
        const LONGEST = 1 << 1;
        /// Case-insensitive matching.
        const CASE_INSENSITIVE = 1 << 2;
        /// Treat pattern and input as arbitrary bytes rather than UTF-8.
        const LATIN1 = 1 << 3;
    }
}

/// Offset buffer for one match: one (start, end) pair per group, `-1`
/// marking a group that did not participate.
type Offsets = SmallVec<[isize; 8]>;

/// A compiled regular expression, matched by an engine running outside the
/// host call stack.
///
/// # Examples
///
/// ```
/// use ferrule::Regex;
///
/// let re = Regex::new(r"\d+").unwrap();
/// assert!(re.is_match("hello 42"));
///
/// let m = re.find("hello 42").unwrap();
/// assert_eq!(m.as_str(), "42");
/// assert_eq!(m.start(), 6);
/// ```
pub struct Regex {
    ptr: GuestPtr,
    opts: Options,
    expr: String,
    /// Capture groups plus one for the whole match.
    num_matches: usize,
    group_names: OnceLock<Vec<String>>,
    engine: &'static Engine,
    released: AtomicBool,
}

impl Regex {
    /// Compile a pattern with default options.
    pub fn new(expr: &str) -> Result<Regex, CompileError> {
        Regex::with_options(expr, Options::empty())
    }

    /// Compile a pattern with explicit options.
    pub fn with_options(expr: &str, opts: Options) -> Result<Regex, CompileError> {
        let engine = Engine::global();
        let mut arena = engine.start_operation(expr.len() + 2);
        let cs = arena.write_str(expr);

        let ptr = abi::new_re(engine, cs, opts);
        let (code, arg) = abi::re_error(engine, ptr);
        if code != 0 {
            abi::delete_re(engine, ptr);
            return Err(CompileError::from_code(code, arg));
        }

        // The engine reports declared groups only; group 0 is ours.
        let num_groups = abi::num_capturing_groups(engine, ptr);
        Ok(Regex {
            ptr,
            opts,
            expr: expr.to_owned(),
            num_matches: num_groups as usize + 1,
            group_names: OnceLock::new(),
            engine,
            released: AtomicBool::new(false),
        })
    }

    /// Create a [`RegexBuilder`] for fine-grained control over compilation.
    pub fn builder(expr: &str) -> RegexBuilder {
        RegexBuilder::new(expr)
    }

    /// Check whether `text` matches the pattern anywhere. The cheapest
    /// operation: no result slots are requested, so nothing is decoded.
    pub fn is_match(&self, text: &str) -> bool {
        self.is_match_bytes(text.as_bytes())
    }

    /// Check whether `text` (as bytes) matches the pattern anywhere.
    pub fn is_match_bytes(&self, text: &[u8]) -> bool {
        let mut arena = self.engine.start_operation(text.len());
        let cs = arena.write(text);
        abi::match_from(self.engine, self.ptr, cs, 0, NULL_PTR, 0)
    }

    /// Return the leftmost match in `text`, or `None`.
    pub fn find<'t>(&self, text: &'t str) -> Option<Match<'t>> {
        self.find_bytes(text.as_bytes())
    }

    /// Return the leftmost match in `text` (as bytes), or `None`.
    pub fn find_bytes<'t>(&self, text: &'t [u8]) -> Option<Match<'t>> {
        let mut arena = self.engine.start_operation(text.len() + 8);
        let cs = arena.write(text);
        let match_arr = arena.array(1);
        if !abi::match_from(self.engine, self.ptr, cs, 0, match_arr, 1) {
            return None;
        }
        let (start, end) = decode::read_match(self.engine, cs, match_arr);
        Some(Match {
            text,
            start: start as usize,
            end: end as usize,
        })
    }

    /// Iterate over all successive non-overlapping matches.
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> FindIter<'r, 't> {
        self.find_iter_bytes(text.as_bytes())
    }

    /// Iterate over all successive non-overlapping matches (as bytes).
    pub fn find_iter_bytes<'r, 't>(&'r self, text: &'t [u8]) -> FindIter<'r, 't> {
        let mut arena = self.engine.start_operation(text.len() + 16);
        let cs = arena.write(text);
        let match_arr = arena.array(1);
        FindIter {
            re: self,
            text,
            _arena: arena,
            cs,
            match_arr,
            pos: 0,
            prev_match_end: -1,
        }
    }

    /// Return the leftmost match with all capture groups, or `None`.
    pub fn captures<'t>(&'t self, text: &'t str) -> Option<Captures<'t>> {
        self.captures_bytes(text.as_bytes())
    }

    /// Return the leftmost match with all capture groups (bytes), or `None`.
    pub fn captures_bytes<'t>(&'t self, text: &'t [u8]) -> Option<Captures<'t>> {
        let mut arena = self
            .engine
            .start_operation(text.len() + 8 * self.num_matches);
        let cs = arena.write(text);
        let match_arr = arena.array(self.num_matches);
        if !abi::match_from(
            self.engine,
            self.ptr,
            cs,
            0,
            match_arr,
            self.num_matches as u32,
        ) {
            return None;
        }
        let mut offsets = Offsets::new();
        decode::read_matches(self.engine, cs, match_arr, self.num_matches, |_, s, e| {
            offsets.push(s);
            offsets.push(e);
            true
        });
        Some(Captures {
            text,
            offsets,
            re: self,
        })
    }

    /// Iterate over the capture groups of every successive match.
    pub fn captures_iter<'t>(&'t self, text: &'t str) -> CapturesIter<'t> {
        self.captures_iter_bytes(text.as_bytes())
    }

    /// Iterate over the capture groups of every successive match (bytes).
    pub fn captures_iter_bytes<'t>(&'t self, text: &'t [u8]) -> CapturesIter<'t> {
        CapturesIter {
            inner: self.submatches(text, self.num_matches),
        }
    }

    fn submatches<'r, 't>(&'r self, text: &'t [u8], nmatch: usize) -> Submatches<'r, 't> {
        let mut arena = self
            .engine
            .start_operation(text.len() + 8 * nmatch + 8);
        let cs = arena.write(text);
        let match_arr = arena.array(nmatch);
        Submatches {
            re: self,
            text,
            _arena: arena,
            cs,
            match_arr,
            nmatch,
            pos: 0,
            prev_match_end: -1,
        }
    }

    /// Return a copy of `text` with every match replaced by `rewrite`,
    /// expanding `$name`/`${name}` references as [`Captures::expand`] does.
    pub fn replace_all(&self, text: &str, rewrite: &str) -> String {
        // Without references only the whole-match span is needed, so skip
        // decoding the remaining groups.
        let nmatch = if memchr(b'$', rewrite.as_bytes()).is_some() {
            self.num_matches
        } else {
            2
        };
        let buf = self.replace_all_inner(text.as_bytes(), nmatch, |dst, m| {
            self.expand_into(dst, rewrite.as_bytes(), text.as_bytes(), m);
        });
        into_string(buf)
    }

    /// Like [`Regex::replace_all`], over bytes.
    pub fn replace_all_bytes(&self, text: &[u8], rewrite: &[u8]) -> Vec<u8> {
        let nmatch = if memchr(b'$', rewrite).is_some() {
            self.num_matches
        } else {
            2
        };
        self.replace_all_inner(text, nmatch, |dst, m| {
            self.expand_into(dst, rewrite, text, m);
        })
    }

    /// Replace every match with `rewrite` verbatim, without expansion.
    pub fn replace_all_literal(&self, text: &str, rewrite: &str) -> String {
        into_string(self.replace_all_literal_bytes(text.as_bytes(), rewrite.as_bytes()))
    }

    /// Like [`Regex::replace_all_literal`], over bytes.
    pub fn replace_all_literal_bytes(&self, text: &[u8], rewrite: &[u8]) -> Vec<u8> {
        self.replace_all_inner(text, 2, |dst, _| dst.extend_from_slice(rewrite))
    }

    /// Replace every match with the return value of `repl` applied to the
    /// matched text, substituted directly without expansion.
    pub fn replace_all_func(&self, text: &str, mut repl: impl FnMut(&str) -> String) -> String {
        let bytes = self.replace_all_inner(text.as_bytes(), 2, |dst, m| {
            let matched = &text[m[0] as usize..m[1] as usize];
            dst.extend_from_slice(repl(matched).as_bytes());
        });
        into_string(bytes)
    }

    /// Like [`Regex::replace_all_func`], over bytes.
    pub fn replace_all_func_bytes(
        &self,
        text: &[u8],
        mut repl: impl FnMut(&[u8]) -> Vec<u8>,
    ) -> Vec<u8> {
        self.replace_all_inner(text, 2, |dst, m| {
            let matched = &text[m[0] as usize..m[1] as usize];
            dst.extend_from_slice(&repl(matched));
        })
    }

    fn replace_all_inner(
        &self,
        text: &[u8],
        nmatch: usize,
        mut repl: impl FnMut(&mut Vec<u8>, &[isize]),
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(text.len());
        let mut last_match_end: isize = 0;
        for m in self.submatches(text, nmatch) {
            // Copy the unmatched span before this match.
            buf.extend_from_slice(&text[last_match_end as usize..m[0] as usize]);
            // A zero-length match is substituted only when it is the very
            // first match or extends past the previous one.
            if m[1] > last_match_end || m[0] == 0 {
                repl(&mut buf, &m);
            }
            last_match_end = m[1];
        }
        buf.extend_from_slice(&text[last_match_end as usize..]);
        buf
    }

    /// Slice `text` into the substrings between matches.
    ///
    /// `n > 0` caps the number of substrings, the last holding the
    /// unsplit remainder; `n == 0` yields nothing; `n < 0` yields all.
    pub fn split<'t>(&self, text: &'t str, n: isize) -> Vec<&'t str> {
        if n == 0 {
            return Vec::new();
        }
        if !self.expr.is_empty() && text.is_empty() {
            return vec![""];
        }

        let matches = self.find_all_index(text.as_bytes(), n);
        let mut out = Vec::with_capacity(matches.len());
        let mut beg = 0;
        let mut end = 0;
        for (match_start, match_end) in matches {
            if n > 0 && out.len() >= (n - 1) as usize {
                break;
            }
            end = match_start;
            if match_end != 0 {
                out.push(&text[beg..end]);
            }
            beg = match_end;
        }
        if end != text.len() {
            out.push(&text[beg..]);
        }
        out
    }

    fn find_all_index(&self, text: &[u8], n: isize) -> Vec<(usize, usize)> {
        let limit = if n < 0 { usize::MAX } else { n as usize };
        let mut out = Vec::new();
        if limit == 0 {
            return out;
        }
        for m in self.find_iter_bytes(text) {
            out.push((m.start(), m.end()));
            if out.len() == limit {
                break;
            }
        }
        out
    }

    /// Make future searches prefer the leftmost-longest match.
    ///
    /// The engine treats longest-match as immutable, so this deletes the
    /// compiled pattern and recompiles with the flag set. Exclusive access
    /// (`&mut self`) makes the in-place engine-reference swap safe to the
    /// compiler, not just by documentation.
    pub fn longest(&mut self) {
        if self.opts.contains(Options::LONGEST) {
            return;
        }
        abi::delete_re(self.engine, self.ptr);

        let mut arena = self.engine.start_operation(self.expr.len() + 2);
        let cs = arena.write_str(&self.expr);
        self.opts |= Options::LONGEST;
        self.ptr = abi::new_re(self.engine, cs, self.opts);
    }

    /// The number of parenthesized subexpressions in the pattern.
    pub fn num_subexp(&self) -> usize {
        self.num_matches - 1
    }

    /// Names of the capturing groups, indexed like match slots. Index 0 is
    /// always the empty string; unnamed groups get empty strings too.
    /// Built once from the engine's name iterator and cached.
    pub fn subexp_names(&self) -> &[String] {
        self.group_names.get_or_init(|| {
            let mut names = vec![String::new(); self.num_matches];
            let iter = abi::named_groups_iter_new(self.engine, self.ptr);
            while let Some((name, index)) = abi::named_groups_iter_next(self.engine, iter) {
                if index < names.len() {
                    names[index] = name;
                }
            }
            abi::named_groups_iter_delete(self.engine, iter);
            names
        })
    }

    /// Index of the leftmost subexpression with the given name, if any.
    pub fn subexp_index(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.subexp_names().iter().position(|n| n == name)
    }

    /// The source text the pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// Release the compiled pattern. Idempotent: the first call wins, any
    /// later call (including the one from `Drop`) is a no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        abi::delete_re(self.engine, self.ptr);
    }

    /// Expand `template` into `dst`, drawing `$name` references from the
    /// match offsets `m` over `src`.
    fn expand_into(&self, dst: &mut Vec<u8>, mut template: &[u8], src: &[u8], m: &[isize]) {
        while let Some(dollar) = memchr(b'$', template) {
            dst.extend_from_slice(&template[..dollar]);
            template = &template[dollar + 1..];
            if template.first() == Some(&b'$') {
                // $$ is a literal dollar.
                dst.push(b'$');
                template = &template[1..];
                continue;
            }
            let Some((name, num, rest)) = extract(template) else {
                // Malformed reference: treat $ as raw text.
                dst.push(b'$');
                continue;
            };
            template = rest;
            if num >= 0 {
                let num = num as usize;
                if 2 * num + 1 < m.len() && m[2 * num] >= 0 {
                    dst.extend_from_slice(&src[m[2 * num] as usize..m[2 * num + 1] as usize]);
                }
            } else {
                for (i, group_name) in self.subexp_names().iter().enumerate() {
                    if group_name == name && 2 * i + 1 < m.len() && m[2 * i] >= 0 {
                        dst.extend_from_slice(&src[m[2 * i] as usize..m[2 * i + 1] as usize]);
                        break;
                    }
                }
            }
        }
        dst.extend_from_slice(template);
    }
}

impl Clone for Regex {
    /// An independent handle compiled from the same source; calling
    /// [`Regex::longest`] on one does not affect the other.
    fn clone(&self) -> Regex {
        Regex::with_options(&self.expr, self.opts)
            .expect("recompiling a previously valid expression")
    }
}

impl Drop for Regex {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regex").field("expr", &self.expr).finish()
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

// === RegexBuilder ===

/// Builder for compiling a [`Regex`] with custom options.
///
/// # Examples
///
/// ```
/// use ferrule::Regex;
///
/// let re = Regex::builder(r"hello world")
///     .case_insensitive(true)
///     .build()
///     .unwrap();
/// assert!(re.is_match("Hello World"));
/// ```
pub struct RegexBuilder {
    expr: String,
    opts: Options,
}

impl RegexBuilder {
    pub fn new(expr: &str) -> RegexBuilder {
        RegexBuilder {
            expr: expr.to_owned(),
            opts: Options::empty(),
        }
    }

    /// Restrict the pattern to POSIX egrep syntax.
    pub fn posix(mut self, yes: bool) -> Self {
        self.opts.set(Options::POSIX, yes);
        self
    }

    /// Prefer the leftmost-longest match.
    pub fn longest(mut self, yes: bool) -> Self {
        self.opts.set(Options::LONGEST, yes);
        self
    }

    /// Enable or disable case-insensitive matching.
    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.opts.set(Options::CASE_INSENSITIVE, yes);
        self
    }

    /// Treat the pattern and input as arbitrary bytes rather than UTF-8.
    pub fn latin1(mut self, yes: bool) -> Self {
        self.opts.set(Options::LATIN1, yes);
        self
    }

    /// Compile the pattern into a [`Regex`].
    pub fn build(self) -> Result<Regex, CompileError> {
        Regex::with_options(&self.expr, self.opts)
    }
}

// === Match ===

/// A single match, referencing the searched text.
#[derive(Debug, Clone, Copy)]
pub struct Match<'t> {
    text: &'t [u8],
    start: usize,
    end: usize,
}

impl<'t> Match<'t> {
    /// Byte offset of the start of the match.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Byte offset of the end of the match (exclusive).
    pub fn end(&self) -> usize {
        self.end
    }

    /// Byte range of the match.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// The matched text as a byte slice.
    pub fn as_bytes(&self) -> &'t [u8] {
        &self.text[self.start..self.end]
    }

    /// The matched text as a `&str`.
    ///
    /// # Panics
    ///
    /// Panics if the matched bytes are not valid UTF-8.
    pub fn as_str(&self) -> &'t str {
        str::from_utf8(self.as_bytes()).expect("match is not valid UTF-8")
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

// === Captures ===

/// All capture groups of a single match. Group 0 is the whole match.
pub struct Captures<'t> {
    text: &'t [u8],
    offsets: Offsets,
    re: &'t Regex,
}

impl<'t> Captures<'t> {
    /// Get capture group `i`, or `None` if it did not participate.
    pub fn get(&self, i: usize) -> Option<Match<'t>> {
        if 2 * i + 1 >= self.offsets.len() || self.offsets[2 * i] < 0 {
            return None;
        }
        Some(Match {
            text: self.text,
            start: self.offsets[2 * i] as usize,
            end: self.offsets[2 * i + 1] as usize,
        })
    }

    /// Get the first participating capture group with the given name.
    pub fn name(&self, name: &str) -> Option<Match<'t>> {
        if name.is_empty() {
            return None;
        }
        for (i, group_name) in self.re.subexp_names().iter().enumerate() {
            if group_name == name {
                if let Some(m) = self.get(i) {
                    return Some(m);
                }
            }
        }
        None
    }

    /// Number of capture groups, including group 0.
    pub fn len(&self) -> usize {
        self.offsets.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate over all capture groups.
    pub fn iter(&self) -> CapturesGroupIter<'_, 't> {
        CapturesGroupIter {
            captures: self,
            index: 0,
        }
    }

    /// Append `template` to `dst`, substituting `$name`, `${name}` and
    /// numeric references with the corresponding captured text. `$$` is a
    /// literal dollar; a reference to an unmatched or unknown group
    /// expands to nothing. In the `$name` form the name is taken to be as
    /// long as possible: `$1x` means `${1x}`, not `${1}x`.
    pub fn expand(&self, template: &str, dst: &mut String) {
        let mut buf = Vec::new();
        self.re
            .expand_into(&mut buf, template.as_bytes(), self.text, &self.offsets);
        dst.push_str(&into_string(buf));
    }

    /// Like [`Captures::expand`], over bytes.
    pub fn expand_bytes(&self, template: &[u8], dst: &mut Vec<u8>) {
        self.re
            .expand_into(dst, template, self.text, &self.offsets);
    }
}

impl fmt::Debug for Captures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for i in 0..self.len() {
            list.entry(&self.get(i).map(|m| m.range()));
        }
        list.finish()
    }
}

/// Iterator over the groups of a [`Captures`].
pub struct CapturesGroupIter<'c, 't> {
    captures: &'c Captures<'t>,
    index: usize,
}

impl<'c, 't> Iterator for CapturesGroupIter<'c, 't> {
    type Item = Option<Match<'t>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.captures.len() {
            return None;
        }
        let m = self.captures.get(self.index);
        self.index += 1;
        Some(m)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.captures.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CapturesGroupIter<'_, '_> {}

// === FindIter ===

/// Iterator over all successive non-overlapping matches.
///
/// The search position advances at least one character past each match; an
/// empty match starting exactly where the previous match ended is
/// suppressed, so two adjacent empty matches never share a position.
pub struct FindIter<'r, 't> {
    re: &'r Regex,
    text: &'t [u8],
    _arena: Arena<'static>,
    cs: GuestSlice,
    match_arr: GuestPtr,
    pos: usize,
    prev_match_end: isize,
}

impl<'t> Iterator for FindIter<'_, 't> {
    type Item = Match<'t>;

    fn next(&mut self) -> Option<Match<'t>> {
        loop {
            if self.pos > self.text.len() {
                return None;
            }
            if !abi::match_from(
                self.re.engine,
                self.re.ptr,
                self.cs,
                self.pos,
                self.match_arr,
                1,
            ) {
                self.pos = self.text.len() + 1;
                return None;
            }
            let (start, end) = decode::read_match(self.re.engine, self.cs, self.match_arr);
            let accept = !(start == end && start == self.prev_match_end);
            self.pos = next_pos(self.text, self.pos, end as usize);
            self.prev_match_end = end;
            if accept {
                return Some(Match {
                    text: self.text,
                    start: start as usize,
                    end: end as usize,
                });
            }
        }
    }
}

// === Submatches / CapturesIter ===

/// Internal all-matches iteration with full group decoding. The decode
/// visitor stops after group 0 when the match turns out to be a suppressed
/// empty match, before paying for the remaining groups.
struct Submatches<'r, 't> {
    re: &'r Regex,
    text: &'t [u8],
    _arena: Arena<'static>,
    cs: GuestSlice,
    match_arr: GuestPtr,
    nmatch: usize,
    pos: usize,
    prev_match_end: isize,
}

impl Iterator for Submatches<'_, '_> {
    type Item = Offsets;

    fn next(&mut self) -> Option<Offsets> {
        loop {
            if self.pos > self.text.len() {
                return None;
            }
            if !abi::match_from(
                self.re.engine,
                self.re.ptr,
                self.cs,
                self.pos,
                self.match_arr,
                self.nmatch as u32,
            ) {
                self.pos = self.text.len() + 1;
                return None;
            }

            let pos = self.pos;
            let prev_match_end = self.prev_match_end;
            let text = self.text;
            let mut offsets = Offsets::new();
            let mut accept = true;
            let mut new_pos = pos;
            let mut new_prev = prev_match_end;
            decode::read_matches(
                self.re.engine,
                self.cs,
                self.match_arr,
                self.nmatch,
                |i, s, e| {
                    if i == 0 {
                        if s == e && s == prev_match_end {
                            accept = false;
                        }
                        new_pos = next_pos(text, pos, e as usize);
                        new_prev = e;
                    }
                    if accept {
                        offsets.push(s);
                        offsets.push(e);
                        true
                    } else {
                        false
                    }
                },
            );
            self.pos = new_pos;
            self.prev_match_end = new_prev;
            if accept {
                return Some(offsets);
            }
        }
    }
}

/// Iterator over the [`Captures`] of all successive matches.
pub struct CapturesIter<'t> {
    inner: Submatches<'t, 't>,
}

impl<'t> Iterator for CapturesIter<'t> {
    type Item = Captures<'t>;

    fn next(&mut self) -> Option<Captures<'t>> {
        let offsets = self.inner.next()?;
        Some(Captures {
            text: self.inner.text,
            offsets,
            re: self.inner.re,
        })
    }
}

// === Helpers ===

fn into_string(buf: Vec<u8>) -> String {
    String::from_utf8(buf).expect("result is not valid UTF-8")
}

/// Advance past a match, always by at least one character.
fn next_pos(text: &[u8], pos: usize, match_end: usize) -> usize {
    let width = if pos < text.len() {
        char_width(text[pos])
    } else {
        0
    };
    if pos + width > match_end {
        pos + width
    } else if pos + 1 > match_end {
        // Only reachable at the end of input, where the width is zero.
        pos + 1
    } else {
        match_end
    }
}

fn char_width(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 1,
    }
}

/// Parse a leading `name` or `{name}` reference (the `$` has already been
/// consumed). A purely numeric name yields `num >= 0`; otherwise `num` is
/// -1 and the textual name applies. Returns `None` when malformed.
fn extract(template: &[u8]) -> Option<(&str, isize, &[u8])> {
    if template.is_empty() {
        return None;
    }
    let mut rest = template;
    let brace = rest[0] == b'{';
    if brace {
        rest = &rest[1..];
    }

    let mut i = 0;
    while i < rest.len() {
        let (ch, width) = decode_char(&rest[i..]);
        if !ch.is_alphanumeric() && ch != '_' {
            break;
        }
        i += width;
    }
    if i == 0 {
        // Empty name is not okay.
        return None;
    }
    let name = str::from_utf8(&rest[..i]).ok()?;
    if brace && (i >= rest.len() || rest[i] != b'}') {
        // Missing closing brace.
        return None;
    }

    let mut num: isize = 0;
    for &b in name.as_bytes() {
        if !b.is_ascii_digit() || num >= 100_000_000 {
            num = -1;
            break;
        }
        num = num * 10 + (b - b'0') as isize;
    }
    // Disallow leading zeros.
    if name.as_bytes()[0] == b'0' && name.len() > 1 {
        num = -1;
    }

    let rest_out = if brace { &rest[i + 1..] } else { &rest[i..] };
    Some((name, num, rest_out))
}

fn decode_char(b: &[u8]) -> (char, usize) {
    let take = b.len().min(4);
    match str::from_utf8(&b[..take]) {
        Ok(s) => {
            let c = s.chars().next().expect("slice checked non-empty");
            (c, c.len_utf8())
        }
        Err(err) if err.valid_up_to() > 0 => {
            let c = str::from_utf8(&b[..err.valid_up_to()])
                .expect("validated prefix")
                .chars()
                .next()
                .expect("non-empty prefix");
            (c, c.len_utf8())
        }
        Err(_) => ('\u{fffd}', 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_find() {
        let re = Regex::new(r"\d+").unwrap();
        let m = re.find("hello 42 world").unwrap();
        assert_eq!(m.as_str(), "42");
        assert_eq!(m.start(), 6);
        assert_eq!(m.end(), 8);
        assert_eq!(m.range(), 6..8);
        assert_eq!(m.len(), 2);
        assert!(!m.is_empty());
    }

    #[test]
    fn no_match() {
        let re = Regex::new(r"\d+").unwrap();
        assert!(re.find("no digits here").is_none());
    }

    #[test]
    fn is_match_agrees_with_find_iter() {
        let re = Regex::new(r"[aeiou]").unwrap();
        for text in ["say hello", "zzz", "", "a"] {
            assert_eq!(re.is_match(text), re.find_iter(text).count() > 0);
        }
    }

    #[test]
    fn captures_groups_and_len() {
        let re = Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap();
        let caps = re.captures("date: 2026-02-14").unwrap();
        assert_eq!(caps.get(0).unwrap().as_str(), "2026-02-14");
        assert_eq!(caps.get(1).unwrap().as_str(), "2026");
        assert_eq!(caps.get(2).unwrap().as_str(), "02");
        assert_eq!(caps.get(3).unwrap().as_str(), "14");
        assert!(caps.get(4).is_none());
        assert_eq!(caps.len(), re.num_subexp() + 1);
    }

    #[test]
    fn nonparticipating_group_is_none() {
        let re = Regex::new(r"(a)(b)?").unwrap();
        let caps = re.captures("a").unwrap();
        let items: Vec<_> = caps.iter().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_some());
        assert!(items[1].is_some());
        assert!(items[2].is_none());
    }

    #[test]
    fn find_iter_all_matches() {
        let re = Regex::new(r"\d+").unwrap();
        let matches: Vec<&str> = re.find_iter("1 + 22 = 333").map(|m| m.as_str()).collect();
        assert_eq!(matches, vec!["1", "22", "333"]);
    }

    #[test]
    fn empty_match_iteration() {
        let re = Regex::new("").unwrap();
        let matches: Vec<_> = re.find_iter("ab").collect();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].start(), 0);
        assert_eq!(matches[1].start(), 1);
        assert_eq!(matches[2].start(), 2);
    }

    #[test]
    fn empty_match_after_match_is_suppressed() {
        let re = Regex::new("a*").unwrap();
        let spans: Vec<_> = re.find_iter("b").map(|m| m.range()).collect();
        assert_eq!(spans, vec![0..0]);

        let spans: Vec<_> = re.find_iter("ab").map(|m| m.range()).collect();
        // "a" at 0..1, then nothing at 1..1 (same position as the previous
        // match end), then the empty match at 2..2.
        assert_eq!(spans, vec![0..1, 2..2]);
    }

    #[test]
    fn find_iter_advances_over_multibyte_chars() {
        let re = Regex::new("x*").unwrap();
        let text = "déjà";
        for m in re.find_iter(text) {
            assert!(text.is_char_boundary(m.start()));
            assert!(text.is_char_boundary(m.end()));
        }
    }

    #[test]
    fn captures_iter_collects_groups() {
        let re = Regex::new(r"(\w)(\d)").unwrap();
        let all: Vec<Vec<String>> = re
            .captures_iter("a1 b2 c3")
            .map(|c| (0..c.len()).map(|i| c.get(i).unwrap().as_str().to_string()).collect())
            .collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], vec!["a1", "a", "1"]);
        assert_eq!(all[2], vec!["c3", "c", "3"]);
    }

    #[test]
    fn builder_case_insensitive() {
        let re = Regex::builder("hello").case_insensitive(true).build().unwrap();
        assert!(re.is_match("HELLO"));
        assert!(re.is_match("Hello"));
    }

    #[test]
    fn builder_latin1_matches_raw_bytes() {
        let re = Regex::builder(r"a.c").latin1(true).build().unwrap();
        assert!(re.is_match_bytes(&[b'a', 0xff, b'c']));
    }

    #[test]
    fn invalid_pattern_reports_missing_paren() {
        let err = Regex::new("(unclosed").unwrap_err();
        assert!(matches!(err, CompileError::MissingParen(_)));
        assert!(err.to_string().starts_with("error parsing regexp:"));
    }

    #[test]
    fn named_captures_by_name() {
        let re = Regex::new(r"(?P<year>\d{4})-(?P<month>\d{2})").unwrap();
        let caps = re.captures("2026-02").unwrap();
        assert_eq!(caps.name("year").unwrap().as_str(), "2026");
        assert_eq!(caps.name("month").unwrap().as_str(), "02");
        assert!(caps.name("day").is_none());
    }

    #[test]
    fn subexp_names_and_index() {
        let re = Regex::new(r"(?P<first>\w+) (\w+) (?P<last>\w+)").unwrap();
        assert_eq!(re.subexp_names(), &["", "first", "", "last"]);
        assert_eq!(re.subexp_index("first"), Some(1));
        assert_eq!(re.subexp_index("last"), Some(3));
        assert_eq!(re.subexp_index("middle"), None);
        assert_eq!(re.subexp_index(""), None);
    }

    #[test]
    fn duplicate_names_resolve_leftmost() {
        let re = Regex::new(r"(?P<bob>a+)(?P<bob>b+)").unwrap();
        assert_eq!(re.subexp_index("bob"), Some(1));
        assert_eq!(re.replace_all("ab", "${bob}"), "a");
    }

    #[test]
    fn replace_all_with_references() {
        let re = Regex::new(r"(\w+)@(\w+)").unwrap();
        assert_eq!(re.replace_all("mail bob@example now", "$2/$1"), "mail example/bob now");
    }

    #[test]
    fn replace_all_literal_ignores_references() {
        let re = Regex::new(r"\d+").unwrap();
        assert_eq!(re.replace_all_literal("a1b22", "$0"), "a$0b$0");
    }

    #[test]
    fn replace_all_empty_matches() {
        let re = Regex::new("a*").unwrap();
        assert_eq!(re.replace_all("bc", "-"), "-b-c-");
    }

    #[test]
    fn replace_all_func_receives_matched_text() {
        let re = Regex::new(r"[a-z]+").unwrap();
        let out = re.replace_all_func("ab CD ef", |m| m.to_uppercase());
        assert_eq!(out, "AB CD EF");
    }

    #[test]
    fn replace_all_bytes_round_trip() {
        let re = Regex::new(r"\d").unwrap();
        assert_eq!(re.replace_all_bytes(b"a1b2", b"<$0>"), b"a<1>b<2>");
    }

    #[test]
    fn expand_dollar_zero_is_the_match() {
        let re = Regex::new(r"\w+").unwrap();
        for text in ["hello world", "one", "a b c"] {
            let caps = re.captures(text).unwrap();
            let mut out = String::new();
            caps.expand("$0", &mut out);
            assert_eq!(out, caps.get(0).unwrap().as_str());
        }
    }

    #[test]
    fn expand_braced_and_malformed_references() {
        let re = Regex::new(r"(?P<x>\d+)").unwrap();
        let caps = re.captures("n=42;").unwrap();

        let mut out = String::new();
        caps.expand("${x}!", &mut out);
        assert_eq!(out, "42!");

        // $$ is a literal dollar, a dangling $ stays raw, an unknown name
        // expands to nothing.
        let mut out = String::new();
        caps.expand("$$ $ ${nope}", &mut out);
        assert_eq!(out, "$ $ ");
    }

    #[test]
    fn expand_name_is_greedy() {
        // $1x parses as ${1x}, which does not exist, so nothing is
        // substituted.
        let re = Regex::new(r"(\d)").unwrap();
        let caps = re.captures("7").unwrap();
        let mut out = String::new();
        caps.expand("$1x", &mut out);
        assert_eq!(out, "");
    }

    #[test]
    fn split_on_literal() {
        let re = Regex::new("a").unwrap();
        assert_eq!(re.split("banana", -1), vec!["b", "n", "n", ""]);
    }

    #[test]
    fn split_with_limit() {
        let re = Regex::new("a*").unwrap();
        assert_eq!(
            re.split("abaabaccadaaae", 5),
            vec!["", "b", "b", "c", "cadaaae"]
        );
    }

    #[test]
    fn split_zero_yields_nothing() {
        let re = Regex::new(",").unwrap();
        assert!(re.split("a,b", 0).is_empty());
    }

    #[test]
    fn split_empty_input() {
        let re = Regex::new("x").unwrap();
        assert_eq!(re.split("", -1), vec![""]);
    }

    #[test]
    fn longest_recompiles_in_place() {
        let mut re = Regex::new("a+").unwrap();
        re.longest();
        assert!(re.is_match("aaa"));
        // Already in longest mode: a second call is a no-op.
        re.longest();
        assert!(re.is_match("aaa"));
    }

    #[test]
    fn clone_is_independent() {
        let re = Regex::new(r"ab+").unwrap();
        let mut copy = re.clone();
        copy.longest();
        assert!(re.is_match("abb"));
        assert!(copy.is_match("abb"));
        assert_eq!(re.as_str(), copy.as_str());
    }

    #[test]
    fn release_twice_is_a_noop() {
        let re = Regex::new("abc").unwrap();
        re.release();
        re.release();
    }

    #[test]
    fn display_is_the_source_expression() {
        let re = Regex::new(r"\d+").unwrap();
        assert_eq!(re.to_string(), r"\d+");
        assert_eq!(re.as_str(), r"\d+");
    }

    #[test]
    fn next_pos_always_advances() {
        assert_eq!(next_pos(b"abc", 0, 0), 1);
        assert_eq!(next_pos(b"abc", 0, 2), 2);
        assert_eq!(next_pos(b"abc", 3, 3), 4);
        // Two-byte character.
        assert_eq!(next_pos("é".as_bytes(), 0, 0), 2);
    }

    #[test]
    fn extract_parses_names_and_numbers() {
        let (name, num, rest) = extract(b"1x)").unwrap();
        assert_eq!((name, num), ("1x", -1));
        assert_eq!(rest, b")");

        let (name, num, rest) = extract(b"10 tail").unwrap();
        assert_eq!((name, num), ("10", 10));
        assert_eq!(rest, b" tail");

        let (name, num, _) = extract(b"{name}x").unwrap();
        assert_eq!((name, num), ("name", -1));

        // Leading zero disables the numeric interpretation.
        let (_, num, _) = extract(b"01").unwrap();
        assert_eq!(num, -1);

        assert!(extract(b"").is_none());
        assert!(extract(b"{unclosed").is_none());
        assert!(extract(b"!").is_none());
    }
}
