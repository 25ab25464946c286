// set.rs - Multi-pattern set handle.
//
// N expressions compiled together for simultaneous containment search.
// Matches come back as indices into the expression list, not capture data,
// so decoding is plain integers rather than pointer arithmetic.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::abi;
use crate::api::Options;
use crate::engine::{Engine, GuestPtr};
use crate::error::CompileError;

// Fixed slack for engine error messages beyond the expression itself.
const ERROR_BUFFER_LEN: usize = 64;

/// A set of patterns searchable in one pass.
///
/// # Examples
///
/// ```
/// use ferrule::{Options, Set};
///
/// let set = Set::compile(&["abc", r"\d+"], Options::empty()).unwrap();
/// assert_eq!(set.find_all("abc123", -1), vec![0, 1]);
/// assert!(set.find_all("def", -1).is_empty());
/// ```
pub struct Set {
    ptr: GuestPtr,
    len: usize,
    engine: &'static Engine,
    released: AtomicBool,
}

impl Set {
    /// Compile `exprs` into a set. A parse failure in any single
    /// expression aborts compilation and surfaces that expression's error.
    pub fn compile(exprs: &[&str], opts: Options) -> Result<Set, CompileError> {
        let engine = Engine::global();
        let ptr = abi::set_new(engine, opts);

        let longest_expr = exprs.iter().map(|e| e.len()).max().unwrap_or(0);
        let estimated: usize = exprs.iter().map(|e| e.len() + 2).sum();
        let err_cap = longest_expr + ERROR_BUFFER_LEN;
        let mut arena = engine.start_operation(estimated + err_cap + 8);
        let err_buf = arena.allocate(err_cap);

        for expr in exprs {
            let cs = arena.write_str(expr);
            let err_len = expr.len() + ERROR_BUFFER_LEN;
            if abi::set_add(engine, ptr, cs, err_buf, err_len) == -1 {
                let msg = read_error(&arena, err_buf, err_len);
                abi::set_delete(engine, ptr);
                return Err(CompileError::Other(msg));
            }
        }

        // Every expression was validated on add; a finalize failure is an
        // engine defect, not bad input.
        if abi::set_compile(engine, ptr) == 0 {
            panic!("engine failed to compile validated pattern set");
        }

        Ok(Set {
            ptr,
            len: exprs.len(),
            engine,
            released: AtomicBool::new(false),
        })
    }

    /// Index of one pattern matching `text`, or `None` if none match.
    pub fn find(&self, text: &str) -> Option<usize> {
        self.find_bytes(text.as_bytes())
    }

    /// Like [`Set::find`], over bytes.
    pub fn find_bytes(&self, text: &[u8]) -> Option<usize> {
        self.find_all_bytes(text, 1).first().copied()
    }

    /// Indices of all patterns matching `text`, requesting up to `n` slots
    /// (`n < 0` requests one per pattern).
    pub fn find_all(&self, text: &str, n: isize) -> Vec<usize> {
        self.find_all_bytes(text.as_bytes(), n)
    }

    /// Like [`Set::find_all`], over bytes.
    pub fn find_all_bytes(&self, text: &[u8], n: isize) -> Vec<usize> {
        let n = if n < 0 { self.len } else { n as usize };
        let mut arena = self.engine.start_operation(text.len() + 8 + n * 8);
        let slots = arena.array(n);
        let cs = arena.write(text);

        let matched = abi::set_match(self.engine, self.ptr, cs, slots, n);
        let count = matched.min(n);
        let raw = arena.read(slots, count * 4);
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let b = &raw[4 * i..4 * i + 4];
            ids.push(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize);
        }
        ids
    }

    /// Number of patterns in the set.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release the compiled set. Idempotent, like [`crate::Regex::release`].
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        abi::set_delete(self.engine, self.ptr);
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Set {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Set").field("len", &self.len).finish()
    }
}

fn read_error(arena: &crate::arena::Arena<'_>, err_buf: GuestPtr, err_len: usize) -> String {
    let raw = arena.read(err_buf, err_len);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_report_pattern_indices() {
        let set = Set::compile(&["abc", r"\d+"], Options::empty()).unwrap();
        let mut ids = set.find_all("abc123", -1);
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn no_match_is_empty() {
        let set = Set::compile(&["abc", r"\d+"], Options::empty()).unwrap();
        assert!(set.find_all("def", -1).is_empty());
        assert!(set.find("def").is_none());
    }

    #[test]
    fn find_returns_one_index() {
        let set = Set::compile(&["x", "de"], Options::empty()).unwrap();
        assert_eq!(set.find("def"), Some(1));
    }

    #[test]
    fn slot_limit_caps_results() {
        let set = Set::compile(&["a", "b", "c"], Options::empty()).unwrap();
        assert_eq!(set.find_all("abc", 2).len(), 2);
        assert!(set.find_all("abc", 0).is_empty());
    }

    #[test]
    fn bad_expression_aborts_compilation() {
        let err = Set::compile(&["ok", "(unclosed"], Options::empty()).unwrap_err();
        assert!(matches!(err, CompileError::Other(_)));
        assert!(err.to_string().starts_with("error parsing regexp:"));
        assert!(err.to_string().contains("missing closing )"));
    }

    #[test]
    fn options_apply_to_all_patterns() {
        let set = Set::compile(&["HELLO"], Options::CASE_INSENSITIVE).unwrap();
        assert_eq!(set.find("say hello"), Some(0));
    }

    #[test]
    fn release_twice_is_a_noop() {
        let set = Set::compile(&["a"], Options::empty()).unwrap();
        set.release();
        set.release();
    }

    #[test]
    fn len_counts_patterns() {
        let set = Set::compile(&["a", "b"], Options::empty()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
    }
}
