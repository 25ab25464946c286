// native.rs - Natively-linked engine module.
//
// Hosts the linked matcher (the `regex` crate) behind a private linear
// memory so the bridge crosses a real allocator and address-space boundary:
// pattern and text bytes arrive as pointer+length pairs, match results
// leave as absolute pointers into the caller's buffer in guest memory.
// Nothing outside this module sees the linked matcher's types.

use std::collections::{BTreeMap, HashMap};
use std::str;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::bytes::{Regex as LinkedRegex, RegexBuilder, RegexSet, RegexSetBuilder};
use regex_syntax::ast;

use crate::api::Options;
use crate::engine::{EngineInstance, EngineModule, Func, GuestPtr};
use crate::error;

const PAGE_SIZE: u32 = 64 * 1024;
const MAX_MEMORY: u32 = 1 << 30;
// Same program-size cap the wrapped engine family uses.
const MAX_PROGRAM_SIZE: usize = 128 << 20;

// === Linear memory + allocator ===

/// The module's linear memory plus a first-fit free-range allocator with
/// coalescing. Offset 0 stays reserved so a returned address can never be
/// confused with the null marker.
struct Heap {
    mem: Vec<u8>,
    free: BTreeMap<u32, u32>,
    allocated: HashMap<u32, u32>,
}

impl Heap {
    fn new() -> Heap {
        let mut free = BTreeMap::new();
        free.insert(8, PAGE_SIZE - 8);
        Heap {
            mem: vec![0; PAGE_SIZE as usize],
            free,
            allocated: HashMap::new(),
        }
    }

    fn malloc(&mut self, size: u32) -> GuestPtr {
        let size = size.max(1).div_ceil(8) * 8;
        loop {
            let found = self
                .free
                .iter()
                .find(|(_, &len)| len >= size)
                .map(|(&off, &len)| (off, len));
            if let Some((off, len)) = found {
                self.free.remove(&off);
                if len > size {
                    self.free.insert(off + size, len - size);
                }
                self.allocated.insert(off, size);
                return off;
            }
            self.grow(size);
        }
    }

    fn free(&mut self, ptr: GuestPtr) {
        let size = self
            .allocated
            .remove(&ptr)
            .unwrap_or_else(|| panic!("free of unallocated guest pointer {:#x}", ptr));
        self.insert_free(ptr, size);
    }

    /// Grow committed memory by doubling, rounded up to whole pages.
    fn grow(&mut self, need: u32) {
        let old = self.mem.len() as u32;
        let wanted = (old * 2).max(old + need);
        let new = wanted.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        if new > MAX_MEMORY {
            panic!("guest memory limit exceeded");
        }
        self.mem.resize(new as usize, 0);
        self.insert_free(old, new - old);
    }

    fn insert_free(&mut self, mut off: u32, mut size: u32) {
        if let Some((&prev_off, &prev_size)) = self.free.range(..off).next_back() {
            if prev_off + prev_size == off {
                self.free.remove(&prev_off);
                off = prev_off;
                size += prev_size;
            }
        }
        if let Some(&next_size) = self.free.get(&(off + size)) {
            self.free.remove(&(off + size));
            size += next_size;
        }
        self.free.insert(off, size);
    }

    fn read(&self, ptr: GuestPtr, len: usize) -> Vec<u8> {
        self.check_bounds(ptr, len);
        self.mem[ptr as usize..ptr as usize + len].to_vec()
    }

    fn write(&mut self, ptr: GuestPtr, data: &[u8]) {
        self.check_bounds(ptr, data.len());
        self.mem[ptr as usize..ptr as usize + data.len()].copy_from_slice(data);
    }

    fn read_u32(&self, ptr: GuestPtr) -> u32 {
        let b = self.read(ptr, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn write_u32(&mut self, ptr: GuestPtr, value: u32) {
        self.write(ptr, &value.to_le_bytes());
    }

    fn check_bounds(&self, ptr: GuestPtr, len: usize) {
        if ptr as usize + len > self.mem.len() {
            panic!(
                "out of bounds guest memory access at {:#x}+{}",
                ptr, len
            );
        }
    }

    /// Allocate and write a NUL-terminated string.
    fn new_c_string(&mut self, s: &str) -> GuestPtr {
        let ptr = self.malloc(s.len() as u32 + 1);
        self.write(ptr, s.as_bytes());
        self.write(ptr + s.len() as u32, &[0]);
        ptr
    }
}

// === Engine objects ===

struct Pattern {
    re: Option<LinkedRegex>,
    error_code: i32,
    /// NUL-terminated offending fragment, 0 when compilation succeeded.
    error_arg: GuestPtr,
    /// Named capture groups in pattern order: (guest C string, group index).
    names: Vec<(GuestPtr, u32)>,
}

struct NamesIter {
    pattern: GuestPtr,
    pos: usize,
}

struct SetState {
    opts: Options,
    exprs: Vec<String>,
    compiled: Option<RegexSet>,
}

#[derive(Default)]
struct Objects {
    patterns: HashMap<GuestPtr, Pattern>,
    iters: HashMap<GuestPtr, NamesIter>,
    sets: HashMap<GuestPtr, SetState>,
}

pub(crate) struct NativeModule {
    state: Arc<State>,
}

struct State {
    heap: Mutex<Heap>,
    objects: Mutex<Objects>,
}

impl NativeModule {
    pub(crate) fn new() -> NativeModule {
        NativeModule {
            state: Arc::new(State {
                heap: Mutex::new(Heap::new()),
                objects: Mutex::new(Objects::default()),
            }),
        }
    }
}

impl EngineModule for NativeModule {
    fn instantiate(&self) -> Box<dyn EngineInstance> {
        Box::new(NativeInstance {
            state: Arc::clone(&self.state),
        })
    }

    fn read(&self, ptr: GuestPtr, len: usize) -> Vec<u8> {
        self.state.heap().read(ptr, len)
    }

    fn write(&self, ptr: GuestPtr, data: &[u8]) {
        self.state.heap().write(ptr, data);
    }

    fn read_u32(&self, ptr: GuestPtr) -> u32 {
        self.state.heap().read_u32(ptr)
    }

    fn write_u32(&self, ptr: GuestPtr, value: u32) {
        self.state.heap().write_u32(ptr, value);
    }
}

/// One execution context. The linked engine keeps all of its state in the
/// shared module, so an instance is a dispatch surface; exclusivity per
/// raw call is still honored by the pool.
struct NativeInstance {
    state: Arc<State>,
}

impl EngineInstance for NativeInstance {
    fn call(&mut self, func: Func, stack: &[u64]) -> u64 {
        let s = &self.state;
        match func {
            Func::Malloc => u64::from(s.heap().malloc(stack[0] as u32)),
            Func::Free => {
                s.heap().free(stack[0] as GuestPtr);
                0
            }
            Func::New => u64::from(s.new_pattern(
                stack[0] as GuestPtr,
                stack[1] as usize,
                stack[2] as u32,
            )),
            Func::Delete => {
                s.delete_pattern(stack[0] as GuestPtr);
                0
            }
            Func::Match => s.match_pattern(stack),
            Func::ErrorCode => {
                s.with_pattern(stack[0] as GuestPtr, |p| p.error_code as u64)
            }
            Func::ErrorArg => {
                s.with_pattern(stack[0] as GuestPtr, |p| u64::from(p.error_arg))
            }
            Func::NumCapturingGroups => s.with_pattern(stack[0] as GuestPtr, |p| {
                p.re.as_ref().map_or(0, |re| re.captures_len() as u64 - 1)
            }),
            Func::NamedGroupsIterNew => u64::from(s.names_iter_new(stack[0] as GuestPtr)),
            Func::NamedGroupsIterNext => s.names_iter_next(
                stack[0] as GuestPtr,
                stack[1] as GuestPtr,
                stack[2] as GuestPtr,
            ),
            Func::NamedGroupsIterDelete => {
                s.names_iter_delete(stack[0] as GuestPtr);
                0
            }
            Func::SetNew => u64::from(s.set_new(stack[0] as u32)),
            Func::SetAdd => s.set_add(
                stack[0] as GuestPtr,
                stack[1] as GuestPtr,
                stack[2] as usize,
                stack[3] as GuestPtr,
                stack[4] as usize,
            ),
            Func::SetCompile => s.set_compile(stack[0] as GuestPtr),
            Func::SetMatch => s.set_match(
                stack[0] as GuestPtr,
                stack[1] as GuestPtr,
                stack[2] as usize,
                stack[3] as GuestPtr,
                stack[4] as usize,
            ),
            Func::SetDelete => {
                s.set_delete(stack[0] as GuestPtr);
                0
            }
            Func::GlobalReplace => s.global_replace(
                stack[0] as GuestPtr,
                stack[1] as GuestPtr,
                stack[2] as GuestPtr,
            ),
            Func::FindAndConsume => s.find_and_consume(
                stack[0] as GuestPtr,
                stack[1] as GuestPtr,
                stack[2] as GuestPtr,
                stack[3] as u32,
            ),
        }
    }
}

impl State {
    fn heap(&self) -> MutexGuard<'_, Heap> {
        self.heap.lock().expect("engine heap poisoned")
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().expect("engine object table poisoned")
    }

    fn with_pattern<R>(&self, handle: GuestPtr, f: impl FnOnce(&Pattern) -> R) -> R {
        let objects = self.objects();
        let pattern = objects
            .patterns
            .get(&handle)
            .unwrap_or_else(|| panic!("unknown pattern handle {:#x}", handle));
        f(pattern)
    }

    /// Clone the compiled matcher out so no engine lock is held while a
    /// search runs.
    fn matcher(&self, handle: GuestPtr) -> LinkedRegex {
        self.with_pattern(handle, |p| {
            p.re.clone()
                .unwrap_or_else(|| panic!("match on failed pattern handle {:#x}", handle))
        })
    }

    fn new_pattern(&self, ptr: GuestPtr, len: usize, opts_bits: u32) -> GuestPtr {
        let raw = self.heap().read(ptr, len);
        let opts = Options::from_bits_truncate(opts_bits);
        let handle = self.heap().malloc(16);

        let entry = match compile_pattern(&raw, opts) {
            Ok((re, names)) => {
                let mut heap = self.heap();
                let names = names
                    .into_iter()
                    .map(|(name, index)| (heap.new_c_string(&name), index))
                    .collect();
                Pattern {
                    re: Some(re),
                    error_code: 0,
                    error_arg: 0,
                    names,
                }
            }
            Err((code, fragment)) => Pattern {
                re: None,
                error_code: code,
                error_arg: self.heap().new_c_string(&fragment),
                names: Vec::new(),
            },
        };
        self.objects().patterns.insert(handle, entry);
        handle
    }

    fn delete_pattern(&self, handle: GuestPtr) {
        let pattern = self
            .objects()
            .patterns
            .remove(&handle)
            .unwrap_or_else(|| panic!("delete of unknown pattern handle {:#x}", handle));
        let mut heap = self.heap();
        if pattern.error_arg != 0 {
            heap.free(pattern.error_arg);
        }
        for (name_ptr, _) in pattern.names {
            heap.free(name_ptr);
        }
        heap.free(handle);
    }

    fn match_pattern(&self, stack: &[u64]) -> u64 {
        let handle = stack[0] as GuestPtr;
        let text_ptr = stack[1] as GuestPtr;
        let text_len = stack[2] as usize;
        let start = stack[3] as usize;
        let end = (stack[4] as usize).min(text_len);
        // stack[5] is the anchor mode; the bridge always passes unanchored.
        let match_arr = stack[6] as GuestPtr;
        let nmatch = stack[7] as usize;

        let text = self.heap().read(text_ptr, text_len);
        let haystack = &text[..end];
        if start > haystack.len() {
            return 0;
        }
        let re = self.matcher(handle);

        if nmatch == 0 {
            return u64::from(re.find_at(haystack, start).is_some());
        }

        let mut locs = re.capture_locations();
        if re.captures_read_at(&mut locs, haystack, start).is_none() {
            return 0;
        }

        let mut heap = self.heap();
        for i in 0..nmatch {
            let slot = match_arr + (8 * i) as u32;
            match locs.get(i) {
                Some((s, e)) => {
                    heap.write_u32(slot, text_ptr + s as u32);
                    heap.write_u32(slot + 4, (e - s) as u32);
                }
                None => {
                    heap.write_u32(slot, 0);
                    heap.write_u32(slot + 4, 0);
                }
            }
        }
        1
    }

    fn names_iter_new(&self, pattern: GuestPtr) -> GuestPtr {
        let handle = self.heap().malloc(8);
        self.objects()
            .iters
            .insert(handle, NamesIter { pattern, pos: 0 });
        handle
    }

    fn names_iter_next(&self, iter: GuestPtr, name_out: GuestPtr, index_out: GuestPtr) -> u64 {
        let (name_ptr, index, next_pos) = {
            let objects = self.objects();
            let state = objects
                .iters
                .get(&iter)
                .unwrap_or_else(|| panic!("unknown names iterator {:#x}", iter));
            let pattern = objects
                .patterns
                .get(&state.pattern)
                .unwrap_or_else(|| panic!("names iterator over unknown pattern"));
            match pattern.names.get(state.pos) {
                Some(&(name_ptr, index)) => (name_ptr, index, state.pos + 1),
                None => return 0,
            }
        };
        {
            let mut heap = self.heap();
            heap.write_u32(name_out, name_ptr);
            heap.write_u32(index_out, index);
        }
        self.objects()
            .iters
            .get_mut(&iter)
            .expect("iterator vanished")
            .pos = next_pos;
        1
    }

    fn names_iter_delete(&self, iter: GuestPtr) {
        self.objects()
            .iters
            .remove(&iter)
            .unwrap_or_else(|| panic!("delete of unknown names iterator {:#x}", iter));
        self.heap().free(iter);
    }

    fn set_new(&self, opts_bits: u32) -> GuestPtr {
        let handle = self.heap().malloc(8);
        self.objects().sets.insert(
            handle,
            SetState {
                opts: Options::from_bits_truncate(opts_bits),
                exprs: Vec::new(),
                compiled: None,
            },
        );
        handle
    }

    fn set_add(
        &self,
        set: GuestPtr,
        ptr: GuestPtr,
        len: usize,
        err_buf: GuestPtr,
        err_len: usize,
    ) -> u64 {
        let raw = self.heap().read(ptr, len);
        let opts = self
            .objects()
            .sets
            .get(&set)
            .unwrap_or_else(|| panic!("unknown set handle {:#x}", set))
            .opts;

        match compile_pattern(&raw, opts) {
            Ok(_) => {
                let expr = String::from_utf8_lossy(&raw).into_owned();
                let mut objects = self.objects();
                let state = objects.sets.get_mut(&set).expect("set vanished");
                state.exprs.push(expr);
                (state.exprs.len() - 1) as u64
            }
            Err((code, fragment)) => {
                // Write `<description>: <fragment>`; the bridge adds the
                // `error parsing regexp:` prefix when it surfaces this.
                let formatted = error::CompileError::from_code(code, fragment).to_string();
                let message = formatted
                    .strip_prefix("error parsing regexp: ")
                    .unwrap_or(&formatted);
                let mut bytes = message.as_bytes().to_vec();
                bytes.truncate(err_len.saturating_sub(1));
                bytes.push(0);
                self.heap().write(err_buf, &bytes);
                (-1i32) as u32 as u64
            }
        }
    }

    fn set_compile(&self, set: GuestPtr) -> u64 {
        let (exprs, opts) = {
            let objects = self.objects();
            let state = objects
                .sets
                .get(&set)
                .unwrap_or_else(|| panic!("unknown set handle {:#x}", set));
            (state.exprs.clone(), state.opts)
        };
        let stripped: Vec<String> = exprs
            .iter()
            .map(|e| {
                strip_group_names(e)
                    .map(|(cleaned, _)| cleaned)
                    .unwrap_or_else(|_| e.clone())
            })
            .collect();
        let built = RegexSetBuilder::new(&stripped)
            .case_insensitive(opts.contains(Options::CASE_INSENSITIVE))
            .unicode(!opts.contains(Options::LATIN1))
            .size_limit(MAX_PROGRAM_SIZE)
            .build();
        match built {
            Ok(compiled) => {
                self.objects()
                    .sets
                    .get_mut(&set)
                    .expect("set vanished")
                    .compiled = Some(compiled);
                1
            }
            Err(_) => 0,
        }
    }

    fn set_match(
        &self,
        set: GuestPtr,
        text_ptr: GuestPtr,
        text_len: usize,
        out: GuestPtr,
        n: usize,
    ) -> u64 {
        let text = self.heap().read(text_ptr, text_len);
        let compiled = {
            let objects = self.objects();
            let state = objects
                .sets
                .get(&set)
                .unwrap_or_else(|| panic!("unknown set handle {:#x}", set));
            state
                .compiled
                .clone()
                .unwrap_or_else(|| panic!("set matched before set_compile"))
        };
        let ids: Vec<usize> = compiled.matches(&text).iter().collect();
        let count = ids.len().min(n);
        let mut heap = self.heap();
        for (i, &id) in ids[..count].iter().enumerate() {
            heap.write_u32(out + (4 * i) as u32, id as u32);
        }
        count as u64
    }

    fn set_delete(&self, set: GuestPtr) {
        self.objects()
            .sets
            .remove(&set)
            .unwrap_or_else(|| panic!("delete of unknown set handle {:#x}", set));
        self.heap().free(set);
    }

    fn global_replace(
        &self,
        handle: GuestPtr,
        text_and_target: GuestPtr,
        rewrite_ptr: GuestPtr,
    ) -> u64 {
        let (text, rewrite) = {
            let heap = self.heap();
            let tp = heap.read_u32(text_and_target);
            let tl = heap.read_u32(text_and_target + 4) as usize;
            let rp = heap.read_u32(rewrite_ptr);
            let rl = heap.read_u32(rewrite_ptr + 4) as usize;
            (heap.read(tp, tl), heap.read(rp, rl))
        };
        let re = self.matcher(handle);

        let mut out = Vec::with_capacity(text.len());
        let mut last = 0;
        let mut count = 0u64;
        for caps in re.captures_iter(&text) {
            let m = caps.get(0).expect("group 0 always participates");
            out.extend_from_slice(&text[last..m.start()]);
            apply_rewrite(&mut out, &rewrite, &caps);
            last = m.end();
            count += 1;
        }
        if count == 0 {
            return 0;
        }
        out.extend_from_slice(&text[last..]);

        let mut heap = self.heap();
        let result = heap.malloc(out.len().max(1) as u32);
        heap.write(result, &out);
        heap.write_u32(text_and_target, result);
        heap.write_u32(text_and_target + 4, out.len() as u32);
        count
    }

    fn find_and_consume(
        &self,
        handle: GuestPtr,
        text_pair: GuestPtr,
        match_arr: GuestPtr,
        nmatch: u32,
    ) -> u64 {
        let (text_ptr, text) = {
            let heap = self.heap();
            let tp = heap.read_u32(text_pair);
            let tl = heap.read_u32(text_pair + 4) as usize;
            (tp, heap.read(tp, tl))
        };
        let re = self.matcher(handle);

        let mut locs = re.capture_locations();
        let Some(m) = re.captures_read_at(&mut locs, &text, 0) else {
            return 0;
        };

        let mut heap = self.heap();
        for i in 0..nmatch as usize {
            let slot = match_arr + (8 * i) as u32;
            match locs.get(i) {
                Some((s, e)) => {
                    heap.write_u32(slot, text_ptr + s as u32);
                    heap.write_u32(slot + 4, (e - s) as u32);
                }
                None => {
                    heap.write_u32(slot, 0);
                    heap.write_u32(slot + 4, 0);
                }
            }
        }
        heap.write_u32(text_pair, text_ptr + m.end() as u32);
        heap.write_u32(text_pair + 4, (text.len() - m.end()) as u32);
        1
    }
}

// === Pattern compilation ===

type NamedGroups = Vec<(String, u32)>;

/// Compile raw pattern bytes under the given options, classifying any
/// failure into the engine's error-code taxonomy.
fn compile_pattern(raw: &[u8], opts: Options) -> Result<(LinkedRegex, NamedGroups), (i32, String)> {
    let Ok(text) = str::from_utf8(raw) else {
        return Err((
            error::ERR_BAD_UTF8,
            String::from_utf8_lossy(raw).into_owned(),
        ));
    };

    // The linked matcher rejects duplicate group names, which the engine's
    // dialect allows. Strip names up front and keep the table ourselves.
    let (stripped, names) = strip_group_names(text)?;

    if let Err(err) = ast::parse::Parser::new().parse(&stripped) {
        return Err(classify_parse_error(&stripped, &err));
    }

    let built = RegexBuilder::new(&stripped)
        .case_insensitive(opts.contains(Options::CASE_INSENSITIVE))
        .unicode(!opts.contains(Options::LATIN1))
        .size_limit(MAX_PROGRAM_SIZE)
        .build();
    match built {
        Ok(re) => Ok((re, names)),
        Err(regex::Error::CompiledTooBig(_)) => {
            Err((error::ERR_PATTERN_TOO_LARGE, String::new()))
        }
        Err(_) => Err((error::ERR_INTERNAL, text.to_string())),
    }
}

/// Map a structured parse error onto the engine's stable code set, with
/// the offending span as the error argument.
fn classify_parse_error(pattern: &str, err: &ast::Error) -> (i32, String) {
    use ast::ErrorKind::*;

    let span = err.span();
    let mut fragment = pattern
        .get(span.start.offset..span.end.offset)
        .unwrap_or("")
        .to_string();
    if fragment.is_empty() {
        fragment = pattern.to_string();
    }

    let code = match err.kind() {
        ClassUnclosed => error::ERR_MISSING_BRACKET,
        ClassEscapeInvalid => error::ERR_BAD_CHAR_CLASS,
        ClassRangeInvalid | ClassRangeLiteral => error::ERR_BAD_CHAR_RANGE,
        GroupUnclosed => error::ERR_MISSING_PAREN,
        GroupUnopened => error::ERR_UNEXPECTED_PAREN,
        EscapeUnexpectedEof => error::ERR_TRAILING_BACKSLASH,
        EscapeUnrecognized | EscapeHexEmpty | EscapeHexInvalid | EscapeHexInvalidDigit => {
            error::ERR_BAD_ESCAPE
        }
        RepetitionMissing => {
            // `a**` trips the same parser check as a leading `*`; the
            // engine distinguishes nested repetition by what precedes it.
            let at = span.start.offset;
            if at > 0 && matches!(pattern.as_bytes()[at - 1], b'*' | b'+' | b'?' | b'}') {
                error::ERR_REPEAT_OP
            } else {
                error::ERR_REPEAT_ARGUMENT
            }
        }
        RepetitionCountInvalid | RepetitionCountDecimalEmpty | RepetitionCountUnclosed => {
            error::ERR_BAD_REPEAT_ARGUMENT
        }
        GroupNameDuplicate { .. } | GroupNameEmpty | GroupNameInvalid | GroupNameUnexpectedEof => {
            error::ERR_BAD_NAMED_CAPTURE
        }
        UnsupportedBackreference | UnsupportedLookAround | FlagUnrecognized => {
            error::ERR_BAD_PERL_OP
        }
        NestLimitExceeded(..) | CaptureLimitExceeded => error::ERR_PATTERN_TOO_LARGE,
        _ => error::ERR_INTERNAL,
    };
    (code, fragment)
}

/// Rewrite `(?P<name>...)`/`(?<name>...)` groups as plain capturing groups,
/// returning the cleaned pattern and the name table in pattern order.
/// Duplicate names are legal; name syntax is validated here.
fn strip_group_names(pattern: &str) -> Result<(String, NamedGroups), (i32, String)> {
    let b = pattern.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(b.len());
    let mut names = Vec::new();
    let mut group = 0u32;
    let mut in_class = false;
    let mut i = 0;

    while i < b.len() {
        let c = b[i];
        if c == b'\\' {
            out.push(c);
            if i + 1 < b.len() {
                out.push(b[i + 1]);
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if in_class {
            if c == b']' {
                in_class = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == b'[' {
            in_class = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == b'(' {
            let rest = &b[i..];
            let name_start = if rest.starts_with(b"(?P<") {
                i + 4
            } else if rest.starts_with(b"(?<")
                && !rest.starts_with(b"(?<=")
                && !rest.starts_with(b"(?<!")
            {
                i + 3
            } else {
                0
            };
            if name_start != 0 {
                group += 1;
                let close = b[name_start..]
                    .iter()
                    .position(|&x| x == b'>')
                    .ok_or_else(|| (error::ERR_BAD_NAMED_CAPTURE, pattern.to_string()))?;
                let name = &pattern[name_start..name_start + close];
                if name.is_empty()
                    || !name
                        .bytes()
                        .all(|x| x.is_ascii_alphanumeric() || x == b'_')
                {
                    return Err((
                        error::ERR_BAD_NAMED_CAPTURE,
                        pattern[i..name_start + close + 1].to_string(),
                    ));
                }
                names.push((name.to_string(), group));
                out.push(b'(');
                i = name_start + close + 1;
                continue;
            }
            if rest.len() < 2 || rest[1] != b'?' {
                group += 1;
            }
            out.push(c);
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }

    let cleaned = String::from_utf8(out).expect("stripping only removes ASCII");
    Ok((cleaned, names))
}

/// Expand the engine dialect's `\0`..`\9` rewrite references.
fn apply_rewrite(out: &mut Vec<u8>, rewrite: &[u8], caps: &regex::bytes::Captures<'_>) {
    let mut i = 0;
    while i < rewrite.len() {
        let c = rewrite[i];
        if c == b'\\' && i + 1 < rewrite.len() {
            let d = rewrite[i + 1];
            if d.is_ascii_digit() {
                if let Some(m) = caps.get((d - b'0') as usize) {
                    out.extend_from_slice(m.as_bytes());
                }
                i += 2;
                continue;
            }
            if d == b'\\' {
                out.push(b'\\');
                i += 2;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_reuses_freed_ranges() {
        let mut heap = Heap::new();
        let a = heap.malloc(100);
        let b = heap.malloc(100);
        heap.free(a);
        let c = heap.malloc(64);
        assert_eq!(c, a); // first fit lands in the freed hole
        heap.free(b);
        heap.free(c);
    }

    #[test]
    fn heap_coalesces_adjacent_free_ranges() {
        let mut heap = Heap::new();
        let a = heap.malloc(64);
        let b = heap.malloc(64);
        let c = heap.malloc(64);
        heap.free(a);
        heap.free(b);
        // a+b coalesced: a 128-byte request fits where the two 64s were.
        let d = heap.malloc(128);
        assert_eq!(d, a);
        heap.free(c);
        heap.free(d);
    }

    #[test]
    fn heap_grows_on_demand() {
        let mut heap = Heap::new();
        let big = heap.malloc(3 * PAGE_SIZE);
        assert!(heap.mem.len() >= 3 * PAGE_SIZE as usize);
        heap.free(big);
    }

    #[test]
    fn heap_never_returns_null() {
        let mut heap = Heap::new();
        assert_ne!(heap.malloc(0), 0);
    }

    #[test]
    #[should_panic(expected = "free of unallocated guest pointer")]
    fn double_free_panics() {
        let mut heap = Heap::new();
        let a = heap.malloc(8);
        heap.free(a);
        heap.free(a);
    }

    #[test]
    fn strip_names_keeps_group_numbering() {
        let (cleaned, names) = strip_group_names(r"(a)(?P<x>b)(?:c)(?<y>d)").unwrap();
        assert_eq!(cleaned, r"(a)(b)(?:c)(d)");
        assert_eq!(
            names,
            vec![("x".to_string(), 2), ("y".to_string(), 3)]
        );
    }

    #[test]
    fn strip_names_allows_duplicates() {
        let (cleaned, names) = strip_group_names(r"(?P<bob>a+)(?P<bob>b+)").unwrap();
        assert_eq!(cleaned, r"(a+)(b+)");
        assert_eq!(
            names,
            vec![("bob".to_string(), 1), ("bob".to_string(), 2)]
        );
    }

    #[test]
    fn strip_names_ignores_class_and_escaped_parens() {
        let (cleaned, names) = strip_group_names(r"\((a)[(](b)").unwrap();
        assert_eq!(cleaned, r"\((a)[(](b)");
        assert!(names.is_empty());
    }

    #[test]
    fn strip_names_rejects_bad_names() {
        let err = strip_group_names(r"(?P<na me>x)").unwrap_err();
        assert_eq!(err.0, error::ERR_BAD_NAMED_CAPTURE);
    }

    #[test]
    fn lookbehind_prefix_is_not_a_name() {
        // `(?<=` and `(?<!` are look-behind syntax, not named groups.
        let (cleaned, names) = strip_group_names(r"(?<=a)b").unwrap();
        assert_eq!(cleaned, r"(?<=a)b");
        assert!(names.is_empty());
    }

    #[test]
    fn classify_missing_bracket() {
        let pattern = "[abc";
        let err = ast::parse::Parser::new().parse(pattern).unwrap_err();
        let (code, _) = classify_parse_error(pattern, &err);
        assert_eq!(code, error::ERR_MISSING_BRACKET);
    }

    #[test]
    fn classify_missing_paren() {
        let pattern = "(ab";
        let err = ast::parse::Parser::new().parse(pattern).unwrap_err();
        let (code, _) = classify_parse_error(pattern, &err);
        assert_eq!(code, error::ERR_MISSING_PAREN);
    }

    #[test]
    fn classify_unexpected_paren() {
        let pattern = "ab)";
        let err = ast::parse::Parser::new().parse(pattern).unwrap_err();
        let (code, _) = classify_parse_error(pattern, &err);
        assert_eq!(code, error::ERR_UNEXPECTED_PAREN);
    }

    #[test]
    fn classify_trailing_backslash() {
        let pattern = "ab\\";
        let err = ast::parse::Parser::new().parse(pattern).unwrap_err();
        let (code, _) = classify_parse_error(pattern, &err);
        assert_eq!(code, error::ERR_TRAILING_BACKSLASH);
    }

    #[test]
    fn classify_missing_repetition_argument() {
        let pattern = "*a";
        let err = ast::parse::Parser::new().parse(pattern).unwrap_err();
        let (code, _) = classify_parse_error(pattern, &err);
        assert_eq!(code, error::ERR_REPEAT_ARGUMENT);
    }

    #[test]
    fn compile_reports_utf8_error_for_raw_bytes() {
        let (code, _) = compile_pattern(&[0xff, 0xfe], Options::empty()).unwrap_err();
        assert_eq!(code, error::ERR_BAD_UTF8);
    }

    #[test]
    fn compile_succeeds_with_duplicate_names() {
        let (re, names) =
            compile_pattern(br"(?P<bob>a+)(?P<bob>b+)", Options::empty()).unwrap();
        assert!(re.is_match(b"aabb"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn rewrite_references_capture_groups() {
        let re = LinkedRegex::new(r"(\w+)@(\w+)").unwrap();
        let text = b"bob@example";
        let caps = re.captures(text).unwrap();
        let mut out = Vec::new();
        apply_rewrite(&mut out, br"\2/\1", &caps);
        assert_eq!(out, b"example/bob");
    }
}
