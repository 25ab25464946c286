// abi.rs - Typed wrappers over the engine's foreign function table.
//
// One wrapper per function. Each pins the calling convention
// (pointer+length pairs for strings, integer flags for options) and
// surfaces the raw numeric result without interpretation. No retries:
// a broken binding is a deployment defect and panics inside the module.

use crate::api::Options;
use crate::engine::{Engine, Func, GuestPtr, GuestSlice};

pub(crate) fn malloc(engine: &Engine, size: u32) -> GuestPtr {
    engine.call(Func::Malloc, &[u64::from(size)]) as GuestPtr
}

pub(crate) fn free(engine: &Engine, ptr: GuestPtr) {
    engine.call(Func::Free, &[u64::from(ptr)]);
}

pub(crate) fn new_re(engine: &Engine, pattern: GuestSlice, opts: Options) -> GuestPtr {
    engine.call(
        Func::New,
        &[
            u64::from(pattern.ptr),
            pattern.len as u64,
            u64::from(opts.bits()),
        ],
    ) as GuestPtr
}

pub(crate) fn delete_re(engine: &Engine, re: GuestPtr) {
    engine.call(Func::Delete, &[u64::from(re)]);
}

/// Compile-time error introspection: code 0 means success, anything else
/// pairs with the offending pattern fragment.
pub(crate) fn re_error(engine: &Engine, re: GuestPtr) -> (i32, String) {
    let code = engine.call(Func::ErrorCode, &[u64::from(re)]) as i32;
    if code == 0 {
        return (0, String::new());
    }
    let arg = engine.call(Func::ErrorArg, &[u64::from(re)]) as GuestPtr;
    (code, copy_c_string(engine, arg))
}

pub(crate) fn num_capturing_groups(engine: &Engine, re: GuestPtr) -> i32 {
    engine.call(Func::NumCapturingGroups, &[u64::from(re)]) as i32
}

/// One match attempt over `text[start..]`, writing up to `nmatch`
/// pointer+length results into `match_arr`.
pub(crate) fn match_from(
    engine: &Engine,
    re: GuestPtr,
    text: GuestSlice,
    start: usize,
    match_arr: GuestPtr,
    nmatch: u32,
) -> bool {
    let stack = [
        u64::from(re),
        u64::from(text.ptr),
        text.len as u64,
        start as u64,
        text.len as u64,
        0, // anchor: unanchored
        u64::from(match_arr),
        u64::from(nmatch),
    ];
    engine.call(Func::Match, &stack) == 1
}

pub(crate) fn named_groups_iter_new(engine: &Engine, re: GuestPtr) -> GuestPtr {
    engine.call(Func::NamedGroupsIterNew, &[u64::from(re)]) as GuestPtr
}

/// Advance the named-group iterator. Not on the hot path; the two output
/// slots are a throwaway allocation.
pub(crate) fn named_groups_iter_next(engine: &Engine, iter: GuestPtr) -> Option<(String, usize)> {
    let slots = malloc(engine, 8);
    let name_ptr_slot = slots;
    let index_slot = slots + 4;

    let more = engine.call(
        Func::NamedGroupsIterNext,
        &[
            u64::from(iter),
            u64::from(name_ptr_slot),
            u64::from(index_slot),
        ],
    );
    let result = if more == 1 {
        let name_ptr = engine.memory().read_u32(name_ptr_slot);
        let index = engine.memory().read_u32(index_slot) as usize;
        Some((copy_c_string(engine, name_ptr), index))
    } else {
        None
    };
    free(engine, slots);
    result
}

pub(crate) fn named_groups_iter_delete(engine: &Engine, iter: GuestPtr) {
    engine.call(Func::NamedGroupsIterDelete, &[u64::from(iter)]);
}

pub(crate) fn set_new(engine: &Engine, opts: Options) -> GuestPtr {
    engine.call(Func::SetNew, &[u64::from(opts.bits())]) as GuestPtr
}

/// Add one expression to a set under construction. Returns the pattern's
/// slot index, or -1 with a message written into `err_buf`.
pub(crate) fn set_add(
    engine: &Engine,
    set: GuestPtr,
    pattern: GuestSlice,
    err_buf: GuestPtr,
    err_len: usize,
) -> i32 {
    engine.call(
        Func::SetAdd,
        &[
            u64::from(set),
            u64::from(pattern.ptr),
            pattern.len as u64,
            u64::from(err_buf),
            err_len as u64,
        ],
    ) as i32
}

pub(crate) fn set_compile(engine: &Engine, set: GuestPtr) -> i32 {
    engine.call(Func::SetCompile, &[u64::from(set)]) as i32
}

/// One simultaneous search over all patterns in the set; writes up to `n`
/// matched indices (plain integers, not pointers) and returns how many.
pub(crate) fn set_match(
    engine: &Engine,
    set: GuestPtr,
    text: GuestSlice,
    out: GuestPtr,
    n: usize,
) -> usize {
    engine.call(
        Func::SetMatch,
        &[
            u64::from(set),
            u64::from(text.ptr),
            text.len as u64,
            u64::from(out),
            n as u64,
        ],
    ) as usize
}

pub(crate) fn set_delete(engine: &Engine, set: GuestPtr) {
    engine.call(Func::SetDelete, &[u64::from(set)]);
}

/// Engine-side global replacement. `text_and_target` addresses a
/// pointer+length pair that is rewritten in place to the engine-allocated
/// result; the caller owns (and must free) the new buffer. Returns the
/// replacement count.
pub(crate) fn global_replace(
    engine: &Engine,
    re: GuestPtr,
    text_and_target: GuestPtr,
    rewrite: GuestPtr,
) -> i32 {
    engine.call(
        Func::GlobalReplace,
        &[u64::from(re), u64::from(text_and_target), u64::from(rewrite)],
    ) as i32
}

/// Match anywhere in the addressed text and advance the pair past the
/// match end, writing up to `nmatch` group results.
pub(crate) fn find_and_consume(
    engine: &Engine,
    re: GuestPtr,
    text_pair: GuestPtr,
    match_arr: GuestPtr,
    nmatch: u32,
) -> bool {
    engine.call(
        Func::FindAndConsume,
        &[
            u64::from(re),
            u64::from(text_pair),
            u64::from(match_arr),
            u64::from(nmatch),
        ],
    ) == 1
}

/// Copy a NUL-terminated guest string into host memory. Byte-wise: the
/// terminator may sit at the very end of committed memory, so reading
/// ahead in chunks is not an option.
pub(crate) fn copy_c_string(engine: &Engine, mut ptr: GuestPtr) -> String {
    let mut out = Vec::new();
    loop {
        let b = engine.memory().read(ptr, 1)[0];
        if b == 0 {
            return String::from_utf8_lossy(&out).into_owned();
        }
        out.push(b);
        ptr += 1;
    }
}
