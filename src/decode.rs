// decode.rs - Convert engine-native match results into caller-relative
// offsets.
//
// The engine reports each capture group as either a null marker or an
// absolute pointer into the caller's buffer in guest memory plus a length.
// Decoding subtracts the base address of the exact buffer that was passed
// to the match call; offsets, never raw addresses, cross the API boundary.

use crate::engine::{Engine, GuestPtr, GuestSlice};

/// Sentinel offset pair for a capture group that did not participate.
pub(crate) const NO_MATCH: isize = -1;

/// Decode a single pointer+length result slot against the buffer `cs`.
pub(crate) fn read_match(engine: &Engine, cs: GuestSlice, match_ptr: GuestPtr) -> (isize, isize) {
    let buf = engine.memory().read(match_ptr, 8);
    let sub_ptr = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let sub_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let start = (sub_ptr - cs.ptr) as isize;
    (start, start + sub_len as isize)
}

/// Decode `n` contiguous result slots, handing each offset pair to the
/// visitor. A null result pointer decodes to `(-1, -1)`. The visitor
/// returns `false` to stop early, before the remaining groups are paid
/// for.
pub(crate) fn read_matches<F>(
    engine: &Engine,
    cs: GuestSlice,
    array_ptr: GuestPtr,
    n: usize,
    mut visit: F,
) where
    F: FnMut(usize, isize, isize) -> bool,
{
    let buf = engine.memory().read(array_ptr, 8 * n);
    for i in 0..n {
        let chunk = &buf[8 * i..8 * i + 8];
        let sub_ptr = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if sub_ptr == 0 {
            if !visit(i, NO_MATCH, NO_MATCH) {
                break;
            }
            continue;
        }
        let sub_len = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let start = (sub_ptr - cs.ptr) as isize;
        if !visit(i, start, start + sub_len as isize) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    // Stage result slots by hand: the decoder only sees guest memory, so
    // tests can write the engine's encoding directly.
    fn write_pair(engine: &Engine, slot: GuestPtr, ptr: u32, len: u32) {
        engine.memory().write_u32(slot, ptr);
        engine.memory().write_u32(slot + 4, len);
    }

    #[test]
    fn offsets_are_relative_to_the_matched_buffer() {
        let engine = Engine::global();
        let mut arena = engine.start_operation(32);
        let cs = arena.write(b"abcdef");
        let slot = arena.array(1);
        write_pair(engine, slot, cs.ptr + 2, 3);
        assert_eq!(read_match(engine, cs, slot), (2, 5));
    }

    #[test]
    fn null_pointer_decodes_to_minus_one_pair() {
        let engine = Engine::global();
        let mut arena = engine.start_operation(32);
        let cs = arena.write(b"abcdef");
        let arr = arena.array(2);
        write_pair(engine, arr, cs.ptr, 6);
        write_pair(engine, arr + 8, 0, 0);

        let mut seen = Vec::new();
        read_matches(engine, cs, arr, 2, |_, s, e| {
            seen.push((s, e));
            true
        });
        assert_eq!(seen, vec![(0, 6), (-1, -1)]);
    }

    #[test]
    fn visitor_short_circuits_remaining_groups() {
        let engine = Engine::global();
        let mut arena = engine.start_operation(48);
        let cs = arena.write(b"abcdef");
        let arr = arena.array(3);
        write_pair(engine, arr, cs.ptr + 1, 0);
        write_pair(engine, arr + 8, cs.ptr, 2);
        write_pair(engine, arr + 16, cs.ptr + 4, 2);

        let mut visits = 0;
        read_matches(engine, cs, arr, 3, |_, _, _| {
            visits += 1;
            false
        });
        assert_eq!(visits, 1);
    }
}
