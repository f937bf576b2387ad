//! Byte copy utility: whole machine words first, then the tail byte by byte.

use std::mem::size_of;

const WORD: usize = size_of::<usize>();

/// Copy up to `count` bytes from `src` into `dst`.
///
/// Copies `min(count, dst.len(), src.len())` bytes and returns that number.
/// Returns 0 if either side is absent.
pub fn copy_bytes(dst: Option<&mut [u8]>, src: Option<&[u8]>, count: usize) -> usize {
    let (Some(dst), Some(src)) = (dst, src) else {
        return 0;
    };
    let count = count.min(dst.len()).min(src.len());
    let (dst, src) = (&mut dst[..count], &src[..count]);

    let mut dst_words = dst.chunks_exact_mut(WORD);
    let mut src_words = src.chunks_exact(WORD);
    for (d, s) in (&mut dst_words).zip(&mut src_words) {
        d.copy_from_slice(s);
    }
    for (d, s) in dst_words
        .into_remainder()
        .iter_mut()
        .zip(src_words.remainder())
    {
        *d = *s;
    }
    count
}

/// Pointer form of [`copy_bytes`]. Copies exactly `count` bytes, front to
/// back, with no overlap check.
///
/// Returns 0 without touching memory if either pointer is null.
///
/// # Safety
///
/// `src` must be readable and `dst` writable for `count` bytes. Overlapping
/// ranges are copied forward, which clobbers the source when `dst > src`.
pub unsafe fn copy_bytes_raw(dst: *mut u8, src: *const u8, count: usize) -> usize {
    if dst.is_null() || src.is_null() {
        return 0;
    }
    let words = count / WORD;
    // SAFETY: caller guarantees both ranges cover `count` bytes; unaligned
    // accesses are used because handles carry no alignment promise here.
    unsafe {
        for i in 0..words {
            let word = src.add(i * WORD).cast::<usize>().read_unaligned();
            dst.add(i * WORD).cast::<usize>().write_unaligned(word);
        }
        for i in words * WORD..count {
            dst.add(i).write(src.add(i).read());
        }
    }
    count
}
