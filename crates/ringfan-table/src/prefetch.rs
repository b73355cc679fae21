//! Software prefetch hints.
//!
//! These are performance hints only: they never change observable state, and
//! on targets without a stable prefetch intrinsic they compile to nothing.

/// Hint that the cache line holding `addr` will soon be read.
#[inline(always)]
pub fn prefetch_read<T>(addr: *const T) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch has no memory effects; any address value is allowed.
    unsafe {
        core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_T0 }>(addr.cast());
    }
    #[cfg(not(target_arch = "x86_64"))]
    let _ = addr;
}

/// Hint that the cache line holding `addr` will soon be written.
///
/// x86_64 has no distinct write-prefetch in stable intrinsics; fetching the
/// line into L1 with T0 covers the subsequent store.
#[inline(always)]
pub fn prefetch_write<T>(addr: *const T) {
    prefetch_read(addr);
}
