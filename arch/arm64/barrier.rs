//! Memory barriers
//!
//! Device writes that enable an interrupt must not overtake the ordinary
//! memory writes the handler depends on, and writes that disable one must
//! complete before the caller reuses that memory. On AArch64 these map to the
//! architectural barrier instructions; elsewhere a sequentially consistent
//! fence stands in for them.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        use aarch64_cpu::asm::barrier;

        /// `dsb ishst`
        #[inline(always)]
        pub fn dsbishst() {
            barrier::dsb(barrier::ISHST);
        }

        /// `dmb ishst`
        #[inline(always)]
        pub fn dmbishst() {
            barrier::dmb(barrier::ISHST);
        }

        /// `isb`
        #[inline(always)]
        pub fn isb() {
            barrier::isb(barrier::SY);
        }
    } else {
        use core::sync::atomic::{fence, Ordering};

        #[inline(always)]
        pub fn dsbishst() {
            fence(Ordering::SeqCst);
        }

        #[inline(always)]
        pub fn dmbishst() {
            fence(Ordering::SeqCst);
        }

        #[inline(always)]
        pub fn isb() {
            fence(Ordering::SeqCst);
        }
    }
}
