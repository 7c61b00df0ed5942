//! ARM64 (AArch64) architecture support for Ferrogic
//!
//! This module provides the two pieces of the architecture the GIC driver
//! depends on directly:
//! - Memory barriers ordering MMIO against ordinary memory
//! - The system registers of the GICv3 CPU interface and the few
//!   identification/security registers read around them
//!
//! ## References
//! - [ARM Architecture Reference Manual ARMv8-A](https://developer.arm.com/documentation/ddi0487/latest)
//! - [ARM Generic Interrupt Controller Architecture Specification](https://developer.arm.com/documentation/ihi0069/latest)

pub mod barrier;
pub mod sysreg;

/// MPIDR_EL1 affinity field helpers
pub mod mpidr {
    /// Mask of one affinity level
    pub const AFFLVL_MASK: u64 = 0xff;
    /// Shift of affinity level 0
    pub const AFF0_SHIFT: u32 = 0;
    /// Shift of affinity level 1
    pub const AFF1_SHIFT: u32 = 8;
    /// Shift of affinity level 2
    pub const AFF2_SHIFT: u32 = 16;
    /// Shift of affinity level 3
    pub const AFF3_SHIFT: u32 = 32;
    /// All affinity fields
    pub const AFFINITY_MASK: u64 = 0xff_00ff_ffff;

    /// Extract affinity level `level` (0..=3) of `mpidr`
    #[inline]
    pub const fn afflvl(mpidr: u64, level: u32) -> u64 {
        let shift = match level {
            0 => AFF0_SHIFT,
            1 => AFF1_SHIFT,
            2 => AFF2_SHIFT,
            _ => AFF3_SHIFT,
        };
        (mpidr >> shift) & AFFLVL_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::mpidr::*;

    #[test]
    fn test_afflvl_extraction() {
        let mpidr = 0x0000_0012_0034_5678;
        assert_eq!(afflvl(mpidr, 0), 0x78);
        assert_eq!(afflvl(mpidr, 1), 0x56);
        assert_eq!(afflvl(mpidr, 2), 0x34);
        assert_eq!(afflvl(mpidr, 3), 0x12);
    }
}
