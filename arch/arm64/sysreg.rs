//! AArch64 system register access
//!
//! The GICv3 CPU interface is programmed through `ICC_*` system registers.
//! The driver never touches them directly: it goes through [`SysRegs`], so
//! that the same code runs against [`Aarch64SysRegs`] on hardware and against
//! a recording fake in host tests.
//!
//! Reference: ARM IHI 0069 (GICv3/v4 architecture), chapter 12

/// System registers used by the GIC driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SysReg {
    /// MPIDR_EL1 - Multiprocessor Affinity Register
    MpidrEl1,
    /// ID_AA64PFR0_EL1 - Processor Feature Register 0
    IdAa64pfr0El1,
    /// SCR_EL3 - Secure Configuration Register
    ScrEl3,
    /// ICC_SRE_EL3 - System Register Enable (EL3)
    IccSreEl3,
    /// ICC_SRE_EL2 - System Register Enable (EL2)
    IccSreEl2,
    /// ICC_SRE_EL1 - System Register Enable (EL1)
    IccSreEl1,
    /// ICC_PMR_EL1 - Priority Mask Register
    IccPmrEl1,
    /// ICC_IGRPEN0_EL1 - Group 0 enable
    IccIgrpen0El1,
    /// ICC_IGRPEN1_EL3 - Group 1 enable (both security states)
    IccIgrpen1El3,
    /// ICC_HPPIR0_EL1 - Highest Priority Pending Interrupt (Group 0)
    IccHppir0El1,
    /// ICC_HPPIR1_EL1 - Highest Priority Pending Interrupt (Group 1)
    IccHppir1El1,
    /// ICC_IAR0_EL1 - Interrupt Acknowledge (Group 0)
    IccIar0El1,
    /// ICC_IAR1_EL1 - Interrupt Acknowledge (Group 1)
    IccIar1El1,
    /// ICC_EOIR0_EL1 - End Of Interrupt (Group 0)
    IccEoir0El1,
    /// ICC_EOIR1_EL1 - End Of Interrupt (Group 1)
    IccEoir1El1,
    /// ICC_RPR_EL1 - Running Priority Register
    IccRprEl1,
    /// ICC_SGI0R_EL1 - Group 0 SGI generation
    IccSgi0rEl1,
    /// ICC_SGI1R_EL1 - Group 1 SGI generation (current security state)
    IccSgi1rEl1,
    /// ICC_ASGI1R_EL1 - Group 1 SGI generation (other security state)
    IccAsgi1rEl1,
}

/// Access to the system registers listed in [`SysReg`]
///
/// Writes to the `ICC_*` registers that change interrupt delivery are
/// followed by an `isb` inside the driver, not inside the implementation.
pub trait SysRegs {
    /// Read a system register
    fn read(&self, reg: SysReg) -> u64;
    /// Write a system register
    fn write(&self, reg: SysReg, value: u64);
}

impl<T: SysRegs + ?Sized> SysRegs for &T {
    fn read(&self, reg: SysReg) -> u64 {
        (**self).read(reg)
    }
    fn write(&self, reg: SysReg, value: u64) {
        (**self).write(reg, value)
    }
}

/// SCR_EL3 bits the driver touches
pub mod scr_el3 {
    /// Non-secure bit
    pub const NS: u64 = 1 << 0;
}

/// ID_AA64PFR0_EL1.GIC field
pub mod id_aa64pfr0 {
    /// GIC field shift
    pub const GIC_SHIFT: u32 = 24;
    /// GIC field mask (after shifting)
    pub const GIC_MASK: u64 = 0xf;
}

/// ICC_IGRPEN1_EL3 bits
pub mod igrpen1_el3 {
    /// Enable Group 1 Non-secure
    pub const ENABLE_G1NS: u64 = 1 << 0;
    /// Enable Group 1 Secure
    pub const ENABLE_G1S: u64 = 1 << 1;
}

/// ICC_IGRPEN0_EL1 enable bit
pub const IGRPEN0_ENABLE: u64 = 1;

/// Physical CPU system register accessor
///
/// Zero-sized; every method compiles to a single `mrs`/`msr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aarch64SysRegs;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        use aarch64_cpu::registers::{Readable, Writeable, MPIDR_EL1, SCR_EL3};

        macro_rules! mrs {
            ($name:literal) => {{
                let value: u64;
                // SAFETY: reading a GIC or ID system register has no side
                // effect beyond the architected acknowledge semantics the
                // caller asked for.
                unsafe {
                    core::arch::asm!(concat!("mrs {x}, ", $name), x = out(reg) value);
                }
                value
            }};
        }

        macro_rules! msr {
            ($name:literal, $value:expr) => {{
                let value: u64 = $value;
                // SAFETY: the driver runs at EL3 where all of these registers
                // are accessible.
                unsafe {
                    core::arch::asm!(concat!("msr ", $name, ", {x}"), x = in(reg) value);
                }
            }};
        }

        impl SysRegs for Aarch64SysRegs {
            fn read(&self, reg: SysReg) -> u64 {
                match reg {
                    SysReg::MpidrEl1 => MPIDR_EL1.get(),
                    SysReg::IdAa64pfr0El1 => mrs!("ID_AA64PFR0_EL1"),
                    SysReg::ScrEl3 => SCR_EL3.get(),
                    SysReg::IccSreEl3 => mrs!("ICC_SRE_EL3"),
                    SysReg::IccSreEl2 => mrs!("ICC_SRE_EL2"),
                    SysReg::IccSreEl1 => mrs!("ICC_SRE_EL1"),
                    SysReg::IccPmrEl1 => mrs!("ICC_PMR_EL1"),
                    SysReg::IccIgrpen0El1 => mrs!("ICC_IGRPEN0_EL1"),
                    SysReg::IccIgrpen1El3 => mrs!("ICC_IGRPEN1_EL3"),
                    SysReg::IccHppir0El1 => mrs!("ICC_HPPIR0_EL1"),
                    SysReg::IccHppir1El1 => mrs!("ICC_HPPIR1_EL1"),
                    SysReg::IccIar0El1 => mrs!("ICC_IAR0_EL1"),
                    SysReg::IccIar1El1 => mrs!("ICC_IAR1_EL1"),
                    SysReg::IccRprEl1 => mrs!("ICC_RPR_EL1"),
                    SysReg::IccEoir0El1
                    | SysReg::IccEoir1El1
                    | SysReg::IccSgi0rEl1
                    | SysReg::IccSgi1rEl1
                    | SysReg::IccAsgi1rEl1 => {
                        crate::fatal!("{:?} is write-only", reg);
                    }
                }
            }

            fn write(&self, reg: SysReg, value: u64) {
                match reg {
                    SysReg::ScrEl3 => SCR_EL3.set(value),
                    SysReg::IccSreEl3 => msr!("ICC_SRE_EL3", value),
                    SysReg::IccSreEl2 => msr!("ICC_SRE_EL2", value),
                    SysReg::IccSreEl1 => msr!("ICC_SRE_EL1", value),
                    SysReg::IccPmrEl1 => msr!("ICC_PMR_EL1", value),
                    SysReg::IccIgrpen0El1 => msr!("ICC_IGRPEN0_EL1", value),
                    SysReg::IccIgrpen1El3 => msr!("ICC_IGRPEN1_EL3", value),
                    SysReg::IccEoir0El1 => msr!("ICC_EOIR0_EL1", value),
                    SysReg::IccEoir1El1 => msr!("ICC_EOIR1_EL1", value),
                    SysReg::IccSgi0rEl1 => msr!("ICC_SGI0R_EL1", value),
                    SysReg::IccSgi1rEl1 => msr!("ICC_SGI1R_EL1", value),
                    SysReg::IccAsgi1rEl1 => msr!("ICC_ASGI1R_EL1", value),
                    SysReg::MpidrEl1
                    | SysReg::IdAa64pfr0El1
                    | SysReg::IccHppir0El1
                    | SysReg::IccHppir1El1
                    | SysReg::IccIar0El1
                    | SysReg::IccIar1El1
                    | SysReg::IccRprEl1 => {
                        crate::fatal!("{:?} is read-only", reg);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::irqchip::testing::FakeSysRegs;

    fn lower_pmr<S: SysRegs>(sysregs: S) -> u64 {
        sysregs.write(SysReg::IccPmrEl1, 0xf0);
        sysregs.read(SysReg::IccPmrEl1)
    }

    #[test]
    fn test_borrowed_accessor_forwards() {
        let sysregs = FakeSysRegs::new();

        assert_eq!(lower_pmr(&sysregs), 0xf0);
        assert_eq!(lower_pmr(&&sysregs), 0xf0);
        assert_eq!(sysregs.writes_to(SysReg::IccPmrEl1), vec![0xf0, 0xf0]);
    }
}
