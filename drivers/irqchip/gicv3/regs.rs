//! GICv3 register layout
//!
//! Distributor families switch to the split layout when the extended id
//! ranges are compiled in; the redistributor keeps its extended PPI
//! registers directly after the architected ones, so its families split
//! into the same bank.
//!
//! Reference: ARM IHI 0069 chapter 12

use bitflags::bitflags;
use tock_registers::register_bitfields;

use crate::drivers::irqchip::common::{EXT_INTID, MIN_EPPI_ID, MIN_ESPI_ID, TOTAL_PCPU_INTR};
use crate::drivers::irqchip::regs::{self, RegFamily};

/// Distributor registers (GICv3 view)
pub mod gicd {
    use super::*;

    pub use regs::gicd::{CTLR, IIDR, IPRIORITYR_DEF_VAL, TYPER};

    /// GICD_PIDR2
    pub const PIDR2: usize = 0xFFE8;

    const fn family(base: RegFamily, ext_offset: usize) -> RegFamily {
        if EXT_INTID {
            RegFamily::split(base.offset, base.bits, MIN_ESPI_ID, ext_offset, MIN_ESPI_ID)
        } else {
            base
        }
    }

    /// GICD_IGROUPR / GICD_IGROUPRE
    pub const IGROUPR: RegFamily = family(regs::gicd::IGROUPR, 0x1000);
    /// GICD_ISENABLER / GICD_ISENABLERE
    pub const ISENABLER: RegFamily = family(regs::gicd::ISENABLER, 0x1200);
    /// GICD_ICENABLER / GICD_ICENABLERE
    pub const ICENABLER: RegFamily = family(regs::gicd::ICENABLER, 0x1400);
    /// GICD_ISPENDR / GICD_ISPENDRE
    pub const ISPENDR: RegFamily = family(regs::gicd::ISPENDR, 0x1600);
    /// GICD_ICPENDR / GICD_ICPENDRE
    pub const ICPENDR: RegFamily = family(regs::gicd::ICPENDR, 0x1800);
    /// GICD_ISACTIVER / GICD_ISACTIVERE
    pub const ISACTIVER: RegFamily = family(regs::gicd::ISACTIVER, 0x1A00);
    /// GICD_ICACTIVER / GICD_ICACTIVERE
    pub const ICACTIVER: RegFamily = family(regs::gicd::ICACTIVER, 0x1C00);
    /// GICD_IPRIORITYR / GICD_IPRIORITYRE
    pub const IPRIORITYR: RegFamily = family(regs::gicd::IPRIORITYR, 0x2000);
    /// GICD_ICFGR / GICD_ICFGRE
    pub const ICFGR: RegFamily = family(regs::gicd::ICFGR, 0x3000);
    /// GICD_IGRPMODR / GICD_IGRPMODRE
    pub const IGRPMODR: RegFamily = family(regs::gicd::IGRPMODR, 0x3400);
    /// GICD_NSACR / GICD_NSACRE
    pub const NSACR: RegFamily = family(regs::gicd::NSACR, 0x3600);
    /// GICD_IROUTER / GICD_IROUTERE
    pub const IROUTER: RegFamily = family(regs::gicd::IROUTER, 0x8000);
}

/// Redistributor registers
pub mod gicr {
    use super::*;

    /// GICR_CTLR - Redistributor Control Register
    pub const CTLR: usize = 0x0000;
    /// GICR_IIDR - Implementer Identification Register
    pub const IIDR: usize = 0x0004;
    /// GICR_TYPER - Redistributor Type Register
    pub const TYPER: usize = 0x0008;
    /// GICR_WAKER - Redistributor Wake Register
    pub const WAKER: usize = 0x0014;
    /// GICR_PWRR - Power Register (GIC-600/700)
    pub const PWRR: usize = 0x0024;
    /// GICR_PROPBASER - LPI configuration table base
    pub const PROPBASER: usize = 0x0070;
    /// GICR_PENDBASER - LPI pending table base
    pub const PENDBASER: usize = 0x0078;
    /// GICR_PIDR2
    pub const PIDR2: usize = 0xFFE8;

    /// Offset of the SGI/PPI frame
    pub const SGI_BASE: usize = 0x10000;

    /// RD + SGI frames
    pub const V3_FRAME_SIZE: usize = 0x20000;
    /// RD + SGI + VLPI + reserved frames
    pub const V4_FRAME_SIZE: usize = 0x40000;

    const fn family(offset: usize, bits: u32) -> RegFamily {
        if EXT_INTID {
            // Extended PPI registers follow register 0; re-base 1056 to 32
            RegFamily::split(offset, bits, MIN_EPPI_ID, offset, MIN_EPPI_ID - TOTAL_PCPU_INTR)
        } else {
            RegFamily::flat(offset, bits)
        }
    }

    /// GICR_IGROUPR0 / GICR_IGROUPR<n>E (SGI frame)
    pub const IGROUPR: RegFamily = family(0x0080, 1);
    /// GICR_ISENABLER0 / GICR_ISENABLER<n>E
    pub const ISENABLER: RegFamily = family(0x0100, 1);
    /// GICR_ICENABLER0 / GICR_ICENABLER<n>E
    pub const ICENABLER: RegFamily = family(0x0180, 1);
    /// GICR_ISPENDR0 / GICR_ISPENDR<n>E
    pub const ISPENDR: RegFamily = family(0x0200, 1);
    /// GICR_ICPENDR0 / GICR_ICPENDR<n>E
    pub const ICPENDR: RegFamily = family(0x0280, 1);
    /// GICR_ISACTIVER0 / GICR_ISACTIVER<n>E
    pub const ISACTIVER: RegFamily = family(0x0300, 1);
    /// GICR_ICACTIVER0 / GICR_ICACTIVER<n>E
    pub const ICACTIVER: RegFamily = family(0x0380, 1);
    /// GICR_IPRIORITYR<n> / GICR_IPRIORITYR<n>E
    pub const IPRIORITYR: RegFamily = family(0x0400, 8);
    /// GICR_ICFGR<n> / GICR_ICFGR<n>E
    pub const ICFGR: RegFamily = family(0x0C00, 2);
    /// GICR_IGRPMODR0 / GICR_IGRPMODR<n>E
    pub const IGRPMODR: RegFamily = family(0x0D00, 1);
    /// GICR_NSACR
    pub const NSACR: usize = 0x0E00;
}

/// ITS control registers
pub mod gits {
    /// GITS_CTLR
    pub const CTLR: usize = 0x0000;
    /// GITS_CBASER
    pub const CBASER: usize = 0x0080;
    /// GITS_CWRITER
    pub const CWRITER: usize = 0x0088;
    /// GITS_BASER<n>
    pub const BASER: usize = 0x0100;
    /// Number of GITS_BASER<n> registers
    pub const NUM_BASER: usize = 8;
}

bitflags! {
    /// GICR_CTLR
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GicrCtlr: u32 {
        /// Upstream Write Pending
        const UWP = 1 << 31;
        /// Disable Processor selection for Group 1 Secure
        const DPG1S = 1 << 26;
        /// Disable Processor selection for Group 1 Non-secure
        const DPG1NS = 1 << 25;
        /// Disable Processor selection for Group 0
        const DPG0 = 1 << 24;
        /// Register Write Pending
        const RWP = 1 << 3;
        /// LPI support enabled
        const ENABLE_LPIS = 1 << 0;
    }

    /// GICR_WAKER
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GicrWaker: u32 {
        /// Children asleep
        const CHILDREN_ASLEEP = 1 << 2;
        /// Processor sleep
        const PROCESSOR_SLEEP = 1 << 1;
    }

    /// ICC_SRE_ELx
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct IccSre: u64 {
        /// Lower exception level access enable (EL2/EL3 only)
        const EN = 1 << 3;
        /// Disable IRQ bypass
        const DIB = 1 << 2;
        /// Disable FIQ bypass
        const DFB = 1 << 1;
        /// System register interface enable
        const SRE = 1 << 0;
    }

    /// GITS_CTLR
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GitsCtlr: u32 {
        /// ITS quiescent
        const QUIESCENT = 1 << 31;
        /// ITS enabled
        const ENABLED = 1 << 0;
    }
}

register_bitfields! [
    u64,
    /// GICR_TYPER
    pub GICR_TYPER [
        /// Last redistributor in the region
        LAST OFFSET(4) NUMBITS(1) [],
        /// Processor number
        PROCESSOR_NUMBER OFFSET(8) NUMBITS(16) [],
        /// Extended PPI range (0: none, 1: 1087, 2: 1119)
        PPINUM OFFSET(27) NUMBITS(5) [],
        /// Affinity of the connected PE (Aff3.Aff2.Aff1.Aff0)
        AFFINITY OFFSET(32) NUMBITS(32) []
    ]
];

/// GICD_IROUTER.Interrupt_Routing_Mode
pub const IROUTER_IRM_SHIFT: u32 = 31;

/// Routing mode of an SPI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Route to the PE named by the affinity value
    Pe,
    /// Route to any participating PE
    Any,
}

/// Convert the affinity field of GICR_TYPER to an MPIDR value
#[inline]
pub const fn mpidr_from_gicr_typer(typer: u64) -> u64 {
    (((typer >> 56) & 0xff) << 32) | ((typer >> 32) & 0x00ff_ffff)
}

/// Build a GICD_IROUTER value for `mpidr`
#[inline]
pub const fn irouter_val_from_mpidr(mpidr: u64, mode: RoutingMode) -> u64 {
    let irm = match mode {
        RoutingMode::Pe => 0,
        RoutingMode::Any => 1,
    };
    (mpidr & !(0xff << 24)) | (irm << IROUTER_IRM_SHIFT)
}

/// Maximum number of PEs a single ICC_SGI*R write can target
pub const GICV3_MAX_SGI_TARGETS: u64 = 16;

/// Build an ICC_SGI0R/SGI1R/ASGI1R value targeting the PEs in `target_list`
/// under the affinity `aff3.aff2.aff1`
#[inline]
pub const fn sgir_value(aff3: u64, aff2: u64, aff1: u64, intid: u32, irm: u64, target_list: u64) -> u64 {
    ((aff3 & 0xff) << 48)
        | ((irm & 0x1) << 40)
        | ((aff2 & 0xff) << 32)
        | (((intid & 0xf) as u64) << 24)
        | ((aff1 & 0xff) << 16)
        | (target_list & 0xffff)
}

/// Size of the redistributor frame described by `typer`
#[inline]
pub const fn redist_frame_size(typer: u64) -> usize {
    if cfg!(feature = "gic_v4_extn") && typer & (1 << 1) != 0 {
        gicr::V4_FRAME_SIZE
    } else {
        gicr::V3_FRAME_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpidr_from_typer() {
        let typer = (0x12u64 << 56) | (0x03_0201u64 << 32) | (5 << 8) | (1 << 4);
        assert_eq!(mpidr_from_gicr_typer(typer), 0x12_0003_0201);
    }

    #[test]
    fn test_irouter_value() {
        assert_eq!(irouter_val_from_mpidr(0x8100_0102, RoutingMode::Pe), 0x102);
        assert_eq!(
            irouter_val_from_mpidr(0x01_0000_0203, RoutingMode::Any),
            0x01_8000_0203
        );
    }

    #[test]
    fn test_sgir_value() {
        let value = sgir_value(1, 2, 3, 7, 0, 1 << 5);
        assert_eq!(value, (1 << 48) | (2 << 32) | (7 << 24) | (3 << 16) | (1 << 5));
    }

    #[test]
    fn test_redistributor_families() {
        assert_eq!(gicr::IGROUPR.reg_offset(31), 0x80);
        assert_eq!(gicr::IPRIORITYR.reg_offset(16), 0x410);
        assert_eq!(gicr::ICFGR.reg_offset(20), 0xc04);
        if EXT_INTID {
            assert_eq!(gicr::IGROUPR.reg_offset(1056), 0x84);
            assert_eq!(gicr::IGROUPR.reg_offset(1119), 0x88);
            assert_eq!(gicr::IPRIORITYR.reg_offset(1056), 0x420);
            assert_eq!(gicr::ICFGR.reg_offset(1056), 0xc08);
            assert_eq!(gicd::IGROUPR.reg_offset(4096), 0x1000);
            assert_eq!(gicd::IROUTER.reg_offset(4097), 0x8008);
        }
    }
}
