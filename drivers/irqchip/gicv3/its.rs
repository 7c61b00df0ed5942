//! ITS register context
//!
//! Only the control registers are covered. The command queue and the
//! device/collection tables live in memory the owner of the ITS preserves.

use super::regs::{gits, GitsCtlr};
use super::Gicv3Driver;
use crate::arch::arm64::sysreg::SysRegs;
use crate::drivers::irqchip::mmio::Mmio;
use crate::drivers::irqchip::regs::RegBlock;

/// Saved ITS registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItsContext {
    /// GITS_CTLR as found at save time
    pub ctlr: u32,
    /// GITS_CBASER
    pub cbaser: u64,
    /// GITS_CWRITER
    pub cwriter: u64,
    /// GITS_BASER<n>
    pub baser: [u64; gits::NUM_BASER],
}

impl ItsContext {
    /// An all-zero context
    pub const fn new() -> Self {
        Self {
            ctlr: 0,
            cbaser: 0,
            cwriter: 0,
            baser: [0; gits::NUM_BASER],
        }
    }
}

impl<'a, M: Mmio, S: SysRegs> Gicv3Driver<'a, M, S> {
    /// Disable the ITS at `gits_base`, wait for it to quiesce and save its
    /// registers
    ///
    /// Must run after the CPU interface has been disabled.
    pub fn its_save(&self, gits_base: usize, ctx: &mut ItsContext) {
        let regs = RegBlock::new(self.mmio(), gits_base);

        ctx.ctlr = regs.read32(gits::CTLR);
        regs.write32(gits::CTLR, ctx.ctlr & !GitsCtlr::ENABLED.bits());
        while regs.read32(gits::CTLR) & GitsCtlr::QUIESCENT.bits() == 0 {
            core::hint::spin_loop();
        }

        ctx.cbaser = regs.read64(gits::CBASER);
        ctx.cwriter = regs.read64(gits::CWRITER);
        for (i, baser) in ctx.baser.iter_mut().enumerate() {
            *baser = regs.read64(gits::BASER + i * 8);
        }
        log::debug!("GICv3: ITS {:#x} context saved", gits_base);
    }

    /// Restore the ITS registers saved by [`Self::its_save`]
    ///
    /// The ITS must be disabled and quiescent, and is left disabled.
    /// Must run before the CPU interface is enabled.
    pub fn its_restore(&self, gits_base: usize, ctx: &ItsContext) {
        let regs = RegBlock::new(self.mmio(), gits_base);

        let ctlr = GitsCtlr::from_bits_retain(regs.read32(gits::CTLR));
        assert!(
            !ctlr.contains(GitsCtlr::ENABLED),
            "GICv3: ITS {:#x} enabled during restore",
            gits_base
        );
        assert!(
            ctlr.contains(GitsCtlr::QUIESCENT),
            "GICv3: ITS {:#x} not quiescent during restore",
            gits_base
        );

        regs.write64(gits::CBASER, ctx.cbaser);
        regs.write64(gits::CWRITER, ctx.cwriter);
        for (i, baser) in ctx.baser.iter().enumerate() {
            regs.write64(gits::BASER + i * 8, *baser);
        }

        regs.write32(gits::CTLR, ctx.ctlr & !GitsCtlr::ENABLED.bits());
        log::debug!("GICv3: ITS {:#x} context restored", gits_base);
    }
}
