//! Distributor and redistributor context save/restore
//!
//! Contexts are plain values owned by the caller (usually static storage
//! reserved by the power management code); the driver never keeps them.
//!
//! Restore order matters. Every interrupt is fully configured (group,
//! priority, trigger, routing) before its enable, pending and active state
//! are written back, so nothing fires with a stale configuration.

use super::helpers::{
    espi_limit, gicd_clr_ctlr, gicd_set_ctlr, gicd_wait_for_pending_write,
    gicr_wait_for_pending_write, gicr_wait_for_upstream_pending_write, spi_limit,
};
use super::regs::{gicd, gicr, GicrCtlr};
use super::Gicv3Driver;
use crate::arch::arm64::sysreg::SysRegs;
use crate::drivers::irqchip::common::{MIN_ESPI_ID, MIN_SPI_ID};
use crate::drivers::irqchip::mmio::Mmio;
use crate::drivers::irqchip::regs::{GicdCtlr, RegBlock, RegFamily};

/// Registers of one 1024-id SPI range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRangeContext {
    pub igroupr: [u32; 32],
    pub isenabler: [u32; 32],
    pub ispendr: [u32; 32],
    pub isactiver: [u32; 32],
    pub igrpmodr: [u32; 32],
    pub ipriorityr: [u32; 256],
    pub icfgr: [u32; 64],
    pub nsacr: [u32; 64],
    pub irouter: [u64; 1024],
}

impl SpiRangeContext {
    /// An all-zero context
    pub const fn new() -> Self {
        Self {
            igroupr: [0; 32],
            isenabler: [0; 32],
            ispendr: [0; 32],
            isactiver: [0; 32],
            igrpmodr: [0; 32],
            ipriorityr: [0; 256],
            icfgr: [0; 64],
            nsacr: [0; 64],
            irouter: [0; 1024],
        }
    }
}

impl Default for SpiRangeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Saved distributor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistContext {
    /// GICD_CTLR
    pub ctlr: u32,
    /// SPIs 32-1019, indexed from id 32
    pub spi: SpiRangeContext,
    /// Extended SPIs, indexed from id 4096
    #[cfg(feature = "gic_ext_intid")]
    pub espi: SpiRangeContext,
}

impl DistContext {
    /// An all-zero context
    pub const fn new() -> Self {
        Self {
            ctlr: 0,
            spi: SpiRangeContext::new(),
            #[cfg(feature = "gic_ext_intid")]
            espi: SpiRangeContext::new(),
        }
    }
}

impl Default for DistContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Saved redistributor state of one core
///
/// Sized for the largest extended PPI range: three 32-id banks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdistContext {
    /// GICR_CTLR
    pub ctlr: u32,
    /// GICR_PROPBASER
    pub propbaser: u64,
    /// GICR_PENDBASER
    pub pendbaser: u64,
    pub igroupr: [u32; 3],
    pub isenabler: [u32; 3],
    pub ispendr: [u32; 3],
    pub isactiver: [u32; 3],
    pub igrpmodr: [u32; 3],
    pub icfgr: [u32; 6],
    pub ipriorityr: [u32; 24],
    /// GICR_NSACR
    pub nsacr: u32,
}

impl RdistContext {
    /// An all-zero context
    pub const fn new() -> Self {
        Self {
            ctlr: 0,
            propbaser: 0,
            pendbaser: 0,
            igroupr: [0; 3],
            isenabler: [0; 3],
            ispendr: [0; 3],
            isactiver: [0; 3],
            igrpmodr: [0; 3],
            icfgr: [0; 6],
            ipriorityr: [0; 24],
            nsacr: 0,
        }
    }
}

impl Default for RdistContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids `first, first + step, ...` below `limit`, one per register
fn reg_ids(family: &RegFamily, first: u32, limit: u32) -> impl Iterator<Item = u32> {
    (first..limit.max(first)).step_by(family.ids_per_reg() as usize)
}

fn save_regs<M: Mmio + ?Sized>(
    gicd_regs: RegBlock<'_, M>,
    family: &RegFamily,
    (first, limit): (u32, u32),
    out: &mut [u32],
) {
    for (slot, id) in out.iter_mut().zip(reg_ids(family, first, limit)) {
        *slot = gicd_regs.read_reg(family, id);
    }
}

fn restore_regs<M: Mmio + ?Sized>(
    gicd_regs: RegBlock<'_, M>,
    family: &RegFamily,
    (first, limit): (u32, u32),
    saved: &[u32],
) {
    for (value, id) in saved.iter().zip(reg_ids(family, first, limit)) {
        gicd_regs.write_reg(family, id, *value);
    }
}

fn save_range<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>, range: (u32, u32), ctx: &mut SpiRangeContext) {
    save_regs(gicd_regs, &gicd::IGROUPR, range, &mut ctx.igroupr);
    save_regs(gicd_regs, &gicd::ISENABLER, range, &mut ctx.isenabler);
    save_regs(gicd_regs, &gicd::ISPENDR, range, &mut ctx.ispendr);
    save_regs(gicd_regs, &gicd::ISACTIVER, range, &mut ctx.isactiver);
    save_regs(gicd_regs, &gicd::IGRPMODR, range, &mut ctx.igrpmodr);
    save_regs(gicd_regs, &gicd::IPRIORITYR, range, &mut ctx.ipriorityr);
    save_regs(gicd_regs, &gicd::ICFGR, range, &mut ctx.icfgr);
    save_regs(gicd_regs, &gicd::NSACR, range, &mut ctx.nsacr);

    let (first, limit) = range;
    for (slot, id) in ctx.irouter.iter_mut().zip(reg_ids(&gicd::IROUTER, first, limit)) {
        *slot = gicd_regs.read_reg64(&gicd::IROUTER, id);
    }
}

fn restore_range_config<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>, range: (u32, u32), ctx: &SpiRangeContext) {
    restore_regs(gicd_regs, &gicd::IGROUPR, range, &ctx.igroupr);
    restore_regs(gicd_regs, &gicd::IPRIORITYR, range, &ctx.ipriorityr);
    restore_regs(gicd_regs, &gicd::ICFGR, range, &ctx.icfgr);
    restore_regs(gicd_regs, &gicd::IGRPMODR, range, &ctx.igrpmodr);
    restore_regs(gicd_regs, &gicd::NSACR, range, &ctx.nsacr);

    let (first, limit) = range;
    for (value, id) in ctx.irouter.iter().zip(reg_ids(&gicd::IROUTER, first, limit)) {
        gicd_regs.write_reg64(&gicd::IROUTER, id, *value);
    }
}

fn restore_range_state<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>, range: (u32, u32), ctx: &SpiRangeContext) {
    restore_regs(gicd_regs, &gicd::ISENABLER, range, &ctx.isenabler);
    restore_regs(gicd_regs, &gicd::ISPENDR, range, &ctx.ispendr);
    restore_regs(gicd_regs, &gicd::ISACTIVER, range, &ctx.isactiver);
}

impl<'a, M: Mmio, S: SysRegs> Gicv3Driver<'a, M, S> {
    fn spi_ranges(&self) -> [(u32, u32); 2] {
        let gicd_regs = self.gicd();
        let espi = espi_limit(gicd_regs);
        [(MIN_SPI_ID, spi_limit(gicd_regs)), (MIN_ESPI_ID, espi.max(MIN_ESPI_ID))]
    }

    /// Save the distributor state
    ///
    /// Must run after every CPU interface has been disabled.
    pub fn distif_save(&self, ctx: &mut DistContext) {
        let gicd_regs = self.gicd();
        let [spis, _espis] = self.spi_ranges();

        gicd_wait_for_pending_write(gicd_regs);
        ctx.ctlr = gicd_regs.read32(gicd::CTLR);

        save_range(gicd_regs, spis, &mut ctx.spi);
        #[cfg(feature = "gic_ext_intid")]
        save_range(gicd_regs, _espis, &mut ctx.espi);

        log::debug!("GICv3: distributor context saved");
    }

    /// Reinitialise the distributor and restore the state saved by
    /// [`Self::distif_save`]
    pub fn distif_init_restore(&self, ctx: &DistContext) {
        let gicd_regs = self.gicd();
        let [spis, _espis] = self.spi_ranges();

        // Groups off before ARE_S can change
        gicd_clr_ctlr(gicd_regs, GicdCtlr::ALL_GROUPS, true);
        gicd_set_ctlr(gicd_regs, GicdCtlr::ARE_S | GicdCtlr::ARE_NS, true);

        restore_range_config(gicd_regs, spis, &ctx.spi);
        #[cfg(feature = "gic_ext_intid")]
        restore_range_config(gicd_regs, _espis, &ctx.espi);

        restore_range_state(gicd_regs, spis, &ctx.spi);
        #[cfg(feature = "gic_ext_intid")]
        restore_range_state(gicd_regs, _espis, &ctx.espi);

        gicd_regs.write32(gicd::CTLR, ctx.ctlr);
        gicd_wait_for_pending_write(gicd_regs);

        log::debug!("GICv3: distributor context restored");
    }

    /// Save the redistributor state of core `proc`
    ///
    /// Must run after the CPU interface of `proc` has been disabled. Calls
    /// the platform `pre_save` hook last.
    pub fn rdistif_save(&self, proc: usize, ctx: &mut RdistContext) {
        let gicr_regs = self.gicr(proc);
        let sgi_regs = self.gicr_sgi(proc);
        let ppi_regs = super::helpers::ppi_regs_num(gicr_regs);

        gicr_wait_for_pending_write(gicr_regs);

        ctx.ctlr = gicr_regs.read32(gicr::CTLR);
        ctx.propbaser = gicr_regs.read64(gicr::PROPBASER);
        ctx.pendbaser = gicr_regs.read64(gicr::PENDBASER);

        for i in 0..ppi_regs {
            ctx.igroupr[i] = sgi_regs.read32(gicr::IGROUPR.offset + i * 4);
            ctx.isactiver[i] = sgi_regs.read32(gicr::ISACTIVER.offset + i * 4);
            ctx.ispendr[i] = sgi_regs.read32(gicr::ISPENDR.offset + i * 4);
            ctx.isenabler[i] = sgi_regs.read32(gicr::ISENABLER.offset + i * 4);
            ctx.igrpmodr[i] = sgi_regs.read32(gicr::IGRPMODR.offset + i * 4);
        }
        for i in 0..ppi_regs * 2 {
            ctx.icfgr[i] = sgi_regs.read32(gicr::ICFGR.offset + i * 4);
        }
        ctx.nsacr = sgi_regs.read32(gicr::NSACR);
        for i in 0..ppi_regs * 8 {
            ctx.ipriorityr[i] = sgi_regs.read32(gicr::IPRIORITYR.offset + i * 4);
        }

        self.config.hooks.pre_save(proc);
        log::debug!("GICv3: redistributor {} context saved", proc);
    }

    /// Power on the redistributor of core `proc` and restore the state saved
    /// by [`Self::rdistif_save`]
    ///
    /// LPIs are disabled while their table bases are rewritten and enabled
    /// again, if they were, by the final GICR_CTLR write.
    pub fn rdistif_init_restore(&self, proc: usize, ctx: &RdistContext) {
        let gicr_regs = self.gicr(proc);
        let sgi_regs = self.gicr_sgi(proc);

        self.rdistif_on(proc);
        self.config.hooks.post_restore(proc);

        let ppi_regs = super::helpers::ppi_regs_num(gicr_regs);

        // Nothing may fire while the banks are rewritten
        for i in 0..ppi_regs {
            sgi_regs.write32(gicr::ICENABLER.offset + i * 4, !0);
        }
        gicr_wait_for_pending_write(gicr_regs);

        // PROPBASER/PENDBASER are UNPREDICTABLE to write with LPIs enabled
        gicr_regs.write32(gicr::CTLR, ctx.ctlr & !GicrCtlr::ENABLE_LPIS.bits());
        gicr_wait_for_pending_write(gicr_regs);

        gicr_regs.write64(gicr::PROPBASER, ctx.propbaser);
        gicr_regs.write64(gicr::PENDBASER, ctx.pendbaser);

        for i in 0..ppi_regs {
            sgi_regs.write32(gicr::IGROUPR.offset + i * 4, ctx.igroupr[i]);
        }
        for i in 0..ppi_regs * 8 {
            sgi_regs.write32(gicr::IPRIORITYR.offset + i * 4, ctx.ipriorityr[i]);
        }
        for i in 0..ppi_regs * 2 {
            sgi_regs.write32(gicr::ICFGR.offset + i * 4, ctx.icfgr[i]);
        }
        for i in 0..ppi_regs {
            sgi_regs.write32(gicr::IGRPMODR.offset + i * 4, ctx.igrpmodr[i]);
        }
        sgi_regs.write32(gicr::NSACR, ctx.nsacr);

        for i in 0..ppi_regs {
            sgi_regs.write32(gicr::ISPENDR.offset + i * 4, ctx.ispendr[i]);
            sgi_regs.write32(gicr::ISACTIVER.offset + i * 4, ctx.isactiver[i]);
        }

        // Enables go last, once everything above has reached the
        // distributor
        gicr_wait_for_upstream_pending_write(gicr_regs);
        for i in 0..ppi_regs {
            sgi_regs.write32(gicr::ISENABLER.offset + i * 4, ctx.isenabler[i]);
        }

        gicr_regs.write32(gicr::CTLR, ctx.ctlr);
        gicr_wait_for_pending_write(gicr_regs);

        log::debug!("GICv3: redistributor {} context restored", proc);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::boxed::Box;

    use super::*;
    use crate::arch::arm64::sysreg::SysReg;
    use crate::config::{DistifHooks, Gicv3Config};
    use crate::drivers::irqchip::testing::{same_contents, Access, FakeMmio, FakeSysRegs};

    const GICD: usize = 0x2f00_0000;
    const GICR: usize = 0x2f10_0000;
    const SGI: usize = GICR + gicr::SGI_BASE;

    static TABLE: [AtomicUsize; 1] = [AtomicUsize::new(GICR)];

    fn fakes() -> (FakeMmio, FakeSysRegs) {
        let mmio = FakeMmio::new();
        let rev = if cfg!(feature = "gic_v4_extn") { 4 } else { 3 };
        mmio.poke32(GICD + gicd::PIDR2, rev << 4);
        // 64 SPIs
        mmio.poke32(GICD + gicd::TYPER, (1 << 18) | 1);
        let sysregs = FakeSysRegs::new();
        sysregs.set(SysReg::IdAa64pfr0El1, 1 << 24);
        (mmio, sysregs)
    }

    #[test]
    fn test_distributor_round_trip() {
        let (mmio, sysregs) = fakes();
        let driver = Gicv3Driver::driver_init(
            Gicv3Config::new(GICD, 0).with_rdistif_base_addrs(&TABLE),
            &mmio,
            &sysregs,
        );

        mmio.poke32(GICD + gicd::CTLR, (GicdCtlr::ARE_S | GicdCtlr::ENABLE_GRP0).bits());
        mmio.poke32(GICD + 0x84, 0xdead_beef);
        mmio.poke32(GICD + 0x104, 0x0000_f00d);
        mmio.poke32(GICD + 0x420, 0x1020_3040);
        mmio.poke32(GICD + 0xc0c, 0xaaaa_0000);
        mmio.poke32(GICD + 0xd04, 0x0100_0001);
        mmio.poke64(GICD + 0x6000 + 50 * 8, 0x0102);

        let mut ctx = Box::new(DistContext::new());
        driver.distif_save(&mut ctx);
        let saved = mmio.snapshot();

        assert_eq!(ctx.spi.igroupr[0], 0xdead_beef);
        assert_eq!(ctx.spi.ipriorityr[0], 0x1020_3040);
        assert_eq!(ctx.spi.irouter[18], 0x0102);

        driver.distif_init_restore(&ctx);

        assert!(same_contents(&mmio.snapshot(), &saved));
    }

    #[test]
    fn test_distributor_restore_order() {
        let (mmio, sysregs) = fakes();
        let driver = Gicv3Driver::driver_init(
            Gicv3Config::new(GICD, 0).with_rdistif_base_addrs(&TABLE),
            &mmio,
            &sysregs,
        );
        let ctx = Box::new(DistContext::new());
        mmio.clear_trace();

        driver.distif_init_restore(&ctx);

        let writes: Vec<usize> = mmio
            .trace()
            .iter()
            .filter_map(|access| match *access {
                Access::Write { addr, .. } => Some(addr - GICD),
                _ => None,
            })
            .collect();
        let pos = |offset: usize| writes.iter().position(|&a| a == offset).unwrap();

        assert_eq!(writes[0], gicd::CTLR);
        assert!(pos(0x84) < pos(0x6000 + 32 * 8));
        assert!(pos(0x6000 + 63 * 8) < pos(0x104));
        assert!(pos(0x104) < pos(0x204));
        assert!(pos(0x204) < pos(0x304));
        assert_eq!(*writes.last().unwrap(), gicd::CTLR);
    }

    struct CountingHooks {
        saves: AtomicUsize,
        restores: AtomicUsize,
    }

    impl DistifHooks for CountingHooks {
        fn pre_save(&self, _proc: usize) {
            self.saves.fetch_add(1, Ordering::Relaxed);
        }

        fn post_restore(&self, _proc: usize) {
            self.restores.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_redistributor_round_trip() {
        static HOOKS: CountingHooks = CountingHooks {
            saves: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
        };
        let (mmio, sysregs) = fakes();
        let driver = Gicv3Driver::driver_init(
            Gicv3Config::new(GICD, 0)
                .with_rdistif_base_addrs(&TABLE)
                .with_hooks(&HOOKS),
            &mmio,
            &sysregs,
        );

        mmio.poke32(GICR + gicr::CTLR, GicrCtlr::ENABLE_LPIS.bits());
        mmio.poke64(GICR + gicr::PROPBASER, 0x8000_0000_0f8f);
        mmio.poke64(GICR + gicr::PENDBASER, 0x4000_8000_0000);
        mmio.poke32(SGI + 0x80, 0xffff_00ff);
        mmio.poke32(SGI + 0x100, 0x0300_0000);
        mmio.poke32(SGI + 0x41c, 0x1010_2020);
        mmio.poke32(SGI + 0xc04, 0x0000_2000);
        mmio.poke32(SGI + 0xd00, 0x0000_0100);

        let mut ctx = RdistContext::new();
        driver.rdistif_save(0, &mut ctx);
        assert_eq!(HOOKS.saves.load(Ordering::Relaxed), 1);
        let saved = mmio.snapshot();

        // Power loss
        for addr in [SGI + 0x80, SGI + 0x100, SGI + 0x41c, SGI + 0xc04, SGI + 0xd00] {
            mmio.poke32(addr, 0);
        }
        mmio.poke32(GICR + gicr::CTLR, 0);
        mmio.poke64(GICR + gicr::PROPBASER, 0);
        mmio.clear_trace();

        driver.rdistif_init_restore(0, &ctx);

        assert_eq!(HOOKS.restores.load(Ordering::Relaxed), 1);
        // LPIs stay off until the table bases are back
        assert_eq!(mmio.writes_to(GICR + gicr::CTLR), vec![0, 1]);
        // Everything but the write-1-to-clear enable bank matches
        let mut restored = mmio.snapshot();
        let mut expected = saved;
        for i in 0..4 {
            restored.remove(&(SGI + 0x180 + i));
            expected.remove(&(SGI + 0x180 + i));
        }
        assert!(same_contents(&restored, &expected));
    }
}
