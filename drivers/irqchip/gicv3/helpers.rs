//! GICv3 distributor and redistributor helpers
//!
//! Stateless sequences shared by initialisation and save/restore. Each takes
//! the register frame it operates on, so the same code serves every core.

use core::sync::atomic::{AtomicUsize, Ordering};

use tock_registers::LocalRegisterCopy;

use super::regs::{
    gicd, gicr, mpidr_from_gicr_typer, redist_frame_size, GicrCtlr, GicrWaker, GICR_TYPER,
};
use crate::config::{FlushDcacheRange, InterruptGroup, InterruptProp, MpidrToCorePos};
use crate::drivers::irqchip::common::{
    is_sgi_ppi, EXT_INTID, MAX_SPI_ID, MIN_ESPI_ID, MIN_PPI_ID, MIN_SPI_ID,
};
use crate::drivers::irqchip::gic600;
use crate::drivers::irqchip::mmio::Mmio;
use crate::drivers::irqchip::regs::{GicdCtlr, RegBlock, RegFamily, GICD_TYPER};

/// One past the highest implemented SPI id
pub fn spi_limit<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) -> u32 {
    let typer = LocalRegisterCopy::<u32, GICD_TYPER::Register>::new(gicd_regs.read32(gicd::TYPER));
    ((typer.read(GICD_TYPER::ITLINES) + 1) << 5).min(MAX_SPI_ID + 1)
}

/// One past the highest implemented extended SPI id, or 0 when the range is
/// not implemented
pub fn espi_limit<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) -> u32 {
    if !EXT_INTID {
        return 0;
    }
    let typer = LocalRegisterCopy::<u32, GICD_TYPER::Register>::new(gicd_regs.read32(gicd::TYPER));
    if typer.is_set(GICD_TYPER::ESPI) {
        ((typer.read(GICD_TYPER::ESPI_RANGE) + 1) << 5) + MIN_ESPI_ID
    } else {
        0
    }
}

/// Number of 32-id SGI/PPI register banks of a redistributor
pub fn ppi_regs_num<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) -> usize {
    if !EXT_INTID {
        return 1;
    }
    let typer = LocalRegisterCopy::<u64, GICR_TYPER::Register>::new(gicr_regs.read64(gicr::TYPER));
    match typer.read(GICR_TYPER::PPINUM) {
        // PPInum values above 2 are reserved
        n @ 0..=2 => n as usize + 1,
        _ => 1,
    }
}

/// Wait for GICD_CTLR.RWP to clear
pub fn gicd_wait_for_pending_write<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) {
    gicd_regs.wait_clear(gicd::CTLR, GicdCtlr::RWP.bits());
}

/// Wait for GICR_CTLR.RWP to clear
pub fn gicr_wait_for_pending_write<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    gicr_regs.wait_clear(gicr::CTLR, GicrCtlr::RWP.bits());
}

/// Wait for GICR_CTLR.UWP to clear
pub fn gicr_wait_for_upstream_pending_write<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    gicr_regs.wait_clear(gicr::CTLR, GicrCtlr::UWP.bits());
}

/// Set `bits` in GICD_CTLR, optionally waiting for the write to land
pub fn gicd_set_ctlr<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>, bits: GicdCtlr, rwp: bool) {
    let ctlr = GicdCtlr::from_bits_retain(gicd_regs.read32(gicd::CTLR));
    gicd_regs.write32(gicd::CTLR, (ctlr | bits).bits());
    if rwp {
        gicd_wait_for_pending_write(gicd_regs);
    }
}

/// Clear `bits` in GICD_CTLR, optionally waiting for the write to land
pub fn gicd_clr_ctlr<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>, bits: GicdCtlr, rwp: bool) {
    let ctlr = GicdCtlr::from_bits_retain(gicd_regs.read32(gicd::CTLR));
    gicd_regs.write32(gicd::CTLR, (ctlr - bits).bits());
    if rwp {
        gicd_wait_for_pending_write(gicd_regs);
    }
}

/// Record the frame address of every redistributor in the region starting
/// at `gicr_base`
///
/// Frames whose core index falls outside `table` are skipped. Returns the
/// number of frames walked.
pub fn rdistif_base_addrs_probe<M: Mmio + ?Sized>(
    mmio: &M,
    table: &[AtomicUsize],
    gicr_base: usize,
    mpidr_to_core_pos: Option<MpidrToCorePos>,
    flush_dcache_range: Option<FlushDcacheRange>,
) -> usize {
    let mut frame = gicr_base;
    let mut frames = 0;

    loop {
        let raw = mmio.read64(frame + gicr::TYPER);
        let typer = LocalRegisterCopy::<u64, GICR_TYPER::Register>::new(raw);
        let proc = match mpidr_to_core_pos {
            Some(core_pos) => core_pos(mpidr_from_gicr_typer(raw)),
            None => typer.read(GICR_TYPER::PROCESSOR_NUMBER) as usize,
        };

        if let Some(slot) = table.get(proc) {
            slot.store(frame, Ordering::Release);
        }
        frames += 1;

        if typer.is_set(GICR_TYPER::LAST) {
            break;
        }
        frame += redist_frame_size(raw);
    }

    if let Some(flush) = flush_dcache_range {
        flush(table.as_ptr() as usize, core::mem::size_of_val(table));
    }
    log::debug!("GICv3: probed {} redistributor frames at {:#x}", frames, gicr_base);
    frames
}

/// Tell the redistributor its core is awake
///
/// Unbounded: the handshake completes in bounded time by architecture.
pub fn rdistif_mark_core_awake<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    let waker = GicrWaker::from_bits_retain(gicr_regs.read32(gicr::WAKER));
    if !waker.contains(GicrWaker::PROCESSOR_SLEEP) {
        return;
    }

    // ProcessorSleep may only be cleared once ChildrenAsleep reads as one
    if !waker.contains(GicrWaker::CHILDREN_ASLEEP) {
        log::warn!(
            "GICv3: redistributor {:#x} asleep with children awake, waiting",
            gicr_regs.base()
        );
        while gicr_regs.read32(gicr::WAKER) & GicrWaker::CHILDREN_ASLEEP.bits() == 0 {
            core::hint::spin_loop();
        }
    }

    gicr_regs.mmio().clrbits32(
        gicr_regs.base() + gicr::WAKER,
        GicrWaker::PROCESSOR_SLEEP.bits(),
    );
    gicr_regs.wait_clear(gicr::WAKER, GicrWaker::CHILDREN_ASLEEP.bits());
}

/// Tell the redistributor its core is going to sleep
pub fn rdistif_mark_core_asleep<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    gicr_regs.mmio().setbits32(
        gicr_regs.base() + gicr::WAKER,
        GicrWaker::PROCESSOR_SLEEP.bits(),
    );
    while gicr_regs.read32(gicr::WAKER) & GicrWaker::CHILDREN_ASLEEP.bits() == 0 {
        core::hint::spin_loop();
    }

    if cfg!(feature = "gic600_errata_wa_2384374") && gic600::needs_power_mgmt(gicr_regs) {
        gic600::apply_errata_wa_2384374(gicr_regs);
    }
}

fn for_each_reg(family: &RegFamily, first: u32, limit: u32, mut f: impl FnMut(u32)) {
    let mut id = first;
    while id < limit {
        f(id);
        id += family.ids_per_reg();
    }
}

/// Make every SPI and extended SPI Group 1 Non-secure, default priority and
/// level-triggered
pub fn spis_config_defaults<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) {
    let num_ints = spi_limit(gicd_regs);
    let num_eints = espi_limit(gicd_regs);

    log::debug!("GICv3: maximum SPI INTID supported: {}", num_ints - 1);
    if num_eints != 0 {
        log::debug!("GICv3: maximum extended SPI INTID: {}", num_eints - 1);
    }

    let ranges = [(MIN_SPI_ID, num_ints), (MIN_ESPI_ID, num_eints)];
    for &(first, limit) in ranges.iter() {
        for_each_reg(&gicd::IGROUPR, first, limit, |id| {
            gicd_regs.write_reg(&gicd::IGROUPR, id, !0)
        });
        for_each_reg(&gicd::IPRIORITYR, first, limit, |id| {
            gicd_regs.write_reg(&gicd::IPRIORITYR, id, gicd::IPRIORITYR_DEF_VAL)
        });
        for_each_reg(&gicd::ICFGR, first, limit, |id| {
            gicd_regs.write_reg(&gicd::ICFGR, id, 0)
        });
    }
}

/// Group enable bit a secure interrupt of `group` needs in GICD_CTLR
pub(super) fn secure_group_enable(prop: &InterruptProp) -> GicdCtlr {
    match prop.group {
        InterruptGroup::Group0 => GicdCtlr::ENABLE_GRP0,
        InterruptGroup::Group1Secure => GicdCtlr::ENABLE_GRP1S,
        InterruptGroup::Group1NonSecure => {
            crate::fatal!("GICv3: interrupt {} configured as Group 1 Non-secure", prop.id)
        }
    }
}

/// Make every SGI and PPI of a redistributor Group 1 Non-secure, default
/// priority and level-triggered, with all of them disabled
pub fn ppi_sgi_config_defaults<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>, sgi_regs: RegBlock<'_, M>) {
    let ppi_regs = ppi_regs_num(gicr_regs);

    // Disable all SGIs and PPIs before configuring them
    for i in 0..ppi_regs {
        sgi_regs.write32(gicr::ICENABLER.offset + i * 4, !0);
    }
    gicr_wait_for_pending_write(gicr_regs);

    for i in 0..ppi_regs {
        sgi_regs.write32(gicr::IGROUPR.offset + i * 4, !0);
    }
    for i in 0..ppi_regs * 8 {
        sgi_regs.write32(gicr::IPRIORITYR.offset + i * 4, gicd::IPRIORITYR_DEF_VAL);
    }
    // GICR_ICFGR0 holds the SGIs, which are always edge-triggered
    for i in (MIN_PPI_ID as usize / 16)..ppi_regs * 2 {
        sgi_regs.write32(gicr::ICFGR.offset + i * 4, 0);
    }
}

/// Apply the secure SGI/PPI properties to a redistributor
///
/// Returns the GICD_CTLR group enables the configured interrupts need.
pub fn secure_ppi_sgi_config_props<M: Mmio + ?Sized>(
    sgi_regs: RegBlock<'_, M>,
    props: &[InterruptProp],
) -> GicdCtlr {
    let mut ctlr_enable = GicdCtlr::empty();

    for prop in props.iter().filter(|p| is_sgi_ppi(p.id)) {
        let id = prop.id;
        sgi_regs.clr_bit(&gicr::IGROUPR, id);

        let enable = secure_group_enable(prop);
        if enable == GicdCtlr::ENABLE_GRP1S {
            sgi_regs.set_bit(&gicr::IGRPMODR, id);
        } else {
            sgi_regs.clr_bit(&gicr::IGRPMODR, id);
        }
        ctlr_enable |= enable;

        sgi_regs.set_byte(&gicr::IPRIORITYR, id, prop.priority.into());

        // SGI trigger configuration is fixed
        if id >= MIN_PPI_ID {
            sgi_regs.set_field(&gicr::ICFGR, id, prop.trigger.icfgr_bits());
        }

        sgi_regs.write_bit(&gicr::ISENABLER, id);
    }

    ctlr_enable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Trigger;
    use crate::drivers::irqchip::testing::FakeMmio;

    const GICR: usize = 0x2f10_0000;

    fn typer(proc: u64, mpidr_aff: u64, last: bool) -> u64 {
        (mpidr_aff << 32) | (proc << 8) | if last { 1 << 4 } else { 0 }
    }

    #[test]
    fn test_spi_limit_clamped() {
        let mmio = FakeMmio::new();
        let gicd_regs = RegBlock::new(&mmio, 0);
        mmio.poke32(gicd::TYPER, 0x1f);
        assert_eq!(spi_limit(gicd_regs), 1020);
        mmio.poke32(gicd::TYPER, 0x2);
        assert_eq!(spi_limit(gicd_regs), 96);
    }

    #[test]
    fn test_espi_limit() {
        let mmio = FakeMmio::new();
        let gicd_regs = RegBlock::new(&mmio, 0);
        mmio.poke32(gicd::TYPER, (1 << 8) | (3 << 27));
        let expected = if EXT_INTID { 4096 + 128 } else { 0 };
        assert_eq!(espi_limit(gicd_regs), expected);
        mmio.poke32(gicd::TYPER, 3 << 27);
        assert_eq!(espi_limit(gicd_regs), 0);
    }

    #[test]
    fn test_probe_stops_at_last_frame() {
        static TABLE: [AtomicUsize; 4] = [
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
        ];
        let mmio = FakeMmio::new();
        for n in 0..3u64 {
            let frame = GICR + n as usize * gicr::V3_FRAME_SIZE;
            mmio.poke64(frame + gicr::TYPER, typer(n, n, n == 2));
        }
        // A frame after the last one must never be read
        mmio.poke64(GICR + 3 * gicr::V3_FRAME_SIZE + gicr::TYPER, typer(3, 3, true));

        let frames = rdistif_base_addrs_probe(&mmio, &TABLE, GICR, None, None);

        assert_eq!(frames, 3);
        for n in 0..3 {
            assert_eq!(TABLE[n].load(Ordering::Relaxed), GICR + n * gicr::V3_FRAME_SIZE);
        }
        assert_eq!(TABLE[3].load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_probe_ignores_cores_beyond_table() {
        static TABLE: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
        let mmio = FakeMmio::new();
        for n in 0..4u64 {
            let frame = GICR + n as usize * gicr::V3_FRAME_SIZE;
            mmio.poke64(frame + gicr::TYPER, typer(3 - n, 0, n == 3));
        }

        let frames = rdistif_base_addrs_probe(&mmio, &TABLE, GICR, None, None);

        assert_eq!(frames, 4);
        assert_eq!(TABLE[1].load(Ordering::Relaxed), GICR + 2 * gicr::V3_FRAME_SIZE);
        assert_eq!(TABLE[0].load(Ordering::Relaxed), GICR + 3 * gicr::V3_FRAME_SIZE);
    }

    #[test]
    fn test_probe_uses_core_pos_mapping() {
        static TABLE: [AtomicUsize; 4] = [
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
        ];
        fn core_pos(mpidr: u64) -> usize {
            ((mpidr >> 8) & 0xff) as usize
        }
        let mmio = FakeMmio::new();
        mmio.poke64(GICR + gicr::TYPER, typer(0, 0x100, false));
        mmio.poke64(GICR + gicr::V3_FRAME_SIZE + gicr::TYPER, typer(1, 0x300, true));

        rdistif_base_addrs_probe(&mmio, &TABLE, GICR, Some(core_pos), None);

        assert_eq!(TABLE[1].load(Ordering::Relaxed), GICR);
        assert_eq!(TABLE[3].load(Ordering::Relaxed), GICR + gicr::V3_FRAME_SIZE);
    }

    #[test]
    fn test_mark_awake_noop_when_awake() {
        let mmio = FakeMmio::new();
        let gicr_regs = RegBlock::new(&mmio, GICR);
        rdistif_mark_core_awake(gicr_regs);
        assert!(mmio.writes_to(GICR + gicr::WAKER).is_empty());
    }

    #[test]
    fn test_ppi_sgi_defaults() {
        let mmio = FakeMmio::new();
        let gicr_regs = RegBlock::new(&mmio, GICR);
        let sgi_regs = RegBlock::new(&mmio, GICR + gicr::SGI_BASE);
        mmio.poke64(GICR + gicr::TYPER, 0);

        ppi_sgi_config_defaults(gicr_regs, sgi_regs);

        let sgi = GICR + gicr::SGI_BASE;
        assert_eq!(mmio.writes_to(sgi + 0x180), vec![0xffff_ffff]);
        assert_eq!(mmio.peek32(sgi + 0x80), 0xffff_ffff);
        for i in 0..8 {
            assert_eq!(mmio.peek32(sgi + 0x400 + i * 4), 0x8080_8080);
        }
        assert!(mmio.writes_to(sgi + 0xc00).is_empty());
        assert_eq!(mmio.writes_to(sgi + 0xc04), vec![0]);
    }

    #[test]
    fn test_secure_ppi_sgi_props() {
        let mmio = FakeMmio::new();
        let sgi_regs = RegBlock::new(&mmio, GICR + gicr::SGI_BASE);
        let sgi = GICR + gicr::SGI_BASE;
        mmio.poke32(sgi + 0x80, !0);
        let props = [
            InterruptProp::new(8, 0x10, InterruptGroup::Group1Secure, Trigger::Edge),
            InterruptProp::new(29, 0x20, InterruptGroup::Group0, Trigger::Edge),
            InterruptProp::new(40, 0x20, InterruptGroup::Group0, Trigger::Edge),
        ];

        let enable = secure_ppi_sgi_config_props(sgi_regs, &props);

        assert_eq!(enable, GicdCtlr::ENABLE_GRP0 | GicdCtlr::ENABLE_GRP1S);
        assert_eq!(mmio.peek32(sgi + 0x80), !((1 << 8) | (1 << 29)));
        assert_eq!(mmio.peek32(sgi + 0xd00), 1 << 8);
        assert_eq!(mmio.peek8(sgi + 0x408), 0x10);
        assert_eq!(mmio.peek32(sgi + 0xc00), 0);
        assert_eq!(mmio.peek32(sgi + 0xc04), 0x2 << 26);
        assert_eq!(mmio.writes_to(sgi + 0x100), vec![1 << 8, 1 << 29]);
    }
}
