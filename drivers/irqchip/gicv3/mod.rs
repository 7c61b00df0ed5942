//! GICv3 driver
//!
//! Drives the distributor, the redistributors and the system register CPU
//! interface of a GICv3/GICv3.1/GICv4 from EL3. Secure interrupts are Group 0
//! or Group 1 Secure; everything else stays Group 1 Non-secure.
//!
//! The driver is published once by the boot core and then shared read-only:
//! per-core operations only touch the caller's redistributor frame and
//! system registers, and the only read-modify-write of shared distributor
//! state (group membership) is serialised by `gic_lock`.
//!
//! Reference: ARM IHI 0069 (GICv3/v4 architecture specification)

pub mod context;
pub mod cpuif;
pub mod helpers;
pub mod its;
pub mod regs;

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;
use tock_registers::LocalRegisterCopy;

use self::helpers::{gicd_clr_ctlr, gicd_set_ctlr, gicd_wait_for_pending_write, gicr_wait_for_pending_write};
use self::regs::{
    gicd, gicr, irouter_val_from_mpidr, mpidr_from_gicr_typer, redist_frame_size, RoutingMode,
    GICR_TYPER, IROUTER_IRM_SHIFT,
};
use super::common::{self, is_sgi_ppi, is_spi, GicVersion, IntidRange, MIN_LPI_ID, MIN_PPI_ID};
use super::gic600;
use super::mmio::Mmio;
use super::regs::{GicdCtlr, RegBlock, GICD_TYPER};
use crate::arch::arm64::mpidr::AFFINITY_MASK;
use crate::arch::arm64::sysreg::{id_aa64pfr0, SysReg, SysRegs};
use crate::arch::barrier::dsbishst;
use crate::config::{Gicv3Config, InterruptGroup, Trigger};
use crate::{fatal, Error, Result};

pub use self::context::{DistContext, RdistContext};
pub use self::its::ItsContext;

/// Published GICv3 driver
pub struct Gicv3Driver<'a, M: Mmio, S: SysRegs> {
    mmio: M,
    sysregs: S,
    config: Gicv3Config<'a>,
    version: GicVersion,
    gicv2_compat: bool,
    gic_lock: Mutex<()>,
}

impl<'a, M: Mmio, S: SysRegs> Gicv3Driver<'a, M, S> {
    /// Validate the configuration against the hardware and publish it
    ///
    /// Must be called once, by the boot core, before any other operation.
    /// When a redistributor region base is configured every frame of the
    /// region is probed into the redistributor table.
    pub fn driver_init(config: Gicv3Config<'a>, mmio: M, sysregs: S) -> Self {
        assert!(config.gicd_base != 0, "GICv3: distributor base not set");
        assert!(
            !config.rdistif_base_addrs.is_empty(),
            "GICv3: empty redistributor table"
        );

        let pfr0 = sysregs.read(SysReg::IdAa64pfr0El1);
        if (pfr0 >> id_aa64pfr0::GIC_SHIFT) & id_aa64pfr0::GIC_MASK == 0 {
            fatal!("GICv3: system register interface not implemented");
        }

        let rev = common::arch_rev(&mmio, config.gicd_base + gicd::PIDR2);
        let version = match GicVersion::from_arch_rev(rev) {
            Some(GicVersion::V4) if cfg!(feature = "gic_v4_extn") => GicVersion::V4,
            Some(v @ (GicVersion::V3 | GicVersion::V4)) if !cfg!(feature = "gic_v4_extn") => v,
            _ => fatal!("GICv3: unsupported GIC architecture revision {}", rev),
        };

        if cfg!(feature = "gic_v4_extn") {
            let typer = LocalRegisterCopy::<u32, GICD_TYPER::Register>::new(
                mmio.read32(config.gicd_base + gicd::TYPER),
            );
            if !typer.is_set(GICD_TYPER::DVIS) {
                fatal!("GICv4: direct virtual LPI injection not supported");
            }
        }

        if cfg!(feature = "gic600") {
            gic600::check_errata_applies(RegBlock::new(&mmio, config.gicd_base));
        }

        // ARE_S resets to zero when legacy operation is supported
        let ctlr = GicdCtlr::from_bits_retain(mmio.read32(config.gicd_base + gicd::CTLR));
        let gicv2_compat = !ctlr.contains(GicdCtlr::ARE_S);

        if config.gicr_base != 0 {
            helpers::rdistif_base_addrs_probe(
                &mmio,
                config.rdistif_base_addrs,
                config.gicr_base,
                config.mpidr_to_core_pos,
                config.flush_dcache_range,
            );
        }

        log::info!(
            "GICv{} with{} legacy support detected",
            if version == GicVersion::V4 { 4 } else { 3 },
            if gicv2_compat { "" } else { "out" }
        );
        log::info!("ARM GICv3 driver initialized in EL3");

        Self {
            mmio,
            sysregs,
            config,
            version,
            gicv2_compat,
            gic_lock: Mutex::new(()),
        }
    }

    /// Detected architecture revision
    pub fn version(&self) -> GicVersion {
        self.version
    }

    /// Whether the distributor supports legacy (GICv2) operation
    pub fn gicv2_compat(&self) -> bool {
        self.gicv2_compat
    }

    /// Driver configuration
    pub fn config(&self) -> &Gicv3Config<'a> {
        &self.config
    }

    pub(crate) fn mmio(&self) -> &M {
        &self.mmio
    }

    pub(crate) fn sysregs(&self) -> &S {
        &self.sysregs
    }

    /// Distributor of the boot chip
    pub(crate) fn gicd(&self) -> RegBlock<'_, M> {
        RegBlock::new(&self.mmio, self.config.gicd_base)
    }

    /// Distributor owning SPI `id`
    fn gicd_for(&self, id: u32) -> RegBlock<'_, M> {
        let base = match self.config.multichip {
            Some(topology) => gic600::multichip::gicd_base_for_spi(topology, id),
            None => self.config.gicd_base,
        };
        RegBlock::new(&self.mmio, base)
    }

    /// Redistributor frame address of core `proc`
    pub fn gicr_base(&self, proc: usize) -> usize {
        let table = self.config.rdistif_base_addrs;
        assert!(proc < table.len(), "GICv3: core {} out of range", proc);
        let base = table[proc].load(Ordering::Acquire);
        assert!(base != 0, "GICv3: no redistributor for core {}", proc);
        base
    }

    /// RD frame of core `proc`
    pub(crate) fn gicr(&self, proc: usize) -> RegBlock<'_, M> {
        RegBlock::new(&self.mmio, self.gicr_base(proc))
    }

    /// SGI/PPI frame of core `proc`
    pub(crate) fn gicr_sgi(&self, proc: usize) -> RegBlock<'_, M> {
        RegBlock::new(&self.mmio, self.gicr_base(proc) + gicr::SGI_BASE)
    }

    fn core_pos(&self, mpidr: u64, typer: u64) -> usize {
        match self.config.mpidr_to_core_pos {
            Some(core_pos) => core_pos(mpidr),
            None => LocalRegisterCopy::<u64, GICR_TYPER::Register>::new(typer)
                .read(GICR_TYPER::PROCESSOR_NUMBER) as usize,
        }
    }

    /// Find the calling core's redistributor by walking the frames from
    /// `gicr_frame`
    ///
    /// Each core records only its own frame, so frames of one region need
    /// not be contiguous. Succeeds without rescanning once the frame is
    /// known.
    pub fn rdistif_probe(&self, gicr_frame: usize) -> Result<()> {
        assert!(gicr_frame != 0, "GICv3: redistributor frame not set");

        let mpidr_self = self.sysregs.read(SysReg::MpidrEl1) & AFFINITY_MASK;
        let mut frame = gicr_frame;

        loop {
            let typer = self.mmio.read64(frame + gicr::TYPER);
            let mpidr = mpidr_from_gicr_typer(typer);

            if mpidr == mpidr_self {
                let proc = self.core_pos(mpidr, typer);
                let table = self.config.rdistif_base_addrs;
                assert!(proc < table.len(), "GICv3: core {} out of range", proc);

                let slot = &table[proc];
                if slot.load(Ordering::Acquire) != 0 {
                    return Ok(());
                }
                slot.store(frame, Ordering::Release);
                if let Some(flush) = self.config.flush_dcache_range {
                    flush(slot as *const AtomicUsize as usize, core::mem::size_of_val(slot));
                }
                log::debug!("GICv3: redistributor {:#x} found for core {}", frame, proc);
                return Ok(());
            }

            if LocalRegisterCopy::<u64, GICR_TYPER::Register>::new(typer).is_set(GICR_TYPER::LAST) {
                return Err(Error::RedistributorNotFound);
            }
            frame += redist_frame_size(typer);
        }
    }

    /// Global distributor initialisation
    pub fn distif_init(&self) {
        let gicd_regs = self.gicd();

        // Group enables must be clear before ARE_S changes
        gicd_clr_ctlr(gicd_regs, GicdCtlr::ALL_GROUPS, true);
        gicd_set_ctlr(gicd_regs, GicdCtlr::ARE_S | GicdCtlr::ARE_NS, true);

        helpers::spis_config_defaults(gicd_regs);
        let enable = self.secure_spis_config_props();

        gicd_set_ctlr(gicd_regs, enable, true);
    }

    /// Apply the secure SPI properties, routing every secure SPI to the
    /// calling core. Returns the group enables they need.
    fn secure_spis_config_props(&self) -> GicdCtlr {
        let mut ctlr_enable = GicdCtlr::empty();
        let mpidr = self.sysregs.read(SysReg::MpidrEl1);
        let route = irouter_val_from_mpidr(mpidr, RoutingMode::Pe);

        for prop in self.config.interrupt_props.iter().filter(|p| is_spi(p.id)) {
            let id = prop.id;
            let gicd_regs = self.gicd_for(id);

            gicd_regs.clr_bit(&gicd::IGROUPR, id);

            let enable = helpers::secure_group_enable(prop);
            if enable == GicdCtlr::ENABLE_GRP1S {
                gicd_regs.set_bit(&gicd::IGRPMODR, id);
            } else {
                gicd_regs.clr_bit(&gicd::IGRPMODR, id);
            }
            ctlr_enable |= enable;

            gicd_regs.set_field(&gicd::ICFGR, id, prop.trigger.icfgr_bits());
            gicd_regs.set_byte(&gicd::IPRIORITYR, id, prop.priority.into());
            gicd_regs.write_reg64(&gicd::IROUTER, id, route);
            gicd_regs.write_bit(&gicd::ISENABLER, id);
        }

        ctlr_enable
    }

    /// Per-core redistributor initialisation
    pub fn rdistif_init(&self, proc: usize) {
        let gicd_regs = self.gicd();
        let ctlr = GicdCtlr::from_bits_retain(gicd_regs.read32(gicd::CTLR));
        assert!(
            ctlr.contains(GicdCtlr::ARE_S),
            "GICv3: distributor not initialised before redistributor {}",
            proc
        );

        self.rdistif_on(proc);

        helpers::ppi_sgi_config_defaults(self.gicr(proc), self.gicr_sgi(proc));
        let enable =
            helpers::secure_ppi_sgi_config_props(self.gicr_sgi(proc), self.config.interrupt_props);

        if !ctlr.contains(enable) {
            gicd_set_ctlr(gicd_regs, enable, true);
        }
    }

    /// Power the redistributor of core `proc` on, where it is power gated
    pub fn rdistif_on(&self, proc: usize) {
        let gicr_regs = self.gicr(proc);
        if cfg!(feature = "gic600") && gic600::needs_power_mgmt(gicr_regs) {
            gic600::power_on(gicr_regs);
        }
    }

    /// Power the redistributor of core `proc` off, where it is power gated
    pub fn rdistif_off(&self, proc: usize) {
        let gicr_regs = self.gicr(proc);
        if cfg!(feature = "gic600") && gic600::needs_power_mgmt(gicr_regs) {
            gic600::power_off(gicr_regs);
        }
    }

    fn check_intid(&self, id: u32) -> IntidRange {
        match IntidRange::of(id) {
            range @ (IntidRange::Sgi
            | IntidRange::Ppi
            | IntidRange::Eppi
            | IntidRange::Spi
            | IntidRange::Espi) => range,
            _ => fatal!("GICv3: invalid interrupt {}", id),
        }
    }

    /// Security group of `id` as seen by core `proc`
    pub fn get_interrupt_type(&self, id: u32, proc: usize) -> InterruptGroup {
        // LPIs are always Group 1 Non-secure
        if id >= MIN_LPI_ID {
            return InterruptGroup::Group1NonSecure;
        }
        self.check_intid(id);

        let (igroup, grpmod) = if is_sgi_ppi(id) {
            let sgi_regs = self.gicr_sgi(proc);
            (
                sgi_regs.get_bit(&gicr::IGROUPR, id),
                sgi_regs.get_bit(&gicr::IGRPMODR, id),
            )
        } else {
            let gicd_regs = self.gicd_for(id);
            (
                gicd_regs.get_bit(&gicd::IGROUPR, id),
                gicd_regs.get_bit(&gicd::IGRPMODR, id),
            )
        };

        match (igroup, grpmod) {
            (true, _) => InterruptGroup::Group1NonSecure,
            (false, true) => InterruptGroup::Group1Secure,
            (false, false) => InterruptGroup::Group0,
        }
    }

    /// Active state of `id`
    pub fn get_interrupt_active(&self, id: u32, proc: usize) -> bool {
        self.check_intid(id);
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).get_bit(&gicr::ISACTIVER, id)
        } else {
            self.gicd_for(id).get_bit(&gicd::ISACTIVER, id)
        }
    }

    /// Enable forwarding of `id`
    pub fn enable_interrupt(&self, id: u32, proc: usize) {
        self.check_intid(id);
        // Memory the handler depends on must be visible before the interrupt
        // can fire
        dsbishst();
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).write_bit(&gicr::ISENABLER, id);
        } else {
            self.gicd_for(id).write_bit(&gicd::ISENABLER, id);
        }
    }

    /// Disable forwarding of `id`, waiting until the disable has taken effect
    pub fn disable_interrupt(&self, id: u32, proc: usize) {
        self.check_intid(id);
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).write_bit(&gicr::ICENABLER, id);
            gicr_wait_for_pending_write(self.gicr(proc));
        } else {
            let gicd_regs = self.gicd_for(id);
            gicd_regs.write_bit(&gicd::ICENABLER, id);
            gicd_wait_for_pending_write(gicd_regs);
        }
        dsbishst();
    }

    /// Set the priority of `id`; only the low 8 bits are used
    pub fn set_interrupt_priority(&self, id: u32, proc: usize, priority: u32) {
        self.check_intid(id);
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).set_byte(&gicr::IPRIORITYR, id, priority);
        } else {
            self.gicd_for(id).set_byte(&gicd::IPRIORITYR, id, priority);
        }
    }

    /// Move `id` to `group`
    pub fn set_interrupt_type(&self, id: u32, proc: usize, group: InterruptGroup) {
        self.check_intid(id);
        let (igroup, grpmod) = match group {
            InterruptGroup::Group1Secure => (false, true),
            InterruptGroup::Group0 => (false, false),
            InterruptGroup::Group1NonSecure => (true, false),
        };

        if is_sgi_ppi(id) {
            let sgi_regs = self.gicr_sgi(proc);
            if igroup {
                sgi_regs.set_bit(&gicr::IGROUPR, id);
            } else {
                sgi_regs.clr_bit(&gicr::IGROUPR, id);
            }
            if grpmod {
                sgi_regs.set_bit(&gicr::IGRPMODR, id);
            } else {
                sgi_regs.clr_bit(&gicr::IGRPMODR, id);
            }
        } else {
            let gicd_regs = self.gicd_for(id);
            let _guard = self.gic_lock.lock();
            if igroup {
                gicd_regs.set_bit(&gicd::IGROUPR, id);
            } else {
                gicd_regs.clr_bit(&gicd::IGROUPR, id);
            }
            if grpmod {
                gicd_regs.set_bit(&gicd::IGRPMODR, id);
            } else {
                gicd_regs.clr_bit(&gicd::IGRPMODR, id);
            }
        }
    }

    /// Make `id` pending. SGIs are rejected.
    pub fn set_interrupt_pending(&self, id: u32, proc: usize) {
        assert!(id >= MIN_PPI_ID, "GICv3: cannot set SGI {} pending", id);
        self.check_intid(id);
        // Updates depending on the out of band trigger must be observed
        // before the interrupt becomes pending
        dsbishst();
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).write_bit(&gicr::ISPENDR, id);
        } else {
            self.gicd_for(id).write_bit(&gicd::ISPENDR, id);
        }
    }

    /// Clear the pending state of `id`. SGIs are rejected.
    pub fn clear_interrupt_pending(&self, id: u32, proc: usize) {
        assert!(id >= MIN_PPI_ID, "GICv3: cannot clear pending SGI {}", id);
        self.check_intid(id);
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).write_bit(&gicr::ICPENDR, id);
        } else {
            self.gicd_for(id).write_bit(&gicd::ICPENDR, id);
        }
        dsbishst();
    }

    /// Program the trigger configuration of `id`
    pub fn interrupt_set_cfg(&self, id: u32, proc: usize, trigger: Trigger) {
        self.check_intid(id);
        if is_sgi_ppi(id) {
            self.gicr_sgi(proc).set_field(&gicr::ICFGR, id, trigger.icfgr_bits());
        } else {
            self.gicd_for(id).set_field(&gicd::ICFGR, id, trigger.icfgr_bits());
        }
    }

    /// Route SPI `id` to the PE `mpidr`, or to any PE
    ///
    /// Aborts when "any" routing was requested but the distributor does not
    /// implement 1-of-N distribution.
    pub fn set_spi_routing(&self, id: u32, mode: RoutingMode, mpidr: u64) {
        assert!(is_spi(id), "GICv3: cannot route interrupt {}", id);

        let gicd_regs = self.gicd_for(id);
        gicd_regs.write_reg64(&gicd::IROUTER, id, irouter_val_from_mpidr(mpidr, mode));

        if mode == RoutingMode::Any {
            let router = gicd_regs.read_reg64(&gicd::IROUTER, id);
            if (router >> IROUTER_IRM_SHIFT) & 1 == 0 {
                fatal!("GICv3 implementation doesn't support routing ANY");
            }
        }
    }
}
