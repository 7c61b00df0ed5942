//! GICv2 driver
//!
//! Drives a GICv2 (or a GICv1 with Security Extensions) from the secure side:
//! Group 0 is the secure group and is signalled as FIQ, everything else is
//! left in Group 1 for the normal world.
//!
//! Reference: ARM IHI 0048B (GICv2 architecture specification)

use core::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;
use spin::Mutex;
use tock_registers::LocalRegisterCopy;

use super::common::{
    self, GicVersion, GICV2_PENDING_G1_INTID, MAX_SPI_ID, MIN_PPI_ID, MIN_SPI_ID,
};
use super::mmio::Mmio;
use super::regs::{gicd, GicdCtlr, RegBlock, GICD_TYPER, GIC_PRI_MASK};
use crate::arch::barrier::{dmbishst, dsbishst};
use crate::config::{Gicv2Config, InterruptGroup, Trigger};
use crate::fatal;

/// GICv2 distributor registers not shared with GICv3
pub mod gicd_v2 {
    /// GICD_PIDR2
    pub const PIDR2: usize = 0xFE8;
}

/// GICv2 CPU interface register offsets
pub mod gicc {
    /// GICC_CTLR - CPU Interface Control Register
    pub const CTLR: usize = 0x00;
    /// GICC_PMR - Interrupt Priority Mask Register
    pub const PMR: usize = 0x04;
    /// GICC_IAR - Interrupt Acknowledge Register
    pub const IAR: usize = 0x0C;
    /// GICC_EOIR - End of Interrupt Register
    pub const EOIR: usize = 0x10;
    /// GICC_RPR - Running Priority Register
    pub const RPR: usize = 0x14;
    /// GICC_HPPIR - Highest Priority Pending Interrupt Register
    pub const HPPIR: usize = 0x18;
    /// GICC_AHPPIR - Aliased Highest Priority Pending Interrupt Register
    pub const AHPPIR: usize = 0x28;
}

bitflags! {
    /// GICC_CTLR (secure view)
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GiccCtlr: u32 {
        /// Enable Group 0
        const ENABLE_G0 = 1 << 0;
        /// Enable Group 1
        const ENABLE_G1 = 1 << 1;
        /// Signal Group 0 as FIQ
        const FIQ_EN = 1 << 3;
        /// FIQ bypass disable, Group 0
        const FIQ_BYP_DIS_GRP0 = 1 << 5;
        /// IRQ bypass disable, Group 0
        const IRQ_BYP_DIS_GRP0 = 1 << 6;
        /// FIQ bypass disable, Group 1
        const FIQ_BYP_DIS_GRP1 = 1 << 7;
        /// IRQ bypass disable, Group 1
        const IRQ_BYP_DIS_GRP1 = 1 << 8;
    }
}

/// Maximum number of PEs a GICv2 can target
pub const GICV2_MAX_TARGET_PE: usize = 8;

/// GICD_SGIR target list filter: use the target list field
pub const SGIR_TGT_SPECIFIC: u32 = 0;

/// Mask of the id field of GICC_IAR/GICC_HPPIR
pub const GICV2_INT_ID_MASK: u32 = 0x3ff;

/// Build a GICD_SGIR value
#[inline]
pub const fn sgir_value(filter: u32, targets: u32, sgi: u32) -> u32 {
    ((filter & 0x3) << 24) | ((targets & 0xff) << 16) | (sgi & 0xf)
}

/// Published GICv2 driver
pub struct Gicv2Driver<'a, M: Mmio> {
    mmio: M,
    config: Gicv2Config<'a>,
    version: GicVersion,
    gic_lock: Mutex<()>,
}

impl<'a, M: Mmio> Gicv2Driver<'a, M> {
    /// Validate the configuration against the hardware and publish it
    ///
    /// Must be called once, by the boot core, before any other operation.
    pub fn driver_init(config: Gicv2Config<'a>, mmio: M) -> Self {
        assert!(config.gicd_base != 0, "GICv2: distributor base not set");
        assert!(config.gicc_base != 0, "GICv2: CPU interface base not set");

        let rev = common::arch_rev(&mmio, config.gicd_base + gicd_v2::PIDR2);
        let version = match GicVersion::from_arch_rev(rev) {
            Some(v @ (GicVersion::V1 | GicVersion::V2)) => v,
            _ => fatal!("GICv2: unsupported GIC architecture revision {}", rev),
        };

        for prop in config.interrupt_props {
            assert!(
                prop.group == InterruptGroup::Group0,
                "GICv2: interrupt {} must be Group 0",
                prop.id
            );
        }

        log::info!("ARM GICv2 driver initialized ({:?})", version);
        Self {
            mmio,
            config,
            version,
            gic_lock: Mutex::new(()),
        }
    }

    /// Detected architecture revision
    pub fn version(&self) -> GicVersion {
        self.version
    }

    fn gicd(&self) -> RegBlock<'_, M> {
        RegBlock::new(&self.mmio, self.config.gicd_base)
    }

    fn gicc(&self) -> RegBlock<'_, M> {
        RegBlock::new(&self.mmio, self.config.gicc_base)
    }

    /// Number of implemented interrupt ids
    fn num_ints(&self) -> u32 {
        let typer = LocalRegisterCopy::<u32, GICD_TYPER::Register>::new(self.gicd().read32(gicd::TYPER));
        ((typer.read(GICD_TYPER::ITLINES) + 1) << 5).min(MAX_SPI_ID + 1)
    }

    /// CPU interface mask of the calling core (byte 0 of GICD_ITARGETSR0)
    pub fn get_cpuif_id(&self) -> u8 {
        self.gicd().get_byte(&gicd::ITARGETSR, 0)
    }

    /// Global distributor initialisation
    ///
    /// Every SPI is made Group 1, default priority and level-triggered, then
    /// the configured secure SPIs are made Group 0, targeted at the calling
    /// core and enabled.
    pub fn distif_init(&self) {
        let gicd_regs = self.gicd();
        let ctlr = GicdCtlr::from_bits_retain(gicd_regs.read32(gicd::CTLR));

        // Disable the distributor before going further
        gicd_regs.write32(
            gicd::CTLR,
            (ctlr - GicdCtlr::ENABLE_GRP0 - GicdCtlr::ENABLE_GRP1NS).bits(),
        );

        self.spis_configure_defaults();
        self.secure_spis_configure_props();

        gicd_regs.write32(gicd::CTLR, (ctlr | GicdCtlr::ENABLE_GRP0).bits());
    }

    fn spis_configure_defaults(&self) {
        let gicd_regs = self.gicd();
        let num_ints = self.num_ints();

        for id in (MIN_SPI_ID..num_ints).step_by(gicd::IGROUPR.ids_per_reg() as usize) {
            gicd_regs.write_reg(&gicd::IGROUPR, id, !0);
        }
        for id in (MIN_SPI_ID..num_ints).step_by(gicd::IPRIORITYR.ids_per_reg() as usize) {
            gicd_regs.write_reg(&gicd::IPRIORITYR, id, gicd::IPRIORITYR_DEF_VAL);
        }
        for id in (MIN_SPI_ID..num_ints).step_by(gicd::ICFGR.ids_per_reg() as usize) {
            gicd_regs.write_reg(&gicd::ICFGR, id, 0);
        }
    }

    fn secure_spis_configure_props(&self) {
        let gicd_regs = self.gicd();
        let target = u32::from(self.get_cpuif_id());

        for prop in self.config.interrupt_props.iter().filter(|p| p.id >= MIN_SPI_ID) {
            assert!(prop.id <= MAX_SPI_ID, "GICv2: invalid SPI {}", prop.id);
            gicd_regs.clr_bit(&gicd::IGROUPR, prop.id);
            gicd_regs.set_byte(&gicd::IPRIORITYR, prop.id, prop.priority.into());
            gicd_regs.set_field(&gicd::ICFGR, prop.id, prop.trigger.icfgr_bits());
            gicd_regs.set_byte(&gicd::ITARGETSR, prop.id, target);
            gicd_regs.write_bit(&gicd::ISENABLER, prop.id);
        }
    }

    /// Per-core distributor initialisation of the banked SGIs and PPIs
    pub fn pcpu_distif_init(&self) {
        let gicd_regs = self.gicd();

        // Disable all SGIs and PPIs before configuring them
        gicd_regs.write_reg(&gicd::ICENABLER, 0, !0);

        for id in (0..MIN_SPI_ID).step_by(gicd::IPRIORITYR.ids_per_reg() as usize) {
            gicd_regs.write_reg(&gicd::IPRIORITYR, id, gicd::IPRIORITYR_DEF_VAL);
        }

        let mut sec_ppi_sgi_mask = 0u32;
        for prop in self.config.interrupt_props.iter().filter(|p| p.id < MIN_SPI_ID) {
            sec_ppi_sgi_mask |= 1 << prop.id;
            gicd_regs.set_byte(&gicd::IPRIORITYR, prop.id, prop.priority.into());
            // SGIs are always edge-triggered
            if prop.id >= MIN_PPI_ID {
                gicd_regs.set_field(&gicd::ICFGR, prop.id, prop.trigger.icfgr_bits());
            }
        }

        gicd_regs.write_reg(&gicd::IGROUPR, 0, !sec_ppi_sgi_mask);
        gicd_regs.write_reg(&gicd::ISENABLER, 0, sec_ppi_sgi_mask);

        let ctlr = GicdCtlr::from_bits_retain(gicd_regs.read32(gicd::CTLR));
        if !ctlr.contains(GicdCtlr::ENABLE_GRP0) {
            gicd_regs.write32(gicd::CTLR, (ctlr | GicdCtlr::ENABLE_GRP0).bits());
        }
    }

    /// Enable Group 0 signalling on the calling core's CPU interface
    pub fn cpuif_enable(&self) {
        let ctlr = GiccCtlr::ENABLE_G0
            | GiccCtlr::FIQ_EN
            | GiccCtlr::FIQ_BYP_DIS_GRP0
            | GiccCtlr::IRQ_BYP_DIS_GRP0
            | GiccCtlr::FIQ_BYP_DIS_GRP1
            | GiccCtlr::IRQ_BYP_DIS_GRP1;

        let gicc_regs = self.gicc();
        gicc_regs.write32(gicc::PMR, GIC_PRI_MASK);
        gicc_regs.write32(gicc::CTLR, ctlr.bits());
    }

    /// Disable both groups on the calling core's CPU interface
    pub fn cpuif_disable(&self) {
        let gicc_regs = self.gicc();
        let ctlr = GiccCtlr::from_bits_retain(gicc_regs.read32(gicc::CTLR));
        gicc_regs.write32(
            gicc::CTLR,
            (ctlr - GiccCtlr::ENABLE_G0 - GiccCtlr::ENABLE_G1).bits(),
        );
    }

    /// Record the target mask of core `proc`, at most once
    pub fn set_pe_target_mask(&self, proc: usize) {
        let masks = self.config.target_masks;
        assert!(proc < GICV2_MAX_TARGET_PE, "GICv2: core {} out of range", proc);
        assert!(proc < masks.len(), "GICv2: no target mask slot for core {}", proc);

        let slot = &masks[proc];
        if slot.load(Ordering::Acquire) != 0 {
            return;
        }

        let mask = self.get_cpuif_id();
        if slot
            .compare_exchange(0, mask, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(flush) = self.config.flush_dcache_range {
                flush(slot as *const AtomicU8 as usize, core::mem::size_of_val(slot));
            }
        }
    }

    fn target_mask(&self, proc: usize) -> u8 {
        let masks = self.config.target_masks;
        assert!(proc < GICV2_MAX_TARGET_PE, "GICv2: core {} out of range", proc);
        assert!(proc < masks.len(), "GICv2: no target mask slot for core {}", proc);
        let target = masks[proc].load(Ordering::Acquire);
        assert!(target != 0, "GICv2: target mask of core {} not populated", proc);
        target
    }

    /// Id and group of the highest priority pending interrupt
    pub fn get_pending_interrupt_type(&self) -> u32 {
        self.gicc().read32(gicc::HPPIR) & GICV2_INT_ID_MASK
    }

    /// Id of the highest priority pending interrupt, resolving the Group 1
    /// sentinel through the aliased register
    pub fn get_pending_interrupt_id(&self) -> u32 {
        let gicc_regs = self.gicc();
        let id = gicc_regs.read32(gicc::HPPIR) & GICV2_INT_ID_MASK;

        // Assumes GICC_CTLR.AckCtl is clear
        if id == GICV2_PENDING_G1_INTID {
            gicc_regs.read32(gicc::AHPPIR) & GICV2_INT_ID_MASK
        } else {
            id
        }
    }

    /// Acknowledge the highest priority pending interrupt (raw GICC_IAR)
    pub fn acknowledge_interrupt(&self) -> u32 {
        self.gicc().read32(gicc::IAR)
    }

    /// Signal end of interrupt (raw GICC_EOIR value)
    pub fn end_of_interrupt(&self, id: u32) {
        // Peripheral writes made by the handler must complete before the
        // interrupt is deactivated
        dsbishst();
        self.gicc().write32(gicc::EOIR, id);
    }

    /// Running priority of the calling core
    pub fn get_running_priority(&self) -> u32 {
        self.gicc().read32(gicc::RPR)
    }

    /// Program the priority mask, returning the previous one
    pub fn set_pmr(&self, mask: u32) -> u32 {
        let gicc_regs = self.gicc();
        let old = gicc_regs.read32(gicc::PMR);
        dmbishst();
        gicc_regs.write32(gicc::PMR, mask);
        old
    }

    /// Group of `id`: `false` for Group 0, `true` for Group 1
    pub fn get_interrupt_group(&self, id: u32) -> bool {
        self.gicd().get_bit(&gicd::IGROUPR, id)
    }

    /// Move `id` to `group`. Only Group 0 and Group 1 Non-secure exist on
    /// GICv2.
    pub fn set_interrupt_type(&self, id: u32, group: InterruptGroup) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);

        let _guard = self.gic_lock.lock();
        match group {
            InterruptGroup::Group1NonSecure => self.gicd().set_bit(&gicd::IGROUPR, id),
            InterruptGroup::Group0 => self.gicd().clr_bit(&gicd::IGROUPR, id),
            InterruptGroup::Group1Secure => {
                fatal!("GICv2: Group 1 Secure does not exist (interrupt {})", id)
            }
        }
    }

    /// Active state of `id`
    pub fn get_interrupt_active(&self, id: u32) -> bool {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().get_bit(&gicd::ISACTIVER, id)
    }

    /// Set `id` active
    pub fn set_interrupt_active(&self, id: u32) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().write_bit(&gicd::ISACTIVER, id);
    }

    /// Clear the active state of `id`
    pub fn clear_interrupt_active(&self, id: u32) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().write_bit(&gicd::ICACTIVER, id);
    }

    /// Enable forwarding of `id`
    pub fn enable_interrupt(&self, id: u32) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        // Memory the handler depends on must be visible before the interrupt
        // can fire
        dsbishst();
        self.gicd().write_bit(&gicd::ISENABLER, id);
    }

    /// Disable forwarding of `id`
    pub fn disable_interrupt(&self, id: u32) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().write_bit(&gicd::ICENABLER, id);
        dsbishst();
    }

    /// Set the priority of `id`; only the low 8 bits are used
    pub fn set_interrupt_priority(&self, id: u32, priority: u32) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().set_byte(&gicd::IPRIORITYR, id, priority);
    }

    /// Make `id` pending. SGIs are rejected.
    pub fn set_interrupt_pending(&self, id: u32) {
        assert!(
            (MIN_PPI_ID..=MAX_SPI_ID).contains(&id),
            "GICv2: cannot set interrupt {} pending",
            id
        );
        dsbishst();
        self.gicd().write_bit(&gicd::ISPENDR, id);
    }

    /// Clear the pending state of `id`. SGIs are rejected.
    pub fn clear_interrupt_pending(&self, id: u32) {
        assert!(
            (MIN_PPI_ID..=MAX_SPI_ID).contains(&id),
            "GICv2: cannot clear pending interrupt {}",
            id
        );
        self.gicd().write_bit(&gicd::ICPENDR, id);
    }

    /// Program the trigger configuration of `id`
    pub fn interrupt_set_cfg(&self, id: u32, trigger: Trigger) {
        assert!(id <= MAX_SPI_ID, "GICv2: invalid interrupt {}", id);
        self.gicd().set_field(&gicd::ICFGR, id, trigger.icfgr_bits());
    }

    /// Route SPI `id` to core `proc`
    pub fn set_spi_routing(&self, id: u32, proc: usize) {
        assert!(
            (MIN_SPI_ID..=MAX_SPI_ID).contains(&id),
            "GICv2: cannot route interrupt {}",
            id
        );
        let target = self.target_mask(proc);
        self.gicd().set_byte(&gicd::ITARGETSR, id, target.into());
    }

    /// Raise SGI `sgi` on core `proc`
    pub fn raise_sgi(&self, sgi: u32, proc: usize) {
        assert!(sgi < MIN_PPI_ID, "GICv2: invalid SGI {}", sgi);
        let target = self.target_mask(proc);
        let value = sgir_value(SGIR_TGT_SPECIFIC, target.into(), sgi);

        // Updates depending on the out of band trigger must be observed
        // before the SGI is raised
        dsbishst();
        self.gicd().write32(gicd::SGIR, value);
    }
}
