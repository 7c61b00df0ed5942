//! Driver configuration
//!
//! This module holds the values the platform hands to the GIC drivers at
//! boot: register frame addresses, the secure interrupt property list, the
//! per-core tables the driver fills in, and the platform callbacks the driver
//! invokes. A configuration is consumed by `driver_init`, which validates it
//! against the hardware and returns the published, read-only driver.

use core::sync::atomic::{AtomicU8, AtomicUsize};

use crate::drivers::irqchip::gic600::multichip::MultichipTopology;

/// Interrupt security group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptGroup {
    /// Group 0, always secure, signalled as FIQ to EL3
    Group0,
    /// Group 1 Secure
    Group1Secure,
    /// Group 1 Non-secure
    Group1NonSecure,
}

/// Interrupt trigger configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Level-sensitive
    Level,
    /// Edge-triggered
    Edge,
}

impl Trigger {
    /// Encoding of the 2-bit GICD_ICFGR/GICR_ICFGR field
    pub const fn icfgr_bits(self) -> u32 {
        match self {
            Trigger::Level => 0x0,
            Trigger::Edge => 0x2,
        }
    }
}

/// Secure interrupt property
///
/// One entry per interrupt the secure world owns. Every id not listed stays
/// Group 1 Non-secure with the default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptProp {
    /// Interrupt id
    pub id: u32,
    /// Priority (lower is more urgent)
    pub priority: u8,
    /// Security group
    pub group: InterruptGroup,
    /// Trigger configuration
    pub trigger: Trigger,
}

impl InterruptProp {
    /// Create an interrupt property entry
    pub const fn new(id: u32, priority: u8, group: InterruptGroup, trigger: Trigger) -> Self {
        Self {
            id,
            priority,
            group,
            trigger,
        }
    }
}

/// Maps an MPIDR value to a linear core index
pub type MpidrToCorePos = fn(u64) -> usize;

/// Cleans `size` bytes at `addr` to the point of coherency
pub type FlushDcacheRange = fn(usize, usize);

/// Power management hooks around redistributor context save/restore
///
/// `pre_save` runs once the redistributor context of `proc` has been saved,
/// `post_restore` once its redistributor has been powered on again and
/// before anything is reprogrammed.
pub trait DistifHooks: Sync {
    /// Called at the end of redistributor save
    fn pre_save(&self, _proc: usize) {}
    /// Called at the start of redistributor restore
    fn post_restore(&self, _proc: usize) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl DistifHooks for NoHooks {}

/// GICv2 driver configuration
#[derive(Clone, Copy)]
pub struct Gicv2Config<'a> {
    /// Distributor base address
    pub gicd_base: usize,
    /// CPU interface base address
    pub gicc_base: usize,
    /// Secure interrupt properties
    pub interrupt_props: &'a [InterruptProp],
    /// Per-core GICD_ITARGETSR masks, populated lazily by each core
    pub target_masks: &'a [AtomicU8],
    /// Cache clean callback for non-coherent systems
    pub flush_dcache_range: Option<FlushDcacheRange>,
}

impl<'a> Gicv2Config<'a> {
    /// Create a configuration with empty tables
    pub const fn new(gicd_base: usize, gicc_base: usize) -> Self {
        Self {
            gicd_base,
            gicc_base,
            interrupt_props: &[],
            target_masks: &[],
            flush_dcache_range: None,
        }
    }

    /// Set the secure interrupt properties
    pub const fn with_interrupt_props(mut self, props: &'a [InterruptProp]) -> Self {
        self.interrupt_props = props;
        self
    }

    /// Set the target mask table
    pub const fn with_target_masks(mut self, masks: &'a [AtomicU8]) -> Self {
        self.target_masks = masks;
        self
    }

    /// Set the cache clean callback
    pub const fn with_flush_dcache_range(mut self, flush: FlushDcacheRange) -> Self {
        self.flush_dcache_range = Some(flush);
        self
    }
}

/// GICv3 driver configuration
#[derive(Clone, Copy)]
pub struct Gicv3Config<'a> {
    /// Distributor base address
    pub gicd_base: usize,
    /// Base of the redistributor region, or 0 when every core discovers its
    /// own frame with `rdistif_probe`
    pub gicr_base: usize,
    /// Secure interrupt properties
    pub interrupt_props: &'a [InterruptProp],
    /// Per-core redistributor frame addresses
    pub rdistif_base_addrs: &'a [AtomicUsize],
    /// MPIDR to core index mapping
    pub mpidr_to_core_pos: Option<MpidrToCorePos>,
    /// Cache clean callback for non-coherent systems
    pub flush_dcache_range: Option<FlushDcacheRange>,
    /// Power management hooks
    pub hooks: &'a dyn DistifHooks,
    /// GIC-600/700 multichip topology
    pub multichip: Option<&'a MultichipTopology>,
}

impl<'a> Gicv3Config<'a> {
    /// Create a configuration with empty tables
    pub const fn new(gicd_base: usize, gicr_base: usize) -> Self {
        Self {
            gicd_base,
            gicr_base,
            interrupt_props: &[],
            rdistif_base_addrs: &[],
            mpidr_to_core_pos: None,
            flush_dcache_range: None,
            hooks: &NoHooks,
            multichip: None,
        }
    }

    /// Set the secure interrupt properties
    pub const fn with_interrupt_props(mut self, props: &'a [InterruptProp]) -> Self {
        self.interrupt_props = props;
        self
    }

    /// Set the redistributor base address table
    pub const fn with_rdistif_base_addrs(mut self, addrs: &'a [AtomicUsize]) -> Self {
        self.rdistif_base_addrs = addrs;
        self
    }

    /// Set the MPIDR to core index mapping
    pub const fn with_mpidr_to_core_pos(mut self, f: MpidrToCorePos) -> Self {
        self.mpidr_to_core_pos = Some(f);
        self
    }

    /// Set the cache clean callback
    pub const fn with_flush_dcache_range(mut self, flush: FlushDcacheRange) -> Self {
        self.flush_dcache_range = Some(flush);
        self
    }

    /// Set the power management hooks
    pub const fn with_hooks(mut self, hooks: &'a dyn DistifHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Attach a multichip topology
    pub const fn with_multichip(mut self, topology: &'a MultichipTopology) -> Self {
        self.multichip = Some(topology);
        self
    }
}
