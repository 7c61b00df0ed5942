//! Interrupt controller drivers
//!
//! Provides the ARM Generic Interrupt Controller drivers used by the secure
//! firmware.
//! Reference: ARM IHI 0048B (GICv2), ARM IHI 0069 (GICv3/v4)

/// Memory mapped register access
pub mod mmio;

/// Per-interrupt register family accessors
pub mod regs;

/// Interrupt id ranges and controller identification shared by all versions
pub mod common;

/// GICv2 driver
pub mod gicv2;

/// GICv3 driver
pub mod gicv3;

/// GIC-600/700 power gating and multichip support
pub mod gic600;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use common::{GicVersion, IntidRange};
pub use gicv2::Gicv2Driver;
pub use gicv3::{Gicv3Driver, ItsContext, RdistContext};
pub use gicv3::context::DistContext;
