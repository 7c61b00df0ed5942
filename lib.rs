//! Ferrogic - GIC driver layer for ARM secure firmware
//!
//! This library owns every interaction with the ARM Generic Interrupt
//! Controller from the secure firmware's point of view: topology discovery,
//! interrupt classification and routing, and the controller state that has to
//! survive core, cluster and system power transitions.
//!
//! - [`drivers::irqchip::gicv2`] - GICv2 (and GICv1 with Security Extensions)
//! - [`drivers::irqchip::gicv3`] - GICv3/GICv3.1/GICv4 distributor, redistributor,
//!   system-register CPU interface and ITS context
//! - [`drivers::irqchip::gic600`] - GIC-600/700 redistributor power gating and
//!   multichip routing table setup
//!
//! Hardware is reached through the [`Mmio`] and [`SysRegs`] traits so the
//! platform decides how registers are mapped, and the driver can be exercised
//! against a synthetic register file.

#![cfg_attr(not(test), no_std)]

// Architecture-specific code
pub mod arch;

// Platform supplied driver configuration
pub mod config;

// Device drivers
pub mod drivers;

// Re-export key types for convenience
pub use arch::arm64::sysreg::{Aarch64SysRegs, SysReg, SysRegs};
pub use config::{InterruptGroup, InterruptProp, Trigger};
pub use drivers::irqchip::gic600::multichip::MultichipError;
pub use drivers::irqchip::mmio::{DeviceMmio, Mmio};

/// Ferrogic version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common error type for Ferrogic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No redistributor frame matches the calling core
    RedistributorNotFound,
    /// Multichip topology rejected
    Multichip(MultichipError),
}

impl From<MultichipError> for Error {
    fn from(err: MultichipError) -> Self {
        Error::Multichip(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::RedistributorNotFound => write!(f, "redistributor frame not found"),
            Error::Multichip(err) => write!(f, "multichip topology: {}", err),
        }
    }
}

/// Result type for Ferrogic
pub type Result<T> = core::result::Result<T, Error>;

/// Log a diagnostic and abort the calling context.
///
/// Used for every condition after which the controller state is undefined.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}
