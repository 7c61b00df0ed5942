//! Architecture support
//!
//! The GIC driver only runs on AArch64 hardware, but the system register and
//! barrier seams are compiled everywhere so the driver can be tested on the
//! build host.

pub mod arm64;

pub use arm64::barrier;
