//! Device drivers module
//!
//! Ferrogic only drives interrupt controllers; every driver lives under
//! [`irqchip`].

pub mod irqchip;
