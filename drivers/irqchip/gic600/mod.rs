//! ARM GIC-600/GIC-700 implementation specifics
//!
//! Redistributors of these parts reset powered off and have to be powered
//! on through GICR_PWRR before they respond. Redistributors are grouped
//! (one group per cluster); powering off the last frame of a group powers
//! the group down too, and the group status bits report the transition.
//!
//! Reference: ARM CoreLink GIC-600 TRM (100336), GIC-700 TRM (101516)

pub mod multichip;

use bitflags::bitflags;
use tock_registers::LocalRegisterCopy;

use super::gicv3::helpers::gicr_wait_for_pending_write;
use super::gicv3::regs::{gicd, gicr, GicrCtlr};
use super::mmio::Mmio;
use super::regs::{RegBlock, GIC_IIDR};

/// Implementer and product id fields of GICD_IIDR/GICR_IIDR
pub const IIDR_MODEL_MASK: u32 = 0xFF00_0FFF;
/// GIC-600
pub const IIDR_MODEL_ARM_GIC_600: u32 = 0x0200_043B;
/// GIC-600AE
pub const IIDR_MODEL_ARM_GIC_600AE: u32 = 0x0300_043B;
/// GIC-700
pub const IIDR_MODEL_ARM_GIC_700: u32 = 0x0400_043B;

/// ARM's JEP106 code as reported in IIDR.Implementer
const ARM_IMPLEMENTER: u32 = 0x43B;

/// Product ids (IIDR.ProductID)
pub mod product {
    pub const GIC_600: u8 = 0x02;
    pub const GIC_600AE: u8 = 0x03;
    pub const GIC_700: u8 = 0x04;
}

bitflags! {
    /// GICR_PWRR
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GicrPwrr: u32 {
        /// Redistributor power down (request and status)
        const RDPD = 1 << 0;
        /// Apply the request to the whole group
        const RDAG = 1 << 1;
        /// Group power down status
        const RDGPD = 1 << 2;
        /// Group powered off
        const RDGPO = 1 << 3;
    }
}

/// Whether the redistributor at `gicr_regs` is power gated through
/// GICR_PWRR
pub fn needs_power_mgmt<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) -> bool {
    matches!(
        gicr_regs.read32(gicr::IIDR) & IIDR_MODEL_MASK,
        IIDR_MODEL_ARM_GIC_600 | IIDR_MODEL_ARM_GIC_600AE | IIDR_MODEL_ARM_GIC_700
    )
}

fn read_pwrr<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) -> GicrPwrr {
    GicrPwrr::from_bits_retain(gicr_regs.read32(gicr::PWRR))
}

/// Wait until the group of `gicr_regs` is not changing power state
fn wait_group_not_in_transit<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    loop {
        let pwrr = read_pwrr(gicr_regs);
        if pwrr.contains(GicrPwrr::RDGPD) == pwrr.contains(GicrPwrr::RDGPO) {
            break;
        }
        core::hint::spin_loop();
    }
}

/// Power on the redistributor frame
///
/// A request made while the group is going down is dropped, so it is
/// repeated until RDPD reads as on.
pub fn power_on<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    loop {
        wait_group_not_in_transit(gicr_regs);
        gicr_regs.write32(gicr::PWRR, 0);
        if !read_pwrr(gicr_regs).contains(GicrPwrr::RDPD) {
            break;
        }
    }
    log::debug!("GIC-600: redistributor {:#x} powered on", gicr_regs.base());
}

/// Power off the redistributor frame
///
/// When this is the last frame of its group the group powers down as
/// well; that transition is waited for before returning.
pub fn power_off<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    wait_group_not_in_transit(gicr_regs);
    gicr_regs.write32(gicr::PWRR, GicrPwrr::RDPD.bits());

    if read_pwrr(gicr_regs).contains(GicrPwrr::RDGPD) {
        wait_group_not_in_transit(gicr_regs);
    }
    log::debug!("GIC-600: redistributor {:#x} powered off", gicr_regs.base());
}

/// Product id and packed `(variant << 4) | revision` of the distributor
pub fn product_revision<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) -> (u8, u8) {
    let iidr = LocalRegisterCopy::<u32, GIC_IIDR::Register>::new(gicd_regs.read32(gicd::IIDR));
    let product = iidr.read(GIC_IIDR::PRODUCT_ID) as u8;
    let rev = ((iidr.read(GIC_IIDR::VARIANT) << 4) | iidr.read(GIC_IIDR::REVISION)) as u8;
    (product, rev)
}

/// Whether erratum 2384374 affects the distributor at `gicd_regs`
pub fn errata_2384374_affects<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) -> bool {
    let implementer = gicd_regs.read32(gicd::IIDR) & 0xFFF;
    if implementer != ARM_IMPLEMENTER {
        return false;
    }
    match product_revision(gicd_regs) {
        // r1p6
        (product::GIC_600, rev) => rev <= 0x16,
        // r0p2
        (product::GIC_600AE, rev) => rev <= 0x02,
        // r1p0
        (product::GIC_700, rev) => rev <= 0x10,
        _ => false,
    }
}

/// Abort when the part needs the erratum 2384374 workaround but it was not
/// built in
pub fn check_errata_applies<M: Mmio + ?Sized>(gicd_regs: RegBlock<'_, M>) {
    if !errata_2384374_affects(gicd_regs) {
        return;
    }
    if cfg!(feature = "gic600_errata_wa_2384374") {
        log::info!("GIC-600: erratum 2384374 workaround enabled");
    } else {
        let (product, rev) = product_revision(gicd_regs);
        crate::fatal!(
            "GIC product {:#x} r{}p{} needs the erratum 2384374 workaround",
            product,
            rev >> 4,
            rev & 0xf
        );
    }
}

/// Erratum 2384374: toggle the dynamic power gating disables so that the
/// redistributor stops selecting the sleeping core
pub fn apply_errata_wa_2384374<M: Mmio + ?Sized>(gicr_regs: RegBlock<'_, M>) {
    let dpg = GicrCtlr::DPG0 | GicrCtlr::DPG1NS | GicrCtlr::DPG1S;

    let ctlr = GicrCtlr::from_bits_retain(gicr_regs.read32(gicr::CTLR));
    gicr_regs.write32(gicr::CTLR, (ctlr | dpg).bits());
    gicr_wait_for_pending_write(gicr_regs);

    let ctlr = GicrCtlr::from_bits_retain(gicr_regs.read32(gicr::CTLR));
    gicr_regs.write32(gicr::CTLR, (ctlr - dpg).bits());
    gicr_wait_for_pending_write(gicr_regs);
}
