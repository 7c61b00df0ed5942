//! Driver level scenarios
//!
//! Each test drives a published driver against a synthetic register file
//! whose hooks model the hardware side of the handshakes.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::cell::Cell;
use std::rc::Rc;

use super::gic600::multichip::{self, Chip, MultichipTopology};
use super::gicv2::{gicd_v2, Gicv2Driver};
use super::gicv3::helpers::{rdistif_mark_core_asleep, rdistif_mark_core_awake};
use super::gicv3::regs::{gicd, gicr};
use super::gicv3::Gicv3Driver;
use super::regs::{self, RegBlock};
use super::testing::{Access, FakeMmio, FakeSysRegs};
use crate::arch::arm64::sysreg::SysReg;
use crate::config::{Gicv2Config, Gicv3Config, InterruptGroup};

const GICD: usize = 0x2f00_0000;
const GICR: usize = 0x2f10_0000;
const GICC: usize = 0x2c02_0000;

const WAKER: usize = GICR + gicr::WAKER;
const PROCESSOR_SLEEP: u32 = 1 << 1;
const CHILDREN_ASLEEP: u32 = 1 << 2;

fn fake_gicv3() -> (FakeMmio, FakeSysRegs) {
    let mmio = FakeMmio::new();
    let rev = if cfg!(feature = "gic_v4_extn") { 4 } else { 3 };
    mmio.poke32(GICD + gicd::PIDR2, rev << 4);
    mmio.poke32(GICD + gicd::TYPER, (1 << 18) | 3);
    let sysregs = FakeSysRegs::new();
    sysregs.set(SysReg::IdAa64pfr0El1, 1 << 24);
    (mmio, sysregs)
}

/// Redistributor whose children follow ProcessorSleep once written
fn waker_model(mmio: &FakeMmio) {
    mmio.hook(|mem, access| {
        if let Access::Write { addr: WAKER, value, .. } = *access {
            let ps = value as u32 & PROCESSOR_SLEEP;
            let ca = if ps != 0 { CHILDREN_ASLEEP } else { 0 };
            mem.set32(WAKER, ps | ca);
        }
    });
}

#[test]
fn test_gicv2_sgi_to_core() {
    static MASKS: [AtomicU8; 4] = [
        AtomicU8::new(0),
        AtomicU8::new(0),
        AtomicU8::new(0),
        AtomicU8::new(0),
    ];
    let mmio = FakeMmio::new();
    mmio.poke32(GICD + gicd_v2::PIDR2, 2 << 4);
    let config = Gicv2Config::new(GICD, GICC).with_target_masks(&MASKS);
    let driver = Gicv2Driver::driver_init(config, &mmio);

    // Core 2 reads its own interface id from the banked ITARGETSR0
    mmio.poke32(GICD + 0x800, 0x0404_0404);
    driver.set_pe_target_mask(2);
    assert_eq!(MASKS[2].load(Ordering::Relaxed), 0b0100);

    driver.raise_sgi(5, 2);
    assert_eq!(mmio.writes_to(GICD + regs::gicd::SGIR), vec![0x40005]);
}

#[test]
fn test_gicv3_set_type_leaves_neighbours() {
    static TABLE: [AtomicUsize; 1] = [AtomicUsize::new(0)];
    let (mmio, sysregs) = fake_gicv3();
    let driver = Gicv3Driver::driver_init(
        Gicv3Config::new(GICD, 0).with_rdistif_base_addrs(&TABLE),
        &mmio,
        &sysregs,
    );

    // 99, 100 and 101 are Group 1 Non-secure
    mmio.poke32(GICD + 0x80 + 12, 0x38);

    driver.set_interrupt_type(100, 0, InterruptGroup::Group1Secure);

    assert_eq!(mmio.peek32(GICD + 0x80 + 12), 0x28);
    assert_eq!(mmio.peek32(GICD + 0xd00 + 12), 0x10);
    assert_eq!(driver.get_interrupt_type(99, 0), InterruptGroup::Group1NonSecure);
    assert_eq!(driver.get_interrupt_type(100, 0), InterruptGroup::Group1Secure);
    assert_eq!(driver.get_interrupt_type(101, 0), InterruptGroup::Group1NonSecure);
}

#[test]
fn test_core_sleep_wake_handshake() {
    let mmio = FakeMmio::new();
    waker_model(&mmio);
    let gicr_regs = RegBlock::new(&mmio, GICR);

    rdistif_mark_core_asleep(gicr_regs);
    assert_eq!(mmio.peek32(WAKER), PROCESSOR_SLEEP | CHILDREN_ASLEEP);

    mmio.clear_trace();
    rdistif_mark_core_awake(gicr_regs);

    let children: Vec<bool> = mmio
        .reads_from(WAKER)
        .iter()
        .map(|&v| v as u32 & CHILDREN_ASLEEP != 0)
        .collect();
    assert_eq!(children.first(), Some(&true));
    assert_eq!(children.last(), Some(&false));
    assert_eq!(mmio.peek32(WAKER), 0);
}

#[test]
fn test_wake_waits_for_children() {
    let mmio = FakeMmio::new();
    waker_model(&mmio);
    // Asleep, but the children have not caught up yet
    mmio.poke32(WAKER, PROCESSOR_SLEEP);

    let reads = Rc::new(Cell::new(0));
    let counter = reads.clone();
    mmio.hook(move |mem, access| {
        if let Access::Read { addr: WAKER, .. } = *access {
            counter.set(counter.get() + 1);
            if counter.get() == 3 && mem.get32(WAKER) == PROCESSOR_SLEEP {
                mem.set32(WAKER, PROCESSOR_SLEEP | CHILDREN_ASLEEP);
            }
        }
    });

    rdistif_mark_core_awake(RegBlock::new(&mmio, GICR));

    assert!(reads.get() >= 3);
    assert_eq!(mmio.writes_to(WAKER), vec![CHILDREN_ASLEEP as u64]);
    assert_eq!(mmio.peek32(WAKER), 0);
}

#[test]
fn test_wake_of_awake_core_is_noop() {
    let mmio = FakeMmio::new();
    rdistif_mark_core_awake(RegBlock::new(&mmio, GICR));
    assert!(mmio.writes_to(WAKER).is_empty());
}

#[cfg(feature = "gic600")]
#[test]
fn test_gic600_redistributor_power_cycle() {
    static TABLE: [AtomicUsize; 1] = [AtomicUsize::new(GICR)];
    const PWRR: usize = GICR + gicr::PWRR;

    let (mmio, sysregs) = fake_gicv3();
    mmio.poke32(GICR + gicr::IIDR, 0x0200_043B);
    // Last frame of its group: the group follows the frame
    mmio.hook(|mem, access| {
        if let Access::Write { addr: PWRR, value, .. } = *access {
            let pwrr = if value & 1 != 0 { 0b1101 } else { 0 };
            mem.set32(PWRR, pwrr);
        }
    });
    let driver = Gicv3Driver::driver_init(
        Gicv3Config::new(GICD, 0).with_rdistif_base_addrs(&TABLE),
        &mmio,
        &sysregs,
    );

    driver.rdistif_off(0);
    assert_eq!(mmio.peek32(PWRR), 0b1101);

    driver.rdistif_on(0);
    assert_eq!(mmio.writes_to(PWRR), vec![1, 0]);
    assert_eq!(mmio.peek32(PWRR), 0);
}

#[test]
fn test_non_gic600_redistributor_not_power_gated() {
    static TABLE: [AtomicUsize; 1] = [AtomicUsize::new(GICR)];
    let (mmio, sysregs) = fake_gicv3();
    let driver = Gicv3Driver::driver_init(
        Gicv3Config::new(GICD, 0).with_rdistif_base_addrs(&TABLE),
        &mmio,
        &sysregs,
    );

    driver.rdistif_off(0);
    driver.rdistif_on(0);
    assert!(mmio.writes_to(GICR + gicr::PWRR).is_empty());
}

#[test]
fn test_multichip_spi_reaches_owning_chip() {
    static TABLE: [AtomicUsize; 1] = [AtomicUsize::new(0)];
    const GICD_CHIP1: usize = 0x4f00_0000;
    const CHIPSR: usize = GICD + multichip::regs::CHIPSR;

    let (mmio, sysregs) = fake_gicv3();
    // GIC-600 r1p7
    mmio.poke32(GICD + gicd::IIDR, 0x0201_743B);
    mmio.hook(|mem, access| {
        if let Access::Write { addr, .. } = *access {
            if addr >= GICD + multichip::regs::CHIPR {
                mem.set32(CHIPSR, 2 << 4);
            }
        }
    });

    let mut topology = MultichipTopology::new(0, GICD);
    topology.add_chip(Chip::new(0, GICD, 32, 63)).unwrap();
    topology.add_chip(Chip::new(1, GICD_CHIP1, 64, 95)).unwrap();
    multichip::init(&mmio, &topology).unwrap();

    let config = Gicv3Config::new(GICD, 0)
        .with_rdistif_base_addrs(&TABLE)
        .with_multichip(&topology);
    let driver = Gicv3Driver::driver_init(config, &mmio, &sysregs);

    driver.enable_interrupt(70, 0);
    driver.enable_interrupt(40, 0);

    assert_eq!(mmio.writes_to(GICD_CHIP1 + 0x108), vec![1 << 6]);
    assert!(mmio.writes_to(GICD + 0x108).is_empty());
    assert_eq!(mmio.writes_to(GICD + 0x104), vec![1 << 8]);
}
