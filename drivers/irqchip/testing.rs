//! Synthetic register file and system registers for host tests
//!
//! `FakeMmio` is byte addressed little-endian memory that records every
//! access and lets a test attach hooks modelling how the hardware reacts to
//! reads and writes (handshake bits, power transitions).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::vec::Vec;

use super::mmio::Mmio;
use crate::arch::arm64::sysreg::{SysReg, SysRegs};

/// One MMIO access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Load of `width` bytes at `addr`
    Read { addr: usize, width: usize, value: u64 },
    /// Store of `width` bytes at `addr`
    Write { addr: usize, width: usize, value: u64 },
}

/// Backing store handed to hooks
#[derive(Debug, Default)]
pub struct Memory(BTreeMap<usize, u8>);

impl Memory {
    pub fn load(&self, addr: usize, width: usize) -> u64 {
        (0..width).fold(0u64, |acc, i| {
            acc | (u64::from(*self.0.get(&(addr + i)).unwrap_or(&0)) << (8 * i))
        })
    }

    pub fn store(&mut self, addr: usize, width: usize, value: u64) {
        for i in 0..width {
            self.0.insert(addr + i, (value >> (8 * i)) as u8);
        }
    }

    pub fn get32(&self, addr: usize) -> u32 {
        self.load(addr, 4) as u32
    }

    pub fn set32(&mut self, addr: usize, value: u32) {
        self.store(addr, 4, value.into())
    }

    pub fn get64(&self, addr: usize) -> u64 {
        self.load(addr, 8)
    }

    pub fn set64(&mut self, addr: usize, value: u64) {
        self.store(addr, 8, value)
    }
}

/// Hook called before every read and after every write. For reads the
/// access carries value 0.
pub type Hook = Box<dyn FnMut(&mut Memory, &Access)>;

#[derive(Default)]
pub struct FakeMmio {
    mem: RefCell<Memory>,
    trace: RefCell<Vec<Access>>,
    hooks: RefCell<Vec<Hook>>,
}

impl FakeMmio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a hardware model
    pub fn hook(&self, hook: impl FnMut(&mut Memory, &Access) + 'static) {
        self.hooks.borrow_mut().push(Box::new(hook));
    }

    /// Set a register without tracing it
    pub fn poke32(&self, addr: usize, value: u32) {
        self.mem.borrow_mut().set32(addr, value);
    }

    pub fn poke64(&self, addr: usize, value: u64) {
        self.mem.borrow_mut().set64(addr, value);
    }

    /// Read a register without tracing it
    pub fn peek32(&self, addr: usize) -> u32 {
        self.mem.borrow().get32(addr)
    }

    pub fn peek64(&self, addr: usize) -> u64 {
        self.mem.borrow().get64(addr)
    }

    pub fn peek8(&self, addr: usize) -> u8 {
        self.mem.borrow().load(addr, 1) as u8
    }

    pub fn trace(&self) -> Vec<Access> {
        self.trace.borrow().clone()
    }

    pub fn clear_trace(&self) {
        self.trace.borrow_mut().clear();
    }

    /// Values written to `addr`, in order
    pub fn writes_to(&self, addr: usize) -> Vec<u64> {
        self.trace
            .borrow()
            .iter()
            .filter_map(|access| match *access {
                Access::Write { addr: a, value, .. } if a == addr => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Values read from `addr`, in order
    pub fn reads_from(&self, addr: usize) -> Vec<u64> {
        self.trace
            .borrow()
            .iter()
            .filter_map(|access| match *access {
                Access::Read { addr: a, value, .. } if a == addr => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Snapshot of every byte ever touched
    pub fn snapshot(&self) -> BTreeMap<usize, u8> {
        self.mem.borrow().0.clone()
    }

    fn run_hooks(&self, access: &Access) {
        let mut mem = self.mem.borrow_mut();
        for hook in self.hooks.borrow_mut().iter_mut() {
            hook(&mut mem, access);
        }
    }

    fn load(&self, addr: usize, width: usize) -> u64 {
        self.run_hooks(&Access::Read { addr, width, value: 0 });
        let value = self.mem.borrow().load(addr, width);
        self.trace.borrow_mut().push(Access::Read { addr, width, value });
        value
    }

    fn store(&self, addr: usize, width: usize, value: u64) {
        self.mem.borrow_mut().store(addr, width, value);
        let access = Access::Write { addr, width, value };
        self.trace.borrow_mut().push(access);
        self.run_hooks(&access);
    }
}

impl Mmio for FakeMmio {
    fn read8(&self, addr: usize) -> u8 {
        self.load(addr, 1) as u8
    }
    fn read32(&self, addr: usize) -> u32 {
        self.load(addr, 4) as u32
    }
    fn read64(&self, addr: usize) -> u64 {
        self.load(addr, 8)
    }
    fn write8(&self, addr: usize, value: u8) {
        self.store(addr, 1, value.into())
    }
    fn write32(&self, addr: usize, value: u32) {
        self.store(addr, 4, value.into())
    }
    fn write64(&self, addr: usize, value: u64) {
        self.store(addr, 8, value)
    }
}

/// Compare two snapshots, treating bytes never touched as zero
pub fn same_contents(a: &BTreeMap<usize, u8>, b: &BTreeMap<usize, u8>) -> bool {
    a.keys()
        .chain(b.keys())
        .all(|addr| a.get(addr).unwrap_or(&0) == b.get(addr).unwrap_or(&0))
}

/// Recording system register file
#[derive(Default)]
pub struct FakeSysRegs {
    regs: RefCell<BTreeMap<SysReg, u64>>,
    writes: RefCell<Vec<(SysReg, u64)>>,
}

impl FakeSysRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reg: SysReg, value: u64) {
        self.regs.borrow_mut().insert(reg, value);
    }

    pub fn get(&self, reg: SysReg) -> u64 {
        *self.regs.borrow().get(&reg).unwrap_or(&0)
    }

    pub fn writes(&self) -> Vec<(SysReg, u64)> {
        self.writes.borrow().clone()
    }

    pub fn writes_to(&self, reg: SysReg) -> Vec<u64> {
        self.writes
            .borrow()
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl SysRegs for FakeSysRegs {
    fn read(&self, reg: SysReg) -> u64 {
        self.get(reg)
    }

    fn write(&self, reg: SysReg, value: u64) {
        self.writes.borrow_mut().push((reg, value));
        self.regs.borrow_mut().insert(reg, value);
    }
}
