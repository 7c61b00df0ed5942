//! Memory mapped register access
//!
//! All GIC register frames are reached through the [`Mmio`] trait. Addresses
//! are absolute physical (or identity mapped) addresses; the trait makes no
//! assumption about the mapping beyond that.

use core::ptr::NonNull;

use volatile::VolatilePtr;

/// Volatile register access at absolute addresses
pub trait Mmio {
    /// 8-bit load
    fn read8(&self, addr: usize) -> u8;
    /// 32-bit load
    fn read32(&self, addr: usize) -> u32;
    /// 64-bit load
    fn read64(&self, addr: usize) -> u64;
    /// 8-bit store
    fn write8(&self, addr: usize, value: u8);
    /// 32-bit store
    fn write32(&self, addr: usize, value: u32);
    /// 64-bit store
    fn write64(&self, addr: usize, value: u64);

    /// Set `bits` in a 32-bit register
    fn setbits32(&self, addr: usize, bits: u32) {
        let value = self.read32(addr);
        self.write32(addr, value | bits);
    }

    /// Clear `bits` in a 32-bit register
    fn clrbits32(&self, addr: usize, bits: u32) {
        let value = self.read32(addr);
        self.write32(addr, value & !bits);
    }
}

impl<T: Mmio + ?Sized> Mmio for &T {
    fn read8(&self, addr: usize) -> u8 {
        (**self).read8(addr)
    }
    fn read32(&self, addr: usize) -> u32 {
        (**self).read32(addr)
    }
    fn read64(&self, addr: usize) -> u64 {
        (**self).read64(addr)
    }
    fn write8(&self, addr: usize, value: u8) {
        (**self).write8(addr, value)
    }
    fn write32(&self, addr: usize, value: u32) {
        (**self).write32(addr, value)
    }
    fn write64(&self, addr: usize, value: u64) {
        (**self).write64(addr, value)
    }
}

/// Device memory accessor
///
/// Dereferences the given addresses directly, so it must only be used once
/// every GIC frame the driver will touch is mapped as device memory.
#[derive(Debug)]
pub struct DeviceMmio {
    _private: (),
}

impl DeviceMmio {
    /// Create a device memory accessor
    ///
    /// # Safety
    /// Every address later passed to the accessor must be a mapped device
    /// register, valid for the access width used, and not aliased by any
    /// Rust reference.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    fn ptr<T: Copy>(addr: usize) -> VolatilePtr<'static, T> {
        let Some(ptr) = NonNull::new(addr as *mut T) else {
            crate::fatal!("MMIO access at null address");
        };
        // SAFETY: `DeviceMmio::new` requires every address to be a valid,
        // mapped device register.
        unsafe { VolatilePtr::new(ptr) }
    }
}

impl Mmio for DeviceMmio {
    fn read8(&self, addr: usize) -> u8 {
        Self::ptr::<u8>(addr).read()
    }

    fn read32(&self, addr: usize) -> u32 {
        Self::ptr::<u32>(addr).read()
    }

    fn read64(&self, addr: usize) -> u64 {
        Self::ptr::<u64>(addr).read()
    }

    fn write8(&self, addr: usize, value: u8) {
        Self::ptr::<u8>(addr).write(value)
    }

    fn write32(&self, addr: usize, value: u32) {
        Self::ptr::<u32>(addr).write(value)
    }

    fn write64(&self, addr: usize, value: u64) {
        Self::ptr::<u64>(addr).write(value)
    }
}
