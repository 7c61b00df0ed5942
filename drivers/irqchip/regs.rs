//! Per-interrupt register family accessors
//!
//! Most GIC registers are arrays indexed by interrupt id: one bit, two bits,
//! one byte or one doubleword per id. A [`RegFamily`] describes where such an
//! array lives and how wide each field is, and [`RegBlock`] performs the
//! accesses against one register frame.
//!
//! Two layouts coexist:
//! - flat: `offset + (id / ids_per_reg) * reg_bytes`
//! - split (GICv3.1 extended ranges): ids from `ext.first_id` upwards live in
//!   a second bank at `ext.offset`, with the id re-based by `ext.rebase`
//!
//! Reference: ARM IHI 0048B section 4.3, ARM IHI 0069 section 12.9

use bitflags::bitflags;
use tock_registers::register_bitfields;

use super::mmio::Mmio;

/// Second register bank of a split family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtBank {
    /// First id served by the bank
    pub first_id: u32,
    /// Offset of the bank in the frame
    pub offset: usize,
    /// Id mapped to field 0 of the bank's first register
    pub rebase: u32,
}

/// Layout of one per-interrupt register array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegFamily {
    /// Offset of register 0 in the frame
    pub offset: usize,
    /// Field width in bits (1, 2, 8 or 64)
    pub bits: u32,
    /// Extended bank, if the family is split
    pub ext: Option<ExtBank>,
}

impl RegFamily {
    /// A family laid out as one contiguous array
    pub const fn flat(offset: usize, bits: u32) -> Self {
        Self {
            offset,
            bits,
            ext: None,
        }
    }

    /// A family with an extended bank for ids `>= first_id`
    pub const fn split(offset: usize, bits: u32, first_id: u32, ext_offset: usize, rebase: u32) -> Self {
        Self {
            offset,
            bits,
            ext: Some(ExtBank {
                first_id,
                offset: ext_offset,
                rebase,
            }),
        }
    }

    /// Number of ids sharing one register
    #[inline]
    pub const fn ids_per_reg(&self) -> u32 {
        if self.bits >= 32 {
            1
        } else {
            32 / self.bits
        }
    }

    /// log2 of [`Self::ids_per_reg`]
    #[inline]
    pub const fn shift(&self) -> u32 {
        self.ids_per_reg().trailing_zeros()
    }

    /// Width of one register in bytes
    #[inline]
    pub const fn reg_bytes(&self) -> usize {
        if self.bits == 64 {
            8
        } else {
            4
        }
    }

    /// Mask of one field, unshifted
    #[inline]
    pub const fn field_mask(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    /// Resolve the bank serving `id`: returns (bank offset, re-based id)
    #[inline]
    const fn bank(&self, id: u32) -> (usize, u32) {
        match self.ext {
            Some(ext) if id >= ext.first_id => (ext.offset, id - ext.rebase),
            _ => (self.offset, id),
        }
    }

    /// Offset of the register holding the field of `id`
    #[inline]
    pub const fn reg_offset(&self, id: u32) -> usize {
        let (offset, id) = self.bank(id);
        offset + (id >> self.shift()) as usize * self.reg_bytes()
    }

    /// Bit position of the field of `id` inside its register
    #[inline]
    pub const fn field_shift(&self, id: u32) -> u32 {
        let (_, id) = self.bank(id);
        (id & (self.ids_per_reg() - 1)) * self.bits
    }

    /// Offset of the byte holding `id` (8-bit families only)
    #[inline]
    pub const fn byte_offset(&self, id: u32) -> usize {
        let (offset, id) = self.bank(id);
        offset + id as usize
    }
}

/// One register frame reached through an [`Mmio`] accessor
pub struct RegBlock<'m, M: Mmio + ?Sized> {
    mmio: &'m M,
    base: usize,
}

impl<'m, M: Mmio + ?Sized> Clone for RegBlock<'m, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'m, M: Mmio + ?Sized> Copy for RegBlock<'m, M> {}

impl<'m, M: Mmio + ?Sized> RegBlock<'m, M> {
    /// Bind a frame at `base`
    pub const fn new(mmio: &'m M, base: usize) -> Self {
        Self { mmio, base }
    }

    /// Frame base address
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Accessor the frame is bound to
    pub const fn mmio(&self) -> &'m M {
        self.mmio
    }

    /// 32-bit read of a fixed register
    #[inline]
    pub fn read32(&self, offset: usize) -> u32 {
        self.mmio.read32(self.base + offset)
    }

    /// 32-bit write of a fixed register
    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        self.mmio.write32(self.base + offset, value)
    }

    /// 64-bit read of a fixed register
    #[inline]
    pub fn read64(&self, offset: usize) -> u64 {
        self.mmio.read64(self.base + offset)
    }

    /// 64-bit write of a fixed register
    #[inline]
    pub fn write64(&self, offset: usize, value: u64) {
        self.mmio.write64(self.base + offset, value)
    }

    /// Read the whole register holding the field of `id`
    #[inline]
    pub fn read_reg(&self, family: &RegFamily, id: u32) -> u32 {
        self.read32(family.reg_offset(id))
    }

    /// Write the whole register holding the field of `id`
    #[inline]
    pub fn write_reg(&self, family: &RegFamily, id: u32, value: u32) {
        self.write32(family.reg_offset(id), value)
    }

    /// Test the bit of `id` in a 1-bit family
    #[inline]
    pub fn get_bit(&self, family: &RegFamily, id: u32) -> bool {
        (self.read_reg(family, id) >> family.field_shift(id)) & 1 != 0
    }

    /// Read-modify-write set of the bit of `id`
    #[inline]
    pub fn set_bit(&self, family: &RegFamily, id: u32) {
        let offset = family.reg_offset(id);
        let value = self.read32(offset);
        self.write32(offset, value | (1 << family.field_shift(id)));
    }

    /// Read-modify-write clear of the bit of `id`
    #[inline]
    pub fn clr_bit(&self, family: &RegFamily, id: u32) {
        let offset = family.reg_offset(id);
        let value = self.read32(offset);
        self.write32(offset, value & !(1 << family.field_shift(id)));
    }

    /// Write only the bit of `id` (write-1-to-set/clear registers)
    #[inline]
    pub fn write_bit(&self, family: &RegFamily, id: u32) {
        self.write32(family.reg_offset(id), 1 << family.field_shift(id))
    }

    /// Read the multi-bit field of `id`
    #[inline]
    pub fn get_field(&self, family: &RegFamily, id: u32) -> u32 {
        let mask = family.field_mask() as u32;
        (self.read_reg(family, id) >> family.field_shift(id)) & mask
    }

    /// Read-modify-write the multi-bit field of `id`
    #[inline]
    pub fn set_field(&self, family: &RegFamily, id: u32, value: u32) {
        let mask = family.field_mask() as u32;
        let shift = family.field_shift(id);
        let offset = family.reg_offset(id);
        let reg = self.read32(offset) & !(mask << shift);
        self.write32(offset, reg | ((value & mask) << shift));
    }

    /// Read the byte of `id` in an 8-bit family
    #[inline]
    pub fn get_byte(&self, family: &RegFamily, id: u32) -> u8 {
        self.mmio.read8(self.base + family.byte_offset(id))
    }

    /// Byte write of the field of `id` in an 8-bit family
    #[inline]
    pub fn set_byte(&self, family: &RegFamily, id: u32, value: u32) {
        self.mmio
            .write8(self.base + family.byte_offset(id), (value & 0xff) as u8)
    }

    /// Read the 64-bit register of `id` in a 64-bit family
    #[inline]
    pub fn read_reg64(&self, family: &RegFamily, id: u32) -> u64 {
        self.read64(family.reg_offset(id))
    }

    /// Write the 64-bit register of `id` in a 64-bit family
    #[inline]
    pub fn write_reg64(&self, family: &RegFamily, id: u32, value: u64) {
        self.write64(family.reg_offset(id), value)
    }

    /// Wait until `bits` read as zero in the register at `offset`
    pub fn wait_clear(&self, offset: usize, bits: u32) {
        while self.read32(offset) & bits != 0 {
            core::hint::spin_loop();
        }
    }
}

/// Distributor registers common to GICv2 and GICv3
pub mod gicd {
    use super::RegFamily;

    /// GICD_CTLR - Distributor Control Register
    pub const CTLR: usize = 0x000;
    /// GICD_TYPER - Interrupt Controller Type Register
    pub const TYPER: usize = 0x004;
    /// GICD_IIDR - Distributor Implementer Identification Register
    pub const IIDR: usize = 0x008;
    /// GICD_SGIR - Software Generated Interrupt Register (GICv2)
    pub const SGIR: usize = 0xF00;

    /// GICD_IGROUPR
    pub const IGROUPR: RegFamily = RegFamily::flat(0x080, 1);
    /// GICD_ISENABLER
    pub const ISENABLER: RegFamily = RegFamily::flat(0x100, 1);
    /// GICD_ICENABLER
    pub const ICENABLER: RegFamily = RegFamily::flat(0x180, 1);
    /// GICD_ISPENDR
    pub const ISPENDR: RegFamily = RegFamily::flat(0x200, 1);
    /// GICD_ICPENDR
    pub const ICPENDR: RegFamily = RegFamily::flat(0x280, 1);
    /// GICD_ISACTIVER
    pub const ISACTIVER: RegFamily = RegFamily::flat(0x300, 1);
    /// GICD_ICACTIVER
    pub const ICACTIVER: RegFamily = RegFamily::flat(0x380, 1);
    /// GICD_IPRIORITYR
    pub const IPRIORITYR: RegFamily = RegFamily::flat(0x400, 8);
    /// GICD_ITARGETSR (GICv2)
    pub const ITARGETSR: RegFamily = RegFamily::flat(0x800, 8);
    /// GICD_ICFGR
    pub const ICFGR: RegFamily = RegFamily::flat(0xC00, 2);
    /// GICD_IGRPMODR (GICv3)
    pub const IGRPMODR: RegFamily = RegFamily::flat(0xD00, 1);
    /// GICD_NSACR
    pub const NSACR: RegFamily = RegFamily::flat(0xE00, 2);
    /// GICD_IROUTER (GICv3)
    pub const IROUTER: RegFamily = RegFamily::flat(0x6000, 64);

    /// Reset value written to every priority register: 0x80 per id
    pub const IPRIORITYR_DEF_VAL: u32 = super::GIC_DEF_PRIORITY as u32 * 0x0101_0101;
}

/// Default priority of every interrupt not claimed by the secure world
pub const GIC_DEF_PRIORITY: u8 = 0x80;

/// Priority mask (all priorities unmasked)
pub const GIC_PRI_MASK: u32 = 0xff;

bitflags! {
    /// GICD_CTLR
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GicdCtlr: u32 {
        /// Register Write Pending (GICv3)
        const RWP = 1 << 31;
        /// Disable Security (GICv3)
        const DS = 1 << 6;
        /// Affinity routing, Non-secure (GICv3)
        const ARE_NS = 1 << 5;
        /// Affinity routing, Secure (GICv3)
        const ARE_S = 1 << 4;
        /// Enable Group 1 Secure (GICv3)
        const ENABLE_GRP1S = 1 << 2;
        /// Enable Group 1 (Non-secure)
        const ENABLE_GRP1NS = 1 << 1;
        /// Enable Group 0
        const ENABLE_GRP0 = 1 << 0;
    }
}

impl GicdCtlr {
    /// All three group enables
    pub const ALL_GROUPS: Self = Self::ENABLE_GRP0
        .union(Self::ENABLE_GRP1NS)
        .union(Self::ENABLE_GRP1S);
}

register_bitfields! [
    u32,
    /// GICD_TYPER
    pub GICD_TYPER [
        /// Number of implemented SPI blocks minus one
        ITLINES OFFSET(0) NUMBITS(5) [],
        /// Extended SPI range implemented
        ESPI OFFSET(8) NUMBITS(1) [],
        /// Direct virtual LPI injection supported
        DVIS OFFSET(18) NUMBITS(1) [],
        /// Extended SPI range size, in blocks of 32, minus one
        ESPI_RANGE OFFSET(27) NUMBITS(5) []
    ],

    /// GICD_IIDR / GICR_IIDR
    pub GIC_IIDR [
        /// JEP106 implementer code
        IMPLEMENTER OFFSET(0) NUMBITS(12) [],
        /// Revision number
        REVISION OFFSET(12) NUMBITS(4) [],
        /// Variant number
        VARIANT OFFSET(16) NUMBITS(4) [],
        /// Product identifier
        PRODUCT_ID OFFSET(24) NUMBITS(8) []
    ],

    /// GICD_PIDR2 / GICR_PIDR2
    pub GIC_PIDR2 [
        /// GIC architecture revision
        ARCH_REV OFFSET(4) NUMBITS(4) []
    ]
];
