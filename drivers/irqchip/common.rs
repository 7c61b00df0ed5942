//! Interrupt id space and controller identification
//!
//! Reference: ARM IHI 0069 section 2.2 (INTID ranges)

use tock_registers::LocalRegisterCopy;

use super::mmio::Mmio;
use super::regs::GIC_PIDR2;

/// GICv3.1 extended PPI/SPI support compiled in
pub const EXT_INTID: bool = cfg!(feature = "gic_ext_intid");

/// First PPI
pub const MIN_PPI_ID: u32 = 16;
/// First SPI
pub const MIN_SPI_ID: u32 = 32;
/// Last SPI
pub const MAX_SPI_ID: u32 = 1019;
/// First extended PPI
pub const MIN_EPPI_ID: u32 = 1056;
/// Last extended PPI
pub const MAX_EPPI_ID: u32 = 1119;
/// First extended SPI
pub const MIN_ESPI_ID: u32 = 4096;
/// Last extended SPI
pub const MAX_ESPI_ID: u32 = 5119;
/// First LPI
pub const MIN_LPI_ID: u32 = 8192;

/// Number of SGIs and PPIs per core
pub const TOTAL_PCPU_INTR: u32 = 32;

/// Highest pending interrupt is Group 1 Secure (GICv3, read from Group 0)
pub const PENDING_G1S_INTID: u32 = 1020;
/// Highest pending interrupt is Group 1 Non-secure (GICv3, read from Group 0)
pub const PENDING_G1NS_INTID: u32 = 1021;
/// Highest pending interrupt is Group 1 (GICv2, read from the secure side)
pub const GICV2_PENDING_G1_INTID: u32 = 1022;

/// Mask of the id field returned by the acknowledge/HPPIR registers
pub const INT_ID_MASK: u32 = 0xff_ffff;

/// GIC architecture revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicVersion {
    /// GICv1 (with Security Extensions)
    V1,
    /// GICv2
    V2,
    /// GICv3
    V3,
    /// GICv4
    V4,
}

impl GicVersion {
    /// Decode a PIDR2.ArchRev value
    pub const fn from_arch_rev(rev: u32) -> Option<Self> {
        match rev {
            1 => Some(GicVersion::V1),
            2 => Some(GicVersion::V2),
            3 => Some(GicVersion::V3),
            4 => Some(GicVersion::V4),
            _ => None,
        }
    }
}

/// Read the architecture revision from a PIDR2 register
pub fn arch_rev<M: Mmio + ?Sized>(mmio: &M, pidr2_addr: usize) -> u32 {
    LocalRegisterCopy::<u32, GIC_PIDR2::Register>::new(mmio.read32(pidr2_addr))
        .read(GIC_PIDR2::ARCH_REV)
}

/// Range an interrupt id falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntidRange {
    /// Software generated, 0-15
    Sgi,
    /// Private peripheral, 16-31
    Ppi,
    /// Shared peripheral, 32-1019
    Spi,
    /// Special ids 1020-1023
    Special,
    /// Extended private peripheral, 1056-1119
    Eppi,
    /// Extended shared peripheral, 4096-5119
    Espi,
    /// Locality specific peripheral, 8192 and above
    Lpi,
    /// Reserved
    Reserved,
}

impl IntidRange {
    /// Classify `id`. Extended ranges are reserved unless the extended id
    /// feature is compiled in.
    pub const fn of(id: u32) -> Self {
        match id {
            0..=15 => IntidRange::Sgi,
            16..=31 => IntidRange::Ppi,
            32..=1019 => IntidRange::Spi,
            1020..=1023 => IntidRange::Special,
            MIN_EPPI_ID..=MAX_EPPI_ID if EXT_INTID => IntidRange::Eppi,
            MIN_ESPI_ID..=MAX_ESPI_ID if EXT_INTID => IntidRange::Espi,
            MIN_LPI_ID.. => IntidRange::Lpi,
            _ => IntidRange::Reserved,
        }
    }
}

/// Id is banked in the redistributor (SGI, PPI or extended PPI)
#[inline]
pub const fn is_sgi_ppi(id: u32) -> bool {
    matches!(IntidRange::of(id), IntidRange::Sgi | IntidRange::Ppi | IntidRange::Eppi)
}

/// Id is a shared peripheral interrupt (SPI or extended SPI)
#[inline]
pub const fn is_spi(id: u32) -> bool {
    matches!(IntidRange::of(id), IntidRange::Spi | IntidRange::Espi)
}

/// Id is a valid SPI or extended SPI for a distributor implementing ids
/// below `spi_limit` and extended ids below `espi_limit`
#[inline]
pub const fn is_valid_spi(id: u32, spi_limit: u32, espi_limit: u32) -> bool {
    (id >= MIN_SPI_ID && id < spi_limit) || (EXT_INTID && id >= MIN_ESPI_ID && id < espi_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, IntidRange::Sgi)]
    #[test_case(15, IntidRange::Sgi)]
    #[test_case(16, IntidRange::Ppi)]
    #[test_case(31, IntidRange::Ppi)]
    #[test_case(32, IntidRange::Spi)]
    #[test_case(1019, IntidRange::Spi)]
    #[test_case(1023, IntidRange::Special)]
    #[test_case(1024, IntidRange::Reserved)]
    #[test_case(8192, IntidRange::Lpi)]
    fn test_classify(id: u32, range: IntidRange) {
        assert_eq!(IntidRange::of(id), range);
    }

    #[test]
    fn test_extended_ranges() {
        let (eppi, espi) = if EXT_INTID {
            (IntidRange::Eppi, IntidRange::Espi)
        } else {
            (IntidRange::Reserved, IntidRange::Reserved)
        };
        assert_eq!(IntidRange::of(1056), eppi);
        assert_eq!(IntidRange::of(4096), espi);
        assert_eq!(IntidRange::of(5120), IntidRange::Reserved);
        assert_eq!(is_sgi_ppi(1100), EXT_INTID);
        assert_eq!(is_spi(5000), EXT_INTID);
    }

    #[test]
    fn test_spi_validity() {
        assert!(is_valid_spi(32, 64, 0));
        assert!(!is_valid_spi(64, 64, 0));
        assert!(!is_valid_spi(31, 64, 0));
        assert_eq!(is_valid_spi(4100, 64, 4128), EXT_INTID);
    }

    #[test]
    fn test_version_decode() {
        assert_eq!(GicVersion::from_arch_rev(2), Some(GicVersion::V2));
        assert_eq!(GicVersion::from_arch_rev(4), Some(GicVersion::V4));
        assert_eq!(GicVersion::from_arch_rev(0), None);
    }
}
