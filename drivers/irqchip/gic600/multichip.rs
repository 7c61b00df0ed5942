//! GIC-600/GIC-700 multichip routing
//!
//! A multichip system runs one distributor per chip. SPI ids are split into
//! disjoint 32-id aligned ranges, one per chip, and the distributor elected
//! routing table owner (RT owner) holds the table mapping every range to
//! its chip. The table is built by connecting each chip through the owner's
//! GICD_CHIPR<n> registers, with GICD_DCHIPR.PUP reporting the progress of
//! every update.
//!
//! Unlike the architected handshakes, a chip that never answers is a real
//! possibility here, so every poll has a retry budget and exhausting it is
//! fatal.
//!
//! Reference: ARM CoreLink GIC-600 TRM (100336) chapter 4.5

use core::fmt;

use tock_registers::{register_bitfields, LocalRegisterCopy};

use super::{IIDR_MODEL_ARM_GIC_600, IIDR_MODEL_ARM_GIC_700, IIDR_MODEL_MASK};
use crate::drivers::irqchip::gicv3::regs::gicd;
use crate::drivers::irqchip::mmio::Mmio;
use crate::drivers::irqchip::regs::{GicdCtlr, RegBlock};
use crate::fatal;

/// Maximum number of chips in one system
pub const MAX_CHIPS: usize = 16;

/// Polls of GICD_DCHIPR.PUP before giving up
pub const PUP_UPDATE_RETRIES: u32 = 10000;

/// Multichip registers of the RT owner distributor
pub mod regs {
    /// GICD_CHIPSR - Chip Status Register
    pub const CHIPSR: usize = 0xC000;
    /// GICD_DCHIPR - Default Chip Register
    pub const DCHIPR: usize = 0xC004;
    /// GICD_CHIPR<n> - Chip Registers, 64-bit each
    pub const CHIPR: usize = 0xC008;

    /// GICD_CHIPR<n>.SocketState: chip online
    pub const CHIPR_SOCKET_STATE: u64 = 1 << 0;
    /// GICD_CHIPR<n>.ADDR
    pub const CHIPR_ADDR_SHIFT: u32 = 16;

    /// GIC-600 GICD_CHIPR<n>.SPI_BLOCK_MIN
    pub const GIC600_SPI_BLOCK_MIN_SHIFT: u32 = 10;
    /// GIC-600 GICD_CHIPR<n>.SPI_BLOCKS
    pub const GIC600_SPI_BLOCKS_SHIFT: u32 = 5;
    /// GIC-700 GICD_CHIPR<n>.SPI_BLOCK_MIN
    pub const GIC700_SPI_BLOCK_MIN_SHIFT: u32 = 9;
    /// GIC-700 GICD_CHIPR<n>.SPI_BLOCKS
    pub const GIC700_SPI_BLOCKS_SHIFT: u32 = 3;
}

register_bitfields! [
    u32,
    /// GICD_CHIPSR
    pub GICD_CHIPSR [
        /// Routing table state
        RTS OFFSET(4) NUMBITS(2) [
            Disconnected = 0,
            Updating = 1,
            Consistent = 2
        ]
    ],

    /// GICD_DCHIPR
    pub GICD_DCHIPR [
        /// Power update in progress
        PUP OFFSET(0) NUMBITS(1) [],
        /// Routing table owner
        RT_OWNER OFFSET(4) NUMBITS(4) []
    ]
];

/// SPI id bounds of each model
mod limits {
    pub const GIC600_SPI_ID_MIN: u32 = 32;
    /// Exclusive
    pub const GIC600_SPI_ID_MAX: u32 = 960;
    pub const GIC700_SPI_ID_MIN: u32 = 32;
    pub const GIC700_SPI_ID_MAX: u32 = 991;
    pub const GIC700_ESPI_ID_MIN: u32 = 4096;
    pub const GIC700_ESPI_ID_MAX: u32 = 5119;
    /// SPI_BLOCK_MIN of the first extended SPI block
    pub const GIC700_ESPI_BLOCK_MIN_BASE: u32 = 32;
}

use self::limits::*;

/// Ids per SPI block
const SPI_BLOCK: u32 = 32;

/// Distributor model, which selects the GICD_CHIPR<n> layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicModel {
    /// GIC-600: SPIs only, up to id 959
    Gic600,
    /// GIC-700: SPIs up to id 991 and extended SPIs
    Gic700,
}

impl GicModel {
    /// Identify the model from a GICD_IIDR value
    pub const fn from_iidr(iidr: u32) -> Option<Self> {
        match iidr & IIDR_MODEL_MASK {
            IIDR_MODEL_ARM_GIC_600 => Some(GicModel::Gic600),
            IIDR_MODEL_ARM_GIC_700 => Some(GicModel::Gic700),
            _ => None,
        }
    }
}

/// One chip of the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chip {
    /// Routing address of the chip (GICD_CHIPR<n>.ADDR)
    pub addr: u16,
    /// Distributor of the chip
    pub gicd_base: usize,
    /// First SPI id owned by the chip
    pub spi_min: u32,
    /// Last SPI id owned by the chip. `0..0` means the chip owns no SPI.
    pub spi_max: u32,
}

impl Chip {
    /// Create a chip description
    pub const fn new(addr: u16, gicd_base: usize, spi_min: u32, spi_max: u32) -> Self {
        Self {
            addr,
            gicd_base,
            spi_min,
            spi_max,
        }
    }

    const fn owns_spis(&self) -> bool {
        self.spi_min != 0 || self.spi_max != 0
    }
}

/// Multichip topology
#[derive(Debug, Clone)]
pub struct MultichipTopology {
    /// Index of the routing table owner in `chips`
    pub rt_owner: usize,
    /// Distributor base of the routing table owner
    pub rt_owner_base: usize,
    /// Chips, indexed by chip id
    pub chips: heapless::Vec<Chip, MAX_CHIPS>,
}

impl MultichipTopology {
    /// Topology with no chips yet
    pub const fn new(rt_owner: usize, rt_owner_base: usize) -> Self {
        Self {
            rt_owner,
            rt_owner_base,
            chips: heapless::Vec::new(),
        }
    }

    /// Append the next chip
    pub fn add_chip(&mut self, chip: Chip) -> Result<(), MultichipError> {
        self.chips
            .push(chip)
            .map_err(|_| MultichipError::TooManyChips(MAX_CHIPS + 1))
    }
}

/// Rejected multichip topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultichipError {
    /// No chip described
    NoChips,
    /// More chips than the routing table holds
    TooManyChips(usize),
    /// Routing table owner index outside the chip list
    InvalidOwner(usize),
    /// SPI range outside the model's bounds, reversed, or not a whole
    /// number of aligned 32-id blocks
    InvalidSpiRange { chip: usize, min: u32, max: u32 },
    /// SPI range overlaps the range of an earlier chip
    OverlappingSpiRange { chip: usize },
}

impl fmt::Display for MultichipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultichipError::NoChips => write!(f, "no chips"),
            MultichipError::TooManyChips(count) => {
                write!(f, "{} chips, at most {} supported", count, MAX_CHIPS)
            }
            MultichipError::InvalidOwner(owner) => {
                write!(f, "routing table owner {} is not a chip", owner)
            }
            MultichipError::InvalidSpiRange { chip, min, max } => {
                write!(f, "invalid SPI ids {{{}, {}}} for chip {}", min, max, chip)
            }
            MultichipError::OverlappingSpiRange { chip } => {
                write!(f, "SPI ids of chip {} overlapping", chip)
            }
        }
    }
}

/// Bitmap of the 32-id blocks spanned by `[min, max]`, relative to `base`
fn blocks_of_32(base: u32, min: u32, max: u32) -> u64 {
    let first = (min - base) / SPI_BLOCK;
    let last = (max - base) / SPI_BLOCK;
    let upper = if last >= 63 { u64::MAX } else { (1u64 << (last + 1)) - 1 };
    upper & !((1u64 << first) - 1)
}

/// Ids spanned by `[min, max]`, zero when reversed
fn span(min: u32, max: u32) -> u32 {
    max.saturating_sub(min).saturating_add(1)
}

/// Check the topology before anything is programmed
pub fn validate(model: GicModel, topology: &MultichipTopology) -> Result<(), MultichipError> {
    let count = topology.chips.len();
    if count == 0 {
        return Err(MultichipError::NoChips);
    }
    if count > MAX_CHIPS {
        return Err(MultichipError::TooManyChips(count));
    }
    if topology.rt_owner >= count {
        return Err(MultichipError::InvalidOwner(topology.rt_owner));
    }

    let mut spi_bitmap = 0u64;
    let mut espi_bitmap = 0u64;

    for (chip, c) in topology.chips.iter().enumerate() {
        if !c.owns_spis() {
            continue;
        }
        let (min, max) = (c.spi_min, c.spi_max);
        let invalid = MultichipError::InvalidSpiRange { chip, min, max };
        if min > max || span(min, max) % SPI_BLOCK != 0 {
            return Err(invalid);
        }

        let (bitmap, blocks) = match model {
            GicModel::Gic600 if min >= GIC600_SPI_ID_MIN && max < GIC600_SPI_ID_MAX => {
                (&mut spi_bitmap, blocks_of_32(0, min, max))
            }
            GicModel::Gic700 if min >= GIC700_SPI_ID_MIN && max <= GIC700_SPI_ID_MAX => {
                (&mut spi_bitmap, blocks_of_32(0, min, max))
            }
            GicModel::Gic700 if min >= GIC700_ESPI_ID_MIN && max <= GIC700_ESPI_ID_MAX => {
                (&mut espi_bitmap, blocks_of_32(GIC700_ESPI_ID_MIN, min, max))
            }
            _ => return Err(invalid),
        };

        if *bitmap & blocks != 0 {
            return Err(MultichipError::OverlappingSpiRange { chip });
        }
        *bitmap |= blocks;

        // SPI_BLOCK_MIN cannot describe a range starting mid-block
        if min % SPI_BLOCK != 0 {
            return Err(invalid);
        }
    }

    Ok(())
}

/// GICD_CHIPR<n> value bringing `chip` online
///
/// Only meaningful for a chip [`validate`] accepted.
pub fn chipr_value(model: GicModel, chip: &Chip) -> u64 {
    let (min, max) = (chip.spi_min, chip.spi_max);
    let (block_min, blocks) = if !chip.owns_spis() {
        (0, 0)
    } else if min >= GIC700_ESPI_ID_MIN {
        (
            (min - GIC700_ESPI_ID_MIN) / SPI_BLOCK + GIC700_ESPI_BLOCK_MIN_BASE,
            span(min, max) / SPI_BLOCK,
        )
    } else {
        (min.saturating_sub(SPI_BLOCK) / SPI_BLOCK, span(min, max) / SPI_BLOCK)
    };

    let (min_shift, blocks_shift) = match model {
        GicModel::Gic600 => (regs::GIC600_SPI_BLOCK_MIN_SHIFT, regs::GIC600_SPI_BLOCKS_SHIFT),
        GicModel::Gic700 => (regs::GIC700_SPI_BLOCK_MIN_SHIFT, regs::GIC700_SPI_BLOCKS_SHIFT),
    };

    (u64::from(chip.addr) << regs::CHIPR_ADDR_SHIFT)
        | (u64::from(block_min) << min_shift)
        | (u64::from(blocks) << blocks_shift)
        | regs::CHIPR_SOCKET_STATE
}

/// Abort unless every group is disabled and no GICD_CTLR write is pending
fn check_groups_disabled<M: Mmio + ?Sized>(owner: RegBlock<'_, M>, step: &str) {
    let ctlr = GicdCtlr::from_bits_retain(owner.read32(gicd::CTLR));
    if ctlr.intersects(GicdCtlr::ALL_GROUPS | GicdCtlr::RWP) {
        fatal!(
            "multichip: GICD_CTLR groups enabled or write pending ({:#x}), cannot {}",
            ctlr.bits(),
            step
        );
    }
}

fn wait_for_power_update<M: Mmio + ?Sized>(owner: RegBlock<'_, M>, chip: usize) {
    let mut retries = PUP_UPDATE_RETRIES;
    loop {
        let dchipr = LocalRegisterCopy::<u32, GICD_DCHIPR::Register>::new(owner.read32(regs::DCHIPR));
        if !dchipr.is_set(GICD_DCHIPR::PUP) {
            return;
        }
        if retries == 0 {
            fatal!("multichip: connection of chip {} to the routing table owner timed out", chip);
        }
        retries -= 1;
        core::hint::spin_loop();
    }
}

fn routing_table_state<M: Mmio + ?Sized>(owner: RegBlock<'_, M>) -> Option<GICD_CHIPSR::RTS::Value> {
    LocalRegisterCopy::<u32, GICD_CHIPSR::Register>::new(owner.read32(regs::CHIPSR))
        .read_as_enum(GICD_CHIPSR::RTS)
}

/// Elect `rt_owner` as routing table owner
pub fn set_routing_table_owner<M: Mmio + ?Sized>(owner: RegBlock<'_, M>, rt_owner: usize) {
    check_groups_disabled(owner, "set the routing table owner");

    wait_for_power_update(owner, rt_owner);
    let dchipr = owner.read32(regs::DCHIPR);
    let field = GICD_DCHIPR::RT_OWNER.val(rt_owner as u32);
    owner.write32(regs::DCHIPR, dchipr | field.value);
    wait_for_power_update(owner, rt_owner);

    log::debug!("multichip: chip {} is the routing table owner", rt_owner);
}

/// Connect chip `id` through the owner's GICD_CHIPR<id>
///
/// The written value is read back and the routing table must end up
/// consistent; anything else is fatal.
pub fn connect_chip<M: Mmio + ?Sized>(owner: RegBlock<'_, M>, id: usize, chip: &Chip) {
    check_groups_disabled(owner, "connect a chip");

    let iidr = owner.read32(gicd::IIDR);
    let Some(model) = GicModel::from_iidr(iidr) else {
        fatal!("multichip: unsupported GIC model {:#x}", iidr);
    };
    let value = chipr_value(model, chip);
    let chipr = regs::CHIPR + id * 8;

    wait_for_power_update(owner, id);
    owner.write64(chipr, value);
    wait_for_power_update(owner, id);

    if owner.read64(chipr) != value {
        fatal!("multichip: GICD_CHIPR{} write failed", id);
    }
    if routing_table_state(owner) != Some(GICD_CHIPSR::RTS::Value::Consistent) {
        fatal!("multichip: chip {} routing table is not consistent", id);
    }

    log::debug!(
        "multichip: chip {} connected, SPIs {}-{}",
        id,
        chip.spi_min,
        chip.spi_max
    );
}

/// Validate `topology` and build the routing table, owner first
///
/// Must run on the boot core before the distributors are initialised.
pub fn init<M: Mmio + ?Sized>(mmio: &M, topology: &MultichipTopology) -> crate::Result<()> {
    let owner = RegBlock::new(mmio, topology.rt_owner_base);

    let iidr = owner.read32(gicd::IIDR);
    let Some(model) = GicModel::from_iidr(iidr) else {
        fatal!("multichip: unsupported GIC model {:#x}", iidr);
    };
    validate(model, topology)?;

    let ctlr = GicdCtlr::from_bits_retain(owner.read32(gicd::CTLR));
    if ctlr.intersects(GicdCtlr::ALL_GROUPS) {
        fatal!("multichip: GICD_CTLR groups enabled ({:#x})", ctlr.bits());
    }
    if routing_table_state(owner) != Some(GICD_CHIPSR::RTS::Value::Disconnected) {
        fatal!("multichip: routing table owner is not disconnected");
    }

    let rt_owner = topology.rt_owner;
    set_routing_table_owner(owner, rt_owner);
    connect_chip(owner, rt_owner, &topology.chips[rt_owner]);

    for (id, chip) in topology.chips.iter().enumerate() {
        if id != rt_owner {
            connect_chip(owner, id, chip);
        }
    }

    log::info!(
        "multichip: {} chips connected, routing table owner {}",
        topology.chips.len(),
        rt_owner
    );
    Ok(())
}

/// Distributor of the chip owning SPI `id`
pub fn gicd_base_for_spi(topology: &MultichipTopology, id: u32) -> usize {
    match topology
        .chips
        .iter()
        .find(|chip| chip.owns_spis() && (chip.spi_min..=chip.spi_max).contains(&id))
    {
        Some(chip) => chip.gicd_base,
        None => fatal!("multichip: no chip owns SPI {}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::irqchip::testing::{Access, FakeMmio};
    use test_case::test_case;

    const OWNER: usize = 0x3000_0000;

    fn build(ranges: &[(u32, u32)]) -> MultichipTopology {
        let mut topology = MultichipTopology::new(0, OWNER);
        for (i, &(min, max)) in ranges.iter().enumerate() {
            let base = OWNER + i * 0x1000_0000;
            topology.add_chip(Chip::new(i as u16, base, min, max)).unwrap();
        }
        topology
    }

    #[test]
    fn test_adjacent_ranges_validate() {
        let topology = build(&[(32, 63), (64, 95)]);
        assert_eq!(validate(GicModel::Gic600, &topology), Ok(()));
        assert_eq!(validate(GicModel::Gic700, &topology), Ok(()));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let topology = build(&[(32, 63), (48, 79)]);
        assert_eq!(
            validate(GicModel::Gic600, &topology),
            Err(MultichipError::OverlappingSpiRange { chip: 1 })
        );

        let topology = build(&[(32, 127), (96, 159)]);
        assert_eq!(
            validate(GicModel::Gic600, &topology),
            Err(MultichipError::OverlappingSpiRange { chip: 1 })
        );
    }

    #[test_case(GicModel::Gic600; "gic600")]
    #[test_case(GicModel::Gic700; "gic700")]
    fn test_full_id_space_rejected(model: GicModel) {
        let topology = build(&[(0, u32::MAX)]);
        assert_eq!(
            validate(model, &topology),
            Err(MultichipError::InvalidSpiRange { chip: 0, min: 0, max: u32::MAX })
        );
        // Never programmed, but must not trap either
        chipr_value(model, &topology.chips[0]);
    }

    #[test_case(40, 71; "unaligned start")]
    #[test_case(32, 70; "partial block")]
    #[test_case(64, 32; "reversed")]
    #[test_case(0, 31; "below spi range")]
    #[test_case(960, 991; "above gic600 range")]
    fn test_invalid_range_rejected(min: u32, max: u32) {
        let topology = build(&[(min, max)]);
        assert_eq!(
            validate(GicModel::Gic600, &topology),
            Err(MultichipError::InvalidSpiRange { chip: 0, min, max })
        );
    }

    #[test]
    fn test_gic700_ranges() {
        let topology = build(&[(960, 991), (4096, 4127)]);
        assert_eq!(validate(GicModel::Gic700, &topology), Ok(()));

        // Extended SPIs are checked against their own bitmap
        let topology = build(&[(32, 63), (4096, 4127), (4128, 4191), (4160, 4191)]);
        assert_eq!(
            validate(GicModel::Gic700, &topology),
            Err(MultichipError::OverlappingSpiRange { chip: 3 })
        );

        // A range may not straddle the two regions
        let topology = build(&[(960, 4127)]);
        assert!(validate(GicModel::Gic700, &topology).is_err());
    }

    #[test]
    fn test_chip_without_spis_skipped() {
        let topology = build(&[(0, 0), (32, 63)]);
        assert_eq!(validate(GicModel::Gic600, &topology), Ok(()));
    }

    #[test]
    fn test_topology_limits() {
        assert_eq!(
            validate(GicModel::Gic600, &MultichipTopology::new(0, OWNER)),
            Err(MultichipError::NoChips)
        );

        let mut topology = build(&[(32, 63)]);
        topology.rt_owner = 1;
        assert_eq!(
            validate(GicModel::Gic600, &topology),
            Err(MultichipError::InvalidOwner(1))
        );

        let mut topology = MultichipTopology::new(0, OWNER);
        for i in 0..MAX_CHIPS {
            topology.add_chip(Chip::new(i as u16, OWNER, 0, 0)).unwrap();
        }
        assert_eq!(
            topology.add_chip(Chip::new(16, OWNER, 0, 0)),
            Err(MultichipError::TooManyChips(MAX_CHIPS + 1))
        );
    }

    #[test_case(GicModel::Gic600, Chip::new(2, 0, 64, 127), (2 << 16) | (1 << 10) | (2 << 5) | 1)]
    #[test_case(GicModel::Gic700, Chip::new(2, 0, 64, 127), (2 << 16) | (1 << 9) | (2 << 3) | 1)]
    #[test_case(GicModel::Gic700, Chip::new(1, 0, 4160, 4223), (1 << 16) | (34 << 9) | (2 << 3) | 1)]
    #[test_case(GicModel::Gic600, Chip::new(3, 0, 0, 0), (3 << 16) | 1)]
    fn test_chipr_value(model: GicModel, chip: Chip, expected: u64) {
        assert_eq!(chipr_value(model, &chip), expected);
    }

    #[test]
    fn test_gicd_base_for_spi() {
        let topology = build(&[(0, 0), (32, 63), (64, 95)]);
        assert_eq!(gicd_base_for_spi(&topology, 40), OWNER + 0x1000_0000);
        assert_eq!(gicd_base_for_spi(&topology, 95), OWNER + 0x2000_0000);
    }

    #[test]
    #[should_panic]
    fn test_gicd_base_for_unowned_spi() {
        let topology = build(&[(32, 63)]);
        gicd_base_for_spi(&topology, 64);
    }

    /// Routing table owner that completes every update immediately and
    /// becomes consistent once a chip register is written
    fn owner_model(mmio: &FakeMmio) {
        mmio.poke32(OWNER + gicd::IIDR, 0x0200_043B);
        mmio.hook(|mem, access| {
            if let Access::Write { addr, .. } = *access {
                if (OWNER + regs::CHIPR..OWNER + regs::CHIPR + MAX_CHIPS * 8).contains(&addr) {
                    mem.set32(OWNER + regs::CHIPSR, 2 << 4);
                }
            }
        });
    }

    #[test]
    fn test_init_connects_owner_first() {
        let mmio = FakeMmio::new();
        owner_model(&mmio);
        let mut topology = build(&[(32, 63), (64, 95), (96, 127)]);
        topology.rt_owner = 1;

        assert_eq!(init(&mmio, &topology), Ok(()));

        assert_eq!(mmio.writes_to(OWNER + regs::DCHIPR), vec![1 << 4]);
        let chipr_writes: Vec<usize> = mmio
            .trace()
            .iter()
            .filter_map(|access| match *access {
                Access::Write { addr, .. } if addr >= OWNER + regs::CHIPR => {
                    Some((addr - OWNER - regs::CHIPR) / 8)
                }
                _ => None,
            })
            .collect();
        assert_eq!(chipr_writes, vec![1, 0, 2]);
        assert_eq!(
            mmio.peek64(OWNER + regs::CHIPR + 8),
            chipr_value(GicModel::Gic600, &topology.chips[1])
        );
    }

    #[test]
    fn test_init_rejects_invalid_topology() {
        let mmio = FakeMmio::new();
        owner_model(&mmio);
        let topology = build(&[(32, 63), (48, 79)]);

        assert!(matches!(init(&mmio, &topology), Err(crate::Error::Multichip(_))));
        assert!(mmio.writes_to(OWNER + regs::DCHIPR).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_init_requires_groups_disabled() {
        let mmio = FakeMmio::new();
        owner_model(&mmio);
        mmio.poke32(OWNER + gicd::CTLR, GicdCtlr::ENABLE_GRP0.bits());
        init(&mmio, &build(&[(32, 63)])).unwrap();
    }

    #[test]
    #[should_panic]
    fn test_power_update_timeout() {
        let mmio = FakeMmio::new();
        owner_model(&mmio);
        mmio.poke32(OWNER + regs::DCHIPR, 1);
        set_routing_table_owner(RegBlock::new(&mmio, OWNER), 0);
    }

    #[test]
    #[should_panic]
    fn test_connect_chip_requires_consistent_table() {
        let mmio = FakeMmio::new();
        mmio.poke32(OWNER + gicd::IIDR, 0x0200_043B);
        connect_chip(RegBlock::new(&mmio, OWNER), 0, &Chip::new(0, OWNER, 32, 63));
    }
}
