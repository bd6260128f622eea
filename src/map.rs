//! The memory map.
//!
//! A [`MemoryMap`] is an ordered table of [`MapEntry`]. Each entry describes
//! an inclusive address range, its properties, and the interface that
//! performs reads and writes on that range. Lookups scan the table in order,
//! and the first matching entry wins.

use core::fmt::Display;

use crate::{fmt, Error, RegionInterface};

/// How many entries fit in a [`MemoryMap`].
pub const MAX_MEMORY_REGIONS: usize = 16;

const DEVICE_ID_MASK: u32 = 0xff;
const GROUP_ID_MASK: u32 = 0xf00;
const GROUP_ID_SHIFT: u32 = 8;

/// Identifies a memory device.
///
/// The identifier packs a group (internal or external) and a device
/// number. Internal memory is reachable through the 4 GiB address space,
/// including XIP flash. External memory is only reachable through its
/// driver, and has no fixed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryId(pub u32);

impl MemoryId {
    const GROUP_INTERNAL: u32 = 0;
    const GROUP_EXTERNAL: u32 = 1;

    /// All on-chip memory, plus XIP memory.
    pub const INTERNAL: Self = Self::new(Self::GROUP_INTERNAL, 0);
    /// QuadSPI memory 0.
    pub const QUAD_SPI0: Self = Self::new(Self::GROUP_INTERNAL, 1);
    /// Nonvolatile information register 0.
    pub const IFR0_FUSE: Self = Self::new(Self::GROUP_INTERNAL, 4);
    /// SEMC NOR memory.
    pub const SEMC_NOR: Self = Self::new(Self::GROUP_INTERNAL, 8);
    /// FlexSPI NOR memory.
    pub const FLEXSPI_NOR: Self = Self::new(Self::GROUP_INTERNAL, 9);
    /// SPIFI NOR memory.
    pub const SPIFI_NOR: Self = Self::new(Self::GROUP_INTERNAL, 0xA);
    /// Execute-only region on internal flash.
    pub const FLASH_EXECUTE_ONLY: Self = Self::new(Self::GROUP_INTERNAL, 0x10);

    /// SEMC NAND memory.
    pub const SEMC_NAND: Self = Self::new(Self::GROUP_EXTERNAL, 0);
    /// SPI NAND memory.
    pub const SPI_NAND: Self = Self::new(Self::GROUP_EXTERNAL, 1);
    /// SPI NOR / EEPROM memory.
    pub const SPI_NOR_EEPROM: Self = Self::new(Self::GROUP_EXTERNAL, 0x10);
    /// I2C NOR / EEPROM memory.
    pub const I2C_NOR_EEPROM: Self = Self::new(Self::GROUP_EXTERNAL, 0x11);
    /// eSD, SD, SDHC, SDXC card.
    pub const SD_CARD: Self = Self::new(Self::GROUP_EXTERNAL, 0x20);
    /// MMC, eMMC card.
    pub const MMC_CARD: Self = Self::new(Self::GROUP_EXTERNAL, 0x21);

    /// Construct a memory ID from a group and a device number.
    pub const fn new(group: u32, device: u32) -> Self {
        Self(((group << GROUP_ID_SHIFT) & GROUP_ID_MASK) | (device & DEVICE_ID_MASK))
    }
    /// Returns the group number.
    pub const fn group(self) -> u32 {
        (self.0 & GROUP_ID_MASK) >> GROUP_ID_SHIFT
    }
    /// Returns the device number within the group.
    pub const fn device(self) -> u32 {
        self.0 & DEVICE_ID_MASK
    }
    /// Returns `true` if this memory is only reachable through its driver.
    pub const fn is_external(self) -> bool {
        self.group() == Self::GROUP_EXTERNAL
    }
}

impl Display for MemoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#05X}", self.0)
    }
}

bitflags::bitflags! {
    /// Properties of a memory region.
    ///
    /// The memory type occupies bits 7:4. A region without a RAM or
    /// device type bit is flash.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionProperty: u32 {
        /// The CPU can execute instructions in place.
        const EXECUTABLE = 0x01;
        /// The region is RAM.
        const TYPE_RAM = 0x10;
        /// The region is device registers.
        const TYPE_DEVICE = 0x20;
        /// Initialization errors for this region are ignored.
        const SKIP_INIT_ERROR = 0x8000;
    }
}

/// The class of memory behind a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryClass {
    /// Nonvolatile memory.
    Flash,
    /// Volatile memory.
    Ram,
    /// Device or strongly-ordered memory.
    Device,
}

impl RegionProperty {
    /// Returns the memory class.
    pub fn class(self) -> MemoryClass {
        if self.contains(RegionProperty::TYPE_DEVICE) {
            MemoryClass::Device
        } else if self.contains(RegionProperty::TYPE_RAM) {
            MemoryClass::Ram
        } else {
            MemoryClass::Flash
        }
    }
}

/// Names the on-chip memory that an entry describes.
///
/// The runtime uses this to find entries that it resizes once the FlexRAM
/// configuration is known.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Memory {
    /// (External) flash, accessed through a bus like FlexSPI.
    Flash,
    /// Data tightly coupled memory (DTCM).
    Dtcm,
    /// Instruction tightly coupled memory (ITCM).
    Itcm,
    /// On-chip RAM (OCRAM).
    Ocram,
}

impl Display for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Flash => f.write_str("FLASH"),
            Self::Itcm => f.write_str("ITCM"),
            Self::Dtcm => f.write_str("DTCM"),
            Self::Ocram => f.write_str("OCRAM"),
        }
    }
}

/// One entry in the memory map.
#[derive(Clone, Copy)]
pub struct MapEntry<'a> {
    /// First address in the region.
    pub start_address: u32,
    /// Last address in the region (inclusive).
    pub end_address: u32,
    /// Region properties.
    pub property: RegionProperty,
    /// The device that owns this region.
    pub memory_id: MemoryId,
    /// Performs the memory operations.
    pub interface: &'a dyn RegionInterface,
    memory: Option<Memory>,
    overlay: bool,
}

impl<'a> MapEntry<'a> {
    /// Describe a region that spans `start_address` through `end_address`,
    /// inclusive.
    pub const fn new(
        start_address: u32,
        end_address: u32,
        property: RegionProperty,
        memory_id: MemoryId,
        interface: &'a dyn RegionInterface,
    ) -> Self {
        Self {
            start_address,
            end_address,
            property,
            memory_id,
            interface,
            memory: None,
            overlay: false,
        }
    }

    /// Tag this entry as the given on-chip memory.
    pub const fn memory(mut self, memory: Memory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Allow this entry to overlap entries that are already in the map.
    ///
    /// Lookups still pick the first matching entry, so an overlay only
    /// takes effect for addresses that earlier entries don't cover.
    pub const fn overlay(mut self) -> Self {
        self.overlay = true;
        self
    }

    /// Returns the on-chip memory tag, if any.
    pub const fn tagged_memory(&self) -> Option<Memory> {
        self.memory
    }

    /// Size of the region, in bytes.
    pub const fn size(&self) -> u64 {
        self.end_address as u64 - self.start_address as u64 + 1
    }

    /// Returns `true` if every byte of `address .. address + length` is in
    /// this region.
    pub const fn contains(&self, address: u32, length: u32) -> bool {
        if length == 0 {
            return false;
        }
        let last = address as u64 + length as u64 - 1;
        address >= self.start_address && last <= self.end_address as u64
    }

    fn overlaps(&self, other: &MapEntry<'_>) -> bool {
        self.start_address <= other.end_address && other.start_address <= self.end_address
    }
}

impl core::fmt::Debug for MapEntry<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MapEntry")
            .field("start_address", &format_args!("{:#010X}", self.start_address))
            .field("end_address", &format_args!("{:#010X}", self.end_address))
            .field("property", &self.property)
            .field("memory_id", &self.memory_id)
            .field("memory", &self.memory)
            .field("overlay", &self.overlay)
            .finish_non_exhaustive()
    }
}

/// Tagged entries that don't take part in lookups, because their size is zero.
///
/// Each remembers the position it had in the map.
type Parked<'a> = heapless::Vec<(usize, MapEntry<'a>), 3>;

/// An ordered collection of memory regions.
#[derive(Default)]
pub struct MemoryMap<'a> {
    entries: heapless::Vec<MapEntry<'a>, MAX_MEMORY_REGIONS>,
    parked: Parked<'a>,
}

impl<'a> MemoryMap<'a> {
    /// Create an empty memory map.
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
            parked: heapless::Vec::new(),
        }
    }

    /// Hold a tagged entry outside of the map until it's resized.
    ///
    /// The entry's bounds don't matter. [`resize`](Self::resize) inserts
    /// it near `position`.
    pub(crate) fn park(&mut self, position: usize, entry: MapEntry<'a>) -> Result<(), Error> {
        if entry.memory.is_none() || self.is_tagged(entry.memory) {
            return Err(Error::InvalidArgument);
        }
        self.parked
            .push((position, entry))
            .map_err(|_| Error::OutOfRange)
    }

    fn is_tagged(&self, memory: Option<Memory>) -> bool {
        self.entries.iter().any(|entry| entry.memory == memory)
            || self.parked.iter().any(|(_, entry)| entry.memory == memory)
    }

    /// Append an entry to the end of the map.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the entry ends before it starts, or if it
    ///   overlaps an existing entry and neither entry is an overlay.
    /// - `OutOfRange` if the map is full.
    pub fn push(&mut self, entry: MapEntry<'a>) -> Result<(), Error> {
        self.check(&entry, None)?;
        fmt::debug!(
            "Memory map entry {:#010X}..={:#010X}, id {:#X}",
            entry.start_address,
            entry.end_address,
            entry.memory_id.0
        );
        self.entries.push(entry).map_err(|_| Error::OutOfRange)
    }

    /// Change the bounds of the entry tagged with `memory`.
    ///
    /// A `size` of zero takes the entry out of lookups, and a later
    /// non-zero `size` brings it back. Returns `RangeInvalid` if no entry
    /// carries the tag.
    pub fn resize(&mut self, memory: Memory, start_address: u32, size: u32) -> Result<(), Error> {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.memory == Some(memory))
        else {
            return self.restore(memory, start_address, size);
        };

        if size == 0 {
            fmt::info!("Removing {} from the memory map", memory);
            let entry = self.entries.remove(index);
            return self.park(index, entry);
        }

        let end_address = start_address
            .checked_add(size - 1)
            .ok_or(Error::InvalidArgument)?;
        let mut entry = self.entries[index];
        entry.start_address = start_address;
        entry.end_address = end_address;
        self.check(&entry, Some(index))?;

        fmt::info!(
            "Resized {} to {:#010X}..={:#010X}",
            memory,
            start_address,
            end_address
        );
        self.entries[index] = entry;
        Ok(())
    }

    /// Bring back a parked entry with new bounds.
    fn restore(&mut self, memory: Memory, start_address: u32, size: u32) -> Result<(), Error> {
        let slot = self
            .parked
            .iter()
            .position(|(_, entry)| entry.memory == Some(memory))
            .ok_or(Error::RangeInvalid)?;
        if size == 0 {
            return Ok(());
        }

        let (position, mut entry) = self.parked[slot];
        entry.start_address = start_address;
        entry.end_address = start_address
            .checked_add(size - 1)
            .ok_or(Error::InvalidArgument)?;
        self.check(&entry, None)?;

        let position = position.min(self.entries.len());
        self.entries
            .insert(position, entry)
            .map_err(|_| Error::OutOfRange)?;
        self.parked.swap_remove(slot);
        fmt::info!(
            "Restored {} at {:#010X}..={:#010X}",
            memory,
            entry.start_address,
            entry.end_address
        );
        Ok(())
    }

    fn check(&self, entry: &MapEntry<'_>, skip: Option<usize>) -> Result<(), Error> {
        if entry.start_address > entry.end_address {
            return Err(Error::InvalidArgument);
        }
        let conflict = self
            .entries
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != skip)
            .any(|(_, existing)| !entry.overlay && !existing.overlay && existing.overlaps(entry));
        if conflict {
            fmt::error!(
                "Region {:#010X}..={:#010X} overlaps an existing region",
                entry.start_address,
                entry.end_address
            );
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    /// Find the first entry that holds every byte of the range.
    ///
    /// Returns `RangeInvalid` when no entry matches, or when `length` is
    /// zero.
    pub fn find(&self, address: u32, length: u32) -> Result<&MapEntry<'a>, Error> {
        self.entries
            .iter()
            .find(|entry| entry.contains(address, length))
            .ok_or(Error::RangeInvalid)
    }

    /// Iterate over all entries, in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &MapEntry<'a>> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{MapEntry, Memory, MemoryClass, MemoryId, MemoryMap, RegionProperty};
    use crate::{Error, RegionInterface, WriteStatus};

    struct Nothing;
    impl RegionInterface for Nothing {
        fn read(&self, _: u32, _: &mut [u8]) -> Result<(), Error> {
            Ok(())
        }
        fn write(&self, _: u32, _: &[u8]) -> Result<WriteStatus, Error> {
            Ok(WriteStatus::Complete)
        }
    }
    static NOTHING: Nothing = Nothing;

    const RAM: RegionProperty = RegionProperty::EXECUTABLE.union(RegionProperty::TYPE_RAM);

    fn entry(start: u32, end: u32) -> MapEntry<'static> {
        MapEntry::new(start, end, RAM, MemoryId::INTERNAL, &NOTHING)
    }

    fn sample() -> MemoryMap<'static> {
        let mut map = MemoryMap::new();
        map.push(entry(0x0000_0000, 0x0001_FFFF)).unwrap();
        map.push(entry(0x2000_0000, 0x2001_FFFF)).unwrap();
        map.push(entry(0x2020_0000, 0x2023_FFFF)).unwrap();
        map.push(entry(0xFFFF_0000, 0xFFFF_FFFF)).unwrap();
        map
    }

    #[test]
    fn memory_id_fields() {
        assert_eq!(MemoryId::SD_CARD.0, 0x120);
        assert_eq!(MemoryId::MMC_CARD.0, 0x121);
        assert_eq!(MemoryId::FLEXSPI_NOR.0, 0x009);
        assert!(MemoryId::SD_CARD.is_external());
        assert!(!MemoryId::FLEXSPI_NOR.is_external());
        assert_eq!(MemoryId::MMC_CARD.group(), 1);
        assert_eq!(MemoryId::MMC_CARD.device(), 0x21);
    }

    #[test]
    fn memory_class() {
        assert_eq!(RegionProperty::empty().class(), MemoryClass::Flash);
        assert_eq!(RegionProperty::EXECUTABLE.class(), MemoryClass::Flash);
        assert_eq!(RAM.class(), MemoryClass::Ram);
        assert_eq!(RegionProperty::TYPE_DEVICE.class(), MemoryClass::Device);
    }

    #[test]
    fn bounds_are_inclusive() {
        let map = sample();
        for expected in map.iter() {
            let start = map.find(expected.start_address, 1).unwrap();
            assert_eq!(start.start_address, expected.start_address);
            let end = map.find(expected.end_address, 1).unwrap();
            assert_eq!(end.start_address, expected.start_address);
            if let Some(past_end) = expected.end_address.checked_add(1) {
                assert!(
                    map.find(past_end, 1)
                        .map_or(true, |e| e.start_address != expected.start_address),
                    "{past_end:#X}"
                );
            }
        }
    }

    #[test]
    fn gaps_are_invalid() {
        let map = sample();
        for address in [0x0002_0000, 0x1000_0000, 0x2002_0000, 0x201F_FFFF, 0x2024_0000] {
            assert_eq!(map.find(address, 1).unwrap_err(), Error::RangeInvalid);
        }
    }

    #[test]
    fn range_must_fit() {
        let map = sample();
        assert!(map.find(0x2001_FFFE, 2).is_ok());
        assert_eq!(map.find(0x2001_FFFF, 2).unwrap_err(), Error::RangeInvalid);
        assert_eq!(map.find(0x2000_0000, 0).unwrap_err(), Error::RangeInvalid);
        // The top of the address space doesn't wrap.
        assert!(map.find(0xFFFF_FFFF, 1).is_ok());
        assert_eq!(map.find(0xFFFF_FFFF, 2).unwrap_err(), Error::RangeInvalid);
    }

    #[test]
    fn overlaps_are_rejected() {
        let mut map = sample();
        assert_eq!(
            map.push(entry(0x2001_0000, 0x2002_FFFF)).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(
            map.push(entry(0x3000_0000, 0x2000_0000)).unwrap_err(),
            Error::InvalidArgument
        );
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn first_overlay_match_wins() {
        let mut map = MemoryMap::new();
        map.push(entry(0x6000_0000, 0x6000_FFFF)).unwrap();
        let flash = MapEntry::new(
            0x6000_0000,
            0x6FFF_FFFF,
            RegionProperty::empty(),
            MemoryId::FLEXSPI_NOR,
            &NOTHING,
        )
        .overlay();
        map.push(flash).unwrap();

        assert_eq!(map.find(0x6000_0000, 4).unwrap().memory_id, MemoryId::INTERNAL);
        assert_eq!(map.find(0x6001_0000, 4).unwrap().memory_id, MemoryId::FLEXSPI_NOR);
    }

    #[test]
    fn resize_tagged_memory() -> Result<(), Error> {
        let mut map = MemoryMap::new();
        map.push(entry(0x0000_0000, 0x0001_FFFF).memory(Memory::Itcm))?;
        map.push(entry(0x2000_0000, 0x2001_FFFF).memory(Memory::Dtcm))?;

        map.resize(Memory::Dtcm, 0x2000_0000, 256 * 1024)?;
        assert_eq!(map.find(0x2003_FFFF, 1)?.tagged_memory(), Some(Memory::Dtcm));

        map.resize(Memory::Itcm, 0, 0)?;
        assert_eq!(map.len(), 1);
        assert_eq!(map.find(0, 1).unwrap_err(), Error::RangeInvalid);
        map.resize(Memory::Itcm, 0, 0)?;

        assert_eq!(
            map.resize(Memory::Ocram, 0x2020_0000, 1024).unwrap_err(),
            Error::RangeInvalid
        );
        Ok(())
    }

    #[test]
    fn removed_memory_grows_back() -> Result<(), Error> {
        let mut map = MemoryMap::new();
        map.push(entry(0x0000_0000, 0x0001_FFFF).memory(Memory::Itcm))?;
        map.push(entry(0x2000_0000, 0x2001_FFFF).memory(Memory::Dtcm))?;
        map.push(entry(0x6000_0000, 0x6000_FFFF))?;

        map.resize(Memory::Itcm, 0, 0)?;
        map.resize(Memory::Dtcm, 0x2000_0000, 512 * 1024)?;
        assert_eq!(map.len(), 2);

        map.resize(Memory::Dtcm, 0x2000_0000, 256 * 1024)?;
        map.resize(Memory::Itcm, 0, 256 * 1024)?;
        assert_eq!(map.len(), 3);
        assert_eq!(map.find(0x0003_FFFF, 1)?.tagged_memory(), Some(Memory::Itcm));
        assert_eq!(map.iter().next().and_then(|e| e.tagged_memory()), Some(Memory::Itcm));
        Ok(())
    }

    #[test]
    fn parked_memory_must_not_overlap_when_it_returns() -> Result<(), Error> {
        let mut map = MemoryMap::new();
        map.push(entry(0x2000_0000, 0x2001_FFFF).memory(Memory::Dtcm))?;
        map.park(1, entry(0, 0).memory(Memory::Ocram))?;
        assert_eq!(map.len(), 1);

        assert_eq!(
            map.resize(Memory::Ocram, 0x2001_0000, 1024),
            Err(Error::InvalidArgument)
        );
        map.resize(Memory::Ocram, 0x2020_0000, 1024)?;
        assert_eq!(map.find(0x2020_0000, 4)?.tagged_memory(), Some(Memory::Ocram));

        assert_eq!(
            map.park(0, entry(0, 0).memory(Memory::Dtcm)),
            Err(Error::InvalidArgument),
            "Already tagged"
        );
        Ok(())
    }
}
