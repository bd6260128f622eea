//! External memory devices.
//!
//! External devices, like SD and MMC cards, aren't mapped into the address
//! space. Requests name the device by [`MemoryId`] and carry a byte offset
//! into the device. A device's geometry is unknown until it's configured.

use crate::{fmt, Error, MemoryId, WriteStatus};

/// How many devices fit in an [`ExternalMap`].
pub const MAX_EXTERNAL_MEMORIES: usize = 4;

/// Geometry discovered when a device is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    /// How many units (blocks) the device holds.
    pub unit_count: u32,
    /// Size of one unit, in bytes.
    pub unit_size: u32,
}

impl Geometry {
    /// Total device size, in bytes.
    pub const fn size(&self) -> u64 {
        self.unit_count as u64 * self.unit_size as u64
    }
}

/// Operations on an external memory device.
///
/// Addresses are byte offsets into the device.
pub trait ExternalInterface {
    /// Prepare the driver.
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }
    /// Configure the device, and report its geometry.
    fn config(&self, config: &[u32]) -> Result<Geometry, Error>;
    /// Read `buffer.len()` bytes starting at `address`.
    fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error>;
    /// Write `data` starting at `address`.
    fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error>;
    /// Erase `length` bytes starting at `address`.
    fn erase(&self, address: u32, length: u32) -> Result<(), Error>;
    /// Write back any staged data.
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
    /// Complete a sequence of cumulative writes.
    fn finalize(&self) -> Result<(), Error> {
        self.flush()
    }
    /// Erase the entire device.
    fn erase_all(&self) -> Result<(), Error> {
        Err(Error::UnsupportedCommand)
    }
}

/// The state of an external device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceStatus {
    /// The device hasn't been configured.
    Unconfigured,
    /// The device is configured, and its geometry is known.
    Ready,
    /// Configuration failed.
    Failed(Error),
}

impl DeviceStatus {
    /// Returns the flat numeric status.
    pub const fn code(self) -> i32 {
        match self {
            DeviceStatus::Unconfigured => Error::NotConfigured.code(),
            DeviceStatus::Ready => crate::STATUS_SUCCESS,
            DeviceStatus::Failed(err) => err.code(),
        }
    }
}

/// One external device.
#[derive(Clone, Copy)]
pub struct ExternalMapEntry<'a> {
    /// Identifies the device.
    pub memory_id: MemoryId,
    /// Device state.
    pub status: DeviceStatus,
    /// How many units the device holds. Zero until configured.
    pub unit_count: u32,
    /// Size of one unit, in bytes.
    ///
    /// Before configuration, this is the nominal unit size.
    pub unit_size: u32,
    /// The device driver.
    pub interface: &'a dyn ExternalInterface,
}

impl<'a> ExternalMapEntry<'a> {
    /// Describe a device that's not yet configured.
    pub const fn new(
        memory_id: MemoryId,
        unit_size: u32,
        interface: &'a dyn ExternalInterface,
    ) -> Self {
        Self {
            memory_id,
            status: DeviceStatus::Unconfigured,
            unit_count: 0,
            unit_size,
            interface,
        }
    }

    /// Device size, in bytes.
    pub const fn size(&self) -> u64 {
        self.unit_count as u64 * self.unit_size as u64
    }

    /// Check that the device is configured, and that the range fits.
    pub fn check_range(&self, address: u32, length: u32) -> Result<(), Error> {
        if self.status != DeviceStatus::Ready {
            return Err(Error::NotConfigured);
        }
        if address as u64 + length as u64 > self.size() {
            return Err(Error::AddressError);
        }
        Ok(())
    }
}

impl core::fmt::Debug for ExternalMapEntry<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExternalMapEntry")
            .field("memory_id", &self.memory_id)
            .field("status", &self.status)
            .field("unit_count", &self.unit_count)
            .field("unit_size", &self.unit_size)
            .finish_non_exhaustive()
    }
}

/// External devices, keyed by memory ID.
#[derive(Default)]
pub struct ExternalMap<'a> {
    entries: heapless::Vec<ExternalMapEntry<'a>, MAX_EXTERNAL_MEMORIES>,
}

impl<'a> ExternalMap<'a> {
    /// Create an empty map.
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Add a device.
    ///
    /// Returns `InvalidArgument` if the ID isn't external, or if it's
    /// already in the map. Returns `OutOfRange` when the map is full.
    pub fn push(&mut self, entry: ExternalMapEntry<'a>) -> Result<(), Error> {
        if !entry.memory_id.is_external() || self.index_of(entry.memory_id).is_ok() {
            return Err(Error::InvalidArgument);
        }
        self.entries.push(entry).map_err(|_| Error::OutOfRange)
    }

    /// Returns the position of the device in the map.
    pub fn index_of(&self, memory_id: MemoryId) -> Result<usize, Error> {
        self.entries
            .iter()
            .position(|entry| entry.memory_id == memory_id)
            .ok_or(Error::RangeInvalid)
    }

    /// Find the device by ID.
    pub fn find(&self, memory_id: MemoryId) -> Result<&ExternalMapEntry<'a>, Error> {
        let index = self.index_of(memory_id)?;
        Ok(&self.entries[index])
    }

    /// Configure the device, and record its geometry.
    ///
    /// A reported unit size that's zero or not a power of two leaves the
    /// device unusable, and the call returns `NotConfigured`.
    pub fn configure(&mut self, memory_id: MemoryId, config: &[u32]) -> Result<Geometry, Error> {
        let index = self.index_of(memory_id)?;
        let entry = &mut self.entries[index];

        let result = entry
            .interface
            .init()
            .and_then(|()| entry.interface.config(config))
            .and_then(|geometry| {
                if geometry.unit_size.is_power_of_two() {
                    Ok(geometry)
                } else {
                    fmt::error!(
                        "Device {:#X} reported unit size {}",
                        memory_id.0,
                        geometry.unit_size
                    );
                    Err(Error::NotConfigured)
                }
            });

        match result {
            Ok(geometry) => {
                fmt::info!(
                    "Device {:#X} has {} units of {} bytes",
                    memory_id.0,
                    geometry.unit_count,
                    geometry.unit_size
                );
                entry.unit_count = geometry.unit_count;
                entry.unit_size = geometry.unit_size;
                entry.status = DeviceStatus::Ready;
            }
            Err(err) => {
                entry.unit_count = 0;
                entry.status = DeviceStatus::Failed(err);
            }
        }
        result
    }

    /// Iterate over all devices.
    pub fn iter(&self) -> impl Iterator<Item = &ExternalMapEntry<'a>> {
        self.entries.iter()
    }

    /// Returns the number of devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no devices.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Properties that an external device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum ExternalProperty {
    /// Initialization status, as a numeric status.
    InitStatus = 0,
    /// Start address.
    StartAddress = 1,
    /// Total size, in KiB.
    MemorySizeInKbytes = 2,
    /// Page size, in bytes.
    PageSize = 3,
    /// Sector size, in bytes.
    SectorSize = 4,
    /// Block size, in bytes.
    BlockSize = 5,
}

impl ExternalProperty {
    /// Decode a property tag.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => Self::InitStatus,
            1 => Self::StartAddress,
            2 => Self::MemorySizeInKbytes,
            3 => Self::PageSize,
            4 => Self::SectorSize,
            5 => Self::BlockSize,
            _ => return None,
        })
    }

    /// Bit for this property in [`ExternalMemoryAttributes::available`].
    pub const fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// Answers property queries for one external device.
pub trait ExternalPropertySource {
    /// Returns the property value, or `UnknownProperty` if the device
    /// doesn't have the property.
    fn property(&self, property: ExternalProperty) -> Result<u32, Error>;
}

/// Associates a device with its property source.
#[derive(Clone, Copy)]
pub struct ExternalPropertyEntry<'a> {
    /// Identifies the device.
    pub memory_id: MemoryId,
    /// Answers the queries.
    pub source: &'a dyn ExternalPropertySource,
}

/// Property sources, keyed by memory ID.
#[derive(Default)]
pub struct ExternalPropertyMap<'a> {
    entries: heapless::Vec<ExternalPropertyEntry<'a>, MAX_EXTERNAL_MEMORIES>,
}

impl<'a> ExternalPropertyMap<'a> {
    /// Create an empty map.
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Add a property source.
    pub fn push(&mut self, entry: ExternalPropertyEntry<'a>) -> Result<(), Error> {
        if self.entries.iter().any(|e| e.memory_id == entry.memory_id) {
            return Err(Error::InvalidArgument);
        }
        self.entries.push(entry).map_err(|_| Error::OutOfRange)
    }

    /// Query a property of the device.
    ///
    /// Returns `UnknownProperty` if the device has no property source, or if
    /// the tag isn't a known property.
    pub fn get(&self, memory_id: MemoryId, tag: u32) -> Result<u32, Error> {
        let property = ExternalProperty::from_tag(tag).ok_or(Error::UnknownProperty)?;
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.memory_id == memory_id)
            .ok_or(Error::UnknownProperty)?;
        entry.source.property(property)
    }

    /// Collect every property that the device reports.
    ///
    /// The device must report a successful init status. Other properties
    /// are optional. Each one that the device answers sets its bit in
    /// `available`.
    pub fn attributes(&self, memory_id: MemoryId) -> Result<ExternalMemoryAttributes, Error> {
        let status = self.get(memory_id, ExternalProperty::InitStatus as u32)?;
        if status as i32 != crate::STATUS_SUCCESS {
            fmt::warning!("Device {:#X} init status {}", memory_id.0, status);
            return Err(Error::NotConfigured);
        }

        let mut attributes = ExternalMemoryAttributes::default();
        for property in [
            ExternalProperty::StartAddress,
            ExternalProperty::MemorySizeInKbytes,
            ExternalProperty::PageSize,
            ExternalProperty::SectorSize,
            ExternalProperty::BlockSize,
        ] {
            let Ok(value) = self.get(memory_id, property as u32) else {
                continue;
            };
            attributes.available |= property.mask();
            match property {
                ExternalProperty::StartAddress => attributes.start_address = value,
                ExternalProperty::MemorySizeInKbytes => attributes.size_kb = value,
                ExternalProperty::PageSize => attributes.page_size = value,
                ExternalProperty::SectorSize => attributes.sector_size = value,
                ExternalProperty::BlockSize => attributes.block_size = value,
                ExternalProperty::InitStatus => {}
            }
        }
        Ok(attributes)
    }
}

/// The attributes of an external memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExternalMemoryAttributes {
    /// Bit map of the valid fields. See [`ExternalProperty::mask`].
    pub available: u32,
    /// Start address.
    pub start_address: u32,
    /// Total size, in KiB.
    pub size_kb: u32,
    /// Page size, in bytes.
    pub page_size: u32,
    /// Sector size, in bytes.
    pub sector_size: u32,
    /// Block size, in bytes.
    pub block_size: u32,
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};

    use super::{
        DeviceStatus, ExternalInterface, ExternalMap, ExternalMapEntry, ExternalProperty,
        ExternalPropertyEntry, ExternalPropertyMap, ExternalPropertySource, Geometry,
    };
    use crate::{Error, MemoryId, WriteStatus};

    /// A card with a fixed number of 512 byte blocks.
    pub(crate) struct MockCard {
        pub(crate) blocks: u32,
        pub(crate) unit_size: u32,
        pub(crate) data: RefCell<Vec<u8>>,
        pub(crate) erased_all: Cell<bool>,
    }

    impl MockCard {
        pub(crate) fn new(blocks: u32) -> Self {
            Self {
                blocks,
                unit_size: 512,
                data: RefCell::new(vec![0; blocks as usize * 512]),
                erased_all: Cell::new(false),
            }
        }
    }

    impl ExternalInterface for MockCard {
        fn config(&self, _: &[u32]) -> Result<Geometry, Error> {
            Ok(Geometry {
                unit_count: self.blocks,
                unit_size: self.unit_size,
            })
        }
        fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error> {
            let start = address as usize;
            buffer.copy_from_slice(&self.data.borrow()[start..start + buffer.len()]);
            Ok(())
        }
        fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error> {
            let start = address as usize;
            self.data.borrow_mut()[start..start + data.len()].copy_from_slice(data);
            Ok(WriteStatus::Complete)
        }
        fn erase(&self, address: u32, length: u32) -> Result<(), Error> {
            let start = address as usize;
            self.data.borrow_mut()[start..start + length as usize].fill(0xFF);
            Ok(())
        }
        fn erase_all(&self) -> Result<(), Error> {
            self.data.borrow_mut().fill(0xFF);
            self.erased_all.set(true);
            Ok(())
        }
    }

    impl ExternalPropertySource for MockCard {
        fn property(&self, property: ExternalProperty) -> Result<u32, Error> {
            match property {
                ExternalProperty::InitStatus => Ok(0),
                ExternalProperty::MemorySizeInKbytes => Ok(self.blocks / 2),
                ExternalProperty::BlockSize => Ok(self.unit_size),
                _ => Err(Error::UnknownProperty),
            }
        }
    }

    #[test]
    fn lookup_is_by_exact_id() -> Result<(), Error> {
        let sd = MockCard::new(16);
        let mmc = MockCard::new(32);
        let mut map = ExternalMap::new();
        map.push(ExternalMapEntry::new(MemoryId::SD_CARD, 512, &sd))?;
        map.push(ExternalMapEntry::new(MemoryId::MMC_CARD, 512, &mmc))?;

        assert_eq!(map.index_of(MemoryId::MMC_CARD)?, 1);
        assert_eq!(map.find(MemoryId::SD_CARD)?.memory_id, MemoryId::SD_CARD);
        assert_eq!(map.find(MemoryId::SPI_NAND).unwrap_err(), Error::RangeInvalid);
        Ok(())
    }

    #[test]
    fn ids_must_be_external_and_unique() -> Result<(), Error> {
        let sd = MockCard::new(16);
        let mut map = ExternalMap::new();
        map.push(ExternalMapEntry::new(MemoryId::SD_CARD, 512, &sd))?;
        assert_eq!(
            map.push(ExternalMapEntry::new(MemoryId::SD_CARD, 512, &sd)),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            map.push(ExternalMapEntry::new(MemoryId::FLEXSPI_NOR, 512, &sd)),
            Err(Error::InvalidArgument)
        );
        Ok(())
    }

    #[test]
    fn configure_records_geometry() -> Result<(), Error> {
        let sd = MockCard::new(16);
        let mut map = ExternalMap::new();
        map.push(ExternalMapEntry::new(MemoryId::SD_CARD, 512, &sd))?;

        let entry = map.find(MemoryId::SD_CARD)?;
        assert_eq!(entry.check_range(0, 512), Err(Error::NotConfigured));

        map.configure(MemoryId::SD_CARD, &[])?;
        let entry = map.find(MemoryId::SD_CARD)?;
        assert_eq!(entry.status, DeviceStatus::Ready);
        assert_eq!(entry.size(), 16 * 512);
        assert!(entry.check_range(15 * 512, 512).is_ok());
        assert_eq!(entry.check_range(15 * 512, 513), Err(Error::AddressError));
        Ok(())
    }

    #[test]
    fn bad_unit_size_is_not_configured() -> Result<(), Error> {
        let mut sd = MockCard::new(16);
        sd.unit_size = 500;
        let mut map = ExternalMap::new();
        map.push(ExternalMapEntry::new(MemoryId::SD_CARD, 512, &sd))?;

        assert_eq!(map.configure(MemoryId::SD_CARD, &[]), Err(Error::NotConfigured));
        let entry = map.find(MemoryId::SD_CARD)?;
        assert_eq!(entry.status, DeviceStatus::Failed(Error::NotConfigured));
        assert_eq!(entry.status.code(), 10205);
        Ok(())
    }

    #[test]
    fn property_lookup_and_attributes() -> Result<(), Error> {
        let sd = MockCard::new(16);
        let mut properties = ExternalPropertyMap::new();
        properties.push(ExternalPropertyEntry {
            memory_id: MemoryId::SD_CARD,
            source: &sd,
        })?;

        assert_eq!(properties.get(MemoryId::SD_CARD, 5)?, 512);
        assert_eq!(properties.get(MemoryId::SD_CARD, 6), Err(Error::UnknownProperty));
        assert_eq!(properties.get(MemoryId::MMC_CARD, 0), Err(Error::UnknownProperty));

        let attributes = properties.attributes(MemoryId::SD_CARD)?;
        assert_eq!(
            attributes.available,
            ExternalProperty::MemorySizeInKbytes.mask() | ExternalProperty::BlockSize.mask()
        );
        assert_eq!(attributes.size_kb, 8);
        assert_eq!(attributes.block_size, 512);
        assert_eq!(attributes.page_size, 0);
        Ok(())
    }
}
