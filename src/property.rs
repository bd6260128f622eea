//! The property store.
//!
//! Properties describe the bootloader and the memory it manages. Most are
//! read-only, and are derived from the memory map when the store is
//! initialized. A host changes the few writable properties through
//! [`PropertyStore::set_u32`].

use crate::{
    external::{ExternalMemoryAttributes, ExternalPropertyMap},
    fmt, Error, MapEntry, Memory, MemoryClass, MemoryId, MemoryMap, ReservedRegion,
};

/// Index of the flash reservation in [`PropertyStore::reserved_regions`].
pub const FLASH_RESERVED_REGION_INDEX: usize = 0;
/// Index of the RAM reservation in [`PropertyStore::reserved_regions`].
pub const RAM_RESERVED_REGION_INDEX: usize = 1;
/// How many reserved regions the store holds.
pub const RESERVED_REGION_COUNT: usize = 2;

/// How many RAM regions the store describes.
pub const RAM_COUNT: usize = 3;

/// A version number, packed as `name.major.minor.bugfix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    /// An ASCII letter that names the component.
    pub name: u8,
    /// Incompatible changes.
    pub major: u8,
    /// Compatible additions.
    pub minor: u8,
    /// Fixes only.
    pub bugfix: u8,
}

impl Version {
    /// A version named with the ASCII letter `name`.
    pub const fn new(name: u8, major: u8, minor: u8, bugfix: u8) -> Self {
        Self {
            name,
            major,
            minor,
            bugfix,
        }
    }

    /// Returns the packed version.
    ///
    /// ```
    /// use imxrt_bootloader::property::Version;
    ///
    /// assert_eq!(Version::new(b'K', 2, 1, 3).to_u32(), 0x4B02_0103);
    /// ```
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.name, self.major, self.minor, self.bugfix])
    }
}

/// The version of this bootloader.
pub const BOOTLOADER_VERSION: Version = Version::new(b'K', 2, 0, 0);

/// Property tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PropertyTag {
    /// [`BOOTLOADER_VERSION`], packed.
    BootloaderVersion = 0x01,
    /// Start of the first flash region.
    FlashStartAddress = 0x03,
    /// Size of the first flash region.
    FlashSizeInBytes = 0x04,
    /// 1 if writes are read back and compared. The only writable property.
    VerifyWrites = 0x0a,
    /// The flash and RAM reservations.
    ReservedRegions = 0x0c,
    /// Start of the RAM selected by the memory ID: 0 ITCM, 1 DTCM, 2 OCRAM.
    RamStartAddress = 0x0e,
    /// Size of the RAM selected by the memory ID.
    RamSizeInBytes = 0x0f,
    /// The board's version, packed.
    TargetVersion = 0x18,
    /// What an external memory reports about itself.
    ExternalMemoryAttributes = 0x19,
}

impl PropertyTag {
    /// Decode a property tag.
    pub const fn from_tag(tag: u32) -> Option<Self> {
        use PropertyTag::*;
        Some(match tag {
            0x01 => BootloaderVersion,
            0x03 => FlashStartAddress,
            0x04 => FlashSizeInBytes,
            0x0a => VerifyWrites,
            0x0c => ReservedRegions,
            0x0e => RamStartAddress,
            0x0f => RamSizeInBytes,
            0x18 => TargetVersion,
            0x19 => ExternalMemoryAttributes,
            _ => return None,
        })
    }
}

/// The value of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PropertyValue {
    /// A single word.
    Word(u32),
    /// The flash and RAM reservations.
    ReservedRegions([ReservedRegion; RESERVED_REGION_COUNT]),
    /// An external memory's attributes.
    ExternalMemoryAttributes(ExternalMemoryAttributes),
}

/// Persistent bootloader properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyStore {
    bootloader_version: Version,
    target_version: Version,
    flash_start_address: u32,
    flash_size: u32,
    ram_start_address: [u32; RAM_COUNT],
    ram_size: [u32; RAM_COUNT],
    verify_writes: bool,
    reserved_regions: [ReservedRegion; RESERVED_REGION_COUNT],
}

impl PropertyStore {
    /// Create a store with nothing reserved.
    ///
    /// Memory properties are zero until [`init`](Self::init).
    pub const fn new(target_version: Version) -> Self {
        Self {
            bootloader_version: BOOTLOADER_VERSION,
            target_version,
            flash_start_address: 0,
            flash_size: 0,
            ram_start_address: [0; RAM_COUNT],
            ram_size: [0; RAM_COUNT],
            verify_writes: true,
            reserved_regions: [ReservedRegion::NONE; RESERVED_REGION_COUNT],
        }
    }

    /// Refresh the memory properties from the memory map.
    ///
    /// Flash properties describe the first flash region. RAM index 0 is
    /// ITCM, 1 is DTCM, and 2 is OCRAM. A RAM that's not in the map has
    /// zero size.
    pub fn init(&mut self, map: &MemoryMap<'_>) {
        if let Some(flash) = map
            .iter()
            .find(|entry| entry.property.class() == MemoryClass::Flash)
        {
            self.flash_start_address = flash.start_address;
            self.flash_size = saturating_size(flash);
        }

        let rams = [Memory::Itcm, Memory::Dtcm, Memory::Ocram];
        for (index, memory) in rams.into_iter().enumerate() {
            let entry = map
                .iter()
                .find(|entry| entry.tagged_memory() == Some(memory));
            self.ram_start_address[index] = entry.map_or(0, |entry| entry.start_address);
            self.ram_size[index] = entry.map_or(0, saturating_size);
        }
        fmt::debug!(
            "Property store has flash {:#010X} +{:#X}",
            self.flash_start_address,
            self.flash_size
        );
    }

    /// Returns `true` if writes are read back and compared.
    pub const fn verify_writes(&self) -> bool {
        self.verify_writes
    }

    /// Returns the flash and RAM reservations.
    pub const fn reserved_regions(&self) -> &[ReservedRegion; RESERVED_REGION_COUNT] {
        &self.reserved_regions
    }

    /// Change a reservation.
    ///
    /// `index` is [`FLASH_RESERVED_REGION_INDEX`] or [`RAM_RESERVED_REGION_INDEX`].
    pub fn set_reserved_region(
        &mut self,
        index: usize,
        region: ReservedRegion,
    ) -> Result<(), Error> {
        let slot = self
            .reserved_regions
            .get_mut(index)
            .ok_or(Error::OutOfRange)?;
        if region.start_address > region.end_address {
            return Err(Error::InvalidArgument);
        }
        *slot = region;
        Ok(())
    }

    /// Read a property.
    ///
    /// `memory_id` selects the RAM index for the RAM properties, and the
    /// device for the external memory attributes. Other properties ignore it.
    pub fn get(
        &self,
        tag: u32,
        memory_id: MemoryId,
        external: &ExternalPropertyMap<'_>,
    ) -> Result<PropertyValue, Error> {
        let tag = PropertyTag::from_tag(tag).ok_or(Error::UnknownProperty)?;
        let ram_index = || {
            let index = memory_id.0 as usize;
            if index < RAM_COUNT {
                Ok(index)
            } else {
                Err(Error::OutOfRange)
            }
        };
        Ok(match tag {
            PropertyTag::BootloaderVersion => PropertyValue::Word(self.bootloader_version.to_u32()),
            PropertyTag::TargetVersion => PropertyValue::Word(self.target_version.to_u32()),
            PropertyTag::FlashStartAddress => PropertyValue::Word(self.flash_start_address),
            PropertyTag::FlashSizeInBytes => PropertyValue::Word(self.flash_size),
            PropertyTag::VerifyWrites => PropertyValue::Word(self.verify_writes as u32),
            PropertyTag::RamStartAddress => {
                PropertyValue::Word(self.ram_start_address[ram_index()?])
            }
            PropertyTag::RamSizeInBytes => PropertyValue::Word(self.ram_size[ram_index()?]),
            PropertyTag::ReservedRegions => PropertyValue::ReservedRegions(self.reserved_regions),
            PropertyTag::ExternalMemoryAttributes => {
                if !memory_id.is_external() {
                    return Err(Error::InvalidArgument);
                }
                PropertyValue::ExternalMemoryAttributes(external.attributes(memory_id)?)
            }
        })
    }

    /// Write a single-word property.
    ///
    /// Only `VerifyWrites` is writable, and it accepts 0 or 1.
    pub fn set_u32(&mut self, tag: u32, value: u32) -> Result<(), Error> {
        match PropertyTag::from_tag(tag) {
            None => Err(Error::UnknownProperty),
            Some(PropertyTag::VerifyWrites) => {
                self.verify_writes = match value {
                    0 => false,
                    1 => true,
                    _ => return Err(Error::InvalidPropertyValue),
                };
                fmt::info!("Verify writes set to {}", value);
                Ok(())
            }
            Some(_) => Err(Error::ReadOnlyProperty),
        }
    }
}

/// A region that spans the whole address space is 4 GiB, which doesn't fit
/// in a property word.
fn saturating_size(entry: &MapEntry<'_>) -> u32 {
    u32::try_from(entry.size()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::{PropertyStore, PropertyTag, PropertyValue, Version};
    use crate::{
        external::ExternalPropertyMap, Error, MapEntry, Memory, MemoryId, MemoryMap,
        RegionInterface, RegionProperty, ReservedRegion, WriteStatus,
    };

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

    fn ram(start: u32, end: u32, memory: Memory) -> MapEntry<'static> {
        MapEntry::new(start, end, RAM, MemoryId::INTERNAL, &NOTHING).memory(memory)
    }

    fn map() -> MemoryMap<'static> {
        let mut map = MemoryMap::new();
        for entry in [
            ram(0x0000_0000, 0x0001_FFFF, Memory::Itcm),
            ram(0x2000_0000, 0x2001_FFFF, Memory::Dtcm),
            ram(0x2020_0000, 0x2023_FFFF, Memory::Ocram),
            MapEntry::new(
                0x6000_0000,
                0x607F_FFFF,
                RegionProperty::EXECUTABLE,
                MemoryId::FLEXSPI_NOR,
                &NOTHING,
            ),
        ] {
            map.push(entry).unwrap();
        }
        map
    }

    fn word(store: &PropertyStore, tag: PropertyTag, memory_id: u32) -> Result<u32, Error> {
        match store.get(tag as u32, MemoryId(memory_id), &ExternalPropertyMap::new())? {
            PropertyValue::Word(word) => Ok(word),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn memory_properties_follow_the_map() -> Result<(), Error> {
        let mut store = PropertyStore::new(Version::new(b'T', 1, 0, 0));
        store.init(&map());

        assert_eq!(word(&store, PropertyTag::FlashStartAddress, 0)?, 0x6000_0000);
        assert_eq!(word(&store, PropertyTag::FlashSizeInBytes, 0)?, 8 * 1024 * 1024);
        const RAM_TABLE: &[(u32, u32, u32)] = &[
            (0, 0x0000_0000, 128 * 1024),
            (1, 0x2000_0000, 128 * 1024),
            (2, 0x2020_0000, 256 * 1024),
        ];
        for &(index, start, size) in RAM_TABLE {
            assert_eq!(word(&store, PropertyTag::RamStartAddress, index)?, start);
            assert_eq!(word(&store, PropertyTag::RamSizeInBytes, index)?, size);
        }
        assert_eq!(word(&store, PropertyTag::RamSizeInBytes, 3), Err(Error::OutOfRange));
        assert_eq!(word(&store, PropertyTag::TargetVersion, 0)?, 0x5401_0000);
        Ok(())
    }

    #[test]
    fn sizes_saturate() -> Result<(), Error> {
        let mut map = MemoryMap::new();
        map.push(ram(0, u32::MAX, Memory::Ocram))?;
        let mut store = PropertyStore::new(Version::new(b'T', 1, 0, 0));
        store.init(&map);
        assert_eq!(word(&store, PropertyTag::RamSizeInBytes, 2)?, u32::MAX);
        assert_eq!(word(&store, PropertyTag::RamSizeInBytes, 0)?, 0);
        Ok(())
    }

    #[test]
    fn only_verify_writes_is_writable() -> Result<(), Error> {
        let mut store = PropertyStore::new(Version::new(b'T', 1, 0, 0));
        assert!(store.verify_writes());

        store.set_u32(PropertyTag::VerifyWrites as u32, 0)?;
        assert!(!store.verify_writes());
        assert_eq!(
            store.set_u32(PropertyTag::VerifyWrites as u32, 2),
            Err(Error::InvalidPropertyValue)
        );
        assert_eq!(
            store.set_u32(PropertyTag::FlashSizeInBytes as u32, 0),
            Err(Error::ReadOnlyProperty)
        );
        assert_eq!(store.set_u32(0x02, 0), Err(Error::UnknownProperty));
        assert_eq!(
            store.get(0x7F, MemoryId::INTERNAL, &ExternalPropertyMap::new()),
            Err(Error::UnknownProperty)
        );
        Ok(())
    }

    #[test]
    fn reserved_regions() -> Result<(), Error> {
        let mut store = PropertyStore::new(Version::new(b'T', 1, 0, 0));
        let flash = ReservedRegion::new(0x6000_0000, 0x6000_FFFF);
        store.set_reserved_region(super::FLASH_RESERVED_REGION_INDEX, flash)?;
        assert_eq!(
            store.set_reserved_region(2, flash),
            Err(Error::OutOfRange)
        );
        assert_eq!(
            store.set_reserved_region(1, ReservedRegion::new(2, 1)),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            store.get(
                PropertyTag::ReservedRegions as u32,
                MemoryId::INTERNAL,
                &ExternalPropertyMap::new()
            )?,
            PropertyValue::ReservedRegions([flash, ReservedRegion::NONE])
        );
        Ok(())
    }
}
