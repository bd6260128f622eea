//! The bootloader context, and the memory router.
//!
//! A [`BootloaderContext`] owns every table that describes memory: the
//! memory map, the external device map, the external property sources, the
//! flash access-control banks, and the property store. The `mem_*` methods
//! route each request to exactly one region or device, after applying the
//! reserved-region and execute-only policies.
//!
//! Build a context with a [`ContextBuilder`]:
//!
//! ```
//! use imxrt_bootloader::{
//!     ContextBuilder, DeviceMemory, Family, MapEntry, MemoryId, NormalMemory, RegionProperty,
//! };
//!
//! // Safety: the test doesn't access the memory.
//! static RAM: NormalMemory = unsafe { NormalMemory::new() };
//! static PERIPHERALS: DeviceMemory = unsafe { DeviceMemory::new() };
//!
//! let family = Family::Imxrt1050;
//! let sizes = family.default_flexram_banks().sizes(family).unwrap();
//!
//! let ctx = ContextBuilder::new(0x6000_2000)
//!     .internal_ram(family, sizes, &RAM)
//!     .region(MapEntry::new(
//!         0x4000_0000,
//!         0x4FFF_FFFF,
//!         RegionProperty::TYPE_DEVICE,
//!         MemoryId::INTERNAL,
//!         &PERIPHERALS,
//!     ))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(ctx.memory_map().len(), 4);
//! assert!(ctx.find_map_entry(0x2020_0000, 4).is_ok());
//! ```

use crate::{
    external::{
        ExternalMap, ExternalMapEntry, ExternalMemoryAttributes, ExternalPropertyEntry,
        ExternalPropertyMap, Geometry,
    },
    family::{Family, FlexRamSizes},
    fmt,
    property::{PropertyStore, PropertyValue, Version},
    protection::{self, FlashAccessControl, MAX_FLASH_BANKS},
    Error, MapEntry, MemoryClass, MemoryId, MemoryMap, RegionInterface, RegionProperty,
    ReservedRegion, WriteStatus, MAX_EXTERNAL_MEMORIES, MAX_MEMORY_REGIONS,
};

/// Chunk size for read-back verification and blank checks.
const SCRATCH_SIZE: usize = 64;

/// Assembles a [`BootloaderContext`].
///
/// Setters never fail. [`build`](Self::build) checks the configuration.
#[derive(Clone)]
pub struct ContextBuilder<'a> {
    regions: heapless::Vec<MapEntry<'a>, MAX_MEMORY_REGIONS>,
    /// Internal RAMs without any banks, and where they'd sit in `regions`.
    empty_ram: heapless::Vec<(usize, MapEntry<'a>), 3>,
    external: heapless::Vec<ExternalMapEntry<'a>, MAX_EXTERNAL_MEMORIES>,
    external_properties: heapless::Vec<ExternalPropertyEntry<'a>, MAX_EXTERNAL_MEMORIES>,
    flash_banks: heapless::Vec<&'a dyn FlashAccessControl, MAX_FLASH_BANKS>,
    reserved_regions: [ReservedRegion; crate::property::RESERVED_REGION_COUNT],
    overflow: bool,
    reset_address: u32,
    application_vector_table: u32,
    default_vector_table: u32,
    target_version: Version,
    verify_writes: bool,
}

impl<'a> ContextBuilder<'a> {
    /// Create a builder for an application whose vector table is at
    /// `application_vector_table`.
    ///
    /// The bootloader's reset address defaults to the address of this
    /// program's reset handler.
    pub fn new(application_vector_table: u32) -> Self {
        Self {
            regions: heapless::Vec::new(),
            empty_ram: heapless::Vec::new(),
            external: heapless::Vec::new(),
            external_properties: heapless::Vec::new(),
            flash_banks: heapless::Vec::new(),
            reserved_regions: [ReservedRegion::NONE; crate::property::RESERVED_REGION_COUNT],
            overflow: false,
            reset_address: crate::bootloader_reset_address(),
            application_vector_table,
            default_vector_table: 0,
            target_version: Version::new(b'T', 1, 0, 0),
            verify_writes: true,
        }
    }

    /// Add a memory map entry.
    ///
    /// Entries are searched in the order they're added.
    pub fn region(&mut self, entry: MapEntry<'a>) -> &mut Self {
        self.overflow |= self.regions.push(entry).is_err();
        self
    }

    /// Add ITCM, DTCM, and OCRAM entries for the chip.
    ///
    /// Each entry is executable RAM, and it's tagged so that
    /// [`BootloaderContext::update_flexram`] can resize it. A RAM with
    /// zero size stays out of the map until it's resized.
    pub fn internal_ram(
        &mut self,
        family: Family,
        sizes: FlexRamSizes,
        interface: &'a dyn RegionInterface,
    ) -> &mut Self {
        for ram in family.internal_regions(sizes) {
            let entry = MapEntry::new(
                ram.start_address,
                ram.start_address + ram.size.saturating_sub(1),
                RegionProperty::EXECUTABLE | RegionProperty::TYPE_RAM,
                MemoryId::INTERNAL,
                interface,
            )
            .memory(ram.memory);
            if ram.size == 0 {
                self.overflow |= self.empty_ram.push((self.regions.len(), entry)).is_err();
            } else {
                self.region(entry);
            }
        }
        self
    }

    /// Add an external device.
    pub fn external(&mut self, entry: ExternalMapEntry<'a>) -> &mut Self {
        self.overflow |= self.external.push(entry).is_err();
        self
    }

    /// Add an external device's property source.
    pub fn external_property(&mut self, entry: ExternalPropertyEntry<'a>) -> &mut Self {
        self.overflow |= self.external_properties.push(entry).is_err();
        self
    }

    /// Add a flash bank that reports execute-only access control.
    pub fn flash_bank(&mut self, bank: &'a dyn FlashAccessControl) -> &mut Self {
        self.overflow |= self.flash_banks.push(bank).is_err();
        self
    }

    /// Reserve the flash range that holds the bootloader.
    pub fn flash_reserved_region(&mut self, region: ReservedRegion) -> &mut Self {
        self.reserved_regions[crate::property::FLASH_RESERVED_REGION_INDEX] = region;
        self
    }

    /// Reserve the RAM range that the bootloader uses.
    pub fn ram_reserved_region(&mut self, region: ReservedRegion) -> &mut Self {
        self.reserved_regions[crate::property::RAM_RESERVED_REGION_INDEX] = region;
        self
    }

    /// Set the bootloader's reset address.
    ///
    /// The application gate never accepts this address.
    pub fn reset_address(&mut self, reset_address: u32) -> &mut Self {
        self.reset_address = reset_address;
        self
    }

    /// Set the vector table address that's restored on shutdown.
    pub fn default_vector_table(&mut self, address: u32) -> &mut Self {
        self.default_vector_table = address;
        self
    }

    /// Set the target version reported by the property store.
    pub fn target_version(&mut self, version: Version) -> &mut Self {
        self.target_version = version;
        self
    }

    /// Choose whether internal writes are read back and compared.
    ///
    /// The default is `true`.
    pub fn verify_writes(&mut self, verify: bool) -> &mut Self {
        self.verify_writes = verify;
        self
    }

    /// Check the configuration, and produce the context.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` if a table overflowed.
    /// - `InvalidArgument` for an inverted or overlapping region, an
    ///   external device with an internal ID, a duplicate device ID, or an
    ///   inverted reserved region.
    pub fn build(&self) -> Result<BootloaderContext<'a>, Error> {
        if self.overflow {
            fmt::error!("Too many entries for the bootloader tables");
            return Err(Error::OutOfRange);
        }

        let mut memory_map = MemoryMap::new();
        for entry in &self.regions {
            memory_map.push(*entry)?;
        }
        for (position, entry) in &self.empty_ram {
            memory_map.park(*position, *entry)?;
        }
        let mut external_map = ExternalMap::new();
        for entry in &self.external {
            external_map.push(*entry)?;
        }
        let mut external_properties = ExternalPropertyMap::new();
        for entry in &self.external_properties {
            external_properties.push(*entry)?;
        }

        let mut property_store = PropertyStore::new(self.target_version);
        for (index, region) in self.reserved_regions.iter().enumerate() {
            property_store.set_reserved_region(index, *region)?;
        }
        property_store.set_u32(
            crate::property::PropertyTag::VerifyWrites as u32,
            self.verify_writes as u32,
        )?;
        property_store.init(&memory_map);

        Ok(BootloaderContext {
            memory_map,
            external_map,
            external_properties,
            flash_banks: self.flash_banks.clone(),
            property_store,
            reset_address: self.reset_address,
            application_vector_table: self.application_vector_table,
            default_vector_table: self.default_vector_table,
        })
    }
}

/// Owns the memory tables, and routes memory requests.
pub struct BootloaderContext<'a> {
    memory_map: MemoryMap<'a>,
    external_map: ExternalMap<'a>,
    external_properties: ExternalPropertyMap<'a>,
    flash_banks: heapless::Vec<&'a dyn FlashAccessControl, MAX_FLASH_BANKS>,
    property_store: PropertyStore,
    reset_address: u32,
    application_vector_table: u32,
    default_vector_table: u32,
}

fn buffer_length(length: usize) -> Result<u32, Error> {
    u32::try_from(length).map_err(|_| Error::InvalidArgument)
}

impl<'a> BootloaderContext<'a> {
    /// Returns the memory map.
    pub fn memory_map(&self) -> &MemoryMap<'a> {
        &self.memory_map
    }

    /// Returns the external device map.
    pub fn external_map(&self) -> &ExternalMap<'a> {
        &self.external_map
    }

    /// Returns the property store.
    pub fn property_store(&self) -> &PropertyStore {
        &self.property_store
    }

    /// Returns the property store, for changing reservations.
    pub fn property_store_mut(&mut self) -> &mut PropertyStore {
        &mut self.property_store
    }

    /// The bootloader's reset address.
    pub fn reset_address(&self) -> u32 {
        self.reset_address
    }

    /// Where the application's vector table is.
    pub fn application_vector_table(&self) -> u32 {
        self.application_vector_table
    }

    /// The vector table address restored on shutdown.
    pub fn default_vector_table(&self) -> u32 {
        self.default_vector_table
    }

    /// Find the first memory map entry that holds every byte of the range.
    pub fn find_map_entry(&self, address: u32, length: u32) -> Result<&MapEntry<'a>, Error> {
        self.memory_map.find(address, length).map_err(|err| {
            fmt::warning!("No region holds {:#010X} +{:#X}", address, length);
            err
        })
    }

    /// Find an external device.
    pub fn find_external_map_entry(
        &self,
        memory_id: MemoryId,
    ) -> Result<&ExternalMapEntry<'a>, Error> {
        self.external_map.find(memory_id)
    }

    /// Returns the position of an external device in the external map.
    pub fn find_external_map_index(&self, memory_id: MemoryId) -> Result<usize, Error> {
        self.external_map.index_of(memory_id)
    }

    /// Query a property of an external device.
    pub fn find_external_property(&self, memory_id: MemoryId, tag: u32) -> Result<u32, Error> {
        self.external_properties.get(memory_id, tag)
    }

    /// Collect every property that an external device answers.
    pub fn external_memory_attributes(
        &self,
        memory_id: MemoryId,
    ) -> Result<ExternalMemoryAttributes, Error> {
        self.external_properties.attributes(memory_id)
    }

    /// Returns `true` if any byte of the range is reserved.
    pub fn mem_is_block_reserved(&self, address: u32, length: u32) -> bool {
        protection::is_block_reserved(self.property_store.reserved_regions(), address, length)
    }

    /// Returns `true` if the range is execute-only protected.
    pub fn is_in_execute_only_region(&self, address: u32, length: u32) -> bool {
        protection::is_in_execute_only_region(&self.flash_banks, address, length)
    }

    /// Initialize every internal region.
    ///
    /// A failure for a region with [`RegionProperty::SKIP_INIT_ERROR`] is
    /// ignored.
    pub fn mem_init(&self) -> Result<(), Error> {
        for entry in self.memory_map.iter() {
            if let Err(err) = entry.interface.init() {
                if entry.property.contains(RegionProperty::SKIP_INIT_ERROR) {
                    fmt::warning!(
                        "Ignoring init error {} for {:#010X}",
                        err.code(),
                        entry.start_address
                    );
                } else {
                    fmt::error!(
                        "Init failed with {} for {:#010X}",
                        err.code(),
                        entry.start_address
                    );
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Configure an external device, and record its geometry.
    ///
    /// Internal memory can't be configured through the router.
    pub fn mem_config(&mut self, memory_id: MemoryId, config: &[u32]) -> Result<Geometry, Error> {
        if !memory_id.is_external() {
            return Err(Error::UnsupportedCommand);
        }
        self.external_map.configure(memory_id, config)
    }

    /// Resolve an internal request.
    ///
    /// Any ID other than [`MemoryId::INTERNAL`] must match the entry's ID.
    fn resolve(
        &self,
        address: u32,
        length: u32,
        memory_id: MemoryId,
    ) -> Result<&MapEntry<'a>, Error> {
        let entry = self.find_map_entry(address, length)?;
        if memory_id != MemoryId::INTERNAL && entry.memory_id != memory_id {
            fmt::warning!(
                "{:#010X} belongs to {:#X}, not {:#X}",
                address,
                entry.memory_id.0,
                memory_id.0
            );
            return Err(Error::RangeInvalid);
        }
        Ok(entry)
    }

    fn ready_external(
        &self,
        address: u32,
        length: u32,
        memory_id: MemoryId,
    ) -> Result<&ExternalMapEntry<'a>, Error> {
        let entry = self.external_map.find(memory_id)?;
        entry.check_range(address, length)?;
        Ok(entry)
    }

    /// Apply the policy checks that precede a write or an erase.
    ///
    /// A command layer can call this before it streams data. Checks that
    /// the range is in one region (or fits the external device), isn't
    /// reserved, and isn't execute-only.
    pub fn mem_write_check(
        &self,
        address: u32,
        length: u32,
        memory_id: MemoryId,
    ) -> Result<(), Error> {
        if length == 0 {
            return Ok(());
        }
        if memory_id.is_external() {
            self.ready_external(address, length, memory_id)?;
            return Ok(());
        }
        self.write_policy(address, length, memory_id).map(|_| ())
    }

    fn write_policy(
        &self,
        address: u32,
        length: u32,
        memory_id: MemoryId,
    ) -> Result<&MapEntry<'a>, Error> {
        let entry = self.resolve(address, length, memory_id)?;
        if self.mem_is_block_reserved(address, length) {
            return Err(Error::WriteProtected);
        }
        if self.is_in_execute_only_region(address, length) {
            return Err(Error::AppOverlapWithExecuteOnlyRegion);
        }
        Ok(entry)
    }

    /// Read `buffer.len()` bytes starting at `address`.
    pub fn mem_read(
        &self,
        address: u32,
        buffer: &mut [u8],
        memory_id: MemoryId,
    ) -> Result<(), Error> {
        let length = buffer_length(buffer.len())?;
        if length == 0 {
            return Ok(());
        }
        if memory_id.is_external() {
            let entry = self.ready_external(address, length, memory_id)?;
            return entry.interface.read(address, buffer);
        }

        let entry = self.resolve(address, length, memory_id)?;
        if self.is_in_execute_only_region(address, length) {
            return Err(Error::AppOverlapWithExecuteOnlyRegion);
        }
        entry.interface.read(address, buffer)
    }

    /// Write `data` starting at `address`.
    ///
    /// `WriteStatus::Cumulative` means the data is staged. Call
    /// [`mem_finalize`](Self::mem_finalize) to commit it.
    pub fn mem_write(
        &self,
        address: u32,
        data: &[u8],
        memory_id: MemoryId,
    ) -> Result<WriteStatus, Error> {
        let length = buffer_length(data.len())?;
        if length == 0 {
            return Ok(WriteStatus::Complete);
        }
        if memory_id.is_external() {
            let entry = self.ready_external(address, length, memory_id)?;
            return entry.interface.write(address, data);
        }

        let entry = self.write_policy(address, length, memory_id)?;
        let status = entry.interface.write(address, data)?;
        if self.property_store.verify_writes() && entry.property.class() != MemoryClass::Device {
            self.verify(entry.interface, address, data)?;
        }
        Ok(status)
    }

    /// Read back `expected`, and compare.
    fn verify(
        &self,
        interface: &dyn RegionInterface,
        address: u32,
        expected: &[u8],
    ) -> Result<(), Error> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut at = address;
        for chunk in expected.chunks(SCRATCH_SIZE) {
            let actual = &mut scratch[..chunk.len()];
            interface.read(at, actual)?;
            if actual != chunk {
                fmt::error!("Verify failed near {:#010X}", at);
                return Err(Error::VerifyFailed);
            }
            at = at.wrapping_add(chunk.len() as u32);
        }
        Ok(())
    }

    /// Fill `length` bytes with a repeating, little-endian `pattern`.
    ///
    /// Only internal memory supports fills.
    pub fn mem_fill(
        &self,
        address: u32,
        length: u32,
        pattern: u32,
        memory_id: MemoryId,
    ) -> Result<WriteStatus, Error> {
        if memory_id.is_external() {
            return Err(Error::UnsupportedCommand);
        }
        if length == 0 {
            return Ok(WriteStatus::Complete);
        }
        let entry = self.write_policy(address, length, memory_id)?;
        entry.interface.fill(address, length, pattern)
    }

    /// Erase `length` bytes starting at `address`.
    pub fn mem_erase(&self, address: u32, length: u32, memory_id: MemoryId) -> Result<(), Error> {
        if length == 0 {
            return Ok(());
        }
        if memory_id.is_external() {
            let entry = self.ready_external(address, length, memory_id)?;
            return entry.interface.erase(address, length);
        }
        let entry = self.write_policy(address, length, memory_id)?;
        entry.interface.erase(address, length)
    }

    /// Flush every region and device.
    pub fn mem_flush(&self) -> Result<(), Error> {
        for entry in self.memory_map.iter() {
            entry.interface.flush()?;
        }
        for entry in self.external_map.iter() {
            entry.interface.flush()?;
        }
        Ok(())
    }

    /// Finalize every region and device, committing cumulative writes.
    pub fn mem_finalize(&self) -> Result<(), Error> {
        for entry in self.memory_map.iter() {
            entry.interface.finalize()?;
        }
        for entry in self.external_map.iter() {
            entry.interface.finalize()?;
        }
        Ok(())
    }

    /// Returns `true` if every byte of the range reads as `0xFF`.
    pub fn mem_is_erased(
        &self,
        address: u32,
        length: u32,
        memory_id: MemoryId,
    ) -> Result<bool, Error> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut at = address;
        let mut remaining = length;
        while remaining > 0 {
            let count = remaining.min(SCRATCH_SIZE as u32);
            let chunk = &mut scratch[..count as usize];
            self.mem_read(at, chunk, memory_id)?;
            if chunk.iter().any(|byte| *byte != 0xFF) {
                return Ok(false);
            }
            at = at.wrapping_add(count);
            remaining -= count;
        }
        Ok(true)
    }

    /// Erase an entire SD or MMC device.
    pub fn mem_erase_all(&self, memory_id: MemoryId) -> Result<(), Error> {
        match memory_id {
            MemoryId::SD_CARD => self.sd_mem_erase_all(),
            MemoryId::MMC_CARD => self.mmc_mem_erase_all(),
            _ => Err(Error::UnsupportedCommand),
        }
    }

    fn card_erase_all(&self, memory_id: MemoryId) -> Result<(), Error> {
        let entry = self.external_map.find(memory_id)?;
        if entry.status != crate::external::DeviceStatus::Ready {
            return Err(Error::NotConfigured);
        }
        fmt::info!("Erasing all of {:#X}", memory_id.0);
        entry.interface.erase_all()
    }

    /// Erase the entire SD card.
    pub fn sd_mem_erase_all(&self) -> Result<(), Error> {
        self.card_erase_all(MemoryId::SD_CARD)
    }

    /// Erase the entire MMC device.
    pub fn mmc_mem_erase_all(&self) -> Result<(), Error> {
        self.card_erase_all(MemoryId::MMC_CARD)
    }

    /// Query an SD card property.
    pub fn sd_get_property(&self, tag: u32) -> Result<u32, Error> {
        self.find_external_property(MemoryId::SD_CARD, tag)
    }

    /// Query an MMC device property.
    pub fn mmc_get_property(&self, tag: u32) -> Result<u32, Error> {
        self.find_external_property(MemoryId::MMC_CARD, tag)
    }

    /// Refresh the property store from the memory map.
    pub fn property_init(&mut self) {
        self.property_store.init(&self.memory_map);
    }

    /// Read a property.
    pub fn get_property(&self, tag: u32, memory_id: MemoryId) -> Result<PropertyValue, Error> {
        self.property_store.get(tag, memory_id, &self.external_properties)
    }

    /// Write a single-word property.
    pub fn set_property_u32(&mut self, tag: u32, value: u32) -> Result<(), Error> {
        self.property_store.set_u32(tag, value)
    }

    /// Resize the internal RAM entries once the FlexRAM sizes are known.
    ///
    /// A RAM whose size becomes zero leaves the map, and comes back once
    /// its size is non-zero again. The property store is refreshed
    /// afterwards.
    pub fn update_flexram(&mut self, family: Family, sizes: FlexRamSizes) -> Result<(), Error> {
        for ram in family.internal_regions(sizes) {
            match self.memory_map.resize(ram.memory, ram.start_address, ram.size) {
                Err(Error::RangeInvalid) if ram.size == 0 => {}
                result => result?,
            }
        }
        self.property_init();
        Ok(())
    }
}
