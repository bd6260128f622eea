//! Region interfaces.
//!
//! A [`RegionInterface`] performs memory operations for one class of
//! memory. The memory map routes each request to the interface of the
//! region that holds the request. Interfaces always receive absolute
//! addresses; an interface that drives a device renormalizes them to device
//! offsets.
//!
//! The bootloader is single threaded. Interfaces take `&self`, so an
//! interface that keeps state uses interior mutability.

use core::cell::RefCell;

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::{fmt, Error, WriteStatus};

/// Memory operations for one region of memory.
///
/// Only `read` and `write` are required. The remaining operations have
/// defaults that either succeed trivially (`init`, `flush`, `finalize`)
/// or report `UnsupportedCommand`.
pub trait RegionInterface {
    /// Prepare the memory for use.
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }
    /// Read `buffer.len()` bytes starting at `address`.
    fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error>;
    /// Write `data` starting at `address`.
    fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error>;
    /// Fill `length` bytes starting at `address` with a repeating,
    /// little-endian `pattern`.
    fn fill(&self, address: u32, length: u32, pattern: u32) -> Result<WriteStatus, Error> {
        fill_with_writes(self, address, length, pattern)
    }
    /// Write back any staged data.
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
    /// Complete a sequence of cumulative writes.
    fn finalize(&self) -> Result<(), Error> {
        self.flush()
    }
    /// Erase `length` bytes starting at `address`.
    fn erase(&self, _address: u32, _length: u32) -> Result<(), Error> {
        Err(Error::UnsupportedCommand)
    }
    /// Apply a device configuration.
    fn config(&self, _config: &[u32]) -> Result<(), Error> {
        Err(Error::UnsupportedCommand)
    }
    /// Erase the entire device.
    fn erase_all(&self) -> Result<(), Error> {
        Err(Error::UnsupportedCommand)
    }
}

/// Implements `fill` in terms of `write`, using a small pattern buffer.
fn fill_with_writes<I: RegionInterface + ?Sized>(
    interface: &I,
    mut address: u32,
    length: u32,
    pattern: u32,
) -> Result<WriteStatus, Error> {
    const CHUNK: usize = 32;
    let mut chunk = [0u8; CHUNK];
    for (idx, byte) in chunk.iter_mut().enumerate() {
        *byte = pattern.to_le_bytes()[idx % 4];
    }

    let mut remaining = length as usize;
    let mut status = WriteStatus::Complete;
    while remaining > 0 {
        let count = remaining.min(CHUNK);
        status = status.and(interface.write(address, &chunk[..count])?);
        address = address.wrapping_add(count as u32);
        remaining -= count;
    }
    Ok(status)
}

/// Normal memory, like RAM.
///
/// Multi-word loads and stores are allowed.
#[derive(Debug)]
pub struct NormalMemory {
    _priv: (),
}

impl NormalMemory {
    /// Create an interface that accesses memory at absolute addresses.
    ///
    /// # Safety
    ///
    /// Only map this interface over memory that's valid to read and write,
    /// and that isn't used by the bootloader itself. The memory map's
    /// reserved regions exist for that purpose.
    pub const unsafe fn new() -> Self {
        Self { _priv: () }
    }
}

impl RegionInterface for NormalMemory {
    fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error> {
        // Safety: the caller of new() vouched for every mapped address.
        unsafe {
            core::ptr::copy_nonoverlapping(
                address as usize as *const u8,
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }
        Ok(())
    }
    fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error> {
        // Safety: see read().
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), address as usize as *mut u8, data.len());
        }
        Ok(WriteStatus::Complete)
    }
}

/// Device or strongly-ordered memory.
///
/// Every access is volatile. The access width is the widest of 32, 16 and
/// 8 bits that divides both the address and the length, and multi-word
/// copies are never used.
#[derive(Debug)]
pub struct DeviceMemory {
    _priv: (),
}

impl DeviceMemory {
    /// Create an interface that accesses device registers at absolute addresses.
    ///
    /// # Safety
    ///
    /// Reading or writing a device register may have side effects. Only
    /// map this interface over registers that tolerate arbitrary accesses.
    pub const unsafe fn new() -> Self {
        Self { _priv: () }
    }
}

const fn access_width(address: u32, length: usize) -> usize {
    if address % 4 == 0 && length % 4 == 0 {
        4
    } else if address % 2 == 0 && length % 2 == 0 {
        2
    } else {
        1
    }
}

impl RegionInterface for DeviceMemory {
    fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error> {
        let width = access_width(address, buffer.len());
        for (idx, chunk) in buffer.chunks_exact_mut(width).enumerate() {
            let ptr = (address as usize) + idx * width;
            // Safety: see new(). The pointer is aligned for its width.
            unsafe {
                match width {
                    4 => chunk.copy_from_slice(&(ptr as *const u32).read_volatile().to_le_bytes()),
                    2 => chunk.copy_from_slice(&(ptr as *const u16).read_volatile().to_le_bytes()),
                    _ => chunk[0] = (ptr as *const u8).read_volatile(),
                }
            }
        }
        Ok(())
    }
    fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error> {
        let width = access_width(address, data.len());
        for (idx, chunk) in data.chunks_exact(width).enumerate() {
            let ptr = (address as usize) + idx * width;
            // Safety: see new(). The pointer is aligned for its width.
            unsafe {
                match width {
                    4 => (ptr as *mut u32).write_volatile(u32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ])),
                    2 => (ptr as *mut u16).write_volatile(u16::from_le_bytes([chunk[0], chunk[1]])),
                    _ => (ptr as *mut u8).write_volatile(chunk[0]),
                }
            }
        }
        Ok(WriteStatus::Complete)
    }
}

/// Convert a NOR flash driver error into a memory interface error.
fn flash_error<E: NorFlashError>(error: E, fallback: Error) -> Error {
    match error.kind() {
        NorFlashErrorKind::NotAligned => Error::AlignmentError,
        NorFlashErrorKind::OutOfBounds => Error::AddressError,
        _ => fallback,
    }
}

/// A page that's waiting to be programmed.
struct Staged<const PAGE: usize> {
    /// Device offset of the page.
    offset: u32,
    /// Staged bytes are in `lo..hi`.
    lo: usize,
    hi: usize,
    data: [u8; PAGE],
}

/// Flash memory behind a NOR flash driver.
///
/// `base` is the address where the flash appears in the memory map. Writes
/// that don't complete a `PAGE`-sized page are staged, and the interface
/// reports [`WriteStatus::Cumulative`]. A later write that completes the
/// page, a flush, or a finalize programs the page. Unstaged gaps within a
/// page are programmed as `0xFF`, which leaves NOR flash unchanged.
///
/// If programming fails, the page stays staged, and the next flush or
/// finalize tries again.
///
/// `PAGE` must be a non-zero multiple of the driver's `WRITE_SIZE`. Other
/// sizes fail to compile:
///
/// ```compile_fail
/// use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};
/// use imxrt_bootloader::FlashRegion;
///
/// struct Words;
/// impl ErrorType for Words {
///     type Error = NorFlashErrorKind;
/// }
/// impl ReadNorFlash for Words {
///     const READ_SIZE: usize = 1;
///     fn read(&mut self, _: u32, _: &mut [u8]) -> Result<(), Self::Error> {
///         Ok(())
///     }
///     fn capacity(&self) -> usize {
///         4096
///     }
/// }
/// impl NorFlash for Words {
///     const WRITE_SIZE: usize = 4;
///     const ERASE_SIZE: usize = 4096;
///     fn erase(&mut self, _: u32, _: u32) -> Result<(), Self::Error> {
///         Ok(())
///     }
///     fn write(&mut self, _: u32, _: &[u8]) -> Result<(), Self::Error> {
///         Ok(())
///     }
/// }
///
/// let region = FlashRegion::<Words, 6>::new(0x6000_0000, Words);
/// ```
pub struct FlashRegion<F, const PAGE: usize> {
    base: u32,
    flash: RefCell<F>,
    staged: RefCell<Option<Staged<PAGE>>>,
}

impl<F: NorFlash, const PAGE: usize> FlashRegion<F, PAGE> {
    const PAGE_FITS_DRIVER: () = assert!(
        PAGE > 0 && PAGE % F::WRITE_SIZE == 0,
        "PAGE must be a non-zero multiple of the flash WRITE_SIZE"
    );

    /// Adapt a flash driver that's mapped at `base`.
    pub const fn new(base: u32, flash: F) -> Self {
        let () = Self::PAGE_FITS_DRIVER;
        Self {
            base,
            flash: RefCell::new(flash),
            staged: RefCell::new(None),
        }
    }

    /// Returns the mapped address of the flash.
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Release the flash driver.
    ///
    /// Any staged data is lost.
    pub fn release(self) -> F {
        self.flash.into_inner()
    }

    fn offset(&self, address: u32, length: usize) -> Result<u32, Error> {
        let offset = address.checked_sub(self.base).ok_or(Error::AddressError)?;
        let end = offset as u64 + length as u64;
        if end > self.flash.borrow().capacity() as u64 {
            return Err(Error::AddressError);
        }
        Ok(offset)
    }

    fn program_staged(&self, staged: &Staged<PAGE>) -> Result<(), Error> {
        fmt::trace!("Programming flash page at offset {:#X}", staged.offset);
        self.flash
            .borrow_mut()
            .write(staged.offset, &staged.data)
            .map_err(|err| flash_error(err, Error::WriteFailed))
    }

    /// Stage bytes that all land in the page at `page_offset`.
    fn stage(&self, page_offset: u32, within: usize, bytes: &[u8]) -> Result<WriteStatus, Error> {
        let mut slot = self.staged.borrow_mut();
        if let Some(previous) = slot.as_ref().filter(|staged| staged.offset != page_offset) {
            self.program_staged(previous)?;
            *slot = None;
        }
        let staged = slot.get_or_insert_with(|| Staged {
            offset: page_offset,
            lo: within,
            hi: within,
            data: [0xFF; PAGE],
        });
        staged.data[within..within + bytes.len()].copy_from_slice(bytes);
        staged.lo = staged.lo.min(within);
        staged.hi = staged.hi.max(within + bytes.len());

        if staged.lo == 0 && staged.hi == PAGE {
            self.program_staged(staged)?;
            *slot = None;
            Ok(WriteStatus::Complete)
        } else {
            Ok(WriteStatus::Cumulative)
        }
    }
}

impl<F: NorFlash, const PAGE: usize> RegionInterface for FlashRegion<F, PAGE> {
    fn read(&self, address: u32, buffer: &mut [u8]) -> Result<(), Error> {
        let offset = self.offset(address, buffer.len())?;
        self.flash
            .borrow_mut()
            .read(offset, buffer)
            .map_err(|err| flash_error(err, Error::ReadFailed))?;

        // Staged bytes are newer than the flash contents.
        if let Some(staged) = self.staged.borrow().as_ref() {
            let read_end = offset as u64 + buffer.len() as u64;
            for idx in staged.lo..staged.hi {
                let at = staged.offset as u64 + idx as u64;
                if at >= offset as u64 && at < read_end {
                    buffer[(at - offset as u64) as usize] = staged.data[idx];
                }
            }
        }
        Ok(())
    }

    fn write(&self, address: u32, data: &[u8]) -> Result<WriteStatus, Error> {
        let mut offset = self.offset(address, data.len())?;
        let mut data = data;
        let mut status = WriteStatus::Complete;
        while !data.is_empty() {
            let page_offset = offset - offset % PAGE as u32;
            let within = (offset - page_offset) as usize;
            let count = data.len().min(PAGE - within);
            status = status.and(self.stage(page_offset, within, &data[..count])?);
            offset += count as u32;
            data = &data[count..];
        }
        Ok(status)
    }

    fn flush(&self) -> Result<(), Error> {
        let mut slot = self.staged.borrow_mut();
        if let Some(staged) = slot.as_ref() {
            // Stays staged until the program succeeds.
            self.program_staged(staged)?;
            *slot = None;
        }
        Ok(())
    }

    fn erase(&self, address: u32, length: u32) -> Result<(), Error> {
        let offset = self.offset(address, length as usize)?;
        let erase_size = F::ERASE_SIZE as u32;
        if offset % erase_size != 0 || length % erase_size != 0 {
            fmt::warning!("Erase {:#010X} +{:#X} isn't sector aligned", address, length);
            return Err(Error::AlignmentError);
        }
        let end = offset + length;
        {
            let mut slot = self.staged.borrow_mut();
            if slot
                .as_ref()
                .is_some_and(|staged| staged.offset >= offset && staged.offset < end)
            {
                *slot = None;
            }
        }
        self.flash
            .borrow_mut()
            .erase(offset, end)
            .map_err(|err| flash_error(err, Error::WriteFailed))
    }

    fn erase_all(&self) -> Result<(), Error> {
        self.staged.borrow_mut().take();
        let capacity = self.flash.borrow().capacity() as u32;
        self.flash
            .borrow_mut()
            .erase(0, capacity)
            .map_err(|err| flash_error(err, Error::WriteFailed))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

    use super::{FlashRegion, RegionInterface};
    use crate::{Error, WriteStatus};

    /// A NOR flash model that counts page programs.
    pub(crate) struct MockFlash {
        pub(crate) memory: Vec<u8>,
        pub(crate) programs: usize,
        /// The next this-many programs fail.
        pub(crate) failing_programs: usize,
    }

    impl MockFlash {
        pub(crate) fn new(size: usize) -> Self {
            Self {
                memory: vec![0xFF; size],
                programs: 0,
                failing_programs: 0,
            }
        }
    }

    impl ErrorType for MockFlash {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for MockFlash {
        const READ_SIZE: usize = 1;
        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let offset = offset as usize;
            bytes.copy_from_slice(&self.memory[offset..offset + bytes.len()]);
            Ok(())
        }
        fn capacity(&self) -> usize {
            self.memory.len()
        }
    }

    impl NorFlash for MockFlash {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = 1024;
        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.memory[from as usize..to as usize].fill(0xFF);
            Ok(())
        }
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.failing_programs > 0 {
                self.failing_programs -= 1;
                return Err(NorFlashErrorKind::Other);
            }
            let offset = offset as usize;
            for (dst, src) in self.memory[offset..offset + bytes.len()].iter_mut().zip(bytes) {
                *dst &= *src;
            }
            self.programs += 1;
            Ok(())
        }
    }

    const BASE: u32 = 0x6000_0000;

    fn region() -> FlashRegion<MockFlash, 256> {
        FlashRegion::new(BASE, MockFlash::new(4096))
    }

    #[test]
    fn partial_page_is_cumulative() -> Result<(), Error> {
        let flash = region();
        assert_eq!(flash.write(BASE + 16, &[1, 2, 3, 4])?, WriteStatus::Cumulative);
        assert_eq!(flash.flash.borrow().programs, 0);

        // Reads see the staged data before it's programmed.
        let mut buffer = [0; 6];
        flash.read(BASE + 15, &mut buffer)?;
        assert_eq!(buffer, [0xFF, 1, 2, 3, 4, 0xFF]);

        flash.finalize()?;
        let inner = flash.release();
        assert_eq!(inner.programs, 1);
        assert_eq!(&inner.memory[16..20], &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn filling_a_page_programs_it() -> Result<(), Error> {
        let flash = region();
        assert_eq!(flash.write(BASE, &[0xAA; 128])?, WriteStatus::Cumulative);
        assert_eq!(flash.write(BASE + 128, &[0xBB; 128])?, WriteStatus::Complete);
        assert_eq!(flash.flash.borrow().programs, 1);

        // Spans two pages, and the second is only partially written.
        assert_eq!(flash.write(BASE + 256, &[0xCC; 300])?, WriteStatus::Cumulative);
        assert_eq!(flash.flash.borrow().programs, 2);
        Ok(())
    }

    #[test]
    fn writing_another_page_programs_the_staged_page() -> Result<(), Error> {
        let flash = region();
        flash.write(BASE, &[0x11; 8])?;
        flash.write(BASE + 1024, &[0x22; 8])?;
        assert_eq!(flash.flash.borrow().programs, 1);
        assert_eq!(&flash.flash.borrow().memory[..8], &[0x11; 8]);
        Ok(())
    }

    #[test]
    fn failed_program_keeps_the_page_staged() -> Result<(), Error> {
        let flash = region();
        flash.flash.borrow_mut().failing_programs = 1;

        assert_eq!(flash.write(BASE + 8, &[1, 2, 3, 4])?, WriteStatus::Cumulative);
        assert_eq!(flash.finalize(), Err(Error::WriteFailed));
        assert_eq!(flash.flash.borrow().memory[8..12], [0xFF; 4]);

        flash.finalize()?;
        let inner = flash.release();
        assert_eq!(inner.programs, 1);
        assert_eq!(&inner.memory[8..12], &[1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn failed_program_of_a_previous_page_is_retried() -> Result<(), Error> {
        let flash = region();
        flash.write(BASE, &[0x11; 8])?;
        flash.flash.borrow_mut().failing_programs = 1;

        // Moving to another page has to program the first one, and fails.
        assert_eq!(flash.write(BASE + 512, &[0x22; 8]), Err(Error::WriteFailed));
        let mut buffer = [0; 8];
        flash.read(BASE, &mut buffer)?;
        assert_eq!(buffer, [0x11; 8]);

        flash.write(BASE + 512, &[0x22; 8])?;
        flash.finalize()?;
        let inner = flash.release();
        assert_eq!(&inner.memory[..8], &[0x11; 8]);
        assert_eq!(&inner.memory[512..520], &[0x22; 8]);
        Ok(())
    }

    #[test]
    fn failed_full_page_program_is_retried_by_flush() -> Result<(), Error> {
        let flash = region();
        flash.flash.borrow_mut().failing_programs = 1;
        assert_eq!(flash.write(BASE, &[0x5A; 256]), Err(Error::WriteFailed));

        flash.flush()?;
        assert_eq!(flash.flash.borrow().memory[..256], [0x5A; 256]);
        Ok(())
    }

    #[test]
    fn erase_alignment() -> Result<(), Error> {
        let flash = region();
        assert_eq!(flash.erase(BASE + 4, 1024), Err(Error::AlignmentError));
        assert_eq!(flash.erase(BASE, 1000), Err(Error::AlignmentError));

        flash.write(BASE, &[0; 4])?;
        flash.erase(BASE, 1024)?;
        flash.flush()?;
        assert_eq!(flash.flash.borrow().programs, 0, "Erase drops staged data");
        Ok(())
    }

    #[test]
    fn out_of_bounds() {
        let flash = region();
        let mut buffer = [0; 4];
        assert_eq!(flash.read(BASE - 4, &mut buffer), Err(Error::AddressError));
        assert_eq!(flash.read(BASE + 4094, &mut buffer), Err(Error::AddressError));
    }

    #[test]
    fn fill_repeats_the_pattern() -> Result<(), Error> {
        let flash = region();
        flash.fill(BASE, 10, 0x0403_0201)?;
        flash.finalize()?;
        let inner = flash.release();
        assert_eq!(&inner.memory[..10], &[1, 2, 3, 4, 1, 2, 3, 4, 1, 2]);
        Ok(())
    }
}
