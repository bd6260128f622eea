//! Boot sequence and the transfer to the application.
//!
//! [`boot_application`] is the only way out of the bootloader. It reads the
//! application's vector table through the memory router, checks the reset
//! vector and the initial stack pointer against the memory map, shuts the
//! bootloader down, and transfers control. The two checks are ordinary
//! methods on [`BootloaderContext`], so they can run without touching the
//! CPU.

use crate::{fmt, BootloaderContext, Error, MemoryClass, MemoryId, RegionProperty};

/// The smallest Thumb-2 instruction is 16 bits.
const MIN_INSTRUCTION_SIZE: u32 = 2;

/// Why the application didn't start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// The vector table couldn't be read.
    #[error("cannot read the application vector table: {0}")]
    VectorTable(Error),
    /// The reset vector isn't executable application memory.
    #[error("invalid application entry {0:#010X}")]
    InvalidApplication(u32),
    /// The initial stack pointer isn't in executable RAM.
    #[error("invalid application stack pointer {0:#010X}")]
    InvalidStackPointer(u32),
    /// Control came back from the application.
    #[error("the application returned")]
    ApplicationReturned,
}

/// The first two words of an application's vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable {
    /// Initial main stack pointer.
    pub initial_sp: u32,
    /// Reset handler address.
    pub reset: u32,
}

impl VectorTable {
    /// Read the vector table at `address` through the memory router.
    pub fn read(ctx: &BootloaderContext<'_>, address: u32) -> Result<Self, Error> {
        let mut words = [0u8; 8];
        ctx.mem_read(address, &mut words, MemoryId::INTERNAL)?;
        let [sp0, sp1, sp2, sp3, rv0, rv1, rv2, rv3] = words;
        Ok(Self {
            initial_sp: u32::from_le_bytes([sp0, sp1, sp2, sp3]),
            reset: u32::from_le_bytes([rv0, rv1, rv2, rv3]),
        })
    }
}

/// Clock configurations requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockOption {
    /// Clocks for running the bootloader.
    EnterBootloader,
    /// Restore the clocks that the boot ROM left.
    ExitBootloader,
}

/// How far to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ShutdownType {
    /// Clean up, and keep running the bootloader.
    Cleanup,
    /// Leave the bootloader for good.
    Shutdown,
    /// Prepare for a reset.
    Reset,
}

/// Board and chip services that the boot sequence needs.
///
/// Boards implement this trait. None of the methods may fail.
pub trait Platform {
    /// Configure clocks.
    fn configure_clocks(&mut self, option: ClockOption);
    /// Set up pins and other hardware.
    fn init_hardware(&mut self);
    /// Undo [`init_hardware`](Self::init_hardware).
    fn deinit_hardware(&mut self);
    /// Start the microsecond timer.
    fn microseconds_init(&mut self);
    /// Stop the microsecond timer.
    fn microseconds_shutdown(&mut self);
    /// Disable and clear every peripheral interrupt.
    fn init_interrupts(&mut self);
}

/// Processor control.
pub trait Cpu {
    /// Mask all interrupts.
    fn disable_interrupts(&mut self);
    /// Unmask interrupts.
    fn enable_interrupts(&mut self);
    /// Point the vector table offset register at `address`.
    fn set_vector_table(&mut self, address: u32);
    /// Instruction and data synchronization barriers.
    fn barriers(&mut self);
    /// Load both stack pointers with `stack_pointer`, then jump to `entry`.
    ///
    /// # Safety
    ///
    /// `entry` must be the start of a program that's prepared to run with
    /// `stack_pointer`. Everything on the current stack is abandoned.
    unsafe fn transfer(&mut self, entry: u32, stack_pointer: u32);
}

impl BootloaderContext<'_> {
    /// Returns `true` if execution may start at `address`.
    ///
    /// Never accepts 0, `0xFFFFFFFF` (erased flash), or the bootloader's
    /// own reset address. Otherwise, the smallest instruction at `address`
    /// must be entirely in one executable region.
    pub fn is_valid_application_location(&self, address: u32) -> bool {
        if address == 0 || address == 0xFFFF_FFFF || address == self.reset_address() {
            fmt::warning!("Application address {:#010X} is never valid", address);
            return false;
        }
        match self.find_map_entry(address, MIN_INSTRUCTION_SIZE) {
            Ok(entry) => entry.property.contains(RegionProperty::EXECUTABLE),
            Err(_) => false,
        }
    }

    /// Returns `true` if `stack_pointer` is an initial stack pointer in
    /// executable RAM.
    ///
    /// A full-descending stack may start one byte past the end of RAM, but
    /// not at the start of RAM.
    pub fn is_valid_stackpointer_location(&self, stack_pointer: u32) -> bool {
        self.memory_map().iter().any(|entry| {
            entry.property.contains(RegionProperty::EXECUTABLE)
                && entry.property.class() == MemoryClass::Ram
                && stack_pointer > entry.start_address
                && stack_pointer as u64 <= entry.end_address as u64 + 1
        })
    }
}

/// Bring up the bootloader.
///
/// Initializes hardware and clocks, starts the microsecond timer,
/// initializes every memory region, then refreshes the property store.
pub fn bootloader_init<P: Platform>(
    ctx: &mut BootloaderContext<'_>,
    platform: &mut P,
) -> Result<(), Error> {
    platform.init_hardware();
    platform.configure_clocks(ClockOption::EnterBootloader);
    platform.microseconds_init();
    ctx.mem_init()?;
    ctx.property_init();
    fmt::info!("Bootloader ready with {} regions", ctx.memory_map().len());
    Ok(())
}

/// Release the hardware that the bootloader holds.
///
/// Only [`ShutdownType::Shutdown`] runs the full sequence. It restores the
/// default vector table and clocks with interrupts masked. Every type ends
/// with memory barriers.
pub fn shutdown_cleanup<P: Platform, C: Cpu>(
    ctx: &BootloaderContext<'_>,
    platform: &mut P,
    cpu: &mut C,
    shutdown: ShutdownType,
) {
    if shutdown == ShutdownType::Shutdown {
        fmt::debug!("Shutting down");
        cpu.disable_interrupts();
        platform.microseconds_shutdown();
        platform.init_interrupts();
        cpu.set_vector_table(ctx.default_vector_table());
        platform.configure_clocks(ClockOption::ExitBootloader);
        platform.deinit_hardware();
        cpu.enable_interrupts();
    }
    cpu.barriers();
}

/// Start the application.
///
/// Returns only if the application can't start, or if control comes back
/// from the application. In the second case, the bootloader is already
/// shut down, and nothing but a reset will recover.
///
/// # Safety
///
/// Every executable region in the memory map must hold code that's valid
/// to run. The check only proves that the entry point and stack are in
/// those regions.
pub unsafe fn boot_application<P: Platform, C: Cpu>(
    ctx: &BootloaderContext<'_>,
    platform: &mut P,
    cpu: &mut C,
) -> BootError {
    let vector_table = match VectorTable::read(ctx, ctx.application_vector_table()) {
        Ok(vector_table) => vector_table,
        Err(err) => {
            fmt::error!(
                "Cannot read vector table at {:#010X}: {}",
                ctx.application_vector_table(),
                err.code()
            );
            return BootError::VectorTable(err);
        }
    };

    if !ctx.is_valid_application_location(vector_table.reset) {
        fmt::error!("Invalid application entry {:#010X}", vector_table.reset);
        return BootError::InvalidApplication(vector_table.reset);
    }
    if !ctx.is_valid_stackpointer_location(vector_table.initial_sp) {
        fmt::error!("Invalid stack pointer {:#010X}", vector_table.initial_sp);
        return BootError::InvalidStackPointer(vector_table.initial_sp);
    }

    fmt::info!(
        "Booting {:#010X} with SP {:#010X}",
        vector_table.reset,
        vector_table.initial_sp
    );
    shutdown_cleanup(ctx, platform, cpu, ShutdownType::Shutdown);
    cpu.set_vector_table(ctx.application_vector_table());

    // Safety: both addresses passed the memory map checks. The caller
    // vouches for the contents.
    unsafe { cpu.transfer(vector_table.reset, vector_table.initial_sp) };

    shutdown_cleanup(ctx, platform, cpu, ShutdownType::Shutdown);
    BootError::ApplicationReturned
}
