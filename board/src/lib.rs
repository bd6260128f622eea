//! Board support for i.MX RT bootloaders.
//!
//! Each board exports `prepare()`, which discovers the FlexRAM layout and
//! the HAB state from the chip, then builds a [`BootloaderContext`] that
//! describes the board's memories. Select a board with a feature.
//!
//! Boards don't provide an SD card driver. Supply one to [`Memories::new`].
#![no_std]

use imxrt_bootloader::{
    BootloaderContext, ClockOption, ContextBuilder, Error, Family, FlexRamSizes, MemoryId,
    NormalMemory, Platform, ReservedRegion,
    external::{ExternalInterface, ExternalMapEntry, ExternalPropertyEntry, ExternalPropertySource},
    fuse::HabStatus,
    property::Version,
};
use imxrt_ral as ral;

cfg_if::cfg_if! {
    if #[cfg(feature = "imxrt1050evk")] {
        mod shared { pub mod imxrt10xx; }
        use shared::imxrt10xx as chip;

        mod imxrt1050evk;
        pub use imxrt1050evk::*;
    } else if #[cfg(feature = "imxrt1170evk-cm7")] {
        mod shared { pub mod imxrt11xx; }
        use shared::imxrt11xx as chip;

        mod imxrt1170evk_cm7;
        pub use imxrt1170evk_cm7::*;
    } else {
        compile_error!("No board feature selected!");
    }
}

/// Bootloader logs, printed on the RTT channel that panics also use.
#[cfg(all(feature = "log", target_arch = "arm"))]
mod rtt_log {
    struct RttLogger;

    impl log::Log for RttLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            rtt_target::rprintln!("[{}] {}", record.level(), record.args());
        }
        fn flush(&self) {}
    }

    static LOGGER: RttLogger = RttLogger;

    pub(crate) fn init() {
        // Only fails if a logger is already installed.
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Debug);
        }
    }
}

/// Set up the RTT print channel, and send `log` output there.
fn init_rtt() {
    #[cfg(target_arch = "arm")]
    {
        rtt_target::rtt_init_print!();
        #[cfg(feature = "log")]
        rtt_log::init();
    }
}

/// Reported through the target version property.
const TARGET_VERSION: Version = Version::new(b'T', 1, 0, 0);

/// SD cards transfer 512 byte blocks.
const SD_BLOCK_SIZE: u32 = 512;

/// An SD card driver.
pub trait Card: ExternalInterface + ExternalPropertySource {}
impl<C: ExternalInterface + ExternalPropertySource> Card for C {}

/// Memories that the bootloader context borrows.
///
/// Keep this alive for as long as the context.
pub struct Memories<C> {
    ram: NormalMemory,
    card: C,
}

impl<C: Card> Memories<C> {
    /// Describe the board's memories.
    ///
    /// # Safety
    ///
    /// Create at most one of these. The bootloader accesses internal RAM
    /// through it.
    pub const unsafe fn new(card: C) -> Self {
        Self {
            // Safety: see above.
            ram: unsafe { NormalMemory::new() },
            card,
        }
    }
}

/// A free-running microsecond counter on PIT channel 0.
pub struct Pit {
    pit: &'static ral::pit::RegisterBlock,
    ticks_per_microsecond: u32,
}

impl Pit {
    fn new(pit: &ral::pit::RegisterBlock, ticks_per_microsecond: u32) -> Self {
        // Safety: the register block is static memory-mapped IO.
        let pit = unsafe { &*(pit as *const ral::pit::RegisterBlock) };
        Self {
            pit,
            ticks_per_microsecond,
        }
    }

    fn start(&mut self) {
        let timer = &self.pit.TIMER[0];
        ral::modify_reg!(ral::pit, self.pit, MCR, MDIS: 0);
        ral::write_reg!(ral::pit::timer, timer, TCTRL, 0);
        ral::write_reg!(ral::pit::timer, timer, LDVAL, u32::MAX);
        ral::write_reg!(ral::pit::timer, timer, TCTRL, TEN: 1);
    }

    fn stop(&mut self) {
        let timer = &self.pit.TIMER[0];
        ral::write_reg!(ral::pit::timer, timer, TCTRL, 0);
        ral::write_reg!(ral::pit::timer, timer, TFLG, TIF: 1);
        ral::modify_reg!(ral::pit, self.pit, MCR, MDIS: 1);
    }

    /// Microseconds since the timer started. Wraps.
    pub fn microseconds(&self) -> u32 {
        let timer = &self.pit.TIMER[0];
        let elapsed = u32::MAX - ral::read_reg!(ral::pit::timer, timer, CVAL);
        elapsed / self.ticks_per_microsecond
    }
}

unsafe impl Send for Pit {}

/// The [`Platform`] for the selected board.
pub struct Evk {
    pit: Pit,
    clocks: chip::SavedClocks,
}

impl Evk {
    /// The microsecond timer.
    pub fn pit(&self) -> &Pit {
        &self.pit
    }
}

impl Platform for Evk {
    fn configure_clocks(&mut self, option: ClockOption) {
        match option {
            ClockOption::EnterBootloader => self.clocks = chip::enter_clocks(),
            ClockOption::ExitBootloader => chip::exit_clocks(&self.clocks),
        }
    }
    fn init_hardware(&mut self) {
        chip::disable_watchdog();
    }
    fn deinit_hardware(&mut self) {}
    fn microseconds_init(&mut self) {
        self.pit.start();
    }
    fn microseconds_shutdown(&mut self) {
        self.pit.stop();
    }
    fn init_interrupts(&mut self) {
        // Safety: interrupts are masked during shutdown.
        let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
        for (icer, icpr) in nvic.icer.iter().zip(nvic.icpr.iter()) {
            unsafe {
                icer.write(u32::MAX);
                icpr.write(u32::MAX);
            }
        }
    }
}

/// Everything that `prepare()` produces.
pub struct Board<'a> {
    pub context: BootloaderContext<'a>,
    pub platform: Evk,
    pub hab_status: HabStatus,
}

/// The vector table that's active right now, which is the bootloader's.
fn active_vector_table() -> u32 {
    // Safety: atomic read of a core register.
    unsafe { (*cortex_m::peripheral::SCB::PTR).vtor.read() }
}

/// Builds the context shared by every board.
///
/// The bootloader's own RAM is reserved, and the SD card is the only
/// external device.
fn build_context<C: Card>(
    memories: &Memories<C>,
    family: Family,
    sizes: FlexRamSizes,
    application_vector_table: u32,
    bootloader_ram: ReservedRegion,
) -> Result<BootloaderContext<'_>, Error> {
    ContextBuilder::new(application_vector_table)
        .internal_ram(family, sizes, &memories.ram)
        .external(ExternalMapEntry::new(
            MemoryId::SD_CARD,
            SD_BLOCK_SIZE,
            &memories.card,
        ))
        .external_property(ExternalPropertyEntry {
            memory_id: MemoryId::SD_CARD,
            source: &memories.card,
        })
        .ram_reserved_region(bootloader_ram)
        .default_vector_table(active_vector_table())
        .target_version(TARGET_VERSION)
        .build()
}
