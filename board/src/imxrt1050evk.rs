//! i.MX RT 1050 EVK support.
//!
//! The bootloader runs from HyperFlash, and keeps its data in the first
//! 64 KiB of DTCM. Applications load into OCRAM.

use imxrt_bootloader::{Error, Family, FlexRamBanks, ReservedRegion, fuse};

#[cfg(target_arch = "arm")]
use panic_rtt_target as _;

pub const FAMILY: Family = Family::Imxrt1050;

/// Where the application's vector table is loaded.
pub const APPLICATION_VECTOR_TABLE: u32 = 0x2020_0000;

/// RAM that belongs to the bootloader.
pub const BOOTLOADER_RAM: ReservedRegion = ReservedRegion::new(0x2000_0000, 0x2000_FFFF);

/// Returns the FlexRAM bank assignment in effect.
///
/// Unless software selected GPR17, the default fuse layout applies.
pub fn flexram_banks() -> Result<FlexRamBanks, Error> {
    match crate::chip::flexram_bank_config() {
        Some(config) => FlexRamBanks::from_bank_config(FAMILY, config),
        None => Ok(FAMILY.default_flexram_banks()),
    }
}

/// Decode the HAB state from the fuses.
pub fn hab_status() -> fuse::HabStatus {
    fuse::imxrt1050_hab_status(crate::chip::sec_config_fuse())
}

/// Prepare the board, and build the bootloader context.
///
/// Call this first.
pub fn prepare<C: crate::Card>(memories: &crate::Memories<C>) -> Result<crate::Board<'_>, Error> {
    crate::init_rtt();

    let sizes = flexram_banks()?.sizes(FAMILY)?;
    let context = crate::build_context(
        memories,
        FAMILY,
        sizes,
        APPLICATION_VECTOR_TABLE,
        BOOTLOADER_RAM,
    )?;
    Ok(crate::Board {
        context,
        platform: crate::Evk {
            pit: crate::chip::pit(),
            clocks: Default::default(),
        },
        hab_status: hab_status(),
    })
}
