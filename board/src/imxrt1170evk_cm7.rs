//! Support for booting the Cortex M7 on the i.MX RT 1170 EVK.
//!
//! The bootloader runs from flash, and keeps its data in the first 64 KiB
//! of DTCM. Applications load into OCRAM.

use imxrt_bootloader::{Error, Family, ReservedRegion, fuse};

#[cfg(target_arch = "arm")]
use imxrt1170evk_fcb as _;
#[cfg(target_arch = "arm")]
use panic_rtt_target as _;

pub const FAMILY: Family = Family::Imxrt1170;

/// Where the application's vector table is loaded.
pub const APPLICATION_VECTOR_TABLE: u32 = 0x2024_0000;

/// RAM that belongs to the bootloader.
pub const BOOTLOADER_RAM: ReservedRegion = ReservedRegion::new(0x2000_0000, 0x2000_FFFF);

/// Decode the FlexRAM layout from the fuses.
///
/// Fails for a reserved configuration. Resetting might help.
pub fn flexram_sizes() -> Result<imxrt_bootloader::FlexRamSizes, Error> {
    fuse::imxrt1170_flexram_sizes(crate::chip::read_fuse(fuse::IMXRT1170_FLEXRAM_CFG_WORD))
}

/// Decode the HAB state from the fuses.
pub fn hab_status() -> fuse::HabStatus {
    use crate::chip::read_fuse;
    fuse::imxrt1170_hab_status(
        read_fuse(fuse::IMXRT1170_FIELD_RETURN_WORD),
        read_fuse(fuse::IMXRT1170_SEC_CONFIG0_WORD),
        read_fuse(fuse::IMXRT1170_SEC_CONFIG1_WORD),
    )
}

/// Prepare the board, and build the bootloader context.
///
/// Call this first.
pub fn prepare<C: crate::Card>(memories: &crate::Memories<C>) -> Result<crate::Board<'_>, Error> {
    crate::init_rtt();

    let context = crate::build_context(
        memories,
        FAMILY,
        flexram_sizes()?,
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
