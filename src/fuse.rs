//! Fuse decoding.
//!
//! Functions in this module decode fuse words that a board has already read
//! from the OCOTP shadow registers. Use [`shadow_register_address`] to find
//! a word.

use crate::{family::FlexRamSizes, fmt, Error};

/// Offset of fuse word 0 from the OCOTP base on 10xx chips.
pub const IMXRT10XX_FUSE_BANK0_OFFSET: u32 = 0x400;
/// Offset of fuse word 0 from the OCOTP base on the 1160 and 1170.
pub const IMXRT11XX_FUSE_BANK0_OFFSET: u32 = 0x800;

/// Shadow register of fuse word 0 on 10xx chips.
pub const IMXRT10XX_FUSE_BANK0: u32 = 0x401F_4000 + IMXRT10XX_FUSE_BANK0_OFFSET;
/// Shadow register of fuse word 0 on the 1160 and 1170.
pub const IMXRT11XX_FUSE_BANK0: u32 = 0x40CA_C000 + IMXRT11XX_FUSE_BANK0_OFFSET;

/// Returns the address of the shadow register for fuse word `index`.
///
/// ```
/// use imxrt_bootloader::fuse;
///
/// assert_eq!(
///     fuse::shadow_register_address(fuse::IMXRT11XX_FUSE_BANK0, fuse::IMXRT1170_FLEXRAM_CFG_WORD),
///     0x40CA_CC70,
/// );
/// assert_eq!(
///     fuse::shadow_register_address(fuse::IMXRT10XX_FUSE_BANK0, fuse::IMXRT1050_SEC_CONFIG_WORD),
///     0x401F_4460,
/// );
/// ```
pub const fn shadow_register_address(bank0: u32, index: u32) -> u32 {
    bank0 + index * 0x10
}

/// The 1170 fuse word that holds the FlexRAM configuration.
pub const IMXRT1170_FLEXRAM_CFG_WORD: u32 = 0x47;
/// The 1170 fuse word that holds FIELD_RETURN.
pub const IMXRT1170_FIELD_RETURN_WORD: u32 = 0x0D;
/// The 1170 fuse word that holds SEC_CONFIG[0].
pub const IMXRT1170_SEC_CONFIG0_WORD: u32 = 0x0E;
/// The 1170 fuse word that holds SEC_CONFIG[1].
pub const IMXRT1170_SEC_CONFIG1_WORD: u32 = 0x16;
/// The 1050 fuse word (CFG5) that holds SEC_CONFIG.
pub const IMXRT1050_SEC_CONFIG_WORD: u32 = 0x06;

/// Extract the FlexRAM configuration index from the 1170 fuse word.
pub const fn imxrt1170_flexram_cfg_index(word: u32) -> u32 {
    (word >> 16) & 0x3F
}

const fn kib(dtcm: u32, itcm: u32, ocram: u32) -> FlexRamSizes {
    FlexRamSizes {
        dtcm: dtcm * 1024,
        itcm: itcm * 1024,
        ocram: ocram * 1024,
    }
}

/// FlexRAM sizes for each 1170 configuration index, in (DTCM, ITCM, OCRAM) order.
///
/// Every configuration allocates all 512 KiB.
const IMXRT1170_FLEXRAM_CFG: [FlexRamSizes; 45] = [
    kib(256, 256, 0),
    kib(320, 192, 0),
    kib(384, 128, 0),
    kib(448, 64, 0),
    kib(512, 0, 0),
    kib(192, 320, 0),
    kib(128, 384, 0),
    kib(64, 448, 0),
    kib(0, 512, 0),
    kib(256, 192, 64),
    kib(320, 128, 64),
    kib(384, 64, 64),
    kib(448, 0, 64),
    kib(192, 256, 64),
    kib(128, 320, 64),
    kib(64, 384, 64),
    kib(0, 448, 64),
    kib(192, 192, 128),
    kib(256, 128, 128),
    kib(320, 64, 128),
    kib(384, 0, 128),
    kib(128, 256, 128),
    kib(64, 320, 128),
    kib(0, 384, 128),
    kib(192, 128, 192),
    kib(256, 64, 192),
    kib(320, 0, 192),
    kib(128, 192, 192),
    kib(64, 256, 192),
    kib(0, 320, 192),
    kib(128, 128, 256),
    kib(192, 64, 256),
    kib(256, 0, 256),
    kib(64, 192, 256),
    kib(0, 256, 256),
    kib(128, 64, 320),
    kib(192, 0, 320),
    kib(64, 128, 320),
    kib(0, 192, 320),
    kib(64, 64, 384),
    kib(128, 0, 384),
    kib(0, 128, 384),
    kib(64, 0, 448),
    kib(0, 64, 448),
    kib(0, 0, 512),
];

/// Decode the 1170 FlexRAM configuration from its fuse word.
///
/// Returns `OutOfRange` for a reserved configuration index. The sizes only
/// describe FlexRAM. They don't include the dedicated OCRAM.
pub fn imxrt1170_flexram_sizes(word: u32) -> Result<FlexRamSizes, Error> {
    let index = imxrt1170_flexram_cfg_index(word);
    let sizes = IMXRT1170_FLEXRAM_CFG
        .get(index as usize)
        .copied()
        .ok_or(Error::OutOfRange)?;
    fmt::info!(
        "FlexRAM config {}: DTCM {:#X}, ITCM {:#X}, OCRAM {:#X}",
        index,
        sizes.dtcm,
        sizes.itcm,
        sizes.ocram
    );
    Ok(sizes)
}

/// High assurance boot (HAB) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HabStatus {
    /// Unsigned images boot.
    Open,
    /// Only authenticated images boot.
    Close,
}

/// Decode the 1170 HAB state.
///
/// A part with any FIELD_RETURN bit set is open. Otherwise, the part is
/// closed when the two-bit SEC_CONFIG value exceeds 1.
pub const fn imxrt1170_hab_status(
    field_return_word: u32,
    sec_config0_word: u32,
    sec_config1_word: u32,
) -> HabStatus {
    let field_return = (field_return_word >> 4) & 0xF;
    let sec_config = ((sec_config0_word >> 1) & 1) | (((sec_config1_word >> 1) & 1) << 1);
    if field_return != 0 || sec_config <= 1 {
        HabStatus::Open
    } else {
        HabStatus::Close
    }
}

/// Decode the 1050 HAB state from the CFG5 fuse word.
pub const fn imxrt1050_hab_status(cfg5_word: u32) -> HabStatus {
    if cfg5_word & 0x2 != 0 {
        HabStatus::Close
    } else {
        HabStatus::Open
    }
}
