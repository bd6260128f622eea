//! i.MX RT chip families, and their internal memory.
//!
//! The internal RAM of an i.MX RT chip depends on its FlexRAM configuration.
//! Until that configuration is read from fuses or registers, a memory map
//! describes the all-zero-fuse defaults. See
//! [`BootloaderContext::update_flexram`](crate::BootloaderContext::update_flexram).

use crate::{fmt, Error, Memory};

/// A chip family, named for its reference manual.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Family {
    Imxrt1010,
    Imxrt1015,
    Imxrt1020,
    Imxrt1040,
    Imxrt1050,
    Imxrt1060,
    Imxrt1064,
    Imxrt1160,
    Imxrt1170,
    Imxrt1180,
}

/// A FlexSPI peripheral instance.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlexSpi {
    FlexSpi1,
    FlexSpi2,
}

/// Memory facts that differ between families.
struct Layout {
    /// Number of FlexRAM banks.
    banks: usize,
    /// Bytes per FlexRAM bank.
    bank_size: usize,
    /// OCRAM start. Dedicated OCRAM, if any, begins here.
    ocram: u32,
    /// Bytes of OCRAM that aren't FlexRAM.
    dedicated_ocram: usize,
    /// Banks for all-zero fuses.
    defaults: FlexRamBanks,
    /// FlexSPI1 and FlexSPI2 AHB windows.
    flexspi: [Option<u32>; 2],
}

const KIB: usize = 1024;

const fn banks(ocram: usize, itcm: usize, dtcm: usize) -> FlexRamBanks {
    FlexRamBanks { ocram, itcm, dtcm }
}

const RT1010: Layout = Layout {
    banks: 4,
    bank_size: 32 * KIB,
    ocram: 0x2020_0000,
    dedicated_ocram: 0,
    defaults: banks(2, 1, 1),
    flexspi: [Some(0x6000_0000), None],
};

const RT1020: Layout = Layout {
    banks: 8,
    defaults: banks(4, 2, 2),
    ..RT1010
};

const RT1050: Layout = Layout {
    banks: 16,
    defaults: banks(8, 4, 4),
    ..RT1010
};

const RT1040: Layout = Layout {
    flexspi: [Some(0x6000_0000), Some(0x7000_0000)],
    ..RT1050
};

const RT1060: Layout = Layout {
    dedicated_ocram: 512 * KIB,
    ..RT1040
};

const RT1160: Layout = Layout {
    banks: 16,
    bank_size: 32 * KIB,
    // Alias region. ECC is off, so the ECC OCRAM is plain OCRAM.
    ocram: 0x2034_0000,
    // OCRAM1, OCRAM2, then the FlexRAM ECC OCRAM.
    dedicated_ocram: (64 + 64 + 128) * KIB,
    defaults: banks(0, 8, 8),
    flexspi: [Some(0x3000_0000), Some(0x6000_0000)],
};

const RT1170: Layout = Layout {
    // The M4 backdoor occupies the first 256 KiB.
    ocram: 0x2024_0000,
    // OCRAM1, OCRAM2, their unused ECC regions, then the FlexRAM ECC OCRAM.
    dedicated_ocram: (512 + 512 + 64 + 64 + 128) * KIB,
    ..RT1160
};

const RT1180: Layout = Layout {
    banks: 2,
    bank_size: 128 * KIB,
    // The ROM patch area takes the first 16 KiB.
    ocram: 0x2048_4000,
    dedicated_ocram: (512 + 256 - 16) * KIB,
    defaults: banks(0, 1, 1),
    flexspi: [Some(0x2800_0000), Some(0x0400_0000)],
};

impl Family {
    const fn layout(self) -> &'static Layout {
        match self {
            Family::Imxrt1010 | Family::Imxrt1015 => &RT1010,
            Family::Imxrt1020 => &RT1020,
            Family::Imxrt1040 => &RT1040,
            Family::Imxrt1050 => &RT1050,
            Family::Imxrt1060 | Family::Imxrt1064 => &RT1060,
            Family::Imxrt1160 => &RT1160,
            Family::Imxrt1170 => &RT1170,
            Family::Imxrt1180 => &RT1180,
        }
    }

    /// Number of FlexRAM banks. ECC banks count like any other.
    pub const fn flexram_bank_count(self) -> usize {
        self.layout().banks
    }

    /// Size of one FlexRAM bank, in bytes.
    pub const fn flexram_bank_size(self) -> usize {
        self.layout().bank_size
    }

    /// First OCRAM address.
    ///
    /// Dedicated OCRAM, when the chip has some, starts here, and FlexRAM
    /// OCRAM follows it.
    pub const fn ocram_start(self) -> u32 {
        self.layout().ocram
    }

    /// Bytes of OCRAM outside of FlexRAM.
    pub const fn dedicated_ocram_size(self) -> usize {
        self.layout().dedicated_ocram
    }

    /// FlexRAM banks when every FlexRAM fuse is zero.
    pub const fn default_flexram_banks(self) -> FlexRamBanks {
        self.layout().defaults
    }

    /// ITCM start for an ITCM of `itcm_size` bytes.
    const fn itcm_start(self, itcm_size: u32) -> u32 {
        match self {
            // ITCM ends where the code bus alias begins.
            Family::Imxrt1180 => 0x1000_0000 - itcm_size,
            _ => 0,
        }
    }

    /// AHB address of the `flexspi` instance, or `None` if the chip
    /// doesn't have it.
    ///
    /// ```
    /// use imxrt_bootloader::{Family::*, FlexSpi::*};
    ///
    /// assert_eq!(Imxrt1050.flexspi_start_addr(FlexSpi1), Some(0x6000_0000));
    /// assert_eq!(Imxrt1170.flexspi_start_addr(FlexSpi1), Some(0x3000_0000));
    /// assert_eq!(Imxrt1060.flexspi_start_addr(FlexSpi2), Some(0x7000_0000));
    /// assert!(Imxrt1020.flexspi_start_addr(FlexSpi2).is_none());
    /// ```
    pub const fn flexspi_start_addr(self, flexspi: FlexSpi) -> Option<u32> {
        let windows = self.layout().flexspi;
        match flexspi {
            FlexSpi::FlexSpi1 => windows[0],
            FlexSpi::FlexSpi2 => windows[1],
        }
    }

    /// Returns the internal RAM regions for the given FlexRAM sizes.
    ///
    /// The regions are ITCM, DTCM, and OCRAM, in that order. A region with
    /// zero size doesn't exist. OCRAM includes any dedicated OCRAM.
    pub const fn internal_regions(self, sizes: FlexRamSizes) -> [RamRegion; 3] {
        [
            RamRegion {
                memory: Memory::Itcm,
                start_address: self.itcm_start(sizes.itcm),
                size: sizes.itcm,
            },
            RamRegion {
                memory: Memory::Dtcm,
                start_address: 0x2000_0000,
                size: sizes.dtcm,
            },
            RamRegion {
                memory: Memory::Ocram,
                start_address: self.ocram_start(),
                size: sizes.ocram + self.dedicated_ocram_size() as u32,
            },
        ]
    }
}

/// One internal RAM region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RamRegion {
    /// Which RAM.
    pub memory: Memory,
    /// First address.
    pub start_address: u32,
    /// Size in bytes. Zero if the RAM isn't available.
    pub size: u32,
}

/// FlexRAM bank counts, by use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlexRamBanks {
    /// FlexRAM OCRAM banks. Dedicated OCRAM isn't counted.
    pub ocram: usize,
    pub itcm: usize,
    pub dtcm: usize,
}

impl FlexRamBanks {
    /// Decode the banks from a FlexRAM bank configuration word.
    ///
    /// On most chips, the word holds two bits per bank (see [`FlexRamKind`]),
    /// and it's the value of IOMUXC_GPR17. The 1180 has three fixed
    /// configurations. Returns `InvalidArgument` for a reserved 1180
    /// configuration.
    pub fn from_bank_config(family: Family, config: u32) -> Result<Self, Error> {
        if let Family::Imxrt1180 = family {
            return match config & 0b11 {
                0b00 => Ok(FlexRamBanks { ocram: 0, itcm: 1, dtcm: 1 }),
                0b10 => Ok(FlexRamBanks { ocram: 0, itcm: 2, dtcm: 0 }),
                0b01 => Ok(FlexRamBanks { ocram: 0, itcm: 0, dtcm: 2 }),
                _ => Err(Error::InvalidArgument),
            };
        }

        let mut banks = FlexRamBanks { ocram: 0, itcm: 0, dtcm: 0 };
        for bank in 0..family.flexram_bank_count() {
            match FlexRamKind::from_bits(config >> (2 * bank)) {
                FlexRamKind::Unused => {}
                FlexRamKind::Ocram => banks.ocram += 1,
                FlexRamKind::Dtcm => banks.dtcm += 1,
                FlexRamKind::Itcm => banks.itcm += 1,
            }
        }
        Ok(banks)
    }

    /// Convert the bank counts into sizes.
    ///
    /// Returns `OutOfRange` if the chip doesn't have that many banks.
    pub fn sizes(self, family: Family) -> Result<FlexRamSizes, Error> {
        if self.ocram + self.itcm + self.dtcm > family.flexram_bank_count() {
            fmt::error!(
                "{} FlexRAM banks exceeds the chip's {}",
                self.ocram + self.itcm + self.dtcm,
                family.flexram_bank_count()
            );
            return Err(Error::OutOfRange);
        }
        let bank_size = family.flexram_bank_size() as u32;
        Ok(FlexRamSizes {
            ocram: self.ocram as u32 * bank_size,
            itcm: self.itcm as u32 * bank_size,
            dtcm: self.dtcm as u32 * bank_size,
        })
    }
}

/// FlexRAM allocations, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlexRamSizes {
    /// FlexRAM OCRAM. The OCRAM region adds any dedicated OCRAM to this.
    pub ocram: u32,
    pub itcm: u32,
    pub dtcm: u32,
}

/// The two-bit FlexRAM bank setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum FlexRamKind {
    /// Powered, but not mapped.
    Unused = 0,
    Ocram = 1,
    Dtcm = 2,
    Itcm = 3,
}

impl FlexRamKind {
    /// Decode the two least-significant bits.
    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => FlexRamKind::Unused,
            1 => FlexRamKind::Ocram,
            2 => FlexRamKind::Dtcm,
            _ => FlexRamKind::Itcm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Family, FlexRamBanks, FlexRamSizes, FlexSpi};
    use crate::{Error, Memory};

    const MOST_FAMILIES: &[Family] = &[
        Family::Imxrt1010,
        Family::Imxrt1015,
        Family::Imxrt1020,
        Family::Imxrt1040,
        Family::Imxrt1050,
        Family::Imxrt1060,
        Family::Imxrt1064,
        Family::Imxrt1160,
        Family::Imxrt1170,
    ];

    #[test]
    fn flexram_bank_config() -> Result<(), Error> {
        /// Configuration word and expected banks.
        #[allow(clippy::unusual_byte_groupings)] // Spacing delimits ITCM / DTCM / OCRAM banks.
        const TABLE: &[(u32, FlexRamBanks)] = &[
            (0x55555555, FlexRamBanks { ocram: 16, dtcm: 0, itcm: 0 }),
            (0xAAAAAAAA, FlexRamBanks { ocram: 0, dtcm: 16, itcm: 0 }),
            (0xFFFFFFFF, FlexRamBanks { ocram: 0, dtcm: 0, itcm: 16 }),
            (0, FlexRamBanks { ocram: 0, dtcm: 0, itcm: 0 }),
            (0b11_10_01, FlexRamBanks { ocram: 1, dtcm: 1, itcm: 1 }),
            (
                0b111111_101010_010101,
                FlexRamBanks { ocram: 3, dtcm: 3, itcm: 3 },
            ),
            (
                0b1111111111111111111111111111_10_01,
                FlexRamBanks { ocram: 1, dtcm: 1, itcm: 14 },
            ),
            (
                0b11_10_0101010101010101010101010101,
                FlexRamBanks { ocram: 14, dtcm: 1, itcm: 1 },
            ),
        ];

        for (config, expected) in TABLE {
            let actual = FlexRamBanks::from_bank_config(Family::Imxrt1170, *config)?;
            assert_eq!(actual, *expected, "{config:#034b}");
        }
        Ok(())
    }

    #[test]
    fn default_layout_matches_default_banks() -> Result<(), Error> {
        let cases = [
            (Family::Imxrt1010, 0b11100101),
            (Family::Imxrt1015, 0b11100101),
            (Family::Imxrt1020, 0b0101111110100101),
            (Family::Imxrt1040, 0b01010101101011111111101001010101),
            (Family::Imxrt1050, 0b01010101101011111111101001010101),
            (Family::Imxrt1060, 0b01010101101011111111101001010101),
            (Family::Imxrt1064, 0b01010101101011111111101001010101),
            (Family::Imxrt1160, 0b11111111101010101111111110101010),
            (Family::Imxrt1170, 0b11111111101010101111111110101010),
            (Family::Imxrt1180, 0b00),
        ];
        for (family, config) in cases {
            assert_eq!(
                FlexRamBanks::from_bank_config(family, config)?,
                family.default_flexram_banks(),
                "{family:?}"
            );
        }
        assert_eq!(
            FlexRamBanks::from_bank_config(Family::Imxrt1180, 0b11),
            Err(Error::InvalidArgument)
        );
        Ok(())
    }

    #[test]
    fn too_many_banks() {
        let banks = FlexRamBanks {
            itcm: 32,
            dtcm: 32,
            ocram: 32,
        };
        for family in MOST_FAMILIES {
            assert_eq!(banks.sizes(*family), Err(Error::OutOfRange), "{family:?}");
        }
    }

    #[test]
    fn imxrt1050_default_regions() -> Result<(), Error> {
        let family = Family::Imxrt1050;
        let sizes = family.default_flexram_banks().sizes(family)?;
        let [itcm, dtcm, ocram] = family.internal_regions(sizes);

        assert_eq!(itcm.memory, Memory::Itcm);
        assert_eq!((itcm.start_address, itcm.size), (0, 128 * 1024));
        assert_eq!((dtcm.start_address, dtcm.size), (0x2000_0000, 128 * 1024));
        assert_eq!((ocram.start_address, ocram.size), (0x2020_0000, 256 * 1024));
        Ok(())
    }

    #[test]
    fn imxrt1170_ocram_includes_dedicated_ocram() {
        let family = Family::Imxrt1170;
        let sizes = FlexRamSizes {
            ocram: 64 * 1024,
            itcm: 192 * 1024,
            dtcm: 256 * 1024,
        };
        let [_, _, ocram] = family.internal_regions(sizes);
        assert_eq!(ocram.start_address, 0x2024_0000);
        assert_eq!(ocram.size, (1280 + 64) * 1024);
    }

    #[test]
    fn imxrt1180_itcm_is_below_the_alias() {
        let family = Family::Imxrt1180;
        for itcm_banks in 0..=family.flexram_bank_count() {
            let size = (itcm_banks * family.flexram_bank_size()) as u32;
            let [itcm, _, _] = family.internal_regions(FlexRamSizes {
                ocram: 0,
                itcm: size,
                dtcm: 0,
            });
            assert_ne!(itcm.start_address, 0);
            assert_eq!(itcm.start_address + itcm.size, 0x1000_0000);
        }
    }

    #[test]
    fn flexspi_availability() {
        for family in MOST_FAMILIES {
            assert!(family.flexspi_start_addr(FlexSpi::FlexSpi1).is_some());
        }
        for family in [Family::Imxrt1010, Family::Imxrt1020, Family::Imxrt1050] {
            assert_eq!(family.flexspi_start_addr(FlexSpi::FlexSpi2), None, "{family:?}");
        }
        assert_eq!(
            Family::Imxrt1040.flexspi_start_addr(FlexSpi::FlexSpi2),
            Some(0x7000_0000)
        );
    }
}
