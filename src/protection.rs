//! Reserved regions and execute-only protection.
//!
//! Both policies apply on top of the memory map. A reserved region blocks
//! writes and erases regardless of the region that owns the address. An
//! execute-only range blocks every request that touches it.

use crate::{fmt, Error};

/// How many flash banks can report access control.
pub const MAX_FLASH_BANKS: usize = 2;

/// An address range that's never written or erased.
///
/// Bounds are inclusive. The all-zero region means "no reservation."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReservedRegion {
    /// First reserved address.
    pub start_address: u32,
    /// Last reserved address.
    pub end_address: u32,
}

impl ReservedRegion {
    /// No reservation.
    pub const NONE: Self = Self::new(0, 0);

    /// Reserve `start_address` through `end_address`, inclusive.
    pub const fn new(start_address: u32, end_address: u32) -> Self {
        Self {
            start_address,
            end_address,
        }
    }

    /// Returns `true` if this is the empty reservation.
    pub const fn is_none(&self) -> bool {
        self.start_address == 0 && self.end_address == 0
    }

    /// Returns `true` if any byte of `address .. address + length` is reserved.
    pub const fn intersects(&self, address: u32, length: u32) -> bool {
        if self.is_none() || length == 0 {
            return false;
        }
        let last = address as u64 + length as u64 - 1;
        address as u64 <= self.end_address as u64 && self.start_address as u64 <= last
    }
}

/// Returns `true` if the range touches any of the reserved `regions`.
///
/// A partial overlap is enough to block the whole request.
pub fn is_block_reserved(regions: &[ReservedRegion], address: u32, length: u32) -> bool {
    regions.iter().any(|region| {
        let hit = region.intersects(address, length);
        if hit {
            fmt::warning!(
                "{:#010X} +{:#X} overlaps reserved {:#010X}..={:#010X}",
                address,
                length,
                region.start_address,
                region.end_address
            );
        }
        hit
    })
}

/// Access state reported by a flash bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessState {
    /// The range can be read, written, and executed.
    Unlimited,
    /// The range can only be executed.
    ExecuteOnly,
    /// Part of the range is execute-only.
    Mixed,
}

/// A flash bank with hardware access control.
///
/// Implemented by flash drivers that support execute-only segments.
pub trait FlashAccessControl {
    /// First and last address of the bank, inclusive.
    fn bounds(&self) -> (u32, u32);
    /// Query the access state of a range that's entirely within the bank.
    fn access_state(&self, address: u32, length: u32) -> Result<AccessState, Error>;
}

/// Returns `true` if the range is execute-only protected.
///
/// Every bank that covers part of the range is asked for its access state.
/// The range is protected only when every covering bank restricts it. One
/// bank that reports [`AccessState::Unlimited`] leaves the whole range
/// unprotected. A bank that fails to answer counts as unlimited. A range
/// that no bank covers is never protected.
pub fn is_in_execute_only_region(
    banks: &[&dyn FlashAccessControl],
    address: u32,
    length: u32,
) -> bool {
    if length == 0 {
        return false;
    }
    let last = (address as u64 + length as u64 - 1).min(u32::MAX as u64) as u32;

    let mut covered = false;
    for bank in banks {
        let (start, end) = bank.bounds();
        if last < start || end < address {
            continue;
        }
        covered = true;

        let clip_start = address.max(start);
        let clip_length = last.min(end) - clip_start + 1;
        match bank.access_state(clip_start, clip_length) {
            Ok(AccessState::Unlimited) => return false,
            Ok(_) => {}
            Err(err) => {
                fmt::warning!("Access state query failed: {}", err.code());
                return false;
            }
        }
    }

    if covered {
        fmt::warning!("{:#010X} +{:#X} is execute-only", address, length);
    }
    covered
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        is_block_reserved, is_in_execute_only_region, AccessState, FlashAccessControl,
        ReservedRegion,
    };
    use crate::Error;

    /// A bank that reports the same state for every query.
    pub(crate) struct Bank {
        pub(crate) start: u32,
        pub(crate) end: u32,
        pub(crate) state: Result<AccessState, Error>,
    }

    impl FlashAccessControl for Bank {
        fn bounds(&self) -> (u32, u32) {
            (self.start, self.end)
        }
        fn access_state(&self, address: u32, length: u32) -> Result<AccessState, Error> {
            assert!(address >= self.start);
            assert!(address as u64 + length as u64 - 1 <= self.end as u64);
            self.state
        }
    }

    #[test]
    fn reserved_partial_overlap_blocks() {
        let regions = [
            ReservedRegion::new(0x6000_0000, 0x6000_FFFF),
            ReservedRegion::new(0x2020_0000, 0x2020_7FFF),
        ];
        assert!(is_block_reserved(&regions, 0x6000_0000, 1));
        assert!(is_block_reserved(&regions, 0x6000_FFFF, 1));
        assert!(is_block_reserved(&regions, 0x5FFF_FFF0, 0x20));
        assert!(is_block_reserved(&regions, 0x6000_FFF0, 0x1_0000));
        assert!(is_block_reserved(&regions, 0x2010_0000, 0x20_0000));

        assert!(!is_block_reserved(&regions, 0x6001_0000, 0x100));
        assert!(!is_block_reserved(&regions, 0x5FFF_FF00, 0x100));
        assert!(!is_block_reserved(&regions, 0x6000_0000, 0));
    }

    #[test]
    fn empty_reservation_blocks_nothing() {
        let regions = [ReservedRegion::NONE, ReservedRegion::default()];
        assert!(!is_block_reserved(&regions, 0, 4));
        assert!(!is_block_reserved(&regions, 0, u32::MAX));
    }

    #[test]
    fn reservation_at_top_of_memory() {
        let regions = [ReservedRegion::new(0xFFFF_FF00, 0xFFFF_FFFF)];
        assert!(is_block_reserved(&regions, 0xFFFF_FFFF, 1));
        assert!(is_block_reserved(&regions, 0xFFFF_0000, u32::MAX));
    }

    #[test]
    fn unrestricted_bank_dominates_execute_only() {
        let restricted = Bank {
            start: 0x0000_0000,
            end: 0x0007_FFFF,
            state: Ok(AccessState::ExecuteOnly),
        };
        let unrestricted = Bank {
            start: 0x0008_0000,
            end: 0x000F_FFFF,
            state: Ok(AccessState::Unlimited),
        };
        let banks: [&dyn FlashAccessControl; 2] = [&restricted, &unrestricted];

        assert!(!is_in_execute_only_region(&banks, 0x0007_0000, 0x2_0000));
        // Either bank alone decides for the ranges that it covers.
        assert!(is_in_execute_only_region(&banks, 0x0000_1000, 0x100));
        assert!(!is_in_execute_only_region(&banks, 0x0009_0000, 0x100));
    }

    #[test]
    fn every_restricted_bank_protects() {
        let first = Bank {
            start: 0x0000_0000,
            end: 0x0007_FFFF,
            state: Ok(AccessState::ExecuteOnly),
        };
        let second = Bank {
            start: 0x0008_0000,
            end: 0x000F_FFFF,
            state: Ok(AccessState::Mixed),
        };
        let banks: [&dyn FlashAccessControl; 2] = [&first, &second];
        assert!(is_in_execute_only_region(&banks, 0x0007_0000, 0x2_0000));
    }

    #[test]
    fn uncovered_or_failing_is_unprotected() {
        let failing = Bank {
            start: 0x0000_0000,
            end: 0x0007_FFFF,
            state: Err(Error::Fail),
        };
        let banks: [&dyn FlashAccessControl; 1] = [&failing];
        assert!(!is_in_execute_only_region(&banks, 0x1000, 4));
        assert!(!is_in_execute_only_region(&banks, 0x2000_0000, 4));
        assert!(!is_in_execute_only_region(&[], 0x1000, 4));
    }
}
