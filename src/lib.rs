//! Memory routing and boot support for i.MX RT bootloaders.
//!
//! This crate is the part of a bootloader that sits between the command
//! layer and the memories. It describes every region that the bootloader
//! may touch, routes read, write, fill, erase, and flush requests to the
//! right driver, and enforces the policies that keep the bootloader from
//! damaging itself:
//!
//! - reserved regions of flash and RAM can't be written or erased.
//! - execute-only flash can't be read, written, or erased.
//! - with write verification enabled, every completed write to normal
//!   memory is read back.
//!
//! It also finds out how FlexRAM is split between ITCM, DTCM, and OCRAM,
//! answers property queries, and finally checks and starts the
//! application.
//!
//! # Getting started
//!
//! Describe your memories with a [`ContextBuilder`]. Each region names a
//! [`RegionInterface`] that performs the access. The crate provides
//! interfaces for normal memory ([`NormalMemory`]), peripheral memory
//! ([`DeviceMemory`]), and NOR flash that implements the `embedded-storage`
//! traits ([`FlashRegion`]). External devices, like SD cards, implement
//! [`ExternalInterface`](external::ExternalInterface), and are addressed by
//! their [`MemoryId`].
//!
//! ```
//! use imxrt_bootloader::{ContextBuilder, Family, MemoryId, NormalMemory, ReservedRegion};
//!
//! // Safety: the example never accesses memory.
//! static RAM: NormalMemory = unsafe { NormalMemory::new() };
//!
//! let family = Family::Imxrt1170;
//! let sizes = family.default_flexram_banks().sizes(family).unwrap();
//!
//! let ctx = ContextBuilder::new(0x3000_2000)
//!     .internal_ram(family, sizes, &RAM)
//!     .ram_reserved_region(ReservedRegion::new(0x2000_0000, 0x2000_7FFF))
//!     .build()
//!     .unwrap();
//!
//! let word = [0xFFu8; 4];
//! assert!(ctx.mem_write(0x2000_0000, &word, MemoryId::INTERNAL).is_err());
//! ```
//!
//! Once the bootloader is done, call [`boot_application`]. The function
//! only returns if the application can't start.
//!
//! # Targets
//!
//! On an embedded target, the crate provides [`CortexM`], a [`Cpu`] for the
//! running processor, and re-exports the `cortex-m-rt` interface. On the
//! host, it provides `HostCpu`, which records operations instead of
//! executing them.
//!
//! # Feature flags
//!
//! - `defmt` logs with `defmt`.
//! - `log` logs with `log`.
//! - `device` enables the `cortex-m-rt` "device" feature.
//!
//! Without a logging feature, the crate doesn't log.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]

mod fmt;

mod boot;
mod context;
mod error;
pub mod external;
mod family;
pub mod fuse;
mod interface;
mod map;
pub mod property;
pub mod protection;

pub use boot::{
    boot_application, bootloader_init, shutdown_cleanup, BootError, ClockOption, Cpu, Platform,
    ShutdownType, VectorTable,
};
pub use context::{BootloaderContext, ContextBuilder};
pub use error::{Error, WriteStatus, STATUS_SUCCESS};
pub use external::MAX_EXTERNAL_MEMORIES;
pub use family::{Family, FlexRamBanks, FlexRamKind, FlexRamSizes, FlexSpi, RamRegion};
pub use interface::{DeviceMemory, FlashRegion, NormalMemory, RegionInterface};
pub use map::{
    MapEntry, Memory, MemoryClass, MemoryId, MemoryMap, RegionProperty, MAX_MEMORY_REGIONS,
};
pub use protection::ReservedRegion;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        mod target;
        pub use target::*;
    } else {
        mod host;
        pub use host::*;
    }
}
