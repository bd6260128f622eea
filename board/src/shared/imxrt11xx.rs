//! Code shared across all i.MX RT 11xx chips.

use crate::ral;
use imxrt_bootloader::fuse;

/// The PIT runs from the bus clock root, which runs from the 24MHz
/// oscillator while the bootloader runs.
const PIT_TICKS_PER_MICROSECOND: u32 = 24;

/// Unlocks RTWDOG configuration when written to CNT.
const RTWDOG_UNLOCK: u32 = 0xD928_C520;

#[derive(Default)]
pub(crate) struct SavedClocks {
    bus_root: Option<u32>,
}

/// Read the shadow register of fuse word `index`.
///
/// The RAL doesn't name every fuse word, so this indexes from fuse word 0.
pub(crate) fn read_fuse(index: u32) -> u32 {
    let ocotp = unsafe { ral::ocotp::OCOTP::instance() };
    let base = &*ocotp as *const ral::ocotp::RegisterBlock as u32;
    let bank0 = base + fuse::IMXRT11XX_FUSE_BANK0_OFFSET;
    let address = fuse::shadow_register_address(bank0, index);
    // Safety: fuse shadow registers are always readable.
    unsafe { (address as *const u32).read_volatile() }
}

pub(crate) fn disable_watchdog() {
    let rtwdog = unsafe { ral::rtwdog::RTWDOG3::instance() };
    ral::write_reg!(ral::rtwdog, rtwdog, CNT, RTWDOG_UNLOCK);
    ral::modify_reg!(ral::rtwdog, rtwdog, CS, EN: 0);
}

pub(crate) fn pit() -> crate::Pit {
    let pit = unsafe { ral::pit::PIT1::instance() };
    crate::Pit::new(&pit, PIT_TICKS_PER_MICROSECOND)
}

fn wait_for_bus_root(ccm: &ral::ccm::RegisterBlock) {
    let clock_root_2 = &ccm.CLOCK_ROOT[2];
    while ral::read_reg!(
        ral::ccm::clockroot,
        clock_root_2,
        CLOCK_ROOT_STATUS0,
        CHANGING == 1
    ) {}
}

pub(crate) fn enter_clocks() -> SavedClocks {
    let ccm = unsafe { ral::ccm::CCM::instance() };
    let clock_root_2 = &ccm.CLOCK_ROOT[2];
    let saved = SavedClocks {
        bus_root: Some(ral::read_reg!(ral::ccm::clockroot, clock_root_2, CLOCK_ROOT_CONTROL)),
    };

    // Bus clock from the 24 MHz XTAL. Slow, but the PIT then counts
    // microseconds exactly.
    ral::modify_reg!(ral::ccm::clockroot, clock_root_2, CLOCK_ROOT_CONTROL, MUX: 0b001, DIV: 0);
    wait_for_bus_root(&ccm);

    // Enable the clock gate to PIT1.
    ral::write_reg!(ral::ccm, ccm, LPCG61_DIRECT, 1);
    saved
}

pub(crate) fn exit_clocks(saved: &SavedClocks) {
    let ccm = unsafe { ral::ccm::CCM::instance() };
    ral::write_reg!(ral::ccm, ccm, LPCG61_DIRECT, 0);
    if let Some(bus_root) = saved.bus_root {
        let clock_root_2 = &ccm.CLOCK_ROOT[2];
        ral::write_reg!(ral::ccm::clockroot, clock_root_2, CLOCK_ROOT_CONTROL, bus_root);
        wait_for_bus_root(&ccm);
    }
}
