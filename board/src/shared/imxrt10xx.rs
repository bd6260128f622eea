//! Code shared across all i.MX RT 10xx chips.
use crate::ral;

/// The PIT runs from the 24MHz crystal oscillator, divided by 24.
const PIT_TICKS_PER_MICROSECOND: u32 = 1;

/// Unlocks RTWDOG configuration when written to CNT.
const RTWDOG_UNLOCK: u32 = 0xD928_C520;

/// Clock configuration that the boot ROM left.
#[derive(Default)]
pub(crate) struct SavedClocks {
    cscmr1: Option<u32>,
}

/// Returns the CFG5 shadow register, which holds SEC_CONFIG.
pub(crate) fn sec_config_fuse() -> u32 {
    let ocotp = unsafe { ral::ocotp::OCOTP::instance() };
    ral::read_reg!(ral::ocotp, ocotp, CFG5)
}

/// Returns GPR17 if it selects the FlexRAM banks, instead of the fuses.
pub(crate) fn flexram_bank_config() -> Option<u32> {
    let gpr = unsafe { ral::iomuxc_gpr::IOMUXC_GPR::instance() };
    if ral::read_reg!(ral::iomuxc_gpr, gpr, GPR16, FLEXRAM_BANK_CFG_SEL == 1) {
        Some(ral::read_reg!(ral::iomuxc_gpr, gpr, GPR17))
    } else {
        None
    }
}

pub(crate) fn disable_watchdog() {
    let rtwdog = unsafe { ral::rtwdog::RTWDOG::instance() };
    ral::write_reg!(ral::rtwdog, rtwdog, CNT, RTWDOG_UNLOCK);
    ral::modify_reg!(ral::rtwdog, rtwdog, CS, EN: 0);
}

pub(crate) fn pit() -> crate::Pit {
    let pit = unsafe { ral::pit::PIT::instance() };
    crate::Pit::new(&pit, PIT_TICKS_PER_MICROSECOND)
}

pub(crate) fn enter_clocks() -> SavedClocks {
    let ccm = unsafe { ral::ccm::CCM::instance() };
    let saved = SavedClocks {
        cscmr1: Some(ral::read_reg!(ral::ccm, ccm, CSCMR1)),
    };
    // Disable the PIT clock gate while we change the clock...
    ral::modify_reg!(ral::ccm, ccm, CCGR1, CG6: 0b00);
    ral::modify_reg!(
        ral::ccm,
        ccm,
        CSCMR1,
        PERCLK_PODF: DIVIDE_24,
        PERCLK_CLK_SEL: PERCLK_CLK_SEL_1 // Oscillator clock
    );
    ral::modify_reg!(ral::ccm, ccm, CCGR1, CG6: 0b11);
    saved
}

pub(crate) fn exit_clocks(saved: &SavedClocks) {
    let ccm = unsafe { ral::ccm::CCM::instance() };
    ral::modify_reg!(ral::ccm, ccm, CCGR1, CG6: 0b00);
    if let Some(cscmr1) = saved.cscmr1 {
        ral::write_reg!(ral::ccm, ccm, CSCMR1, cscmr1);
    }
}
