//! Cortex-M7 support.
//!
//! [`CortexM`] is the [`Cpu`](crate::Cpu) that boards pass to
//! [`boot_application`](crate::boot_application). This module also
//! re-exports the `cortex-m-rt` interface, so a bootloader binary can
//! define its entrypoint and exceptions through this crate.
//!
//! The bootloader relies on the cortex-m-rt "set-sp" and "set-vtor"
//! features. On the 11xx, the boot ROM doesn't set the stack pointer.

use core::arch::asm;

pub use cortex_m_rt::*;

/// Vector table offset register.
const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;

/// Returns the address of this program's reset handler.
///
/// An application vector table that points here would boot the
/// bootloader again.
pub fn bootloader_reset_address() -> u32 {
    extern "C" {
        fn Reset() -> !;
    }
    Reset as usize as u32
}

/// The processor running the bootloader.
pub struct CortexM {
    _priv: (),
}

impl CortexM {
    /// Take control of the processor.
    ///
    /// # Safety
    ///
    /// Nothing else may touch the vector table, the stack pointers, or the
    /// interrupt mask while this object exists.
    pub const unsafe fn new() -> Self {
        Self { _priv: () }
    }
}

impl crate::Cpu for CortexM {
    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
    }

    fn enable_interrupts(&mut self) {
        // Safety: the boot sequence masks interrupts and unmasks them again.
        // Critical sections don't nest across it.
        unsafe { cortex_m::interrupt::enable() };
    }

    fn set_vector_table(&mut self, address: u32) {
        // Safety: owned by this object. See new().
        unsafe { SCB_VTOR.write_volatile(address) };
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn barriers(&mut self) {
        cortex_m::asm::isb();
        cortex_m::asm::dsb();
    }

    unsafe fn transfer(&mut self, entry: u32, stack_pointer: u32) {
        // Safety: caller upholds the contract. Both stacks are reset, since
        // the application may run from either one.
        unsafe {
            asm!(
                "msr msp, {sp}",
                "msr psp, {sp}",
                "bx {entry}",
                sp = in(reg) stack_pointer,
                entry = in(reg) entry,
                options(noreturn)
            )
        }
    }
}
