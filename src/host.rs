//! Host support.
//!
//! There's no processor to hand over to, so [`HostCpu`] records what the
//! boot sequence asks of the CPU. A transfer returns right away, as if the
//! application returned.

/// The reset address that a host build reports for the bootloader.
///
/// It's a Thumb address in the FlexSPI window, past the boot header.
pub const BOOTLOADER_RESET_ADDRESS: u32 = 0x6000_2001;

/// Returns the address of this program's reset handler.
///
/// Always [`BOOTLOADER_RESET_ADDRESS`] on the host.
pub fn bootloader_reset_address() -> u32 {
    BOOTLOADER_RESET_ADDRESS
}

/// A CPU operation recorded by a [`HostCpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuEvent {
    /// `cpsid i`.
    DisableInterrupts,
    /// `cpsie i`.
    EnableInterrupts,
    /// VTOR now holds this address.
    SetVectorTable(u32),
    /// Data and instruction barriers.
    Barriers,
    /// A jump to `entry` with this main stack pointer.
    Transfer { entry: u32, stack_pointer: u32 },
}

/// A [`Cpu`](crate::Cpu) that records every operation.
#[derive(Debug, Default)]
pub struct HostCpu {
    events: Vec<CpuEvent>,
    interrupts_enabled: bool,
    vector_table: u32,
}

impl HostCpu {
    /// Create a CPU with interrupts masked, and the vector table at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation, oldest first.
    pub fn events(&self) -> &[CpuEvent] {
        &self.events
    }

    /// Returns `true` if interrupts are enabled.
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// The last value written to the vector table offset register.
    pub fn vector_table(&self) -> u32 {
        self.vector_table
    }

    /// Forget the recorded operations.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl crate::Cpu for HostCpu {
    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
        self.events.push(CpuEvent::DisableInterrupts);
    }

    fn enable_interrupts(&mut self) {
        self.interrupts_enabled = true;
        self.events.push(CpuEvent::EnableInterrupts);
    }

    fn set_vector_table(&mut self, address: u32) {
        self.vector_table = address;
        self.events.push(CpuEvent::SetVectorTable(address));
    }

    fn barriers(&mut self) {
        self.events.push(CpuEvent::Barriers);
    }

    unsafe fn transfer(&mut self, entry: u32, stack_pointer: u32) {
        self.events.push(CpuEvent::Transfer {
            entry,
            stack_pointer,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{CpuEvent, HostCpu};
    use crate::Cpu;

    #[test]
    fn records_state() {
        let mut cpu = HostCpu::new();
        assert!(!cpu.interrupts_enabled());
        cpu.enable_interrupts();
        cpu.set_vector_table(0x6000_2000);
        assert!(cpu.interrupts_enabled());
        assert_eq!(cpu.vector_table(), 0x6000_2000);
        assert_eq!(
            cpu.events(),
            &[CpuEvent::EnableInterrupts, CpuEvent::SetVectorTable(0x6000_2000)]
        );
        cpu.clear();
        assert!(cpu.events().is_empty());
    }
}
