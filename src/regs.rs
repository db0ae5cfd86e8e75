//! OTG core and PHY register map
//!
//! Offsets are in bytes from the block base. Bit definitions follow the
//! Synopsys DWC OTG device-mode register set.

use core::ptr;

use bitflags::bitflags;

/// 32-bit register access at a byte offset
pub trait Registers {
    fn read(&self, offset: usize) -> u32;

    fn write(&mut self, offset: usize, value: u32);

    fn modify<F>(&mut self, offset: usize, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

/// Memory-mapped register block
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a register block that stays mapped for
    /// the lifetime of the returned value, and nothing else may access it.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u32,
        }
    }

    fn address(&self, offset: usize) -> *mut u32 {
        (self.base as usize + offset) as *mut u32
    }
}

unsafe impl Send for Mmio {}

impl Registers for Mmio {
    fn read(&self, offset: usize) -> u32 {
        // NOTE(unsafe) exclusive, mapped block per `Mmio::new`
        unsafe { ptr::read_volatile(self.address(offset)) }
    }

    fn write(&mut self, offset: usize, value: u32) {
        // NOTE(unsafe) exclusive, mapped block per `Mmio::new`
        unsafe { ptr::write_volatile(self.address(offset), value) }
    }
}

// Core global registers
pub const GOTGCTL: usize = 0x000;
pub const GAHBCFG: usize = 0x008;
pub const GRSTCTL: usize = 0x010;
pub const GINTMSK: usize = 0x018;
pub const GRXFSIZ: usize = 0x024;
pub const GNPTXFSIZ: usize = 0x028;
/// Endpoint direction capabilities, two bits per endpoint
pub const GHWCFG1: usize = 0x044;

// Device-mode registers
pub const DCFG: usize = 0x800;
pub const DCTL: usize = 0x804;
pub const DSTS: usize = 0x808;
pub const DIEPMSK: usize = 0x810;
pub const DOEPMSK: usize = 0x814;
pub const DAINTMSK: usize = 0x81C;

/// Link power and clock gating
pub const PCGCCTL: usize = 0xE00;

const IN_ENDPOINTS: usize = 0x900;
const OUT_ENDPOINTS: usize = 0xB00;
const ENDPOINT_STRIDE: usize = 0x20;

/// Offset of an endpoint's control register within its block
pub const EP_CTL: usize = 0x00;
/// Offset of an endpoint's interrupt register within its block
pub const EP_INT: usize = 0x08;

/// Base of IN endpoint `n`'s register block
pub const fn in_endpoint(n: usize) -> usize {
    IN_ENDPOINTS + n * ENDPOINT_STRIDE
}

/// Base of OUT endpoint `n`'s register block
pub const fn out_endpoint(n: usize) -> usize {
    OUT_ENDPOINTS + n * ENDPOINT_STRIDE
}

// PHY registers
pub const OPHYPWR: usize = 0x0;
pub const OPHYCLK: usize = 0x4;
pub const ORSTCON: usize = 0x8;

/// Values of one endpoint's field in `GHWCFG1`
pub const HWCFG1_BIDIRECTIONAL: u32 = 0;
pub const HWCFG1_IN: u32 = 1;
pub const HWCFG1_OUT: u32 = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gotgctl: u32 {
        const SESSION_REQUEST = 1 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gahbcfg: u32 {
        const GLOBAL_INTERRUPT = 1 << 0;
        const BURST_INCR8 = 5 << 1;
        const DMA_ENABLE = 1 << 5;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Grstctl: u32 {
        const CORE_SOFT_RESET = 1 << 0;
        const AHB_IDLE = 1 << 31;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gintmsk: u32 {
        const OTG = 1 << 2;
        const SUSPEND = 1 << 11;
        const RESET = 1 << 12;
        const IN_ENDPOINT = 1 << 18;
        const OUT_ENDPOINT = 1 << 19;
        const DISCONNECT = 1 << 29;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dcfg: u32 {
        const NZ_STS_OUT_HANDSHAKE = 1 << 2;
        const DEVICE_ADDRESS = 0x7F << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dctl: u32 {
        const SOFT_DISCONNECT = 1 << 1;
        const CLEAR_GLOBAL_NP_IN_NAK = 1 << 8;
        const CLEAR_GLOBAL_OUT_NAK = 1 << 10;
        const PROGRAM_DONE = 1 << 11;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dsts: u32 {
        const ENUM_SPEED = 0b11 << 1;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Diepmsk: u32 {
        const XFER_COMPLETE = 1 << 0;
        const AHB_ERROR = 1 << 2;
        const TIMEOUT = 1 << 3;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Doepmsk: u32 {
        const XFER_COMPLETE = 1 << 0;
        const SETUP = 1 << 3;
        const BACK_TO_BACK_SETUP = 1 << 6;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InEpInt: u32 {
        const XFER_COMPLETE = 1 << 0;
        const EP_DISABLED = 1 << 1;
        const AHB_ERROR = 1 << 2;
        const TIMEOUT = 1 << 3;
        const TOKEN_TX_FIFO_EMPTY = 1 << 4;
        const TOKEN_EP_MISMATCH = 1 << 5;
        const NAK_EFFECTIVE = 1 << 6;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OutEpInt: u32 {
        const XFER_COMPLETE = 1 << 0;
        const EP_DISABLED = 1 << 1;
        const AHB_ERROR = 1 << 2;
        const SETUP = 1 << 3;
        const TOKEN_EP_DISABLED = 1 << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EpCtl: u32 {
        const ACTIVE = 1 << 15;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Pcgcctl: u32 {
        const STOP_CLOCK = 1 << 0;
        const GATE_HCLK = 1 << 1;
        const OFF = Self::STOP_CLOCK.bits() | Self::GATE_HCLK.bits();
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ophypwr: u32 {
        const FORCE_SUSPEND = 1 << 0;
        const PLL_POWER_DOWN = 1 << 1;
        const XO_POWER_DOWN = 1 << 2;
        const ANALOG_POWER_DOWN = 1 << 3;
        const OTG_POWER_DOWN = 1 << 4;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ophyclk: u32 {
        const CLOCK_SELECT = 0b11;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Orstcon: u32 {
        const PHY_SW_RESET = 1 << 0;
        const LINK_SW_RESET = 1 << 1;
        const PHY_LINK_SW_RESET = 1 << 2;
    }
}

/// `OPHYCLK.CLOCK_SELECT` value for a 48 MHz reference
pub const OPHYCLK_48MHZ: u32 = 0b00;

/// Interrupts unmasked on every IN endpoint during bring-up
pub const IN_EP_INTERRUPTS: InEpInt = InEpInt::all();

/// Interrupts unmasked on every OUT endpoint during bring-up
pub const OUT_EP_INTERRUPTS: OutEpInt = OutEpInt::all();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_blocks() {
        assert_eq!(in_endpoint(0) + EP_CTL, 0x900);
        assert_eq!(in_endpoint(6) + EP_INT, 0x9C8);
        assert_eq!(out_endpoint(1) + EP_INT, 0xB28);
    }

    #[test]
    fn endpoint_interrupt_sets() {
        assert_eq!(IN_EP_INTERRUPTS.bits(), 0x7F);
        assert_eq!(OUT_EP_INTERRUPTS.bits(), 0x1F);
    }

    #[test]
    fn mmio_reads_and_writes_through_the_pointer() {
        let mut block = [0u32; 4];
        let mut regs = unsafe { Mmio::new(block.as_mut_ptr() as usize) };

        regs.write(0x8, 0xDEAD_BEEF);
        regs.modify(0x8, |v| v & 0xFFFF);
        assert_eq!(regs.read(0x8), 0xBEEF);
        drop(regs);
        assert_eq!(block[2], 0xBEEF);
    }
}
