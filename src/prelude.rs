pub use fugit::{ExtU32 as _, RateExtU32 as _};

pub use crate::dma::Buffer as _otg_bootmode_dma_Buffer;
pub use crate::hal::blocking::delay::DelayUs as _;
pub use crate::platform::ClockGates as _otg_bootmode_platform_ClockGates;
pub use crate::platform::InterruptLines as _otg_bootmode_platform_InterruptLines;
pub use crate::platform::PowerControl as _otg_bootmode_platform_PowerControl;
pub use crate::regs::Registers as _otg_bootmode_regs_Registers;
pub use as_slice::{AsMutSlice as _, AsSlice as _};
