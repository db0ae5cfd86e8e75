//! Delays
//!
//! Bring-up needs microsecond delays before any timer is set up, so this one
//! just burns CPU cycles.

use core::cmp::min;

use cortex_m::asm;
use fugit::HertzU32 as Hertz;

use crate::hal::blocking::delay::{DelayMs, DelayUs};

/// Busy-wait delay calibrated against the core clock
pub struct AsmDelay {
    cycles_per_us: u32,
}

impl AsmDelay {
    pub fn new(core_clock: Hertz) -> Self {
        Self {
            cycles_per_us: core_clock.to_MHz().max(1),
        }
    }

    pub fn cycles_per_us(&self) -> u32 {
        self.cycles_per_us
    }
}

impl DelayUs<u32> for AsmDelay {
    fn delay_us(&mut self, us: u32) {
        let max_chunk = u32::MAX / self.cycles_per_us;
        let mut remaining = us;

        while remaining > 0 {
            let chunk = min(remaining, max_chunk);
            asm::delay(chunk * self.cycles_per_us);
            remaining -= chunk;
        }
    }
}

impl DelayMs<u32> for AsmDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1_000);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn calibration() {
        assert_eq!(AsmDelay::new(216.MHz()).cycles_per_us(), 216);
        assert_eq!(AsmDelay::new(32_768.Hz()).cycles_per_us(), 1);
    }
}
