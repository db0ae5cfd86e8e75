//! Platform capabilities and configuration
//!
//! The controller never touches clock, power or interrupt hardware directly.
//! It asks for these through the traits below, and takes every
//! platform-specific constant from [`Config`].

use crate::endpoint::MAX_ENDPOINTS;

/// Power domain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerRail(pub u32);

/// Clock gate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockGate(pub u32);

/// Interrupt handler signature; the token is the one given at installation.
pub type InterruptHandler = fn(token: u32);

pub trait PowerControl {
    fn set_power(&mut self, rail: PowerRail, on: bool);
}

pub trait ClockGates {
    fn set_clock_gate(&mut self, gate: ClockGate, on: bool);
}

pub trait InterruptLines {
    /// Routes `vector` to `handler`. Does not enable the line.
    fn install(&mut self, vector: u32, handler: InterruptHandler, token: u32);

    fn enable(&mut self, vector: u32);
}

/// What the device reports about itself to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor: u16,
    pub product: u16,
    /// Device release in binary-coded decimal
    pub release: u16,
    /// Packet size of the control endpoint
    pub max_packet_size0: u8,
    pub manufacturer: &'static str,
    pub product_name: &'static str,
    pub serial_number: &'static str,
    pub configuration_name: &'static str,
    /// Bus power drawn in the single configuration, in mA
    pub max_power_ma: u16,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_name: &'static str,
}

impl DeviceIdentity {
    /// Apple Mobile Device in OpenIBoot mode, vendor-specific bulk interface
    pub const OPENIBOOT: Self = Self {
        vendor: 0x05AC,
        product: 0x1280,
        release: 0x1103,
        max_packet_size0: 64,
        manufacturer: "Apple Inc.",
        product_name: "Apple Mobile Device (OpenIBoot Mode)",
        serial_number: "",
        configuration_name: "OpenIBoot Mode Configuration",
        max_power_ma: 500,
        interface_class: 0xFF,
        interface_subclass: 0xFF,
        interface_protocol: 0x51,
        interface_name: "IF0",
    };
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::OPENIBOOT
    }
}

/// Controller configuration
///
/// The default is the S5L8900 OTG block in OpenIBoot mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub(crate) identity: DeviceIdentity,
    pub(crate) endpoint_count: usize,
    pub(crate) interrupt: u32,
    pub(crate) power_rail: PowerRail,
    pub(crate) otg_clock: ClockGate,
    pub(crate) phy_clock: ClockGate,
    pub(crate) edram_clock: ClockGate,
    pub(crate) rx_fifo_depth: u32,
    pub(crate) tx_fifo_depth: u32,
    pub(crate) tx_fifo_start: u32,
    pub(crate) start_strobe: Option<(usize, u32)>,
    pub(crate) poll_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::OPENIBOOT,
            endpoint_count: 6,
            interrupt: 0x13,
            power_rail: PowerRail(0x1800),
            otg_clock: ClockGate(0x2),
            phy_clock: ClockGate(0x23),
            edram_clock: ClockGate(0x1B),
            rx_fifo_depth: 0x1C0,
            tx_fifo_depth: 0x1C0,
            tx_fifo_start: 0x200,
            start_strobe: Some((0x1C, 0x1)),
            poll_limit: None,
        }
    }
}

impl Config {
    pub fn identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Number of physical endpoints, control endpoint included.
    /// Must be between 1 and 16.
    pub fn endpoint_count(mut self, count: usize) -> Self {
        assert!(count >= 1 && count <= MAX_ENDPOINTS);

        self.endpoint_count = count;
        self
    }

    pub fn interrupt(mut self, vector: u32) -> Self {
        self.interrupt = vector;
        self
    }

    pub fn power_rail(mut self, rail: PowerRail) -> Self {
        self.power_rail = rail;
        self
    }

    /// Gates for the OTG link, the PHY and the embedded DRAM the core
    /// fetches descriptors from
    pub fn clock_gates(mut self, otg: ClockGate, phy: ClockGate, edram: ClockGate) -> Self {
        self.otg_clock = otg;
        self.phy_clock = phy;
        self.edram_clock = edram;
        self
    }

    /// FIFO partition, in 32-bit words. `GNPTXFSIZ` is programmed as
    /// `tx_depth << 8 | tx_start`.
    pub fn fifo(mut self, rx_depth: u32, tx_depth: u32, tx_start: u32) -> Self {
        assert!(tx_depth <= 0x00FF_FFFF);

        self.rx_fifo_depth = rx_depth;
        self.tx_fifo_depth = tx_depth;
        self.tx_fifo_start = tx_start;
        self
    }

    /// SoC-specific register written once during bring-up, if any
    pub fn start_strobe(mut self, strobe: Option<(usize, u32)>) -> Self {
        self.start_strobe = strobe;
        self
    }

    /// Bounds every spin-wait on the core to `limit` polls.
    ///
    /// Without a limit a core that never finishes its reset hangs bring-up
    /// forever.
    pub fn poll_limit(mut self, limit: Option<u32>) -> Self {
        self.poll_limit = limit;
        self
    }

    pub fn device_identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn num_endpoints(&self) -> usize {
        self.endpoint_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_openiboot_profile() {
        let config = Config::default();
        assert_eq!(config.device_identity().vendor, 0x05AC);
        assert_eq!(config.num_endpoints(), 6);
        assert_eq!(config.poll_limit, None);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::default()
            .endpoint_count(4)
            .interrupt(42)
            .poll_limit(Some(10))
            .start_strobe(None);

        assert_eq!(config.endpoint_count, 4);
        assert_eq!(config.interrupt, 42);
        assert_eq!(config.poll_limit, Some(10));
        assert_eq!(config.start_strobe, None);
    }

    #[test]
    #[should_panic]
    fn too_many_endpoints() {
        let _ = Config::default().endpoint_count(MAX_ENDPOINTS + 1);
    }
}
