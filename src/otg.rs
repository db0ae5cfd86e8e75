//! USB OTG device controller
//!
//! [`Controller`] owns the hardware capabilities, the descriptor registry and
//! the endpoint handler table, and walks the core through its lifecycle:
//!
//! ```text
//! Down -> Start -> Powered -> Configured
//!   ^                  |           |
//!   +---- tear_down ---+-----------+
//! ```
//!
//! Bring-up and tear-down are straight register sequences with fixed settle
//! times. The only waits on the hardware are the two reset polls in
//! bring-up; by default they spin until the core answers.

use alloc::vec::Vec;

use fugit::MicrosDurationU32;
use void::{ResultVoidExt, Void};

use crate::descriptor::{ConfigurationDescriptor, DeviceDescriptor, Direction, Speed};
use crate::dma::TransferBuffers;
use crate::endpoint::{EndpointHandler, HandlerTable, MAX_ENDPOINTS};
use crate::hal::blocking::delay::DelayUs;
use crate::platform::{ClockGates, Config, InterruptLines, PowerControl};
use crate::registry::DescriptorRegistry;
use crate::regs::*;
use crate::{Error, Result};

const START_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(10_000);
const SOFT_DISCONNECT_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(4_000);
const ONOFF_START_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(100);
const PHY_POWER_ON_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(10);
const PHY_RESET_PULSE: MicrosDurationU32 = MicrosDurationU32::micros(20);
const RESET_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(1_000);
const RESET_SETTLE_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(1_000);
const SOFT_CONNECT_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(250);
const PROGRAM_DONE_DELAY: MicrosDurationU32 = MicrosDurationU32::micros(10);

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not brought up, or torn down
    Down,
    /// Bring-up in progress
    Start,
    /// Bring-up complete, waiting for the host to pick a configuration
    Powered,
    /// The host selected a configuration
    Configured,
}

impl State {
    pub fn is_up(self) -> bool {
        self != State::Down
    }
}

/// Installed on the controller's interrupt vector.
fn irq_handler(token: u32) {
    log::trace!("usb irq (token {})", token);
}

pub struct Controller<OTG, PHY, SYS, D> {
    otg: OTG,
    phy: PHY,
    sys: SYS,
    delay: D,
    config: Config,
    state: State,
    initialized: bool,
    registry: DescriptorRegistry,
    handlers: HandlerTable,
    buffers: Option<TransferBuffers>,
}

impl<OTG, PHY, SYS, D> Controller<OTG, PHY, SYS, D>
where
    OTG: Registers,
    PHY: Registers,
    SYS: PowerControl + ClockGates + InterruptLines,
    D: DelayUs<u32>,
{
    /// Takes ownership of the hardware. Nothing is touched until
    /// [`bring_up`](Self::bring_up).
    pub fn new(otg: OTG, phy: PHY, sys: SYS, delay: D, config: Config) -> Self {
        Self {
            otg,
            phy,
            sys,
            delay,
            registry: DescriptorRegistry::new(config.identity),
            handlers: HandlerTable::new(config.endpoint_count),
            config,
            state: State::Down,
            initialized: false,
            buffers: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Powers the core and PHY, resets them and programs the core for
    /// device-mode enumeration.
    ///
    /// Does nothing if the controller is already up. Fails only with
    /// [`Error::Unresponsive`], and only when a poll limit is configured.
    pub fn bring_up(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.change_state(State::Start);

        self.sys.set_power(self.config.power_rail, true);
        self.pause(START_DELAY);

        self.handlers.set_capabilities(self.otg.read(GHWCFG1));
        self.handlers.reset();

        self.sys.set_clock_gate(self.config.otg_clock, true);
        self.sys.set_clock_gate(self.config.phy_clock, true);
        self.sys.set_clock_gate(self.config.edram_clock, true);

        log::debug!("usb: soft disconnect");
        self.otg
            .modify(DCTL, |v| v | Dctl::SOFT_DISCONNECT.bits());
        self.pause(SOFT_DISCONNECT_DELAY);

        self.otg.modify(PCGCCTL, |v| v & !Pcgcctl::OFF.bits());
        self.pause(ONOFF_START_DELAY);

        log::debug!("usb: phy power on and reset");
        self.phy.write(OPHYPWR, Ophypwr::empty().bits());
        self.pause(PHY_POWER_ON_DELAY);

        self.phy.modify(OPHYCLK, |v| {
            (v & !Ophyclk::CLOCK_SELECT.bits()) | OPHYCLK_48MHZ
        });

        self.phy
            .modify(ORSTCON, |v| v | Orstcon::PHY_SW_RESET.bits());
        self.pause(PHY_RESET_PULSE);
        self.phy
            .modify(ORSTCON, |v| v & !Orstcon::PHY_SW_RESET.bits());
        self.pause(RESET_DELAY);

        log::debug!("usb: core soft reset");
        self.otg.write(GRSTCTL, Grstctl::CORE_SOFT_RESET.bits());
        self.spin("core soft reset", Self::poll_soft_reset)?;
        self.spin("AHB idle", Self::poll_ahb_idle)?;
        self.pause(RESET_SETTLE_DELAY);

        self.otg
            .modify(DCTL, |v| v & !Dctl::SOFT_DISCONNECT.bits());
        self.pause(SOFT_CONNECT_DELAY);

        // The slot one past the last endpoint is programmed too, unless it
        // would land in the OUT endpoint block.
        self.program_endpoint_interrupts(self.config.endpoint_count + 1);

        self.otg.write(GINTMSK, Gintmsk::empty().bits());
        self.otg.write(DIEPMSK, Diepmsk::empty().bits());
        self.otg.write(DOEPMSK, Doepmsk::empty().bits());

        self.sys.install(self.config.interrupt, irq_handler, 0);
        self.sys.enable(self.config.interrupt);

        self.registry.release_all();

        if self.buffers.is_none() {
            self.buffers = Some(TransferBuffers::new());
        }

        log::debug!("usb: DMA, FIFOs and control endpoint");
        self.otg.write(
            GAHBCFG,
            (Gahbcfg::DMA_ENABLE | Gahbcfg::BURST_INCR8 | Gahbcfg::GLOBAL_INTERRUPT).bits(),
        );
        if let Some((offset, value)) = self.config.start_strobe {
            self.otg.write(offset, value);
        }
        self.otg.write(DCFG, Dcfg::NZ_STS_OUT_HANDSHAKE.bits());
        self.otg
            .modify(DCFG, |v| v & !Dcfg::DEVICE_ADDRESS.bits());
        self.otg.write(in_endpoint(0) + EP_CTL, EpCtl::ACTIVE.bits());
        self.otg.write(out_endpoint(0) + EP_CTL, EpCtl::ACTIVE.bits());

        self.otg.write(GRXFSIZ, self.config.rx_fifo_depth);
        self.otg.write(
            GNPTXFSIZ,
            (self.config.tx_fifo_depth << 8) | self.config.tx_fifo_start,
        );

        // The masks do not survive the FIFO and DMA setup.
        self.program_endpoint_interrupts(self.config.endpoint_count);

        self.otg.write(
            GINTMSK,
            (Gintmsk::OTG
                | Gintmsk::SUSPEND
                | Gintmsk::RESET
                | Gintmsk::IN_ENDPOINT
                | Gintmsk::OUT_ENDPOINT
                | Gintmsk::DISCONNECT)
                .bits(),
        );
        self.otg.write(DAINTMSK, u32::MAX);
        self.otg.write(
            DOEPMSK,
            (Doepmsk::XFER_COMPLETE | Doepmsk::SETUP | Doepmsk::BACK_TO_BACK_SETUP).bits(),
        );
        self.otg.write(
            DIEPMSK,
            (Diepmsk::XFER_COMPLETE | Diepmsk::AHB_ERROR | Diepmsk::TIMEOUT).bits(),
        );

        self.otg.write(in_endpoint(0) + EP_INT, u32::MAX);
        self.otg.write(out_endpoint(0) + EP_INT, u32::MAX);

        self.otg.write(
            DCTL,
            (Dctl::PROGRAM_DONE | Dctl::CLEAR_GLOBAL_OUT_NAK | Dctl::CLEAR_GLOBAL_NP_IN_NAK)
                .bits(),
        );
        self.pause(PROGRAM_DONE_DELAY);
        self.otg
            .modify(GOTGCTL, |v| v | Gotgctl::SESSION_REQUEST.bits());

        self.change_state(State::Powered);
        self.initialized = true;

        Ok(())
    }

    /// Resets the link and PHY, gates the clocks, cuts power and drops every
    /// descriptor and endpoint handler.
    ///
    /// Afterwards the controller is `Down` and the next
    /// [`bring_up`](Self::bring_up) starts from scratch. Does nothing if the
    /// controller is already down.
    pub fn tear_down(&mut self) -> Result<()> {
        if !self.state.is_up() {
            return Ok(());
        }

        // Switch everything on first so the final switch-off is a known
        // transition.
        self.sys.set_power(self.config.power_rail, true);
        self.sys.set_clock_gate(self.config.otg_clock, true);
        self.sys.set_clock_gate(self.config.phy_clock, true);

        log::debug!("usb: link reset, phy power down");
        self.otg.modify(PCGCCTL, |v| v | Pcgcctl::OFF.bits());
        self.phy.write(
            OPHYPWR,
            (Ophypwr::FORCE_SUSPEND
                | Ophypwr::PLL_POWER_DOWN
                | Ophypwr::XO_POWER_DOWN
                | Ophypwr::ANALOG_POWER_DOWN
                | Ophypwr::OTG_POWER_DOWN)
                .bits(),
        );
        self.phy.write(
            ORSTCON,
            (Orstcon::PHY_SW_RESET | Orstcon::LINK_SW_RESET | Orstcon::PHY_LINK_SW_RESET).bits(),
        );
        self.pause(RESET_DELAY);

        self.sys.set_clock_gate(self.config.otg_clock, false);
        self.sys.set_clock_gate(self.config.phy_clock, false);
        self.sys.set_power(self.config.power_rail, false);

        self.registry.release_all();
        self.handlers.reset();
        self.initialized = false;
        self.change_state(State::Down);

        Ok(())
    }

    /// Applies a host's SET_CONFIGURATION.
    ///
    /// Value 0 deconfigures the device. Any other value must match a
    /// configuration's `bConfigurationValue`.
    pub fn set_configuration(&mut self, value: u8) -> Result<()> {
        match self.state {
            State::Powered | State::Configured => {}
            State::Down | State::Start => return Err(Error::NotReady),
        }

        if value == 0 {
            self.change_state(State::Powered);
            return Ok(());
        }

        match self.registry.find_configuration(value) {
            Some(_) => {
                self.change_state(State::Configured);
                Ok(())
            }
            None => Err(Error::InvalidArgument),
        }
    }

    /// Speed the core enumerated at
    pub fn negotiated_speed(&self) -> Result<Speed> {
        self.ensure_up()?;

        let dsts = Dsts::from_bits_truncate(self.otg.read(DSTS));
        Speed::try_from((dsts.bits() >> 1) as u8)
    }

    pub fn device_descriptor(&mut self) -> Result<DeviceDescriptor> {
        self.ensure_up()?;
        self.registry.device_descriptor()
    }

    /// The header of configuration `index`, with its interface built for
    /// `speed_id` on first query
    pub fn configuration_descriptor(
        &mut self,
        index: u8,
        speed_id: u8,
    ) -> Result<ConfigurationDescriptor> {
        self.ensure_up()?;
        self.registry.configuration_descriptor(index, speed_id)
    }

    /// The full GET_DESCRIPTOR(CONFIGURATION) payload of configuration `index`
    pub fn configuration_bytes(&self, index: u8) -> Result<Vec<u8>> {
        self.ensure_up()?;
        self.registry.configuration_bytes(index)
    }

    pub fn string_descriptor(&self, index: u8) -> Result<&[u8]> {
        self.ensure_up()?;
        self.registry.string_descriptor(index)
    }

    /// Installs a transfer handler for one direction of an endpoint.
    ///
    /// The endpoint's hardware must support `direction`. Handlers stay
    /// installed until tear-down.
    pub fn install_endpoint_handler(
        &mut self,
        endpoint: usize,
        direction: Direction,
        handler: EndpointHandler,
        token: u32,
    ) -> Result<()> {
        self.ensure_up()?;
        self.handlers
            .install(endpoint, direction, handler, token)
            .map_err(|e| {
                log::warn!(
                    "usb: rejected {:?} handler on endpoint {}: {}",
                    direction,
                    endpoint,
                    e
                );
                e
            })
    }

    /// Runs the handler for activity on `endpoint` in `direction`. Returns
    /// whether one was installed.
    pub fn dispatch(&self, endpoint: usize, direction: Direction) -> bool {
        self.handlers.dispatch(endpoint, direction)
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DescriptorRegistry {
        &mut self.registry
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn transfer_buffers(&mut self) -> Option<&mut TransferBuffers> {
        self.buffers.as_mut()
    }

    /// Releases the hardware
    pub fn free(self) -> (OTG, PHY, SYS, D) {
        (self.otg, self.phy, self.sys, self.delay)
    }

    fn ensure_up(&self) -> Result<()> {
        match self.state {
            State::Powered | State::Configured => Ok(()),
            State::Down | State::Start => Err(Error::NotReady),
        }
    }

    fn change_state(&mut self, state: State) {
        if self.state != state {
            log::info!("usb: {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    fn pause(&mut self, duration: MicrosDurationU32) {
        self.delay.delay_us(duration.ticks());
    }

    fn program_endpoint_interrupts(&mut self, slots: usize) {
        for n in 0..slots.min(MAX_ENDPOINTS) {
            self.otg.write(in_endpoint(n) + EP_INT, IN_EP_INTERRUPTS.bits());
            self.otg.write(out_endpoint(n) + EP_INT, OUT_EP_INTERRUPTS.bits());
        }
    }

    fn poll_soft_reset(&self) -> nb::Result<(), Void> {
        let grstctl = Grstctl::from_bits_truncate(self.otg.read(GRSTCTL));
        if grstctl.contains(Grstctl::CORE_SOFT_RESET) {
            Err(nb::Error::WouldBlock)
        } else {
            Ok(())
        }
    }

    fn poll_ahb_idle(&self) -> nb::Result<(), Void> {
        let grstctl = Grstctl::from_bits_truncate(self.otg.read(GRSTCTL));
        if grstctl.contains(Grstctl::AHB_IDLE) {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Waits until `poll` reports completion, bounded by the configured poll
    /// limit if there is one.
    fn spin(&self, what: &str, poll: fn(&Self) -> nb::Result<(), Void>) -> Result<()> {
        let limit = match self.config.poll_limit {
            Some(limit) => limit,
            None => {
                nb::block!(poll(self)).void_unwrap();
                return Ok(());
            }
        };

        for _ in 0..limit {
            match poll(self) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(e)) => void::unreachable(e),
            }
        }

        log::error!("usb: no response waiting for {} after {} polls", what, limit);
        Err(Error::Unresponsive)
    }
}
