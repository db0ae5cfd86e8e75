//! USB 2.0 descriptor layouts
//!
//! Every descriptor here is `#[repr(C)]`, byte aligned and free of padding, so
//! `as_bytes()` yields exactly what a host expects on the wire: a length
//! prefix, the descriptor type and little-endian multi-byte fields.

use byteorder::LittleEndian;
use usb_device::descriptor::descriptor_type;
use usb_device::UsbDirection;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::{Error, Result};

/// `bcdUSB` for USB 2.0
pub const USB_2_0: u16 = 0x0200;

/// Highest endpoint number an endpoint address can carry
pub const MAX_ENDPOINT_NUMBER: u8 = 0x0F;

/// Transfer direction, from the host's point of view.
///
/// `Bidirectional` only describes what an endpoint's hardware can do; a
/// descriptor or a handler is always either IN or OUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Out = 0,
    In = 1,
    Bidirectional = 2,
}

impl Direction {
    /// The direction bit of an endpoint address
    fn address_bit(self) -> Result<u8> {
        match self {
            Direction::In => Ok(UsbDirection::In as u8),
            Direction::Out => Ok(UsbDirection::Out as u8),
            Direction::Bidirectional => Err(Error::InvalidArgument),
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Direction::Out),
            1 => Ok(Direction::In),
            2 => Ok(Direction::Bidirectional),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Endpoint transfer type, bits 0..1 of `bmAttributes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Isochronous synchronization type, bits 2..3 of `bmAttributes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncType {
    NoSynchronization = 0,
    Asynchronous = 1,
    Adaptive = 2,
    Synchronous = 3,
}

/// Isochronous usage type, bits 4..5 of `bmAttributes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UsageType {
    Data = 0,
    Feedback = 1,
    ImplicitFeedbackData = 2,
}

/// Link speed as enumerated by the core (`DSTS.ENUMSPD` encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Speed {
    High = 0,
    /// Full speed with a 30 or 60 MHz PHY clock
    Full = 1,
    Low = 2,
    /// Full speed with a 48 MHz PHY clock
    Full48Mhz = 3,
}

impl Speed {
    /// Largest bulk packet the link allows
    pub fn max_bulk_packet_size(self) -> u16 {
        match self {
            Speed::High => 512,
            Speed::Full | Speed::Full48Mhz => 64,
            Speed::Low => 32,
        }
    }
}

impl TryFrom<u8> for Speed {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Speed::High),
            1 => Ok(Speed::Full),
            2 => Ok(Speed::Low),
            3 => Ok(Speed::Full48Mhz),
            _ => Err(Error::InvalidSpeed),
        }
    }
}

/// Describes the device as a whole. Always the first thing a host asks for.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct DeviceDescriptor {
    /// Must be 18.
    pub length: u8,
    pub descriptor_type: u8,
    /// USB release in binary-coded decimal.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Packet size of the control endpoint.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Device release in binary-coded decimal.
    pub bcd_device: U16<LittleEndian>,
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub const LEN: usize = 18;
}

/// Header of one configuration. On the wire it is followed by the
/// interface and endpoint descriptors it owns.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct ConfigurationDescriptor {
    /// Must be 9.
    pub length: u8,
    pub descriptor_type: u8,
    /// Length of this descriptor plus every interface and endpoint
    /// descriptor in the configuration.
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Value a host passes to SET_CONFIGURATION to select this one.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 reserved (set), bit 6 self-powered, bit 5 remote wakeup.
    pub attributes: u8,
    /// Maximum draw in 2 mA units.
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub const LEN: usize = 9;

    const ATTR_RESERVED: u8 = 1 << 7;
    const ATTR_SELF_POWERED: u8 = 1 << 6;
    const ATTR_REMOTE_WAKEUP: u8 = 1 << 5;

    /// A configuration with no interfaces and an unset total length.
    ///
    /// `max_power_ma` is in milliamps and is stored halved.
    pub fn new(
        configuration_value: u8,
        configuration_s: u8,
        self_powered: bool,
        remote_wakeup: bool,
        max_power_ma: u16,
    ) -> Result<Self> {
        let max_power = cast::u8(max_power_ma / 2).map_err(|_| Error::InvalidArgument)?;

        let mut attributes = Self::ATTR_RESERVED;
        if self_powered {
            attributes |= Self::ATTR_SELF_POWERED;
        }
        if remote_wakeup {
            attributes |= Self::ATTR_REMOTE_WAKEUP;
        }

        Ok(Self {
            length: Self::LEN as u8,
            descriptor_type: descriptor_type::CONFIGURATION,
            total_length: U16::new(0),
            num_interfaces: 0,
            configuration_value,
            configuration_s,
            attributes,
            max_power,
        })
    }

    pub fn self_powered(&self) -> bool {
        self.attributes & Self::ATTR_SELF_POWERED != 0
    }

    pub fn remote_wakeup(&self) -> bool {
        self.attributes & Self::ATTR_REMOTE_WAKEUP != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct InterfaceDescriptor {
    /// Must be 9.
    pub length: u8,
    pub descriptor_type: u8,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

impl InterfaceDescriptor {
    pub const LEN: usize = 9;

    pub fn new(
        interface_number: u8,
        alternate_setting: u8,
        interface_class: u8,
        interface_subclass: u8,
        interface_protocol: u8,
        interface_s: u8,
    ) -> Self {
        Self {
            length: Self::LEN as u8,
            descriptor_type: descriptor_type::INTERFACE,
            interface_number,
            alternate_setting,
            num_endpoints: 0,
            interface_class,
            interface_subclass,
            interface_protocol,
            interface_s,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct EndpointDescriptor {
    /// Must be 7.
    pub length: u8,
    pub descriptor_type: u8,
    /// Endpoint number in bits 0..3, bit 7 set for IN.
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LEN: usize = 7;

    /// Rejects a bidirectional direction and numbers that do not fit the
    /// address field.
    pub fn new(
        number: u8,
        direction: Direction,
        transfer_type: TransferType,
        sync_type: SyncType,
        usage_type: UsageType,
        max_packet_size: u16,
        interval: u8,
    ) -> Result<Self> {
        if number > MAX_ENDPOINT_NUMBER {
            return Err(Error::InvalidArgument);
        }
        let endpoint_address = number | direction.address_bit()?;

        Ok(Self {
            length: Self::LEN as u8,
            descriptor_type: descriptor_type::ENDPOINT,
            endpoint_address,
            attributes: transfer_type as u8 | (sync_type as u8) << 2 | (usage_type as u8) << 4,
            max_packet_size: U16::new(max_packet_size),
            interval,
        })
    }

    pub fn number(&self) -> u8 {
        self.endpoint_address & MAX_ENDPOINT_NUMBER
    }

    pub fn direction(&self) -> Direction {
        if self.endpoint_address & UsbDirection::In as u8 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_sizes_match_usb_2_0() {
        assert_eq!(core::mem::size_of::<DeviceDescriptor>(), DeviceDescriptor::LEN);
        assert_eq!(
            core::mem::size_of::<ConfigurationDescriptor>(),
            ConfigurationDescriptor::LEN
        );
        assert_eq!(core::mem::size_of::<InterfaceDescriptor>(), InterfaceDescriptor::LEN);
        assert_eq!(core::mem::size_of::<EndpointDescriptor>(), EndpointDescriptor::LEN);
    }

    #[test]
    fn endpoint_address_and_attributes() {
        let ep = EndpointDescriptor::new(
            1,
            Direction::In,
            TransferType::Bulk,
            SyncType::NoSynchronization,
            UsageType::Data,
            512,
            0,
        )
        .unwrap();

        assert_eq!(ep.as_bytes(), &[7, 5, 0x81, 0x02, 0x00, 0x02, 0]);
        assert_eq!(ep.number(), 1);
        assert_eq!(ep.direction(), Direction::In);

        let iso = EndpointDescriptor::new(
            3,
            Direction::Out,
            TransferType::Isochronous,
            SyncType::Adaptive,
            UsageType::Feedback,
            64,
            1,
        )
        .unwrap();
        assert_eq!(iso.endpoint_address, 0x03);
        assert_eq!(iso.attributes, 0b01_10_01);
    }

    #[test]
    fn endpoint_rejects_bidirectional_and_large_numbers() {
        let bidir = EndpointDescriptor::new(
            1,
            Direction::Bidirectional,
            TransferType::Bulk,
            SyncType::NoSynchronization,
            UsageType::Data,
            64,
            0,
        );
        assert_eq!(bidir, Err(Error::InvalidArgument));

        let too_big = EndpointDescriptor::new(
            16,
            Direction::Out,
            TransferType::Bulk,
            SyncType::NoSynchronization,
            UsageType::Data,
            64,
            0,
        );
        assert_eq!(too_big, Err(Error::InvalidArgument));
        assert_eq!(Direction::try_from(3), Err(Error::InvalidArgument));
    }

    #[test]
    fn configuration_attributes_and_power() {
        let config = ConfigurationDescriptor::new(1, 4, false, false, 500).unwrap();
        assert_eq!(config.attributes, 0x80);
        assert_eq!(config.max_power, 250);
        assert_eq!(config.as_bytes(), &[9, 2, 0, 0, 0, 1, 4, 0x80, 250]);

        let powered = ConfigurationDescriptor::new(2, 0, true, true, 100).unwrap();
        assert_eq!(powered.attributes, 0xE0);
        assert!(powered.self_powered());
        assert!(powered.remote_wakeup());

        assert_eq!(
            ConfigurationDescriptor::new(1, 0, false, false, 600).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn speed_ids() {
        assert_eq!(Speed::try_from(0).unwrap().max_bulk_packet_size(), 512);
        assert_eq!(Speed::try_from(1).unwrap().max_bulk_packet_size(), 64);
        assert_eq!(Speed::try_from(3).unwrap().max_bulk_packet_size(), 64);
        assert_eq!(Speed::try_from(2).unwrap().max_bulk_packet_size(), 32);
        assert_eq!(Speed::try_from(4), Err(Error::InvalidSpeed));
    }
}
