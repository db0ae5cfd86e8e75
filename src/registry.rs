//! Descriptor registry
//!
//! Owns the device descriptor, its configurations, their interfaces and their
//! endpoints, plus the string table the descriptors point into. Everything is
//! built lazily on the first host query and released in one go.
//!
//! Configurations and interfaces are addressed by index, so growing any of
//! the tables never invalidates a handle returned earlier.

use alloc::vec::Vec;

use usb_device::descriptor::descriptor_type;
use zerocopy::{AsBytes, U16};

use crate::descriptor::{
    ConfigurationDescriptor, DeviceDescriptor, Direction, EndpointDescriptor,
    InterfaceDescriptor, Speed, SyncType, TransferType, UsageType, USB_2_0,
};
use crate::platform::DeviceIdentity;
use crate::strings::StringTable;
use crate::{Error, Result};

/// Endpoint number of the bulk pair in the bootloader interface
const BULK_ENDPOINT: u8 = 1;

/// Handle to an interface within a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceHandle {
    pub configuration: u8,
    pub interface: u8,
}

#[derive(Debug)]
struct Interface {
    descriptor: InterfaceDescriptor,
    endpoints: Vec<EndpointDescriptor>,
}

#[derive(Debug)]
struct Configuration {
    descriptor: ConfigurationDescriptor,
    interfaces: Vec<Interface>,
    /// `descriptor.total_length` is current
    finalized: bool,
}

impl Configuration {
    fn total_length(&self) -> usize {
        self.interfaces.iter().fold(ConfigurationDescriptor::LEN, |len, interface| {
            len + InterfaceDescriptor::LEN + interface.endpoints.len() * EndpointDescriptor::LEN
        })
    }
}

#[derive(Debug)]
pub struct DescriptorRegistry {
    identity: DeviceIdentity,
    device: Option<DeviceDescriptor>,
    configurations: Vec<Configuration>,
    strings: StringTable,
}

impl DescriptorRegistry {
    pub const fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            device: None,
            configurations: Vec::new(),
            strings: StringTable::new(),
        }
    }

    /// Whether the device descriptor has been built since the last release
    pub fn is_built(&self) -> bool {
        self.device.is_some()
    }

    /// The device descriptor, built on first use.
    ///
    /// Building interns the manufacturer, product and serial strings and
    /// creates the bootloader configuration. Later calls return the same
    /// descriptor until [`release_all`](Self::release_all).
    pub fn device_descriptor(&mut self) -> Result<DeviceDescriptor> {
        if let Some(device) = self.device {
            return Ok(device);
        }

        let strings = self.strings.len();
        let configurations = self.configurations.len();

        match self.build_device() {
            Ok(device) => Ok(device),
            Err(e) => {
                self.device = None;
                self.configurations.truncate(configurations);
                self.strings.truncate(strings);
                Err(e)
            }
        }
    }

    fn build_device(&mut self) -> Result<DeviceDescriptor> {
        let identity = self.identity;

        let manufacturer_s = self.strings.intern(identity.manufacturer)?;
        let product_s = self.strings.intern(identity.product_name)?;
        let serial_s = self.strings.intern(identity.serial_number)?;

        self.device = Some(DeviceDescriptor {
            length: DeviceDescriptor::LEN as u8,
            descriptor_type: descriptor_type::DEVICE,
            bcd_usb: U16::new(USB_2_0),
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size0: identity.max_packet_size0,
            vendor: U16::new(identity.vendor),
            product: U16::new(identity.product),
            bcd_device: U16::new(identity.release),
            manufacturer_s,
            product_s,
            serial_s,
            num_configurations: self.configurations.len() as u8,
        });

        let configuration_s = self.strings.intern(identity.configuration_name)?;
        self.add_configuration(1, configuration_s, false, false, identity.max_power_ma)?;

        log::debug!(
            "built device descriptor {:04x}:{:04x}",
            identity.vendor,
            identity.product
        );

        self.device.ok_or(Error::NotReady)
    }

    /// The header of configuration `index`.
    ///
    /// A configuration without interfaces gets the bootloader interface on
    /// first query: one bulk IN and one bulk OUT endpoint sized for
    /// `speed_id`. An unknown speed is rejected before anything is built.
    pub fn configuration_descriptor(
        &mut self,
        index: u8,
        speed_id: u8,
    ) -> Result<ConfigurationDescriptor> {
        let configuration = self.configuration(index)?;

        if configuration.interfaces.is_empty() {
            let speed = Speed::try_from(speed_id).map_err(|e| {
                log::warn!("refusing configuration {} at speed id {}", index, speed_id);
                e
            })?;

            let strings = self.strings.len();
            if let Err(e) = self.build_bootloader_interface(index, speed) {
                if let Ok(configuration) = self.configuration_mut(index) {
                    configuration.interfaces.clear();
                    configuration.descriptor.num_interfaces = 0;
                    configuration.finalized = false;
                }
                self.strings.truncate(strings);
                return Err(e);
            }
        }

        Ok(self.configuration(index)?.descriptor)
    }

    fn build_bootloader_interface(&mut self, index: u8, speed: Speed) -> Result<()> {
        let identity = self.identity;
        let packet_size = speed.max_bulk_packet_size();

        let interface_s = self.strings.intern(identity.interface_name)?;
        let interface = self.add_interface(
            index,
            0,
            0,
            identity.interface_class,
            identity.interface_subclass,
            identity.interface_protocol,
            interface_s,
        )?;

        for &direction in [Direction::In, Direction::Out].iter() {
            self.add_endpoint(
                interface,
                BULK_ENDPOINT,
                direction,
                TransferType::Bulk,
                SyncType::NoSynchronization,
                UsageType::Data,
                packet_size,
                0,
            )?;
        }

        let total = self.finalize(index)?;
        log::debug!(
            "configuration {}: {:?} speed, {} byte packets, {} bytes total",
            index,
            speed,
            packet_size,
            total
        );

        Ok(())
    }

    /// Appends a configuration and returns its index.
    pub fn add_configuration(
        &mut self,
        value: u8,
        string_index: u8,
        self_powered: bool,
        remote_wakeup: bool,
        max_power_ma: u16,
    ) -> Result<u8> {
        let index = u8::try_from(self.configurations.len()).map_err(|_| Error::Overflow)?;
        if index == u8::MAX {
            return Err(Error::Overflow);
        }
        let descriptor = ConfigurationDescriptor::new(
            value,
            string_index,
            self_powered,
            remote_wakeup,
            max_power_ma,
        )?;
        self.configurations.try_reserve(1)?;

        self.configurations.push(Configuration {
            descriptor,
            interfaces: Vec::new(),
            finalized: false,
        });
        if let Some(device) = self.device.as_mut() {
            device.num_configurations = index + 1;
        }

        Ok(index)
    }

    /// Appends an interface to configuration `configuration`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_interface(
        &mut self,
        configuration: u8,
        number: u8,
        alt_setting: u8,
        class: u8,
        subclass: u8,
        protocol: u8,
        string_index: u8,
    ) -> Result<InterfaceHandle> {
        let config = self.configuration_mut(configuration)?;
        let interface = config.descriptor.num_interfaces;
        if interface == u8::MAX {
            return Err(Error::Overflow);
        }
        config.interfaces.try_reserve(1)?;

        config.interfaces.push(Interface {
            descriptor: InterfaceDescriptor::new(
                number,
                alt_setting,
                class,
                subclass,
                protocol,
                string_index,
            ),
            endpoints: Vec::new(),
        });
        config.descriptor.num_interfaces += 1;
        config.finalized = false;

        Ok(InterfaceHandle {
            configuration,
            interface,
        })
    }

    /// Appends an endpoint to an interface and returns its position there.
    ///
    /// `direction` must be IN or OUT.
    #[allow(clippy::too_many_arguments)]
    pub fn add_endpoint(
        &mut self,
        interface: InterfaceHandle,
        number: u8,
        direction: Direction,
        transfer_type: TransferType,
        sync_type: SyncType,
        usage_type: UsageType,
        max_packet_size: u16,
        interval: u8,
    ) -> Result<u8> {
        let descriptor = EndpointDescriptor::new(
            number,
            direction,
            transfer_type,
            sync_type,
            usage_type,
            max_packet_size,
            interval,
        )?;

        let config = self.configuration_mut(interface.configuration)?;
        let iface = config
            .interfaces
            .get_mut(usize::from(interface.interface))
            .ok_or(Error::InvalidIndex)?;
        let index = iface.descriptor.num_endpoints;
        if index == u8::MAX {
            return Err(Error::Overflow);
        }
        iface.endpoints.try_reserve(1)?;

        iface.endpoints.push(descriptor);
        iface.descriptor.num_endpoints += 1;
        config.finalized = false;

        Ok(index)
    }

    /// Computes and stores the total length of configuration `configuration`
    /// from everything it holds now. Returns the length.
    pub fn finalize(&mut self, configuration: u8) -> Result<u16> {
        let config = self.configuration_mut(configuration)?;
        let total = cast::u16(config.total_length()).map_err(|_| Error::Overflow)?;

        config.descriptor.total_length = U16::new(total);
        config.finalized = true;

        Ok(total)
    }

    /// Number of configurations
    pub fn num_configurations(&self) -> usize {
        self.configurations.len()
    }

    /// Index of the configuration whose `bConfigurationValue` is `value`
    pub fn find_configuration(&self, value: u8) -> Option<u8> {
        self.configurations
            .iter()
            .position(|config| config.descriptor.configuration_value == value)
            .map(|index| index as u8)
    }

    pub fn interface(&self, handle: InterfaceHandle) -> Result<&InterfaceDescriptor> {
        self.find_interface(handle).map(|interface| &interface.descriptor)
    }

    pub fn endpoints(&self, handle: InterfaceHandle) -> Result<&[EndpointDescriptor]> {
        self.find_interface(handle)
            .map(|interface| interface.endpoints.as_slice())
    }

    /// Everything a host receives for GET_DESCRIPTOR(CONFIGURATION): the
    /// configuration header, then each interface followed by its endpoints.
    pub fn configuration_bytes(&self, index: u8) -> Result<Vec<u8>> {
        let config = self.configuration(index)?;
        if !config.finalized {
            return Err(Error::NotFinalized);
        }

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(usize::from(config.descriptor.total_length.get()))?;

        bytes.extend_from_slice(config.descriptor.as_bytes());
        for interface in config.interfaces.iter() {
            bytes.extend_from_slice(interface.descriptor.as_bytes());
            for endpoint in interface.endpoints.iter() {
                bytes.extend_from_slice(endpoint.as_bytes());
            }
        }

        Ok(bytes)
    }

    /// String descriptor `index`, 0 being the language table
    pub fn string_descriptor(&self, index: u8) -> Result<&[u8]> {
        self.strings.get(index)
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn intern_string(&mut self, text: &str) -> Result<u8> {
        self.strings.intern(text)
    }

    /// Drops the whole descriptor tree and every string. The next
    /// [`device_descriptor`](Self::device_descriptor) starts from scratch.
    pub fn release_all(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.num_configurations = 0;
        }
        self.device = None;
        self.configurations = Vec::new();
        self.strings.release_all();
    }

    fn configuration(&self, index: u8) -> Result<&Configuration> {
        self.configurations
            .get(usize::from(index))
            .ok_or(Error::InvalidIndex)
    }

    fn configuration_mut(&mut self, index: u8) -> Result<&mut Configuration> {
        self.configurations
            .get_mut(usize::from(index))
            .ok_or(Error::InvalidIndex)
    }

    fn find_interface(&self, handle: InterfaceHandle) -> Result<&Interface> {
        self.configuration(handle.configuration)?
            .interfaces
            .get(usize::from(handle.interface))
            .ok_or(Error::InvalidIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DescriptorRegistry {
        DescriptorRegistry::new(DeviceIdentity::OPENIBOOT)
    }

    fn text(descriptor: &[u8]) -> String {
        let units: Vec<u16> = descriptor[2..]
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn device_descriptor_is_built_once() {
        let mut registry = registry();
        assert!(!registry.is_built());

        let device = registry.device_descriptor().unwrap();
        assert!(registry.is_built());
        assert_eq!(device.vendor.get(), 0x05AC);
        assert_eq!(device.product.get(), 0x1280);
        assert_eq!(device.bcd_usb.get(), 0x0200);
        assert_eq!(device.max_packet_size0, 64);
        assert_eq!(device.num_configurations, 1);
        assert_eq!(
            (device.manufacturer_s, device.product_s, device.serial_s),
            (1, 2, 3)
        );

        let again = registry.device_descriptor().unwrap();
        assert_eq!(again, device);
        assert_eq!(registry.num_configurations(), 1);
        assert_eq!(registry.strings().len(), 4);
    }

    #[test]
    fn device_descriptor_wire_format() {
        let mut registry = registry();
        let device = registry.device_descriptor().unwrap();

        assert_eq!(
            device.as_bytes(),
            &[
                18, 1, 0x00, 0x02, 0, 0, 0, 64, 0xAC, 0x05, 0x80, 0x12, 0x03, 0x11, 1, 2, 3, 1
            ]
        );
        assert_eq!(text(registry.string_descriptor(1).unwrap()), "Apple Inc.");
        assert_eq!(
            text(registry.string_descriptor(2).unwrap()),
            "Apple Mobile Device (OpenIBoot Mode)"
        );
        assert_eq!(registry.string_descriptor(3).unwrap(), &[2, 3]);
        assert_eq!(
            text(registry.string_descriptor(4).unwrap()),
            "OpenIBoot Mode Configuration"
        );
    }

    #[test]
    fn finalize_sums_every_descriptor() {
        let mut registry = registry();
        let config = registry.add_configuration(1, 0, false, false, 100).unwrap();
        let interface = registry
            .add_interface(config, 0, 0, 0xFF, 0xFF, 0x51, 0)
            .unwrap();
        for &direction in [Direction::In, Direction::Out].iter() {
            registry
                .add_endpoint(
                    interface,
                    1,
                    direction,
                    TransferType::Bulk,
                    SyncType::NoSynchronization,
                    UsageType::Data,
                    64,
                    0,
                )
                .unwrap();
        }

        let total = registry.finalize(config).unwrap();
        assert_eq!(
            usize::from(total),
            ConfigurationDescriptor::LEN + InterfaceDescriptor::LEN + 2 * EndpointDescriptor::LEN
        );
        assert_eq!(total, 32);
    }

    #[test]
    fn finalize_covers_only_its_own_configuration() {
        let mut registry = registry();
        let first = registry.add_configuration(1, 0, false, false, 100).unwrap();
        let second = registry.add_configuration(2, 0, false, false, 100).unwrap();
        registry.add_interface(second, 0, 0, 0, 0, 0, 0).unwrap();
        registry.add_interface(second, 1, 0, 0, 0, 0, 0).unwrap();

        assert_eq!(registry.finalize(first).unwrap(), 9);
        assert_eq!(registry.finalize(second).unwrap(), 9 + 2 * 9);
    }

    #[test]
    fn configuration_requires_finalize_before_serializing() {
        let mut registry = registry();
        let config = registry.add_configuration(1, 0, false, false, 100).unwrap();
        assert_eq!(registry.configuration_bytes(config), Err(Error::NotFinalized));

        registry.finalize(config).unwrap();
        registry.add_interface(config, 0, 0, 0, 0, 0, 0).unwrap();
        assert_eq!(registry.configuration_bytes(config), Err(Error::NotFinalized));
    }

    #[test]
    fn high_speed_configuration() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();

        let config = registry.configuration_descriptor(0, 0).unwrap();
        assert_eq!(config.num_interfaces, 1);
        assert_eq!(config.total_length.get(), 32);
        assert_eq!(config.max_power, 250);

        let interface = InterfaceHandle {
            configuration: 0,
            interface: 0,
        };
        let endpoints = registry.endpoints(interface).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|ep| ep.max_packet_size.get() == 512));
        assert_eq!(endpoints[0].endpoint_address, 0x81);
        assert_eq!(endpoints[1].endpoint_address, 0x01);

        let descriptor = registry.interface(interface).unwrap();
        assert_eq!(
            (
                descriptor.interface_class,
                descriptor.interface_subclass,
                descriptor.interface_protocol
            ),
            (0xFF, 0xFF, 0x51)
        );
        assert_eq!(text(registry.string_descriptor(descriptor.interface_s).unwrap()), "IF0");
    }

    #[test]
    fn configuration_is_synthesized_once() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();

        registry.configuration_descriptor(0, 1).unwrap();
        let strings = registry.strings().len();
        let config = registry.configuration_descriptor(0, 0).unwrap();

        assert_eq!(config.total_length.get(), 32);
        assert_eq!(registry.strings().len(), strings);
        let interface = InterfaceHandle {
            configuration: 0,
            interface: 0,
        };
        assert_eq!(registry.endpoints(interface).unwrap()[0].max_packet_size.get(), 64);
    }

    #[test]
    fn packet_size_follows_speed() {
        for &(speed_id, size) in [(0u8, 512u16), (1, 64), (2, 32), (3, 64)].iter() {
            let mut registry = registry();
            registry.device_descriptor().unwrap();
            registry.configuration_descriptor(0, speed_id).unwrap();

            let endpoints = registry
                .endpoints(InterfaceHandle {
                    configuration: 0,
                    interface: 0,
                })
                .unwrap();
            assert_eq!(endpoints[0].max_packet_size.get(), size);
        }
    }

    #[test]
    fn unknown_speed_is_rejected() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();
        let strings = registry.strings().len();

        assert_eq!(registry.configuration_descriptor(0, 7), Err(Error::InvalidSpeed));
        assert_eq!(registry.strings().len(), strings);
        assert_eq!(
            registry.interface(InterfaceHandle {
                configuration: 0,
                interface: 0
            }),
            Err(Error::InvalidIndex)
        );
    }

    #[test]
    fn out_of_range_configuration() {
        let mut registry = registry();
        assert_eq!(registry.configuration_descriptor(0, 0), Err(Error::InvalidIndex));
        registry.device_descriptor().unwrap();
        assert_eq!(registry.configuration_descriptor(1, 0), Err(Error::InvalidIndex));
    }

    #[test]
    fn bidirectional_endpoint_is_rejected() {
        let mut registry = registry();
        let config = registry.add_configuration(1, 0, false, false, 100).unwrap();
        let interface = registry.add_interface(config, 0, 0, 0, 0, 0, 0).unwrap();

        let result = registry.add_endpoint(
            interface,
            1,
            Direction::Bidirectional,
            TransferType::Bulk,
            SyncType::NoSynchronization,
            UsageType::Data,
            64,
            0,
        );
        assert_eq!(result, Err(Error::InvalidArgument));
        assert_eq!(registry.interface(interface).unwrap().num_endpoints, 0);
    }

    #[test]
    fn full_configuration_bytes() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();
        registry.configuration_descriptor(0, 0).unwrap();

        let bytes = registry.configuration_bytes(0).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..9], &[9, 2, 32, 0, 1, 1, 4, 0x80, 250]);
        assert_eq!(&bytes[9..18], &[9, 4, 0, 0, 2, 0xFF, 0xFF, 0x51, 5]);
        assert_eq!(&bytes[18..25], &[7, 5, 0x81, 2, 0x00, 0x02, 0]);
        assert_eq!(&bytes[25..], &[7, 5, 0x01, 2, 0x00, 0x02, 0]);
    }

    #[test]
    fn find_configuration_by_value() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();
        registry.add_configuration(7, 0, true, false, 0).unwrap();

        assert_eq!(registry.find_configuration(1), Some(0));
        assert_eq!(registry.find_configuration(7), Some(1));
        assert_eq!(registry.find_configuration(2), None);
        assert_eq!(registry.device_descriptor().unwrap().num_configurations, 2);
    }

    #[test]
    fn release_then_rebuild_is_identical() {
        let mut registry = registry();
        let device = registry.device_descriptor().unwrap();
        let config = registry.configuration_descriptor(0, 0).unwrap();
        let bytes = registry.configuration_bytes(0).unwrap();

        registry.release_all();
        assert!(!registry.is_built());
        assert_eq!(registry.num_configurations(), 0);
        assert!(registry.strings().is_empty());

        assert_eq!(registry.device_descriptor().unwrap(), device);
        assert_eq!(registry.configuration_descriptor(0, 0).unwrap(), config);
        assert_eq!(registry.configuration_bytes(0).unwrap(), bytes);
        assert_eq!(text(registry.string_descriptor(1).unwrap()), "Apple Inc.");
    }

    #[test]
    fn strings_for_extra_interfaces() {
        let mut registry = registry();
        registry.device_descriptor().unwrap();

        let s = registry.intern_string("DFU").unwrap();
        assert_eq!(s, 5);
        let handle = registry.add_interface(0, 1, 0, 0xFE, 0x01, 0x02, s).unwrap();
        assert_eq!(registry.interface(handle).unwrap().interface_s, 5);

        assert_eq!(text(registry.string_descriptor(s).unwrap()), "DFU");
        assert_eq!(registry.string_descriptor(0).unwrap()[0], 2 + 2 * 5);
    }

    #[test]
    fn release_on_empty_registry() {
        let mut registry = registry();
        registry.release_all();
        assert!(!registry.is_built());
        assert_eq!(registry.num_configurations(), 0);
    }
}
