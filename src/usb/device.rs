use crate::protocol::ProtocolKind;
use std::fmt;

const TIQIAA_VID_1: u16 = 0x10C4;
const TIQIAA_VID_2: u16 = 0x045E;
const TIQIAA_PID: u16 = 0x8468;

const ELKSMART_VID: u16 = 0x045C;
const ELKSMART_PIDS: [u16; 3] = [0x0132, 0x0184, 0x0195];
const ELKSMART_LEGACY_PIDS: [u16; 2] = [0x014A, 0x02AA];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl Endpoint {
    pub fn bulk(address: u8, direction: Direction, max_packet_size: u16) -> Self {
        Self {
            address,
            direction,
            transfer_type: TransferType::Bulk,
            max_packet_size,
        }
    }

    /// Read buffer size for draining this endpoint, never below 64 bytes.
    pub fn read_buffer_len(&self) -> usize {
        (self.max_packet_size as usize).max(64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub id: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbDeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for UsbDeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: UsbDeviceId,
    pub product_name: Option<String>,
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// The interface chosen for transmitting, with its bulk endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPair {
    pub interface: InterfaceDescriptor,
    pub output: Endpoint,
    pub input: Endpoint,
}

fn bulk_out_in(interface: &InterfaceDescriptor) -> Option<(Endpoint, Endpoint)> {
    let bulk = |dir: Direction| {
        interface
            .endpoints
            .iter()
            .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction == dir)
            .cloned()
    };
    Some((bulk(Direction::Out)?, bulk(Direction::In)?))
}

/// Scans interfaces in order for the first one exposing both a bulk OUT and a bulk IN endpoint.
///
/// Some dongles put their endpoints on a non-zero interface, so every interface is checked.
pub fn find_bulk_pair(device: &DeviceDescriptor) -> Option<BulkPair> {
    device.interfaces.iter().find_map(|interface| {
        bulk_out_in(interface).map(|(output, input)| BulkPair {
            interface: interface.clone(),
            output,
            input,
        })
    })
}

/// Recognized dongle families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// TIQIAA Tview / ZaZa Remote: one PID shared across two VIDs.
    TiqiaaTview,
    ElkSmart,
    /// Older ElkSmart PIDs that still speak the ST...EN bulk format.
    ElkSmartLegacy,
}

impl DeviceFamily {
    pub fn classify(id: UsbDeviceId) -> Option<Self> {
        let UsbDeviceId { vendor_id, product_id } = id;
        if product_id == TIQIAA_PID && (vendor_id == TIQIAA_VID_1 || vendor_id == TIQIAA_VID_2) {
            Some(DeviceFamily::TiqiaaTview)
        } else if vendor_id == ELKSMART_VID && ELKSMART_PIDS.contains(&product_id) {
            Some(DeviceFamily::ElkSmart)
        } else if vendor_id == ELKSMART_VID && ELKSMART_LEGACY_PIDS.contains(&product_id) {
            Some(DeviceFamily::ElkSmartLegacy)
        } else {
            None
        }
    }

    pub fn protocol(&self) -> ProtocolKind {
        match self {
            DeviceFamily::ElkSmart => ProtocolKind::MangledFrequency,
            DeviceFamily::TiqiaaTview | DeviceFamily::ElkSmartLegacy => ProtocolKind::LegacyBulk,
        }
    }
}

pub fn is_supported(id: UsbDeviceId) -> bool {
    DeviceFamily::classify(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(vendor_id: u16, product_id: u16) -> UsbDeviceId {
        UsbDeviceId { vendor_id, product_id }
    }

    #[test]
    fn test_classification() {
        assert_eq!(DeviceFamily::classify(id(0x10C4, 0x8468)), Some(DeviceFamily::TiqiaaTview));
        assert_eq!(DeviceFamily::classify(id(0x045E, 0x8468)), Some(DeviceFamily::TiqiaaTview));
        assert_eq!(DeviceFamily::classify(id(0x045C, 0x0184)), Some(DeviceFamily::ElkSmart));
        assert_eq!(DeviceFamily::classify(id(0x045C, 0x02AA)), Some(DeviceFamily::ElkSmartLegacy));
        assert_eq!(DeviceFamily::classify(id(0x045C, 0x8468)), None);
        assert!(!is_supported(id(0x1234, 0x5678)));
    }

    #[test]
    fn test_protocol_selection() {
        assert_eq!(DeviceFamily::ElkSmart.protocol(), ProtocolKind::MangledFrequency);
        assert_eq!(DeviceFamily::TiqiaaTview.protocol(), ProtocolKind::LegacyBulk);
        assert_eq!(DeviceFamily::ElkSmartLegacy.protocol(), ProtocolKind::LegacyBulk);
    }

    #[test]
    fn test_bulk_pair_skips_interfaces_without_both_directions() {
        let interrupt_only = InterfaceDescriptor {
            id: 0,
            class: 3,
            subclass: 0,
            protocol: 0,
            endpoints: vec![Endpoint {
                address: 0x81,
                direction: Direction::In,
                transfer_type: TransferType::Interrupt,
                max_packet_size: 8,
            }],
        };
        let out_only = InterfaceDescriptor {
            id: 1,
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            endpoints: vec![Endpoint::bulk(0x01, Direction::Out, 64)],
        };
        let full = InterfaceDescriptor {
            id: 2,
            class: 0xFF,
            subclass: 0,
            protocol: 0,
            endpoints: vec![
                Endpoint::bulk(0x82, Direction::In, 64),
                Endpoint::bulk(0x02, Direction::Out, 64),
                Endpoint::bulk(0x03, Direction::Out, 64),
            ],
        };
        let device = DeviceDescriptor {
            id: id(0x10C4, 0x8468),
            product_name: None,
            interfaces: vec![interrupt_only, out_only, full],
        };

        let pair = find_bulk_pair(&device).unwrap();
        assert_eq!(pair.interface.id, 2);
        assert_eq!(pair.output.address, 0x02);
        assert_eq!(pair.input.address, 0x82);
    }

    #[test]
    fn test_read_buffer_floor() {
        assert_eq!(Endpoint::bulk(0x81, Direction::In, 16).read_buffer_len(), 64);
        assert_eq!(Endpoint::bulk(0x81, Direction::In, 512).read_buffer_len(), 512);
    }
}
