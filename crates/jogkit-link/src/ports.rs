//! Port enumeration for human selection
//!
//! Lists candidate devices for the connect dialog/prompt. The link core
//! never discovers or validates identifiers itself; it takes whatever
//! string the front end picked from this list.

use jogkit_core::{Error, Result};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct LinkPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

/// List serial ports that look like motor driver boards
///
/// Filters enumeration down to the patterns USB-attached boards show up as:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<LinkPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports
            .iter()
            .filter(|port| is_candidate_port(&port.port_name))
            .map(|port| {
                let mut info = LinkPortInfo {
                    port_name: port.port_name.clone(),
                    description: describe_port(port),
                    manufacturer: None,
                    vid: None,
                    pid: None,
                };
                if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                    info.manufacturer = usb.manufacturer.clone();
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                }
                info
            })
            .collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Check if a port name matches the patterns boards enumerate under
fn is_candidate_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

/// User-facing description for a port
fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}
