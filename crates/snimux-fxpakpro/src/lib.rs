#![forbid(unsafe_code)]

//! FX Pak Pro (SD2SNES) driver: 512-byte framed commands over USB serial.
//!
//! The link layer owns framing and fatal-error latching; the command layer
//! translates memory batches into VGET/VPUT exchanges, routes console-shadow
//! writes through the NMI-hook stub, and speaks the filesystem command
//! family. The driver layer owns port discovery, baud selection and the
//! device container.

mod device;
mod domains;
mod fs;
mod link;
mod memory;

pub use device::FxPakDevice;
pub use link::{Link, PakTransport, SAFE_TIMEOUT};

use std::sync::Arc;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPortType, StopBits};
use snimux_devices::{
    env, register, AddressSpace, AutoCloseableDevice, Device, DeviceCapability, DeviceContainer,
    DeviceDescriptor, DeviceError, Driver, Result,
};
use tracing::{debug, info, warn};
use url::Url;

pub const DRIVER_NAME: &str = "fxpakpro";

pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x5A22;
/// Serial-number quirk some units report instead of proper USB ids.
pub const LEGACY_SERIAL: &str = "DEMO00000000";

/// Baud rates to try, in descending order. The first that opens wins.
pub const BAUD_RATES: [u32; 14] = [
    921_600, // first rate that works on Windows
    460_800,
    256_000,
    230_400, // first rate that works on macOS
    153_600,
    128_000,
    115_200,
    76_800,
    57_600,
    38_400,
    28_800,
    19_200,
    14_400,
    9_600,
];

const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct FxPakProDriver {
    container: Arc<DeviceContainer>,
}

impl FxPakProDriver {
    pub fn new() -> Arc<FxPakProDriver> {
        Arc::new(FxPakProDriver {
            container: DeviceContainer::new(open_device),
        })
    }

    pub fn container(&self) -> &Arc<DeviceContainer> {
        &self.container
    }
}

impl Driver for FxPakProDriver {
    fn kind(&self) -> &'static str {
        DRIVER_NAME
    }

    fn display_name(&self) -> &'static str {
        "FX Pak Pro"
    }

    fn display_description(&self) -> &'static str {
        "Connect to an FX Pak Pro or SD2SNES via USB"
    }

    fn capabilities(&self) -> &'static [DeviceCapability] {
        device::CAPABILITIES
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = serialport::available_ports()
            .map_err(|e| DeviceError::fatal(format!("{DRIVER_NAME}: enumerate ports: {e}")))?;

        let mut found = Vec::new();
        for port in ports {
            let SerialPortType::UsbPort(usb) = &port.port_type else {
                continue;
            };
            let legacy_serial = usb.serial_number.as_deref() == Some(LEGACY_SERIAL);
            if !(legacy_serial || (usb.vid == USB_VID && usb.pid == USB_PID)) {
                continue;
            }

            let uri_text = format!("{DRIVER_NAME}://./{}", port.port_name.trim_start_matches('/'));
            let Ok(uri) = Url::parse(&uri_text) else {
                warn!(port = %port.port_name, "skipping undecodable port name");
                continue;
            };
            found.push(DeviceDescriptor {
                uri,
                display_name: format!("{} ({:04x}:{:04x})", port.port_name, usb.vid, usb.pid),
                kind: DRIVER_NAME.to_owned(),
                capabilities: device::CAPABILITIES,
                default_address_space: AddressSpace::FxPakPro,
                system: "snes".to_owned(),
            });
        }
        Ok(found)
    }

    fn device_key(&self, uri: &Url) -> String {
        device_key(uri)
    }

    fn device(&self, uri: &Url) -> AutoCloseableDevice {
        AutoCloseableDevice::new(Arc::clone(&self.container), uri.clone(), device_key(uri))
    }
}

/// Registry key for a device URI: the port name with OS prefixes shed, so
/// `fxpakpro://./dev/cu.usbmodemDEMO0000001` and `COM4` both key naturally.
pub fn device_key(uri: &Url) -> String {
    let mut key = uri.path().trim_start_matches('/');
    key = key.strip_prefix("dev/").unwrap_or(key);
    key = key.strip_prefix("cu.usbmodem").unwrap_or(key);
    key.to_owned()
}

fn port_name(uri: &Url) -> String {
    let path = uri.path();
    // Unix device nodes keep their absolute path; COM names shed the slash.
    if path.starts_with("/dev/") {
        path.to_owned()
    } else {
        path.trim_start_matches('/').to_owned()
    }
}

fn requested_baud(uri: &Url) -> u32 {
    let default = if cfg!(target_os = "macos") {
        BAUD_RATES[3]
    } else {
        BAUD_RATES[0]
    };
    uri.query_pairs()
        .find(|(k, _)| k == "baud")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(default)
}

fn open_port(name: &str, baud_request: u32) -> Result<Box<dyn serialport::SerialPort>> {
    let mut last_err = None;
    for &baud in BAUD_RATES.iter().filter(|&&b| b <= baud_request) {
        debug!(name, baud, "opening serial port");
        match serialport::new(name, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(OPEN_TIMEOUT)
            .open()
        {
            Ok(port) => return Ok(port),
            Err(e) => {
                debug!(name, baud, error = %e, "open failed");
                last_err = Some(e);
            }
        }
    }
    Err(DeviceError::fatal(format!(
        "{DRIVER_NAME}: failed to open {name} at any baud rate: {}",
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "no rate attempted".into())
    )))
}

fn open_device(uri: &Url) -> Result<Box<dyn Device>> {
    let name = port_name(uri);
    let mut port = open_port(&name, requested_baud(uri))?;
    port.write_data_terminal_ready(true)
        .map_err(|e| DeviceError::fatal(format!("{DRIVER_NAME}: failed to set DTR: {e}")))?;
    Ok(Box::new(FxPakDevice::new(Box::new(port))))
}

/// Register the driver unless `SNI_FXPAKPRO_DISABLE` is set.
pub fn register_driver() {
    if env::is_truthy("SNI_FXPAKPRO_DISABLE") {
        info!("fxpakpro driver disabled by SNI_FXPAKPRO_DISABLE");
        return;
    }
    register(FxPakProDriver::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_keys_normalize_os_prefixes() {
        let uri = Url::parse("fxpakpro://./COM4").unwrap();
        assert_eq!(device_key(&uri), "COM4");

        let uri = Url::parse("fxpakpro://./dev/cu.usbmodemDEMO0000001?baud=921600").unwrap();
        assert_eq!(device_key(&uri), "DEMO0000001");
    }

    #[test]
    fn port_names_keep_unix_paths() {
        let uri = Url::parse("fxpakpro://./dev/ttyACM0").unwrap();
        assert_eq!(port_name(&uri), "/dev/ttyACM0");
        let uri = Url::parse("fxpakpro://./COM4").unwrap();
        assert_eq!(port_name(&uri), "COM4");
    }

    #[test]
    fn baud_request_comes_from_the_query() {
        let uri = Url::parse("fxpakpro://./COM4?baud=57600").unwrap();
        assert_eq!(requested_baud(&uri), 57_600);
    }

    #[test]
    fn baud_rates_descend() {
        assert!(BAUD_RATES.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(BAUD_RATES[0], 921_600);
        assert_eq!(BAUD_RATES[3], 230_400);
    }
}
