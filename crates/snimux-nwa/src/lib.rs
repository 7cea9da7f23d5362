#![forbid(unsafe_code)]

//! NWA (emulator network access) driver.
//!
//! Speaks the mixed ASCII/binary NWA protocol over a blocking TCP socket
//! with per-request deadlines, and projects a running core's memory layout
//! onto the canonical SNES domain names via the platforms configuration.

mod client;
mod domains;
mod loopback;

pub use client::{NwaClient, READ_WRITE_TIMEOUT};

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use snimux_devices::{
    register, AddressSpace, AutoCloseableDevice, Deadline, Device, DeviceCapability,
    DeviceContainer, DeviceDescriptor, DeviceError, Driver, Field, Result,
};
use snimux_platforms::Config;
use tracing::debug;
use url::Url;

pub const DRIVER_NAME: &str = "emunwa";

/// Well-known NWA listen ports: `0xBEEF` and the next few.
pub const PORT_BASE: u16 = 0xBEEF;
pub const PORT_PROBE_COUNT: u16 = 8;

const DETECT_CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
const DETECT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct NwaDriver {
    container: Arc<DeviceContainer>,
}

impl NwaDriver {
    pub fn new(config: Arc<Config>) -> Arc<NwaDriver> {
        Arc::new(NwaDriver {
            container: DeviceContainer::new(move |uri| open_device(uri, Arc::clone(&config))),
        })
    }
}

impl Driver for NwaDriver {
    fn kind(&self) -> &'static str {
        DRIVER_NAME
    }

    fn display_name(&self) -> &'static str {
        "Emulator (NWA)"
    }

    fn display_description(&self) -> &'static str {
        "Connect to an emulator speaking the NWA network-access protocol"
    }

    fn capabilities(&self) -> &'static [DeviceCapability] {
        client::CAPABILITIES
    }

    fn detect(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut found = Vec::new();
        for port in PORT_BASE..PORT_BASE + PORT_PROBE_COUNT {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let Ok(stream) = TcpStream::connect_timeout(&addr, DETECT_CONNECT_TIMEOUT) else {
                continue;
            };

            let name = probe_name(stream).unwrap_or_default();
            let uri_text = format!("{DRIVER_NAME}://127.0.0.1:{port}/");
            let Ok(uri) = Url::parse(&uri_text) else {
                continue;
            };
            found.push(DeviceDescriptor {
                uri,
                display_name: if name.is_empty() {
                    format!("NWA on :{port}")
                } else {
                    format!("{name} (:{port})")
                },
                kind: DRIVER_NAME.to_owned(),
                capabilities: client::CAPABILITIES,
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

// Identify a probed listener; any failure just downgrades the display name.
fn probe_name(stream: TcpStream) -> Option<String> {
    let mut client = NwaClient::from_stream(stream, Arc::new(Config::default())).ok()?;
    let fields = client
        .fetch_fields(
            Deadline::after(DETECT_HANDSHAKE_TIMEOUT),
            &[Field::DeviceName, Field::DeviceVersion],
        )
        .ok()?;
    let _ = client.close();
    match (fields[0].as_str(), fields[1].as_str()) {
        ("", _) => None,
        (name, "") => Some(name.to_owned()),
        (name, version) => Some(format!("{name} {version}")),
    }
}

pub fn device_key(uri: &Url) -> String {
    let host = uri.host_str().unwrap_or("localhost");
    let port = uri.port().unwrap_or(PORT_BASE);
    format!("{host}:{port}")
}

fn open_device(uri: &Url, config: Arc<Config>) -> Result<Box<dyn Device>> {
    let key = device_key(uri);
    let addr = key
        .to_socket_addrs()
        .map_err(|e| DeviceError::fatal(format!("{DRIVER_NAME}: resolve {key}: {e}")))?
        .next()
        .ok_or_else(|| {
            DeviceError::fatal(format!("{DRIVER_NAME}: no address resolved for {key}"))
        })?;
    debug!(%addr, "connecting to NWA emulator");
    let client = NwaClient::connect(addr, config, READ_WRITE_TIMEOUT)?;
    Ok(Box::new(client))
}

/// Register the driver with the shared platforms configuration.
pub fn register_driver(config: Arc<Config>) {
    register(NwaDriver::new(config));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_keys_come_from_host_and_port() {
        let uri = Url::parse("emunwa://127.0.0.1:48879/").unwrap();
        assert_eq!(device_key(&uri), "127.0.0.1:48879");
        let uri = Url::parse("emunwa://localhost/").unwrap();
        assert_eq!(device_key(&uri), "localhost:48879");
    }
}
