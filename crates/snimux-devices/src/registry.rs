use std::sync::{Arc, Mutex, PoisonError};

use url::Url;

use crate::container::AutoCloseableDevice;
use crate::error::{DeviceError, Result};
use crate::types::DeviceCapability;
use snimux_mapping::AddressSpace;

/// A discovered device, before any connection is made.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub uri: Url,
    pub display_name: String,
    pub kind: String,
    pub capabilities: &'static [DeviceCapability],
    pub default_address_space: AddressSpace,
    pub system: String,
}

/// One back-end transport family (FX Pak Pro serial, NWA TCP, ...).
///
/// A driver enumerates candidate devices and hands out auto-closing handles;
/// the handle's container owns the live connections.
pub trait Driver: Send + Sync {
    fn kind(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn display_description(&self) -> &'static str;

    fn capabilities(&self) -> &'static [DeviceCapability];

    fn has_capabilities(&self, wanted: &[DeviceCapability]) -> bool {
        wanted.iter().all(|c| self.capabilities().contains(c))
    }

    /// Enumerate devices reachable right now, without opening them.
    fn detect(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Stable registry key for a device URI.
    fn device_key(&self, uri: &Url) -> String;

    /// An auto-closing handle for `uri`; connection happens on first use.
    fn device(&self, uri: &Url) -> AutoCloseableDevice;
}

static DRIVERS: Mutex<Vec<Arc<dyn Driver>>> = Mutex::new(Vec::new());

/// Register a driver. Called during startup, before any dispatch.
pub fn register(driver: Arc<dyn Driver>) {
    DRIVERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(driver);
}

pub fn drivers() -> Vec<Arc<dyn Driver>> {
    DRIVERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn driver_for(kind: &str) -> Option<Arc<dyn Driver>> {
    drivers().into_iter().find(|d| d.kind() == kind)
}

/// Resolve a device URI (scheme selects the driver) into a handle.
pub fn device_for_uri(uri: &Url) -> Result<AutoCloseableDevice> {
    let driver = driver_for(uri.scheme()).ok_or_else(|| {
        DeviceError::invalid_argument(format!("no driver registered for scheme {:?}", uri.scheme()))
    })?;
    Ok(driver.device(uri))
}
