#![forbid(unsafe_code)]

//! The device model shared by every driver.
//!
//! - request/response types addressed by [`AddressTuple`] or by memory
//!   domain name
//! - the [`Device`] trait each driver implements
//! - [`DeviceContainer`] + [`AutoCloseableDevice`]: keyed ownership of live
//!   devices with eviction on fatal errors
//! - the process-wide driver registry keyed by URI scheme
//! - the fatal/non-fatal [`DeviceError`] taxonomy and per-request
//!   [`Deadline`]s
//! - ROM-header memory-mapping detection

mod container;
mod deadline;
mod detect;
mod device;
pub mod env;
mod error;
mod registry;
mod types;

pub use container::{AutoCloseableDevice, DeviceContainer};
pub use deadline::Deadline;
pub use detect::{choose_mapping, HEADER_CANDIDATES, HEADER_LEN};
pub use device::Device;
pub use error::{DeviceError, Result, StatusCode};
pub use registry::{device_for_uri, driver_for, drivers, register, DeviceDescriptor, Driver};
pub use types::*;

pub use snimux_mapping::{AddressSpace, AddressTuple, MemoryMapping, MemoryType};
