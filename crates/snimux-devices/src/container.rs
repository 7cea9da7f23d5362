use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use url::Url;

use crate::deadline::Deadline;
use crate::device::Device;
use crate::error::Result;
use crate::types::*;

type SharedDevice = Arc<Mutex<Box<dyn Device>>>;
type OpenFn = Box<dyn Fn(&Url) -> Result<Box<dyn Device>> + Send + Sync>;

fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Box<dyn Device>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keyed registry of live devices for one driver.
///
/// The registry lock is held only around lookup/insert/remove, never across
/// device I/O; the per-device mutex serializes the I/O itself.
pub struct DeviceContainer {
    open: OpenFn,
    devices: Mutex<HashMap<String, SharedDevice>>,
}

impl DeviceContainer {
    pub fn new(
        open: impl Fn(&Url) -> Result<Box<dyn Device>> + Send + Sync + 'static,
    ) -> Arc<DeviceContainer> {
        Arc::new(DeviceContainer {
            open: Box::new(open),
            devices: Mutex::new(HashMap::new()),
        })
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SharedDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached live device for `key`, or open a new one.
    pub fn get_or_open(&self, key: &str, uri: &Url) -> Result<SharedDevice> {
        if let Some(device) = self.registry().get(key).cloned() {
            return Ok(device);
        }

        // Open outside the registry lock; opening is I/O.
        let opened: SharedDevice = Arc::new(Mutex::new((self.open)(uri)?));

        let raced = {
            let mut registry = self.registry();
            match registry.get(key).cloned() {
                Some(existing) => Some(existing),
                None => {
                    registry.insert(key.to_owned(), Arc::clone(&opened));
                    None
                }
            }
        };

        match raced {
            Some(existing) => {
                // Another caller opened the same device first; keep theirs.
                let _ = lock_device(&opened).close();
                Ok(existing)
            }
            None => Ok(opened),
        }
    }

    pub fn get(&self, key: &str) -> Option<SharedDevice> {
        self.registry().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<SharedDevice> {
        self.registry().remove(key)
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.registry().keys().cloned().collect()
    }

    /// Close and drop every live device.
    pub fn disconnect_all(&self) {
        let drained: Vec<(String, SharedDevice)> = self.registry().drain().collect();
        for (key, device) in drained {
            debug!(key, "disconnecting device");
            let _ = lock_device(&device).close();
        }
    }
}

/// Handle to one device slot in a container.
///
/// Every call resolves the key through the container: the first use (and the
/// first use after a fatal error) opens the device, later uses hit the
/// cache. A fatal error closes and evicts, so the next call reconnects.
#[derive(Clone)]
pub struct AutoCloseableDevice {
    container: Arc<DeviceContainer>,
    uri: Url,
    key: String,
}

impl AutoCloseableDevice {
    pub fn new(container: Arc<DeviceContainer>, uri: Url, key: String) -> AutoCloseableDevice {
        AutoCloseableDevice {
            container,
            uri,
            key,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    fn with_device<T>(&self, f: impl FnOnce(&mut dyn Device) -> Result<T>) -> Result<T> {
        let mut shared = self.container.get_or_open(&self.key, &self.uri)?;

        {
            // A cached device that closed out-of-band gets one reopen.
            let closed = lock_device(&shared).is_closed();
            if closed {
                self.container.remove(&self.key);
                shared = self.container.get_or_open(&self.key, &self.uri)?;
            }
        }

        let mut guard = lock_device(&shared);
        let out = f(guard.as_mut());
        if let Err(err) = &out {
            if err.is_fatal() {
                debug!(key = %self.key, %err, "fatal device error, evicting");
                let _ = guard.close();
                drop(guard);
                self.container.remove(&self.key);
            }
        }
        out
    }

    pub fn capabilities(&self) -> Result<&'static [DeviceCapability]> {
        self.with_device(|d| Ok(d.capabilities()))
    }

    pub fn multi_read_memory(
        &self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>> {
        self.with_device(|d| d.multi_read_memory(deadline, reads))
    }

    pub fn multi_write_memory(
        &self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>> {
        self.with_device(|d| d.multi_write_memory(deadline, writes))
    }

    pub fn memory_domains(&self, deadline: Deadline) -> Result<Vec<MemoryDomain>> {
        self.with_device(|d| d.memory_domains(deadline))
    }

    pub fn multi_domain_read(
        &self,
        deadline: Deadline,
        requests: &[DomainReadRequest],
    ) -> Result<Vec<DomainReadResponse>> {
        self.with_device(|d| d.multi_domain_read(deadline, requests))
    }

    pub fn multi_domain_write(
        &self,
        deadline: Deadline,
        requests: &[DomainWriteRequest],
    ) -> Result<Vec<DomainWriteResponse>> {
        self.with_device(|d| d.multi_domain_write(deadline, requests))
    }

    pub fn fetch_fields(&self, deadline: Deadline, fields: &[Field]) -> Result<Vec<String>> {
        self.with_device(|d| d.fetch_fields(deadline, fields))
    }

    pub fn reset_system(&self, deadline: Deadline) -> Result<()> {
        self.with_device(|d| d.reset_system(deadline))
    }

    pub fn reset_to_menu(&self, deadline: Deadline) -> Result<()> {
        self.with_device(|d| d.reset_to_menu(deadline))
    }

    pub fn pause_unpause(&self, deadline: Deadline, paused: bool) -> Result<bool> {
        self.with_device(|d| d.pause_unpause(deadline, paused))
    }

    pub fn pause_toggle(&self, deadline: Deadline) -> Result<()> {
        self.with_device(|d| d.pause_toggle(deadline))
    }

    pub fn boot_file(&self, deadline: Deadline, path: &str) -> Result<()> {
        self.with_device(|d| d.boot_file(deadline, path))
    }

    pub fn list_files(&self, deadline: Deadline, path: &str) -> Result<Vec<DirEntry>> {
        self.with_device(|d| d.list_files(deadline, path))
    }

    pub fn make_directory(&self, deadline: Deadline, path: &str) -> Result<()> {
        self.with_device(|d| d.make_directory(deadline, path))
    }

    pub fn remove_file(&self, deadline: Deadline, path: &str) -> Result<()> {
        self.with_device(|d| d.remove_file(deadline, path))
    }

    pub fn rename_file(&self, deadline: Deadline, path: &str, new_name: &str) -> Result<()> {
        self.with_device(|d| d.rename_file(deadline, path, new_name))
    }

    pub fn put_file(&self, deadline: Deadline, path: &str, data: &[u8]) -> Result<()> {
        self.with_device(|d| d.put_file(deadline, path, data))
    }

    pub fn get_file(&self, deadline: Deadline, path: &str) -> Result<Vec<u8>> {
        self.with_device(|d| d.get_file(deadline, path))
    }

    pub fn nwa_command(
        &self,
        deadline: Deadline,
        command: &str,
        args: &str,
        binary_arg: Option<&[u8]>,
    ) -> Result<(Vec<NwaReplyItem>, Vec<u8>)> {
        self.with_device(|d| d.nwa_command(deadline, command, args, binary_arg))
    }

    /// Close the device (if open) and forget it.
    pub fn close(&self) -> Result<()> {
        if let Some(device) = self.container.remove(&self.key) {
            lock_device(&device).close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDevice {
        closed: bool,
        fail_next: bool,
    }

    impl Device for FakeDevice {
        fn capabilities(&self) -> &'static [DeviceCapability] {
            &[DeviceCapability::ReadMemory]
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn reset_system(&mut self, _deadline: Deadline) -> Result<()> {
            if self.fail_next {
                return Err(DeviceError::fatal("wire fault"));
            }
            Ok(())
        }
    }

    fn test_uri() -> Url {
        Url::parse("fxpakpro://./COM4").unwrap()
    }

    #[test]
    fn reuses_the_cached_device() {
        let opens = Arc::new(AtomicUsize::new(0));
        let opens2 = Arc::clone(&opens);
        let container = DeviceContainer::new(move |_uri| {
            opens2.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                closed: false,
                fail_next: false,
            }) as Box<dyn Device>)
        });

        let handle = AutoCloseableDevice::new(container, test_uri(), "COM4".into());
        handle.reset_system(Deadline::none()).unwrap();
        handle.reset_system(Deadline::none()).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fatal_error_evicts_and_next_call_reopens() {
        let opens = Arc::new(AtomicUsize::new(0));
        let opens2 = Arc::clone(&opens);
        let container = DeviceContainer::new(move |_uri| {
            let first = opens2.fetch_add(1, Ordering::SeqCst) == 0;
            Ok(Box::new(FakeDevice {
                closed: false,
                fail_next: first,
            }) as Box<dyn Device>)
        });

        let handle = AutoCloseableDevice::new(container.clone(), test_uri(), "COM4".into());
        let err = handle.reset_system(Deadline::none()).unwrap_err();
        assert!(err.is_fatal());
        assert!(container.get("COM4").is_none(), "fatal error must evict");

        handle.reset_system(Deadline::none()).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_fatal_error_keeps_the_device() {
        let container = DeviceContainer::new(|_uri| {
            Ok(Box::new(FakeDevice {
                closed: false,
                fail_next: false,
            }) as Box<dyn Device>)
        });
        let handle = AutoCloseableDevice::new(container.clone(), test_uri(), "COM4".into());

        // Default trait body: unsupported operation, a precondition failure.
        let err = handle.boot_file(Deadline::none(), "/x").unwrap_err();
        assert!(!err.is_fatal());
        assert!(container.get("COM4").is_some());
    }

    #[test]
    fn disconnect_all_closes_everything() {
        let container = DeviceContainer::new(|_uri| {
            Ok(Box::new(FakeDevice {
                closed: false,
                fail_next: false,
            }) as Box<dyn Device>)
        });
        let handle = AutoCloseableDevice::new(container.clone(), test_uri(), "COM4".into());
        handle.reset_system(Deadline::none()).unwrap();
        assert_eq!(container.all_keys(), vec!["COM4".to_string()]);

        container.disconnect_all();
        assert!(container.all_keys().is_empty());
    }
}
