use crate::deadline::Deadline;
use crate::error::{DeviceError, Result};
use crate::types::*;

/// Uniform per-device operations.
///
/// A device is owned by its container and driven behind a per-device mutex,
/// so every method takes `&mut self` and a whole command/response sequence
/// holds the device exclusively. Nested sequences (a write that issues
/// several wire commands) are plain method calls inside the same borrow.
///
/// Operations a driver does not support keep the default body, which fails
/// as a precondition without touching I/O.
pub trait Device: Send {
    fn capabilities(&self) -> &'static [DeviceCapability];

    fn is_closed(&self) -> bool;

    /// Release the transport. Must be idempotent; called at most once per
    /// fatal error path plus at most once by the container.
    fn close(&mut self) -> Result<()>;

    fn multi_read_memory(
        &mut self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>> {
        let _ = (deadline, reads);
        Err(DeviceError::unsupported("reading memory"))
    }

    fn multi_write_memory(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>> {
        let _ = (deadline, writes);
        Err(DeviceError::unsupported("writing memory"))
    }

    /// Enumerate memory domains. Always re-discovers where discovery
    /// applies; cached mappings are invalidated by this call.
    fn memory_domains(&mut self, deadline: Deadline) -> Result<Vec<MemoryDomain>> {
        let _ = deadline;
        Err(DeviceError::unsupported("memory domains"))
    }

    fn multi_domain_read(
        &mut self,
        deadline: Deadline,
        requests: &[DomainReadRequest],
    ) -> Result<Vec<DomainReadResponse>> {
        let _ = (deadline, requests);
        Err(DeviceError::unsupported("domain reads"))
    }

    fn multi_domain_write(
        &mut self,
        deadline: Deadline,
        requests: &[DomainWriteRequest],
    ) -> Result<Vec<DomainWriteResponse>> {
        let _ = (deadline, requests);
        Err(DeviceError::unsupported("domain writes"))
    }

    fn fetch_fields(&mut self, deadline: Deadline, fields: &[Field]) -> Result<Vec<String>> {
        let _ = (deadline, fields);
        Err(DeviceError::unsupported("fetching fields"))
    }

    fn reset_system(&mut self, deadline: Deadline) -> Result<()> {
        let _ = deadline;
        Err(DeviceError::unsupported("system reset"))
    }

    fn reset_to_menu(&mut self, deadline: Deadline) -> Result<()> {
        let _ = deadline;
        Err(DeviceError::unsupported("reset to menu"))
    }

    fn pause_unpause(&mut self, deadline: Deadline, paused: bool) -> Result<bool> {
        let _ = (deadline, paused);
        Err(DeviceError::unsupported("pause/unpause"))
    }

    fn pause_toggle(&mut self, deadline: Deadline) -> Result<()> {
        let _ = deadline;
        Err(DeviceError::unsupported("pause toggle"))
    }

    fn boot_file(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let _ = (deadline, path);
        Err(DeviceError::unsupported("booting files"))
    }

    fn list_files(&mut self, deadline: Deadline, path: &str) -> Result<Vec<DirEntry>> {
        let _ = (deadline, path);
        Err(DeviceError::unsupported("directory listing"))
    }

    fn make_directory(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let _ = (deadline, path);
        Err(DeviceError::unsupported("creating directories"))
    }

    fn remove_file(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let _ = (deadline, path);
        Err(DeviceError::unsupported("removing files"))
    }

    fn rename_file(&mut self, deadline: Deadline, path: &str, new_name: &str) -> Result<()> {
        let _ = (deadline, path, new_name);
        Err(DeviceError::unsupported("renaming files"))
    }

    fn put_file(&mut self, deadline: Deadline, path: &str, data: &[u8]) -> Result<()> {
        let _ = (deadline, path, data);
        Err(DeviceError::unsupported("uploading files"))
    }

    fn get_file(&mut self, deadline: Deadline, path: &str) -> Result<Vec<u8>> {
        let _ = (deadline, path);
        Err(DeviceError::unsupported("downloading files"))
    }

    /// Raw NWA passthrough for diagnostics on NWA-speaking devices.
    fn nwa_command(
        &mut self,
        deadline: Deadline,
        command: &str,
        args: &str,
        binary_arg: Option<&[u8]>,
    ) -> Result<(Vec<NwaReplyItem>, Vec<u8>)> {
        let _ = (deadline, command, args, binary_arg);
        Err(DeviceError::unsupported("raw NWA commands"))
    }
}
