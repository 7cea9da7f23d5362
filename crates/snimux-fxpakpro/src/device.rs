use snimux_devices::{
    Deadline, Device, DeviceCapability, DeviceError, DirEntry, DomainReadRequest,
    DomainReadResponse, DomainWriteRequest, DomainWriteResponse, Field, MemoryDomain,
    MemoryReadRequest, MemoryReadResponse, MemoryWriteRequest, MemoryWriteResponse, Result,
};
use snimux_fxpak_protocol as protocol;

use crate::link::{Link, PakTransport};

pub(crate) const CAPABILITIES: &[DeviceCapability] = &[
    DeviceCapability::ReadMemory,
    DeviceCapability::WriteMemory,
    DeviceCapability::ExecuteAsm,
    DeviceCapability::ResetSystem,
    DeviceCapability::ResetToMenu,
    DeviceCapability::FetchFields,
    DeviceCapability::ReadDirectory,
    DeviceCapability::MakeDirectory,
    DeviceCapability::RemoveFile,
    DeviceCapability::RenameFile,
    DeviceCapability::PutFile,
    DeviceCapability::GetFile,
    DeviceCapability::BootFile,
    DeviceCapability::ReadMemoryDomain,
    DeviceCapability::WriteMemoryDomain,
];

/// One FX Pak Pro behind a serial port.
pub struct FxPakDevice {
    pub(crate) link: Link,
}

impl FxPakDevice {
    pub fn new(transport: Box<dyn PakTransport>) -> FxPakDevice {
        FxPakDevice {
            link: Link::new(transport),
        }
    }

    /// INFO round-trip, decoded off the response header packet.
    pub(crate) fn info(&mut self, deadline: Deadline) -> Result<protocol::InfoFields> {
        self.link.send_packet(&protocol::build_info(), deadline)?;
        let (pkt, header) = self.link.recv_response_header(deadline, false)?;
        if header.error_code != 0 {
            return Err(DeviceError::non_fatal(format!(
                "info: protocol error code {}",
                header.error_code
            )));
        }
        Ok(protocol::decode_info(&pkt))
    }
}

impl Device for FxPakDevice {
    fn capabilities(&self) -> &'static [DeviceCapability] {
        CAPABILITIES
    }

    fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    fn close(&mut self) -> Result<()> {
        self.link.close()
    }

    fn multi_read_memory(
        &mut self,
        deadline: Deadline,
        reads: &[MemoryReadRequest],
    ) -> Result<Vec<MemoryReadResponse>> {
        self.read_memory(deadline, reads)
    }

    fn multi_write_memory(
        &mut self,
        deadline: Deadline,
        writes: &[MemoryWriteRequest],
    ) -> Result<Vec<MemoryWriteResponse>> {
        self.write_memory(deadline, writes)
    }

    fn memory_domains(&mut self, _deadline: Deadline) -> Result<Vec<MemoryDomain>> {
        Ok(crate::domains::memory_domains())
    }

    fn multi_domain_read(
        &mut self,
        deadline: Deadline,
        requests: &[DomainReadRequest],
    ) -> Result<Vec<DomainReadResponse>> {
        self.domain_read(deadline, requests)
    }

    fn multi_domain_write(
        &mut self,
        deadline: Deadline,
        requests: &[DomainWriteRequest],
    ) -> Result<Vec<DomainWriteResponse>> {
        self.domain_write(deadline, requests)
    }

    fn fetch_fields(&mut self, deadline: Deadline, fields: &[Field]) -> Result<Vec<String>> {
        // Every answerable field comes from one INFO exchange.
        let info = self.info(deadline)?;
        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => crate::DRIVER_NAME.to_owned(),
                Field::DeviceVersion => info.version_string.clone(),
                Field::RomFileName => info.rom_running.clone(),
                _ => String::new(),
            })
            .collect())
    }

    fn reset_system(&mut self, deadline: Deadline) -> Result<()> {
        self.link.send_packet(&protocol::build_reset(), deadline)?;
        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("reset", header.error_code)
    }

    fn reset_to_menu(&mut self, deadline: Deadline) -> Result<()> {
        self.link.send_packet(&protocol::build_menu(), deadline)?;
        let (_, header) = self.link.recv_response_header(deadline, true)?;
        check_command_error("menu", header.error_code)
    }

    fn boot_file(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let pkt = protocol::build_boot(path).map_err(invalid_request)?;
        self.link.send_packet(&pkt, deadline)?;
        let (_, header) = self.link.recv_response_header(deadline, true)?;
        check_command_error("boot", header.error_code)
    }

    fn list_files(&mut self, deadline: Deadline, path: &str) -> Result<Vec<DirEntry>> {
        self.ls(deadline, path)
    }

    fn make_directory(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let pkt = protocol::build_mkdir(path).map_err(invalid_request)?;
        self.simple_file_command("mkdir", pkt, deadline)
    }

    fn remove_file(&mut self, deadline: Deadline, path: &str) -> Result<()> {
        let pkt = protocol::build_rm(path).map_err(invalid_request)?;
        self.simple_file_command("rm", pkt, deadline)
    }

    fn rename_file(&mut self, deadline: Deadline, path: &str, new_name: &str) -> Result<()> {
        let pkt = protocol::build_mv(path, new_name).map_err(invalid_request)?;
        self.simple_file_command("mv", pkt, deadline)
    }

    fn put_file(&mut self, deadline: Deadline, path: &str, data: &[u8]) -> Result<()> {
        self.upload_file(deadline, path, data)
    }

    fn get_file(&mut self, deadline: Deadline, path: &str) -> Result<Vec<u8>> {
        self.download_file(deadline, path)
    }
}

pub(crate) fn invalid_request(err: protocol::PacketError) -> DeviceError {
    DeviceError::invalid_argument(err.to_string())
}

/// Nonzero protocol error bytes on file-family commands are non-fatal.
pub(crate) fn check_command_error(what: &str, code: u8) -> Result<()> {
    if code != 0 {
        return Err(DeviceError::non_fatal(format!(
            "{what}: protocol error code {code}"
        )));
    }
    Ok(())
}
