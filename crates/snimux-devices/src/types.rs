use snimux_mapping::AddressTuple;

/// One ASCII record of an NWA reply, as surfaced by the raw passthrough.
pub type NwaReplyItem = std::collections::HashMap<String, String>;

/// What a driver can do; checked before dispatch so unsupported operations
/// fail as a precondition instead of a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCapability {
    ReadMemory,
    WriteMemory,
    ExecuteAsm,
    ResetSystem,
    ResetToMenu,
    PauseUnpauseEmulation,
    PauseToggleEmulation,
    FetchFields,
    ReadDirectory,
    MakeDirectory,
    RemoveFile,
    RenameFile,
    PutFile,
    GetFile,
    BootFile,
    ReadMemoryDomain,
    WriteMemoryDomain,
    NwaCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReadRequest {
    pub address: AddressTuple,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReadResponse {
    pub request_address: AddressTuple,
    /// The request address resolved into the device's native space.
    pub device_address: AddressTuple,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWriteRequest {
    pub address: AddressTuple,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWriteResponse {
    pub request_address: AddressTuple,
    pub device_address: AddressTuple,
    pub size: usize,
}

/// A named, size-bounded region of device memory exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDomain {
    pub name: String,
    pub start: u32,
    pub size: u64,
    pub is_exposed: bool,
    pub is_core_specific: bool,
    pub is_readable: bool,
    /// Direct-path writeability. A domain a driver can only reach through
    /// in-console code injection stays `false` here.
    pub is_writeable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReadRequest {
    pub domain: String,
    /// `(offset, size)` pairs, validated against the domain size before I/O.
    pub reads: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainOffsetData {
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReadResponse {
    pub domain: String,
    pub reads: Vec<DomainOffsetData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainWriteRequest {
    pub domain: String,
    pub writes: Vec<DomainOffsetData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainWriteResponse {
    pub domain: String,
    /// `(offset, size)` acknowledged per write.
    pub writes: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryType {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryType,
}

/// Session metadata fields; drivers coalesce the source queries needed to
/// answer a batch of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DeviceName,
    DeviceVersion,
    DeviceStatus,
    CoreName,
    CoreVersion,
    CorePlatform,
    RomFileName,
}
