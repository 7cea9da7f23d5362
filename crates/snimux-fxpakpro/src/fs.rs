use snimux_devices::{Deadline, DirEntry, DirEntryType, Result};
use snimux_fxpak_protocol::{self as protocol, LsEntryKind, LsStep, PACKET_LEN};

use crate::device::{check_command_error, invalid_request, FxPakDevice};

impl FxPakDevice {
    pub(crate) fn ls(&mut self, deadline: Deadline, path: &str) -> Result<Vec<DirEntry>> {
        let pkt = protocol::build_ls(path).map_err(invalid_request)?;
        self.link.send_packet(&pkt, deadline)?;

        // The size echo of LS is always 1 and carries no information.
        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("ls", header.error_code)?;

        let mut records = Vec::new();
        let mut pkt = [0u8; PACKET_LEN];
        loop {
            self.link.recv_packet(&mut pkt, deadline)?;
            match protocol::decode_ls_packet(&pkt, &mut records) {
                Ok(LsStep::Done) => break,
                Ok(LsStep::Continue) => continue,
                Err(e) => {
                    let _ = self.link.close();
                    return Err(snimux_devices::DeviceError::fatal(e.to_string()));
                }
            }
        }

        Ok(records
            .into_iter()
            .map(|r| DirEntry {
                name: r.name,
                kind: match r.kind {
                    LsEntryKind::Directory => DirEntryType::Directory,
                    LsEntryKind::File => DirEntryType::File,
                },
            })
            .collect())
    }

    pub(crate) fn simple_file_command(
        &mut self,
        what: &str,
        pkt: [u8; PACKET_LEN],
        deadline: Deadline,
    ) -> Result<()> {
        self.link.send_packet(&pkt, deadline)?;
        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error(what, header.error_code)
    }

    pub(crate) fn upload_file(&mut self, deadline: Deadline, path: &str, data: &[u8]) -> Result<()> {
        let pkt = protocol::build_put_file(path, data.len() as u32).map_err(invalid_request)?;
        self.link.send_packet(&pkt, deadline)?;

        let mut payload = data.to_vec();
        payload.resize(protocol::padded_len(data.len()), 0);
        self.link.send_raw(&payload, deadline)?;

        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("put", header.error_code)
    }

    pub(crate) fn download_file(&mut self, deadline: Deadline, path: &str) -> Result<Vec<u8>> {
        let pkt = protocol::build_get_file(path).map_err(invalid_request)?;
        self.link.send_packet(&pkt, deadline)?;

        // The size echo carries the file length.
        let (_, header) = self.link.recv_response_header(deadline, false)?;
        check_command_error("get", header.error_code)?;
        self.link.recv_data(header.size as usize, deadline)
    }
}
