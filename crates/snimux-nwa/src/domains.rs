use snimux_devices::{
    Deadline, Device, DeviceError, DomainOffsetData, DomainReadRequest, DomainReadResponse,
    DomainWriteRequest, DomainWriteResponse, Field, MemoryDomain, Result,
};
use snimux_nwa_protocol as wire;
use snimux_platforms::{CoreConfig, Domain};
use tracing::debug;

use crate::client::NwaClient;

/// The discovered projection of one running core onto canonical domains.
pub(crate) struct CoreMapping {
    pub core: CoreConfig,
    pub platform: String,
    pub domains: Vec<Domain>,
}

fn clean(s: &str) -> &str {
    s.trim()
}

fn clean_lower(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

impl NwaClient {
    /// Force rediscovery and report the domain list.
    pub(crate) fn domains_rediscover(&mut self, deadline: Deadline) -> Result<Vec<MemoryDomain>> {
        self.mapping = None;
        self.ensure_mapping(deadline)?;
        let mapping = self
            .mapping
            .as_ref()
            .ok_or_else(|| DeviceError::FailedPrecondition("core mapping unavailable".into()))?;
        Ok(mapping
            .domains
            .iter()
            .map(|d| MemoryDomain {
                name: d.name.clone(),
                start: 0,
                size: d.size,
                is_exposed: d.is_exposed,
                is_core_specific: d.is_core_specific,
                is_readable: d.is_readable,
                is_writeable: d.is_writeable,
            })
            .collect())
    }

    /// Discover the core→domain mapping if it is not already cached.
    ///
    /// Failures here are configuration errors scoped to the call: the
    /// connection stays open so the operator can fix the config and retry.
    pub(crate) fn ensure_mapping(&mut self, deadline: Deadline) -> Result<()> {
        if self.mapping.is_some() {
            return Ok(());
        }

        let fields = self.fetch_fields(
            deadline,
            &[Field::CoreName, Field::CoreVersion, Field::CorePlatform],
        )?;
        let (core_name, core_version, core_platform) = (
            clean(&fields[0]).to_owned(),
            clean(&fields[1]).to_owned(),
            clean(&fields[2]).to_owned(),
        );

        let config = self.config.clone();
        let core = config
            .match_core(&core_name, &core_version, &core_platform)
            .ok_or_else(|| {
                DeviceError::FailedPrecondition(format!(
                    "could not find a match for coreName={core_name:?}, coreVersion={core_version:?}, \
                     corePlatform={core_platform:?} in the platforms config"
                ))
            })?;

        let platform = config.platform(&core.define.platform).ok_or_else(|| {
            DeviceError::FailedPrecondition(format!(
                "platform {:?} is not defined in the platforms config",
                core.define.platform
            ))
        })?;

        let reply = self.send_command("CORE_MEMORIES", deadline)?;
        let memories = match reply {
            wire::Reply::Ascii(items) => items,
            wire::Reply::Binary(_) => {
                return Err(DeviceError::fatal(
                    "emunwa: CORE_MEMORIES answered with a binary reply",
                ))
            }
        };

        // Start from the platform's full domain list, unexposed, then fold
        // in what the core actually reports.
        let mut domains: Vec<Domain> = platform.domains.iter().map(Domain::unexposed).collect();
        for memory in &memories {
            let name = clean_lower(memory.get("name").map(String::as_str).unwrap_or_default());
            let size_text = clean_lower(memory.get("size").map(String::as_str).unwrap_or_default());
            let access = clean_lower(memory.get("access").map(String::as_str).unwrap_or_default());

            let size: u64 = size_text.parse().map_err(|_| {
                DeviceError::FailedPrecondition(format!(
                    "could not parse size {size_text:?} in the CORE_MEMORIES reply"
                ))
            })?;

            let sni_name = core.core_to_sni(&name).ok_or_else(|| {
                DeviceError::FailedPrecondition(format!(
                    "could not map core memory name {name:?} to a canonical domain"
                ))
            })?;
            // Canonical casing comes from the platform when it knows the name.
            let canonical = platform
                .domain(sni_name)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| sni_name.to_owned());

            let entry = match domains
                .iter_mut()
                .find(|d| d.name.eq_ignore_ascii_case(&canonical))
            {
                Some(entry) => entry,
                None => {
                    domains.push(Domain {
                        name: canonical,
                        size,
                        is_exposed: false,
                        is_core_specific: true,
                        is_readable: false,
                        is_writeable: false,
                    });
                    let last = domains.len() - 1;
                    &mut domains[last]
                }
            };
            entry.is_exposed = true;
            entry.size = size;
            entry.is_readable = access == "rw" || access == "r";
            entry.is_writeable = access == "rw" || access == "w";
        }

        debug!(
            core = %core.name,
            platform = %core.define.platform,
            domains = domains.len(),
            "discovered core memory mapping"
        );
        self.mapping = Some(CoreMapping {
            core: core.clone(),
            platform: core.define.platform.clone(),
            domains,
        });
        Ok(())
    }

    fn check_domain_range(&self, sni_lower: &str, offset: u64, size: u64) -> Result<()> {
        let mapping = match &self.mapping {
            Some(m) => m,
            None => return Ok(()),
        };
        let Some(domain) = mapping
            .domains
            .iter()
            .find(|d| d.is_exposed && d.name.eq_ignore_ascii_case(sni_lower))
        else {
            return Ok(());
        };
        if offset >= domain.size || offset + size > domain.size {
            return Err(DeviceError::invalid_argument(format!(
                "request {offset:#x}+{size:#x} exceeds domain {} size {:#x}",
                domain.name, domain.size
            )));
        }
        Ok(())
    }

    fn core_memory_name(&self, sni_name: &str) -> Result<String> {
        let mapping = self
            .mapping
            .as_ref()
            .ok_or_else(|| DeviceError::FailedPrecondition("core mapping unavailable".into()))?;
        mapping
            .core
            .sni_to_core(&clean_lower(sni_name))
            .map(str::to_owned)
            .ok_or_else(|| {
                DeviceError::invalid_argument(format!("unrecognized domain name {sni_name:?}"))
            })
    }

    pub(crate) fn domain_read(
        &mut self,
        deadline: Deadline,
        requests: &[DomainReadRequest],
    ) -> Result<Vec<DomainReadResponse>> {
        self.ensure_mapping(deadline)?;

        // Validate and send every command before collecting any reply.
        let mut lines = Vec::with_capacity(requests.len());
        for req in requests {
            let memory = self.core_memory_name(&req.domain)?;
            for &(offset, size) in &req.reads {
                self.check_domain_range(&req.domain, offset, size)?;
            }
            lines.push(wire::core_read_command(&memory, &req.reads));
        }
        for line in &lines {
            self.write_frame(&wire::encode_command(line), deadline)?;
        }

        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let reply = self.read_reply(deadline)?;
            let bin = match reply {
                wire::Reply::Binary(data) => data,
                wire::Reply::Ascii(items) => {
                    return Err(DeviceError::non_fatal(format!(
                        "emunwa: expected binary reply but got ascii: {items:?}"
                    )))
                }
            };

            let mut reads = Vec::with_capacity(req.reads.len());
            let mut cursor = 0usize;
            for &(offset, size) in &req.reads {
                let size = size as usize;
                let mut data = vec![0u8; size];
                if cursor < bin.len() {
                    let available = (bin.len() - cursor).min(size);
                    data[..available].copy_from_slice(&bin[cursor..cursor + available]);
                }
                cursor += size;
                reads.push(DomainOffsetData { offset, data });
            }
            responses.push(DomainReadResponse {
                domain: req.domain.clone(),
                reads,
            });
        }
        Ok(responses)
    }

    pub(crate) fn domain_write(
        &mut self,
        deadline: Deadline,
        requests: &[DomainWriteRequest],
    ) -> Result<Vec<DomainWriteResponse>> {
        self.ensure_mapping(deadline)?;

        let mut frames = Vec::with_capacity(requests.len());
        let mut responses = Vec::with_capacity(requests.len());
        for req in requests {
            let memory = self.core_memory_name(&req.domain)?;
            let mut pairs = Vec::with_capacity(req.writes.len());
            let mut payload = Vec::new();
            let mut acks = Vec::with_capacity(req.writes.len());
            for write in &req.writes {
                let size = write.data.len() as u64;
                self.check_domain_range(&req.domain, write.offset, size)?;
                pairs.push((write.offset, size));
                payload.extend_from_slice(&write.data);
                acks.push((write.offset, size));
            }
            let line = wire::core_write_command(&memory, &pairs);
            frames.push(wire::encode_binary_command(&line, &payload));
            responses.push(DomainWriteResponse {
                domain: req.domain.clone(),
                writes: acks,
            });
        }
        for frame in &frames {
            self.write_frame(frame, deadline)?;
        }

        let mut error_texts = Vec::new();
        for _ in requests {
            let reply = self.read_reply(deadline)?;
            if let Some(text) = reply.command_error() {
                error_texts.push(text.to_owned());
            }
        }
        if !error_texts.is_empty() {
            return Err(DeviceError::non_fatal(format!(
                "emunwa: error={}",
                error_texts.join("\n")
            )));
        }
        Ok(responses)
    }
}
