#![forbid(unsafe_code)]

//! Platform, memory-domain and emulator-core configuration.
//!
//! A platform names the canonical memory domains clients address
//! (`CARTROM`, `WRAM`, …). A core config teaches the service how to
//! recognize one emulator core — by regex over its `(name, version,
//! platform)` triple — and how that core's memory names map onto the
//! canonical ones, in both directions.
//!
//! The configuration is loaded once at startup and frozen; a built-in
//! document covering the common SNES cores ships in the binary.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const BUILTIN_JSON: &str = include_str!("../platforms.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("core {core:?}: bad {field} regex: {source}")]
    BadRegex {
        core: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainConf {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConf {
    pub name: String,
    pub domains: Vec<DomainConf>,
}

impl PlatformConf {
    /// Canonical-case domain lookup; keys compare case-insensitively.
    pub fn domain(&self, name: &str) -> Option<&DomainConf> {
        self.domains.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

/// A memory domain as a concrete device session reports it: the static
/// platform shape plus what the device actually exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub size: u64,
    pub is_exposed: bool,
    pub is_core_specific: bool,
    pub is_readable: bool,
    pub is_writeable: bool,
}

impl Domain {
    pub fn unexposed(conf: &DomainConf) -> Self {
        Domain {
            name: conf.name.clone(),
            size: conf.size,
            is_exposed: false,
            is_core_specific: false,
            is_readable: false,
            is_writeable: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CoreMatchesDoc {
    core_name_regex: String,
    #[serde(default)]
    core_version_regex: Option<String>,
    #[serde(default)]
    core_platform_regex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreDefine {
    pub platform: String,
    pub core_to_sni_mapping: HashMap<String, String>,
    pub sni_to_core_mapping: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CoreConfigDoc {
    name: String,
    matches: CoreMatchesDoc,
    define: CoreDefine,
}

#[derive(Debug, Deserialize)]
struct ConfigDoc {
    platforms: Vec<PlatformConf>,
    cores: Vec<CoreConfigDoc>,
}

/// One core-recognition rule with its compiled regexes.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub name: String,
    core_name: Regex,
    core_version: Option<Regex>,
    core_platform: Option<Regex>,
    pub define: CoreDefine,
}

impl CoreConfig {
    pub fn matches(&self, core_name: &str, core_version: &str, core_platform: &str) -> bool {
        if !self.core_name.is_match(core_name) {
            return false;
        }
        if let Some(re) = &self.core_version {
            if !re.is_match(core_version) {
                return false;
            }
        }
        if let Some(re) = &self.core_platform {
            if !re.is_match(core_platform) {
                return false;
            }
        }
        true
    }

    /// Canonical name for a core-reported memory name (keys are lowercase).
    pub fn core_to_sni(&self, core_memory: &str) -> Option<&str> {
        self.define
            .core_to_sni_mapping
            .get(core_memory)
            .map(String::as_str)
    }

    /// Core-side name for a canonical domain name (keys are lowercase).
    pub fn sni_to_core(&self, sni_name: &str) -> Option<&str> {
        self.define
            .sni_to_core_mapping
            .get(sni_name)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    platforms_by_name: HashMap<String, PlatformConf>,
    pub cores: Vec<CoreConfig>,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Config, ConfigError> {
        let doc: ConfigDoc = serde_json::from_str(text)?;

        let mut platforms_by_name = HashMap::with_capacity(doc.platforms.len());
        for p in doc.platforms {
            platforms_by_name.insert(p.name.to_ascii_lowercase(), p);
        }

        let mut cores = Vec::with_capacity(doc.cores.len());
        for c in doc.cores {
            let compile = |field: &'static str, pattern: &str| {
                Regex::new(pattern).map_err(|source| ConfigError::BadRegex {
                    core: c.name.clone(),
                    field,
                    source,
                })
            };
            let core_name = compile("core_name", &c.matches.core_name_regex)?;
            let core_version = match &c.matches.core_version_regex {
                Some(p) => Some(compile("core_version", p)?),
                None => None,
            };
            let core_platform = match &c.matches.core_platform_regex {
                Some(p) => Some(compile("core_platform", p)?),
                None => None,
            };

            // Mapping keys compare lowercased on both sides.
            let mut define = c.define;
            define.core_to_sni_mapping = lower_keys(define.core_to_sni_mapping);
            define.sni_to_core_mapping = lower_keys(define.sni_to_core_mapping);

            cores.push(CoreConfig {
                name: c.name,
                core_name,
                core_version,
                core_platform,
                define,
            });
        }

        Ok(Config {
            platforms_by_name,
            cores,
        })
    }

    /// The configuration shipped in the binary.
    pub fn builtin() -> Result<Config, ConfigError> {
        Config::from_json(BUILTIN_JSON)
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformConf> {
        self.platforms_by_name.get(&name.to_ascii_lowercase())
    }

    /// First core config whose regexes all match, in document order.
    pub fn match_core(
        &self,
        core_name: &str,
        core_version: &str,
        core_platform: &str,
    ) -> Option<&CoreConfig> {
        self.cores
            .iter()
            .find(|c| c.matches(core_name, core_version, core_platform))
    }
}

fn lower_keys(map: HashMap<String, String>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_parses_and_names_the_snes_platform() {
        let config = Config::builtin().unwrap();
        let snes = config.platform("snes").expect("snes platform");
        assert_eq!(snes.domains.len(), 7);
        assert_eq!(snes.domain("wram").unwrap().size, 0x2_0000);
        assert_eq!(snes.domain("CARTROM").unwrap().size, 0xE0_0000);
    }

    #[test]
    fn first_matching_core_wins() {
        let config = Config::builtin().unwrap();
        let core = config
            .match_core("bsnes", "115", "SNES")
            .expect("bsnes matches");
        assert_eq!(core.name, "bsnes");
        assert_eq!(core.core_to_sni("snes_wram"), Some("WRAM"));
        assert_eq!(core.sni_to_core("wram"), Some("SNES_WRAM"));
    }

    #[test]
    fn platform_regex_gates_the_match() {
        let config = Config::builtin().unwrap();
        assert!(config.match_core("bsnes", "115", "GB").is_none());
        // snes9x has no platform regex and matches regardless.
        assert!(config.match_core("Snes9x", "1.62", "anything").is_some());
    }

    #[test]
    fn bad_regex_is_reported_with_its_core() {
        let text = r#"{
            "platforms": [],
            "cores": [{
                "name": "broken",
                "matches": { "core_name_regex": "(" },
                "define": { "platform": "snes", "core_to_sni_mapping": {}, "sni_to_core_mapping": {} }
            }]
        }"#;
        match Config::from_json(text) {
            Err(ConfigError::BadRegex { core, field, .. }) => {
                assert_eq!(core, "broken");
                assert_eq!(field, "core_name");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
