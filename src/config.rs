//! Configuration file loading.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hosts::{HostSet, HostTable};

#[derive(Debug, Deserialize)]
struct RawConfig {
    hosts: HashMap<String, String>,
}

/// The validated, immutable configuration consumed by the supervisor:
/// an address → host table plus the set of configured host names.
pub struct Config {
    pub hosts_by_address: HostTable,
    pub known_hosts: HostSet,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        let raw: RawConfig =
            toml::from_str(&text).map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;

        let mut hosts_by_address = HostTable::new();
        let mut known_hosts = HostSet::new();

        for (name, address) in raw.hosts {
            let address = parse_address(&name, &address)?;
            hosts_by_address.insert(address, name.clone());
            known_hosts.insert(name);
        }

        Ok(Config { hosts_by_address, known_hosts })
    }
}

fn parse_address(host: &str, address: &str) -> Result<u64> {
    if address.len() != 16 || !address.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Config(format!(
            "host '{host}': address '{address}' must be exactly 16 hex characters"
        )));
    }
    u64::from_str_radix(address, 16)
        .map_err(|err| Error::Config(format!("host '{host}': address '{address}': {err}")))
}
