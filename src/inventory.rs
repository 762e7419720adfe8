//! Remote host inventory
//!
//! Hosts inherit unset connection fields from a named defaults block (or
//! `default` when none is named) and are addressable by alias, host name or
//! group.

use crate::config::{HostDefaults, InventoryConfig};
use crate::error::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Port used when neither the host nor its defaults set one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A fully resolved host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub alias: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub identity: Option<String>,
    pub password: Option<String>,
    pub groups: Vec<String>,
}

impl HostInfo {
    /// A bare host with default settings
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        HostInfo {
            alias: host.clone(),
            host,
            port: DEFAULT_SSH_PORT,
            user: None,
            identity: None,
            password: None,
            groups: Vec::new(),
        }
    }

    /// `user@host` or just `host`
    pub fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Resolved inventory
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: IndexMap<String, HostInfo>,
    by_host: HashMap<String, String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve defaults for every configured host
    pub fn from_config(config: &InventoryConfig) -> ConfigResult<Self> {
        let fallback = HostDefaults::default();
        let mut inventory = Inventory::new();

        for (alias, host) in &config.hosts {
            let defaults_name = host.defaults.as_deref().unwrap_or("default");
            let defaults = match config.defaults.get(defaults_name) {
                Some(d) => d,
                None if defaults_name == "default" => &fallback,
                None => {
                    return Err(ConfigError::UndefinedHostDefaults {
                        host: alias.clone(),
                        defaults: defaults_name.to_string(),
                    })
                }
            };

            let mut groups = defaults.groups.clone();
            for group in &host.groups {
                if !groups.contains(group) {
                    groups.push(group.clone());
                }
            }

            let info = HostInfo {
                alias: alias.clone(),
                host: host.host.clone().unwrap_or_else(|| alias.clone()),
                port: host.port.or(defaults.port).unwrap_or(DEFAULT_SSH_PORT),
                user: host.user.clone().or_else(|| defaults.user.clone()),
                identity: host.identity.clone().or_else(|| defaults.identity.clone()),
                password: host.password.clone().or_else(|| defaults.password.clone()),
                groups,
            };

            inventory.add(info)?;
        }

        Ok(inventory)
    }

    /// Add a host, rejecting a second entry for the same host name
    pub fn add(&mut self, info: HostInfo) -> ConfigResult<()> {
        if self.by_host.contains_key(&info.host) {
            return Err(ConfigError::DuplicateHost(info.host));
        }
        self.by_host.insert(info.host.clone(), info.alias.clone());
        self.hosts.insert(info.alias.clone(), info);
        Ok(())
    }

    /// Look up a host by alias, then by host name
    pub fn get(&self, name: &str) -> Option<&HostInfo> {
        self.hosts.get(name).or_else(|| {
            self.by_host
                .get(name)
                .and_then(|alias| self.hosts.get(alias))
        })
    }

    /// Resolve references to hosts
    ///
    /// Each reference matches an alias or host name exactly, otherwise every
    /// host carrying it as a group. A host appears at most once.
    pub fn resolve(&self, names: &[String]) -> Vec<HostInfo> {
        let mut resolved: IndexMap<String, HostInfo> = IndexMap::new();

        for name in names {
            if let Some(host) = self.get(name) {
                resolved
                    .entry(host.alias.clone())
                    .or_insert_with(|| host.clone());
                continue;
            }

            for host in self.hosts.values().filter(|h| h.has_group(name)) {
                resolved
                    .entry(host.alias.clone())
                    .or_insert_with(|| host.clone());
            }
        }

        resolved.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostInfo> {
        self.hosts.values()
    }
}
