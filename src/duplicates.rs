//! Run-scoped detection of hostnames or addresses shared by several VMs.

use crate::core::{AssetRecord, PipelineError};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateMode {
    Hostname,
    Ip,
    /// Groups by hostname only; address grouping is never reached in this mode.
    #[default]
    All,
}

impl FromStr for DuplicateMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hostname" => Ok(DuplicateMode::Hostname),
            "ip" => Ok(DuplicateMode::Ip),
            "all" => Ok(DuplicateMode::All),
            other => Err(PipelineError::Config(format!(
                "unknown duplicate mode '{other}', expected hostname, ip or all"
            ))),
        }
    }
}

impl fmt::Display for DuplicateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateMode::Hostname => write!(f, "hostname"),
            DuplicateMode::Ip => write!(f, "ip"),
            DuplicateMode::All => write!(f, "all"),
        }
    }
}

/// A key observed on more than one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: String,
    pub count: usize,
    /// `name` of every member, in observation order.
    pub members: Vec<String>,
}

impl fmt::Display for DuplicateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found duplicates for {}: {} ({})",
            self.key,
            self.count,
            self.members.join(", ")
        )
    }
}

#[derive(Debug, Default)]
pub struct DuplicateTracker {
    mode: DuplicateMode,
    groups: HashMap<String, Vec<AssetRecord>>,
    // first-seen order of keys, so reports are stable
    order: Vec<String>,
}

impl DuplicateTracker {
    pub fn new(mode: DuplicateMode) -> Self {
        Self {
            mode,
            groups: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn mode(&self) -> DuplicateMode {
        self.mode
    }

    pub fn observe(&mut self, record: &AssetRecord) {
        match self.mode {
            DuplicateMode::Hostname | DuplicateMode::All => {
                let key = record.host_name_or_unknown().to_string();
                self.append(key, record);
            }
            DuplicateMode::Ip => {
                for (_, ip) in record.addresses() {
                    self.append(ip.to_string(), record);
                }
            }
        }
    }

    fn append(&mut self, key: String, record: &AssetRecord) {
        match self.groups.get_mut(&key) {
            Some(members) => members.push(record.clone()),
            None => {
                debug!(key = %key, mode = %self.mode, "new duplicate key");
                self.order.push(key.clone());
                self.groups.insert(key, vec![record.clone()]);
            }
        }
    }

    /// Groups with more than one member, in the order their key was first seen.
    pub fn report(&self) -> Vec<DuplicateGroup> {
        self.order
            .iter()
            .filter_map(|key| {
                let members = self.groups.get(key)?;
                (members.len() > 1).then(|| DuplicateGroup {
                    key: key.clone(),
                    count: members.len(),
                    members: members.iter().map(|r| r.name.clone()).collect(),
                })
            })
            .collect()
    }
}
