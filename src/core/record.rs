use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value used wherever an optional identity field is missing.
pub const UNKNOWN: &str = "Unknown";

/// One discovered virtual machine.
///
/// Field names on the wire follow the historical export format (`ts`, `nic`,
/// `IP`, ...) so existing consumers of the topic and index keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    #[serde(rename = "ts", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub guest_state: String,
    #[serde(default)]
    pub os: Option<String>,
    pub name: String,
    #[serde(rename = "instance_uuid")]
    pub instance_id: String,
    #[serde(rename = "nic", default)]
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub connected: bool,
    #[serde(default)]
    pub mac: Option<String>,
    /// Addresses in `address/prefix` form.
    #[serde(rename = "IP", default)]
    pub addresses: Vec<String>,
}

impl AssetRecord {
    /// Record stamped with the current time and no interfaces.
    pub fn new(name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            host_name: None,
            guest_state: String::new(),
            os: None,
            name: name.into(),
            instance_id: instance_id.into(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn with_guest_state(mut self, guest_state: impl Into<String>) -> Self {
        self.guest_state = guest_state.into();
        self
    }

    pub fn with_interface(mut self, interface: NetworkInterface) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn host_name_or_unknown(&self) -> &str {
        self.host_name.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn os_or_unknown(&self) -> &str {
        self.os.as_deref().unwrap_or(UNKNOWN)
    }

    /// Every `(interface, address)` pair in discovery order.
    pub fn addresses(&self) -> impl Iterator<Item = (&NetworkInterface, &str)> {
        self.interfaces
            .iter()
            .flat_map(|nic| nic.addresses.iter().map(move |ip| (nic, ip.as_str())))
    }

    /// One flattened view per interface address, used by the IP-split
    /// broker mode. Interfaces without addresses contribute nothing.
    pub fn split_by_address(&self) -> Vec<AddressRecord<'_>> {
        self.addresses()
            .map(|(nic, ip)| AddressRecord {
                timestamp: self.timestamp,
                host_name: self.host_name.as_deref(),
                guest_state: &self.guest_state,
                os: self.os.as_deref(),
                name: &self.name,
                instance_id: &self.instance_id,
                mac: nic.mac.as_deref(),
                nic_connected: nic.connected,
                ip,
            })
            .collect()
    }
}

impl NetworkInterface {
    pub fn new(mac: impl Into<String>, connected: bool) -> Self {
        Self {
            connected,
            mac: Some(mac.into()),
            addresses: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }
}

/// A record reduced to a single interface address.
#[derive(Debug, Clone, Serialize)]
pub struct AddressRecord<'a> {
    #[serde(rename = "ts", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub host_name: Option<&'a str>,
    pub guest_state: &'a str,
    pub os: Option<&'a str>,
    pub name: &'a str,
    #[serde(rename = "instance_uuid")]
    pub instance_id: &'a str,
    pub mac: Option<&'a str>,
    pub nic_connected: bool,
    pub ip: &'a str,
}

/// Microsecond precision with a trailing `Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(timestamp::FORMAT).to_string()
}

pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .or_else(|_| DateTime::parse_from_rfc3339(&raw).map(|ts| ts.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}
