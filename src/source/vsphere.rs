//! Inventory source backed by the vSphere Automation REST API.

use crate::core::{
    AssetRecord, HandleStream, InventorySource, NetworkInterface, PipelineError, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const VM_FOLDER: &str = "VIRTUAL_MACHINE";

#[derive(Clone)]
pub struct VsphereConfig {
    /// Hostname, or a full base URL including scheme.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub disable_ssl_verification: bool,
    /// `/`-separated path below the datacenter VM root folder.
    pub folder: String,
}

impl fmt::Debug for VsphereConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VsphereConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("disable_ssl_verification", &self.disable_ssl_verification)
            .field("folder", &self.folder)
            .finish()
    }
}

impl VsphereConfig {
    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("https://{}:{}", self.host, self.port)
        };
        let mut url = Url::parse(&raw).map_err(|e| {
            PipelineError::Config(format!("invalid vSphere host '{}': {e}", self.host))
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

/// A VM as listed by the inventory, before any guest data is read.
#[derive(Debug, Clone, Deserialize)]
pub struct VmSummary {
    pub vm: String,
    pub name: String,
    #[serde(default)]
    pub power_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Datacenter {
    datacenter: String,
}

#[derive(Debug, Deserialize)]
struct Folder {
    folder: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VmInfo {
    name: String,
    #[serde(default)]
    identity: Option<VmIdentity>,
}

#[derive(Debug, Deserialize)]
struct VmIdentity {
    #[serde(default)]
    instance_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuestIdentity {
    #[serde(default)]
    host_name: Option<String>,
    #[serde(default)]
    full_name: Option<LocalizableMessage>,
}

#[derive(Debug, Deserialize)]
struct LocalizableMessage {
    default_message: String,
}

#[derive(Debug, Deserialize)]
struct GuestPower {
    state: String,
}

#[derive(Debug, Deserialize)]
struct GuestInterface {
    #[serde(default)]
    mac_address: Option<String>,
    #[serde(default)]
    nic: Option<String>,
    #[serde(default)]
    ip: Option<GuestIpConfig>,
}

#[derive(Debug, Deserialize)]
struct GuestIpConfig {
    #[serde(default)]
    ip_addresses: Vec<GuestIpAddress>,
}

#[derive(Debug, Deserialize)]
struct GuestIpAddress {
    ip_address: String,
    prefix_length: u32,
}

#[derive(Debug, Deserialize)]
struct EthernetInfo {
    state: String,
}

/// Guest power states in the casing the guest agent reports them.
fn guest_state(api_state: &str) -> String {
    match api_state {
        "RUNNING" => "running",
        "NOT_RUNNING" => "notRunning",
        "SHUTTING_DOWN" => "shuttingDown",
        "RESETTING" => "resetting",
        "STANDBY" => "standby",
        _ => "unknown",
    }
    .to_string()
}

/// Authenticated session, cheap to clone into handle streams.
#[derive(Clone)]
struct Session {
    client: Client,
    base: Url,
    token: String,
}

impl Session {
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self
            .base
            .join(path)
            .map_err(|e| PipelineError::Config(format!("invalid API path '{path}': {e}")))?;
        let value = self
            .client
            .get(url)
            .header(SESSION_HEADER, &self.token)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }

    async fn folders(&self, query: &[(&str, &str)]) -> Result<Vec<Folder>> {
        let mut query = query.to_vec();
        query.push(("type", VM_FOLDER));
        self.get("api/vcenter/folder", &query).await
    }

    async fn vms_in(&self, folder: &str) -> Result<Vec<VmSummary>> {
        self.get("api/vcenter/vm", &[("folders", folder)]).await
    }
}

pub struct VsphereSource {
    config: VsphereConfig,
    session: Option<Session>,
    /// Folder id of the configured path, resolved while connecting.
    root: Option<String>,
}

impl VsphereSource {
    pub fn new(config: VsphereConfig) -> Self {
        Self {
            config,
            session: None,
            root: None,
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| {
                PipelineError::Source(anyhow::anyhow!("vSphere session not established"))
            })
    }

    /// Resolves the configured folder path below the first datacenter.
    async fn resolve_folder(&self, session: &Session) -> Result<String> {
        let datacenters: Vec<Datacenter> = session.get("api/vcenter/datacenter", &[]).await?;
        let datacenter = datacenters
            .first()
            .ok_or_else(|| {
                PipelineError::Source(anyhow::anyhow!("no datacenter visible to this user"))
            })?;

        let root = session
            .folders(&[("datacenters", datacenter.datacenter.as_str()), ("names", "vm")])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Source(anyhow::anyhow!("datacenter has no VM folder")))?;

        let mut current = root.folder;
        for part in self.config.folder.split('/').filter(|p| !p.is_empty()) {
            let child = session
                .folders(&[("parent_folders", current.as_str()), ("names", part)])
                .await?
                .into_iter()
                .find(|f| f.name == part)
                .ok_or_else(|| {
                    PipelineError::Source(anyhow::anyhow!(
                        "folder '{part}' not found in path '{}'",
                        self.config.folder
                    ))
                })?;
            current = child.folder;
        }
        Ok(current)
    }

    /// The folder itself and every folder below it, breadth first.
    async fn descendants(&self, session: &Session, folder: String) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([folder]);
        while let Some(next) = queue.pop_front() {
            let children = session.folders(&[("parent_folders", next.as_str())]).await?;
            queue.extend(children.into_iter().map(|f| f.folder));
            found.push(next);
        }
        Ok(found)
    }

    async fn is_connected(&self, session: &Session, vm: &VmSummary, nic: Option<&str>) -> bool {
        let Some(nic) = nic else {
            return false;
        };
        let path = format!("api/vcenter/vm/{}/hardware/ethernet/{nic}", vm.vm);
        match session.get::<EthernetInfo>(&path, &[]).await {
            Ok(info) => info.state == "CONNECTED",
            Err(e) => {
                debug!(vm = %vm.name, nic, error = %e, "unable to read NIC state");
                false
            }
        }
    }
}

#[async_trait]
impl InventorySource for VsphereSource {
    type Handle = VmSummary;

    async fn connect(&mut self) -> Result<()> {
        let base = self.config.base_url()?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(self.config.disable_ssl_verification)
            .build()
            .map_err(|e| PipelineError::SourceConnect(e.to_string()))?;

        let url = base
            .join("api/session")
            .map_err(|e| PipelineError::SourceConnect(e.to_string()))?;
        let token: String = client
            .post(url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::SourceConnect(e.to_string()))?
            .json()
            .await
            .map_err(|e| {
                PipelineError::SourceConnect(format!("unexpected session response: {e}"))
            })?;

        info!(host = %self.config.host, user = %self.config.user, "connected to vSphere");
        let session = Session { client, base, token };

        // a folder path that does not resolve is as fatal as a refused login
        let root = self
            .resolve_folder(&session)
            .await
            .map_err(|e| PipelineError::SourceConnect(e.to_string()))?;
        debug!(folder = %root, path = %self.config.folder, "resolved VM folder");

        self.session = Some(session);
        self.root = Some(root);
        Ok(())
    }

    async fn iterate(&self) -> Result<HandleStream<VmSummary>> {
        let session = self.session()?.clone();
        let root = self
            .root
            .clone()
            .ok_or_else(|| PipelineError::Source(anyhow::anyhow!("VM folder not resolved")))?;
        let folders = self.descendants(&session, root).await?;
        info!(folders = folders.len(), path = %self.config.folder, "scanning VM folders");

        let stream = stream::iter(folders)
            .then(move |folder| {
                let session = session.clone();
                async move { session.vms_in(&folder).await }
            })
            .map_ok(|vms| stream::iter(vms.into_iter().map(Ok::<_, PipelineError>)))
            .try_flatten();

        Ok(Box::pin(stream))
    }

    async fn extract(&self, vm: &VmSummary) -> Result<AssetRecord> {
        let session = self.session()?;
        let base = format!("api/vcenter/vm/{}", vm.vm);

        let info: VmInfo = session
            .get(&base, &[])
            .await
            .map_err(|e| PipelineError::extract(&vm.name, e))?;

        let identity: GuestIdentity = session
            .get(&format!("{base}/guest/identity"), &[])
            .await
            .map_err(|e| PipelineError::extract(&vm.name, format!("guest data unavailable: {e}")))?;

        let power: GuestPower = session
            .get(&format!("{base}/guest/power"), &[])
            .await
            .map_err(|e| PipelineError::extract(&vm.name, e))?;

        let guest_nics: Vec<GuestInterface> = session
            .get(&format!("{base}/guest/networking/interfaces"), &[])
            .await
            .map_err(|e| PipelineError::extract(&vm.name, e))?;

        let mut interfaces = Vec::new();
        for nic in guest_nics {
            // interfaces without an IP stack are not reported
            let Some(ip) = nic.ip else {
                continue;
            };
            let connected = self.is_connected(session, vm, nic.nic.as_deref()).await;
            interfaces.push(NetworkInterface {
                connected,
                mac: nic.mac_address,
                addresses: ip
                    .ip_addresses
                    .iter()
                    .map(|a| format!("{}/{}", a.ip_address, a.prefix_length))
                    .collect(),
            });
        }

        let instance_id = match info.identity.and_then(|i| i.instance_uuid) {
            Some(uuid) => uuid,
            None => {
                warn!(vm = %vm.name, "no instance uuid reported, using inventory id");
                vm.vm.clone()
            }
        };

        Ok(AssetRecord {
            timestamp: Utc::now(),
            host_name: identity.host_name,
            guest_state: guest_state(&power.state),
            os: identity.full_name.map(|m| m.default_message),
            name: info.name,
            instance_id,
            interfaces,
        })
    }

    fn describe(&self, vm: &VmSummary) -> String {
        format!("{} ({})", vm.name, vm.vm)
    }
}
