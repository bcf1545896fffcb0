//! Flat per-address export, loadable by WISE-style lookup services.

use crate::core::{AssetRecord, PipelineError, Result, Sink, UNKNOWN};
use crate::sink::file::create_truncated;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub asset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    pub ip: String,
}

/// Collects every entry in memory and writes a single JSON array on
/// finalize, so only suitable for bounded inventories.
pub struct FlatExportSink {
    name: String,
    file_path: PathBuf,
    full: bool,
    entries: Vec<ExportEntry>,
    writer: Option<BufWriter<File>>,
}

impl FlatExportSink {
    pub fn new<P: AsRef<Path>>(file_path: P, full: bool) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        Self {
            name: format!("export:{}", file_path.display()),
            file_path,
            full,
            entries: Vec::new(),
            writer: None,
        }
    }

    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    fn flatten(&self, record: &AssetRecord) -> Vec<ExportEntry> {
        let asset = if record.name.is_empty() {
            UNKNOWN.to_string()
        } else {
            record.name.clone()
        };

        record
            .addresses()
            .filter(|(_, ip)| !ip.is_empty())
            .map(|(nic, ip)| {
                let (os, hostname, mac) = if self.full {
                    (
                        Some(record.os_or_unknown().to_string()),
                        Some(record.host_name_or_unknown().to_string()),
                        Some(nic.mac.as_deref().unwrap_or(UNKNOWN).to_string()),
                    )
                } else {
                    (None, None, None)
                };
                ExportEntry {
                    asset: asset.clone(),
                    os,
                    hostname,
                    mac,
                    ip: ip.to_string(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl Sink for FlatExportSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(create_truncated(&self.file_path).await?);
        }
        Ok(())
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        let entries = self.flatten(record);
        debug!(vm = %record.name, entries = entries.len(), "export entries");
        self.entries.extend(entries);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| PipelineError::Sink(format!("{} is not open", self.name)))?;
        let body = serde_json::to_vec(&self.entries)?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }
}
