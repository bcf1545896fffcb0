//! Command line configuration and sink construction.

use crate::core::{PipelineError, Result, Sink};
use crate::duplicates::{DuplicateMode, DuplicateTracker};
use crate::sink::{Compression, ConsoleSink, FileFormat, FileSink, FlatExportSink, SearchIndexSink};
use crate::source::VsphereConfig;
use clap::{Args, Parser};
use std::path::PathBuf;

pub const PASSWORD_ENV: &str = "VMSWEEP_PASSWORD";

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Inventories vSphere VMs and republishes them to Elasticsearch, Kafka, files or stdout",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub vsphere: VsphereArgs,

    /// Replay a JSON-lines file written by a previous run instead of querying vSphere
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    #[command(flatten)]
    pub search: SearchArgs,

    #[command(flatten)]
    pub kafka: KafkaArgs,

    #[command(flatten)]
    pub file: FileArgs,

    #[command(flatten)]
    pub export: ExportArgs,

    /// Enable duplicate hostname and IP address detection
    #[arg(long = "duplicates")]
    pub duplicate_detection: bool,

    /// Duplicate detection mode: hostname, ip or all (all groups by hostname)
    #[arg(long, default_value = "all", value_parser = parse_duplicate_mode)]
    pub duplicate_mode: DuplicateMode,

    /// Print records to stdout (the default when no other output is configured)
    #[arg(long, visible_alias = "console")]
    pub stdout: bool,

    /// Pretty-print console output
    #[arg(long)]
    pub pretty: bool,

    /// Log progress information
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct VsphereArgs {
    /// vSphere service address to connect to
    #[arg(short = 's', long, required_unless_present = "replay")]
    pub vhost: Option<String>,

    /// vSphere port to connect on
    #[arg(long, default_value_t = 443)]
    pub vport: u16,

    /// Disable TLS certificate verification
    #[arg(long)]
    pub disable_ssl_verification: bool,

    /// User name for vSphere
    #[arg(short, long, required_unless_present = "replay")]
    pub user: Option<String>,

    /// Password for vSphere; prompted for when not given any other way
    #[arg(short, long)]
    pub password: Option<String>,

    /// Read the password from a file
    #[arg(long, value_name = "FILE", conflicts_with = "password")]
    pub password_file: Option<PathBuf>,

    /// VM folder to scan recursively, relative to the datacenter VM root (no leading /)
    #[arg(short, long, required_unless_present = "replay")]
    pub folder: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Elasticsearch host URL(s); each host gets its own copy of every record
    #[arg(long = "es-hosts", num_args = 1.., value_name = "URL")]
    pub es_hosts: Vec<String>,

    /// Elasticsearch index name
    #[arg(short, long, default_value = "vmware-assets")]
    pub index: String,
}

#[derive(Args, Debug, Clone)]
pub struct KafkaArgs {
    /// Kafka broker(s)
    #[arg(
        long = "kafka-brokers",
        visible_alias = "kafka-hosts",
        num_args = 1..,
        value_name = "HOST"
    )]
    pub kafka_brokers: Vec<String>,

    /// Kafka topic to publish to
    #[arg(long, default_value = "vmware-assets")]
    pub kafka_topic: String,

    /// Compression codec: gzip, lz4 or snappy
    #[arg(long, default_value = "gzip", value_parser = parse_compression)]
    pub kafka_compression: Compression,

    /// Publish one message per interface address
    #[arg(long = "kafka-ip-split")]
    pub ip_split: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FileArgs {
    /// File to dump the collected records into
    #[arg(short = 'o', long = "output", visible_alias = "file", value_name = "PATH")]
    pub file_path: Option<PathBuf>,

    /// Dump file format: json or yaml
    #[arg(long, default_value = "json", value_parser = parse_file_format)]
    pub file_format: FileFormat,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Write a WISE compatible flat JSON export
    #[arg(short = 'w', long = "wise", value_name = "PATH")]
    pub wise_path: Option<PathBuf>,

    /// Add OS, hostname and MAC fields to the flat export
    #[arg(long = "wise-full-dump")]
    pub full: bool,
}

fn parse_duplicate_mode(s: &str) -> std::result::Result<DuplicateMode, String> {
    s.parse().map_err(|e: PipelineError| e.to_string())
}

fn parse_compression(s: &str) -> std::result::Result<Compression, String> {
    s.parse().map_err(|e: PipelineError| e.to_string())
}

fn parse_file_format(s: &str) -> std::result::Result<FileFormat, String> {
    s.parse().map_err(|e: PipelineError| e.to_string())
}

impl Cli {
    pub fn console_enabled(&self) -> bool {
        let others = !self.search.es_hosts.is_empty()
            || !self.kafka.kafka_brokers.is_empty()
            || self.file.file_path.is_some()
            || self.export.wise_path.is_some();
        self.stdout || !others
    }

    pub fn duplicate_tracker(&self) -> Option<DuplicateTracker> {
        self.duplicate_detection
            .then(|| DuplicateTracker::new(self.duplicate_mode))
    }

    /// Connection settings, given an already resolved password.
    pub fn vsphere_config(&self, password: String) -> Result<VsphereConfig> {
        let required = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .ok_or_else(|| PipelineError::Config(format!("--{flag} is required")))
        };
        Ok(VsphereConfig {
            host: required(&self.vsphere.vhost, "vhost")?,
            port: self.vsphere.vport,
            user: required(&self.vsphere.user, "user")?,
            password,
            disable_ssl_verification: self.vsphere.disable_ssl_verification,
            folder: required(&self.vsphere.folder, "folder")?,
        })
    }

    /// Password from the flag, the password file or the environment, in
    /// that order. `None` means the caller has to prompt.
    pub fn password(&self) -> Result<Option<String>> {
        if let Some(password) = &self.vsphere.password {
            return Ok(Some(password.clone()));
        }
        if let Some(path) = &self.vsphere.password_file {
            let raw = std::fs::read_to_string(path)?;
            return Ok(Some(raw.replace(['\n', '\r'], "")));
        }
        Ok(std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty()))
    }

    /// Every configured sink except the broker, in configuration order
    /// (search hosts, file, flat export, console). The broker sink depends
    /// on the compiled transport and is slotted in by the caller.
    pub fn build_sinks(&self) -> SinkSet {
        let search = self
            .search
            .es_hosts
            .iter()
            .map(|host| {
                Box::new(SearchIndexSink::new(host.clone(), self.search.index.clone()))
                    as Box<dyn Sink>
            })
            .collect();

        let mut rest: Vec<Box<dyn Sink>> = Vec::new();
        if let Some(path) = &self.file.file_path {
            rest.push(Box::new(FileSink::new(path, self.file.file_format)));
        }
        if let Some(path) = &self.export.wise_path {
            rest.push(Box::new(FlatExportSink::new(path, self.export.full)));
        }
        if self.console_enabled() {
            rest.push(Box::new(ConsoleSink::stdout(self.pretty)));
        }

        SinkSet { search, rest }
    }
}

/// Sinks split around the broker slot.
pub struct SinkSet {
    pub search: Vec<Box<dyn Sink>>,
    pub rest: Vec<Box<dyn Sink>>,
}

impl SinkSet {
    pub fn assemble(self, broker: Option<Box<dyn Sink>>) -> Vec<Box<dyn Sink>> {
        let mut sinks = self.search;
        sinks.extend(broker);
        sinks.extend(self.rest);
        sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vmsweep").chain(args.iter().copied())).unwrap()
    }

    const VSPHERE: [&str; 6] = ["--vhost", "vc.local", "--user", "reader", "--folder", "Prod/Web"];

    #[test]
    fn console_is_default_output() {
        let cli = parse(&VSPHERE);
        assert!(cli.console_enabled());
        let sinks = cli.build_sinks().assemble(None);
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].name(), "console");
    }

    #[test]
    fn sinks_follow_configuration_order() {
        let mut args = VSPHERE.to_vec();
        args.extend([
            "--es-hosts", "http://es1:9200", "http://es2:9200",
            "--output", "/tmp/out.yaml", "--file-format", "yaml",
            "--wise", "/tmp/wise.json", "--stdout",
        ]);
        let cli = parse(&args);
        let names: Vec<String> = cli
            .build_sinks()
            .assemble(None)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "search:http://es1:9200",
                "search:http://es2:9200",
                "file:/tmp/out.yaml",
                "export:/tmp/wise.json",
                "console",
            ]
        );
    }

    #[test]
    fn replay_does_not_need_vsphere_flags() {
        let cli = parse(&["--replay", "inventory.json", "--duplicates", "--duplicate-mode", "ip"]);
        assert_eq!(cli.replay, Some(PathBuf::from("inventory.json")));
        assert_eq!(cli.duplicate_tracker().unwrap().mode(), DuplicateMode::Ip);
    }

    #[test]
    fn missing_vsphere_flags_are_rejected() {
        assert!(Cli::try_parse_from(["vmsweep", "--vhost", "vc.local"]).is_err());
    }

    #[test]
    fn rejects_unknown_choices() {
        let mut args = vec!["vmsweep"];
        args.extend(VSPHERE);
        args.extend(["--kafka-compression", "zstd"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn password_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pw");
        std::fs::write(&path, "hunter2\n").unwrap();

        let mut args = VSPHERE.to_vec();
        let path_arg = path.to_string_lossy().to_string();
        args.extend(["--password-file", path_arg.as_str()]);
        let cli = parse(&args);
        assert_eq!(cli.password().unwrap().as_deref(), Some("hunter2"));

        let config = cli.vsphere_config("hunter2".into()).unwrap();
        assert_eq!(config.folder, "Prod/Web");
        assert_eq!(config.port, 443);
    }

    #[test]
    fn kafka_defaults() {
        let mut args = VSPHERE.to_vec();
        args.extend(["--kafka-hosts", "k1:9092", "k2:9092", "--kafka-ip-split"]);
        let cli = parse(&args);
        assert_eq!(cli.kafka.kafka_brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(cli.kafka.kafka_topic, "vmware-assets");
        assert_eq!(cli.kafka.kafka_compression, Compression::Gzip);
        assert!(cli.kafka.ip_split);
        assert!(!cli.console_enabled());
    }
}
