use crate::core::{AssetRecord, PipelineError, Result, Sink};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// One JSON document per line.
    #[default]
    Json,
    /// YAML documents, each opened by a `---` marker.
    Yaml,
}

impl FromStr for FileFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(FileFormat::Json),
            "yaml" | "yml" => Ok(FileFormat::Yaml),
            other => Err(PipelineError::Config(format!("unknown file format '{other}'"))),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Json => write!(f, "json"),
            FileFormat::Yaml => write!(f, "yaml"),
        }
    }
}

pub(crate) async fn create_truncated(path: &Path) -> Result<BufWriter<tokio::fs::File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    Ok(BufWriter::new(file))
}

pub struct FileSink {
    name: String,
    file_path: PathBuf,
    format: FileFormat,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(file_path: P, format: FileFormat) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", file_path.display()),
            file_path,
            format,
            writer: None,
        }
    }

    fn render(&self, record: &AssetRecord) -> Result<String> {
        match self.format {
            FileFormat::Json => {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                Ok(line)
            }
            FileFormat::Yaml => Ok(format!("---\n{}", serde_yaml::to_string(record)?)),
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        if self.writer.is_none() {
            debug!(path = %self.file_path.display(), format = %self.format, "opening output file");
            self.writer = Some(create_truncated(&self.file_path).await?);
        }
        Ok(())
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        let rendered = self.render(record)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PipelineError::Sink(format!("{} is not open", self.name)))?;
        writer.write_all(rendered.as_bytes()).await?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }
}
