use crate::core::{AssetRecord, HandleStream, InventorySource, PipelineError, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

/// One non-blank line of a replay file.
#[derive(Debug, Clone)]
pub struct ReplayLine {
    pub line_no: usize,
    pub raw: String,
}

/// Replays records from a JSON-lines file written by the JSON file sink.
pub struct JsonLinesSource {
    file_path: PathBuf,
}

impl JsonLinesSource {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl InventorySource for JsonLinesSource {
    type Handle = ReplayLine;

    async fn connect(&mut self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.file_path).await.map_err(|e| {
            PipelineError::SourceConnect(format!("{}: {e}", self.file_path.display()))
        })?;
        if !metadata.is_file() {
            return Err(PipelineError::SourceConnect(format!(
                "{} is not a file",
                self.file_path.display()
            )));
        }
        Ok(())
    }

    async fn iterate(&self) -> Result<HandleStream<ReplayLine>> {
        let file = File::open(&self.file_path).await?;
        let reader = BufReader::new(file);
        let lines = LinesStream::new(reader.lines());

        let stream = lines.enumerate().filter_map(|(index, line_result)| async move {
            match line_result {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(Ok(ReplayLine {
                    line_no: index + 1,
                    raw: line,
                })),
                Err(e) => Some(Err(PipelineError::Io(e))),
            }
        });

        Ok(Box::pin(stream))
    }

    async fn extract(&self, handle: &ReplayLine) -> Result<AssetRecord> {
        serde_json::from_str(&handle.raw)
            .map_err(|e| PipelineError::extract(self.describe(handle), e))
    }

    fn describe(&self, handle: &ReplayLine) -> String {
        format!("{}:{}", self.file_path.display(), handle.line_no)
    }
}
