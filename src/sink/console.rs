use crate::core::{AssetRecord, Result, Sink};
use async_trait::async_trait;
use std::io::{self, Stdout, Write};

pub struct ConsoleSink<W: Write + Send = Stdout> {
    out: W,
    pretty: bool,
}

impl ConsoleSink<Stdout> {
    pub fn stdout(pretty: bool) -> Self {
        Self::new(io::stdout(), pretty)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W, pretty: bool) -> Self {
        Self { out, pretty }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, record)?;
        } else {
            serde_json::to_writer(&mut self.out, record)?;
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
