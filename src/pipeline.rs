use crate::core::{InventorySource, PipelineError, Result, Sink};
use crate::duplicates::{DuplicateGroup, DuplicateTracker};
use futures::StreamExt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Configured,
    Connected,
    Streaming,
    Finalized,
}

impl PipelineState {
    fn as_str(self) -> &'static str {
        match self {
            PipelineState::Configured => "configured",
            PipelineState::Connected => "connected",
            PipelineState::Streaming => "streaming",
            PipelineState::Finalized => "finalized",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entities pulled from the source, whether or not extraction succeeded.
    pub attempted: usize,
    pub extracted: usize,
    pub extraction_failures: usize,
    pub consume_failures: usize,
    pub finalize_failures: usize,
    /// Set when the source could not list its entities; sinks were still
    /// finalized with whatever they had.
    pub source_error: Option<String>,
    /// Sinks that failed to connect and received nothing.
    pub inactive_sinks: Vec<String>,
    pub duplicates: Vec<DuplicateGroup>,
}

struct SinkSlot {
    sink: Box<dyn Sink>,
    active: bool,
}

/// Fans every record from one inventory source out to all connected sinks.
pub struct Pipeline<S: InventorySource> {
    source: S,
    sinks: Vec<SinkSlot>,
    tracker: Option<DuplicateTracker>,
    state: PipelineState,
    summary: RunSummary,
}

impl<S: InventorySource> Pipeline<S> {
    pub fn new(source: S, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            source,
            sinks: sinks
                .into_iter()
                .map(|sink| SinkSlot {
                    sink,
                    active: false,
                })
                .collect(),
            tracker: None,
            state: PipelineState::Configured,
            summary: RunSummary::default(),
        }
    }

    pub fn with_duplicate_tracker(mut self, tracker: DuplicateTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run(mut self) -> Result<RunSummary> {
        self.connect().await?;
        self.stream().await?;
        self.finalize().await
    }

    /// Connects the source, then every sink in configuration order. Only the
    /// source connection may fail the run; a sink that cannot connect is
    /// left inactive.
    pub async fn connect(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Configured)?;

        self.source.connect().await.map_err(|e| match e {
            PipelineError::SourceConnect(_) => e,
            other => PipelineError::SourceConnect(other.to_string()),
        })?;

        for slot in &mut self.sinks {
            match slot.sink.connect().await {
                Ok(()) => {
                    info!(sink = slot.sink.name(), "sink connected");
                    slot.active = true;
                }
                Err(e) => {
                    error!(
                        sink = slot.sink.name(),
                        error = %e,
                        "sink failed to connect, disabling it"
                    );
                    self.summary.inactive_sinks.push(slot.sink.name().to_string());
                }
            }
        }

        self.state = PipelineState::Connected;
        Ok(())
    }

    pub async fn stream(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Connected)?;
        self.state = PipelineState::Streaming;

        let mut handles = match self.source.iterate().await {
            Ok(handles) => handles,
            Err(e) => {
                error!(error = %e, "failed to list inventory, finalizing sinks without records");
                self.summary.source_error = Some(e.to_string());
                return Ok(());
            }
        };

        while let Some(handle_result) = handles.next().await {
            self.summary.attempted += 1;

            let handle = match handle_result {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "failed to enumerate entity, skipping");
                    self.summary.extraction_failures += 1;
                    continue;
                }
            };

            let record = match self.source.extract(&handle).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        vm = %self.source.describe(&handle),
                        error = %e,
                        "extraction failed, skipping"
                    );
                    self.summary.extraction_failures += 1;
                    continue;
                }
            };
            self.summary.extracted += 1;
            debug!(vm = %record.name, "extracted");

            for slot in self.sinks.iter_mut().filter(|slot| slot.active) {
                if let Err(e) = slot.sink.consume(&record).await {
                    error!(
                        sink = slot.sink.name(),
                        vm = %record.name,
                        error = %e,
                        "sink rejected record"
                    );
                    self.summary.consume_failures += 1;
                }
            }

            if let Some(tracker) = self.tracker.as_mut() {
                tracker.observe(&record);
            }

            info!(count = self.summary.attempted, vm = %record.name, "processed");
        }

        Ok(())
    }

    pub async fn finalize(&mut self) -> Result<RunSummary> {
        self.expect_state(PipelineState::Streaming)?;

        for slot in self.sinks.iter_mut().filter(|slot| slot.active) {
            if let Err(e) = slot.sink.finalize().await {
                error!(sink = slot.sink.name(), error = %e, "sink failed to finalize");
                self.summary.finalize_failures += 1;
            }
        }

        if let Some(tracker) = &self.tracker {
            self.summary.duplicates = tracker.report();
            for group in &self.summary.duplicates {
                warn!(
                    key = %group.key,
                    count = group.count,
                    mode = %tracker.mode(),
                    "duplicate key"
                );
            }
        }

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "failed to close inventory source");
        }

        self.state = PipelineState::Finalized;
        info!(
            attempted = self.summary.attempted,
            extracted = self.summary.extracted,
            "Done! Collected info from {} hosts.",
            self.summary.attempted
        );
        Ok(self.summary.clone())
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::State {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }
}
