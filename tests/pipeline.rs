use async_trait::async_trait;
use futures::stream;
use std::io::Write;
use std::sync::{Arc, Mutex};
use vmsweep::sink::{ConsoleSink, FileFormat, FileSink, FlatExportSink};
use vmsweep::{
    AssetRecord, BatchOutcome, DuplicateMode, DuplicateTracker, HandleStream, InventorySource,
    Pipeline, PipelineError, PipelineState, Result, Sink,
};

/// Source over a fixed list; `Err` entries fail extraction.
struct ListSource {
    entries: Vec<std::result::Result<AssetRecord, String>>,
    reachable: bool,
    /// Position in the listing that fails to enumerate.
    enumeration_gap: Option<usize>,
    listing_error: Option<String>,
}

impl ListSource {
    fn new(entries: Vec<std::result::Result<AssetRecord, String>>) -> Self {
        Self {
            entries,
            reachable: true,
            enumeration_gap: None,
            listing_error: None,
        }
    }

    fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(vec![Ok(vm("vm-1", "h1"))])
        }
    }
}

#[async_trait]
impl InventorySource for ListSource {
    type Handle = usize;

    async fn connect(&mut self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(PipelineError::SourceConnect("connection refused".into()))
        }
    }

    async fn iterate(&self) -> Result<HandleStream<usize>> {
        if let Some(reason) = &self.listing_error {
            return Err(PipelineError::Source(anyhow::anyhow!("{reason}")));
        }
        let gap = self.enumeration_gap;
        Ok(Box::pin(stream::iter((0..self.entries.len()).map(move |i| {
            if gap == Some(i) {
                Err(PipelineError::Source(anyhow::anyhow!("folder listing timed out")))
            } else {
                Ok(i)
            }
        }))))
    }

    async fn extract(&self, handle: &usize) -> Result<AssetRecord> {
        self.entries[*handle]
            .clone()
            .map_err(|reason| PipelineError::extract(self.describe(handle), reason))
    }

    fn describe(&self, handle: &usize) -> String {
        format!("entity-{handle}")
    }
}

#[derive(Default)]
struct Calls {
    connected: bool,
    consumed: Vec<String>,
    finalized: usize,
}

struct RecordingSink {
    name: String,
    calls: Arc<Mutex<Calls>>,
    fail_connect: bool,
    fail_on: Option<String>,
    fail_finalize: bool,
}

impl RecordingSink {
    fn new(name: &str) -> (Self, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let sink = Self {
            name: name.to_string(),
            calls: calls.clone(),
            fail_connect: false,
            fail_on: None,
            fail_finalize: false,
        };
        (sink, calls)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(PipelineError::Transport("no route to host".into()));
        }
        self.calls.lock().unwrap().connected = true;
        Ok(())
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        self.calls.lock().unwrap().consumed.push(record.name.clone());
        if self.fail_on.as_deref() == Some(record.name.as_str()) {
            return Err(PipelineError::Sink("rejected".into()));
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.calls.lock().unwrap().finalized += 1;
        if self.fail_finalize {
            return Err(PipelineError::Sink("flush failed".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn vm(name: &str, host_name: &str) -> AssetRecord {
    AssetRecord::new(name, format!("uuid-{name}")).with_host_name(host_name)
}

fn three_vms() -> Vec<std::result::Result<AssetRecord, String>> {
    vec![Ok(vm("vm-1", "h1")), Ok(vm("vm-2", "h2")), Ok(vm("vm-3", "h3"))]
}

#[tokio::test]
async fn failing_sink_does_not_block_the_others() {
    let (mut flaky, flaky_calls) = RecordingSink::new("flaky");
    flaky.fail_on = Some("vm-2".into());
    let (steady, steady_calls) = RecordingSink::new("steady");

    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(flaky), Box::new(steady)];
    let summary = Pipeline::new(ListSource::new(three_vms()), sinks)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.consume_failures, 1);
    assert_eq!(flaky_calls.lock().unwrap().consumed, vec!["vm-1", "vm-2", "vm-3"]);
    assert_eq!(steady_calls.lock().unwrap().consumed, vec!["vm-1", "vm-2", "vm-3"]);
    assert_eq!(flaky_calls.lock().unwrap().finalized, 1);
}

#[tokio::test]
async fn sink_that_cannot_connect_is_skipped_for_the_run() {
    let (mut broken, broken_calls) = RecordingSink::new("broken");
    broken.fail_connect = true;
    let (healthy, healthy_calls) = RecordingSink::new("healthy");

    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(broken), Box::new(healthy)];
    let summary = Pipeline::new(ListSource::new(three_vms()), sinks)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inactive_sinks, vec!["broken"]);
    let broken_calls = broken_calls.lock().unwrap();
    assert!(!broken_calls.connected);
    assert!(broken_calls.consumed.is_empty());
    assert_eq!(broken_calls.finalized, 0);
    assert_eq!(healthy_calls.lock().unwrap().consumed.len(), 3);
}

#[tokio::test]
async fn records_arrive_in_source_order() {
    let names: Vec<String> = (0..20).map(|i| format!("vm-{i:02}")).collect();
    let entries = names.iter().map(|n| Ok(vm(n, n))).collect();
    let (sink, calls) = RecordingSink::new("ordered");

    Pipeline::new(ListSource::new(entries), vec![Box::new(sink) as Box<dyn Sink>])
        .run()
        .await
        .unwrap();

    assert_eq!(calls.lock().unwrap().consumed, names);
}

#[tokio::test]
async fn extraction_failure_is_skipped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.json");
    let console_out = SharedBuf::default();

    let entries = vec![
        Ok(vm("vm-1", "h1")),
        Err("guest tools not running".to_string()),
        Ok(vm("vm-3", "h3")),
    ];
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(ConsoleSink::new(console_out.clone(), false)),
        Box::new(FileSink::new(&path, FileFormat::Json)),
    ];

    let summary = Pipeline::new(ListSource::new(entries), sinks).run().await.unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.extraction_failures, 1);

    let console = String::from_utf8(console_out.0.lock().unwrap().clone()).unwrap();
    assert_eq!(console.lines().count(), 2);
    let file = std::fs::read_to_string(&path).unwrap();
    let written: Vec<AssetRecord> = file
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(
        written.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        vec!["vm-1", "vm-3"]
    );
}

#[tokio::test]
async fn duplicate_hostnames_are_reported_after_the_run() {
    let entries = vec![Ok(vm("a", "h1")), Ok(vm("b", "h2")), Ok(vm("c", "h1"))];
    let (sink, calls) = RecordingSink::new("sink");

    let summary = Pipeline::new(ListSource::new(entries), vec![Box::new(sink) as Box<dyn Sink>])
        .with_duplicate_tracker(DuplicateTracker::new(DuplicateMode::Hostname))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.duplicates.len(), 1);
    assert_eq!(summary.duplicates[0].key, "h1");
    assert_eq!(summary.duplicates[0].count, 2);
    assert_eq!(calls.lock().unwrap().consumed.len(), 3);
}

#[tokio::test]
async fn unreachable_source_aborts_before_sinks_connect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.json");
    let (sink, calls) = RecordingSink::new("sink");
    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(sink),
        Box::new(FileSink::new(&path, FileFormat::Json)),
    ];

    let err = Pipeline::new(ListSource::unreachable(), sinks).run().await.unwrap_err();

    assert!(err.is_fatal());
    assert!(!calls.lock().unwrap().connected);
    assert!(!path.exists());
}

#[tokio::test]
async fn failing_finalize_does_not_block_the_others() {
    let (mut stuck, stuck_calls) = RecordingSink::new("stuck");
    stuck.fail_finalize = true;
    let (next, next_calls) = RecordingSink::new("next");

    let sinks: Vec<Box<dyn Sink>> = vec![Box::new(stuck), Box::new(next)];
    let summary = Pipeline::new(ListSource::new(three_vms()), sinks)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.finalize_failures, 1);
    assert_eq!(stuck_calls.lock().unwrap().finalized, 1);
    assert_eq!(next_calls.lock().unwrap().finalized, 1);
}

#[tokio::test]
async fn enumeration_error_is_skipped_and_counted() {
    let mut source = ListSource::new(three_vms());
    source.enumeration_gap = Some(1);
    let (sink, calls) = RecordingSink::new("sink");

    let summary = Pipeline::new(source, vec![Box::new(sink) as Box<dyn Sink>])
        .run()
        .await
        .unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.extracted, 2);
    assert_eq!(summary.extraction_failures, 1);
    assert_eq!(calls.lock().unwrap().consumed, vec!["vm-1", "vm-3"]);
}

#[tokio::test]
async fn listing_failure_still_finalizes_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wise.json");
    let mut source = ListSource::new(three_vms());
    source.listing_error = Some("folder 'Prod' not found".into());
    let (sink, calls) = RecordingSink::new("sink");

    let sinks: Vec<Box<dyn Sink>> = vec![
        Box::new(sink),
        Box::new(FlatExportSink::new(&path, false)),
    ];
    let summary = Pipeline::new(source, sinks).run().await.unwrap();

    assert_eq!(summary.attempted, 0);
    assert!(summary.source_error.unwrap().contains("folder 'Prod' not found"));
    assert_eq!(calls.lock().unwrap().finalized, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
}

#[tokio::test]
async fn stages_must_run_in_order() {
    let mut pipeline = Pipeline::new(ListSource::new(three_vms()), Vec::new());
    assert!(matches!(pipeline.stream().await, Err(PipelineError::State { .. })));

    pipeline.connect().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Connected);
    pipeline.stream().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Streaming);
    let summary = pipeline.finalize().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Finalized);
    assert_eq!(summary.attempted, 3);
    assert!(pipeline.connect().await.is_err());
}

#[tokio::test]
async fn default_batch_delivery_reports_each_failure() {
    let (mut sink, calls) = RecordingSink::new("batch");
    sink.fail_on = Some("vm-2".into());
    let records: Vec<AssetRecord> = three_vms().into_iter().map(|r| r.unwrap()).collect();

    let outcome = sink.consume_batch(&records).await.unwrap();

    assert_eq!(outcome, BatchOutcome { succeeded: 2, failed: 1 });
    assert_eq!(calls.lock().unwrap().consumed.len(), 3);
}
