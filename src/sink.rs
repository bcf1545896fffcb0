pub mod broker;
pub mod console;
pub mod export;
pub mod file;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod search;

pub use self::broker::{BrokerSink, BrokerTransport, Compression};
pub use self::console::ConsoleSink;
pub use self::export::{ExportEntry, FlatExportSink};
pub use self::file::{FileFormat, FileSink};
#[cfg(feature = "kafka")]
pub use self::kafka::KafkaTransport;
pub use self::search::SearchIndexSink;
