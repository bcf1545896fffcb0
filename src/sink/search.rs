use crate::core::{AssetRecord, BatchOutcome, PipelineError, Result, Sink, format_timestamp};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of every indexed document.
#[derive(Debug, Serialize)]
struct IndexDocument<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    info: &'a AssetRecord,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    create: Option<BulkItemResult>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Pushes records into an Elasticsearch-compatible index with `create`
/// semantics: a document id that already exists is an error.
pub struct SearchIndexSink {
    name: String,
    host: String,
    index: String,
    timeout: Duration,
    client: Option<Client>,
}

impl SearchIndexSink {
    pub fn new(host: impl Into<String>, index: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: format!("search:{host}"),
            host,
            index: index.into(),
            timeout: REQUEST_TIMEOUT,
            client: None,
        }
    }

    /// One document per VM per sweep.
    pub fn document_id(record: &AssetRecord) -> String {
        format!("{}-{}", record.instance_id, format_timestamp(&record.timestamp))
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| PipelineError::Sink(format!("{} is not connected", self.name)))
    }

    /// `host` may be a bare `name[:port]`, in which case plain http is used.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let raw = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        };
        let mut url = Url::parse(&raw).map_err(|e| {
            PipelineError::Config(format!("invalid search host '{}': {e}", self.host))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                PipelineError::Config(format!("search host '{}' cannot be a base", self.host))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn document<'a>(record: &'a AssetRecord) -> IndexDocument<'a> {
        IndexDocument {
            timestamp: format_timestamp(&Utc::now()),
            info: record,
        }
    }
}

#[async_trait]
impl Sink for SearchIndexSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let url = self.url(&[])?;
        client.get(url).send().await?.error_for_status()?;
        info!(host = %self.host, index = %self.index, "connected to search backend");
        self.client = Some(client);
        Ok(())
    }

    async fn consume(&mut self, record: &AssetRecord) -> Result<()> {
        let id = Self::document_id(record);
        let url = self.url(&[self.index.as_str(), "_create", id.as_str()])?;

        let response = self
            .client()?
            .put(url)
            .json(&Self::document(record))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                debug!(vm = %record.name, id = %id, "indexed");
                Ok(())
            }
            StatusCode::CONFLICT => Err(PipelineError::Transport(format!(
                "document {id} already exists in {}",
                self.index
            ))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PipelineError::Transport(format!("index returned {status}: {body}")))
            }
        }
    }

    async fn consume_batch(&mut self, records: &[AssetRecord]) -> Result<BatchOutcome> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut body = String::new();
        for record in records {
            let id = Self::document_id(record);
            let action = json!({ "create": { "_index": self.index, "_id": id } });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&Self::document(record))?);
            body.push('\n');
        }

        let url = self.url(&["_bulk"])?;
        let response: BulkResponse = self
            .client()?
            .post(url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut outcome = BatchOutcome::default();
        for (record, item) in records.iter().zip(response.items.iter()) {
            match &item.create {
                Some(result) if result.status < 300 => outcome.succeeded += 1,
                Some(result) => {
                    error!(
                        sink = %self.name,
                        vm = %record.name,
                        status = result.status,
                        error = ?result.error,
                        "bulk item failed"
                    );
                    outcome.failed += 1;
                }
                None => {
                    error!(sink = %self.name, vm = %record.name, "bulk item missing create result");
                    outcome.failed += 1;
                }
            }
        }
        // items the backend never answered for
        outcome.failed += records.len().saturating_sub(response.items.len());

        if response.errors {
            debug!(failed = outcome.failed, "bulk request reported errors");
        }
        Ok(outcome)
    }
}
