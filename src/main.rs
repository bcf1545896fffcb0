use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vmsweep::config::Cli;
use vmsweep::source::{JsonLinesSource, VsphereSource};
use vmsweep::{DuplicateTracker, InventorySource, Pipeline, RunSummary, Sink};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let sinks = cli.build_sinks().assemble(broker_sink(&cli)?);
    let tracker = cli.duplicate_tracker();
    if let Some(tracker) = &tracker {
        info!(mode = %tracker.mode(), "duplicate detection enabled");
    }

    let outcome = match &cli.replay {
        Some(path) => {
            info!(path = %path.display(), "replaying inventory file");
            run(JsonLinesSource::new(path), sinks, tracker).await
        }
        None => {
            let password = resolve_password(&cli)?;
            let config = cli.vsphere_config(password)?;
            run(VsphereSource::new(config), sinks, tracker).await
        }
    };

    match outcome {
        Ok(summary) => {
            report(&summary);
            match summary.source_error {
                Some(e) => anyhow::bail!("inventory listing failed: {e}"),
                None => Ok(()),
            }
        }
        Err(e) if e.is_fatal() => {
            error!(error = %e, "unable to connect");
            eprintln!("Unable to connect: {e}");
            std::process::exit(1);
        }
        Err(e) => Err(e).context("inventory run failed"),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run<S: InventorySource>(
    source: S,
    sinks: Vec<Box<dyn Sink>>,
    tracker: Option<DuplicateTracker>,
) -> vmsweep::Result<RunSummary> {
    let mut pipeline = Pipeline::new(source, sinks);
    if let Some(tracker) = tracker {
        pipeline = pipeline.with_duplicate_tracker(tracker);
    }
    pipeline.run().await
}

fn resolve_password(cli: &Cli) -> Result<String> {
    if let Some(password) = cli.password().context("failed to read password")? {
        return Ok(password);
    }
    let prompt = format!(
        "Please enter password for host {} and user {}:",
        cli.vsphere.vhost.as_deref().unwrap_or_default(),
        cli.vsphere.user.as_deref().unwrap_or_default()
    );
    inquire::Password::new(&prompt)
        .without_confirmation()
        .prompt()
        .context("failed to read password")
}

#[cfg(feature = "kafka")]
fn broker_sink(cli: &Cli) -> Result<Option<Box<dyn Sink>>> {
    use vmsweep::sink::{BrokerSink, KafkaTransport};

    if cli.kafka.kafka_brokers.is_empty() {
        return Ok(None);
    }
    let transport =
        KafkaTransport::new(cli.kafka.kafka_brokers.clone(), cli.kafka.kafka_compression);
    Ok(Some(Box::new(BrokerSink::new(
        transport,
        cli.kafka.kafka_topic.clone(),
        cli.kafka.ip_split,
    ))))
}

#[cfg(not(feature = "kafka"))]
fn broker_sink(cli: &Cli) -> Result<Option<Box<dyn Sink>>> {
    if cli.kafka.kafka_brokers.is_empty() {
        Ok(None)
    } else {
        anyhow::bail!("Kafka output requested but vmsweep was built without the `kafka` feature")
    }
}

fn report(summary: &RunSummary) {
    for group in &summary.duplicates {
        println!("{group}");
    }
    if !summary.inactive_sinks.is_empty() {
        warn!(sinks = ?summary.inactive_sinks, "some outputs were skipped for the whole run");
    }
    info!(
        extracted = summary.extracted,
        extraction_failures = summary.extraction_failures,
        consume_failures = summary.consume_failures,
        finalize_failures = summary.finalize_failures,
        "run complete"
    );
}
