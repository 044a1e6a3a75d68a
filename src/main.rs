use clap::Parser;
use anyhow::{Context, Result};
use async_trait::async_trait;

use appwatch::{
    cli::{Cli, OutputFormat},
    shutdown_channel, ChangeKind, ExtensionChangeEvent, FileWatcher, Orchestrator,
    ReconciliationResult, SnapshotLoader, Subscriber, TomlAppLoader, WatchError,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let config = cli.engine_config()?;
    let watch_path = cli.get_watch_path();
    tracing::info!("Starting appwatch on: {}", watch_path.display());

    let loader = TomlAppLoader::new(config.loader.clone());
    let app = loader
        .load(&watch_path, &cli.loader_inputs())
        .await
        .map_err(WatchError::from)?;
    tracing::info!(
        "Loaded {} extensions from {}",
        app.extensions().len(),
        app.configuration_path.display()
    );

    let mut orchestrator = Orchestrator::new(app, loader);
    orchestrator.subscribe(Printer {
        format: cli.output.clone(),
        no_color: cli.no_color,
    });

    let watcher = FileWatcher::start(orchestrator.app(), &config, orchestrator.sender())?;

    let (trigger, signal) = shutdown_channel();
    ctrlc::set_handler(move || trigger.trigger()).context("Failed to install Ctrl+C handler")?;

    let outcome = orchestrator.run(signal).await;
    drop(watcher);

    match outcome {
        Ok(app) => {
            tracing::info!("Stopped with {} extensions", app.extensions().len());
            Ok(())
        }
        Err(err) if err.is_fatal() => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

/// Prints every delivered result to stdout.
struct Printer {
    format: OutputFormat,
    no_color: bool,
}

#[async_trait]
impl Subscriber for Printer {
    async fn on_result(&self, result: &ReconciliationResult) -> Result<()> {
        match self.format {
            OutputFormat::Json => print_json_result(result)?,
            OutputFormat::Text => print_text_result(result, self.no_color),
            OutputFormat::Compact => print_compact_result(result),
        }
        Ok(())
    }
}

fn print_json_result(result: &ReconciliationResult) -> Result<()> {
    let events: Vec<_> = result
        .events
        .iter()
        .map(|event| {
            serde_json::json!({
                "kind": event.kind.as_str(),
                "handle": event.extension.handle,
                "type": event.extension.extension_type(),
                "directory": event.extension.directory,
                "configuration_path": event.extension.configuration_path,
            })
        })
        .collect();

    let line = serde_json::json!({
        "timestamp": chrono::Local::now().to_rfc3339(),
        "latency_ms": result.elapsed().as_secs_f64() * 1000.0,
        "extensions": result.app.extensions().len(),
        "events": events,
    });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn print_text_result(result: &ReconciliationResult, no_color: bool) {
    let time_str = chrono::Local::now().format("%H:%M:%S");

    for event in &result.events {
        let label = event_label(event);
        if no_color {
            println!("[{}] {} {}", time_str, label, event.extension.handle);
        } else {
            let color = match event.kind {
                ChangeKind::Created => "\x1b[32m",           // Green
                ChangeKind::Updated => "\x1b[33m",           // Yellow
                ChangeKind::UpdatedSourceFile => "\x1b[36m", // Cyan
                ChangeKind::Deleted => "\x1b[31m",           // Red
            };
            println!("[{}] {}{}\x1b[0m {}", time_str, color, label, event.extension.handle);
        }
    }
}

fn print_compact_result(result: &ReconciliationResult) {
    for event in &result.events {
        let kind = match event.kind {
            ChangeKind::Created => "C",
            ChangeKind::Updated => "U",
            ChangeKind::UpdatedSourceFile => "S",
            ChangeKind::Deleted => "D",
        };
        println!("{} {}", kind, event.extension.handle);
    }
}

fn event_label(event: &ExtensionChangeEvent) -> &'static str {
    match event.kind {
        ChangeKind::Created => "CREATED",
        ChangeKind::Updated => "UPDATED",
        ChangeKind::UpdatedSourceFile => "REBUILD",
        ChangeKind::Deleted => "DELETED",
    }
}
