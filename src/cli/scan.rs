use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::instrument;

use crate::adapters::AdapterRegistry;
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::hw::ScaleConnector;
use crate::terminal::TerminalClient;

use super::ui::{Painter, ScanResultsView, Spinner};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long to collect advertisements (e.g. `5s`, `1m`).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    duration: Duration,
    /// Lists only devices some scale adapter would claim.
    #[arg(long)]
    scales_only: bool,
}

impl ScanArgs {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            scales_only: false,
        }
    }

    #[must_use]
    pub fn scales_only(mut self) -> Self {
        self.scales_only = true;
        self
    }
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "info", fields(duration = %humantime::format_duration(args.duration)))]
pub(crate) async fn run<W>(
    connector: &dyn ScaleConnector,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let registry = AdapterRegistry::default();
    let spinner = Spinner::new(terminal_client.stderr_is_terminal());
    let message = format!(
        "Listening for advertisements for {}",
        humantime::format_duration(args.duration)
    );
    let mut results = spinner
        .with_spinner(&message, || connector.scan_devices(&registry, args.duration))
        .await?;
    if args.scales_only {
        results.retain(|result| result.adapter.is_some());
    }

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", ScanResultsView::new(&results, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &results)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
