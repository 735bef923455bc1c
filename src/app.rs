use std::io;
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use scale_sync_macros::progress;
use serde::Serialize;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cli::ui::format_weight;
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::error::ScaleError;
use crate::hw::{BackendKind, Connector, FakeBackend, ScaleConnector, ScanOptions, select_backend};
use crate::measurement::{BodyComposition, Reading};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a connector for the requested BLE backend on this OS.
///
/// # Errors
///
/// Returns an error if the backend is unavailable here or fails to start.
pub async fn real_connector(backend: BackendKind) -> Result<Box<dyn ScaleConnector>> {
    Ok(select_backend(backend).await?)
}

/// Creates a connector backed by fake BLE fixtures.
#[must_use]
pub fn fake_connector(fake_args: FakeArgs) -> Box<dyn ScaleConnector> {
    Box::new(Connector::new(FakeBackend::new(
        fake_args.into_backend_config(),
    )))
}

/// The outcome of one `read` session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Measurement {
    Composition(BodyComposition),
    /// Final reading without metrics, for callers that match a user by weight.
    Raw {
        adapter: &'static str,
        #[serde(flatten)]
        reading: Reading,
    },
}

/// Runs one measurement session and reports progress on the terminal.
pub struct MeasurementHandler<'a> {
    connector: &'a dyn ScaleConnector,
}

impl<'a> MeasurementHandler<'a> {
    #[must_use]
    pub fn new(connector: &'a dyn ScaleConnector) -> Self {
        Self { connector }
    }

    /// Waits for a scale, streams until the reading is final and returns it.
    ///
    /// Intermediate readings update the spinner unless the caller supplied
    /// its own live-data callback.
    ///
    /// # Errors
    ///
    /// Returns the session's [`ScaleError`].
    #[progress(
        message = "Step on the scale",
        finished = format!("{} Measurement received", "✓".green()),
    )]
    #[instrument(skip_all, level = "info", fields(backend = %self.connector.backend(), raw = raw))]
    pub async fn read(
        &self,
        mut options: ScanOptions,
        raw: bool,
    ) -> Result<Measurement, ScaleError> {
        if options.on_live_data.is_none() {
            let span = tracing::Span::current();
            let unit = options.weight_unit;
            options.on_live_data = Some(Arc::new(move |reading: &Reading| {
                span.pb_set_message(&format!("Weighing {}", format_weight(reading.weight, unit)));
            }));
        }

        let outcome = if raw {
            self.connector
                .scan_and_read_raw(&options)
                .await
                .map(|measured| Measurement::Raw {
                    adapter: measured.adapter.name(),
                    reading: measured.reading,
                })
        } else {
            self.connector
                .scan_and_read(&options)
                .await
                .map(Measurement::Composition)
        };

        if let Err(error) = &outcome {
            let finish_message = if error.is_aborted() {
                format!("{} Cancelled", "✗".yellow())
            } else {
                format!("{} {error}", "✗".red())
            };
            tracing::Span::current().pb_set_finish_message(&finish_message);
        }
        outcome
    }
}

/// Runs a CLI command against `connector`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = scale_sync::Args::try_parse_from([
///     "scale-sync",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:FF|QN-Scale|ffe0|-61",
///     "scan",
///     "--duration",
///     "1s",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let connector = match maybe_fake_args {
///     Some(fake_args) => scale_sync::fake_connector(fake_args),
///     None => scale_sync::real_connector(scale_sync::BackendKind::Auto).await?,
/// };
/// let mut out = Vec::new();
/// scale_sync::run(command, &mut out, connector.as_ref()).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation, the BLE session or output
/// writing fails.
pub async fn run<W>(command: Command, out: &mut W, connector: &dyn ScaleConnector) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, connector, None, None).await
}

/// Runs a CLI command with explicit log level and output format.
///
/// # Errors
///
/// Returns an error if tracing initialisation, the BLE session or output
/// writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    connector: &dyn ScaleConnector,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(
        command,
        out,
        &SystemTerminalClient,
        connector,
        log_level,
        output_format,
    )
    .await
}

/// Runs a CLI command with every collaborator injected.
///
/// Without an explicit `output_format`, output is pretty on a terminal and
/// JSON otherwise.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct Pipe;
/// impl scale_sync::TerminalClient for Pipe {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = scale_sync::Args::try_parse_from([
///     "scale-sync",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:FF|QN-Scale|ffe0|-61",
///     "--fake-notifications",
///     "ffe1=100A011F400102260212",
///     "--fake-writable",
///     "ffe3",
///     "read",
///     "--height",
///     "180",
///     "--age",
///     "30",
///     "--gender",
///     "male",
/// ])?;
/// let (command, fake_args) = args.into_command_and_fake_args()?;
/// let connector = scale_sync::fake_connector(fake_args.expect("fake mode"));
/// let mut out = Vec::new();
/// scale_sync::run_with_clients(command, &mut out, &Pipe, connector.as_ref(), None, None).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation, the BLE session or output
/// writing fails.
#[instrument(
    skip(out, terminal_client, connector),
    level = "info",
    fields(command = %command_name(&command), backend = %connector.backend())
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    connector: &dyn ScaleConnector,
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "scale-sync",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;
    let output_format = output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(connector, &args, out, terminal_client, output_format).await
        }
        Command::Read(args) => {
            crate::cli::read::run(connector, &args, out, terminal_client, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan(_args) => "scan",
        Command::Read(_args) => "read",
    }
}
