use std::io;
use std::time::Duration;

use anyhow::Result;
use bon::Builder;
use clap::Args;
use tokio::signal;
use tracing::{debug, instrument};

use crate::adapters::AdapterRegistry;
use crate::app::{Measurement, MeasurementHandler};
use crate::cli::OutputFormat;
use crate::cli::command::parse_duration;
use crate::error::CliConfigError;
use crate::hw::{ScaleConnector, ScanOptions, SessionTimeouts};
use crate::measurement::{Gender, UserProfile, WeightUnit};
use crate::terminal::TerminalClient;

use super::ui::{CompositionView, Painter, RawReadingView};

/// Arguments for the `read` command.
#[derive(Debug, Args, Builder)]
pub struct ReadArgs {
    /// Height in centimetres.
    #[arg(long)]
    height: Option<f64>,
    /// Age in years.
    #[arg(long)]
    age: Option<u32>,
    /// `male` or `female`.
    #[arg(long)]
    gender: Option<Gender>,
    /// Uses the athlete variants of the composition formulas.
    #[arg(long)]
    #[builder(default)]
    athlete: bool,
    /// Unit the scale is set to display (`kg` or `lbs`).
    #[arg(long, default_value_t = WeightUnit::Kg)]
    #[builder(default)]
    unit: WeightUnit,
    /// Connects to this hardware address instead of the first supported scale.
    #[arg(long)]
    #[builder(into)]
    mac: Option<String>,
    /// Restricts matching to these adapters, e.g. `qn,xiaomi`.
    #[arg(long = "adapter", value_delimiter = ',')]
    #[builder(default)]
    adapters: Vec<String>,
    /// Gives up discovery after this long (default `2m`).
    #[arg(long, value_parser = parse_duration)]
    discovery_timeout: Option<Duration>,
    /// Prints the final weight and impedance without computing metrics.
    #[arg(long)]
    #[builder(default)]
    raw: bool,
}

impl ReadArgs {
    pub(crate) fn profile(&self) -> Result<UserProfile, CliConfigError> {
        let (Some(height_cm), Some(age_years), Some(gender)) = (self.height, self.age, self.gender)
        else {
            return Err(CliConfigError::IncompleteProfile);
        };
        Ok(UserProfile::builder()
            .height_cm(height_cm)
            .age_years(age_years)
            .gender(gender)
            .is_athlete(self.athlete)
            .build())
    }

    pub(crate) fn registry(&self) -> Result<AdapterRegistry, CliConfigError> {
        if self.adapters.is_empty() {
            return Ok(AdapterRegistry::default());
        }
        let known: Vec<&str> = AdapterRegistry::default().names().collect();
        if let Some(unknown) = self
            .adapters
            .iter()
            .find(|name| !known.contains(&name.as_str()))
        {
            return Err(CliConfigError::UnknownAdapter {
                name: unknown.clone(),
                known: known.join(", "),
            });
        }
        let names: Vec<&str> = self.adapters.iter().map(String::as_str).collect();
        Ok(AdapterRegistry::only(&names))
    }

    pub(crate) fn scan_options(&self) -> Result<ScanOptions, CliConfigError> {
        let mut timeouts = SessionTimeouts::default();
        if let Some(discovery) = self.discovery_timeout {
            timeouts.discovery = discovery;
        }
        Ok(ScanOptions::builder()
            .maybe_target_mac(self.mac.clone())
            .adapters(self.registry()?)
            .profile(self.profile()?)
            .weight_unit(self.unit)
            .timeouts(timeouts)
            .build())
    }
}

/// Executes the `read` command. Ctrl+C cancels the session.
#[instrument(skip_all, level = "info", fields(raw = args.raw, mac = ?args.mac))]
pub(crate) async fn run<W>(
    connector: &dyn ScaleConnector,
    args: &ReadArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let options = args.scan_options()?;
    let cancel = options.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            debug!("interrupt received; cancelling session");
            cancel.cancel();
        }
    });
    let outcome = MeasurementHandler::new(connector)
        .read(options, args.raw)
        .await;
    interrupt.abort();
    let measurement = outcome?;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            match &measurement {
                Measurement::Composition(composition) => writeln!(
                    out,
                    "{}",
                    CompositionView::new(composition, args.unit, &painter)
                )?,
                Measurement::Raw { adapter, reading } => writeln!(
                    out,
                    "{}",
                    RawReadingView::new(adapter, reading, args.unit, &painter)
                )?,
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &measurement)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
