use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::read::ReadArgs;
use crate::cli::scan::ScanArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{BackendKind, FakeBackendConfig, NotificationScript, ScanFixture};
use crate::uuid::CharUuid;

/// Command-line options for the scale reader.
#[derive(Debug, Parser)]
#[command(
    name = "scale-sync",
    about = "Read body-composition measurements from BLE smart scales."
)]
pub struct Args {
    /// BLE library to use; `auto` picks the native one for this OS.
    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Auto)]
    backend: BackendKind,
    /// Log level for this tool's own events; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Uses the fake BLE backend driven by fixtures instead of a radio.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake advertisements in the form `address|name|uuids|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake notifications in the form `uuid=hex,...`, delivered in order.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationScript>,
    /// Characteristics the fake scale accepts writes on.
    #[arg(long, global = true, requires = "fake", value_delimiter = ',', value_parser = parse_uuid)]
    fake_writable: Vec<CharUuid>,
    /// Number of connect attempts the fake scale rejects.
    #[arg(long, global = true, requires = "fake")]
    fake_connect_failures: Option<u32>,
    /// Delay before fake devices become visible (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            backend: BackendKind::Auto,
            log_level: None,
            output_format: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_writable: Vec::new(),
            fake_connect_failures: None,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Switches to the fake backend with pre-parsed fixtures.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            writable,
            connect_failures,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_writable = writable;
        self.fake_connect_failures = Some(connect_failures);
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Splits parsed arguments into the command and optional fake settings.
    ///
    /// # Errors
    ///
    /// Returns an error if fake mode is enabled without a scan fixture.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_writable,
            fake_connect_failures,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                writable: fake_writable,
                connect_failures: fake_connect_failures.unwrap_or_default(),
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationScript>,
    #[builder(default)]
    writable: Vec<CharUuid>,
    #[builder(default)]
    connect_failures: u32,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            notifications,
            writable,
            connect_failures,
            discovery_delay,
        } = self;

        FakeBackendConfig::builder()
            .scan(scan_fixture)
            .notifications(notifications.unwrap_or_default())
            .writable(writable)
            .connect_failures(connect_failures)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List advertising devices and the scale adapter that would claim each.
    Scan(ScanArgs),
    /// Wait for one measurement from a scale and print its body composition.
    Read(ReadArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command results on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables.
    Pretty,
    /// JSON using the camelCase field names exporters consume.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

fn parse_uuid(value: &str) -> Result<CharUuid, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("uuid cannot be empty".to_string());
    }
    Ok(CharUuid::new(value))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    const SCAN: &str = "AA:BB:CC:DD:EE:FF|QN-Scale|ffe0|-61";

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let error = Args::try_parse_from(["scale-sync", "--fake", "scan"])
            .expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let error = Args::try_parse_from(["scale-sync", "--fake-connect-failures", "2", "scan"])
            .expect_err("fake flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn malformed_fixture_is_a_value_error() {
        let error = Args::try_parse_from(["scale-sync", "--fake", "--fake-scan", "AA|QN", "scan"])
            .expect_err("malformed fixture should fail");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let args = Args::try_parse_from([
            "scale-sync",
            "--fake",
            "--fake-scan",
            SCAN,
            "--fake-writable",
            "ffe3,fff2",
            "--fake-connect-failures",
            "2",
            "scan",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = args
            .into_command_and_fake_args()
            .expect("fake settings should resolve");
        assert_matches!(command, Command::Scan(_));
        let fake_args = fake_args.expect("fake mode should produce fake settings");
        assert_eq!(2, fake_args.connect_failures);
        assert_eq!(
            vec![CharUuid::new("ffe3"), CharUuid::new("fff2")],
            fake_args.writable
        );
    }

    #[test]
    fn backend_defaults_to_auto_and_accepts_overrides() {
        let args = Args::try_parse_from(["scale-sync", "scan"]).expect("scan should parse");
        assert_eq!(BackendKind::Auto, args.backend());

        let args = Args::try_parse_from(["scale-sync", "--backend", "btleplug", "scan"])
            .expect("explicit backend should parse");
        assert_eq!(BackendKind::Btleplug, args.backend());
    }

    #[test]
    fn fake_backend_is_not_selectable_by_name() {
        let error = Args::try_parse_from(["scale-sync", "--backend", "fake", "scan"])
            .expect_err("fake is only reachable through --fake");
        assert_eq!(ErrorKind::InvalidValue, error.kind());
    }
}
