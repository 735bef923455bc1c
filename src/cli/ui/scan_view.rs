use std::fmt::{self, Display, Formatter};

use crate::hw::ScanResult;
use crate::utils::format_rssi;

use super::painter::{Painter, Tone};
use super::table::Table;

/// Renders `scan` results, strongest signal first.
pub(crate) struct ScanResultsView<'a> {
    results: &'a [ScanResult],
    painter: &'a Painter,
}

impl<'a> ScanResultsView<'a> {
    pub(crate) fn new(results: &'a [ScanResult], painter: &'a Painter) -> Self {
        Self { results, painter }
    }
}

impl Display for ScanResultsView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.results.is_empty() {
            return write!(f, "{}", self.painter.paint("No devices found", Tone::Caution));
        }

        let rows = self
            .results
            .iter()
            .map(|result| {
                let services = result
                    .service_uuids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![
                    self.painter.value(&result.address),
                    result.name.clone().unwrap_or_else(|| "<unknown>".to_string()),
                    format_rssi(result.rssi),
                    match result.adapter {
                        Some(adapter) => self.painter.paint(adapter, Tone::Good),
                        None => self.painter.muted("-"),
                    },
                    services,
                ]
            })
            .collect();
        let claimed = self
            .results
            .iter()
            .filter(|result| result.adapter.is_some())
            .count();

        writeln!(
            f,
            "{}",
            self.painter.heading(format!(
                "{} devices, {claimed} supported",
                self.results.len()
            ))
        )?;
        write!(
            f,
            "{}",
            Table::grid(["address", "name", "rssi", "adapter", "services"], rows)
        )
    }
}
