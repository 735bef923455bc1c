use std::fmt::{self, Display, Formatter};

use tabled::builder::Builder;
use tabled::settings::Style;

use super::painter::Painter;

/// A rounded table rendered through `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two columns of metric name and value, names muted.
    pub(crate) fn metrics(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let rows = rows
            .into_iter()
            .map(|(metric, value)| vec![painter.muted(metric), value])
            .collect();
        Self::grid(["metric", "value"], rows)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn grid_renders_headers_then_rows() {
        let table = Table::grid(
            ["address", "rssi"],
            vec![vec!["AA:BB".into(), "-61 dBm".into()]],
        )
        .to_string();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(5, lines.len());
        assert!(lines[1].contains("address"));
        assert!(lines[3].contains("AA:BB"));
        assert!(lines[0].starts_with('╭'));
    }

    #[test]
    fn metrics_table_labels_columns() {
        let painter = Painter::new(false);
        let table = Table::metrics(&painter, vec![("bmi", "24.69".into())]).to_string();
        assert!(table.contains("metric"));
        assert!(table.contains("24.69"));
    }
}
