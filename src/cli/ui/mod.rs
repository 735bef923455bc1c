mod measurement_view;
mod painter;
mod scan_view;
mod spinner;
mod table;

pub(crate) use self::measurement_view::{CompositionView, RawReadingView, format_weight};
pub(crate) use self::painter::Painter;
pub(crate) use self::scan_view::ScanResultsView;
pub(crate) use self::spinner::Spinner;
