use scale_sync_macros::progress;
use tracing::instrument;

#[progress(message = "Weighing")]
#[instrument(level = "info", fields(attempt = 1))]
fn with_fields(weight: f64) -> f64 {
    weight * 2.0
}

#[progress(message = "Weighing", finished = format!("{} done", "scale"))]
#[instrument(skip_all)]
fn without_fields(weight: f64) -> f64 {
    weight + 1.0
}

#[progress(message = format!("Waiting for {}", "qn"))]
fn without_instrument() -> &'static str {
    "ready"
}

#[test]
fn annotated_functions_keep_their_bodies() {
    assert_eq!(160.0, with_fields(80.0));
    assert_eq!(81.0, without_fields(80.0));
    assert_eq!("ready", without_instrument());
}
