use proc_macro::TokenStream;

mod progress;

/// Attaches an indicatif spinner message to the function's `tracing` span.
///
/// The function must be instrumented (an `#[instrument]` attribute is added
/// when missing) so `tracing-indicatif` can render the span as a spinner.
///
/// Arguments:
/// - `message = <expr>`: spinner text shown while the function runs.
/// - `finished = <expr>`: text left behind when the span closes.
#[proc_macro_attribute]
pub fn progress(attr: TokenStream, item: TokenStream) -> TokenStream {
    progress::expand(attr, item)
}
