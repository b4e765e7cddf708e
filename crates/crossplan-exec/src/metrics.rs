//! Stage timing hooks.
//!
//! Compiled in with the `metrics` feature; a no-op otherwise. Exporters
//! belong in the binary layer.

#[cfg(feature = "metrics")]
pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "crossplan", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}

#[cfg(not(feature = "metrics"))]
pub fn emit_span(_event: &str, _key_values: &[(&str, String)]) {}
