//! Sinks for log events emitted by the Pkl evaluator.
//!
//! These are the evaluator's own `trace()` output and warnings, not the
//! binding's diagnostics (which go through `tracing`).

use std::io::Write;
use std::sync::Mutex;

/// Receives trace and warn events from a running evaluation.
///
/// Register an implementation on
/// [`EvaluatorOptions::logger`](crate::EvaluatorOptions).
pub trait Logger: Send + Sync {
    /// Called for each `trace()` expression the program evaluates.
    fn trace(&self, message: &str, frame_uri: &str);

    /// Called for each warning, e.g. use of a deprecated definition.
    fn warn(&self, message: &str, frame_uri: &str);
}

/// The default log line layout.
#[must_use]
pub fn format_log_message(level: &str, message: &str, frame_uri: &str) -> String {
    format!("pkl: {level}: {message} ({frame_uri})\n")
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn trace(&self, _message: &str, _frame_uri: &str) {}
    fn warn(&self, _message: &str, _frame_uri: &str) {}
}

/// Writes formatted events to an output stream.
pub struct WriterLogger<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterLogger<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write(&self, level: &str, message: &str, frame_uri: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(format_log_message(level, message, frame_uri).as_bytes());
        }
    }
}

impl<W: Write + Send> Logger for WriterLogger<W> {
    fn trace(&self, message: &str, frame_uri: &str) {
        self.write("TRACE", message, frame_uri);
    }

    fn warn(&self, message: &str, frame_uri: &str) {
        self.write("WARN", message, frame_uri);
    }
}

/// Forwards events to the `tracing` subscriber under the `pkl` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn trace(&self, message: &str, frame_uri: &str) {
        tracing::trace!(target: "pkl", frame_uri, "{message}");
    }

    fn warn(&self, message: &str, frame_uri: &str) {
        tracing::warn!(target: "pkl", frame_uri, "{message}");
    }
}
