//! Console output
//!
//! Human output goes to stdout with status glyphs; `--json` switches every
//! message to a single-line JSON object so the stream can be piped into
//! other tools. Diagnostics always go to stderr.

use collectfs_core::ports::{IOverlayObserver, OverlayEvent, OverlayEventKind, SyncFailure};

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Trait for formatting CLI output
pub trait OutputFormatter: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn info(&self, message: &str);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {}", message);
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {}", message);
    }
    fn info(&self, message: &str) {
        println!("  {}", message);
    }
    fn print_json(&self, _value: &serde_json::Value) {}
}

/// JSON-lines output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", serde_json::json!({"success": true, "message": message}));
    }
    fn error(&self, message: &str) {
        eprintln!("{}", serde_json::json!({"success": false, "error": message}));
    }
    fn info(&self, _message: &str) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!("{}", value);
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter),
    }
}

// ============================================================================
// Overlay event printing
// ============================================================================

/// Prints every applied overlay mutation
///
/// In JSON mode each event is one line on stdout (the shape consumed by
/// external integrations); failures are JSON lines on stderr.
pub struct ConsoleObserver {
    format: OutputFormat,
}

impl ConsoleObserver {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

fn glyph(kind: OverlayEventKind) -> char {
    match kind {
        OverlayEventKind::Add => '+',
        OverlayEventKind::Change => '~',
        OverlayEventKind::Unlink => '-',
    }
}

impl IOverlayObserver for ConsoleObserver {
    fn on_event(&self, event: &OverlayEvent) {
        match self.format {
            OutputFormat::Json => match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "Failed to serialise overlay event"),
            },
            OutputFormat::Human => {
                println!("{} {}", glyph(event.kind), event.data.relative_path);
            }
        }
    }

    fn on_failure(&self, failure: &SyncFailure) {
        match self.format {
            OutputFormat::Json => match serde_json::to_value(failure) {
                Ok(value) => eprintln!("{}", serde_json::json!({"kind": "error", "data": value})),
                Err(e) => tracing::warn!(error = %e, "Failed to serialise sync failure"),
            },
            OutputFormat::Human => {
                eprintln!(
                    "\u{26a0} {}: {}",
                    failure.source_path.display(),
                    failure.message
                );
            }
        }
    }
}
