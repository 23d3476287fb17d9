use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, FormattedFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Target whose INFO events (per-request outcomes, run summary) are kept in
/// the log file as well as on the console.
pub const RESULT_TARGET: &str = "loadtest_result";

/// Installs the console and file layers. `verbosity` is the default console
/// directive (`info`, `debug`, `evm_loadtest=trace`, ...) and is overridden by
/// `RUST_LOG` when set.
///
/// The returned guard flushes the file writer and MUST be kept alive by the
/// caller.
pub fn setup_logger(verbosity: &str) -> Option<WorkerGuard> {
    std::fs::create_dir_all("logs").ok();

    let file_appender = tracing_appender::rolling::hourly("logs", "loadtest");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for results, WARN for others
    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target(RESULT_TARGET, Level::INFO)
        .with_default(Level::WARN);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .ok()?;

    Some(guard)
}

// --- Formatters ---

/// Collects the message and renders the remaining fields as `key=value`.
#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
}

impl EventVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        use std::fmt::Write;
        let _ = write!(self.fields, " {}={}", name, value);
    }

    fn render(&self) -> String {
        format!("{}{}", self.message, self.fields)
    }
}

impl tracing::field::Visit for EventVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }
}

/// Worker id from the enclosing `worker` span, if any.
fn worker_id<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let scope = ctx.event_scope()?;
    for span in scope.from_root() {
        if span.name() != "worker" {
            continue;
        }
        let extensions = span.extensions();
        let fields = extensions.get::<FormattedFields<N>>()?;
        // Rendered as `worker_id="001"` by the default field formatter.
        let id = fields.fields.split('=').nth(1)?.trim_matches('"');
        return Some(id.to_string());
    }
    None
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let level = *event.metadata().level();
        let level_style = match level {
            Level::ERROR => Style::new().fg(Color::LightRed).bold(),
            Level::WARN => Style::new().fg(Color::Yellow).bold(),
            Level::INFO => Style::new().fg(Color::LightGreen),
            _ => Style::new().dimmed(),
        };

        let timestamp = Local::now().format("%H:%M:%S%.3f");
        write!(
            writer,
            "{} {:>5} ",
            Style::new().dimmed().paint(timestamp.to_string()),
            level_style.paint(level.as_str())
        )?;

        if let Some(id) = worker_id(ctx) {
            write!(writer, "{} ", Color::Cyan.paint(format!("[WK:{}]", id)))?;
        }

        write!(writer, "{}", visitor.message)?;
        if !visitor.fields.is_empty() {
            write!(writer, "{}", Style::new().dimmed().paint(visitor.fields))?;
        }
        writeln!(writer)
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] ", timestamp, level)?;
        if let Some(id) = worker_id(ctx) {
            write!(writer, "[WK:{}] ", id)?;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.render())
    }
}
