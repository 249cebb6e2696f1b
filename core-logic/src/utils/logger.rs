use anyhow::{Context, Result};
use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Target used for one line per finished logical action.
pub const RESULT_TARGET: &str = "task_result";
/// Target used for broadcast hashes and attempt-level events.
pub const SUBMISSION_TARGET: &str = "submission";
/// Env var that replaces the console filter with an `EnvFilter` directive.
pub const LOG_ENV: &str = "MARTIUS_LOG";

pub fn setup_logger(file_prefix: &str) -> Option<WorkerGuard> {
    std::fs::create_dir_all("logs").ok();

    // Hourly rotation keeps individual files small on long unattended runs
    let file_appender = tracing_appender::rolling::hourly("logs", file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for results and submissions, WARN for others
    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target(RESULT_TARGET, tracing::Level::INFO)
        .with_target(SUBMISSION_TARGET, tracing::Level::INFO)
        .with_default(tracing::Level::WARN);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter);

    // Console layer: INFO for results and submissions, ERROR for others,
    // unless MARTIUS_LOG overrides it
    let console_layer = match std::env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
    {
        Some(env_filter) => console_layer.with_filter(env_filter).boxed(),
        None => console_layer
            .with_filter(
                tracing_subscriber::filter::Targets::new()
                    .with_target(RESULT_TARGET, tracing::Level::INFO)
                    .with_target(SUBMISSION_TARGET, tracing::Level::INFO)
                    .with_default(tracing::Level::ERROR),
            )
            .boxed(),
    };

    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    // Guard MUST be kept alive by caller
    Some(guard)
}

pub fn setup_logger_with_file(log_path: &str) -> Result<WorkerGuard> {
    let file = File::create(log_path).context("Failed to create log file")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(FileFormatter),
    );

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global subscriber")?;

    Ok(guard)
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// Prefix with the enclosing worker id when there is one.
fn worker_prefix<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let scope = ctx.event_scope()?;
    for span in scope.from_root() {
        if span.name() == "worker" {
            let extensions = span.extensions();
            let fields = extensions
                .get::<tracing_subscriber::fmt::FormattedFields<N>>()
                .map(|f| f.fields.clone())?;
            return fields
                .split_whitespace()
                .find_map(|kv| kv.strip_prefix("worker_id="))
                .map(|id| format!("[WK{}] ", id.trim_matches('"')));
        }
    }
    None
}

fn colorize(msg: String) -> String {
    let paint = |msg: String, word: &str, color: Color| {
        let style = Style::new().fg(color).bold();
        msg.replace(word, &format!("{}", style.paint(word)))
    };

    if msg.contains("SUCCESS") {
        paint(msg, "SUCCESS", Color::LightGreen)
    } else if msg.contains("REVERTED") {
        paint(msg, "REVERTED", Color::LightYellow)
    } else if msg.contains("FAILED") {
        paint(msg, "FAILED", Color::LightRed)
    } else {
        msg
    }
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
        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);

        let timestamp = Local::now().format("%H:%M:%S");
        let dimmed = Style::new().dimmed();
        write!(writer, "{} ", dimmed.paint(timestamp.to_string()))?;
        if let Some(prefix) = worker_prefix(ctx) {
            write!(writer, "{}", prefix)?;
        }
        writeln!(writer, "{}", colorize(msg_visitor.message))
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
        if let Some(prefix) = worker_prefix(ctx) {
            write!(writer, "{}", prefix)?;
        }

        let mut msg_visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut msg_visitor);
        writeln!(writer, "{}", msg_visitor.message)
    }
}
