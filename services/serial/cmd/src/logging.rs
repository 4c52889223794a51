use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COMPONENT_WIDTH: usize = 18;

/// One line per event: `[timestamp] [component] LEVEL message key=value...`.
///
/// Events carrying a `component` field (telemetry, indicator) are labelled
/// `keeper-<component>`; everything else gets the service name.
pub struct KeeperLogFormatter {
    service_name: String,
}

impl KeeperLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn component_label(&self, component: Option<&str>) -> String {
        match component {
            Some(component) => format!("keeper-{}", component),
            None => self.service_name.clone(),
        }
    }
}

fn level_color(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[91m",
        Level::WARN => "\x1b[93m",
        Level::INFO => "\x1b[32m",
        _ => "\x1b[90m",
    }
}

impl<S, N> FormatEvent<S, N> for KeeperLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let level = event.metadata().level();
        let label = self.component_label(fields.component.as_deref());
        write!(
            writer,
            "[{}] [{:<width$}] ",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            label,
            width = COMPONENT_WIDTH
        )?;

        if writer.has_ansi_escapes() {
            write!(writer, "{}{:<5}\x1b[0m ", level_color(level), level)?;
        } else {
            write!(writer, "{:<5} ", level)?;
        }

        write!(writer, "{}", fields.message)?;
        for (name, value) in &fields.extra {
            write!(writer, " {}={}", name, value)?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl EventFields {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            name => self.extra.push((name, value)),
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{:?}", value));
    }
}
