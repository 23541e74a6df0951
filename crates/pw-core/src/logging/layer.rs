//! Custom tracing layer for JSONL output.
//!
//! One JSON object per event:
//!
//! ```text
//! {"time":"2026-01-15T14:30:22.123456+00:00","level":"info","target":"pw_core::driver",
//!  "message":"session bound","run_id":"run-…","session_id":"pw-…","fields":{…}}
//! ```
//!
//! Used for stderr in JSONL mode and, always, for the `monitor.log` file.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Timestamp format: ISO-8601 with microseconds and offset.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Correlation ids carried by spans.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    session_id: Option<String>,
}

/// Extracts event fields into a JSON map.
struct JsonFieldVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            fields: Map::new(),
            message: None,
        }
    }
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(s);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(s));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let v = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.fields.insert(field.name().to_string(), v);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }
}

impl Visit for SpanContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "run_id" => self.run_id = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `%id` arrives here via Display wrapped in Debug.
        match field.name() {
            "run_id" => self.run_id = Some(format!("{:?}", value)),
            "session_id" => self.session_id = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    /// Create a new JSONL layer writing to stderr.
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Create a new JSONL layer with a custom writer.
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + Send + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut context = SpanContext::default();
        attrs.record(&mut context);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(context);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(context) = extensions.get_mut::<SpanContext>() {
                values.record(context);
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let time = Utc::now().format(TIME_FORMAT).to_string();

        // Innermost span wins.
        let mut run_id = None;
        let mut session_id = None;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    if run_id.is_none() {
                        run_id.clone_from(&span_ctx.run_id);
                    }
                    if session_id.is_none() {
                        session_id.clone_from(&span_ctx.session_id);
                    }
                }
            }
        }

        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        let level: Level = (*event.metadata().level()).into();
        let mut obj = Map::new();
        obj.insert("time".to_string(), Value::String(time));
        obj.insert("level".to_string(), serde_json::json!(level));
        obj.insert(
            "target".to_string(),
            Value::String(event.metadata().target().to_string()),
        );
        obj.insert(
            "message".to_string(),
            Value::String(visitor.message.unwrap_or_default()),
        );
        if let Some(id) = run_id {
            obj.insert("run_id".to_string(), Value::String(id));
        }
        if let Some(id) = session_id {
            obj.insert("session_id".to_string(), Value::String(id));
        }
        if !visitor.fields.is_empty() {
            obj.insert("fields".to_string(), Value::Object(visitor.fields));
        }

        let json = serde_json::to_string(&Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    struct BufWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for BufWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = JsonlLayer::new(BufWriter(buffer.clone()));
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
        let output = buffer.lock().unwrap();
        String::from_utf8_lossy(&output)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_core_keys() {
        let lines = capture(|| {
            tracing::info!(target: "pw_core::test", "hello");
        });
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "info");
        assert_eq!(line["target"], "pw_core::test");
        assert_eq!(line["message"], "hello");
        assert!(line.get("fields").is_none());
    }

    #[test]
    fn test_time_has_microseconds() {
        let lines = capture(|| tracing::warn!("careful"));
        let time = lines[0]["time"].as_str().unwrap();
        // 2026-01-15T14:30:22.123456+00:00
        let frac = time.split('.').nth(1).unwrap();
        assert_eq!(&frac[6..7], "+");
        assert_eq!(lines[0]["level"], "warn");
    }

    #[test]
    fn test_extra_fields_nested() {
        let lines = capture(|| {
            tracing::info!(count = 42, active = true, ratio = 0.5, path = "/data/a.pcap", "hi");
        });
        let fields = &lines[0]["fields"];
        assert_eq!(fields["count"], 42);
        assert_eq!(fields["active"], true);
        assert_eq!(fields["ratio"], 0.5);
        assert_eq!(fields["path"], "/data/a.pcap");
    }

    #[test]
    fn test_span_ids_attached() {
        let lines = capture(|| {
            let run = tracing::info_span!("monitor", run_id = "run-abc");
            let _r = run.enter();
            let session = tracing::info_span!("session", session_id = %"pw-20260115-143022-a7xq");
            let _s = session.enter();
            tracing::info!("inside");
        });
        assert_eq!(lines[0]["run_id"], "run-abc");
        assert_eq!(lines[0]["session_id"], "pw-20260115-143022-a7xq");
    }

    #[test]
    fn test_no_span_no_ids() {
        let lines = capture(|| tracing::error!("outside"));
        assert!(lines[0].get("session_id").is_none());
        assert_eq!(lines[0]["level"], "error");
    }

    #[test]
    fn test_non_finite_field_is_null() {
        let lines = capture(|| tracing::info!(value = f64::NAN, "nan"));
        assert!(lines[0]["fields"]["value"].is_null());
    }
}
