//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Render every event as a single JSON line
//! - Carry span fields (request id, trace id) onto every nested event
//!
//! # Record Shape
//! ```text
//! {"ts":1718000000123456789,"lvl":"INFO","msg":"Request handled","reqId":"…","status":200}
//! ```
//! `ts` is nanoseconds since the Unix epoch. Span fields come first (outermost
//! span first), then the event's own fields. `otel.*` span fields steer the
//! OpenTelemetry bridge and are left out of the record.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use opentelemetry_sdk::trace::SdkTracer;
use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogLevel;

/// Build a subscriber writing JSON lines to `make_writer` at `level` and above.
///
/// With a `tracer`, spans are also bridged into OpenTelemetry.
pub fn new_logger<W>(
    make_writer: W,
    level: LogLevel,
    tracer: Option<SdkTracer>,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new(level.as_str()))
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .with(JsonLayer::new(make_writer))
}

/// Install the process-wide logger on stdout.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_logging(
    level: LogLevel,
    tracer: Option<SdkTracer>,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .with(JsonLayer::new(std::io::stdout))
        .try_init()
}

/// Span fields captured at span creation, rendered into nested events.
#[derive(Debug, Default)]
struct SpanFields(Map<String, Value>);

/// A layer that renders events as JSON objects, one per line.
pub struct JsonLayer<W> {
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = SpanFields::default();
        attrs.record(&mut JsonVisitor(&mut fields.0));
        fields.0.retain(|key, _| !key.starts_with("otel."));
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            values.record(&mut JsonVisitor(&mut fields.0));
            fields.0.retain(|key, _| !key.starts_with("otel."));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut record = Map::new();
        record.insert("ts".to_string(), Value::from(unix_nanos()));
        record.insert(
            "lvl".to_string(),
            Value::from(event.metadata().level().as_str()),
        );

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &fields.0 {
                        record.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        event.record(&mut JsonVisitor(&mut record));

        let Ok(mut line) = serde_json::to_vec(&Value::Object(record)) else {
            return;
        };
        line.push(b'\n');
        let mut writer = self.make_writer.make_writer_for(event.metadata());
        // Nowhere left to report a failed log write.
        let _ = writer.write_all(&line);
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Collects tracing fields into a JSON map. The implicit `message` field is
/// stored under `msg`.
struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl JsonVisitor<'_> {
    fn insert(&mut self, field: &Field, value: Value) {
        let key = match field.name() {
            "message" => "msg",
            name => name,
        };
        self.0.insert(key.to_string(), value);
    }
}

impl Visit for JsonVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}
