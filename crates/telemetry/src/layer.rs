use crate::{Record, Shipper};
use chrono::Utc;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    span,
};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// A [tracing_subscriber::Layer] that forwards events to a [Shipper].
///
/// Events at or above the configured level are captured together with the
/// fields recorded on their enclosing spans, so a `transform_scene` span
/// carrying `orchestration_id` and `scene` stamps every record emitted
/// inside it.
#[derive(Debug)]
pub struct ShippingLayer {
    shipper: Shipper,
    level: Level,
}

impl ShippingLayer {
    /// Creates a layer shipping at the level configured by
    /// `STORAGE_TABLE_LOGS_LEVEL` (default `INFO`).
    pub fn new(shipper: Shipper) -> ShippingLayer {
        let level = std::env::var("STORAGE_TABLE_LOGS_LEVEL")
            .ok()
            .and_then(|name| Level::from_str(&name).ok())
            .unwrap_or(Level::INFO);
        ShippingLayer::with_level(shipper, level)
    }

    /// Creates a layer shipping at an explicit level.
    pub fn with_level(shipper: Shipper, level: Level) -> ShippingLayer {
        ShippingLayer { shipper, level }
    }
}

#[derive(Debug, Default)]
struct SpanFields(Map<String, Value>);

#[derive(Debug, Default)]
struct JsonVisitor(Map<String, Value>);

impl Visit for JsonVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        let _ = self.0.insert(field.name().to_string(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let _ = self.0.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let _ = self.0.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        let _ = self.0.insert(field.name().to_string(), value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        let _ = self.0.insert(field.name().to_string(), value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = self
            .0
            .insert(field.name().to_string(), format!("{value:?}").into());
    }
}

impl<S> Layer<S> for ShippingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.0));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        values.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(fields) = extensions.get_mut::<SpanFields>() {
                for (key, value) in visitor.0 {
                    let _ = fields.0.insert(key, value);
                }
            } else {
                extensions.insert(SpanFields(visitor.0));
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.level {
            return;
        }

        // Outermost spans first, so inner scopes win on conflicts.
        let mut fields = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &span_fields.0 {
                        let _ = fields.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let message = visitor
            .0
            .remove("message")
            .and_then(|value| value.as_str().map(String::from))
            .unwrap_or_default();
        for (key, value) in visitor.0 {
            let _ = fields.insert(key, value);
        }

        let record = Record {
            time: Utc::now(),
            level: metadata.level().to_string(),
            message,
            module: metadata.module_path().unwrap_or_default().to_string(),
            function: metadata.name().to_string(),
            fields,
        };
        self.shipper.enqueue(record.into_entity());
    }
}

#[cfg(test)]
mod tests {
    use super::ShippingLayer;
    use crate::{MemorySink, Shipper};
    use tracing::Level;
    use tracing_subscriber::{layer::SubscriberExt, registry};

    #[tokio::test]
    async fn captures_span_context() {
        let sink = MemorySink::new();
        let shipper = Shipper::spawn(sink.clone());
        let subscriber =
            registry().with(ShippingLayer::with_level(shipper.clone(), Level::INFO));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(
                "activity",
                orchestration_id = "instance-1",
                activity_name = "file_crawl"
            );
            let _guard = span.enter();
            tracing::info!("found 3 files");
            tracing::debug!("not shipped at INFO");
        });

        shipper.flush().await;
        let entities = sink.entities();
        assert_eq!(entities.len(), 1);
        let entity = &entities[0];
        assert_eq!(entity["PartitionKey"], "instance-1");
        assert_eq!(entity["ActivityName"], "file_crawl");
        assert_eq!(entity["Message"], "found 3 files");
        assert_eq!(entity["Level"], "INFO");
    }

    #[tokio::test]
    async fn event_fields_override_span_fields() {
        let sink = MemorySink::new();
        let shipper = Shipper::spawn(sink.clone());
        let subscriber =
            registry().with(ShippingLayer::with_level(shipper.clone(), Level::DEBUG));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("activity", orchestration_id = "instance-2");
            let _guard = span.enter();
            tracing::debug!(function_override = "get_text", "calling 'get_text'");
        });

        shipper.flush().await;
        let entities = sink.entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["Function"], "get_text");
        assert_eq!(entities[0]["PartitionKey"], "instance-2");
    }
}
