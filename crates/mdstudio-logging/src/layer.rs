//! `tracing` layer feeding events into a [`LogShipper`].

use std::{fmt::Write as _, sync::Arc};

use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::layer::{Context, Layer};

use crate::{record::Record, shipper::LogShipper};

/// Records every event with a non-empty message into the shipper's buffer.
pub struct ShipperLayer {
    shipper: Arc<LogShipper>,
}

impl ShipperLayer {
    #[must_use]
    pub const fn new(shipper: Arc<LogShipper>) -> Self {
        Self { shipper }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn record(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, &format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value);
    }
}

impl<S: Subscriber> Layer<S> for ShipperLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }
        let metadata = event.metadata();
        visitor.message.push_str(&visitor.fields);
        self.shipper.record(Record::new(
            *metadata.level(),
            metadata.target(),
            visitor.message,
        ));
    }
}
