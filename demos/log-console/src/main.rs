//! Log shipping and cursor paging against an in-process collector.
//!
//! Run with: cargo run -p log-console-demo
//!
//! Records emitted through `tracing` are buffered by a `LogShipper` and shipped
//! to a console "collector" that drops every third batch with a timeout, so the
//! retry policy is visible. A small in-memory database serves a paged query.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use mdstudio_core::{AsyncValue, Claims, ClaimsContext, Document, Error, RpcSurface, SessionId};
use mdstudio_db::{Database, FindOptions, Model, RemoteDatabase};
use mdstudio_logging::{LogSession, LogShipper, Record, ShipperConfig, ShipperLayer};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const PAGE_SIZE: usize = 2;

/// Collector that prints shipped batches and times out on every third one.
struct ConsoleSession {
    id: SessionId,
    root: PathBuf,
    batches: AtomicUsize,
}

impl LogSession for ConsoleSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn component_root_path(&self) -> PathBuf {
        self.root.clone()
    }

    fn flush_logs(&self, records: Vec<Record>) -> AsyncValue<()> {
        let batch = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        AsyncValue::from_future(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if batch % 3 == 0 {
                return Err(Error::Timeout(format!("collector dropped batch {batch}")));
            }
            for record in &records {
                println!(
                    "[batch {batch}] {} {:<5} {}: {}",
                    record.time, record.level, record.source, record.message
                );
            }
            Ok(())
        })
    }
}

/// Serves `find_many` and `more` from memory, `PAGE_SIZE` documents at a time.
struct LocalBus {
    documents: Vec<Document>,
    offset: Mutex<usize>,
}

impl LocalBus {
    fn page(&self, from_start: bool) -> Document {
        let mut offset = self.offset.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if from_start {
            *offset = 0;
        }
        let end = (*offset + PAGE_SIZE).min(self.documents.len());
        let results = self.documents[*offset..end].to_vec();
        *offset = end;
        json!({ "cursorId": 1, "alive": end < self.documents.len(), "results": results })
    }
}

impl RpcSurface for LocalBus {
    fn call(&self, procedure: &str, _args: Document, claims: Claims) -> AsyncValue<Document> {
        tracing::debug!(procedure, ?claims, "Bus call");
        match procedure {
            "mdstudio.db.endpoint.find_many" => AsyncValue::resolved(self.page(true)),
            "mdstudio.db.endpoint.more" => AsyncValue::resolved(self.page(false)),
            other => AsyncValue::failed(Error::Application {
                uri: other.to_string(),
                message: "not served by the demo bus".to_string(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ShipperConfig {
        flush_interval_ms: 500,
        timeout_retry_ms: vec![300, 100],
        ..ShipperConfig::default()
    };
    let shipper = Arc::new(LogShipper::new(config));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(ShipperLayer::new(Arc::clone(&shipper)))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let root = std::env::temp_dir().join("mdstudio-log-console");
    let session = Arc::new(ConsoleSession {
        id: Uuid::new_v4(),
        root,
        batches: AtomicUsize::new(0),
    });
    shipper.start_flushing(session.clone()).await;
    let flusher = Arc::clone(&shipper).spawn_flusher();

    let bus = LocalBus {
        documents: (1..=5).map(|n| json!({ "structure": n, "energy": -10.0 * f64::from(n) })).collect(),
        offset: Mutex::new(0),
    };
    let database: Arc<dyn Database> = Arc::new(RemoteDatabase::new(bus, ClaimsContext::group("demo")));
    let model = Model::new(database, "structures");

    let mut cursor = model.find_many(json!({}), &FindOptions::default()).await?;
    let energies = cursor
        .query()
        .select(|document| document["energy"].as_f64().unwrap_or_default())
        .to_list()
        .await?;
    tracing::info!(count = energies.len(), "Read structures");

    for step in 0..12 {
        tracing::info!(step, "Simulation step finished");
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    flusher.abort();
    shipper.flush_logs().await?;
    shipper.pause_flushing(session.id).await;
    shipper.shutdown().await;
    Ok(())
}
