//! Persistence pipeline.
//!
//! Accepted opportunities and executed trades are enqueued on a bounded
//! channel and written to sqlite by one worker task, keeping the engine's
//! critical section free of I/O. The queue is lossy on overflow: `submit_*`
//! never blocks and drops with a warning when full. Write failures are
//! logged and the event discarded; the in-memory rings stay authoritative.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::arbitrage::PersistenceSink;
use crate::db::Database;
use crate::models::{Opportunity, SimulatedTrade};

pub const DEFAULT_QUEUE_CAPACITY: usize = 5_000;

#[derive(Debug, Clone)]
pub enum PersistEvent {
    Opportunity(Opportunity),
    Trade(SimulatedTrade),
}

impl PersistEvent {
    fn kind(&self) -> &'static str {
        match self {
            Self::Opportunity(_) => "opportunity",
            Self::Trade(_) => "trade",
        }
    }
}

enum QueueItem {
    Event(PersistEvent),
    Shutdown,
}

pub struct PersistenceManager {
    tx: mpsc::Sender<QueueItem>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<QueueItem>>>,
    db: Arc<Database>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_capacity(db, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(db: Arc<Database>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: tokio::sync::Mutex::new(Some(rx)),
            db,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the drain worker; idempotent.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }
        let rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };
        let db = self.db.clone();
        *worker = Some(tokio::spawn(run_worker(db, rx)));
        info!("persistence worker started");
    }

    /// Enqueue a shutdown sentinel and wait for the worker to observe it.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(handle) = worker.take() else {
            return;
        };
        let _ = self.tx.send(QueueItem::Shutdown).await;
        let _ = handle.await;
        info!("persistence worker stopped");
    }

    fn submit(&self, event: PersistEvent) {
        let kind = event.kind();
        if let Err(error) = self.tx.try_send(QueueItem::Event(event)) {
            match error {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(kind, "persistence queue full; dropping event");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(kind, "persistence queue closed; dropping event");
                }
            }
        }
    }
}

impl PersistenceSink for PersistenceManager {
    fn submit_opportunity(&self, item: &Opportunity) {
        self.submit(PersistEvent::Opportunity(item.clone()));
    }

    fn submit_trade(&self, item: &SimulatedTrade) {
        self.submit(PersistEvent::Trade(item.clone()));
    }
}

async fn run_worker(db: Arc<Database>, mut rx: mpsc::Receiver<QueueItem>) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Shutdown => return,
            QueueItem::Event(event) => {
                let kind = event.kind();
                let result = match event {
                    PersistEvent::Opportunity(item) => db.insert_opportunity(&item).await,
                    PersistEvent::Trade(item) => db.insert_trade(&item).await,
                };
                if let Err(error) = result {
                    warn!(kind, %error, "failed to persist event");
                }
            }
        }
    }
}
