//! Background task that writes flow updates carrying a transaction hash to
//! the journal.

use sqlx::SqlitePool;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::events::FlowUpdate;

pub async fn run(pool: SqlitePool, mut updates: broadcast::Receiver<FlowUpdate>, shutdown: CancellationToken) {
    info!("Transaction journal recorder started");

    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = updates.recv() => received,
        };

        match update {
            Ok(update) => match db::record_update(&pool, &update).await {
                Ok(true) => debug!("Journaled {} {}", update.flow.as_str(), update.status),
                Ok(false) => {}
                Err(e) => error!("Journal write failed: {e}"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!("Journal recorder lagged, {skipped} updates dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!("Transaction journal recorder stopped");
}
