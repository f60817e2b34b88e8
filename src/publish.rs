use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fusion::MapUpdate;
use crate::wire::CloudWire;

/// Forwards every map update to viewers on a zenoh key.
pub struct CloudPublisher {
    session: Arc<zenoh::Session>,
    key: String,
}

impl CloudPublisher {
    pub fn new(session: Arc<zenoh::Session>, key: &str) -> Self {
        Self { session, key: key.to_owned() }
    }

    pub async fn publish(&self, update: &MapUpdate) -> anyhow::Result<()> {
        let payload = CloudWire::from_update(update)?.encode()?;
        debug!(frame = update.frame_index, bytes = payload.len(), "publishing cloud");
        self.session
            .put(self.key.as_str(), payload)
            .await
            .map_err(|e| anyhow!("failed to publish on '{}': {e}", self.key))
    }

    /// Publish the newest update each time one appears, until the sender
    /// side of `updates` is gone.
    pub fn spawn(self, mut updates: watch::Receiver<Option<Arc<MapUpdate>>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("publishing clouds on '{}'", self.key);
            while updates.changed().await.is_ok() {
                let Some(update) = updates.borrow_and_update().clone() else {
                    continue;
                };
                if let Err(e) = self.publish(&update).await {
                    warn!("{e:#}");
                }
            }
        })
    }
}
