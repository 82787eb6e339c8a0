pub mod database;
pub mod sqlite_store;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::records::{Post, RawEvent, UserProfile};
use crate::domain::source::LiveQuery;

pub use sqlite_store::SqliteStore;

/// Read and subscribe surface of the live document database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` means the user document does not exist.
    async fn fetch_user(&self, id: &str) -> Result<Option<UserProfile>>;

    /// Point read. `Ok(None)` means the post document does not exist.
    async fn fetch_post(&self, id: &str) -> Result<Option<Post>>;

    /// Opens a live query. Every change delivers the full matching snapshot,
    /// newest first, capped at `query.limit`.
    async fn subscribe(&self, query: LiveQuery) -> Result<LiveSubscription>;
}

/// Handle on an open live query. Dropping it unsubscribes.
pub struct LiveSubscription {
    receiver: mpsc::Receiver<Vec<RawEvent>>,
    feeder: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    pub fn new(receiver: mpsc::Receiver<Vec<RawEvent>>, feeder: JoinHandle<()>) -> Self {
        Self {
            receiver,
            feeder: Some(feeder),
        }
    }

    /// Subscription fed by an external sender rather than a store task.
    pub fn from_receiver(receiver: mpsc::Receiver<Vec<RawEvent>>) -> Self {
        Self {
            receiver,
            feeder: None,
        }
    }

    /// Next full snapshot, or `None` once the query has been torn down.
    pub async fn next_snapshot(&mut self) -> Option<Vec<RawEvent>> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}
