use anyhow::Result;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::info;

use crate::domain::records::LoginActivity;
use crate::repository::SqliteStore;

/// Writes and reads the login activity that feeds followers' notification lists.
#[derive(Clone)]
pub struct LoginActivityService {
    store: Arc<SqliteStore>,
}

impl LoginActivityService {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Tells every follower of `user_id` that they just logged in.
    /// Returns the number of activity records written.
    pub async fn notify_followers_of_login(&self, user_id: &str, username: &str) -> Result<usize> {
        let followers = self.store.followers_of(user_id).await?;

        let writes = followers.iter().map(|follower_id| {
            let activity = LoginActivity::new(follower_id, user_id, Some(username.to_string()));
            let store = self.store.clone();
            async move { store.insert_login_activity(&activity).await }
        });
        try_join_all(writes).await?;

        info!(user_id = %user_id, followers = followers.len(), "Login notification sent to followers");
        Ok(followers.len())
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.store.unread_login_activity_count(user_id).await
    }

    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        self.store.mark_login_activity_read(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source::Source;
    use crate::repository::database::init_test_database;
    use crate::domain::records::RawEvent;

    async fn setup() -> (Arc<SqliteStore>, LoginActivityService) {
        let pool = init_test_database().await.unwrap();
        let store = Arc::new(SqliteStore::new(pool));
        let service = LoginActivityService::new(store.clone());
        (store, service)
    }

    #[tokio::test]
    async fn test_every_follower_is_notified() {
        let (store, service) = setup().await;
        store.follow("a", "v").await.unwrap();
        store.follow("b", "v").await.unwrap();
        store.follow("c", "w").await.unwrap();

        let sent = service.notify_followers_of_login("v", "vera").await.unwrap();
        assert_eq!(sent, 2);

        for follower in ["a", "b"] {
            let snapshot = store
                .snapshot(&Source::LoginActivities.query_for(follower, 50))
                .await
                .unwrap();
            assert_eq!(snapshot.len(), 1);
            match &snapshot[0] {
                RawEvent::Login(activity) => {
                    assert_eq!(activity.actor_id, "v");
                    assert_eq!(activity.actor_username.as_deref(), Some("vera"));
                    assert!(!activity.read);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(service.unread_count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_no_followers_sends_nothing() {
        let (_store, service) = setup().await;
        assert_eq!(service.notify_followers_of_login("v", "vera").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unread_count_and_mark_read() {
        let (store, service) = setup().await;
        store.follow("a", "v").await.unwrap();
        store.follow("a", "w").await.unwrap();
        service.notify_followers_of_login("v", "vera").await.unwrap();
        service.notify_followers_of_login("w", "walt").await.unwrap();

        assert_eq!(service.unread_count("a").await.unwrap(), 2);
        assert_eq!(service.mark_all_read("a").await.unwrap(), 2);
        assert_eq!(service.unread_count("a").await.unwrap(), 0);
    }
}
