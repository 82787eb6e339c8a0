use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::records::{Post, RawEvent, UserProfile};
use crate::repository::DocumentStore;
use crate::services::entity_cache::EntityCache;
use crate::services::error_handling::LogHelper;

pub const PLACEHOLDER_NAME: &str = "Someone";

/// Turns raw live-query records into notifications addressed to one viewer.
pub struct Enricher {
    store: Arc<dyn DocumentStore>,
    users: EntityCache<UserProfile>,
    posts: EntityCache<Post>,
    placeholder_name: String,
}

struct ActorIdentity {
    display_name: String,
    avatar_url: String,
}

impl Enricher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_placeholder(store, PLACEHOLDER_NAME)
    }

    pub fn with_placeholder(store: Arc<dyn DocumentStore>, placeholder_name: impl Into<String>) -> Self {
        Self {
            store,
            users: EntityCache::new(),
            posts: EntityCache::new(),
            placeholder_name: placeholder_name.into(),
        }
    }

    pub fn users(&self) -> &EntityCache<UserProfile> {
        &self.users
    }

    pub fn posts(&self) -> &EntityCache<Post> {
        &self.posts
    }

    pub fn clear_caches(&self) {
        self.users.clear();
        self.posts.clear();
    }

    /// Enriches every record concurrently and returns once all are done.
    pub async fn enrich_batch(&self, viewer_id: &str, events: &[RawEvent]) -> Vec<Notification> {
        let enriched = join_all(events.iter().map(|event| self.enrich(viewer_id, event))).await;
        enriched.into_iter().flatten().collect()
    }

    /// `None` when the event is not addressed to `viewer_id` or its post is gone.
    pub async fn enrich(&self, viewer_id: &str, event: &RawEvent) -> Option<Notification> {
        // Login activity is addressed by the store query; everything else
        // must not notify the viewer about their own actions.
        if !matches!(event, RawEvent::Login(_)) && event.actor_id() == viewer_id {
            return None;
        }

        match event {
            RawEvent::Like(like) => {
                let post = self.post_owned_by(viewer_id, &like.post_id).await?;
                let actor = self.actor_identity(&like.user_id).await;
                Some(Notification {
                    id: like.id.clone(),
                    kind: NotificationKind::Like,
                    actor_id: like.user_id.clone(),
                    target_post_id: Some(like.post_id.clone()),
                    timestamp: like.timestamp,
                    actor_display_name: actor.display_name,
                    actor_avatar_url: actor.avatar_url,
                    comment_text: None,
                    target_post_thumbnail_url: post.media_url,
                })
            }
            RawEvent::Comment(comment) => {
                let post = self.post_owned_by(viewer_id, &comment.post_id).await?;
                let actor = self.actor_identity(&comment.user_id).await;
                Some(Notification {
                    id: comment.id.clone(),
                    kind: NotificationKind::Comment,
                    actor_id: comment.user_id.clone(),
                    target_post_id: Some(comment.post_id.clone()),
                    timestamp: comment.timestamp,
                    actor_display_name: actor.display_name,
                    actor_avatar_url: actor.avatar_url,
                    comment_text: Some(comment.text.clone()),
                    target_post_thumbnail_url: post.media_url,
                })
            }
            RawEvent::Follow(follow) => {
                let actor = self.actor_identity(&follow.follower_id).await;
                Some(Notification {
                    id: follow.id.clone(),
                    kind: NotificationKind::Follow,
                    actor_id: follow.follower_id.clone(),
                    target_post_id: None,
                    timestamp: follow.timestamp,
                    actor_display_name: actor.display_name,
                    actor_avatar_url: actor.avatar_url,
                    comment_text: None,
                    target_post_thumbnail_url: None,
                })
            }
            RawEvent::Login(activity) => {
                let mut actor = self.actor_identity(&activity.actor_id).await;
                // The activity carries its own copy of the name at login time
                if let Some(username) = activity
                    .actor_username
                    .as_deref()
                    .filter(|name| !name.trim().is_empty())
                {
                    actor.display_name = username.to_string();
                }
                Some(Notification {
                    id: activity.id.clone(),
                    kind: NotificationKind::Login,
                    actor_id: activity.actor_id.clone(),
                    target_post_id: None,
                    timestamp: activity.timestamp,
                    actor_display_name: actor.display_name,
                    actor_avatar_url: actor.avatar_url,
                    comment_text: None,
                    target_post_thumbnail_url: None,
                })
            }
        }
    }

    async fn post_owned_by(&self, viewer_id: &str, post_id: &str) -> Option<Post> {
        let lookup = self
            .posts
            .get_or_fetch(post_id, || self.store.fetch_post(post_id))
            .await;

        match lookup {
            Ok(Some(post)) if post.author_id == viewer_id => Some(post),
            Ok(Some(_)) => None,
            Ok(None) => {
                debug!(post_id = %post_id, "Dropping event for a deleted post");
                None
            }
            Err(e) => {
                LogHelper::log_lookup_failure("post", post_id, &e);
                None
            }
        }
    }

    async fn actor_identity(&self, user_id: &str) -> ActorIdentity {
        let lookup = self
            .users
            .get_or_fetch(user_id, || self.store.fetch_user(user_id))
            .await;

        let user = match lookup {
            Ok(user) => user,
            Err(e) => {
                LogHelper::log_lookup_failure("user", user_id, &e);
                None
            }
        };

        ActorIdentity {
            display_name: user
                .as_ref()
                .and_then(UserProfile::display_label)
                .unwrap_or(self.placeholder_name.as_str())
                .to_string(),
            avatar_url: user
                .as_ref()
                .and_then(UserProfile::avatar_url)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{Comment, Follow, Like, LoginActivity};
    use crate::repository::MockDocumentStore;
    use chrono::Utc;

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: id.to_string(),
            author_id: author.to_string(),
            media_url: Some(format!("https://cdn/{}.jpg", id)),
            created_at: Utc::now(),
        }
    }

    fn user(id: &str, username: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            username: username.to_string(),
            display_name: None,
            profile_pic_url: Some(format!("https://cdn/{}.png", id)),
            photo_url: None,
        }
    }

    fn like(id: &str, post_id: &str, user_id: &str) -> RawEvent {
        RawEvent::Like(Like {
            id: id.to_string(),
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn store_with(posts: Vec<Post>, users: Vec<UserProfile>) -> MockDocumentStore {
        let mut store = MockDocumentStore::new();
        store.expect_fetch_post().returning(move |id| {
            Ok(posts.iter().find(|p| p.id == id).cloned())
        });
        store.expect_fetch_user().returning(move |id| {
            Ok(users.iter().find(|u| u.id == id).cloned())
        });
        store
    }

    #[tokio::test]
    async fn test_like_on_viewer_post() {
        let store = store_with(vec![post("p1", "u")], vec![user("v", "vera")]);
        let enricher = Enricher::new(Arc::new(store));

        let notification = enricher.enrich("u", &like("l1", "p1", "v")).await.unwrap();
        assert_eq!(notification.kind, NotificationKind::Like);
        assert_eq!(notification.actor_display_name, "vera");
        assert_eq!(notification.actor_avatar_url, "https://cdn/v.png");
        assert_eq!(notification.target_post_id.as_deref(), Some("p1"));
        assert_eq!(notification.target_post_thumbnail_url.as_deref(), Some("https://cdn/p1.jpg"));
    }

    #[tokio::test]
    async fn test_self_like_is_dropped() {
        let store = store_with(vec![post("p1", "u")], vec![user("u", "una")]);
        let enricher = Enricher::new(Arc::new(store));

        assert!(enricher.enrich("u", &like("l1", "p1", "u")).await.is_none());
    }

    #[tokio::test]
    async fn test_like_on_someone_elses_post_is_dropped() {
        let store = store_with(vec![post("p1", "w")], vec![user("v", "vera")]);
        let enricher = Enricher::new(Arc::new(store));

        assert!(enricher.enrich("u", &like("l1", "p1", "v")).await.is_none());
    }

    #[tokio::test]
    async fn test_like_on_deleted_post_is_dropped() {
        let store = store_with(vec![], vec![user("v", "vera")]);
        let enricher = Enricher::new(Arc::new(store));

        assert!(enricher.enrich("u", &like("l1", "gone", "v")).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_post_lookup_drops_only_that_event() {
        let mut store = MockDocumentStore::new();
        store.expect_fetch_post().returning(|id| {
            if id == "broken" {
                Err(anyhow::anyhow!("network down"))
            } else {
                Ok(Some(post(id, "u")))
            }
        });
        store.expect_fetch_user().returning(|id| Ok(Some(user(id, "vera"))));
        let enricher = Enricher::new(Arc::new(store));

        let batch = vec![like("l1", "broken", "v"), like("l2", "p2", "v")];
        let notifications = enricher.enrich_batch("u", &batch).await;

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].id, "l2");
    }

    #[tokio::test]
    async fn test_missing_actor_gets_placeholder() {
        let mut store = MockDocumentStore::new();
        store.expect_fetch_post().returning(|id| Ok(Some(post(id, "u"))));
        store
            .expect_fetch_user()
            .returning(|_| Err(anyhow::anyhow!("timeout")));
        let enricher = Enricher::new(Arc::new(store));

        let event = RawEvent::Comment(Comment::new("p1", "v", "nice!"));
        let notification = enricher.enrich("u", &event).await.unwrap();

        assert_eq!(notification.actor_display_name, "Someone");
        assert_eq!(notification.actor_avatar_url, "");
        assert_eq!(notification.comment_text.as_deref(), Some("nice!"));
    }

    #[tokio::test]
    async fn test_follow_from_self_is_dropped() {
        let store = store_with(vec![], vec![]);
        let enricher = Enricher::new(Arc::new(store));

        let event = RawEvent::Follow(Follow::new("u", "u"));
        assert!(enricher.enrich("u", &event).await.is_none());

        let event = RawEvent::Follow(Follow::new("v", "u"));
        let notification = enricher.enrich("u", &event).await.unwrap();
        assert_eq!(notification.kind, NotificationKind::Follow);
        assert_eq!(notification.actor_display_name, "Someone");
    }

    #[tokio::test]
    async fn test_login_prefers_denormalized_username() {
        let store = store_with(vec![], vec![user("v", "vera")]);
        let enricher = Enricher::new(Arc::new(store));

        let named = RawEvent::Login(LoginActivity::new("u", "v", Some("vera_at_login".to_string())));
        let notification = enricher.enrich("u", &named).await.unwrap();
        assert_eq!(notification.actor_display_name, "vera_at_login");
        assert_eq!(notification.actor_avatar_url, "https://cdn/v.png");

        let unnamed = RawEvent::Login(LoginActivity::new("u", "v", None));
        let notification = enricher.enrich("u", &unnamed).await.unwrap();
        assert_eq!(notification.actor_display_name, "vera");
    }

    #[tokio::test]
    async fn test_batch_shares_lookups() {
        let mut store = MockDocumentStore::new();
        store
            .expect_fetch_post()
            .times(1)
            .returning(|id| Ok(Some(post(id, "u"))));
        store
            .expect_fetch_user()
            .times(1)
            .returning(|id| Ok(Some(user(id, "vera"))));
        let enricher = Enricher::new(Arc::new(store));

        let batch: Vec<_> = (0..5).map(|i| like(&format!("l{}", i), "p1", "v")).collect();
        let notifications = enricher.enrich_batch("u", &batch).await;

        assert_eq!(notifications.len(), 5);
        assert_eq!(enricher.posts().len(), 1);
        assert_eq!(enricher.users().len(), 1);
    }
}
