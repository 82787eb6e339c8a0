use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub profile_pic_url: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            display_name: None,
            profile_pic_url: None,
            photo_url: None,
        }
    }

    /// Name shown next to a notification. Username wins over display name.
    pub fn display_label(&self) -> Option<&str> {
        if !self.username.trim().is_empty() {
            return Some(&self.username);
        }
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.profile_pic_url
            .as_deref()
            .or(self.photo_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(author_id: impl Into<String>, media_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.into(),
            media_url,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Like {
    pub fn new(post_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            post_id: post_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn new(post_id: impl Into<String>, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            post_id: post_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: String,
    pub follower_id: String,
    pub following_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Follow {
    pub fn new(follower_id: impl Into<String>, following_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            follower_id: follower_id.into(),
            following_id: following_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginActivity {
    pub id: String,
    pub user_id: String, // Who should see this notification
    pub actor_id: String, // Who logged in
    pub actor_username: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl LoginActivity {
    pub fn new(addressee_id: impl Into<String>, actor_id: impl Into<String>, actor_username: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: addressee_id.into(),
            actor_id: actor_id.into(),
            actor_username,
            timestamp: Utc::now(),
            read: false,
        }
    }
}

/// One record as delivered by a live query, tagged by the collection it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RawEvent {
    Like(Like),
    Comment(Comment),
    Follow(Follow),
    Login(LoginActivity),
}

impl RawEvent {
    pub fn id(&self) -> &str {
        match self {
            RawEvent::Like(like) => &like.id,
            RawEvent::Comment(comment) => &comment.id,
            RawEvent::Follow(follow) => &follow.id,
            RawEvent::Login(activity) => &activity.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RawEvent::Like(like) => like.timestamp,
            RawEvent::Comment(comment) => comment.timestamp,
            RawEvent::Follow(follow) => follow.timestamp,
            RawEvent::Login(activity) => activity.timestamp,
        }
    }

    /// The user who caused the event.
    pub fn actor_id(&self) -> &str {
        match self {
            RawEvent::Like(like) => &like.user_id,
            RawEvent::Comment(comment) => &comment.user_id,
            RawEvent::Follow(follow) => &follow.follower_id,
            RawEvent::Login(activity) => &activity.actor_id,
        }
    }
}
