// Test helpers for integration testing

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::records::{Post, UserProfile};
use crate::repository::database::init_test_database;
use crate::repository::SqliteStore;

pub struct TestContext {
    pub store: Arc<SqliteStore>,
}

impl TestContext {
    pub async fn new_for_test() -> Result<Self> {
        let pool = init_test_database().await?;
        Ok(Self {
            store: Arc::new(SqliteStore::new(pool)),
        })
    }

    pub async fn user(&self, username: &str) -> Result<UserProfile> {
        let mut user = UserProfile::new(username);
        user.profile_pic_url = Some(format!("https://cdn.example/{}.png", username));
        self.store.create_user(&user).await?;
        Ok(user)
    }

    pub async fn post(&self, author: &UserProfile) -> Result<Post> {
        let post = Post::new(&author.id, Some(format!("https://cdn.example/{}.jpg", author.username)));
        self.store.create_post(&post).await?;
        Ok(post)
    }
}

pub fn at(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|e| panic!("bad test timestamp {:?}: {}", timestamp, e))
}
