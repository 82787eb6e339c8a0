use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{DocumentStore, LiveSubscription};
use crate::domain::records::{Comment, Follow, Like, LoginActivity, Post, RawEvent, UserProfile};
use crate::domain::source::{LiveQuery, QueryFilter, Source};

const CHANGE_CHANNEL_CAPACITY: usize = 256;
const SNAPSHOT_BUFFER: usize = 8;

/// SQLite-backed document store. Writes announce the collection they touched
/// and every open live query re-reads its snapshot after a matching change.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    changes: broadcast::Sender<Source>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            pool: Arc::new(pool),
            changes,
        }
    }

    fn announce(&self, source: Source) {
        // No receivers just means nobody is watching
        let _ = self.changes.send(source);
    }

    pub async fn create_user(&self, user: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, display_name, profile_pic_url, photo_url)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.profile_pic_url)
        .bind(&user.photo_url)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_user(&self, user: &UserProfile) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = ?, display_name = ?, profile_pic_url = ?, photo_url = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.profile_pic_url)
        .bind(&user.photo_url)
        .bind(&user.id)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query("INSERT INTO posts (id, author_id, media_url, created_at) VALUES (?, ?, ?, ?)")
            .bind(&post.id)
            .bind(&post.author_id)
            .bind(&post.media_url)
            .bind(encode_timestamp(post.created_at))
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Deletes a post together with its likes and comments.
    pub async fn delete_post(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM likes WHERE post_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.announce(Source::Likes);
        self.announce(Source::Comments);
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_like(&self, like: &Like) -> Result<()> {
        sqlx::query("INSERT INTO likes (id, post_id, user_id, timestamp) VALUES (?, ?, ?, ?)")
            .bind(&like.id)
            .bind(&like.post_id)
            .bind(&like.user_id)
            .bind(encode_timestamp(like.timestamp))
            .execute(&*self.pool)
            .await?;

        self.announce(Source::Likes);
        Ok(())
    }

    /// Likes the post, or removes the existing like. Returns whether the post is now liked.
    pub async fn toggle_like(&self, post_id: &str, user_id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM likes WHERE post_id = ? AND user_id = ?")
            .bind(post_id)
            .bind(user_id)
            .execute(&*self.pool)
            .await?;

        if removed.rows_affected() > 0 {
            self.announce(Source::Likes);
            return Ok(false);
        }

        self.insert_like(&Like::new(post_id, user_id)).await?;
        Ok(true)
    }

    pub async fn insert_comment(&self, comment: &Comment) -> Result<()> {
        sqlx::query("INSERT INTO comments (id, post_id, user_id, text, timestamp) VALUES (?, ?, ?, ?, ?)")
            .bind(&comment.id)
            .bind(&comment.post_id)
            .bind(&comment.user_id)
            .bind(&comment.text)
            .bind(encode_timestamp(comment.timestamp))
            .execute(&*self.pool)
            .await?;

        self.announce(Source::Comments);
        Ok(())
    }

    pub async fn delete_comment(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        self.announce(Source::Comments);
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_follow(&self, follow: &Follow) -> Result<()> {
        sqlx::query("INSERT INTO follows (id, follower_id, following_id, timestamp) VALUES (?, ?, ?, ?)")
            .bind(&follow.id)
            .bind(&follow.follower_id)
            .bind(&follow.following_id)
            .bind(encode_timestamp(follow.timestamp))
            .execute(&*self.pool)
            .await?;

        self.announce(Source::Follows);
        Ok(())
    }

    /// Follows `following_id` unless already following. Returns the follow record either way.
    pub async fn follow(&self, follower_id: &str, following_id: &str) -> Result<Follow> {
        let existing = sqlx::query(
            "SELECT id, follower_id, following_id, timestamp FROM follows WHERE follower_id = ? AND following_id = ?",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(row) = existing {
            return follow_from_row(&row);
        }

        let follow = Follow::new(follower_id, following_id);
        self.insert_follow(&follow).await?;
        Ok(follow)
    }

    pub async fn unfollow(&self, follower_id: &str, following_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = ? AND following_id = ?")
            .bind(follower_id)
            .bind(following_id)
            .execute(&*self.pool)
            .await?;

        self.announce(Source::Follows);
        Ok(result.rows_affected() > 0)
    }

    pub async fn followers_of(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT follower_id FROM follows WHERE following_id = ? ORDER BY timestamp ASC")
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("follower_id")).collect())
    }

    pub async fn insert_login_activity(&self, activity: &LoginActivity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO login_activities (id, user_id, actor_id, actor_username, timestamp, read)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.user_id)
        .bind(&activity.actor_id)
        .bind(&activity.actor_username)
        .bind(encode_timestamp(activity.timestamp))
        .bind(activity.read as i32)
        .execute(&*self.pool)
        .await?;

        self.announce(Source::LoginActivities);
        Ok(())
    }

    pub async fn unread_login_activity_count(&self, user_id: &str) -> Result<u64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM login_activities WHERE user_id = ? AND read = 0")
                .bind(user_id)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }

    pub async fn mark_login_activity_read(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE login_activities SET read = 1 WHERE user_id = ? AND read = 0")
            .bind(user_id)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.announce(Source::LoginActivities);
        }
        Ok(result.rows_affected())
    }

    /// Runs one live query once.
    pub async fn snapshot(&self, query: &LiveQuery) -> Result<Vec<RawEvent>> {
        let limit = query.limit as i64;

        let events = match (query.source, &query.filter) {
            (Source::Likes, filter) => {
                let (clause, value) = where_clause(filter, "likes");
                let sql = format!(
                    "SELECT id, post_id, user_id, timestamp FROM likes {} ORDER BY timestamp DESC, id ASC LIMIT ?",
                    clause
                );
                self.fetch_rows(&sql, value, limit)
                    .await?
                    .iter()
                    .map(|row| like_from_row(row).map(RawEvent::Like))
                    .collect::<Result<Vec<_>>>()?
            }
            (Source::Comments, filter) => {
                let (clause, value) = where_clause(filter, "comments");
                let sql = format!(
                    "SELECT id, post_id, user_id, text, timestamp FROM comments {} ORDER BY timestamp DESC, id ASC LIMIT ?",
                    clause
                );
                self.fetch_rows(&sql, value, limit)
                    .await?
                    .iter()
                    .map(|row| comment_from_row(row).map(RawEvent::Comment))
                    .collect::<Result<Vec<_>>>()?
            }
            (Source::Follows, filter) => {
                let (clause, value) = where_clause(filter, "follows");
                let sql = format!(
                    "SELECT id, follower_id, following_id, timestamp FROM follows {} ORDER BY timestamp DESC, id ASC LIMIT ?",
                    clause
                );
                self.fetch_rows(&sql, value, limit)
                    .await?
                    .iter()
                    .map(|row| follow_from_row(row).map(RawEvent::Follow))
                    .collect::<Result<Vec<_>>>()?
            }
            (Source::LoginActivities, filter) => {
                let (clause, value) = where_clause(filter, "login_activities");
                let sql = format!(
                    "SELECT id, user_id, actor_id, actor_username, timestamp, read FROM login_activities {} ORDER BY timestamp DESC, id ASC LIMIT ?",
                    clause
                );
                self.fetch_rows(&sql, value, limit)
                    .await?
                    .iter()
                    .map(|row| login_activity_from_row(row).map(RawEvent::Login))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(events)
    }

    async fn fetch_rows(&self, sql: &str, value: Option<&str>, limit: i64) -> Result<Vec<SqliteRow>> {
        let mut query = sqlx::query(sql);
        if let Some(value) = value {
            query = query.bind(value);
        }
        let rows = query.bind(limit).fetch_all(&*self.pool).await?;
        Ok(rows)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch_user(&self, id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, username, display_name, profile_pic_url, photo_url FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| UserProfile {
            id: row.get("id"),
            username: row.get("username"),
            display_name: row.get("display_name"),
            profile_pic_url: row.get("profile_pic_url"),
            photo_url: row.get("photo_url"),
        }))
    }

    async fn fetch_post(&self, id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT id, author_id, media_url, created_at FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Post {
                id: row.get("id"),
                author_id: row.get("author_id"),
                media_url: row.get("media_url"),
                created_at: decode_timestamp(&row.get::<String, _>("created_at"))?,
            })),
            None => Ok(None),
        }
    }

    async fn subscribe(&self, query: LiveQuery) -> Result<LiveSubscription> {
        // Listen before the first read so no change between the two is lost
        let mut changes = self.changes.subscribe();
        let initial = self.snapshot(&query).await?;

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let store = self.clone();
        let feeder = tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }

            loop {
                match changes.recv().await {
                    Ok(source) if source == query.source => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(source = %query.source, skipped, "Change feed lagged, re-reading snapshot");
                    }
                    Err(RecvError::Closed) => break,
                }

                match store.snapshot(&query).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(source = %query.source, error = %e, "Failed to refresh live query");
                    }
                }
            }
        });

        Ok(LiveSubscription::new(rx, feeder))
    }
}

fn where_clause<'a>(filter: &'a QueryFilter, table: &str) -> (&'static str, Option<&'a str>) {
    match (filter, table) {
        (QueryFilter::None, _) => ("", None),
        (QueryFilter::FollowingId(id), "follows") => ("WHERE following_id = ?", Some(id.as_str())),
        (QueryFilter::AddresseeId(id), "login_activities") => ("WHERE user_id = ?", Some(id.as_str())),
        // Filters that do not apply to a collection match nothing
        _ => ("WHERE 0", None),
    }
}

fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    // Fixed-width UTC text so lexical order equals time order
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn like_from_row(row: &SqliteRow) -> Result<Like> {
    Ok(Like {
        id: row.get("id"),
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        timestamp: decode_timestamp(&row.get::<String, _>("timestamp"))?,
    })
}

fn comment_from_row(row: &SqliteRow) -> Result<Comment> {
    Ok(Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        text: row.get("text"),
        timestamp: decode_timestamp(&row.get::<String, _>("timestamp"))?,
    })
}

fn follow_from_row(row: &SqliteRow) -> Result<Follow> {
    Ok(Follow {
        id: row.get("id"),
        follower_id: row.get("follower_id"),
        following_id: row.get("following_id"),
        timestamp: decode_timestamp(&row.get::<String, _>("timestamp"))?,
    })
}

fn login_activity_from_row(row: &SqliteRow) -> Result<LoginActivity> {
    Ok(LoginActivity {
        id: row.get("id"),
        user_id: row.get("user_id"),
        actor_id: row.get("actor_id"),
        actor_username: row.get("actor_username"),
        timestamp: decode_timestamp(&row.get::<String, _>("timestamp"))?,
        read: row.get::<i32, _>("read") != 0,
    })
}
