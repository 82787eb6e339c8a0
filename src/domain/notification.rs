use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Login,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
            NotificationKind::Login => "login",
        };
        f.write_str(name)
    }
}

/// Ids come from different backend collections and may collide, so a
/// notification is only unique per kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationKey {
    pub kind: NotificationKind,
    pub id: String,
}

impl NotificationKey {
    pub fn new(kind: NotificationKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub actor_id: String,
    pub target_post_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub actor_display_name: String,
    pub actor_avatar_url: String,
    pub comment_text: Option<String>,
    pub target_post_thumbnail_url: Option<String>,
}

impl Notification {
    pub fn key(&self) -> NotificationKey {
        NotificationKey::new(self.kind, self.id.clone())
    }

    /// Newest first; equal timestamps fall back to kind, then id.
    pub fn display_order(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn summary(&self) -> String {
        match self.kind {
            NotificationKind::Like => format!("{} liked your post", self.actor_display_name),
            NotificationKind::Comment => format!(
                "{} commented: {}",
                self.actor_display_name,
                self.comment_text.as_deref().unwrap_or_default()
            ),
            NotificationKind::Follow => format!("{} started following you", self.actor_display_name),
            NotificationKind::Login => format!("{} is now online", self.actor_display_name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Today,
    Yesterday,
    Earlier,
}

impl Bucket {
    /// Calendar-day bucket of `timestamp` as seen from `now`'s time zone.
    pub fn for_timestamp<Tz: TimeZone>(timestamp: DateTime<Utc>, now: &DateTime<Tz>) -> Self {
        let today = now.date_naive();
        let day = timestamp.with_timezone(&now.timezone()).date_naive();

        if day == today {
            Bucket::Today
        } else if today.pred_opt() == Some(day) {
            Bucket::Yesterday
        } else {
            Bucket::Earlier
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Bucket::Today => "Today",
            Bucket::Yesterday => "Yesterday",
            Bucket::Earlier => "Earlier",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupedNotifications {
    pub today: Vec<Notification>,
    pub yesterday: Vec<Notification>,
    pub earlier: Vec<Notification>,
}

impl GroupedNotifications {
    /// Splits an already sorted list; order inside each bucket is preserved.
    pub fn from_sorted<Tz: TimeZone>(items: impl IntoIterator<Item = Notification>, now: &DateTime<Tz>) -> Self {
        let mut grouped = Self::default();
        for item in items {
            match Bucket::for_timestamp(item.timestamp, now) {
                Bucket::Today => grouped.today.push(item),
                Bucket::Yesterday => grouped.yesterday.push(item),
                Bucket::Earlier => grouped.earlier.push(item),
            }
        }
        grouped
    }

    /// Buckets in presentation order.
    pub fn sections(&self) -> [(Bucket, &[Notification]); 3] {
        [
            (Bucket::Today, self.today.as_slice()),
            (Bucket::Yesterday, self.yesterday.as_slice()),
            (Bucket::Earlier, self.earlier.as_slice()),
        ]
    }

    pub fn len(&self) -> usize {
        self.today.len() + self.yesterday.len() + self.earlier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.today
            .iter()
            .chain(self.yesterday.iter())
            .chain(self.earlier.iter())
    }
}

/// Days between two instants in the viewer's calendar, used by the watcher output.
pub fn calendar_days_between<Tz: TimeZone>(timestamp: DateTime<Utc>, now: &DateTime<Tz>) -> i64 {
    let day = timestamp.with_timezone(&now.timezone()).date_naive();
    let today = now.date_naive();
    (today - day).num_days().max(0)
}

pub fn relative_label<Tz: TimeZone>(timestamp: DateTime<Utc>, now: &DateTime<Tz>) -> String {
    let elapsed = now.with_timezone(&Utc) - timestamp;
    if elapsed < Duration::minutes(1) {
        "just now".to_string()
    } else if elapsed < Duration::hours(1) {
        format!("{}m", elapsed.num_minutes())
    } else if elapsed < Duration::days(1) {
        format!("{}h", elapsed.num_hours())
    } else {
        let days = calendar_days_between(timestamp, now);
        if days < 7 {
            format!("{}d", days)
        } else {
            let local = timestamp.with_timezone(&now.timezone());
            format!("{}/{}", local.month(), local.day())
        }
    }
}
