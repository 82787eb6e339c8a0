use serde::{Deserialize, Serialize};
use std::fmt;

use super::notification::NotificationKind;

pub const DEFAULT_BATCH_LIMIT: usize = 50;

/// One live event category. Each source owns exactly one notification kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    Likes,
    Comments,
    Follows,
    LoginActivities,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Likes,
        Source::Comments,
        Source::Follows,
        Source::LoginActivities,
    ];

    pub fn kind(&self) -> NotificationKind {
        match self {
            Source::Likes => NotificationKind::Like,
            Source::Comments => NotificationKind::Comment,
            Source::Follows => NotificationKind::Follow,
            Source::LoginActivities => NotificationKind::Login,
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Source::Likes => "likes",
            Source::Comments => "comments",
            Source::Follows => "follows",
            Source::LoginActivities => "loginActivities",
        }
    }

    /// Query scoped to one viewer. Likes and comments cannot be joined against
    /// the viewer's posts server-side, so they are fetched unfiltered.
    pub fn query_for(&self, viewer_id: &str, limit: usize) -> LiveQuery {
        let filter = match self {
            Source::Likes | Source::Comments => QueryFilter::None,
            Source::Follows => QueryFilter::FollowingId(viewer_id.to_string()),
            Source::LoginActivities => QueryFilter::AddresseeId(viewer_id.to_string()),
        };
        LiveQuery {
            source: *self,
            filter,
            limit,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryFilter {
    None,
    /// `followingId == viewer`
    FollowingId(String),
    /// `userId == viewer` on login activity
    AddresseeId(String),
}

/// Filter + newest-first sort + limit over one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveQuery {
    pub source: Source,
    pub filter: QueryFilter,
    pub limit: usize,
}
