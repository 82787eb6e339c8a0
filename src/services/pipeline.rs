use chrono::{DateTime, TimeZone};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::notification::{GroupedNotifications, Notification, NotificationKey};
use crate::domain::source::Source;

/// What the notification screen renders.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationView {
    /// At least one source has not delivered its first batch yet.
    Loading,
    Ready {
        groups: GroupedNotifications,
        /// Sources whose live query could not be opened.
        failed_sources: Vec<Source>,
    },
}

impl NotificationView {
    pub fn is_loading(&self) -> bool {
        matches!(self, NotificationView::Loading)
    }

    /// Loaded with nothing visible: show the empty-state message.
    pub fn is_empty(&self) -> bool {
        match self {
            NotificationView::Loading => false,
            NotificationView::Ready { groups, .. } => groups.is_empty(),
        }
    }

    pub fn groups(&self) -> Option<&GroupedNotifications> {
        match self {
            NotificationView::Loading => None,
            NotificationView::Ready { groups, .. } => Some(groups),
        }
    }
}

/// Aggregate owned by the engine's single event loop.
///
/// Each source owns one slice of the list. A new batch from a source replaces
/// that slice wholesale and the aggregate is re-sorted.
#[derive(Debug, Default)]
pub struct AggregateState {
    slices: BTreeMap<Source, Vec<Notification>>,
    failed: BTreeSet<Source>,
    sorted: Vec<Notification>,
    dismissed: HashSet<NotificationKey>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_batch(&mut self, source: Source, mut batch: Vec<Notification>) {
        let kind = source.kind();
        batch.retain(|notification| notification.kind == kind);

        // One entry per key even if the store delivered a duplicate
        let mut seen = HashSet::new();
        batch.retain(|notification| seen.insert(notification.id.clone()));

        self.failed.remove(&source);
        self.slices.insert(source, batch);
        self.resort();
    }

    /// A source whose query failed counts as loaded with nothing in it.
    pub fn mark_failed(&mut self, source: Source) {
        self.failed.insert(source);
        self.slices.insert(source, Vec::new());
        self.resort();
    }

    fn resort(&mut self) {
        let mut all: Vec<Notification> = self.slices.values().flatten().cloned().collect();
        all.sort_by(Notification::display_order);
        self.sorted = all;
    }

    pub fn dismiss(&mut self, key: NotificationKey) -> bool {
        self.dismissed.insert(key)
    }

    pub fn is_dismissed(&self, key: &NotificationKey) -> bool {
        self.dismissed.contains(key)
    }

    pub fn dismissed_count(&self) -> usize {
        self.dismissed.len()
    }

    pub fn is_loaded(&self) -> bool {
        Source::ALL.iter().all(|source| self.slices.contains_key(source))
    }

    pub fn failed_sources(&self) -> Vec<Source> {
        self.failed.iter().copied().collect()
    }

    /// Sorted, not dismissed.
    pub fn visible(&self) -> Vec<Notification> {
        self.sorted
            .iter()
            .filter(|notification| !self.dismissed.contains(&notification.key()))
            .cloned()
            .collect()
    }

    pub fn total_len(&self) -> usize {
        self.sorted.len()
    }

    pub fn snapshot<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> NotificationView {
        if !self.is_loaded() {
            return NotificationView::Loading;
        }

        NotificationView::Ready {
            groups: GroupedNotifications::from_sorted(self.visible(), now),
            failed_sources: self.failed_sources(),
        }
    }

    /// Drops every slice and dismissal; used when the viewer changes.
    pub fn reset(&mut self) {
        self.slices.clear();
        self.failed.clear();
        self.sorted.clear();
        self.dismissed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::NotificationKind;
    use chrono::Utc;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn notification(kind: NotificationKind, id: &str, ts: &str) -> Notification {
        Notification {
            id: id.to_string(),
            kind,
            actor_id: "v".to_string(),
            target_post_id: None,
            timestamp: at(ts),
            actor_display_name: "vera".to_string(),
            actor_avatar_url: String::new(),
            comment_text: None,
            target_post_thumbnail_url: None,
        }
    }

    fn loaded() -> AggregateState {
        let mut state = AggregateState::new();
        for source in Source::ALL {
            state.apply_batch(source, Vec::new());
        }
        state
    }

    fn ids(items: &[Notification]) -> Vec<&str> {
        items.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_loading_until_every_source_delivers() {
        let now = at("2024-06-10T10:00:00Z");
        let mut state = AggregateState::new();

        state.apply_batch(Source::Likes, Vec::new());
        state.apply_batch(Source::Comments, Vec::new());
        state.apply_batch(Source::Follows, Vec::new());
        assert!(state.snapshot(&now).is_loading());

        state.apply_batch(Source::LoginActivities, Vec::new());
        let view = state.snapshot(&now);
        assert!(!view.is_loading());
        assert!(view.is_empty());
    }

    #[test]
    fn test_replace_not_merge() {
        let mut state = loaded();
        state.apply_batch(
            Source::Likes,
            vec![
                notification(NotificationKind::Like, "old", "2024-06-10T09:00:00Z"),
                notification(NotificationKind::Like, "ancient", "2020-01-01T00:00:00Z"),
            ],
        );
        state.apply_batch(
            Source::Follows,
            vec![notification(NotificationKind::Follow, "f", "2024-06-10T08:00:00Z")],
        );

        state.apply_batch(
            Source::Likes,
            vec![notification(NotificationKind::Like, "new", "2024-06-10T09:30:00Z")],
        );

        assert_eq!(ids(&state.visible()), vec!["new", "f"]);
    }

    #[test]
    fn test_sort_is_non_increasing() {
        let mut state = loaded();
        state.apply_batch(
            Source::Comments,
            vec![
                notification(NotificationKind::Comment, "c1", "2024-06-09T09:00:00Z"),
                notification(NotificationKind::Comment, "c2", "2024-06-10T07:00:00Z"),
            ],
        );
        state.apply_batch(
            Source::LoginActivities,
            vec![notification(NotificationKind::Login, "a1", "2024-06-10T08:00:00Z")],
        );
        state.apply_batch(
            Source::Likes,
            vec![notification(NotificationKind::Like, "l1", "2024-06-08T08:00:00Z")],
        );

        let visible = state.visible();
        assert!(visible.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(ids(&visible), vec!["a1", "c2", "c1", "l1"]);
    }

    #[test]
    fn test_same_id_in_different_kinds_are_distinct() {
        let mut state = loaded();
        state.apply_batch(
            Source::Likes,
            vec![notification(NotificationKind::Like, "x", "2024-06-10T09:00:00Z")],
        );
        state.apply_batch(
            Source::Follows,
            vec![notification(NotificationKind::Follow, "x", "2024-06-10T09:00:00Z")],
        );

        state.dismiss(NotificationKey::new(NotificationKind::Like, "x"));
        let visible = state.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].kind, NotificationKind::Follow);
    }

    #[test]
    fn test_duplicates_within_a_batch_collapse() {
        let mut state = loaded();
        let like = notification(NotificationKind::Like, "l1", "2024-06-10T09:00:00Z");
        state.apply_batch(Source::Likes, vec![like.clone(), like]);
        assert_eq!(state.total_len(), 1);
    }

    #[test]
    fn test_foreign_kinds_are_ignored() {
        let mut state = loaded();
        state.apply_batch(
            Source::Likes,
            vec![notification(NotificationKind::Follow, "f", "2024-06-10T09:00:00Z")],
        );
        assert_eq!(state.total_len(), 0);
    }

    #[test]
    fn test_dismissal_survives_unrelated_updates() {
        let now = at("2024-06-10T10:00:00Z");
        let mut state = loaded();
        state.apply_batch(
            Source::Likes,
            vec![
                notification(NotificationKind::Like, "l1", "2024-06-10T09:00:00Z"),
                notification(NotificationKind::Like, "l2", "2024-06-10T08:00:00Z"),
            ],
        );

        assert!(state.dismiss(NotificationKey::new(NotificationKind::Like, "l1")));
        assert_eq!(ids(&state.visible()), vec!["l2"]);

        state.apply_batch(
            Source::Follows,
            vec![notification(NotificationKind::Follow, "f1", "2024-06-10T09:30:00Z")],
        );
        state.apply_batch(
            Source::Likes,
            vec![
                notification(NotificationKind::Like, "l1", "2024-06-10T09:00:00Z"),
                notification(NotificationKind::Like, "l2", "2024-06-10T08:00:00Z"),
            ],
        );

        let view = state.snapshot(&now);
        let groups = view.groups().unwrap();
        assert_eq!(ids(&groups.today), vec!["f1", "l2"]);
    }

    #[test]
    fn test_failed_source_does_not_block_loading() {
        let now = at("2024-06-10T10:00:00Z");
        let mut state = AggregateState::new();
        state.apply_batch(Source::Likes, Vec::new());
        state.apply_batch(Source::Comments, Vec::new());
        state.apply_batch(Source::Follows, Vec::new());
        state.mark_failed(Source::LoginActivities);

        match state.snapshot(&now) {
            NotificationView::Ready { failed_sources, .. } => {
                assert_eq!(failed_sources, vec![Source::LoginActivities]);
            }
            NotificationView::Loading => panic!("expected a ready view"),
        }
    }

    #[test]
    fn test_snapshot_buckets() {
        let now = at("2024-06-10T10:00:00Z");
        let mut state = loaded();
        state.apply_batch(
            Source::Likes,
            vec![
                notification(NotificationKind::Like, "today", "2024-06-10T02:00:00Z"),
                notification(NotificationKind::Like, "yesterday", "2024-06-09T23:00:00Z"),
                notification(NotificationKind::Like, "earlier", "2024-06-01T00:00:00Z"),
            ],
        );

        let view = state.snapshot(&now);
        let groups = view.groups().unwrap();
        assert_eq!(ids(&groups.today), vec!["today"]);
        assert_eq!(ids(&groups.yesterday), vec!["yesterday"]);
        assert_eq!(ids(&groups.earlier), vec!["earlier"]);
    }

    #[test]
    fn test_reset_clears_dismissals() {
        let mut state = loaded();
        state.dismiss(NotificationKey::new(NotificationKind::Like, "l1"));
        state.reset();

        assert_eq!(state.dismissed_count(), 0);
        assert!(!state.is_loaded());
    }
}
