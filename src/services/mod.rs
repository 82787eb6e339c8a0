pub mod enrichment;
pub mod entity_cache;
pub mod error_handling;
pub mod login_activity;
pub mod notification_engine;
pub mod pipeline;

pub use enrichment::Enricher;
pub use entity_cache::EntityCache;
pub use login_activity::LoginActivityService;
pub use notification_engine::NotificationEngine;
pub use pipeline::{AggregateState, NotificationView};
