use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tracing::error;

use pulse::config::EngineConfig;
use pulse::domain::notification::relative_label;
use pulse::repository::database::init_database;
use pulse::repository::SqliteStore;
use pulse::services::error_handling::UserErrorFormatter;
use pulse::services::{NotificationEngine, NotificationView};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        error!(error = ?e, "pulse exited with an error");
        eprintln!("{}", UserErrorFormatter::format_for_ui(&e));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let viewer_id = std::env::args()
        .nth(1)
        .context("usage: pulse <viewer-id>")?;

    let config = EngineConfig::from_env()?;

    let pool = init_database(&config.database_path).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let engine = NotificationEngine::start(store, &viewer_id, config)?;
    let mut view = engine.subscribe_view();

    loop {
        render(&view.borrow_and_update());

        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown();
    Ok(())
}

fn render(view: &NotificationView) {
    match view {
        NotificationView::Loading => println!("Loading notifications..."),
        NotificationView::Ready { groups, failed_sources } => {
            println!("\nNotifications");
            if groups.is_empty() {
                println!("No notifications yet. When someone likes or comments on your posts, you'll see them here.");
            }

            let now = Local::now();
            for (bucket, items) in groups.sections() {
                if items.is_empty() {
                    continue;
                }
                println!("  {}", bucket.title());
                for notification in items {
                    println!(
                        "    {:<8} {}",
                        relative_label(notification.timestamp, &now),
                        notification.summary()
                    );
                }
            }

            for source in failed_sources {
                println!("  ({})", UserErrorFormatter::format_failed_source(*source));
            }
        }
    }
}
