//! Scheduled-session poller.
//!
//! Sessions created with a future start time sit in the store until this
//! task picks them up and launches them through the orchestrator.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::orchestrator::StreamOrchestrator;
use crate::store::SessionStore;

/// Start the background task that launches scheduled sessions when due.
///
/// # Returns
/// A join handle for the background task.
pub fn start_scheduler_task(
    orchestrator: Arc<StreamOrchestrator>,
    store: Arc<dyn SessionStore>,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let due = store.list_due_for_start(Utc::now()).await;
            for session in due {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    tracing::info!(session_id = %session.id, "Starting scheduled session");
                    let result = orchestrator
                        .start(
                            &session.source_url,
                            &session.backends,
                            session.quality,
                            session.watermark.clone(),
                            session.scheduled_start,
                            Some(session.id.clone()),
                        )
                        .await;
                    if let Err(e) = result {
                        tracing::error!(
                            session_id = %session.id,
                            "Failed to start scheduled session: {e}"
                        );
                    }
                });
            }
        }
    })
}
