use std::sync::Arc;

use tempo_core::protocol::{encode_notification, ClientMessage, ServerNotification, TimerPayload};
use tempo_core::TimerStatus;
use tempo_store::timers::TimerRepo;
use tempo_store::Database;

use crate::registry::ConnectionRegistry;

/// Applies inbound timer commands: persist first, then fan the canonical
/// row out to every connection of the row's owner. Persistence and
/// broadcast are deliberately ordered so a notification never describes
/// state the store does not hold.
pub struct SyncEngine {
    timers: TimerRepo,
    registry: Arc<ConnectionRegistry>,
}

impl SyncEngine {
    pub fn new(db: Database, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            timers: TimerRepo::new(db),
            registry,
        }
    }

    /// Apply one decoded client message. Failures are absorbed here: an
    /// unrecognized action or a store fault drops the message without
    /// tearing down the connection that delivered it.
    pub fn apply(&self, message: ClientMessage) {
        let (id, user_id, status, started_at) = match message {
            ClientMessage::TimerStart {
                id,
                user_id,
                started_at,
            } => (id, user_id, TimerStatus::Running, started_at),
            ClientMessage::TimerStop { id, user_id } => {
                (id, user_id, TimerStatus::Stopped, None)
            }
            ClientMessage::Unknown => {
                tracing::warn!("unrecognized action, dropping message");
                return;
            }
        };

        let row = match self.timers.upsert(&id, &user_id, status, started_at) {
            Ok(row) => row,
            Err(error) => {
                tracing::error!(
                    timer_id = %id,
                    user_id = %user_id,
                    error = %error,
                    "timer upsert failed, skipping broadcast"
                );
                return;
            }
        };

        let notification = ServerNotification::TimerUpdated {
            payload: TimerPayload::from(&row),
        };
        let text = match encode_notification(&notification) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(timer_id = %row.id, error = %error, "notification encode failed");
                return;
            }
        };

        let delivered = self.registry.broadcast_to_user(&row.user_id, &text);
        tracing::debug!(
            timer_id = %row.id,
            user_id = %row.user_id,
            status = %row.status,
            delivered,
            "timer state broadcast"
        );
    }
}
