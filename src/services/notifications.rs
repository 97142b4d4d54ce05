//! Per-student notification buffers and the realtime channel.
//!
//! Each student of an area has a Redis list holding the newest notifications
//! (trimmed to the configured cap), an unread counter, and a pub/sub channel
//! that carries [`StudentEvent`]s to open streams. Delivery is at most once.

use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::identity::Email;
use crate::models::notification::{Notification, StudentEvent};
use crate::state::AppState;

/// Pub/sub channel of a student inside an area.
pub fn channel(area_id: &Uuid, email: &Email) -> String {
    format!("student:{}:{}", area_id, email)
}

fn list_key(area_id: &Uuid, email: &Email) -> String {
    format!("notifications:{}:{}", area_id, email)
}

fn unread_key(area_id: &Uuid, email: &Email) -> String {
    format!("notifications_unread:{}:{}", area_id, email)
}

/// Publishes an event on the student's channel. Returns the number of
/// subscribers that received it.
pub async fn publish_event(state: &AppState, area_id: &Uuid, email: &Email, event: &StudentEvent) -> Result<i64> {
    let payload = sonic_rs::to_string(event)
        .map_err(|e| AppError::Internal(format!("Event serialization failed: {}", e)))?;
    let mut redis = state.redis.clone();
    let receivers: i64 = redis.publish(channel(area_id, email), payload).await?;
    tracing::debug!("📣 Published event to {} subscriber(s) of {}", receivers, email);
    Ok(receivers)
}

/// Tells the student's open clients to refetch their modules.
///
/// Failures are logged only: the next page load re-resolves access anyway.
pub async fn invalidate_entitlements(state: &AppState, area_id: &Uuid, email: &Email, module_id: Option<Uuid>) {
    let event = StudentEvent::EntitlementsChanged { module_id };
    if let Err(e) = publish_event(state, area_id, email, &event).await {
        tracing::warn!("⚠️ Failed to publish entitlement change for {}: {}", email, e);
    }
}

/// Stores a notification in the student's buffer and publishes it.
pub async fn push_notification(
    state: &AppState,
    area_id: &Uuid,
    email: &Email,
    notification: Notification,
) -> Result<()> {
    let cap = state.config.notification_buffer_cap.max(1);
    let stored = sonic_rs::to_string(&notification)
        .map_err(|e| AppError::Internal(format!("Notification serialization failed: {}", e)))?;

    let mut redis = state.redis.clone();
    let _: () = redis::pipe()
        .atomic()
        .lpush(list_key(area_id, email), &stored)
        .ignore()
        .ltrim(list_key(area_id, email), 0, cap as isize - 1)
        .ignore()
        .incr(unread_key(area_id, email), 1)
        .ignore()
        .query_async(&mut redis)
        .await?;

    publish_event(state, area_id, email, &StudentEvent::Notification(notification)).await?;
    tracing::info!("🔔 Notification pushed to {}", email);
    Ok(())
}

/// Same as [`push_notification`], logging instead of failing.
pub async fn notify(state: &AppState, area_id: &Uuid, email: &Email, title: &str, message: &str) {
    if let Err(e) = push_notification(state, area_id, email, Notification::new(title, message)).await {
        tracing::warn!("⚠️ Failed to notify {}: {}", email, e);
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub unread: i64,
}

/// The newest notifications, newest first, plus the unread count.
/// Unparsable entries are skipped.
pub async fn list(state: &AppState, area_id: &Uuid, email: &Email) -> Result<NotificationFeed> {
    let cap = state.config.notification_buffer_cap.max(1);
    let mut redis = state.redis.clone();
    let (raw, unread): (Vec<String>, Option<i64>) = redis::pipe()
        .lrange(list_key(area_id, email), 0, cap as isize - 1)
        .get(unread_key(area_id, email))
        .query_async(&mut redis)
        .await?;

    let notifications = raw
        .iter()
        .filter_map(|entry| match sonic_rs::from_str::<Notification>(entry) {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!("⚠️ Skipping unreadable notification: {}", e);
                None
            }
        })
        .collect();

    Ok(NotificationFeed {
        notifications,
        unread: unread.unwrap_or(0).max(0),
    })
}

/// Resets the unread count.
pub async fn mark_read(state: &AppState, area_id: &Uuid, email: &Email) -> Result<()> {
    let mut redis = state.redis.clone();
    let _: () = redis.del(unread_key(area_id, email)).await?;
    Ok(())
}

/// Subscribes to the student's channel. The stream ends when the Redis
/// connection drops; undecodable messages are skipped.
pub async fn subscribe(
    state: &AppState,
    area_id: &Uuid,
    email: &Email,
) -> Result<impl Stream<Item = StudentEvent> + Send + 'static> {
    let mut pubsub = state.redis_client.get_async_pubsub().await?;
    pubsub.subscribe(channel(area_id, email)).await?;
    tracing::debug!("📡 Subscribed to {}", channel(area_id, email));

    Ok(pubsub.into_on_message().filter_map(|msg| async move {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("⚠️ Unreadable pub/sub payload: {}", e);
                return None;
            }
        };
        match sonic_rs::from_str::<StudentEvent>(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("⚠️ Unknown student event: {}", e);
                None
            }
        }
    }))
}
