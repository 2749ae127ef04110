use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    models::Notification,
    notifications::{
        self, NotificationError, CHANNEL_EMAIL, CHANNEL_IN_APP, CHANNEL_SMS,
    },
    state::AppState,
};

#[derive(Debug)]
enum DeliveryOutcome {
    /// Handed to the gateway; delivery confirmation is out of band.
    Sent,
    /// No external hop involved, the notification is final.
    Delivered,
    Failed { error: String },
}

pub struct Dispatcher {
    state: Arc<AppState>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("dispatcher started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "dispatcher tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Delivers at most one notification. Returns true when a row was
    /// reserved, so the caller polls again immediately.
    pub async fn tick(&self) -> Result<bool, NotificationError> {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to obtain database connection in dispatcher");
                return Ok(false);
            }
        };

        let reserved = notifications::reserve_pending(&mut conn)?;
        drop(conn);

        let Some(notification) = reserved else {
            return Ok(false);
        };

        let outcome = self.deliver(&notification).await;
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "failed to record delivery outcome due to pool error");
                return Ok(true);
            }
        };

        match outcome {
            DeliveryOutcome::Sent => {
                notifications::mark_sent(&mut conn, notification.id)?;
                info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    event = %notification.event,
                    "notification sent"
                );
            }
            DeliveryOutcome::Delivered => {
                notifications::mark_delivered(&mut conn, notification.id)?;
                info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    "notification delivered"
                );
            }
            DeliveryOutcome::Failed { error } => {
                warn!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    attempts = notification.attempts,
                    %error,
                    "notification delivery failed"
                );
                notifications::record_failure(&mut conn, &notification, &error)?;
            }
        }

        Ok(true)
    }

    async fn deliver(&self, notification: &Notification) -> DeliveryOutcome {
        match notification.channel.as_str() {
            CHANNEL_EMAIL => {
                let result = self
                    .state
                    .email
                    .send_email(
                        &notification.recipient,
                        &self.state.config.notification_from_email,
                        &self.state.config.notification_from_name,
                        &notification.subject,
                        &notification.body,
                    )
                    .await;
                match result {
                    Ok(()) => DeliveryOutcome::Sent,
                    Err(err) => DeliveryOutcome::Failed {
                        error: err.to_string(),
                    },
                }
            }
            CHANNEL_SMS => {
                match self
                    .state
                    .sms
                    .send_sms(&notification.recipient, &notification.body)
                    .await
                {
                    // The SMS gateway confirms delivery synchronously.
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(err) => DeliveryOutcome::Failed {
                        error: err.to_string(),
                    },
                }
            }
            // In-app rows live in the database already; nothing leaves.
            CHANNEL_IN_APP => DeliveryOutcome::Delivered,
            other => DeliveryOutcome::Failed {
                error: format!("unknown channel '{other}'"),
            },
        }
    }
}
