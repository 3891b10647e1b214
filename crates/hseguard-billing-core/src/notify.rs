//! Outbound notifications and domain event publishing
//!
//! Both seams are fire-and-forget from the lifecycle's point of view: a
//! failure is logged and never rolls back or fails a committed transition.

use async_trait::async_trait;
use hseguard_types::{DomainEvent, TenantId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Category of a system notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Informational (trial started, plan changed)
    Info,
    /// Needs attention soon (expiration warning)
    Warning,
    /// Access was lost (suspended, expired)
    Alert,
}

impl NotificationKind {
    /// Label used in logs
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Alert => "alert",
        }
    }
}

/// Delivery failure reported by a [`NotificationSender`]
#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Sends system notifications to a tenant's administrators
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver one notification
    async fn send_system_notification(
        &self,
        tenant_id: TenantId,
        subject: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotificationError>;
}

/// Notification sender that only writes a log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSender;

#[async_trait]
impl NotificationSender for TracingNotificationSender {
    async fn send_system_notification(
        &self,
        tenant_id: TenantId,
        subject: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            tenant_id = %tenant_id,
            kind = kind.as_str(),
            subject,
            message,
            "System notification"
        );
        Ok(())
    }
}

/// Publishes domain events after their transition committed
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Must not block.
    fn publish(&self, event: DomainEvent);
}

/// Receiving half of a [`ChannelEventPublisher`]
pub type EventReceiver = mpsc::Receiver<DomainEvent>;

/// Event publisher backed by a bounded channel.
///
/// Events are queued with `try_send`; when the buffer is full or the
/// receiver is gone the event is dropped with a warning.
#[derive(Clone, Debug)]
pub struct ChannelEventPublisher {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelEventPublisher {
    /// Create a publisher and the receiver its events arrive on
    pub fn new(buffer_size: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: DomainEvent) {
        let name = event.name();
        let tenant_id = event.tenant_id();
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(
                event = name,
                tenant_id = %tenant_id,
                error = %e,
                "Dropped domain event"
            );
        }
    }
}
