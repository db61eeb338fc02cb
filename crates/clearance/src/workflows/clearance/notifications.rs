use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::domain::{
    department_channel, generate_id, Decision, Notification, NotificationId, NotificationKind,
};
use super::events::DomainEvent;
use super::repository::ClearanceStore;

const CHANNEL_CAPACITY: usize = 32;

/// Per-recipient broadcast channels for live listeners (sockets, push bridges).
#[derive(Debug, Default, Clone)]
pub struct NotificationHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Notification>>>>,
}

impl NotificationHub {
    pub fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Notification> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(recipient.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Recipients that currently hold a channel.
    pub fn active_channels(&self) -> usize {
        match self.channels.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Returns the number of live listeners reached. Never blocks; slow
    /// listeners lag rather than stall the sender.
    pub fn broadcast(&self, notification: &Notification) -> usize {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sender) = channels.get(&notification.recipient) else {
            return 0;
        };
        match sender.send(notification.clone()) {
            Ok(reached) => reached,
            Err(_) => {
                channels.remove(&notification.recipient);
                0
            }
        }
    }
}

/// Turns domain events into durable notification records and live pushes.
pub struct NotificationDispatcher<S> {
    store: Arc<S>,
    hub: NotificationHub,
}

impl<S> NotificationDispatcher<S>
where
    S: ClearanceStore + 'static,
{
    pub fn new(store: Arc<S>, hub: NotificationHub) -> Self {
        Self { store, hub }
    }

    pub fn dispatch(&self, event: &DomainEvent) -> Vec<Notification> {
        let mut delivered = Vec::new();
        for (recipient, kind, message) in fan_out(event) {
            let notification = Notification {
                id: NotificationId(generate_id("ntf")),
                recipient,
                message,
                kind,
                read: false,
                created_at: Utc::now(),
            };

            match self.store.insert_notification(notification) {
                Ok(stored) => {
                    let reached = self.hub.broadcast(&stored);
                    debug!(recipient = %stored.recipient, reached, "notification dispatched");
                    delivered.push(stored);
                }
                Err(err) => {
                    warn!(event = event.name(), error = %err, "failed to persist notification")
                }
            }
        }
        delivered
    }

    /// Drains the event queue until every publisher has been dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DomainEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        debug!("notification dispatcher stopped");
    }
}

fn fan_out(event: &DomainEvent) -> Vec<(String, NotificationKind, String)> {
    match event {
        DomainEvent::ObligationAdded {
            student_id,
            department,
            amount,
            ..
        } => vec![(
            student_id.0.clone(),
            NotificationKind::ObligationAdded,
            format!("{} recorded a new obligation of {amount}", department.label()),
        )],
        DomainEvent::RequestSubmitted {
            student_id,
            department,
            ..
        } => vec![(
            department_channel(*department),
            NotificationKind::RequestSubmitted,
            format!("Student {student_id} requested {} clearance", department.label()),
        )],
        DomainEvent::RequestDecided {
            student_id,
            department,
            decision,
            comment,
            ..
        } => {
            let verdict = match decision {
                Decision::Approved => "approved",
                Decision::Rejected => "rejected",
            };
            let mut message = format!("{} {verdict} your clearance request", department.label());
            if let Some(comment) = comment {
                message.push_str(": ");
                message.push_str(comment);
            }
            vec![(student_id.0.clone(), NotificationKind::RequestDecided, message)]
        }
        DomainEvent::ClearanceAchieved {
            student_id,
            certificate,
        } => vec![(
            student_id.0.clone(),
            NotificationKind::ClearanceAchieved,
            format!(
                "All departments cleared. Certificate available at {}",
                certificate.reference
            ),
        )],
        DomainEvent::ReportFiled {
            student_id,
            department,
            ..
        } => vec![(
            department_channel(*department),
            NotificationKind::ReportFiled,
            format!("Student {student_id} filed a report"),
        )],
        DomainEvent::ReportResolved {
            student_id,
            department,
            ..
        } => vec![(
            student_id.0.clone(),
            NotificationKind::ReportResolved,
            format!("{} resolved your report", department.label()),
        )],
    }
}
