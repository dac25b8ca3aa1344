//! Best-effort collaborator seams: notification and identity-group sync.
//!
//! Both are fire-and-forget: implementations queue or dispatch internally,
//! and the engine logs failures at warn level without ever failing the
//! triggering transition.

use thiserror::Error;

use sprig_core::record::Refset;

#[derive(Debug, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// An outbound notification raised by a completed transition.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
  ReviewRequested {
    external_id:  String,
    title:        String,
    requested_by: String,
  },
  AssignmentChanged {
    external_id: String,
    assigned_to: Option<String>,
  },
  Published {
    external_id: String,
    title:       String,
  },
}

/// Outbound notification dispatch (e.g. email invites to reviewers).
pub trait Notifier: Send + Sync {
  fn send(&self, event: &NotificationEvent) -> Result<(), DispatchError>;
}

/// Identity-provider group synchronisation. Notified — never queried — when
/// a role-affecting assignment changes.
pub trait GroupSync: Send + Sync {
  fn assignment_changed(
    &self,
    record: &Refset,
    user: Option<&str>,
  ) -> Result<(), DispatchError>;
}

/// Dispatch a notification, logging and swallowing any failure.
pub(crate) fn notify_best_effort(
  notifier: Option<&dyn Notifier>,
  event: NotificationEvent,
) {
  if let Some(notifier) = notifier {
    if let Err(err) = notifier.send(&event) {
      tracing::warn!(%err, ?event, "notification dispatch failed");
    }
  }
}

/// Ping the group-sync collaborator, logging and swallowing any failure.
pub(crate) fn sync_best_effort(
  sync: Option<&dyn GroupSync>,
  record: &Refset,
  user: Option<&str>,
) {
  if let Some(sync) = sync {
    if let Err(err) = sync.assignment_changed(record, user) {
      tracing::warn!(%err, external_id = %record.external_id, "group sync failed");
    }
  }
}
