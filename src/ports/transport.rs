//! Transport Port - Chat Events In, Notifications Out
//!
//! The chat platform itself is outside this crate. Inbound traffic is
//! reduced to `InboundEvent`; outbound traffic goes through `Notifier`,
//! which is best-effort: a failed notification never undoes a committed
//! ledger or deal mutation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ActorId;

/// How an inbound event was produced on the chat side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  /// Slash command, e.g. `/balance` (payload without the slash).
  Command,
  /// Button press carrying callback data, e.g. `role_seller`.
  Callback,
  /// Free-form text message.
  Text,
}

/// One inbound event from an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
  /// Who sent it.
  pub actor_id: ActorId,
  /// Command, callback or text.
  pub kind: EventKind,
  /// Command line, callback data or message text.
  pub payload: String,
  /// Display handle, used when telling the counterparty who joined.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
}

impl InboundEvent {
  pub fn new(actor_id: impl Into<ActorId>, kind: EventKind, payload: impl Into<String>) -> Self {
    Self {
      actor_id: actor_id.into(),
      kind,
      payload: payload.into(),
      username: None,
    }
  }

  /// Name to show other users: `@username` or the raw actor id.
  pub fn display_name(&self) -> String {
    match &self.username {
      Some(name) if !name.is_empty() => format!("@{name}"),
      _ => self.actor_id.to_string(),
    }
  }
}

/// Trait for outbound messages to actors.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
  /// Deliver `message` to `actor`. Errors are logged by callers, never retried.
  async fn notify(&self, actor: &ActorId, message: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_name_prefers_username() {
    let mut event = InboundEvent::new("42", EventKind::Text, "hi");
    assert_eq!(event.display_name(), "42");
    event.username = Some("moon".to_string());
    assert_eq!(event.display_name(), "@moon");
  }

  #[test]
  fn test_event_json_shape() {
    let json = r#"{"actor_id":"7","kind":"callback","payload":"role_buyer"}"#;
    let event: InboundEvent = serde_json::from_str(json).unwrap();
    assert_eq!(event.kind, EventKind::Callback);
    assert_eq!(event.actor_id, ActorId::from("7"));
    assert!(event.username.is_none());
  }
}
