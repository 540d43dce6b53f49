//! # Event Bus
//!
//! Broadcast channel for engine lifecycle notifications: Trakt authorization
//! progress and reconciliation run progress. Hosts subscribe to surface
//! device codes to the user or to forward run summaries.
//!
//! ## Usage
//!
//! ```no_run
//! use core_runtime::events::{CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut events = bus.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event.description());
//!     }
//! });
//! # }
//! ```
//!
//! Emitting with no subscribers returns an error that publishers ignore; the
//! engine never depends on anyone listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::SendError, Receiver};

/// Default per-subscriber buffer
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event type carried by the [`EventBus`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Trakt credential lifecycle
    Auth(AuthEvent),
    /// Reconciliation run lifecycle
    Run(RunEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Run(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::Expired { .. }) | CoreEvent::Auth(AuthEvent::Denied) => {
                EventSeverity::Error
            }
            CoreEvent::Run(RunEvent::Completed { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Run(RunEvent::Skipped { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::DeviceCodeIssued { .. })
            | CoreEvent::Auth(AuthEvent::Authorized)
            | CoreEvent::Run(RunEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Trakt device-flow and token lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A device code is waiting for the user to approve it.
    DeviceCodeIssued {
        user_code: String,
        verification_url: String,
        /// Unix timestamp (seconds) after which the code is void
        expires_at: i64,
    },
    /// The user approved the device; tokens are stored.
    Authorized,
    /// Tokens were silently refreshed.
    TokenRefreshed { expires_at: i64 },
    /// The credential can no longer be used; re-authorization required.
    Expired { reason: String },
    /// The user rejected the device code.
    Denied,
}

impl AuthEvent {
    pub fn description(&self) -> &str {
        match self {
            AuthEvent::DeviceCodeIssued { .. } => "Trakt device code issued",
            AuthEvent::Authorized => "Trakt authorized",
            AuthEvent::TokenRefreshed { .. } => "Trakt token refreshed",
            AuthEvent::Expired { .. } => "Trakt authorization expired",
            AuthEvent::Denied => "Trakt authorization denied",
        }
    }
}

// ============================================================================
// Run Events
// ============================================================================

/// Reconciliation run events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RunEvent {
    /// A batch of collections started.
    Started {
        run_id: String,
        collections: usize,
        dry_run: bool,
    },
    /// One collection finished (any terminal status).
    CollectionFinished {
        run_id: String,
        collection: String,
        status: String,
    },
    /// A collection firing was dropped because its previous run is in flight.
    Skipped { collection: String },
    /// The batch finished.
    Completed {
        run_id: String,
        added: usize,
        removed: usize,
        failed: usize,
    },
}

impl RunEvent {
    pub fn description(&self) -> &str {
        match self {
            RunEvent::Started { .. } => "Run started",
            RunEvent::CollectionFinished { .. } => "Collection finished",
            RunEvent::Skipped { .. } => "Collection skipped, previous run still in flight",
            RunEvent::Completed { .. } => "Run completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Multi-subscriber event broadcaster built on `tokio::sync::broadcast`
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    ///
    /// A subscriber that falls more than `capacity` events behind receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(CoreEvent::Auth(AuthEvent::Authorized)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Run(RunEvent::Started {
            run_id: "run-1".to_string(),
            collections: 3,
            dry_run: true,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Auth(AuthEvent::TokenRefreshed { expires_at: 42 });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "Auth");
        assert_eq!(json["payload"]["event"], "TokenRefreshed");
        assert_eq!(json["payload"]["expires_at"], 42);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            CoreEvent::Auth(AuthEvent::Expired {
                reason: "revoked".to_string()
            })
            .severity(),
            EventSeverity::Error
        );
        assert_eq!(
            CoreEvent::Run(RunEvent::Completed {
                run_id: "r".to_string(),
                added: 1,
                removed: 0,
                failed: 1,
            })
            .severity(),
            EventSeverity::Warning
        );
        assert_eq!(
            CoreEvent::Run(RunEvent::Skipped {
                collection: "Trending".to_string()
            })
            .severity(),
            EventSeverity::Warning
        );
    }
}
