//! Fire-and-forget event emission

use crate::types::SavedLockType;

/// Events emitted at subsystem seams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    ObserverPassCompleted,
    ObserverPassFailed,
    TransactionWritten { anchor_string: String },
    LockSaved { lock_type: SavedLockType },
    LockRebroadcast { transaction_id: String },
    LockMonitorPassFailed,
}

/// Injectable sink for service events.
///
/// Core logic never depends on delivery succeeding; implementations must
/// not block or fail.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ServiceEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: ServiceEvent) {}
}
