use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::info;

use super::principal::Traits;

/// Consumer of identity transitions (an analytics/identification pipeline).
/// Calls are fire-and-forget: the store logs and discards any error or panic.
///
/// Calls are made one at a time, in merge order, on whichever thread applied the
/// completion. From inside `associate`/`clear` a sink may:
/// - read the store: `SessionReader::{snapshot, identity, is_resolved}` and
///   `SessionStore::{snapshot, value, is_resolved, fetch_error, is_torn_down}`;
/// - hand work off to another task or thread.
///
/// It must not call `SessionStore::teardown` (or drop the store), and must not
/// synchronously make the source emit a notification (e.g. `sign_in`/`sign_out`):
/// both wait for the sink call in progress and deadlock.
pub trait SideEffectSink: Send + Sync {
    fn associate(&self, id: &str, traits: &Traits) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Associate { id: String, traits: Traits },
    Clear,
}

/// Keeps every call in order. Cloning shares the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    pub fn calls(&self) -> Vec<SinkCall> { self.calls.lock().clone() }
}

impl SideEffectSink for RecordingSink {
    fn associate(&self, id: &str, traits: &Traits) -> Result<()> {
        self.calls.lock().push(SinkCall::Associate { id: id.to_string(), traits: traits.clone() });
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.calls.lock().push(SinkCall::Clear);
        Ok(())
    }
}

/// Emits each identification as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl SideEffectSink for TracingSink {
    fn associate(&self, id: &str, traits: &Traits) -> Result<()> {
        info!(target: "analytics", user_id = id, email = ?traits.email, name = ?traits.name, "identify");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        info!(target: "analytics", "reset");
        Ok(())
    }
}
