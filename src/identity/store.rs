//! Session store: the single authoritative "who is signed in" value.
//!
//! On start the store issues one fetch against the [`SessionSource`] and opens its push
//! subscription at the same time. Whichever completes, in whatever order, goes through
//! [`Inner::apply`]: the value is overwritten (subject to [`MergePolicy`]), readers are
//! notified, and the [`SideEffectSink`] is driven when the signed-in/signed-out
//! classification changes. Completions are serialized by the apply lock, so sink calls
//! are observed in the same order as the merges that produced them.
//!
//! Two locks are involved. `apply_lock` orders completions and is held across the sink
//! call; `state` guards the value and is only held for short critical sections, so
//! readers are never blocked by a slow sink. See [`SideEffectSink`] for what a sink may
//! call back into.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{MergePolicy, SessionStoreConfig};
use crate::error::{SessionError, SessionResult};

use super::principal::{Identity, Traits};
use super::provider::{IdentityCallback, SessionSource, Subscription};
use super::session::{SessionSnapshot, SessionValue};
use super::sink::SideEffectSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Fetch,
    Push,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Fetch => f.write_str("fetch"),
            Completion::Push => f.write_str("push"),
        }
    }
}

/// Last transition handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatched {
    Associated(String),
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatch {
    Associate { id: String, traits: Traits },
    Clear,
}

/// Decide whether moving to `value` warrants a sink call, given what was last dispatched.
fn next_dispatch(prev: Option<&Dispatched>, value: &SessionValue, redispatch_on_switch: bool) -> Option<Dispatch> {
    match (prev, value) {
        (_, SessionValue::Unknown) => None,
        (Some(Dispatched::Cleared), SessionValue::Absent) => None,
        (Some(Dispatched::Associated(prev_id)), SessionValue::Present(ident)) => {
            if redispatch_on_switch && prev_id != &ident.id {
                Some(Dispatch::Associate { id: ident.id.clone(), traits: ident.traits() })
            } else {
                None
            }
        }
        (_, SessionValue::Present(ident)) => Some(Dispatch::Associate { id: ident.id.clone(), traits: ident.traits() }),
        (_, SessionValue::Absent) => Some(Dispatch::Clear),
    }
}

struct State {
    value: SessionValue,
    dispatched: Option<Dispatched>,
    push_applied: bool,
    torn_down: bool,
    fetch_error: Option<SessionError>,
    // Dropped on teardown so readers waiting for a change are released.
    snapshot_tx: Option<watch::Sender<SessionSnapshot>>,
}

struct Inner {
    config: SessionStoreConfig,
    sink: Arc<dyn SideEffectSink>,
    // Serializes merge-then-dispatch. Held across the sink call; `state` is not.
    apply_lock: Mutex<()>,
    state: Mutex<State>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl Inner {
    fn apply(&self, origin: Completion, observed: Option<Identity>) {
        let _serial = self.apply_lock.lock();
        let action = {
            let mut st = self.state.lock();
            if st.torn_down {
                debug!(target: "session", %origin, "completion after teardown discarded");
                return;
            }
            if origin == Completion::Fetch && self.config.merge_policy == MergePolicy::PushAuthoritative && st.push_applied {
                debug!(target: "session", "fetch result discarded: push already applied");
                return;
            }
            if origin == Completion::Push {
                st.push_applied = true;
            }

            st.value = SessionValue::from_observed(observed);
            debug!(
                target: "session",
                %origin,
                user_id = st.value.identity().map(|i| i.id.as_str()).unwrap_or("-"),
                "session value updated"
            );
            if let Some(tx) = &st.snapshot_tx {
                tx.send_replace(SessionSnapshot::from(&st.value));
            }

            let Some(action) = next_dispatch(st.dispatched.as_ref(), &st.value, self.config.redispatch_on_identity_switch) else {
                return;
            };
            st.dispatched = Some(match &action {
                Dispatch::Associate { id, .. } => Dispatched::Associated(id.clone()),
                Dispatch::Clear => Dispatched::Cleared,
            });
            action
        };
        self.dispatch(&action);
    }

    fn dispatch(&self, action: &Dispatch) {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match action {
            Dispatch::Associate { id, traits } => self.sink.associate(id, traits),
            Dispatch::Clear => self.sink.clear(),
        }));
        let failure = match outcome {
            Ok(Ok(())) => {
                debug!(target: "session", ?action, "sink dispatched");
                return;
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => "sink panicked".to_string(),
        };
        SessionError::sink("sink_dispatch_failed".to_string(), failure)
            .report("sink dispatch failed; session state unaffected");
    }

    fn record_fetch_failure(&self, err: SessionError) {
        let mut st = self.state.lock();
        if st.torn_down {
            debug!(target: "session", error = %err, "fetch failure after teardown discarded");
            return;
        }
        err.report("initial fetch failed; resolving as signed out");
        st.fetch_error = Some(err);
    }
}

/// Owns the session value, the push subscription and the in-flight initial fetch.
///
/// Create one per application session at the composition root and hand out
/// [`SessionReader`]s to consumers. Dropping the store tears it down.
pub struct SessionStore {
    inner: Arc<Inner>,
    subscription: Mutex<Option<Subscription>>,
    fetch_task: Mutex<Option<JoinHandle<()>>>,
    degraded: Option<SessionError>,
}

impl SessionStore {
    /// Start synchronizing with `source`. Must be called from within a tokio runtime.
    ///
    /// A failing subscription does not fail start: the store runs fetch-only and
    /// reports the condition through [`SessionStore::degraded`].
    pub fn start(
        source: &dyn SessionSource,
        sink: Arc<dyn SideEffectSink>,
        config: SessionStoreConfig,
    ) -> SessionResult<Self> {
        if let Err(e) = config.validate() {
            let err = SessionError::from(e);
            err.report("session store not started");
            return Err(err);
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(e) => {
                let err = SessionError::runtime("no_runtime".to_string(), format!("session store requires a tokio runtime: {}", e));
                err.report("session store not started");
                return Err(err);
            }
        };

        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let fetch_timeout = config.fetch_timeout();
        let state = State {
            value: SessionValue::Unknown,
            dispatched: None,
            push_applied: false,
            torn_down: false,
            fetch_error: None,
            snapshot_tx: Some(snapshot_tx),
        };
        let inner = Arc::new(Inner { config, sink, apply_lock: Mutex::new(()), state: Mutex::new(state), snapshot_rx });
        info!(
            target: "session",
            merge_policy = ?inner.config.merge_policy,
            fetch_timeout_ms = ?inner.config.fetch_timeout_ms,
            "session store starting"
        );

        let fetch = source.fetch_current_identity();
        let fetch_inner = Arc::clone(&inner);
        let fetch_task = handle.spawn(async move {
            let res = match fetch_timeout {
                Some(limit) => match tokio::time::timeout(limit, fetch).await {
                    Ok(r) => r,
                    Err(_) => Err(anyhow!("fetch timed out after {}ms", limit.as_millis())),
                },
                None => fetch.await,
            };
            let observed = match res {
                Ok(v) => v,
                Err(e) => {
                    fetch_inner.record_fetch_failure(SessionError::source_fetch("fetch_failed".to_string(), format!("{:#}", e)));
                    None
                }
            };
            fetch_inner.apply(Completion::Fetch, observed);
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let callback: IdentityCallback = Arc::new(move |observed: Option<Identity>| {
            if let Some(inner) = weak.upgrade() {
                inner.apply(Completion::Push, observed);
            }
        });
        let (subscription, degraded) = match source.subscribe(callback) {
            Ok(sub) => (Some(sub), None),
            Err(e) => {
                let err = SessionError::subscribe("subscribe_failed".to_string(), format!("{:#}", e));
                err.report("push subscription unavailable; running fetch-only");
                (None, Some(err))
            }
        };

        Ok(Self {
            inner,
            subscription: Mutex::new(subscription),
            fetch_task: Mutex::new(Some(fetch_task)),
            degraded,
        })
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader { rx: self.inner.snapshot_rx.clone() }
    }

    pub fn snapshot(&self) -> SessionSnapshot { self.inner.snapshot_rx.borrow().clone() }

    pub fn value(&self) -> SessionValue { self.inner.state.lock().value.clone() }

    pub fn is_resolved(&self) -> bool { self.inner.snapshot_rx.borrow().resolved }

    /// Why live updates are unavailable, if they are.
    pub fn degraded(&self) -> Option<&SessionError> { self.degraded.as_ref() }

    /// The initial fetch failure that was mapped to a signed-out state, if any.
    pub fn fetch_error(&self) -> Option<SessionError> { self.inner.state.lock().fetch_error.clone() }

    pub fn is_torn_down(&self) -> bool { self.inner.state.lock().torn_down }

    /// Wait for the initial fetch to complete and be applied (or discarded).
    /// Returns immediately on subsequent calls.
    pub async fn fetch_finished(&self) {
        let task = self.fetch_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(target: "session", error = %e, "initial fetch task did not complete");
            }
        }
    }

    /// Release the push subscription and stop all further state changes and sink calls.
    /// Waits for a sink call already in progress. Readers see the channel close; the
    /// in-flight fetch is left to finish and its result is discarded. Idempotent.
    pub fn teardown(&self) {
        {
            let _serial = self.inner.apply_lock.lock();
            let mut st = self.inner.state.lock();
            if st.torn_down {
                return;
            }
            st.torn_down = true;
            st.snapshot_tx = None;
        }
        let subscription = self.subscription.lock().take();
        let had_subscription = subscription.is_some();
        if let Some(sub) = subscription {
            sub.release();
        }
        info!(target: "session", released_subscription = had_subscription, "session store torn down");
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("snapshot", &self.snapshot())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Read-only view of a [`SessionStore`]. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionReader {
    pub fn snapshot(&self) -> SessionSnapshot { self.rx.borrow().clone() }

    pub fn identity(&self) -> Option<Identity> { self.rx.borrow().identity.clone() }

    pub fn is_resolved(&self) -> bool { self.rx.borrow().resolved }

    /// Register for change notifications. Registration ends when the receiver is dropped;
    /// `changed()` returns an error once the store is torn down.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        let mut rx = self.rx.clone();
        let _ = rx.borrow_and_update();
        rx
    }

    /// Wait until the store has resolved. If the store is torn down first, returns the last snapshot.
    pub async fn wait_resolved(&self) -> SessionSnapshot {
        let mut rx = self.rx.clone();
        let resolved = rx.wait_for(|s| s.resolved).await.map(|s| s.clone());
        match resolved {
            Ok(s) => s,
            Err(_) => rx.borrow().clone(),
        }
    }
}
