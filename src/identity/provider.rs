use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use crate::tprintln;

use super::principal::Identity;

/// Callback invoked by a source whenever the signed-in identity changes.
pub type IdentityCallback = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

/// One active push registration. Releasing consumes the handle, so it runs at most once.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { release: Some(Box::new(release)) }
    }

    pub fn release(mut self) {
        if let Some(f) = self.release.take() { f(); }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.release.take() { f(); }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.release.is_some()).finish()
    }
}

/// External identity provider client: a one-shot fetch plus a push stream.
pub trait SessionSource: Send + Sync {
    /// Resolve the currently signed-in identity, or `None` when nobody is.
    fn fetch_current_identity(&self) -> BoxFuture<'static, Result<Option<Identity>>>;

    /// Register for identity changes. The callback may fire before this returns.
    fn subscribe(&self, callback: IdentityCallback) -> Result<Subscription>;
}

#[derive(Default)]
struct LocalState {
    current: Option<Identity>,
    fetch_failure: Option<String>,
    subscribe_failure: Option<String>,
}

/// In-process identity provider. Used by the demo binary and for tests.
#[derive(Clone, Default)]
pub struct LocalSessionSource {
    state: Arc<RwLock<LocalState>>,
    subscribers: Arc<RwLock<BTreeMap<u64, IdentityCallback>>>,
    next_id: Arc<AtomicU64>,
}

impl LocalSessionSource {
    pub fn new() -> Self { Self::default() }

    pub fn with_identity(identity: Identity) -> Self {
        let src = Self::default();
        src.state.write().current = Some(identity);
        src
    }

    pub fn current(&self) -> Option<Identity> { self.state.read().current.clone() }

    pub fn sign_in(&self, identity: Identity) {
        tprintln!("local_source.sign_in id={}", identity.id);
        self.state.write().current = Some(identity.clone());
        self.notify(Some(identity));
    }

    pub fn sign_out(&self) {
        tprintln!("local_source.sign_out");
        self.state.write().current = None;
        self.notify(None);
    }

    /// Make subsequent fetches fail with the given message (`None` restores normal fetches).
    pub fn set_fetch_failure(&self, msg: Option<&str>) {
        self.state.write().fetch_failure = msg.map(str::to_string);
    }

    /// Make subsequent subscribe calls fail with the given message.
    pub fn set_subscribe_failure(&self, msg: Option<&str>) {
        self.state.write().subscribe_failure = msg.map(str::to_string);
    }

    pub fn subscriber_count(&self) -> usize { self.subscribers.read().len() }

    fn notify(&self, observed: Option<Identity>) {
        // Snapshot callbacks so none runs under our lock
        let callbacks: Vec<IdentityCallback> = self.subscribers.read().values().cloned().collect();
        for cb in callbacks {
            cb(observed.clone());
        }
    }
}

impl SessionSource for LocalSessionSource {
    fn fetch_current_identity(&self) -> BoxFuture<'static, Result<Option<Identity>>> {
        let st = self.state.read();
        let out = match &st.fetch_failure {
            Some(msg) => Err(anyhow!("fetch_failed: {}", msg)),
            None => Ok(st.current.clone()),
        };
        future::ready(out).boxed()
    }

    fn subscribe(&self, callback: IdentityCallback) -> Result<Subscription> {
        if let Some(msg) = &self.state.read().subscribe_failure {
            return Err(anyhow!("subscribe_failed: {}", msg));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(id, callback);
        tprintln!("local_source.subscribe sub={}", id);
        let subscribers = Arc::clone(&self.subscribers);
        Ok(Subscription::new(move || {
            subscribers.write().remove(&id);
            tprintln!("local_source.unsubscribe sub={}", id);
        }))
    }
}
