//! Subscription registry
//!
//! One registration per fingerprint. A registration owns the provider
//! listener, the last delivered value and the subscribers in registration
//! order. It is torn down, and its listener released, exactly when its last
//! subscriber leaves.
//!
//! Callbacks are always invoked with the registry lock released, so they may
//! subscribe or unsubscribe re-entrantly.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error};

use crate::error::{LiftError, LiftResult};
use crate::stats::{ActiveSubscription, CollectionStats};
use crate::store::ListenerHandle;

pub type ValueCallback<V> = Arc<dyn Fn(V) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(LiftError) + Send + Sync>;

struct Subscriber<V> {
    on_value: ValueCallback<V>,
    on_error: Option<ErrorCallback>,
}

struct Registration<V> {
    details: String,
    subscribers: BTreeMap<u64, Subscriber<V>>,
    listener: Option<ListenerHandle>,
    current: Option<V>,
}

struct RegistryState<V> {
    registrations: HashMap<String, Registration<V>>,
    next_subscriber: u64,
}

/// Fingerprint-keyed registry of live provider subscriptions
pub struct SubscriptionRegistry<V> {
    collection: String,
    stats: Arc<CollectionStats>,
    state: Mutex<RegistryState<V>>,
}

impl<V> SubscriptionRegistry<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(collection: impl Into<String>, stats: Arc<CollectionStats>) -> Self {
        Self {
            collection: collection.into(),
            stats,
            state: Mutex::new(RegistryState {
                registrations: HashMap::new(),
                next_subscriber: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<V>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Adds a subscriber to `fingerprint`.
    ///
    /// The first subscriber opens the provider listener through `open`; the
    /// registration already exists while `open` runs, so a listener that
    /// delivers synchronously reaches this subscriber. Later subscribers get
    /// the cached value replayed immediately, if one was ever delivered.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        fingerprint: &str,
        details: &str,
        on_value: ValueCallback<V>,
        on_error: Option<ErrorCallback>,
        open: F,
    ) -> LiftResult<SubscriptionHandle>
    where
        F: FnOnce() -> LiftResult<ListenerHandle>,
    {
        let (subscriber_id, existing) = {
            let mut state = self.lock();
            let subscriber_id = state.next_subscriber;
            state.next_subscriber += 1;

            let subscriber = Subscriber {
                on_value: Arc::clone(&on_value),
                on_error,
            };
            match state.registrations.get_mut(fingerprint) {
                Some(reg) => {
                    reg.subscribers.insert(subscriber_id, subscriber);
                    (subscriber_id, Some(reg.current.clone()))
                }
                None => {
                    let mut subscribers = BTreeMap::new();
                    subscribers.insert(subscriber_id, subscriber);
                    state.registrations.insert(
                        fingerprint.to_string(),
                        Registration {
                            details: details.to_string(),
                            subscribers,
                            listener: None,
                            current: None,
                        },
                    );
                    (subscriber_id, None)
                }
            }
        };

        let handle = self.handle_for(fingerprint, subscriber_id);

        match existing {
            Some(cached) => {
                if let Some(value) = cached {
                    on_value(value);
                }
            }
            None => {
                debug!(collection = %self.collection, fingerprint, details, "opening provider listener");
                self.stats.increment_subscriptions();
                match open() {
                    Ok(listener) => self.attach_listener(fingerprint, listener),
                    Err(e) => {
                        self.lock().registrations.remove(fingerprint);
                        handle.disarm();
                        return Err(e);
                    }
                }
            }
        }

        Ok(handle)
    }

    fn attach_listener(&self, fingerprint: &str, listener: ListenerHandle) {
        let orphan = {
            let mut state = self.lock();
            match state.registrations.get_mut(fingerprint) {
                Some(reg) => {
                    reg.listener = Some(listener);
                    None
                }
                // every subscriber left during the initial delivery
                None => Some(listener),
            }
        };
        if let Some(listener) = orphan {
            debug!(collection = %self.collection, fingerprint, "releasing orphaned provider listener");
            listener.release();
        }
    }

    fn handle_for(self: &Arc<Self>, fingerprint: &str, subscriber_id: u64) -> SubscriptionHandle {
        let registry: Weak<Self> = Arc::downgrade(self);
        let fingerprint = fingerprint.to_string();
        SubscriptionHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.unsubscribe(&fingerprint, subscriber_id);
            }
        })
    }

    fn unsubscribe(&self, fingerprint: &str, subscriber_id: u64) {
        let released = {
            let mut state = self.lock();
            let Some(reg) = state.registrations.get_mut(fingerprint) else {
                return;
            };
            reg.subscribers.remove(&subscriber_id);
            if reg.subscribers.is_empty() {
                state
                    .registrations
                    .remove(fingerprint)
                    .and_then(|reg| reg.listener)
            } else {
                None
            }
        };

        if let Some(listener) = released {
            debug!(collection = %self.collection, fingerprint, "closing provider listener");
            listener.release();
        }
    }

    /// Stores `value` as the current value and, if `fan_out`, hands it to
    /// every subscriber in registration order.
    pub fn deliver(&self, fingerprint: &str, value: V, fan_out: bool) {
        let callbacks: Vec<ValueCallback<V>> = {
            let mut state = self.lock();
            let Some(reg) = state.registrations.get_mut(fingerprint) else {
                return;
            };
            reg.current = Some(value.clone());
            if !fan_out {
                return;
            }
            reg.subscribers
                .values()
                .map(|s| Arc::clone(&s.on_value))
                .collect()
        };

        for callback in callbacks {
            callback(value.clone());
        }
    }

    /// Hands `error` to every error callback, or logs it if there are none
    pub fn deliver_error(&self, fingerprint: &str, err: LiftError) {
        let callbacks: Vec<ErrorCallback> = {
            let state = self.lock();
            let Some(reg) = state.registrations.get(fingerprint) else {
                return;
            };
            reg.subscribers
                .values()
                .filter_map(|s| s.on_error.clone())
                .collect()
        };

        if callbacks.is_empty() {
            error!(collection = %self.collection, fingerprint, error = %err, "unhandled subscription error");
            return;
        }
        for callback in callbacks {
            callback(err.clone());
        }
    }

    /// Last value delivered for `fingerprint`
    pub fn cached(&self, fingerprint: &str) -> Option<V> {
        self.lock()
            .registrations
            .get(fingerprint)
            .and_then(|reg| reg.current.clone())
    }

    pub fn subscriber_count(&self, fingerprint: &str) -> usize {
        self.lock()
            .registrations
            .get(fingerprint)
            .map_or(0, |reg| reg.subscribers.len())
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.lock().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active(&self) -> BTreeMap<String, ActiveSubscription> {
        self.lock()
            .registrations
            .iter()
            .map(|(fingerprint, reg)| {
                (
                    fingerprint.clone(),
                    ActiveSubscription {
                        subscription_details: reg.details.clone(),
                        subscriber_count: reg.subscribers.len(),
                    },
                )
            })
            .collect()
    }
}

/// Handle to one logical subscription.
///
/// `unsubscribe` is idempotent and may be called from inside a callback.
/// Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A handle with nothing to release
    pub fn noop() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    /// Groups several handles under one
    pub fn group(handles: Vec<SubscriptionHandle>) -> Self {
        Self::new(move || handles.iter().for_each(SubscriptionHandle::unsubscribe))
    }

    pub fn unsubscribe(&self) {
        let release = self.release.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    fn disarm(&self) {
        self.release.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}
