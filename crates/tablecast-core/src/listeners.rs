// ── Listener registries ──
//
// Ordered callback sets keyed by a registration token. Each `add` returns
// a `Subscription` that removes exactly that registration, so registering
// the same closure twice yields two independent entries.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered set of listeners for values of type `T`.
pub struct ListenerSet<T> {
    registry: Arc<Registry<T>>,
}

struct Registry<T> {
    next_token: AtomicU64,
    entries: Mutex<BTreeMap<u64, Callback<T>>>,
}

impl<T> Registry<T> {
    fn entries(&self) -> MutexGuard<'_, BTreeMap<u64, Callback<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Type-erased removal so a [`Subscription`] does not carry `T`.
trait Unregister: Send + Sync {
    fn unregister(&self, token: u64);
    fn contains(&self, token: u64) -> bool;
}

impl<T> Unregister for Registry<T> {
    fn unregister(&self, token: u64) {
        self.entries().remove(&token);
    }

    fn contains(&self, token: u64) -> bool {
        self.entries().contains_key(&token)
    }
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_token: AtomicU64::new(1),
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a listener. Listeners fire in registration order.
    pub fn add<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
        self.registry.entries().insert(token, Arc::new(listener));

        let registry: Weak<dyn Unregister> = Arc::downgrade(&self.registry) as Weak<Registry<T>>;
        Subscription { registry, token }
    }

    /// Call every listener with `value`.
    ///
    /// Runs over a snapshot taken before the first call, so listeners may
    /// add or remove registrations (their own included) while being notified.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.registry.entries().values().cloned().collect();
        for listener in snapshot {
            listener(value);
        }
    }

    /// Remove every listener. Outstanding subscriptions become no-ops.
    pub fn clear(&self) {
        self.registry.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.registry.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.entries().is_empty()
    }
}

impl<T: 'static> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.registry.entries().len())
            .finish()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle to one registration in a [`ListenerSet`].
///
/// Dropping the handle does not unregister; call
/// [`unsubscribe`](Self::unsubscribe). Unsubscribing is idempotent and
/// harmless after the set was cleared or dropped.
pub struct Subscription {
    registry: Weak<dyn Unregister>,
    token: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.token);
        }
    }

    /// Whether this registration is still in its set.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.token))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + Clone + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_in_registration_order() {
        let set = ListenerSet::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _ = set.add(move |v: &u32| seen.lock().unwrap().push(format!("{tag}{v}")));
        }

        set.emit(&1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn same_listener_twice_unsubscribe_once() {
        let set = ListenerSet::<u32>::new();
        let (hits, f) = counter();

        let first = set.add(f.clone());
        let _second = set.add(f);
        assert_eq!(set.len(), 2);

        first.unsubscribe();
        set.emit(&7);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let set = ListenerSet::<u32>::new();
        let (hits, f) = counter();
        let (other_hits, g) = counter();

        let sub = set.add(f);
        let _keep = set.add(g);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());

        set.emit(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_detaches_outstanding_subscriptions() {
        let set = ListenerSet::<u32>::new();
        let (_, f) = counter();
        let sub = set.add(f);

        set.clear();
        assert!(set.is_empty());
        assert!(!sub.is_active());
        sub.unsubscribe();

        let (hits, g) = counter();
        let fresh = set.add(g);
        sub.unsubscribe();
        assert!(fresh.is_active());
        set.emit(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let set = Arc::new(ListenerSet::<u32>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (hits, _) = counter();

        let s = slot.clone();
        let h = hits.clone();
        let sub = set.add(move |_: &u32| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        set.emit(&1);
        set.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outlives_set() {
        let set = ListenerSet::<u32>::new();
        let (_, f) = counter();
        let sub = set.add(f);
        drop(set);
        assert!(!sub.is_active());
        sub.unsubscribe();
    }
}
