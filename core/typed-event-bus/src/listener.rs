//! Listeners: typed callbacks with a priority and optional filters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bus::Bus;
use crate::error::{BusError, BusResult};
use crate::event::{validate_event_type, Event, EventType, TypeClosure};

/// Conventional priority values. Higher runs first.
pub mod priority {
    pub const HIGHEST: i32 = 200;
    pub const HIGH: i32 = 100;
    pub const DEFAULT: i32 = 0;
    pub const LOW: i32 = -100;
    pub const LOWEST: i32 = -200;
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique listener identity. Clones of a listener share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reusable, named event predicate.
///
/// Closures work directly with [`ListenerBuilder::filter`]; implement this
/// trait for filters referenced by type, e.g. from
/// [`Subscribe::filter`](crate::subscriber::Subscribe::filter).
pub trait Filter: Send + Sync + 'static {
    type Target: ?Sized + 'static;

    fn test(&self, event: &Self::Target) -> bool;
}

type Callback<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A callback for events of type `E`.
///
/// `E` may be unsized (`str`, `dyn Trait`) to receive every event type that
/// declares it as a supertype on buses with super listeners enabled.
pub struct Listener<E: ?Sized + 'static> {
    id: ListenerId,
    target: EventType,
    priority: i32,
    callback: Callback<E>,
    filters: Arc<[Predicate<E>]>,
}

impl<E: ?Sized + 'static> Listener<E> {
    /// Listener with the default priority and no filters.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Self::builder(callback).into_listener()
    }

    pub fn prioritized<F>(callback: F, priority: i32) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        Self::builder(callback).priority(priority).into_listener()
    }

    /// Listener whose errors are handed to the bus dispatcher.
    pub fn fallible<F>(callback: F) -> Self
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::fallible_builder(callback).into_listener()
    }

    pub fn builder<F>(callback: F) -> ListenerBuilder<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        ListenerBuilder::new(
            std::any::type_name::<F>(),
            Arc::new(move |event: &E| {
                callback(event);
                Ok(())
            }),
        )
    }

    pub fn fallible_builder<F>(callback: F) -> ListenerBuilder<E>
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        ListenerBuilder::new(std::any::type_name::<F>(), Arc::new(callback))
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn target(&self) -> EventType {
        self.target
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Runs the filters in order and, if all pass, the callback.
    pub fn accept(&self, event: &E) -> anyhow::Result<()> {
        if self.filters.iter().all(|filter| filter(event)) {
            (self.callback)(event)
        } else {
            Ok(())
        }
    }

    /// Returns this listener retargeted to the narrower event type `S`.
    ///
    /// `S` must declare `E` in its supertypes (or be `E`); the result keeps
    /// this listener's identity, priority and filters. On failure `self` is
    /// left untouched.
    pub fn narrow<S: Event>(&self) -> BusResult<Listener<S>> {
        let requested = EventType::of::<S>();
        validate_event_type(requested)?;
        let cast = TypeClosure::of::<S>()
            .upcaster::<E>()
            .ok_or(BusError::NarrowingViolation {
                current: self.target,
                requested,
            })?;

        let inner = self.clone();
        Ok(Listener {
            id: self.id,
            target: requested,
            priority: self.priority,
            callback: Arc::new(move |event: &S| match cast.cast(event) {
                Some(view) => inner.accept(view),
                None => Ok(()),
            }),
            filters: Arc::from(Vec::new()),
        })
    }
}

impl<E: ?Sized + 'static> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: self.target,
            priority: self.priority,
            callback: Arc::clone(&self.callback),
            filters: Arc::clone(&self.filters),
        }
    }
}

impl<E: ?Sized + 'static> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("priority", &self.priority)
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Collects priority and filters before a [`Listener`] is created.
pub struct ListenerBuilder<E: ?Sized + 'static> {
    callback_name: &'static str,
    callback: Callback<E>,
    priority: i32,
    filters: Vec<Predicate<E>>,
}

impl<E: ?Sized + 'static> ListenerBuilder<E> {
    fn new(callback_name: &'static str, callback: Callback<E>) -> Self {
        Self {
            callback_name,
            callback,
            priority: priority::DEFAULT,
            filters: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a predicate; filters run in the order they were added.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn filter_with<F>(self, filter: F) -> Self
    where
        F: Filter<Target = E>,
    {
        self.filter(move |event: &E| filter.test(event))
    }

    /// Builds the listener, checking that `E` is an admissible target.
    pub fn build(self) -> BusResult<Listener<E>> {
        validate_event_type(EventType::of::<E>()).map_err(|err| {
            BusError::TargetResolutionFailed {
                callback: self.callback_name,
                reason: err.to_string(),
            }
        })?;
        Ok(self.into_listener())
    }

    pub(crate) fn with_filters(mut self, filters: Vec<Predicate<E>>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub(crate) fn into_listener(self) -> Listener<E> {
        Listener {
            id: ListenerId::next(),
            target: EventType::of::<E>(),
            priority: self.priority,
            callback: self.callback,
            filters: Arc::from(self.filters),
        }
    }
}

/// A listener of any event type, as produced by binding a subscriber.
pub struct BoundListener(Box<dyn ErasedListener>);

impl BoundListener {
    pub fn id(&self) -> ListenerId {
        self.0.id()
    }

    pub fn target(&self) -> EventType {
        self.0.target()
    }

    pub fn priority(&self) -> i32 {
        self.0.priority()
    }

    pub(crate) fn install(&self, bus: &Bus) -> BusResult<bool> {
        self.0.install(bus)
    }

    pub(crate) fn uninstall(&self, bus: &Bus) -> bool {
        self.0.uninstall(bus)
    }
}

impl<E: ?Sized + 'static> From<Listener<E>> for BoundListener {
    fn from(listener: Listener<E>) -> Self {
        Self(Box::new(listener))
    }
}

impl fmt::Debug for BoundListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundListener")
            .field("id", &self.id())
            .field("target", &self.target())
            .field("priority", &self.priority())
            .finish()
    }
}

trait ErasedListener: Send + Sync {
    fn id(&self) -> ListenerId;
    fn target(&self) -> EventType;
    fn priority(&self) -> i32;
    fn install(&self, bus: &Bus) -> BusResult<bool>;
    fn uninstall(&self, bus: &Bus) -> bool;
}

impl<E: ?Sized + 'static> ErasedListener for Listener<E> {
    fn id(&self) -> ListenerId {
        self.id
    }

    fn target(&self) -> EventType {
        self.target
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn install(&self, bus: &Bus) -> BusResult<bool> {
        bus.subscribe_listener(self.clone())
    }

    fn uninstall(&self, bus: &Bus) -> bool {
        bus.unsubscribe_listener(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::any::Any;

    struct LengthOf3;

    impl Filter for LengthOf3 {
        type Target = str;

        fn test(&self, event: &str) -> bool {
            event.len() == 3
        }
    }

    #[test]
    fn test_filters_gate_callback_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);
        let listener = Listener::builder(move |e: &str| sink.lock().push(e.to_string()))
            .filter(move |e: &str| {
                first.lock().push("starts_with_a");
                e.starts_with('a')
            })
            .filter(move |e: &str| {
                second.lock().push("len_3");
                e.len() == 3
            })
            .build()
            .unwrap();

        listener.accept("abc").unwrap();
        listener.accept("xyz").unwrap();
        listener.accept("abcd").unwrap();

        assert_eq!(*seen.lock(), vec!["abc".to_string()]);
        // "xyz" stops at the first filter.
        assert_eq!(
            *calls.lock(),
            vec!["starts_with_a", "len_3", "starts_with_a", "starts_with_a", "len_3"]
        );
    }

    #[test]
    fn test_named_filter() {
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let listener = Listener::builder(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .filter_with(LengthOf3)
        .build()
        .unwrap();

        listener.accept("abc").unwrap();
        listener.accept("abcd").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_identity() {
        let a = Listener::new(|_: &String| {});
        let b = a.clone();
        let c = Listener::new(|_: &String| {});
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a.priority(), priority::DEFAULT);
        assert_eq!(a.target(), EventType::of::<String>());
    }

    #[test]
    fn test_build_rejects_unresolvable_target() {
        let err = Listener::<dyn Any>::builder(|_| {}).build().unwrap_err();
        assert_eq!(err.as_label(), "target_resolution_failed");
    }

    #[test]
    fn test_narrow_to_subtype() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let general = Listener::prioritized(move |s: &str| sink.lock().push(s.to_string()), 5);

        let narrowed = general.narrow::<String>().unwrap();
        assert_eq!(narrowed.id(), general.id());
        assert_eq!(narrowed.priority(), 5);
        assert_eq!(narrowed.target(), EventType::of::<String>());

        narrowed.accept(&"hello".to_string()).unwrap();
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_narrow_rejects_widening() {
        let listener = Listener::new(|_: &String| {});
        let err = listener.narrow::<i32>().unwrap_err();
        assert!(matches!(err, BusError::NarrowingViolation { .. }));
        assert_eq!(listener.target(), EventType::of::<String>());
    }

    #[test]
    fn test_fallible_listener_reports_error() {
        let listener = Listener::fallible(|n: &i32| {
            anyhow::ensure!(*n >= 0, "negative input {n}");
            Ok(())
        });
        assert!(listener.accept(&1).is_ok());
        assert!(listener.accept(&-1).is_err());
    }
}
