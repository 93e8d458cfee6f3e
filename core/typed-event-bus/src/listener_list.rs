//! Per-event-type listener storage.
//!
//! Every list keeps its listeners in non-increasing priority order, equal
//! priorities in insertion order, and hands the dispatcher an immutable
//! snapshot so callbacks never run under the list's write lock.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::BusResult;
use crate::event::EventType;
use crate::listener::Listener;

/// Concurrency-safe ordered collection of listeners for one event type.
pub trait ListenerList<E: ?Sized + 'static>: Send + Sync {
    /// Dispatches `event` to the current snapshot.
    fn post(&self, event: &E, dispatcher: &Dispatcher) -> BusResult<Delivery>;

    /// Inserts `listener` at its priority position. Returns `false` if a
    /// listener with the same identity is already present.
    fn add(&self, listener: Listener<E>) -> bool;

    /// Returns `false` if no listener with the same identity is present.
    fn remove(&self, listener: &Listener<E>) -> bool;

    fn snapshot(&self) -> Arc<[Listener<E>]>;

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Copy-on-write list: publishes never wait on mutations.
///
/// A publish that took its snapshot before an `unsubscribe` may still
/// deliver to the removed listener.
pub struct CopyOnWriteListenerList<E: ?Sized + 'static> {
    listeners: RwLock<Arc<[Listener<E>]>>,
    write: Mutex<()>,
}

impl<E: ?Sized + 'static> CopyOnWriteListenerList<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::from(Vec::new())),
            write: Mutex::new(()),
        }
    }

    fn publish(&self, next: Vec<Listener<E>>) {
        *self.listeners.write() = Arc::from(next);
    }
}

impl<E: ?Sized + 'static> Default for CopyOnWriteListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized + 'static> ListenerList<E> for CopyOnWriteListenerList<E> {
    fn post(&self, event: &E, dispatcher: &Dispatcher) -> BusResult<Delivery> {
        let snapshot = self.snapshot();
        dispatcher.dispatch(event, snapshot.iter())
    }

    fn add(&self, listener: Listener<E>) -> bool {
        let _write = self.write.lock();
        let current = self.snapshot();
        if current.iter().any(|l| l.id() == listener.id()) {
            return false;
        }

        // After every listener of equal or higher priority.
        let index = current.partition_point(|l| l.priority() >= listener.priority());
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend_from_slice(&current[..index]);
        next.push(listener);
        next.extend_from_slice(&current[index..]);
        self.publish(next);
        true
    }

    fn remove(&self, listener: &Listener<E>) -> bool {
        let _write = self.write.lock();
        let current = self.snapshot();
        let Some(index) = current.iter().position(|l| l.id() == listener.id()) else {
            return false;
        };

        let mut next = Vec::with_capacity(current.len() - 1);
        next.extend_from_slice(&current[..index]);
        next.extend_from_slice(&current[index + 1..]);
        self.publish(next);
        true
    }

    fn snapshot(&self) -> Arc<[Listener<E>]> {
        Arc::clone(&self.listeners.read())
    }
}

/// Wraps another list behind a read-write lock.
///
/// Publishes hold the shared side for their whole dispatch, so `remove`
/// returns only after in-flight publishes on this list have finished. The
/// shared side is taken recursively: a listener may publish the same event
/// type again, but must not subscribe or unsubscribe on this list.
pub struct ReadWriteLockListenerList<E: ?Sized + 'static> {
    backing: Box<dyn ListenerList<E>>,
    lock: RwLock<()>,
}

impl<E: ?Sized + 'static> ReadWriteLockListenerList<E> {
    pub fn new(backing: Box<dyn ListenerList<E>>) -> Self {
        Self {
            backing,
            lock: RwLock::new(()),
        }
    }
}

impl<E: ?Sized + 'static> ListenerList<E> for ReadWriteLockListenerList<E> {
    fn post(&self, event: &E, dispatcher: &Dispatcher) -> BusResult<Delivery> {
        let _read = self.lock.read_recursive();
        self.backing.post(event, dispatcher)
    }

    fn add(&self, listener: Listener<E>) -> bool {
        let _write = self.lock.write();
        self.backing.add(listener)
    }

    fn remove(&self, listener: &Listener<E>) -> bool {
        let _write = self.lock.write();
        self.backing.remove(listener)
    }

    fn snapshot(&self) -> Arc<[Listener<E>]> {
        let _read = self.lock.read_recursive();
        self.backing.snapshot()
    }
}

/// Creates the list a bus uses for each newly seen event type.
#[derive(Debug, Clone, Default)]
pub enum ListenerListFactory {
    #[default]
    CopyOnWrite,
    /// A copy-on-write list wrapped in [`ReadWriteLockListenerList`].
    ReadWriteLocked,
    /// User-supplied constructors for chosen types, see [`CustomListFactory`].
    Custom(Arc<CustomListFactory>),
}

impl ListenerListFactory {
    pub fn create<E: ?Sized + 'static>(&self) -> Box<dyn ListenerList<E>> {
        match self {
            ListenerListFactory::CopyOnWrite => Box::new(CopyOnWriteListenerList::new()),
            ListenerListFactory::ReadWriteLocked => Box::new(ReadWriteLockListenerList::new(
                Box::new(CopyOnWriteListenerList::new()),
            )),
            ListenerListFactory::Custom(custom) => custom.create::<E>(),
        }
    }
}

impl From<CustomListFactory> for ListenerListFactory {
    fn from(custom: CustomListFactory) -> Self {
        ListenerListFactory::Custom(Arc::new(custom))
    }
}

type ListConstructor<E> = Arc<dyn Fn() -> Box<dyn ListenerList<E>> + Send + Sync>;

/// Per-type list constructors on top of a fallback factory.
///
/// ```
/// use typed_event_bus::{Bus, CopyOnWriteListenerList, CustomListFactory, ListenerListFactory};
///
/// let factory = CustomListFactory::new(ListenerListFactory::ReadWriteLocked)
///     .with::<u32, _>(|| Box::new(CopyOnWriteListenerList::<u32>::new()));
/// let bus = Bus::builder().name("custom").list_factory(factory.into()).build().unwrap();
/// # let _ = bus;
/// ```
#[derive(Clone)]
pub struct CustomListFactory {
    fallback: ListenerListFactory,
    // TypeId -> ListConstructor<E> for that E
    constructors: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    types: Vec<EventType>,
}

impl CustomListFactory {
    pub fn new(fallback: ListenerListFactory) -> Self {
        Self {
            fallback,
            constructors: HashMap::new(),
            types: Vec::new(),
        }
    }

    /// Build the list for target type `E` with `create`. A later call for
    /// the same type replaces the earlier constructor.
    pub fn with<E, F>(mut self, create: F) -> Self
    where
        E: ?Sized + 'static,
        F: Fn() -> Box<dyn ListenerList<E>> + Send + Sync + 'static,
    {
        let create: ListConstructor<E> = Arc::new(create);
        let ty = EventType::of::<E>();
        if self.constructors.insert(ty.id(), Arc::new(create)).is_none() {
            self.types.push(ty);
        }
        self
    }

    pub fn create<E: ?Sized + 'static>(&self) -> Box<dyn ListenerList<E>> {
        let custom = self
            .constructors
            .get(&TypeId::of::<E>())
            .and_then(|create| create.downcast_ref::<ListConstructor<E>>());
        match custom {
            Some(create) => create(),
            None => self.fallback.create::<E>(),
        }
    }
}

impl fmt::Debug for CustomListFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomListFactory")
            .field("fallback", &self.fallback)
            .field("types", &self.types)
            .finish()
    }
}
