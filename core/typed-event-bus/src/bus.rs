//! Core event bus implementation

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::builder::{BusBuilder, BusConfig};
use crate::dispatcher::Delivery;
use crate::error::{BusError, BusResult};
use crate::event::{validate_event_type, ErasedList, Event, EventType, TypeClosure};
use crate::listener::{BoundListener, Listener};
use crate::listener_list::ListenerList;
use crate::subscriber::{Subscriber, SubscriberClass, SubscriberInstance};

/// A bus that can receive events already routed by another bus.
///
/// Implemented by [`Bus`] and [`AttachableBus`](crate::AttachableBus) so an
/// attachable bus can forward to children of either kind.
pub trait EventBus: Send + Sync {
    fn name(&self) -> &str;

    /// Delivers `event`, whose supertypes are `route`, to this bus's
    /// listeners (and to anything attached to it).
    ///
    /// [`Delivery::Aborted`] means a handled listener failure ended the
    /// publish; the caller must not deliver the event anywhere else.
    fn deliver(&self, event: &dyn Any, route: &TypeClosure) -> BusResult<Delivery>;
}

/// Subscribers are keyed by the address of their shared allocation.
type SubscriberKey = usize;

enum Registration {
    /// Discovery in progress; `cancelled` is set by a racing unsubscribe.
    Binding { cancelled: bool },
    Active {
        listeners: Vec<BoundListener>,
        // Keeps the allocation (and so the key) alive while registered.
        _subscriber: Arc<dyn Any + Send + Sync>,
    },
}

/// In-process publish/subscribe bus keyed by event type.
///
/// # Design
/// - One listener list per target type, created on first subscription
/// - Publishing walks the event's supertypes when super listeners are on
/// - Callbacks run on the publishing thread, never under a bus lock
///
/// # Example
/// ```
/// use typed_event_bus::{Bus, Listener};
///
/// let bus = Bus::builder().name("example").build().unwrap();
/// bus.subscribe_listener(Listener::new(|n: &u64| println!("got {n}"))).unwrap();
/// bus.publish(&7u64).unwrap();
/// ```
pub struct Bus {
    config: BusConfig,

    /// Listener lists indexed by target TypeId
    lists: DashMap<TypeId, Arc<ErasedList>>,

    /// Validation outcome per type, `None` when admissible
    verdicts: DashMap<TypeId, Option<String>>,

    /// Supertype closures of published event types
    routes: DashMap<TypeId, Arc<TypeClosure>>,

    subscribers: Mutex<HashMap<SubscriberKey, Registration>>,
}

impl Bus {
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    pub(crate) fn from_config(config: BusConfig) -> Self {
        debug!(
            bus = %config.name(),
            super_listeners = config.super_listeners(),
            parent_discovery = config.parent_discovery(),
            "Creating event bus"
        );
        Self {
            config,
            lists: DashMap::new(),
            verdicts: DashMap::new(),
            routes: DashMap::new(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Publish an event to every listener of its type and, with super
    /// listeners enabled, of its supertypes.
    ///
    /// Listeners of one type run in priority order; types run in the order
    /// of [`TypeClosure::of`]. The first failing listener stops delivery:
    /// its error is returned, or [`Delivery::Aborted`] if the exception
    /// handler swallowed it.
    pub fn publish<E: Event>(&self, event: &E) -> BusResult<Delivery> {
        let route = self.route::<E>()?;
        self.deliver_local(event, &route)
    }

    /// Register every listener discovered on `subscriber`.
    ///
    /// Either all discovered listeners are installed or, on error, none.
    pub fn subscribe<S: Subscriber>(&self, subscriber: &Arc<S>) -> BusResult<()> {
        let key = subscriber_key(subscriber);
        let class = SubscriberClass::of::<S>();
        {
            let mut registry = self.subscribers.lock();
            if registry.contains_key(&key) {
                return Err(BusError::AlreadySubscribed {
                    bus: self.name().to_string(),
                    subscriber: class.name(),
                });
            }
            registry.insert(key, Registration::Binding { cancelled: false });
        }

        let instance = SubscriberInstance::of(Arc::clone(subscriber));
        let mut installed = Vec::new();
        if let Err(err) = self.install_class(&class, &instance, &mut installed) {
            warn!(
                bus = %self.name(),
                subscriber = class.name(),
                error = %err,
                "Subscription failed, rolling back {} listeners",
                installed.len()
            );
            self.uninstall_all(&installed);
            self.subscribers.lock().remove(&key);
            return Err(err);
        }

        let cancelled = {
            let mut registry = self.subscribers.lock();
            match registry.remove(&key) {
                Some(Registration::Binding { cancelled: false }) => {
                    registry.insert(
                        key,
                        Registration::Active {
                            listeners: std::mem::take(&mut installed),
                            _subscriber: Arc::clone(subscriber) as Arc<dyn Any + Send + Sync>,
                        },
                    );
                    false
                }
                _ => true,
            }
        };
        if cancelled {
            self.uninstall_all(&installed);
            debug!(bus = %self.name(), subscriber = class.name(), "Subscription cancelled while binding");
        } else {
            debug!(bus = %self.name(), subscriber = class.name(), "Subscribed");
        }
        Ok(())
    }

    /// Remove every listener `subscriber` contributed. Returns `false` if it
    /// was not subscribed.
    ///
    /// If a `subscribe` of the same subscriber is still binding on another
    /// thread, this returns `true` and that call uninstalls its listeners
    /// before returning. Until it does, subscribing the subscriber again
    /// fails with [`BusError::AlreadySubscribed`].
    pub fn unsubscribe<S: Subscriber>(&self, subscriber: &Arc<S>) -> bool {
        let key = subscriber_key(subscriber);
        let listeners = {
            let mut registry = self.subscribers.lock();
            match registry.get_mut(&key) {
                None => return false,
                Some(Registration::Binding { cancelled }) => {
                    *cancelled = true;
                    return true;
                }
                Some(Registration::Active { .. }) => {}
            }
            match registry.remove(&key) {
                Some(Registration::Active { listeners, .. }) => listeners,
                _ => Vec::new(),
            }
        };
        self.uninstall_all(&listeners);
        debug!(
            bus = %self.name(),
            subscriber = std::any::type_name::<S>(),
            "Unsubscribed {} listeners",
            listeners.len()
        );
        true
    }

    pub fn is_subscribed<S: Subscriber>(&self, subscriber: &Arc<S>) -> bool {
        self.subscribers.lock().contains_key(&subscriber_key(subscriber))
    }

    /// Register a single listener. Returns `false` if it was already present.
    pub fn subscribe_listener<E: ?Sized + 'static>(&self, listener: Listener<E>) -> BusResult<bool> {
        let list = self.get_or_create_list::<E>()?;
        let added = typed::<E>(&*list).add(listener);
        trace!(bus = %self.name(), event_type = %EventType::of::<E>(), added, "Listener subscribed");
        Ok(added)
    }

    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe_listener<E: ?Sized + 'static>(&self, listener: &Listener<E>) -> bool {
        let Some(list) = self.list(EventType::of::<E>()) else {
            return false;
        };
        typed::<E>(&*list).remove(listener)
    }

    /// Number of listeners targeting exactly `E`.
    pub fn listener_count<E: ?Sized + 'static>(&self) -> usize {
        self.list(EventType::of::<E>())
            .map_or(0, |list| typed::<E>(&*list).len())
    }

    fn deliver_local(&self, event: &dyn Any, route: &TypeClosure) -> BusResult<Delivery> {
        let entries = if self.config.super_listeners() {
            route.entries()
        } else {
            &route.entries()[..1]
        };
        trace!(bus = %self.name(), event_type = %route.event_type(), "Publishing event");

        let dispatcher = self.config.dispatcher();
        for entry in entries {
            let Some(list) = self.list(entry.event_type()) else {
                continue;
            };
            if entry.post(event, &*list, dispatcher)?.is_aborted() {
                trace!(bus = %self.name(), event_type = %entry.event_type(), "Publish aborted");
                return Ok(Delivery::Aborted);
            }
        }
        Ok(Delivery::Completed)
    }

    pub(crate) fn route<E: Event>(&self) -> BusResult<Arc<TypeClosure>> {
        let ty = EventType::of::<E>();
        self.check(ty)?;
        if let Some(route) = self.routes.get(&ty.id()) {
            return Ok(Arc::clone(route.value()));
        }
        let route = self
            .routes
            .entry(ty.id())
            .or_insert_with(|| Arc::new(TypeClosure::of::<E>()))
            .clone();
        Ok(route)
    }

    fn check(&self, ty: EventType) -> BusResult<()> {
        let verdict = match self.verdicts.get(&ty.id()) {
            Some(verdict) => verdict.clone(),
            None => {
                let verdict = validate_event_type(ty).err().map(|err| err.to_string());
                self.verdicts.insert(ty.id(), verdict.clone());
                verdict
            }
        };
        match verdict {
            None => Ok(()),
            Some(reason) => Err(BusError::InvalidEventType {
                type_name: ty.name(),
                reason,
            }),
        }
    }

    fn list(&self, ty: EventType) -> Option<Arc<ErasedList>> {
        self.lists.get(&ty.id()).map(|list| Arc::clone(list.value()))
    }

    /// Get or create the listener list for `E`
    fn get_or_create_list<E: ?Sized + 'static>(&self) -> BusResult<Arc<ErasedList>> {
        let ty = EventType::of::<E>();
        self.check(ty)?;
        if let Some(list) = self.list(ty) {
            return Ok(list);
        }

        let list = self
            .lists
            .entry(ty.id())
            .or_insert_with(|| {
                debug!(bus = %self.name(), event_type = %ty, "Creating listener list");
                Arc::new(self.config.list_factory().create::<E>()) as Arc<dyn Any + Send + Sync>
            })
            .clone();
        Ok(list)
    }

    fn install_class(
        &self,
        class: &SubscriberClass,
        instance: &SubscriberInstance,
        installed: &mut Vec<BoundListener>,
    ) -> BusResult<()> {
        for strategy in self.config.discovery_strategies() {
            for candidate in strategy.find_all(class) {
                let candidate = candidate.map_err(|source| BusError::Discovery {
                    subscriber: class.name(),
                    source,
                })?;
                let bound = candidate.bind(instance).map_err(|source| BusError::BindFailed {
                    subscriber: class.name(),
                    member: candidate.member().to_string(),
                    source,
                })?;
                for listener in bound {
                    // Listeners already present were not added by us.
                    if listener.install(self)? {
                        installed.push(listener);
                    }
                }
            }
        }

        if self.config.parent_discovery() {
            for parent in class.parents() {
                if let Some(parent_instance) = parent.instance(instance) {
                    self.install_class(parent.class(), &parent_instance, installed)?;
                }
            }
        }
        Ok(())
    }

    fn uninstall_all(&self, listeners: &[BoundListener]) {
        for listener in listeners {
            listener.uninstall(self);
        }
    }
}

impl EventBus for Bus {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn deliver(&self, event: &dyn Any, route: &TypeClosure) -> BusResult<Delivery> {
        self.deliver_local(event, route)
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("config", &self.config)
            .field("lists", &self.lists.len())
            .finish()
    }
}

fn subscriber_key<S>(subscriber: &Arc<S>) -> SubscriberKey {
    Arc::as_ptr(subscriber) as *const () as usize
}

fn typed<E: ?Sized + 'static>(list: &ErasedList) -> &dyn ListenerList<E> {
    list.downcast_ref::<Box<dyn ListenerList<E>>>()
        .expect("Type mismatch in listener registry")
        .as_ref()
}
