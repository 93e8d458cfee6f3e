//! Bus construction.
//!
//! ```
//! use typed_event_bus::{Bus, ListenerListFactory};
//!
//! let bus = Bus::builder()
//!     .name("ui")
//!     .super_listeners(true)
//!     .default_exception_handler()
//!     .list_factory(ListenerListFactory::ReadWriteLocked)
//!     .build()
//!     .unwrap();
//! assert!(bus.config().super_listeners());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::attachable::AttachableBus;
use crate::bus::Bus;
use crate::discovery::{default_strategies, DiscoveryStrategy};
use crate::dispatcher::{Dispatcher, ExceptionHandler, LoggingExceptionHandler};
use crate::error::{BusError, BusResult};
use crate::listener_list::ListenerListFactory;

/// Settings a bus was built with. Immutable once built.
#[derive(Clone)]
pub struct BusConfig {
    name: String,
    super_listeners: bool,
    parent_discovery: bool,
    dispatcher: Dispatcher,
    list_factory: ListenerListFactory,
    discovery_strategies: Vec<Arc<dyn DiscoveryStrategy>>,
}

impl BusConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether publishing also reaches listeners of the event's supertypes.
    pub fn super_listeners(&self) -> bool {
        self.super_listeners
    }

    /// Whether subscribing walks declared parent subscribers.
    pub fn parent_discovery(&self) -> bool {
        self.parent_discovery
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn list_factory(&self) -> &ListenerListFactory {
        &self.list_factory
    }

    pub fn discovery_strategies(&self) -> &[Arc<dyn DiscoveryStrategy>] {
        &self.discovery_strategies
    }
}

impl fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies: Vec<_> = self.discovery_strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("BusConfig")
            .field("name", &self.name)
            .field("super_listeners", &self.super_listeners)
            .field("parent_discovery", &self.parent_discovery)
            .field("dispatcher", &self.dispatcher)
            .field("list_factory", &self.list_factory)
            .field("discovery_strategies", &strategies)
            .finish()
    }
}

/// Builder output kind: a plain [`Bus`].
#[derive(Debug)]
pub struct Plain;

/// Builder output kind: an [`AttachableBus`].
#[derive(Debug)]
pub struct Attachable;

/// Configures and creates a bus. A name is required; everything else has a
/// default (no super listeners, no parent discovery, fast dispatch,
/// copy-on-write lists, field and method discovery).
pub struct BusBuilder<K = Plain> {
    name: Option<String>,
    super_listeners: bool,
    parent_discovery: bool,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    list_factory: ListenerListFactory,
    discovery_strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    _kind: PhantomData<K>,
}

impl BusBuilder<Plain> {
    pub fn new() -> Self {
        Self {
            name: None,
            super_listeners: false,
            parent_discovery: false,
            exception_handler: None,
            list_factory: ListenerListFactory::default(),
            discovery_strategies: default_strategies(),
            _kind: PhantomData,
        }
    }

    /// Build an [`AttachableBus`] instead of a plain one.
    pub fn attachable(self) -> BusBuilder<Attachable> {
        BusBuilder {
            name: self.name,
            super_listeners: self.super_listeners,
            parent_discovery: self.parent_discovery,
            exception_handler: self.exception_handler,
            list_factory: self.list_factory,
            discovery_strategies: self.discovery_strategies,
            _kind: PhantomData,
        }
    }

    pub fn build(self) -> BusResult<Bus> {
        Ok(Bus::from_config(self.into_config()?))
    }
}

impl BusBuilder<Attachable> {
    pub fn build(self) -> BusResult<AttachableBus> {
        Ok(AttachableBus::new(Bus::from_config(self.into_config()?)))
    }
}

impl Default for BusBuilder<Plain> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> BusBuilder<K> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn super_listeners(mut self, enabled: bool) -> Self {
        self.super_listeners = enabled;
        self
    }

    pub fn parent_discovery(mut self, enabled: bool) -> Self {
        self.parent_discovery = enabled;
        self
    }

    /// Route listener failures through `handler`. Without a handler they
    /// propagate to the `publish` caller.
    pub fn exception_handler<H: ExceptionHandler>(mut self, handler: H) -> Self {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Log listener failures and keep publishing callers unaware of them.
    pub fn default_exception_handler(self) -> Self {
        self.exception_handler(LoggingExceptionHandler)
    }

    pub fn list_factory(mut self, factory: ListenerListFactory) -> Self {
        self.list_factory = factory;
        self
    }

    /// Replace the discovery strategies.
    pub fn discovery_strategies<I>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn DiscoveryStrategy>>,
    {
        self.discovery_strategies = strategies.into_iter().collect();
        self
    }

    pub fn add_discovery_strategy<D: DiscoveryStrategy + 'static>(mut self, strategy: D) -> Self {
        self.discovery_strategies.push(Arc::new(strategy));
        self
    }

    fn into_config(self) -> BusResult<BusConfig> {
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or(BusError::MissingName)?;
        Ok(BusConfig {
            name,
            super_listeners: self.super_listeners,
            parent_discovery: self.parent_discovery,
            dispatcher: self
                .exception_handler
                .map_or(Dispatcher::Fast, Dispatcher::ExceptionHandling),
            list_factory: self.list_factory,
            discovery_strategies: self.discovery_strategies,
        })
    }
}
