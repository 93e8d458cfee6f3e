//! # Typed Event Bus
//!
//! In-process publish/subscribe bus where listeners are selected by the
//! static type of the published value.
//!
//! ## Features
//!
//! - **Type Directed**: One listener list per target type, no string topics
//! - **Priorities**: Higher-priority listeners run first, ties in insertion order
//! - **Supertypes**: Events declare supertypes; super listeners receive them
//! - **Subscribers**: Listener fields and handler methods discovered in one call
//! - **Attachable Buses**: Forward everything published on a bus to child buses
//! - **Exception Policy**: Propagate listener failures or route them to a handler
//! - **Event Metadata**: Opt-in phase, direction and cancellation for events
//!
//! ## Example
//!
//! ```rust
//! use typed_event_bus::{Bus, Event, Listener, Supertypes};
//!
//! struct KeyPress {
//!     key: char,
//! }
//!
//! impl Event for KeyPress {
//!     fn supertypes(types: &mut Supertypes<'_, Self>) {
//!         types.implements::<char>(|k| &k.key);
//!     }
//! }
//!
//! let bus = Bus::builder().name("input").super_listeners(true).build().unwrap();
//!
//! // Receives KeyPress events through their `char` view
//! bus.subscribe_listener(Listener::new(|c: &char| println!("char {c}"))).unwrap();
//!
//! bus.publish(&KeyPress { key: 'q' }).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod meta;
pub mod listener;
pub mod listener_list;
pub mod dispatcher;
pub mod subscriber;
pub mod discovery;
pub mod bus;
pub mod attachable;
pub mod builder;

// Re-exports
pub use error::{BusError, BusResult, DiscoveryError};
pub use event::{is_subtype, validate_event_type, Event, EventType, Supertypes, TypeClosure};
pub use meta::{EventDirection, EventMeta, EventPhase, MetaEvent};
pub use listener::{priority, BoundListener, Filter, Listener, ListenerBuilder, ListenerId};
pub use listener_list::{
    CopyOnWriteListenerList, CustomListFactory, ListenerList, ListenerListFactory,
    ReadWriteLockListenerList,
};
pub use dispatcher::{Delivery, Dispatcher, ExceptionHandler, ListenerFault, LoggingExceptionHandler};
pub use subscriber::{
    FieldMember, Members, MethodMember, MethodProblem, Subscribe, Subscriber, SubscriberClass,
    SubscriberInstance, SubscriberRef,
};
pub use discovery::{Candidates, DiscoveryStrategy, FieldDiscovery, ListenerCandidate, MethodDiscovery};
pub use bus::{Bus, EventBus};
pub use attachable::AttachableBus;
pub use builder::{Attachable, BusBuilder, BusConfig, Plain};
