//! Buses that forward every published event to attached child buses.

use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::bus::{Bus, EventBus};
use crate::dispatcher::Delivery;
use crate::error::BusResult;
use crate::event::{Event, TypeClosure};

/// A [`Bus`] that also forwards each published event to its attached buses.
///
/// Local listeners run first, then each attached bus in attachment order.
/// A listener failure anywhere ends the publish, including one swallowed by
/// an exception handler: later children never see the event.
/// Children deliver with their own configuration, so a child with super
/// listeners enabled sees supertypes even if this bus does not. Attaching
/// buses in a cycle makes every publish recurse without bound.
///
/// All [`Bus`] operations are available through `Deref`.
pub struct AttachableBus {
    bus: Bus,
    attached: RwLock<Arc<[Arc<dyn EventBus>]>>,
    write: Mutex<()>,
}

impl AttachableBus {
    pub(crate) fn new(bus: Bus) -> Self {
        Self {
            bus,
            attached: RwLock::new(Arc::from(Vec::new())),
            write: Mutex::new(()),
        }
    }

    /// Publish to local listeners, then forward to attached buses.
    pub fn publish<E: Event>(&self, event: &E) -> BusResult<Delivery> {
        let route = self.bus.route::<E>()?;
        self.deliver(event, &route)
    }

    /// Returns `false` if `child` is already attached.
    pub fn attach(&self, child: Arc<dyn EventBus>) -> bool {
        let _write = self.write.lock();
        let current = self.snapshot();
        if current.iter().any(|c| same_bus(c, &*child)) {
            return false;
        }

        debug!(bus = %self.bus.name(), child = %child.name(), "Attaching bus");
        let mut next = current.to_vec();
        next.push(child);
        *self.attached.write() = Arc::from(next);
        true
    }

    /// Returns `false` if `child` was not attached.
    pub fn detach(&self, child: &dyn EventBus) -> bool {
        let _write = self.write.lock();
        let current = self.snapshot();
        let Some(index) = current.iter().position(|c| same_bus(c, child)) else {
            return false;
        };

        debug!(bus = %self.bus.name(), child = %child.name(), "Detaching bus");
        let mut next = current.to_vec();
        next.remove(index);
        *self.attached.write() = Arc::from(next);
        true
    }

    pub fn attached_count(&self) -> usize {
        self.attached.read().len()
    }

    fn snapshot(&self) -> Arc<[Arc<dyn EventBus>]> {
        Arc::clone(&self.attached.read())
    }
}

impl EventBus for AttachableBus {
    fn name(&self) -> &str {
        self.bus.name()
    }

    fn deliver(&self, event: &dyn Any, route: &TypeClosure) -> BusResult<Delivery> {
        if EventBus::deliver(&self.bus, event, route)?.is_aborted() {
            return Ok(Delivery::Aborted);
        }
        for child in self.snapshot().iter() {
            trace!(bus = %self.bus.name(), child = %child.name(), "Forwarding event");
            if child.deliver(event, route)?.is_aborted() {
                return Ok(Delivery::Aborted);
            }
        }
        Ok(Delivery::Completed)
    }
}

impl Deref for AttachableBus {
    type Target = Bus;

    fn deref(&self) -> &Bus {
        &self.bus
    }
}

impl std::fmt::Debug for AttachableBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachableBus")
            .field("bus", &self.bus)
            .field("attached", &self.attached_count())
            .finish()
    }
}

fn same_bus(a: &Arc<dyn EventBus>, b: &dyn EventBus) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), b as *const dyn EventBus)
}
