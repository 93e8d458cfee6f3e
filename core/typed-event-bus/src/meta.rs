//! Optional per-event metadata: phase, direction and cancellation.
//!
//! Events opt in by embedding an [`EventMeta`] and implementing
//! [`MetaEvent`]. The bus itself never reads it; listeners and filters do.
//!
//! ```
//! use typed_event_bus::{Bus, Event, EventMeta, EventPhase, Listener, MetaEvent};
//!
//! struct Tick {
//!     meta: EventMeta,
//! }
//!
//! impl Event for Tick {}
//!
//! impl MetaEvent for Tick {
//!     fn meta(&self) -> &EventMeta {
//!         &self.meta
//!     }
//! }
//!
//! let bus = Bus::builder().name("game").build().unwrap();
//! bus.subscribe_listener(Listener::new(|t: &Tick| {
//!     if t.is_pre() {
//!         t.cancel();
//!     }
//! }))
//! .unwrap();
//!
//! let tick = Tick { meta: EventMeta::new().with_phase(EventPhase::Pre) };
//! bus.publish(&tick).unwrap();
//! assert!(tick.is_cancelled());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// When an event fires relative to the action it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Pre,
    On,
    Post,
}

/// Whether an event describes something received or something sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDirection {
    Incoming,
    Outgoing,
}

impl EventDirection {
    pub fn as_label(&self) -> &'static str {
        match self {
            EventDirection::Incoming => "incoming",
            EventDirection::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for EventDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Phase, direction and cancel flag carried by an event.
///
/// Phase and direction are optional; the `is_*` queries answer `false`
/// while unset. Listeners only see `&E`, so the cancel flag is atomic.
#[derive(Default)]
pub struct EventMeta {
    phase: Option<EventPhase>,
    direction: Option<EventDirection>,
    cancelled: AtomicBool,
}

impl EventMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: EventPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_direction(mut self, direction: EventDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn phase(&self) -> Option<EventPhase> {
        self.phase
    }

    pub fn direction(&self) -> Option<EventDirection> {
        self.direction
    }

    pub fn set_phase(&mut self, phase: Option<EventPhase>) {
        self.phase = phase;
    }

    pub fn set_direction(&mut self, direction: Option<EventDirection>) {
        self.direction = direction;
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clears a previous [`cancel`](Self::cancel).
    pub fn uncancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Clone for EventMeta {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            direction: self.direction,
            cancelled: AtomicBool::new(self.is_cancelled()),
        }
    }
}

impl fmt::Debug for EventMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMeta")
            .field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Events that carry an [`EventMeta`].
pub trait MetaEvent {
    fn meta(&self) -> &EventMeta;

    fn is_pre(&self) -> bool {
        self.meta().phase == Some(EventPhase::Pre)
    }

    fn is_on(&self) -> bool {
        self.meta().phase == Some(EventPhase::On)
    }

    fn is_post(&self) -> bool {
        self.meta().phase == Some(EventPhase::Post)
    }

    fn is_incoming(&self) -> bool {
        self.meta().direction == Some(EventDirection::Incoming)
    }

    fn is_outgoing(&self) -> bool {
        self.meta().direction == Some(EventDirection::Outgoing)
    }

    fn cancel(&self) {
        self.meta().cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.meta().is_cancelled()
    }
}

impl MetaEvent for EventMeta {
    fn meta(&self) -> &EventMeta {
        self
    }
}

/// Filter predicate that drops events a listener earlier in the publish
/// cancelled.
///
/// ```
/// use typed_event_bus::{meta, EventMeta, Listener};
///
/// let listener = Listener::builder(|_: &EventMeta| {})
///     .filter(meta::not_cancelled)
///     .build()
///     .unwrap();
/// # let _ = listener;
/// ```
pub fn not_cancelled<E: MetaEvent + ?Sized>(event: &E) -> bool {
    !event.is_cancelled()
}
