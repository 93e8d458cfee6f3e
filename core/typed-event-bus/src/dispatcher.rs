//! Delivery of one event to a snapshot of listeners.
//!
//! Both dispatchers stop at the first failing listener: the rest of that
//! snapshot never sees the event. They differ only in what happens to the
//! failure.
//!
//! - [`Dispatcher::Fast`] returns it to the `publish` caller as
//!   [`BusError::ListenerFailed`]; panics unwind straight through.
//! - [`Dispatcher::ExceptionHandling`] catches errors and panics and asks an
//!   [`ExceptionHandler`] whether to propagate or swallow them.
//!
//! A swallowed failure still ends the publish. It is reported as
//! [`Delivery::Aborted`] so the bus skips later supertype lists and attached
//! buses as well.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::error::{BusError, BusResult};
use crate::event::EventType;
use crate::listener::{Listener, ListenerId};

/// Details of a listener failure handed to an [`ExceptionHandler`].
#[derive(Debug)]
pub struct ListenerFault<'a> {
    /// Target type of the failing listener.
    pub event_type: EventType,
    pub listener: ListenerId,
    pub priority: i32,
    pub error: &'a anyhow::Error,
}

/// Decides whether a listener failure propagates to the `publish` caller.
pub trait ExceptionHandler: Send + Sync + 'static {
    /// Returns `true` to propagate the failure, `false` to swallow it.
    fn handle(&self, fault: &ListenerFault<'_>) -> bool;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&ListenerFault<'_>) -> bool + Send + Sync + 'static,
{
    fn handle(&self, fault: &ListenerFault<'_>) -> bool {
        self(fault)
    }
}

/// Logs every fault at error level and swallows it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, fault: &ListenerFault<'_>) -> bool {
        error!(
            listener = %fault.listener,
            event_type = %fault.event_type,
            priority = fault.priority,
            "listener failed, skipping remaining listeners: {:#}",
            fault.error
        );
        false
    }
}

/// How far a successful delivery got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every listener in the snapshot saw the event.
    Completed,
    /// A listener failed and the handler swallowed it; nothing after it runs.
    Aborted,
}

impl Delivery {
    pub fn is_aborted(self) -> bool {
        self == Delivery::Aborted
    }
}

/// Exception policy applied while walking a listener snapshot.
#[derive(Clone, Default)]
pub enum Dispatcher {
    #[default]
    Fast,
    ExceptionHandling(Arc<dyn ExceptionHandler>),
}

impl Dispatcher {
    pub fn with_exception_handler<H: ExceptionHandler>(handler: H) -> Self {
        Self::ExceptionHandling(Arc::new(handler))
    }

    /// Delivers `event` to each listener in iterator order.
    pub fn dispatch<'a, E, I>(&self, event: &E, listeners: I) -> BusResult<Delivery>
    where
        E: ?Sized + 'static,
        I: IntoIterator<Item = &'a Listener<E>>,
    {
        match self {
            Dispatcher::Fast => {
                for listener in listeners {
                    listener
                        .accept(event)
                        .map_err(|source| failure(listener, source))?;
                }
                Ok(Delivery::Completed)
            }
            Dispatcher::ExceptionHandling(handler) => {
                for listener in listeners {
                    let error = match panic::catch_unwind(AssertUnwindSafe(|| listener.accept(event))) {
                        Ok(Ok(())) => continue,
                        Ok(Err(error)) => error,
                        Err(payload) => anyhow::anyhow!("listener panicked: {}", panic_message(&*payload)),
                    };
                    let fault = ListenerFault {
                        event_type: listener.target(),
                        listener: listener.id(),
                        priority: listener.priority(),
                        error: &error,
                    };
                    return if handler.handle(&fault) {
                        Err(failure(listener, error))
                    } else {
                        Ok(Delivery::Aborted)
                    };
                }
                Ok(Delivery::Completed)
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatcher::Fast => f.write_str("Fast"),
            Dispatcher::ExceptionHandling(_) => f.write_str("ExceptionHandling"),
        }
    }
}

fn failure<E: ?Sized + 'static>(listener: &Listener<E>, source: anyhow::Error) -> BusError {
    BusError::ListenerFailed {
        event_type: listener.target(),
        listener: listener.id(),
        source,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
