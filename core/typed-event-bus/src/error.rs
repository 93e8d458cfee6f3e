//! Error types for the event bus.
//!
//! [`BusError`] is returned by every fallible bus operation. Problems found
//! while discovering listeners on a subscriber are collected in
//! [`DiscoveryError`] and surfaced through [`BusError::Discovery`].

use thiserror::Error;

use crate::event::EventType;
use crate::listener::ListenerId;

/// Result alias used throughout the crate.
pub type BusResult<T> = Result<T, BusError>;

/// Errors raised by the bus, its listeners and its builder.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    /// A type proposed as an event or listener target is not admissible.
    #[error("invalid event type {type_name}: {reason}")]
    InvalidEventType {
        type_name: &'static str,
        reason: String,
    },

    /// A listener's target could not be resolved from its callback.
    #[error("unable to resolve listener target from {callback}: {reason}")]
    TargetResolutionFailed {
        callback: &'static str,
        reason: String,
    },

    /// `narrow` was asked to widen (or sidestep) the current target.
    #[error("current target type {current} must be a supertype of new target type {requested}")]
    NarrowingViolation {
        current: EventType,
        requested: EventType,
    },

    /// A strategy rejected part of a subscriber's listener declarations.
    #[error("listener discovery failed for {subscriber}")]
    Discovery {
        subscriber: &'static str,
        #[source]
        source: DiscoveryError,
    },

    /// A candidate could not be bound to the subscriber instance.
    #[error("unable to bind listener {member} of {subscriber}")]
    BindFailed {
        subscriber: &'static str,
        member: String,
        #[source]
        source: anyhow::Error,
    },

    /// The subscriber is already registered on this bus.
    #[error("{subscriber} is already subscribed to bus {bus}")]
    AlreadySubscribed {
        bus: String,
        subscriber: &'static str,
    },

    /// A listener callback failed and the dispatcher let the failure through.
    #[error("listener {listener} failed while handling {event_type}")]
    ListenerFailed {
        event_type: EventType,
        listener: ListenerId,
        #[source]
        source: anyhow::Error,
    },

    /// `BusBuilder::build` was called without a non-empty name.
    #[error("event bus name must be set and non-empty")]
    MissingName,
}

/// Errors detected while turning a subscriber class into listener candidates.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A listener field has a target type that cannot be used.
    #[error("invalid listener field `{field}`: {reason}")]
    InvalidListenerField { field: &'static str, reason: String },

    /// A handler method does not take exactly one usable event parameter.
    #[error("invalid listener method `{method}`: {reason}")]
    InvalidListenerMethod { method: &'static str, reason: String },

    /// A filter named by a method declaration does not fit the method.
    #[error("invalid filter {filter} on `{member}`: {reason}")]
    InvalidFilter {
        member: &'static str,
        filter: &'static str,
        reason: String,
    },

    /// Failure reported by a user-supplied strategy.
    #[error(transparent)]
    Strategy(#[from] anyhow::Error),
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::InvalidEventType { .. } => "invalid_event_type",
            BusError::TargetResolutionFailed { .. } => "target_resolution_failed",
            BusError::NarrowingViolation { .. } => "narrowing_violation",
            BusError::Discovery { .. } => "discovery_error",
            BusError::BindFailed { .. } => "bind_failed",
            BusError::AlreadySubscribed { .. } => "already_subscribed",
            BusError::ListenerFailed { .. } => "listener_failed",
            BusError::MissingName => "missing_name",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(BusError::MissingName.as_label(), "missing_name");
        let err = BusError::AlreadySubscribed {
            bus: "root".to_string(),
            subscriber: "app::Handler",
        };
        assert_eq!(err.as_label(), "already_subscribed");
        assert_eq!(err.to_string(), "app::Handler is already subscribed to bus root");
    }

    #[test]
    fn test_discovery_error_keeps_source() {
        use std::error::Error as _;

        let err = BusError::Discovery {
            subscriber: "app::Handler",
            source: DiscoveryError::InvalidListenerMethod {
                method: "on_pair",
                reason: "expected exactly one parameter, found 2".to_string(),
            },
        };
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("on_pair"));
    }
}
