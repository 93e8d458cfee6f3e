//! Listener discovery on subscriber classes.
//!
//! A [`DiscoveryStrategy`] looks at a [`SubscriberClass`] once per
//! subscription and yields [`ListenerCandidate`]s; each candidate is then
//! bound to the concrete instance. Strategy errors surface as
//! [`BusError::Discovery`](crate::BusError::Discovery), bind errors as
//! [`BusError::BindFailed`](crate::BusError::BindFailed).

use std::fmt;

use anyhow::anyhow;

use crate::error::DiscoveryError;
use crate::listener::BoundListener;
use crate::subscriber::{FieldMember, MethodMember, MethodProblem, SubscriberClass, SubscriberInstance};

/// Candidates yielded by a strategy, in discovery order.
pub type Candidates<'a> =
    Box<dyn Iterator<Item = Result<Box<dyn ListenerCandidate + 'a>, DiscoveryError>> + 'a>;

/// Finds listener candidates on a subscriber class.
pub trait DiscoveryStrategy: Send + Sync {
    fn find_all<'a>(&'a self, class: &'a SubscriberClass) -> Candidates<'a>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A deferred listener, bound to one subscriber instance at a time.
pub trait ListenerCandidate {
    /// Member name used in errors and logs.
    fn member(&self) -> &str;

    fn bind(&self, instance: &SubscriberInstance) -> anyhow::Result<Vec<BoundListener>>;
}

/// Yields every declared listener field. Fields whose listener targets an
/// inadmissible type fail with [`DiscoveryError::InvalidListenerField`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldDiscovery;

impl DiscoveryStrategy for FieldDiscovery {
    fn find_all<'a>(&'a self, class: &'a SubscriberClass) -> Candidates<'a> {
        Box::new(class.fields().iter().map(|field| match field.problem() {
            None => Ok(Box::new(FieldCandidate(field)) as Box<dyn ListenerCandidate + 'a>),
            Some(reason) => Err(DiscoveryError::InvalidListenerField {
                field: field.name(),
                reason: reason.to_string(),
            }),
        }))
    }
}

struct FieldCandidate<'a>(&'a FieldMember);

impl ListenerCandidate for FieldCandidate<'_> {
    fn member(&self) -> &str {
        self.0.name()
    }

    fn bind(&self, instance: &SubscriberInstance) -> anyhow::Result<Vec<BoundListener>> {
        let listener = self
            .0
            .bind(instance)
            .ok_or_else(|| mismatched(self.0.name(), instance))?;
        Ok(vec![listener])
    }
}

/// Yields every declared handler method.
///
/// Methods with an inadmissible parameter fail with
/// [`DiscoveryError::InvalidListenerMethod`], methods whose filters target
/// another type with [`DiscoveryError::InvalidFilter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodDiscovery;

impl DiscoveryStrategy for MethodDiscovery {
    fn find_all<'a>(&'a self, class: &'a SubscriberClass) -> Candidates<'a> {
        Box::new(class.methods().iter().map(|method| {
            match method.problem() {
                None => Ok(Box::new(MethodCandidate(method)) as Box<dyn ListenerCandidate + 'a>),
                Some(MethodProblem::InvalidParameter(reason)) => {
                    Err(DiscoveryError::InvalidListenerMethod {
                        method: method.name(),
                        reason: reason.clone(),
                    })
                }
                Some(MethodProblem::Filter { filter, reason }) => Err(DiscoveryError::InvalidFilter {
                    member: method.name(),
                    filter: *filter,
                    reason: reason.clone(),
                }),
            }
        }))
    }
}

struct MethodCandidate<'a>(&'a MethodMember);

impl ListenerCandidate for MethodCandidate<'_> {
    fn member(&self) -> &str {
        self.0.name()
    }

    fn bind(&self, instance: &SubscriberInstance) -> anyhow::Result<Vec<BoundListener>> {
        let listener = self
            .0
            .bind(instance)
            .ok_or_else(|| mismatched(self.0.name(), instance))?;
        Ok(vec![listener])
    }
}

fn mismatched(member: &str, instance: &SubscriberInstance) -> anyhow::Error {
    anyhow!("{member} does not belong to {}", instance.class_name())
}

impl fmt::Debug for dyn ListenerCandidate + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerCandidate").field(&self.member()).finish()
    }
}

/// The strategies a bus uses unless configured otherwise.
pub fn default_strategies() -> Vec<std::sync::Arc<dyn DiscoveryStrategy>> {
    vec![std::sync::Arc::new(FieldDiscovery), std::sync::Arc::new(MethodDiscovery)]
}
