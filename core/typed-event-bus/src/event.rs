//! Event type definitions for the bus
//!
//! An event is any value whose type implements [`Event`]. Rust has no class
//! hierarchy, so a type declares its supertypes explicitly through
//! [`Event::supertypes`]: either an unsized "interface" view such as `str` or
//! `dyn Display`, or an embedded parent event whose own supertypes are walked
//! in turn.
//!
//! ```rust
//! use typed_event_bus::{Event, Supertypes};
//!
//! struct InputEvent { pub source: u32 }
//! impl Event for InputEvent {}
//!
//! struct KeyPress { pub base: InputEvent, pub key: char }
//! impl Event for KeyPress {
//!     fn supertypes(types: &mut Supertypes<'_, Self>) {
//!         types.extends(|k| &k.base);
//!     }
//! }
//!
//! assert!(typed_event_bus::is_subtype::<KeyPress, InputEvent>());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::{BusError, BusResult};
use crate::listener_list::ListenerList;

/// A published event viewed without its static type.
pub(crate) type ErasedEvent = dyn Any;

/// A per-type listener list viewed without its static type.
pub(crate) type ErasedList = dyn Any + Send + Sync;

/// Opaque identifier for a runtime type.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// Identifier of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value that can be published on a bus.
///
/// Implement with an empty body for a type without supertypes. Override
/// [`Event::supertypes`] to let listeners of other types receive it when a
/// bus has super listeners enabled.
pub trait Event: Sized + Send + Sync + 'static {
    /// Declares the direct supertypes of this event type, in priority order.
    fn supertypes(types: &mut Supertypes<'_, Self>) {
        let _ = types;
    }
}

/// Collects the supertypes declared by [`Event::supertypes`].
pub struct Supertypes<'a, S: Event> {
    cast: Upcaster<S>,
    entries: &'a mut Vec<Supertype>,
    visited: &'a mut HashSet<TypeId>,
}

impl<S: Event> Supertypes<'_, S> {
    /// Declares `T` as a supertype without walking any further.
    pub fn implements<T: ?Sized + 'static>(&mut self, cast: fn(&S) -> &T) -> &mut Self {
        if self.visited.insert(TypeId::of::<T>()) {
            self.entries.push(Supertype::new(self.cast.then(cast)));
        }
        self
    }

    /// Declares the embedded event `P` as a supertype, then walks the
    /// supertypes `P` declares itself.
    pub fn extends<P: Event>(&mut self, cast: fn(&S) -> &P) -> &mut Self {
        if !self.visited.insert(TypeId::of::<P>()) {
            return self;
        }
        let parent = self.cast.then(cast);
        self.entries.push(Supertype::new(parent.clone()));
        P::supertypes(&mut Supertypes {
            cast: parent,
            entries: &mut *self.entries,
            visited: &mut *self.visited,
        });
        self
    }
}

/// View of an erased root event as `&T`.
pub(crate) struct Upcaster<T: ?Sized + 'static>(
    Arc<dyn for<'a> Fn(&'a ErasedEvent) -> Option<&'a T> + Send + Sync>,
);

impl<T: ?Sized + 'static> Clone for Upcaster<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized + 'static> Upcaster<T> {
    fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a ErasedEvent) -> Option<&'a T> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn root() -> Self
    where
        T: Sized,
    {
        Self::new(|event| event.downcast_ref::<T>())
    }

    fn then<U: ?Sized + 'static>(&self, step: fn(&T) -> &U) -> Upcaster<U> {
        let inner = self.clone();
        Upcaster::new(move |event| inner.cast(event).map(step))
    }

    #[inline]
    pub(crate) fn cast<'a>(&self, event: &'a ErasedEvent) -> Option<&'a T> {
        (self.0)(event)
    }
}

type PostFn =
    Arc<dyn Fn(&ErasedEvent, &ErasedList, &Dispatcher) -> BusResult<Delivery> + Send + Sync>;

/// One node of a type closure: the supertype and how to deliver to its list.
pub(crate) struct Supertype {
    ty: EventType,
    cast: Arc<dyn Any + Send + Sync>,
    post: PostFn,
}

impl Supertype {
    fn new<T: ?Sized + 'static>(cast: Upcaster<T>) -> Self {
        let view = cast.clone();
        Self {
            ty: EventType::of::<T>(),
            cast: Arc::new(cast),
            post: Arc::new(
                move |event: &ErasedEvent, list: &ErasedList, dispatcher: &Dispatcher| {
                    let (Some(event), Some(list)) =
                        (view.cast(event), list.downcast_ref::<Box<dyn ListenerList<T>>>())
                    else {
                        return Ok(Delivery::Completed);
                    };
                    list.post(event, dispatcher)
                },
            ),
        }
    }

    pub(crate) fn event_type(&self) -> EventType {
        self.ty
    }

    /// Delivers the erased root event to the list registered for this type.
    pub(crate) fn post(
        &self,
        event: &ErasedEvent,
        list: &ErasedList,
        dispatcher: &Dispatcher,
    ) -> BusResult<Delivery> {
        (self.post)(event, list, dispatcher)
    }
}

/// All supertypes of a concrete event type, the type itself first.
///
/// Order is a depth-first pre-order walk of the declared supertypes in
/// declaration order; a type reachable along several paths appears once, at
/// its first visit.
pub struct TypeClosure {
    entries: Vec<Supertype>,
}

impl TypeClosure {
    pub fn of<E: Event>() -> Self {
        let root = Upcaster::<E>::root();
        let mut entries = vec![Supertype::new(root.clone())];
        let mut visited = HashSet::from([TypeId::of::<E>()]);
        E::supertypes(&mut Supertypes {
            cast: root,
            entries: &mut entries,
            visited: &mut visited,
        });
        Self { entries }
    }

    /// The event type this closure was computed for.
    pub fn event_type(&self) -> EventType {
        self.entries[0].ty
    }

    pub fn types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.entries.iter().map(|entry| entry.ty)
    }

    pub fn contains(&self, ty: EventType) -> bool {
        self.entries.iter().any(|entry| entry.ty == ty)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[Supertype] {
        &self.entries
    }

    /// How to view the root event as `T`, if `T` is in this closure.
    pub(crate) fn upcaster<T: ?Sized + 'static>(&self) -> Option<Upcaster<T>> {
        let id = TypeId::of::<T>();
        self.entries
            .iter()
            .find(|entry| entry.ty.id == id)
            .and_then(|entry| entry.cast.downcast_ref::<Upcaster<T>>())
            .cloned()
    }
}

impl fmt::Debug for TypeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.types()).finish()
    }
}

/// Returns `true` if `B` is `A` or one of the supertypes `A` declares.
pub fn is_subtype<A: Event, B: ?Sized + 'static>() -> bool {
    TypeClosure::of::<A>().contains(EventType::of::<B>())
}

/// Std types that wrap another value without giving it an identity of its own.
const WRAPPER_TYPES: &[&str] = &[
    "Box",
    "Rc",
    "Arc",
    "Weak",
    "Option",
    "Cell",
    "RefCell",
    "Mutex",
    "RwLock",
    "Pin",
    "PhantomData",
    "ManuallyDrop",
];

/// Checks that `ty` may be used as an event or listener target.
///
/// Rejects references, raw pointers, arrays and slices (`str` excepted),
/// tuples and unit, function pointers, closures, the never type, `dyn Any`
/// and std wrapper types. The check reads [`std::any::type_name`].
pub fn validate_event_type(ty: EventType) -> BusResult<()> {
    match rejection_reason(ty.name) {
        Some(reason) => Err(BusError::InvalidEventType {
            type_name: ty.name,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn rejection_reason(name: &str) -> Option<&'static str> {
    if name.starts_with('&') {
        return Some("references cannot be event types");
    }
    if name.starts_with("*const ") || name.starts_with("*mut ") {
        return Some("raw pointers cannot be event types");
    }
    if name.starts_with('[') {
        return Some("arrays and slices cannot be event types");
    }
    if name.starts_with('(') {
        return Some("tuples and unit have no identity of their own");
    }
    if name == "!" {
        return Some("the never type has no values");
    }
    if name.starts_with("fn(") || name.starts_with("unsafe ") || name.starts_with("extern ") {
        return Some("function pointers cannot be event types");
    }
    if name.contains("{{closure}}") {
        return Some("closure types are anonymous");
    }
    if let Some(bounds) = name.strip_prefix("dyn ") {
        if bounds.split(" + ").next() == Some("core::any::Any") {
            return Some("dyn Any is an unbounded type");
        }
        return None;
    }

    let path = name.split('<').next().unwrap_or(name);
    let is_std = ["core::", "alloc::", "std::"]
        .iter()
        .any(|prefix| path.starts_with(prefix));
    let last = path.rsplit("::").next().unwrap_or(path);
    if is_std && WRAPPER_TYPES.contains(&last) {
        return Some("std wrapper types must be unwrapped before publishing");
    }
    None
}

impl Event for String {
    fn supertypes(types: &mut Supertypes<'_, Self>) {
        types.implements(|s| s.as_str());
    }
}

macro_rules! primitive_events {
    ($($ty:ty),* $(,)?) => {
        $(impl Event for $ty {})*
    };
}

primitive_events!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
