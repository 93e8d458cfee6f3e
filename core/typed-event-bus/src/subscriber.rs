//! Subscriber declarations
//!
//! A [`Subscriber`] is any shared value whose listeners a bus can discover.
//! Instead of annotations, a subscriber type lists its members once in
//! [`Subscriber::members`]: listener fields, handler methods and embedded
//! parent subscribers. The resulting [`SubscriberClass`] is what discovery
//! strategies inspect.
//!
//! ```rust
//! use std::sync::Arc;
//! use typed_event_bus::{Bus, Listener, Members, Subscriber};
//!
//! struct Console {
//!     on_text: Listener<String>,
//! }
//!
//! impl Console {
//!     fn on_number(&self, n: &i32) {
//!         println!("number: {n}");
//!     }
//! }
//!
//! impl Subscriber for Console {
//!     fn members(members: &mut Members<Self>) {
//!         members
//!             .field("on_text", |c| &c.on_text)
//!             .method("on_number", Console::on_number);
//!     }
//! }
//!
//! let bus = Bus::builder().name("console").build().unwrap();
//! let console = Arc::new(Console {
//!     on_text: Listener::new(|s: &String| println!("text: {s}")),
//! });
//! bus.subscribe(&console).unwrap();
//! bus.publish(&42).unwrap();
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::event::{validate_event_type, EventType};
use crate::listener::{BoundListener, Filter, Listener, Predicate};

/// A value whose listeners can be discovered by a bus.
///
/// The default declares no members, which makes the trait a plain marker for
/// use with custom discovery strategies.
pub trait Subscriber: Send + Sync + Sized + 'static {
    fn members(members: &mut Members<Self>) {
        let _ = members;
    }
}

/// Shared handle to a subscriber, or to a parent embedded in one.
pub struct SubscriberRef<S: 'static>(Arc<dyn Project<S>>);

trait Project<S>: Send + Sync {
    fn get(&self) -> &S;
}

impl<S: Send + Sync + 'static> Project<S> for Arc<S> {
    fn get(&self) -> &S {
        self
    }
}

struct Projected<P: 'static, S> {
    inner: SubscriberRef<P>,
    step: fn(&P) -> &S,
}

impl<P: Send + Sync + 'static, S> Project<S> for Projected<P, S> {
    fn get(&self) -> &S {
        (self.step)(&*self.inner)
    }
}

impl<S: 'static> SubscriberRef<S> {
    fn project<T: Send + Sync + 'static>(&self, step: fn(&S) -> &T) -> SubscriberRef<T>
    where
        S: Send + Sync,
    {
        SubscriberRef(Arc::new(Projected {
            inner: self.clone(),
            step,
        }))
    }
}

impl<S: 'static> Clone for SubscriberRef<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S: 'static> Deref for SubscriberRef<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.0.get()
    }
}

/// A subscriber value with its static type erased, as passed to
/// [`ListenerCandidate::bind`](crate::discovery::ListenerCandidate::bind).
#[derive(Clone)]
pub struct SubscriberInstance {
    class: &'static str,
    handle: Arc<dyn Any + Send + Sync>,
}

impl SubscriberInstance {
    pub fn of<S: Subscriber>(subscriber: Arc<S>) -> Self {
        Self::from_ref(SubscriberRef(Arc::new(subscriber)))
    }

    fn from_ref<S: Subscriber>(handle: SubscriberRef<S>) -> Self {
        Self {
            class: std::any::type_name::<S>(),
            handle: Arc::new(handle),
        }
    }

    /// Type name of the subscriber this instance was created from.
    pub fn class_name(&self) -> &'static str {
        self.class
    }

    /// Typed handle, if this instance is an `S`.
    pub fn downcast<S: Subscriber>(&self) -> Option<SubscriberRef<S>> {
        self.handle.downcast_ref::<SubscriberRef<S>>().cloned()
    }
}

impl fmt::Debug for SubscriberInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriberInstance").field(&self.class).finish()
    }
}

/// Options for a handler method: priority and named filters.
#[derive(Clone, Default)]
pub struct Subscribe {
    priority: i32,
    filters: Vec<NamedFilter>,
}

#[derive(Clone)]
struct NamedFilter {
    name: &'static str,
    target: EventType,
    filter: Arc<dyn Any + Send + Sync>,
}

impl Subscribe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a filter by type. Its target must be the method's event type.
    pub fn filter<F: Filter + Default>(self) -> Self {
        self.filter_with(F::default())
    }

    pub fn filter_with<F: Filter>(mut self, filter: F) -> Self {
        let filter: Arc<dyn Filter<Target = F::Target>> = Arc::new(filter);
        self.filters.push(NamedFilter {
            name: std::any::type_name::<F>(),
            target: EventType::of::<F::Target>(),
            filter: Arc::new(filter),
        });
        self
    }
}

type BindFn = Arc<dyn Fn(&SubscriberInstance) -> Option<BoundListener> + Send + Sync>;

/// A declared listener field.
pub struct FieldMember {
    name: &'static str,
    target: EventType,
    problem: Option<String>,
    bind: BindFn,
}

impl FieldMember {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> EventType {
        self.target
    }

    /// Why the field's target cannot be listened to, if it cannot.
    pub fn problem(&self) -> Option<&str> {
        self.problem.as_deref()
    }

    /// Reads the field from `instance`; `None` if it is of another class.
    pub fn bind(&self, instance: &SubscriberInstance) -> Option<BoundListener> {
        (self.bind)(instance)
    }
}

/// Why a declared method cannot become a listener.
#[derive(Debug, Clone)]
pub enum MethodProblem {
    InvalidParameter(String),
    Filter { filter: &'static str, reason: String },
}

/// A declared handler method.
pub struct MethodMember {
    name: &'static str,
    target: EventType,
    priority: i32,
    problem: Option<MethodProblem>,
    bind: BindFn,
}

impl MethodMember {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> EventType {
        self.target
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn problem(&self) -> Option<&MethodProblem> {
        self.problem.as_ref()
    }

    /// Creates a fresh listener calling the method on `instance`.
    pub fn bind(&self, instance: &SubscriberInstance) -> Option<BoundListener> {
        (self.bind)(instance)
    }
}

pub(crate) struct ParentLink {
    class: SubscriberClass,
    project: Arc<dyn Fn(&SubscriberInstance) -> Option<SubscriberInstance> + Send + Sync>,
}

impl ParentLink {
    pub(crate) fn class(&self) -> &SubscriberClass {
        &self.class
    }

    pub(crate) fn instance(&self, child: &SubscriberInstance) -> Option<SubscriberInstance> {
        (self.project)(child)
    }
}

/// Member declarations collected from [`Subscriber::members`].
pub struct Members<S: Subscriber> {
    fields: Vec<FieldMember>,
    methods: Vec<MethodMember>,
    parents: Vec<ParentLink>,
    _subscriber: std::marker::PhantomData<fn(&S)>,
}

type HandlerFn<S, E> = Arc<dyn Fn(&S, &E) -> anyhow::Result<()> + Send + Sync>;

impl<S: Subscriber> Members<S> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            methods: Vec::new(),
            parents: Vec::new(),
            _subscriber: std::marker::PhantomData,
        }
    }

    /// Declares a listener field. Binding yields the field's own listener,
    /// so its identity is stable across subscriptions.
    pub fn field<E: ?Sized + 'static>(
        &mut self,
        name: &'static str,
        get: fn(&S) -> &Listener<E>,
    ) -> &mut Self {
        let target = EventType::of::<E>();
        self.fields.push(FieldMember {
            name,
            target,
            problem: validate_event_type(target).err().map(|err| err.to_string()),
            bind: Arc::new(move |instance: &SubscriberInstance| {
                let subscriber = instance.downcast::<S>()?;
                Some(BoundListener::from(get(&subscriber).clone()))
            }),
        });
        self
    }

    pub fn method<E: ?Sized + 'static>(&mut self, name: &'static str, handler: fn(&S, &E)) -> &mut Self {
        self.method_with(name, handler, Subscribe::default())
    }

    pub fn method_with<E: ?Sized + 'static>(
        &mut self,
        name: &'static str,
        handler: fn(&S, &E),
        options: Subscribe,
    ) -> &mut Self {
        let handler: HandlerFn<S, E> = Arc::new(move |subscriber: &S, event: &E| {
            handler(subscriber, event);
            Ok(())
        });
        self.push_method(name, handler, options)
    }

    pub fn fallible_method<E: ?Sized + 'static>(
        &mut self,
        name: &'static str,
        handler: fn(&S, &E) -> anyhow::Result<()>,
        options: Subscribe,
    ) -> &mut Self {
        self.push_method(name, Arc::new(handler), options)
    }

    /// Declares an embedded parent subscriber, walked when the bus has parent
    /// discovery enabled.
    pub fn parent<P: Subscriber>(&mut self, get: fn(&S) -> &P) -> &mut Self {
        self.parents.push(ParentLink {
            class: SubscriberClass::of::<P>(),
            project: Arc::new(move |child: &SubscriberInstance| {
                let child = child.downcast::<S>()?;
                Some(SubscriberInstance::from_ref(child.project(get)))
            }),
        });
        self
    }

    fn push_method<E: ?Sized + 'static>(
        &mut self,
        name: &'static str,
        handler: HandlerFn<S, E>,
        options: Subscribe,
    ) -> &mut Self {
        let target = EventType::of::<E>();
        let mut problem = arity_problem(target);
        let mut filters: Vec<Predicate<E>> = Vec::with_capacity(options.filters.len());
        for named in &options.filters {
            match named.filter.downcast_ref::<Arc<dyn Filter<Target = E>>>() {
                Some(filter) => {
                    let filter = Arc::clone(filter);
                    filters.push(Arc::new(move |event: &E| filter.test(event)));
                }
                None => {
                    problem.get_or_insert(MethodProblem::Filter {
                        filter: named.name,
                        reason: format!("filter targets {} but the method takes {target}", named.target),
                    });
                }
            }
        }

        let priority = options.priority;
        self.methods.push(MethodMember {
            name,
            target,
            priority,
            problem,
            bind: Arc::new(move |instance: &SubscriberInstance| {
                let subscriber = instance.downcast::<S>()?;
                let handler = Arc::clone(&handler);
                let listener = Listener::fallible_builder(move |event: &E| handler(&*subscriber, event))
                    .priority(priority)
                    .with_filters(filters.clone())
                    .into_listener();
                Some(BoundListener::from(listener))
            }),
        });
        self
    }
}

/// A method parameter must be exactly one admissible event type. Tuples and
/// unit stand for the wrong number of parameters.
fn arity_problem(target: EventType) -> Option<MethodProblem> {
    let name = target.name();
    if let Some(inner) = name.strip_prefix('(').and_then(|n| n.strip_suffix(')')) {
        let found = tuple_arity(inner);
        return Some(MethodProblem::InvalidParameter(format!(
            "expected exactly one parameter, found {found}"
        )));
    }
    validate_event_type(target)
        .err()
        .map(|err| MethodProblem::InvalidParameter(err.to_string()))
}

fn tuple_arity(inner: &str) -> usize {
    if inner.trim().is_empty() {
        return 0;
    }
    let mut depth = 0usize;
    let mut count = 1;
    for c in inner.chars() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => count += 1,
            _ => {}
        }
    }
    // A one-element tuple is written `(T,)`.
    if inner.trim_end().ends_with(',') {
        count -= 1;
    }
    count
}

/// Runtime description of a subscriber type.
pub struct SubscriberClass {
    id: TypeId,
    name: &'static str,
    fields: Vec<FieldMember>,
    methods: Vec<MethodMember>,
    parents: Vec<ParentLink>,
}

impl SubscriberClass {
    pub fn of<S: Subscriber>() -> Self {
        let mut members = Members::<S>::new();
        S::members(&mut members);
        Self {
            id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
            fields: members.fields,
            methods: members.methods,
            parents: members.parents,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldMember] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodMember] {
        &self.methods
    }

    /// Classes of the declared parent subscribers.
    pub fn parent_classes(&self) -> impl Iterator<Item = &SubscriberClass> {
        self.parents.iter().map(ParentLink::class)
    }

    pub(crate) fn parents(&self) -> &[ParentLink] {
        &self.parents
    }
}

impl fmt::Debug for SubscriberClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberClass")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("parents", &self.parents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Base {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Base {
        fn on_text(&self, text: &str) {
            self.log.lock().push(format!("base:{text}"));
        }
    }

    impl Subscriber for Base {
        fn members(members: &mut Members<Self>) {
            members.method("on_text", Base::on_text);
        }
    }

    struct Child {
        base: Base,
        on_count: Listener<u32>,
    }

    impl Child {
        fn on_pair(&self, _pair: &(u8, u8)) {}
    }

    impl Subscriber for Child {
        fn members(members: &mut Members<Self>) {
            members
                .field("on_count", |c| &c.on_count)
                .method("on_pair", Child::on_pair)
                .parent(|c| &c.base);
        }
    }

    fn child() -> Arc<Child> {
        Arc::new(Child {
            base: Base {
                log: Arc::new(Mutex::new(Vec::new())),
            },
            on_count: Listener::new(|_: &u32| {}),
        })
    }

    #[test]
    fn test_class_collects_members() {
        let class = SubscriberClass::of::<Child>();
        assert_eq!(class.id(), TypeId::of::<Child>());
        assert_eq!(class.fields().len(), 1);
        assert_eq!(class.fields()[0].target(), EventType::of::<u32>());
        assert_eq!(class.methods().len(), 1);
        assert_eq!(class.parent_classes().count(), 1);
    }

    #[test]
    fn test_field_binding_keeps_identity() {
        let subscriber = child();
        let class = SubscriberClass::of::<Child>();
        let bound = class.fields()[0]
            .bind(&SubscriberInstance::of(Arc::clone(&subscriber)))
            .unwrap();
        assert_eq!(bound.id(), subscriber.on_count.id());
    }

    #[test]
    fn test_tuple_parameter_is_arity_problem() {
        let class = SubscriberClass::of::<Child>();
        match class.methods()[0].problem() {
            Some(MethodProblem::InvalidParameter(reason)) => assert!(reason.contains("found 2"), "{reason}"),
            other => panic!("unexpected problem {other:?}"),
        }
    }

    #[test]
    fn test_tuple_arity() {
        assert_eq!(tuple_arity(""), 0);
        assert_eq!(tuple_arity("u8,"), 1);
        assert_eq!(tuple_arity("u8, u8"), 2);
        assert_eq!(tuple_arity("alloc::vec::Vec<(u8, u8)>, u8, [u8; 2]"), 3);
    }

    #[test]
    fn test_parent_projection() {
        let subscriber = child();
        let class = SubscriberClass::of::<Child>();
        let link = &class.parents()[0];
        let parent = link
            .instance(&SubscriberInstance::of(Arc::clone(&subscriber)))
            .unwrap();
        assert!(parent.downcast::<Base>().is_some());
        assert!(parent.downcast::<Child>().is_none());

        let bound = link.class().methods()[0].bind(&parent).unwrap();
        assert_eq!(bound.target(), EventType::of::<str>());
    }

    #[test]
    fn test_wrong_instance_does_not_bind() {
        let class = SubscriberClass::of::<Child>();
        let base = Arc::new(Base {
            log: Arc::new(Mutex::new(Vec::new())),
        });
        assert!(class.fields()[0].bind(&SubscriberInstance::of(base)).is_none());
    }

    #[test]
    fn test_mismatched_filter_is_reported() {
        #[derive(Default)]
        struct Short;
        impl Filter for Short {
            type Target = String;
            fn test(&self, event: &String) -> bool {
                event.len() < 4
            }
        }

        struct Handler;
        impl Handler {
            fn on_text(&self, _: &str) {}
            fn on_string(&self, _: &String) {}
        }
        impl Subscriber for Handler {
            fn members(members: &mut Members<Self>) {
                members
                    .method_with("on_text", Handler::on_text, Subscribe::new().filter::<Short>())
                    .method_with("on_string", Handler::on_string, Subscribe::new().filter::<Short>());
            }
        }

        let class = SubscriberClass::of::<Handler>();
        assert!(matches!(
            class.methods()[0].problem(),
            Some(MethodProblem::Filter { .. })
        ));
        assert!(class.methods()[1].problem().is_none());
    }
}
