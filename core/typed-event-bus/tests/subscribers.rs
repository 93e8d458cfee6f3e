//! Subscriber discovery, parent walking and all-or-nothing subscription.

use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use typed_event_bus::{
    BoundListener, Bus, BusError, Candidates, DiscoveryError, DiscoveryStrategy, Filter,
    ListenerCandidate, Listener, Members, Subscribe, Subscriber, SubscriberClass,
    SubscriberInstance,
};

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct ShortText;

impl Filter for ShortText {
    type Target = String;

    fn test(&self, event: &String) -> bool {
        event.len() <= 3
    }
}

struct Base {
    log: Log,
}

impl Base {
    fn on_text(&self, text: &String) {
        self.log.lock().push(format!("base:{text}"));
    }
}

impl Subscriber for Base {
    fn members(members: &mut Members<Self>) {
        members.method("on_text", Base::on_text);
    }
}

struct Screen {
    base: Base,
    log: Log,
    on_count: Listener<u32>,
}

impl Screen {
    fn new(log: &Log) -> Arc<Self> {
        let sink = Arc::clone(log);
        Arc::new(Self {
            base: Base { log: Arc::clone(log) },
            log: Arc::clone(log),
            on_count: Listener::new(move |n: &u32| sink.lock().push(format!("count:{n}"))),
        })
    }

    fn on_text_first(&self, text: &String) {
        self.log.lock().push(format!("first:{text}"));
    }

    fn on_short_text(&self, text: &String) {
        self.log.lock().push(format!("short:{text}"));
    }
}

impl Subscriber for Screen {
    fn members(members: &mut Members<Self>) {
        members
            .field("on_count", |s| &s.on_count)
            .method_with("on_text_first", Screen::on_text_first, Subscribe::new().priority(10))
            .method_with(
                "on_short_text",
                Screen::on_short_text,
                Subscribe::new().filter::<ShortText>(),
            )
            .parent(|s| &s.base);
    }
}

#[test]
fn test_fields_methods_and_parents_are_discovered() {
    let bus = Bus::builder().name("screen").parent_discovery(true).build().unwrap();
    let log = Log::default();
    let screen = Screen::new(&log);
    bus.subscribe(&screen).unwrap();

    bus.publish(&"abc".to_string()).unwrap();
    bus.publish(&"abcdef".to_string()).unwrap();
    bus.publish(&5u32).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "first:abc",
            "short:abc",
            "base:abc",
            "first:abcdef",
            "base:abcdef",
            "count:5",
        ]
    );
}

#[test]
fn test_parent_discovery_disabled() {
    let bus = Bus::builder().name("flat").build().unwrap();
    let log = Log::default();
    bus.subscribe(&Screen::new(&log)).unwrap();

    bus.publish(&"abcdef".to_string()).unwrap();
    assert_eq!(*log.lock(), vec!["first:abcdef"]);
}

#[test]
fn test_already_subscribed() {
    let bus = Bus::builder().name("twice").build().unwrap();
    let screen = Screen::new(&Log::default());
    bus.subscribe(&screen).unwrap();

    let err = bus.subscribe(&screen).unwrap_err();
    assert!(matches!(err, BusError::AlreadySubscribed { .. }));
    assert_eq!(bus.listener_count::<u32>(), 1);

    // A different instance of the same type is a separate subscriber.
    bus.subscribe(&Screen::new(&Log::default())).unwrap();
    assert_eq!(bus.listener_count::<u32>(), 2);
}

#[test]
fn test_unsubscribing_unknown_subscriber_is_noop() {
    let bus = Bus::builder().name("noop").build().unwrap();
    assert!(!bus.unsubscribe(&Screen::new(&Log::default())));
}

struct Broken {
    on_count: Listener<u32>,
}

impl Broken {
    fn on_pair(&self, _: &(String, u32)) {}
}

impl Subscriber for Broken {
    fn members(members: &mut Members<Self>) {
        members
            .field("on_count", |b| &b.on_count)
            .method("on_pair", Broken::on_pair);
    }
}

#[test]
fn test_failed_subscription_leaves_nothing_behind() {
    let bus = Bus::builder().name("rollback").build().unwrap();
    let broken = Arc::new(Broken {
        on_count: Listener::new(|_: &u32| {}),
    });

    let err = bus.subscribe(&broken).unwrap_err();
    match err {
        BusError::Discovery {
            source: DiscoveryError::InvalidListenerMethod { method, reason },
            ..
        } => {
            assert_eq!(method, "on_pair");
            assert!(reason.contains("found 2"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(bus.listener_count::<u32>(), 0);
    assert!(!bus.is_subscribed(&broken));
}

struct MisFiltered;

impl MisFiltered {
    fn on_number(&self, _: &u32) {}
}

impl Subscriber for MisFiltered {
    fn members(members: &mut Members<Self>) {
        members.method_with("on_number", MisFiltered::on_number, Subscribe::new().filter::<ShortText>());
    }
}

#[test]
fn test_filter_for_other_type_is_rejected() {
    let bus = Bus::builder().name("filters").build().unwrap();
    let err = bus.subscribe(&Arc::new(MisFiltered)).unwrap_err();
    assert!(matches!(
        err,
        BusError::Discovery {
            source: DiscoveryError::InvalidFilter { member: "on_number", .. },
            ..
        }
    ));
}

type PluginBinder = fn(&Plugin) -> Option<BoundListener>;

/// Binds one listener per registered function, ignoring declared members.
struct Explicit {
    handlers: Vec<(&'static str, PluginBinder)>,
}

struct Plugin {
    log: Log,
    healthy: bool,
}

impl Subscriber for Plugin {}

struct ExplicitCandidate {
    name: &'static str,
    bind: PluginBinder,
}

impl ListenerCandidate for ExplicitCandidate {
    fn member(&self) -> &str {
        self.name
    }

    fn bind(&self, instance: &SubscriberInstance) -> anyhow::Result<Vec<BoundListener>> {
        let plugin = instance
            .downcast::<Plugin>()
            .ok_or_else(|| anyhow!("not a plugin"))?;
        let listener = (self.bind)(&plugin).ok_or_else(|| anyhow!("plugin is unhealthy"))?;
        Ok(vec![listener])
    }
}

impl DiscoveryStrategy for Explicit {
    fn find_all<'a>(&'a self, class: &'a SubscriberClass) -> Candidates<'a> {
        if class.name() != std::any::type_name::<Plugin>() {
            return Box::new(std::iter::empty::<Result<Box<dyn ListenerCandidate>, DiscoveryError>>());
        }
        Box::new(self.handlers.iter().map(|&(name, bind)| {
            Ok(Box::new(ExplicitCandidate { name, bind }) as Box<dyn ListenerCandidate>)
        }))
    }
}

fn plugin_listener(plugin: &Plugin) -> Option<BoundListener> {
    if !plugin.healthy {
        return None;
    }
    let log = Arc::clone(&plugin.log);
    Some(Listener::new(move |n: &i16| log.lock().push(format!("plugin:{n}"))).into())
}

fn explicit_bus() -> Bus {
    Bus::builder()
        .name("plugins")
        .discovery_strategies([])
        .add_discovery_strategy(Explicit {
            handlers: vec![("plugin_listener", plugin_listener as PluginBinder)],
        })
        .build()
        .unwrap()
}

#[test]
fn test_custom_discovery_strategy() {
    let bus = explicit_bus();
    let log = Log::default();
    let plugin = Arc::new(Plugin {
        log: Arc::clone(&log),
        healthy: true,
    });
    bus.subscribe(&plugin).unwrap();
    bus.publish(&-4i16).unwrap();
    assert_eq!(*log.lock(), vec!["plugin:-4"]);

    bus.unsubscribe(&plugin);
    bus.publish(&-4i16).unwrap();
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_bind_failure_is_reported() {
    let bus = explicit_bus();
    let plugin = Arc::new(Plugin {
        log: Log::default(),
        healthy: false,
    });
    let err = bus.subscribe(&plugin).unwrap_err();
    match err {
        BusError::BindFailed { member, source, .. } => {
            assert_eq!(member, "plugin_listener");
            assert_eq!(source.to_string(), "plugin is unhealthy");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!bus.is_subscribed(&plugin));
}

struct Failing;

impl DiscoveryStrategy for Failing {
    fn find_all<'a>(&'a self, _class: &'a SubscriberClass) -> Candidates<'a> {
        let failure: Result<Box<dyn ListenerCandidate>, _> =
            Err(DiscoveryError::Strategy(anyhow!("registry offline")));
        Box::new(std::iter::once(failure))
    }
}

#[test]
fn test_strategy_error_rolls_back_earlier_strategies() {
    let bus = Bus::builder()
        .name("failing")
        .add_discovery_strategy(Failing)
        .build()
        .unwrap();
    let screen = Screen::new(&Log::default());

    let err = bus.subscribe(&screen).unwrap_err();
    assert_eq!(err.as_label(), "discovery_error");
    assert_eq!(bus.listener_count::<u32>(), 0);
    assert_eq!(bus.listener_count::<String>(), 0);
}

#[test]
fn test_subscriber_on_attachable_bus() {
    let parent = Bus::builder().name("parent").attachable().build().unwrap();
    let child = Arc::new(Bus::builder().name("child").build().unwrap());
    let log = Log::default();
    child.subscribe(&Screen::new(&log)).unwrap();
    parent.attach(child.clone());

    parent.publish(&9u32).unwrap();
    assert_eq!(*log.lock(), vec!["count:9"]);
}
