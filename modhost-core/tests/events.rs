mod common;

use common::{init_tracing, loader, Behavior, Journal};
use modhost_core::{EventContext, Gateway, GatewayEvent, GatewayId, ModuleProperties};
use modhost_error::HostError;
use std::sync::{atomic::Ordering, Arc, Mutex};

type Seen = Arc<Mutex<Vec<(GatewayId, GatewayEvent)>>>;

fn recorder(seen: &Seen) -> impl Fn(&Gateway, GatewayEvent, &EventContext) + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |gw: &Gateway, event: GatewayEvent, _: &EventContext| {
        seen.lock().unwrap().push((gw.id(), event))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_created_and_destroyed_fire_once() {
    init_tracing();
    let journal = Journal::new();
    let seen: Seen = Arc::default();

    let gw = Gateway::builder()
        .loader(loader(&journal, &[("m.mod", Behavior::default())]))
        .module(ModuleProperties::new("m.mod").with_name("m"))
        .on_event(GatewayEvent::Created, recorder(&seen))
        .on_event(GatewayEvent::Destroyed, recorder(&seen))
        .build()
        .await
        .unwrap();

    gw.destroy().await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (gw.id(), GatewayEvent::Created),
            (gw.id(), GatewayEvent::Destroyed)
        ]
    );
    assert_eq!(gw.event_stats().events_emitted.load(Ordering::Relaxed), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_listener_misses_created() {
    init_tracing();
    let journal = Journal::new();
    let gw = Gateway::create(Vec::new(), loader(&journal, &[]))
        .await
        .unwrap();

    let seen: Seen = Arc::default();
    gw.add_event_callback(GatewayEvent::Created, recorder(&seen))
        .unwrap();
    gw.add_event_callback(GatewayEvent::Destroyed, recorder(&seen))
        .unwrap();

    gw.destroy().await.unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(gw.id(), GatewayEvent::Destroyed)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listeners_run_in_insertion_order() {
    init_tracing();
    let journal = Journal::new();
    let gw = Gateway::create(Vec::new(), loader(&journal, &[]))
        .await
        .unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let order = Arc::clone(&order);
        gw.add_event_callback(GatewayEvent::Destroyed, move |_, _, _| {
            order.lock().unwrap().push(i)
        })
        .unwrap();
    }

    gw.destroy().await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_listener_does_not_stop_others() {
    init_tracing();
    let journal = Journal::new();
    let gw = Gateway::create(Vec::new(), loader(&journal, &[]))
        .await
        .unwrap();

    let seen: Seen = Arc::default();
    gw.add_event_callback(GatewayEvent::Destroyed, |_, _, _| {
        panic!("listener blew up")
    })
    .unwrap();
    gw.add_event_callback(GatewayEvent::Destroyed, recorder(&seen))
        .unwrap();

    gw.destroy().await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    let stats = gw.event_stats();
    assert_eq!(stats.listener_panics.load(Ordering::Relaxed), 1);
    assert_eq!(stats.listener_invocations.load(Ordering::Relaxed), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_create_fires_no_events() {
    init_tracing();
    let journal = Journal::new();
    let seen: Seen = Arc::default();

    let result = Gateway::builder()
        .loader(loader(
            &journal,
            &[
                ("ok.mod", Behavior::default()),
                (
                    "bad.mod",
                    Behavior {
                        fail_create: true,
                        ..Default::default()
                    },
                ),
            ],
        ))
        .module(ModuleProperties::new("ok.mod").with_name("ok"))
        .module(ModuleProperties::new("bad.mod").with_name("bad"))
        .on_event(GatewayEvent::Created, recorder(&seen))
        .on_event(GatewayEvent::Destroyed, recorder(&seen))
        .build()
        .await;

    assert!(matches!(result, Err(HostError::ModuleInitError { .. })));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(journal.count_destroys("ok"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_after_destroy_is_rejected() {
    init_tracing();
    let journal = Journal::new();
    let gw = Gateway::create(Vec::new(), loader(&journal, &[]))
        .await
        .unwrap();
    gw.destroy().await.unwrap();

    let result = gw.add_event_callback(GatewayEvent::Destroyed, |_, _, _| {});
    assert!(matches!(result, Err(HostError::InvalidHandle(_))));
}
