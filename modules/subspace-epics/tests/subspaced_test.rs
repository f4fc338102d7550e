//! Subspaced epics running on a real store and epic middleware.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use subspace_epics::{
    create_epic_middleware, subspaced, ActionStream, ActionStreamExt, EpicContext, EpicError,
    EpicMiddleware, EpicResult, MiddlewareOptions, Selector, StateStream,
};
use subspace_store::{global_action, namespaced_action, Action, MemoryStore, Store};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture_state() -> Value {
    json!({
        "subState": { "value": "expected" },
        "value": "wrong"
    })
}

fn sub_state() -> Selector<Value, Value> {
    Selector::from_fn(|state: &Value| state["subState"].clone())
}

/// On `TEST`, report the `value` field of whatever state the epic sees.
fn verify_epic(
    actions: ActionStream,
    state: StateStream<Value>,
    _ctx: EpicContext<Value, ()>,
) -> EpicResult {
    Ok(actions
        .of_type("TEST")
        .map(move |_| Action::new("VERIFY").with("value", state.value()["value"].clone()))
        .boxed())
}

fn store_with(middleware: &EpicMiddleware<Value>) -> std::sync::Arc<MemoryStore<Value>> {
    MemoryStore::builder(fixture_state())
        .middleware(middleware.clone())
        .build()
}

/// `{ "ns": { "n": 0 } }`, where every `ns/ADD` adds 5 to `ns.n`.
fn counter_store(middleware: &EpicMiddleware<Value>) -> std::sync::Arc<MemoryStore<Value>> {
    MemoryStore::builder(json!({ "ns": { "n": 0 } }))
        .reducer(|state: &mut Value, action: &Action| {
            if action.action_type() == "ns/ADD" {
                let n = state["ns"]["n"].as_i64().unwrap_or_default();
                state["ns"]["n"] = json!(n + 5);
            }
        })
        .middleware(middleware.clone())
        .build()
}

/// Wait until `count` actions were recorded, then give stragglers a
/// moment so extra emissions would show up too.
async fn recorded(store: &MemoryStore<Value>, count: usize) -> Value {
    tokio::time::timeout(Duration::from_secs(1), async {
        while store.actions().len() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("epic output was not dispatched in time");
    tokio::time::sleep(Duration::from_millis(10)).await;
    serde_json::to_value(store.actions()).expect("actions serialize")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ordinary_middleware_is_a_configuration_error() {
    init_tracing();
    let middleware = EpicMiddleware::new(MiddlewareOptions::default());
    let store = store_with(&middleware);

    let err = middleware
        .run(subspaced(Selector::from_fn(|state: &Value| state.clone()), None).epic(verify_epic))
        .unwrap_err();

    assert!(matches!(err, EpicError::StoreNotFound));
    assert!(err.is_configuration());
    assert_eq!(
        err.to_string(),
        "Subspace epic couldn't find the store. Make sure you've used the namespacing-aware middleware factory"
    );

    store.dispatch(Action::new("TEST"));
    assert_eq!(recorded(&store, 1).await, json!([{ "type": "TEST" }]));
}

#[tokio::test]
async fn epic_sees_substate() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), None).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(Action::new("TEST"));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "TEST" },
            { "type": "VERIFY", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn epic_actions_are_namespaced() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(namespaced_action("test")(Action::new("TEST")));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "test/TEST" },
            { "type": "test/VERIFY", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn key_selector_doubles_as_namespace() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced::<Value, Value>("subState", None).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(namespaced_action("subState")(Action::new("TEST")));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "subState/TEST" },
            { "type": "subState/VERIFY", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn global_actions_reach_the_epic() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(global_action(Action::new("TEST")));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "TEST", "globalAction": true },
            { "type": "test/VERIFY", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn global_actions_from_the_epic_are_not_namespaced() {
    fn global_verify(
        actions: ActionStream,
        state: StateStream<Value>,
        _ctx: EpicContext<Value, ()>,
    ) -> EpicResult {
        Ok(actions
            .of_type("TEST")
            .map(move |_| {
                global_action(Action::new("VERIFY").with("value", state.value()["value"].clone()))
            })
            .boxed())
    }

    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(global_verify))
        .expect("epic starts");

    store.dispatch(namespaced_action("test")(Action::new("TEST")));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "test/TEST" },
            { "type": "VERIFY", "value": "expected", "globalAction": true }
        ])
    );
}

#[tokio::test]
async fn dependencies_are_passed_on() {
    #[derive(Debug)]
    struct Deps {
        value: String,
    }

    fn dependency_epic(
        actions: ActionStream,
        _state: StateStream<Value>,
        ctx: EpicContext<Value, Deps>,
    ) -> EpicResult {
        let value = ctx.dependencies().value.clone();
        Ok(actions
            .of_type("TEST")
            .map(move |_| Action::new("VERIFY").with("value", value.clone()))
            .boxed())
    }

    init_tracing();
    let options = MiddlewareOptions::builder()
        .dependencies(Deps {
            value: "expected".into(),
        })
        .build();
    let middleware = create_epic_middleware(options);
    let store = MemoryStore::builder(json!({ "subState": { "value": "wrong" }, "value": "wrong" }))
        .middleware(middleware.clone())
        .build();
    middleware
        .run(subspaced(sub_state(), None).epic(dependency_epic))
        .expect("epic starts");

    store.dispatch(Action::new("TEST"));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "TEST" },
            { "type": "VERIFY", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn echo_emits_exactly_one_prefixed_action() {
    fn echo(
        actions: ActionStream,
        _state: StateStream<Value>,
        _ctx: EpicContext<Value, ()>,
    ) -> EpicResult {
        Ok(actions.of_type("FOO").map(|action| action.with_type("ECHOED")).boxed())
    }

    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("n")).epic(echo))
        .expect("epic starts");

    store.dispatch(Action::new("n/FOO").with("id", 7));
    store.dispatch(Action::new("m/FOO"));

    assert_eq!(
        recorded(&store, 3).await,
        json!([
            { "type": "n/FOO", "id": 7 },
            { "type": "m/FOO" },
            { "type": "n/ECHOED", "id": 7 }
        ])
    );
}

#[tokio::test]
async fn substate_follows_reduced_state() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = MemoryStore::builder(fixture_state())
        .reducer(|state: &mut Value, action: &Action| {
            if action.action_type() == "test/SET" {
                state["subState"]["value"] = action.get("value").cloned().unwrap_or(Value::Null);
            }
        })
        .middleware(middleware.clone())
        .build();
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(Action::new("test/SET").with("value", "updated"));
    store.dispatch(Action::new("test/TEST"));

    assert_eq!(
        recorded(&store, 3).await,
        json!([
            { "type": "test/SET", "value": "updated" },
            { "type": "test/TEST" },
            { "type": "test/VERIFY", "value": "updated" }
        ])
    );
}

#[tokio::test]
async fn nested_subspaces_compose() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = MemoryStore::builder(json!({
        "outer": { "inner": { "value": "deep" }, "value": "shallow" },
        "value": "root"
    }))
    .middleware(middleware.clone())
    .build();

    let inner = subspaced::<Value, Value>("inner", None).epic(verify_epic);
    middleware
        .run(subspaced::<Value, Value>("outer", None).epic(inner))
        .expect("epic starts");

    store.dispatch(Action::new("outer/inner/TEST"));
    store.dispatch(Action::new("outer/TEST"));

    assert_eq!(
        recorded(&store, 3).await,
        json!([
            { "type": "outer/inner/TEST" },
            { "type": "outer/TEST" },
            { "type": "outer/inner/VERIFY", "value": "deep" }
        ])
    );
}

#[tokio::test]
async fn inner_epic_dispatches_through_subspaced_store() {
    fn direct(
        actions: ActionStream,
        _state: StateStream<Value>,
        ctx: EpicContext<Value, ()>,
    ) -> EpicResult {
        let store = subspace_epics::locate(ctx.engine().as_ref())?;
        Ok(actions
            .of_type("TEST")
            .filter_map(move |_| {
                store.dispatch(Action::new("DIRECT").with("value", store.get_state()["value"].clone()));
                futures::future::ready(None)
            })
            .boxed())
    }

    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(direct))
        .expect("epic starts");

    store.dispatch(Action::new("test/TEST"));

    assert_eq!(
        recorded(&store, 2).await,
        json!([
            { "type": "test/TEST" },
            { "type": "test/DIRECT", "value": "expected" }
        ])
    );
}

#[tokio::test]
async fn each_action_sees_the_substate_it_produced() {
    fn report(
        actions: ActionStream,
        state: StateStream<Value>,
        _ctx: EpicContext<Value, ()>,
    ) -> EpicResult {
        Ok(actions
            .of_type("ADD")
            .map(move |_| Action::new("REPORT").with("n", state.value()["n"].clone()))
            .boxed())
    }

    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = counter_store(&middleware);
    middleware
        .run(subspaced::<Value, Value>("ns", None).epic(report))
        .expect("epic starts");

    store.dispatch(Action::new("ns/ADD"));
    store.dispatch(Action::new("ns/ADD"));

    assert_eq!(
        recorded(&store, 4).await,
        json!([
            { "type": "ns/ADD" },
            { "type": "ns/ADD" },
            { "type": "ns/REPORT", "n": 5 },
            { "type": "ns/REPORT", "n": 10 }
        ])
    );
}

#[tokio::test]
async fn substate_stream_yields_every_change_once() {
    fn saw(
        _actions: ActionStream,
        state: StateStream<Value>,
        _ctx: EpicContext<Value, ()>,
    ) -> EpicResult {
        Ok(state
            .map(|sub| Action::new("SAW").with("n", sub["n"].clone()))
            .boxed())
    }

    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = counter_store(&middleware);
    middleware
        .run(subspaced::<Value, Value>("ns", None).epic(saw))
        .expect("epic starts");

    store.dispatch(Action::new("ns/ADD"));
    store.dispatch(Action::new("ns/ADD"));
    store.dispatch(Action::new("ns/ADD"));

    let actions = recorded(&store, 7).await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(serde_json::to_value(store.actions()).expect("actions serialize"), actions);
    assert_eq!(
        actions,
        json!([
            { "type": "ns/ADD" },
            { "type": "ns/ADD" },
            { "type": "ns/ADD" },
            { "type": "ns/SAW", "n": 0 },
            { "type": "ns/SAW", "n": 5 },
            { "type": "ns/SAW", "n": 10 },
            { "type": "ns/SAW", "n": 15 }
        ])
    );
}

#[tokio::test]
async fn stop_cancels_subspaced_epics_and_releases_the_store() {
    init_tracing();
    let middleware = create_epic_middleware(MiddlewareOptions::default());
    let store = store_with(&middleware);
    middleware
        .run(subspaced(sub_state(), Some("test")).epic(verify_epic))
        .expect("epic starts");

    store.dispatch(Action::new("test/TEST"));
    recorded(&store, 2).await;

    middleware.stop();
    store.dispatch(Action::new("test/TEST"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        serde_json::to_value(store.actions()).expect("actions serialize"),
        json!([
            { "type": "test/TEST" },
            { "type": "test/VERIFY", "value": "expected" },
            { "type": "test/TEST" }
        ])
    );

    let weak = std::sync::Arc::downgrade(&store);
    drop(store);
    assert!(weak.upgrade().is_none());
    assert!(subspace_epics::locate(&middleware).is_err());
}
