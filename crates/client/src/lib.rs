//! Client surface (spec §4.F): `get_client` performs a `help` RPC against a
//! server's root port, then installs a per-call wrapper for every
//! advertised name and runs the `track*`/`get*` property-discovery pass of
//! §4.C, awaiting every discovered property's first `{value}` push before
//! resolving.
//!
//! Grounded on `enso-protocol`'s `make_rpc_methods!`-generated `Client`/
//! `Handle` split for its JSON-RPC clients, generalized so that calls are
//! driven by the runtime `help()` list rather than a compile-time macro,
//! since this client has to work against an arbitrary, server-chosen call
//! table instead of one fixed protocol known ahead of time. Property change
//! notification is grounded on the
//! `sender: Option<UnboundedSender<Event<Notification>>>` field of
//! `enso-protocol::new_handler::HandlerData` — the same "push updates
//! through an unbounded channel to whoever subscribed" shape, generalized
//! from one event stream per handler to one per tracked property.

use procweb_channel::Endpoint;
use procweb_channel::Listener;
use procweb_logger::Logger;
use procweb_prelude::*;
use procweb_rpc::call;
use procweb_rpc::property::parse_tracker_frame;
use procweb_rpc::property::value_frame;
use procweb_rpc::property::TrackerFrame;
use procweb_rpc::CallError;

use futures::channel::mpsc;
use wasm_bindgen::JsValue;
use web_sys::MessageChannel;
use web_sys::MessageEvent;

/// Failures raised synthesizing or driving a client.
#[derive(Debug, Fail)]
pub enum ClientError {
    #[fail(display = "transport error while fetching `help`: {}", _0)]
    Help(CallError),
    #[fail(display = "server does not advertise a call named {:?}", _0)]
    UnknownCall(String),
    #[fail(display = "call {:?} failed: {}", _0, _1)]
    Call(String, CallError),
    #[fail(display = "browser transport error setting up property {:?}: {:?}", _0, _1)]
    Transport(String, procweb_channel::UnsafeJsValue),
    #[fail(display = "property {:?} is read-only", _0)]
    ReadOnly(String),
    #[fail(display = "no such property: {:?}", _0)]
    UnknownProperty(String),
}

struct PropertyState {
    value:           JsValue,
    /// The last value the server actually confirmed — either the initial
    /// read or a subsequent `{value}` push. `set_property` writes `value`
    /// optimistically without touching this field, so a later `{error}`
    /// push has something correct to roll back to.
    confirmed_value: JsValue,
    writable:        bool,
    tracker:         Endpoint,
    subscribers:     Vec<mpsc::UnboundedSender<JsValue>>,
    _listener:       Listener,
}

struct State {
    endpoint:   Endpoint,
    sync:       bool,
    names:      HashSet<String>,
    /// Diagnostic-only arity hints from `help()`, keyed by call name.
    /// Missing entries (a peer advertising only `{name}`) are simply not
    /// asserted against.
    arities:    HashMap<String, usize>,
    properties: HashMap<String, PropertyState>,
    logger:     Logger,
}

/// A synthesized proxy for a remote server: every advertised call as an
/// async method ([`Client::call`]), every discovered `track*`/`get*` pair as
/// a cached, optionally-writable property (§4.F).
#[derive(Clone)]
pub struct Client {
    state: Rc<RefCell<State>>,
}
impl_clone_ref_as_clone!(Client);

impl Client {
    /// Every call name this server advertised via `help()`.
    pub fn names(&self) -> Vec<String> {
        self.state.borrow().names.iter().cloned().collect()
    }

    pub fn has_call(&self, name: &str) -> bool {
        self.state.borrow().names.contains(name)
    }

    /// Every property name discovered by the `track*`/`get*` scan.
    pub fn property_names(&self) -> Vec<String> {
        self.state.borrow().properties.keys().cloned().collect()
    }

    /// Invokes `name` with `args`, using the sub-channel discipline unless
    /// the client was built with `sync = true` (§4.B/§4.F). Fails with
    /// [`ClientError::UnknownCall`] without touching the transport if `name`
    /// was never advertised by `help()`.
    pub async fn call(&self, name: &str, args: &[JsValue]) -> Result<JsValue, ClientError> {
        let (endpoint, sync) = {
            let state = self.state.borrow();
            if !state.names.contains(name) {
                return Err(ClientError::UnknownCall(name.to_string()));
            }
            if let Some(arity) = state.arities.get(name) {
                debug_assert_eq!(
                    args.len(),
                    *arity,
                    "call {:?} expects {} argument(s), got {}",
                    name,
                    arity,
                    args.len()
                );
            }
            (state.endpoint.clone_ref(), state.sync)
        };
        let result = if sync {
            call::call_in_band(&endpoint, name, args, &[]).await
        } else {
            call::call_subchannel(&endpoint, name, args, &[]).await
        };
        result.map_err(|e| ClientError::Call(name.to_string(), e))
    }

    /// The locally cached value of property `name`, seeded before
    /// [`get_client`] ever resolves (§4.F point 5). `None` if `name` was not
    /// discovered as a property.
    pub fn property(&self, name: &str) -> Option<JsValue> {
        self.state.borrow().properties.get(name).map(|p| p.value.clone())
    }

    pub fn property_writable(&self, name: &str) -> bool {
        self.state.borrow().properties.get(name).map(|p| p.writable).unwrap_or(false)
    }

    /// Optimistically updates the local cache, then posts the write upstream
    /// on the property's tracker port (§4.C point 4). This is tracker-frame
    /// traffic, not a call — it never goes through [`Client::call`]. If the
    /// server later rejects the write, [`handle_tracker_event`] rolls the
    /// cache back to `confirmed_value` and replays it to every subscriber.
    pub fn set_property(&self, name: &str, value: JsValue) -> Result<(), ClientError> {
        let mut state = self.state.borrow_mut();
        let property =
            state.properties.get_mut(name).ok_or_else(|| ClientError::UnknownProperty(name.to_string()))?;
        if !property.writable {
            return Err(ClientError::ReadOnly(name.to_string()));
        }
        property.value = value.clone();
        let _ = property.tracker.post(&value_frame(&value), &[]);
        Ok(())
    }

    /// Subscribes to every subsequent value `name` takes on — local
    /// optimistic writes and server-pushed updates alike — starting with the
    /// value currently cached. `None` if `name` was not discovered as a
    /// property.
    pub fn subscribe_property(&self, name: &str) -> Option<mpsc::UnboundedReceiver<JsValue>> {
        let mut state = self.state.borrow_mut();
        let property = state.properties.get_mut(name)?;
        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(property.value.clone());
        property.subscribers.push(tx);
        Some(rx)
    }
}

/// Performs `help`, then runs the property-discovery pass of §4.C, awaiting
/// every discovered property's first value before resolving. The returned
/// client's [`Client::call`] covers every other advertised name.
pub async fn get_client(endpoint: Endpoint, sync: bool, logger: Logger) -> Result<Client, ClientError> {
    let entries = call::help_entries(&endpoint).await.map_err(ClientError::Help)?;
    let names: HashSet<String> = entries.iter().map(|(name, _)| name.clone()).collect();
    let arities: HashMap<String, usize> = entries.into_iter().collect();
    procweb_logger::debug!(logger, "help() advertised {} call(s)", names.len());

    let state = Rc::new(RefCell::new(State {
        endpoint: endpoint.clone_ref(),
        sync,
        names: names.clone(),
        arities,
        properties: default(),
        logger: logger.clone_ref(),
    }));
    let client = Client { state };

    for suffix in discover_property_names(&names) {
        let property_logger = logger.sub(&format!("property:{}", suffix));
        init_property(&client, &endpoint, sync, &suffix, property_logger).await?;
    }

    Ok(client)
}

/// Scans `names` for every `trackX` (non-empty `X`) with a matching `getX`
/// (§4.C: "for every advertised call name that is `trackX` for non-empty
/// `X`, for which a `getX` also exists").
fn discover_property_names(names: &HashSet<String>) -> Vec<String> {
    let mut found: Vec<String> = names
        .iter()
        .filter_map(|n| n.strip_prefix("track"))
        .filter(|suffix| !suffix.is_empty())
        .filter(|suffix| names.contains(&format!("get{}", suffix)))
        .map(|s| s.to_string())
        .collect();
    found.sort();
    found
}

/// Creates the tracker channel, hands one end to the server via `trackX`,
/// and awaits the first `{value}` push before returning.
///
/// Ordering note: a single [`Listener`] is installed on the kept port
/// before it is ever `start()`-ed, and that same listener stays attached
/// for the property's whole lifetime — steady-state updates route through
/// [`handle_tracker_event`], and the first one additionally resolves the
/// oneshot this function awaits. There is no point where the port is
/// started but unattached, and no point where an attached listener is torn
/// down and replaced, so no update delivered after the first can ever be
/// dispatched to nothing.
async fn init_property(
    client: &Client,
    endpoint: &Endpoint,
    sync: bool,
    suffix: &str,
    logger: Logger,
) -> Result<(), ClientError> {
    let writable = client.state.borrow().names.contains(&format!("set{}", suffix));

    let channel = MessageChannel::new()
        .map_err(|e| ClientError::Transport(suffix.to_string(), procweb_channel::UnsafeJsValue(e)))?;
    let offered: JsValue = channel.port1().into();
    let kept = Endpoint::Port(channel.port2());

    // The listener never needs to see its own `Listener` handle, so there is
    // no construction cycle here: build the closure first, keep the
    // resulting `Listener` in a local, and only move it into `properties`
    // once the first value has arrived. Until then the first frame's value
    // travels through `first_value`/`first_tx` instead.
    let first_value: Rc<RefCell<Option<JsValue>>> = Rc::new(RefCell::new(None));
    let (first_tx, first_rx) = futures::channel::oneshot::channel::<()>();
    let first_tx = Rc::new(RefCell::new(Some(first_tx)));

    let state_for_listener = client.state.clone();
    let suffix_owned = suffix.to_string();
    let tracker_for_listener = kept.clone_ref();
    let listener_logger = logger.clone_ref();
    let first_value_for_listener = first_value.clone();
    let listener = Listener::new(kept.clone_ref(), false, move |event: MessageEvent| {
        match first_tx.borrow_mut().take() {
            Some(tx) => {
                let value = match parse_tracker_frame(&event.data()) {
                    TrackerFrame::Value(v) => v,
                    TrackerFrame::Error { message, value } => {
                        procweb_logger::warning!(listener_logger, "initial read rejected: {}", message);
                        value.unwrap_or(JsValue::UNDEFINED)
                    }
                    TrackerFrame::Close | TrackerFrame::Unrecognized => JsValue::UNDEFINED,
                };
                *first_value_for_listener.borrow_mut() = Some(value);
                let _ = tx.send(());
            }
            None => {
                handle_tracker_event(&state_for_listener, &suffix_owned, &tracker_for_listener, &event, &listener_logger);
            }
        }
    });
    kept.start();

    let call_name = format!("track{}", suffix);
    let call_result = if sync {
        call::call_in_band(endpoint, &call_name, &[offered.clone()], &[offered]).await
    } else {
        call::call_subchannel(endpoint, &call_name, &[offered.clone()], &[offered]).await
    };
    call_result.map_err(|e| ClientError::Call(call_name, e))?;

    first_rx.await.map_err(|_| ClientError::Call(format!("track{}", suffix), CallError::ChannelClosedPrematurely))?;
    let initial_value = first_value.borrow_mut().take().unwrap_or(JsValue::UNDEFINED);

    client.state.borrow_mut().properties.insert(
        suffix.to_string(),
        PropertyState {
            value: initial_value.clone(),
            confirmed_value: initial_value,
            writable,
            tracker: kept,
            subscribers: Vec::new(),
            _listener: listener,
        },
    );
    Ok(())
}

/// Applies one tracker-port event to property `name`'s cache. A `{value}`
/// push both confirms and updates the cache; an `{error}` push means the
/// server rejected the most recent write, so the cache is rolled back to
/// whatever it last confirmed and every subscriber is replayed that value —
/// the optimistic write `set_property` made is otherwise invisible to
/// anyone still holding a reference to the stale, never-accepted value.
fn handle_tracker_event(state: &Rc<RefCell<State>>, name: &str, tracker: &Endpoint, event: &MessageEvent, logger: &Logger) {
    match parse_tracker_frame(&event.data()) {
        TrackerFrame::Value(value) => {
            let mut state = state.borrow_mut();
            if let Some(property) = state.properties.get_mut(name) {
                property.value = value.clone();
                property.confirmed_value = value.clone();
                property.subscribers.retain(|tx| tx.unbounded_send(value.clone()).is_ok());
            }
        }
        TrackerFrame::Error { message, .. } => {
            procweb_logger::warning!(logger, "property {:?} rejected a write: {}", name, message);
            let mut state = state.borrow_mut();
            if let Some(property) = state.properties.get_mut(name) {
                let rolled_back = property.confirmed_value.clone();
                property.value = rolled_back.clone();
                property.subscribers.retain(|tx| tx.unbounded_send(rolled_back.clone()).is_ok());
            }
        }
        TrackerFrame::Close => {
            tracker.close();
        }
        TrackerFrame::Unrecognized => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn discovers_only_properties_with_a_matching_getter() {
        let names: HashSet<String> = ["help", "trackTitle", "getTitle", "trackOrphan", "setTitle"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_property_names(&names), vec!["Title".to_string()]);
    }

    #[wasm_bindgen_test]
    fn empty_suffix_is_never_a_property() {
        let names: HashSet<String> = ["track", "get"].iter().map(|s| s.to_string()).collect();
        assert!(discover_property_names(&names).is_empty());
    }

    #[wasm_bindgen_test]
    async fn round_trips_a_call_and_a_writable_property() {
        let channel = MessageChannel::new().unwrap();
        let server_endpoint = Endpoint::Port(channel.port1());
        let client_endpoint = Endpoint::Port(channel.port2());

        let property = procweb_rpc::Property::new(
            JsValue::from_str("A"),
            procweb_rpc::Access::Writable,
            Logger::new("test.server.title"),
        );
        let mut table = call::Table::new();
        property.register(&mut table, "Title");
        table.register(
            "echo",
            1,
            Rc::new(|args| {
                let value = args.into_iter().next().unwrap_or(JsValue::UNDEFINED);
                Box::pin(async move { Ok(value) })
            }),
        );
        let _server = call::make_server(server_endpoint, table, false, Logger::new("test.server"));

        let client = get_client(client_endpoint, false, Logger::new("test.client")).await.unwrap();
        assert!(client.has_call("echo"));
        assert_eq!(client.property("Title").unwrap().as_string().as_deref(), Some("A"));
        assert!(client.property_writable("Title"));

        let echoed = client.call("echo", &[JsValue::from_f64(7.0)]).await.unwrap();
        assert_eq!(echoed.as_f64(), Some(7.0));

        client.set_property("Title", JsValue::from_str("B")).unwrap();
        assert_eq!(property.get().as_string().as_deref(), Some("B"));
    }

    #[wasm_bindgen_test]
    #[should_panic]
    async fn call_asserts_against_the_advertised_arity_in_debug_builds() {
        let channel = MessageChannel::new().unwrap();
        let server_endpoint = Endpoint::Port(channel.port1());
        let client_endpoint = Endpoint::Port(channel.port2());

        let mut table = call::Table::new();
        table.register(
            "echo",
            1,
            Rc::new(|args| {
                let value = args.into_iter().next().unwrap_or(JsValue::UNDEFINED);
                Box::pin(async move { Ok(value) })
            }),
        );
        let _server = call::make_server(server_endpoint, table, false, Logger::new("test.server"));

        let client = get_client(client_endpoint, false, Logger::new("test.client")).await.unwrap();
        // "echo" was advertised with arity 1; calling it with none should
        // trip the debug-only arity assertion rather than reach the wire.
        let _ = client.call("echo", &[]).await;
    }

    #[wasm_bindgen_test]
    async fn a_rejected_write_rolls_back_and_notifies_subscribers() {
        let channel = MessageChannel::new().unwrap();
        let server_endpoint = Endpoint::Port(channel.port1());
        let client_endpoint = Endpoint::Port(channel.port2());

        let property = procweb_rpc::Property::new(
            JsValue::from_str("A"),
            procweb_rpc::Access::Validated(Rc::new(|v| {
                if v.as_string().as_deref() == Some("forbidden") {
                    Err("value is forbidden".to_string())
                } else {
                    Ok(())
                }
            })),
            Logger::new("test.server.title"),
        );
        let mut table = call::Table::new();
        property.register(&mut table, "Title");
        let _server = call::make_server(server_endpoint, table, false, Logger::new("test.server"));

        let client = get_client(client_endpoint, false, Logger::new("test.client")).await.unwrap();
        let mut updates = client.subscribe_property("Title").unwrap();
        assert_eq!(updates.next().await.unwrap().as_string().as_deref(), Some("A"));

        client.set_property("Title", JsValue::from_str("forbidden")).unwrap();
        // The optimistic write is visible immediately...
        assert_eq!(client.property("Title").unwrap().as_string().as_deref(), Some("forbidden"));

        // ...but the server never accepted it, so the cache rolls back and
        // every subscriber is replayed the last confirmed value.
        assert_eq!(updates.next().await.unwrap().as_string().as_deref(), Some("A"));
        assert_eq!(client.property("Title").unwrap().as_string().as_deref(), Some("A"));
        assert_eq!(property.get().as_string().as_deref(), Some("A"));
    }
}
