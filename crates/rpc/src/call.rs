//! Call transport (spec §4.B): server-side dispatch over a handler table,
//! and the two client-side call disciplines (in-band, sub-channel).
//!
//! The handler table and in-flight-request bookkeeping are grounded
//! directly on `enso-protocol::new_handler`'s `HandlerData`/`OngoingCalls`
//! pair — a `HashMap` keyed by an id with `oneshot::Sender`s for
//! completion — generalized here from one static `Reply` type to the
//! dynamically-typed `{result}`/`{error}` frames this protocol carries.

use crate::frame;
use crate::frame::Frame;
use crate::transfer;
use procweb_channel::Endpoint;
use procweb_channel::Listener;
use procweb_logger::Logger;
use procweb_prelude::*;

use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use std::future::Future;
use std::task::Context;
use std::task::Poll;
use wasm_bindgen::JsValue;
use web_sys::MessageEvent;

/// Errors the call transport itself raises, matching spec §7's taxonomy for
/// the entries that belong at this layer.
#[derive(Debug, Fail)]
pub enum CallError {
    #[fail(display = "channel closed before a reply arrived")]
    ChannelClosedPrematurely,
    #[fail(display = "remote returned an error: {:?}", _0)]
    Remote(procweb_channel::UnsafeJsValue),
    #[fail(display = "browser transport error: {:?}", _0)]
    Transport(procweb_channel::UnsafeJsValue),
}

impl From<procweb_channel::ChannelError> for CallError {
    fn from(e: procweb_channel::ChannelError) -> Self {
        match e {
            procweb_channel::ChannelError::ClosedPrematurely => CallError::ChannelClosedPrematurely,
            procweb_channel::ChannelError::Transport(v) => CallError::Transport(v),
        }
    }
}

/// A server-side call handler. Takes the call's arguments, returns (lazily)
/// a `{result}` or `{error}` payload. Boxed and `Rc`-shared so one table can
/// be installed on arbitrarily many sub-channels.
pub type Handler = Rc<dyn Fn(Vec<JsValue>) -> LocalBoxFuture<'static, Result<JsValue, JsValue>>>;

/// A named, invocable handler table, as passed to [`make_server`].
#[derive(Clone, Default)]
pub struct Table {
    handlers: HashMap<String, Handler>,
    arities:  HashMap<String, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, along with how many arguments it expects — only
    /// used for the `help()` arity hint (§9), never enforced on the wire.
    pub fn register(&mut self, name: impl Into<String>, arity: usize, handler: Handler) -> &mut Self {
        let name = name.into();
        self.arities.insert(name.clone(), arity);
        self.handlers.insert(name, handler);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Merges `other`'s entries into `self`, skipping (and logging) any name
    /// already present — the host-assembly contract forbids a collaborator
    /// table from shadowing the core calls it is merged into (§4.E: "the
    /// extension point ... forbidden to shadow the core names above").
    /// `"help"` is always reserved this way even though it is never itself
    /// an entry in `self.handlers` — it is dispatched by [`handle_event`]
    /// before the table is consulted at all, so a merged `"help"` handler
    /// would be advertised yet never actually invocable.
    pub fn merge(&mut self, other: Table, logger: &Logger) {
        for (name, handler) in other.handlers {
            if self.handlers.contains_key(&name) || name == "help" {
                procweb_logger::warning!(logger, "host API table attempted to shadow core call {:?}; ignored", name);
                continue;
            }
            let arity = other.arities.get(&name).copied().unwrap_or(0);
            self.arities.insert(name.clone(), arity);
            self.handlers.insert(name, handler);
        }
    }

    fn help_entries(&self) -> Vec<(String, usize)> {
        self.handlers.keys().map(|name| (name.clone(), *self.arities.get(name).unwrap_or(&0))).collect()
    }
}

impl From<JsValue> for CallError {
    fn from(value: JsValue) -> Self {
        CallError::Transport(procweb_channel::UnsafeJsValue(value))
    }
}

// ==============
// === Server ===
// ==============

/// A live server installation. Dropping (or [`Server::cancel`]ing) it tears
/// down the root listener and every listener recursively installed on a
/// sub-channel (§4.B: "`make-server` returns a cancel closure that removes
/// every installed listener across the root port and all sub-channels
/// recursively").
pub struct Server {
    listeners: Rc<RefCell<Vec<Listener>>>,
}

impl Server {
    pub fn cancel(&self) {
        self.listeners.borrow_mut().clear();
    }
}

/// Installs `table` on `target`. When `sync` is `false` (the default per
/// §4.B), every sub-channel offered by a caller gets the same table
/// installed recursively, so the client's sub-channel-call discipline works
/// against any of `table`'s entries.
pub fn make_server(target: Endpoint, table: Table, sync: bool, logger: Logger) -> Server {
    let table = Rc::new(table);
    let listeners = Rc::new(RefCell::new(Vec::new()));
    install(target, table, sync, logger, listeners.clone());
    Server { listeners }
}

fn install(target: Endpoint, table: Rc<Table>, sync: bool, logger: Logger, listeners: Rc<RefCell<Vec<Listener>>>) {
    target.start();
    let dispatch_target = target.clone_ref();
    let dispatch_listeners = listeners.clone();
    let listener = Listener::new(target.clone_ref(), false, move |event: MessageEvent| {
        handle_event(
            &event,
            dispatch_target.clone_ref(),
            table.clone(),
            sync,
            logger.clone_ref(),
            dispatch_listeners.clone(),
        );
    });
    listeners.borrow_mut().push(listener);
}

fn handle_event(
    event: &MessageEvent,
    target: Endpoint,
    table: Rc<Table>,
    sync: bool,
    logger: Logger,
    listeners: Rc<RefCell<Vec<Listener>>>,
) {
    match frame::parse(&event.data()) {
        Frame::SubOffer(port) => {
            if sync {
                procweb_logger::warning!(logger, "ignoring a sub-channel offer on a sync-only server");
            } else {
                install(Endpoint::Port(port), table, sync, logger, listeners);
            }
        }
        Frame::Request { call, args: _ } if call == "help" => {
            let _ = target.post(&frame::help_result(&table.help_entries()), &[]);
        }
        Frame::Request { call, args } => match table.handlers.get(&call) {
            Some(handler) => dispatch(handler.clone(), args, event.ports(), target, logger),
            None => procweb_logger::debug!(logger, "no handler registered for call {:?}", call),
        },
        Frame::Close | Frame::Result(_) | Frame::Error(_) | Frame::Unrecognized => {}
    }
}

/// Invokes `handler`, exposing `ports` through [`transfer::get_transfer`]
/// until the handler's first suspension point, then posts `{result}` or
/// `{error}` once it completes (possibly asynchronously).
fn dispatch(handler: Handler, args: Vec<JsValue>, ports: js_sys::Array, target: Endpoint, logger: Logger) {
    procweb_logger::debug!(logger, "dispatching call with {} arg(s), {} transferred port(s)", args.len(), ports.length());
    transfer::install(ports.iter().collect());
    let mut future = handler(args);
    let waker = noop_waker_ref();
    let mut context = Context::from_waker(waker);
    let poll = future.as_mut().poll(&mut context);
    transfer::clear();
    match poll {
        Poll::Ready(result) => reply(&target, result),
        Poll::Pending => {
            wasm_bindgen_futures::spawn_local(async move {
                let result = future.await;
                reply(&target, result);
            });
        }
    }
}

fn reply(target: &Endpoint, result: Result<JsValue, JsValue>) {
    let frame = match result {
        Ok(value) => frame::result(&value),
        Err(error) => frame::error(&error),
    };
    let _ = target.post(&frame, &[]);
}

// ==============
// === Client ===
// ==============

/// Sub-channel call discipline (§4.B default): concurrency-safe, costs one
/// extra `MessageChannel`. `transfer` is handed to the underlying
/// `post_message` the same way `make_server`'s dispatch hands incoming
/// transferred ports to `get_transfer()` — e.g. a `MessagePort` argument
/// (as the property protocol's `trackN` calls do) must be named in
/// `transfer` or the structured-clone algorithm will reject it.
pub async fn call_subchannel(
    target: &Endpoint,
    name: &str,
    args: &[JsValue],
    transfer: &[JsValue],
) -> Result<JsValue, CallError> {
    let sub = procweb_channel::create_subchannel(target)?;
    sub.post(&frame::request(name, args), transfer)?;
    let reply = procweb_channel::get_one_message(sub.clone_ref()).await?;
    procweb_channel::signal_close(&sub);
    read_reply(reply)
}

/// In-band call discipline: cheaper, but the caller must not issue a second
/// in-band call before this one's reply arrives (§4.B, §5).
pub async fn call_in_band(
    target: &Endpoint,
    name: &str,
    args: &[JsValue],
    transfer: &[JsValue],
) -> Result<JsValue, CallError> {
    target.post(&frame::request(name, args), transfer)?;
    let reply = procweb_channel::get_one_message(target.clone_ref()).await?;
    read_reply(reply)
}

fn read_reply(reply: JsValue) -> Result<JsValue, CallError> {
    match frame::parse(&reply) {
        Frame::Result(value) => Ok(value),
        Frame::Error(value) => Err(CallError::Remote(procweb_channel::UnsafeJsValue(value))),
        _ => Err(CallError::ChannelClosedPrematurely),
    }
}

/// Fetches the server's call list via the sub-channel discipline — `help`
/// is always dispatched the same way regardless of the caller's own
/// `sync` preference, since it is the introspection primitive a client
/// uses before it knows anything else about the server.
pub async fn help(target: &Endpoint) -> Result<Vec<String>, CallError> {
    let value = call_subchannel(target, "help", &[], &[]).await?;
    Ok(frame::help_names(&value))
}

/// Same RPC as [`help`], but keeps the `arity` hint alongside each name —
/// for a client that wants to `debug_assert!` its callers against it.
pub async fn help_entries(target: &Endpoint) -> Result<Vec<(String, usize)>, CallError> {
    let value = call_subchannel(target, "help", &[], &[]).await?;
    Ok(frame::help_entries(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;

    wasm_bindgen_test_configure!(run_in_browser);

    fn no_op_handler() -> Handler {
        Rc::new(|_args| Box::pin(async { Ok(JsValue::UNDEFINED) }))
    }

    #[wasm_bindgen_test]
    fn merge_drops_an_attempted_help_handler() {
        let mut core = Table::new();
        core.register("exit", 0, no_op_handler());

        let mut collaborator = Table::new();
        collaborator.register("help", 0, no_op_handler());
        collaborator.register("greet", 1, no_op_handler());

        core.merge(collaborator, &Logger::new("test"));

        // The "help" entry never makes it in, even though it is not itself
        // already present in `core.handlers` (it only ever lives in the
        // hardcoded dispatch arm), while an unrelated name merges in fine.
        assert!(!core.contains("help"));
        assert!(core.contains("greet"));
        assert!(core.help_entries().iter().all(|(name, _)| name != "help"));
    }

    #[wasm_bindgen_test]
    fn merge_drops_a_name_already_registered_in_self() {
        let mut core = Table::new();
        core.register("exit", 0, no_op_handler());

        let mut collaborator = Table::new();
        collaborator.register("exit", 3, no_op_handler());

        core.merge(collaborator, &Logger::new("test"));

        assert_eq!(*core.arities.get("exit").unwrap(), 0);
    }
}
