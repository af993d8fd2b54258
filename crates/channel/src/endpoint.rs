//! `Endpoint`: the tagged variant over `{Window, Port, Worker}` called for by
//! spec.md §9 ("Design Notes — Union message targets") as the typed
//! replacement for the source's duck-typed `is-message-target` predicate.

use procweb_prelude::*;

use js_sys::Array;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use web_sys::EventTarget;
use web_sys::MessagePort;
use web_sys::Window;
use web_sys::Worker;

/// Any of the three concrete JS objects `procweb` can address a process
/// through. A `Window` endpoint always posts with origin `"*"` (§4.A);
/// `Port` and `Worker` endpoints ignore origin entirely.
#[derive(Clone, Debug, PartialEq)]
pub enum Endpoint {
    Window(Window),
    Port(MessagePort),
    Worker(Worker),
}

impl Endpoint {
    /// Posts `message`, transferring ownership of everything in `transfer`.
    pub fn post(&self, message: &JsValue, transfer: &[JsValue]) -> Result<(), JsValue> {
        let list = Array::new();
        for item in transfer {
            list.push(item);
        }
        match self {
            Endpoint::Window(w) => w.post_message_with_transfer(message, "*", &list).map(|_| ()),
            Endpoint::Port(p) => p.post_message_with_transferable(message, &list).map(|_| ()),
            Endpoint::Worker(w) => w.post_message_with_transfer(message, &list).map(|_| ()),
        }
    }

    /// Ports constructed via `MessageChannel` deliver nothing until
    /// `start()` is called; this is a no-op for `Window`/`Worker`.
    pub fn start(&self) {
        if let Endpoint::Port(p) = self {
            p.start();
        }
    }

    /// Best-effort close. A no-op for endpoints without a native `close`.
    pub fn close(&self) {
        if let Endpoint::Port(p) = self {
            p.close();
        }
    }

    /// Best-effort termination. A no-op for endpoints without a native
    /// `terminate` (only `Worker` has one).
    pub fn terminate(&self) {
        if let Endpoint::Worker(w) = self {
            w.terminate();
        }
    }

    pub fn event_target(&self) -> &EventTarget {
        match self {
            Endpoint::Window(w) => w.as_ref(),
            Endpoint::Port(p) => p.as_ref(),
            Endpoint::Worker(w) => w.as_ref(),
        }
    }
}

impl From<Window> for Endpoint {
    fn from(w: Window) -> Self {
        Endpoint::Window(w)
    }
}

impl From<MessagePort> for Endpoint {
    fn from(p: MessagePort) -> Self {
        Endpoint::Port(p)
    }
}

impl From<Worker> for Endpoint {
    fn from(w: Worker) -> Self {
        Endpoint::Worker(w)
    }
}

impl_clone_ref_as_clone!(Endpoint);
