//! `get-transfer()`: a scoped ambient binding readable only from inside the
//! synchronous portion of a handler invocation (§4.B, §9 "Current-transfer
//! ambient"). Modelled as cooperative thread-local state rather than a
//! `Future`-threaded parameter — the runtime is single-threaded
//! (`wasm32-unknown-unknown` has no threads to race this against), so a
//! `thread_local!` gives exactly the "scoped binding" semantics the design
//! note asks for without reaching for real task-local storage.

use procweb_logger::Logger;
use procweb_prelude::*;

use wasm_bindgen::JsValue;

thread_local! {
    static CURRENT: RefCell<Option<Vec<JsValue>>> = RefCell::new(None);
    static LOGGER: Logger = Logger::new("rpc.transfer");
}

/// Installed by the dispatcher immediately before invoking a handler body,
/// holding whatever ports arrived alongside the request
/// (`MessageEvent::ports()`).
pub(crate) fn install(ports: Vec<JsValue>) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(ports));
}

/// Cleared at the handler's first suspension point, or immediately after a
/// fully synchronous handler returns.
pub(crate) fn clear() {
    CURRENT.with(|cell| *cell.borrow_mut() = None);
}

/// Reads the transferables that arrived with the request currently being
/// handled. Outside an active handler invocation this logs and returns an
/// empty list (§7: "`get-transfer()` misuse logs and returns an empty list
/// — never throws").
pub fn get_transfer() -> Vec<JsValue> {
    CURRENT.with(|cell| match cell.borrow().as_ref() {
        Some(ports) => ports.clone(),
        None => {
            LOGGER.with(|logger| procweb_logger::warning!(logger, "get_transfer() called outside an active handler"));
            Vec::new()
        }
    })
}
