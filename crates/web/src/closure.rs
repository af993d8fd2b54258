//! `ClosureStorage`: owns a `wasm_bindgen::Closure` for as long as it is
//! registered as a DOM/port/worker callback, so it isn't dropped (and the
//! JS side left calling into freed memory) while still live. Grounded on
//! the `WebSocket` wrapper's `on_message`/`on_close`/`on_open` fields and
//! `ensogl-system-web`'s generic `Event`/`Slot` listener pair — both close
//! over a target plus a closure and keep them in lockstep.

use js_sys::Function;
use wasm_bindgen::convert::FromWasmAbi;
use wasm_bindgen::prelude::Closure;
use wasm_bindgen::JsCast;

/// Holds at most one `Closure<dyn FnMut(Event)>`, wired up to be handed to
/// `add_event_listener_with_callback`/`set_onXxx`-style APIs via
/// [`ClosureStorage::js_ref`].
pub struct ClosureStorage<Event: FromWasmAbi + 'static> {
    closure: Option<Closure<dyn FnMut(Event)>>,
}

impl<Event: FromWasmAbi + 'static> Default for ClosureStorage<Event> {
    fn default() -> Self {
        Self { closure: None }
    }
}

impl<Event: FromWasmAbi + 'static> std::fmt::Debug for ClosureStorage<Event> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureStorage").field("set", &self.closure.is_some()).finish()
    }
}

impl<Event: FromWasmAbi + 'static> ClosureStorage<Event> {
    /// Wraps `f` as the stored closure, replacing (and dropping, so
    /// unregistering) any previous one.
    pub fn wrap(&mut self, f: impl FnMut(Event) + 'static) {
        self.closure = Some(Closure::wrap(Box::new(f)));
    }

    /// The JS-callable function, for handing to `addEventListener` et al.
    pub fn js_ref(&self) -> Option<&Function> {
        self.closure.as_ref().map(|c| c.as_ref().unchecked_ref())
    }

    /// Drops the stored closure, unregistering it on the JS side the next
    /// time the caller updates the listener slot with `None`.
    pub fn clear(&mut self) {
        self.closure = None;
    }

    pub fn is_set(&self) -> bool {
        self.closure.is_some()
    }
}
