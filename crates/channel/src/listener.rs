//! A registered `message` listener on an [`Endpoint`], modelled on
//! `ensogl-system-web`'s `Event`/`Slot` pair (`system/web/src/event.rs`): a
//! closure plus the target it's attached to, detached together on `Drop`.

use crate::Endpoint;
use procweb_web::closure::ClosureStorage;

use web_sys::AddEventListenerOptions;
use web_sys::MessageEvent;

/// Owns one `message` listener on an `Endpoint`. Dropping it unregisters
/// the listener and drops the closure.
pub struct Listener {
    target:  Endpoint,
    storage: ClosureStorage<MessageEvent>,
}

impl Listener {
    /// Registers `f` as the `message` handler on `target`. `once` mirrors
    /// the DOM's `{ once: true }` listener option (spec.md §4.A: "subscribe
    /// to a `message` event with an optional once-only option"); the browser
    /// removes its own registration after the first delivery, but our
    /// closure is only actually freed when the returned `Listener` is
    /// dropped or `clear`ed.
    pub fn new(target: Endpoint, once: bool, f: impl FnMut(MessageEvent) + 'static) -> Self {
        let mut storage = ClosureStorage::default();
        storage.wrap(f);
        let function = storage.js_ref().expect("just wrapped");
        let mut options = AddEventListenerOptions::new();
        options.once(once);
        target
            .event_target()
            .add_event_listener_with_callback_and_add_event_listener_options(
                "message", function, &options,
            )
            .expect("addEventListener should not fail for a 'message' listener");
        Self { target, storage }
    }

    pub fn clear(&mut self) {
        if let Some(function) = self.storage.js_ref() {
            let _ =
                self.target.event_target().remove_event_listener_with_callback("message", function);
        }
        self.storage.clear();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.clear();
    }
}
