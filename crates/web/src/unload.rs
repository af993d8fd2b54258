//! The best-effort "I will stop listening" hook spec.md §4.A calls for:
//! registered once by the host, it fires on `beforeunload`/`pagehide` (the
//! two DOM signals a page is about to go away, neither of them guaranteed to
//! run to completion) so every locally held port gets a closure frame and a
//! native `close()` before the JS heap disappears. Grounded on the same
//! `ClosureStorage` pairing this crate already uses for `Listener` in
//! `procweb-channel`.

use crate::closure::ClosureStorage;
use procweb_prelude::*;

use web_sys::Event;
use web_sys::EventTarget;

/// Keeps the two listeners registered by [`on_unload`] alive. Dropping it
/// unregisters both.
pub struct UnloadGuard {
    target:        Option<EventTarget>,
    before_unload: ClosureStorage<Event>,
    pagehide:      ClosureStorage<Event>,
}

impl Default for UnloadGuard {
    /// A guard registered to nothing; unregisters nothing on drop. Used both
    /// as the no-`window` fallback and as a placeholder while the real guard
    /// is being constructed (it closes over the very `Rc` it will be stored
    /// in, so it cannot exist before that storage does).
    fn default() -> Self {
        Self { target: None, before_unload: Default::default(), pagehide: Default::default() }
    }
}

impl UnloadGuard {
    fn remove(&mut self) {
        if let Some(target) = &self.target {
            if let Some(f) = self.before_unload.js_ref() {
                let _ = target.remove_event_listener_with_callback("beforeunload", f);
            }
            if let Some(f) = self.pagehide.js_ref() {
                let _ = target.remove_event_listener_with_callback("pagehide", f);
            }
        }
        self.before_unload.clear();
        self.pagehide.clear();
    }
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Registers `f` to run, best-effort, when the page is about to be torn
/// down. A no-op (returns a guard that unregisters nothing) if there is no
/// `window` in this context — a dedicated worker has no page to unload, and
/// only the host (which always runs in a window) ever needs this hook.
pub fn on_unload(f: impl Fn() + 'static) -> UnloadGuard {
    let window = match web_sys::window() {
        Some(w) => w,
        None => return UnloadGuard::default(),
    };
    let target: EventTarget = window.into();
    let f = Rc::new(f);

    let mut before_unload = ClosureStorage::default();
    let f_before = f.clone();
    before_unload.wrap(move |_: Event| f_before());
    let _ = target
        .add_event_listener_with_callback("beforeunload", before_unload.js_ref().expect("just wrapped"));

    let mut pagehide = ClosureStorage::default();
    let f_pagehide = f;
    pagehide.wrap(move |_: Event| f_pagehide());
    let _ =
        target.add_event_listener_with_callback("pagehide", pagehide.js_ref().expect("just wrapped"));

    UnloadGuard { target: Some(target), before_unload, pagehide }
}
