//! Channel primitives (component A): the message-target union, a
//! future-returning "read the next message" primitive, sub-channel
//! creation, and the closure-signaling convention used to tear a pair of
//! ports down without a handshake.
//!
//! Grounded on `enso-protocol`'s `new_handler.rs`, which already wraps a
//! `web_sys::WebSocket` event in a `oneshot`-backed future; here the same
//! shape is generalized to any [`Endpoint`] and to structured-clone frames
//! instead of JSON text.

pub mod endpoint;
pub mod listener;

pub use endpoint::Endpoint;
pub use listener::Listener;

use procweb_prelude::*;

use failure::Fail;
use futures::channel::oneshot;
use js_sys::Reflect;
use wasm_bindgen::JsValue;
use web_sys::MessageChannel;
use web_sys::MessageEvent;

/// Failures a channel primitive itself can raise. Call-level and
/// property-level failures (`NotFound`, `ProtocolViolation`, ...) live in
/// `procweb-rpc`, layered on top of this.
#[derive(Debug, Fail)]
pub enum ChannelError {
    /// The peer sent `{channel:"close"}` (or dropped its port, which we
    /// cannot distinguish from a deliberate close) before delivering the
    /// message being waited for.
    #[fail(display = "channel closed before a message arrived")]
    ClosedPrematurely,
    /// `post_message`/`add_event_listener` itself failed at the JS boundary.
    #[fail(display = "browser transport error: {:?}", _0)]
    Transport(UnsafeJsValue),
}

/// `JsValue` isn't `Send`/`Sync`, which `Fail` wants from its payloads; on
/// `wasm32-unknown-unknown` there is only one thread, so this is sound.
/// Mirrors `ensogl-system-web`'s own `Uncloneable`/unsafe-impl pattern for
/// wrapping non-`Send` JS handles.
#[derive(Debug, Clone)]
pub struct UnsafeJsValue(pub JsValue);
unsafe impl Send for UnsafeJsValue {}
unsafe impl Sync for UnsafeJsValue {}

impl From<JsValue> for ChannelError {
    fn from(value: JsValue) -> Self {
        ChannelError::Transport(UnsafeJsValue(value))
    }
}

/// True if `frame` is the reserved closure-signaling value `{channel:
/// "close"}` (spec.md §4.A / §9: "no handshake, just a reserved frame
/// shape"). Any read/deserialize error is treated as "not a close frame".
pub fn is_close_frame(frame: &JsValue) -> bool {
    Reflect::get(frame, &JsValue::from_str("channel"))
        .ok()
        .and_then(|v| v.as_string())
        .map(|s| s == "close")
        .unwrap_or(false)
}

/// Builds the reserved close frame.
pub fn close_frame() -> JsValue {
    let object = js_sys::Object::new();
    let _ = Reflect::set(&object, &JsValue::from_str("channel"), &JsValue::from_str("close"));
    object.into()
}

/// Best-effort send of the close frame, then a native `close`/`terminate`
/// where the endpoint has one. Errors are swallowed: by the time a process
/// is being torn down there is rarely anyone left to report to, matching
/// spec.md §4.A ("best effort; the sender does not wait for acknowledgement").
pub fn signal_close(target: &Endpoint) {
    let _ = target.post(&close_frame(), &[]);
    target.close();
}

/// Resolves with the next `message` event's data delivered to `target`, or
/// with [`ChannelError::ClosedPrematurely`] if a close frame arrives first.
/// The listener is torn down as soon as either happens, so at most one
/// message is ever consumed (spec.md §4.A: "reading a message observes at
/// most one message, even if more arrive before the future is polled
/// again").
pub async fn get_one_message(target: Endpoint) -> Result<JsValue, ChannelError> {
    let (sender, receiver) = oneshot::channel::<Result<JsValue, ChannelError>>();
    let sender = Rc::new(RefCell::new(Some(sender)));
    let listener_slot: Rc<RefCell<Option<Listener>>> = Rc::new(RefCell::new(None));
    let listener_slot_for_closure = listener_slot.clone();
    let handler = move |event: MessageEvent| {
        let data = event.data();
        let outcome = if is_close_frame(&data) { Err(ChannelError::ClosedPrematurely) } else { Ok(data) };
        if let Some(sender) = sender.borrow_mut().take() {
            let _ = sender.send(outcome);
        }
        // Drop the listener on first delivery; further events on this
        // target are irrelevant to this particular read.
        listener_slot_for_closure.borrow_mut().take();
    };
    *listener_slot.borrow_mut() = Some(Listener::new(target.clone_ref(), false, handler));
    target.start();
    receiver.await.unwrap_or(Err(ChannelError::ClosedPrematurely))
}

/// Creates a fresh `MessageChannel`, transfers one port across `target`
/// (the sub-channel offer, §3/§9), and returns the other port as a new
/// addressable [`Endpoint`]. Per spec.md §4.A, the returned port is started
/// immediately so no messages posted on it are lost while the caller wires
/// up its own listener.
pub fn create_subchannel(target: &Endpoint) -> Result<Endpoint, ChannelError> {
    let channel = MessageChannel::new()?;
    let offered = channel.port1();
    let kept = channel.port2();
    target.post(&offered.clone().into(), &[offered.into()])?;
    kept.start();
    Ok(Endpoint::Port(kept))
}

#[cfg(test)]
mod tests {
    use super::*;

    use wasm_bindgen::JsCast;
    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn is_close_frame_recognizes_only_the_reserved_shape() {
        assert!(is_close_frame(&close_frame()));
        assert!(!is_close_frame(&JsValue::from_str("channel")));
        assert!(!is_close_frame(&JsValue::UNDEFINED));

        let object = js_sys::Object::new();
        let _ = Reflect::set(&object, &JsValue::from_str("channel"), &JsValue::from_str("open"));
        assert!(!is_close_frame(&object.into()));
    }

    #[wasm_bindgen_test]
    async fn get_one_message_resolves_with_the_first_message() {
        let channel = MessageChannel::new().unwrap();
        let a = Endpoint::Port(channel.port1());
        let b = Endpoint::Port(channel.port2());
        a.post(&JsValue::from_str("hello"), &[]).unwrap();
        let received = get_one_message(b).await.unwrap();
        assert_eq!(received.as_string().as_deref(), Some("hello"));
    }

    #[wasm_bindgen_test]
    async fn get_one_message_reports_a_premature_close() {
        let channel = MessageChannel::new().unwrap();
        let a = Endpoint::Port(channel.port1());
        let b = Endpoint::Port(channel.port2());
        signal_close(&a);
        let err = get_one_message(b).await.unwrap_err();
        assert!(matches!(err, ChannelError::ClosedPrematurely));
    }

    #[wasm_bindgen_test]
    async fn get_one_message_ignores_messages_after_the_first() {
        let channel = MessageChannel::new().unwrap();
        let a = Endpoint::Port(channel.port1());
        let b = Endpoint::Port(channel.port2());
        a.post(&JsValue::from_str("first"), &[]).unwrap();
        a.post(&JsValue::from_str("second"), &[]).unwrap();
        // The second message is left queued on the port, unobserved by this
        // read; a fresh read would be needed to see it.
        let received = get_one_message(b).await.unwrap();
        assert_eq!(received.as_string().as_deref(), Some("first"));
    }

    #[wasm_bindgen_test]
    fn create_subchannel_offers_a_port_and_returns_the_other_end() {
        let channel = MessageChannel::new().unwrap();
        let root = Endpoint::Port(channel.port1());
        let _root_peer = Endpoint::Port(channel.port2());
        let sub = create_subchannel(&root).unwrap();
        assert!(matches!(sub, Endpoint::Port(_)));
    }

    #[wasm_bindgen_test]
    async fn create_subchannel_round_trips_a_message_through_the_offered_port() {
        let root_channel = MessageChannel::new().unwrap();
        let root = Endpoint::Port(root_channel.port1());
        let root_peer = Endpoint::Port(root_channel.port2());

        let sub = create_subchannel(&root).unwrap();
        // The offer arrives on `root_peer` as a bare transferred `MessagePort`.
        let offer = get_one_message(root_peer).await.unwrap();
        let offered_port: web_sys::MessagePort = offer.dyn_into().unwrap();
        offered_port.start();
        offered_port.post_message(&JsValue::from_str("ping")).unwrap();

        let received = get_one_message(sub).await.unwrap();
        assert_eq!(received.as_string().as_deref(), Some("ping"));
    }
}
