//! Property protocol (spec §4.C): a `getN`/`trackN`/`setN` naming
//! convention layered over the call transport, plus the tracker-port wire
//! frames (`{value}`/`{error}`/`{channel:"close"}`). Server semantics only —
//! client-side discovery by prefix scanning lives in `procweb-client`, which
//! drives a tracker from the other end of the same frames defined here.

use crate::call;
use procweb_channel::Endpoint;
use procweb_channel::Listener;
use procweb_logger::Logger;
use procweb_prelude::*;

use js_sys::Object;
use js_sys::Reflect;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use web_sys::MessageEvent;
use web_sys::MessagePort;

/// Failures raised when a write is rejected (spec §7: `property-not-set`).
#[derive(Debug, Fail)]
#[fail(display = "property rejected write: {}", _0)]
pub struct PropertyNotSet(pub String);

fn get(value: &JsValue, key: &str) -> Option<JsValue> {
    Reflect::get(value, &JsValue::from_str(key)).ok().filter(|v| !v.is_undefined())
}

fn object_with(pairs: &[(&str, JsValue)]) -> JsValue {
    let object = Object::new();
    for (key, value) in pairs {
        let _ = Reflect::set(&object, &JsValue::from_str(key), value);
    }
    object.into()
}

pub fn value_frame(value: &JsValue) -> JsValue {
    object_with(&[("value", value.clone())])
}

pub fn error_frame(message: &str, current: Option<&JsValue>) -> JsValue {
    match current {
        Some(v) => object_with(&[("error", JsValue::from_str(message)), ("value", v.clone())]),
        None => object_with(&[("error", JsValue::from_str(message))]),
    }
}

pub fn close_frame() -> JsValue {
    object_with(&[("channel", JsValue::from_str("close"))])
}

/// A decoded tracker-port frame.
pub enum TrackerFrame {
    Value(JsValue),
    Error { message: String, value: Option<JsValue> },
    Close,
    Unrecognized,
}

pub fn parse_tracker_frame(raw: &JsValue) -> TrackerFrame {
    if let Some(channel) = get(raw, "channel").and_then(|v| v.as_string()) {
        if channel == "close" {
            return TrackerFrame::Close;
        }
    }
    if let Some(message) = get(raw, "error").and_then(|v| v.as_string()) {
        return TrackerFrame::Error { message, value: get(raw, "value") };
    }
    if let Some(value) = get(raw, "value") {
        return TrackerFrame::Value(value);
    }
    TrackerFrame::Unrecognized
}

/// Whether a property accepts writes, and if so, how they are validated.
/// A validator implies writability; it is consulted for both remote writes
/// (via `setN`) and local ones, unless the caller explicitly bypasses it
/// (`ignore_read_only`, for authoritative pushes — §4.C "Local access").
pub enum Access {
    ReadOnly,
    Writable,
    Validated(Rc<dyn Fn(&JsValue) -> Result<(), String>>),
}

impl Access {
    fn writable(&self) -> bool {
        !matches!(self, Access::ReadOnly)
    }

    fn validate(&self, value: &JsValue) -> Result<(), String> {
        match self {
            Access::Validated(validator) => validator(value),
            _ => Ok(()),
        }
    }
}

struct State {
    value:     JsValue,
    access:    Access,
    trackers:  Vec<(Endpoint, Listener)>,
    logger:    Logger,
}

/// One server-side property. Cheaply cloneable (`Rc`-shared), so a handle
/// can be captured by the `getN`/`trackN`/`setN` closures installed on a
/// [`call::Table`] and also kept by whoever owns authoritative writes.
#[derive(Clone)]
pub struct Property {
    state: Rc<RefCell<State>>,
}

impl_clone_ref_as_clone!(Property);

impl Property {
    pub fn new(initial: JsValue, access: Access, logger: Logger) -> Self {
        let state = State { value: initial, access, trackers: Vec::new(), logger };
        Self { state: Rc::new(RefCell::new(state)) }
    }

    pub fn get(&self) -> JsValue {
        self.state.borrow().value.clone()
    }

    pub fn writable(&self) -> bool {
        self.state.borrow().access.writable()
    }

    /// Authoritative / remote write path. When `ignore_read_only` is set
    /// the validator (if any) still runs, but a plain `ReadOnly` access
    /// level no longer rejects — this is the "explicit ignore-read-only
    /// parameter" §4.C reserves for server-side pushes.
    pub fn set(&self, value: JsValue, ignore_read_only: bool) -> Result<(), PropertyNotSet> {
        let writable = self.state.borrow().access.writable() || ignore_read_only;
        if !writable {
            return Err(PropertyNotSet("read-only".into()));
        }
        if let Err(message) = self.state.borrow().access.validate(&value) {
            return Err(PropertyNotSet(message));
        }
        self.state.borrow_mut().value = value;
        self.broadcast();
        Ok(())
    }

    fn broadcast(&self) {
        let value = self.get();
        let frame = value_frame(&value);
        let logger = self.state.borrow().logger.clone_ref();
        for (tracker, _listener) in self.state.borrow().trackers.iter() {
            if tracker.post(&frame, &[]).is_err() {
                procweb_logger::warning!(logger, "failed to post property update to a tracker");
            }
        }
    }

    /// Subscribes `port` as a tracker: installs a handler for subsequent
    /// writes/closures on it, then starts the port and sends the current
    /// value. The listener is attached before `start()` so a write that
    /// arrives in the same tick as subscription is dispatched rather than
    /// discarded (the port's queue retains messages either way, but
    /// dispatch to an unattached listener does not).
    pub fn track(&self, port: Endpoint) {
        let self_for_listener = self.clone();
        let listener_port = port.clone_ref();
        let listener = Listener::new(port.clone_ref(), false, move |event: MessageEvent| {
            self_for_listener.handle_tracker_event(&listener_port, event);
        });
        port.start();
        let _ = port.post(&value_frame(&self.get()), &[]);
        self.state.borrow_mut().trackers.push((port, listener));
    }

    fn handle_tracker_event(&self, port: &Endpoint, event: MessageEvent) {
        match parse_tracker_frame(&event.data()) {
            TrackerFrame::Value(value) => match self.set(value, false) {
                Ok(()) => {} // broadcast already reached every tracker, including this one
                Err(PropertyNotSet(message)) => {
                    let _ = port.post(&error_frame(&message, Some(&self.get())), &[]);
                }
            },
            TrackerFrame::Close => self.drop_tracker(port),
            TrackerFrame::Error { .. } | TrackerFrame::Unrecognized => {}
        }
    }

    fn drop_tracker(&self, port: &Endpoint) {
        port.close();
        self.state.borrow_mut().trackers.retain(|(candidate, _)| candidate != port);
    }

    /// Installs `getN`/`trackN`, and `setN` when writable, on `table` under
    /// property name `name` (e.g. `name = "Title"` registers `getTitle`,
    /// `trackTitle`, and optionally `setTitle`).
    pub fn register(&self, table: &mut call::Table, name: &str) {
        let getter = self.clone_ref();
        table.register(
            format!("get{}", name),
            0,
            Rc::new(move |_args| {
                let value = getter.get();
                Box::pin(async move { Ok(value) })
            }),
        );

        let tracker_owner = self.clone_ref();
        table.register(
            format!("track{}", name),
            1,
            Rc::new(move |args| {
                let tracker_owner = tracker_owner.clone_ref();
                Box::pin(async move {
                    let port = args
                        .into_iter()
                        .next()
                        .ok_or_else(|| JsValue::from_str("trackN expects a port argument"))?
                        .dyn_into::<MessagePort>()
                        .map_err(|_| JsValue::from_str("trackN argument must be a MessagePort"))?;
                    tracker_owner.track(Endpoint::Port(port));
                    Ok(JsValue::UNDEFINED)
                })
            }),
        );

        if self.writable() {
            let setter = self.clone_ref();
            table.register(
                format!("set{}", name),
                1,
                Rc::new(move |args| {
                    let setter = setter.clone_ref();
                    Box::pin(async move {
                        let value = args.into_iter().next().unwrap_or(JsValue::UNDEFINED);
                        setter.set(value, false).map_err(|e| JsValue::from_str(&e.0))?;
                        Ok(JsValue::UNDEFINED)
                    })
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;
    use web_sys::MessageChannel;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn tracker_frame_round_trips() {
        let frame = value_frame(&JsValue::from_f64(7.0));
        assert!(matches!(parse_tracker_frame(&frame), TrackerFrame::Value(v) if v.as_f64() == Some(7.0)));

        let frame = error_frame("rejected", Some(&JsValue::from_f64(1.0)));
        match parse_tracker_frame(&frame) {
            TrackerFrame::Error { message, value } => {
                assert_eq!(message, "rejected");
                assert_eq!(value.and_then(|v| v.as_f64()), Some(1.0));
            }
            _ => panic!("expected an Error frame"),
        }

        assert!(matches!(parse_tracker_frame(&close_frame()), TrackerFrame::Close));
    }

    #[wasm_bindgen_test]
    fn read_only_rejects_remote_writes() {
        let logger = Logger::new("test");
        let property = Property::new(JsValue::from_str("A"), Access::ReadOnly, logger);
        assert!(!property.writable());
        let err = property.set(JsValue::from_str("B"), false).unwrap_err();
        assert_eq!(err.0, "read-only");
        assert_eq!(property.get().as_string().as_deref(), Some("A"));
    }

    #[wasm_bindgen_test]
    fn validator_can_reject_a_write() {
        let logger = Logger::new("test");
        let validator: Rc<dyn Fn(&JsValue) -> Result<(), String>> =
            Rc::new(|v| if v.as_f64().map(|n| n >= 0.0).unwrap_or(false) { Ok(()) } else { Err("must be non-negative".into()) });
        let property = Property::new(JsValue::from_f64(0.0), Access::Validated(validator), logger);
        assert!(property.set(JsValue::from_f64(-1.0), false).is_err());
        assert_eq!(property.get().as_f64(), Some(0.0));
        assert!(property.set(JsValue::from_f64(5.0), false).is_ok());
        assert_eq!(property.get().as_f64(), Some(5.0));
    }

    #[wasm_bindgen_test]
    async fn tracking_a_port_sends_the_current_value_first() {
        let logger = Logger::new("test");
        let property = Property::new(JsValue::from_str("A"), Access::Writable, logger);
        let channel = MessageChannel::new().unwrap();
        property.track(Endpoint::Port(channel.port1()));
        let client_end = Endpoint::Port(channel.port2());
        let first = procweb_channel::get_one_message(client_end).await.unwrap();
        match parse_tracker_frame(&first) {
            TrackerFrame::Value(v) => assert_eq!(v.as_string().as_deref(), Some("A")),
            _ => panic!("expected the tracker's initial value push"),
        }
    }
}
