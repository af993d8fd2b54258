//! Wire frame shapes (§6), built and read through `js_sys::Reflect` rather
//! than any text codec — frames are structured-clone JS values, not JSON,
//! so `enso-protocol`'s `serde`-based `Event`/message types don't apply;
//! the shape of this module instead follows `ensogl-system-web`'s own
//! `js_sys::Reflect` usage in its DOM/style glue.

use js_sys::Array;
use js_sys::Object;
use js_sys::Reflect;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use web_sys::MessagePort;

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

/// A decoded inbound frame. `Unrecognized` covers anything that is neither
/// one of the named shapes nor a bare transferred port — dispatch silently
/// ignores those (§7: "may belong to another registered handler").
pub enum Frame {
    Request { call: String, args: Vec<JsValue> },
    Result(JsValue),
    Error(JsValue),
    Close,
    SubOffer(MessagePort),
    Unrecognized,
}

/// Parses `raw` (a `MessageEvent::data()`) into a [`Frame`].
pub fn parse(raw: &JsValue) -> Frame {
    if let Some(port) = raw.dyn_ref::<MessagePort>() {
        return Frame::SubOffer(port.clone());
    }
    if let Some(channel) = get(raw, "channel").and_then(|v| v.as_string()) {
        if channel == "close" {
            return Frame::Close;
        }
    }
    if let Some(call) = get(raw, "call").and_then(|v| v.as_string()) {
        let args = get(raw, "args")
            .and_then(|v| v.dyn_into::<Array>().ok())
            .map(|a| a.iter().collect())
            .unwrap_or_default();
        return Frame::Request { call, args };
    }
    if let Some(result) = get(raw, "result") {
        return Frame::Result(result);
    }
    if let Some(error) = get(raw, "error") {
        return Frame::Error(error);
    }
    Frame::Unrecognized
}

pub fn request(call: &str, args: &[JsValue]) -> JsValue {
    let array = Array::new();
    for arg in args {
        array.push(arg);
    }
    object_with(&[("call", JsValue::from_str(call)), ("args", array.into())])
}

pub fn result(value: &JsValue) -> JsValue {
    object_with(&[("result", value.clone())])
}

pub fn error(value: &JsValue) -> JsValue {
    object_with(&[("error", value.clone())])
}

/// The `help()` reply: call names paired with an arity hint (§9's
/// additive schema-frame extension — diagnostic-only, ignored by any client
/// that only reads the list of names).
pub fn help_result(entries: &[(String, usize)]) -> JsValue {
    let array = Array::new();
    for (name, arity) in entries {
        let entry = object_with(&[("name", JsValue::from_str(name)), ("arity", JsValue::from_f64(*arity as f64))]);
        array.push(&entry);
    }
    result(&array.into())
}

/// Reads plain call names back out of a `help()` result, ignoring the arity
/// hint — this is the only thing a strictly-minimal client needs (§9).
pub fn help_names(value: &JsValue) -> Vec<String> {
    help_entries(value).into_iter().map(|(name, _)| name).collect()
}

/// Reads `(name, arity)` pairs back out of a `help()` result. A client that
/// wants the diagnostic arity hint (§9) reads this instead of [`help_names`];
/// an entry missing or malformed `arity` defaults to `0` rather than being
/// dropped, so a peer advertising the bare-minimum `{name}` shape is still
/// usable.
pub fn help_entries(value: &JsValue) -> Vec<(String, usize)> {
    match value.clone().dyn_into::<Array>() {
        Ok(array) => array
            .iter()
            .filter_map(|entry| {
                let name = get(&entry, "name").and_then(|v| v.as_string())?;
                let arity = get(&entry, "arity").and_then(|v| v.as_f64()).unwrap_or(0.0) as usize;
                Some((name, arity))
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn request_frame_round_trips() {
        let args = [JsValue::from_f64(1.0), JsValue::from_str("a")];
        let frame = request("foo", &args);
        match parse(&frame) {
            Frame::Request { call, args } => {
                assert_eq!(call, "foo");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].as_f64(), Some(1.0));
                assert_eq!(args[1].as_string().as_deref(), Some("a"));
            }
            _ => panic!("expected a Request frame"),
        }
    }

    #[wasm_bindgen_test]
    fn result_and_error_frames_are_distinguished() {
        let ok = result(&JsValue::from_f64(42.0));
        assert!(matches!(parse(&ok), Frame::Result(v) if v.as_f64() == Some(42.0)));

        let bad = error(&JsValue::from_str("boom"));
        assert!(matches!(parse(&bad), Frame::Error(v) if v.as_string().as_deref() == Some("boom")));
    }

    #[wasm_bindgen_test]
    fn close_control_frame_is_recognized() {
        let object = Object::new();
        let _ = Reflect::set(&object, &JsValue::from_str("channel"), &JsValue::from_str("close"));
        assert!(matches!(parse(&object.into()), Frame::Close));
    }

    #[wasm_bindgen_test]
    fn help_result_round_trips_names() {
        let entries = vec![("foo".to_string(), 1), ("bar".to_string(), 0)];
        let reply = match parse(&help_result(&entries)) {
            Frame::Result(v) => v,
            _ => panic!("expected a Result frame"),
        };
        let mut names = help_names(&reply);
        names.sort();
        assert_eq!(names, vec!["bar".to_string(), "foo".to_string()]);
    }

    #[wasm_bindgen_test]
    fn help_result_round_trips_arities() {
        let entries = vec![("foo".to_string(), 2), ("bar".to_string(), 0)];
        let reply = match parse(&help_result(&entries)) {
            Frame::Result(v) => v,
            _ => panic!("expected a Result frame"),
        };
        let mut decoded = help_entries(&reply);
        decoded.sort();
        let mut expected = entries;
        expected.sort();
        assert_eq!(decoded, expected);
    }
}
