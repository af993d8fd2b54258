//! Thin `wasm-bindgen`/`web-sys` wrappers: a closure-lifetime helper and a
//! few `window`-access utilities. Everything in this crate is a leaf —
//! nothing here knows about frames, calls or processes, mirroring
//! `ensogl-system-web`, which keeps DOM plumbing separate from protocol
//! logic.

pub mod closure;
pub mod unload;

pub use unload::on_unload;
pub use unload::UnloadGuard;

use procweb_prelude::*;

/// Generic error representation for this crate. A struct/enum taxonomy
/// would be significant up-front work for very few call sites, so (as
/// `ensogl-system-web` does in its own module) a single message-carrying
/// type is used here instead of `failure::Fail`.
#[derive(Debug, Clone)]
pub struct Error {
    message: String,
}

#[allow(non_snake_case)]
pub fn Error<S: Into<String>>(message: S) -> Error {
    Error { message: message.into() }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Access `window` if it exists (it won't inside a dedicated worker — use
/// `self` there instead, which `procweb-channel`'s `Endpoint` handles).
pub fn try_window() -> Result<web_sys::Window> {
    web_sys::window().ok_or_else(|| Error("no `window` object in this context"))
}
