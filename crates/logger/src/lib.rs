//! A hierarchical console logger.
//!
//! Every long-lived object in `procweb` (a process's server, its property
//! trackers, its client handle) owns a [`Logger`] obtained by calling
//! [`Logger::sub`] on its parent's logger, so log output reads as a path —
//! `"host/pid:3/property:title"` — mirroring the structure of the process
//! tree it describes. On `wasm32` this writes to `web_sys::console` with
//! grouping; elsewhere it falls back to stdout so the pure-logic crates
//! (`procweb-process`) can run their tests natively.

pub trait LogMsg {
    fn with_log_msg<F: FnOnce(&str) -> T, T>(&self, f: F) -> T;
}

impl LogMsg for &str {
    fn with_log_msg<F: FnOnce(&str) -> T, T>(&self, f: F) -> T {
        f(self)
    }
}

impl<F: Fn() -> S, S: procweb_prelude::Str> LogMsg for F {
    fn with_log_msg<G: FnOnce(&str) -> T, T>(&self, f: G) -> T {
        f(self().as_ref())
    }
}

use procweb_prelude::*;

#[derive(Clone, Debug, Default)]
pub struct Logger {
    path: Rc<String>,
}

impl_clone_ref_as_clone!(Logger);

impl Logger {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: Rc::new(path.into()) }
    }

    pub fn sub(&self, path: impl Str) -> Self {
        Self::new(format!("{}/{}", self.path, path.as_ref()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn format<M: LogMsg>(&self, msg: M) -> String {
        msg.with_log_msg(|s| format!("[{}] {}", self.path, s))
    }

    pub fn trace<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Trace, &self.format(msg));
    }

    pub fn debug<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Debug, &self.format(msg));
    }

    pub fn info<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Info, &self.format(msg));
    }

    pub fn warning<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Warning, &self.format(msg));
    }

    pub fn error<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Error, &self.format(msg));
    }

    pub fn group_begin<M: LogMsg>(&self, msg: M) {
        Self::emit(Level::Group, &self.format(msg));
    }

    pub fn group_end(&self) {
        Self::emit(Level::GroupEnd, "");
    }

    /// Runs `f`, wrapping its output in a console group labelled `msg`.
    pub fn group<M: LogMsg, T>(&self, msg: M, f: impl FnOnce() -> T) -> T {
        self.group_begin(msg);
        let out = f();
        self.group_end();
        out
    }

    #[cfg(target_arch = "wasm32")]
    fn emit(level: Level, text: &str) {
        use wasm_bindgen::JsValue;
        let text: JsValue = text.into();
        match level {
            Level::Trace => web_sys::console::trace_1(&text),
            Level::Debug => web_sys::console::debug_1(&text),
            Level::Info => web_sys::console::info_1(&text),
            Level::Warning => web_sys::console::warn_1(&text),
            Level::Error => web_sys::console::error_1(&text),
            Level::Group => web_sys::console::group_1(&text),
            Level::GroupEnd => web_sys::console::group_end(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn emit(level: Level, text: &str) {
        match level {
            Level::Warning => println!("[WARNING] {}", text),
            Level::Error => println!("[ERROR] {}", text),
            Level::Group => println!(">>> {}", text),
            Level::GroupEnd => println!("<<<"),
            Level::Trace | Level::Debug | Level::Info => println!("{}", text),
        }
    }
}

enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Group,
    GroupEnd,
}

#[macro_export]
macro_rules! trace {
    ($logger:expr, $($arg:tt)*) => { $logger.trace(|| format!($($arg)*)) };
}

#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)*) => { $logger.debug(|| format!($($arg)*)) };
}

#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)*) => { $logger.info(|| format!($($arg)*)) };
}

#[macro_export]
macro_rules! warning {
    ($logger:expr, $($arg:tt)*) => { $logger.warning(|| format!($($arg)*)) };
}

#[macro_export]
macro_rules! error {
    ($logger:expr, $($arg:tt)*) => { $logger.error(|| format!($($arg)*)) };
}
