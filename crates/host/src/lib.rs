//! Host API assembly (spec §4.E): glues the process table onto the call
//! transport, binding every installed call with the owning process's PID as
//! implicit caller, and enforcing the caller-authority rules table.
//!
//! Grounded the same way `procweb-process` is free of DOM concerns: this
//! crate is the one place a `Pid` and a `procweb_channel::Endpoint` meet.

mod api;

pub use api::HostApi;
pub use api::NullHostApi;

use procweb_channel::Endpoint;
use procweb_logger::Logger;
use procweb_prelude::*;
use procweb_process::Pid;
use procweb_rpc::call;
use procweb_rpc::Server;

use futures::future::Future;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;

/// The `child` argument of `start` (§4.D): either a URL to hand to the
/// `get-port` collaborator, or an already-constructed endpoint (an adopted
/// port, or a worker spawned by the caller itself).
pub enum Spawn {
    Url(String),
    Handle(Endpoint),
}

/// Failures this crate can report, matching spec §7's taxonomy for the
/// entries that are about process-table authority rather than transport.
#[derive(Debug, Fail)]
pub enum HostError {
    #[fail(display = "no such process: {}", _0)]
    NotFound(Pid),
    #[fail(display = "{} is not in {}'s subtree", target, caller)]
    NotDescendant { caller: Pid, target: Pid },
    #[fail(display = "reparenting {} under {} would create a cycle", pid, new_parent)]
    TopologyViolation { pid: Pid, new_parent: Pid },
    #[fail(display = "spawn failed: {:?}", _0)]
    SpawnFailed(procweb_channel::UnsafeJsValue),
}

impl From<procweb_process::Error> for HostError {
    fn from(e: procweb_process::Error) -> Self {
        match e {
            procweb_process::Error::NotFound(pid) => HostError::NotFound(pid),
            procweb_process::Error::TopologyViolation { pid, new_parent } => {
                HostError::TopologyViolation { pid, new_parent }
            }
        }
    }
}

impl From<HostError> for JsValue {
    fn from(e: HostError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

/// Constructor collaborators (§6 "Host-facing collaborator interface").
/// `get_port` spawns a child from a URL; `host_api` supplies the additional,
/// process-specific calls (iframe display, favicon, title, history, ...)
/// that stay out of this crate on purpose (§1 Non-goals).
#[derive(Clone)]
pub struct HostConfig {
    pub get_port: Rc<dyn Fn(&str) -> Result<Endpoint, JsValue>>,
    pub host_api: Rc<dyn HostApi>,
}
impl_clone_ref_as_clone!(HostConfig);

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            get_port: Rc::new(|url| {
                Err(JsValue::from_str(&format!("no get-port collaborator configured to spawn {:?}", url)))
            }),
            host_api: Rc::new(NullHostApi),
        }
    }
}

/// The handle a [`procweb_process::Table`] row carries for this host: the
/// process's root endpoint, and its installed server (whose `cancel` is the
/// `disableApi` closure spec.md §3 attaches to every row).
struct ProcessHandle {
    endpoint: Endpoint,
    server:   Server,
}

struct State {
    table:  procweb_process::Table<ProcessHandle>,
    config: HostConfig,
    logger: Logger,
    // Kept alive only for its `Drop`; never read. Registers the `unload`
    // best-effort close-everything hook (§4.A) once per host.
    _unload: procweb_web::UnloadGuard,
}

/// The process host. One instance owns the whole table for a given page or
/// worker context.
#[derive(Clone)]
pub struct Host {
    state: Rc<RefCell<State>>,
}
impl_clone_ref_as_clone!(Host);

impl Host {
    pub fn new(config: HostConfig, logger: Logger) -> Self {
        let table = procweb_process::Table::new(logger.sub("process-table"));
        let state = Rc::new(RefCell::new(State {
            table,
            config,
            logger,
            _unload: procweb_web::UnloadGuard::default(),
        }));
        let weak = Rc::downgrade(&state);
        let unload = procweb_web::on_unload(move || {
            if let Some(state) = weak.upgrade() {
                let state = state.borrow();
                for handle in state.table.handles() {
                    procweb_channel::signal_close(&handle.endpoint);
                }
            }
        });
        state.borrow_mut()._unload = unload;
        Self { state }
    }

    /// `start(child, parent?)` (§4.D). Always permitted for the caller
    /// (§4.E: "always permitted; the new process is parented under `pid`"
    /// when invoked through the RPC surface — [`Host::start`] itself takes
    /// an explicit `parent` since it is also the entry point for spawning
    /// root processes with no caller at all).
    pub fn start(&self, child: Spawn, parent: Option<Pid>) -> Result<Pid, HostError> {
        let endpoint = match child {
            Spawn::Handle(endpoint) => endpoint,
            Spawn::Url(url) => {
                let get_port = self.state.borrow().config.get_port.clone();
                get_port(&url).map_err(|v| HostError::SpawnFailed(procweb_channel::UnsafeJsValue(v)))?
            }
        };
        let host = self.clone_ref();
        // Snapshot the collaborators up front: `start_with`'s build closure
        // runs while `self.state` is already mutably borrowed by this very
        // call, so `api_table` must not reach back into `self.state` itself.
        let config = self.state.borrow().config.clone_ref();
        let logger = self.state.borrow().logger.clone_ref();
        let pid = self.state.borrow_mut().table.start_with(parent, move |pid| {
            let table = host.api_table(pid, &config, &logger);
            let sub_logger = logger.sub(&format!("pid:{}", pid.value()));
            let server = call::make_server(endpoint.clone_ref(), table, false, sub_logger);
            ProcessHandle { endpoint, server }
        })?;
        procweb_logger::debug!(self.state.borrow().logger, "started {} (parent={:?})", pid, parent);
        Ok(pid)
    }

    /// `exit(pid)` (§4.D). Tears down every removed row's server and
    /// endpoint, deepest descendant first, matching the order the contract
    /// specifies (`disableApi`, then `close`, then `terminate`).
    pub fn exit(&self, pid: Pid) -> Result<(), HostError> {
        let removed = self.state.borrow_mut().table.exit(pid)?;
        for handle in removed {
            handle.server.cancel();
            handle.endpoint.close();
            handle.endpoint.terminate();
        }
        Ok(())
    }

    /// `exit` invoked by `caller` against `target`, enforcing subtree
    /// authority (§4.E: `is-in-subtree(target, pid)`).
    fn exit_authorized(&self, caller: Pid, target: Pid) -> Result<(), HostError> {
        self.require_subtree(caller, target)?;
        self.exit(target)
    }

    pub fn children(&self, pid: Option<Pid>) -> Result<Vec<Pid>, HostError> {
        Ok(self.state.borrow().table.children(pid)?)
    }

    fn children_authorized(&self, caller: Pid, target: Pid) -> Result<Vec<Pid>, HostError> {
        self.require_subtree(caller, target)?;
        self.children(Some(target))
    }

    pub fn parent(&self, pid: Pid) -> Result<Option<Pid>, HostError> {
        Ok(self.state.borrow().table.parent(pid)?)
    }

    fn parent_authorized(&self, caller: Pid, target: Pid) -> Result<Option<Pid>, HostError> {
        self.require_subtree(caller, target)?;
        self.parent(target)
    }

    /// `reparent(target, new-parent)` (§4.D/§4.E). Requires `target` to be
    /// in `caller`'s subtree, and refuses to create a cycle (`new-parent`
    /// must not itself be in `target`'s subtree).
    fn reparent_authorized(&self, caller: Pid, target: Pid, new_parent: Pid) -> Result<(), HostError> {
        self.require_subtree(caller, target)?;
        if self.state.borrow().table.is_in_subtree(new_parent, target) {
            return Err(HostError::TopologyViolation { pid: target, new_parent });
        }
        Ok(self.state.borrow_mut().table.reparent(target, Some(new_parent))?)
    }

    fn require_subtree(&self, caller: Pid, target: Pid) -> Result<(), HostError> {
        if self.state.borrow().table.is_in_subtree(target, caller) {
            Ok(())
        } else {
            Err(HostError::NotDescendant { caller, target })
        }
    }

    /// `send(target, data, transfer)` (§4.E): posts `[sender, data]` on
    /// `target`'s port, the sender stamped in by the host rather than
    /// trusted from the caller.
    fn send(&self, sender: Pid, target: Pid, data: &JsValue, transfer: &[JsValue]) -> Result<(), HostError> {
        let array = js_sys::Array::new();
        array.push(&JsValue::from_f64(sender.value() as f64));
        array.push(data);
        let endpoint = {
            let state = self.state.borrow();
            let handle = state.table.get(target).map_err(HostError::from)?;
            handle.endpoint.clone_ref()
        };
        endpoint.post(&array.into(), transfer).map_err(|v| HostError::SpawnFailed(procweb_channel::UnsafeJsValue(v)))
    }

    pub fn name(&self, pid: Pid, options: &[String]) -> Result<Option<String>, HostError> {
        Ok(self.state.borrow_mut().table.name(pid, options)?)
    }

    pub fn find(&self, options: &[String]) -> Option<(String, Pid)> {
        self.state.borrow().table.find(options)
    }

    pub fn wait(&self, name: impl Into<String>) -> impl Future<Output = Pid> {
        self.state.borrow_mut().table.wait(name)
    }

    /// Builds the per-pid call table of §4.E: the core operations bound
    /// with `pid` as implicit caller, merged with the configured host-api
    /// collaborator table. `config`/`logger` are passed in rather than read
    /// from `self.state` because this runs from inside the
    /// `start_with` build closure, while `self.state` is already mutably
    /// borrowed by the in-flight `start` call.
    fn api_table(&self, pid: Pid, config: &HostConfig, logger: &Logger) -> call::Table {
        let mut table = call::Table::new();

        let host = self.clone_ref();
        table.register("start", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let child = decode_spawn(args.get(0))?;
                let new_pid = host.start(child, Some(pid))?;
                Ok(JsValue::from_f64(new_pid.value() as f64))
            })
        }));

        let host = self.clone_ref();
        table.register("exit", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let target = decode_pid_or(args.get(0), pid)?;
                host.exit_authorized(pid, target)?;
                Ok(JsValue::UNDEFINED)
            })
        }));

        let host = self.clone_ref();
        table.register("children", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let target = decode_pid_or(args.get(0), pid)?;
                let children = host.children_authorized(pid, target)?;
                let array = js_sys::Array::new();
                for child in children {
                    array.push(&JsValue::from_f64(child.value() as f64));
                }
                Ok(array.into())
            })
        }));

        let host = self.clone_ref();
        table.register("parent", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let target = decode_pid_or(args.get(0), pid)?;
                let parent = host.parent_authorized(pid, target)?;
                Ok(parent.map(|p| JsValue::from_f64(p.value() as f64)).unwrap_or(JsValue::UNDEFINED))
            })
        }));

        let host = self.clone_ref();
        table.register("reparent", 2, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let target = decode_pid(args.get(0))?;
                let new_parent = decode_pid_or(args.get(1), pid)?;
                host.reparent_authorized(pid, target, new_parent)?;
                Ok(JsValue::UNDEFINED)
            })
        }));

        table.register("getPid", 0, Rc::new(move |_args| {
            Box::pin(async move { Ok(JsValue::from_f64(pid.value() as f64)) })
        }));

        let host = self.clone_ref();
        table.register("send", 3, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let target = decode_pid(args.get(0))?;
                let data = args.get(1).cloned().unwrap_or(JsValue::UNDEFINED);
                let transfer = decode_values(args.get(2));
                host.send(pid, target, &data, &transfer)?;
                Ok(JsValue::UNDEFINED)
            })
        }));

        let host = self.clone_ref();
        table.register("name", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let options = decode_strings(args.get(0))?;
                let claimed = host.name(pid, &options)?;
                Ok(claimed.map(|n| JsValue::from_str(&n)).unwrap_or(JsValue::from_bool(false)))
            })
        }));

        let host = self.clone_ref();
        table.register("find", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            Box::pin(async move {
                let options = decode_strings(args.get(0))?;
                Ok(match host.find(&options) {
                    Some((name, pid)) => {
                        let pair = js_sys::Array::new();
                        pair.push(&JsValue::from_str(&name));
                        pair.push(&JsValue::from_f64(pid.value() as f64));
                        pair.into()
                    }
                    None => JsValue::from_bool(false),
                })
            })
        }));

        let host = self.clone_ref();
        table.register("wait", 1, Rc::new(move |args| {
            let host = host.clone_ref();
            let name = args.get(0).and_then(|v| v.as_string());
            Box::pin(async move {
                let name = name.ok_or_else(|| JsValue::from_str("wait expects a name"))?;
                let resolved = host.wait(name).await;
                Ok(JsValue::from_f64(resolved.value() as f64))
            })
        }));

        table.merge(config.host_api.table(pid), logger);
        table
    }
}

fn decode_pid(value: Option<&JsValue>) -> Result<Pid, JsValue> {
    value
        .and_then(JsValue::as_f64)
        .map(|n| Pid::from_raw(n as u32))
        .ok_or_else(|| JsValue::from_str("expected a PID argument"))
}

fn decode_pid_or(value: Option<&JsValue>, default: Pid) -> Result<Pid, JsValue> {
    match value {
        None => Ok(default),
        Some(v) if v.is_undefined() => Ok(default),
        Some(_) => decode_pid(value),
    }
}

/// `None`/`undefined` decodes to an empty list rather than an error —
/// `transfer` is optional on every call that takes one.
fn decode_values(value: Option<&JsValue>) -> Vec<JsValue> {
    value
        .cloned()
        .unwrap_or(JsValue::UNDEFINED)
        .dyn_into::<js_sys::Array>()
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

fn decode_strings(value: Option<&JsValue>) -> Result<Vec<String>, JsValue> {
    let array = value
        .cloned()
        .unwrap_or(JsValue::UNDEFINED)
        .dyn_into::<js_sys::Array>()
        .map_err(|_| JsValue::from_str("expected an array of strings"))?;
    Ok(array.iter().filter_map(|v| v.as_string()).collect())
}

fn decode_spawn(value: Option<&JsValue>) -> Result<Spawn, JsValue> {
    let value = value.cloned().unwrap_or(JsValue::UNDEFINED);
    if let Some(url) = value.as_string() {
        return Ok(Spawn::Url(url));
    }
    if let Some(port) = value.dyn_ref::<web_sys::MessagePort>() {
        return Ok(Spawn::Handle(Endpoint::Port(port.clone())));
    }
    if let Some(worker) = value.dyn_ref::<web_sys::Worker>() {
        return Ok(Spawn::Handle(Endpoint::Worker(worker.clone())));
    }
    Err(JsValue::from_str("start() expects a URL string or an adopted port/worker"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use wasm_bindgen_test::wasm_bindgen_test;
    use wasm_bindgen_test::wasm_bindgen_test_configure;
    use web_sys::MessageChannel;

    wasm_bindgen_test_configure!(run_in_browser);

    fn host() -> Host {
        Host::new(HostConfig::default(), Logger::new("test"))
    }

    fn adopted_port() -> Endpoint {
        let channel = MessageChannel::new().unwrap();
        Endpoint::Port(channel.port1())
    }

    #[wasm_bindgen_test]
    fn exit_authorized_allows_an_ancestor_caller() {
        let host = host();
        let parent = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let child = host.start(Spawn::Handle(adopted_port()), Some(parent)).unwrap();
        assert!(host.exit_authorized(parent, child).is_ok());
        assert!(host.parent(child).is_err()); // exited, so no longer in the table
    }

    #[wasm_bindgen_test]
    fn exit_authorized_rejects_a_non_ancestor_caller() {
        let host = host();
        let r1 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let r2 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let err = host.exit_authorized(r2, r1).unwrap_err();
        assert!(matches!(err, HostError::NotDescendant { caller, target } if caller == r2 && target == r1));
        // Nothing was torn down: r1 is still present.
        assert!(host.parent(r1).is_ok());
    }

    #[wasm_bindgen_test]
    fn children_authorized_rejects_a_non_ancestor_caller() {
        let host = host();
        let r1 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let r2 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let err = host.children_authorized(r2, r1).unwrap_err();
        assert!(matches!(err, HostError::NotDescendant { .. }));
    }

    #[wasm_bindgen_test]
    fn parent_authorized_allows_self_as_caller() {
        let host = host();
        let parent = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let child = host.start(Spawn::Handle(adopted_port()), Some(parent)).unwrap();
        // A process is within its own subtree, so it may query its own parent.
        assert_eq!(host.parent_authorized(child, child).unwrap(), Some(parent));
    }

    #[wasm_bindgen_test]
    fn parent_authorized_rejects_a_non_ancestor_caller() {
        let host = host();
        let r1 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let r2 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let err = host.parent_authorized(r2, r1).unwrap_err();
        assert!(matches!(err, HostError::NotDescendant { .. }));
    }

    #[wasm_bindgen_test]
    fn reparent_authorized_allows_an_ancestor_caller() {
        let host = host();
        let root = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let a = host.start(Spawn::Handle(adopted_port()), Some(root)).unwrap();
        let b = host.start(Spawn::Handle(adopted_port()), Some(root)).unwrap();
        assert!(host.reparent_authorized(root, a, b).is_ok());
        assert_eq!(host.parent(a).unwrap(), Some(b));
    }

    #[wasm_bindgen_test]
    fn reparent_authorized_rejects_a_non_ancestor_caller() {
        let host = host();
        let r1 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let r2 = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let c1 = host.start(Spawn::Handle(adopted_port()), Some(r1)).unwrap();
        let err = host.reparent_authorized(r2, c1, r2).unwrap_err();
        assert!(matches!(err, HostError::NotDescendant { caller, target } if caller == r2 && target == c1));
        assert_eq!(host.parent(c1).unwrap(), Some(r1)); // untouched
    }

    #[wasm_bindgen_test]
    fn reparent_authorized_rejects_a_cycle_even_for_an_ancestor_caller() {
        let host = host();
        let root = host.start(Spawn::Handle(adopted_port()), None).unwrap();
        let a = host.start(Spawn::Handle(adopted_port()), Some(root)).unwrap();
        let b = host.start(Spawn::Handle(adopted_port()), Some(a)).unwrap();
        // root has authority over both a and b, but a under b would make a its
        // own descendant's child.
        let err = host.reparent_authorized(root, a, b).unwrap_err();
        assert!(matches!(err, HostError::TopologyViolation { pid, new_parent } if pid == a && new_parent == b));
        assert_eq!(host.parent(a).unwrap(), Some(root)); // untouched
    }
}
