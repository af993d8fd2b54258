//! The host-supplied collaborator surface (§6: `host-api(pid) -> mapping
//! <string, callable>`). Kept to a trait plus a no-op default so
//! `procweb-host` stays usable standalone (and in tests) without pulling in
//! any concrete DOM collaborator — those are out of scope (§1 Non-goals).

use procweb_process::Pid;
use procweb_rpc::call::Table;

/// Supplies the calls merged into every process's server alongside the
/// core table of §4.E. Implementations must not register any of the core
/// names (`start`, `exit`, `children`, `parent`, `reparent`, `getPid`,
/// `send`, `name`, `find`, `wait`) or `help` — [`Table::merge`] drops and
/// logs any attempt to do so rather than letting it shadow the core
/// behavior.
pub trait HostApi {
    fn table(&self, pid: Pid) -> Table;
}

/// The empty collaborator table — every process gets only the core calls.
pub struct NullHostApi;

impl HostApi for NullHostApi {
    fn table(&self, _pid: Pid) -> Table {
        Table::new()
    }
}
