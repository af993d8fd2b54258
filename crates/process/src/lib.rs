//! The process table: PID allocation, parent/child bookkeeping, names and
//! `wait`. Deliberately free of `wasm-bindgen`/`web-sys` — everything a
//! concrete port or worker handle would need is hidden behind the generic
//! `H` parameter, so this crate is exercised with ordinary native `#[test]`s
//! instead of `wasm-bindgen-test`.
//!
//! `procweb-host` instantiates `Table<H>` with `H` bound to whatever carries
//! the actual transport endpoint and its teardown closure (§4.E).

use procweb_logger::Logger;
use procweb_prelude::*;

use futures::channel::oneshot;
use futures::future::Either;
use futures::future::Future;
use futures::future::FutureExt;

mod pid;
pub use pid::Pid;

// ==============
// === Errors ===
// ==============

/// Failures the process table itself can report. Authority failures
/// (`not-descendant`) are not among them — they are a property of *who is
/// asking*, which this crate has no notion of; `procweb-host` layers that
/// check on top using [`Table::is_in_subtree`].
#[derive(Debug, Fail)]
pub enum Error {
    /// A PID was referenced that is not present in the table.
    #[fail(display = "no such process: {}", _0)]
    NotFound(Pid),
    /// `reparent` was asked to attach `pid` under a PID within its own
    /// subtree, which would break the forest invariant.
    #[fail(display = "reparenting {} under {} would create a cycle", pid, new_parent)]
    TopologyViolation { pid: Pid, new_parent: Pid },
}

type Result<T> = std::result::Result<T, Error>;

// ===========
// === Row ===
// ===========

struct Row<H> {
    handle:   H,
    parent:   Option<Pid>,
    children: HashSet<Pid>,
    name:     Option<String>,
}

impl<H> Row<H> {
    fn new(handle: H, parent: Option<Pid>) -> Self {
        Self { handle, parent, children: default(), name: None }
    }
}

// =============
// === Table ===
// =============

/// The process table. One instance lives for the whole lifetime of the host.
pub struct Table<H> {
    rows:     HashMap<Pid, Row<H>>,
    next_pid: u32,
    names:    HashMap<String, Pid>,
    waiters:  HashMap<String, Vec<oneshot::Sender<Pid>>>,
    logger:   Logger,
}

impl<H> Default for Table<H> {
    fn default() -> Self {
        Self::new(Logger::new("process-table"))
    }
}

impl<H> Table<H> {
    pub fn new(logger: Logger) -> Self {
        Self { rows: default(), next_pid: 1, names: default(), waiters: default(), logger }
    }

    /// Allocates a row for an already-constructed handle (e.g. an adopted
    /// port, or a freshly spawned worker) and parents it as requested.
    ///
    /// Fails with [`Error::NotFound`] if `parent` is given but absent.
    pub fn start(&mut self, handle: H, parent: Option<Pid>) -> Result<Pid> {
        self.start_with(parent, |_pid| handle)
    }

    /// Like [`Table::start`], but the handle is built from the PID it will
    /// be given. Needed by callers (the host's server assembly, §4.E) whose
    /// handle closures are bound to the caller's own PID — the table, not
    /// the caller, decides the PID, so it must hand it over before the
    /// handle exists.
    pub fn start_with(&mut self, parent: Option<Pid>, build: impl FnOnce(Pid) -> H) -> Result<Pid> {
        if let Some(parent) = parent {
            if !self.rows.contains_key(&parent) {
                return Err(Error::NotFound(parent));
            }
        }
        let pid = self.allocate_pid();
        self.rows.insert(pid, Row::new(build(pid), parent));
        if let Some(parent) = parent {
            self.rows.get_mut(&parent).unwrap().children.insert(pid);
        }
        procweb_logger::debug!(self.logger, "started {} (parent={:?})", pid, parent);
        Ok(pid)
    }

    /// Depth-first removal of `pid` and every descendant. Returns the
    /// removed handles, deepest first, so the caller can run teardown
    /// (`disableApi`, `close`, `terminate`) in the right order without this
    /// crate needing to know what a handle's teardown even is.
    pub fn exit(&mut self, pid: Pid) -> Result<Vec<H>> {
        if !self.rows.contains_key(&pid) {
            return Err(Error::NotFound(pid));
        }
        let mut removed = Vec::new();
        self.exit_recursive(pid, &mut removed);
        if let Some(row) = self.rows.remove(&pid) {
            if let Some(parent) = row.parent {
                if let Some(parent_row) = self.rows.get_mut(&parent) {
                    parent_row.children.remove(&pid);
                }
            }
            self.release_name(&row.name, pid);
            removed.push(row.handle);
        }
        procweb_logger::debug!(self.logger, "exited {} ({} total removed)", pid, removed.len());
        Ok(removed)
    }

    fn exit_recursive(&mut self, pid: Pid, removed: &mut Vec<H>) {
        let children: Vec<Pid> = match self.rows.get(&pid) {
            Some(row) => row.children.iter().copied().collect(),
            None => return,
        };
        for child in children {
            self.exit_recursive(child, removed);
            if let Some(row) = self.rows.remove(&child) {
                self.release_name(&row.name, child);
                removed.push(row.handle);
            }
        }
    }

    /// Detaches `pid` from its current parent (if any) and attaches it under
    /// `new_parent` (if given). Always enforces the forest invariant: this
    /// will refuse a reparent that would make `pid` its own ancestor, even
    /// if the caller already checked authority at a higher layer.
    pub fn reparent(&mut self, pid: Pid, new_parent: Option<Pid>) -> Result<()> {
        if !self.rows.contains_key(&pid) {
            return Err(Error::NotFound(pid));
        }
        if let Some(new_parent) = new_parent {
            if !self.rows.contains_key(&new_parent) {
                return Err(Error::NotFound(new_parent));
            }
            if self.is_in_subtree(new_parent, pid) {
                return Err(Error::TopologyViolation { pid, new_parent });
            }
        }
        let old_parent = self.rows[&pid].parent;
        if let Some(old_parent) = old_parent {
            if let Some(row) = self.rows.get_mut(&old_parent) {
                row.children.remove(&pid);
            }
        }
        if let Some(new_parent) = new_parent {
            self.rows.get_mut(&new_parent).unwrap().children.insert(pid);
        }
        self.rows.get_mut(&pid).unwrap().parent = new_parent;
        Ok(())
    }

    /// `None` lists every root process (no parent); `Some(pid)` lists that
    /// process's direct children.
    pub fn children(&self, pid: Option<Pid>) -> Result<Vec<Pid>> {
        match pid {
            None => Ok(self.rows.iter().filter(|(_, row)| row.parent.is_none()).map(|(pid, _)| *pid).collect()),
            Some(pid) => {
                let row = self.rows.get(&pid).ok_or(Error::NotFound(pid))?;
                Ok(row.children.iter().copied().collect())
            }
        }
    }

    pub fn parent(&self, pid: Pid) -> Result<Option<Pid>> {
        self.rows.get(&pid).map(|row| row.parent).ok_or(Error::NotFound(pid))
    }

    /// Walks parent pointers from `pid` upward. `true` if `root` is
    /// encountered (including `pid == root` — a process is within its own
    /// subtree), `false` if the walk reaches a root of the forest first.
    pub fn is_in_subtree(&self, pid: Pid, root: Pid) -> bool {
        let mut current = Some(pid);
        while let Some(p) = current {
            if p == root {
                return true;
            }
            current = self.rows.get(&p).and_then(|row| row.parent);
        }
        false
    }

    pub fn get(&self, pid: Pid) -> Result<&H> {
        self.rows.get(&pid).map(|row| &row.handle).ok_or(Error::NotFound(pid))
    }

    /// Every currently-live row's handle, in no particular order. Used by
    /// the host's `unload` hook (§4.A) to reach every locally held port
    /// without this crate needing to know what a handle even is.
    pub fn handles(&self) -> impl Iterator<Item = &H> {
        self.rows.values().map(|row| &row.handle)
    }

    /// Tries `options` in order and claims the first unclaimed name,
    /// releasing any prior name `pid` held. If every option is already
    /// taken, `pid` keeps whatever name it had before this call — per the
    /// spec's mandate (§9 Open Question), failure never clears a prior name.
    pub fn name(&mut self, pid: Pid, options: &[String]) -> Result<Option<String>> {
        if !self.rows.contains_key(&pid) {
            return Err(Error::NotFound(pid));
        }
        let claimed = options.iter().find(|name| !self.names.contains_key(*name)).cloned();
        let claimed = match claimed {
            Some(name) => name,
            None => return Ok(None),
        };
        let prior = self.rows[&pid].name.clone();
        self.release_name(&prior, pid);
        self.names.insert(claimed.clone(), pid);
        self.rows.get_mut(&pid).unwrap().name = Some(claimed.clone());
        procweb_logger::debug!(self.logger, "{} took name {:?}", pid, claimed);
        if let Some(waiters) = self.waiters.remove(&claimed) {
            for waiter in waiters {
                let _ = waiter.send(pid);
            }
        }
        Ok(Some(claimed))
    }

    fn release_name(&mut self, name: &Option<String>, pid: Pid) {
        if let Some(name) = name {
            if self.names.get(name) == Some(&pid) {
                self.names.remove(name);
            }
        }
    }

    /// Returns the first option currently held by some process, if any.
    pub fn find(&self, options: &[String]) -> Option<(String, Pid)> {
        options.iter().find_map(|name| self.names.get(name).map(|pid| (name.clone(), *pid)))
    }

    /// Resolves immediately if `name` is already held; otherwise resolves
    /// the next time any [`Table::name`] call takes it.
    pub fn wait(&mut self, name: impl Into<String>) -> impl Future<Output = Pid> {
        let name = name.into();
        if let Some(pid) = self.names.get(&name) {
            Either::Left(futures::future::ready(*pid))
        } else {
            let (tx, rx) = oneshot::channel();
            self.waiters.entry(name).or_insert_with(Vec::new).push(tx);
            Either::Right(rx.map(|r| r.expect("process table dropped with a pending wait()")))
        }
    }

    fn allocate_pid(&mut self) -> Pid {
        let mut candidate = self.next_pid;
        while self.rows.contains_key(&Pid::new(candidate)) {
            candidate = candidate.wrapping_add(1).max(1);
        }
        self.next_pid = candidate.wrapping_add(1).max(1);
        Pid::new(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(opts: &[&str]) -> Vec<String> {
        opts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spawn_and_address() {
        let mut table: Table<()> = Table::default();
        let pid = table.start((), None).unwrap();
        assert_eq!(table.parent(pid).unwrap(), None);
        assert_eq!(table.children(None).unwrap(), vec![pid]);
    }

    #[test]
    fn subtree_authority_walk() {
        let mut table: Table<()> = Table::default();
        let u1 = table.start((), None).unwrap();
        let u2 = table.start((), Some(u1)).unwrap();
        let u3 = table.start((), Some(u2)).unwrap();
        assert!(table.is_in_subtree(u3, u1));
        assert!(!table.is_in_subtree(u1, u3));
        assert!(table.is_in_subtree(u1, u1));
    }

    #[test]
    fn reparent_cycle_is_rejected() {
        let mut table: Table<()> = Table::default();
        let u1 = table.start((), None).unwrap();
        let u2 = table.start((), Some(u1)).unwrap();
        let u3 = table.start((), Some(u2)).unwrap();
        let err = table.reparent(u1, Some(u3)).unwrap_err();
        assert!(matches!(err, Error::TopologyViolation { .. }));
        let err = table.reparent(u3, Some(u3)).unwrap_err();
        assert!(matches!(err, Error::TopologyViolation { .. }));
    }

    #[test]
    fn exit_removes_subtree_only() {
        let mut table: Table<()> = Table::default();
        let u1 = table.start((), None).unwrap();
        let u2 = table.start((), Some(u1)).unwrap();
        let u3 = table.start((), Some(u2)).unwrap();
        let other_root = table.start((), None).unwrap();

        let removed = table.exit(u2).unwrap();
        assert_eq!(removed.len(), 2); // u3, then u2

        assert!(table.parent(u1).is_ok());
        assert!(matches!(table.parent(u2).unwrap_err(), Error::NotFound(p) if p == u2));
        assert!(matches!(table.parent(u3).unwrap_err(), Error::NotFound(p) if p == u3));
        assert_eq!(table.children(Some(u1)).unwrap(), Vec::<Pid>::new());
        assert_eq!(table.parent(other_root).unwrap(), None);
    }

    #[test]
    fn name_claim_and_find() {
        let mut table: Table<()> = Table::default();
        let p = table.start((), None).unwrap();
        let claimed = table.name(p, &names(&["a", "b", "c"])).unwrap();
        assert_eq!(claimed, Some("a".to_string()));
        assert_eq!(table.find(&names(&["a"])), Some(("a".to_string(), p)));

        let q = table.start((), None).unwrap();
        // "a" is taken, "b" is free.
        let claimed = table.name(q, &names(&["a", "b"])).unwrap();
        assert_eq!(claimed, Some("b".to_string()));
    }

    #[test]
    fn name_exhaustion_retains_prior_name() {
        let mut table: Table<()> = Table::default();
        let p = table.start((), None).unwrap();
        table.name(p, &names(&["taken-by-p"])).unwrap();
        let q = table.start((), None).unwrap();
        let result = table.name(q, &names(&["taken-by-p"])).unwrap();
        assert_eq!(result, None);
        // q never had a name, so it remains nameless; p's name is untouched.
        assert_eq!(table.find(&names(&["taken-by-p"])), Some(("taken-by-p".to_string(), p)));
    }

    #[test]
    fn exit_releases_name() {
        let mut table: Table<()> = Table::default();
        let p = table.start((), None).unwrap();
        table.name(p, &names(&["svc"])).unwrap();
        table.exit(p).unwrap();
        assert_eq!(table.find(&names(&["svc"])), None);
    }

    #[test]
    fn wait_resolves_on_name() {
        let mut table: Table<()> = Table::default();
        let fut = table.wait("db");
        let p = table.start((), None).unwrap();
        table.name(p, &names(&["db"])).unwrap();
        let resolved = futures::executor::block_on(fut);
        assert_eq!(resolved, p);
    }

    #[test]
    fn wait_resolves_immediately_if_already_held() {
        let mut table: Table<()> = Table::default();
        let p = table.start((), None).unwrap();
        table.name(p, &names(&["db"])).unwrap();
        let resolved = futures::executor::block_on(table.wait("db"));
        assert_eq!(resolved, p);
    }

    #[test]
    fn handles_enumerates_every_live_row() {
        let mut table: Table<&'static str> = Table::default();
        table.start("a", None).unwrap();
        let b = table.start("b", None).unwrap();
        table.exit(b).unwrap();
        let mut seen: Vec<&str> = table.handles().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn pid_allocation_skips_occupied_slots() {
        let mut table: Table<()> = Table::default();
        let a = table.start((), None).unwrap();
        let b = table.start((), None).unwrap();
        assert_ne!(a, b);
        table.exit(a).unwrap();
        let c = table.start((), None).unwrap();
        assert_ne!(c, b);
    }
}
