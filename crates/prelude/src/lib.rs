//! Common types and small utilities reused across every `procweb-*` crate.
//!
//! Kept intentionally small: only what the rest of the workspace actually
//! imports with a `use procweb_prelude::*`.

#![feature(trait_alias)]

pub use failure::Fail;
pub use std::cell::Ref;
pub use std::cell::RefCell;
pub use std::cell::RefMut;
pub use std::collections::HashMap;
pub use std::collections::HashSet;
pub use std::fmt;
pub use std::fmt::Debug;
pub use std::fmt::Display;
pub use std::hash::Hash;
pub use std::rc::Rc;
pub use std::rc::Weak;

/// Trait alias for anything that can be borrowed as a `str`.
pub trait Str = AsRef<str>;

/// Shorthand for `Default::default()`, used pervasively to avoid spelling out
/// long type names at construction sites.
pub fn default<T: Default>() -> T {
    Default::default()
}

mod clone_ref;
pub use clone_ref::*;

mod option_ops;
pub use option_ops::*;
