//! Call transport and property protocol (spec components B and C): the
//! wire frame shapes, server-side dispatch over a handler table, the two
//! client call disciplines, the `get-transfer()` ambient, and the
//! `getN`/`trackN`/`setN` property convention layered on top.

pub mod call;
pub mod frame;
pub mod property;
mod transfer;

pub use call::call_in_band;
pub use call::call_subchannel;
pub use call::help;
pub use call::help_entries;
pub use call::make_server;
pub use call::CallError;
pub use call::Handler;
pub use call::Server;
pub use call::Table;
pub use property::Access;
pub use property::Property;
pub use property::PropertyNotSet;
pub use transfer::get_transfer;
