//! luahost
//!
//! Embeds a Lua 5.4 interpreter and lets Rust closures be called from
//! scripts as first-class function values. Calls from Rust into Lua run
//! under a protected call that turns any script fault into a
//! [`BridgeError`] carrying the message and a stack traceback.
//!
//! # Example
//!
//! ```no_run
//! use luahost::{Interpreter, Result};
//!
//! fn main() -> Result<()> {
//!     let lua = Interpreter::new()?;
//!     lua.register("inc", |ctx| {
//!         let x = ctx.to_integer(1).unwrap_or(0);
//!         ctx.push_integer(x + 1);
//!         Ok(1)
//!     })?;
//!     let values = lua.eval("return inc(41)")?;
//!     assert_eq!(values[0].as_integer(), Some(42));
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/luahost")]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod util;

// Re-exports
pub use anyhow::Result;
pub use bridge::{
    BridgeError, BridgeResult, ClosureId, Context, FaultKind, Interpreter, Returns, Value,
    ValueType,
};
pub use util::config::{BridgeConfig, ChunkMode, DispatchMiss, FaultPolicy, HostConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name
pub const NAME: &str = "luahost";
