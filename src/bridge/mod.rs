//! Lua embedding bridge
//!
//! Hosts a Lua 5.4 interpreter and lets Rust closures be called from scripts
//! as ordinary function values, while every host-initiated call into Lua goes
//! through a protected call that turns faults into [`BridgeError`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Rust host                                                   │
//! │                                                              │
//! │  ctx.register("inc", |ctx| ...)                              │
//! │        │                                                     │
//! │        ▼  ClosureTable.insert() → id                         │
//! │  shim: function(...) return trampoline(id, ...) end          │
//! │                                                              │
//! │  Lua script: inc(41)                                         │
//! │        │                                                     │
//! │        ▼  closure_trampoline(L)                              │
//! │  HANDLES.lookup(L) → Context → ClosureTable.get(id) → call   │
//! │                                                              │
//! │  ctx.call_protected(nargs, Returns) ──► lua_pcallk + msgh    │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  Ok(()) | Err(BridgeError::Script { diagnostic + traceback })│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Threading
//!
//! An [`Interpreter`] is `!Send`: one interpreter is driven by one thread.
//! Independent interpreters may live on different threads; the only state
//! they share is the handle registry, which is lock-protected.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::Rc;

use mlua_sys as ffi;
use tracing::debug;

use crate::util::config::BridgeConfig;

pub mod closure;
pub mod errors;
pub mod loader;
pub mod protect;
pub mod registry;
pub mod stack;

#[cfg(test)]
mod tests;

pub use closure::{ClosureId, ClosureTable, HostFunction};
pub use errors::{BridgeError, BridgeResult, FaultKind};
pub use protect::{Continuation, PanicHandler, Returns};
pub use stack::{Value, ValueType};

/// Host-side state of one embedded interpreter.
///
/// Host closures receive `&Context`; it carries the stack accessors, the
/// closure bridge, the safety net and the loaders.
pub struct Context {
    main: *mut ffi::lua_State,
    /// Thread whose stack the accessors operate on. Equal to `main` except
    /// while a trampoline runs on behalf of a coroutine.
    current: Cell<*mut ffi::lua_State>,
    config: BridgeConfig,
    closures: RefCell<ClosureTable>,
    on_panic: RefCell<Option<Rc<PanicHandler>>>,
    on_continuation: RefCell<Option<Rc<Continuation>>>,
}

impl Context {
    fn new(
        state: *mut ffi::lua_State,
        config: BridgeConfig,
    ) -> Self {
        Self {
            main: state,
            current: Cell::new(state),
            config,
            closures: RefCell::new(ClosureTable::new()),
            on_panic: RefCell::new(None),
            on_continuation: RefCell::new(None),
        }
    }

    /// The native handle, for callers that need the raw C API.
    pub fn handle(&self) -> *mut ffi::lua_State {
        self.main
    }

    pub(crate) fn state(&self) -> *mut ffi::lua_State {
        self.current.get()
    }

    /// Point the stack accessors at `thread` until the guard drops.
    pub(crate) fn enter_thread(
        &self,
        thread: *mut ffi::lua_State,
    ) -> ThreadGuard<'_> {
        let previous = self.current.replace(thread);
        ThreadGuard {
            ctx: self,
            previous,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of host closures registered so far.
    pub fn closure_count(&self) -> usize {
        self.closures.borrow().len()
    }
}

impl fmt::Debug for Context {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.main)
            .field("closures", &self.closure_count())
            .field("config", &self.config)
            .finish()
    }
}

pub(crate) struct ThreadGuard<'a> {
    ctx: &'a Context,
    previous: *mut ffi::lua_State,
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        self.ctx.current.set(self.previous);
    }
}

/// Owner of an embedded interpreter. Closes the runtime and releases its
/// registry entry on drop.
pub struct Interpreter {
    ctx: Box<Context>,
}

impl Interpreter {
    /// Create an interpreter with the default configuration.
    pub fn new() -> BridgeResult<Self> {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> BridgeResult<Self> {
        let state = unsafe { ffi::luaL_newstate() };
        if state.is_null() {
            return Err(BridgeError::StateCreation);
        }
        unsafe {
            ffi::lua_atpanic(state, protect::panic_trampoline);
            if config.open_std_libs {
                ffi::luaL_openlibs(state);
            }
        }

        let ctx = Box::new(Context::new(state, config));
        registry::HANDLES.register(state, NonNull::from(&*ctx));
        let interpreter = Self { ctx };

        if let Some(name) = interpreter.config.trampoline_global.clone() {
            interpreter.publish_trampoline(&name)?;
        }

        debug!(handle = ?state, "interpreter created");
        Ok(interpreter)
    }
}

impl Deref for Interpreter {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("Interpreter").field(&*self.ctx).finish()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        let state = self.ctx.main;
        // Finalizers run inside lua_close and may still call host closures,
        // so the registry entry has to outlive it.
        unsafe { ffi::lua_close(state) };
        registry::HANDLES.unregister(state, NonNull::from(&*self.ctx));
        debug!(
            handle = ?state,
            closures = self.ctx.closure_count(),
            "interpreter closed"
        );
    }
}
