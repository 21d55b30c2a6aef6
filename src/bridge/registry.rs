//! Handle Registry
//!
//! Native trampolines receive nothing but the bare `lua_State` pointer. This
//! module maps that pointer back to the [`Context`] that owns it.
//!
//! # Lifecycle
//!
//! ```text
//! Interpreter::new()  ──► HANDLES.register(state, ctx)
//!        │
//!        ▼  trampolines fire
//! HANDLES.lookup(state) ──► &Context
//!        │
//!        ▼
//! Drop for Interpreter ──► lua_close(state) ──► HANDLES.unregister(state, ctx)
//! ```
//!
//! Entries are removed only when the stored context matches the caller's, so
//! a late teardown never evicts a newer interpreter that the allocator
//! happened to place at the same address.

use std::collections::HashMap;
use std::ptr::NonNull;

use mlua_sys as ffi;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use super::errors::{BridgeError, BridgeResult};
use super::Context;

/// Process-wide registry of live interpreters.
pub(crate) static HANDLES: Lazy<HandleRegistry<Context>> = Lazy::new(HandleRegistry::new);

/// Number of interpreters currently registered in this process.
pub fn registered_interpreters() -> usize {
    HANDLES.len()
}

/// Whether `handle` currently resolves to a live interpreter.
pub fn is_registered(handle: *mut ffi::lua_State) -> bool {
    HANDLES.contains(handle)
}

struct ContextPtr<T>(NonNull<T>);

// The registry only stores and hands back the pointer; dereferencing it is
// confined to the thread driving the owning interpreter.
unsafe impl<T> Send for ContextPtr<T> {}
unsafe impl<T> Sync for ContextPtr<T> {}

/// Map from native handle to the host-side context that owns it.
pub struct HandleRegistry<T> {
    entries: RwLock<HashMap<usize, ContextPtr<T>>>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Associate `handle` with `ctx`. Returns the entry this replaced, which
    /// only happens when a dead interpreter's entry was never removed.
    pub fn register(
        &self,
        handle: *mut ffi::lua_State,
        ctx: NonNull<T>,
    ) -> Option<NonNull<T>> {
        let previous = self
            .entries
            .write()
            .insert(handle as usize, ContextPtr(ctx))
            .map(|p| p.0);
        if previous.is_some() {
            warn!(handle = ?handle, "replaced a stale handle registry entry");
        }
        previous
    }

    /// Resolve `handle` to its context.
    pub fn lookup(
        &self,
        handle: *mut ffi::lua_State,
    ) -> BridgeResult<NonNull<T>> {
        self.entries
            .read()
            .get(&(handle as usize))
            .map(|p| p.0)
            .ok_or(BridgeError::UnknownHandle(handle as usize))
    }

    /// Remove `handle` if it still belongs to `ctx`.
    pub fn unregister(
        &self,
        handle: *mut ffi::lua_State,
        ctx: NonNull<T>,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&(handle as usize)) {
            Some(current) if current.0 == ctx => {
                entries.remove(&(handle as usize));
                true
            }
            _ => false,
        }
    }

    pub fn contains(
        &self,
        handle: *mut ffi::lua_State,
    ) -> bool {
        self.entries.read().contains_key(&(handle as usize))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Resolve the context for a handle received by a trampoline.
///
/// Coroutines run on their own `lua_State`, so a miss on the received handle
/// is retried with the main thread of the same runtime.
///
/// # Safety
/// `state` must be a valid handle for the duration of the call, and the
/// returned reference must not outlive the owning interpreter.
pub(crate) unsafe fn resolve<'a>(state: *mut ffi::lua_State) -> BridgeResult<&'a Context> {
    match HANDLES.lookup(state) {
        Ok(ctx) => Ok(&*ctx.as_ptr()),
        Err(err) => {
            let main = main_thread(state);
            if main.is_null() || main == state {
                return Err(err);
            }
            HANDLES.lookup(main).map(|ctx| &*ctx.as_ptr())
        }
    }
}

unsafe fn main_thread(state: *mut ffi::lua_State) -> *mut ffi::lua_State {
    ffi::lua_rawgeti(state, ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_MAINTHREAD);
    let main = ffi::lua_tothread(state, -1);
    ffi::lua_pop(state, 1);
    main
}
