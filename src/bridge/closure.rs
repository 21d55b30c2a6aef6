//! Closure Table and Closure Bridge
//!
//! The C API only accepts statically compiled function pointers, so every
//! host closure is reached through one shared native entry point,
//! [`closure_trampoline`]. Registration stores the closure under a fresh id
//! and evaluates a one-line shim that forwards `(id, ...)` to the trampoline:
//!
//! ```lua
//! local trampoline = ...
//! return function(...) return trampoline(7, ...) end
//! ```
//!
//! The trampoline is handed to the shim as a chunk argument rather than read
//! from a global, so scripts cannot redirect calls by reassigning globals.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use mlua_sys as ffi;
use tracing::{error, trace, warn};

use super::errors::{BridgeError, BridgeResult};
use super::protect::Returns;
use super::registry;
use super::Context;
use crate::util::config::DispatchMiss;

/// A host closure callable from scripts.
///
/// It sees only the caller's arguments on the stack (positions `1..=top`),
/// pushes its results and returns how many it pushed.
pub type HostFunction = dyn Fn(&Context) -> BridgeResult<i32>;

/// Key of a host closure inside one interpreter's [`ClosureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(ffi::lua_Integer);

impl ClosureId {
    pub fn get(self) -> ffi::lua_Integer {
        self.0
    }
}

impl fmt::Display for ClosureId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-interpreter mapping from closure id to host closure.
///
/// Ids are allocated monotonically and never reused while the table lives.
pub struct ClosureTable {
    next_id: ffi::lua_Integer,
    entries: HashMap<ClosureId, Rc<HostFunction>>,
}

impl Default for ClosureTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClosureTable {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Store `function` under the next free id.
    pub fn insert(
        &mut self,
        function: Rc<HostFunction>,
    ) -> ClosureId {
        let id = ClosureId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, function);
        id
    }

    pub fn get(
        &self,
        id: ClosureId,
    ) -> Option<Rc<HostFunction>> {
        self.entries.get(&id).cloned()
    }

    /// Only used to roll back a registration whose shim failed to build; the
    /// id stays consumed.
    pub(crate) fn remove(
        &mut self,
        id: ClosureId,
    ) -> Option<Rc<HostFunction>> {
        self.entries.remove(&id)
    }

    /// The id the next insertion will receive.
    pub fn next_id(&self) -> ClosureId {
        ClosureId(self.next_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ClosureTable {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut ids: Vec<_> = self.entries.keys().map(|id| id.0).collect();
        ids.sort_unstable();
        f.debug_struct("ClosureTable")
            .field("next_id", &self.next_id)
            .field("ids", &ids)
            .finish()
    }
}

/// Source of the forwarding shim for `id`.
pub fn shim_source(id: ClosureId) -> String {
    format!(
        "local trampoline = ...\nreturn function(...) return trampoline({}, ...) end",
        id
    )
}

impl Context {
    /// Register `function` and leave its script-callable shim on top of the
    /// stack.
    pub fn create_function<F>(
        &self,
        function: F,
    ) -> BridgeResult<ClosureId>
    where
        F: Fn(&Context) -> BridgeResult<i32> + 'static,
    {
        let id = self.closures.borrow_mut().insert(Rc::new(function));
        if let Err(err) = self.push_shim(id) {
            self.closures.borrow_mut().remove(id);
            return Err(err);
        }
        trace!(id = id.get(), "registered host function");
        Ok(id)
    }

    /// Register `function` as the global `name`.
    pub fn register<F>(
        &self,
        name: &str,
        function: F,
    ) -> BridgeResult<ClosureId>
    where
        F: Fn(&Context) -> BridgeResult<i32> + 'static,
    {
        let id = self.create_function(function)?;
        self.set_global(name)?;
        Ok(id)
    }

    fn push_shim(
        &self,
        id: ClosureId,
    ) -> BridgeResult<()> {
        let source = shim_source(id);
        self.check_stack(2)?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.state(),
                source.as_ptr() as *const c_char,
                source.len(),
                c"=host function".as_ptr(),
                c"t".as_ptr(),
            )
        };
        if status != ffi::LUA_OK {
            let err = self.take_error(status);
            return Err(self.fault(err));
        }
        unsafe { ffi::lua_pushcfunction(self.state(), closure_trampoline) };
        self.call_protected(1, Returns::Count(1))
    }

    /// Expose the raw trampoline as a global, for scripts written against
    /// the `name(id, ...)` calling convention.
    pub(crate) fn publish_trampoline(
        &self,
        name: &str,
    ) -> BridgeResult<()> {
        self.check_stack(1)?;
        unsafe { ffi::lua_pushcfunction(self.state(), closure_trampoline) };
        self.set_global(name)
    }

    fn dispatch(&self) -> BridgeResult<c_int> {
        let mut isnum = 0;
        let raw = unsafe { ffi::lua_tointegerx(self.state(), 1, &mut isnum) };
        let function = if isnum != 0 {
            self.closures.borrow().get(ClosureId(raw))
        } else {
            None
        };

        let Some(function) = function else {
            return match self.config.dispatch_miss {
                DispatchMiss::Ignore => {
                    warn!(id = raw, "no host function under this id, returning nothing");
                    Ok(0)
                }
                DispatchMiss::Raise => Err(BridgeError::Host(format!(
                    "no host function registered under id {}",
                    self.describe(1)
                ))),
            };
        };

        trace!(id = raw, "dispatching host function");
        self.remove(1);
        let returned = function(self)?;
        let available = self.top();
        if returned < 0 || returned > available {
            return Err(BridgeError::Host(format!(
                "host function {} reported {} results with {} values on the stack",
                raw, returned, available
            )));
        }
        Ok(returned)
    }
}

/// Shared native entry point behind every shim.
pub(crate) unsafe extern "C-unwind" fn closure_trampoline(state: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let ctx = registry::resolve(state).inspect_err(|err| {
            error!(%err, "closure trampoline fired on an unregistered handle");
        })?;
        let _thread = ctx.enter_thread(state);
        ctx.dispatch()
    }));
    let message = match outcome {
        Ok(Ok(nresults)) => return nresults,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => panic_message(payload),
    };
    raise(state, message)
}

/// Push `message` and raise it as a foreign error.
///
/// Takes the message by value so nothing with a destructor is live when
/// `lua_error` jumps out of this frame.
pub(crate) unsafe fn raise(
    state: *mut ffi::lua_State,
    message: String,
) -> c_int {
    ffi::lua_pushlstring(state, message.as_ptr() as *const c_char, message.len());
    drop(message);
    ffi::lua_error(state)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("host function panicked: {}", s)
    } else {
        "host function panicked".to_string()
    }
}
