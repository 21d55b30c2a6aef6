//! Protected-Call Safety Net
//!
//! Every host-initiated call into Lua runs under `lua_pcallk` with
//! [`message_handler`] installed below the callee:
//!
//! ```text
//! before:  [... f a1 .. an]            base = top - n
//! call:    [... msgh f a1 .. an]       lua_pcallk(n, r, errfunc = base)
//! ok:      [... r1 .. rk]              msgh removed
//! error:   [... "msg\nstack traceback:\n..."]  popped into BridgeError
//! ```
//!
//! The non-local jump Lua performs on error never leaves `lua_pcallk`; the
//! caller only ever sees a `BridgeResult`.

use std::ffi::CStr;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use mlua_sys as ffi;
use tracing::{debug, error};

use super::errors::{BridgeError, BridgeResult, FaultKind};
use super::registry;
use super::Context;
use crate::util::config::FaultPolicy;

/// Hook run by the panic trampoline when Lua hits an unprotected error. Lua
/// aborts the process once it returns.
pub type PanicHandler = dyn Fn(&Context) -> i32;

/// Continuation run by `lua_pcallk` when a yield resumes into it. Receives
/// the call status and the context value passed to
/// [`Context::call_protected_k`].
pub type Continuation = dyn Fn(&Context, i32, isize) -> i32;

/// How many results a call should leave on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    Count(i32),
    /// Every value the callee returns.
    All,
}

impl Returns {
    fn raw(self) -> c_int {
        match self {
            Returns::Count(n) => n,
            Returns::All => ffi::LUA_MULTRET,
        }
    }
}

impl From<i32> for Returns {
    fn from(n: i32) -> Self {
        if n == ffi::LUA_MULTRET {
            Returns::All
        } else {
            Returns::Count(n)
        }
    }
}

impl Context {
    /// Call the function below the top `nargs` values under the safety net.
    ///
    /// On success the function and its arguments are replaced by its
    /// results. On failure they are removed and the composed diagnostic is
    /// returned (or the process exits, under [`FaultPolicy::Exit`]).
    pub fn call_protected(
        &self,
        nargs: i32,
        returns: Returns,
    ) -> BridgeResult<()> {
        self.pcall(nargs, returns, 0, None)
    }

    /// [`call_protected`](Self::call_protected) with a continuation, for
    /// calls that may be resumed after a yield. The continuation replaces any
    /// previously installed one.
    pub fn call_protected_k<F>(
        &self,
        nargs: i32,
        returns: Returns,
        ctx: isize,
        continuation: F,
    ) -> BridgeResult<()>
    where
        F: Fn(&Context, i32, isize) -> i32 + 'static,
    {
        self.set_continuation(continuation);
        self.pcall(nargs, returns, ctx, Some(continuation_trampoline))
    }

    pub fn set_continuation<F>(
        &self,
        continuation: F,
    ) where
        F: Fn(&Context, i32, isize) -> i32 + 'static,
    {
        *self.on_continuation.borrow_mut() = Some(Rc::new(continuation));
    }

    /// Install the hook run when Lua panics. The last one installed wins.
    pub fn set_panic_handler<F>(
        &self,
        handler: F,
    ) where
        F: Fn(&Context) -> i32 + 'static,
    {
        *self.on_panic.borrow_mut() = Some(Rc::new(handler));
        unsafe { ffi::lua_atpanic(self.state(), panic_trampoline) };
    }

    /// Call without the safety net.
    ///
    /// # Safety
    /// A Lua error raised by the callee performs a non-local jump to the
    /// nearest enclosing protected call, skipping every Rust frame in
    /// between without running destructors. With no enclosing protected
    /// call the runtime panics and aborts the process. Only use this where
    /// the callee is known not to fail, or from code that holds nothing with
    /// a destructor.
    ///
    /// Stack underflow and bad result counts are still reported as errors
    /// before the call is made.
    pub unsafe fn call_unprotected(
        &self,
        nargs: i32,
        returns: Returns,
    ) -> BridgeResult<()> {
        self.prepare_call(nargs, returns)?;
        ffi::lua_callk(self.state(), nargs, returns.raw(), 0, None);
        Ok(())
    }

    /// Check that the callee and its arguments are present and reserve room
    /// for the results plus the message handler slot.
    fn prepare_call(
        &self,
        nargs: i32,
        returns: Returns,
    ) -> BridgeResult<()> {
        let top = self.top();
        if nargs < 0 || top < nargs + 1 {
            return Err(BridgeError::StackUnderflow {
                required: nargs + 1,
                available: top,
            });
        }
        // lua_pcallk and lua_callk require the fixed results to fit in the
        // current frame; they do not grow the stack themselves.
        let extra = match returns {
            Returns::Count(n) if n < 0 => return Err(BridgeError::InvalidResultCount(n)),
            Returns::Count(n) => (n - nargs).max(0).saturating_add(1),
            Returns::All => 1,
        };
        self.check_stack(extra)
    }

    fn pcall(
        &self,
        nargs: i32,
        returns: Returns,
        kctx: isize,
        k: Option<ffi::lua_KFunction>,
    ) -> BridgeResult<()> {
        self.prepare_call(nargs, returns)?;

        let base = self.top() - nargs;
        let status = unsafe {
            ffi::lua_pushcfunction(self.state(), message_handler);
            ffi::lua_insert(self.state(), base);
            let status = ffi::lua_pcallk(self.state(), nargs, returns.raw(), base, kctx, k);
            ffi::lua_remove(self.state(), base);
            status
        };

        if status == ffi::LUA_OK {
            return Ok(());
        }
        let err = self.take_error(status);
        debug!(kind = %FaultKind::from_status(status), "protected call failed");
        Err(self.fault(err))
    }

    /// Pop the error value left by a failed load or call.
    pub(crate) fn take_error(
        &self,
        status: c_int,
    ) -> BridgeError {
        let diagnostic = self
            .to_str(-1)
            .unwrap_or_else(|| format!("(error object is a {} value)", self.type_of(-1).name()));
        self.pop(1);
        BridgeError::Script {
            kind: FaultKind::from_status(status),
            diagnostic,
        }
    }

    /// Apply the configured [`FaultPolicy`] to a failure about to be
    /// reported.
    pub(crate) fn fault(
        &self,
        err: BridgeError,
    ) -> BridgeError {
        match self.config.fault_policy {
            FaultPolicy::Propagate => err,
            FaultPolicy::Exit => {
                error!(handle = ?self.handle(), %err, "unrecoverable script fault");
                eprintln!("{}", err);
                std::process::exit(1)
            }
        }
    }
}

/// Message handler installed under every protected call.
///
/// Turns the raw error value into text (via `__tostring` when it is not a
/// string) and appends a traceback of the failing stack.
unsafe extern "C-unwind" fn message_handler(state: *mut ffi::lua_State) -> c_int {
    if ffi::lua_type(state, 1) != ffi::LUA_TSTRING && ffi::lua_type(state, 1) != ffi::LUA_TNUMBER {
        let rendered = ffi::luaL_callmeta(state, 1, c"__tostring".as_ptr()) != 0
            && ffi::lua_type(state, -1) == ffi::LUA_TSTRING;
        if !rendered {
            ffi::lua_pushstring(state, c"(error object is a ".as_ptr());
            ffi::lua_pushstring(state, ffi::lua_typename(state, ffi::lua_type(state, 1)));
            ffi::lua_pushstring(state, c" value)".as_ptr());
            ffi::lua_concat(state, 3);
        }
        // Both branches left the text on top; drop the original value.
        ffi::lua_replace(state, 1);
        ffi::lua_settop(state, 1);
    }
    let message = ffi::lua_tolstring(state, 1, std::ptr::null_mut());
    ffi::luaL_traceback(state, state, message, 1);
    1
}

/// Native slot registered with `lua_atpanic`.
pub(crate) unsafe extern "C-unwind" fn panic_trampoline(state: *mut ffi::lua_State) -> c_int {
    let message = if ffi::lua_type(state, -1) == ffi::LUA_TSTRING {
        CStr::from_ptr(ffi::lua_tolstring(state, -1, std::ptr::null_mut()))
            .to_string_lossy()
            .into_owned()
    } else {
        "error object is not a string".to_string()
    };
    error!(handle = ?state, %message, "unprotected error in Lua runtime");

    let Ok(ctx) = registry::resolve(state) else {
        return 0;
    };
    let handler = ctx.on_panic.borrow().clone();
    match handler {
        Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| {
            let _thread = ctx.enter_thread(state);
            handler(ctx)
        }))
        .unwrap_or(0),
        None => 0,
    }
}

/// Native slot passed to `lua_pcallk`.
pub(crate) unsafe extern "C-unwind" fn continuation_trampoline(
    state: *mut ffi::lua_State,
    status: c_int,
    kctx: ffi::lua_KContext,
) -> c_int {
    let Ok(ctx) = registry::resolve(state) else {
        error!(handle = ?state, "continuation fired on an unregistered handle");
        return 0;
    };
    let continuation = ctx.on_continuation.borrow().clone();
    match continuation {
        Some(continuation) => panic::catch_unwind(AssertUnwindSafe(|| {
            let _thread = ctx.enter_thread(state);
            continuation(ctx, status, kctx)
        }))
        .unwrap_or(0),
        None => 0,
    }
}
