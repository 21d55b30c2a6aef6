//! Bridge errors

use std::fmt;
use std::os::raw::c_int;
use std::path::PathBuf;

use mlua_sys as ffi;
use thiserror::Error;

use super::stack::ValueType;

/// Bridge result
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Classification of a failed foreign call, taken from the runtime's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Runtime,
    Syntax,
    Memory,
    /// The message handler itself failed while composing the diagnostic.
    MessageHandler,
    File,
    Unknown(i32),
}

impl FaultKind {
    /// Map a non-OK status returned by `lua_pcallk` or `luaL_load*`.
    pub fn from_status(status: c_int) -> Self {
        match status {
            ffi::LUA_ERRRUN => FaultKind::Runtime,
            ffi::LUA_ERRSYNTAX => FaultKind::Syntax,
            ffi::LUA_ERRMEM => FaultKind::Memory,
            ffi::LUA_ERRERR => FaultKind::MessageHandler,
            ffi::LUA_ERRFILE => FaultKind::File,
            other => FaultKind::Unknown(other),
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FaultKind::Runtime => write!(f, "runtime error"),
            FaultKind::Syntax => write!(f, "syntax error"),
            FaultKind::Memory => write!(f, "memory error"),
            FaultKind::MessageHandler => write!(f, "error in message handler"),
            FaultKind::File => write!(f, "file error"),
            FaultKind::Unknown(status) => write!(f, "unknown error (status {})", status),
        }
    }
}

/// Bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to allocate interpreter state")]
    StateCreation,

    /// A fault raised inside foreign code. `diagnostic` is the runtime's
    /// message, with traceback when it came out of a protected call.
    #[error("{kind}: {diagnostic}")]
    Script { kind: FaultKind, diagnostic: String },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown interpreter handle {0:#x}")]
    UnknownHandle(usize),

    #[error("call needs {required} stack values, only {available} present")]
    StackUnderflow { required: i32, available: i32 },

    #[error("invalid result count {0}")]
    InvalidResultCount(i32),

    #[error("cannot grow the stack by {0} slots")]
    StackOverflow(i32),

    #[error("string contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    #[error("package library is not loaded")]
    MissingPackageLibrary,

    #[error("module {module} returned a {found}, not a table")]
    ModuleNotTable { module: String, found: ValueType },

    #[error("module {module} has no function {name}")]
    MissingFunction { module: String, name: String },

    /// Raised by host closures; surfaces in scripts as the error message.
    #[error("{0}")]
    Host(String),
}

impl BridgeError {
    /// The diagnostic text exactly as the foreign runtime composed it, when
    /// this error came from foreign code.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            BridgeError::Script { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<FaultKind> {
        match self {
            BridgeError::Script { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        BridgeError::Host(message.into())
    }
}
