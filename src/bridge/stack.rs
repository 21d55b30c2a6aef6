//! Stack accessors
//!
//! Thin wrappers over the C API's stack protocol: indices are 1-based from
//! the bottom or negative from the top, exactly as Lua defines them.

use std::ffi::CString;
use std::fmt;
use std::os::raw::{c_char, c_int};

use mlua_sys as ffi;

use super::errors::{BridgeError, BridgeResult};
use super::Context;

/// Type tag of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    None,
    Nil,
    Boolean,
    LightUserData,
    Number,
    String,
    Table,
    Function,
    UserData,
    Thread,
}

impl ValueType {
    fn from_raw(tag: c_int) -> Self {
        match tag {
            ffi::LUA_TNIL => ValueType::Nil,
            ffi::LUA_TBOOLEAN => ValueType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => ValueType::LightUserData,
            ffi::LUA_TNUMBER => ValueType::Number,
            ffi::LUA_TSTRING => ValueType::String,
            ffi::LUA_TTABLE => ValueType::Table,
            ffi::LUA_TFUNCTION => ValueType::Function,
            ffi::LUA_TUSERDATA => ValueType::UserData,
            ffi::LUA_TTHREAD => ValueType::Thread,
            _ => ValueType::None,
        }
    }

    /// The name Lua's `type()` reports.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::LightUserData | ValueType::UserData => "userdata",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
            ValueType::Thread => "thread",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of a stack slot. Reference types are only described by their
/// type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Other(ValueType),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Other(tag) => write!(f, "<{}>", tag),
        }
    }
}

fn c_name(name: &str) -> BridgeResult<CString> {
    CString::new(name).map_err(|_| BridgeError::InteriorNul(name.to_string()))
}

impl Context {
    pub fn top(&self) -> i32 {
        unsafe { ffi::lua_gettop(self.state()) }
    }

    pub fn set_top(
        &self,
        idx: i32,
    ) {
        unsafe { ffi::lua_settop(self.state(), idx) }
    }

    pub fn pop(
        &self,
        n: i32,
    ) {
        unsafe { ffi::lua_pop(self.state(), n) }
    }

    /// Make room for `extra` more values.
    pub fn check_stack(
        &self,
        extra: i32,
    ) -> BridgeResult<()> {
        if unsafe { ffi::lua_checkstack(self.state(), extra) } == 0 {
            return Err(BridgeError::StackOverflow(extra));
        }
        Ok(())
    }

    pub fn remove(
        &self,
        idx: i32,
    ) {
        unsafe { ffi::lua_remove(self.state(), idx) }
    }

    /// Move the top value into `idx`, shifting the values above it up.
    pub fn insert(
        &self,
        idx: i32,
    ) {
        unsafe { ffi::lua_insert(self.state(), idx) }
    }

    pub fn push_nil(&self) {
        unsafe { ffi::lua_pushnil(self.state()) }
    }

    pub fn push_boolean(
        &self,
        b: bool,
    ) {
        unsafe { ffi::lua_pushboolean(self.state(), b as c_int) }
    }

    pub fn push_integer(
        &self,
        n: i64,
    ) {
        unsafe { ffi::lua_pushinteger(self.state(), n) }
    }

    pub fn push_number(
        &self,
        n: f64,
    ) {
        unsafe { ffi::lua_pushnumber(self.state(), n) }
    }

    pub fn push_string(
        &self,
        s: &str,
    ) {
        unsafe {
            ffi::lua_pushlstring(self.state(), s.as_ptr() as *const c_char, s.len());
        }
    }

    /// Push a copy of the value at `idx`.
    pub fn push_copy(
        &self,
        idx: i32,
    ) {
        unsafe { ffi::lua_pushvalue(self.state(), idx) }
    }

    pub fn type_of(
        &self,
        idx: i32,
    ) -> ValueType {
        ValueType::from_raw(unsafe { ffi::lua_type(self.state(), idx) })
    }

    pub fn to_integer(
        &self,
        idx: i32,
    ) -> Option<i64> {
        let mut isnum = 0;
        let n = unsafe { ffi::lua_tointegerx(self.state(), idx, &mut isnum) };
        (isnum != 0).then_some(n)
    }

    pub fn to_number(
        &self,
        idx: i32,
    ) -> Option<f64> {
        let mut isnum = 0;
        let n = unsafe { ffi::lua_tonumberx(self.state(), idx, &mut isnum) };
        (isnum != 0).then_some(n)
    }

    /// Lua truthiness: everything but `nil` and `false`.
    pub fn to_boolean(
        &self,
        idx: i32,
    ) -> bool {
        unsafe { ffi::lua_toboolean(self.state(), idx) != 0 }
    }

    /// Text of a string or number slot. Numbers are converted in place, as
    /// `lua_tolstring` does.
    pub fn to_str(
        &self,
        idx: i32,
    ) -> Option<String> {
        self.with_bytes(idx, |bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Raw bytes of a string slot, e.g. a dumped chunk.
    pub fn to_bytes(
        &self,
        idx: i32,
    ) -> Option<Vec<u8>> {
        self.with_bytes(idx, <[u8]>::to_vec)
    }

    fn with_bytes<T>(
        &self,
        idx: i32,
        f: impl FnOnce(&[u8]) -> T,
    ) -> Option<T> {
        let mut len = 0usize;
        let ptr = unsafe { ffi::lua_tolstring(self.state(), idx, &mut len) };
        if ptr.is_null() {
            return None;
        }
        Some(f(unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }))
    }

    pub fn value_at(
        &self,
        idx: i32,
    ) -> Value {
        match self.type_of(idx) {
            ValueType::None | ValueType::Nil => Value::Nil,
            ValueType::Boolean => Value::Boolean(self.to_boolean(idx)),
            ValueType::Number => {
                if unsafe { ffi::lua_isinteger(self.state(), idx) } != 0 {
                    Value::Integer(self.to_integer(idx).unwrap_or_default())
                } else {
                    Value::Number(self.to_number(idx).unwrap_or_default())
                }
            }
            ValueType::String => Value::String(self.to_str(idx).unwrap_or_default()),
            other => Value::Other(other),
        }
    }

    /// Short rendering of a slot for diagnostics.
    pub(crate) fn describe(
        &self,
        idx: i32,
    ) -> String {
        match self.value_at(idx) {
            Value::String(s) => format!("{:?}", s),
            value => value.to_string(),
        }
    }

    /// Push the global `name` and return its type.
    pub fn get_global(
        &self,
        name: &str,
    ) -> BridgeResult<ValueType> {
        let name = c_name(name)?;
        self.check_stack(1)?;
        Ok(ValueType::from_raw(unsafe {
            ffi::lua_getglobal(self.state(), name.as_ptr())
        }))
    }

    /// Pop the top value into the global `name`.
    pub fn set_global(
        &self,
        name: &str,
    ) -> BridgeResult<()> {
        let name = c_name(name)?;
        unsafe { ffi::lua_setglobal(self.state(), name.as_ptr()) };
        Ok(())
    }

    /// Push `t[key]` where `t` is the value at `idx`.
    pub fn get_field(
        &self,
        idx: i32,
        key: &str,
    ) -> BridgeResult<ValueType> {
        let key = c_name(key)?;
        self.check_stack(1)?;
        Ok(ValueType::from_raw(unsafe {
            ffi::lua_getfield(self.state(), idx, key.as_ptr())
        }))
    }

    /// Pop the top value into `t[key]` where `t` is the value at `idx`.
    pub fn set_field(
        &self,
        idx: i32,
        key: &str,
    ) -> BridgeResult<()> {
        let key = c_name(key)?;
        unsafe { ffi::lua_setfield(self.state(), idx, key.as_ptr()) };
        Ok(())
    }
}
