//! Scripting integration tests
//!
//! Host closures, loaders and module preloading driven through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use luahost::{Interpreter, Value};

#[test]
fn test_increment_from_script() {
    let lua = Interpreter::new().unwrap();
    lua.register("inc", |ctx| {
        let x = ctx.to_integer(1).unwrap_or(0);
        ctx.push_integer(x + 1);
        Ok(1)
    })
    .unwrap();

    let values = lua.eval("return inc(41)").unwrap();
    assert_eq!(values, vec![Value::Integer(42)]);
}

#[test]
fn test_closures_are_first_class_values() {
    let lua = Interpreter::new().unwrap();
    lua.register("double", |ctx| {
        let x = ctx.to_integer(1).unwrap_or(0);
        ctx.push_integer(x * 2);
        Ok(1)
    })
    .unwrap();

    // Stored in tables, passed to other functions, called through pcall.
    let values = lua
        .eval(
            r#"
            local t = { f = double }
            local mapped = {}
            for i, v in ipairs({ 1, 2, 3 }) do mapped[i] = t.f(v) end
            local ok, r = pcall(double, 21)
            return mapped[1] + mapped[2] + mapped[3], ok, r
            "#,
        )
        .unwrap();
    assert_eq!(
        values,
        vec![Value::Integer(12), Value::Boolean(true), Value::Integer(42)]
    );
}

#[test]
fn test_closure_state_is_shared_with_host() {
    let lua = Interpreter::new().unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    lua.register("emit", move |ctx| {
        if let Some(line) = ctx.to_str(1) {
            sink.borrow_mut().push(line);
        }
        Ok(0)
    })
    .unwrap();

    lua.exec_string("for i = 1, 3 do emit('line ' .. i) end")
        .unwrap();
    assert_eq!(*log.borrow(), vec!["line 1", "line 2", "line 3"]);
}

#[test]
fn test_host_calls_back_into_script() {
    let lua = Interpreter::new().unwrap();
    lua.exec_string("function square(x) return x * x end").unwrap();
    lua.register("apply_square", |ctx| {
        let x = ctx.to_integer(1).unwrap_or(0);
        ctx.get_global("square")?;
        ctx.push_integer(x);
        ctx.call_protected(1, luahost::Returns::Count(1))?;
        Ok(1)
    })
    .unwrap();

    assert_eq!(
        lua.eval("return apply_square(9)").unwrap(),
        vec![Value::Integer(81)]
    );
}

#[test]
fn test_preloaded_module_uses_host_closure() {
    let lua = Interpreter::new().unwrap();
    lua.register("host_name", |ctx| {
        ctx.push_string("luahost");
        Ok(1)
    })
    .unwrap();
    lua.preload_module(
        "banner",
        b"local M = {}\nfunction M.text() return 'hello from ' .. host_name() end\nreturn M",
    )
    .unwrap();

    assert_eq!(
        lua.eval("return require('banner').text()").unwrap(),
        vec![Value::String("hello from luahost".to_string())]
    );
}

#[test]
fn test_interpreters_are_independent() {
    let first = Interpreter::new().unwrap();
    let second = Interpreter::new().unwrap();
    first
        .register("which", |ctx| {
            ctx.push_string("first");
            Ok(1)
        })
        .unwrap();
    second
        .register("which", |ctx| {
            ctx.push_string("second");
            Ok(1)
        })
        .unwrap();

    assert_eq!(
        first.eval("return which()").unwrap(),
        vec![Value::String("first".to_string())]
    );
    assert_eq!(
        second.eval("return which()").unwrap(),
        vec![Value::String("second".to_string())]
    );
}
