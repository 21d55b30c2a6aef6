//! Fault handling integration tests

use luahost::{BridgeError, FaultKind, Interpreter, Returns, Value};

#[test]
fn test_script_error_does_not_poison_interpreter() {
    let lua = Interpreter::new().unwrap();
    let err = lua.eval("error('first failure')").unwrap_err();
    assert!(err.diagnostic().unwrap().contains("first failure"));

    assert_eq!(lua.eval("return 2 * 21").unwrap(), vec![Value::Integer(42)]);
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_diagnostic_includes_traceback_through_functions() {
    let lua = Interpreter::new().unwrap();
    lua.exec_string(
        r#"
        local function inner() error("deep failure") end
        function outer() inner() end
        "#,
    )
    .unwrap();

    lua.get_global("outer").unwrap();
    let err = lua.call_protected(0, Returns::Count(0)).unwrap_err();
    let diagnostic = err.diagnostic().unwrap();
    assert!(diagnostic.contains("deep failure"));
    assert!(diagnostic.contains("stack traceback:"));
    assert!(diagnostic.contains("outer"));
}

#[test]
fn test_error_display_is_prefixed_with_kind() {
    let lua = Interpreter::new().unwrap();
    let err = lua.exec_string("return (").unwrap_err();
    assert_eq!(err.kind(), Some(FaultKind::Syntax));
    assert!(err.to_string().starts_with("syntax error: "));
}

#[test]
fn test_host_error_reaches_script_pcall() {
    let lua = Interpreter::new().unwrap();
    lua.register("reject", |ctx| {
        let reason = ctx.to_str(1).unwrap_or_default();
        Err(BridgeError::host(format!("rejected: {}", reason)))
    })
    .unwrap();

    let values = lua
        .eval("local ok, err = pcall(reject, 'bad input') return ok, err")
        .unwrap();
    assert_eq!(
        values,
        vec![
            Value::Boolean(false),
            Value::String("rejected: bad input".to_string())
        ]
    );
}

#[test]
fn test_error_in_closure_inside_coroutine() {
    let lua = Interpreter::new().unwrap();
    lua.register("fail", |_| Err(BridgeError::host("coroutine failure")))
        .unwrap();

    let values = lua
        .eval("local co = coroutine.create(function() fail() end) return coroutine.resume(co)")
        .unwrap();
    assert_eq!(values[0], Value::Boolean(false));
    assert!(values[1].as_str().unwrap().contains("coroutine failure"));
}
