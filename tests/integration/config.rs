//! Configuration integration tests

use std::io::Write;

use luahost::util::config::{load_config, parse_config};
use luahost::{ChunkMode, DispatchMiss, FaultPolicy, Interpreter, Value};
use tempfile::NamedTempFile;

#[test]
fn test_config_file_drives_interpreter() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[bridge]
dispatch_miss = "raise"
trampoline_global = "_____closure_fn"
"#
    )
    .unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.bridge.dispatch_miss, DispatchMiss::Raise);
    assert_eq!(config.bridge.fault_policy, FaultPolicy::Propagate);

    let lua = Interpreter::with_config(config.bridge).unwrap();
    let err = lua.eval("_____closure_fn(12345)").unwrap_err();
    assert!(err.diagnostic().unwrap().contains("12345"));
}

#[test]
fn test_missing_explicit_config_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_config(Some(dir.path().join("nope.toml").as_path())).is_err());
}

#[test]
fn test_text_only_config() {
    let config = parse_config("[bridge]\nchunk_mode = \"text\"\nopen_std_libs = true\n").unwrap();
    assert_eq!(config.bridge.chunk_mode, ChunkMode::Text);

    let lua = Interpreter::with_config(config.bridge).unwrap();
    assert_eq!(lua.eval("return 'ok'").unwrap(), vec![Value::String("ok".into())]);
}
