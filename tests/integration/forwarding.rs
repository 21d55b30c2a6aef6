//! Argument forwarding property tests

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use luahost::{Interpreter, Value};
use proptest::prelude::*;

/// Integer arguments small enough to print as Lua literals
fn args_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-1_000_000i64..1_000_000, 0..12)
}

proptest! {
    #[test]
    fn prop_arguments_forwarded_in_order(args in args_strategy()) {
        let lua = Interpreter::new().unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        lua.register("capture", move |ctx| {
            let values: Vec<i64> = (1..=ctx.top()).filter_map(|i| ctx.to_integer(i)).collect();
            *sink.borrow_mut() = values;
            Ok(0)
        }).unwrap();

        let list = args.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ");
        lua.exec_string(&format!("capture({})", list)).unwrap();
        prop_assert_eq!(&*seen.borrow(), &args);
    }

    #[test]
    fn prop_results_returned_in_order(args in args_strategy()) {
        let lua = Interpreter::new().unwrap();
        lua.register("echo", |ctx| {
            let n = ctx.top();
            ctx.check_stack(n)?;
            for i in 1..=n {
                ctx.push_copy(i);
            }
            Ok(n)
        }).unwrap();

        let list = args.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ");
        let values = lua.eval(&format!("return echo({})", list)).unwrap();
        let expected: Vec<Value> = args.iter().map(|n| Value::Integer(*n)).collect();
        prop_assert_eq!(values, expected);
    }

    #[test]
    fn prop_ids_are_distinct(count in 1usize..40) {
        let lua = Interpreter::new().unwrap();
        let mut ids = Vec::new();
        for k in 0..count {
            let id = lua.create_function(move |ctx| {
                ctx.push_integer(k as i64);
                Ok(1)
            }).unwrap();
            lua.pop(1);
            ids.push(id.get());
        }
        let distinct: HashSet<_> = ids.iter().copied().collect();
        prop_assert_eq!(distinct.len(), count);
        prop_assert_eq!(lua.closure_count(), count);
    }
}
