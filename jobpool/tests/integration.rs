//! Integration tests for jobpool
//!
//! In-process checks of the public surface: registration through `#[job]`,
//! job execution and ordered delivery. Multi-process runs are exercised by
//! the demo crate, which ships a worker binary.

use jobpool::prelude::*;
use jobpool::{
    FailureKind, JobOutcome, MinHeap, OrderedDispatcher, PoolError, execute_job, find_job,
    registered_jobs,
};
use std::sync::{Arc, Mutex};

/// Add the two positional integers.
#[job]
fn add(args: &JobArgs) -> anyhow::Result<i64> {
    Ok(args.int(0)? + args.int(1)?)
}

#[job(id = "facade.reverse", description = "reverse a list")]
fn reverse_list(args: &JobArgs) -> anyhow::Result<Vec<i64>> {
    let mut values = args.int_list(0)?.to_vec();
    values.reverse();
    Ok(values)
}

#[job]
fn checked_div(args: &JobArgs) -> anyhow::Result<i64> {
    let divisor = args.int(1)?;
    anyhow::ensure!(divisor != 0, "division by zero");
    Ok(args.int(0)? / divisor)
}

#[test]
fn test_macro_registers_jobs() {
    let def = find_job("add").expect("add is registered");
    assert_eq!(def.name, "add");
    assert_eq!(def.description, "Add the two positional integers.");

    let reverse = find_job("facade.reverse").expect("custom id is registered");
    assert_eq!(reverse.name, "reverse_list");
    assert_eq!(reverse.description, "reverse a list");

    assert!(find_job("reverse_list").is_none());
    assert!(registered_jobs().iter().any(|j| j.id == "checked_div"));
}

#[test]
fn test_execute_registered_jobs() {
    assert_eq!(
        execute_job("add", &JobArgs::new().arg(2i64).arg(40i64)),
        JobOutcome::Success(Value::Int(42))
    );
    assert_eq!(
        execute_job("facade.reverse", &JobArgs::new().arg(vec![1i64, 2, 3])),
        JobOutcome::Success(Value::IntList(vec![3, 2, 1]))
    );

    let JobOutcome::Failure(failure) = execute_job("checked_div", &JobArgs::new().arg(1i64).arg(0i64))
    else {
        panic!("division by zero should fail");
    };
    assert_eq!(failure.kind, FailureKind::Error);
    assert_eq!(failure.message, "division by zero");
}

#[test]
fn test_heap_pops_in_key_order() {
    let mut heap = MinHeap::new();
    for key in [5, 3, 8, 1, 4] {
        heap.push(key, ());
    }
    let order: Vec<i32> = std::iter::from_fn(|| heap.pop().ok().map(|e| e.key)).collect();
    assert_eq!(order, vec![1, 3, 4, 5, 8]);
}

#[test]
fn test_ordered_delivery_of_executed_jobs() {
    let dispatcher: OrderedDispatcher<Value, JobFailure> = OrderedDispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (ok, err) = (seen.clone(), seen.clone());
    dispatcher.configure(
        Some(Box::new(move |i: usize, v: Value| {
            ok.lock().unwrap().push(format!("{i}:{v}"))
        })),
        Some(Box::new(move |i: usize, f: JobFailure| {
            err.lock().unwrap().push(format!("{i}:{}", f.kind))
        })),
    );

    let jobs = [(4, 1), (1, 0), (9, 3)];
    for index in [2usize, 0, 1] {
        let (a, b) = jobs[index];
        let outcome = execute_job("checked_div", &JobArgs::new().arg(a as i64).arg(b as i64));
        dispatcher.on_completion(index, outcome.into_result());
    }

    assert_eq!(*seen.lock().unwrap(), vec!["0:4", "1:error", "2:3"]);
}

#[test]
fn test_unknown_function_rejected_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    // The test binary is its own worker binary, so its registry is checked
    let pool = Pool::builder().project_root(dir.path()).build().unwrap();

    let err = pool
        .start_multi_processing(
            vec![
                JobDescriptor::new("add").arg(1i64).arg(2i64),
                JobDescriptor::new("no_such_job"),
            ],
            Callbacks::new(),
            RunOptions::default(),
        )
        .unwrap_err();

    match err {
        PoolError::UnknownFunction { index, function } => {
            assert_eq!(index, 1);
            assert_eq!(function, "no_such_job");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!pool.is_running());
    assert!(pool.results().is_empty());
}
