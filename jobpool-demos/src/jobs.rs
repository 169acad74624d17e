//! Demo job functions.
//!
//! Small on purpose: each one exists to exercise a path through the pool
//! (ordinary values, returned errors, panics, dead workers, slow jobs).

use anyhow::{bail, ensure};
use jobpool::{JobArgs, job};
use std::time::Duration;

/// Square an integer.
#[job]
fn square(args: &JobArgs) -> anyhow::Result<i64> {
    let x = args.int(0)?;
    x.checked_mul(x)
        .ok_or_else(|| anyhow::anyhow!("{x} squared overflows"))
}

/// Square an integer after sleeping `ms` milliseconds.
#[job]
fn delayed_square(args: &JobArgs) -> anyhow::Result<i64> {
    let x = args.int(0)?;
    let ms = args.int(1)?;
    ensure!(ms >= 0, "negative delay {ms}");
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(x * x)
}

/// Square an integer, failing when it equals the `fail_on` keyword.
#[job]
fn square_unless(args: &JobArgs) -> anyhow::Result<i64> {
    let x = args.int(0)?;
    if args.get_kwarg("fail_on").and_then(|v| v.as_int()) == Some(x) {
        bail!("refusing to square {x}");
    }
    Ok(x * x)
}

/// Always return an error.
#[job]
fn always_fail(args: &JobArgs) -> anyhow::Result<()> {
    let reason = args.str(0).unwrap_or("asked to fail");
    bail!("{reason}")
}

/// Panic inside the worker.
#[job]
fn explode(_args: &JobArgs) -> anyhow::Result<()> {
    panic!("demo job exploded")
}

/// Kill the worker process outright.
#[job]
fn crash_worker(_args: &JobArgs) -> anyhow::Result<()> {
    std::process::abort()
}

/// Sleep for `ms` milliseconds and return it.
#[job]
fn sleep_ms(args: &JobArgs) -> anyhow::Result<i64> {
    let ms = args.int(0)?;
    ensure!(ms >= 0, "negative delay {ms}");
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(ms)
}

/// Report the worker's OS scheduling priority (nice value).
#[job]
fn nice_value(_args: &JobArgs) -> anyhow::Result<i64> {
    Ok(current_nice())
}

/// Sort a list with insertion sort.
#[job]
fn insertion_sort(args: &JobArgs) -> anyhow::Result<Vec<i64>> {
    let mut values = args.int_list(0)?.to_vec();
    insertion_sort_in_place(&mut values);
    Ok(values)
}

/// Sort a list with three-way quicksort.
#[job]
fn quick_sort(args: &JobArgs) -> anyhow::Result<Vec<i64>> {
    let mut values = args.int_list(0)?.to_vec();
    quick_sort_3way(&mut values);
    Ok(values)
}

pub(crate) fn current_nice() -> i64 {
    #[cfg(unix)]
    {
        // -1 is also a valid nice value, so errors are indistinguishable here
        unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) as i64 }
    }
    #[cfg(not(unix))]
    {
        0
    }
}

fn insertion_sort_in_place(values: &mut [i64]) {
    for i in 1..values.len() {
        let mut j = i;
        while j > 0 && values[j - 1] > values[j] {
            values.swap(j - 1, j);
            j -= 1;
        }
    }
}

fn quick_sort_3way(values: &mut [i64]) {
    if values.len() <= 1 {
        return;
    }
    let pivot = values[values.len() / 2];
    // [0, lt) < pivot, [lt, i) == pivot, (gt, len) > pivot
    let (mut lt, mut i, mut gt) = (0, 0, values.len());
    while i < gt {
        if values[i] < pivot {
            values.swap(lt, i);
            lt += 1;
            i += 1;
        } else if values[i] > pivot {
            gt -= 1;
            values.swap(i, gt);
        } else {
            i += 1;
        }
    }
    let (low, rest) = values.split_at_mut(lt);
    quick_sort_3way(low);
    quick_sort_3way(&mut rest[gt - lt..]);
}
