//! Ordered Completion Dispatcher
//!
//! Turns an unordered stream of `(index, outcome)` completions into callback
//! invocations in strictly ascending index order. Early arrivals are parked in
//! a [`MinHeap`] until every smaller index has been delivered.
//!
//! Callbacks run while the dispatcher lock is held. A slow callback therefore
//! delays admission of later completions, but callers see one serialized
//! stream and may use plain `FnMut` closures.

use crate::heap::{HeapEntry, MinHeap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard};

/// Handler for successful outcomes: `(index, payload)`
pub type SuccessCallback<T> = Box<dyn FnMut(usize, T) + Send>;

/// Handler for failed outcomes: `(index, error)`
pub type ErrorCallback<E> = Box<dyn FnMut(usize, E) + Send>;

struct DispatchState<T, E> {
    next_expected: usize,
    pending: MinHeap<usize, Result<T, E>>,
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback<E>>,
}

/// Reorders completions by submission index before handing them to callbacks
pub struct OrderedDispatcher<T, E> {
    state: Mutex<DispatchState<T, E>>,
}

impl<T, E> Default for OrderedDispatcher<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> OrderedDispatcher<T, E> {
    /// Create a dispatcher with no callbacks installed
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DispatchState {
                next_expected: 0,
                pending: MinHeap::new(),
                on_success: None,
                on_error: None,
            }),
        }
    }

    // A panicking callback is caught before it can poison the lock, but stay
    // usable even if that ever changes.
    fn lock(&self) -> MutexGuard<'_, DispatchState<T, E>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the handlers for the next batch. `None` discards that kind of
    /// outcome after it has taken its ordered slot.
    pub fn configure(
        &self,
        on_success: Option<SuccessCallback<T>>,
        on_error: Option<ErrorCallback<E>>,
    ) {
        let mut state = self.lock();
        state.on_success = on_success;
        state.on_error = on_error;
    }

    /// Forget buffered completions and restart numbering at 0
    pub fn reset(&self) {
        let mut state = self.lock();
        state.pending.clear();
        state.next_expected = 0;
    }

    /// Remove the installed handlers, dropping any state they captured
    pub fn clear_callbacks(&self) {
        self.configure(None, None);
    }

    /// Index the dispatcher is waiting for; also the count delivered so far
    pub fn next_expected(&self) -> usize {
        self.lock().next_expected
    }

    /// Number of outcomes handed to the callbacks since the last reset
    pub fn delivered(&self) -> usize {
        self.lock().next_expected
    }

    /// Number of completions parked behind a missing index
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Accept one completion and release every outcome that is now in order.
    ///
    /// Returns how many callbacks were released by this call. Indices that
    /// were already delivered or are already parked are dropped with a
    /// warning.
    pub fn on_completion(&self, index: usize, outcome: Result<T, E>) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;

        if index < state.next_expected || state.pending.iter().any(|e| e.key == index) {
            tracing::warn!(index, "duplicate completion ignored");
            return 0;
        }

        tracing::debug!(
            index,
            next_expected = state.next_expected,
            "completion received"
        );
        state.pending.insert(HeapEntry::new(index, outcome));

        let mut released = 0;
        while state.pending.peek_key() == Some(&state.next_expected) {
            let Ok(entry) = state.pending.pop() else {
                break;
            };
            let (index, outcome) = entry.into_parts();
            match outcome {
                Ok(payload) => deliver(index, payload, state.on_success.as_mut(), "callback"),
                Err(error) => deliver(index, error, state.on_error.as_mut(), "error callback"),
            }
            state.next_expected += 1;
            released += 1;
            debug_assert!(state.pending.validate().is_ok());
        }
        released
    }
}

fn deliver<A>(
    index: usize,
    value: A,
    callback: Option<&mut Box<dyn FnMut(usize, A) + Send>>,
    kind: &'static str,
) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(index, value))) {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        tracing::error!(index, kind, %message, "callback panicked; continuing delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Ok(usize, u64),
        Err(usize, String),
    }

    fn recording() -> (OrderedDispatcher<u64, String>, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = OrderedDispatcher::new();
        let ok_log = Arc::clone(&seen);
        let err_log = Arc::clone(&seen);
        dispatcher.configure(
            Some(Box::new(move |i: usize, v: u64| {
                ok_log.lock().unwrap().push(Seen::Ok(i, v))
            })),
            Some(Box::new(move |i: usize, e: String| {
                err_log.lock().unwrap().push(Seen::Err(i, e))
            })),
        );
        (dispatcher, seen)
    }

    #[test]
    fn test_squares_out_of_order() {
        let (dispatcher, seen) = recording();
        for i in [2usize, 0, 4, 1, 3] {
            dispatcher.on_completion(i, Ok((i * i) as u64));
        }
        let expected: Vec<_> = (0..5).map(|i| Seen::Ok(i, (i * i) as u64)).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(dispatcher.next_expected(), 5);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_release_counts() {
        let (dispatcher, _seen) = recording();
        assert_eq!(dispatcher.on_completion(2, Ok(4)), 0);
        assert_eq!(dispatcher.on_completion(1, Ok(1)), 0);
        assert_eq!(dispatcher.pending(), 2);
        assert_eq!(dispatcher.on_completion(0, Ok(0)), 3);
    }

    #[test]
    fn test_error_keeps_its_slot() {
        let (dispatcher, seen) = recording();
        dispatcher.on_completion(2, Ok(2));
        dispatcher.on_completion(1, Err("boom".to_string()));
        dispatcher.on_completion(0, Ok(0));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Ok(0, 0),
                Seen::Err(1, "boom".to_string()),
                Seen::Ok(2, 2)
            ]
        );
    }

    #[test]
    fn test_any_permutation_is_delivered_in_order() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let (dispatcher, seen) = recording();
            let mut order: Vec<usize> = (0..40).collect();
            order.shuffle(&mut rng);
            for i in order {
                dispatcher.on_completion(i, Ok(i as u64));
            }
            let delivered: Vec<usize> = seen
                .lock()
                .unwrap()
                .iter()
                .map(|s| match s {
                    Seen::Ok(i, _) | Seen::Err(i, _) => *i,
                })
                .collect();
            assert_eq!(delivered, (0..40).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_concurrent_completions() {
        let (dispatcher, seen) = recording();
        let dispatcher = Arc::new(dispatcher);
        let mut order: Vec<usize> = (0..200).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));

        std::thread::scope(|s| {
            for chunk in order.chunks(25) {
                let dispatcher = Arc::clone(&dispatcher);
                s.spawn(move || {
                    for &i in chunk {
                        dispatcher.on_completion(i, Ok(i as u64));
                    }
                });
            }
        });

        let expected: Vec<_> = (0..200).map(|i| Seen::Ok(i, i as u64)).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let dispatcher: OrderedDispatcher<u64, String> = OrderedDispatcher::new();
        dispatcher.configure(
            Some(Box::new(move |i: usize, v: u64| {
                if i == 1 {
                    panic!("callback failure");
                }
                log.lock().unwrap().push((i, v));
            })),
            None,
        );
        for i in [1usize, 2, 0] {
            dispatcher.on_completion(i, Ok(i as u64 * 10));
        }
        assert_eq!(*seen.lock().unwrap(), vec![(0, 0), (2, 20)]);
        assert_eq!(dispatcher.next_expected(), 3);
    }

    #[test]
    fn test_missing_callbacks_still_advance() {
        let dispatcher: OrderedDispatcher<u64, String> = OrderedDispatcher::new();
        dispatcher.on_completion(1, Err("x".to_string()));
        dispatcher.on_completion(0, Ok(0));
        assert_eq!(dispatcher.next_expected(), 2);
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let (dispatcher, seen) = recording();
        dispatcher.on_completion(1, Ok(1));
        assert_eq!(dispatcher.on_completion(1, Ok(100)), 0);
        dispatcher.on_completion(0, Ok(0));
        assert_eq!(dispatcher.on_completion(0, Ok(100)), 0);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_reset_starts_a_new_batch() {
        let (dispatcher, seen) = recording();
        dispatcher.on_completion(0, Ok(0));
        dispatcher.on_completion(2, Ok(2));
        dispatcher.reset();
        assert_eq!(dispatcher.next_expected(), 0);
        assert_eq!(dispatcher.pending(), 0);

        dispatcher.on_completion(0, Ok(7));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Ok(0, 0), Seen::Ok(0, 7)]
        );
    }
}
