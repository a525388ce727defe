use proptest::prelude::*;

/// Task count and pool width, with at least one task per worker.
pub fn tasks_and_workers_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..200).prop_flat_map(|tasks| (Just(tasks), 1usize..=tasks.min(16)))
}

/// Task count plus the index of the task that fails.
pub fn failing_task_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..100).prop_flat_map(|tasks| (Just(tasks), 0..tasks))
}
