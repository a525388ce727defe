//! Task queue drained by pool workers.

use crossbeam::queue::SegQueue;
use std::fmt;

/// A deferred unit of work. It receives the worker's exclusive context.
pub type Task<C> = Box<dyn FnOnce(&mut C) -> anyhow::Result<()> + Send + 'static>;

/// Lock-free multi-consumer queue of tasks. Ordering across workers is not
/// guaranteed, so tasks must be independent of each other.
pub struct TaskQueue<C> {
    tasks: SegQueue<Task<C>>,
}

impl<C> TaskQueue<C> {
    pub fn new() -> Self {
        Self {
            tasks: SegQueue::new(),
        }
    }

    pub fn push<F>(&self, task: F)
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + Send + 'static,
    {
        self.tasks.push(Box::new(task));
    }

    /// Non-blocking dequeue; `None` means the queue is exhausted.
    pub(crate) fn pop(&self) -> Option<Task<C>> {
        self.tasks.pop()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskQueue<()> {
    /// Push a task that needs no worker context.
    pub fn push_fn<F>(&self, task: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push(move |_: &mut ()| task());
    }
}

impl<C> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TaskQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_until_exhausted() {
        let queue = TaskQueue::<u32>::new();
        queue.push(|ctx| {
            *ctx += 1;
            Ok(())
        });
        queue.push(|ctx| {
            *ctx += 10;
            Ok(())
        });
        assert_eq!(queue.len(), 2);

        let mut context = 0;
        while let Some(task) = queue.pop() {
            task(&mut context).unwrap();
        }
        assert_eq!(context, 11);
        assert!(queue.is_empty());
    }
}
