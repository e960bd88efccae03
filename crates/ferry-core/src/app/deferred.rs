//! Gated tasks: bodies that run once a set of chunks is ready.
//!
//! Design:
//! - Tasks are kept sorted by ascending priority; equal priorities keep
//!   insertion order.
//! - A scan walks the tasks in order. A task's chunk ids are crossed off as
//!   they become ready; a task with no ids left is removed and fired.
//! - A task never fires while a lower-priority task in front of it is still
//!   waiting, so bodies fire in ascending priority order.
//!
//! The queue only decides *what* fires. The caller runs the bodies after
//! releasing its locks.

use serde_json::Value;

use crate::domain::ChunkId;

pub type GatedBody = Box<dyn FnOnce() -> Option<Value> + Send>;

pub struct GatedTask {
    chunk_ids: Vec<ChunkId>,
    body: GatedBody,
    priority: u32,
}

impl GatedTask {
    /// Chunk ids not yet seen ready.
    pub fn remaining(&self) -> &[ChunkId] {
        &self.chunk_ids
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }
}

#[derive(Default)]
pub struct DeferredQueue {
    tasks: Vec<GatedTask>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk_ids: Vec<ChunkId>, body: GatedBody, priority: u32) {
        let at = self.tasks.partition_point(|t| t.priority <= priority);
        self.tasks.insert(
            at,
            GatedTask {
                chunk_ids,
                body,
                priority,
            },
        );
    }

    /// Remove and return the bodies of every task that is now fulfilled, in
    /// firing order.
    pub fn take_ready<F>(&mut self, is_ready: F) -> Vec<GatedBody>
    where
        F: Fn(ChunkId) -> bool,
    {
        // lowest priority seen so far that still has unready chunks
        let mut not_fulfilled = u32::MAX;
        let mut fired = Vec::new();

        let mut i = 0;
        while i < self.tasks.len() {
            let task = &mut self.tasks[i];
            let priority = task.priority;
            let mut fulfilled = true;

            task.chunk_ids.retain(|&id| {
                if not_fulfilled >= priority && is_ready(id) {
                    return false;
                }
                fulfilled = false;
                if priority < not_fulfilled {
                    not_fulfilled = priority;
                }
                true
            });

            if fulfilled {
                fired.push(self.tasks.remove(i).body);
            } else {
                i += 1;
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[GatedTask] {
        &self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn ids(raw: &[u32]) -> Vec<ChunkId> {
        raw.iter().copied().map(ChunkId::new).collect()
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> GatedBody {
        let log = log.clone();
        Box::new(move || {
            log.lock().push(name);
            None
        })
    }

    fn run(bodies: Vec<GatedBody>) -> Option<Value> {
        let mut result = None;
        for body in bodies {
            if let Some(v) = body() {
                result = Some(v);
            }
        }
        result
    }

    #[test]
    fn fires_only_when_every_chunk_is_ready() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        queue.push(ids(&[1, 2]), recorder(&log, "a"), 0);

        let mut ready: HashSet<ChunkId> = HashSet::new();
        ready.insert(ChunkId::new(1));
        assert!(queue.take_ready(|id| ready.contains(&id)).is_empty());
        assert_eq!(queue.tasks()[0].remaining(), &ids(&[2])[..]);

        ready.insert(ChunkId::new(2));
        run(queue.take_ready(|id| ready.contains(&id)));
        assert_eq!(*log.lock(), vec!["a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn fires_in_ascending_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        queue.push(ids(&[1]), recorder(&log, "p4"), 4);
        queue.push(ids(&[1]), recorder(&log, "p0"), 0);
        queue.push(ids(&[1]), recorder(&log, "p2-first"), 2);
        queue.push(ids(&[1]), recorder(&log, "p2-second"), 2);

        run(queue.take_ready(|_| true));
        assert_eq!(*log.lock(), vec!["p0", "p2-first", "p2-second", "p4"]);
    }

    #[test]
    fn waits_for_lower_priorities_still_pending() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        queue.push(ids(&[1]), recorder(&log, "p0"), 0);
        queue.push(ids(&[2]), recorder(&log, "p1"), 1);
        queue.push(ids(&[2]), recorder(&log, "p2"), 2);

        let ready = |id: ChunkId| id == ChunkId::new(2);
        run(queue.take_ready(ready));
        // chunk 2 is ready, but p0 is still waiting in front of both
        assert!(log.lock().is_empty());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.tasks()[2].remaining(), &ids(&[2])[..]);

        run(queue.take_ready(|_| true));
        assert_eq!(*log.lock(), vec!["p0", "p1", "p2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_priorities_do_not_block_each_other() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        queue.push(ids(&[1]), recorder(&log, "waiting"), 0);
        queue.push(ids(&[2]), recorder(&log, "ready"), 0);

        run(queue.take_ready(|id| id == ChunkId::new(2)));
        assert_eq!(*log.lock(), vec!["ready"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn empty_gate_fires_on_next_scan_and_result_is_last_value() {
        let mut queue = DeferredQueue::new();
        queue.push(Vec::new(), Box::new(|| Some(Value::from(1))), 0);
        queue.push(Vec::new(), Box::new(|| None), 0);
        queue.push(Vec::new(), Box::new(|| Some(Value::from(3))), 0);

        assert_eq!(run(queue.take_ready(|_| false)), Some(Value::from(3)));
    }
}
