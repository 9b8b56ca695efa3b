// Bounded circular task queue. Same circular-buffer shape as the teacher's
// refresh queue, retyped to hold boxed task closures instead of u64 keys.

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct Queue {
    buf: Vec<Option<Task>>,
    head: usize,
    tail: usize,
    len: usize,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Returns `false` without enqueueing if the queue is full.
    pub fn try_push(&mut self, task: Task) -> bool {
        if self.is_full() {
            return false;
        }
        self.buf[self.head] = Some(task);
        self.head = (self.head + 1) % self.buf.len();
        self.len += 1;
        true
    }

    pub fn try_pop(&mut self) -> Option<Task> {
        if self.is_empty() {
            return None;
        }
        let task = self.buf[self.tail].take();
        self.tail = (self.tail + 1) % self.buf.len();
        self.len -= 1;
        task
    }

    pub fn clear(&mut self) {
        for slot in self.buf.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fills_and_rejects_when_full() {
        let mut q = Queue::new(2);
        assert!(q.try_push(Box::new(|| {})));
        assert!(q.try_push(Box::new(|| {})));
        assert!(!q.try_push(Box::new(|| {})));
        assert!(q.is_full());
    }

    #[test]
    fn fifo_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut q = Queue::new(4);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            let counter = counter.clone();
            q.try_push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                order.lock().unwrap().push(i);
            }));
        }
        while let Some(t) = q.try_pop() {
            t();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_drops_pending_tasks() {
        let mut q = Queue::new(4);
        q.try_push(Box::new(|| {}));
        q.try_push(Box::new(|| {}));
        q.clear();
        assert!(q.is_empty());
        assert!(q.try_pop().is_none());
    }
}
