//! Per-edge message queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::message::Message;

/// Unbounded FIFO of messages.
///
/// Any number of producers may push concurrently. Pops come from the
/// node's single active drain and never block: an empty queue returns
/// `None`.
#[derive(Debug)]
pub struct MessageQueue {
    buf: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    /// Creates a queue with room for `capacity` messages before it grows.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends a message.
    pub fn push(&self, m: Message) {
        self.buf.lock().push_back(m);
    }

    /// Removes the oldest message, or returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<Message> {
        self.buf.lock().pop_front()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::time::Time;
    use crate::transport::DatasetId;

    fn watermark(src: u64, t: i64) -> Message {
        Message::UpdateWatermark {
            src: DatasetId(src),
            time: Time(t),
        }
    }

    fn time_of(m: &Message) -> i64 {
        match m {
            Message::UpdateWatermark { time, .. } => time.as_nanos(),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn test_fifo() {
        let q = MessageQueue::new(2);
        assert!(q.pop().is_none());
        for t in 0..5 {
            q.push(watermark(0, t));
        }
        assert_eq!(q.len(), 5);
        let order: Vec<i64> = std::iter::from_fn(|| q.pop()).map(|m| time_of(&m)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let q = Arc::new(MessageQueue::new(64));
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for t in 0..500 {
                        q.push(watermark(p, t));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut last = [-1i64; 4];
        let mut count = 0;
        while let Some(m) = q.pop() {
            let src = usize::try_from(m.src().0).unwrap();
            let t = time_of(&m);
            assert!(t > last[src]);
            last[src] = t;
            count += 1;
        }
        assert_eq!(count, 2000);
    }
}
