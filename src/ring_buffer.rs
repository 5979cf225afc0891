use std::sync::Mutex;

/// A fixed-capacity circular store: once full, a push overwrites the oldest
///  slot. [`RingBuffer::snapshot`] returns the stored elements oldest to
///  newest and is safe to call while the receive task is pushing concurrently -
///  both operations run under the internal lock, so a snapshot never observes
///  a partially written slot.
pub struct RingBuffer<T> {
    inner: Mutex<BufferImpl<T>>,
}

impl<T: Clone> RingBuffer<T> {
    /// Panics if `capacity` is zero - a zero-capacity ring has no meaningful
    ///  semantics for either push or snapshot.
    pub fn new(capacity: usize) -> RingBuffer<T> {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        RingBuffer {
            inner: Mutex::new(BufferImpl::new(capacity)),
        }
    }

    pub fn push(&self, value: T) {
        self.inner.lock().unwrap()
            .push(value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns between 0 and `capacity` elements, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().unwrap()
            .snapshot()
    }
}

enum BufferImpl<T> {
    Growing { buf: Vec<T>, capacity: usize },
    Ring { buf: Vec<T>, next: usize },
}
impl<T: Clone> BufferImpl<T> {
    fn new(capacity: usize) -> BufferImpl<T> {
        BufferImpl::Growing {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn len(&self) -> usize {
        match self {
            BufferImpl::Growing { buf, .. } => buf.len(),
            BufferImpl::Ring { buf, .. } => buf.len(),
        }
    }

    fn push(&mut self, value: T) {
        match self {
            BufferImpl::Growing { buf, capacity } => {
                buf.push(value);
                if buf.len() == *capacity {
                    let buf = std::mem::take(buf);
                    *self = BufferImpl::Ring { buf, next: 0 };
                }
            }
            BufferImpl::Ring { buf, next } => {
                buf[*next] = value;
                *next = (*next + 1) % buf.len();
            }
        }
    }

    fn snapshot(&self) -> Vec<T> {
        match self {
            BufferImpl::Growing { buf, .. } => buf.clone(),
            BufferImpl::Ring { buf, next } => {
                // `next` is both the insert position and the oldest slot
                let mut view = Vec::with_capacity(buf.len());
                view.extend_from_slice(&buf[*next..]);
                view.extend_from_slice(&buf[..*next]);
                view
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::empty(3, 0, vec![])]
    #[case::partially_filled(3, 2, vec![0, 1])]
    #[case::exactly_full(3, 3, vec![0, 1, 2])]
    #[case::one_wrap(3, 4, vec![1, 2, 3])]
    #[case::several_wraps(3, 11, vec![8, 9, 10])]
    #[case::capacity_one(1, 5, vec![4])]
    fn test_snapshot(#[case] capacity: usize, #[case] num_inserts: u32, #[case] expected: Vec<u32>) {
        let ring = RingBuffer::new(capacity);
        for i in 0..num_inserts {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), expected);
        assert_eq!(ring.len(), expected.len());
    }

    #[test]
    fn test_is_empty() {
        let ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        ring.push("a");
        assert!(!ring.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        RingBuffer::<u32>::new(0);
    }

    /// snapshots taken while another thread pushes must always be a window of
    ///  consecutive values in insertion order, never torn
    #[test]
    fn test_snapshot_during_concurrent_push() {
        let ring = std::sync::Arc::new(RingBuffer::new(8));

        let writer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0u64..10_000 {
                    ring.push(i);
                }
            })
        };

        while !writer.is_finished() {
            let view = ring.snapshot();
            assert!(view.len() <= 8);
            for pair in view.windows(2) {
                assert_eq!(pair[1], pair[0] + 1);
            }
        }
        writer.join().unwrap();
    }
}
