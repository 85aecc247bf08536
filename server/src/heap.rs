//! Array-backed binary min-heap.
//!
//! Smallest element (by `Ord`) sits at the root. Ties are not stable: two
//! equal keys may pop in either order.

#[derive(Debug, Clone)]
pub struct PriorityQueue<T: Ord> {
    heap: Vec<T>,
}

impl<T: Ord> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Appends `item`, then sifts it up while it orders before its parent.
    pub fn push(&mut self, item: T) {
        self.heap.push(item);

        let mut now = self.heap.len() - 1;
        while now > 0 {
            let parent = (now - 1) / 2;
            if self.heap[now] >= self.heap[parent] {
                break;
            }
            self.heap.swap(now, parent);
            now = parent;
        }
    }

    /// Removes the root, refilling it from the last slot and sifting down
    /// toward the smaller child.
    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }

        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let top = self.heap.pop();

        let len = self.heap.len();
        let mut now = 0;
        loop {
            let left = 2 * now + 1;
            let right = 2 * now + 2;
            if left >= len {
                break;
            }

            let mut next = now;
            if self.heap[left] < self.heap[next] {
                next = left;
            }
            if right < len && self.heap[right] < self.heap[next] {
                next = right;
            }
            if next == now {
                break;
            }

            self.heap.swap(now, next);
            now = next;
        }

        top
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T: Ord> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
