//! Bounded replay history for a session

use std::collections::VecDeque;

use crate::process::OutputChunk;

/// Default number of chunks kept for replay
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// FIFO ring of the most recent output chunks.
///
/// Never holds more than `capacity` chunks; appending past capacity evicts the
/// oldest. A capacity of zero keeps nothing.
#[derive(Debug, Clone)]
pub struct SessionBuffer {
    chunks: VecDeque<OutputChunk>,
    capacity: usize,
}

impl SessionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
            capacity,
        }
    }

    pub fn append(&mut self, chunk: OutputChunk) {
        if self.capacity == 0 {
            return;
        }
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    /// Ordered copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<OutputChunk> {
        self.chunks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: usize) -> OutputChunk {
        OutputChunk::stdout(format!("line {}\n", i))
    }

    #[test]
    fn test_keeps_most_recent_chunks_oldest_first() {
        let mut buffer = SessionBuffer::new(3);
        for i in 0..5 {
            buffer.append(chunk(i));
        }

        assert_eq!(buffer.len(), 3);
        let texts: Vec<String> = buffer.snapshot().iter().map(|c| c.text().into_owned()).collect();
        assert_eq!(texts, vec!["line 2\n", "line 3\n", "line 4\n"]);
    }

    #[test]
    fn test_default_capacity_bound() {
        let mut buffer = SessionBuffer::default();
        for i in 0..(DEFAULT_BUFFER_CAPACITY + 250) {
            buffer.append(chunk(i));
        }

        assert_eq!(buffer.len(), DEFAULT_BUFFER_CAPACITY);
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.first().unwrap().text(), "line 250\n");
        assert_eq!(
            snapshot.last().unwrap().text(),
            format!("line {}\n", DEFAULT_BUFFER_CAPACITY + 249)
        );
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut buffer = SessionBuffer::new(10);
        buffer.append(chunk(1));
        let snapshot = buffer.snapshot();

        buffer.append(chunk(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_preserves_source_tags() {
        let mut buffer = SessionBuffer::new(4);
        buffer.append(OutputChunk::stdout("a"));
        buffer.append(OutputChunk::stderr("b"));

        let sources: Vec<_> = buffer.snapshot().iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![
                crate::process::OutputSource::Stdout,
                crate::process::OutputSource::Stderr
            ]
        );
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buffer = SessionBuffer::new(0);
        buffer.append(chunk(1));
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 0);
    }
}
