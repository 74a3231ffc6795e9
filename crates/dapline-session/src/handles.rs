//! Integer handles for values the peer refers to by number, such as
//! `variablesReference` and `frameId`.
use std::collections::HashMap;

/// First handle issued by [`Handles::new`].
pub const START_HANDLE: i64 = 1000;

/// Allocates integer handles for values of type `T`.
///
/// Handles are never reused until [`reset`](Handles::reset), which is
/// typically called whenever the debuggee resumes.
#[derive(Debug, Clone)]
pub struct Handles<T> {
    start: i64,
    next: i64,
    values: HashMap<i64, T>,
}

impl<T> Handles<T> {
    /// Create an allocator starting at [`START_HANDLE`].
    pub fn new() -> Self {
        Self::with_start(START_HANDLE)
    }

    /// Create an allocator starting at `start`.
    pub fn with_start(start: i64) -> Self {
        Self {
            start,
            next: start,
            values: HashMap::new(),
        }
    }

    /// Store `value` and return its handle.
    pub fn create(&mut self, value: T) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.values.insert(handle, value);
        handle
    }

    /// Look up the value behind `handle`.
    pub fn get(&self, handle: i64) -> Option<&T> {
        self.values.get(&handle)
    }

    /// Forget every value and start again from the first handle.
    pub fn reset(&mut self) {
        self.next = self.start;
        self.values.clear();
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> Default for Handles<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_start_at_1000() {
        let mut handles = Handles::new();
        assert_eq!(handles.create("locals"), 1000);
        assert_eq!(handles.create("globals"), 1001);
        assert_eq!(handles.get(1001), Some(&"globals"));
        assert_eq!(handles.get(999), None);
        assert_eq!(handles.len(), 2);
    }

    #[test]
    fn handles_reset_restarts_numbering() {
        let mut handles = Handles::with_start(1);
        handles.create(10u32);
        handles.create(20u32);
        handles.reset();
        assert!(handles.is_empty());
        assert_eq!(handles.get(1), None);
        assert_eq!(handles.create(30u32), 1);
    }
}
