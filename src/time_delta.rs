//! A thread-safe running average of clock skew between this process and the
//! database.

use std::sync::Mutex;

/// Starting from 0, after samples `s1, s2, …, sn`: the stored value equals
/// `s1` after the first sample, and thereafter `(prev + si) / 2`.
pub struct TimeDelta {
    current: Mutex<i64>,
}

impl TimeDelta {
    pub fn new() -> Self {
        TimeDelta { current: Mutex::new(0) }
    }

    /// Fold in a new skew sample, in milliseconds.
    pub fn update(&self, sample: i64) {
        let mut current = self.current.lock().unwrap();
        *current = if *current == 0 { sample } else { (*current + sample) / 2 };
    }

    /// The current running average, in milliseconds.
    pub fn get(&self) -> i64 {
        *self.current.lock().unwrap()
    }
}

impl Default for TimeDelta {
    fn default() -> Self {
        Self::new()
    }
}
