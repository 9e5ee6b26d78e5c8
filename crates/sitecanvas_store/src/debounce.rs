use std::time::Duration;

/// Trailing-edge debounce on millisecond timestamps.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay_ms: i64,
    deadline: Option<i64>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: delay.as_millis() as i64,
            deadline: None,
        }
    }

    /// Records a change at `now`, pushing the deadline out.
    pub fn touch(&mut self, now: i64) {
        self.deadline = Some(now + self.delay_ms);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once per quiet period; clears the pending state.
    pub fn take_due(&mut self, now: i64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(400));
        debouncer.touch(0);
        debouncer.touch(300);
        assert!(!debouncer.take_due(600));
        assert!(debouncer.take_due(700));
        assert!(!debouncer.take_due(800));
        assert!(!debouncer.is_pending());
    }
}
