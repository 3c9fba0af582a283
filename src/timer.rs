use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, PartialEq, Eq, Clone)]
struct TimerKey {
    execute_at: Instant,
    token: u64,
}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.execute_at
            .cmp(&other.execute_at)
            .then(self.token.cmp(&other.token))
    }
}

/// Deadline-ordered queue of cancellable timers.
///
/// This is the engine's view of the scheduler primitive: scheduling
/// returns a token, cancellation takes the token back, and nothing fires
/// until the owner polls with a chosen `now`.  Time is entirely virtual:
/// deadlines are absolute instants supplied by the caller, never read
/// from the wall clock, so the owning event loop decides how fast time
/// advances.
pub struct TimerQueue<T> {
    tasks: BTreeMap<TimerKey, T>,
    deadlines: HashMap<u64, Instant>,
    next_token: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            tasks: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_token: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Schedule `value` to fire at `execute_at`.
    pub fn schedule_at(&mut self, execute_at: Instant, value: T) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.tasks.insert(TimerKey { execute_at, token }, value);
        self.deadlines.insert(token, execute_at);
        token
    }

    /// Cancel a pending timer.  Returns the value if it had not yet
    /// fired; cancelling an unknown or already-fired token is a no-op.
    pub fn cancel(&mut self, token: u64) -> Option<T> {
        let execute_at = self.deadlines.remove(&token)?;
        self.tasks.remove(&TimerKey { execute_at, token })
    }

    /// Remove and return every timer due at or before `now`, in
    /// deadline order, each paired with its deadline so the caller can
    /// advance its own clock to the firing instant.
    pub fn poll(&mut self, now: Instant) -> Vec<(Instant, T)> {
        let due: Vec<TimerKey> = self
            .tasks
            .range(
                ..=TimerKey {
                    execute_at: now,
                    token: u64::MAX,
                },
            )
            .map(|(key, _)| key.clone())
            .collect();
        let mut fired = Vec::with_capacity(due.len());
        for key in due {
            self.deadlines.remove(&key.token);
            if let Some(value) = self.tasks.remove(&key) {
                fired.push((key.execute_at, value));
            }
        }
        fired
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn schedule_cancel_poll() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();

        let token = queue.schedule_at(now, "first");
        assert_eq!(queue.cancel(token), Some("first"));
        assert_eq!(queue.cancel(token), None);

        queue.schedule_at(now, "second");
        assert_eq!(
            queue.poll(now + Duration::from_secs(1)),
            vec![(now, "second")]
        );

        queue.schedule_at(now + Duration::from_millis(1500), "third");
        assert!(queue.poll(now + Duration::from_secs(1)).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn poll_returns_deadline_order() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.schedule_at(now + Duration::from_secs(2), "late");
        queue.schedule_at(now + Duration::from_secs(1), "early");
        assert_eq!(
            queue.poll(now + Duration::from_secs(3)),
            vec![
                (now + Duration::from_secs(1), "early"),
                (now + Duration::from_secs(2), "late"),
            ]
        );
        assert!(queue.is_empty());
    }
}
