use std::time::Duration;

/// Receipt polling delays: start at `initial`, grow by half each poll, stop
/// growing at `max`
#[derive(Debug, Clone)]
pub struct PollSchedule {
    next: Duration,
    max: Duration,
    polls: u32,
}

impl PollSchedule {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
            polls: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay + delay / 2).min(self.max);
        self.polls = self.polls.saturating_add(1);
        delay
    }

    /// Delays handed out so far
    pub fn polls(&self) -> u32 {
        self.polls
    }
}
