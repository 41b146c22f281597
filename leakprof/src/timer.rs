use std::time::{Duration, Instant};

/// Cooperative time budget for a search pass.
///
/// Reading the clock on every probe is too expensive, so the deadline is
/// only compared every `granularity` calls. Once expired it stays expired.
#[derive(Debug)]
pub struct GranularTimer {
    deadline: Option<Instant>,
    granularity: u32,
    counter: u32,
    finished: bool,
}

impl GranularTimer {
    pub fn start(budget: Option<Duration>, granularity: u32) -> Self {
        let granularity = granularity.max(1);
        Self {
            deadline: budget.map(|budget| Instant::now() + budget),
            granularity,
            counter: granularity,
            finished: false,
        }
    }

    pub fn unbounded() -> Self {
        Self::start(None, 1)
    }

    pub fn is_finished(&mut self) -> bool {
        if self.finished {
            return true;
        }
        let Some(deadline) = self.deadline else {
            return false;
        };
        self.counter -= 1;
        if self.counter == 0 {
            self.counter = self.granularity;
            if Instant::now() >= deadline {
                self.finished = true;
            }
        }
        self.finished
    }

    /// Whether the budget ran out, without counting a probe.
    pub fn expired(&self) -> bool {
        self.finished
    }
}
