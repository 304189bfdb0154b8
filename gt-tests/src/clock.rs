use std::{sync::Mutex, time::Duration};

use gt_engine::clock::{AbortFlag, Clock};

type Action = Box<dyn FnOnce() + Send>;

/// Clock that only advances when slept on.
///
/// Actions can be scheduled at a point in time. They run on the sleeping thread once the
/// clock reaches that time, which makes events in the middle of a step reproducible.
#[derive(Default)]
pub struct VirtualClock {
    now: Mutex<Duration>,
    scheduled: Mutex<Vec<(Duration, Action)>>,
}

impl VirtualClock {
    pub fn schedule(&self, at: Duration, action: impl FnOnce() + Send + 'static) {
        self.scheduled.lock().unwrap().push((at, Box::new(action)));
    }

    pub fn abort_at(&self, at: Duration, flag: AbortFlag) {
        self.schedule(at, move || flag.abort());
    }

    fn due(&self, now: Duration) -> Vec<Action> {
        let mut scheduled = self.scheduled.lock().unwrap();
        let (due, pending): (Vec<_>, Vec<_>) = scheduled.drain(..).partition(|(at, _)| *at <= now);
        *scheduled = pending;
        due.into_iter().map(|(_, action)| action).collect()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        let now = {
            let mut now = self.now.lock().unwrap();
            *now += duration;
            *now
        };
        for action in self.due(now) {
            action();
        }
    }
}
