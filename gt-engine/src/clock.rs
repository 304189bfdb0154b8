//! Time and cancellation.
//!
//! All waits of the engine go through a [`Ticker`]. It sleeps on a [`Clock`] one tick at a time
//! and checks the [`AbortFlag`] before every tick, so an abort is noticed within one tick.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::config::Config;

pub trait Clock: Send + Sync {
    /// Time elapsed since a fixed, arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Set-once cancellation flag, shared between an engine and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> AbortFlag {
        AbortFlag::default()
    }

    pub fn abort(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            log::warn!("Abort requested");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct Ticker {
    clock: Arc<dyn Clock>,
    abort: AbortFlag,
    tick: Duration,
    fast_tick: Duration,
}

impl Ticker {
    pub fn new(clock: Arc<dyn Clock>, abort: AbortFlag, config: &Config) -> Ticker {
        Ticker {
            clock,
            abort,
            tick: config.tick,
            fast_tick: config.fast_tick,
        }
    }

    /// Wait `ticks` ticks. Returns `false` if the wait was cut short by an abort.
    pub fn wait_ticks(&self, ticks: u32) -> bool {
        for _ in 0..ticks {
            if self.abort.is_aborted() {
                return false;
            }
            self.clock.sleep(self.tick);
        }
        !self.abort.is_aborted()
    }

    pub fn wait_fast_tick(&self) {
        self.clock.sleep(self.fast_tick);
    }

    /// Wait `duration`, checking for an abort every fast tick.
    /// Returns `false` if the wait was cut short by an abort.
    pub fn wait_polling_fast(&self, duration: Duration) -> bool {
        let end = self.clock.now() + duration;
        while !self.abort.is_aborted() {
            let remaining = end.saturating_sub(self.clock.now());
            if remaining.is_zero() {
                return true;
            }
            self.clock.sleep(remaining.min(self.fast_tick));
        }
        false
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Mutex;

    use super::*;

    /// Clock that advances only when slept on.
    #[derive(Default)]
    pub(crate) struct ManualClock {
        now: Mutex<Duration>,
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            *self.now.lock().unwrap() += duration;
        }
    }

    /// Clock that raises an abort once a given time is reached.
    pub(crate) struct AbortingClock {
        pub inner: ManualClock,
        pub abort_at: Duration,
        pub abort: AbortFlag,
    }

    impl Clock for AbortingClock {
        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.now() >= self.abort_at {
                self.abort.abort();
            }
        }
    }

    #[test]
    fn waits_advance_the_clock() {
        let clock = Arc::new(ManualClock::default());
        let ticker = Ticker::new(clock.clone(), AbortFlag::new(), &Config::default());
        assert!(ticker.wait_ticks(3));
        ticker.wait_fast_tick();
        assert_eq!(clock.now(), Duration::from_millis(3333));
    }

    #[test]
    fn fast_polling_wait_ends_on_time() {
        let clock = Arc::new(ManualClock::default());
        let ticker = Ticker::new(clock.clone(), AbortFlag::new(), &Config::default());
        assert!(ticker.wait_polling_fast(Duration::from_secs(2)));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn abort_cuts_waits_short() {
        let abort = AbortFlag::new();
        let clock = Arc::new(AbortingClock {
            inner: ManualClock::default(),
            abort_at: Duration::from_secs(2),
            abort: abort.clone(),
        });
        let ticker = Ticker::new(clock.clone(), abort, &Config::default());
        assert!(!ticker.wait_ticks(100));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }
}
