use std::time::Duration;

/// Timing and retry behaviour of an engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Granularity of step waits and reset settle times.
    pub tick: Duration,
    /// Polling interval of the hardware one-second toggle.
    pub fast_tick: Duration,
    /// Reset-over polls before the handshake is declared failed.
    pub watchdog_max: u32,
    /// Toggle polls per hardware tick before the tick counts as missed.
    pub hw_tick_polls: u32,
    /// Consecutive missed hardware ticks from which a warning is logged.
    pub missed_tick_warning: u32,
    /// Ticks to wait after a full or TX reset before checking the reset request.
    pub tx_settle_ticks: u32,
    /// Ticks to wait after an RX reset before checking the reset request.
    pub rx_settle_ticks: u32,
    /// Sequence compilation stops once more errors than this were found.
    pub max_sequence_errors: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            fast_tick: Duration::from_millis(333),
            watchdog_max: 5,
            hw_tick_polls: 5,
            missed_tick_warning: 5,
            tx_settle_ticks: 2,
            rx_settle_ticks: 1,
            max_sequence_errors: 20,
        }
    }
}

/// Builder to create a [Config] instance
///
/// # Example
///
/// ```
/// use gt_engine::config::Builder;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .watchdog_max(3)
///     .tick(Duration::from_millis(100))
///     .build();
/// assert_eq!(config.watchdog_max, 3);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    pub fn fast_tick(mut self, tick: Duration) -> Self {
        self.config.fast_tick = tick;
        self
    }

    /// Set how often the reset-over condition is polled before giving up.
    pub fn watchdog_max(mut self, attempts: u32) -> Self {
        self.config.watchdog_max = attempts.max(1);
        self
    }

    pub fn hw_tick_polls(mut self, polls: u32) -> Self {
        self.config.hw_tick_polls = polls.max(1);
        self
    }

    pub fn missed_tick_warning(mut self, misses: u32) -> Self {
        self.config.missed_tick_warning = misses;
        self
    }

    pub fn settle_ticks(mut self, tx: u32, rx: u32) -> Self {
        self.config.tx_settle_ticks = tx;
        self.config.rx_settle_ticks = rx;
        self
    }

    pub fn max_sequence_errors(mut self, errors: usize) -> Self {
        self.config.max_sequence_errors = errors;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
