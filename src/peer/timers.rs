use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::client::Config;

#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    KeepAlive,
    Refill,
}

/// Periodic work of a single session.
pub struct Timers {
    keep_alive: Interval,
    refill: Interval,
}

fn delayed(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl Timers {
    pub fn new(config: &Config) -> Self {
        Self {
            keep_alive: delayed(config.keep_alive_interval),
            refill: delayed(config.refill_interval),
        }
    }

    pub async fn tick(&mut self) -> Tick {
        tokio::select! {
            _ = self.keep_alive.tick() => Tick::KeepAlive,
            _ = self.refill.tick() => Tick::Refill,
        }
    }
}
