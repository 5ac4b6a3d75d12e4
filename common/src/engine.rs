use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};

use crate::config::Configuration;
use crate::resolve::{resolve, ResolveError};
use crate::sun::SunTimeTable;

/// Emitted when a channel's target duty cycle changes between ticks. The
/// caller forwards these to the PWM collaborator and any notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DutyChange {
    pub channel: String,
    pub previous: Option<u8>,
    pub duty_cycle: u8,
    pub window: Option<String>,
    pub at: DateTime<FixedOffset>,
}

/// Duty cycle most recently applied to a channel, with the window that set
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDuty {
    pub duty_cycle: u8,
    pub window: Option<String>,
}

/// Periodic driver for window resolution. Owns the last-applied cache and
/// turns resolution results into change events; the tick cadence itself
/// belongs to the caller.
#[derive(Debug, Default)]
pub struct ScheduleEngine {
    applied: HashMap<String, AppliedDuty>,
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &HashMap<String, AppliedDuty> {
        &self.applied
    }

    /// Resolves the current windows and emits a change event for every
    /// channel whose duty cycle differs from the last-applied value.
    ///
    /// A resolution failure leaves the cache untouched; the caller logs it
    /// and retries on the next tick.
    pub fn tick(
        &mut self,
        now: DateTime<FixedOffset>,
        config: &Configuration,
        sun: &SunTimeTable,
    ) -> Result<Vec<DutyChange>, ResolveError> {
        let prior: HashMap<String, u8> = self
            .applied
            .iter()
            .map(|(name, state)| (name.clone(), state.duty_cycle))
            .collect();

        let resolved = resolve(now, config, sun, &prior)?;

        // A committed configuration may have removed or disabled channels;
        // their cache entries are stale and must not linger across uploads.
        self.applied
            .retain(|name, _| config.channel(name).is_some_and(|channel| channel.enabled));

        let mut changes = Vec::new();
        for (channel, target) in resolved {
            let previous = self.applied.get(&channel).map(|state| state.duty_cycle);
            if previous != Some(target.duty_cycle) {
                changes.push(DutyChange {
                    channel: channel.clone(),
                    previous,
                    duty_cycle: target.duty_cycle,
                    window: target.window.clone(),
                    at: now,
                });
            }
            self.applied.insert(
                channel,
                AppliedDuty {
                    duty_cycle: target.duty_cycle,
                    window: target.window,
                },
            );
        }

        Ok(changes)
    }
}
