//! Frame-budget integration.
//!
//! The owning render engine reports frame timing as [`FrameBudgetSignal`]s,
//! either by calling [`RenderEngineHooks::on_frame_budget`] directly or by
//! sending through the channel returned by
//! [`CacheService::budget_sender`](super::CacheService::budget_sender).

use serde::Serialize;

/// Timing of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameBudgetSignal {
    pub budget_exceeded: bool,
    pub frame_time_ms: f64,
    pub budget_ms: f64,
}

impl FrameBudgetSignal {
    #[must_use]
    pub fn from_timing(frame_time_ms: f64, budget_ms: f64) -> Self {
        Self {
            budget_exceeded: frame_time_ms > budget_ms,
            frame_time_ms,
            budget_ms,
        }
    }
}

/// Callbacks an owning engine invokes on the cache service.
pub trait RenderEngineHooks {
    /// Called once per frame with that frame's timing.
    fn on_frame_budget(&self, signal: FrameBudgetSignal);

    /// Called periodically from the engine's housekeeping.
    fn on_maintenance_tick(&self);
}

/// What the service should do in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BudgetAction {
    None,
    Shrink,
    PressureRelieved,
}

/// Tracks whether the engine is currently over its frame budget.
#[derive(Debug, Default)]
pub(crate) struct BudgetMonitor {
    under_pressure: bool,
    frames_in_budget: u32,
    over_budget_frames: u64,
}

impl BudgetMonitor {
    pub fn observe(&mut self, signal: &FrameBudgetSignal, cooldown_frames: u32) -> BudgetAction {
        if signal.budget_exceeded {
            self.under_pressure = true;
            self.frames_in_budget = 0;
            self.over_budget_frames += 1;
            return BudgetAction::Shrink;
        }
        if self.under_pressure {
            self.frames_in_budget += 1;
            if self.frames_in_budget >= cooldown_frames {
                self.under_pressure = false;
                self.frames_in_budget = 0;
                return BudgetAction::PressureRelieved;
            }
        }
        BudgetAction::None
    }

    pub fn under_pressure(&self) -> bool {
        self.under_pressure
    }

    pub fn over_budget_frames(&self) -> u64 {
        self.over_budget_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_ends_after_cooldown() {
        let mut monitor = BudgetMonitor::default();
        let over = FrameBudgetSignal::from_timing(20.0, 16.6);
        let ok = FrameBudgetSignal::from_timing(10.0, 16.6);

        assert_eq!(monitor.observe(&over, 2), BudgetAction::Shrink);
        assert!(monitor.under_pressure());
        assert_eq!(monitor.observe(&ok, 2), BudgetAction::None);
        assert_eq!(monitor.observe(&ok, 2), BudgetAction::PressureRelieved);
        assert!(!monitor.under_pressure());
        assert_eq!(monitor.over_budget_frames(), 1);
    }

    #[test]
    fn over_budget_frame_resets_cooldown() {
        let mut monitor = BudgetMonitor::default();
        let over = FrameBudgetSignal::from_timing(30.0, 16.6);
        let ok = FrameBudgetSignal::from_timing(5.0, 16.6);

        monitor.observe(&over, 2);
        monitor.observe(&ok, 2);
        monitor.observe(&over, 2);
        assert_eq!(monitor.observe(&ok, 2), BudgetAction::None);
        assert!(monitor.under_pressure());
    }
}
