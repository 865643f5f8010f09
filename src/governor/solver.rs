use crate::config::GovernorConfig;
use crate::governor::average_window::AverageWindow;
use crate::governor::peak_window::PeakWindow;
use crate::governor::reservation::Reservation;
use tokio::time::Instant;

/// Why the solver arrived at the decision it did — mirrors the
/// collaborator-facing `reason` field of `spec.md` §6's decision event.
/// `ToleranceViolation` and `Manual` are never produced by the solver
/// itself; the control loop attaches them for writes it triggers outside
/// the windowed math (§9's open-question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    Scheduled,
    Reservation,
    PeakCritical,
    Startup,
    ToleranceViolation,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub limit_pct: f64,
    pub reason: DecisionReason,
}

pub struct SolveInput<'a> {
    pub avg_win: &'a AverageWindow,
    pub peak_win: &'a PeakWindow,
    pub reservation: Option<Reservation>,
    pub now_mono: Instant,
    pub config: &'a GovernorConfig,
}

/// Pure function: windowed state -> the maximum CPU% ceiling for the next
/// control step (`spec.md` §4.5, the "lookahead reshaping" rule).
pub struct QuotaSolver;

impl QuotaSolver {
    pub fn solve(input: &SolveInput<'_>) -> Decision {
        let config = input.config;
        let window_ticks = input.avg_win.capacity() as f64;
        let step_ticks =
            (config.control_step_secs as f64 / config.tick_interval_secs as f64).max(1.0);

        let mut reason = DecisionReason::Scheduled;
        let mut result = if step_ticks >= window_ticks || input.avg_win.count() < 2 {
            residual_quota_rule(input, window_ticks)
        } else {
            lookahead_rule(input, window_ticks, step_ticks)
        };

        // 1. Reservation override: never exceed a reserved pin.
        if let Some(reservation) = &input.reservation
            && reservation.cpu_quota_pct < result
        {
            result = reservation.cpu_quota_pct;
            reason = DecisionReason::Reservation;
        }

        // 2. Peak constraint.
        let peak_remaining = input
            .peak_win
            .remaining(input.now_mono, config.peak_budget_seconds);
        if peak_remaining <= config.peak_critical_threshold_seconds {
            if config.emergency_limit_pct < result {
                result = config.emergency_limit_pct;
            }
            reason = DecisionReason::PeakCritical;
        }

        // 3. Safety factor.
        let startup_cutoff = config.startup_threshold_frac * window_ticks;
        let safety = if (input.avg_win.count() as f64) < startup_cutoff {
            reason = DecisionReason::Startup;
            config.startup_safety
        } else {
            config.safety
        };
        result *= safety;

        // 4. Clamp.
        result = result.clamp(config.min_limit_pct, config.max_limit_pct);

        Decision {
            limit_pct: result,
            reason,
        }
    }
}

fn lookahead_rule(input: &SolveInput<'_>, window_ticks: f64, step_ticks: f64) -> f64 {
    let config = input.config;
    let sum_current = input.avg_win.sum();

    let window_full = input.avg_win.count() >= input.avg_win.capacity();
    let sum_oldest_step = if window_full {
        let h_avg = config.h_avg();
        let control_step = config.control_step();
        match input.now_mono.checked_sub(h_avg) {
            Some(window_start) => {
                let boundary = window_start + control_step;
                sum_current - input.avg_win.sum_over_suffix(boundary)
            }
            None => 0.0,
        }
    } else {
        0.0
    };

    (config.avg_budget_pct * window_ticks - sum_current + sum_oldest_step) / step_ticks
}

fn residual_quota_rule(input: &SolveInput<'_>, window_ticks: f64) -> f64 {
    let config = input.config;
    let sum_current = input.avg_win.sum();
    let count = input.avg_win.count() as f64;

    let remaining_budget = config.avg_budget_pct * window_ticks - sum_current;
    let remaining_ticks = (window_ticks - count).max(1.0);

    (remaining_budget / remaining_ticks).max(config.min_limit_pct)
}
