//! Traffic accounting and liveness rules applied to every accepted pulse.
//!
//! Everything in here is synchronous and free of I/O. The per-host actor in
//! [`crate::actors::accountant`] owns one [`HostTrafficState`] and feeds it
//! pulses in arrival order.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Pulse;
use crate::config::HostSettings;

/// Threshold used when a host has none configured
pub const DEFAULT_TRAFFIC_THRESHOLD_PCT: u64 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceSelection {
    /// Use the pre-aggregated totals of the pulse
    Totals,
    /// Sum over the named interfaces only
    Named(Vec<String>),
}

impl InterfaceSelection {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            return InterfaceSelection::Totals;
        }

        let names: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            InterfaceSelection::Totals
        } else {
            InterfaceSelection::Named(names)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedCounters {
    pub rx: u64,
    pub tx: u64,
    /// None of the allow-listed interfaces were present, totals were used instead
    pub fell_back: bool,
}

pub fn select_counters(pulse: &Pulse, selection: &InterfaceSelection) -> SelectedCounters {
    let totals = SelectedCounters {
        rx: pulse.net_rx,
        tx: pulse.net_tx,
        fell_back: false,
    };

    let InterfaceSelection::Named(names) = selection else {
        return totals;
    };

    let mut found = false;
    let mut rx = 0u64;
    let mut tx = 0u64;
    for name in names {
        if let Some(iface) = pulse.interfaces.iter().find(|iface| &iface.name == name) {
            found = true;
            rx = rx.saturating_add(iface.rx);
            tx = tx.saturating_add(iface.tx);
        }
    }

    if found {
        SelectedCounters {
            rx,
            tx,
            fell_back: false,
        }
    } else {
        SelectedCounters {
            fell_back: true,
            ..totals
        }
    }
}

/// Increase of a raw counter between two samples.
///
/// A zero baseline yields no delta, so a host's lifetime counter is never
/// attributed to the current period. A counter that went backwards restarted,
/// and the new raw value is the traffic since that restart.
pub fn counter_delta(last_raw: u64, current: u64) -> u64 {
    if last_raw == 0 {
        0
    } else if current >= last_raw {
        current - last_raw
    } else {
        current
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Day of `today`'s month on which a reset configured for `reset_day` fires.
///
/// Returns `None` when resets are disabled (day 0).
pub fn effective_reset_day(reset_day: u32, today: NaiveDate) -> Option<u32> {
    if reset_day == 0 {
        return None;
    }
    Some(reset_day.min(days_in_month(today)))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    #[default]
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "online" {
            HostStatus::Online
        } else {
            HostStatus::Offline
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per-host state, owned by the accounting engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTrafficState {
    pub monthly_rx: u64,
    pub monthly_tx: u64,
    pub last_raw_rx: u64,
    pub last_raw_tx: u64,
    pub last_reset_date: Option<NaiveDate>,
    pub traffic_alerted: bool,
    pub status: HostStatus,
    pub last_pulse_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficAlert {
    pub percent: u64,
    pub used: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountingOutcome {
    pub reset: bool,
    pub delta_rx: u64,
    pub delta_tx: u64,
    pub traffic_alert: Option<TrafficAlert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: HostStatus,
    pub to: HostStatus,
    pub at: DateTime<Utc>,
}

impl HostTrafficState {
    pub fn monthly_total(&self) -> u64 {
        self.monthly_rx.saturating_add(self.monthly_tx)
    }

    /// Reset, delta, threshold and raw-counter steps for one pulse
    pub fn apply_counters(
        &mut self,
        counters: SelectedCounters,
        settings: &HostSettings,
        today: NaiveDate,
    ) -> AccountingOutcome {
        let mut outcome = AccountingOutcome::default();

        let reset_due = effective_reset_day(settings.reset_day, today)
            .is_some_and(|day| today.day() == day && self.last_reset_date != Some(today));
        if reset_due {
            self.monthly_rx = 0;
            self.monthly_tx = 0;
            self.last_reset_date = Some(today);
            self.traffic_alerted = false;
            outcome.reset = true;
        }

        outcome.delta_rx = counter_delta(self.last_raw_rx, counters.rx);
        outcome.delta_tx = counter_delta(self.last_raw_tx, counters.tx);
        self.monthly_rx = self.monthly_rx.saturating_add(outcome.delta_rx);
        self.monthly_tx = self.monthly_tx.saturating_add(outcome.delta_tx);

        outcome.traffic_alert = self.check_threshold(settings);

        self.last_raw_rx = counters.rx;
        self.last_raw_tx = counters.tx;

        outcome
    }

    fn check_threshold(&mut self, settings: &HostSettings) -> Option<TrafficAlert> {
        if settings.traffic_limit == 0 || !settings.notify_traffic_enabled || self.traffic_alerted {
            return None;
        }

        let threshold = match settings.notify_traffic_threshold {
            0 => DEFAULT_TRAFFIC_THRESHOLD_PCT,
            pct => u64::from(pct),
        };

        let used = u128::from(self.monthly_rx) + u128::from(self.monthly_tx);
        let percent = used * 100 / u128::from(settings.traffic_limit);
        if percent < u128::from(threshold) {
            return None;
        }

        self.traffic_alerted = true;
        Some(TrafficAlert {
            percent: u64::try_from(percent).unwrap_or(u64::MAX),
            used: u64::try_from(used).unwrap_or(u64::MAX),
            limit: settings.traffic_limit,
        })
    }

    /// Record a pulse and flip to online once `streak` reaches `online_after` pulses.
    ///
    /// `streak` counts consecutive pulses seen while the host was not online.
    pub fn mark_pulse(
        &mut self,
        now: DateTime<Utc>,
        streak: &mut u32,
        online_after: u32,
    ) -> Option<StatusTransition> {
        self.last_pulse_at = Some(now);

        if self.status == HostStatus::Online {
            *streak = 0;
            return None;
        }

        *streak = streak.saturating_add(1);
        if *streak < online_after.max(1) {
            return None;
        }

        *streak = 0;
        let from = self.status;
        self.status = HostStatus::Online;
        Some(StatusTransition {
            from,
            to: HostStatus::Online,
            at: now,
        })
    }

    /// Flip an online host to offline when its last pulse is older than `threshold`
    pub fn check_stale(
        &mut self,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
    ) -> Option<StatusTransition> {
        if self.status != HostStatus::Online {
            return None;
        }

        let stale = match self.last_pulse_at {
            Some(last) => now.signed_duration_since(last) > threshold,
            None => true,
        };
        if !stale {
            return None;
        }

        self.status = HostStatus::Offline;
        Some(StatusTransition {
            from: HostStatus::Online,
            to: HostStatus::Offline,
            at: now,
        })
    }
}

/// Minutes without a pulse before a host counts as offline (0 means 1)
pub fn offline_threshold(settings: &HostSettings) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(settings.notify_offline_threshold.max(1)))
}
