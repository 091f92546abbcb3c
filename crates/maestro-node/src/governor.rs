//! [`SafetyGovernor`] – rate limiting and the stale-command watchdog.
//!
//! Command silence is never allowed to hold actuators at a stale non-zero
//! state: when no command has been accepted for longer than the watchdog
//! window, the next tick forces a neutral stop exactly once and disarms
//! until another command is accepted.
//!
//! The governor is explicit per-runtime state, constructed from the node's
//! manifest safety profile. It carries no protocol knowledge; the runtime
//! asks it questions and records events on it.

use std::time::{Duration, Instant};

use maestro_types::Manifest;

/// Node-level safety state derived from the manifest's per-command safety
/// profiles: the watchdog window is the tightest declared `watchdog_ms`, the
/// command interval the most permissive declared `rate_limit_hz`.
#[derive(Debug)]
pub struct SafetyGovernor {
    min_interval: Duration,
    watchdog_window: Duration,
    last_accepted: Option<Instant>,
    armed: bool,
}

impl SafetyGovernor {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let watchdog_ms = manifest
            .commands
            .iter()
            .map(|c| c.safety.watchdog_ms)
            .min()
            .unwrap_or(500);
        let rate_hz = manifest
            .commands
            .iter()
            .map(|c| c.safety.rate_limit_hz)
            .max()
            .unwrap_or(20)
            .max(1);
        Self::new(
            Duration::from_millis(u64::from(1000 / rate_hz)),
            Duration::from_millis(watchdog_ms),
        )
    }

    pub fn new(min_interval: Duration, watchdog_window: Duration) -> Self {
        Self {
            min_interval,
            watchdog_window,
            last_accepted: None,
            armed: false,
        }
    }

    /// Would accepting a `RUN` at `now` violate the rate limit?
    pub fn too_fast(&self, now: Instant) -> bool {
        match self.last_accepted {
            Some(last) => now.duration_since(last) < self.min_interval,
            None => false,
        }
    }

    /// Record an accepted `RUN`: stamps the clock and arms the watchdog.
    pub fn accept(&mut self, now: Instant) {
        self.last_accepted = Some(now);
        self.armed = true;
    }

    /// Record a `STOP`: outputs are neutral, so the watchdog has nothing to
    /// guard. The clock still resets so a following `RUN` is rate-checked
    /// against it.
    pub fn disarm(&mut self, now: Instant) {
        self.last_accepted = Some(now);
        self.armed = false;
    }

    /// Watchdog tick. Returns `true` exactly once per period of silence:
    /// when armed and the window has elapsed since the last accepted
    /// command. The caller must neutralise the device when this fires.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.armed {
            return false;
        }
        match self.last_accepted {
            Some(last) if now.duration_since(last) > self.watchdog_window => {
                self.armed = false;
                true
            }
            _ => false,
        }
    }

    pub fn watchdog_window(&self) -> Duration {
        self.watchdog_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> SafetyGovernor {
        SafetyGovernor::new(Duration::from_millis(50), Duration::from_millis(200))
    }

    #[test]
    fn first_command_is_never_too_fast() {
        let g = governor();
        assert!(!g.too_fast(Instant::now()));
    }

    #[test]
    fn rapid_second_command_is_too_fast() {
        let mut g = governor();
        let t0 = Instant::now();
        g.accept(t0);
        assert!(g.too_fast(t0 + Duration::from_millis(10)));
        assert!(!g.too_fast(t0 + Duration::from_millis(60)));
    }

    #[test]
    fn watchdog_fires_after_silence() {
        let mut g = governor();
        let t0 = Instant::now();
        g.accept(t0);
        assert!(!g.tick(t0 + Duration::from_millis(100)));
        assert!(g.tick(t0 + Duration::from_millis(250)));
    }

    #[test]
    fn watchdog_fires_exactly_once_under_repeated_silence() {
        let mut g = governor();
        let t0 = Instant::now();
        g.accept(t0);
        assert!(g.tick(t0 + Duration::from_millis(250)));
        // Continued silence must not re-fire; outputs are already neutral.
        assert!(!g.tick(t0 + Duration::from_millis(500)));
        assert!(!g.tick(t0 + Duration::from_millis(5000)));
    }

    #[test]
    fn watchdog_rearms_on_next_accepted_command() {
        let mut g = governor();
        let t0 = Instant::now();
        g.accept(t0);
        assert!(g.tick(t0 + Duration::from_millis(250)));
        g.accept(t0 + Duration::from_millis(300));
        assert!(g.tick(t0 + Duration::from_millis(600)));
    }

    #[test]
    fn watchdog_unarmed_before_any_command() {
        let mut g = governor();
        assert!(!g.tick(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn stop_disarms_watchdog() {
        let mut g = governor();
        let t0 = Instant::now();
        g.accept(t0);
        g.disarm(t0 + Duration::from_millis(20));
        assert!(!g.tick(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn profile_derivation_uses_tightest_watchdog_and_loosest_rate() {
        let raw = r#"{
            "daemon_version": "0.1",
            "device": {"name": "n", "node_id": "n-1"},
            "commands": [
                {"token": "A", "safety": {"rate_limit_hz": 20, "watchdog_ms": 1200, "clamp": true}},
                {"token": "B", "safety": {"rate_limit_hz": 30, "watchdog_ms": 300, "clamp": true}}
            ]
        }"#;
        let manifest = Manifest::parse_and_validate(raw).unwrap();
        let g = SafetyGovernor::from_manifest(&manifest);
        assert_eq!(g.watchdog_window(), Duration::from_millis(300));
        assert_eq!(g.min_interval, Duration::from_millis(1000 / 30));
    }
}
