//! Windowed hysteresis + cooldown decision engine.
//!
//! The policy thread is the sole consumer of the sample history, the sole
//! owner of the actuator gate and the only caller of the actuator driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hal::{Actuator, ActuatorState, Clock};
use ring::{Sample, SampleRing};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Window statistic used as the representative temperature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representative {
    /// Most recent sample in the window. Tracks current conditions; the
    /// default for HVAC response.
    Latest,
    /// Arithmetic mean over the window, when smoothing is wanted.
    Mean,
}

#[derive(Clone, Copy, Debug)]
pub struct PolicyConfig {
    pub low_threshold_c: f64,
    pub high_threshold_c: f64,
    pub hysteresis_band_c: f64,
    /// Minimum dwell between actuator transitions.
    pub cooldown_ms: u64,
    /// Span of history considered for a decision.
    pub window_ms: u64,
    pub sample_period_ms: u64,
    pub policy_period_ms: u64,
    pub representative: Representative,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            low_threshold_c: 20.0,
            high_threshold_c: 26.0,
            hysteresis_band_c: 1.0,
            cooldown_ms: 300_000,
            window_ms: 30_000,
            sample_period_ms: 1_000,
            policy_period_ms: 100,
            representative: Representative::Latest,
        }
    }
}

/// Fatal at init: running with these is undefined hysteresis behavior.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("low threshold {low} must be below high threshold {high}")]
    ThresholdOrder { low: f64, high: f64 },
    #[error("thresholds must be finite")]
    ThresholdNotFinite,
    #[error("hysteresis band must be finite and non-negative, got {0}")]
    InvalidBand(f64),
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.low_threshold_c.is_finite() || !self.high_threshold_c.is_finite() {
            return Err(ConfigError::ThresholdNotFinite);
        }
        if self.low_threshold_c >= self.high_threshold_c {
            return Err(ConfigError::ThresholdOrder {
                low: self.low_threshold_c,
                high: self.high_threshold_c,
            });
        }
        if !self.hysteresis_band_c.is_finite() || self.hysteresis_band_c < 0.0 {
            return Err(ConfigError::InvalidBand(self.hysteresis_band_c));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::ZeroDuration("window_ms"));
        }
        if self.sample_period_ms == 0 {
            return Err(ConfigError::ZeroDuration("sample_period_ms"));
        }
        if self.policy_period_ms == 0 {
            return Err(ConfigError::ZeroDuration("policy_period_ms"));
        }
        Ok(())
    }
}

/// Last commanded state and when it was committed.
///
/// Written only after the actuator driver acknowledged a command, so it
/// mirrors the physical state as far as the driver reported it.
#[derive(Clone, Copy, Debug)]
pub struct ActuatorGate {
    current: ActuatorState,
    last_transition_ms: Option<u64>,
}

impl ActuatorGate {
    pub fn new() -> Self {
        Self {
            current: ActuatorState::Off,
            last_transition_ms: None,
        }
    }

    pub fn current(&self) -> ActuatorState {
        self.current
    }

    pub fn last_transition_ms(&self) -> Option<u64> {
        self.last_transition_ms
    }

    /// Whether the cooldown since the last transition has elapsed. A gate
    /// that has never transitioned is always ready.
    pub fn ready(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        match self.last_transition_ms {
            Some(at) => now_ms.saturating_sub(at) >= cooldown_ms,
            None => true,
        }
    }

    pub fn note_transition(&mut self, state: ActuatorState, now_ms: u64) {
        self.current = state;
        self.last_transition_ms = Some(now_ms);
    }
}

impl Default for ActuatorGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One hysteresis step. Pure; cooldown and I/O live in [`PolicyEngine`].
///
/// A reversal never jumps between Heating and Cooling directly: the engine
/// must pass through Off and re-trigger from there.
pub fn decide(cfg: &PolicyConfig, current: ActuatorState, temp_c: f64) -> ActuatorState {
    match current {
        ActuatorState::Off => {
            if temp_c <= cfg.low_threshold_c {
                ActuatorState::Heating
            } else if temp_c >= cfg.high_threshold_c {
                ActuatorState::Cooling
            } else {
                ActuatorState::Off
            }
        }
        ActuatorState::Heating => {
            if temp_c >= cfg.low_threshold_c + cfg.hysteresis_band_c {
                ActuatorState::Off
            } else {
                ActuatorState::Heating
            }
        }
        ActuatorState::Cooling => {
            if temp_c <= cfg.high_threshold_c - cfg.hysteresis_band_c {
                ActuatorState::Off
            } else {
                ActuatorState::Cooling
            }
        }
    }
}

/// Periodic consumer: snapshots a time window of samples and drives the
/// actuator through the hysteresis/cooldown state machine.
pub struct PolicyEngine<A, C> {
    cfg: PolicyConfig,
    gate: ActuatorGate,
    actuator: A,
    clock: C,
}

impl<A: Actuator, C: Clock> PolicyEngine<A, C> {
    /// Validates the config and refuses to construct an engine that would
    /// run with undefined hysteresis behavior.
    pub fn new(cfg: PolicyConfig, actuator: A, clock: C) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            gate: ActuatorGate::new(),
            actuator,
            clock,
        })
    }

    pub fn gate(&self) -> &ActuatorGate {
        &self.gate
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.cfg
    }

    fn representative(&self, window: &[Sample]) -> Option<f64> {
        match self.cfg.representative {
            Representative::Latest => window.last().map(|s| s.temp_c),
            Representative::Mean => {
                if window.is_empty() {
                    None
                } else {
                    Some(window.iter().map(|s| s.temp_c).sum::<f64>() / window.len() as f64)
                }
            }
        }
    }

    /// One policy cycle.
    ///
    /// An empty window holds the last actuator state (fail-safe: no data is
    /// not a reason to switch). A decided change is committed to the gate
    /// only after the actuator driver acknowledged the command; on failure
    /// the prior state stays and the next cycle retries.
    pub fn step<const N: usize>(&mut self, ring: &SampleRing<N>) {
        let now_ms = self.clock.now_ms();
        let window = ring.snapshot_window(now_ms.saturating_sub(self.cfg.window_ms));
        let Some(temp_c) = self.representative(&window) else {
            debug!(now_ms, "no samples in window, holding");
            return;
        };

        if !self.gate.ready(now_ms, self.cfg.cooldown_ms) {
            return;
        }

        let next = decide(&self.cfg, self.gate.current(), temp_c);
        if next == self.gate.current() {
            // Idempotent hold: no redundant actuator commands.
            return;
        }

        match self.actuator.command(next) {
            Ok(()) => {
                info!(from = ?self.gate.current(), to = ?next, temp_c, "actuator transition");
                self.gate.note_transition(next, now_ms);
            }
            Err(err) => {
                warn!(%err, to = ?next, "actuator command failed, retaining state");
            }
        }
    }

    /// Periodic loop body for the policy thread. Deadline-paced so period
    /// error does not accumulate; exits when `stop` is raised.
    pub fn run<const N: usize>(mut self, ring: &SampleRing<N>, stop: &AtomicBool) {
        let period = Duration::from_millis(self.cfg.policy_period_ms);
        let mut next = Instant::now() + period;
        while !stop.load(Ordering::Relaxed) {
            self.step(ring);
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
            next += period;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::ActuatorError;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct TestClock(Rc<Cell<u64>>);

    impl TestClock {
        fn at(ms: u64) -> Self {
            Self(Rc::new(Cell::new(ms)))
        }

        fn set(&self, ms: u64) {
            self.0.set(ms);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    #[derive(Clone)]
    struct TestActuator {
        commands: Rc<Cell<usize>>,
        fail_next: Rc<Cell<u32>>,
    }

    impl TestActuator {
        fn new() -> Self {
            Self {
                commands: Rc::new(Cell::new(0)),
                fail_next: Rc::new(Cell::new(0)),
            }
        }
    }

    impl Actuator for TestActuator {
        fn command(&mut self, _state: ActuatorState) -> Result<(), ActuatorError> {
            let pending = self.fail_next.get();
            if pending > 0 {
                self.fail_next.set(pending - 1);
                return Err(ActuatorError::Rejected("injected"));
            }
            self.commands.set(self.commands.get() + 1);
            Ok(())
        }
    }

    fn cfg() -> PolicyConfig {
        PolicyConfig {
            cooldown_ms: 0,
            ..PolicyConfig::default()
        }
    }

    fn engine(cfg: PolicyConfig, clock: TestClock) -> (PolicyEngine<TestActuator, TestClock>, TestActuator) {
        let actuator = TestActuator::new();
        let engine = PolicyEngine::new(cfg, actuator.clone(), clock).unwrap();
        (engine, actuator)
    }

    fn push(ring: &SampleRing<8>, temp_c: f64, at_ms: u64) {
        ring.push(Sample { temp_c, at_ms });
    }

    #[test]
    fn decide_off_engages_heating_at_low_threshold() {
        let cfg = cfg();
        assert_eq!(decide(&cfg, ActuatorState::Off, 20.0), ActuatorState::Heating);
        assert_eq!(decide(&cfg, ActuatorState::Off, 19.0), ActuatorState::Heating);
    }

    #[test]
    fn decide_off_engages_cooling_at_high_threshold() {
        let cfg = cfg();
        assert_eq!(decide(&cfg, ActuatorState::Off, 26.0), ActuatorState::Cooling);
        assert_eq!(decide(&cfg, ActuatorState::Off, 27.5), ActuatorState::Cooling);
    }

    #[test]
    fn decide_off_holds_between_thresholds() {
        let cfg = cfg();
        assert_eq!(decide(&cfg, ActuatorState::Off, 23.0), ActuatorState::Off);
    }

    #[test]
    fn decide_heating_holds_inside_band() {
        let cfg = cfg();
        // Band is 1.0, so heating releases only at >= 21.0.
        assert_eq!(decide(&cfg, ActuatorState::Heating, 20.5), ActuatorState::Heating);
        assert_eq!(decide(&cfg, ActuatorState::Heating, 20.99), ActuatorState::Heating);
        assert_eq!(decide(&cfg, ActuatorState::Heating, 21.0), ActuatorState::Off);
    }

    #[test]
    fn decide_cooling_holds_inside_band() {
        let cfg = cfg();
        assert_eq!(decide(&cfg, ActuatorState::Cooling, 25.5), ActuatorState::Cooling);
        assert_eq!(decide(&cfg, ActuatorState::Cooling, 25.0), ActuatorState::Off);
    }

    #[test]
    fn decide_never_jumps_between_heating_and_cooling() {
        let cfg = cfg();
        // Even an absurdly hot reading releases heating to Off, not Cooling.
        assert_eq!(decide(&cfg, ActuatorState::Heating, 40.0), ActuatorState::Off);
        assert_eq!(decide(&cfg, ActuatorState::Cooling, -10.0), ActuatorState::Off);
    }

    #[test]
    fn decide_with_zero_band_releases_at_threshold() {
        let mut cfg = cfg();
        cfg.hysteresis_band_c = 0.0;
        assert_eq!(decide(&cfg, ActuatorState::Heating, 20.0), ActuatorState::Off);
        assert_eq!(decide(&cfg, ActuatorState::Heating, 19.9), ActuatorState::Heating);
    }

    #[test]
    fn config_rejects_inverted_thresholds() {
        let bad = PolicyConfig {
            low_threshold_c: 26.0,
            high_threshold_c: 20.0,
            ..PolicyConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::ThresholdOrder { .. })));
    }

    #[test]
    fn config_rejects_negative_band() {
        let bad = PolicyConfig {
            hysteresis_band_c: -0.5,
            ..PolicyConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidBand(_))));
    }

    #[test]
    fn config_rejects_non_finite_threshold() {
        let bad = PolicyConfig {
            high_threshold_c: f64::NAN,
            ..PolicyConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::ThresholdNotFinite));
    }

    #[test]
    fn config_rejects_zero_periods() {
        let bad = PolicyConfig {
            policy_period_ms: 0,
            ..PolicyConfig::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn empty_window_makes_no_actuator_call() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(1000);
        let (mut engine, actuator) = engine(cfg(), clock);

        engine.step(&ring);

        assert_eq!(actuator.commands.get(), 0);
        assert_eq!(engine.gate().current(), ActuatorState::Off);
        assert!(engine.gate().last_transition_ms().is_none());
    }

    #[test]
    fn stale_samples_outside_window_are_ignored() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(100_000);
        let (mut engine, actuator) = engine(cfg(), clock);

        // Pushed long before the window opens.
        push(&ring, 10.0, 1_000);
        engine.step(&ring);

        assert_eq!(actuator.commands.get(), 0);
        assert_eq!(engine.gate().current(), ActuatorState::Off);
    }

    #[test]
    fn cold_reading_engages_heating() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(5_000);
        let (mut engine, actuator) = engine(cfg(), clock);

        push(&ring, 18.0, 4_900);
        engine.step(&ring);

        assert_eq!(engine.gate().current(), ActuatorState::Heating);
        assert_eq!(engine.gate().last_transition_ms(), Some(5_000));
        assert_eq!(actuator.commands.get(), 1);
    }

    #[test]
    fn hold_issues_no_redundant_commands() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(5_000);
        let (mut engine, actuator) = engine(cfg(), clock.clone());

        push(&ring, 18.0, 4_900);
        engine.step(&ring);
        assert_eq!(actuator.commands.get(), 1);

        // Still heating; same decision, no second command.
        clock.set(6_000);
        push(&ring, 18.5, 5_900);
        engine.step(&ring);
        assert_eq!(actuator.commands.get(), 1);
    }

    #[test]
    fn cooldown_vetoes_reversal() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(1_000);
        let mut config = cfg();
        config.cooldown_ms = 60_000;
        let (mut engine, actuator) = engine(config, clock.clone());

        push(&ring, 18.0, 900);
        engine.step(&ring);
        assert_eq!(engine.gate().current(), ActuatorState::Heating);

        // Warm enough to release, but inside the cooldown.
        clock.set(30_000);
        push(&ring, 24.0, 29_900);
        engine.step(&ring);
        assert_eq!(engine.gate().current(), ActuatorState::Heating);
        assert_eq!(actuator.commands.get(), 1);

        // Cooldown elapsed: the release goes through.
        clock.set(61_000);
        push(&ring, 24.0, 60_900);
        engine.step(&ring);
        assert_eq!(engine.gate().current(), ActuatorState::Off);
        assert_eq!(actuator.commands.get(), 2);
    }

    #[test]
    fn command_failure_retains_gate_and_retries() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(1_000);
        let (mut engine, actuator) = engine(cfg(), clock.clone());
        actuator.fail_next.set(1);

        push(&ring, 18.0, 900);
        engine.step(&ring);

        // Command rejected: gate unchanged, no transition recorded.
        assert_eq!(engine.gate().current(), ActuatorState::Off);
        assert!(engine.gate().last_transition_ms().is_none());

        // Next cycle retries and succeeds.
        clock.set(1_100);
        engine.step(&ring);
        assert_eq!(engine.gate().current(), ActuatorState::Heating);
        assert_eq!(engine.gate().last_transition_ms(), Some(1_100));
    }

    #[test]
    fn mean_representative_averages_the_window() {
        let ring: SampleRing<8> = SampleRing::new();
        let clock = TestClock::at(5_000);
        let mut config = cfg();
        config.representative = Representative::Mean;
        let (mut engine, _actuator) = engine(config, clock);

        // Latest reading alone would engage heating; the mean must not.
        push(&ring, 25.0, 4_000);
        push(&ring, 25.0, 4_500);
        push(&ring, 19.0, 4_900);
        engine.step(&ring);

        assert_eq!(engine.gate().current(), ActuatorState::Off);
    }

    #[test]
    fn gate_is_ready_before_any_transition() {
        let gate = ActuatorGate::new();
        assert!(gate.ready(0, 300_000));
    }
}
