//! Simulated zone and drivers, so the controller core can be exercised end
//! to end without hardware.

use std::sync::{Arc, Mutex};

use hal::{Actuator, ActuatorError, ActuatorState, SensorError, TemperatureSensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

#[derive(Clone, Copy, Debug)]
pub struct ZoneParams {
    pub outdoor_c: f64,
    pub thermal_mass: f64,
    /// Heat input while the actuator is in Heating.
    pub heat_rate: f64,
    /// Heat extraction while the actuator is in Cooling.
    pub cool_rate: f64,
    /// Envelope leakage toward the outdoor temperature.
    pub k_leak: f64,
}

impl Default for ZoneParams {
    fn default() -> Self {
        Self {
            outdoor_c: 10.0,
            thermal_mass: 50.0,
            heat_rate: 40.0,
            cool_rate: 35.0,
            k_leak: 0.6,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ZoneState {
    pub temp_c: f64,
    pub mode: ActuatorState,
}

impl Default for ZoneState {
    fn default() -> Self {
        Self {
            temp_c: 22.0,
            mode: ActuatorState::Off,
        }
    }
}

impl ZoneState {
    /// Simple Euler integration of a single-zone thermal model:
    /// dT/dt = (input(mode) - k_leak*(T - outdoor)) / thermal_mass
    pub fn step(&mut self, p: &ZoneParams, dt_s: f64) {
        let input = match self.mode {
            ActuatorState::Off => 0.0,
            ActuatorState::Heating => p.heat_rate,
            ActuatorState::Cooling => -p.cool_rate,
        };
        let leak = p.k_leak * (self.temp_c - p.outdoor_c);
        self.temp_c += (input - leak) / p.thermal_mass * dt_s;

        // Keep within reasonable bounds for a demo
        if self.temp_c.is_nan() {
            self.temp_c = p.outdoor_c;
        }
    }
}

/// Shared handle to the simulated zone. The sensor and the actuator observe
/// the same state, like a real room.
pub type SharedZone = Arc<Mutex<ZoneState>>;

pub fn shared_zone(initial: ZoneState) -> SharedZone {
    Arc::new(Mutex::new(initial))
}

fn zone_lock(zone: &SharedZone) -> std::sync::MutexGuard<'_, ZoneState> {
    match zone.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Copy, Debug)]
pub enum SensorFault {
    None,
    Stuck { value: f64 },
    Bias { value: f64 },
    Drift { per_read_c: f64 },
    DropoutEvery { n: u64 },
}

/// Simulated temperature sensor: reads the true zone temperature, adds
/// Gaussian noise and optionally injects a fault.
pub struct SimSensor {
    pub noise_std: f64,
    pub fault: SensorFault,
    pub valid_range: (f64, f64),
    zone: SharedZone,
    rng: StdRng,
    read_count: u64,
}

impl SimSensor {
    pub fn new(zone: SharedZone, seed: u64) -> Self {
        Self {
            noise_std: 0.1,
            fault: SensorFault::None,
            valid_range: (-40.0, 85.0),
            zone,
            rng: StdRng::seed_from_u64(seed),
            read_count: 0,
        }
    }
}

impl TemperatureSensor for SimSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        self.read_count += 1;
        let true_temp = zone_lock(&self.zone).temp_c;

        let mut v = match self.fault {
            SensorFault::None => true_temp,
            SensorFault::Stuck { value } => value,
            SensorFault::Bias { value } => true_temp + value,
            SensorFault::Drift { per_read_c } => true_temp + per_read_c * self.read_count as f64,
            SensorFault::DropoutEvery { n } => {
                if n > 0 && (self.read_count % n) == 0 {
                    return Err(SensorError::Dropout);
                }
                true_temp
            }
        };

        if self.noise_std > 0.0 {
            let normal = Normal::new(0.0, self.noise_std).unwrap();
            v += normal.sample(&mut self.rng);
        }

        if !v.is_finite() || v < self.valid_range.0 || v > self.valid_range.1 {
            return Err(SensorError::OutOfRange(v));
        }

        Ok(v)
    }
}

/// Simulated actuator: applies the commanded mode to the zone. A scripted
/// rejection count exercises the policy's command-then-commit path.
pub struct SimActuator {
    pub fail_next: u32,
    zone: SharedZone,
}

impl SimActuator {
    pub fn new(zone: SharedZone) -> Self {
        Self { fail_next: 0, zone }
    }
}

impl Actuator for SimActuator {
    fn command(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ActuatorError::Rejected("injected failure"));
        }
        zone_lock(&self.zone).mode = state;
        Ok(())
    }
}
