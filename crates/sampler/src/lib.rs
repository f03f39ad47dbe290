//! Periodic sensor sampling thread body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hal::{Clock, TemperatureSensor};
use ring::{Sample, SampleRing};
use tracing::{trace, warn};

/// Periodic producer: reads the sensor, stamps the reading with the shared
/// monotonic clock and pushes it into the history. The ring is the only
/// shared state it touches.
pub struct SensorSampler<S, C> {
    sensor: S,
    clock: C,
    period: Duration,
}

impl<S: TemperatureSensor, C: Clock> SensorSampler<S, C> {
    pub fn new(sensor: S, clock: C, period_ms: u64) -> Self {
        Self {
            sensor,
            clock,
            period: Duration::from_millis(period_ms),
        }
    }

    /// One sampling cycle. A transient sensor failure skips the push — the
    /// ring never receives a fabricated value.
    pub fn sample_once<const N: usize>(&mut self, ring: &SampleRing<N>) {
        match self.sensor.read_temperature() {
            Ok(temp_c) => {
                let sample = Sample {
                    temp_c,
                    at_ms: self.clock.now_ms(),
                };
                ring.push(sample);
                trace!(temp_c, at_ms = sample.at_ms, "pushed sample");
            }
            Err(err) => warn!(%err, "sensor read failed, skipping cycle"),
        }
    }

    /// Sampling loop for the producer thread. Deadline-paced (`next` deadline
    /// advances by one period per cycle) so jitter does not accumulate as
    /// drift; exits when `stop` is raised.
    pub fn run<const N: usize>(mut self, ring: &SampleRing<N>, stop: &AtomicBool) {
        let mut next = Instant::now() + self.period;
        while !stop.load(Ordering::Relaxed) {
            self.sample_once(ring);
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
            next += self.period;
        }
    }
}
