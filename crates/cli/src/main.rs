use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use hal::SystemClock;
use policy::{PolicyConfig, PolicyEngine};
use ring::SampleRing;
use sampler::SensorSampler;
use sim::{SensorFault, SimActuator, SimSensor, ZoneParams, ZoneState};

#[derive(Clone, Debug, ValueEnum)]
enum Scenario {
    Normal,
    Heatwave,
    ColdSnap,
    SensorDropout,
}

#[derive(Parser, Debug)]
#[command(
    name = "zone-hvac",
    version,
    about = "Single-zone HVAC control runtime against a simulated zone"
)]
struct Args {
    #[arg(value_enum, long, default_value = "normal")]
    scenario: Scenario,

    /// Total simulated run time in seconds
    #[arg(long, default_value_t = 30.0)]
    seconds: f64,

    /// Zone model step in milliseconds
    #[arg(long, default_value_t = 100)]
    dt_ms: u64,

    /// Sensor sampling period in milliseconds
    #[arg(long, default_value_t = 250)]
    sample_ms: u64,

    /// Policy evaluation period in milliseconds
    #[arg(long, default_value_t = 50)]
    policy_ms: u64,

    /// Heating trigger threshold (°C)
    #[arg(long, default_value_t = 20.0)]
    low: f64,

    /// Cooling trigger threshold (°C)
    #[arg(long, default_value_t = 26.0)]
    high: f64,

    /// Hysteresis band (°C)
    #[arg(long, default_value_t = 1.0)]
    band: f64,

    /// Minimum dwell between actuator transitions (ms); demo-compressed
    #[arg(long, default_value_t = 3000)]
    cooldown_ms: u64,

    /// Decision window span (ms)
    #[arg(long, default_value_t = 5000)]
    window_ms: u64,

    /// RNG seed for deterministic sensor noise
    #[arg(long, default_value_t = 12345)]
    seed: u64,
}

#[derive(serde::Serialize)]
struct TraceRow {
    t_s: f64,
    true_temp_c: f64,
    mode: String,
    ring_len: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // JSONL trace goes to stdout; keep the log stream on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(scenario = ?args.scenario, seconds = args.seconds, "starting zone demo");

    let cfg = PolicyConfig {
        low_threshold_c: args.low,
        high_threshold_c: args.high,
        hysteresis_band_c: args.band,
        cooldown_ms: args.cooldown_ms,
        window_ms: args.window_ms,
        sample_period_ms: args.sample_ms,
        policy_period_ms: args.policy_ms,
        ..PolicyConfig::default()
    };

    // Zone, drivers, scenario
    let (params, initial) = scenario_zone(&args.scenario);
    let zone = sim::shared_zone(initial);
    let mut sensor = SimSensor::new(zone.clone(), args.seed);
    apply_scenario(&args.scenario, &mut sensor);
    let actuator = SimActuator::new(zone.clone());

    // One clock origin shared by both threads
    let clock = SystemClock::new();

    let ring: Arc<SampleRing> = Arc::new(SampleRing::new());
    let stop = Arc::new(AtomicBool::new(false));

    let sampler = SensorSampler::new(sensor, clock, args.sample_ms);
    let engine = PolicyEngine::new(cfg, actuator, clock).context("invalid policy config")?;

    let sampler_handle = thread::spawn({
        let ring = ring.clone();
        let stop = stop.clone();
        move || sampler.run(&ring, &stop)
    });
    let policy_handle = thread::spawn({
        let ring = ring.clone();
        let stop = stop.clone();
        move || engine.run(&ring, &stop)
    });

    // The main thread plays the physical world: it advances the zone model
    // and emits one JSONL row per step.
    let dt_s = (args.dt_ms as f64) / 1000.0;
    let steps = (args.seconds / dt_s).ceil() as u64;
    for k in 0..steps {
        let t_s = (k as f64) * dt_s;

        let ring_len = ring.len();
        let row = {
            let mut z = match zone.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            z.step(&params, dt_s);
            TraceRow {
                t_s,
                true_temp_c: z.temp_c,
                mode: format!("{:?}", z.mode),
                ring_len,
            }
        };
        println!("{}", serde_json::to_string(&row)?);

        thread::sleep(Duration::from_millis(args.dt_ms));
    }

    stop.store(true, Ordering::Relaxed);
    sampler_handle
        .join()
        .map_err(|_| anyhow!("sampler thread panicked"))?;
    policy_handle
        .join()
        .map_err(|_| anyhow!("policy thread panicked"))?;

    Ok(())
}

fn scenario_zone(s: &Scenario) -> (ZoneParams, ZoneState) {
    let mut params = ZoneParams::default();
    let mut initial = ZoneState::default();
    match s {
        Scenario::Normal => {
            params.outdoor_c = 10.0;
            initial.temp_c = 22.0;
        }
        Scenario::Heatwave => {
            params.outdoor_c = 35.0;
            initial.temp_c = 25.0;
        }
        Scenario::ColdSnap => {
            params.outdoor_c = -5.0;
            initial.temp_c = 21.0;
        }
        Scenario::SensorDropout => {
            params.outdoor_c = 5.0;
            initial.temp_c = 21.0;
        }
    }
    (params, initial)
}

fn apply_scenario(s: &Scenario, sensor: &mut SimSensor) {
    sensor.noise_std = 0.15;
    if matches!(s, Scenario::SensorDropout) {
        sensor.fault = SensorFault::DropoutEvery { n: 3 };
        sensor.noise_std = 0.3;
    }
}
