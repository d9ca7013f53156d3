//! Closed-loop harness that drives a [`Pid`] against a [`Process`] model
//! on a synthetic clock and records the trajectories.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PidConfig;
use crate::pid::Pid;
use crate::process::{Integrator, Process};
use crate::trace::{Trace, TraceRow};

/// Set point assignment applied just after the controller runs on `tick`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct SetPointChange {
    pub tick: usize,
    pub value: f64,
}

/// Additive shift of the controlled variable on each tick in `start..=end`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Disturbance {
    pub start: usize,
    pub end: usize,
    pub value: f64,
}

/// Full description of a closed-loop run
#[derive(Serialize, Deserialize, Debug)]
pub struct SimulationConfig {
    pub pid: PidConfig,
    pub process: Box<dyn Process>,

    /// Interval [s] of the synthetic clock between ticks.
    /// May be shorter than the controller's sample time.
    pub tick_period_s: f64,

    /// Ticks are numbered from 1 to `n_ticks` inclusive
    pub n_ticks: usize,

    #[serde(default)]
    pub initial_set_point: f64,

    #[serde(default)]
    pub set_point_changes: Vec<SetPointChange>,

    #[serde(default)]
    pub disturbances: Vec<Disturbance>,
}

impl SimulationConfig {
    /// Unit set point step at tick 10, return to zero at tick 50,
    /// and a +2 disturbance on ticks 100 through 103, against an integrating process.
    pub fn original_scenario() -> Self {
        Self {
            pid: PidConfig {
                kp: 1.2,
                ki: 1.0,
                kd: 0.001,
                ..Default::default()
            },
            process: Box::new(Integrator::default()),
            tick_period_s: 0.01,
            n_ticks: 149,
            initial_set_point: 0.0,
            set_point_changes: vec![
                SetPointChange {
                    tick: 10,
                    value: 1.0,
                },
                SetPointChange {
                    tick: 50,
                    value: 0.0,
                },
            ],
            disturbances: vec![Disturbance {
                start: 100,
                end: 103,
                value: 2.0,
            }],
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.pid.validate()?;
        if !(self.tick_period_s.is_finite() && self.tick_period_s > 0.0) {
            return Err(format!(
                "tick_period_s must be finite and > 0; got {}",
                self.tick_period_s
            ));
        }
        for d in self.disturbances.iter() {
            if d.start > d.end {
                return Err(format!("Disturbance window {}..={} is empty", d.start, d.end));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(s: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| format!("Failed to parse simulation config: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a JSON file
    pub fn load(path: &Path) -> Result<Self, String> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read simulation config {path:?}: {e}"))?;
        Self::from_json_str(&s)
    }
}

/// A controller and process wired into a loop
#[derive(Debug)]
pub struct Simulation {
    cfg: SimulationConfig,
    pid: Pid,
}

impl Simulation {
    pub fn new(cfg: SimulationConfig) -> Result<Self, String> {
        cfg.validate()?;
        let pid = Pid::from_config(&cfg.pid, 0.0);
        Ok(Self { cfg, pid })
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Run every tick from a fresh controller and process state.
    ///
    /// On each tick the controller sees the current measurement, its output
    /// is applied to the process, then any scheduled set point change and
    /// disturbance take effect.
    pub fn run(&mut self) -> Trace {
        let cfg = &mut self.cfg;
        let dt = cfg.tick_period_s;

        self.pid.reset(0.0);
        self.pid.set_point = cfg.initial_set_point;
        cfg.process.reset();

        info!(
            "Running {} ticks at {dt} s against {:?}",
            cfg.n_ticks, cfg.process
        );

        let mut trace = Trace {
            rows: Vec::with_capacity(cfg.n_ticks),
        };
        for tick in 1..=cfg.n_ticks {
            let time_s = tick as f64 * dt;

            let output = self.pid.compute(cfg.process.measurement(), time_s);
            let updated = self.pid.last_tick_time() == time_s;
            cfg.process.step(output, dt);

            if let Some(change) = cfg.set_point_changes.iter().find(|c| c.tick == tick) {
                debug!(
                    "Set point {} -> {} at tick {tick}",
                    self.pid.set_point, change.value
                );
                self.pid.set_point = change.value;
            }

            let disturbance: f64 = cfg
                .disturbances
                .iter()
                .filter(|d| (d.start..=d.end).contains(&tick))
                .map(|d| d.value)
                .sum();
            if disturbance != 0.0 {
                cfg.process.disturb(disturbance);
            }

            trace.rows.push(TraceRow {
                tick: tick as i64,
                time_s,
                set_point: self.pid.set_point,
                measurement: cfg.process.measurement(),
                output,
                p_term: self.pid.p_term(),
                i_term: self.pid.i_term(),
                d_term: self.pid.d_term(),
                disturbance,
                updated,
            });
        }

        info!(
            "Finished with {} controller updates; final measurement {:?}",
            trace.updates().count(),
            trace.final_measurement()
        );

        trace
    }
}
