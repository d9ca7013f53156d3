//! Process models driven by the controller output in closed-loop simulation.
//!
//! Models are registered as serializable trait objects so that a simulation
//! can be described entirely in a JSON document.

use serde::{Deserialize, Serialize};

/// A plant that responds to the controller output.
#[typetag::serde(tag = "type")]
pub trait Process: Send + Sync + std::fmt::Debug {
    /// Current value of the controlled variable
    fn measurement(&self) -> f64;

    /// Apply control effort `u` over an interval of `dt` seconds
    fn step(&mut self, u: f64, dt: f64);

    /// Shift the controlled variable directly, as an external disturbance would
    fn disturb(&mut self, delta: f64);

    /// Return to the initial condition
    fn reset(&mut self);
}

/// Accumulates each control output directly into the controlled variable,
/// `y += gain * u`, independent of the tick interval.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(from = "IntegratorParams")]
pub struct Integrator {
    pub gain: f64,
    pub y0: f64,

    #[serde(skip)]
    y: f64,
}

impl Integrator {
    pub fn new(gain: f64, y0: f64) -> Self {
        Self { gain, y0, y: y0 }
    }
}

#[derive(Deserialize)]
struct IntegratorParams {
    gain: f64,
    y0: f64,
}

impl From<IntegratorParams> for Integrator {
    fn from(p: IntegratorParams) -> Self {
        Self::new(p.gain, p.y0)
    }
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

#[typetag::serde]
impl Process for Integrator {
    fn measurement(&self) -> f64 {
        self.y
    }

    fn step(&mut self, u: f64, _dt: f64) {
        self.y += self.gain * u;
    }

    fn disturb(&mut self, delta: f64) {
        self.y += delta;
    }

    fn reset(&mut self) {
        self.y = self.y0;
    }
}

/// First-order lag `tau * dy/dt = k * u - y`, advanced with explicit Euler steps.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(from = "FirstOrderLagParams")]
pub struct FirstOrderLag {
    /// Steady-state gain
    pub k: f64,

    /// Time constant [s]
    pub tau_s: f64,
    pub y0: f64,

    #[serde(skip)]
    y: f64,
}

impl FirstOrderLag {
    pub fn new(k: f64, tau_s: f64, y0: f64) -> Self {
        Self { k, tau_s, y0, y: y0 }
    }
}

#[derive(Deserialize)]
struct FirstOrderLagParams {
    k: f64,
    tau_s: f64,
    y0: f64,
}

impl From<FirstOrderLagParams> for FirstOrderLag {
    fn from(p: FirstOrderLagParams) -> Self {
        Self::new(p.k, p.tau_s, p.y0)
    }
}

#[typetag::serde]
impl Process for FirstOrderLag {
    fn measurement(&self) -> f64 {
        self.y
    }

    fn step(&mut self, u: f64, dt: f64) {
        if self.tau_s > 0.0 {
            // Limit the step to one time constant to keep Euler stable
            let h = dt.min(self.tau_s);
            self.y += h * (self.k * u - self.y) / self.tau_s;
        } else {
            self.y = self.k * u;
        }
    }

    fn disturb(&mut self, delta: f64) {
        self.y += delta;
    }

    fn reset(&mut self) {
        self.y = self.y0;
    }
}
