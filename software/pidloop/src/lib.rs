//! Discrete-time PID control with a sampling gate, derivative-on-measurement,
//! and integral anti-windup, plus a closed-loop simulation harness and
//! frequency-response analysis of the tuned controller.
//!
//! The controller takes timestamps from the caller, so the same code runs
//! against a monotonic clock in production and a synthetic clock in tests.
//! ```
//! use pidloop::Pid;
//!
//! let mut pid = Pid::new(1.2, 1.0, 0.001, 0.0, 0.0);
//! pid.set_point = 1.0;
//!
//! // Too soon after construction; the tick is ignored
//! assert_eq!(pid.compute(0.0, 0.01), 0.0);
//!
//! let u = pid.compute(0.0, 0.03);
//! assert!((u - (1.2 + 0.03)).abs() < 1e-12);
//! ```

pub mod config;
pub mod logging;
pub mod pid;
pub mod process;
pub mod simulation;
pub mod trace;

#[cfg(feature = "analysis")]
pub mod analysis;

pub use config::PidConfig;
pub use pid::{Pid, anti_windup};
pub use process::{FirstOrderLag, Integrator, Process};
pub use simulation::{Disturbance, SetPointChange, Simulation, SimulationConfig};
pub use trace::{Trace, TraceRow};
