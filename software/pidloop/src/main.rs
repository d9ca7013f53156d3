#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow as ah;
use clap::{Parser, Subcommand};
use tracing::info;

use pidloop::{Simulation, SimulationConfig, logging};

#[derive(Parser, Debug)]
#[command(about = "Closed-loop PID simulation and frequency-response analysis")]
struct Opts {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a closed-loop simulation and write the trajectories as CSV
    Simulate {
        /// Simulation config JSON; defaults to the step/disturbance scenario
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output CSV path; defaults to `<op-dir>/<op-name>.csv`
        #[arg(long)]
        out: Option<PathBuf>,

        /// Session name used for the log and CSV files
        #[arg(long)]
        op_name: Option<String>,

        /// Directory for outputs
        #[arg(long, default_value = ".")]
        op_dir: PathBuf,
    },

    /// Print the open-loop frequency response of the controller in series
    /// with the plant (s + 1) / (2 s^2 + s + 1)
    #[cfg(feature = "analysis")]
    Bode {
        /// PID config JSON; defaults to the simulation scenario gains
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of log-spaced frequencies between 0.01 and 100 rad/s
        #[arg(long, default_value_t = 50)]
        points: usize,

        /// Derivative filter divisor
        #[arg(long, default_value_t = pidloop::analysis::DEFAULT_DERIVATIVE_FILTER_N)]
        n: f64,
    },
}

fn simulate(
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    op_name: Option<String>,
    op_dir: PathBuf,
) -> ah::Result<()> {
    let op_name = op_name.unwrap_or_else(logging::default_op_name);
    let log = logging::init_logging(&op_dir, &op_name).map_err(ah::Error::msg)?;
    info!("Logging to {:?}", log.current_path().map_err(ah::Error::msg)?);

    let cfg = match config {
        Some(path) => SimulationConfig::load(&path).map_err(ah::Error::msg)?,
        None => SimulationConfig::original_scenario(),
    };
    let mut sim = Simulation::new(cfg).map_err(ah::Error::msg)?;
    info!("\n{}", sim.pid());

    let trace = sim.run();

    let out = out.unwrap_or_else(|| op_dir.join(format!("{op_name}.csv")));
    trace.save_csv(&out).map_err(ah::Error::msg)?;
    info!("Wrote {} rows to {out:?}", trace.len());

    Ok(())
}

#[cfg(feature = "analysis")]
fn bode(config: Option<PathBuf>, points: usize, n: f64) -> ah::Result<()> {
    use pidloop::PidConfig;
    use pidloop::analysis::{TransferFunction, logspace};

    let pid_cfg = match config {
        Some(path) => PidConfig::load(&path).map_err(ah::Error::msg)?,
        None => SimulationConfig::original_scenario().pid,
    };
    let pid = pidloop::Pid::from_config(&pid_cfg, 0.0);

    let controller = pid.transfer_function(n).map_err(ah::Error::msg)?;
    let plant = TransferFunction::new(vec![1.0, 1.0], vec![1.0, 1.0, 2.0]).map_err(ah::Error::msg)?;
    let sys = &controller * &plant;

    println!("Controller num {:?} den {:?}", controller.num, controller.den);
    println!("Open loop  num {:?} den {:?}", sys.num, sys.den);
    println!("{:>14} {:>14} {:>14}", "omega [rad/s]", "gain [dB]", "phase [deg]");
    for p in sys.bode(&logspace(-2.0, 2.0, points)) {
        println!("{:>14.6e} {:>14.4} {:>14.4}", p.omega, p.magnitude_db, p.phase_deg);
    }

    Ok(())
}

fn main() -> ah::Result<()> {
    let opts = Opts::parse();

    match opts.cmd {
        Cmd::Simulate {
            config,
            out,
            op_name,
            op_dir,
        } => simulate(config, out, op_name, op_dir),
        #[cfg(feature = "analysis")]
        Cmd::Bode { config, points, n } => bode(config, points, n),
    }
}
