//! A PID controller with a sampling gate, derivative-on-measurement,
//! and simple saturation for anti-windup

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PidConfig;

/// Saturate an accumulated integral term to `[-windup_max, windup_max]`.
///
/// A `windup_max` of zero disables the saturation and passes the value through.
#[inline]
pub fn anti_windup(value: f64, windup_max: f64) -> f64 {
    if windup_max == 0.0 {
        value
    } else {
        value.min(windup_max).max(-windup_max)
    }
}

fn check_windup_max(windup_max: f64) -> Result<(), String> {
    if !windup_max.is_finite() || windup_max < 0.0 {
        return Err(format!(
            "windup_max must be finite and >= 0; got {windup_max}"
        ));
    }
    Ok(())
}

fn check_sample_time(sample_time: f64) -> Result<(), String> {
    if !sample_time.is_finite() || sample_time < 0.0 {
        return Err(format!(
            "sample_time must be finite and >= 0; got {sample_time}"
        ));
    }
    Ok(())
}

/// Discrete-time PID controller.
///
/// Each call to [`Pid::compute`] is one tick. A tick only advances the
/// controller state once at least `sample_time` seconds have elapsed since
/// the last accepted tick; otherwise it returns `0.0` and changes nothing.
///
/// The derivative term is taken on the measurement rather than the error,
/// so a step in `set_point` between ticks does not produce a derivative kick.
/// ```text
///   output = kp * e + sum(ki * e * dt) + kd * (y_prev - y) / dt
/// ```
///
/// Deserialization applies the same limit checks as the setters.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(try_from = "PidState")]
pub struct Pid {
    // User inputs
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub set_point: f64,
    sample_time: f64,
    windup_max: f64,

    // Internal state
    p_term: f64,
    i_term: f64,
    d_term: f64,
    last_error: f64,
    last_measurement: f64,
    last_output: f64,
    last_tick_time: f64,
}

/// Serialized form of a [`Pid`], checked before it becomes a controller
#[derive(Deserialize)]
struct PidState {
    kp: f64,
    ki: f64,
    kd: f64,
    set_point: f64,
    sample_time: f64,
    windup_max: f64,
    p_term: f64,
    i_term: f64,
    d_term: f64,
    last_error: f64,
    last_measurement: f64,
    last_output: f64,
    last_tick_time: f64,
}

impl TryFrom<PidState> for Pid {
    type Error = String;

    fn try_from(s: PidState) -> Result<Self, String> {
        check_windup_max(s.windup_max)?;
        check_sample_time(s.sample_time)?;
        if anti_windup(s.i_term, s.windup_max) != s.i_term {
            return Err(format!(
                "i_term {} is outside the anti-windup limit {}",
                s.i_term, s.windup_max
            ));
        }

        Ok(Self {
            kp: s.kp,
            ki: s.ki,
            kd: s.kd,
            set_point: s.set_point,
            sample_time: s.sample_time,
            windup_max: s.windup_max,

            p_term: s.p_term,
            i_term: s.i_term,
            d_term: s.d_term,
            last_error: s.last_error,
            last_measurement: s.last_measurement,
            last_output: s.last_output,
            last_tick_time: s.last_tick_time,
        })
    }
}

impl Default for Pid {
    fn default() -> Self {
        Self::from_config(&PidConfig::default(), 0.0)
    }
}

impl Pid {
    /// Build a controller with the default sample time, with timing state
    /// starting at `now`.
    ///
    /// Gains are not validated; zero or negative gains are legal.
    /// A `windup_max` of zero disables anti-windup. Negative or non-finite
    /// limits are treated as zero.
    pub fn new(kp: f64, ki: f64, kd: f64, windup_max: f64, now: f64) -> Self {
        let cfg = PidConfig {
            kp,
            ki,
            kd,
            windup_max,
            ..Default::default()
        };
        Self::from_config(&cfg, now)
    }

    /// Build a controller from a config record with timing state starting at `now`.
    ///
    /// Out-of-range limits are replaced with their disabled values;
    /// use [`PidConfig::validate`] beforehand to reject them instead.
    pub fn from_config(cfg: &PidConfig, now: f64) -> Self {
        let windup_max = if cfg.windup_max.is_finite() && cfg.windup_max > 0.0 {
            cfg.windup_max
        } else {
            0.0
        };
        let sample_time = if cfg.sample_time.is_finite() && cfg.sample_time >= 0.0 {
            cfg.sample_time
        } else {
            0.0
        };

        Self {
            kp: cfg.kp,
            ki: cfg.ki,
            kd: cfg.kd,
            set_point: 0.0,
            sample_time,
            windup_max,

            p_term: 0.0,
            i_term: 0.0,
            d_term: 0.0,
            last_error: 0.0,
            last_measurement: 0.0,
            last_output: 0.0,
            last_tick_time: now,
        }
    }

    /// Run one tick of the controller for the latest `measurement` taken at time `now` [s].
    ///
    /// Returns `0.0` without touching any state if the elapsed time since the
    /// last accepted tick is shorter than `sample_time`, or if it is not
    /// strictly positive (repeated or backwards timestamps).
    pub fn compute(&mut self, measurement: f64, now: f64) -> f64 {
        let error = self.set_point - measurement;
        let dt = now - self.last_tick_time;

        // Sampling gate. Written so that a NaN `dt` also fails.
        if !(dt >= self.sample_time && dt > 0.0 && dt.is_finite()) {
            if dt <= 0.0 && self.sample_time == 0.0 {
                debug!("PID tick skipped on non-positive dt {dt}");
            }
            return 0.0;
        }

        self.p_term = self.kp * error;
        self.i_term += self.ki * error * dt;
        self.d_term = self.kd * (self.last_measurement - measurement) / dt;

        self.i_term = anti_windup(self.i_term, self.windup_max);

        self.last_error = error;
        self.last_measurement = measurement;
        self.last_tick_time = now;

        self.last_output = self.p_term + self.i_term + self.d_term;
        self.last_output
    }

    /// Clear the terms and history and restart timing at `now`.
    /// Gains, set point, and limits are kept.
    pub fn reset(&mut self, now: f64) {
        self.p_term = 0.0;
        self.i_term = 0.0;
        self.d_term = 0.0;
        self.last_error = 0.0;
        self.last_measurement = 0.0;
        self.last_output = 0.0;
        self.last_tick_time = now;
    }

    /// Set the anti-windup limit. Zero disables anti-windup.
    ///
    /// The integral term is saturated to the new limit immediately.
    pub fn set_windup_max(&mut self, windup_max: f64) -> Result<(), String> {
        check_windup_max(windup_max)?;

        self.windup_max = windup_max;
        let clamped = anti_windup(self.i_term, windup_max);
        if clamped != self.i_term {
            warn!(
                "Integral term {} saturated to new anti-windup limit {windup_max}",
                self.i_term
            );
            self.i_term = clamped;
        }
        Ok(())
    }

    /// Set the minimum interval [s] between accepted ticks.
    pub fn set_sample_time(&mut self, sample_time: f64) -> Result<(), String> {
        check_sample_time(sample_time)?;
        self.sample_time = sample_time;
        Ok(())
    }

    pub fn windup_max(&self) -> f64 {
        self.windup_max
    }

    pub fn anti_windup_enabled(&self) -> bool {
        self.windup_max != 0.0
    }

    pub fn sample_time(&self) -> f64 {
        self.sample_time
    }

    pub fn p_term(&self) -> f64 {
        self.p_term
    }

    pub fn i_term(&self) -> f64 {
        self.i_term
    }

    pub fn d_term(&self) -> f64 {
        self.d_term
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    pub fn last_measurement(&self) -> f64 {
        self.last_measurement
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Timestamp [s] of the last accepted tick, or of construction/reset
    pub fn last_tick_time(&self) -> f64 {
        self.last_tick_time
    }

    /// Snapshot of the current tuning, for diagnostics
    pub fn config(&self) -> PidConfig {
        PidConfig {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
            windup_max: self.windup_max,
            sample_time: self.sample_time,
        }
    }

    /// Get config field values
    pub fn get_config(&self) -> BTreeMap<String, f64> {
        let mut cfg = BTreeMap::<String, f64>::new();
        cfg.insert("kp".to_owned(), self.kp);
        cfg.insert("ki".to_owned(), self.ki);
        cfg.insert("kd".to_owned(), self.kd);
        cfg.insert("set_point".to_owned(), self.set_point);
        cfg.insert("sample_time".to_owned(), self.sample_time);
        cfg.insert("windup_max".to_owned(), self.windup_max);

        cfg
    }

    /// Apply config field values.
    ///
    /// Every key and value is checked before any value is applied,
    /// so an error leaves the controller unchanged.
    pub fn set_config(&mut self, cfg: &BTreeMap<String, f64>) -> Result<(), String> {
        for (field, &value) in cfg.iter() {
            match field.as_str() {
                "kp" | "ki" | "kd" | "set_point" => {}
                "sample_time" => check_sample_time(value)?,
                "windup_max" => check_windup_max(value)?,
                _ => return Err(format!("Unrecognized config field {field}")),
            }
        }

        for (field, &value) in cfg.iter() {
            match field.as_str() {
                "kp" => self.kp = value,
                "ki" => self.ki = value,
                "kd" => self.kd = value,
                "set_point" => self.set_point = value,
                "sample_time" => self.set_sample_time(value)?,
                "windup_max" => self.set_windup_max(value)?,
                _ => {}
            }
        }

        debug!("Applied PID config {cfg:?}");
        Ok(())
    }

    /// Continuous-time approximation of this controller with derivative
    /// filter divisor `n`. See [`crate::analysis::pid_transfer_function`].
    #[cfg(feature = "analysis")]
    pub fn transfer_function(&self, n: f64) -> Result<crate::analysis::TransferFunction, String> {
        crate::analysis::pid_transfer_function(self.kp, self.ki, self.kd, n)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PID controller")?;
        writeln!(f, "  kp                {}", self.kp)?;
        writeln!(f, "  ki                {}", self.ki)?;
        writeln!(f, "  kd                {}", self.kd)?;
        writeln!(f, "  set point         {}", self.set_point)?;
        writeln!(f, "  sample time [s]   {}", self.sample_time)?;
        if self.anti_windup_enabled() {
            write!(f, "  anti-windup limit {}", self.windup_max)
        } else {
            write!(f, "  anti-windup limit disabled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    fn assert_close(got: f64, expected: f64) {
        assert!(
            (got - expected).abs() < TOL,
            "expected {expected} got {got}"
        );
    }

    /// The controller used by the scenario checks
    fn scenario_pid() -> Pid {
        Pid::new(1.2, 1.0, 0.001, 0.0, 0.0)
    }

    #[test]
    fn defaults() {
        let pid = Pid::default();
        assert_eq!(pid.kp, 0.5);
        assert_eq!(pid.ki, 0.1);
        assert_eq!(pid.kd, 0.0);
        assert_eq!(pid.set_point, 0.0);
        assert_eq!(pid.sample_time(), 0.02);
        assert_eq!(pid.windup_max(), 0.0);
        assert!(!pid.anti_windup_enabled());
        assert_eq!(pid.i_term(), 0.0);
        assert_eq!(pid.last_output(), 0.0);
        assert_eq!(pid.last_tick_time(), 0.0);
    }

    #[test]
    fn gate_leaves_state_unchanged() {
        let mut pid = scenario_pid();
        pid.set_point = 1.0;
        let first = pid.compute(0.25, 0.05);
        assert!(first != 0.0);

        let before = pid.clone();
        let out = pid.compute(0.5, 0.05 + 0.019);
        assert_eq!(out, 0.0);
        assert_eq!(pid.i_term(), before.i_term());
        assert_eq!(pid.p_term(), before.p_term());
        assert_eq!(pid.d_term(), before.d_term());
        assert_eq!(pid.last_error(), before.last_error());
        assert_eq!(pid.last_measurement(), before.last_measurement());
        assert_eq!(pid.last_output(), before.last_output());
        assert_eq!(pid.last_tick_time(), before.last_tick_time());
    }

    #[test]
    fn gate_is_a_floor_measured_from_last_accepted_tick() {
        let mut pid = scenario_pid();
        pid.set_point = 1.0;

        // Rejected ticks do not move the reference time
        assert_eq!(pid.compute(0.0, 0.01), 0.0);
        assert_eq!(pid.compute(0.0, 0.015), 0.0);
        let out = pid.compute(0.0, 0.03);
        assert!(out != 0.0);
        assert_eq!(pid.last_tick_time(), 0.03);

        // Real elapsed time is used, not the sample time
        assert_close(pid.i_term(), 1.0 * 1.0 * 0.03);
    }

    #[test]
    fn proportional_only_ignores_history() {
        let mut pid = Pid::new(2.5, 0.0, 0.0, 0.0, 0.0);
        pid.set_point = 3.0;
        let mut t = 0.0;
        for y in [0.0, 1.0, -4.0, 3.0, 10.0] {
            t += 0.1;
            let out = pid.compute(y, t);
            assert_close(out, 2.5 * (3.0 - y));
        }
    }

    #[test]
    fn integral_accumulates_error_times_dt() {
        let mut pid = Pid::new(0.0, 0.7, 0.0, 0.0, 0.0);
        pid.set_point = 2.0;

        let ticks = [(0.5, 0.02), (1.0, 0.05), (-1.0, 0.1), (2.5, 0.13), (0.0, 0.2)];
        let mut expected = 0.0;
        let mut t_prev = 0.0;
        for (y, t) in ticks {
            expected += 0.7 * (2.0 - y) * (t - t_prev);
            t_prev = t;
            let out = pid.compute(y, t);
            assert_close(pid.i_term(), expected);
            assert_close(out, expected);
        }
    }

    #[test]
    fn integral_saturates_at_limit() {
        let mut pid = Pid::new(1.2, 1.0, 0.001, 0.5, 0.0);
        pid.set_point = 10.0;

        let mut t = 0.0;
        let mut saturated = false;
        for _ in 0..200 {
            t += 0.05;
            pid.compute(0.0, t);
            assert!(pid.i_term() <= 0.5 && pid.i_term() >= -0.5);
            if saturated {
                assert_eq!(pid.i_term(), 0.5);
            }
            saturated |= pid.i_term() == 0.5;
        }
        assert!(saturated);

        // Saturation is symmetric
        pid.set_point = -10.0;
        for _ in 0..200 {
            t += 0.05;
            pid.compute(0.0, t);
        }
        assert_eq!(pid.i_term(), -0.5);
    }

    #[test]
    fn integral_is_not_clamped_when_disabled() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 0.0, 0.0);
        pid.set_point = 100.0;
        let mut t = 0.0;
        for _ in 0..100 {
            t += 0.1;
            pid.compute(0.0, t);
        }
        assert!((pid.i_term() - 1000.0).abs() < 1e-9, "{}", pid.i_term());
    }

    #[test]
    fn derivative_on_measurement() {
        let mut pid = Pid::new(0.0, 0.0, 0.5, 0.0, 0.0);
        pid.set_point = 1.0;
        pid.compute(0.2, 0.1);
        pid.compute(0.6, 0.35);
        assert_close(pid.d_term(), 0.5 * (0.2 - 0.6) / 0.25);
    }

    #[test]
    fn no_derivative_kick_on_set_point_step() {
        let mut pid = Pid::new(0.0, 0.0, 1.0, 0.0, 0.0);
        pid.compute(0.3, 0.1);
        pid.set_point = 50.0;
        pid.compute(0.3, 0.2);
        assert_eq!(pid.d_term(), 0.0);
    }

    #[test]
    fn zero_error_gives_zero_output() {
        let mut pid = scenario_pid();
        let mut t = 0.0;
        for _ in 0..20 {
            t += 0.025;
            assert_eq!(pid.compute(0.0, t), 0.0);
            assert_eq!(pid.p_term(), 0.0);
            assert_eq!(pid.i_term(), 0.0);
            assert_eq!(pid.d_term(), 0.0);
        }
    }

    #[test]
    fn unit_step_first_tick() {
        let mut pid = scenario_pid();
        pid.set_point = 1.0;
        let dt = 0.03;
        let out = pid.compute(0.0, dt);
        assert_close(pid.p_term(), 1.2);
        assert_close(pid.i_term(), dt);
        assert_eq!(pid.d_term(), 0.0);
        assert_close(out, 1.2 + dt);
        assert_close(pid.last_output(), out);
        assert_close(pid.last_error(), 1.0);
    }

    #[test]
    fn zero_sample_time_skips_non_positive_dt() {
        let mut pid = Pid::new(1.0, 1.0, 1.0, 0.0, 0.0);
        pid.set_sample_time(0.0).unwrap();
        pid.set_point = 1.0;

        let out = pid.compute(0.5, 0.1);
        assert!(out.is_finite() && out != 0.0);
        let before = pid.clone();

        // Repeated timestamp
        assert_eq!(pid.compute(0.7, 0.1), 0.0);
        // Clock went backwards
        assert_eq!(pid.compute(0.7, 0.05), 0.0);
        // Garbage timestamp
        assert_eq!(pid.compute(0.7, f64::NAN), 0.0);
        assert_eq!(pid.last_tick_time(), before.last_tick_time());
        assert_eq!(pid.i_term(), before.i_term());
        assert_eq!(pid.last_measurement(), before.last_measurement());

        // Any positive interval passes
        assert!(pid.compute(0.7, 0.1 + 1e-6).is_finite());
    }

    #[test]
    fn lowering_windup_limit_saturates_immediately() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 0.0, 0.0);
        pid.set_point = 1.0;
        pid.compute(0.0, 2.0);
        assert_close(pid.i_term(), 2.0);

        pid.set_windup_max(0.75).unwrap();
        assert_eq!(pid.i_term(), 0.75);
        assert!(pid.set_windup_max(-1.0).is_err());
        assert!(pid.set_windup_max(f64::INFINITY).is_err());
        assert_eq!(pid.windup_max(), 0.75);
        assert!(pid.set_sample_time(-0.1).is_err());
    }

    #[test]
    fn reset_restarts_timing() {
        let mut pid = Pid::new(1.0, 1.0, 0.0, 0.0, 0.0);
        pid.set_point = 1.0;
        pid.compute(0.0, 1.0);
        pid.reset(5.0);
        assert_eq!(pid.i_term(), 0.0);
        assert_eq!(pid.last_output(), 0.0);
        assert_eq!(pid.last_tick_time(), 5.0);
        assert_eq!(pid.set_point, 1.0);
        assert_eq!(pid.compute(0.0, 5.01), 0.0);
    }

    #[test]
    fn config_query_and_update() {
        let mut pid = scenario_pid();
        let cfg = pid.get_config();
        assert_eq!(cfg["kp"], 1.2);
        assert_eq!(cfg["kd"], 0.001);
        assert_eq!(cfg.len(), 6);

        let mut update = BTreeMap::new();
        update.insert("ki".to_owned(), 0.25);
        update.insert("windup_max".to_owned(), 2.0);
        pid.set_config(&update).unwrap();
        assert_eq!(pid.ki, 0.25);
        assert_eq!(pid.windup_max(), 2.0);

        // Unknown or invalid fields leave the controller as it was
        update.insert("bogus".to_owned(), 1.0);
        assert!(pid.set_config(&update).is_err());
        let mut bad = BTreeMap::new();
        bad.insert("kp".to_owned(), 9.0);
        bad.insert("sample_time".to_owned(), -1.0);
        assert!(pid.set_config(&bad).is_err());
        assert_eq!(pid.kp, 1.2);
    }

    #[test]
    fn display_lists_parameters() {
        let pid = Pid::new(1.1, 1.0, 0.001, 100.0, 0.0);
        let text = pid.to_string();
        assert!(text.contains("kp                1.1"));
        assert!(text.contains("anti-windup limit 100"));
        assert!(Pid::default().to_string().contains("disabled"));
    }

    #[test]
    fn anti_windup_rule() {
        assert_eq!(anti_windup(20.0, 0.0), 20.0);
        assert_eq!(anti_windup(20.0, 10.0), 10.0);
        assert_eq!(anti_windup(-20.0, 10.0), -10.0);
        assert_eq!(anti_windup(2.0, 10.0), 2.0);
    }

    #[test]
    fn test_ser_roundtrip() {
        let mut pid = scenario_pid();
        pid.set_point = 1.0;
        pid.compute(0.0, 0.1);

        let serialized = serde_json::to_string(&pid).unwrap();
        let deserialized = serde_json::from_str::<Pid>(&serialized).unwrap();
        let reserialized = serde_json::to_string(&deserialized).unwrap();

        assert_eq!(serialized, reserialized);
        assert_eq!(deserialized.i_term(), pid.i_term());
    }

    #[test]
    fn deserialize_rejects_bad_limits() {
        let pid = Pid::new(0.0, 1.0, 0.0, 0.0, 0.0);
        let mut doc: serde_json::Value = serde_json::to_value(&pid).unwrap();

        for (field, bad) in [
            ("windup_max", serde_json::json!(-1.0)),
            ("sample_time", serde_json::json!(-0.02)),
        ] {
            let mut edited = doc.clone();
            edited[field] = bad;
            let err = serde_json::from_value::<Pid>(edited).unwrap_err();
            assert!(err.to_string().contains(field), "{err}");
        }

        // An integral already outside a valid limit is rejected too
        doc["windup_max"] = serde_json::json!(0.5);
        doc["i_term"] = serde_json::json!(2.0);
        assert!(serde_json::from_value::<Pid>(doc.clone()).is_err());

        // A valid document yields a controller that stays at zero with zero error
        doc["i_term"] = serde_json::json!(0.0);
        let mut loaded: Pid = serde_json::from_value(doc).unwrap();
        assert_eq!(loaded.compute(0.0, 0.1), 0.0);
        assert_eq!(loaded.i_term(), 0.0);
    }

    #[test]
    fn rejected_config_update_does_not_touch_integral() {
        let mut pid = Pid::new(0.0, 1.0, 0.0, 0.0, 0.0);
        pid.set_point = 1.0;
        pid.compute(0.0, 2.0);

        let mut update = BTreeMap::new();
        update.insert("windup_max".to_owned(), 0.5);
        update.insert("sample_time".to_owned(), f64::NAN);
        assert!(pid.set_config(&update).is_err());
        assert_eq!(pid.windup_max(), 0.0);
        assert!((pid.i_term() - 2.0).abs() < 1e-12);
    }
}
