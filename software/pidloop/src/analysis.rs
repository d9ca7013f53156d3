//! Continuous-time approximation of the controller and frequency-response analysis.
//!
//! Nothing here feeds back into [`crate::Pid::compute`]; this module only
//! consumes the gains.

use std::ops::Mul;

use nalgebra::Complex;
use serde::{Deserialize, Serialize};

/// Default divisor of the derivative filter time constant
pub const DEFAULT_DERIVATIVE_FILTER_N: f64 = 15.0;

/// Evaluate a polynomial with coeffs ordered by increasing order (c[0] + [c1]*s + ...)
#[inline]
pub fn polyval_complex(s: Complex<f64>, c: &[f64]) -> Complex<f64> {
    // Horner's method, starting from the highest-order coefficient
    c.iter()
        .rev()
        .fold(Complex::new(0.0, 0.0), |acc, &coef| acc * s + coef)
}

/// Product of two polynomials with coeffs ordered by increasing order
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return vec![];
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Rational transfer function `num(s) / den(s)`
/// with coeffs ordered by increasing power of `s`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransferFunction {
    pub num: Vec<f64>,
    pub den: Vec<f64>,
}

/// Gain and phase at one angular frequency
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct BodePoint {
    /// Angular frequency [rad/s]
    pub omega: f64,
    pub magnitude_db: f64,
    pub phase_deg: f64,
}

impl TransferFunction {
    pub fn new(num: Vec<f64>, den: Vec<f64>) -> Result<Self, String> {
        if num.is_empty() {
            return Err("Transfer function numerator has no coefficients".to_string());
        }
        if den.iter().all(|&c| c == 0.0) {
            return Err("Transfer function denominator is identically zero".to_string());
        }
        if num.iter().chain(den.iter()).any(|c| !c.is_finite()) {
            return Err("Transfer function requires finite coefficients".to_string());
        }
        Ok(Self { num, den })
    }

    /// Evaluate at a point `s` in the complex plane
    pub fn eval(&self, s: Complex<f64>) -> Complex<f64> {
        polyval_complex(s, &self.num) / polyval_complex(s, &self.den)
    }

    /// Gain and phase at angular frequency `omega` [rad/s]
    pub fn frequency_response(&self, omega: f64) -> BodePoint {
        let h = self.eval(Complex::new(0.0, omega));
        BodePoint {
            omega,
            magnitude_db: 20.0 * h.norm().log10(),
            phase_deg: h.arg().to_degrees(),
        }
    }

    /// Frequency response over a set of angular frequencies, with phase
    /// unwrapped so that it is continuous across the sweep
    pub fn bode(&self, omegas: &[f64]) -> Vec<BodePoint> {
        let mut points: Vec<BodePoint> = omegas
            .iter()
            .map(|&w| self.frequency_response(w))
            .collect();

        let mut offset = 0.0;
        for i in 1..points.len() {
            let raw = points[i].phase_deg + offset;
            let jump = raw - points[i - 1].phase_deg;
            if jump > 180.0 {
                offset -= 360.0;
            } else if jump < -180.0 {
                offset += 360.0;
            }
            points[i].phase_deg += offset;
        }

        points
    }
}

/// Series connection, `(a * b)(s) = a(s) b(s)`
impl Mul for &TransferFunction {
    type Output = TransferFunction;

    fn mul(self, rhs: Self) -> TransferFunction {
        TransferFunction {
            num: polymul(&self.num, &rhs.num),
            den: polymul(&self.den, &rhs.den),
        }
    }
}

/// `n` points spaced evenly in log10 between `10^start_exp` and `10^end_exp`
pub fn logspace(start_exp: f64, end_exp: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![10f64.powf(start_exp)],
        _ => {
            let step = (end_exp - start_exp) / (n - 1) as f64;
            (0..n)
                .map(|i| 10f64.powf(start_exp + step * i as f64))
                .collect()
        }
    }
}

/// Continuous-time PID with a first-order filter on the derivative term,
/// ```text
///   C(s) = kp + ki / s + kd s / (Tf s + 1),    Tf = kd / (kp n)
/// ```
/// collected over the common denominator `s (Tf s + 1)`.
///
/// `Tf = Td / n` with `Td = kd / kp`, so the filter pole sits `n` times
/// above the derivative corner. This is not `(kd / kp) * n`.
///
/// The filter time constant is undefined with a derivative gain and no
/// proportional gain, which is reported as an error.
pub fn pid_transfer_function(
    kp: f64,
    ki: f64,
    kd: f64,
    n: f64,
) -> Result<TransferFunction, String> {
    if !(n.is_finite() && n > 0.0) {
        return Err(format!("Derivative filter divisor must be finite and > 0; got {n}"));
    }
    if kd != 0.0 && kp == 0.0 {
        return Err(format!(
            "Derivative filter is undefined for kd = {kd} with kp = 0"
        ));
    }

    let tf = if kd == 0.0 { 0.0 } else { kd / (kp * n) };
    let num = vec![ki, kp + ki * tf, kp * tf + kd];
    let den = vec![0.0, 1.0, tf];

    TransferFunction::new(num, den)
}
