//! Recorded closed-loop trajectories and their fixed-width CSV encoding

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// One tick of a closed-loop run
#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq)]
pub struct TraceRow {
    pub tick: i64,
    pub time_s: f64,
    /// Set point in effect after any change scheduled for this tick
    pub set_point: f64,
    pub measurement: f64,
    pub output: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub disturbance: f64,

    /// Whether the controller accepted this tick and advanced its state
    pub updated: bool,
}

impl TraceRow {
    /// Names of the value columns, in the order written by [`TraceRow::values`]
    pub const CHANNELS: [&'static str; 8] = [
        "time_s",
        "set_point",
        "measurement",
        "output",
        "p_term",
        "i_term",
        "d_term",
        "disturbance",
    ];

    pub fn values(&self) -> [f64; 8] {
        [
            self.time_s,
            self.set_point,
            self.measurement,
            self.output,
            self.p_term,
            self.i_term,
            self.d_term,
            self.disturbance,
        ]
    }
}

/// Trajectories of a closed-loop run
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct Trace {
    pub rows: Vec<TraceRow>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows on which the controller accepted the tick
    pub fn updates(&self) -> impl Iterator<Item = &TraceRow> {
        self.rows.iter().filter(|r| r.updated)
    }

    pub fn final_measurement(&self) -> Option<f64> {
        self.rows.last().map(|r| r.measurement)
    }

    /// Write a header and one fixed-width row per tick
    pub fn write_csv<W: Write>(&self, w: &mut W) -> Result<(), String> {
        w.write_all(csv_header(&TraceRow::CHANNELS).as_bytes())
            .map_err(|e| format!("Failed to write CSV header: {e}"))?;

        let mut line = String::new();
        for row in self.rows.iter() {
            csv_row_fixed_width(&mut line, row.tick, &row.values());
            w.write_all(line.as_bytes())
                .map_err(|e| format!("Failed to write CSV row {}: {e}", row.tick))?;
        }

        w.flush().map_err(|e| format!("Failed to flush CSV: {e}"))
    }

    /// Write the CSV encoding to a new file at `path`
    pub fn save_csv(&self, path: &Path) -> Result<(), String> {
        let file =
            File::create(path).map_err(|e| format!("Failed to create CSV file {path:?}: {e}"))?;
        let mut writer = BufWriter::new(file);
        self.write_csv(&mut writer)
    }
}

/// Header line: the tick column followed by the value columns
pub fn csv_header(columns: &[&str]) -> String {
    format!("tick,{}\n", columns.join(","))
}

/// Write one line into `line`, replacing its contents.
/// Every line produced for the same number of values has the same length.
pub fn csv_row_fixed_width(line: &mut String, tick: i64, values: &[f64]) {
    line.clear();
    line.push_str(&fmt_i64(tick));
    for &v in values {
        line.push(',');
        line.push_str(&fmt_f64(v));
    }
    line.push('\n');
}

/// Float in scientific notation with an explicit sign, 17 fractional digits,
/// and a signed 3-digit exponent, right-aligned to a fixed width
pub fn fmt_f64(num: f64) -> String {
    const WIDTH: usize = 25;

    let sci = format!("{num:+.17e}");
    let text = match sci.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = exp.strip_prefix('-').map_or(('+', exp), |d| ('-', d));
            format!("{mantissa}e{sign}{digits:0>3}")
        }
        // inf and NaN
        None => sci,
    };
    format!("{text:>WIDTH$}")
}

/// Fixed-width formatting of integer value for tick index.
/// 20 is the largest size.
pub fn fmt_i64(num: i64) -> String {
    format!("{num:+020}")
}
