use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::cis::{parse_part, parse_point, tokenize, CisIoError, TextLines};

/// Per-sample registration output: sample points, surface correspondences and residuals.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrationOutput {
    /// Sample points `d_k` in the reference body frame.
    pub samples: Vec<DVec3>,
    /// Closest surface points `c_k`.
    pub closest: Vec<DVec3>,
    /// Residual distances `|s_k - c_k|`.
    pub residuals: Vec<f64>,
    /// Fitted shape mode weights `λ_1..λ_M`, if shape fitting was used.
    pub mode_weights: Option<Vec<f64>>,
}

impl RegistrationOutput {
    /// Number of samples.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Format the output file content with `name` in the header.
    pub fn to_text(&self, name: &str) -> String {
        let mut out = format!("{}, {}\n", self.num_samples(), name);
        if let Some(weights) = &self.mode_weights {
            let weights = weights
                .iter()
                .map(|w| format!("{w:.4}"))
                .collect::<Vec<_>>()
                .join("   ");
            out.push_str(&format!("  {weights}\n"));
        }
        let fmt_point = |p: &DVec3| format!("{:>6.2}   {:>6.2}   {:>6.2}", p.x, p.y, p.z);
        for ((d, c), r) in self
            .samples
            .iter()
            .zip(self.closest.iter())
            .zip(self.residuals.iter())
        {
            out.push_str(&format!(
                "  {}       {}    {:>6.3}\n",
                fmt_point(d),
                fmt_point(c),
                r
            ));
        }
        out
    }
}

/// Write a registration output file.
///
/// The header line holds the sample count and the file name. When mode
/// weights are present they are written on a second line, followed by one
/// line per sample with `d` and `c` (2 decimals) and the residual (3 decimals).
pub fn write_registration_output(
    path: impl AsRef<Path>,
    output: &RegistrationOutput,
) -> Result<(), CisIoError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(output.to_text(&name).as_bytes())?;
    writer.flush()?;

    log::info!("Saved output to {}", path.display());
    Ok(())
}

/// Read a registration output file written by [`write_registration_output`].
pub fn read_registration_output(path: impl AsRef<Path>) -> Result<RegistrationOutput, CisIoError> {
    let file = File::open(path)?;
    let mut lines = TextLines::new(BufReader::new(file));

    let (line_no, header) = lines.expect_line("output header")?;
    let num_samples = tokenize(&header)
        .next()
        .map(|t| parse_part::<usize>(line_no, t))
        .transpose()?
        .ok_or_else(|| CisIoError::Parse {
            line: line_no,
            message: "missing sample count".to_string(),
        })?;

    let mut output = RegistrationOutput::default();
    while output.samples.len() < num_samples {
        let (line_no, line) = lines.expect_line("output samples")?;
        let tokens: Vec<&str> = tokenize(&line).collect();
        if tokens.len() != 7 {
            // a line that is not a sample line before any sample is the mode weight line
            if output.samples.is_empty() && output.mode_weights.is_none() {
                let weights = tokens
                    .iter()
                    .map(|t| parse_part::<f64>(line_no, t))
                    .collect::<Result<Vec<_>, _>>()?;
                output.mode_weights = Some(weights);
                continue;
            }
            return Err(CisIoError::Parse {
                line: line_no,
                message: format!("expected 7 values, got {}", tokens.len()),
            });
        }
        output.samples.push(parse_point(line_no, &tokens[0..3].join(" "))?);
        output.closest.push(parse_point(line_no, &tokens[3..6].join(" "))?);
        output.residuals.push(parse_part(line_no, tokens[6])?);
    }

    Ok(output)
}
