use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::Path,
};

use glam::DVec3;

use crate::mesh::{Mesh, MeshError};
use crate::pose::RigidBody;

/// Error types for the text readers.
#[derive(Debug, thiserror::Error)]
pub enum CisIoError {
    /// Error reading or writing file
    #[error("error reading or writing file")]
    Io(#[from] std::io::Error),

    /// A line could not be parsed
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// The file ended before the expected content was read
    #[error("Unexpected end of file while reading {0}")]
    UnexpectedEof(String),

    /// The parsed mesh is invalid
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

/// Marker readings grouped per frame, as stored in sample and pivot files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerFrames {
    /// Name stored in the file header.
    pub name: String,
    /// Number of markers per frame.
    pub num_markers: usize,
    /// Marker readings, one vector of `num_markers` points per frame.
    pub frames: Vec<Vec<DVec3>>,
}

/// Shape modes as stored in a mode file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModeFile {
    /// Name stored in the file header.
    pub name: String,
    /// `modes[0]` is the mean shape, `modes[m]` the displacement of mode `m`.
    pub modes: Vec<Vec<DVec3>>,
}

/// Split a line on commas and whitespace.
pub(crate) fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

/// Line iterator skipping blank lines and tracking line numbers.
pub(crate) struct TextLines<R: BufRead> {
    lines: Lines<R>,
    line_no: usize,
}

impl<R: BufRead> TextLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    /// Next non-blank line, or `None` at the end of the input.
    pub(crate) fn next_line(&mut self) -> Result<Option<(usize, String)>, CisIoError> {
        for line in self.lines.by_ref() {
            self.line_no += 1;
            let line = line?;
            if !line.trim().is_empty() {
                return Ok(Some((self.line_no, line)));
            }
        }
        Ok(None)
    }

    /// Next non-blank line, failing with [`CisIoError::UnexpectedEof`] at the end.
    pub(crate) fn expect_line(&mut self, what: &str) -> Result<(usize, String), CisIoError> {
        self.next_line()?
            .ok_or_else(|| CisIoError::UnexpectedEof(what.to_string()))
    }

    pub(crate) fn read_points(&mut self, n: usize, what: &str) -> Result<Vec<DVec3>, CisIoError> {
        (0..n)
            .map(|_| {
                let (line_no, line) = self.expect_line(what)?;
                parse_point(line_no, &line)
            })
            .collect()
    }
}

fn open(path: impl AsRef<Path>) -> Result<TextLines<BufReader<File>>, CisIoError> {
    let file = File::open(path)?;
    Ok(TextLines::new(BufReader::new(file)))
}

pub(crate) fn parse_part<T: std::str::FromStr>(line_no: usize, s: &str) -> Result<T, CisIoError>
where
    T::Err: std::fmt::Display,
{
    s.parse::<T>().map_err(|e| CisIoError::Parse {
        line: line_no,
        message: format!("{s}: {e}"),
    })
}

/// Parse the first three values of a line as a point.
pub(crate) fn parse_point(line_no: usize, line: &str) -> Result<DVec3, CisIoError> {
    let values = tokenize(line)
        .take(3)
        .map(|t| parse_part::<f64>(line_no, t))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(CisIoError::Parse {
            line: line_no,
            message: format!("expected 3 coordinates, got {}", values.len()),
        }),
    }
}

fn header_count(line_no: usize, tokens: &[&str], index: usize) -> Result<usize, CisIoError> {
    let token = tokens.get(index).ok_or_else(|| CisIoError::Parse {
        line: line_no,
        message: format!("missing header field {index}"),
    })?;
    parse_part(line_no, token)
}

/// Read a rigid body definition file.
///
/// The header holds the number of markers followed by the body name. It is
/// followed by one line per marker and one line with the tip position.
pub fn read_body(path: impl AsRef<Path>) -> Result<RigidBody, CisIoError> {
    let mut lines = open(path)?;
    let (line_no, header) = lines.expect_line("body header")?;
    let tokens: Vec<&str> = tokenize(&header).collect();
    let num_markers = header_count(line_no, &tokens, 0)?;

    let markers = lines.read_points(num_markers, "body markers")?;
    let tip = lines.read_points(1, "body tip")?;

    Ok(RigidBody::new(markers, tip[0]))
}

/// Read a triangulated surface mesh file.
///
/// The file holds the vertex count, the vertex lines, the triangle count and
/// the triangle lines. Each triangle line holds three vertex indices followed
/// by three neighbour indices, which are ignored.
pub fn read_mesh(path: impl AsRef<Path>) -> Result<Mesh, CisIoError> {
    let mut lines = open(path)?;

    let (line_no, line) = lines.expect_line("vertex count")?;
    let tokens: Vec<&str> = tokenize(&line).collect();
    let num_vertices = header_count(line_no, &tokens, 0)?;
    let vertices = lines.read_points(num_vertices, "mesh vertices")?;

    let (line_no, line) = lines.expect_line("triangle count")?;
    let tokens: Vec<&str> = tokenize(&line).collect();
    let num_triangles = header_count(line_no, &tokens, 0)?;

    let triangles = (0..num_triangles)
        .map(|_| {
            let (line_no, line) = lines.expect_line("mesh triangles")?;
            let indices = tokenize(&line)
                .take(3)
                .map(|t| parse_part::<usize>(line_no, t))
                .collect::<Result<Vec<_>, _>>()?;
            match indices.as_slice() {
                [i, j, k] => Ok([*i, *j, *k]),
                _ => Err(CisIoError::Parse {
                    line: line_no,
                    message: format!("expected 3 vertex indices, got {}", indices.len()),
                }),
            }
        })
        .collect::<Result<Vec<_>, CisIoError>>()?;

    log::debug!("read mesh with {num_vertices} vertices and {num_triangles} triangles");

    Ok(Mesh::new(vertices, triangles)?)
}

/// Read frames of marker readings with a `N_markers, N_frames, name` header.
fn read_marker_frames(path: impl AsRef<Path>, what: &str) -> Result<MarkerFrames, CisIoError> {
    let mut lines = open(path)?;
    let (line_no, header) = lines.expect_line(what)?;
    let tokens: Vec<&str> = tokenize(&header).collect();
    let num_markers = header_count(line_no, &tokens, 0)?;
    let num_frames = header_count(line_no, &tokens, 1)?;
    let name = tokens.get(2).map(|s| s.to_string()).unwrap_or_default();

    let frames = (0..num_frames)
        .map(|_| lines.read_points(num_markers, what))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MarkerFrames {
        name,
        num_markers,
        frames,
    })
}

/// Read a sample readings file.
///
/// The header is `N_S, N_samps, name, ...`, followed by `N_samps` blocks of
/// `N_S` marker readings. Within a block the markers of the pointer body come
/// first, then those of the reference body, then any dummy markers.
pub fn read_sample_readings(path: impl AsRef<Path>) -> Result<MarkerFrames, CisIoError> {
    read_marker_frames(path, "sample readings")
}

/// Read an electromagnetic pivot file with a `N_G, N_frames, name` header.
pub fn read_em_pivot(path: impl AsRef<Path>) -> Result<MarkerFrames, CisIoError> {
    read_marker_frames(path, "pivot readings")
}

fn parse_key_value(line_no: usize, tokens: &[&str], key: &str) -> Result<usize, CisIoError> {
    let value = tokens
        .iter()
        .find_map(|t| t.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
        .ok_or_else(|| CisIoError::Parse {
            line: line_no,
            message: format!("missing {key}= in header"),
        })?;
    parse_part(line_no, value)
}

/// Read a statistical shape mode file.
///
/// The header is `name Nvertices=V Nmodes=M`. It is followed by `M + 1` blocks,
/// each introduced by a `Mode m` line and holding `V` vectors. Block 0 is the
/// mean shape and blocks `1..=M` are the mode displacements.
pub fn read_modes(path: impl AsRef<Path>) -> Result<ModeFile, CisIoError> {
    let mut lines = open(path)?;
    let (line_no, header) = lines.expect_line("modes header")?;
    let tokens: Vec<&str> = tokenize(&header).collect();
    let name = tokens.first().map(|s| s.to_string()).unwrap_or_default();
    let num_vertices = parse_key_value(line_no, &tokens, "Nvertices")?;
    let num_modes = parse_key_value(line_no, &tokens, "Nmodes")?;

    // header counts are untrusted, blocks are only allocated as they are read
    let mut modes = Vec::new();
    for m in 0..=num_modes {
        let (line_no, line) = lines.expect_line("mode header")?;
        if !line.trim_start().starts_with("Mode") {
            return Err(CisIoError::Parse {
                line: line_no,
                message: format!("expected header of mode {m}, got '{}'", line.trim()),
            });
        }
        modes.push(lines.read_points(num_vertices, "mode vectors")?);
    }

    log::debug!("read {num_modes} shape modes over {num_vertices} vertices");

    Ok(ModeFile { name, modes })
}
