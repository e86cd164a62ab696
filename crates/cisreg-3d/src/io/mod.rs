/// Readers for tracked-marker, rigid body, surface mesh and shape mode text files.
pub mod cis;

/// Reader and writer for registration output files.
pub mod output;

pub use cis::CisIoError;
