use argh::FromArgs;
use glam::DVec3;
use std::path::PathBuf;

use cisreg::geometry::{self, io, metrics, pose, RigidFrame};
use cisreg::icp::{self, ShapeAtlas, ShapeFitConfig, SurfaceIcpConfig, SurfaceIcpResult};

#[derive(FromArgs)]
/// Register tracked pointer samples to a surface mesh
struct Args {
    /// path to the pointer body definition (body A)
    #[argh(option)]
    body_a: PathBuf,

    /// path to the reference body definition (body B)
    #[argh(option)]
    body_b: PathBuf,

    /// path to the surface mesh (.sur)
    #[argh(option)]
    mesh: PathBuf,

    /// path to the sample readings
    #[argh(option)]
    samples: PathBuf,

    /// path to the shape modes, enables deformable registration
    #[argh(option)]
    modes: Option<PathBuf>,

    /// path to a JSON registration config
    #[argh(option)]
    config: Option<PathBuf>,

    /// path of the output file to write
    #[argh(option)]
    output: Option<PathBuf>,

    /// path to a reference output file to compare against
    #[argh(option)]
    reference: Option<PathBuf>,

    /// threshold used for the coordinate accuracy against the reference
    #[argh(option, default = "0.01")]
    threshold: f64,
}

/// Output rows pair the pointer tips `d_k` with the correspondences of `F_reg * d_k`.
/// Missed samples are written with NaN correspondences.
fn registration_output(d: Vec<DVec3>, result: &SurfaceIcpResult) -> io::output::RegistrationOutput {
    io::output::RegistrationOutput {
        samples: d,
        closest: result
            .closest_points()
            .into_iter()
            .map(|c| c.unwrap_or(DVec3::NAN))
            .collect(),
        residuals: result
            .residuals()
            .into_iter()
            .map(|r| r.unwrap_or(f64::NAN))
            .collect(),
        mode_weights: result.mode_weights.clone(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let body_a = io::cis::read_body(&args.body_a)?;
    let body_b = io::cis::read_body(&args.body_b)?;
    let mesh = io::cis::read_mesh(&args.mesh)?;
    let readings = io::cis::read_sample_readings(&args.samples)?;
    println!(
        "Mesh: #{} vertices, #{} triangles; samples: #{} frames",
        mesh.num_vertices(),
        mesh.num_triangles(),
        readings.frames.len()
    );

    let (n_a, n_b) = (body_a.num_markers(), body_b.num_markers());
    if readings.num_markers < n_a + n_b {
        return Err(format!(
            "sample frames hold {} markers, bodies need {}",
            readings.num_markers,
            n_a + n_b
        )
        .into());
    }

    // pointer tip in the reference body frame for every sample
    let d = readings
        .frames
        .iter()
        .map(|frame| {
            pose::pointer_tip_in_body(&body_a, &frame[..n_a], &body_b, &frame[n_a..n_a + n_b])
        })
        .collect::<Result<Vec<DVec3>, geometry::FrameError>>()?;

    let mut config: SurfaceIcpConfig = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SurfaceIcpConfig::default(),
    };

    let atlas = match &args.modes {
        Some(path) => {
            let modes = io::cis::read_modes(path)?;
            if config.shape_fit.is_none() {
                config.shape_fit = Some(ShapeFitConfig::default());
            }
            Some(ShapeAtlas::from_modes(modes.modes)?)
        }
        None => None,
    };

    let result = icp::icp_surface(
        &d,
        &mesh,
        atlas.as_ref(),
        RigidFrame::IDENTITY,
        &config,
    )?;

    println!(
        "ICP {:?} after {} iterations, mean residual {:.4}",
        result.status, result.num_iterations, result.mean_residual
    );
    println!("F_reg:\n{}", result.frame);
    if let Some(weights) = &result.mode_weights {
        println!("Mode weights: {weights:.4?}");
    }

    let missed = result.missed_samples();
    if !missed.is_empty() {
        log::warn!("samples without correspondence: {missed:?}");
    }

    let output = registration_output(d, &result);

    if let Some(path) = &args.output {
        io::output::write_registration_output(path, &output)?;
    }

    if let Some(path) = &args.reference {
        let reference = io::output::read_registration_output(path)?;
        let d_error = metrics::error_summary(&output.samples, &reference.samples);
        let c_error = metrics::error_summary(&output.closest, &reference.closest);
        println!(
            "Mean/Max d error: {:.4}/{:.4}, Mean/Max c error: {:.4}/{:.4}",
            d_error.mean, d_error.max, c_error.mean, c_error.max
        );
        println!(
            "Coordinates within {}: d {:.1}%, c {:.1}%",
            args.threshold,
            metrics::threshold_accuracy(&output.samples, &reference.samples, args.threshold),
            metrics::threshold_accuracy(&output.closest, &reference.closest, args.threshold)
        );
    }

    Ok(())
}
