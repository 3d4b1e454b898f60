use argh::FromArgs;
use std::path::{Path, PathBuf};

use regbench::{
    benchmark::BenchmarkSuite,
    config::{BenchmarkSettings, ConfigError},
    diagnostics::report_memory_usage,
    k3d::{io::pcd::read_pcd, pointcloud::PointCloud},
};

const USAGE: &str = "usage: align target.pcd source.pcd";

#[derive(FromArgs, Debug)]
/// Benchmark GICP and NDT registration of a source cloud onto a target cloud
struct Args {
    /// path to the target point cloud
    #[argh(positional)]
    target: PathBuf,

    /// path to the source point cloud
    #[argh(positional)]
    source: PathBuf,

    /// directory receiving the aligned clouds
    #[argh(option)]
    output_dir: Option<PathBuf>,

    /// voxel size used to downsample both clouds
    #[argh(option)]
    leaf_size: Option<f64>,

    /// NDT voxel resolution
    #[argh(option)]
    resolution: Option<f64>,

    /// JSON settings file, flags override its values
    #[argh(option)]
    config: Option<PathBuf>,

    /// do not open the rerun viewer
    #[argh(switch)]
    no_viz: bool,
}

impl Args {
    fn settings(&self) -> Result<BenchmarkSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => BenchmarkSettings::from_json_file(path)?,
            None => BenchmarkSettings::default(),
        };
        if let Some(output_dir) = &self.output_dir {
            settings.output_dir = output_dir.clone();
        }
        if let Some(leaf_size) = self.leaf_size {
            settings.leaf_size = [leaf_size; 3];
        }
        if let Some(resolution) = self.resolution {
            settings.ndt_resolution = resolution;
        }
        settings.validate()?;
        Ok(settings)
    }
}

/// Parse the command line, returning argh's help or error text on failure.
fn parse_args(args: &[String]) -> Result<Args, String> {
    let command = args.first().map(String::as_str).unwrap_or("align");
    let rest = args.iter().skip(1).map(String::as_str).collect::<Vec<_>>();
    Args::from_args(&[command], &rest).map_err(|early_exit| early_exit.output)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(args) => args,
        Err(help) => {
            println!("{USAGE}");
            println!("{help}");
            return Ok(());
        }
    };
    let settings = args.settings()?;

    let Some(target) = load(&args.target) else {
        return Ok(());
    };
    let Some(source) = load(&args.source) else {
        return Ok(());
    };

    let voxel_grid = settings.voxel_grid()?;
    let target = downsample_logged("target", &voxel_grid, &target);
    let source = downsample_logged("source", &voxel_grid, &source);
    println!("target: {} points, source: {} points", target.len(), source.len());

    report_memory_usage();

    let mut last_aligned = None;
    for run in BenchmarkSuite::new(&target, &source, &settings) {
        println!("{run}");
        if let Ok(result) = run.result {
            last_aligned = Some(result.aligned);
        }
    }

    report_memory_usage();

    if !args.no_viz {
        if let Some(aligned) = &last_aligned {
            visualize(&target, &source, aligned)?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Option<PointCloud> {
    match read_pcd(path) {
        Ok(cloud) => {
            log::info!("loaded {}: {} points", path.display(), cloud.len());
            Some(cloud)
        }
        Err(e) => {
            log::error!("{e}");
            eprintln!("failed to load {}", path.display());
            None
        }
    }
}

fn downsample_logged(
    which: &str,
    voxel_grid: &regbench::k3d::voxel_grid::VoxelGrid,
    cloud: &PointCloud,
) -> PointCloud {
    let downsampled = voxel_grid.downsample(cloud);
    log::info!(
        "downsampled {which}: {} -> {} points",
        cloud.len(),
        downsampled.len()
    );
    downsampled
}

fn visualize(
    target: &PointCloud,
    source: &PointCloud,
    aligned: &PointCloud,
) -> Result<(), Box<dyn std::error::Error>> {
    let rec = rerun::RecordingStreamBuilder::new("align").spawn()?;

    log_pointcloud(&rec, "target", target, rerun::Color::from_rgb(255, 0, 0))?;
    log_pointcloud(&rec, "source", source, rerun::Color::from_rgb(0, 255, 0))?;
    log_pointcloud(&rec, "aligned", aligned, rerun::Color::from_rgb(0, 0, 255))?;

    Ok(())
}

fn log_pointcloud(
    rec: &rerun::RecordingStream,
    name: &str,
    pointcloud: &PointCloud,
    color: rerun::Color,
) -> Result<(), Box<dyn std::error::Error>> {
    let points = pointcloud
        .points()
        .iter()
        .map(|p| rerun::Position3D::new(p[0] as f32, p[1] as f32, p[2] as f32))
        .collect::<Vec<_>>();
    let colors = vec![color; points.len()];

    rec.log(name, &rerun::Points3D::new(points).with_colors(colors))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("align")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_two_positionals() -> Result<(), String> {
        let args = parse_args(&argv(&["target.pcd", "source.pcd"]))?;
        assert_eq!(args.target, PathBuf::from("target.pcd"));
        assert_eq!(args.source, PathBuf::from("source.pcd"));
        assert!(!args.no_viz);
        assert!(args.config.is_none());
        Ok(())
    }

    #[test]
    fn test_wrong_argument_counts() {
        assert!(parse_args(&argv(&[])).is_err());
        assert!(parse_args(&argv(&["target.pcd"])).is_err());
        assert!(parse_args(&argv(&["a.pcd", "b.pcd", "c.pcd"])).is_err());
        assert!(parse_args(&argv(&["a.pcd", "b.pcd", "--bogus"])).is_err());
    }

    #[test]
    fn test_help_is_reported_as_usage() {
        let help = parse_args(&argv(&["--help"])).err().unwrap_or_default();
        assert!(help.contains("--leaf-size"));
    }

    #[test]
    fn test_flags_override_settings() -> Result<(), Box<dyn std::error::Error>> {
        let args = parse_args(&argv(&[
            "t.pcd",
            "s.pcd",
            "--output-dir",
            "/data/out",
            "--leaf-size",
            "0.25",
            "--resolution",
            "2.0",
            "--no-viz",
        ]))?;
        assert!(args.no_viz);

        let settings = args.settings()?;
        assert_eq!(settings.output_dir, PathBuf::from("/data/out"));
        assert_eq!(settings.leaf_size, [0.25; 3]);
        assert_eq!(settings.ndt_resolution, 2.0);
        assert_eq!(settings.repetitions, 10);
        Ok(())
    }

    #[test]
    fn test_invalid_flag_values() -> Result<(), String> {
        let args = parse_args(&argv(&["t.pcd", "s.pcd", "--leaf-size", "0"]))?;
        assert!(matches!(args.settings(), Err(ConfigError::Invalid(_))));
        Ok(())
    }
}
