use std::io::Write;
use std::path::Path;

use super::{check_extension, PcdError};
use crate::pointcloud::PointCloud;

/// Write the coordinates of a point cloud as an ascii PCD file.
///
/// Coordinates are stored as 8-byte floats using the shortest decimal
/// representation that parses back to the same value, so reading the file
/// with [`super::read_pcd`] restores the points exactly. Colors and normals
/// are not written.
///
/// # Arguments
/// * `path` - Destination `.pcd` path. Parent directories must exist.
/// * `pointcloud` - The point cloud to store.
pub fn write_pcd_ascii(path: impl AsRef<Path>, pointcloud: &PointCloud) -> Result<(), PcdError> {
    check_extension(path.as_ref())?;

    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);

    let num_points = pointcloud.len();
    writeln!(writer, "# .PCD v0.7 - Point Cloud Data file format")?;
    writeln!(writer, "VERSION 0.7")?;
    writeln!(writer, "FIELDS x y z")?;
    writeln!(writer, "SIZE 8 8 8")?;
    writeln!(writer, "TYPE F F F")?;
    writeln!(writer, "COUNT 1 1 1")?;
    writeln!(writer, "WIDTH {num_points}")?;
    writeln!(writer, "HEIGHT 1")?;
    writeln!(writer, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(writer, "POINTS {num_points}")?;
    writeln!(writer, "DATA ascii")?;

    for [x, y, z] in pointcloud.points() {
        writeln!(writer, "{x} {y} {z}")?;
    }

    writer.flush()?;

    Ok(())
}
