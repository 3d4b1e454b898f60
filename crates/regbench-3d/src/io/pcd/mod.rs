mod parser;
mod writer;

pub use parser::read_pcd;
pub use writer::write_pcd_ascii;

/// Error types for the PCD module.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PcdError {
    /// Failed to read or write the PCD file
    #[error("Failed to read or write PCD file. {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported header
    #[error("Unsupported PCD header")]
    UnsupportedProperty,

    /// Malformed PCD header
    #[error("Malformed PCD header")]
    MalformedHeader,

    /// A data record could not be decoded
    #[error("Malformed PCD data at point {0}")]
    MalformedData(usize),

    /// The file declares or contains no points
    #[error("PCD file contains no points")]
    EmptyPointCloud,

    /// Invalid PCD file extension
    #[error("Invalid PCD file extension. Got:{0}")]
    InvalidFileExtension(String),
}

fn check_extension(path: &std::path::Path) -> Result<(), PcdError> {
    let Some(file_ext) = path.extension() else {
        return Err(PcdError::InvalidFileExtension("".into()));
    };

    if file_ext != "pcd" {
        return Err(PcdError::InvalidFileExtension(
            file_ext.to_string_lossy().to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcloud::PointCloud;

    #[test]
    fn save_then_load_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cloud.pcd");

        let points = (0..100)
            .map(|_| {
                [
                    rand::random::<f64>() * 10.0 - 5.0,
                    rand::random::<f64>() * 10.0 - 5.0,
                    rand::random::<f64>(),
                ]
            })
            .collect::<Vec<_>>();
        let cloud = PointCloud::from_points(points);

        write_pcd_ascii(&path, &cloud)?;
        let loaded = read_pcd(&path)?;

        assert_eq!(loaded.len(), cloud.len());
        assert_eq!(loaded.points(), cloud.points());
        assert!(loaded.colors().is_none());
        assert!(loaded.normals().is_none());

        Ok(())
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = read_pcd("/definitely/not/here.pcd");
        assert!(matches!(result, Err(PcdError::Io(_))));
    }

    #[test]
    fn wrong_extension_is_rejected() {
        let cloud = PointCloud::from_points(vec![[0.0, 0.0, 0.0]]);
        let result = write_pcd_ascii("cloud.ply", &cloud);
        assert!(matches!(result, Err(PcdError::InvalidFileExtension(ext)) if ext == "ply"));
    }
}
