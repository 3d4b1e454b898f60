use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::path::Path;

use super::{check_extension, PcdError};
use crate::pointcloud::PointCloud;

const MAX_POINT_STEP: usize = 1024;
const MAX_POINTS: usize = 50_000_000;
const MAX_PREALLOCATED_POINTS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcdEncoding {
    Ascii,
    Binary,
}

/// Describes a single field in a PCD point record
#[derive(Debug)]
struct PcdField {
    offset: usize, // byte offset within a binary point
    column: usize, // token index within an ascii line
    size: usize,   // size of one element (bytes)
    kind: char,    // PCD type: 'F' = float, 'U' = unsigned int, 'I' = signed int
}

#[derive(Debug)]
struct PcdLayout {
    fields: HashMap<String, PcdField>,
    point_step: usize,  // total bytes per point
    num_columns: usize, // total tokens per ascii line
    num_points: usize,
    encoding: PcdEncoding,
}

impl PcdLayout {
    fn field(&self, name: &str) -> Result<&PcdField, PcdError> {
        self.fields.get(name).ok_or(PcdError::UnsupportedProperty)
    }

    fn optional_field(&self, names: &[&str]) -> Option<&PcdField> {
        names.iter().find_map(|name| self.fields.get(*name))
    }
}

/// One undecoded point record, either raw bytes or ascii tokens.
enum Record<'a> {
    Bytes(&'a [u8]),
    Tokens(&'a [&'a str]),
}

impl Record<'_> {
    fn value(&self, field: &PcdField) -> Option<f64> {
        match self {
            Record::Bytes(buf) => {
                let slice = buf.get(field.offset..field.offset + field.size)?;
                match (field.kind, field.size) {
                    ('F', 4) => Some(f32::from_le_bytes(slice.try_into().ok()?) as f64),
                    ('F', 8) => Some(f64::from_le_bytes(slice.try_into().ok()?)),
                    _ => None,
                }
            }
            Record::Tokens(tokens) => tokens.get(field.column)?.parse::<f64>().ok(),
        }
    }

    fn packed_rgb(&self, field: &PcdField) -> Option<u32> {
        match self {
            Record::Bytes(buf) => {
                let slice = buf.get(field.offset..field.offset + 4)?;
                Some(u32::from_le_bytes(slice.try_into().ok()?))
            }
            Record::Tokens(tokens) => {
                let token = tokens.get(field.column)?;
                match field.kind {
                    // pcl stores packed rgb reinterpreted as a float
                    'F' => token.parse::<f32>().ok().map(f32::to_bits),
                    'I' => token.parse::<i32>().ok().map(|v| v as u32),
                    _ => token.parse::<u32>().ok(),
                }
            }
        }
    }
}

fn parse_pcd_layout<R: BufRead>(reader: &mut R) -> Result<PcdLayout, PcdError> {
    let mut field_names: Vec<String> = Vec::new();
    let mut sizes = Vec::new();
    let mut types = Vec::new();
    let mut counts = Vec::new();
    let mut points = None;
    let mut width = None;
    let mut height = 1usize;

    let parse_usize =
        |v: &str| -> Result<usize, PcdError> { v.parse::<usize>().map_err(|_| PcdError::MalformedHeader) };

    let encoding = loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Err(PcdError::MalformedHeader);
        }
        let line = line.trim();

        if line.starts_with("DATA") {
            break match line.split_whitespace().nth(1) {
                Some("ascii") => PcdEncoding::Ascii,
                Some("binary") => PcdEncoding::Binary,
                _ => return Err(PcdError::UnsupportedProperty),
            };
        }

        let mut it = line.split_whitespace();
        match it.next() {
            Some("SIZE") => {
                sizes = it.map(parse_usize).collect::<Result<Vec<_>, _>>()?;
            }
            Some("TYPE") => {
                types = it
                    .map(|v| v.chars().next().ok_or(PcdError::MalformedHeader))
                    .collect::<Result<Vec<_>, _>>()?;
            }
            Some("COUNT") => {
                counts = it.map(parse_usize).collect::<Result<Vec<_>, _>>()?;
            }
            Some("POINTS") => {
                points = Some(parse_usize(it.next().ok_or(PcdError::MalformedHeader)?)?);
            }
            Some("WIDTH") => {
                width = Some(parse_usize(it.next().ok_or(PcdError::MalformedHeader)?)?);
            }
            Some("HEIGHT") => {
                height = parse_usize(it.next().ok_or(PcdError::MalformedHeader)?)?;
            }
            Some("FIELDS") => field_names = it.map(String::from).collect(),
            _ => {}
        }
    };

    if field_names.is_empty()
        || sizes.len() != field_names.len()
        || types.len() != field_names.len()
        || (!counts.is_empty() && counts.len() != field_names.len())
    {
        return Err(PcdError::MalformedHeader);
    }

    let num_points = match (points, width) {
        (Some(points), _) => points,
        (None, Some(width)) => width.checked_mul(height).ok_or(PcdError::MalformedHeader)?,
        (None, None) => return Err(PcdError::MalformedHeader),
    };

    // Compute byte offsets and token columns for each field
    let mut offset = 0usize;
    let mut column = 0usize;
    let mut fields = HashMap::new();

    for (i, name) in field_names.iter().enumerate() {
        // COUNT defaults to 1 when omitted
        let count = counts.get(i).copied().unwrap_or(1);
        let size = sizes[i];
        let kind = types[i];

        match name.as_str() {
            "x" | "y" | "z" | "normal_x" | "normal_y" | "normal_z" | "nx" | "ny" | "nz" => {
                if !((size == 4 || size == 8) && count == 1 && kind == 'F') {
                    return Err(PcdError::UnsupportedProperty);
                }
            }
            "rgb" | "rgba" => {
                if !(size == 4 && count == 1 && matches!(kind, 'U' | 'I' | 'F')) {
                    return Err(PcdError::UnsupportedProperty);
                }
            }
            _ => {}
        }

        if fields.contains_key(name) {
            return Err(PcdError::MalformedHeader);
        }
        fields.insert(
            name.clone(),
            PcdField {
                offset,
                column,
                size,
                kind,
            },
        );

        let field_bytes = size.checked_mul(count).ok_or(PcdError::MalformedHeader)?;
        offset = offset
            .checked_add(field_bytes)
            .ok_or(PcdError::MalformedHeader)?;
        column += count;

        if offset > MAX_POINT_STEP {
            return Err(PcdError::MalformedHeader);
        }
    }

    Ok(PcdLayout {
        fields,
        point_step: offset,
        num_columns: column,
        num_points,
        encoding,
    })
}

fn read_pcd_from_reader<R: BufRead>(reader: &mut R) -> Result<PointCloud, PcdError> {
    let layout = parse_pcd_layout(reader)?;

    if layout.num_points == 0 {
        return Err(PcdError::EmptyPointCloud);
    }

    if layout.num_points > MAX_POINTS || layout.point_step == 0 {
        return Err(PcdError::MalformedHeader);
    }

    // Required fields
    let fx = layout.field("x")?;
    let fy = layout.field("y")?;
    let fz = layout.field("z")?;

    // Optional fields
    let frgb = layout.optional_field(&["rgb", "rgba"]);
    let fnormals = match (
        layout.optional_field(&["normal_x", "nx"]),
        layout.optional_field(&["normal_y", "ny"]),
        layout.optional_field(&["normal_z", "nz"]),
    ) {
        (Some(nx), Some(ny), Some(nz)) => Some((nx, ny, nz)),
        _ => None,
    };

    // POINTS is untrusted until the payload is read
    let capacity = layout.num_points.min(MAX_PREALLOCATED_POINTS);
    let mut points = Vec::with_capacity(capacity);
    let mut colors = Vec::with_capacity(if frgb.is_some() { capacity } else { 0 });
    let mut normals = Vec::with_capacity(if fnormals.is_some() { capacity } else { 0 });

    let mut decode = |index: usize, record: Record| -> Result<(), PcdError> {
        let malformed = || PcdError::MalformedData(index);
        let x = record.value(fx).ok_or_else(malformed)?;
        let y = record.value(fy).ok_or_else(malformed)?;
        let z = record.value(fz).ok_or_else(malformed)?;
        points.push([x, y, z]);

        if let Some(field) = frgb {
            let rgb = record.packed_rgb(field).ok_or_else(malformed)?;
            colors.push([
                ((rgb >> 16) & 0xFF) as u8,
                ((rgb >> 8) & 0xFF) as u8,
                (rgb & 0xFF) as u8,
            ]);
        }

        if let Some((nx, ny, nz)) = fnormals {
            normals.push([
                record.value(nx).ok_or_else(malformed)?,
                record.value(ny).ok_or_else(malformed)?,
                record.value(nz).ok_or_else(malformed)?,
            ]);
        }

        Ok(())
    };

    match layout.encoding {
        PcdEncoding::Binary => {
            let mut buffer = vec![0u8; layout.point_step];
            for index in 0..layout.num_points {
                reader.read_exact(&mut buffer)?;
                decode(index, Record::Bytes(&buffer))?;
            }
        }
        PcdEncoding::Ascii => {
            let mut index = 0;
            let mut line = String::new();
            while index < layout.num_points {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(PcdError::MalformedData(index));
                }
                let tokens = line.split_whitespace().collect::<Vec<_>>();
                if tokens.is_empty() {
                    continue;
                }
                if tokens.len() < layout.num_columns {
                    return Err(PcdError::MalformedData(index));
                }
                decode(index, Record::Tokens(&tokens))?;
                index += 1;
            }
        }
    }

    Ok(PointCloud::new(
        points,
        (!colors.is_empty()).then_some(colors),
        (!normals.is_empty()).then_some(normals),
    ))
}

/// Read a PCD file stored either as `DATA ascii` or `DATA binary`.
///
/// # Arguments
/// * `path` - Path to a `.pcd` file.
///
/// # Returns
/// A [`PointCloud`] containing:
/// - 3D points (always)
/// - RGB colors (if present)
/// - Normals (if present)
///
/// Float coordinates may be stored with 4 or 8 bytes.
pub fn read_pcd(path: impl AsRef<Path>) -> Result<PointCloud, PcdError> {
    check_extension(path.as_ref())?;

    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);

    read_pcd_from_reader(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fails_on_compressed_data() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE F F F
COUNT 1 1 1
POINTS 1
DATA binary_compressed";
        let mut reader = Cursor::new(&data[..]);
        assert!(parse_pcd_layout(&mut reader).is_err());
    }

    #[test]
    fn parses_valid_binary_header() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE F F F
COUNT 1 1 1
POINTS 10
DATA binary";
        let mut reader = Cursor::new(&data[..]);
        let layout = parse_pcd_layout(&mut reader).expect("valid binary header should parse");
        assert_eq!(layout.num_points, 10);
        assert_eq!(layout.point_step, 12);
        assert_eq!(layout.encoding, PcdEncoding::Binary);
        assert!(layout.fields.contains_key("x"));
    }

    #[test]
    fn rejects_wrong_type_for_xyz() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE I I I
COUNT 1 1 1
POINTS 5
DATA binary";
        let mut reader = Cursor::new(&data[..]);
        assert!(parse_pcd_layout(&mut reader).is_err());
    }

    #[test]
    fn points_default_to_width_times_height() {
        let data = b"# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z
SIZE 4 4 4
TYPE F F F
WIDTH 4
HEIGHT 2
DATA ascii";
        let mut reader = Cursor::new(&data[..]);
        let layout = parse_pcd_layout(&mut reader).expect("header should parse");
        assert_eq!(layout.num_points, 8);
        assert_eq!(layout.encoding, PcdEncoding::Ascii);
    }

    #[test]
    fn reads_ascii_payload_with_rgb() -> Result<(), PcdError> {
        let data = b"VERSION .7
FIELDS x y z rgb
SIZE 4 4 4 4
TYPE F F F U
COUNT 1 1 1 1
WIDTH 2
HEIGHT 1
POINTS 2
DATA ascii
1.5 -2 3 16711680

0.25 0.5 0.75 255
";
        let mut reader = Cursor::new(&data[..]);
        let cloud = read_pcd_from_reader(&mut reader)?;
        assert_eq!(cloud.points(), &[[1.5, -2.0, 3.0], [0.25, 0.5, 0.75]]);
        assert_eq!(cloud.colors(), Some(&[[255, 0, 0], [0, 0, 255]][..]));
        Ok(())
    }

    #[test]
    fn reads_binary_payload_with_double_fields() -> Result<(), PcdError> {
        let mut data = b"FIELDS x y z
SIZE 8 8 8
TYPE F F F
POINTS 1
DATA binary
"
        .to_vec();
        for v in [1.0f64, 2.0, 3.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut reader = Cursor::new(&data[..]);
        let cloud = read_pcd_from_reader(&mut reader)?;
        assert_eq!(cloud.points(), &[[1.0, 2.0, 3.0]]);
        Ok(())
    }

    #[test]
    fn truncated_ascii_payload_is_malformed() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE F F F
POINTS 3
DATA ascii
0 0 0
1 1
";
        let mut reader = Cursor::new(&data[..]);
        assert!(matches!(
            read_pcd_from_reader(&mut reader),
            Err(PcdError::MalformedData(1))
        ));
    }

    #[test]
    fn header_point_count_is_not_trusted() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE F F F
POINTS 40000000
DATA ascii
0 0 0
";
        let mut reader = Cursor::new(&data[..]);
        assert!(matches!(
            read_pcd_from_reader(&mut reader),
            Err(PcdError::MalformedData(1))
        ));
    }

    #[test]
    fn zero_points_is_empty() {
        let data = b"FIELDS x y z
SIZE 4 4 4
TYPE F F F
POINTS 0
DATA ascii
";
        let mut reader = Cursor::new(&data[..]);
        assert!(matches!(
            read_pcd_from_reader(&mut reader),
            Err(PcdError::EmptyPointCloud)
        ));
    }
}
