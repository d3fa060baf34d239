// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wavefront OBJ reading
//!
//! Only geometry is read: `v` positions and `f` faces. Texture coordinates,
//! normals, groups, materials, points and lines are ignored. Polygons are
//! fan triangulated.

use std::path::Path;

use nalgebra::Point3;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mesh::{weld_decoded, Mesh};

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::parse("OBJ", format!("line {}", line), message)
}

/// Resolve one face corner (`i`, `i/t`, `i//n` or `i/t/n`) to a zero-based
/// vertex index; negative indices count back from the last vertex read
fn corner_index(token: &str, vertex_count: usize, line: usize) -> Result<u32> {
    let position = token.split('/').next().unwrap_or(token);
    let index: i64 = position
        .parse()
        .map_err(|_| parse_error(line, format!("invalid face index '{}'", token)))?;
    let resolved = match index {
        0 => return Err(parse_error(line, "face index 0 is not valid")),
        i if i > 0 => i - 1,
        i => vertex_count as i64 + i,
    };
    if resolved < 0 || resolved >= vertex_count as i64 {
        return Err(parse_error(
            line,
            format!(
                "face index {} out of range ({} vertices defined)",
                index, vertex_count
            ),
        ));
    }
    Ok(resolved as u32)
}

fn coordinate(word: Option<&str>, line: usize) -> Result<f64> {
    let word = word.ok_or_else(|| parse_error(line, "vertex needs three coordinates"))?;
    fast_float::parse::<f64, _>(word)
        .map_err(|_| parse_error(line, format!("invalid number '{}'", word)))
}

/// Decode OBJ text into a welded mesh
pub fn read_obj(text: &str, source: &str) -> Result<Mesh> {
    let mut mesh = Mesh::new();
    let mut pending = String::new();
    let mut pending_start = 0;

    for (index, raw_line) in text.lines().enumerate() {
        // Backslash continues a statement on the next line
        if pending.is_empty() {
            pending_start = index + 1;
        }
        if let Some(stripped) = raw_line.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }
        pending.push_str(raw_line);
        let line_no = pending_start;
        let statement = std::mem::take(&mut pending);

        let content = statement.split('#').next().unwrap_or("");
        let mut words = content.split_ascii_whitespace();
        match words.next() {
            Some("v") => {
                let x = coordinate(words.next(), line_no)?;
                let y = coordinate(words.next(), line_no)?;
                let z = coordinate(words.next(), line_no)?;
                mesh.add_vertex(Point3::new(x, y, z));
            }
            Some("f") | Some("fo") => {
                let vertex_count = mesh.vertex_count();
                let corners = words
                    .map(|w| corner_index(w, vertex_count, line_no))
                    .collect::<Result<SmallVec<[u32; 4]>>>()?;
                if corners.len() < 3 {
                    return Err(parse_error(
                        line_no,
                        format!("face has {} vertices", corners.len()),
                    ));
                }
                for i in 1..corners.len() - 1 {
                    mesh.add_triangle(corners[0], corners[i], corners[i + 1]);
                }
            }
            _ => {}
        }
    }

    debug!(
        source,
        faces = mesh.triangle_count(),
        vertices = mesh.vertex_count(),
        "Decoded OBJ"
    );
    weld_decoded(&mesh, source)
}

pub fn read_obj_file(path: &Path) -> Result<Mesh> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    read_obj(&text, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::enclosed_volume;

    const CUBE: &str = "# cube
mtllib cube.mtl
o Cube
v 0 0 0
v 10 0 0
v 10 10 0
v 0 10 0
v 0 0 10
v 10 0 10
v 10 10 10
v 0 10 10 1.0
vt 0 0
vn 0 0 1
usemtl steel
s off
f 1/1/1 4/1/1 3/1/1 2/1/1
f 5//1 6//1 7//1 8//1
f 1 2 6 5
f 2/1 3/1 7/1 6/1
f 3 4 8 7
f -8 -4 -1 -5
l 1 2
";

    #[test]
    fn test_cube_with_mixed_corner_forms() {
        let mesh = read_obj(CUBE, "cube.obj").unwrap();
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.topology().is_closed());
        assert!((enclosed_volume(&mesh).unwrap() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_cloud_is_rejected() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\np 1 2 3\nl 1 2\n";
        assert!(matches!(read_obj(text, "cloud.obj"), Err(Error::EmptyMesh(_))));
    }

    #[test]
    fn test_bad_indices() {
        let out_of_range = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n";
        match read_obj(out_of_range, "bad.obj") {
            Err(Error::Parse { location, .. }) => assert_eq!(location, "line 4"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(read_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n", "zero.obj").is_err());
        assert!(read_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2\n", "two.obj").is_err());
        assert!(read_obj("v 0 zero 0\n", "num.obj").is_err());
    }

    #[test]
    fn test_line_continuation() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 \\\n 2 3\n";
        let mesh = read_obj(text, "cont.obj").unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }
}
