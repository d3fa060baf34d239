// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! STL reading and writing
//!
//! Binary files are recognised by their exact length (`84 + 50·n`); anything
//! else beginning with `solid` is read as ASCII. Export is always ASCII with
//! shortest round-trip float formatting.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use nalgebra::Point3;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mesh::{weld_decoded, Mesh};

const HEADER_LEN: usize = 80;
const FACET_LEN: usize = 50;

/// Whether the buffer is a binary STL whose length matches its facet count
pub fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN + 4 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as u64;
    (HEADER_LEN as u64 + 4 + FACET_LEN as u64 * count) == bytes.len() as u64
}

/// Decode an STL buffer into a welded mesh
pub fn read_stl(bytes: &[u8], source: &str) -> Result<Mesh> {
    let raw = if is_binary_stl(bytes) {
        read_binary(bytes)?
    } else if looks_like_ascii(bytes) {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::parse("STL", format!("byte {}", e.valid_up_to()), "invalid UTF-8 in ASCII STL"))?;
        read_ascii(text)?
    } else {
        // Not ASCII, so a binary file whose length disagrees with its header
        read_binary(bytes)?
    };
    debug!(
        source,
        faces = raw.triangle_count(),
        vertices = raw.vertex_count(),
        "Decoded STL"
    );
    weld_decoded(&raw, source)
}

pub fn read_stl_file(path: &Path) -> Result<Mesh> {
    let bytes = std::fs::read(path)?;
    read_stl(&bytes, &path.display().to_string())
}

fn looks_like_ascii(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..]
        .get(..5)
        .map(|s| s.eq_ignore_ascii_case(b"solid"))
        .unwrap_or(false)
}

fn read_binary(bytes: &[u8]) -> Result<Mesh> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(Error::parse(
            "STL",
            "header",
            format!("binary STL needs at least 84 bytes, found {}", bytes.len()),
        ));
    }
    let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    let expected = HEADER_LEN as u64 + 4 + FACET_LEN as u64 * count as u64;
    if expected != bytes.len() as u64 {
        return Err(Error::parse(
            "STL",
            "header",
            format!(
                "binary STL declares {} facets ({} bytes) but has {} bytes",
                count,
                expected,
                bytes.len()
            ),
        ));
    }

    let mut mesh = Mesh::with_capacity(count * 3, count);
    mesh.normals.reserve(count * 3);
    let read_vec = |cursor: &mut Cursor<&[u8]>| -> Result<[f64; 3]> {
        Ok([
            cursor.read_f32::<LittleEndian>()? as f64,
            cursor.read_f32::<LittleEndian>()? as f64,
            cursor.read_f32::<LittleEndian>()? as f64,
        ])
    };
    for _ in 0..count {
        let normal = read_vec(&mut cursor)?;
        let mut corners = [0u32; 3];
        for corner in &mut corners {
            let [x, y, z] = read_vec(&mut cursor)?;
            *corner = mesh.add_vertex(Point3::new(x, y, z));
        }
        let _attribute = cursor.read_u16::<LittleEndian>()?;
        mesh.add_triangle(corners[0], corners[1], corners[2]);
        mesh.normals.extend_from_slice(&normal);
    }
    Ok(mesh)
}

/// Whitespace tokens of an ASCII STL with their 1-based line numbers
struct Tokens<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    current: Option<(usize, std::str::SplitAsciiWhitespace<'a>)>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            current: None,
        }
    }

    fn next_token(&mut self) -> Option<(usize, &'a str)> {
        loop {
            if let Some((line, words)) = &mut self.current {
                if let Some(word) = words.next() {
                    return Some((*line, word));
                }
            }
            let (index, line) = self.lines.next()?;
            self.current = Some((index + 1, line.split_ascii_whitespace()));
        }
    }

    /// Drop the rest of the current line (solid names may contain spaces)
    fn skip_line(&mut self) {
        self.current = None;
    }

    fn expect(&mut self, keyword: &str, last_line: usize) -> Result<usize> {
        match self.next_token() {
            Some((line, word)) if word.eq_ignore_ascii_case(keyword) => Ok(line),
            Some((line, word)) => Err(Error::parse(
                "STL",
                format!("line {}", line),
                format!("expected '{}', found '{}'", keyword, word),
            )),
            None => Err(Error::parse(
                "STL",
                format!("line {}", last_line),
                format!("unexpected end of file, expected '{}'", keyword),
            )),
        }
    }

    fn number(&mut self, last_line: usize) -> Result<f64> {
        match self.next_token() {
            Some((line, word)) => fast_float::parse::<f64, _>(word).map_err(|_| {
                Error::parse("STL", format!("line {}", line), format!("invalid number '{}'", word))
            }),
            None => Err(Error::parse(
                "STL",
                format!("line {}", last_line),
                "unexpected end of file, expected a number",
            )),
        }
    }

    fn triple(&mut self, last_line: usize) -> Result<[f64; 3]> {
        Ok([self.number(last_line)?, self.number(last_line)?, self.number(last_line)?])
    }
}

fn read_ascii(text: &str) -> Result<Mesh> {
    let mut tokens = Tokens::new(text);
    let mut mesh = Mesh::new();
    let mut line = tokens.expect("solid", 1)?;
    tokens.skip_line();

    loop {
        let Some((at, word)) = tokens.next_token() else {
            return Err(Error::parse(
                "STL",
                format!("line {}", line),
                "missing 'endsolid'",
            ));
        };
        line = at;

        if word.eq_ignore_ascii_case("endsolid") {
            tokens.skip_line();
            // Several solids may follow each other in one file
            match tokens.next_token() {
                None => break,
                Some((at, next)) if next.eq_ignore_ascii_case("solid") => {
                    line = at;
                    tokens.skip_line();
                    continue;
                }
                Some((at, next)) => {
                    return Err(Error::parse(
                        "STL",
                        format!("line {}", at),
                        format!("unexpected '{}' after 'endsolid'", next),
                    ))
                }
            }
        }

        if !word.eq_ignore_ascii_case("facet") {
            return Err(Error::parse(
                "STL",
                format!("line {}", line),
                format!("expected 'facet' or 'endsolid', found '{}'", word),
            ));
        }
        tokens.expect("normal", line)?;
        let normal = tokens.triple(line)?;
        tokens.expect("outer", line)?;
        line = tokens.expect("loop", line)?;

        let mut corners: Vec<u32> = Vec::with_capacity(3);
        loop {
            let Some((at, word)) = tokens.next_token() else {
                return Err(Error::parse("STL", format!("line {}", line), "missing 'endloop'"));
            };
            line = at;
            if word.eq_ignore_ascii_case("endloop") {
                break;
            }
            if !word.eq_ignore_ascii_case("vertex") {
                return Err(Error::parse(
                    "STL",
                    format!("line {}", line),
                    format!("expected 'vertex' or 'endloop', found '{}'", word),
                ));
            }
            let [x, y, z] = tokens.triple(line)?;
            corners.push(mesh.add_vertex(Point3::new(x, y, z)));
        }
        line = tokens.expect("endfacet", line)?;

        if corners.len() < 3 {
            return Err(Error::parse(
                "STL",
                format!("line {}", line),
                format!("facet has {} vertices", corners.len()),
            ));
        }
        for i in 1..corners.len() - 1 {
            mesh.add_triangle(corners[0], corners[i], corners[i + 1]);
            mesh.normals.extend_from_slice(&normal);
        }
    }

    Ok(mesh)
}

/// Solid names may not contain whitespace
fn solid_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "mesh".to_string()
    } else {
        cleaned
    }
}

/// Write `mesh` as ASCII STL
///
/// Coordinates use the shortest representation that parses back to the same
/// `f64`. Facet normals are recomputed from the winding.
pub fn write_ascii_stl<W: Write>(mesh: &Mesh, name: &str, writer: W) -> Result<()> {
    let name = solid_name(name);
    let mut out = BufWriter::new(writer);
    writeln!(out, "solid {}", name)?;
    for face in 0..mesh.triangle_count() {
        let n = mesh.face_normal(face);
        writeln!(out, "  facet normal {} {} {}", n.x, n.y, n.z)?;
        writeln!(out, "    outer loop")?;
        for index in mesh.triangle(face) {
            let p = mesh.position(index);
            writeln!(out, "      vertex {} {} {}", p.x, p.y, p.z)?;
        }
        writeln!(out, "    endloop")?;
        writeln!(out, "  endfacet")?;
    }
    writeln!(out, "endsolid {}", name)?;
    out.flush()?;
    Ok(())
}

pub fn write_stl_file(mesh: &Mesh, name: &str, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_ascii_stl(mesh, name, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::box_mesh;
    use byteorder::WriteBytesExt;

    fn binary_cube() -> Vec<u8> {
        let cube = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));
        let mut bytes = vec![0u8; 80];
        bytes[..5].copy_from_slice(b"solid");
        bytes
            .write_u32::<LittleEndian>(cube.triangle_count() as u32)
            .unwrap();
        for face in 0..cube.triangle_count() {
            let n = cube.face_normal(face);
            for c in [n.x, n.y, n.z] {
                bytes.write_f32::<LittleEndian>(c as f32).unwrap();
            }
            for index in cube.triangle(face) {
                let p = cube.position(index);
                for c in [p.x, p.y, p.z] {
                    bytes.write_f32::<LittleEndian>(c as f32).unwrap();
                }
            }
            bytes.write_u16::<LittleEndian>(0).unwrap();
        }
        bytes
    }

    #[test]
    fn test_binary_with_solid_header() {
        let bytes = binary_cube();
        assert!(is_binary_stl(&bytes));
        let mesh = read_stl(&bytes, "cube.stl").unwrap();
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.normals.len(), 36);
        assert!(mesh.topology().is_closed());
    }

    #[test]
    fn test_truncated_binary() {
        let mut bytes = binary_cube();
        bytes[..5].copy_from_slice(b"\0\0\0\0\0");
        bytes.truncate(bytes.len() - 7);
        let err = read_stl(&bytes, "t.stl").unwrap_err();
        assert!(matches!(err, Error::Parse { format: "STL", .. }), "{}", err);
        assert!(read_stl(&[1, 2, 3], "tiny.stl").is_err());
    }

    #[test]
    fn test_ascii_round_trip() {
        let mut cube = box_mesh(Point3::new(0.1, -0.3, 1e-7), Point3::new(10.7, 1.0 / 3.0, 12.0));
        cube.positions[0] = 0.1 + 0.2;

        let mut text = Vec::new();
        write_ascii_stl(&cube, "my part", &mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.starts_with("solid my_part\n"));
        assert!(text.trim_end().ends_with("endsolid my_part"));

        let back = read_stl(text.as_bytes(), "cube.stl").unwrap();
        assert_eq!(back.triangle_count(), 12);
        assert_eq!(back.vertex_count(), 8);
        for face in 0..12 {
            for (a, b) in cube.triangle(face).iter().zip(back.triangle(face)) {
                assert_eq!(cube.position(*a), back.position(b));
            }
        }
    }

    #[test]
    fn test_ascii_quad_facet_and_multiple_solids() {
        let text = "solid a b c
facet normal 0 0 1
 outer loop
  vertex 0 0 0
  vertex 1 0 0
  vertex 1 1 0
  vertex 0 1 0
 endloop
endfacet
endsolid a
solid second
facet normal 0 0 1
 outer loop
  vertex 0 0 1
  vertex 1 0 1
  vertex 1 1 1
 endloop
endfacet
endsolid
";
        let mesh = read_stl(text.as_bytes(), "quad.stl").unwrap();
        assert_eq!(mesh.triangle_count(), 3);
        assert_eq!(mesh.vertex_count(), 7);
    }

    #[test]
    fn test_ascii_errors_name_the_line() {
        let text = "solid x\nfacet normal 0 0 1\nouter loop\nvertex 0 0 zero\n";
        match read_stl(text.as_bytes(), "bad.stl") {
            Err(Error::Parse { location, message, .. }) => {
                assert_eq!(location, "line 4");
                assert!(message.contains("zero"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let empty = "solid empty\nendsolid empty\n";
        assert!(matches!(read_stl(empty.as_bytes(), "e.stl"), Err(Error::EmptyMesh(_))));
    }
}
