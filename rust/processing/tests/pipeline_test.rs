// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use solidvol_geometry::{enclosed_volume, read_stl_file, to_cm3, write_stl_file, Mesh, Point3};
use solidvol_processing::{
    run, ErrorCode, ModelFormat, Pipeline, PipelineConfig, PipelineError, SourceFile, Stage,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        export_dir: dir.path().join("exports"),
        worker_threads: 2,
        ..PipelineConfig::default()
    }
}

/// Copy `contents` to an upload path and take ownership of it
fn upload(dir: &TempDir, name: &str, contents: &[u8]) -> SourceFile {
    let path = dir.path().join(format!("upload-{}", name));
    std::fs::write(&path, contents).unwrap();
    SourceFile::open(path, name).unwrap()
}

fn geometry_fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../geometry/tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

/// Closed cube of side `size`; `start` rotates each triangle's first corner
fn cube(size: f64, start: usize) -> Mesh {
    let mut mesh = Mesh::new();
    for i in 0..8u32 {
        mesh.add_vertex(Point3::new(
            if i & 1 == 0 { 0.0 } else { size },
            if i & 2 == 0 { 0.0 } else { size },
            if i & 4 == 0 { 0.0 } else { size },
        ));
    }
    let quads = [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ];
    for q in quads {
        for tri in [[q[0], q[1], q[2]], [q[0], q[2], q[3]]] {
            mesh.add_triangle(tri[start % 3], tri[(start + 1) % 3], tri[(start + 2) % 3]);
        }
    }
    mesh
}

fn uv_sphere(radius: f64, rings: u32, segments: u32) -> Mesh {
    let mut mesh = Mesh::new();
    let north = mesh.add_vertex(Point3::new(0.0, 0.0, radius));
    for r in 1..rings {
        let phi = PI * r as f64 / rings as f64;
        for s in 0..segments {
            let theta = 2.0 * PI * s as f64 / segments as f64;
            mesh.add_vertex(Point3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            ));
        }
    }
    let south = mesh.add_vertex(Point3::new(0.0, 0.0, -radius));
    let ring = |r: u32, s: u32| 1 + (r - 1) * segments + s % segments;
    for s in 0..segments {
        mesh.add_triangle(north, ring(1, s), ring(1, s + 1));
        mesh.add_triangle(south, ring(rings - 1, s + 1), ring(rings - 1, s));
    }
    for r in 1..rings - 1 {
        for s in 0..segments {
            mesh.add_triangle(ring(r, s), ring(r + 1, s), ring(r + 1, s + 1));
            mesh.add_triangle(ring(r, s), ring(r + 1, s + 1), ring(r, s + 1));
        }
    }
    mesh
}

fn mesh_upload(dir: &TempDir, name: &str, mesh: &Mesh) -> SourceFile {
    let path = dir.path().join(format!("upload-{}", name));
    write_stl_file(mesh, "upload", &path).unwrap();
    SourceFile::open(path, name).unwrap()
}

fn assert_removed(path: &Path) {
    assert!(!path.exists(), "{} still exists", path.display());
}

#[test]
fn test_cube_stl_is_one_cubic_centimetre() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    for start in 0..3 {
        let source = mesh_upload(&dir, "cube.stl", &cube(10.0, start));
        let upload_path = source.path().to_path_buf();
        let processed = run(&config, &source).unwrap();
        drop(source);
        assert_removed(&upload_path);

        let result = &processed.result;
        assert_relative_eq!(result.volume_cm3, 1.0, epsilon = 1e-12);
        assert_eq!(result.format, ModelFormat::Mesh(solidvol_processing::MeshFormat::Stl));
        assert_eq!(result.face_count, 12);
        assert!(!result.simplified);
        assert!(result.export_path.exists());
        assert!(result.export_path.starts_with(&config.export_dir));

        let export = result.export_path.clone();
        drop(processed);
        assert_removed(&export);
    }
}

#[test]
fn test_export_round_trip_keeps_volume() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let sphere = uv_sphere(7.0, 24, 48);

    let processed = run(&config, &mesh_upload(&dir, "ball.stl", &sphere)).unwrap();
    let reread = read_stl_file(&processed.result.export_path).unwrap();
    let volume = to_cm3(enclosed_volume(&reread).unwrap(), 1.0);
    assert_relative_eq!(volume, processed.result.volume_cm3, max_relative = 1e-6);
    assert_eq!(reread.triangle_count(), processed.result.face_count);
}

#[test]
fn test_obj_upload_uses_mesh_unit() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        mesh_unit_mm: 10.0,
        ..config(&dir)
    };
    let obj = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\nv 0 0 1\nv 1 0 1\nv 0 1 1\nv 1 1 1\n\
f 1 3 4 2\nf 5 6 8 7\nf 1 2 6 5\nf 3 7 8 4\nf 1 5 7 3\nf 2 4 8 6\n";
    let processed = run(&config, &upload(&dir, "unit.OBJ", obj)).unwrap();
    assert_relative_eq!(processed.result.volume_cm3, 1.0, epsilon = 1e-12);
}

#[test]
fn test_step_and_iges_cylinders() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let expected = PI * 25.0 * 10.0 / 1000.0;

    for (name, fixture) in [("cyl.step", "cylinder.step"), ("cyl.igs", "cylinder.igs")] {
        let processed = run(&config, &upload(&dir, name, &geometry_fixture(fixture))).unwrap();
        let result = &processed.result;
        assert!(matches!(result.format, ModelFormat::Brep(_)));
        assert_relative_eq!(result.volume_cm3, expected, max_relative = 0.01);

        // The export is the closed preview tessellation
        let preview = read_stl_file(&result.export_path).unwrap();
        assert!(preview.topology().is_closed());
        assert_eq!(preview.triangle_count(), result.face_count);
        assert_ne!(result.preview_path, result.export_path);
    }
}

#[test]
fn test_large_mesh_is_halved() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let sphere = uv_sphere(20.0, 101, 250);
    assert_eq!(sphere.triangle_count(), 50_000);
    let exact = 4.0 / 3.0 * PI * 8.0;

    let processed = run(&config, &mesh_upload(&dir, "dense.stl", &sphere)).unwrap();
    let result = &processed.result;
    assert!(result.simplified);
    assert!(
        (24_000..=25_000).contains(&result.face_count),
        "{} faces",
        result.face_count
    );
    assert_relative_eq!(result.volume_cm3, exact, max_relative = 0.02);

    let exported = read_stl_file(&result.export_path).unwrap();
    assert_eq!(exported.triangle_count(), result.face_count);

    // At or below the threshold a second pass leaves the mesh alone
    let config = PipelineConfig {
        simplify_threshold: result.face_count,
        ..config
    };
    let again = run(&config, &mesh_upload(&dir, "again.stl", &exported)).unwrap();
    assert!(!again.result.simplified);
    assert_eq!(again.result.face_count, result.face_count);
}

#[test]
fn test_unsupported_extension_never_touches_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    // Nothing exists at this path
    let source = SourceFile::from_upload(dir.path().join("missing"), "bracket.sldprt", 1_000);

    let err = run(&config, &source).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnsupportedFormat);
    assert!(err.user_message().contains("STEP"), "{}", err.user_message());
    assert!(!config.export_dir.exists());
}

#[test]
fn test_open_mesh_is_rejected_every_time() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let mut open = cube(10.0, 0);
    open.indices.truncate(33);

    let mut messages = Vec::new();
    for _ in 0..2 {
        let err = run(&config, &mesh_upload(&dir, "open.stl", &open)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.stage(), Stage::Volume);
        messages.push(err.to_string());
    }
    assert_eq!(messages[0], messages[1]);
    assert!(messages[0].contains("boundary"), "{}", messages[0]);
}

#[test]
fn test_oversized_upload() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        max_file_size_mb: 1,
        ..config(&dir)
    };
    let source = SourceFile::from_upload(dir.path().join("big.stl"), "big.stl", 2 * 1024 * 1024);
    match run(&config, &source) {
        Err(PipelineError::ResourceLimitExceeded { context, size, limit }) => {
            assert_eq!(context.stage, Stage::Read);
            assert_eq!(size, 2 * 1024 * 1024);
            assert_eq!(limit, 1024 * 1024);
        }
        other => panic!("expected resource limit, got {:?}", other.map(|p| p.result)),
    }
}

#[test]
fn test_parse_and_geometry_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let err = run(&config, &upload(&dir, "bad.obj", b"v 0 0 zero\nf 1 2 3\n")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParseError);
    assert_eq!(err.stage(), Stage::Decode);

    let err = run(&config, &upload(&dir, "points.obj", b"v 0 0 0\nv 1 0 0\n")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let empty_step = b"ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n#1=CARTESIAN_POINT('',(0.,0.,0.));\nENDSEC;\nEND-ISO-10303-21;\n";
    let err = run(&config, &upload(&dir, "empty.stp", empty_step)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::GeometryError);
    let report = err.report();
    assert_eq!(report.context.unwrap().file_name, "empty.stp");
}

#[test]
fn test_hostile_step_references_are_parse_errors() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let pipeline = Pipeline::new(config.clone()).unwrap();
    let fixture = String::from_utf8(geometry_fixture("cylinder.step")).unwrap();

    let cases = [
        ("#18=ORIENTED_EDGE('',*,*,#13,.T.);", "#18=ORIENTED_EDGE('',*,*,#18,.T.);"),
        ("#22=EDGE_LOOP('',(#18,#19,#20,#21));", "#22=EDGE_LOOP('',(#18,#19,#20,#404));"),
        ("#23=FACE_OUTER_BOUND('',#22,.T.);", "#23=FACE_OUTER_BOUND('',#7,.T.);"),
    ];
    for (from, to) in cases {
        assert!(fixture.contains(from), "fixture lacks {}", from);
        let source = upload(&dir, "hostile.step", fixture.replace(from, to).as_bytes());
        let upload_path = source.path().to_path_buf();

        let err = pipeline.process_blocking(source).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError, "{}", err);
        assert_eq!(err.stage(), Stage::Decode);
        assert_removed(&upload_path);
    }

    let leftovers = std::fs::read_dir(&config.export_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_pool_jobs_clean_up_sources() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(&dir)).unwrap();

    let good = mesh_upload(&dir, "good.stl", &cube(10.0, 0));
    let good_path = good.path().to_path_buf();
    let bad = upload(&dir, "bad.obj", b"f 1 2 3\n");
    let bad_path = bad.path().to_path_buf();

    let good_job = pipeline.submit(good);
    let bad_job = pipeline.submit(bad);

    let processed = good_job.await.unwrap().unwrap();
    assert_relative_eq!(processed.result.volume_cm3, 1.0, epsilon = 1e-12);
    let err = bad_job.await.unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::ParseError);

    assert_removed(&good_path);
    assert_removed(&bad_path);

    let json = serde_json::to_value(&processed.result).unwrap();
    assert_eq!(json["format"]["kind"], "mesh");
    assert_eq!(json["face_count"], 12);
}

#[test]
fn test_blocking_process() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(&dir)).unwrap();
    let processed = pipeline
        .process_blocking(mesh_upload(&dir, "cube.stl", &cube(20.0, 1)))
        .unwrap();
    assert_relative_eq!(processed.result.volume_cm3, 8.0, epsilon = 1e-9);
}
