use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};
use pcd_catalog::{
    Catalog, CatalogConfig, CatalogError, Converter, FlagReason, Sidecar, StorageFormat,
    SIDECAR_FILE_NAME,
};
use pcd_core::pointcloud::point::{Point, PointCloud, LEGACY_FILE_NAME};
use pcd_ept::EptBuilder;

const EPT_JSON: &str = r#"{
    "bounds": [-2.0, -2.0, -2.0, 2.0, 2.0, 2.0],
    "boundsConforming": [-1.5, -1.25, -1.0, 1.5, 1.25, 1.0],
    "points": 4321,
    "schema": [
        {"name": "X", "type": "floating", "size": 4},
        {"name": "Y", "type": "floating", "size": 4},
        {"name": "Z", "type": "floating", "size": 4},
        {"name": "Red", "type": "unsigned", "size": 1},
        {"name": "Green", "type": "unsigned", "size": 1},
        {"name": "Blue", "type": "unsigned", "size": 1}
    ],
    "dataType": "binary",
    "hierarchyType": "json",
    "span": 128
}"#;

fn write_ept_only(root: &Path, id: &str) {
    let dir = root.join(id);
    fs::create_dir_all(dir.join("ept-data")).unwrap();
    fs::write(dir.join("ept.json"), EPT_JSON).unwrap();
    fs::write(dir.join("ept-data").join("0-0-0-0.bin"), vec![0u8; 15 * 4]).unwrap();
}

fn cloud(n: usize) -> PointCloud {
    let points = (0..n)
        .map(|i| {
            let t = i as f32 / n as f32;
            Point::new([t, 1.0 - t, t * 0.5]).with_normal([0.0, 0.0, 1.0])
        })
        .collect();
    PointCloud::new(points, "teapot.obj")
}

#[test]
fn metadata_is_derived_from_ept_when_sidecar_is_missing() {
    let root = tempfile::tempdir().unwrap();
    write_ept_only(root.path(), "scan");
    let catalog = Catalog::new(CatalogConfig::new(root.path()));

    let record = catalog.get("scan").unwrap();
    assert_eq!(record.id, "scan");
    assert_eq!(record.point_count, 4321);
    assert_eq!(record.bounds_min, [-1.5, -1.25, -1.0]);
    assert_eq!(record.bounds_max, [1.5, 1.25, 1.0]);
    assert!(record.has_colors);
    assert!(!record.has_normals);
    assert_eq!(record.format, StorageFormat::Ept);

    // the derived record was persisted
    let sidecar_path = root.path().join("scan").join(SIDECAR_FILE_NAME);
    let sidecar = Sidecar::load(&sidecar_path).unwrap();
    assert_eq!(sidecar.point_count, Some(4321));

    let expected = EPT_JSON.len() as u64 + 60 + fs::metadata(&sidecar_path).unwrap().len();
    assert_eq!(record.file_size, expected);
}

#[test]
fn ept_wins_over_inconsistent_sidecar() {
    let root = tempfile::tempdir().unwrap();
    write_ept_only(root.path(), "scan");
    let stale = Sidecar {
        id: Some("scan".to_string()),
        source_file: Some("room.glb".to_string()),
        point_count: Some(10),
        has_normals: Some(true),
        ..Default::default()
    };
    stale
        .save(&root.path().join("scan").join(SIDECAR_FILE_NAME))
        .unwrap();

    let catalog = Catalog::new(CatalogConfig::new(root.path()));
    let record = catalog.get("scan").unwrap();
    assert_eq!(record.point_count, 4321);
    assert!(!record.has_normals);
    assert_eq!(record.source_file, "room.glb");

    // reads never rewrite an existing sidecar
    let on_disk = Sidecar::load(&root.path().join("scan").join(SIDECAR_FILE_NAME)).unwrap();
    assert_eq!(on_disk, stale);
}

#[test]
fn legacy_json_is_a_fallback() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("flat");
    fs::create_dir_all(&dir).unwrap();
    cloud(10).save(&dir.join(LEGACY_FILE_NAME)).unwrap();

    let catalog = Catalog::new(CatalogConfig::new(root.path()).with_persist_derived(false));
    let record = catalog.get("flat").unwrap();
    assert_eq!(record.format, StorageFormat::Json);
    assert_eq!(record.point_count, 10);
    assert!(record.has_normals);
    assert!(!record.has_colors);
    assert!(!dir.join(SIDECAR_FILE_NAME).exists());
}

#[test]
fn unknown_and_malformed_ids() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("empty")).unwrap();
    let catalog = Catalog::new(CatalogConfig::new(root.path()));

    assert!(matches!(catalog.get("missing"), Err(CatalogError::NotFound(_))));
    assert!(matches!(catalog.get("empty"), Err(CatalogError::NotFound(_))));
    assert!(matches!(catalog.get("../etc"), Err(CatalogError::InvalidId(_))));
}

#[test]
fn list_covers_every_readable_point_cloud() {
    let root = tempfile::tempdir().unwrap();
    write_ept_only(root.path(), "a");
    EptBuilder::new()
        .with_max_points_per_tile(50)
        .build(&cloud(300), &root.path().join("b"))
        .unwrap();
    fs::create_dir_all(root.path().join("c")).unwrap();

    let catalog = Catalog::new(CatalogConfig::new(root.path()));
    let ids: Vec<String> = catalog.list().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["a", "b"]);

    let built = catalog.get("b").unwrap();
    assert_eq!(built.point_count, 300);
    assert!(built.has_normals);
    assert!(built.file_size > 0);
}

#[test]
fn audit_repairs_and_flags_without_deleting() {
    let root = tempfile::tempdir().unwrap();
    write_ept_only(root.path(), "bare");

    write_ept_only(root.path(), "partial");
    fs::write(root.path().join("partial").join("chair.fbx"), "fbx").unwrap();
    fs::write(
        root.path().join("partial").join(SIDECAR_FILE_NAME),
        r#"{"pointCount": 4321}"#,
    )
    .unwrap();

    // conversion never finished
    fs::create_dir_all(root.path().join("stuck").join("ept-data")).unwrap();

    let catalog = Catalog::new(CatalogConfig::new(root.path()));
    let report = catalog.audit(Utc::now()).unwrap();

    assert_eq!(report.fabricated, ["bare"]);
    assert_eq!(report.patched, ["partial"]);
    assert_eq!(report.flagged.len(), 1);
    assert_eq!(report.flagged[0].id, "stuck");
    assert_eq!(report.flagged[0].reason, FlagReason::MissingData);

    let patched = Sidecar::load(&root.path().join("partial").join(SIDECAR_FILE_NAME)).unwrap();
    assert_eq!(patched.id.as_deref(), Some("partial"));
    assert_eq!(patched.source_file.as_deref(), Some("chair.fbx"));
    assert_eq!(patched.format, Some(StorageFormat::Ept));
    assert_eq!(patched.has_colors, Some(true));

    // flagged but young: a sweep leaves it alone
    assert!(catalog.sweep(&report).unwrap().is_empty());
    assert!(root.path().join("stuck").is_dir());

    // a second pass has nothing left to repair
    let again = catalog.audit(Utc::now()).unwrap();
    assert!(again.fabricated.is_empty() && again.patched.is_empty());
}

#[test]
fn sweep_removes_only_expired_incomplete_directories() {
    let root = tempfile::tempdir().unwrap();
    write_ept_only(root.path(), "good");
    fs::create_dir_all(root.path().join("stuck")).unwrap();

    let catalog =
        Catalog::new(CatalogConfig::new(root.path()).with_retention(Duration::hours(1)));
    let report = catalog.audit(Utc::now() + Duration::hours(48)).unwrap();
    assert_eq!(report.flagged.len(), 1);
    assert!(matches!(report.flagged[0].reason, FlagReason::Expired { age_hours } if age_hours >= 47));

    // nothing is deleted until asked
    assert!(root.path().join("stuck").is_dir());
    let removed = catalog.sweep(&report).unwrap();
    assert_eq!(removed, ["stuck"]);
    assert!(!root.path().join("stuck").exists());
    assert!(root.path().join("good").is_dir());
}

#[test]
fn glob_metacharacters_in_ids_keep_data_intact() {
    let root = tempfile::tempdir().unwrap();
    let root = root.path().join("scans[2024]");
    write_ept_only(&root, "scan[1]");

    let catalog = Catalog::new(CatalogConfig::new(&root).with_retention(Duration::hours(-1)));
    let record = catalog.get("scan[1]").unwrap();
    assert!(record.file_size >= EPT_JSON.len() as u64 + 60);
    assert_eq!(catalog.store().tile_keys("scan[1]").unwrap().len(), 1);

    let report = catalog.audit(Utc::now() + Duration::hours(48)).unwrap();
    assert!(report.flagged.is_empty(), "{:?}", report.flagged);
    assert!(catalog.sweep(&report).unwrap().is_empty());
    assert!(root.join("scan[1]").join("ept.json").is_file());
}

#[cfg(unix)]
#[test]
fn ingest_runs_converter_and_records_metadata() {
    let root = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let template = work.path().join("template.json");
    fs::write(&template, EPT_JSON).unwrap();
    let script = work.path().join("convert.sh");
    fs::write(
        &script,
        format!(
            "while [ $# -gt 0 ]; do\n  case \"$1\" in --output) out=\"$2\"; shift;; esac\n  shift\ndone\nmkdir -p \"$out/ept-data\"\ncp '{}' \"$out/ept.json\"\nhead -c 60 /dev/zero > \"$out/ept-data/0-0-0-0.bin\"\n",
            template.display()
        ),
    )
    .unwrap();
    let failing = work.path().join("fail.sh");
    fs::write(&failing, "echo 'mesh has no faces' >&2\nexit 3\n").unwrap();

    let upload = work.path().join("statue.glb");
    fs::write(&upload, b"glTF").unwrap();

    let catalog = Catalog::new(CatalogConfig::new(root.path()));

    let converter = Converter::new("sh").with_leading_args([script.as_os_str()]);
    let record = catalog.ingest(&converter, &upload, "statue", 5000).unwrap();
    assert_eq!(record.source_file, "statue.glb");
    assert_eq!(record.point_count, 4321);
    assert_eq!(record.format, StorageFormat::Ept);

    let broken = Converter::new("sh").with_leading_args([failing.as_os_str()]);
    match catalog.ingest(&broken, &upload, "broken", 5000) {
        Err(CatalogError::Converter { status, stderr }) => {
            assert_eq!(status, Some(3));
            assert_eq!(stderr, "mesh has no faces");
        }
        other => panic!("expected converter failure, got {other:?}"),
    }

    // rejected uploads never reach the converter
    let text = work.path().join("notes.txt");
    fs::write(&text, "hello").unwrap();
    assert!(matches!(
        catalog.ingest(&converter, &text, "notes", 5000),
        Err(CatalogError::Validation(_))
    ));
    assert!(!root.path().join("notes").exists());
}
