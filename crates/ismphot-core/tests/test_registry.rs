use std::path::PathBuf;

use chrono::Utc;
use tempfile::tempdir;

use ismphot_core::config::{CombineMethod, PhotometryMode};
use ismphot_core::error::IsmError;
use ismphot_core::identity::FrameKey;
use ismphot_core::quality::QualityMetrics;
use ismphot_core::reference::{
    AstrometricReference, BuildInfo, CombinedPhotometricReference, ReferenceType,
};
use ismphot_core::registry::Registry;

const FIELD: &str = "G1234+5678_abc";

fn key() -> FrameKey {
    FrameKey::new(42, FIELD, 5)
}

fn astromref(frame: &str, s_val: f64) -> AstrometricReference {
    AstrometricReference {
        field: FIELD.into(),
        project_id: 42,
        ccd: 5,
        is_active: true,
        created_at: Utc::now(),
        frame_path: PathBuf::from(frame),
        jpeg_path: PathBuf::from(frame).with_extension("jpeg"),
        s_val,
        d_val: 0.01,
        bg_val: f64::NAN,
        detection_count: 1500,
        comment: "test".into(),
    }
}

fn photref(reference_type: ReferenceType, frame: &str) -> CombinedPhotometricReference {
    let mut target_metrics = QualityMetrics::default();
    target_metrics.median_s = 3.1;
    target_metrics.detection_count = Some(900);
    CombinedPhotometricReference {
        field: FIELD.into(),
        project_id: 42,
        ccd: 5,
        reference_type,
        is_active: true,
        created_at: Utc::now(),
        frame_path: PathBuf::from(frame),
        jpeg_path: PathBuf::from(frame).with_extension("jpeg"),
        convolve_target_path: PathBuf::from("/red/1-000001_5-xtrns.fits"),
        registration_file_path: PathBuf::from(frame).with_extension("reg"),
        calibration_photometry_path: PathBuf::from(frame).with_extension("cmrawphot"),
        build: BuildInfo {
            combine_method: CombineMethod::Median,
            kernel_spec: "b/4;i/4;d=4/4".into(),
            photometry_mode: PhotometryMode::ReExtracted,
            aperture_spec: "1.95:7.0:6.0".into(),
            field_catalog_path: PathBuf::from("/cat/G1234+5678_abc-15.0.catalog"),
            candidate_set_key: "abc123".into(),
            master_frame: PathBuf::from("/red/1-000001_5-xtrns.fits"),
            combined_frames: vec![PathBuf::from("/red/1-000001_5-xtrns.fits")],
        },
        target_metrics,
    }
}

#[test]
fn test_empty_registry_has_no_reference() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(&dir.path().join("refs").join("refinfo.sqlite")).unwrap();
    assert!(matches!(
        registry.get_active_astromref(&key()),
        Err(IsmError::NotFound { .. })
    ));
    assert!(matches!(
        registry.get_active_combined_ref(&key(), ReferenceType::OneHour),
        Err(IsmError::NotFound { .. })
    ));
    assert_eq!(registry.active_astromref_count(&key()).unwrap(), 0);
}

#[test]
fn test_new_astromref_supersedes_old() {
    let dir = tempdir().unwrap();
    let mut registry = Registry::open(&dir.path().join("refinfo.sqlite")).unwrap();

    registry.register_astromref(&astromref("/refs/a.fits", 2.0)).unwrap();
    registry.register_astromref(&astromref("/refs/b.fits", 3.0)).unwrap();

    let active = registry.get_active_astromref(&key()).unwrap();
    assert_eq!(active.frame_path, PathBuf::from("/refs/b.fits"));
    assert_eq!(active.s_val, 3.0);
    assert!(active.bg_val.is_nan());
    assert_eq!(active.detection_count, 1500);
    assert_eq!(registry.active_astromref_count(&key()).unwrap(), 1);

    let history = registry.astromref_history(&key()).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
    assert!(history.iter().any(|r| !r.is_active && r.frame_path == PathBuf::from("/refs/a.fits")));
}

#[test]
fn test_keys_are_independent() {
    let dir = tempdir().unwrap();
    let mut registry = Registry::open(&dir.path().join("refinfo.sqlite")).unwrap();

    registry.register_astromref(&astromref("/refs/a.fits", 2.0)).unwrap();
    let mut other = astromref("/refs/c.fits", 2.0);
    other.ccd = 6;
    registry.register_astromref(&other).unwrap();

    assert_eq!(
        registry.get_active_astromref(&key()).unwrap().frame_path,
        PathBuf::from("/refs/a.fits")
    );
    assert_eq!(
        registry
            .get_active_astromref(&FrameKey::new(42, FIELD, 6))
            .unwrap()
            .frame_path,
        PathBuf::from("/refs/c.fits")
    );
}

#[test]
fn test_combined_refs_per_type() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("refinfo.sqlite");
    let mut registry = Registry::open(&path).unwrap();

    registry
        .register_combined_ref(&photref(ReferenceType::OneHour, "/refs/h1.fits"))
        .unwrap();
    registry
        .register_combined_ref(&photref(ReferenceType::OneNight, "/refs/n1.fits"))
        .unwrap();
    registry
        .register_combined_ref(&photref(ReferenceType::OneHour, "/refs/h2.fits"))
        .unwrap();

    // A fresh connection sees the committed state.
    let registry = Registry::open(&path).unwrap();
    let hour = registry.get_active_combined_ref(&key(), ReferenceType::OneHour).unwrap();
    assert_eq!(hour.frame_path, PathBuf::from("/refs/h2.fits"));
    assert_eq!(hour.build.candidate_set_key, "abc123");
    assert_eq!(hour.build.combine_method, CombineMethod::Median);
    assert_eq!(hour.target_metrics.median_s, 3.1);
    assert_eq!(hour.target_metrics.detection_count, Some(900));
    assert!(hour.target_metrics.zenith_distance.is_nan());

    let night = registry.get_active_combined_ref(&key(), ReferenceType::OneNight).unwrap();
    assert_eq!(night.frame_path, PathBuf::from("/refs/n1.fits"));
    assert!(matches!(
        registry.get_active_combined_ref(&key(), ReferenceType::OneFrame),
        Err(IsmError::NotFound { .. })
    ));

    let history = registry.combined_ref_history(&key(), ReferenceType::OneHour).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.is_active).count(), 1);
}
