#[allow(dead_code)]
mod common;

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tempfile::tempdir;

use common::{
    fake_context, frame_header, test_config, uniform_sources, write_catalog, write_frame_file,
    write_observed_frame, write_text_phot, Conditions, FakeRunner, FIELD, PROJECT,
};
use ismphot_core::combined::build_combined_ref;
use ismphot_core::config::{IsmConfig, NewSourceConfig, PhotrefSelectionConfig};
use ismphot_core::context::Context;
use ismphot_core::error::IsmError;
use ismphot_core::frame::Frame;
use ismphot_core::io::fits::{read_frame, FitsHeader};
use ismphot_core::newsource::CatalogMatchFinder;
use ismphot_core::photref::select_candidates;
use ismphot_core::reference::{CombinedPhotometricReference, ReferenceType, SubtractionDirection};
use ismphot_core::subtract::{convsubphot, subtract_frame, subtract_frames, DiffFailure, DiffRequest};

fn request(direction: SubtractionDirection) -> DiffRequest<'static> {
    DiffRequest {
        reference_type: ReferenceType::OneHour,
        direction,
        new_sources: None,
    }
}

/// Build and register a onehour combined reference (pixel value 100).
fn combined_reference(root: &Path, config: &IsmConfig, ctx: &Context) -> CombinedPhotometricReference {
    let cand = root.join("candidates");
    fs::create_dir_all(&cand).unwrap();
    let c = Conditions::default();
    let frames: Vec<PathBuf> = [(1, 3.0), (2, 2.0)]
        .into_iter()
        .map(|(n, s)| write_observed_frame(&cand, n, 5, &c, &uniform_sources(5, 100.0, s, 0.05)))
        .collect();
    write_catalog(&ReferenceType::OneHour.catalog_path(&config.paths.catalog_dir, FIELD));
    let thresholds = PhotrefSelectionConfig {
        min_frames: 2,
        ..PhotrefSelectionConfig::default()
    };
    let set = select_candidates(&frames, &thresholds, false, ctx);
    build_combined_ref(&set, ReferenceType::OneHour, ctx).unwrap()
}

/// A registered frame `1-{number}_{ccd}-xtrns.fits` of constant `value`, with its transform.
fn registered_frame(dir: &Path, number: u32, ccd: u8, value: f32) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let frame = dir.join(format!("1-{number:06}_{ccd}-xtrns.fits"));
    write_frame_file(
        &frame,
        Array2::from_elem((32, 32), value),
        frame_header(FIELD, PROJECT, &Conditions::default()),
    );
    fs::write(dir.join(format!("1-{number:06}_{ccd}.itrans")), "# transform\n").unwrap();
    frame
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_subtract_frames_direction() {
    let science = Frame::new(Array2::from_elem((4, 5), 150.0), FitsHeader::new());
    let reference = Frame::new(Array2::from_elem((4, 5), 100.0), FitsHeader::new());

    let normal = subtract_frames(&science, &reference, SubtractionDirection::Normal).unwrap();
    assert!(normal.data.iter().all(|&v| v == 50.0));
    let reverse = subtract_frames(&science, &reference, SubtractionDirection::Reverse).unwrap();
    assert!(reverse.data.iter().all(|&v| v == -50.0));

    let small = Frame::new(Array2::zeros((2, 2)), FitsHeader::new());
    assert!(matches!(
        subtract_frames(&science, &small, SubtractionDirection::Normal),
        Err(IsmError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_no_reference_touches_nothing() {
    let dir = tempdir().unwrap();
    let runner = FakeRunner::new();
    let calls = runner.calls.clone();
    let ctx = fake_context(test_config(dir.path()), runner);
    let red = dir.path().join("red");
    let frame = registered_frame(&red, 10, 5, 150.0);
    let before = file_names(&red);

    let err = subtract_frame(&frame, request(SubtractionDirection::Normal), &ctx).unwrap_err();
    assert!(matches!(err, DiffFailure::NoReference { reference_type: ReferenceType::OneHour, .. }));
    assert!(err.partial_output().is_none());
    assert_eq!(file_names(&red), before);
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_unresolvable_frame() {
    let dir = tempdir().unwrap();
    let ctx = fake_context(test_config(dir.path()), FakeRunner::new());
    let junk = dir.path().join("junk.fits");
    fs::write(&junk, b"junk").unwrap();

    assert!(matches!(
        subtract_frame(&junk, request(SubtractionDirection::Normal), &ctx),
        Err(DiffFailure::Unresolved(_))
    ));
}

#[test]
fn test_full_difference_run() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let runner = FakeRunner::new();
    let calls = runner.calls.clone();
    let ctx = fake_context(config.clone(), runner);
    combined_reference(dir.path(), &config, &ctx);
    calls.lock().unwrap().clear();

    let red = dir.path().join("red");
    let frame = registered_frame(&red, 10, 5, 150.0);
    let artifact = subtract_frame(&frame, request(SubtractionDirection::Normal), &ctx).unwrap();

    assert_eq!(artifact.source_frame, frame);
    assert_eq!(artifact.subtracted_frame_path, red.join("1-000010_5-onehour-sub.fits"));
    assert_eq!(artifact.transform_path, red.join("1-000010_5.itrans"));
    assert!(artifact.convolution_kernel_path.exists());
    assert!(artifact.photometry_output_path.exists());
    assert!(artifact.new_sources_path.is_none());

    let difference = read_frame(&artifact.subtracted_frame_path).unwrap();
    assert!(difference.data.iter().all(|&v| v == 50.0));
    assert_eq!(difference.header.get_str("OBJECT").as_deref(), Some(FIELD));
    // The convolved reference is scratch.
    assert!(!red.join("1-000010_5-onehour-sub.conv.fits").exists());
    assert_eq!(calls.lock().unwrap().as_slice(), &["ficonv", "fiphot"]);

    let reverse = subtract_frame(&frame, request(SubtractionDirection::Reverse), &ctx).unwrap();
    assert_eq!(reverse.subtracted_frame_path, red.join("1-000010_5-onehour-rsub.fits"));
    let difference = read_frame(&reverse.subtracted_frame_path).unwrap();
    assert!(difference.data.iter().all(|&v| v == -50.0));
}

#[test]
fn test_missing_transform() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let ctx = fake_context(config.clone(), FakeRunner::new());
    combined_reference(dir.path(), &config, &ctx);

    let red = dir.path().join("red");
    let frame = registered_frame(&red, 10, 5, 150.0);
    fs::remove_file(red.join("1-000010_5.itrans")).unwrap();
    let before = file_names(&red);

    let err = subtract_frame(&frame, request(SubtractionDirection::Normal), &ctx).unwrap_err();
    assert!(matches!(err, DiffFailure::MissingArtifacts(IsmError::MissingArtifact { .. })));
    assert!(err.partial_output().is_none());
    // The subtracted frame and kernel written before the check are withdrawn.
    assert_eq!(file_names(&red), before);
}

#[test]
fn test_unreadable_registry_is_not_a_missing_reference() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    let blocked = dir.path().join("registry-is-a-directory");
    fs::create_dir_all(&blocked).unwrap();
    config.paths.registry_path = blocked;
    let runner = FakeRunner::new();
    let calls = runner.calls.clone();
    let ctx = fake_context(config, runner);
    let frame = registered_frame(&dir.path().join("red"), 10, 5, 150.0);

    let err = subtract_frame(&frame, request(SubtractionDirection::Normal), &ctx).unwrap_err();
    assert!(matches!(err, DiffFailure::ReferenceLookup(IsmError::Sqlite(_))));
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_photometry_failure_keeps_subtracted_frame() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let ctx = fake_context(config.clone(), FakeRunner::new());
    combined_reference(dir.path(), &config, &ctx);

    let red = dir.path().join("red");
    let frame = registered_frame(&red, 10, 5, 150.0);
    let broken = fake_context(config, FakeRunner::failing("fiphot"));
    let err = subtract_frame(&frame, request(SubtractionDirection::Normal), &broken).unwrap_err();

    let partial = err.partial_output().unwrap();
    assert_eq!(partial, red.join("1-000010_5-onehour-sub.fits"));
    assert!(partial.exists());
    assert!(!red.join("1-000010_5-onehour-sub.iphot").exists());
}

#[test]
fn test_new_sources() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let ctx = fake_context(config.clone(), FakeRunner::new());
    let reference = combined_reference(dir.path(), &config, &ctx);
    let finder = CatalogMatchFinder::new(NewSourceConfig::default());
    let red = dir.path().join("red");
    let frame = registered_frame(&red, 10, 5, 150.0);

    // Every detection sits on a calibrated source.
    let with_finder = DiffRequest {
        new_sources: Some(&finder),
        ..request(SubtractionDirection::Normal)
    };
    let artifact = subtract_frame(&frame, with_finder, &ctx).unwrap();
    let listed = artifact.new_sources_path.unwrap();
    assert_eq!(listed, red.join("1-000010_5-onehour-sub.newsrc"));
    let text = fs::read_to_string(&listed).unwrap();
    assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 0);

    // With nothing calibrated, every bright detection is new.
    write_text_phot(&reference.calibration_photometry_path, &[]);
    let artifact = subtract_frame(&frame, with_finder, &ctx).unwrap();
    let text = fs::read_to_string(artifact.new_sources_path.unwrap()).unwrap();
    let ids: Vec<&str> = text
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(ids, ["HAT-999-0000001", "HAT-999-0000002", "HAT-999-0000003"]);
    // The detection scratch list is cleaned up.
    assert!(!red.join("1-000010_5-onehour-sub.fistar").exists());
}

#[test]
fn test_batch_outcomes_in_order() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let ctx = fake_context(config.clone(), FakeRunner::new());
    combined_reference(dir.path(), &config, &ctx);

    let red = dir.path().join("red");
    let good = registered_frame(&red, 10, 5, 150.0);
    let other_ccd = registered_frame(&red, 11, 6, 150.0);
    let results = convsubphot(
        vec![good.clone(), other_ccd.clone()],
        request(SubtractionDirection::Normal),
        &ctx,
    );

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, good);
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, other_ccd);
    assert!(matches!(results[1].1, Err(DiffFailure::NoReference { .. })));
}
