use std::path::{Path, PathBuf};

use ndarray::{Array3, s};
use tempfile::tempdir;
use volreg::codecs;
use volreg::config::{AtlasConfig, Config};
use volreg::registration::RegistrationError;
use volreg::run_command::CommandError;
use volreg::volume::IDENTITY_AFFINE;
use volreg::{
    Atlas, BrainRegistration, RegistrationOptions, RegistrationParams, RegistrationRun,
    RegistrationStage, SliceRange,
};

fn config_with_programs(affine: &str, freeform: &str, segmentation: &str) -> Config {
    let mut config = Config::default();
    config.affine.program_path = affine.to_string();
    config.freeform.program_path = freeform.to_string();
    config.segmentation.program_path = segmentation.to_string();
    config
}

fn params(config: &Config, atlas_path: &Path, brain_path: &Path, hemispheres: &Path) -> RegistrationParams {
    let atlas = Atlas::new(AtlasConfig {
        atlas_path: atlas_path.display().to_string(),
        brain_path: brain_path.display().to_string(),
        hemispheres_path: hemispheres.display().to_string(),
        ..config.atlas.clone()
    })
    .unwrap();
    RegistrationParams::new(config, &atlas)
}

fn fixture_registration(mask: Option<&str>) -> BrainRegistration {
    let mut config = config_with_programs(
        "/usr/local/bin/reg_aladin",
        "/usr/local/bin/reg_f3d",
        "/usr/local/bin/reg_resample",
    );
    config.freeform.smoothing_sigma.floating = -0.0;
    let params = params(
        &config,
        Path::new("/home/lambda/amap/atlas.nii"),
        Path::new("/home/lambda/amap/atlas_brain.nii"),
        Path::new("/home/lambda/amap/hemispheres.nii"),
    );
    let mut run = RegistrationRun::new(
        "test_brain",
        "/home/bob/brains/test_brain_downsampled.nii",
        "/home/bob/output_brains/",
    );
    run.atlas_mask_path = mask.map(PathBuf::from);
    BrainRegistration::new(params, run)
}

#[test]
fn test_affine_command() {
    let registration = fixture_registration(None);
    assert_eq!(
        registration.prepare_affine_command().to_string(),
        "/usr/local/bin/reg_aladin -ln 6 -lp 5 \
         -flo /home/lambda/amap/atlas_brain.nii -ref /home/bob/brains/test_brain_downsampled.nii \
         -aff /home/bob/output_brains/test_brain_affine_matrix.txt \
         -res /home/bob/output_brains/test_brain_affine_registered_atlas_brain.nii"
    );
}

#[test]
fn test_freeform_command() {
    let registration = fixture_registration(None);
    assert_eq!(
        registration.prepare_freeform_command().to_string(),
        "/usr/local/bin/reg_f3d -ln 6 -lp 4 -sx -10 -be 0.95 \
         -smooR -1.0 -smooF -0.0 --rbn 128 --fbn 128 \
         -aff /home/bob/output_brains/test_brain_affine_matrix.txt \
         -flo /home/lambda/amap/atlas_brain.nii -ref /home/bob/brains/test_brain_downsampled.nii \
         -cpp /home/bob/output_brains/test_brain_control_point_file.nii \
         -res /home/bob/output_brains/test_brain_freeform_registered_atlas_brain.nii"
    );
}

#[test]
fn test_segmentation_command() {
    let registration = fixture_registration(None);
    let command = registration.prepare_segmentation_command(
        Path::new("/home/lambda/amap/atlas.nii"),
        &registration.run().registered_atlas_path,
    );
    assert_eq!(
        command.to_string(),
        "/usr/local/bin/reg_resample -inter 0 \
         -cpp /home/bob/output_brains/test_brain_control_point_file.nii \
         -flo /home/lambda/amap/atlas.nii -ref /home/bob/brains/test_brain_downsampled.nii \
         -res /home/bob/output_brains/test_brain_registered_atlas.nii"
    );
}

#[test]
fn test_mask_is_passed_to_both_registrations() {
    let registration = fixture_registration(Some("/home/bob/output_brains/test_brain_atlas_mask.nii"));
    let suffix = " -fmask /home/bob/output_brains/test_brain_atlas_mask.nii";
    assert!(registration.prepare_affine_command().to_string().ends_with(suffix));
    assert!(registration.prepare_freeform_command().to_string().ends_with(suffix));

    let command = registration.prepare_segmentation_command(
        Path::new("/home/lambda/amap/atlas.nii"),
        Path::new("/tmp/out.nii"),
    );
    assert!(!command.to_string().contains("-fmask"));
}

#[test]
fn test_steps_must_run_in_order() {
    let mut registration = fixture_registration(None);
    let err = registration.register_freeform().unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::OutOfOrder {
            stage: RegistrationStage::Created,
            ..
        }
    ));
    assert!(matches!(
        registration.generate_outlines(),
        Err(RegistrationError::OutOfOrder { .. })
    ));
    assert_eq!(registration.stage(), RegistrationStage::Created);
}

fn write_labels(path: &Path) {
    let mut labels = Array3::<u32>::zeros((6, 8, 6));
    labels.slice_mut(s![1..5, 1..7, 1..5]).fill(3);
    labels.slice_mut(s![1..5, 4..7, 1..5]).fill(5);
    codecs::write_nifti(path, &labels, (0.01, 0.01, 0.01), &IDENTITY_AFFINE).unwrap();
}

#[cfg(unix)]
#[test]
fn test_run_all_with_every_optional_step() {
    let dir = tempdir().unwrap();
    let atlas_path = dir.path().join("atlas.nii");
    write_labels(&atlas_path);

    let config = config_with_programs("true", "true", "true");
    let params = params(
        &config,
        &atlas_path,
        &dir.path().join("brain.nii"),
        &dir.path().join("hemispheres.nii"),
    );
    let run = RegistrationRun::new("sample", dir.path().join("sample_filtered.nii"), dir.path());
    // Stands in for the output of the resampling binary
    write_labels(&run.registered_atlas_path);

    let mut registration = BrainRegistration::new(params, run);
    let registered = registration
        .run_all(RegistrationOptions {
            atlas_mask: Some(SliceRange::new(2, 6)),
            hemispheres: true,
            outlines: true,
        })
        .unwrap();

    assert_eq!(registration.stage(), RegistrationStage::Done);
    assert_eq!(registered, dir.path().join("sample_registered_atlas.nii"));

    let run = registration.run();
    let mask_path = run.atlas_mask_path.clone().unwrap();
    let mask = codecs::read_nifti::<u16>(&mask_path).unwrap();
    assert_eq!(mask.data()[[0, 1, 0]], 0);
    assert_eq!(mask.data()[[0, 2, 0]], u16::MAX);
    assert!(
        registration
            .prepare_affine_command()
            .to_string()
            .ends_with(&format!("-fmask {}", mask_path.display()))
    );

    let outlines = codecs::read_nifti::<u32>(&run.outlines_path).unwrap();
    assert_eq!(outlines.spacing, Some((0.01, 0.01, 0.01)));
    assert_eq!(outlines.data()[[1, 1, 1]], 3);
    assert_eq!(outlines.data()[[2, 2, 2]], 0);
    assert_eq!(outlines.data()[[2, 4, 2]], 5);

    for log in run.log_files().iter().chain(&run.error_files()) {
        assert!(log.exists(), "{} missing", log.display());
    }
}

#[cfg(unix)]
#[test]
fn test_failed_step_stops_the_run() {
    let dir = tempdir().unwrap();
    let config = config_with_programs("true", "false", "true");
    let params = params(
        &config,
        &dir.path().join("atlas.nii"),
        &dir.path().join("brain.nii"),
        &dir.path().join("hemispheres.nii"),
    );
    let run = RegistrationRun::new("sample", dir.path().join("sample.nii"), dir.path());
    let mut registration = BrainRegistration::new(params, run);

    let err = registration.run_all(RegistrationOptions::default()).unwrap_err();
    match &err {
        RegistrationError::Freeform(CommandError::Failed { log_path, err_path, .. }) => {
            assert_eq!(log_path, &dir.path().join("sample_freeform.log"));
            assert_eq!(err_path, &dir.path().join("sample_freeform.err"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().starts_with("Freeform registration failed;"));
    assert!(err.to_string().contains("sample_freeform.err"));
    assert_eq!(registration.stage(), RegistrationStage::AffineRegistered);
    assert!(!registration.run().segmentation_log_path.exists());
}

#[cfg(unix)]
#[test]
fn test_missing_binary_is_a_spawn_error() {
    let dir = tempdir().unwrap();
    let config = config_with_programs(
        "/nonexistent/bin/reg_aladin",
        "reg_f3d",
        "reg_resample",
    );
    let params = params(
        &config,
        &dir.path().join("atlas.nii"),
        &dir.path().join("brain.nii"),
        &dir.path().join("hemispheres.nii"),
    );
    let run = RegistrationRun::new("sample", dir.path().join("sample.nii"), dir.path());
    let mut registration = BrainRegistration::new(params, run);

    assert!(matches!(
        registration.register_affine(),
        Err(RegistrationError::Affine(CommandError::Spawn { .. }))
    ));
}
