//! Opening and preparing the camera.

use std::path::Path;

use machine_vision_formats::PixFmt;
use rap_camera::{AutoMode, Camera, CameraInfo, CameraModule, PixelConverter};
use tracing::{debug, info};

use crate::{Error, Result};

/// Open the camera named `camera_id`, or the first camera found.
pub fn open_camera<M: CameraModule>(
    module: &mut M,
    camera_id: Option<&str>,
) -> Result<M::CameraType> {
    let name = match camera_id {
        Some(id) => id.to_string(),
        None => {
            let infos = module.camera_infos()?;
            let first = infos.first().ok_or(Error::NoCamera)?;
            first.name().to_string()
        }
    };
    let cam = module.camera(&name).map_err(|e| Error::CameraOpen {
        name: name.clone(),
        source: e,
    })?;
    info!(
        "opened camera {} ({} {}, serial {}) from module {}",
        cam.name(),
        cam.vendor(),
        cam.model(),
        cam.serial(),
        module.name()
    );
    Ok(cam)
}

/// Enable automatic exposure and white balance and negotiate the GigE
/// packet size. Features the camera lacks are skipped.
pub fn setup_camera<C: Camera + ?Sized>(cam: &mut C) {
    if let Err(e) = cam.set_exposure_auto(AutoMode::Continuous) {
        debug!("auto exposure not set: {e}");
    }
    if let Err(e) = cam.set_balance_white_auto(AutoMode::Continuous) {
        debug!("auto white balance not set: {e}");
    }
    if let Err(e) = cam.adjust_packet_size() {
        debug!("packet size not adjusted: {e}");
    }
}

fn is_color(fmt: PixFmt) -> bool {
    matches!(
        fmt,
        PixFmt::RGB8
            | PixFmt::BayerRG8
            | PixFmt::BayerBG8
            | PixFmt::BayerGB8
            | PixFmt::BayerGR8
            | PixFmt::BayerRG32f
            | PixFmt::BayerBG32f
            | PixFmt::BayerGB32f
            | PixFmt::BayerGR32f
            | PixFmt::YUV422
            | PixFmt::NV12
    )
}

/// Choose the camera's pixel format.
///
/// The display format itself is preferred, then a color format the
/// converter can turn into it, then any other convertible format.
pub fn setup_pixel_format<C: Camera + ?Sized>(
    cam: &mut C,
    converter: &dyn PixelConverter,
    display_format: PixFmt,
) -> Result<PixFmt> {
    let formats = cam.possible_pixel_formats()?;
    let convertible: Vec<PixFmt> = formats
        .iter()
        .copied()
        .filter(|f| converter.convertible_formats(*f).contains(&display_format))
        .collect();

    let chosen = if formats.contains(&display_format) {
        display_format
    } else if let Some(fmt) = convertible.iter().copied().find(|f| is_color(*f)) {
        fmt
    } else if let Some(fmt) = convertible.first().copied() {
        fmt
    } else {
        return Err(Error::NoDisplayFormat(display_format));
    };

    cam.set_pixel_format(chosen)?;
    info!("pixel format {chosen}, displayed as {display_format}");
    Ok(chosen)
}

/// Read the exposure time from the first line of `path`, switch automatic
/// exposure off and apply it.
pub fn reload_exposure_file<C: Camera + ?Sized>(cam: &mut C, path: &Path) -> Result<u32> {
    let text = std::fs::read_to_string(path)?;
    let first = text.lines().next().unwrap_or("").trim();
    let exposure: u32 = first.parse().map_err(|_| Error::CommandFile {
        path: path.to_path_buf(),
        msg: format!("first line \"{first}\" is not an integer exposure time"),
    })?;
    cam.set_exposure_auto(AutoMode::Off)?;
    cam.set_exposure_time(exposure.into())?;
    info!("exposure set to {exposure} us from \"{}\"", path.display());
    Ok(exposure)
}

#[cfg(test)]
mod tests {
    use rap_camera::{
        BasicConverter,
        sim::{FeatureValue, SimCamera, SimCameraConfig, SimModule},
    };

    use super::*;

    fn cam_with_formats(formats: Vec<PixFmt>) -> SimCamera {
        SimCamera::new(SimCameraConfig {
            pixel_formats: formats,
            ..Default::default()
        })
    }

    #[test]
    fn opens_first_or_named_camera() {
        let mut module = SimModule::new(vec![
            SimCameraConfig::default(),
            SimCameraConfig {
                name: "second".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(open_camera(&mut module, None).unwrap().name(), "sim-camera-0");
        assert_eq!(open_camera(&mut module, Some("second")).unwrap().name(), "second");
        assert!(matches!(
            open_camera(&mut module, Some("third")),
            Err(Error::CameraOpen { .. })
        ));
        assert!(matches!(
            open_camera(&mut SimModule::new(vec![]), None),
            Err(Error::NoCamera)
        ));
    }

    #[test]
    fn display_format_preferred() {
        let mut cam = cam_with_formats(vec![PixFmt::RGB8, PixFmt::Mono8]);
        let fmt = setup_pixel_format(&mut cam, &BasicConverter, PixFmt::Mono8).unwrap();
        assert_eq!(fmt, PixFmt::Mono8);
        assert_eq!(cam.pixel_format().unwrap(), PixFmt::Mono8);
    }

    #[test]
    fn color_preferred_over_mono() {
        let mut cam = cam_with_formats(vec![PixFmt::YUV422, PixFmt::Mono8, PixFmt::BayerGR8]);
        let fmt = setup_pixel_format(&mut cam, &BasicConverter, PixFmt::RGB8).unwrap();
        // Mono8 converts to RGB8 but BayerGR8 does not.
        assert_eq!(fmt, PixFmt::Mono8);

        let mut cam = cam_with_formats(vec![PixFmt::BayerGR8, PixFmt::RGB8]);
        let fmt = setup_pixel_format(&mut cam, &BasicConverter, PixFmt::Mono8).unwrap();
        assert_eq!(fmt, PixFmt::BayerGR8);
    }

    #[test]
    fn no_compatible_format() {
        let mut cam = cam_with_formats(vec![PixFmt::YUV422]);
        assert!(matches!(
            setup_pixel_format(&mut cam, &BasicConverter, PixFmt::Mono8),
            Err(Error::NoDisplayFormat(PixFmt::Mono8))
        ));
    }

    #[test]
    fn missing_features_are_skipped() {
        let mut cfg = SimCameraConfig::default();
        cfg.unsupported_features.insert("ExposureAuto".into());
        cfg.unsupported_features.insert("GVSPAdjustPacketSize".into());
        let mut cam = SimCamera::new(cfg);
        setup_camera(&mut cam);
        assert_eq!(
            cam.feature_value("BalanceWhiteAuto"),
            Some(FeatureValue::Enum("Continuous".into()))
        );
        assert!(cam.commands_run().is_empty());
    }

    #[test]
    fn exposure_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("RAPcommand.txt");
        std::fs::write(&path, "1500\nignored\n").unwrap();
        let mut cam = cam_with_formats(vec![PixFmt::Mono8]);
        cam.set_exposure_auto(AutoMode::Continuous).unwrap();

        assert_eq!(reload_exposure_file(&mut cam, &path).unwrap(), 1500);
        assert_eq!(
            cam.feature_value("ExposureAuto"),
            Some(FeatureValue::Enum("Off".into()))
        );
        assert_eq!(
            cam.feature_value("ExposureTime"),
            Some(FeatureValue::Float(1500.0))
        );

        std::fs::write(&path, "fast\n").unwrap();
        assert!(matches!(
            reload_exposure_file(&mut cam, &path),
            Err(Error::CommandFile { .. })
        ));
    }
}
