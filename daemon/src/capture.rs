/// Webcam capture using `nokhwa`.
///
/// Frames are requested as RGB at the camera's highest frame rate and decoded into
/// an [`image::RgbImage`] for the motion pipeline.
///
/// Without the `camera` feature the public API compiles but `open_camera` returns
/// an error.
use crate::error::SensorError;
use crate::motion::FrameSource;

// ── nokhwa implementation ─────────────────────────────────────────────────────

#[cfg(feature = "camera")]
mod imp {
    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;
    use tracing::info;

    use crate::error::SensorError;
    use crate::motion::FrameSource;

    fn fatal(e: impl std::fmt::Display) -> SensorError {
        SensorError::fatal("camera", e.to_string())
    }

    pub struct Webcam {
        camera: Camera,
    }

    impl FrameSource for Webcam {
        fn capture(&mut self) -> Result<RgbImage, SensorError> {
            let buffer = self.camera.frame().map_err(fatal)?;
            let decoded = buffer.decode_image::<RgbFormat>().map_err(fatal)?;
            let (width, height) = (decoded.width(), decoded.height());
            // Rebuild through raw bytes so nokhwa's `image` version does not have to
            // match ours.
            RgbImage::from_raw(width, height, decoded.into_raw())
                .ok_or_else(|| SensorError::fatal("camera", "decoded frame has wrong length"))
        }
    }

    impl Drop for Webcam {
        fn drop(&mut self) {
            let _ = self.camera.stop_stream();
        }
    }

    pub fn open(index: u32) -> Result<Webcam, SensorError> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format).map_err(fatal)?;
        camera.open_stream().map_err(fatal)?;
        info!("[motion] Camera {index} open at {}", camera.resolution());
        Ok(Webcam { camera })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Opens webcam `index`.  Must be called on the thread that will poll it.
pub fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, SensorError> {
    #[cfg(feature = "camera")]
    {
        Ok(Box::new(imp::open(index)?))
    }
    #[cfg(not(feature = "camera"))]
    {
        Err(SensorError::fatal(
            "camera",
            format!("cannot open camera {index}: built without camera support (enable the `camera` feature)"),
        ))
    }
}

#[cfg(test)]
mod tests {
    #[cfg(not(feature = "camera"))]
    #[test]
    fn open_fails_without_camera_feature() {
        let err = super::open_camera(0).err().expect("should fail");
        assert!(err.to_string().starts_with("camera unavailable"));
    }
}
