/// Live camera window shown while monitoring with a display attached.
///
/// The motion thread hands every raw frame to a [`Preview`]; pressing ESC in the
/// window asks the session to stop.  The OpenCV window lives behind the `preview`
/// feature; without it `open_preview` returns an error and the daemon carries on
/// without a window.
use image::RgbImage;

use crate::error::PreviewError;

/// What the viewer asked for after a frame was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewAction {
    Continue,
    Quit,
}

pub trait Preview {
    fn show(&mut self, frame: &RgbImage) -> Result<PreviewAction, PreviewError>;
}

impl<P: Preview + ?Sized> Preview for Box<P> {
    fn show(&mut self, frame: &RgbImage) -> Result<PreviewAction, PreviewError> {
        (**self).show(frame)
    }
}

// ── OpenCV implementation ─────────────────────────────────────────────────────

#[cfg(feature = "preview")]
mod imp {
    use image::RgbImage;
    use opencv::core::{self, Mat, Scalar, Size};
    use opencv::prelude::*;
    use opencv::{highgui, imgproc};

    use super::{Preview, PreviewAction};
    use crate::error::PreviewError;

    const WINDOW: &str = "MIRAGE-X";
    const ESC: i32 = 27;

    fn window_err(e: opencv::Error) -> PreviewError {
        PreviewError::Window(e.to_string())
    }

    pub struct Window;

    impl Preview for Window {
        fn show(&mut self, frame: &RgbImage) -> Result<PreviewAction, PreviewError> {
            let (width, height) = frame.dimensions();
            let mut rgb = Mat::new_size_with_default(
                Size::new(width as i32, height as i32),
                core::CV_8UC3,
                Scalar::all(0.0),
            )
            .map_err(window_err)?;
            rgb.data_bytes_mut()
                .map_err(window_err)?
                .copy_from_slice(frame.as_raw());

            let mut bgr = Mat::default();
            imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0).map_err(window_err)?;
            highgui::imshow(WINDOW, &bgr).map_err(window_err)?;

            match highgui::wait_key(1).map_err(window_err)? {
                ESC => Ok(PreviewAction::Quit),
                _ => Ok(PreviewAction::Continue),
            }
        }
    }

    impl Drop for Window {
        fn drop(&mut self) {
            let _ = highgui::destroy_window(WINDOW);
        }
    }

    pub fn open() -> Result<Window, PreviewError> {
        highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE).map_err(window_err)?;
        Ok(Window)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Opens the preview window.  Must be called on the thread that will show frames.
pub fn open_preview() -> Result<Box<dyn Preview>, PreviewError> {
    #[cfg(feature = "preview")]
    {
        Ok(Box::new(imp::open()?))
    }
    #[cfg(not(feature = "preview"))]
    {
        Err(PreviewError::Unavailable(
            "built without preview support (enable the `preview` feature)".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #[cfg(not(feature = "preview"))]
    #[test]
    fn open_fails_without_preview_feature() {
        let err = super::open_preview().err().expect("should fail");
        assert!(err.to_string().contains("preview"));
    }
}
