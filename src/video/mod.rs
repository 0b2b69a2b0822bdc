//! Video-overlay challenge mode: a slider-driven puzzle piece hidden in a
//! live video feed, streamed to the client as MJPEG.

mod compositor;
mod stream;

pub use compositor::{FeatherMask, compose_frame};
pub use stream::VideoFrameStream;

use crate::error::{CaptchaError, Result};
use rand::Rng;

const ROI_MIN: u32 = 24;
const ROI_FRACTION: f32 = 0.45;
const TARGET_MIN: f64 = 0.4;
const TARGET_MAX: f64 = 0.8;

#[derive(Clone, Copy, Debug)]
pub struct Point2 {
    pub x: u32,
    pub y: u32,
}

/// Server-side state for one issued video challenge.
#[derive(Clone, Debug)]
pub struct VideoChallengeSession {
    pub width: u32,
    pub height: u32,
    pub roi_size: u32,
    pub target: f64,
    pub true_xy: Point2,
    pub start_xy: Point2,
    pub current_slider: f64,
    pub feather: FeatherMask,
}

/// Dimensions of a challenge's source video, probed once at issuance.
pub struct VideoIntrinsics {
    pub width: u32,
    pub height: u32,
}

/// Builds a new challenge's server-side secret state from the probed video
/// dimensions. Does not touch the decoder — frame production happens
/// separately via [`VideoFrameStream`].
pub fn create_session(intrinsics: &VideoIntrinsics, rng: &mut impl Rng) -> Result<VideoChallengeSession> {
    let (w, h) = (intrinsics.width, intrinsics.height);
    if w == 0 || h == 0 {
        return Err(CaptchaError::AssetMissing("video has zero dimensions".into()));
    }

    let roi_size = ((ROI_FRACTION * w.min(h) as f32).round() as u32).clamp(ROI_MIN, w.min(h));
    let target = rng.random_range(TARGET_MIN..=TARGET_MAX);

    let true_xy = random_point(w, h, roi_size, rng);
    let start_xy = random_point(w, h, roi_size, rng);
    let feather = FeatherMask::new(roi_size);

    Ok(VideoChallengeSession {
        width: w,
        height: h,
        roi_size,
        target,
        true_xy,
        start_xy,
        current_slider: 0.0,
        feather,
    })
}

fn random_point(w: u32, h: u32, roi_size: u32, rng: &mut impl Rng) -> Point2 {
    let max_x = w.saturating_sub(roi_size);
    let max_y = h.saturating_sub(roi_size);
    Point2 {
        x: if max_x == 0 { 0 } else { rng.random_range(0..=max_x) },
        y: if max_y == 0 { 0 } else { rng.random_range(0..=max_y) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn session_roi_within_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        let intrinsics = VideoIntrinsics { width: 640, height: 480 };
        let session = create_session(&intrinsics, &mut rng).unwrap();
        assert!(session.roi_size >= ROI_MIN && session.roi_size <= 480);
        assert!(session.target >= TARGET_MIN && session.target <= TARGET_MAX);
        assert!(session.true_xy.x + session.roi_size <= session.width);
        assert!(session.true_xy.y + session.roi_size <= session.height);
    }
}
