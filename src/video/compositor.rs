//! Per-frame overlay composition: painting a dimmed "receptacle" at the
//! solved location and a floating overlay patch that bounces around the
//! frame, blended through a soft-edged feather mask.

use super::{Point2, VideoChallengeSession};
use image::{DynamicImage, Rgb, RgbImage};

/// A square, soft-edged alpha mask reused across every frame of a
/// challenge's lifetime.
#[derive(Clone, Debug)]
pub struct FeatherMask {
    pub size: u32,
    alpha: Vec<f32>,
}

impl FeatherMask {
    pub fn new(size: u32) -> Self {
        let padding = (0.15 * size as f32).round().max(1.0) as i64;
        let mut alpha = vec![0.0f32; (size * size) as usize];
        for y in 0..size as i64 {
            for x in 0..size as i64 {
                let inside = x >= padding
                    && y >= padding
                    && x < size as i64 - padding
                    && y < size as i64 - padding;
                if inside {
                    alpha[(y * size as i64 + x) as usize] = 1.0;
                }
            }
        }
        let sigma = kernel_size_to_sigma(31);
        let alpha = separable_gaussian_blur(&alpha, size, size, sigma);
        FeatherMask { size, alpha }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> f32 {
        self.alpha[(y * self.size + x) as usize]
    }
}

/// OpenCV's `sigma = 0` auto-derivation, so a "kernel size" in the original
/// spec maps onto imageproc's sigma-parameterised blur.
fn kernel_size_to_sigma(ksize: u32) -> f32 {
    0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn separable_gaussian_blur(data: &[f32], w: u32, h: u32, sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as i64;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut sum = 0.0f32;
    for i in -radius..=radius {
        let v = (-(i as f32 * i as f32) / (2.0 * sigma * sigma)).exp();
        kernel.push(v);
        sum += v;
    }
    for v in kernel.iter_mut() {
        *v /= sum;
    }

    let clamp = |v: i64, max: i64| v.clamp(0, max - 1);

    let mut horiz = vec![0.0f32; data.len()];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let dx = k as i64 - radius;
                let sx = clamp(x + dx, w as i64);
                acc += weight * data[(y * w as i64 + sx) as usize];
            }
            horiz[(y * w as i64 + x) as usize] = acc;
        }
    }

    let mut out = vec![0.0f32; data.len()];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let dy = k as i64 - radius;
                let sy = clamp(y + dy, h as i64);
                acc += weight * horiz[(sy * w as i64 + x) as usize];
            }
            out[(y * w as i64 + x) as usize] = acc;
        }
    }
    out
}

/// Reflects `v` into `[0, span]` with ping-pong (triangle-wave) bounce,
/// matching a ball bouncing off both walls forever.
fn bounce_reflect(v: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return 0.0;
    }
    let period = 2.0 * span;
    let m = v.rem_euclid(period);
    if m > span { period - m } else { m }
}

/// Composes one output frame in place: dims the receptacle, then blends a
/// floating overlay patch (copied live from the current frame's solved
/// location) at its bounce-reflected position.
pub fn compose_frame(frame: &mut RgbImage, session: &VideoChallengeSession) {
    let roi = session.roi_size;
    let (w, h) = (session.width, session.height);
    if session.true_xy.x + roi > w || session.true_xy.y + roi > h {
        return;
    }

    let overlay_patch = image::imageops::crop_imm(frame, session.true_xy.x, session.true_xy.y, roi, roi)
        .to_image();

    paint_receptacle(frame, session.true_xy, roi, &session.feather);

    let t = if session.target != 0.0 {
        session.current_slider / session.target
    } else {
        0.0
    };
    let osc = (2.0 * std::f64::consts::PI * t).sin();
    let amp_x = 0.15 * w as f64;
    let amp_y = 0.15 * h as f64;

    let span_x = (w.saturating_sub(roi)) as f64;
    let span_y = (h.saturating_sub(roi)) as f64;

    let raw_cx = session.start_xy.x as f64 + (session.true_xy.x as f64 - session.start_xy.x as f64) * t + amp_x * osc;
    let raw_cy = session.start_xy.y as f64 + (session.true_xy.y as f64 - session.start_xy.y as f64) * t + amp_y * osc;

    let cx = bounce_reflect(raw_cx, span_x).round() as u32;
    let cy = bounce_reflect(raw_cy, span_y).round() as u32;

    blend_patch(frame, &overlay_patch, cx, cy, &session.feather);
}

fn paint_receptacle(frame: &mut RgbImage, at: Point2, roi: u32, feather: &FeatherMask) {
    let patch = image::imageops::crop_imm(frame, at.x, at.y, roi, roi).to_image();
    let blurred = DynamicImage::ImageRgb8(patch)
        .fast_blur(kernel_size_to_sigma(51))
        .to_rgb8();
    for y in 0..roi {
        for x in 0..roi {
            let (fx, fy) = (at.x + x, at.y + y);
            if fx >= frame.width() || fy >= frame.height() {
                continue;
            }
            let a = feather.at(x, y) * 0.6;
            let original = *frame.get_pixel(fx, fy);
            let dark = *blurred.get_pixel(x, y);
            frame.put_pixel(fx, fy, blend(original, dark, a));
        }
    }
}

fn blend_patch(frame: &mut RgbImage, patch: &RgbImage, cx: u32, cy: u32, feather: &FeatherMask) {
    let roi = feather.size;
    for y in 0..roi {
        for x in 0..roi {
            let (fx, fy) = (cx + x, cy + y);
            if fx >= frame.width() || fy >= frame.height() {
                continue;
            }
            let a = feather.at(x, y);
            if a <= 0.0 {
                continue;
            }
            let base = *frame.get_pixel(fx, fy);
            let overlay = *patch.get_pixel(x, y);
            frame.put_pixel(fx, fy, blend(base, overlay, a));
        }
    }
}

fn blend(base: Rgb<u8>, overlay: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let a = alpha.clamp(0.0, 1.0);
    let mut out = [0u8; 3];
    for i in 0..3 {
        let b = base[i] as f32;
        let o = overlay[i] as f32;
        out[i] = (b * (1.0 - a) + o * a).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounce_reflect_stays_in_bounds() {
        for i in -20..40 {
            let v = bounce_reflect(i as f64 * 7.3, 50.0);
            assert!(v >= -1e-9 && v <= 50.0 + 1e-9, "v={v}");
        }
    }

    #[test]
    fn feather_mask_is_zero_at_corners_and_one_in_center() {
        let mask = FeatherMask::new(64);
        assert!(mask.at(0, 0) < 0.3);
        assert!(mask.at(32, 32) > 0.7);
    }
}
