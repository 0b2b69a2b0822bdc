//! Source image normalisation, piece slicing, and keyframe assembly for the
//! jigsaw challenge mode.

use crate::error::{CaptchaError, Result};
use crate::geometry::{self, CANVAS_SIZE, GRID_SIZE, PiecePolygon, Point};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use image::{DynamicImage, GenericImage, GenericImageView, ImageReader, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_hollow_polygon_mut, draw_polygon_mut};
use imageproc::point::Point as ImgPoint;
use rand::Rng;
use rand::seq::SliceRandom;
use std::io::Cursor;

const MIN_INTERIOR_GAP: i64 = 8;
const KEYFRAME_RETRIES: usize = 200;

/// One cut-out puzzle piece, ready for PNG encoding.
pub struct Piece {
    pub piece_id: String,
    pub image: RgbaImage,
    pub ox: u32,
    pub oy: u32,
}

pub struct ImageChallenge {
    pub pieces: Vec<Piece>,
    /// position -> list of (piece_id, x, y), in piece order.
    pub keyframes: Vec<(u32, Vec<(String, u32, u32)>)>,
    pub solved_keyframe: u32,
}

/// Centre-crop to the largest square then resample to 300x300. Falls back to
/// a synthetic gradient if no image is supplied or it fails to decode.
pub fn normalize_source(bytes: Option<&[u8]>) -> DynamicImage {
    let decoded = bytes.and_then(|b| {
        ImageReader::new(Cursor::new(b))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    });

    let img = match decoded {
        Some(img) => img,
        None => return placeholder_image(),
    };

    let (w, h) = img.dimensions();
    let side = w.min(h);
    let x0 = (w - side) / 2;
    let y0 = (h - side) / 2;
    let cropped = img.crop_imm(x0, y0, side, side);

    cropped.resize_exact(
        CANVAS_SIZE as u32,
        CANVAS_SIZE as u32,
        imageops::FilterType::Lanczos3,
    )
}

fn placeholder_image() -> DynamicImage {
    let size = CANVAS_SIZE as u32;
    let mut buf = RgbaImage::new(size, size);
    for y in 0..size {
        for x in 0..size {
            let r = ((x as f64 / size as f64) * 255.0) as u8;
            let g = ((y as f64 / size as f64) * 255.0) as u8;
            buf.put_pixel(x, y, Rgba([r, g, 128, 255]));
        }
    }
    DynamicImage::ImageRgba8(buf)
}

fn slice_piece(source: &RgbaImage, polygon: &PiecePolygon, piece_id: String) -> Result<Piece> {
    let (min_x, min_y, max_x, max_y) = polygon.bbox();
    let x0 = (min_x.floor().max(0.0)) as u32;
    let y0 = (min_y.floor().max(0.0)) as u32;
    let x1 = ((max_x.ceil() + 1.0).min(CANVAS_SIZE)) as u32;
    let y1 = ((max_y.ceil() + 1.0).min(CANVAS_SIZE)) as u32;
    let w = x1.saturating_sub(x0).max(1);
    let h = y1.saturating_sub(y0).max(1);

    let local_points: Vec<ImgPoint<i32>> = polygon
        .points
        .iter()
        .map(|p| ImgPoint::new((p.x - x0 as f64).round() as i32, (p.y - y0 as f64).round() as i32))
        .collect();
    let local_points = dedup_closed_polygon(local_points);
    if local_points.len() < 3 {
        return Err(CaptchaError::Internal("degenerate piece polygon".into()));
    }

    let mut mask = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
    draw_polygon_mut(&mut mask, &local_points, Rgba([255, 255, 255, 255]));
    draw_hollow_polygon_mut(&mut mask, &local_points, Rgba([0, 0, 0, 0]));

    let mut cropped = imageops::crop_imm(source, x0, y0, w, h).to_image();
    for y in 0..h {
        for x in 0..w {
            let mask_alpha = mask.get_pixel(x, y)[3];
            let px = cropped.get_pixel_mut(x, y);
            let a = px[3] as u16 * mask_alpha as u16 / 255;
            px[3] = a as u8;
        }
    }

    Ok(Piece {
        piece_id,
        image: cropped,
        ox: x0,
        oy: y0,
    })
}

fn dedup_closed_polygon(points: Vec<ImgPoint<i32>>) -> Vec<ImgPoint<i32>> {
    let mut out: Vec<ImgPoint<i32>> = Vec::with_capacity(points.len());
    for p in points {
        if out.last().map(|l| l.x == p.x && l.y == p.y).unwrap_or(false) {
            continue;
        }
        out.push(p);
    }
    if out.len() > 1 && out.first().map(|f| f.x) == out.last().map(|l| l.x)
        && out.first().map(|f| f.y) == out.last().map(|l| l.y)
    {
        out.pop();
    }
    out
}

/// Generates 5-7 slider keyframe positions: 0, 3-5 interior points with gaps
/// >= 8, and 100. Retries up to 200 times before falling back to an evenly
/// spaced set.
fn generate_keyframe_positions(rng: &mut impl Rng) -> Vec<u32> {
    let interior_count = rng.random_range(3..=5);

    for _ in 0..KEYFRAME_RETRIES {
        let mut candidates: Vec<i64> = (1..=99).collect();
        candidates.shuffle(rng);
        let mut chosen: Vec<i64> = candidates.into_iter().take(interior_count).collect();
        chosen.sort_unstable();

        let mut all = vec![0i64];
        all.extend(chosen.iter().copied());
        all.push(100);

        let ok = all.windows(2).all(|w| (w[1] - w[0]) >= MIN_INTERIOR_GAP);
        if ok {
            return all.into_iter().map(|v| v as u32).collect();
        }
    }

    // Fallback: evenly spaced.
    let total = interior_count + 2;
    (0..total)
        .map(|i| (i as f64 * 100.0 / (total - 1) as f64).round() as u32)
        .collect()
}

/// Builds a full jigsaw challenge from a normalised 300x300 source image.
pub fn build_challenge(source: &DynamicImage, rng: &mut impl Rng) -> Result<ImageChallenge> {
    let rgba = source.to_rgba8();
    let polygons = geometry::generate_piece_polygons(rng);

    // Piece ids are drawn from the shared rng up front (serially) so the
    // per-polygon slicing below can run either serial or in parallel without
    // threading a `&mut Rng` across threads.
    let piece_ids: Vec<String> = (0..polygons.len())
        .map(|_| format!("{:032x}", rng.random::<u128>()))
        .collect();

    let sliced: Vec<Result<Piece>> = {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            polygons
                .par_iter()
                .zip(piece_ids.into_par_iter())
                .map(|(polygon, piece_id)| slice_piece(&rgba, polygon, piece_id))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            polygons
                .iter()
                .zip(piece_ids.into_iter())
                .map(|(polygon, piece_id)| slice_piece(&rgba, polygon, piece_id))
                .collect()
        }
    };

    let mut pieces = Vec::with_capacity(sliced.len());
    for piece in sliced {
        pieces.push(piece?);
    }

    let positions = generate_keyframe_positions(rng);
    let non_zero: Vec<u32> = positions.iter().copied().filter(|&p| p != 0).collect();
    let solved_keyframe = *non_zero
        .choose(rng)
        .ok_or_else(|| CaptchaError::Internal("no non-zero keyframe available".into()))?;

    let cell_origins: Vec<(u32, u32)> = (0..GRID_SIZE)
        .flat_map(|row| (0..GRID_SIZE).map(move |col| (row, col)))
        .map(|(row, col)| (col as u32 * geometry::CELL_SIZE as u32, row as u32 * geometry::CELL_SIZE as u32))
        .collect();

    let mut keyframes = Vec::with_capacity(positions.len());
    for pos in positions {
        let layout = if pos == solved_keyframe {
            pieces
                .iter()
                .map(|p| (p.piece_id.clone(), p.ox, p.oy))
                .collect()
        } else {
            let mut shuffled = cell_origins.clone();
            shuffled.shuffle(rng);
            pieces
                .iter()
                .zip(shuffled.into_iter())
                .map(|(p, (x, y))| (p.piece_id.clone(), x, y))
                .collect()
        };
        keyframes.push((pos, layout));
    }

    pieces.shuffle(rng);

    Ok(ImageChallenge {
        pieces,
        keyframes,
        solved_keyframe,
    })
}

pub fn encode_piece_base64(piece: &RgbaImage) -> Result<String> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(piece.clone())
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| CaptchaError::EncodeError(format!("encode piece png: {e}")))?;
    Ok(BASE64_STANDARD.encode(buf))
}
