//! Pull-based MJPEG frame producer. Exposed as a blocking iterator so the
//! outer transport (out of scope for this crate) drives backpressure; the
//! decoder is released as soon as the iterator is dropped.

use super::compositor::compose_frame;
use super::VideoChallengeSession;
use crate::error::{CaptchaError, Result};
use crate::session::SessionStore;

use ffmpeg_next as ffmpeg;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const JPEG_QUALITY: u8 = 70;
const MJPEG_BOUNDARY: &str = "--frame";

/// One multipart MJPEG chunk: boundary + headers + JPEG bytes.
pub struct MjpegPart(pub Vec<u8>);

pub struct VideoFrameStream {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    session_id: String,
    sessions: Arc<SessionStore<VideoChallengeSession>>,
    frame_interval: Duration,
    last_emit: Instant,
    video_path: String,
}

impl VideoFrameStream {
    pub fn open(
        video_path: &str,
        session_id: impl Into<String>,
        sessions: Arc<SessionStore<VideoChallengeSession>>,
    ) -> Result<Self> {
        let input = ffmpeg::format::input(&video_path)
            .map_err(|e| CaptchaError::AssetMissing(format!("open video {video_path}: {e}")))?;

        let (decoder, scaler, stream_index, frame_interval) = open_decoder(&input)?;

        Ok(VideoFrameStream {
            input,
            decoder,
            scaler,
            stream_index,
            session_id: session_id.into(),
            sessions,
            frame_interval,
            last_emit: Instant::now(),
            video_path: video_path.to_string(),
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .map_err(|e| CaptchaError::DecoderError(format!("rewind video: {e}")))?;
        self.decoder.flush();
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        let input = ffmpeg::format::input(&self.video_path)
            .map_err(|e| CaptchaError::AssetMissing(format!("reopen video {}: {e}", self.video_path)))?;
        let (decoder, scaler, stream_index, frame_interval) = open_decoder(&input)?;
        self.input = input;
        self.decoder = decoder;
        self.scaler = scaler;
        self.stream_index = stream_index;
        self.frame_interval = frame_interval;
        Ok(())
    }

    fn session_alive(&self) -> bool {
        self.sessions.peek(&self.session_id).is_some()
    }

    fn next_rgb_frame(&mut self) -> Result<RgbImage> {
        loop {
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| CaptchaError::DecoderError(format!("send packet: {e}")))?;

                let mut decoded = ffmpeg::util::frame::Video::empty();
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    let mut rgb_frame = ffmpeg::util::frame::Video::empty();
                    self.scaler
                        .run(&decoded, &mut rgb_frame)
                        .map_err(|e| CaptchaError::DecoderError(format!("scale frame: {e}")))?;
                    return Ok(frame_to_image(&rgb_frame));
                }
            }

            // EOF: rewind and keep streaming for the lifetime of the session.
            if self.rewind().is_err() {
                self.reopen()?;
            }
        }
    }

    fn pace(&mut self) {
        let elapsed = self.last_emit.elapsed();
        if elapsed < self.frame_interval {
            thread::sleep(self.frame_interval - elapsed);
        }
        self.last_emit = Instant::now();
    }
}

fn open_decoder(
    input: &ffmpeg::format::context::Input,
) -> Result<(ffmpeg::decoder::Video, ffmpeg::software::scaling::Context, usize, Duration)> {
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| CaptchaError::AssetMissing("no video stream".into()))?;
    let stream_index = stream.index();

    let context_decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| CaptchaError::DecoderError(format!("decoder context: {e}")))?;
    let decoder = context_decoder
        .decoder()
        .video()
        .map_err(|e| CaptchaError::DecoderError(format!("video decoder: {e}")))?;

    let scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| CaptchaError::DecoderError(format!("scaler init: {e}")))?;

    let rate = stream.avg_frame_rate();
    let fps = if rate.denominator() != 0 {
        rate.numerator() as f64 / rate.denominator() as f64
    } else {
        25.0
    };
    let frame_interval = Duration::from_secs_f64(if fps > 0.0 { 1.0 / fps } else { 1.0 / 25.0 });

    Ok((decoder, scaler, stream_index, frame_interval))
}

fn frame_to_image(frame: &ffmpeg::util::frame::Video) -> RgbImage {
    let (w, h) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let data = frame.data(0);
    let mut buf = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h as usize {
        let row = &data[y * stride..y * stride + (w as usize * 3)];
        buf.extend_from_slice(row);
    }
    RgbImage::from_raw(w, h, buf).expect("scaler output matches RGB24 buffer size")
}

fn encode_mjpeg_part(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut jpeg), JPEG_QUALITY)
        .write_image(frame.as_raw(), frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CaptchaError::EncodeError(format!("encode mjpeg frame: {e}")))?;

    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("{MJPEG_BOUNDARY}\r\n").as_bytes());
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(&jpeg);
    part.extend_from_slice(b"\r\n");
    Ok(part)
}

impl Iterator for VideoFrameStream {
    type Item = Result<MjpegPart>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.session_alive() {
            return None;
        }

        self.pace();

        let mut frame = match self.next_rgb_frame() {
            Ok(f) => f,
            Err(e) => return Some(Err(e)),
        };

        let session = self.sessions.peek(&self.session_id)?;
        compose_frame(&mut frame, &session);

        Some(encode_mjpeg_part(&frame).map(MjpegPart))
    }
}
