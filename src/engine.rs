//! Public entry point. Wires the session stores, PoW subsystem, image
//! pipeline and video compositor into the operations an HTTP adapter would
//! call one-to-one, analogous to the original crate's `CaptchaManager`.

use crate::config::Config;
use crate::error::{CaptchaError, Result};
use crate::image_pipeline::{self, ImageChallenge};
use crate::pow::{self, NonceLedger, PowChallenge};
use crate::risk::{self, Telemetry};
use crate::session::SessionStore;
use crate::verify::{self, Mode, VerifyError, VerifyOutcome, VerifyRequest};
use crate::video::{self, VideoChallengeSession, VideoFrameStream, VideoIntrinsics};

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct PiecePayload {
    pub piece_id: String,
    pub data_base64: String,
    pub w: u32,
    pub h: u32,
    pub ox: u32,
    pub oy: u32,
}

pub struct ImageChallengeResponse {
    pub captcha_id: String,
    pub pieces: Vec<PiecePayload>,
    /// position -> list of (piece_id, x, y)
    pub keyframes: Vec<(u32, Vec<(String, u32, u32)>)>,
    /// The secret keyframe position. Present on the returned struct the same
    /// way the original crate's challenge carried its correct answer
    /// in-process; callers serialising a client-facing response must not
    /// forward this field.
    pub solved_keyframe: u32,
}

pub struct VideoChallengeResponse {
    pub captcha_id: String,
    pub width: u32,
    pub height: u32,
    pub slider_min: u32,
    pub slider_max: u32,
    pub slider_start: u32,
}

pub struct PowChallengeResponse {
    pub challenge: PowChallenge,
    pub risk_level: &'static str,
}

/// Top-level facade. Holds all process-lifetime state: puzzle and video
/// session stores, the PoW secret, and the nonce replay ledger.
pub struct CaptchaEngine {
    config: Config,
    images: SessionStore<u32>,
    videos: Arc<SessionStore<VideoChallengeSession>>,
    ledger: NonceLedger,
}

impl CaptchaEngine {
    pub fn new(config: Config) -> Self {
        let images = SessionStore::new(config.session_ttl_secs);
        let videos = Arc::new(SessionStore::new(config.session_ttl_secs));
        CaptchaEngine {
            config,
            images,
            videos,
            ledger: NonceLedger::new(),
        }
    }

    fn pow_freshness(&self) -> Duration {
        Duration::from_secs(self.config.pow_challenge_ttl_secs)
    }

    /// Issues a jigsaw image challenge. `source_bytes` is the raw bytes of a
    /// candidate source image; a synthetic placeholder is used if absent or
    /// undecodable.
    pub fn issue_image_challenge(&self, source_bytes: Option<&[u8]>) -> Result<ImageChallengeResponse> {
        let mut rng = rand::rng();
        let normalized = image_pipeline::normalize_source(source_bytes);
        let ImageChallenge {
            pieces,
            keyframes,
            solved_keyframe,
        } = image_pipeline::build_challenge(&normalized, &mut rng)?;

        let captcha_id = Uuid::new_v4().to_string();
        self.images.put(captcha_id.clone(), solved_keyframe);

        let mut payloads = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            let data_base64 = image_pipeline::encode_piece_base64(&piece.image)?;
            payloads.push(PiecePayload {
                piece_id: piece.piece_id.clone(),
                data_base64,
                w: piece.image.width(),
                h: piece.image.height(),
                ox: piece.ox,
                oy: piece.oy,
            });
        }

        tracing::info!(captcha_id = %captcha_id, "issued image captcha challenge");

        Ok(ImageChallengeResponse {
            captcha_id,
            pieces: payloads,
            keyframes,
            solved_keyframe,
        })
    }

    /// Issues a video-overlay challenge against the configured video asset.
    pub fn issue_video_challenge(&self) -> Result<VideoChallengeResponse> {
        let video_path = self
            .config
            .video_path
            .as_deref()
            .ok_or_else(|| CaptchaError::AssetMissing("CAPTCHA_VIDEO_PATH not configured".into()))?;

        let intrinsics = probe_video(video_path)?;
        let mut rng = rand::rng();
        let session = video::create_session(&intrinsics, &mut rng)?;

        let captcha_id = Uuid::new_v4().to_string();
        let width = session.width;
        let height = session.height;
        self.videos.put(captcha_id.clone(), session);

        tracing::info!(captcha_id = %captcha_id, "issued video captcha challenge");

        Ok(VideoChallengeResponse {
            captcha_id,
            width,
            height,
            slider_min: 0,
            slider_max: 1000,
            slider_start: 0,
        })
    }

    /// Applies a live slider-position update (`value` in `[0, 1000]`) to an
    /// in-flight video challenge. Last-write-wins; no ordering is guaranteed
    /// against concurrently composed frames.
    pub fn update_video_slider(&self, captcha_id: &str, value: f64) -> bool {
        let clamped = (value / 1000.0).clamp(0.0, 1.0);
        self.videos.update(captcha_id, |session| {
            session.current_slider = clamped;
        })
    }

    /// Opens the pull-based MJPEG frame stream for an in-flight video
    /// challenge. Dropping the returned iterator releases the decoder.
    pub fn video_frame_stream(&self, captcha_id: &str) -> Result<VideoFrameStream> {
        let video_path = self
            .config
            .video_path
            .as_deref()
            .ok_or_else(|| CaptchaError::AssetMissing("CAPTCHA_VIDEO_PATH not configured".into()))?;

        VideoFrameStream::open(video_path, captcha_id, self.videos.clone())
    }

    /// Issues a PoW challenge sized by the risk analysis of the supplied
    /// telemetry.
    pub fn issue_pow_challenge(&self, telemetry: &Telemetry) -> PowChallengeResponse {
        let decision = risk::compute_pow_difficulty(telemetry, &self.config.difficulty);
        let challenge = pow::issue(&self.config.pow_secret, decision.difficulty);
        PowChallengeResponse {
            challenge,
            risk_level: decision.risk_level.as_str(),
        }
    }

    /// Verifies a completed challenge of either mode: PoW, then puzzle
    /// correctness, then risk.
    pub fn verify(&self, req: VerifyRequest) -> Result<VerifyOutcome, VerifyError> {
        let outcome = match req.mode {
            Mode::Image => verify::verify_image(
                &req,
                &self.images,
                &self.config.pow_secret,
                &self.ledger,
                self.pow_freshness(),
            ),
            Mode::Video => verify::verify_video(
                &req,
                &self.videos,
                &self.config.pow_secret,
                &self.ledger,
                self.pow_freshness(),
            ),
        };

        match &outcome {
            Ok(o) if o.success => {
                tracing::info!(captcha_id = %req.captcha_id, "captcha verification succeeded");
            }
            Ok(_) => {
                tracing::warn!(captcha_id = %req.captcha_id, "captcha verification failed risk or puzzle check");
            }
            Err(e) => {
                tracing::warn!(captcha_id = %req.captcha_id, error = %e, "captcha verification rejected");
            }
        }

        outcome
    }
}

fn probe_video(path: &str) -> Result<VideoIntrinsics> {
    ffmpeg_next::format::input(path)
        .map_err(|e| CaptchaError::AssetMissing(format!("open video {path}: {e}")))
        .and_then(|input| {
            let stream = input
                .streams()
                .best(ffmpeg_next::media::Type::Video)
                .ok_or_else(|| CaptchaError::AssetMissing("no video stream".into()))?;
            let params = stream.parameters();
            let context = ffmpeg_next::codec::context::Context::from_parameters(params)
                .map_err(|e| CaptchaError::DecoderError(format!("decoder context: {e}")))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| CaptchaError::DecoderError(format!("video decoder: {e}")))?;
            Ok(VideoIntrinsics {
                width: decoder.width(),
                height: decoder.height(),
            })
        })
}
