use geronimo_captcha::{CaptchaEngine, Config, Mode, PowFields, RiskAnalysis, Telemetry, VerifyRequest};
use proptest::prelude::*;

fn engine(ttl: u64) -> CaptchaEngine {
    let mut config = Config::from_env().with_secret(b"property-test-secret".to_vec());
    config.session_ttl_secs = ttl;
    config.pow_challenge_ttl_secs = ttl.max(1);
    CaptchaEngine::new(config)
}

fn verify_image(engine: &CaptchaEngine, captcha_id: &str, slider_value: f64, telemetry: Telemetry) -> RiskAnalysis {
    let pow = engine.issue_pow_challenge(&telemetry);
    let nonce = geronimo_captcha::solve_pow_for_test(&pow.challenge.salt, pow.challenge.difficulty);
    let nonce_hex = format!("{nonce:x}");

    let req = VerifyRequest {
        captcha_id,
        slider_value,
        mode: Mode::Image,
        pow: PowFields {
            salt: &pow.challenge.salt,
            difficulty: pow.challenge.difficulty,
            timestamp: pow.challenge.timestamp,
            signature: &pow.challenge.signature,
            nonce: &nonce_hex,
        },
        telemetry,
    };

    engine.verify(req).unwrap().analysis
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn unknown_captcha_id_always_rejected(slider in 0f64..100.0) {
        let engine = engine(60);
        let pow = engine.issue_pow_challenge(&Telemetry::default());
        let nonce = geronimo_captcha::solve_pow_for_test(&pow.challenge.salt, pow.challenge.difficulty);
        let nonce_hex = format!("{nonce:x}");

        let req = VerifyRequest {
            captcha_id: "this-session-was-never-issued",
            slider_value: slider,
            mode: Mode::Image,
            pow: PowFields {
                salt: &pow.challenge.salt,
                difficulty: pow.challenge.difficulty,
                timestamp: pow.challenge.timestamp,
                signature: &pow.challenge.signature,
                nonce: &nonce_hex,
            },
            telemetry: Telemetry::default(),
        };

        prop_assert!(matches!(engine.verify(req), Err(geronimo_captcha::VerifyError::UnknownSession)));
    }

    #[test]
    fn verify_never_panics_on_arbitrary_slider(slider in -10f64..1100.0) {
        let engine = engine(60);
        let response = engine.issue_image_challenge(None).unwrap();
        let analysis = verify_image(&engine, &response.captcha_id, slider, Telemetry::default());
        prop_assert!(analysis.confidence_score >= 0 && analysis.confidence_score <= 100);
    }
}

#[test]
fn image_keyframes_always_carry_all_nine_pieces() {
    let engine = engine(60);
    let response = engine.issue_image_challenge(None).unwrap();
    assert_eq!(response.pieces.len(), 9);

    for (_, layout) in &response.keyframes {
        assert_eq!(layout.len(), 9);
        let mut ids: Vec<&str> = layout.iter().map(|(id, _, _)| id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 9);
    }
}

#[test]
fn risk_score_never_exceeds_bounds_for_extreme_behavior() {
    use geronimo_captcha::BehaviorSummary;

    let engine = engine(60);
    let response = engine.issue_image_challenge(None).unwrap();

    let mut telemetry = Telemetry::default();
    telemetry.behavior = Some(BehaviorSummary {
        start_time: 0,
        end_time: i64::MAX,
        total_duration_ms: i64::MAX,
        event_count: 0,
        mouse_down_count: 0,
        mouse_move_count: 0,
        ..Default::default()
    });

    let analysis = verify_image(&engine, &response.captcha_id, 0.0, telemetry);
    assert!(analysis.confidence_score >= 0 && analysis.confidence_score <= 100);
}
