use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use geronimo_captcha::{CaptchaEngine, Config, Mode, PowFields, Telemetry, VerifyRequest};

fn make_engine(ttl: u64) -> CaptchaEngine {
    let mut config = Config::from_env().with_secret(b"bench-secret".to_vec());
    config.session_ttl_secs = ttl;
    config.pow_challenge_ttl_secs = ttl.max(1);
    CaptchaEngine::new(config)
}

fn bench_generate_image_challenge(c: &mut Criterion) {
    let engine = make_engine(60);
    c.bench_function("generate_image_challenge", |b| {
        b.iter(|| {
            let challenge = engine.issue_image_challenge(None).unwrap();
            black_box(challenge.pieces.len());
        });
    });
}

fn bench_issue_pow_challenge(c: &mut Criterion) {
    let engine = make_engine(60);
    let telemetry = Telemetry::default();
    c.bench_function("issue_pow_challenge", |b| {
        b.iter(|| {
            let response = engine.issue_pow_challenge(&telemetry);
            black_box(response.challenge.difficulty);
        });
    });
}

fn bench_verify_ok_vs_expired(c: &mut Criterion) {
    let engine_ok = make_engine(60);
    let engine_expired = make_engine(0);

    c.bench_function("verify_e2e/ok_vs_wrong_and_expired", |b| {
        b.iter_batched(
            || {
                let challenge = engine_ok.issue_image_challenge(None).unwrap();
                let pow = engine_ok.issue_pow_challenge(&Telemetry::default());
                let nonce = geronimo_captcha::solve_pow_for_test(&pow.challenge.salt, pow.challenge.difficulty);
                (challenge, pow, format!("{nonce:x}"))
            },
            |(challenge, pow, nonce_hex)| {
                let req = VerifyRequest {
                    captcha_id: &challenge.captcha_id,
                    slider_value: 0.0, // deliberately wrong guess
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
                let _ = engine_ok.verify(req);

                let req_expired = VerifyRequest {
                    captcha_id: &challenge.captcha_id,
                    slider_value: 0.0,
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
                let _ = engine_expired.verify(req_expired); // unknown-session fast path
            },
            BatchSize::SmallInput,
        )
    });
}

pub fn criterion_benches(c: &mut Criterion) {
    bench_generate_image_challenge(c);
    bench_issue_pow_challenge(c);
    bench_verify_ok_vs_expired(c);
}

criterion_group!(benches, criterion_benches);
criterion_main!(benches);
