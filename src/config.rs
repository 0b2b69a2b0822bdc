use zeroize::Zeroizing;

/// Hex string used when `POW_SECRET_KEY` is unset. Development only — a
/// process started this way logs a warning on first use.
const DEV_DEFAULT_SECRET: &str = "devkey00000000000000000000000000000000000000000000000000000000";

/// Difficulty tiers used by the risk analyzer to size PoW challenges.
/// Overridable so an embedder can retune without touching scoring code.
#[derive(Clone, Copy, Debug)]
pub struct DifficultyTable {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl Default for DifficultyTable {
    fn default() -> Self {
        DifficultyTable {
            low: 15,
            medium: 19,
            high: 22,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Raw bytes of `POW_SECRET_KEY` as read (the hex string's UTF-8 bytes,
    /// not the decoded key) — preserved verbatim for cross-implementation
    /// signature parity. See SPEC_FULL.md §9.
    pub pow_secret: Zeroizing<Vec<u8>>,
    pub video_path: Option<String>,
    pub images_dir: Option<String>,
    pub pow_challenge_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub difficulty: DifficultyTable,
}

impl Config {
    pub fn from_env() -> Self {
        let pow_secret = match std::env::var("POW_SECRET_KEY") {
            Ok(v) if !v.is_empty() => v,
            _ => {
                tracing::warn!("POW_SECRET_KEY unset; using development-only default secret");
                DEV_DEFAULT_SECRET.to_string()
            }
        };

        Config {
            pow_secret: Zeroizing::new(pow_secret.into_bytes()),
            video_path: std::env::var("CAPTCHA_VIDEO_PATH").ok(),
            images_dir: std::env::var("CAPTCHA_IMAGES_DIR").ok(),
            pow_challenge_ttl_secs: 300,
            session_ttl_secs: 300,
            difficulty: DifficultyTable::default(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.pow_secret = Zeroizing::new(secret.into());
        self
    }
}
