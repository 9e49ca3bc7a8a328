//! Randomized browser fingerprints for new sessions.
//!
//! Variety, not correctness: each freshly constructed session gets a
//! plausible viewport/user-agent/locale/geolocation combination so the
//! fleet does not look uniform.

use rand::seq::SliceRandom;
use rand::Rng;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[
    (1280, 720),
    (1366, 768),
    (1440, 900),
    (1536, 864),
    (1600, 900),
    (1920, 1080),
];

const LOCALES: &[&str] = &["en-US", "en-GB", "de-DE", "fr-FR", "pt-BR", "es-ES", "pl-PL"];

/// Per-session browser identity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Fingerprint {
    /// Generate a randomized fingerprint.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let (width, height) = *VIEWPORTS.choose(&mut rng).unwrap_or(&(1280, 720));
        Self {
            user_agent: USER_AGENTS
                .choose(&mut rng)
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
            viewport_width: width,
            viewport_height: height,
            locale: LOCALES.choose(&mut rng).copied().unwrap_or("en-US").to_string(),
            // Rough populated-latitude band, enough to vary geolocation
            latitude: rng.gen_range(-45.0..60.0),
            longitude: rng.gen_range(-120.0..140.0),
        }
    }
}
