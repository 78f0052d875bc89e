//! Per-session anti-fingerprinting profile.
//!
//! Each render gets a freshly randomized profile: user agent, viewport,
//! locale/timezone pair, plus an init script that patches the handful of
//! navigator properties and canvas readouts automation is usually detected
//! by. This affects detectability, not correctness; the orchestrator treats
//! it as a pluggable policy.

// ============================================================================
// Imports
// ============================================================================

use rand::Rng;
use rand::seq::SliceRandom;

// ============================================================================
// Constants
// ============================================================================

/// Desktop Chrome user agents, newest first.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
];

/// Locale + matching timezone pairs.
const LOCALES: &[(&str, &str, &str)] = &[
    // (locale, accept-language, timezone)
    ("en-US", "en-US,en;q=0.9", "America/New_York"),
    ("en-GB", "en-GB,en;q=0.9", "Europe/London"),
    ("zh-CN", "zh-CN,zh;q=0.9,en;q=0.8", "Asia/Shanghai"),
    ("de-DE", "de-DE,de;q=0.9,en;q=0.8", "Europe/Berlin"),
];

/// Common desktop viewport bases; a small jitter is added per session.
const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768)];

// ============================================================================
// StealthProfile
// ============================================================================

/// Randomized fingerprint parameters for one browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthProfile {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header value.
    pub accept_language: String,
    /// ICU locale identifier.
    pub locale: String,
    /// IANA timezone identifier.
    pub timezone: String,
    /// Viewport dimensions in pixels.
    pub viewport: (u32, u32),
}

impl StealthProfile {
    /// Creates a profile with freshly randomized parameters.
    #[must_use]
    pub fn randomized() -> Self {
        let mut rng = rand::thread_rng();

        let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
        let (locale, accept_language, timezone) =
            LOCALES.choose(&mut rng).copied().unwrap_or(LOCALES[0]);
        let (base_w, base_h) = VIEWPORTS.choose(&mut rng).copied().unwrap_or(VIEWPORTS[0]);

        // Jitter defeats exact-resolution fingerprints without leaving the
        // plausible desktop range.
        let viewport = (
            base_w - rng.gen_range(0..16),
            base_h - rng.gen_range(0..16),
        );

        Self {
            user_agent: user_agent.to_string(),
            accept_language: accept_language.to_string(),
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            viewport,
        }
    }

    /// Builds the init script applied before any page script runs.
    ///
    /// Patches `navigator.webdriver`, plugin/language surfaces, and adds
    /// per-session noise to canvas readouts so repeated extractions hash
    /// differently.
    #[must_use]
    pub fn init_script(&self) -> String {
        let mut rng = rand::thread_rng();
        let canvas_seed: u32 = rng.gen_range(1..=255);
        let languages = format!(
            "['{}', '{}']",
            self.locale,
            self.locale.split('-').next().unwrap_or("en")
        );

        format!(
            r#"(() => {{
  Object.defineProperty(Navigator.prototype, 'webdriver', {{
    get: () => undefined,
    configurable: true,
  }});
  Object.defineProperty(Navigator.prototype, 'languages', {{
    get: () => {languages},
    configurable: true,
  }});
  Object.defineProperty(Navigator.prototype, 'plugins', {{
    get: () => [1, 2, 3],
    configurable: true,
  }});

  const seed = {canvas_seed};
  const noise = (data) => {{
    for (let i = 0; i < data.length; i += 4096) {{
      data[i] = data[i] ^ (seed & 0x7);
    }}
  }};
  const origGetImageData = CanvasRenderingContext2D.prototype.getImageData;
  CanvasRenderingContext2D.prototype.getImageData = function (...args) {{
    const imageData = origGetImageData.apply(this, args);
    noise(imageData.data);
    return imageData;
  }};
  const origToDataURL = HTMLCanvasElement.prototype.toDataURL;
  HTMLCanvasElement.prototype.toDataURL = function (...args) {{
    const ctx = this.getContext('2d');
    if (ctx && this.width > 0 && this.height > 0) {{
      const imageData = origGetImageData.call(ctx, 0, 0, this.width, this.height);
      noise(imageData.data);
      ctx.putImageData(imageData, 0, 0);
    }}
    return origToDataURL.apply(this, args);
  }};
}})();"#
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
