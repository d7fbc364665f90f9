//! Alert configuration surface
//!
//! The core consumes this read-only; preferences storage and UI live outside.
//! Defaults follow the serde-default pattern so partially-specified config
//! files deserialize cleanly.

use serde::{Deserialize, Serialize};

/// Longest single vibrate segment accepted from a custom pattern (ms)
const VIBRATE_SEGMENT_MAX_MS: u64 = 60_000;

/// Most segments accepted in a custom vibrate pattern
const VIBRATE_PATTERN_MAX_LEN: usize = 30;

/// Pattern value meaning "use the platform default"
pub const VIBRATE_PATTERN_DEFAULT: &str = "default";

/// How much message content a notification may reveal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    /// Show sender and body
    #[default]
    Off,
    /// Show the sender only
    HideMessage,
    /// Show neither sender nor body
    HideAll,
}

/// Vibration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VibrateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Either [`VIBRATE_PATTERN_DEFAULT`] or a comma-separated list of
    /// millisecond durations
    #[serde(default = "default_vibrate_pattern")]
    pub pattern: String,
}

impl Default for VibrateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: default_vibrate_pattern(),
        }
    }
}

impl VibrateConfig {
    /// Resolve the configured pattern, or `None` for the platform default.
    ///
    /// An unparseable or out-of-bounds custom pattern falls back to the
    /// platform default rather than failing notification construction.
    pub fn resolved_pattern(&self) -> Option<Vec<u64>> {
        if self.pattern == VIBRATE_PATTERN_DEFAULT {
            return None;
        }
        parse_vibrate_pattern(&self.pattern)
    }
}

/// Parse a comma-separated vibrate pattern into millisecond segments
///
/// Returns `None` when any segment fails to parse, exceeds
/// [`VIBRATE_SEGMENT_MAX_MS`], or the pattern is empty or longer than
/// [`VIBRATE_PATTERN_MAX_LEN`].
pub fn parse_vibrate_pattern(raw: &str) -> Option<Vec<u64>> {
    let mut pattern = Vec::new();
    for segment in raw.split(',') {
        let ms: u64 = segment.trim().parse().ok()?;
        if ms > VIBRATE_SEGMENT_MAX_MS {
            return None;
        }
        pattern.push(ms);
    }
    if pattern.is_empty() || pattern.len() > VIBRATE_PATTERN_MAX_LEN {
        return None;
    }
    Some(pattern)
}

/// Notification LED settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Named color understood by the presenter
    #[serde(default = "default_led_color")]
    pub color_name: String,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            color_name: default_led_color(),
        }
    }
}

/// Repeat-reminder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between reminder firings
    #[serde(default = "default_reminder_interval")]
    pub interval_seconds: u64,

    /// Most firings a single message may consume
    #[serde(default = "default_reminder_repeats")]
    pub max_repeats: u32,

    /// Only fire while the screen is on; evaluated at fire time
    #[serde(default)]
    pub require_screen_on: bool,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_reminder_interval(),
            max_repeats: default_reminder_repeats(),
            require_screen_on: false,
        }
    }
}

/// Complete read-only configuration consumed by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Master switch for passive status-bar notifications
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Master switch for the full-screen popup
    #[serde(default = "default_true")]
    pub popup_enabled: bool,

    /// Only open the popup while the device is locked
    #[serde(default)]
    pub only_show_on_keyguard: bool,

    /// Mark the thread read when the alert is opened/dismissed
    #[serde(default = "default_true")]
    pub mark_read_on_open: bool,

    #[serde(default)]
    pub privacy: PrivacyMode,

    #[serde(default)]
    pub vibrate: VibrateConfig,

    #[serde(default)]
    pub led: LedConfig,

    #[serde(default)]
    pub reminder: ReminderConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            popup_enabled: true,
            only_show_on_keyguard: false,
            mark_read_on_open: true,
            privacy: PrivacyMode::Off,
            vibrate: VibrateConfig::default(),
            led: LedConfig::default(),
            reminder: ReminderConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_vibrate_pattern() -> String {
    VIBRATE_PATTERN_DEFAULT.to_string()
}

fn default_led_color() -> String {
    "yellow".to_string()
}

fn default_reminder_interval() -> u64 {
    120
}

fn default_reminder_repeats() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vibrate_pattern() {
        assert_eq!(
            parse_vibrate_pattern("0, 1200, 500, 1200"),
            Some(vec![0, 1200, 500, 1200])
        );
        assert_eq!(parse_vibrate_pattern(""), None);
        assert_eq!(parse_vibrate_pattern("100,abc"), None);
        // Segment above the cap rejects the whole pattern
        assert_eq!(parse_vibrate_pattern("100,60001"), None);
        // Too many segments
        let long = vec!["10"; 31].join(",");
        assert_eq!(parse_vibrate_pattern(&long), None);
    }

    #[test]
    fn test_resolved_pattern_falls_back_to_default() {
        let config = VibrateConfig {
            enabled: true,
            pattern: "not-a-pattern".to_string(),
        };
        assert_eq!(config.resolved_pattern(), None);

        let config = VibrateConfig::default();
        assert_eq!(config.resolved_pattern(), None);

        let config = VibrateConfig {
            enabled: true,
            pattern: "250,250,500".to_string(),
        };
        assert_eq!(config.resolved_pattern(), Some(vec![250, 250, 500]));
    }

    #[test]
    fn test_config_defaults_from_empty_document() {
        let config: AlertConfig = serde_json::from_str("{}").unwrap();
        assert!(config.notifications_enabled);
        assert!(config.popup_enabled);
        assert!(!config.only_show_on_keyguard);
        assert_eq!(config.privacy, PrivacyMode::Off);
        assert_eq!(config.reminder.max_repeats, 2);
        assert_eq!(config.reminder.interval_seconds, 120);
    }
}
