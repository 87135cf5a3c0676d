//! Terminal colors resolved from `theme.json`

use crossterm::style::Color;
use forgent_core::Theme;
use tracing::warn;

/// Resolved colors and spacing for the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub user: Color,
    pub assistant: Color,
    pub title: Color,
    pub error: Color,
    /// Blank lines printed after each message
    pub blank_lines: usize,
}

impl Palette {
    pub fn from_theme(theme: &Theme) -> Self {
        let defaults = Theme::default();
        let resolve = |value: &str, fallback: &str| {
            parse_color(value).unwrap_or_else(|| {
                warn!(color = value, "unknown theme color, using default");
                parse_color(fallback).unwrap_or(Color::Reset)
            })
        };

        Self {
            user: resolve(&theme.user_color, &defaults.user_color),
            assistant: resolve(&theme.assistant_color, &defaults.assistant_color),
            title: resolve(&theme.title_color, &defaults.title_color),
            error: resolve(&theme.error_color, &defaults.error_color),
            blank_lines: theme.spacing.blank_lines(),
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::from_theme(&Theme::default())
    }
}

/// Parse `#rrggbb` or a crossterm color name such as `dark_cyan`
pub fn parse_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return Some(Color::Rgb {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        });
    }
    Color::try_from(value.to_ascii_lowercase().as_str()).ok()
}
