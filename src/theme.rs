use ratatui::style::Color;

// Brand colors: warm paper for light mode, slate for dark mode.
const PAPER: Color = Color::Rgb(223, 208, 184);
const SLATE: Color = Color::Rgb(34, 40, 49);
const PAPER_DIM: Color = Color::Rgb(196, 181, 157);
const SLATE_DIM: Color = Color::Rgb(57, 62, 70);
const ACCENT_DARK: Color = Color::Rgb(255, 211, 105);
const ACCENT_LIGHT: Color = Color::Rgb(148, 93, 39);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Light,
    Dark,
}

impl Mode {
    pub fn toggled(self) -> Mode {
        match self {
            Mode::Light => Mode::Dark,
            Mode::Dark => Mode::Light,
        }
    }

    pub fn from_key(key: &str) -> Mode {
        match key.trim().to_ascii_lowercase().as_str() {
            "light" => Mode::Light,
            _ => Mode::Dark,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Light => "light",
            Mode::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub bg: Color,
    pub panel_bg: Color,
    pub text_primary: Color,
    pub text_secondary: Color,
    pub border_idle: Color,
    pub border_focused: Color,
    pub accent: Color,
    pub overlay_scrim: Color,
}

pub fn palette(mode: Mode) -> Palette {
    match mode {
        Mode::Dark => Palette {
            bg: SLATE,
            panel_bg: SLATE_DIM,
            text_primary: PAPER,
            text_secondary: PAPER_DIM,
            border_idle: SLATE_DIM,
            border_focused: ACCENT_DARK,
            accent: ACCENT_DARK,
            overlay_scrim: SLATE_DIM,
        },
        Mode::Light => Palette {
            bg: PAPER,
            panel_bg: PAPER_DIM,
            text_primary: SLATE,
            text_secondary: SLATE_DIM,
            border_idle: PAPER_DIM,
            border_focused: ACCENT_LIGHT,
            accent: ACCENT_LIGHT,
            overlay_scrim: PAPER_DIM,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_between_modes() {
        assert_eq!(Mode::Dark.toggled(), Mode::Light);
        assert_eq!(Mode::Light.toggled(), Mode::Dark);
    }

    #[test]
    fn from_key_defaults_to_dark() {
        assert_eq!(Mode::from_key("light"), Mode::Light);
        assert_eq!(Mode::from_key("Light "), Mode::Light);
        assert_eq!(Mode::from_key("dark"), Mode::Dark);
        assert_eq!(Mode::from_key("solarized"), Mode::Dark);
    }
}
