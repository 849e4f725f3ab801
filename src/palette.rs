use std::fmt;

/// ANSI foreground colour.
#[derive(Clone, Copy, Debug)]
pub struct PaletteColor(&'static str);

impl PaletteColor {
    pub const fn ansi(self) -> &'static str {
        self.0
    }
}

pub struct Palette;

impl Palette {
    pub const RESET: &'static str = "\x1b[0m";
    pub const DIM: &'static str = "\x1b[2m";

    pub const ACCENT: PaletteColor = PaletteColor("\x1b[34m");
    pub const INFO: PaletteColor = PaletteColor("\x1b[36m");
    pub const SUCCESS: PaletteColor = PaletteColor("\x1b[32m");
    pub const WARNING: PaletteColor = PaletteColor("\x1b[33m");
    pub const DANGER: PaletteColor = PaletteColor("\x1b[31m");

    pub fn paint(color: PaletteColor, value: impl fmt::Display) -> String {
        format!("{}{}{}", color.ansi(), value, Self::RESET)
    }

    pub fn dim(value: impl fmt::Display) -> String {
        format!("{}{}{}", Self::DIM, value, Self::RESET)
    }
}
