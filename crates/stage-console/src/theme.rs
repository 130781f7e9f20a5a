//! Color palette and style constants for the operator console.

use ratatui::style::{Color, Modifier, Style};

use stage_proto::setlist::ItemKind;

// Stage lighting: warm amber accent, green means live.

pub const C_BG: Color = Color::Rgb(14, 12, 16);
pub const C_ACCENT: Color = Color::Rgb(240, 150, 60);
pub const C_LIVE: Color = Color::Rgb(80, 200, 120);
pub const C_STARTING: Color = Color::Rgb(255, 184, 80);
pub const C_ERROR: Color = Color::Rgb(230, 70, 70);
pub const C_MUTED: Color = Color::Rgb(84, 78, 92);
pub const C_SECONDARY: Color = Color::Rgb(132, 124, 140);
pub const C_PRIMARY: Color = Color::Rgb(228, 222, 214);
pub const C_SELECTION_BG: Color = Color::Rgb(44, 34, 26);
pub const C_PANEL_BORDER: Color = Color::Rgb(48, 42, 50);
pub const C_PANEL_BORDER_FOCUSED: Color = Color::Rgb(80, 200, 120);
pub const C_NUMBER_HINT: Color = Color::Rgb(90, 90, 115);
pub const C_SCRIPTURE: Color = Color::Rgb(255, 200, 80);
pub const C_TOAST_INFO: Color = Color::Rgb(120, 170, 210);
pub const C_TOAST_WARNING: Color = Color::Rgb(240, 190, 90);
pub const C_TOAST_ERROR: Color = Color::Rgb(230, 70, 70);

// Item kinds
pub const C_KIND_SONG: Color = Color::Rgb(80, 140, 200);
pub const C_KIND_BIBLE: Color = Color::Rgb(100, 160, 130);
pub const C_KIND_MEDIA: Color = Color::Rgb(180, 120, 220);
pub const C_KIND_ANNOUNCEMENT: Color = Color::Rgb(255, 210, 50);


pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_accent() -> Style {
    Style::default().fg(C_ACCENT)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}

pub fn style_active_row() -> Style {
    Style::default()
        .bg(C_SELECTION_BG)
        .fg(C_PRIMARY)
        .add_modifier(Modifier::BOLD)
}

pub fn style_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(C_PANEL_BORDER_FOCUSED)
    } else {
        Style::default().fg(C_PANEL_BORDER)
    }
}

pub fn kind_color(kind: ItemKind) -> Color {
    match kind {
        ItemKind::Song => C_KIND_SONG,
        ItemKind::Bible => C_KIND_BIBLE,
        ItemKind::Media => C_KIND_MEDIA,
        ItemKind::Announcement => C_KIND_ANNOUNCEMENT,
    }
}
