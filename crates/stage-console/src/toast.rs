//! Toast notifications for core notices.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Clear, Paragraph},
    Frame,
};
use stage_core::notices::{Notice, NoticeLevel};

use crate::theme::{C_TOAST_ERROR, C_TOAST_INFO, C_TOAST_WARNING};

struct Toast {
    message: String,
    level: NoticeLevel,
    /// `None` keeps the toast until it is dismissed.
    expires: Option<Instant>,
}

pub struct ToastManager {
    toasts: VecDeque<Toast>,
    max_visible: usize,
}

impl ToastManager {
    pub fn new() -> Self {
        Self {
            toasts: VecDeque::new(),
            max_visible: 4,
        }
    }

    pub fn push(&mut self, notice: &Notice) {
        let expires = match notice.level {
            NoticeLevel::Info => Some(Instant::now() + Duration::from_secs(3)),
            NoticeLevel::Transient => Some(Instant::now() + Duration::from_secs(5)),
            NoticeLevel::Persistent => None,
        };
        let message = format!("{} {}", notice.at.format("%H:%M:%S"), notice.message);
        // Same text replaces the older copy.
        self.toasts.retain(|t| t.message != message);
        self.toasts.push_back(Toast {
            message,
            level: notice.level,
            expires,
        });
        while self.toasts.len() > self.max_visible * 2 {
            self.toasts.pop_front();
        }
    }

    /// Drop persistent toasts (the condition behind them was cleared).
    pub fn dismiss_persistent(&mut self) {
        self.toasts.retain(|t| t.level != NoticeLevel::Persistent);
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.toasts
            .retain(|t| t.expires.map(|at| at > now).unwrap_or(true));
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }

    /// Render toasts in the top-right corner of `area`.
    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        if self.is_empty() {
            return;
        }
        let max_width = (area.width / 2).clamp(30, 60);
        let mut y = area.y + 1;

        for toast in self.toasts.iter().rev().take(self.max_visible) {
            let msg_len = toast.message.chars().count() as u16;
            let w = (msg_len + 4).min(max_width);
            let x = area.x + area.width.saturating_sub(w + 1);

            let (color, icon) = match toast.level {
                NoticeLevel::Info => (C_TOAST_INFO, "·"),
                NoticeLevel::Transient => (C_TOAST_WARNING, "!"),
                NoticeLevel::Persistent => (C_TOAST_ERROR, "✗"),
            };

            let toast_area = Rect {
                x,
                y,
                width: w,
                height: 1,
            };
            frame.render_widget(Clear, toast_area);
            let paragraph = Paragraph::new(Line::from(vec![Span::styled(
                format!(" {} {} ", icon, &toast.message),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            )]));
            frame.render_widget(paragraph, toast_area);

            y += 1;
            if y >= area.y + area.height {
                break;
            }
        }
    }
}
