use chrono::{DateTime, Utc};

use crate::apod::DailyContent;

/// Telegram caps photo captions at 1024 visible characters.
pub const CAPTION_LIMIT: usize = 1024;

/// Fixed attachment name the caption's image slot refers to.
pub const IMAGE_FILE_NAME: &str = "apod.jpg";

/// The outbound post, ready to pair with the downloaded image bytes.
#[derive(Debug, Clone)]
pub struct OutboundPost {
    pub title: String,
    pub body: String,
    /// Present only when the content carries a copyright holder.
    pub attribution: Option<String>,
    /// "from {date}" with the content's own date, not the compose time.
    pub footer: String,
    pub composed_at: DateTime<Utc>,
}

/// Pure formatting step: metadata in, post out. The only non-determinism is
/// the compose timestamp, which the caller passes in.
pub fn compose(content: &DailyContent, now: DateTime<Utc>) -> OutboundPost {
    OutboundPost {
        title: content
            .title
            .clone()
            .unwrap_or_else(|| "No Title".to_string()),
        body: content
            .explanation
            .clone()
            .unwrap_or_else(|| "No Description".to_string()),
        attribution: content.copyright.as_ref().map(|c| c.trim().to_string()),
        footer: format!("from {}", content.date.as_deref().unwrap_or("unknown")),
        composed_at: now,
    }
}

impl OutboundPost {
    /// Render the HTML caption, truncating the body so the visible text stays
    /// within [`CAPTION_LIMIT`]. Telegram counts the limit after entity
    /// parsing, so budgets are in raw characters and escaping happens last.
    pub fn caption(&self) -> String {
        let footer_line = format!(
            "{} · {}",
            self.footer,
            self.composed_at.format("%Y-%m-%d %H:%M UTC")
        );

        let mut fixed = self.title.chars().count() + footer_line.chars().count() + 4;
        if let Some(attribution) = &self.attribution {
            // "© " prefix plus the blank line before it
            fixed += attribution.chars().count() + 4;
        }

        let body = truncate_chars(&self.body, CAPTION_LIMIT.saturating_sub(fixed));

        let mut caption = format!(
            "<b>{}</b>\n\n{}",
            html_escape::encode_text(&self.title),
            html_escape::encode_text(&body)
        );
        if let Some(attribution) = &self.attribution {
            caption.push_str(&format!("\n\n© {}", html_escape::encode_text(attribution)));
        }
        caption.push_str(&format!(
            "\n\n<i>{}</i>",
            html_escape::encode_text(&footer_line)
        ));
        caption
    }
}

/// Cut on a character boundary, ending with an ellipsis when text was lost.
fn truncate_chars(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max - 1).collect();
    let kept = cut.trim_end().len();
    cut.truncate(kept);
    cut.push('…');
    cut
}
