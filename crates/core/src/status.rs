#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusTone {
    #[default]
    Normal,
    Warning,
    Error,
}

/// Operator-visible status area.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusLine {
    text: String,
    tone: StatusTone,
}

impl StatusLine {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tone(&self) -> StatusTone {
        self.tone
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.tone == StatusTone::Error
    }

    pub fn normal(&mut self, text: impl Into<String>) {
        self.set(StatusTone::Normal, text);
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        self.set(StatusTone::Warning, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.set(StatusTone::Error, text);
    }

    fn set(&mut self, tone: StatusTone, text: impl Into<String>) {
        self.tone = tone;
        self.text = text.into();
    }
}

#[cfg(test)]
mod tests {
    use super::{StatusLine, StatusTone};

    #[test]
    fn later_updates_replace_text_and_tone() {
        let mut status = StatusLine::default();
        status.error("syntax error");
        assert!(status.is_error());

        status.normal("kprobe:vfs_open { }");
        assert_eq!(status.tone(), StatusTone::Normal);
        assert_eq!(status.text(), "kprobe:vfs_open { }");
    }
}
