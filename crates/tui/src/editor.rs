use bpfq_core::live_view::QueryEditor;
use ratatui::style::{Modifier, Style};
use ratatui::widgets::Block;
use tui_textarea::{CursorMove, Input, TextArea};

/// Query pane backed by a `tui_textarea` buffer.
#[derive(Debug, Clone)]
pub struct TextEditor {
    textarea: TextArea<'static>,
    focused: bool,
}

impl Default for TextEditor {
    fn default() -> Self {
        Self::new("")
    }
}

impl TextEditor {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            textarea: textarea_with(text),
            focused: true,
        }
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    /// Feeds one key to the buffer. Returns `true` when the text changed.
    pub fn input(&mut self, input: impl Into<Input>) -> bool {
        self.textarea.input(input)
    }

    /// Cursor as (line, column) in characters.
    #[must_use]
    pub fn cursor_position(&self) -> (usize, usize) {
        self.textarea.cursor()
    }

    /// Widget for the query pane; the cursor is only drawn while focused.
    #[must_use]
    pub fn widget(&self, block: Block<'static>) -> TextArea<'static> {
        let mut textarea = self.textarea.clone();
        textarea.set_block(block);
        textarea.set_cursor_line_style(Style::default());
        let cursor = if self.focused {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        textarea.set_cursor_style(cursor);
        textarea
    }
}

fn textarea_with(text: &str) -> TextArea<'static> {
    let mut textarea = TextArea::from(text.split('\n'));
    textarea.move_cursor(CursorMove::Bottom);
    textarea.move_cursor(CursorMove::End);
    textarea
}

impl QueryEditor for TextEditor {
    fn value(&self) -> String {
        self.textarea.lines().join("\n")
    }

    fn set_value(&mut self, text: &str) {
        self.textarea = textarea_with(text);
    }

    fn has_focus(&self) -> bool {
        self.focused
    }

    fn focus(&mut self) {
        self.focused = true;
    }
}
