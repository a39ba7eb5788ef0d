use std::io::{self, Stdout, Write};
use std::ops::Range;

use crossterm::cursor::{Hide, MoveToColumn, MoveUp, Show};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{execute, queue};
use futures_util::StreamExt;

use super::{Input, Prompt};
use crate::engine::state::ChoiceSet;

const FOOTER: &str = "↑/↓ move · enter launch · d delete · esc quit";
/// Title, hint, footer, a confirmation line and one spare so the frame never
/// scrolls the screen and `MoveUp` always reaches its first line.
const CHROME_LINES: usize = 5;

/// Inline picker drawn below the cursor in raw mode. Dropping it restores
/// the terminal, including during a panic.
pub struct Terminal {
    stdout: Stdout,
    events: EventStream,
    title: String,
    drawn_lines: u16,
    active: bool,
}

impl Terminal {
    pub fn new(title: impl Into<String>) -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        if let Err(err) = execute!(stdout, Hide) {
            let _ = terminal::disable_raw_mode();
            return Err(err);
        }
        Ok(Self {
            stdout,
            events: EventStream::new(),
            title: title.into(),
            drawn_lines: 0,
            active: true,
        })
    }

    fn clear_frame(&mut self) -> io::Result<()> {
        if self.drawn_lines > 0 {
            queue!(self.stdout, MoveUp(self.drawn_lines))?;
        }
        queue!(self.stdout, MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
        self.drawn_lines = 0;
        Ok(())
    }

    fn line(&mut self, text: &str, width: usize) -> io::Result<()> {
        let clipped: String = text.chars().take(width).collect();
        queue!(self.stdout, Print(clipped), Print("\r\n"))?;
        self.drawn_lines += 1;
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        execute!(self.stdout, Show)?;
        terminal::disable_raw_mode()
    }

    async fn next_key(&mut self) -> io::Result<KeyEvent> {
        loop {
            match self.events.next().await {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => return Ok(key),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err),
                None => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            }
        }
    }
}

impl Prompt for Terminal {
    fn render(&mut self, choices: &ChoiceSet) -> io::Result<()> {
        let (width, height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((80, 24));
        let width = width.max(20);
        let rows = visible_rows(
            choices.choices().len(),
            choices.cursor(),
            height.saturating_sub(CHROME_LINES).max(1),
        );
        self.clear_frame()?;

        let title = self.title.clone();
        queue!(self.stdout, SetAttribute(Attribute::Bold))?;
        self.line(&title, width)?;
        queue!(self.stdout, SetAttribute(Attribute::Reset))?;

        for (index, choice) in choices
            .choices()
            .iter()
            .enumerate()
            .skip(rows.start)
            .take(rows.len())
        {
            let focused = index == choices.cursor();
            let pointer = if focused { "❯" } else { " " };
            let marker = if choice.cached { "●" } else { "○" };
            if choice.disabled {
                queue!(self.stdout, SetAttribute(Attribute::Dim))?;
            } else if focused {
                queue!(self.stdout, SetAttribute(Attribute::Bold))?;
            }
            self.line(&format!("{pointer} {marker} {}", choice.label), width)?;
            queue!(self.stdout, SetAttribute(Attribute::Reset))?;
        }

        let mut hint = choices.current().map(|choice| choice.hint()).unwrap_or_default();
        if rows.len() < choices.choices().len() {
            hint = format!("{hint}  ({}/{})", choices.cursor() + 1, choices.choices().len());
        }
        queue!(self.stdout, SetAttribute(Attribute::Dim))?;
        self.line(&format!("  {hint}"), width)?;
        self.line(FOOTER, width)?;
        queue!(self.stdout, SetAttribute(Attribute::Reset))?;
        self.stdout.flush()
    }

    async fn next_input(&mut self) -> io::Result<Input> {
        loop {
            let key = match self.events.next().await {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => key,
                Some(Ok(Event::Resize(..))) => return Ok(Input::Redraw),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err),
                None => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            };
            let input = match (key.code, key.modifiers) {
                (KeyCode::Char('c'), KeyModifiers::CONTROL) => Input::Cancel,
                (KeyCode::Up, _) | (KeyCode::Char('k'), _) => Input::Up,
                (KeyCode::Down, _) | (KeyCode::Char('j'), _) => Input::Down,
                (KeyCode::Home, _) | (KeyCode::Char('g'), _) => Input::First,
                (KeyCode::End, _) | (KeyCode::Char('G'), _) => Input::Last,
                (KeyCode::Enter, _) => Input::Submit,
                (KeyCode::Delete, _) | (KeyCode::Char('d'), _) => Input::Delete,
                (KeyCode::Esc, _) | (KeyCode::Char('q'), _) => Input::Cancel,
                _ => continue,
            };
            return Ok(input);
        }
    }

    async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        queue!(self.stdout, MoveToColumn(0), Print(question), Print(" "))?;
        self.stdout.flush()?;
        let key = self.next_key().await?;
        let yes = matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y'));
        queue!(self.stdout, Print(if yes { "y" } else { "n" }), Print("\r\n"))?;
        self.drawn_lines += 1;
        self.stdout.flush()?;
        Ok(yes)
    }

    fn finish(&mut self, summary: Option<&str>) -> io::Result<()> {
        self.clear_frame()?;
        if let Some(summary) = summary {
            queue!(self.stdout, Print(summary), Print("\r\n"))?;
        }
        self.stdout.flush()?;
        self.restore()
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

/// The slice of rows to draw: at most `capacity`, keeping the cursor roughly
/// centred and never scrolling past either end.
fn visible_rows(len: usize, cursor: usize, capacity: usize) -> Range<usize> {
    if len <= capacity {
        return 0..len;
    }
    let start = cursor
        .saturating_sub(capacity / 2)
        .min(len - capacity);
    start..start + capacity
}
