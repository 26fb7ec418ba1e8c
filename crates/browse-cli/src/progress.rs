//! Status line for slow steps (session provisioning, model turns)
//!
//! The step text lives in a watch channel; a background task redraws it with
//! a spinner until the line is finished.

use std::io::{stdout, Write};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

const CLEAR_LINE: &str = "\x1b[2K\r";
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const CYAN: &str = "\x1b[96m";
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

const FRAME_INTERVAL: Duration = Duration::from_millis(80);

/// Symbols for the current terminal
#[derive(Debug, Clone, Copy)]
struct Glyphs {
    frames: &'static [&'static str],
    done: &'static str,
    failed: &'static str,
}

impl Glyphs {
    const UNICODE: Glyphs = Glyphs {
        frames: &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"],
        done: "✓",
        failed: "✗",
    };

    const ASCII: Glyphs = Glyphs {
        frames: &["|", "/", "-", "\\"],
        done: "+",
        failed: "x",
    };

    fn detect() -> Self {
        let term = std::env::var("TERM").unwrap_or_default();
        let utf8_locale = ["LC_ALL", "LC_CTYPE", "LANG"].iter().any(|var| {
            std::env::var(var).is_ok_and(|val| val.to_lowercase().contains("utf"))
        });

        if utf8_locale || ["xterm", "256color", "kitty"].iter().any(|t| term.contains(t)) {
            Self::UNICODE
        } else {
            Self::ASCII
        }
    }
}

/// A single-line spinner whose text follows the step in progress
pub struct StatusLine {
    step: Option<watch::Sender<String>>,
    render: Option<JoinHandle<()>>,
    glyphs: Glyphs,
}

impl StatusLine {
    /// Show `step` and start animating
    pub fn start(step: impl Into<String>) -> Self {
        let glyphs = Glyphs::detect();
        let (tx, rx) = watch::channel(step.into());

        Self {
            step: Some(tx),
            render: Some(tokio::spawn(render(rx, glyphs.frames))),
            glyphs,
        }
    }

    /// Replace the line with a success message
    pub async fn succeed(mut self, message: impl Into<String>) {
        self.clear().await;
        println!("{}{} {}{}", GREEN, self.glyphs.done, message.into(), RESET);
    }

    /// Replace the line with a failure message
    pub async fn fail(mut self, message: impl Into<String>) {
        self.clear().await;
        println!("{}{} {}{}", RED, self.glyphs.failed, message.into(), RESET);
    }

    /// Remove the line without a message
    pub async fn clear(&mut self) {
        // Closing the channel ends the render task
        self.step.take();
        if let Some(handle) = self.render.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatusLine {
    fn drop(&mut self) {
        if self.render.is_some() {
            print!("{}{}", CLEAR_LINE, SHOW_CURSOR);
            let _ = stdout().flush();
        }
    }
}

async fn render(mut step: watch::Receiver<String>, frames: &'static [&'static str]) {
    let mut tick = tokio::time::interval(FRAME_INTERVAL);
    let mut frame = 0;

    print!("{}", HIDE_CURSOR);
    loop {
        let text = step.borrow_and_update().clone();
        print!("{}{}{} {}{}", CLEAR_LINE, CYAN, frames[frame], text, RESET);
        let _ = stdout().flush();
        frame = (frame + 1) % frames.len();

        tokio::select! {
            _ = tick.tick() => {}
            changed = step.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    print!("{}{}", CLEAR_LINE, SHOW_CURSOR);
    let _ = stdout().flush();
}
