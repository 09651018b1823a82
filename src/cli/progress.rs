//! Run Progress Display
//!
//! Single-line progress rendering driven by the orchestrator's status channel.

use console::{Term, style};
use tokio::sync::watch;

use crate::pipeline::{RunState, RunStatus};

const BAR_WIDTH: usize = 30;
const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Redraws one line on stderr whenever a new status is published
pub struct ConsoleRenderer {
    term: Term,
    ticks: usize,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            ticks: 0,
        }
    }

    /// Render one status line (without the spinner)
    pub fn render(status: &RunStatus) -> String {
        let mut line = format!(
            "[{}/5] {:<11} {} {}/{}",
            status.state.phase(),
            status.state.name(),
            render_progress_bar(status.completed, status.total, BAR_WIDTH),
            status.completed,
            status.total
        );
        if !status.degraded.is_empty() {
            line.push_str(&format!(" ({} degraded)", status.degraded.len()));
        }
        line
    }

    fn draw(&mut self, status: &RunStatus) {
        if !self.term.is_term() {
            return;
        }
        let spinner = SPINNER[self.ticks % SPINNER.len()];
        self.ticks += 1;
        let line = format!("{} {}", style(spinner).cyan(), Self::render(status));
        // A failed redraw only loses a frame
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&line);
    }

    /// Follow the channel until the run reaches a terminal state or the sender is gone
    pub async fn follow(mut self, mut updates: watch::Receiver<RunStatus>) {
        loop {
            let status = updates.borrow_and_update().clone();
            self.draw(&status);
            if status.is_terminal() || updates.changed().await.is_err() {
                break;
            }
        }
        if self.term.is_term() {
            let _ = self.term.clear_line();
        }
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Styled label for a terminal state
pub fn state_label(state: RunState) -> String {
    match state {
        RunState::Done => style("done").green().to_string(),
        RunState::Failed => style("failed").red().to_string(),
        RunState::Cancelled => style("cancelled").yellow().to_string(),
        other => style(other.name()).cyan().to_string(),
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::DegradedFile;

    #[test]
    fn test_progress_bar() {
        assert_eq!(render_progress_bar(0, 0, 4), "[    ]");
        assert_eq!(render_progress_bar(1, 2, 4), "[██░░]");
        assert_eq!(render_progress_bar(5, 2, 4), "[████]");
    }

    #[test]
    fn test_render_line() {
        let mut status = RunStatus::new("r1", "s1");
        status.state = RunState::Analyzing;
        status.completed = 3;
        status.total = 4;
        status.degraded.push(DegradedFile {
            path: "a.py".into(),
            reason: "timeout".into(),
        });
        let line = ConsoleRenderer::render(&status);
        assert!(line.starts_with("[2/5] analyzing"));
        assert!(line.contains("3/4"));
        assert!(line.ends_with("(1 degraded)"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
    }

    #[tokio::test]
    async fn test_follow_stops_at_terminal_state() {
        let (tx, rx) = watch::channel(RunStatus::new("r1", "s1"));
        let follower = tokio::spawn(ConsoleRenderer::new().follow(rx));
        let mut done = RunStatus::new("r1", "s1");
        done.state = RunState::Done;
        tx.send_replace(done);
        follower.await.unwrap();
    }
}
