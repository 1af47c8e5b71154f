//! Terminal front-end for the generation flow.
//!
//! Thin presentation layer: reads the three form fields from stdin, renders
//! whichever `UiState` is current, and performs no business logic beyond
//! refusing to submit while a required field is blank.

use std::io::{self, BufRead, Write};

use crate::session::progress_fraction;

/// Width of the rendered progress bar in characters.
const PROGRESS_BAR_WIDTH: usize = 30;

/// Prompt for a single form field, re-prompting while the answer is blank.
///
/// An empty answer falls back to `default` when one is given; with no
/// default, blank input re-prompts, so submission is simply unavailable
/// until every field is filled in.
pub fn read_field(label: &str, default: Option<&str>) -> io::Result<String> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        match default {
            Some(d) => print!("{} [{}]: ", label, d),
            None => print!("{}: ", label),
        }
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stdin closed while reading form input",
                ))
            }
        };

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
        if let Some(d) = default {
            return Ok(d.to_string());
        }
        println!("  This field is required.");
    }
}

/// Render one line of progress for an in-flight job.
///
/// The fraction comes from [`progress_fraction`] and is capped below 100%
/// until the provider actually reports completion.
pub fn print_progress(task_id: &str, polls: u32) {
    let fraction = progress_fraction(polls);
    let filled = (fraction * PROGRESS_BAR_WIDTH as f32).round() as usize;
    let bar: String = "#".repeat(filled) + &" ".repeat(PROGRESS_BAR_WIDTH - filled);

    let short_id: String = task_id.chars().take(12).collect();
    print!(
        "\r  [{}] {:>3.0}%  task {}…  ",
        bar,
        fraction * 100.0,
        short_id
    );
    let _ = io::stdout().flush();
}

pub fn print_submitting() {
    println!("Submitting generation job…");
}

pub fn print_job_accepted(task_id: &str) {
    println!("Job accepted. Task ID: {}", task_id);
    println!("Rendering usually takes 2-3 minutes. Press Ctrl+C to cancel.");
}

pub fn print_done(video_url: &str) {
    println!();
    println!("Video ready!");
    println!("  URL: {}", video_url);
    println!("  Format: 1080x1920 (9:16), 15 seconds, MP4");
}

pub fn print_error(message: &str) {
    println!();
    eprintln!("Error: {}", message);
}

pub fn print_timed_out() {
    println!();
    eprintln!("Error: video generation timed out. You can retry with the same inputs.");
}

pub fn print_cancelled() {
    println!();
    println!("Cancelled. No further status updates will be applied.");
}

/// Ask a yes/no question; returns false on blank input or EOF.
pub fn confirm(question: &str) -> bool {
    print!("{} [y/N]: ", question);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_never_overflows() {
        // 1000 polls is deep past the cap; the bar must stay in bounds.
        let fraction = progress_fraction(1000);
        let filled = (fraction * PROGRESS_BAR_WIDTH as f32).round() as usize;
        assert!(filled <= PROGRESS_BAR_WIDTH);
    }
}
