//! Percentage + label progress reporting.

use std::io::{self, Write};

/// Receives progress updates from long-running flows.
///
/// `percent` is `None` once the current task is complete. A `label` of
/// `None` keeps the previous label.
pub trait Progress {
    fn report(&mut self, percent: Option<f64>, label: Option<&str>);

    fn finish(&mut self) {
        self.report(None, None);
    }
}

impl<F> Progress for F
where
    F: FnMut(Option<f64>, Option<&str>),
{
    fn report(&mut self, percent: Option<f64>, label: Option<&str>) {
        self(percent, label)
    }
}

/// How progress is shown on the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProgressMode {
    /// No output.
    None,
    /// One `label... N%` line per update on stderr.
    #[default]
    Plain,
    /// A single redrawn bar on stderr.
    Text,
}

pub struct TerminalProgress {
    mode: ProgressMode,
    label: String,
    out: Box<dyn Write>,
}

impl TerminalProgress {
    pub fn new(mode: ProgressMode) -> Self {
        Self::with_writer(mode, Box::new(io::stderr()))
    }

    pub fn with_writer(mode: ProgressMode, out: Box<dyn Write>) -> Self {
        Self {
            mode,
            label: "...".to_owned(),
            out,
        }
    }

    fn render(&self, percent: u32) -> Option<String> {
        match self.mode {
            ProgressMode::None => None,
            ProgressMode::Plain => Some(format!("{}... {}%\n", self.label, percent)),
            ProgressMode::Text => {
                let filled = (percent / 2) as usize;
                let empty = 50usize.saturating_sub(((percent + 1) / 2) as usize);
                Some(format!(
                    "\x1b[2K[{}{}] {}...\r",
                    "#".repeat(filled),
                    " ".repeat(empty),
                    self.label
                ))
            }
        }
    }
}

fn clamp_percent(percent: Option<f64>) -> u32 {
    match percent {
        None => 100,
        Some(p) if p.is_nan() || p < 0.0 => 0,
        Some(p) => (p as u32).min(100),
    }
}

impl Progress for TerminalProgress {
    fn report(&mut self, percent: Option<f64>, label: Option<&str>) {
        if let Some(label) = label {
            self.label = label.to_owned();
        }
        if let Some(line) = self.render(clamp_percent(percent)) {
            // Progress output is cosmetic; a closed stderr must not abort a flow.
            let _ = self.out.write_all(line.as_bytes());
            let _ = self.out.flush();
        }
    }

    fn finish(&mut self) {
        self.report(None, None);
        if self.mode == ProgressMode::Text {
            let _ = self.out.write_all(b"\n");
        }
    }
}
