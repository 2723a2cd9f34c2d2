//! CLI-specific progress handling for forest-loss
//!
//! Renders the reducer's per-cell progress callback as an indicatif bar.

use forest_loss::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

/// Creates a progress bar counting reduced grid cells
pub fn create_progress_bar(total_cells: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_cells);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} cells ({percent}%) ETA: {eta}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Progress bar plus the callback that drives it
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager; the length is set by the first callback
    pub fn new(total_cells: u64, message: &str) -> Self {
        let pb = create_progress_bar(total_cells);

        eprintln!("{message}");

        Self { pb }
    }

    /// Callback to hand to the analyzer
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |done, total| {
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(done);
            if done >= total {
                pb.finish_with_message("✅ All cells reduced");
            }
        })
    }

    /// Clear the bar if the run stopped before every cell finished
    pub fn finish(&self) {
        if !self.pb.is_finished() {
            self.pb.abandon();
        }
    }
}
