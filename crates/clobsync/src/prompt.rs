//! Terminal implementation of the listener boundary.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Mutex;

use clobsync_lib::operations::{SkipReason, SyncOutcome};
use clobsync_lib::{SyncListener, TableMapping};
use log::{debug, error, info, warn};

/// Asks selection questions on stdin and logs outcomes.
///
/// Prompts from different workers are serialized.
#[derive(Default)]
pub struct TerminalListener {
    prompt: Mutex<()>,
}

impl TerminalListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn choose(&self, title: &str, options: &[String]) -> Option<usize> {
        let _guard = self.prompt.lock().unwrap_or_else(|e| e.into_inner());
        let stdin = io::stdin();
        let stdout = io::stdout();
        choose_from(&mut stdin.lock(), &mut stdout.lock(), title, options)
    }
}

/// Print numbered options and read a 1-based choice. Anything else declines.
pub fn choose_from<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    title: &str,
    options: &[String],
) -> Option<usize> {
    let _ = writeln!(output, "{}", title);
    for (i, option) in options.iter().enumerate() {
        let _ = writeln!(output, "  {}) {}", i + 1, option);
    }
    let _ = write!(output, "Choice (empty to skip): ");
    let _ = output.flush();

    let mut line = String::new();
    input.read_line(&mut line).ok()?;
    let choice: usize = line.trim().parse().ok()?;
    (1..=options.len()).contains(&choice).then(|| choice - 1)
}

impl SyncListener for TerminalListener {
    fn request_table_selection(&self, path: &Path, candidates: &[TableMapping]) -> Option<TableMapping> {
        let names: Vec<String> = candidates.iter().map(TableMapping::qualified_name).collect();
        let title = format!("Several tables can hold {}:", path.display());
        self.choose(&title, &names)
            .and_then(|i| candidates.get(i).cloned())
    }

    fn request_mime_type_selection(&self, path: &Path, candidates: &[String]) -> Option<String> {
        let title = format!("MIME type for {}:", path.display());
        self.choose(&title, candidates)
            .and_then(|i| candidates.get(i).cloned())
    }

    fn on_processing_finished(&self, structural_change: bool) {
        if structural_change {
            info!("Synced file set changed");
        }
    }

    fn on_operation_complete(&self, path: &Path, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Failed { .. } => error!("{}: {}", path.display(), outcome),
            SyncOutcome::Skipped(SkipReason::NoMapping | SkipReason::Unchanged) => {
                debug!("{}: {}", path.display(), outcome)
            }
            SyncOutcome::Skipped(SkipReason::SelectionDeclined) => {
                warn!("{}: {}", path.display(), outcome)
            }
            _ => info!("{}: {}", path.display(), outcome),
        }
    }
}
