mod diagnostics;
mod playback;
mod queue;
mod refresh;

#[cfg(test)]
mod tests;

pub use diagnostics::{get_diagnostics, DiagnosticsReport, ErrorEntry, ErrorLog};
pub use refresh::fetch_new_episodes;
