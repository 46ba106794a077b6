//! Terminal spinner showing ingest throughput

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pleiades_core::{Metrics, StopSignal};
use tokio::task::JoinHandle;

const TICK_CHARS: &str = "⣾⣽⣻⢿⡿⣟⣯⣷ ";
const REFRESH: Duration = Duration::from_millis(100);

/// Start the spinner if stdout is a terminal.
///
/// The task ends and clears the line once `stop` fires.
pub fn spawn(metrics: Metrics, stop: StopSignal) -> Option<JoinHandle<()>> {
    if !std::io::stdout().is_terminal() {
        return None;
    }
    Some(tokio::spawn(run(metrics, stop)))
}

async fn run(metrics: Metrics, mut stop: StopSignal) {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {elapsed} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICK_CHARS);
    bar.set_style(style);

    let mut ticker = tokio::time::interval(REFRESH);
    loop {
        tokio::select! {
            _ = stop.stopped() => break,
            _ = ticker.tick() => {
                bar.set_message(status_line(&metrics));
                bar.tick();
            }
        }
    }

    bar.finish_and_clear();
}

fn status_line(metrics: &Metrics) -> String {
    let published: u64 = ["file", "kafka"]
        .into_iter()
        .map(|sink| metrics.events_published.with_label_values(&[sink]).get())
        .sum();
    format!(
        "received {} events, published {} events, {} restarts",
        metrics.events_received.get(),
        published,
        metrics.restart_count("stream_client")
    )
}
