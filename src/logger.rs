/* Logger initialization */
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub struct Logger;

impl Logger {
    /// stderr only; stdout carries command output.
    pub fn init(verbose: bool, quiet: bool) {
        let max_level = if verbose {
            LevelFilter::DEBUG
        } else if quiet {
            LevelFilter::WARN
        } else {
            LevelFilter::INFO
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false);

        // a second init (tests, embedded use) is not an error
        let _ = tracing_subscriber::registry()
            .with(max_level)
            .with(fmt_layer)
            .try_init();
    }
}
