//! tracing configuration
use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::cli::LogFormat;

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays parseable.
pub fn init(ipam_log: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(ipam_log).or_else(|_| EnvFilter::try_new("info"))?;

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(Format::default().pretty().with_source_location(false))
                        .fmt_fields(PrettyFields::new())
                        .with_writer(std::io::stderr),
                )
                .try_init()?;
        }
        LogFormat::Standard => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
    }
    Ok(())
}
