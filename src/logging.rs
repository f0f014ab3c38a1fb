use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(clap::Args, Clone, Debug)]
pub struct LogArgs {
    /// The log level, or a full filter directive. RUST_LOG takes precedence when set.
    #[clap(long = "log.level", default_value = "info")]
    pub level: String,

    #[clap(long = "log.format", value_enum, default_value = "text")]
    pub format: LogFormat,
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for program output.
pub fn init_logging(args: &LogArgs) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match args.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Args {
        #[clap(flatten)]
        log_args: LogArgs,
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["prog"]).unwrap();
        assert_eq!(args.log_args.level, "info");
        assert_eq!(args.log_args.format, LogFormat::Text);
    }

    #[test]
    fn test_flags() {
        let args =
            Args::try_parse_from(["prog", "--log.level", "debug", "--log.format", "json"]).unwrap();
        assert_eq!(args.log_args.level, "debug");
        assert_eq!(args.log_args.format, LogFormat::Json);
    }
}
