use clap::Parser;
use send_to_phone::config::Config;
use send_to_phone::errors::Error;
use send_to_phone::logging::{init_logging, LogArgs};
use send_to_phone::ngrok::{NgrokOptions, NgrokTunnel};
use send_to_phone::sender::Sender;
use send_to_phone::twilio::TwilioMessenger;
use std::io;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 7070;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Send a photo to a phone as MMS, through a temporary ngrok tunnel.")]
pub struct Args {
    /// The photo to send (.jpg, .jpeg, .gif, .png or .bmp).
    input: PathBuf,

    /// Recipient: a name from the config file or a phone number such as +14071111111.
    /// Defaults to the configured default recipient.
    #[clap(long)]
    to: Option<String>,

    /// Path to the config file. Defaults to send-to-phone/config.json in the user config directory.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Port on which to run the temporary webserver for the messaging provider.
    #[clap(short, long)]
    port: Option<u16>,

    /// Show more information about what is happening.
    #[clap(short, long)]
    verbose: bool,

    #[clap(flatten)]
    log_args: LogArgs,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let Args {
        input,
        to,
        config,
        port,
        verbose,
        mut log_args,
    } = Args::parse();

    if verbose {
        log_args.level = "debug".to_string();
    }
    init_logging(&log_args);

    if let Err(err) = run(input, to, config, port).await.as_ref() {
        tracing::error!(error = ?err, "send-to-phone failed.");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    input: PathBuf,
    to: Option<String>,
    config_path: Option<PathBuf>,
    port: Option<u16>,
) -> Result<(), Error> {
    let config_path = config_path.or_else(Config::default_path).ok_or_else(|| {
        Error::Config("could not determine the config directory, pass --config".into())
    })?;
    tracing::debug!(path = %config_path.display(), "loading config");
    let config = Config::load(&config_path)?;

    let destination = config.resolve_recipient(to.as_deref())?;
    let port = port.or(config.port).unwrap_or(DEFAULT_PORT);

    let mut options = NgrokOptions::default();
    if let Some(binary) = &config.ngrok_binary {
        options = options.with_binary(binary);
    }

    let sender = Sender::new(
        Box::new(NgrokTunnel::new(options)),
        Box::new(TwilioMessenger::new(config.twilio.clone())?),
        port,
    );
    sender.send_file(&destination, &input).await?;

    tracing::info!(file = %input.display(), to = %destination, "sent");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "send-to-phone",
            "cat.png",
            "--to",
            "my-phone",
            "-p",
            "8080",
            "-v",
        ])
        .unwrap();

        assert_eq!(args.input, PathBuf::from("cat.png"));
        assert_eq!(args.to.as_deref(), Some("my-phone"));
        assert_eq!(args.port, Some(8080));
        assert!(args.verbose);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_input_is_required() {
        assert!(Args::try_parse_from(["send-to-phone"]).is_err());
    }

    #[tokio::test]
    async fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            PathBuf::from("cat.png"),
            None,
            Some(dir.path().join("missing.json")),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_unknown_recipient_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(
            &config,
            r#"{"twilio": {"sid": "AC1", "authToken": "t", "senderNumber": "+1"}, "phoneNumbers": {}}"#,
        )
        .unwrap();

        let result = run(
            PathBuf::from("cat.png"),
            Some("mom".to_string()),
            Some(config),
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::UnknownRecipient(_))));
    }
}
