#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mailgate::{Config, Mailgate, outgoing};
use mailgate_common::{envelope::Envelope, logging};
use mailgate_delivery::DeliveryEngine;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file. Defaults to `MAILGATE_CONFIG`, then
    /// ./mailgate.config.ron, then /etc/mailgate/mailgate.config.ron.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the SMTP listener and the webhook gateway (the default).
    Serve,
    /// Deliver one message directly to the recipients' mail exchangers.
    Send(SendArgs),
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    from: String,

    #[arg(long)]
    from_name: Option<String>,

    #[arg(long, required = true)]
    to: Vec<String>,

    #[arg(long, default_value = "")]
    subject: String,

    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    html: Option<String>,

    #[arg(long)]
    attach: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let (_, config) = Config::load(cli.config.as_deref())?;
            Mailgate::new(config).run().await
        }
        Command::Send(args) => {
            let config = match Config::load(cli.config.as_deref()) {
                Ok((_, config)) => {
                    logging::init(&config.logging);
                    config
                }
                Err(err) if cli.config.is_none() => {
                    let config = Config::default();
                    logging::init(&config.logging);
                    tracing::warn!("Using default delivery settings: {err}");
                    config
                }
                Err(err) => return Err(err),
            };

            send(config, args).await
        }
    }
}

async fn send(config: Config, args: SendArgs) -> anyhow::Result<()> {
    let mut envelope = Envelope::new(args.from).subject(args.subject);
    envelope.from_name = args.from_name;
    envelope.to = args.to;
    envelope.text = args.text;
    envelope.html = args.html;

    for path in &args.attach {
        envelope = envelope.attach(outgoing::load_attachment(path).await?);
    }

    let engine = DeliveryEngine::new(config.delivery)?;
    let result = engine.deliver(&envelope).await?;

    print!("{}", outgoing::summary(&result));

    result.into_result()?;
    Ok(())
}
