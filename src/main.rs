use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_assist::accounts::AccountStore;
use mail_assist::config::AppConfig;
use mail_assist::decoder::{AttachmentSpool, MessageDecoder};
use mail_assist::error::ConfigError;
use mail_assist::events::EventStore;
use mail_assist::mail::{ImapConnector, MailCredential};
use mail_assist::notify::LogNotifier;
use mail_assist::pipeline::{self, AssistantSettings, MailAssistant};
use mail_assist::vault::CredentialVault;

const USAGE: &str = "usage:
  mail-assist [run]
  mail-assist register <user_id> <login> [host] [port]   (password in MAIL_ASSIST_PASSWORD)
  mail-assist events <user_id> [days]";

enum Command {
    Run,
    Register {
        user_id: i64,
        login: String,
        host: Option<String>,
        port: Option<u16>,
    },
    Events {
        user_id: i64,
        days: u32,
    },
}

impl Command {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let arg = |i: usize| args.get(i).map(String::as_str);
        let user_id = |i: usize| -> anyhow::Result<i64> {
            arg(i)
                .context(USAGE)?
                .parse::<i64>()
                .with_context(|| format!("invalid user id\n{USAGE}"))
        };

        match arg(0) {
            None | Some("run") => Ok(Self::Run),
            Some("register") => Ok(Self::Register {
                user_id: user_id(1)?,
                login: arg(2).context(USAGE)?.to_string(),
                host: arg(3).map(str::to_string),
                port: arg(4)
                    .map(|p| p.parse::<u16>().with_context(|| format!("invalid port\n{USAGE}")))
                    .transpose()?,
            }),
            Some("events") => Ok(Self::Events {
                user_id: user_id(1)?,
                days: arg(2)
                    .map(|d| d.parse::<u32>().with_context(|| format!("invalid day count\n{USAGE}")))
                    .transpose()?
                    .unwrap_or(7),
            }),
            Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let vault = Arc::new(open_vault(&config)?);
    let accounts = AccountStore::load(&config.users_file, vault, &config.imap_host, config.imap_port);
    let events = EventStore::load(&config.events_file);
    let connector = Arc::new(ImapConnector::new(config.imap_timeout)?);
    let decoder = MessageDecoder::new(AttachmentSpool::new(&config.spool_dir));
    let assistant = MailAssistant::new(
        accounts,
        events,
        connector,
        decoder,
        Arc::new(LogNotifier),
        AssistantSettings::from(&config),
    );

    match command {
        Command::Run => run(assistant, &config).await,
        Command::Register {
            user_id,
            login,
            host,
            port,
        } => {
            let password = std::env::var("MAIL_ASSIST_PASSWORD").map_err(|_| ConfigError::MissingRequired {
                key: "MAIL_ASSIST_PASSWORD".into(),
                hint: "Set it to the mailbox password for this registration.".into(),
            })?;
            let credential = MailCredential {
                login,
                password: SecretString::from(password),
                server_host: host.unwrap_or_else(|| config.imap_host.clone()),
                server_port: port.unwrap_or(config.imap_port),
            };
            assistant.register_user(user_id, credential).await?;
            println!("Registered user {user_id}");
            Ok(())
        }
        Command::Events { user_id, days } => {
            let upcoming = assistant.upcoming(user_id, days).await;
            if upcoming.is_empty() {
                println!("No events in the next {days} days");
            }
            for item in upcoming {
                let mark = if item.event.reminder_sent { "*" } else { " " };
                println!(
                    "{mark} {} (in {}d)  {}",
                    item.event.date.format("%d.%m.%Y"),
                    item.days_left,
                    item.event.title
                );
            }
            Ok(())
        }
    }
}

/// Start both loops and wait for Ctrl-C.
async fn run(assistant: Arc<MailAssistant>, config: &AppConfig) -> anyhow::Result<()> {
    let users = assistant.accounts().len().await;
    eprintln!("📬 Mail Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Users: {users}");
    eprintln!("   Default server: {}:{}", config.imap_host, config.imap_port);
    eprintln!(
        "   Scan every {}s, reminders every {}s, retention {} days\n",
        config.check_interval.as_secs(),
        config.reminder_interval.as_secs(),
        config.retention_days
    );

    let pruned = assistant.prune().await;
    info!(pruned, "Startup retention pass done");

    let (scanner, scanner_stop) = pipeline::spawn_mail_scanner(Arc::clone(&assistant), config.check_interval);
    let (reminders, reminders_stop) =
        pipeline::spawn_reminder_loop(Arc::clone(&assistant), config.reminder_interval);

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested");

    for (handle, stop) in [(scanner, scanner_stop), (reminders, reminders_stop)] {
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.abort();
    }
    assistant.events().flush().await?;
    Ok(())
}

/// Use `MASTER_KEY`, or generate one and tell the operator to keep it.
fn open_vault(config: &AppConfig) -> anyhow::Result<CredentialVault> {
    if let Some(key) = &config.master_key {
        return CredentialVault::from_base64(key.expose_secret()).context("MASTER_KEY is not a valid vault key");
    }

    let key = CredentialVault::generate_key()?;
    eprintln!("⚠️  MASTER_KEY is not set. Generated a new one:");
    eprintln!("   MASTER_KEY={key}");
    eprintln!("   Add it to your .env; without it stored passwords cannot be decrypted after restart.\n");
    Ok(CredentialVault::from_base64(&key)?)
}

/// Console logging, plus a daily rolling file when a log dir is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
