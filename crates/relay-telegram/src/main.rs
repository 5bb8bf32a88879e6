//! Claude Relay binary.
//!
//! Start the bot with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx ALLOWED_USER_IDS=123 cargo run -p relay-telegram
//! ```

use clap::Parser;
use relay_core::{config, Settings};
use relay_telegram::TelegramBot;
use tracing_subscriber::EnvFilter;

/// Claude Relay - drive Claude Code from Telegram with approvals
#[derive(Parser, Debug)]
#[command(name = "claude-relay")]
#[command(about = "Telegram bot that runs Claude Code and asks before it acts")]
struct Args {
    /// Working directory for new chats (overrides CLAUDE_WORKING_DIR)
    #[arg(short = 'd', long, env = "CLAUDE_WORKING_DIR")]
    working_dir: Option<String>,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from config directory first
    let env_path = config::env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());

    let args = Args::parse();

    let filter = match args.verbose {
        0 => "relay_telegram=info,relay_agent=info,relay_gate=info,teloxide=warn",
        1 => "relay_telegram=debug,relay_agent=debug,relay_gate=debug,relay_stream=debug,teloxide=info",
        2 => "relay_telegram=trace,relay_agent=trace,relay_gate=trace,relay_stream=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config::ensure_all_dirs() {
        tracing::warn!(error = %e, "Failed to create all directories");
    }

    let mut settings = Settings::from_env()?;
    if let Some(dir) = args.working_dir.as_deref() {
        settings.working_dir = relay_core::settings::expand_path(dir);
    }
    let working_dir = settings.working_dir.clone();
    let claude_path = settings.claude_path.clone();

    let bot = TelegramBot::new(settings)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, "Bot initialized successfully");
            println!("\n[robot] Claude Relay");
            println!("   Bot: @{}", username);
            println!("   Claude: {}", claude_path.display());
            println!("   Working dir: {}", working_dir.display());
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    println!("\n[phone] Open Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    bot.start_polling().await?;

    Ok(())
}
