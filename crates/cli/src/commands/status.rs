//! `chatdeck status`: show the effective configuration.

use chatdeck_chat::ReplyTable;
use chatdeck_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let replies = ReplyTable::from_config(&config.chat);

    println!("chatdeck status");
    println!("===============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Backend:      {}", config.store.backend);
    if config.store.backend == "sqlite" {
        println!("  Database:     {}", config.store.resolved_path().display());
    }
    println!("  Assistant:    {}", config.chat.assistant_name);
    println!(
        "  Delays:       welcome {}ms, thinking {}ms, streaming {}ms",
        config.chat.welcome_delay_ms, config.chat.thinking_delay_ms, config.chat.streaming_delay_ms
    );
    println!(
        "  Replies:      {} rules{}",
        replies.rules().len(),
        if config.chat.replies.is_empty() { " (built-in)" } else { "" }
    );
    println!("  Notices:      keep last {}", config.chat.max_notices);
    println!("  Logging:      {} at {}", config.logging.format, config.logging.level);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `chatdeck onboard` first");
    }

    Ok(())
}
