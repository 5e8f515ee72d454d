//! Basic shard connection example.
//!
//! Connects a single shard and prints a few event types.
//!
//! # Usage
//!
//! ```bash
//! DISCORD_TOKEN=your_bot_token cargo run --example basic_shard
//! ```

use osmium_gateway::{Client, Event, GatewayOptions, Shard};
use osmium_model::Intents;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let token = std::env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN not set");

    let options = GatewayOptions::new(
        token,
        Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::GUILD_MESSAGE_REACTIONS,
    );
    let (client, events) = Client::new(options);

    // Single shard, 0 of 1.
    let shard = Shard::new(0, 1, client);

    tokio::spawn(async move {
        while let Ok((shard_id, event)) = events.recv_async().await {
            match event {
                Event::ShardReady => {
                    info!(shard_id, "shard is ready");
                }
                Event::GuildCreate(guild) => {
                    info!("joined guild {} ({})", guild.name, guild.id);
                }
                Event::MessageCreate(message) => {
                    let author = message
                        .author
                        .as_ref()
                        .map(|user| user.display_name().to_owned())
                        .unwrap_or_else(|| "unknown".to_owned());
                    info!("[{}] {}: {}", message.channel_id, author, message.content);
                }
                Event::ShardError(error) => {
                    info!(shard_id, %error, "shard error");
                }
                _ => {}
            }
        }
    });

    info!("starting shard");
    shard.run().await?;

    Ok(())
}
