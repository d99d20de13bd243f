//! A Discord bot that chats in threads through an OpenAI-compatible
//! completion service.

#[macro_use]
extern crate tracing;

mod config;
mod discord;
mod handler;
mod liveness;

use relay_core::RelayBuilder;
use relay_openai_model::OpenAIProvider;
use serenity::Client;
use serenity::all::GatewayIntents;
use tokio::net::TcpListener;

use crate::config::Settings;
use crate::handler::Handler;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return;
        }
    };
    if settings.allowed_guilds.is_empty() {
        warn!("ALLOWED_SERVER_IDS is not set, serving every guild");
    }

    let listener = match TcpListener::bind(&settings.liveness_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot bind {}: {err}", settings.liveness_addr);
            return;
        }
    };
    tokio::spawn(async move {
        if let Err(err) = liveness::serve(listener).await {
            error!("liveness endpoint stopped: {err}");
        }
    });

    // Both services live behind the same endpoint and key.
    let provider = OpenAIProvider::new(settings.openai.clone());
    let relay = RelayBuilder::with_providers(provider.clone(), provider)
        .with_config(settings.bot.clone())
        .build();
    let handler = Handler::new(relay, &settings);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let client = Client::builder(&settings.discord_token, intents)
        .event_handler(handler)
        .await;
    let mut client = match client {
        Ok(client) => client,
        Err(err) => {
            eprintln!("cannot create the Discord client: {err}");
            return;
        }
    };

    if let Err(err) = client.start().await {
        error!("Discord client stopped: {err}");
    }
}
