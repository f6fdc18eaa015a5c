use std::path::PathBuf;

use reelfeed_lib::{FeedMode, ItemId, RunOptions};

fn parse_mode(raw: &str) -> FeedMode {
    match raw.split_once(':') {
        Some(("playlist", key)) => FeedMode::Playlist {
            key: Some(key.to_string()),
        },
        _ if raw == "playlist" => FeedMode::Playlist { key: None },
        _ if raw == "explore" => FeedMode::Explore,
        _ => FeedMode::Home,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let seed = std::env::args().nth(1).map(ItemId::from);
    let settings_path = std::env::var_os("REELFEED_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("reelfeed.json"));
    let mode = std::env::var("REELFEED_MODE")
        .map(|raw| parse_mode(&raw))
        .unwrap_or_default();

    reelfeed_lib::run(RunOptions {
        settings_path,
        mode,
        seed,
        token: std::env::var("REELFEED_TOKEN").ok(),
    })
    .await
}
