//! Queue server command.

use crate::config::Settings;
use crate::server;

pub async fn cmd_queue_serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    server::serve(settings, host, port).await
}
