//! holofeed_agent: host metrics over server-sent events.

use anyhow::Context;
use tracing::{error, info, warn};

use holofeed_agent::config::{AgentConfig, Invocation, USAGE};
use holofeed_agent::{logging, sensors, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match AgentConfig::load()? {
        Invocation::Help => {
            print!("{USAGE}");
            return Ok(());
        }
        Invocation::Run(config) => config,
    };
    logging::init();

    let commands = [
        (config.temp_enabled, &config.cpu_temp_command),
        (config.temp_enabled && config.gpu_enabled, &config.gpu_temp_command),
        (true, &config.cpu_freq_command),
    ];
    for (enabled, argv) in commands {
        let Some(program) = argv.as_ref().and_then(|a| a.first()) else {
            continue;
        };
        if enabled && !sensors::command_available(program) {
            warn!("{program} not found on PATH; its readings will use fallback values");
        }
    }

    let server = match Server::start(&config).await {
        Ok(server) => server,
        Err(e) => {
            if e.is_permission_denied() {
                error!(
                    "binding port {} needs elevated privileges; run as root or pass --port with a value >= 1024",
                    config.port
                );
            }
            return Err(e).context("starting metrics stream server");
        }
    };

    let host = hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    info!(
        "displays can subscribe at http://{host}:{}{}",
        server.local_addr().port(),
        config.stream_path
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    server.stop().await;
    Ok(())
}
