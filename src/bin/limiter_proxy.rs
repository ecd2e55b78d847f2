use std::sync::Arc;
use anyhow::{Context, Result};
use packet_limiter::config::LimiterConfig;
use packet_limiter::servers::proxy::ProxyState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/limiter.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: limiter_proxy [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = LimiterConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    tracing::info!("[proxy] Packet sampling interval: {}s", config.interval);
    tracing::info!("[proxy] Max packet rate: {} packets/s", config.max_packet_rate);
    tracing::info!("[proxy] Upstream: {}", config.upstream_addr);

    let bind = config.listen_addr.clone();
    let state = Arc::new(ProxyState::new(config));

    ProxyState::run(state, &bind).await?;
    Ok(())
}
