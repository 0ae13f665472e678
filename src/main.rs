//! CLI for SSMP
//!
//! Subcommands:
//! - `server`: run the broker with its TCP listener and, if configured, the
//!   WebSocket listener
//! - `client`: log in, subscribe, optionally publish and print what arrives
//!   (useful for smoke tests)

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use ssmp::broker::{Broker, BrokerHandle, BrokerPolicy};
use ssmp::client::SsmpClient;
use ssmp::config::load_config;
use ssmp::transport::{start_tcp_server, start_websocket_server};
use ssmp::utils::logging;

/// How long the client waits for further events before exiting.
const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "ssmp")]
enum Command {
    /// Start the broker
    Server {
        /// Interface to bind, overriding `server.host`
        #[arg(long)]
        host: Option<String>,
        /// TCP port, overriding `server.port`
        #[arg(long)]
        port: Option<u16>,
        /// Also serve WebSocket clients on this port
        #[arg(long)]
        ws_port: Option<u16>,
    },
    /// Run a one-shot client against a running broker
    Client {
        /// Address of the broker's TCP listener
        #[arg(long, default_value = "127.0.0.1:6380")]
        addr: String,
        #[arg(long)]
        identity: String,
        #[arg(long)]
        topic: String,
        /// Payload to publish once subscribed
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    match Command::parse() {
        Command::Server {
            host,
            port,
            ws_port,
        } => run_server(host, port, ws_port).await,
        Command::Client {
            addr,
            identity,
            topic,
            message,
        } => {
            logging::init("info");
            run_client(&addr, &identity, &topic, message.as_deref()).await
        }
    }
}

async fn run_server(
    host: Option<String>,
    port: Option<u16>,
    ws_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = load_config().context("failed to load configuration")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if ws_port.is_some() {
        config.server.ws_port = ws_port;
    }
    logging::init(&config.log.level);

    let policy = BrokerPolicy::from(&config.broker);
    info!(
        identity_policy = %policy.identity,
        empty_topic_policy = %policy.empty_topic,
        max_connections = policy.max_connections,
        "starting broker"
    );
    let broker = BrokerHandle::spawn(Broker::new(policy));

    let tcp_addr = config.server.tcp_addr();
    let ws_addr = config.server.ws_addr();
    let websocket = {
        let broker = broker.clone();
        async move {
            match ws_addr {
                Some(addr) => start_websocket_server(&addr, broker).await,
                None => std::future::pending().await,
            }
        }
    };

    tokio::select! {
        result = start_tcp_server(&tcp_addr, broker) => {
            result.context("TCP server failed")?;
            error!("TCP server exited unexpectedly.");
        }
        result = websocket => {
            result.context("WebSocket server failed")?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_client(
    addr: &str,
    identity: &str,
    topic: &str,
    message: Option<&str>,
) -> anyhow::Result<()> {
    let mut client = SsmpClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    client.login(identity).await.context("login failed")?;
    println!("Logged in as {identity}");
    client.subscribe(topic).await.context("subscribe failed")?;
    println!("Subscribed to {topic}");

    if let Some(payload) = message {
        client.publish(topic, payload).await.context("publish failed")?;
        println!("Published to {topic}");
    }

    while let Ok(event) = tokio::time::timeout(CLIENT_IDLE_TIMEOUT, client.next_event()).await {
        println!("Incoming: {}", event?);
    }

    client.logout().await.context("logout failed")?;
    Ok(())
}
