use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cytube_connector::catalog::INBOUND_FRAMES;
use cytube_connector::events::LIFECYCLE_EVENTS;
use cytube_connector::ws::WsTransportFactory;
use cytube_connector::{
    ConnectionState, Connector, ConnectorConfig, ConnectorError, EndpointSource, Event, FixedEndpoint,
    HttpResolver,
};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("usage: /<frame> <json payload>")]
    BadCommand,
}

#[derive(Parser, Debug)]
#[command(name = "cytube-cli", about = "Join a CyTube channel and stream its events as JSON lines")]
struct Cli {
    #[arg(long, env = "CYTUBE_CHANNEL")]
    channel: String,

    #[arg(long, env = "CYTUBE_HOST")]
    host: String,

    #[arg(long, env = "CYTUBE_PORT", default_value_t = 443)]
    port: u16,

    #[arg(long, env = "CYTUBE_USER")]
    user: String,

    #[arg(long, env = "CYTUBE_SECURE", default_value_t = true, action = clap::ArgAction::Set)]
    secure: bool,

    #[arg(long, env = "CYTUBE_PASSWORD")]
    password: Option<String>,

    #[arg(long, env = "CYTUBE_AUTH_TOKEN")]
    auth_token: Option<String>,

    #[arg(long, env = "CYTUBE_USER_AGENT")]
    user_agent: Option<String>,

    #[arg(long, env = "CYTUBE_LOOKUP_TIMEOUT_SECS", default_value_t = 20)]
    lookup_timeout_secs: u64,

    #[arg(long, env = "CYTUBE_HANDSHAKE_TIMEOUT_SECS", default_value_t = 60)]
    handshake_timeout_secs: u64,

    #[arg(long, help = "Skip endpoint discovery and connect to this URL")]
    endpoint: Option<String>,
}

impl Cli {
    fn config(&self) -> Result<ConnectorConfig, ConnectorError> {
        let mut config = ConnectorConfig::new(&self.channel, &self.host, self.port, &self.user)?
            .with_secure(self.secure)
            .with_lookup_timeout(Duration::from_secs(self.lookup_timeout_secs))
            .with_handshake_timeout(Duration::from_secs(self.handshake_timeout_secs));
        if let Some(password) = &self.password {
            config = config.with_password(password);
        }
        if let Some(token) = &self.auth_token {
            config = config.with_auth_token(token);
        }
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let endpoints: Arc<dyn EndpointSource> = match cli.endpoint {
        Some(url) => Arc::new(FixedEndpoint(url)),
        None => Arc::new(HttpResolver),
    };
    let transports = Arc::new(WsTransportFactory::new(config.user_agent()));
    let mut connector = Connector::with_collaborators(config, endpoints, transports);

    for name in LIFECYCLE_EVENTS.iter().chain(INBOUND_FRAMES) {
        connector.events().on(*name, print_event);
    }

    connector.connect().await;
    let result = run(&connector).await;
    connector.destroy().await;
    result
}

/// Forward stdin lines until EOF, Ctrl-C, or the session ends on its own.
async fn run(connector: &Connector) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                if let Err(e) = send_line(connector, line.trim()) {
                    tracing::warn!(error = %e, "line not sent");
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
            state = connector.wait_for_state(|s| matches!(s, ConnectionState::Failed | ConnectionState::Disconnected)) => {
                tracing::info!(?state, "session ended");
                return Ok(());
            }
        }
    }
}

/// Plain lines become chat messages; `/<frame> <json>` emits a raw frame.
fn send_line(connector: &Connector, line: &str) -> Result<(), CliError> {
    if line.is_empty() {
        return Ok(());
    }
    let Some(raw) = line.strip_prefix('/') else {
        connector.chat_msg(json!({ "msg": line, "meta": {} }))?;
        return Ok(());
    };

    let (name, payload) = match raw.split_once(' ') {
        Some((name, body)) => (name, serde_json::from_str::<Value>(body)?),
        None => (raw, Value::Null),
    };
    if name.is_empty() {
        return Err(CliError::BadCommand);
    }
    connector.emit(name, payload)?;
    Ok(())
}

fn print_event(event: &Event) {
    let line = json!({ "event": event.name(), "payload": event.payload() });
    println!("{line}");
}
