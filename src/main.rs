//! mqtt-session - command line entry point
//!
//! The default `run` command connects to the public test broker over TLS,
//! publishes one JSON message, subscribes to the same topic and prints every
//! received message until five have arrived or Ctrl-C is pressed.

use clap::{Args, Parser, Subcommand};
use mqtt_session::config::SessionConfig;
use mqtt_session::observability::logging::{parse_level, LogFormat};
use mqtt_session::observability::{init_default_logging, init_logging};
use mqtt_session::transport::mqtt::RumqttcTransport;
use mqtt_session::{ProtocolVersion, QoS, SessionManager};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Client identifier used when neither the config file nor `--client-id` sets one
const DEFAULT_CLI_CLIENT_ID: &str = "mqtt-client-ios-simulator";

const DEFAULT_TOPIC: &str = "home/kitchen/light";

/// Resilient MQTT session client
#[derive(Parser)]
#[command(name = "mqtt-session")]
#[command(about = "Publish to and subscribe from an MQTT broker with automatic reconnection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides applied on top of the configuration file
#[derive(Args)]
struct BrokerArgs {
    /// Broker URL, e.g. mqtts://test.mosquitto.org:8886
    #[arg(long, value_name = "URL", global = true)]
    broker: Option<String>,

    /// Broker host name
    #[arg(long, global = true)]
    host: Option<String>,

    /// Broker port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// MQTT client identifier
    #[arg(long, global = true)]
    client_id: Option<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true, env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// MQTT protocol version
    #[arg(long, value_enum, global = true)]
    protocol: Option<ProtocolVersion>,

    /// Connect over plain TCP
    #[arg(long, global = true)]
    no_tls: bool,

    /// Skip broker certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message, then print received messages on the same topic
    Run {
        #[arg(short, long, default_value = DEFAULT_TOPIC)]
        topic: String,

        /// Payload to publish (defaults to a small JSON document)
        #[arg(short, long)]
        message: Option<String>,

        #[arg(long, default_value = "2", value_parser = parse_qos)]
        qos: QoS,

        #[arg(long)]
        retain: bool,

        /// Stop after this many received messages
        #[arg(long, default_value_t = 5)]
        max_messages: usize,
    },
    /// Publish a single message and exit
    Publish {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long)]
        message: String,

        #[arg(long, default_value = "0", value_parser = parse_qos)]
        qos: QoS,

        #[arg(long)]
        retain: bool,
    },
    /// Print messages received on one or more topic filters
    Subscribe {
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,

        #[arg(long, default_value = "2", value_parser = parse_qos)]
        qos: QoS,

        /// Stop after this many messages (0 = until Ctrl-C)
        #[arg(long, default_value_t = 0)]
        max_messages: usize,
    },
    /// Validate the configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_cli_logging(cli.verbose);

    let config = match load_configuration(&cli.config, &cli.broker) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let command = cli.command.unwrap_or(Commands::Run {
        topic: DEFAULT_TOPIC.to_string(),
        message: None,
        qos: QoS::ExactlyOnce,
        retain: false,
        max_messages: 5,
    });

    let result = match command {
        Commands::Run {
            topic,
            message,
            qos,
            retain,
            max_messages,
        } => run_demo(config, topic, message, qos, retain, max_messages).await,
        Commands::Publish {
            topic,
            message,
            qos,
            retain,
        } => publish_once(config, topic, message, qos, retain).await,
        Commands::Subscribe {
            topics,
            qos,
            max_messages,
        } => subscribe_and_print(config, topics, qos, max_messages).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn init_cli_logging(verbose: u8) {
    let level = match verbose {
        0 => {
            init_default_logging();
            return;
        }
        1 => "DEBUG",
        _ => "TRACE",
    };
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    init_logging(parse_level(level), LogFormat::parse(&format), false);
}

fn parse_qos(s: &str) -> Result<QoS, String> {
    let level: u8 = s
        .parse()
        .map_err(|_| format!("{s:?} is not a QoS level"))?;
    QoS::try_from(level).map_err(|e| e.to_string())
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    overrides: &BrokerArgs,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            SessionConfig::load_from_file(path)?
        }
        None => {
            let default_paths = ["mqtt-session.toml", "config/mqtt-session.toml"];

            match default_paths.iter().map(PathBuf::from).find(|p| p.exists()) {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    SessionConfig::load_from_file(&path)?
                }
                None => {
                    let mut config = SessionConfig::default();
                    config.broker.client_id = DEFAULT_CLI_CLIENT_ID.to_string();
                    config
                }
            }
        }
    };

    apply_overrides(&mut config, overrides)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(
    config: &mut SessionConfig,
    overrides: &BrokerArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(url) = &overrides.broker {
        config.apply_broker_url(url)?;
    }
    if let Some(host) = &overrides.host {
        config.broker.host = host.clone();
    }
    if let Some(port) = overrides.port {
        config.broker.port = port;
    }
    if let Some(client_id) = &overrides.client_id {
        config.broker.client_id = client_id.clone();
    }
    if let Some(username) = &overrides.username {
        config.broker.username = Some(username.clone());
    }
    if let Some(password) = &overrides.password {
        config.broker.password = Some(password.clone());
    }
    if let Some(protocol) = overrides.protocol {
        config.broker.protocol = protocol;
    }
    if overrides.no_tls {
        config.tls.enabled = false;
    }
    if overrides.insecure {
        warn!("Broker certificate verification disabled");
        config.tls.verify_certificate = false;
    }
    Ok(())
}

fn build_session(config: SessionConfig) -> SessionManager<RumqttcTransport> {
    let transport = Arc::new(RumqttcTransport::new(config.clone()));
    SessionManager::new(config, transport)
}

fn default_payload() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&serde_json::json!({
        "msg": "Published from the simulator"
    }))
}

/// Register a handler that prints every message with a running count
///
/// `done` is notified once `max_messages` have been printed; 0 never notifies.
fn register_printer(
    session: &SessionManager<RumqttcTransport>,
    max_messages: usize,
    done: Arc<Notify>,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = Arc::new(AtomicUsize::new(0));
    session.on_message("printer", "#", move |msg| {
        let n = count.fetch_add(1, Ordering::SeqCst) + 1;
        println!("{}: {}", n, msg.payload);
        if max_messages > 0 && n >= max_messages {
            done.notify_one();
        }
        Ok(())
    })?;
    Ok(())
}

async fn wait_until_done(done: &Notify) {
    tokio::select! {
        _ = done.notified() => info!("Received enough messages, shutting down"),
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
    }
}

async fn run_demo(
    config: SessionConfig,
    topic: String,
    message: Option<String>,
    qos: QoS,
    retain: bool,
    max_messages: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = match message {
        Some(message) => message,
        None => default_payload()?,
    };

    let session = build_session(config);
    let done = Arc::new(Notify::new());
    register_printer(&session, max_messages, done.clone())?;

    session.connect().await?;

    // A failed publish is reported but does not stop the demo
    if let Err(e) = session.publish_str(&topic, &payload, qos, retain).await {
        warn!(topic = %topic, error = %e, "Failed to publish");
    }

    if let Err(e) = session.subscribe(&[topic.as_str()], qos).await {
        session.shutdown().await;
        return Err(e.into());
    }

    wait_until_done(&done).await;
    session.shutdown().await;

    info!(stats = %serde_json::to_string(&session.stats())?, "Session finished");
    println!("Done!");
    Ok(())
}

async fn publish_once(
    config: SessionConfig,
    topic: String,
    message: String,
    qos: QoS,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(config);
    session.connect().await?;

    let result = session.publish_str(&topic, &message, qos, retain).await;
    session.shutdown().await;
    result?;

    info!(topic = %topic, qos = %qos, "Message published");
    Ok(())
}

async fn subscribe_and_print(
    config: SessionConfig,
    topics: Vec<String>,
    qos: QoS,
    max_messages: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = build_session(config);
    let done = Arc::new(Notify::new());
    register_printer(&session, max_messages, done.clone())?;

    session.connect().await?;
    if let Err(e) = session.subscribe(&topics, qos).await {
        session.shutdown().await;
        return Err(e.into());
    }

    wait_until_done(&done).await;
    session.shutdown().await;
    println!("Done!");
    Ok(())
}

fn handle_config_command(
    config: &SessionConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qos() {
        assert_eq!(parse_qos("0"), Ok(QoS::AtMostOnce));
        assert_eq!(parse_qos("2"), Ok(QoS::ExactlyOnce));
        assert!(parse_qos("3").is_err());
        assert!(parse_qos("high").is_err());
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["mqtt-session"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from(["mqtt-session", "run", "--qos", "1", "--max-messages", "3"]);
        match cli.command {
            Some(Commands::Run {
                topic,
                message,
                qos,
                max_messages,
                ..
            }) => {
                assert_eq!(topic, DEFAULT_TOPIC);
                assert!(message.is_none());
                assert_eq!(qos, QoS::AtLeastOnce);
                assert_eq!(max_messages, 3);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let cli = Cli::parse_from([
            "mqtt-session",
            "--broker",
            "mqtt://localhost",
            "--client-id",
            "tester",
            "--protocol",
            "v311",
            "config",
        ]);
        let mut config = SessionConfig::default();

        apply_overrides(&mut config, &cli.broker).unwrap();

        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.client_id, "tester");
        assert_eq!(config.broker.protocol, ProtocolVersion::V311);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_default_payload_is_json() {
        let payload = default_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["msg"], "Published from the simulator");
    }
}
