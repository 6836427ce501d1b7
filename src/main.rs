//! Binary entrypoint for the meshlink CLI.
//!
//! Commands:
//! - `watch [--port <path>] [--json]` - connect to a radio and stream link
//!   events to stdout (JSON lines with `--json`)
//! - `send --port <path> [--dest <node>] <text>` - connect, wait for the
//!   link to become ready, send one text message, and exit
//! - `init` - create a starter `config.toml`
//!
//! See the library crate docs for module-level details: `meshlink::`.
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshlink::config::Config;
use meshlink::link::{LinkEvent, LinkSession, LinkState};

#[derive(Parser)]
#[command(name = "meshlink")]
#[command(about = "Radio-link protocol engine for Meshtastic-compatible radios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a radio and stream link events
    Watch {
        /// Serial device port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Emit events as JSON lines instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Send one text message and exit
    Send {
        /// Serial device port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Destination node (decimal or 0xHEX); omit to broadcast
        #[arg(short, long)]
        dest: Option<String>,

        /// Channel index (0 = primary); overrides the config
        #[arg(long)]
        channel: Option<u32>,

        /// Seconds to wait for the link to become ready
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,

        /// Message text
        text: String,
    },
    /// Create a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    if !matches!(cli.command, Commands::Init) {
        init_logging(&pre_config, cli.verbose);
    }

    match cli.command {
        Commands::Watch { port, json } => {
            let config = pre_config.unwrap_or_default();
            watch(config, port, json).await
        }
        Commands::Send {
            port,
            dest,
            channel,
            timeout,
            text,
        } => {
            let config = pre_config.unwrap_or_default();
            let dest = dest.map(|d| parse_node_id(&d)).transpose()?;
            send(config, port, dest, channel, timeout, &text).await
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Wrote starter configuration to {}", cli.config);
            Ok(())
        }
    }
}

/// Accepts `0xHEX` or decimal node numbers.
fn parse_node_id(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).map_err(|_| anyhow!("invalid node id: {}", input));
    }
    trimmed
        .parse::<u32>()
        .map_err(|_| anyhow!("invalid node id: {}", input))
}

fn open_session(
    config: &Config,
    port_override: Option<String>,
) -> Result<(LinkSession, tokio::sync::mpsc::UnboundedReceiver<LinkEvent>)> {
    let port = port_override.unwrap_or_else(|| config.link.port.clone());
    if port.is_empty() {
        bail!("no serial port configured; pass --port or set link.port in the config");
    }
    #[cfg(feature = "serial")]
    {
        use meshlink::link::transport::SerialOpener;
        let (mut session, events) = LinkSession::new(config.timing.session_timing());
        session.choose_port(Box::new(SerialOpener::new(&port, config.link.baud_rate)))?;
        session.connect()?;
        Ok((session, events))
    }

    #[cfg(not(feature = "serial"))]
    {
        bail!("serial support not compiled in; rebuild with the `serial` feature");
    }
}

async fn watch(config: Config, port: Option<String>, json: bool) -> Result<()> {
    let (mut session, mut events) = open_session(&config, port)?;
    info!("Watching link events (ctrl-c to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&session, &event, json),
                None => break,
            }
        }
    }
    session.disconnect().await;
    let stats = meshlink::metrics::snapshot();
    info!(
        "Link stats: {} frames decoded, {} dropped, {} text lines, {} chats ({} binary / {} ascii), {} duplicates suppressed, {} reconnect attempts, {} heartbeats",
        stats.frames_decoded,
        stats.frames_dropped,
        stats.text_lines,
        stats.chat_binary + stats.chat_ascii,
        stats.chat_binary,
        stats.chat_ascii,
        stats.dedup_suppressed,
        stats.reconnect_attempts,
        stats.heartbeats_sent
    );
    Ok(())
}

fn print_event(session: &LinkSession, event: &LinkEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Could not serialize event: {}", e),
        }
        return;
    }
    match event {
        LinkEvent::ConnectionStateChanged { state } => println!("link: {:?}", state),
        LinkEvent::NodeUpdated { node } => {
            let pos = node
                .position
                .map(|p| format!(" @ {:.5},{:.5}", p.latitude_deg(), p.longitude_deg()))
                .unwrap_or_default();
            println!("node 0x{:08x} {}{}", node.node_num, node.display_name(), pos);
        }
        LinkEvent::ChatReceived { message } => {
            let thread = match message.thread(session.my_node_num()) {
                meshlink::link::ChatThread::Public => "public".to_string(),
                meshlink::link::ChatThread::Direct(peer) => format!("dm 0x{:08x}", peer),
            };
            println!("[{}] <0x{:08x}> {}", thread, message.from, message.text);
        }
        LinkEvent::SyncProgress { done, total } => println!("sync: {}/{}", done, total),
        LinkEvent::SyncComplete => println!("sync: complete"),
        LinkEvent::SyncTimeout => println!("sync: timed out"),
    }
}

async fn send(
    config: Config,
    port: Option<String>,
    dest: Option<u32>,
    channel: Option<u32>,
    timeout_secs: u64,
    text: &str,
) -> Result<()> {
    let channel = channel.unwrap_or(config.link.channel);
    let (mut session, mut events) = open_session(&config, port)?;

    // Wait out the handshake; commands are rejected until Ready.
    let deadline = tokio::time::Duration::from_secs(timeout_secs);
    let ready = tokio::time::timeout(deadline, async {
        while let Some(event) = events.recv().await {
            if matches!(
                event,
                LinkEvent::ConnectionStateChanged {
                    state: LinkState::Ready
                }
            ) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    if !ready {
        session.disconnect().await;
        bail!("link did not become ready within {}s", timeout_secs);
    }

    session.send_text(dest, channel, text)?;
    match dest {
        Some(node) => info!("Queued direct message to 0x{:08x}", node),
        None => info!("Queued broadcast on channel {}", channel),
    }
    // Give the writer a moment to flush before tearing down.
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    session.disconnect().await;
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    builder.format(|fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
    });
    if !atty::is(atty::Stream::Stderr) {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    if let Some(file) = config.as_ref().and_then(|c| c.logging.file.clone()) {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            Ok(f) => {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
            Err(e) => eprintln!("could not open log file {}: {}", file, e),
        }
    }
    let _ = builder.try_init();
}
