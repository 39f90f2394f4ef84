use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result, bail};
use clap::Parser;
use pusher_client::protocol::SUBSCRIPTION_ERROR;
use pusher_client::{
    ChannelEvent, ChannelKind, ClientConfig, ConnectionEventListener, ConnectionState,
    ConnectionStateChange, Pusher, TransportError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

mod ws_transport;

use ws_transport::WsTransport;

#[derive(Parser)]
#[command(name = "pusher-tail")]
#[command(about = "Print events from Pusher channels as they arrive")]
struct Args {
    /// Application key
    app_key: String,

    /// Channel to subscribe to (repeatable)
    #[arg(short, long = "channel", required = true)]
    channels: Vec<String>,

    /// Only print these events (repeatable; default: every event)
    #[arg(short, long = "event")]
    events: Vec<String>,

    /// TOML config file (PUSHER_* env vars override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cluster, e.g. "eu"
    #[arg(long)]
    cluster: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "pusher_tail=debug,pusher_client=debug,info"
    } else {
        "pusher_tail=info,pusher_client=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    if let Some(name) = args
        .channels
        .iter()
        .find(|name| ChannelKind::from_name(name).requires_auth())
    {
        bail!("{name} needs channel authorization, which pusher-tail does not provide");
    }

    let mut config = ClientConfig::load(args.config.as_deref()).context("loading config")?;
    if args.cluster.is_some() {
        config.cluster = args.cluster.clone();
    }

    let transport = WsTransport::new(
        config.endpoint_url(&args.app_key),
        config.activity_timeout(),
        config.pong_timeout(),
    )
    .context("creating websocket transport")?;

    let pusher = Arc::new(
        Pusher::builder(&args.app_key)
            .config(config)
            .build(Arc::new(transport))
            .context("creating client")?,
    );

    let shutdown = CancellationToken::new();
    let watcher = Arc::new(Watcher {
        pusher: Arc::downgrade(&pusher),
        channels: args.channels.clone(),
        events: args.events.clone(),
        json: args.json,
        subscribed: AtomicBool::new(false),
        shutdown: shutdown.clone(),
    });
    pusher
        .connect_with(
            Some(watcher),
            &[ConnectionState::Connected, ConnectionState::Disconnected],
        )
        .context("connecting")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            info!("interrupted");
        }
        () = shutdown.cancelled() => {}
    }

    pusher.disconnect();
    info!(metrics = ?pusher.metrics().snapshot(), "done");
    Ok(())
}

/// Subscribes once the first connection is up and stops the process when
/// the client gives up.
struct Watcher {
    pusher: Weak<Pusher>,
    channels: Vec<String>,
    events: Vec<String>,
    json: bool,
    subscribed: AtomicBool,
    shutdown: CancellationToken,
}

impl Watcher {
    fn subscribe_all(&self, pusher: &Pusher) {
        let json = self.json;
        let printer = Arc::new(move |event: &ChannelEvent| print_event(event, json));
        let events: Vec<&str> = self.events.iter().map(String::as_str).collect();

        for channel in &self.channels {
            if let Err(e) = pusher.subscribe(channel, Some(printer.clone()), &events) {
                error!(%channel, error = %e, "subscribe failed");
                continue;
            }
            let rejected = pusher.subscribe(
                channel,
                Some(Arc::new(|event: &ChannelEvent| {
                    warn!(channel = %event.channel, data = %event.data, "subscription rejected");
                })),
                &[SUBSCRIPTION_ERROR],
            );
            if let Err(e) = rejected {
                error!(%channel, error = %e, "binding subscription error listener failed");
            }
        }
    }
}

impl ConnectionEventListener for Watcher {
    fn on_connection_state_change(&self, change: &ConnectionStateChange) {
        match change.current {
            // Later reconnects resubscribe on their own.
            ConnectionState::Connected if !self.subscribed.swap(true, Ordering::SeqCst) => {
                if let Some(pusher) = self.pusher.upgrade() {
                    self.subscribe_all(&pusher);
                }
            }
            ConnectionState::Disconnected => {
                warn!("connection closed");
                self.shutdown.cancel();
            }
            _ => {}
        }
    }

    fn on_error(&self, message: &str, code: Option<i64>, cause: Option<&TransportError>) {
        match cause {
            Some(cause) => warn!(code = cause.error_code(), %message, "transport error"),
            None => warn!(?code, %message, "service error"),
        }
    }
}

fn print_event(event: &ChannelEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "failed to encode event"),
        }
    } else {
        println!("{} {} {}", event.channel, event.event, event.data);
    }
}
