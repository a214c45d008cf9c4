use clap::{Parser, Subcommand};
use gamewire::buffer::{FieldReader, TypedBuffer};
use gamewire::config::TransportConfig;
use gamewire::dispatcher::{ConsumerId, SubscriptionFlags};
use gamewire::end_point::EndPoint;
use gamewire::peer::{AdmitAllPeerRegistry, PeerId};
use gamewire::typed_message::{TypedConsumer, TypedMessage};
use gamewire::wire::{Priority, Sequence};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    mode: Mode,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// echoes every chat line back to its sender
    Server {
        addr: SocketAddr,
    },
    /// sends numbered chat lines to a server, ordered and with high priority
    Client {
        addr: SocketAddr,
        server: SocketAddr,

        #[clap(long, default_value_t = 10)]
        count: u16,

        #[clap(long, default_value = "hello")]
        text: String,
    },
}

#[derive(Debug, Clone)]
struct ChatLine {
    number: u16,
    text: Option<String>,
}

impl TypedMessage for ChatLine {
    const MESSAGE_TYPE: u8 = 1;

    fn write(&self, buf: &mut TypedBuffer) {
        buf.write_u16(self.number);
        buf.write_string(self.text.as_deref().unwrap_or(""));
    }

    fn read(reader: &mut impl FieldReader) -> Self {
        ChatLine {
            number: reader.read_u16(),
            text: reader.read_string(),
        }
    }
}

/// hands received lines to an async task, so that consumers never block the receive loop
async fn subscribe_lines(end_point: &EndPoint) -> mpsc::UnboundedReceiver<(PeerId, ChatLine)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let consumer = TypedConsumer::new(ConsumerId(1), move |peer, line: ChatLine| {
        let _ = sender.send((peer, line));
    });
    end_point.subscribe(ChatLine::MESSAGE_TYPE, Arc::new(consumer), SubscriptionFlags::empty()).await;
    receiver
}

async fn run_server(addr: SocketAddr) -> anyhow::Result<()> {
    let end_point = EndPoint::bind(TransportConfig::default_ipv4(addr), Arc::new(AdmitAllPeerRegistry::new())).await?;
    let mut lines = subscribe_lines(&end_point).await;

    end_point.spawn_recv_loop();
    end_point.spawn_timer_loop();

    while let Some((peer, line)) = lines.recv().await {
        info!("{:?}: #{} {:?}", peer, line.number, line.text);
        let sequence = end_point.next_sequence(peer).await?;
        if let Err(e) = end_point.send_typed(peer, Priority::High, sequence, &line).await {
            warn!("could not echo to {:?}: {}", peer, e);
        }
    }
    Ok(())
}

async fn run_client(addr: SocketAddr, server: SocketAddr, count: u16, text: String) -> anyhow::Result<()> {
    let peers = Arc::new(AdmitAllPeerRegistry::new());
    let server_peer = peers.register(server);

    let end_point = EndPoint::bind(TransportConfig::default_ipv4(addr), peers).await?;
    let mut lines = subscribe_lines(&end_point).await;

    end_point.spawn_recv_loop();
    end_point.spawn_timer_loop();

    for number in 0..count {
        let sequence = end_point.next_sequence(server_peer).await?;
        let line = ChatLine { number, text: Some(text.clone()) };
        end_point.send_typed(server_peer, Priority::High, sequence, &line).await?;
    }

    for _ in 0..count {
        match tokio::time::timeout(Duration::from_secs(5), lines.recv()).await {
            Ok(Some((_, line))) => info!("echo #{} {:?}", line.number, line.text),
            _ => {
                warn!("no more echoes");
                break;
            }
        }
    }

    if let Some(stats) = end_point.connection_stats(server_peer).await {
        info!("{:?}", stats);
    }
    end_point.shutdown();
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    match args.mode {
        Mode::Server { addr } => run_server(addr).await,
        Mode::Client { addr, server, count, text } => run_client(addr, server, count, text).await,
    }
}
