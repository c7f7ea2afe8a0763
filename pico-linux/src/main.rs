// PicoConfig Linux host: serve configuration registers over a byte link, or run one request.

mod cli;
mod config;
mod link;
mod registers;
mod session;

use std::time::Instant;

use anyhow::Context;
use pico_core::{Engine, HandlerEntry, Id, Registry};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Command;
use crate::link::{FrameReader, LinkSender};
use crate::registers::ReplySlot;
use crate::session::TickClock;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let cmd = match cli::parse(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    if cmd == Command::Version {
        println!("pico-linux {}", VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cmd {
            Command::Serve => serve(&cfg).await,
            Command::Get { id } => request(&cfg, id, &[]).await,
            Command::Set { id, value } => request(&cfg, id, &value).await,
            Command::Version => Ok(()),
        }
    })
}

/// Open the link and spawn the writer task. Returns the engine transport and the frame reader.
async fn connect(
    cfg: &config::Config,
) -> anyhow::Result<(LinkSender, FrameReader<tokio::net::tcp::OwnedReadHalf>)> {
    let stream = TcpStream::connect(&cfg.link_addr)
        .await
        .with_context(|| format!("connecting to link {}", cfg.link_addr))?;
    stream.set_nodelay(true)?;
    info!(addr = %cfg.link_addr, "link connected");
    let (rd, wr) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = link::write_loop(wr, rx).await {
            warn!(error = %e, "link writer stopped");
        }
    });
    Ok((LinkSender::new(tx), FrameReader::new(rd)))
}

async fn serve(cfg: &config::Config) -> anyhow::Result<()> {
    let handlers = registers::registry(&cfg.registers)?;
    let (sender, mut reader) = connect(cfg).await?;
    let mut engine = Engine::with_handlers(cfg.engine_config(), sender, handlers);
    info!(registers = cfg.registers.len(), "serving");

    let mut interval = session::tick_interval(cfg.tick_ms);
    let mut clock = TickClock::starting_at(Instant::now());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            frame = reader.next_frame() => match frame? {
                Some(f) => engine.receive(&f),
                None => {
                    info!("link closed by peer");
                    return Ok(());
                }
            },
            _ = interval.tick() => engine.tick(clock.elapsed()),
            r = &mut shutdown => {
                info!("shutting down");
                return r;
            }
        }
    }
}

/// Send one request with response tracking and wait for its outcome.
async fn request(cfg: &config::Config, id: u8, value: &[u8]) -> anyhow::Result<()> {
    let slot = ReplySlot::default();
    let handlers = Registry::with_entries(vec![HandlerEntry::new(Id::new(id)?, slot.clone())]);
    let (sender, mut reader) = connect(cfg).await?;
    let mut engine = Engine::with_handlers(cfg.engine_config(), sender, handlers);

    engine.send_request(id, value, true)?;
    let (status, payload) =
        session::await_reply(&mut engine, &mut reader, &slot, cfg.tick_ms).await?;
    println!("{}", session::outcome(id, status, &payload)?);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
