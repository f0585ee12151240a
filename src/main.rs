use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use log::info;
use socket2::{Domain, Socket, Type};

use lotto_server::config::Config;
use lotto_server::coordinator::DrawCoordinator;
use lotto_server::store::CsvBetStore;
use lotto_server::{server, shutdown};

fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!(
        "action: config | result: success | port: {} | agencies: {} | backlog: {}",
        config.port, config.agencies, config.listen_backlog
    );

    let listener = bind(&config)?;

    let store = Arc::new(CsvBetStore::new(&config.bets_file));
    let coordinator = Arc::new(DrawCoordinator::new(
        config.agencies as usize,
        config.winning_number,
        store,
    ));
    let running = Arc::new(AtomicBool::new(true));

    shutdown::spawn(Arc::clone(&running), Arc::clone(&coordinator))
        .context("failed to register SIGTERM handler")?;

    server::run(listener, coordinator, running).context("server loop failed")?;

    Ok(())
}

/// Binds the listening socket with the configured backlog.
///
/// `std::net::TcpListener::bind` always listens with the platform
/// default backlog and gives no way to override it, so this goes
/// through `socket2` to bind, then `listen` with the configured value
/// explicitly, before converting back into a standard `TcpListener`.
fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    let address: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("invalid listen address")?;

    info!(
        "action: bind | result: in_progress | address: {address} | backlog: {}",
        config.listen_backlog
    );

    let socket = Socket::new(Domain::for_address(address), Type::STREAM, None)
        .context("failed to create socket")?;
    socket
        .set_reuse_address(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .bind(&address.into())
        .with_context(|| format!("failed to bind to {address}"))?;
    socket
        .listen(config.listen_backlog as i32)
        .context("failed to listen")?;

    Ok(socket.into())
}
