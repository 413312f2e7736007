use std::future::Future;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

use crate::aof::Aof;
use crate::commands::executable::Executable;
use crate::commands::Command;
use crate::config::Config;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Runs the server until Ctrl-C is received.
pub async fn run(config: Config) -> Result<(), Error> {
    run_until(config, async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for the shutdown signal");
        }
    })
    .await
}

/// Runs the server until `shutdown` completes, then closes the append-only log.
///
/// The store is rebuilt from the log before the listener is bound. A log that can't be fully
/// replayed aborts startup.
pub async fn run_until(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let store = Store::new();
    let aof = Aof::open(&config.aof)?;

    match restore(&store, &aof) {
        Ok(count) => info!(commands = count, path = %aof.path().display(), "restored store"),
        Err(e) => {
            error!(error = %e, "failed to restore store from the append-only log");
            aof.close().await?;
            return Err(e);
        }
    }

    let res = serve(&config, &store, &aof, shutdown).await;

    aof.close().await?;
    res
}

async fn serve(
    config: &Config,
    store: &Store,
    aof: &Aof,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;

    info!("Redis server listening on {}", listener.local_addr()?);

    tokio::pin!(shutdown);

    loop {
        let (socket, client_address) = tokio::select! {
            res = listener.accept() => res?,
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        };

        info!("Accepted connection from {:?}", client_address);

        let conn = Connection::new(socket, client_address);
        let store = store.clone();
        let aof = aof.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(conn, store, aof).await {
                error!(error = %e, "connection error");
            }
        });
    }
}

/// Replays every record of `aof` into `store`, going through the same commands live traffic
/// does, except that nothing is appended back to the log. Returns how many commands ran.
pub fn restore(store: &Store, aof: &Aof) -> Result<usize, Error> {
    let mut count = 0;

    for record in aof.replay()? {
        let frame = record?;

        match Command::try_from(frame) {
            Ok(cmd) => {
                cmd.exec(store.clone())?;
                count += 1;
            }
            Err(e) => warn!(error = %e, "skipping unknown record in append-only log"),
        }
    }

    Ok(count)
}

#[instrument(
    name = "connection",
    skip(conn, store, aof),
    fields(connection_id = %conn.id, client_address = %conn.client_address)
)]
async fn handle_connection(mut conn: Connection, store: Store, aof: Aof) -> Result<(), Error> {
    while let Some(frame) = conn.read_frame().await? {
        debug!("Received frame from client: {}", frame);
        let res = dispatch(frame, &store, &aof)?;
        debug!("Sending response to client: {}", res);

        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}

/// Runs one request and returns its reply. Write commands are appended to the log first.
pub fn dispatch(frame: Frame, store: &Store, aof: &Aof) -> Result<Frame, Error> {
    let request = frame.clone();

    let cmd = match Command::try_from(frame) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(error = %e, "rejected request");
            return Ok(e.reply());
        }
    };

    // A failed append costs durability only, the command still runs.
    if cmd.is_write() {
        if let Err(e) = aof.append(&request) {
            error!(error = %e, command = cmd.as_ref(), "failed to append command to the log");
        }
    }

    cmd.exec(store.clone())
}
