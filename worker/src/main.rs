use std::{env, io, sync::Arc};

use estimators::Catalog;
use log::{info, warn};
use tokio::{net::TcpListener, signal};

use worker::Worker;

const DEFAULT_HOST: &str = "127.0.0.1";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").map_err(io::Error::other)?,
    );

    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    let catalog = Arc::new(Catalog::new());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!("coordinator connected from {peer}");

                let (rx, tx) = stream.into_split();
                let (rx, tx) = comms::channel(rx, tx);
                let worker = Worker::new(Arc::clone(&catalog));

                tokio::spawn(async move {
                    if let Err(e) = worker.run(rx, tx).await {
                        warn!("session with {peer} ended: {e}");
                    }
                });
            }
            _ = signal::ctrl_c() => {
                info!("received SIGTERM");
                return Ok(());
            }
        }
    }
}
