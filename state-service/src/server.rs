//! Accept loop and the dispatcher task that owns the store.
//!
//! Connections are half-duplex request/response: one frame in, one frame
//! out, FIFO per connection. Each connection task forwards requests to the
//! dispatcher over a channel and waits for the reply, so the store sees a
//! single serialized command stream and every transition is atomic without
//! locks.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use log::{info, warn};
use shared::logging::log_comm;
use shared::{read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::dispatch;
use crate::store::Store;

const MODULE: &str = "state";

type Request = (String, oneshot::Sender<String>);

/// Serves the command protocol until `shutdown` resolves, then returns the
/// store so the caller can write the snapshot.
pub async fn serve<F>(listener: TcpListener, mut store: Store, shutdown: F) -> Store
where
    F: Future<Output = ()>,
{
    let (request_tx, mut request_rx) = mpsc::channel::<Request>(64);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!("client connected: {}", peer);
                        let request_tx = request_tx.clone();
                        tokio::spawn(handle_connection(stream, peer, request_tx));
                    }
                    Err(err) => warn!("accept failed: {}", err),
                }
            }
            Some((request, reply_tx)) = request_rx.recv() => {
                let reply = dispatch(&mut store, &request);
                // A dropped receiver means the connection died mid-request;
                // the transition has still been applied.
                let _ = reply_tx.send(reply);
            }
            _ = &mut shutdown => break,
        }
    }
    store
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, requests: mpsc::Sender<Request>) {
    let peer_label = peer.to_string();
    loop {
        let request = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                info!("client disconnected: {}", peer);
                break;
            }
            Err(err) => {
                warn!("dropping client {}: {}", peer, err);
                break;
            }
        };
        log_comm(MODULE, "RX", &peer_label, &request);

        let (reply_tx, reply_rx) = oneshot::channel();
        if requests.send((request, reply_tx)).await.is_err() {
            break; // dispatcher is gone, the service is shutting down
        }
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => break,
        };

        log_comm(MODULE, "TX", &peer_label, &reply);
        if let Err(err) = write_frame(&mut stream, &reply).await {
            warn!("write to {} failed: {}", peer, err);
            break;
        }
    }
}
