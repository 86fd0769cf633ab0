//! State-service client.
//!
//! The lobby holds exactly one framed connection to the state service and
//! many logical callers share it. A dedicated task owns the socket; callers
//! send `(request, reply-channel)` pairs and await the reply. The channel
//! serializes requests, so two callers can never interleave frames, and
//! request/response pairing is preserved without any lock at the call sites.
//!
//! Failure semantics: a transport error on a request is reported to that
//! caller as [`DbError::Transport`] and kills the owning task; every later
//! request fails with [`DbError::ConnectionClosed`]. The lobby treats both
//! as fatal: `ERR db` goes to the client whose request observed the
//! failure, and the service exits rather than answering `ERR db` forever.

use std::io;
use std::net::SocketAddr;

use log::error;
use shared::logging::log_comm;
use shared::{read_frame, write_frame};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

const MODULE: &str = "lobby";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("state service connection closed")]
    ConnectionClosed,
    #[error("state service request failed: {0}")]
    Transport(#[from] io::Error),
}

type Pending = (String, oneshot::Sender<Result<String, DbError>>);

/// Cheap-to-clone handle to the connection-owning task.
#[derive(Clone)]
pub struct DbClient {
    requests: mpsc::Sender<Pending>,
}

impl DbClient {
    /// Takes ownership of an established state-service connection.
    pub fn new(stream: TcpStream, peer: String) -> Self {
        let (requests, inbox) = mpsc::channel(64);
        tokio::spawn(run_owner(stream, peer, inbox));
        DbClient { requests }
    }

    /// Sends one command and awaits its reply.
    pub async fn request(&self, command: impl Into<String>) -> Result<String, DbError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send((command.into(), reply_tx))
            .await
            .map_err(|_| DbError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| DbError::ConnectionClosed)?
    }

    /// Resolves once the owning task has exited, i.e. the link is dead.
    /// The lobby dispatcher selects on this so a state service that goes
    /// away is noticed even while no request is in flight.
    pub async fn closed(&self) {
        self.requests.closed().await;
    }
}

async fn run_owner(stream: TcpStream, peer: String, mut inbox: mpsc::Receiver<Pending>) {
    let (mut read_half, mut write_half) = stream.into_split();
    loop {
        tokio::select! {
            request = inbox.recv() => {
                let Some((command, reply_tx)) = request else { return };
                log_comm(MODULE, "TX", &peer, &command);
                if let Err(err) = write_frame(&mut write_half, &command).await {
                    error!("state service link to {} failed: {}", peer, err);
                    let _ = reply_tx.send(Err(DbError::Transport(err)));
                    return;
                }
                match read_frame(&mut read_half).await {
                    Ok(reply) => {
                        log_comm(MODULE, "RX", &peer, &reply);
                        let _ = reply_tx.send(Ok(reply));
                    }
                    Err(err) => {
                        error!("state service link to {} failed: {}", peer, err);
                        let _ = reply_tx.send(Err(DbError::Transport(err)));
                        return;
                    }
                }
            }
            // Watch the link while idle. The protocol is strictly
            // request/response, so anything read here is either noise or
            // the peer hanging up.
            watched = read_frame(&mut read_half) => {
                match watched {
                    Ok(frame) => {
                        log_comm(MODULE, "RX", &peer, &frame);
                        error!("unsolicited frame from {}", peer);
                    }
                    Err(err) => {
                        error!("state service link to {} closed: {}", peer, err);
                        return;
                    }
                }
            }
        }
    }
}

/// One command over a fresh connection. Used by a match runtime that runs
/// without a lobby and therefore has no shared connection to borrow.
pub async fn oneshot_request(addr: SocketAddr, command: &str) -> io::Result<String> {
    let peer = format!("db:{}", addr);
    let mut stream = TcpStream::connect(addr).await?;
    log_comm(MODULE, "TX", &peer, command);
    write_frame(&mut stream, command).await?;
    let reply = read_frame(&mut stream).await?;
    log_comm(MODULE, "RX", &peer, &reply);
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Echo peer speaking the framed protocol.
    async fn spawn_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(body) = read_frame(&mut stream).await {
                let reply = format!("OK echo={}", body.split_whitespace().count());
                if write_frame(&mut stream, &reply).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn requests_are_paired_with_replies() {
        let addr = spawn_echo().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let db = DbClient::new(stream, format!("db:{}", addr));

        assert_eq!(db.request("User listOnline").await.unwrap(), "OK echo=2");
        assert_eq!(db.request("Room get roomId=1").await.unwrap(), "OK echo=3");
    }

    #[tokio::test]
    async fn concurrent_callers_share_the_connection() {
        let addr = spawn_echo().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let db = DbClient::new(stream, format!("db:{}", addr));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            tasks.push(tokio::spawn(async move {
                db.request("a b c").await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "OK echo=3");
        }
    }

    #[tokio::test]
    async fn dead_link_fails_all_later_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and immediately hang up.
            let _ = listener.accept().await;
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let db = DbClient::new(stream, format!("db:{}", addr));

        let first = db.request("User listOnline").await;
        assert!(first.is_err());
        match db.request("User listOnline").await {
            Err(DbError::ConnectionClosed) | Err(DbError::Transport(_)) => {}
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
