//! TCP knock listener.
//!
//! Binds one listening socket per knock port. Every port gets its own accept
//! task; all of them feed a single FIFO channel, so the consumer sees knocks
//! in the order they were accepted.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::KnockEvent;
use crate::error::{Error, Result};
use crate::ports::KnockSource;

/// Pause after a failed accept (e.g. descriptor exhaustion) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Passive listener over every knock port.
pub struct TcpKnockListener {
    /// Bound ports, in the order they were requested.
    ports: Vec<u16>,
    events: mpsc::UnboundedReceiver<KnockEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpKnockListener {
    /// Bind every port on `address` and start accepting.
    ///
    /// Fails on the first port that cannot be bound; sockets already bound by
    /// this call are released.
    pub async fn open(address: IpAddr, ports: &[u16]) -> Result<Self> {
        let mut listeners = Vec::with_capacity(ports.len());
        for &port in ports {
            let listener = TcpListener::bind(SocketAddr::new(address, port))
                .await
                .map_err(|source| Error::Bind { port, source })?;
            let bound = listener
                .local_addr()
                .map_err(|source| Error::Bind { port, source })?
                .port();
            debug!(port = bound, "Knock port bound");
            listeners.push((bound, listener));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let ports = listeners.iter().map(|(port, _)| *port).collect();
        let tasks = listeners
            .into_iter()
            .map(|(port, listener)| tokio::spawn(accept_loop(port, listener, tx.clone())))
            .collect();

        Ok(Self {
            ports,
            events: rx,
            tasks: Mutex::new(tasks),
        })
    }

    /// Ports actually bound (resolves port 0 to the assigned port).
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

impl KnockSource for TcpKnockListener {
    async fn poll(&mut self, timeout: Duration) -> Vec<KnockEvent> {
        let mut batch = Vec::new();

        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => batch.push(event),
            Ok(None) => {
                // Every accept task is gone; keep the caller's cadence.
                tokio::time::sleep(timeout).await;
                return batch;
            }
            Err(_) => return batch,
        }

        while let Ok(event) = self.events.try_recv() {
            batch.push(event);
        }
        batch
    }

    fn close(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!(ports = ?self.ports, "Knock listener closed");
    }
}

impl Drop for TcpKnockListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// One accept step of a knock port: wait for a connection, drop it and
/// report the peer.
trait Acceptor: Send + Sync + 'static {
    fn accept_peer(&self) -> impl Future<Output = io::Result<SocketAddr>> + Send;
}

impl Acceptor for TcpListener {
    async fn accept_peer(&self) -> io::Result<SocketAddr> {
        // Only the port and the source matter; nothing is read or written.
        let (_stream, peer) = self.accept().await?;
        Ok(peer)
    }
}

async fn accept_loop<A: Acceptor>(
    port: u16,
    listener: A,
    events: mpsc::UnboundedSender<KnockEvent>,
) {
    loop {
        match listener.accept_peer().await {
            Ok(peer) => {
                let event = KnockEvent::new(port, peer.ip().to_canonical(), Instant::now());
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(port = port, error = %e, "Failed to accept knock connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use tokio::net::TcpStream;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_open_binds_every_port() {
        let listener = TcpKnockListener::open(LOCALHOST, &[0, 0, 0]).await.unwrap();
        assert_eq!(listener.ports().len(), 3);
        assert!(listener.ports().iter().all(|&p| p != 0));
    }

    #[tokio::test]
    async fn test_poll_reports_knock_port_and_source() {
        let mut listener = TcpKnockListener::open(LOCALHOST, &[0, 0]).await.unwrap();
        let ports = listener.ports().to_vec();

        TcpStream::connect((LOCALHOST, ports[1])).await.unwrap();
        let batch = listener.poll(WAIT).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].port, ports[1]);
        assert_eq!(batch[0].source, LOCALHOST);

        TcpStream::connect((LOCALHOST, ports[0])).await.unwrap();
        let batch = listener.poll(WAIT).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].port, ports[0]);
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let mut listener = TcpKnockListener::open(LOCALHOST, &[0]).await.unwrap();
        let batch = listener.poll(Duration::from_millis(20)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_names_port() {
        let taken = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = TcpKnockListener::open(LOCALHOST, &[0, port]).await;
        match result {
            Err(Error::Bind { port: failed, .. }) => assert_eq!(failed, port),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bind should have failed"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut listener = TcpKnockListener::open(LOCALHOST, &[0]).await.unwrap();
        let port = listener.ports()[0];

        listener.close();
        listener.close();

        let batch = listener.poll(Duration::from_millis(50)).await;
        assert!(batch.is_empty());

        // The endpoint has been released.
        TcpListener::bind((LOCALHOST, port)).await.unwrap();
    }

    /// Acceptor replaying scripted results, then waiting forever.
    struct ScriptedAcceptor {
        script: Mutex<VecDeque<io::Result<SocketAddr>>>,
    }

    impl Acceptor for ScriptedAcceptor {
        async fn accept_peer(&self) -> io::Result<SocketAddr> {
            let next = self.script.lock().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_the_port() {
        let peer: SocketAddr = "[::ffff:203.0.113.7]:40000".parse().unwrap();
        let acceptor = ScriptedAcceptor {
            script: Mutex::new(VecDeque::from([
                Err(io::Error::from_raw_os_error(24)),
                Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
                Ok(peer),
            ])),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(4321, acceptor, tx));

        let event = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("knock after accept errors was never delivered")
            .unwrap();
        assert_eq!(event.port, 4321);
        assert_eq!(event.source, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
        assert!(!task.is_finished());
        task.abort();
    }
}
