//! End-to-end knock detection over loopback sockets.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use knockgate_core::{
    FirewallError, FirewallPort, KnockConfig, KnockEngine, TcpKnockListener,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const PROTECTED: u16 = 1;

#[derive(Clone, Default)]
struct RecordingFirewall {
    calls: Arc<Mutex<Vec<String>>>,
    opened: Arc<Notify>,
}

impl FirewallPort for RecordingFirewall {
    async fn allow(&self, port: u16) -> Result<(), FirewallError> {
        self.calls.lock().push(format!("allow {}", port));
        self.opened.notify_one();
        Ok(())
    }

    async fn deny(&self, port: u16) -> Result<(), FirewallError> {
        self.calls.lock().push(format!("deny {}", port));
        Ok(())
    }
}

async fn open_listener() -> (TcpKnockListener, Vec<u16>) {
    let listener = TcpKnockListener::open(LOCALHOST, &[0, 0, 0]).await.unwrap();
    let ports = listener.ports().to_vec();
    (listener, ports)
}

fn config_for(ports: &[u16]) -> knockgate_core::ValidatedConfig {
    KnockConfig {
        sequence: ports.to_vec(),
        protected_port: PROTECTED,
        bind_address: LOCALHOST,
        poll_interval_ms: 50,
        ..KnockConfig::default()
    }
    .validate()
    .unwrap()
}

/// Connect to each port in turn, giving the accept task time to enqueue the
/// knock before the next one.
async fn knock(ports: &[u16]) {
    for &port in ports {
        TcpStream::connect((LOCALHOST, port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn correct_sequence_opens_protected_port() {
    let (listener, ports) = open_listener().await;
    let config = config_for(&ports);
    let firewall = RecordingFirewall::default();
    let engine = KnockEngine::new(listener, firewall.clone(), &config);

    let (stop, stopped) = oneshot::channel::<()>();
    let driver = async {
        knock(&ports).await;
        let opened = tokio::time::timeout(Duration::from_secs(5), firewall.opened.notified()).await;
        let _ = stop.send(());
        opened.is_ok()
    };

    let (summary, opened) = tokio::join!(
        engine.run(async {
            let _ = stopped.await;
        }),
        driver
    );

    assert!(opened, "protected port was never opened");
    assert_eq!(summary.completed, 1);
    assert_eq!(
        *firewall.calls.lock(),
        vec![format!("deny {}", PROTECTED), format!("allow {}", PROTECTED)]
    );
}

#[tokio::test]
async fn out_of_order_sequence_keeps_port_closed() {
    let (listener, ports) = open_listener().await;
    let config = config_for(&ports);
    let firewall = RecordingFirewall::default();
    let engine = KnockEngine::new(listener, firewall.clone(), &config);

    let (stop, stopped) = oneshot::channel::<()>();
    let driver = async {
        knock(&[ports[1], ports[0], ports[2]]).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = stop.send(());
    };

    let (summary, ()) = tokio::join!(
        engine.run(async {
            let _ = stopped.await;
        }),
        driver
    );

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.knocks, 3);
    assert!(summary.resets >= 1);
    assert_eq!(*firewall.calls.lock(), vec![format!("deny {}", PROTECTED)]);
}
