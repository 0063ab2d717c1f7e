use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use ss_transport::FramedTransport;
use tracing::{error, info, warn};

use crate::auth::Authenticator;
use crate::config::ServiceConfig;
use crate::state::ServiceState;
use crate::worker::ConnectionWorker;
use crate::Result;

/// Accepts connections until the listener fails, running one
/// [`ConnectionWorker`] thread per client.
pub fn serve(
    listener: TcpListener,
    state: Arc<ServiceState>,
    auth: Arc<dyn Authenticator>,
    cfg: &ServiceConfig,
) -> Result<()> {
    let active = Arc::new(AtomicU64::new(0));
    info!(addr = ?listener.local_addr().ok(), "accepting connections");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| String::from("unknown"));

        let transport = match FramedTransport::from_tcp(stream) {
            Ok(transport) => Arc::new(transport.with_max_frame_len(cfg.max_frame_len)),
            Err(err) => {
                warn!(%peer, error = %err, "could not set up connection");
                continue;
            }
        };

        let now = active.fetch_add(1, Ordering::AcqRel) + 1;
        state.metrics().record_connections(now);
        info!(%peer, active = now, "client connected");

        let worker = ConnectionWorker::new(transport, Arc::clone(&state), Arc::clone(&auth))
            .with_peer(peer.clone());
        let counter = Arc::clone(&active);
        let spawned = thread::Builder::new()
            .name(format!("conn-{peer}"))
            .spawn(move || {
                if let Err(err) = worker.run() {
                    error!(%peer, error = %err, "connection worker failed");
                }
                counter.fetch_sub(1, Ordering::AcqRel);
            });
        if let Err(err) = spawned {
            active.fetch_sub(1, Ordering::AcqRel);
            error!(error = %err, "could not start connection worker");
        }
    }
    Ok(())
}
