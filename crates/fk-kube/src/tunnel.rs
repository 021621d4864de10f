//! Port-forward tunnel over the `pods/<name>/portforward` subresource
//!
//! A [`PortForwardTunnel`] owns one local `TcpListener` per declared port
//! pair. Each accepted connection gets its own forwarder stream to the pod
//! and is bridged bidirectionally. Readiness is signalled after all
//! listeners are bound and the pod has accepted an initial port-forward
//! probe, which is the moment a session may consider the forward healthy.

use std::net::SocketAddr;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use fk_core::{PortPair, ResolveError};

use crate::classify::classify_portforward;
use crate::traits::Tunnel;

/// One open port-forward: local listeners plus the bridge tasks feeding them
#[derive(Debug)]
pub struct PortForwardTunnel {
    ready_rx: Option<oneshot::Receiver<Result<(), ResolveError>>>,
    fatal_rx: mpsc::Receiver<ResolveError>,
    stop: CancellationToken,
    tasks: JoinSet<()>,
}

impl PortForwardTunnel {
    /// Bind the local sockets and start the bridge tasks.
    ///
    /// Binding happens up front so a port collision surfaces as an open
    /// failure rather than a silent dead listener. The readiness probe runs
    /// in the background; callers observe it through `wait_ready`.
    pub(crate) async fn open(
        client: Client,
        namespace: &str,
        pod_name: &str,
        ports: &[PortPair],
    ) -> Result<Self, ResolveError> {
        let api: Api<Pod> = Api::namespaced(client, namespace);

        let mut listeners = Vec::with_capacity(ports.len());
        for pair in ports {
            let addr = SocketAddr::from(([127, 0, 0, 1], pair.local));
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                ResolveError::network_transient(format!("cannot bind 127.0.0.1:{}", pair.local), e)
            })?;
            listeners.push((listener, *pair));
        }

        let stop = CancellationToken::new();
        let (fatal_tx, fatal_rx) = mpsc::channel(4);
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut tasks = JoinSet::new();

        // Readiness probe: one throwaway forwarder over all remote ports
        // verifies the subresource is reachable before Ready is reported.
        {
            let api = api.clone();
            let pod = pod_name.to_string();
            let mut remote_ports: Vec<u16> = ports.iter().map(|p| p.remote).collect();
            remote_ports.sort_unstable();
            remote_ports.dedup();

            tasks.spawn(async move {
                let outcome = match api.portforward(&pod, &remote_ports).await {
                    Ok(forwarder) => {
                        drop(forwarder);
                        Ok(())
                    }
                    Err(e) => Err(classify_portforward(&pod, e)),
                };
                let _ = ready_tx.send(outcome);
            });
        }

        for (listener, pair) in listeners {
            tasks.spawn(accept_loop(
                api.clone(),
                pod_name.to_string(),
                pair,
                listener,
                stop.clone(),
                fatal_tx.clone(),
            ));
        }

        Ok(Self {
            ready_rx: Some(ready_rx),
            fatal_rx,
            stop,
            tasks,
        })
    }
}

#[async_trait]
impl Tunnel for PortForwardTunnel {
    async fn wait_ready(&mut self) -> Result<(), ResolveError> {
        match self.ready_rx.take() {
            Some(rx) => match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ResolveError::network_transient_msg(
                    "port-forward readiness probe aborted",
                )),
            },
            None => Ok(()),
        }
    }

    async fn run(&mut self) -> Result<(), ResolveError> {
        let outcome = tokio::select! {
            _ = self.stop.cancelled() => Ok(()),
            err = self.fatal_rx.recv() => Err(err.unwrap_or_else(|| {
                ResolveError::network_transient_msg("port-forward tunnel closed")
            })),
        };

        // Terminal either way: tear down every accept loop and bridge so the
        // listeners are released before run resolves.
        self.stop.cancel();
        self.tasks.shutdown().await;
        outcome
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

/// Accept connections on one local port and bridge each into the pod
async fn accept_loop(
    api: Api<Pod>,
    pod_name: String,
    pair: PortPair,
    listener: TcpListener,
    stop: CancellationToken,
    fatal: mpsc::Sender<ResolveError>,
) {
    loop {
        let conn = tokio::select! {
            _ = stop.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    tracing::debug!(
                        "Accepted connection from {} on 127.0.0.1:{}",
                        peer,
                        pair.local
                    );
                    conn
                }
                Err(e) => {
                    let _ = fatal.try_send(ResolveError::network_transient(
                        format!("accept failed on 127.0.0.1:{}", pair.local),
                        e,
                    ));
                    return;
                }
            },
        };

        let api = api.clone();
        let pod_name = pod_name.clone();
        let stop = stop.clone();
        let fatal = fatal.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                result = bridge(api, &pod_name, pair, conn) => {
                    if let Err(err) = result {
                        // Losing the pod mid-flight takes the whole tunnel
                        // down so the session re-resolves.
                        let _ = fatal.try_send(err);
                    }
                }
            }
        });
    }
}

/// Pipe one accepted connection through its own forwarder stream.
///
/// Returns `Err` only when the forward could not be established; copy
/// failures after establishment are ordinary client disconnects.
async fn bridge(
    api: Api<Pod>,
    pod_name: &str,
    pair: PortPair,
    mut conn: TcpStream,
) -> Result<(), ResolveError> {
    let mut forwarder = api
        .portforward(pod_name, &[pair.remote])
        .await
        .map_err(|e| classify_portforward(pod_name, e))?;

    let mut upstream = forwarder.take_stream(pair.remote).ok_or_else(|| {
        ResolveError::network_transient_msg(format!(
            "port-forward to pod {pod_name} exposes no stream for port {}",
            pair.remote
        ))
    })?;

    match tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
        Ok((sent, received)) => {
            tracing::debug!(
                "Connection on 127.0.0.1:{} closed ({} bytes sent, {} received)",
                pair.local,
                sent,
                received
            );
        }
        Err(e) => {
            tracing::debug!("Connection on 127.0.0.1:{} dropped: {}", pair.local, e);
        }
    }

    drop(upstream);
    if let Err(e) = forwarder.join().await {
        tracing::debug!("Forwarder for 127.0.0.1:{} ended with: {}", pair.local, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Tunnel as _;
    use std::time::Duration;

    /// A client pointed at a port nothing listens on; good enough to
    /// exercise binding and teardown without a cluster.
    fn offline_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn test_open_binds_local_ports() {
        let ports = [PortPair {
            local: 39181,
            remote: 80,
        }];
        let tunnel = PortForwardTunnel::open(offline_client(), "ns", "api-0", &ports)
            .await
            .unwrap();

        // The port is held while the tunnel lives
        assert!(TcpListener::bind("127.0.0.1:39181").await.is_err());
        drop(tunnel);
    }

    #[tokio::test]
    async fn test_open_fails_on_occupied_port() {
        let _holder = TcpListener::bind("127.0.0.1:39182").await.unwrap();
        let ports = [PortPair {
            local: 39182,
            remote: 80,
        }];
        let err = PortForwardTunnel::open(offline_client(), "ns", "api-0", &ports)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), fk_core::ResolveErrorKind::NetworkTransient);
    }

    #[tokio::test]
    async fn test_ready_fails_without_cluster() {
        let ports = [PortPair {
            local: 39183,
            remote: 80,
        }];
        let mut tunnel = PortForwardTunnel::open(offline_client(), "ns", "api-0", &ports)
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), tunnel.wait_ready())
            .await
            .expect("readiness probe should resolve");
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_stop_resolves_run() {
        let ports = [PortPair {
            local: 39184,
            remote: 80,
        }];
        let mut tunnel = PortForwardTunnel::open(offline_client(), "ns", "api-0", &ports)
            .await
            .unwrap();

        tunnel.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(5), tunnel.run())
            .await
            .expect("run should resolve promptly after stop");
        assert!(outcome.is_ok());

        // The listener is released once run has drained
        TcpListener::bind("127.0.0.1:39184").await.unwrap();
    }
}
