use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::ProtocolHandler;
use crate::lease::Leases;

const RECV_BUFFER_SIZE: usize = 1500;

/// UDP front end: one socket, one handler, packets served in arrival order.
pub struct DhcpServer {
    config: Arc<Config>,
    leases: Arc<Leases>,
    handler: ProtocolHandler,
    socket: UdpSocket,
}

impl DhcpServer {
    /// Validates `config`, creates the lease pool and binds the server socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: Config) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let leases = Arc::new(Leases::new(&config));
        let handler = ProtocolHandler::new(Arc::clone(&config), Arc::clone(&leases));

        let socket = Self::create_socket(&config)?;

        info!(
            "DHCP server bound to {}:{}",
            config.bind_address, config.server_port
        );
        info!(
            "Address range: {} - {} ({} addresses)",
            config.range_start,
            config.range_end,
            config.range_size()
        );

        Ok(Self {
            config,
            leases,
            handler,
            socket,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Bind(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Bind(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Bind(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Bind(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(config.bind_address, config.server_port);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Bind(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Bind(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn leases(&self) -> &Leases {
        &self.leases
    }

    /// Serves until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Per-packet failures are logged and never end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let sweeper = self.spawn_sweeper(shutdown.clone());
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("DHCP server ready and listening");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((size, source)) => {
                        debug!("Received {} bytes from {}", size, source);
                        self.serve_datagram(&buffer[..size]).await;
                    }
                    Err(error) => {
                        error!("Error receiving packet: {}", error);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        sweeper.abort();
        info!("DHCP server stopped");
        Ok(())
    }

    async fn serve_datagram(&self, data: &[u8]) {
        let Some(reply) = self.handler.handle_datagram(data, Utc::now()).await else {
            return;
        };

        let destination = SocketAddrV4::new(self.config.reply_address, self.config.client_port);
        let encoded = reply.encode();

        match self.socket.send_to(&encoded, destination).await {
            Ok(_) => debug!(
                "Sent {} for {} to {}",
                reply.message_type, reply.client_mac, destination
            ),
            Err(error) => warn!(
                "Failed to send {} to {}: {}",
                reply.message_type, destination, error
            ),
        }
    }

    fn spawn_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let leases = Arc::clone(&self.leases);
        let period = Duration::from_secs(self.config.sweep_interval_seconds);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let removed = leases.sweep_expired(now).await;
                        if removed > 0 {
                            debug!(
                                "Swept {} expired lease entries ({} active bindings)",
                                removed,
                                leases.active_binding_count(now).await
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Returns a shutdown receiver that flips to `true` once `signal` resolves.
///
/// A failing `signal` is logged and the sender stays alive, so the server
/// keeps serving instead of treating the failure as a shutdown request.
pub fn shutdown_on<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("Received shutdown signal, stopping server...");
                let _ = shutdown_tx.send(true);
            }
            Err(signal_error) => {
                error!("Failed to listen for shutdown signal: {}", signal_error);
                std::future::pending::<()>().await;
            }
        }
    });

    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DhcpOption, MessageType, OptionCode};
    use crate::packet::{BOOTREQUEST, DHCP_FIXED_HEADER_SIZE, DHCP_MAGIC_COOKIE};
    use std::net::Ipv4Addr;

    fn create_discover_packet(mac: [u8; 6]) -> Vec<u8> {
        let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];
        packet[0] = BOOTREQUEST;
        packet[1] = 1;
        packet[2] = 6;
        packet[28..34].copy_from_slice(&mac);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        DhcpOption::MessageType(MessageType::Discover).encode_into(&mut packet);
        packet.push(OptionCode::End as u8);
        packet
    }

    fn loopback_config() -> Config {
        Config {
            bind_address: Ipv4Addr::LOCALHOST,
            server_port: 0,
            reply_address: Ipv4Addr::LOCALHOST,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = DhcpServer::bind(loopback_config()).unwrap();
        let addr = server.local_addr().unwrap();
        assert_eq!(addr.ip(), std::net::IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
        assert_eq!(server.leases().pool_size(), 101);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = Config {
            bind_address: Ipv4Addr::new(203, 0, 113, 77),
            ..loopback_config()
        };
        assert!(matches!(DhcpServer::bind(config), Err(Error::Bind(_))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let inverted = Config {
            range_start: Ipv4Addr::new(192, 168, 10, 200),
            range_end: Ipv4Addr::new(192, 168, 10, 100),
            ..loopback_config()
        };
        assert!(matches!(
            DhcpServer::bind(inverted),
            Err(Error::InvalidConfig(_))
        ));

        let no_sweep = Config {
            sweep_interval_seconds: 0,
            ..loopback_config()
        };
        assert!(matches!(
            DhcpServer::bind(no_sweep),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_run_sweeps_expired_offers() {
        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let config = Config {
            offer_time_seconds: 1,
            sweep_interval_seconds: 1,
            client_port: client.local_addr().unwrap().port(),
            ..loopback_config()
        };
        let server = Arc::new(DhcpServer::bind(config).unwrap());
        let server_addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run(shutdown_rx).await }
        });

        let discover = create_discover_packet([0x02, 0, 0, 0, 0, 0x01]);
        client.send_to(&discover, server_addr).await.unwrap();
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.leases().list_leases().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(server.leases().list_leases().await.is_empty());

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_on_signal() {
        let mut shutdown = shutdown_on(async { Ok::<(), std::io::Error>(()) });

        tokio::time::timeout(Duration::from_secs(5), shutdown.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*shutdown.borrow());
    }

    #[tokio::test]
    async fn test_failed_signal_keeps_server_running() {
        let mut shutdown =
            shutdown_on(async { Err::<(), _>(std::io::Error::other("no signal handler")) });

        let waited = tokio::time::timeout(Duration::from_millis(200), shutdown.changed()).await;
        assert!(waited.is_err());
        assert!(!*shutdown.borrow());
        assert!(shutdown.has_changed().is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server = DhcpServer::bind(loopback_config()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { server.run(shutdown_rx).await });
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let server = DhcpServer::bind(loopback_config()).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move { server.run(shutdown_rx).await });
        drop(shutdown_tx);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
