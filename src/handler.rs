//! Per-packet DHCP state machine.
//!
//! A client moves `UNKNOWN -> OFFERED -> BOUND`: DISCOVER reserves an address
//! and answers with OFFER, REQUEST binds the named address and answers with
//! ACK. Clients only fall back to `UNKNOWN` when their entry expires.
//! RELEASE, DECLINE and INFORM are accepted on the wire but never answered.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::lease::Leases;
use crate::options::MessageType;
use crate::packet::{BOOTREQUEST, DhcpMessage, MacAddress, Reply};

/// Turns decoded requests into replies, mutating the lease pool on the way.
#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    config: Arc<Config>,
    leases: Arc<Leases>,
}

impl ProtocolHandler {
    pub fn new(config: Arc<Config>, leases: Arc<Leases>) -> Self {
        Self { config, leases }
    }

    pub fn leases(&self) -> &Leases {
        &self.leases
    }

    /// Decodes a datagram and handles it.
    ///
    /// Undecodable packets are dropped with a debug log and no state change.
    pub async fn handle_datagram(&self, data: &[u8], now: DateTime<Utc>) -> Option<Reply> {
        match DhcpMessage::decode(data) {
            Ok(message) => self.handle(&message, now).await,
            Err(error) => {
                debug!("Dropping packet: {}", error);
                None
            }
        }
    }

    /// Returns the reply for `message`, if one is due.
    pub async fn handle(&self, message: &DhcpMessage, now: DateTime<Utc>) -> Option<Reply> {
        if message.op != BOOTREQUEST {
            debug!("Dropping non-BOOTREQUEST packet (op {})", message.op);
            return None;
        }

        let mac = message.client_mac();
        let message_type = match message.message_type() {
            Ok(message_type) => message_type,
            Err(error) => {
                debug!("Dropping packet from {}: {}", mac, error);
                return None;
            }
        };

        info!("{} from {}", message_type, mac);

        match message_type {
            MessageType::Discover => self.handle_discover(message, mac, now).await,
            MessageType::Request => self.handle_request(message, mac, now).await,
            other => {
                debug!("Ignoring {} from {}", other, mac);
                None
            }
        }
    }

    async fn handle_discover(
        &self,
        message: &DhcpMessage,
        mac: MacAddress,
        now: DateTime<Utc>,
    ) -> Option<Reply> {
        match self.leases.offer(mac, now).await {
            Ok(ip) => {
                info!("OFFER {} to {}", ip, mac);
                Some(self.reply(MessageType::Offer, message.xid, mac, ip))
            }
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer IP to {}", mac);
                None
            }
            Err(error) => {
                warn!("Offer for {} failed: {}", mac, error);
                None
            }
        }
    }

    async fn handle_request(
        &self,
        message: &DhcpMessage,
        mac: MacAddress,
        now: DateTime<Utc>,
    ) -> Option<Reply> {
        let Some(requested_ip) = message.requested_ip() else {
            debug!("REQUEST from {} carries no requested IP", mac);
            return None;
        };

        if self.config.strict_requests {
            if let Some(server_id) = message.server_identifier()
                && server_id != self.config.server_ip
            {
                info!("REQUEST from {} is for different server {}", mac, server_id);
                return None;
            }

            if let Err(error) = self.leases.try_commit(mac, requested_ip, now).await {
                warn!("Refusing REQUEST from {}: {}", mac, error);
                return None;
            }
        } else {
            self.leases.commit(mac, requested_ip, now).await;
        }

        info!(
            "ACK {} to {} (lease: {} seconds)",
            requested_ip, mac, self.config.lease_time_seconds
        );
        Some(self.reply(MessageType::Ack, message.xid, mac, requested_ip))
    }

    fn reply(
        &self,
        message_type: MessageType,
        xid: u32,
        client_mac: MacAddress,
        your_ip: Ipv4Addr,
    ) -> Reply {
        Reply {
            message_type,
            xid,
            client_mac,
            your_ip,
            subnet_mask: self.config.subnet_mask(),
            server_ip: self.config.server_ip,
            dns_server: self.config.dns_server,
            lease_time: self.config.lease_time_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DhcpOption, OptionCode};
    use crate::packet::{DHCP_FIXED_HEADER_SIZE, DHCP_MAGIC_COOKIE, HLEN_ETHERNET, HTYPE_ETHERNET};

    fn test_config() -> Config {
        Config {
            range_start: Ipv4Addr::new(192, 168, 10, 100),
            range_end: Ipv4Addr::new(192, 168, 10, 101),
            ..Config::default()
        }
    }

    fn create_test_handler(config: Config) -> ProtocolHandler {
        let leases = Arc::new(Leases::new(&config));
        ProtocolHandler::new(Arc::new(config), leases)
    }

    fn create_dhcp_packet(
        message_type: Option<MessageType>,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> Vec<u8> {
        let mut packet = vec![0u8; DHCP_FIXED_HEADER_SIZE];

        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&xid.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());
        packet[28..34].copy_from_slice(&mac);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        if let Some(message_type) = message_type {
            DhcpOption::MessageType(message_type).encode_into(&mut packet);
        }
        for option in options {
            option.encode_into(&mut packet);
        }

        packet.push(OptionCode::End as u8);
        packet
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    const MAC_1: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];
    const MAC_2: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];
    const MAC_3: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x03];

    #[tokio::test]
    async fn test_discover_yields_offer() {
        let handler = create_test_handler(test_config());
        let packet = create_dhcp_packet(Some(MessageType::Discover), MAC_1, 0x12345678, vec![]);

        let reply = handler.handle_datagram(&packet, at(0)).await.unwrap();
        assert_eq!(reply.message_type, MessageType::Offer);
        assert_eq!(reply.xid, 0x12345678);
        assert_eq!(reply.client_mac, MacAddress::new(MAC_1));
        assert_eq!(reply.your_ip, Ipv4Addr::new(192, 168, 10, 100));
        assert_eq!(reply.server_ip, Ipv4Addr::new(192, 168, 10, 1));
        assert_eq!(reply.subnet_mask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(reply.dns_server, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(reply.lease_time, 3600);

        let pending = handler
            .leases()
            .pending_offer(MacAddress::new(MAC_1), at(1))
            .await;
        assert!(pending.is_some());
    }

    #[tokio::test]
    async fn test_repeated_discover_keeps_address() {
        let handler = create_test_handler(test_config());
        let packet = create_dhcp_packet(Some(MessageType::Discover), MAC_1, 1, vec![]);

        let first = handler.handle_datagram(&packet, at(0)).await.unwrap();
        let second = handler.handle_datagram(&packet, at(5)).await.unwrap();
        assert_eq!(first.your_ip, Ipv4Addr::new(192, 168, 10, 100));
        assert_eq!(second.your_ip, first.your_ip);
    }

    #[tokio::test]
    async fn test_discover_on_exhausted_pool_is_silent() {
        let handler = create_test_handler(test_config());

        for mac in [MAC_1, MAC_2] {
            let packet = create_dhcp_packet(Some(MessageType::Discover), mac, 1, vec![]);
            assert!(handler.handle_datagram(&packet, at(0)).await.is_some());
        }

        let packet = create_dhcp_packet(Some(MessageType::Discover), MAC_3, 1, vec![]);
        assert!(handler.handle_datagram(&packet, at(1)).await.is_none());
        assert!(
            handler
                .leases()
                .pending_offer(MacAddress::new(MAC_3), at(1))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_full_dora_flow() {
        let handler = create_test_handler(test_config());
        let xid = 0xdeadbeef;

        let discover = create_dhcp_packet(Some(MessageType::Discover), MAC_1, xid, vec![]);
        let offer = handler.handle_datagram(&discover, at(0)).await.unwrap();

        let request = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_1,
            xid,
            vec![
                DhcpOption::RequestedIpAddress(offer.your_ip),
                DhcpOption::ServerIdentifier(offer.server_ip),
            ],
        );
        let ack = handler.handle_datagram(&request, at(2)).await.unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
        assert_eq!(ack.xid, xid);
        assert_eq!(ack.your_ip, offer.your_ip);

        let mac = MacAddress::new(MAC_1);
        assert_eq!(handler.leases().lookup(mac, at(3)).await, Some(offer.your_ip));
        assert!(handler.leases().pending_offer(mac, at(3)).await.is_none());
    }

    #[tokio::test]
    async fn test_request_without_requested_ip_is_silent() {
        let handler = create_test_handler(test_config());
        let packet = create_dhcp_packet(Some(MessageType::Request), MAC_1, 1, vec![]);

        assert!(handler.handle_datagram(&packet, at(0)).await.is_none());
        assert!(handler.leases().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_lenient_request_acks_unoffered_address() {
        let handler = create_test_handler(test_config());
        let foreign = Ipv4Addr::new(10, 0, 0, 42);
        let packet = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_1,
            7,
            vec![
                DhcpOption::RequestedIpAddress(foreign),
                DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 1)),
            ],
        );

        let ack = handler.handle_datagram(&packet, at(0)).await.unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
        assert_eq!(ack.your_ip, foreign);
    }

    #[tokio::test]
    async fn test_strict_request_for_other_server_is_ignored() {
        let handler = create_test_handler(Config {
            strict_requests: true,
            ..test_config()
        });
        let packet = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_1,
            7,
            vec![
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 10, 100)),
                DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 10, 2)),
            ],
        );

        assert!(handler.handle_datagram(&packet, at(0)).await.is_none());
        assert!(handler.leases().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_strict_request_for_taken_address_is_refused() {
        let handler = create_test_handler(Config {
            strict_requests: true,
            ..test_config()
        });

        let discover = create_dhcp_packet(Some(MessageType::Discover), MAC_1, 1, vec![]);
        let offer = handler.handle_datagram(&discover, at(0)).await.unwrap();

        let stolen = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_2,
            2,
            vec![DhcpOption::RequestedIpAddress(offer.your_ip)],
        );
        assert!(handler.handle_datagram(&stolen, at(1)).await.is_none());

        let out_of_range = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_2,
            3,
            vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 10, 50))],
        );
        assert!(handler.handle_datagram(&out_of_range, at(1)).await.is_none());

        let own = create_dhcp_packet(
            Some(MessageType::Request),
            MAC_1,
            1,
            vec![
                DhcpOption::RequestedIpAddress(offer.your_ip),
                DhcpOption::ServerIdentifier(offer.server_ip),
            ],
        );
        let ack = handler.handle_datagram(&own, at(2)).await.unwrap();
        assert_eq!(ack.message_type, MessageType::Ack);
    }

    #[tokio::test]
    async fn test_packet_without_message_type_is_dropped() {
        let handler = create_test_handler(test_config());
        let packet = create_dhcp_packet(None, MAC_1, 1, vec![]);

        assert!(handler.handle_datagram(&packet, at(0)).await.is_none());
        assert!(handler.leases().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_packets_are_dropped() {
        let handler = create_test_handler(test_config());
        assert!(handler.handle_datagram(&[0u8; 100], at(0)).await.is_none());

        let mut bad_cookie = create_dhcp_packet(Some(MessageType::Discover), MAC_1, 1, vec![]);
        bad_cookie[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(handler.handle_datagram(&bad_cookie, at(0)).await.is_none());
        assert!(handler.leases().list_leases().await.is_empty());
    }

    #[tokio::test]
    async fn test_bootreply_is_dropped() {
        let handler = create_test_handler(test_config());
        let mut packet = create_dhcp_packet(Some(MessageType::Discover), MAC_1, 1, vec![]);
        packet[0] = 2;

        assert!(handler.handle_datagram(&packet, at(0)).await.is_none());
    }

    #[tokio::test]
    async fn test_unhandled_message_types_are_silent() {
        let handler = create_test_handler(test_config());
        let mac = MacAddress::new(MAC_1);
        handler
            .leases()
            .commit(mac, Ipv4Addr::new(192, 168, 10, 100), at(0))
            .await;

        for message_type in [
            MessageType::Release,
            MessageType::Decline,
            MessageType::Inform,
        ] {
            let packet = create_dhcp_packet(
                Some(message_type),
                MAC_1,
                1,
                vec![DhcpOption::RequestedIpAddress(Ipv4Addr::new(192, 168, 10, 100))],
            );
            assert!(handler.handle_datagram(&packet, at(1)).await.is_none());
        }

        assert_eq!(
            handler.leases().lookup(mac, at(2)).await,
            Some(Ipv4Addr::new(192, 168, 10, 100))
        );
    }
}
