use crate::communication::messages::Message;
use crate::error::{FleetError, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};

/// Fire-and-forget UDP sender for location beacons. Opened once per
/// vehicle and never reconnected.
#[derive(Debug)]
pub struct BeaconChannel {
    socket: UdpSocket,
    target: SocketAddr,
}

impl BeaconChannel {
    pub async fn open(target: &str) -> Result<Self> {
        let target = lookup_host(target).await?.next().ok_or_else(|| {
            FleetError::Config(format!("could not resolve beacon address {}", target))
        })?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends one datagram. Failures are logged and dropped.
    pub async fn send(&self, message: &Message) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Dropping beacon that failed to encode: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&payload, self.target).await {
            log::warn!("[UDP] beacon to {} lost: {}", self.target, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::messages::LocationUpdate;
    use crate::shared_data::{Location, VehicleStatus, VehicleType};

    #[tokio::test]
    async fn one_beacon_per_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap().to_string();
        let beacon = BeaconChannel::open(&addr).await.unwrap();

        let msg = Message::LocationUpdate(LocationUpdate {
            vehicle_id: "U950".into(),
            vehicle_type: VehicleType::Uber,
            status: VehicleStatus::Active,
            location: Location::new(40.7295, -73.9965),
            timestamp: "12:00:00".into(),
            next_stop: None,
            eta: Some(12),
        });
        beacon.send(&msg).await;

        let mut buf = vec![0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(Message::decode(&buf[..n]).unwrap(), msg);
    }
}
