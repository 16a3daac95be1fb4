//! Sending one query to one nameserver.

use crate::metrics::{QUERIES_TOTAL, QUERY_DURATION};
use crate::resolver::QueryError;
use crate::types::{normalize_name, QType, Response};
use crate::wire;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

/// The question sent in a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
    pub qtype: QType,
    pub recursion_desired: bool,
}

impl Query {
    pub fn new(name: &str, qtype: QType) -> Self {
        Self { name: normalize_name(name), qtype, recursion_desired: false }
    }

    pub fn recursive(mut self) -> Self {
        self.recursion_desired = true;
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues `query` to `server`. Implementations must give up once
    /// `limit` has elapsed.
    async fn query(&self, server: SocketAddr, query: &Query, limit: Duration) -> Result<Response, QueryError>;
}

/// Plain DNS over UDP, one ephemeral socket per query.
#[derive(Debug, Default, Clone)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    async fn query(&self, server: SocketAddr, query: &Query, limit: Duration) -> Result<Response, QueryError> {
        let start = std::time::Instant::now();
        let result = timeout(limit, exchange(server, query)).await
            .unwrap_or(Err(QueryError::Timeout { server, timeout: limit }));
        QUERY_DURATION.observe(start.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(_) => "ok",
            Err(QueryError::Timeout { .. }) => "timeout",
            Err(QueryError::Io { .. }) => "io",
            Err(QueryError::Protocol { .. }) => "protocol",
        };
        QUERIES_TOTAL.with_label_values(&[outcome]).inc();
        result
    }
}

async fn exchange(server: SocketAddr, query: &Query) -> Result<Response, QueryError> {
    let io_err = |e: std::io::Error| QueryError::Io { server, reason: e.to_string() };
    let id: u16 = rand::random();
    let packet = wire::encode_query(id, &query.name, query.qtype, query.recursion_desired)
        .map_err(|e| QueryError::Protocol { server, reason: e.to_string() })?;

    let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await.map_err(io_err)?;
    socket.connect(server).await.map_err(io_err)?;
    socket.send(&packet).await.map_err(io_err)?;

    let mut buf = vec![0u8; 4096];
    loop {
        let len = socket.recv(&mut buf).await.map_err(io_err)?;
        let response = wire::decode_response(&buf[..len])
            .map_err(|e| QueryError::Protocol { server, reason: e.to_string() })?;
        if response.id == id {
            return Ok(response);
        }
        // Stray datagram for an older query; keep waiting for ours.
        tracing::debug!("Ignoring reply with TxID {:#06x} from {}, expected {:#06x}", response.id, server, id);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    pub enum Reply {
        Respond(Response),
        Timeout,
        Refused,
    }

    type Script = Box<dyn Fn(SocketAddr, &Query) -> Reply + Send + Sync>;

    /// Scripted nameserver graph that records every query it receives.
    pub struct MockTransport {
        script: Script,
        pub calls: Mutex<Vec<(SocketAddr, Query)>>,
    }

    impl MockTransport {
        pub fn new(script: impl Fn(SocketAddr, &Query) -> Reply + Send + Sync + 'static) -> Self {
            Self { script: Box::new(script), calls: Mutex::new(Vec::new()) }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn servers_queried(&self) -> Vec<SocketAddr> {
            self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn query(&self, server: SocketAddr, query: &Query, limit: Duration) -> Result<Response, QueryError> {
            self.calls.lock().unwrap().push((server, query.clone()));
            let reply = (self.script)(server, query);
            match reply {
                Reply::Respond(resp) => Ok(resp),
                Reply::Timeout => {
                    tokio::time::sleep(limit).await;
                    Err(QueryError::Timeout { server, timeout: limit })
                }
                Reply::Refused => Err(QueryError::Io { server, reason: "connection refused".into() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RData, ResourceRecord};
    use std::net::Ipv4Addr;

    #[test]
    fn query_names_are_normalized() {
        let q = Query::new("WWW.Example.com.", QType::A).recursive();
        assert_eq!(q.name, "www.example.com");
        assert!(q.recursion_desired);
    }

    // A local socket standing in for a nameserver that answers one A query.
    #[tokio::test]
    async fn udp_transport_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut reply = buf[..n].to_vec();
            reply[2] = 0x81; reply[3] = 0x80; // QR RD, RA
            reply[7] = 1;
            reply.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0x01, 0x2C, 0, 4, 93, 184, 216, 34]);
            server.send_to(&reply, peer).await.unwrap();
        });

        let resp = UdpTransport
            .query(addr, &Query::new("example.com", QType::A).recursive(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(resp.flags.ra);
        assert_eq!(resp.answer, vec![ResourceRecord::new("example.com", 300, RData::A(Ipv4Addr::new(93, 184, 216, 34)))]);
    }

    #[tokio::test]
    async fn udp_transport_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let err = UdpTransport
            .query(addr, &Query::new("example.com", QType::A), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::Timeout { server: addr, timeout: Duration::from_millis(50) });
        drop(silent);
    }
}
