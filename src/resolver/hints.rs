use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// IANA root server IPv4 addresses, a.root-servers.net through m.
pub const IANA_ROOTS: [Ipv4Addr; 13] = [
    Ipv4Addr::new(198, 41, 0, 4),
    Ipv4Addr::new(170, 247, 170, 2),
    Ipv4Addr::new(192, 33, 4, 12),
    Ipv4Addr::new(199, 7, 91, 13),
    Ipv4Addr::new(192, 203, 230, 10),
    Ipv4Addr::new(192, 5, 5, 241),
    Ipv4Addr::new(192, 112, 36, 4),
    Ipv4Addr::new(198, 97, 190, 53),
    Ipv4Addr::new(192, 36, 148, 17),
    Ipv4Addr::new(192, 58, 128, 30),
    Ipv4Addr::new(193, 0, 14, 129),
    Ipv4Addr::new(199, 7, 83, 42),
    Ipv4Addr::new(202, 12, 27, 33),
];

/// Ordered bootstrap servers tried when a resolution has no starting server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHints {
    servers: Vec<SocketAddr>,
}

impl RootHints {
    pub fn new(addrs: impl IntoIterator<Item = Ipv4Addr>, port: u16) -> Self {
        Self { servers: addrs.into_iter().map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, port))).collect() }
    }

    pub fn from_servers(servers: Vec<SocketAddr>) -> Self {
        Self { servers }
    }

    pub fn servers(&self) -> &[SocketAddr] { &self.servers }
}

impl Default for RootHints {
    fn default() -> Self { Self::new(IANA_ROOTS, 53) }
}
