//! Basic types for rootwalk

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType { A, NS, CNAME, SOA, PTR, MX, TXT, AAAA, Other(u16) }

impl QType {
    pub fn code(self) -> u16 {
        match self {
            QType::A => 1, QType::NS => 2, QType::CNAME => 5, QType::SOA => 6,
            QType::PTR => 12, QType::MX => 15, QType::TXT => 16, QType::AAAA => 28,
            QType::Other(n) => n,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => QType::A, 2 => QType::NS, 5 => QType::CNAME, 6 => QType::SOA,
            12 => QType::PTR, 15 => QType::MX, 16 => QType::TXT, 28 => QType::AAAA,
            n => QType::Other(n),
        }
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QType::A => f.write_str("A"),
            QType::NS => f.write_str("NS"),
            QType::CNAME => f.write_str("CNAME"),
            QType::SOA => f.write_str("SOA"),
            QType::PTR => f.write_str("PTR"),
            QType::MX => f.write_str("MX"),
            QType::TXT => f.write_str("TXT"),
            QType::AAAA => f.write_str("AAAA"),
            QType::Other(n) => write!(f, "TYPE{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    PTR(String),
    MX { preference: u16, exchange: String },
    TXT(Vec<String>),
    SOA { mname: String, rname: String, serial: u32, refresh: u32, retry: u32, expire: u32, minimum: u32 },
    Other(Vec<u8>),
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(addr) => write!(f, "{}", addr),
            RData::AAAA(addr) => write!(f, "{}", addr),
            RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => write!(f, "{}.", name),
            RData::MX { preference, exchange } => write!(f, "{} {}.", preference, exchange),
            RData::TXT(parts) => {
                let quoted: Vec<String> = parts.iter().map(|p| format!("\"{}\"", p)).collect();
                f.write_str(&quoted.join(" "))
            }
            RData::SOA { mname, rname, serial, refresh, retry, expire, minimum } => write!(
                f, "{}. {}. {} {} {} {} {}", mname, rname, serial, refresh, retry, expire, minimum
            ),
            RData::Other(bytes) => write!(f, "\\# {}", bytes.len()),
        }
    }
}

/// One record as parsed from a response. Never mutated after decoding,
/// except for the ttl rewrite applied to cache hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: QType,
    pub ttl: u32,
    pub data: RData,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, ttl: u32, data: RData) -> Self {
        let rtype = match &data {
            RData::A(_) => QType::A,
            RData::AAAA(_) => QType::AAAA,
            RData::NS(_) => QType::NS,
            RData::CNAME(_) => QType::CNAME,
            RData::PTR(_) => QType::PTR,
            RData::MX { .. } => QType::MX,
            RData::TXT(_) => QType::TXT,
            RData::SOA { .. } => QType::SOA,
            RData::Other(_) => QType::Other(0),
        };
        Self { name: normalize_name(&name.into()), rtype, ttl, data }
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<30} {:<7} IN  {:<6} {}", format!("{}.", self.name), self.ttl, self.rtype.to_string(), self.data)
    }
}

/// Ordered records returned for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    pub name: String,
    pub rtype: QType,
    pub records: Vec<ResourceRecord>,
}

impl RecordSet {
    pub fn new(name: &str, rtype: QType, records: Vec<ResourceRecord>) -> Self {
        Self { name: normalize_name(name), rtype, records }
    }

    /// Smallest ttl across the set; an empty set never stays valid.
    pub fn min_ttl(&self) -> u32 {
        self.records.iter().map(|r| r.ttl).min().unwrap_or(0)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.records.iter().filter_map(|r| match r.data {
            RData::A(addr) => Some(addr),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderFlags {
    pub qr: bool, pub opcode: u8, pub aa: bool, pub tc: bool,
    pub rd: bool, pub ra: bool, pub rcode: u8,
}

/// A decoded reply. Owned by the hop that received it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub id: u16,
    pub flags: HeaderFlags,
    pub answer: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Response {
    pub fn is_answer(&self) -> bool { !self.answer.is_empty() }
}

pub fn rcode_to_str(rcode: u8) -> &'static str {
    match rcode { 0 => "NOERROR", 1 => "FORMERR", 2 => "SERVFAIL", 3 => "NXDOMAIN", 4 => "NOTIMP", 5 => "REFUSED", _ => "UNKNOWN" }
}

/// Lower-cases a domain name and strips the trailing root dot.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.');
    trimmed.to_ascii_lowercase()
}
