//! DNS wire format: query encoding and response decoding.

use crate::types::{HeaderFlags, QType, RData, ResourceRecord, Response};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

const HEADER_LEN: usize = 12;
const CLASS_IN: u16 = 1;
const MAX_POINTER_HOPS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),
    #[error("compression pointer loop at offset {0}")]
    PointerLoop(usize),
    #[error("invalid label length {0}")]
    BadLabel(u8),
    #[error("message is not a response")]
    NotResponse,
    #[error("name '{0}' cannot be encoded")]
    BadName(String),
}

/// Builds a single-question query for class IN.
pub fn encode_query(id: u16, name: &str, qtype: QType, recursion_desired: bool) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(512);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.push(if recursion_desired { 0x01 } else { 0x00 });
    buf.push(0x00);
    buf.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let trimmed = name.trim_end_matches('.');
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(WireError::BadName(name.to_string()));
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);
    if buf.len() - HEADER_LEN > 255 {
        return Err(WireError::BadName(name.to_string()));
    }
    buf.extend_from_slice(&qtype.code().to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(buf)
}

pub fn decode_response(msg: &[u8]) -> Result<Response, WireError> {
    if msg.len() < HEADER_LEN { return Err(WireError::Truncated(msg.len())); }

    let id = read_u16(msg, 0)?;
    let flags = HeaderFlags {
        qr: msg[2] & 0x80 != 0,
        opcode: (msg[2] >> 3) & 0x0F,
        aa: msg[2] & 0x04 != 0,
        tc: msg[2] & 0x02 != 0,
        rd: msg[2] & 0x01 != 0,
        ra: msg[3] & 0x80 != 0,
        rcode: msg[3] & 0x0F,
    };
    if !flags.qr { return Err(WireError::NotResponse); }

    let qdcount = read_u16(msg, 4)?;
    let ancount = read_u16(msg, 6)?;
    let nscount = read_u16(msg, 8)?;
    let arcount = read_u16(msg, 10)?;

    let mut offset = HEADER_LEN;
    for _ in 0..qdcount {
        let (_, next) = read_name(msg, offset)?;
        offset = next + 4;
        if offset > msg.len() { return Err(WireError::Truncated(offset)); }
    }

    let mut sections: [Vec<ResourceRecord>; 3] = Default::default();
    for (section, count) in sections.iter_mut().zip([ancount, nscount, arcount]) {
        for _ in 0..count {
            let (record, next) = read_record(msg, offset)?;
            offset = next;
            if let Some(record) = record { section.push(record); }
        }
    }
    let [answer, authority, additional] = sections;

    Ok(Response { id, flags, answer, authority, additional })
}

/// Returns `None` for records outside class IN (e.g. the EDNS OPT pseudo-record).
fn read_record(msg: &[u8], offset: usize) -> Result<(Option<ResourceRecord>, usize), WireError> {
    let (name, mut offset) = read_name(msg, offset)?;
    let rtype = QType::from_code(read_u16(msg, offset)?);
    let class = read_u16(msg, offset + 2)?;
    let ttl = read_u32(msg, offset + 4)?;
    let rdlen = read_u16(msg, offset + 8)? as usize;
    offset += 10;
    let end = offset + rdlen;
    if end > msg.len() { return Err(WireError::Truncated(end)); }

    let data = match rtype {
        QType::A if rdlen == 4 => RData::A(Ipv4Addr::new(msg[offset], msg[offset + 1], msg[offset + 2], msg[offset + 3])),
        QType::AAAA if rdlen == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&msg[offset..end]);
            RData::AAAA(Ipv6Addr::from(octets))
        }
        QType::NS => RData::NS(read_name(msg, offset)?.0),
        QType::CNAME => RData::CNAME(read_name(msg, offset)?.0),
        QType::PTR => RData::PTR(read_name(msg, offset)?.0),
        QType::MX => RData::MX { preference: read_u16(msg, offset)?, exchange: read_name(msg, offset + 2)?.0 },
        QType::TXT => {
            let mut parts = Vec::new();
            let mut i = offset;
            while i < end {
                let len = msg[i] as usize;
                let stop = (i + 1 + len).min(end);
                parts.push(String::from_utf8_lossy(&msg[i + 1..stop]).into_owned());
                i = stop;
            }
            RData::TXT(parts)
        }
        QType::SOA => {
            let (mname, next) = read_name(msg, offset)?;
            let (rname, next) = read_name(msg, next)?;
            RData::SOA {
                mname, rname,
                serial: read_u32(msg, next)?,
                refresh: read_u32(msg, next + 4)?,
                retry: read_u32(msg, next + 8)?,
                expire: read_u32(msg, next + 12)?,
                minimum: read_u32(msg, next + 16)?,
            }
        }
        _ => RData::Other(msg[offset..end].to_vec()),
    };

    if class != CLASS_IN { return Ok((None, end)); }
    Ok((Some(ResourceRecord { name, rtype, ttl, data }), end))
}

/// Reads a possibly compressed name; returns it in lower case without the
/// trailing dot, plus the offset just past the name at its original position.
fn read_name(msg: &[u8], start: usize) -> Result<(String, usize), WireError> {
    let mut labels: Vec<String> = Vec::new();
    let mut offset = start;
    let mut resume_at = None;
    let mut hops = 0;

    loop {
        let len = *msg.get(offset).ok_or(WireError::Truncated(offset))?;
        match len & 0xC0 {
            0xC0 => {
                let low = *msg.get(offset + 1).ok_or(WireError::Truncated(offset + 1))?;
                if resume_at.is_none() { resume_at = Some(offset + 2); }
                hops += 1;
                if hops > MAX_POINTER_HOPS { return Err(WireError::PointerLoop(offset)); }
                offset = (((len & 0x3F) as usize) << 8) | low as usize;
            }
            0x00 => {
                offset += 1;
                if len == 0 { break; }
                let end = offset + len as usize;
                if end > msg.len() { return Err(WireError::Truncated(end)); }
                labels.push(String::from_utf8_lossy(&msg[offset..end]).to_ascii_lowercase());
                offset = end;
            }
            _ => return Err(WireError::BadLabel(len)),
        }
    }

    Ok((labels.join("."), resume_at.unwrap_or(offset)))
}

fn read_u16(msg: &[u8], offset: usize) -> Result<u16, WireError> {
    match msg.get(offset..offset + 2) {
        Some(b) => Ok(((b[0] as u16) << 8) | b[1] as u16),
        None => Err(WireError::Truncated(offset)),
    }
}

fn read_u32(msg: &[u8], offset: usize) -> Result<u32, WireError> {
    match msg.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(WireError::Truncated(offset)),
    }
}
