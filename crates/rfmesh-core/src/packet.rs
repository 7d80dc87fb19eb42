//! Packet envelope and binary wire format.
//!
//! A packet's id is assigned once at creation and survives every per-hop
//! clone, which is what makes duplicate detection and loop suppression work.
//! `hop_limit` strictly decreases per forward and a packet with
//! `hop_limit == 0` is never forwarded again.
//!
//! ## Wire layout
//!
//! ```text
//! ┌─────────────┬─────────────┬─────────────┬────┬────┬──────────┬─────────┬─────────┐
//! │ len(1B)+id  │ len(1B)+src │ len(1B)+dst │ HL │ HC │ ts (8B)  │ plen 4B │ payload │
//! │   UTF-8     │   UTF-8     │   UTF-8     │ 1B │ 1B │ f64 LE   │ u32 LE  │  bytes  │
//! └─────────────┴─────────────┴─────────────┴────┴────┴──────────┴─────────┴─────────┘
//! ```
//!
//! Field order and widths are the one bit-exact artifact of the system;
//! hop_limit and hop_count being single bytes caps both at 255.

use crate::rng::SimRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default hop limit for newly created packets.
pub const DEFAULT_HOP_LIMIT: u8 = 7;

/// Wire sentinel for the broadcast destination.
pub const BROADCAST_WIRE: &str = "*";

/// Where a packet is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Node(String),
    Broadcast,
}

impl Destination {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Destination::Broadcast)
    }

    /// True if this destination addresses the given node (broadcast never
    /// matches a specific id; delivery of broadcasts is decided separately).
    pub fn is_node(&self, id: &str) -> bool {
        matches!(self, Destination::Node(n) if n == id)
    }

    fn as_wire(&self) -> &str {
        match self {
            Destination::Node(id) => id,
            Destination::Broadcast => BROADCAST_WIRE,
        }
    }

    fn from_wire(s: &str) -> Destination {
        if s == BROADCAST_WIRE {
            Destination::Broadcast
        } else {
            Destination::Node(s.to_string())
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Routing header carried by every per-hop clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Logical message id, invariant across clones.
    pub id: String,
    /// Originating node id.
    pub source: String,
    pub destination: Destination,
    /// Remaining forwards; 0 terminates forwarding.
    pub hop_limit: u8,
    /// Hops traversed so far.
    pub hop_count: u8,
    /// Simulation time of creation, milliseconds.
    pub created_at_ms: f64,
}

/// Bookkeeping that never goes on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PacketMetadata {
    /// Node ids the packet has traversed, source first.
    pub path: Vec<String>,
    /// Simulation time of first delivery, if any.
    pub delivered_at_ms: Option<f64>,
}

/// A simulated radio packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
    pub metadata: PacketMetadata,
}

impl Packet {
    /// Create a fresh packet. The id combines creation time with a random
    /// suffix so concurrent senders cannot collide.
    pub fn create(
        source: &str,
        destination: Destination,
        payload: Vec<u8>,
        hop_limit: u8,
        now_ms: f64,
        rng: &mut SimRng,
    ) -> Packet {
        let id = format!("{}-{:08x}", now_ms as u64, rng.next_u32());
        Packet {
            header: PacketHeader {
                id,
                source: source.to_string(),
                destination,
                hop_limit,
                hop_count: 0,
                created_at_ms: now_ms,
            },
            payload,
            metadata: PacketMetadata {
                path: vec![source.to_string()],
                delivered_at_ms: None,
            },
        }
    }

    /// Clone for one forwarding hop, or `None` when the hop limit is spent.
    ///
    /// The clone keeps the id and payload, decrements `hop_limit`,
    /// increments `hop_count`, and appends the forwarder to the path.
    pub fn clone_for_forward(&self, forwarder: &str) -> Option<Packet> {
        if self.header.hop_limit == 0 {
            return None;
        }
        let mut next = self.clone();
        next.header.hop_limit -= 1;
        next.header.hop_count += 1;
        next.metadata.path.push(forwarder.to_string());
        Some(next)
    }

    /// Encode to the wire layout documented in the module header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let mut bytes = Vec::with_capacity(
            3 + h.id.len() + h.source.len() + h.destination.as_wire().len()
                + 2 + 8 + 4 + self.payload.len(),
        );
        push_str(&mut bytes, &h.id);
        push_str(&mut bytes, &h.source);
        push_str(&mut bytes, h.destination.as_wire());
        bytes.push(h.hop_limit);
        bytes.push(h.hop_count);
        bytes.extend_from_slice(&h.created_at_ms.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode from the wire layout. Returns `None` on truncated or
    /// non-UTF-8 input. The decoded path restarts at the source.
    pub fn from_bytes(bytes: &[u8]) -> Option<Packet> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let id = cursor.read_str()?;
        let source = cursor.read_str()?;
        let destination = Destination::from_wire(&cursor.read_str()?);
        let hop_limit = cursor.read_u8()?;
        let hop_count = cursor.read_u8()?;
        let created_at_ms = f64::from_le_bytes(cursor.read_array::<8>()?);
        let payload_len = u32::from_le_bytes(cursor.read_array::<4>()?) as usize;
        let payload = cursor.read_bytes(payload_len)?.to_vec();

        Some(Packet {
            metadata: PacketMetadata {
                path: vec![source.clone()],
                delivered_at_ms: None,
            },
            header: PacketHeader {
                id,
                source,
                destination,
                hop_limit,
                hop_count,
                created_at_ms,
            },
            payload,
        })
    }
}

fn push_str(bytes: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() <= 255, "wire strings are length-prefixed by one byte");
    bytes.push(s.len() as u8);
    bytes.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn read_u8(&mut self) -> Option<u8> {
        Some(self.read_bytes(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.read_bytes(N)?.try_into().ok()
    }

    fn read_str(&mut self) -> Option<String> {
        let len = self.read_u8()? as usize;
        let raw = self.read_bytes(len)?;
        std::str::from_utf8(raw).ok().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> SimRng {
        SimRng::new(42)
    }

    #[test]
    fn test_create_initializes_path() {
        let p = Packet::create("a", Destination::Broadcast, b"hi".to_vec(), 7, 1000.0, &mut rng());
        assert_eq!(p.header.hop_count, 0);
        assert_eq!(p.header.hop_limit, 7);
        assert_eq!(p.metadata.path, vec!["a".to_string()]);
        assert!(p.header.id.starts_with("1000-"));
    }

    #[test]
    fn test_clone_for_forward() {
        let p = Packet::create("a", Destination::Node("z".into()), b"x".to_vec(), 3, 0.0, &mut rng());
        let f = p.clone_for_forward("b").unwrap();
        assert_eq!(f.header.hop_limit, 2);
        assert_eq!(f.header.hop_count, 1);
        assert_eq!(f.header.id, p.header.id);
        assert_eq!(f.payload, p.payload);
        assert_eq!(f.metadata.path, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_clone_for_forward_expired() {
        let mut p = Packet::create("a", Destination::Broadcast, vec![], 1, 0.0, &mut rng());
        p.header.hop_limit = 0;
        assert!(p.clone_for_forward("b").is_none());
    }

    #[test]
    fn test_wire_round_trip() {
        let long_id = "node-".repeat(9); // 45 chars
        let mut p = Packet::create(&long_id, Destination::Node("receiver-with-a-rather-long-identifier-string".into()),
            (0..=255u8).collect(), 9, 123456.789, &mut rng());
        p.header.hop_count = 4;

        let decoded = Packet::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(decoded.header.id, p.header.id);
        assert_eq!(decoded.header.source, p.header.source);
        assert_eq!(decoded.header.destination, p.header.destination);
        assert_eq!(decoded.header.hop_limit, 9);
        assert_eq!(decoded.header.hop_count, 4);
        assert_eq!(decoded.header.created_at_ms, 123456.789);
        assert_eq!(decoded.payload, p.payload);
    }

    #[test]
    fn test_wire_round_trip_empty_and_large_payload() {
        for size in [0usize, 1, 1000, 4096] {
            let p = Packet::create("s", Destination::Broadcast, vec![0xAB; size], 7, 1.0, &mut rng());
            let decoded = Packet::from_bytes(&p.to_bytes()).unwrap();
            assert_eq!(decoded.payload.len(), size);
            assert!(decoded.header.destination.is_broadcast());
        }
    }

    #[test]
    fn test_wire_layout_field_order() {
        let p = Packet::create("ab", Destination::Node("cd".into()), vec![1, 2, 3], 5, 0.0, &mut rng());
        let bytes = p.to_bytes();
        let id_len = bytes[0] as usize;
        // source length byte follows the id bytes
        assert_eq!(bytes[1 + id_len] as usize, 2);
        assert_eq!(&bytes[2 + id_len..4 + id_len], b"ab");
        // destination follows source
        assert_eq!(bytes[4 + id_len] as usize, 2);
        assert_eq!(&bytes[5 + id_len..7 + id_len], b"cd");
        // then hop limit, hop count
        assert_eq!(bytes[7 + id_len], 5);
        assert_eq!(bytes[8 + id_len], 0);
        // payload length is little-endian u32 before the payload bytes
        let plen_off = 9 + id_len + 8;
        assert_eq!(&bytes[plen_off..plen_off + 4], &3u32.to_le_bytes());
        assert_eq!(&bytes[plen_off + 4..], &[1, 2, 3]);
    }

    #[test]
    fn test_from_bytes_rejects_truncated() {
        let p = Packet::create("a", Destination::Broadcast, vec![9; 16], 7, 0.0, &mut rng());
        let bytes = p.to_bytes();
        for cut in [0, 1, bytes.len() / 2, bytes.len() - 1] {
            assert!(Packet::from_bytes(&bytes[..cut]).is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn test_broadcast_sentinel_round_trip() {
        let p = Packet::create("a", Destination::Broadcast, vec![], 7, 0.0, &mut rng());
        let decoded = Packet::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(decoded.header.destination, Destination::Broadcast);
    }
}
