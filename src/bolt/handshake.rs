//! Version negotiation.
//!
//! The client opens with a 4-byte magic preamble followed by four 4-byte
//! proposals in preference order, each encoded `[0x00, range, minor, major]`
//! (`range` lets the server pick any minor within `[minor-range, minor]`).
//! The server answers with one chosen version `[0, 0, minor, major]`, or
//! all zeros when nothing overlaps.

use std::fmt;

/// Bolt handshake preamble.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// A negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Baseline 4.4; everything 5.x is preferred.
    pub fn supported(self) -> bool {
        match self.major {
            5 => true,
            4 => self.minor >= 4,
            _ => false,
        }
    }

    /// LOGON/LOGOFF are split out of HELLO from 5.1 onward.
    pub fn separate_logon(self) -> bool {
        self >= Version::new(5, 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One handshake proposal: a version plus a backward minor range.
#[derive(Debug, Clone, Copy)]
pub struct Proposal {
    pub major: u8,
    pub minor: u8,
    pub range: u8,
}

impl Proposal {
    const fn new(major: u8, minor: u8, range: u8) -> Self {
        Self {
            major,
            minor,
            range,
        }
    }

    fn to_bytes(self) -> [u8; 4] {
        [0x00, self.range, self.minor, self.major]
    }
}

/// The preference table. Adding a minor version is a one-entry change.
pub const PROPOSALS: [Proposal; 4] = [
    Proposal::new(5, 4, 4),
    Proposal::new(5, 4, 2),
    Proposal::new(4, 4, 0),
    Proposal::new(3, 0, 0),
];

/// The full 20-byte client opening: magic followed by four proposals.
pub fn client_opening() -> [u8; 20] {
    let mut out = [0u8; 20];
    out[..4].copy_from_slice(&BOLT_MAGIC);
    for (i, proposal) in PROPOSALS.iter().enumerate() {
        out[4 + i * 4..8 + i * 4].copy_from_slice(&proposal.to_bytes());
    }
    out
}

/// Outcome of reading the server's 4-byte reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    Version(Version),
    /// All-zero reply: no proposal was acceptable.
    Unsupported,
    /// Reply bytes outside the `[0, 0, minor, major]` shape.
    Malformed([u8; 4]),
}

pub fn parse_reply(reply: [u8; 4]) -> Negotiated {
    if reply == [0, 0, 0, 0] {
        return Negotiated::Unsupported;
    }
    if reply[0] != 0 || reply[1] != 0 {
        return Negotiated::Malformed(reply);
    }
    Negotiated::Version(Version::new(reply[3], reply[2]))
}
