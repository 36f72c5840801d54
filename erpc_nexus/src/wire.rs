//! Out-of-band session management wire format: `{magic, version, kind,
//! source URI, source endpoint id, source session number, dest endpoint
//! id, dest session number, NIC address blob}`, all big-endian, carried in
//! plain UDP datagrams (`spec.md` §6).

/// Marks a datagram as belonging to this protocol, first 4 bytes of every
/// packet (ASCII `erpc`).
pub const MAGIC: u32 = 0x6572_7063;

/// Current wire format version.
pub const VERSION: u8 = 1;

/// Longest encodable source URI, in bytes.
pub const MAX_URI_LEN: usize = 256;

/// Longest encodable NIC address blob, in bytes.
pub const MAX_NIC_ADDR_LEN: usize = 64;

/// What a [`ManagementPacket`] is asking the receiving Nexus to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Requests a new session be established.
    ConnectReq,
    /// Acknowledges (or rejects) a [`PacketKind::ConnectReq`].
    ConnectResp,
    /// Requests an existing session be torn down.
    DisconnectReq,
    /// Acknowledges a [`PacketKind::DisconnectReq`].
    DisconnectResp,
}

impl PacketKind {
    const fn to_u8(self) -> u8 {
        match self {
            Self::ConnectReq => 0,
            Self::ConnectResp => 1,
            Self::DisconnectReq => 2,
            Self::DisconnectResp => 3,
        }
    }

    const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::ConnectReq),
            1 => Some(Self::ConnectResp),
            2 => Some(Self::DisconnectReq),
            3 => Some(Self::DisconnectResp),
            _ => None,
        }
    }
}

/// One out-of-band session-management datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementPacket {
    /// What this packet is asking for.
    pub kind: PacketKind,
    /// URI of the endpoint that sent this packet.
    pub source_uri: String,
    /// ID of the endpoint that sent this packet, within its process.
    pub source_endpoint_id: u8,
    /// Session number the sender is using for this session.
    pub source_session_num: u16,
    /// ID of the endpoint this packet is addressed to.
    pub dest_endpoint_id: u8,
    /// Session number the sender believes the destination is using, `0` if
    /// not yet known (e.g. the session number in a fresh `ConnectReq`).
    pub dest_session_num: u16,
    /// Transport-specific NIC address (e.g. a verbs queue-pair identity
    /// blob), opaque to the Nexus itself.
    pub nic_addr: Vec<u8>,
}

/// A [`ManagementPacket`] could not be encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum WireError {
    /// Datagram was shorter than the fixed-size portion of the header.
    #[display("management packet truncated: {len} bytes")]
    Truncated {
        /// Bytes actually present.
        len: usize,
    },
    /// The magic number didn't match.
    #[display("bad magic: {found:#010x}")]
    BadMagic {
        /// Magic value actually found.
        found: u32,
    },
    /// The version byte named a version this build doesn't understand.
    #[display("unsupported wire version: {found}")]
    UnsupportedVersion {
        /// Version actually found.
        found: u8,
    },
    /// The packet kind tag matched no known [`PacketKind`].
    #[display("invalid packet kind tag: {tag}")]
    InvalidKind {
        /// Tag byte that didn't match any variant.
        tag: u8,
    },
    /// The declared URI length exceeds [`MAX_URI_LEN`], or ran past the end
    /// of the datagram.
    #[display("source URI length {len} invalid (max {MAX_URI_LEN})")]
    BadUriLen {
        /// Declared length.
        len: usize,
    },
    /// The declared NIC address blob length exceeds [`MAX_NIC_ADDR_LEN`], or
    /// ran past the end of the datagram.
    #[display("NIC address length {len} invalid (max {MAX_NIC_ADDR_LEN})")]
    BadNicAddrLen {
        /// Declared length.
        len: usize,
    },
    /// The source URI bytes were not valid UTF-8.
    #[display("source URI is not valid UTF-8")]
    InvalidUriEncoding,
}

impl ManagementPacket {
    /// Encodes this packet as a UDP datagram payload.
    ///
    /// # Panics
    ///
    /// Panics if `source_uri` is longer than [`MAX_URI_LEN`] bytes or
    /// `nic_addr` is longer than [`MAX_NIC_ADDR_LEN`] bytes — the caller is
    /// responsible for keeping both within bounds before sending, since
    /// both are fixed at construction by this process, not by untrusted
    /// input.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        assert!(
            self.source_uri.len() <= MAX_URI_LEN,
            "source URI exceeds {MAX_URI_LEN} bytes"
        );
        assert!(
            self.nic_addr.len() <= MAX_NIC_ADDR_LEN,
            "NIC address blob exceeds {MAX_NIC_ADDR_LEN} bytes"
        );

        let mut out = Vec::with_capacity(16 + self.source_uri.len() + self.nic_addr.len());
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.push(VERSION);
        out.push(self.kind.to_u8());
        #[expect(clippy::cast_possible_truncation, reason = "checked <= MAX_URI_LEN above")]
        out.extend_from_slice(&(self.source_uri.len() as u16).to_be_bytes());
        out.extend_from_slice(self.source_uri.as_bytes());
        out.push(self.source_endpoint_id);
        out.extend_from_slice(&self.source_session_num.to_be_bytes());
        out.push(self.dest_endpoint_id);
        out.extend_from_slice(&self.dest_session_num.to_be_bytes());
        #[expect(clippy::cast_possible_truncation, reason = "checked <= MAX_NIC_ADDR_LEN above")]
        out.push(self.nic_addr.len() as u8);
        out.extend_from_slice(&self.nic_addr);
        out
    }

    /// Decodes a UDP datagram payload.
    ///
    /// # Errors
    ///
    /// See [`WireError`].
    pub fn decode(src: &[u8]) -> Result<Self, WireError> {
        const FIXED_PREFIX: usize = 4 + 1 + 1 + 2; // magic, version, kind, uri_len
        if src.len() < FIXED_PREFIX {
            return Err(WireError::Truncated { len: src.len() });
        }

        let magic = u32::from_be_bytes(src[0..4].try_into().expect("checked length above"));
        if magic != MAGIC {
            return Err(WireError::BadMagic { found: magic });
        }

        let version = src[4];
        if version != VERSION {
            return Err(WireError::UnsupportedVersion { found: version });
        }

        let kind =
            PacketKind::from_u8(src[5]).ok_or(WireError::InvalidKind { tag: src[5] })?;

        let uri_len = usize::from(u16::from_be_bytes(
            src[6..8].try_into().expect("checked length above"),
        ));
        if uri_len > MAX_URI_LEN {
            return Err(WireError::BadUriLen { len: uri_len });
        }
        let after_uri = FIXED_PREFIX + uri_len;
        if src.len() < after_uri {
            return Err(WireError::BadUriLen { len: uri_len });
        }
        let source_uri = String::from_utf8(src[FIXED_PREFIX..after_uri].to_vec())
            .map_err(|_| WireError::InvalidUriEncoding)?;

        const SESSION_FIELDS_LEN: usize = 1 + 2 + 1 + 2; // src_id, src_sess, dst_id, dst_sess
        let after_session_fields = after_uri + SESSION_FIELDS_LEN;
        if src.len() < after_session_fields + 1 {
            return Err(WireError::Truncated { len: src.len() });
        }

        let source_endpoint_id = src[after_uri];
        let source_session_num = u16::from_be_bytes(
            src[after_uri + 1..after_uri + 3]
                .try_into()
                .expect("checked length above"),
        );
        let dest_endpoint_id = src[after_uri + 3];
        let dest_session_num = u16::from_be_bytes(
            src[after_uri + 4..after_uri + 6]
                .try_into()
                .expect("checked length above"),
        );

        let nic_addr_len = usize::from(src[after_session_fields]);
        if nic_addr_len > MAX_NIC_ADDR_LEN {
            return Err(WireError::BadNicAddrLen { len: nic_addr_len });
        }
        let nic_addr_start = after_session_fields + 1;
        let nic_addr_end = nic_addr_start + nic_addr_len;
        if src.len() < nic_addr_end {
            return Err(WireError::BadNicAddrLen { len: nic_addr_len });
        }
        let nic_addr = src[nic_addr_start..nic_addr_end].to_vec();

        Ok(Self {
            kind,
            source_uri,
            source_endpoint_id,
            source_session_num,
            dest_endpoint_id,
            dest_session_num,
            nic_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ManagementPacket {
        ManagementPacket {
            kind: PacketKind::ConnectReq,
            source_uri: "host-a:9000".to_owned(),
            source_endpoint_id: 3,
            source_session_num: 12,
            dest_endpoint_id: 7,
            dest_session_num: 0,
            nic_addr: vec![0xAB; 16],
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let pkt = sample();
        let bytes = pkt.encode();
        let decoded = ManagementPacket::decode(&bytes).expect("decode");
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn every_kind_round_trips() {
        for kind in [
            PacketKind::ConnectReq,
            PacketKind::ConnectResp,
            PacketKind::DisconnectReq,
            PacketKind::DisconnectResp,
        ] {
            let mut pkt = sample();
            pkt.kind = kind;
            let bytes = pkt.encode();
            assert_eq!(ManagementPacket::decode(&bytes).expect("decode").kind, kind);
        }
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let err = ManagementPacket::decode(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { len: 3 }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().encode();
        bytes[0] ^= 0xFF;
        let err = ManagementPacket::decode(&bytes).unwrap_err();
        assert!(matches!(err, WireError::BadMagic { .. }));
    }

    #[test]
    fn empty_uri_and_nic_addr_round_trip() {
        let pkt = ManagementPacket {
            kind: PacketKind::DisconnectResp,
            source_uri: String::new(),
            source_endpoint_id: 0,
            source_session_num: 0,
            dest_endpoint_id: 0,
            dest_session_num: 0,
            nic_addr: Vec::new(),
        };
        let bytes = pkt.encode();
        assert_eq!(ManagementPacket::decode(&bytes).expect("decode"), pkt);
    }
}
