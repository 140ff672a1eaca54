//! Ethernet II frames with stacked VLAN tags

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::MacAddr;

/// Destination + source + EtherType
pub const HEADER_LEN: usize = 14;
/// TPID + TCI
pub const TAG_LEN: usize = 4;
/// Minimum frame length on the wire, excluding FCS
pub const MIN_FRAME_LEN: usize = 60;
pub const MAX_TAGS: usize = 2;
pub const MAX_VID: u16 = 4095;
pub const MAX_PCP: u8 = 7;

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("{0} VLAN tags present, at most 2 supported")]
    TooManyTags(usize),

    #[error("EtherType 0x{0:04x} is an 802.3 length field, not a protocol type")]
    InvalidEtherType(u16),

    #[error("payload EtherType 0x{0:04x} collides with a VLAN TPID")]
    EtherTypeIsTpid(u16),

    #[error("VLAN ID {0} out of range 0..=4095")]
    VidOutOfRange(u16),

    #[error("PCP {0} out of range 0..=7")]
    PcpOutOfRange(u8),
}

/// Tag protocol identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tpid {
    /// 802.1Q customer VLAN tag
    Cvlan,
    /// 802.1ad service VLAN tag
    Svlan,
    /// Pre-standard Q-in-Q tag
    Legacy,
}

impl Tpid {
    pub fn value(&self) -> u16 {
        match self {
            Tpid::Cvlan => 0x8100,
            Tpid::Svlan => 0x88a8,
            Tpid::Legacy => 0x9100,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0x8100 => Some(Tpid::Cvlan),
            0x88a8 => Some(Tpid::Svlan),
            0x9100 => Some(Tpid::Legacy),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tpid::Cvlan => "cvlan",
            Tpid::Svlan => "svlan",
            Tpid::Legacy => "legacy",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cvlan" | "0x8100" => Some(Tpid::Cvlan),
            "svlan" | "0x88a8" => Some(Tpid::Svlan),
            "legacy" | "0x9100" => Some(Tpid::Legacy),
            _ => None,
        }
    }

    pub fn all() -> Vec<Tpid> {
        vec![Tpid::Cvlan, Tpid::Svlan, Tpid::Legacy]
    }
}

impl fmt::Display for Tpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.value())
    }
}

/// Protocol type carried after the last tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EtherType(pub u16);

impl EtherType {
    pub const IPV4: EtherType = EtherType(0x0800);
    pub const ARP: EtherType = EtherType(0x0806);
    pub const PTP: EtherType = EtherType(0x88f7);
    /// IEEE 802 local experimental EtherType 1
    pub const LOCAL_EXPERIMENTAL: EtherType = EtherType(0x88b5);

    pub fn value(&self) -> u16 {
        self.0
    }

    fn check(&self) -> Result<(), CodecError> {
        if self.0 < 0x0600 {
            return Err(CodecError::InvalidEtherType(self.0));
        }
        if Tpid::from_value(self.0).is_some() {
            return Err(CodecError::EtherTypeIsTpid(self.0));
        }
        Ok(())
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// One VLAN tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanTag {
    pub tpid: Tpid,
    pub vid: u16,
    #[serde(default)]
    pub pcp: u8,
    #[serde(default)]
    pub dei: bool,
}

impl VlanTag {
    pub fn new(tpid: Tpid, vid: u16, pcp: u8) -> Result<Self, CodecError> {
        let tag = Self {
            tpid,
            vid,
            pcp,
            dei: false,
        };
        tag.check()?;
        Ok(tag)
    }

    pub fn with_dei(mut self, dei: bool) -> Self {
        self.dei = dei;
        self
    }

    /// Tag control information: PCP(3) | DEI(1) | VID(12)
    pub fn tci(&self) -> u16 {
        (u16::from(self.pcp) << 13) | (u16::from(self.dei) << 12) | (self.vid & 0x0fff)
    }

    fn from_tci(tpid: Tpid, tci: u16) -> Self {
        Self {
            tpid,
            vid: tci & 0x0fff,
            pcp: (tci >> 13) as u8,
            dei: tci & 0x1000 != 0,
        }
    }

    fn check(&self) -> Result<(), CodecError> {
        if self.vid > MAX_VID {
            return Err(CodecError::VidOutOfRange(self.vid));
        }
        if self.pcp > MAX_PCP {
            return Err(CodecError::PcpOutOfRange(self.pcp));
        }
        Ok(())
    }
}

impl fmt::Display for VlanTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vid={} pcp={}", self.tpid, self.vid, self.pcp)?;
        if self.dei {
            write!(f, " dei")?;
        }
        Ok(())
    }
}

/// Decoded Ethernet frame; tags are ordered outermost first
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub tags: Vec<VlanTag>,
    pub ethertype: EtherType,
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn new(src: MacAddr, dst: MacAddr, ethertype: EtherType, payload: Vec<u8>) -> Self {
        Self {
            dst,
            src,
            tags: Vec::new(),
            ethertype,
            payload,
        }
    }

    pub fn with_tag(mut self, tag: VlanTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn outer_tag(&self) -> Option<&VlanTag> {
        self.tags.first()
    }

    pub fn outer_vid(&self) -> Option<u16> {
        self.outer_tag().map(|t| t.vid)
    }

    pub fn is_tagged(&self) -> bool {
        !self.tags.is_empty()
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.tags.len() * TAG_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        build(self.src, self.dst, &self.tags, self.ethertype, &self.payload)
    }

    /// One-line description used in logs and evidence
    pub fn summary(&self) -> String {
        let mut out = format!("{} > {}", self.src, self.dst);
        for tag in &self.tags {
            out.push_str(&format!(" [{tag}]"));
        }
        out.push_str(&format!(
            " type={} len={}",
            self.ethertype,
            self.wire_len()
        ));
        out
    }
}

/// Encode a frame. No padding is applied.
pub fn build(
    src: MacAddr,
    dst: MacAddr,
    tags: &[VlanTag],
    ethertype: EtherType,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    if tags.len() > MAX_TAGS {
        return Err(CodecError::TooManyTags(tags.len()));
    }
    for tag in tags {
        tag.check()?;
    }
    ethertype.check()?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + tags.len() * TAG_LEN + payload.len());
    bytes.extend_from_slice(&dst.octets());
    bytes.extend_from_slice(&src.octets());
    for tag in tags {
        bytes.extend_from_slice(&tag.tpid.value().to_be_bytes());
        bytes.extend_from_slice(&tag.tci().to_be_bytes());
    }
    bytes.extend_from_slice(&ethertype.value().to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Decode a frame. Any recognised TPID after the source address starts a tag.
pub fn parse(bytes: &[u8]) -> Result<EthernetFrame, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let dst = MacAddr(read_mac(bytes, 0));
    let src = MacAddr(read_mac(bytes, 6));

    let mut offset = 12;
    let mut type_field = read_u16(bytes, offset)?;
    offset += 2;

    let mut tags = Vec::new();
    while let Some(tpid) = Tpid::from_value(type_field) {
        if tags.len() == MAX_TAGS {
            return Err(CodecError::TooManyTags(MAX_TAGS + 1));
        }
        let tci = read_u16(bytes, offset)?;
        type_field = read_u16(bytes, offset + 2)?;
        offset += TAG_LEN;
        tags.push(VlanTag::from_tci(tpid, tci));
    }

    if type_field < 0x0600 {
        return Err(CodecError::InvalidEtherType(type_field));
    }

    Ok(EthernetFrame {
        dst,
        src,
        tags,
        ethertype: EtherType(type_field),
        payload: bytes[offset..].to_vec(),
    })
}

fn read_mac(bytes: &[u8], offset: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[offset..offset + 6]);
    mac
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, CodecError> {
    match bytes.get(offset..offset + 2) {
        Some(pair) => Ok(u16::from_be_bytes([pair[0], pair[1]])),
        None => Err(CodecError::Truncated {
            needed: offset + 2,
            available: bytes.len(),
        }),
    }
}

/// Incremental frame construction
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    frame: EthernetFrame,
    pad: bool,
}

impl FrameBuilder {
    pub fn new(src: MacAddr, dst: MacAddr) -> Self {
        Self {
            frame: EthernetFrame::new(src, dst, EtherType::LOCAL_EXPERIMENTAL, Vec::new()),
            pad: false,
        }
    }

    pub fn tag(mut self, tag: VlanTag) -> Self {
        self.frame.tags.push(tag);
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = VlanTag>) -> Self {
        self.frame.tags.extend(tags);
        self
    }

    pub fn ethertype(mut self, ethertype: EtherType) -> Self {
        self.frame.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.frame.payload = payload.into();
        self
    }

    /// Zero-fill the payload so the frame reaches the 60-byte minimum.
    pub fn padded(mut self) -> Self {
        self.pad = true;
        self
    }

    /// Final frame, padding materialized into the payload
    pub fn frame(&self) -> EthernetFrame {
        let mut frame = self.frame.clone();
        if self.pad && frame.wire_len() < MIN_FRAME_LEN {
            let fill = MIN_FRAME_LEN - frame.wire_len();
            frame.payload.extend(std::iter::repeat(0u8).take(fill));
        }
        frame
    }

    pub fn build(&self) -> Result<Vec<u8>, CodecError> {
        self.frame().encode()
    }
}
