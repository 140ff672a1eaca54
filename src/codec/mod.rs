//! Ethernet frame codec
//!
//! Builds and parses Ethernet II frames carrying zero, one or two 802.1Q/802.1ad
//! VLAN tags. Everything here is pure: no I/O, no clocks.

mod frame;
mod hexdump;
mod mac;

pub use frame::{
    build, parse, CodecError, EtherType, EthernetFrame, FrameBuilder, Tpid, VlanTag, HEADER_LEN,
    MAX_TAGS, MAX_VID, MIN_FRAME_LEN, TAG_LEN,
};
pub use hexdump::{frame_summary, hexdump};
pub use mac::{is_reserved_vid, MacAddr, MacParseError};
