//! Stimulus construction and capture shared by the handlers

use futures::future::join_all;
use futures::StreamExt;
use tracing::trace;

use super::{HandlerContext, HandlerError};
use crate::codec::{parse, EthernetFrame, FrameBuilder, MacAddr, Tpid, VlanTag};
use crate::models::{effective_vid, Destination, Evidence, FrameRecord, FrameType, PortId};
use crate::transport::{CapturedFrame, TransportError};

/// Leading payload bytes of every probe frame
pub const PAYLOAD_MARKER: &[u8; 4] = b"L2CT";

/// Leading payload bytes of address-learning frames
pub const LEARN_MARKER: &[u8; 4] = b"L2LN";

const MULTICAST_GROUP: MacAddr = MacAddr::new([0x01, 0x00, 0x5e, 0x4c, 0x32, 0x01]);

/// Nonce of a case: FNV-1a over its ID, so it is unique within a run
/// whether or not the case was numbered
pub fn case_nonce(case_id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    case_id
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Marker, big-endian nonce, zero fill up to `size`
pub fn probe_payload(marker: &[u8; 4], nonce: u64, size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(size.max(12));
    payload.extend_from_slice(marker);
    payload.extend_from_slice(&nonce.to_be_bytes());
    if payload.len() < size {
        payload.resize(size, 0);
    }
    payload
}

pub fn carries_nonce(frame: &EthernetFrame, nonce: u64) -> bool {
    frame.payload.len() >= 12
        && frame.payload[..4] == PAYLOAD_MARKER[..]
        && frame.payload[4..12] == nonce.to_be_bytes()
}

pub fn probe_destination(destination: Destination, egress: PortId) -> MacAddr {
    match destination {
        Destination::Unicast => MacAddr::station(egress),
        Destination::Broadcast => MacAddr::BROADCAST,
        Destination::Multicast => MULTICAST_GROUP,
        Destination::UnknownUnicast => MacAddr::phantom(egress),
    }
}

/// Encoded stimulus for the case, sent from the ingress station
pub fn probe_frame(ctx: &HandlerContext<'_>) -> Result<Vec<u8>, HandlerError> {
    let (ingress, egress) = ctx.pair()?;
    let case = ctx.case;
    let port = ctx
        .profile
        .port(ingress)
        .ok_or(HandlerError::UnknownPort(ingress))?;
    let vid = case
        .vid()
        .unwrap_or_else(|| effective_vid(case.frame_type(), case.tpid(), None, port, ctx.profile));
    let pcp = case.pcp();

    let tags = match case.frame_type() {
        FrameType::Untagged => Vec::new(),
        FrameType::SingleTagged => vec![VlanTag::new(case.tpid(), vid, pcp)?],
        FrameType::DoubleTagged => {
            let outer = match case.tpid() {
                Tpid::Cvlan => Tpid::Svlan,
                other => other,
            };
            vec![
                VlanTag::new(outer, vid, pcp)?,
                VlanTag::new(Tpid::Cvlan, vid, pcp)?,
            ]
        }
    };

    let bytes = FrameBuilder::new(
        MacAddr::station(ingress),
        probe_destination(ctx.spec.stimulus.destination, egress),
    )
    .tags(tags)
    .ethertype(case.protocol().ethertype())
    .payload(probe_payload(PAYLOAD_MARKER, ctx.nonce(), case.payload_size()))
    .padded()
    .build()?;
    Ok(bytes)
}

/// Broadcast from the egress station in the case's VLAN, so the DUT learns it
pub fn learn_frame(ctx: &HandlerContext<'_>) -> Result<Vec<u8>, HandlerError> {
    let (_, egress) = ctx.pair()?;
    let port = ctx
        .profile
        .port(egress)
        .ok_or(HandlerError::UnknownPort(egress))?;
    let vid = ctx.case.effective_vid(ctx.profile).unwrap_or(port.pvid);

    let mut builder = FrameBuilder::new(MacAddr::station(egress), MacAddr::BROADCAST)
        .payload(probe_payload(LEARN_MARKER, ctx.nonce(), 46))
        .padded();
    if vid != port.pvid {
        builder = builder.tag(VlanTag::new(Tpid::Cvlan, vid, 0)?);
    }
    Ok(builder.build()?)
}

/// Discard anything already queued on `ports`
pub async fn drain(ctx: &HandlerContext<'_>, ports: &[PortId]) -> Result<(), HandlerError> {
    for &port in ports {
        let stale: Vec<CapturedFrame> = ctx
            .transport
            .receive(port, std::time::Duration::ZERO)
            .await?
            .collect()
            .await;
        if !stale.is_empty() {
            trace!("port {}: discarded {} stale frames", port, stale.len());
        }
    }
    Ok(())
}

/// Receive on every port concurrently and keep the frames carrying `nonce`
pub async fn collect(
    ctx: &HandlerContext<'_>,
    ports: &[PortId],
    nonce: u64,
    evidence: &mut Evidence,
) -> Result<(), HandlerError> {
    let captures = join_all(ports.iter().map(|&port| async move {
        let stream = ctx.transport.receive(port, ctx.receive_timeout).await?;
        let frames: Vec<CapturedFrame> = stream.collect().await;
        Ok::<_, TransportError>((port, frames))
    }))
    .await;

    for capture in captures {
        let (port, frames) = capture?;
        let mut unrelated = 0usize;
        for captured in frames {
            match parse(&captured.bytes) {
                Ok(frame) if carries_nonce(&frame, nonce) => {
                    evidence.record_received(FrameRecord::new(
                        port,
                        captured.timestamp,
                        captured.bytes,
                    ));
                }
                _ => unrelated += 1,
            }
        }
        if unrelated > 0 {
            evidence.note(format!("port {port}: ignored {unrelated} unrelated frames"));
        }
    }
    Ok(())
}
