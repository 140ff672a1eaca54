//! Forwarding latency measurement

use async_trait::async_trait;
use tracing::debug;

use super::probe::{collect, drain, probe_frame};
use super::{HandlerContext, HandlerError, SpecHandler};
use crate::models::{Evidence, FrameRecord};

/// Time from handing the probe to the transport until its first copy is
/// captured on the egress port, both stamped by the run's timing source.
#[derive(Clone, Copy, Debug, Default)]
pub struct LatencyHandler;

#[async_trait]
impl SpecHandler for LatencyHandler {
    fn name(&self) -> &'static str {
        "latency"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
        let (ingress, egress) = ctx.pair()?;
        let mut evidence = Evidence::default();

        drain(ctx, &[ingress, egress]).await?;

        let probe = probe_frame(ctx)?;
        let sent_at = ctx.clock.now();
        ctx.transport.send(ingress, &probe).await?;
        evidence.record_sent(FrameRecord::new(ingress, sent_at, probe));

        collect(ctx, &[egress], ctx.nonce(), &mut evidence).await?;
        evidence.latency = evidence
            .frames_on(egress)
            .iter()
            .map(|f| f.timestamp)
            .min()
            .map(|first| first.since(sent_at));

        match evidence.latency {
            Some(latency) => debug!("{}: latency {:?}", ctx.case.id, latency),
            None => evidence.note(format!("no probe captured on port {egress}")),
        }
        Ok(evidence)
    }
}
