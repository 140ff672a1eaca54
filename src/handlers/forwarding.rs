//! Forwarding behavior: which ports a probe reaches, and how it is tagged

use async_trait::async_trait;
use tracing::debug;

use super::probe::{collect, drain, learn_frame, probe_frame};
use super::{HandlerContext, HandlerError, SpecHandler};
use crate::models::{Evidence, FrameRecord, PortId};

/// Sends one probe from the ingress station and captures it on every port in
/// the case's scope. With `learn_destination`, the egress station announces
/// itself first.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardingHandler;

#[async_trait]
impl SpecHandler for ForwardingHandler {
    fn name(&self) -> &'static str {
        "forwarding"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Evidence, HandlerError> {
        let (ingress, egress) = ctx.pair()?;
        let observed: Vec<PortId> = ctx.case.scope.iter().copied().collect();
        let mut evidence = Evidence::default();

        drain(ctx, &observed).await?;

        if ctx.spec.stimulus.learn_destination {
            let announce = learn_frame(ctx)?;
            let sent_at = ctx.clock.now();
            ctx.transport.send(egress, &announce).await?;
            evidence.record_sent(FrameRecord::new(egress, sent_at, announce));
            drain(ctx, &observed).await?;
            debug!("{}: egress station announced on port {}", ctx.case.id, egress);
        }

        let probe = probe_frame(ctx)?;
        let sent_at = ctx.clock.now();
        ctx.transport.send(ingress, &probe).await?;
        evidence.record_sent(FrameRecord::new(ingress, sent_at, probe));

        collect(ctx, &observed, ctx.nonce(), &mut evidence).await?;
        debug!(
            "{}: probe seen on {:?}",
            ctx.case.id,
            evidence.observed_ports()
        );
        Ok(evidence)
    }
}
