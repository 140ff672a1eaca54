//! Host timing capability probing

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::TimingTier;

const PPS_DEVICE: &str = "/dev/pps0";

/// Timing hardware available on the test host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingCapabilities {
    /// Every probed interface exposes a PTP hardware clock
    pub hardware_timestamps: bool,
    /// A PPS reference device is present
    pub external_reference: bool,
}

impl TimingCapabilities {
    /// Probe sysfs for PHCs behind `interfaces` and for a PPS device.
    pub fn probe<S: AsRef<str>>(interfaces: &[S]) -> Self {
        Self::probe_under(Path::new("/"), interfaces)
    }

    fn probe_under<S: AsRef<str>>(root: &Path, interfaces: &[S]) -> Self {
        let hardware_timestamps = !interfaces.is_empty()
            && interfaces.iter().all(|iface| {
                let ptp = root
                    .join("sys/class/net")
                    .join(iface.as_ref())
                    .join("device/ptp");
                let present = ptp.is_dir();
                debug!("PHC probe {}: {}", ptp.display(), present);
                present
            });

        let pps = root.join(PPS_DEVICE.trim_start_matches('/'));
        let external_reference = hardware_timestamps && pps.exists();

        Self {
            hardware_timestamps,
            external_reference,
        }
    }

    /// Best tier these capabilities support
    pub fn best_tier(&self) -> TimingTier {
        match (self.hardware_timestamps, self.external_reference) {
            (true, true) => TimingTier::TierC,
            (true, false) => TimingTier::TierB,
            _ => TimingTier::TierA,
        }
    }
}
