//! Boot-time system clock sanity check.
//!
//! A proposer whose clock drifts more than [`MAX_CLOCK_GAP`] from
//! network time would seal blocks other validators reject, so mining
//! refuses to start on a drifting clock. The network time source is an
//! external collaborator behind [`ClockProbe`]; an unreachable probe
//! only warns, and setting `IGNORE_NTP_CHECK` bypasses the check
//! entirely.

use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::traits::ClockProbe;

/// Maximum tolerated gap between system and network time.
pub const MAX_CLOCK_GAP: Duration = Duration::from_secs(10);

/// Environment variable bypassing the check.
pub const IGNORE_NTP_CHECK_ENV: &str = "IGNORE_NTP_CHECK";

/// The system clock deviates too far from network time.
#[derive(Debug, thiserror::Error)]
#[error("system clock deviates {gap:?} from network time, max is {MAX_CLOCK_GAP:?}")]
pub struct ClockDriftError {
    /// Observed deviation
    pub gap: Duration,
}

/// Validates the system clock against a network time probe.
pub fn check_system_clock(probe: &dyn ClockProbe) -> Result<(), ClockDriftError> {
    if std::env::var_os(IGNORE_NTP_CHECK_ENV).is_some() {
        debug!("clock check bypassed via {}", IGNORE_NTP_CHECK_ENV);
        return Ok(());
    }

    let network = match probe.network_time() {
        Ok(time) => time,
        Err(err) => {
            warn!(error = %err, "network time unavailable, check your connectivity");
            return Ok(());
        }
    };

    let now = SystemTime::now();
    let gap = match now.duration_since(network) {
        Ok(ahead) => ahead,
        Err(behind) => behind.duration(),
    };

    debug!(gap_ms = gap.as_millis() as u64, "clock check");
    if gap > MAX_CLOCK_GAP {
        return Err(ClockDriftError { gap });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BackendError;

    struct FixedProbe(SystemTime);

    impl ClockProbe for FixedProbe {
        fn network_time(&self) -> Result<SystemTime, BackendError> {
            Ok(self.0)
        }
    }

    struct DeadProbe;

    impl ClockProbe for DeadProbe {
        fn network_time(&self) -> Result<SystemTime, BackendError> {
            Err(BackendError::new("all servers unreachable"))
        }
    }

    #[test]
    fn accepts_synchronized_clock() {
        let probe = FixedProbe(SystemTime::now());
        assert!(check_system_clock(&probe).is_ok());
    }

    #[test]
    fn rejects_drifting_clock() {
        let probe = FixedProbe(SystemTime::now() - Duration::from_secs(60));
        let err = check_system_clock(&probe).unwrap_err();
        assert!(err.gap > MAX_CLOCK_GAP);
    }

    #[test]
    fn unreachable_probe_is_not_fatal() {
        assert!(check_system_clock(&DeadProbe).is_ok());
    }

    #[test]
    fn rejects_clock_behind_network_time() {
        let probe = FixedProbe(SystemTime::now() + Duration::from_secs(60));
        assert!(check_system_clock(&probe).is_err());
    }
}
