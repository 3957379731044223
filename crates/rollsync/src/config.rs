use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{Tick, error::SyncError};

/// Tunables of the synchronization loop.
///
/// Flatten this into a binary's CLI with `#[command(flatten)]`; the defaults
/// below are the ones `SyncConfig::default()` returns.
#[derive(Args, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of state snapshots kept behind the current tick
    #[arg(long, default_value_t = 30)]
    pub max_buffer_size: usize,

    /// Ticks between two advantage recalculations
    #[arg(long, default_value_t = 60)]
    pub ticks_to_recalculate_advantage: usize,

    /// Ticks between generating local input and consuming it
    #[arg(long, default_value_t = 2)]
    pub input_delay: Tick,

    /// Maximum number of ticks carried by one input message
    #[arg(long, default_value_t = 5)]
    pub max_input_frames_per_message: usize,

    /// Maximum number of input messages sent to one peer per tick
    #[arg(long, default_value_t = 2)]
    pub max_messages_at_once: usize,

    /// Consecutive failed buffer cleanups before synchronization is abandoned
    #[arg(long, default_value_t = 300)]
    pub max_input_buffer_underruns: i32,

    /// Send-only ticks after synchronization is regained
    #[arg(long, default_value_t = 2)]
    pub skip_ticks_after_sync_regained: i32,

    /// Keep two snapshots per tick and interpolate between them on render
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub interpolation: bool,

    /// Milliseconds between two pings to every peer
    #[arg(long, default_value_t = 1000)]
    pub ping_interval_ms: u64,

    /// Fixed simulation rate
    #[arg(long, default_value_t = 60)]
    pub tick_rate_hz: u32,

    /// Forced rollback depth on every tick (debugging determinism)
    #[arg(long, default_value_t = 0)]
    pub debug_rollback_ticks: Tick,

    /// Forward resolved snapshots to the host for desync checks
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub log_state: bool,

    /// Ticks without real input after which the default prediction drops an object's input
    #[arg(long, default_value_t = 5)]
    pub prediction_staleness_ticks: Tick,

    /// Input messages larger than this are reported
    #[arg(long, default_value_t = 700)]
    pub debug_message_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 30,
            ticks_to_recalculate_advantage: 60,
            input_delay: 2,
            max_input_frames_per_message: 5,
            max_messages_at_once: 2,
            max_input_buffer_underruns: 300,
            skip_ticks_after_sync_regained: 2,
            interpolation: false,
            ping_interval_ms: 1000,
            tick_rate_hz: 60,
            debug_rollback_ticks: 0,
            log_state: false,
            prediction_staleness_ticks: 5,
            debug_message_bytes: 700,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: &str| Err(SyncError::InvalidConfig(msg.to_string()));
        if self.max_buffer_size == 0 {
            return invalid("max_buffer_size must be at least 1");
        }
        if self.max_input_frames_per_message == 0 || self.max_messages_at_once == 0 {
            return invalid("input batching limits must be at least 1");
        }
        if self.input_delay < 0 {
            return invalid("input_delay must not be negative");
        }
        if self.max_input_buffer_underruns <= 0 {
            return invalid("max_input_buffer_underruns must be at least 1");
        }
        if self.skip_ticks_after_sync_regained < 0 || self.debug_rollback_ticks < 0 {
            return invalid("tick counts must not be negative");
        }
        if self.debug_rollback_ticks as usize >= self.max_buffer_size {
            return invalid("debug_rollback_ticks must be smaller than max_buffer_size");
        }
        if self.tick_rate_hz == 0 {
            return invalid("tick_rate_hz must be at least 1");
        }
        Ok(())
    }

    /// Duration of one tick in seconds.
    pub fn tick_time(&self) -> f32 {
        1.0 / self.tick_rate_hz.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        sync: SyncConfig,
    }

    #[test]
    fn cli_defaults_match_default_impl() {
        let cli = Cli::parse_from(["test"]);
        assert_eq!(cli.sync, SyncConfig::default());
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "test",
            "--input-delay",
            "4",
            "--interpolation",
            "true",
        ]);
        assert_eq!(cli.sync.input_delay, 4);
        assert!(cli.sync.interpolation);
        assert!(cli.sync.validate().is_ok());
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut config = SyncConfig::default();
        config.max_input_frames_per_message = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.debug_rollback_ticks = 30;
        assert!(config.validate().is_err());

        assert!(SyncConfig::default().validate().is_ok());
    }
}
