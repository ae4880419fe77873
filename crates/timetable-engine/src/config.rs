//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! timezone = "Asia/Singapore"
//! call_timeout_ms = 5000
//! lock_timeout_ms = 10000
//!
//! [window]
//! start = "08:00:00"
//! end = "10:00:00"
//!
//! [fallback]
//! start = "09:00:00"
//! end = "10:00:00"
//! ```

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::freeblock::DailyWindow;
use crate::timeparse::FallbackTimes;

pub const DEFAULT_TIMEZONE: &str = "Asia/Singapore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// IANA timezone all wall-clock times are read in.
    pub timezone: String,
    /// Daily window free blocks are derived within.
    pub window: DailyWindow,
    /// Interval substituted when time text cannot be parsed.
    pub fallback: FallbackTimes,
    /// Upper bound on every collaborator call.
    pub call_timeout_ms: u64,
    /// Upper bound on waiting for a practitioner lock.
    pub lock_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timezone: DEFAULT_TIMEZONE.to_string(),
            window: DailyWindow::default(),
            fallback: FallbackTimes::default(),
            call_timeout_ms: 5_000,
            lock_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| ScheduleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScheduleError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// # Errors
    ///
    /// Returns [`ScheduleError::Config`] for an unknown timezone, an empty
    /// or inverted window or fallback, or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        self.tz()?;
        if self.window.start >= self.window.end {
            return Err(ScheduleError::Config(format!(
                "window start {} must precede end {}",
                self.window.start, self.window.end
            )));
        }
        if self.fallback.start >= self.fallback.end {
            return Err(ScheduleError::Config(format!(
                "fallback start {} must precede end {}",
                self.fallback.start, self.fallback.end
            )));
        }
        if self.call_timeout_ms == 0 || self.lock_timeout_ms == 0 {
            return Err(ScheduleError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| ScheduleError::Config(format!("unknown timezone '{s}'")))
}
