//! Channel identity and the filesystem layout under `NEOPULT_HOME` (§6.1,
//! §6.2).

use std::path::PathBuf;

use anyhow::Context;

/// The channel this process instance owns. Immutable once read from the
/// environment (§3 "Channel").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel(u8);

impl Channel {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 99;

    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("NEOPULT_CHANNEL").context("NEOPULT_CHANNEL is not set")?;
        let n: u8 = raw
            .parse()
            .with_context(|| format!("NEOPULT_CHANNEL `{raw}` is not a valid integer"))?;
        Self::new(n)
    }

    pub fn new(n: u8) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (Self::MIN..=Self::MAX).contains(&n),
            "channel {n} is out of range {}..={}",
            Self::MIN,
            Self::MAX
        );
        Ok(Self(n))
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    /// The conventional admin websocket TCP port, `4200 + channel` (§4.6).
    pub fn admin_port(&self) -> u16 {
        4200 + self.0 as u16
    }
}

/// Resolves `NEOPULT_HOME/channel-<N>` (§6.2).
pub fn channel_home(channel: Channel) -> anyhow::Result<PathBuf> {
    let home = std::env::var("NEOPULT_HOME").context("NEOPULT_HOME is not set")?;
    Ok(PathBuf::from(home).join(format!("channel-{}", channel.number())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_channel() {
        assert!(Channel::new(100).is_err());
    }

    #[test]
    fn admin_port_is_conventional() {
        let channel = Channel::new(5).unwrap();
        assert_eq!(channel.admin_port(), 4205);
    }
}
