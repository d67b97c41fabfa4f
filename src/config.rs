//! C7 — configuration and bootstrap: CLI overrides, logging setup, and
//! loading the channel script (§6.1, §6.2, SPEC_FULL.md "Configuration &
//! bootstrap").

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use crate::channel::Channel;

/// CLI flag parsing is explicitly out of scope for behavior (§1); these
/// flags exist purely for local development convenience, overriding the
/// environment variables §6.1 names.
#[derive(Parser, Debug)]
#[command(name = "neopult", about = "Per-channel orchestrator")]
pub struct Cli {
    /// Overrides `NEOPULT_CHANNEL`.
    #[arg(long)]
    pub channel: Option<u8>,

    /// Overrides `NEOPULT_HOME`.
    #[arg(long)]
    pub home: Option<PathBuf>,
}

pub fn resolve_channel(cli: &Cli) -> anyhow::Result<Channel> {
    match cli.channel {
        Some(n) => Channel::new(n),
        None => Channel::from_env(),
    }
}

pub fn resolve_channel_home(cli: &Cli, channel: Channel) -> anyhow::Result<PathBuf> {
    match &cli.home {
        Some(home) => Ok(home.join(format!("channel-{}", channel.number()))),
        None => crate::channel::channel_home(channel),
    }
}

/// Installs a `tracing-subscriber` pipeline: `RUST_LOG`-style filtering to
/// stderr, plus a non-blocking file appender under the channel home (§6.1,
/// SPEC_FULL.md "Logging"). The returned guard must be held for the life of
/// the process or buffered log lines are lost on exit.
pub fn init_tracing(channel_home: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(channel_home)
        .with_context(|| format!("failed to create channel home {}", channel_home.display()))?;

    let file_appender = tracing_appender::rolling::never(channel_home, "neopult.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    Ok(guard)
}

/// Loads `channel-<N>/init.lua` into `lua`, first adding `plugins/` to the
/// script search path so the channel script's `require` calls resolve
/// plugin modules (§6.2). Errors raised here are fatal — the `neopult`
/// table must already be installed by [`crate::script::install_api`].
pub fn load_channel_script(lua: &mlua::Lua, channel_home: &Path) -> anyhow::Result<()> {
    let plugins_dir = channel_home.join("plugins");
    let package: mlua::Table = lua.globals().get("package")?;
    let existing_path: String = package.get("path").unwrap_or_default();
    let search_path = format!(
        "{}/?.lua;{}/?/init.lua;{existing_path}",
        plugins_dir.display(),
        plugins_dir.display(),
    );
    package.set("path", search_path)?;

    let script_path = channel_home.join("init.lua");
    let source = std::fs::read_to_string(&script_path)
        .with_context(|| format!("failed to read channel script {}", script_path.display()))?;

    lua.load(&source)
        .set_name(script_path.to_string_lossy())
        .exec()
        .with_context(|| format!("channel script {} raised an error", script_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_channel_overrides_environment() {
        let cli = Cli {
            channel: Some(7),
            home: None,
        };
        assert_eq!(resolve_channel(&cli).unwrap().number(), 7);
    }

    #[test]
    fn cli_home_overrides_environment() {
        let cli = Cli {
            channel: Some(3),
            home: Some(PathBuf::from("/tmp/neopult-test-home")),
        };
        let home = resolve_channel_home(&cli, Channel::new(3).unwrap()).unwrap();
        assert_eq!(home, PathBuf::from("/tmp/neopult-test-home/channel-3"));
    }

    #[test]
    fn load_missing_script_is_an_error() {
        let lua = mlua::Lua::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(load_channel_script(&lua, dir.path()).is_err());
    }
}
