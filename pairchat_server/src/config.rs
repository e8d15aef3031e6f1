//! Command-line and environment configuration

use crate::handler::Heartbeat;
use crate::moderation::Denylist;
use clap::{Parser, ValueEnum};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Command-line arguments for the signaling server.
#[derive(Debug, Clone, Parser)]
#[command(name = "pairchat-server")]
#[command(about = "Signaling, matchmaking and relay server for anonymous one-to-one chat")]
#[command(version)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "PAIRCHAT_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Word rejected by the chat filter. Repeat the flag for more words.
    #[arg(long = "deny-word", env = "PAIRCHAT_DENY_WORDS", value_delimiter = ',')]
    pub deny_words: Vec<String>,

    /// File with one denied word per line (`#` starts a comment).
    #[arg(long, env = "PAIRCHAT_DENYLIST_FILE")]
    pub denylist_file: Option<PathBuf>,

    /// Append moderation records to this file as JSON lines. Without it they
    /// only go to the log.
    #[arg(long, env = "PAIRCHAT_MODERATION_LOG")]
    pub moderation_log: Option<PathBuf>,

    /// Seconds of client silence before the server sends a ping.
    #[arg(long, env = "PAIRCHAT_PING_INTERVAL", default_value_t = 25, value_parser = clap::value_parser!(u64).range(1..))]
    pub ping_interval: u64,

    /// Seconds to wait for any frame after a ping before dropping the client.
    #[arg(long, env = "PAIRCHAT_PING_TIMEOUT", default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..))]
    pub ping_timeout: u64,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            interval: Duration::from_secs(self.ping_interval),
            timeout: Duration::from_secs(self.ping_timeout),
        }
    }

    /// Build the chat filter. Falls back to the built-in list when nothing
    /// is configured.
    pub fn denylist(&self) -> io::Result<Denylist> {
        let mut denylist = match &self.denylist_file {
            Some(path) => Denylist::from_file(path)?,
            None if self.deny_words.is_empty() => return Ok(Denylist::builtin()),
            None => Denylist::new(Vec::<String>::new()),
        };
        denylist.extend(&self.deny_words);
        Ok(denylist)
    }
}
