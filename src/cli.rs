//! # Command-line interface.
//!
//! Flags mirror the original daemon's long options one for one; alternatively
//! a single positional argument names a config file with one section per
//! slave, in which case the flags are ignored. The hidden `--child-index` /
//! `--host-id` pair is how the supervisor re-enters slave mode in a child
//! process.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{parse_avail, parse_switch, PeerConfig};

/// Peer-to-peer distributed computing worker.
///
/// Waits for incoming jobs, starts the compute engine, evaluates each job
/// and returns the result to the submitting peer. A parent supervisor keeps
/// the configured number of slaves running.
#[derive(Debug, Parser)]
#[command(name = "peervisor", version, about)]
pub struct Cli {
    /// Configuration file with one section per slave; flags are ignored.
    pub config: Option<PathBuf>,

    /// Number of slaves to start.
    #[arg(long, default_value_t = 1)]
    pub number: usize,

    /// Amount of memory available, number of bytes or 'inf'.
    #[arg(long, value_parser = parse_avail_arg)]
    pub memavail: Option<u64>,

    /// Speed of the CPU, arbitrary units or 'inf'.
    #[arg(long, value_parser = parse_avail_arg)]
    pub cpuavail: Option<u64>,

    /// Maximum duration of a single job in seconds, or 'inf'.
    #[arg(long, value_parser = parse_avail_arg)]
    pub timavail: Option<u64>,

    /// Host name to announce.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Group identity.
    #[arg(long)]
    pub group: Option<String>,

    /// Hosts allowed to submit jobs (comma separated; empty = all).
    #[arg(long)]
    pub allowhost: Option<String>,

    /// Users allowed to submit jobs (comma separated; empty = all).
    #[arg(long)]
    pub allowuser: Option<String>,

    /// Groups allowed to submit jobs (comma separated; empty = all).
    #[arg(long)]
    pub allowgroup: Option<String>,

    /// Engine start command.
    #[arg(long)]
    pub matlab: Option<String>,

    /// Seconds to keep the engine running after a job finished.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Adaptive memory advertisement, 0 or 1.
    #[arg(long, value_parser = parse_switch_arg)]
    pub smartmem: Option<bool>,

    /// Adaptive cpu advertisement, 0 or 1.
    #[arg(long, value_parser = parse_switch_arg)]
    pub smartcpu: Option<bool>,

    /// Post-job announce spreading, 0 or 1.
    #[arg(long, value_parser = parse_switch_arg)]
    pub smartshare: Option<bool>,

    /// Verbosity, between 0 and 7.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=7))]
    pub verbose: Option<u8>,

    /// Announce destination address (broadcast or multicast).
    #[arg(long)]
    pub announce_addr: Option<IpAddr>,

    /// Announce/discover datagram port.
    #[arg(long)]
    pub announce_port: Option<u16>,

    /// Hard cap for either payload blob, bytes or 'inf'.
    #[arg(long, value_parser = parse_avail_arg)]
    pub maxblob: Option<u64>,

    /// Index of this child's configuration (set by the supervisor).
    #[arg(long, hide = true)]
    pub child_index: Option<usize>,

    /// Host id assigned to this child (set by the supervisor).
    #[arg(long, hide = true)]
    pub host_id: Option<u32>,
}

impl Cli {
    /// Builds a [`PeerConfig`] from the flags, on top of the defaults.
    pub fn to_config(&self) -> PeerConfig {
        let mut config = PeerConfig::default();
        config.hostname = self.hostname.clone();
        config.group = self.group.clone();
        config.memavail = self.memavail;
        config.cpuavail = self.cpuavail;
        config.timavail = self.timavail;
        if let Some(matlab) = &self.matlab {
            config.matlab = matlab.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(list) = &self.allowuser {
            config.allowuser = crate::config::parse_list(list);
        }
        if let Some(list) = &self.allowhost {
            config.allowhost = crate::config::parse_list(list);
        }
        if let Some(list) = &self.allowgroup {
            config.allowgroup = crate::config::parse_list(list);
        }
        if let Some(v) = self.smartmem {
            config.smartmem = v;
        }
        if let Some(v) = self.smartcpu {
            config.smartcpu = v;
        }
        if let Some(v) = self.smartshare {
            config.smartshare = v;
        }
        if let Some(v) = self.verbose {
            config.verbose = v;
        }
        if let Some(v) = self.announce_addr {
            config.announce_addr = v;
        }
        if let Some(v) = self.announce_port {
            config.announce_port = v;
        }
        if let Some(v) = self.maxblob {
            config.maxblob = v;
        }
        config
    }
}

fn parse_avail_arg(value: &str) -> Result<u64, String> {
    parse_avail(value).ok_or_else(|| format!("'{value}' is not a number or 'inf'"))
}

fn parse_switch_arg(value: &str) -> Result<bool, String> {
    parse_switch(value).ok_or_else(|| format!("'{value}' is not 0 or 1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_the_config() {
        let cli = Cli::parse_from([
            "peervisor",
            "--memavail",
            "inf",
            "--timavail",
            "100",
            "--allowuser",
            "alice,bob",
            "--smartshare",
            "0",
            "--verbose",
            "2",
            "--matlab",
            "octave --engine",
        ]);
        let config = cli.to_config();
        assert_eq!(config.memavail, Some(u64::MAX));
        assert_eq!(config.timavail, Some(100));
        assert_eq!(config.allowuser, vec!["alice", "bob"]);
        assert!(!config.smartshare);
        assert_eq!(config.verbose, 2);
        assert_eq!(config.matlab, "octave --engine");
    }

    #[test]
    fn child_flags_are_parsed() {
        let cli = Cli::parse_from(["peervisor", "--child-index", "0", "--host-id", "3"]);
        assert_eq!(cli.child_index, Some(0));
        assert_eq!(cli.host_id, Some(3));
    }

    #[test]
    fn config_args_roundtrip_through_the_parser() {
        let original = PeerConfig {
            hostname: Some("node7".into()),
            memavail: Some(4096),
            allowgroup: vec!["lab".into()],
            smartcpu: false,
            verbose: 6,
            ..PeerConfig::default()
        };
        let mut argv = vec!["peervisor".to_string()];
        argv.extend(original.to_args());
        let reparsed = Cli::parse_from(argv).to_config();
        assert_eq!(reparsed.hostname, original.hostname);
        assert_eq!(reparsed.memavail, original.memavail);
        assert_eq!(reparsed.allowgroup, original.allowgroup);
        assert_eq!(reparsed.smartcpu, original.smartcpu);
        assert_eq!(reparsed.verbose, original.verbose);
    }

    #[test]
    fn bad_switch_value_is_rejected() {
        assert!(Cli::try_parse_from(["peervisor", "--smartmem", "yes"]).is_err());
        assert!(Cli::try_parse_from(["peervisor", "--verbose", "9"]).is_err());
    }
}
