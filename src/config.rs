//! # Per-slave configuration.
//!
//! A [`PeerConfig`] fully describes one slave: identity, advertised
//! resources, engine command, access lists, policy switches and the presence
//! endpoints. It is assembled either from command-line flags (one config,
//! `--number` copies) or from an INI file with one section per slave, the
//! original daemon's two startup paths.
//!
//! Resource values accept `inf`, which encodes as `u64::MAX` everywhere.
//! Supplying an explicit `memavail` disables the `smartmem` switch.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use ini::Ini;
use thiserror::Error;

/// Default announce/discover datagram port.
pub const DEFAULT_ANNOUNCE_PORT: u16 = 1700;

/// Default announce destination (limited broadcast).
pub const DEFAULT_ANNOUNCE_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::BROADCAST);

/// Default engine start command.
pub const DEFAULT_ENGINE_CMD: &str = "matlab -nosplash";

/// Default engine idle timeout in seconds.
pub const DEFAULT_ENGINE_TIMEOUT: u64 = 180;

/// Default payload size cap (1 GiB).
pub const DEFAULT_MAXBLOB: u64 = 1 << 30;

/// Default verbosity (0 = everything .. 7 = fatal only).
pub const DEFAULT_VERBOSE: u8 = 4;

/// Configuration errors are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or parsed.
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// A key held a value we cannot interpret.
    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: &'static str,
    },

    /// The config file defines no slave sections.
    #[error("config file defines no slaves")]
    Empty,
}

/// Everything one slave needs to run.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Host name override; defaults to the environment's notion of the host.
    pub hostname: Option<String>,
    /// Group identity.
    pub group: Option<String>,
    /// Advertised resources; `None` means unlimited.
    pub memavail: Option<u64>,
    pub cpuavail: Option<u64>,
    pub timavail: Option<u64>,
    /// Engine start command.
    pub matlab: String,
    /// Engine idle timeout in seconds.
    pub timeout: u64,
    /// Access lists; empty means allow all.
    pub allowuser: Vec<String>,
    pub allowhost: Vec<String>,
    pub allowgroup: Vec<String>,
    /// Policy switches.
    pub smartmem: bool,
    pub smartcpu: bool,
    pub smartshare: bool,
    /// Log verbosity 0..7.
    pub verbose: u8,
    /// Presence endpoints.
    pub announce_addr: IpAddr,
    pub announce_port: u16,
    /// Hard cap for either payload blob at intake.
    pub maxblob: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            group: None,
            memavail: None,
            cpuavail: None,
            timavail: None,
            matlab: DEFAULT_ENGINE_CMD.into(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
            allowuser: Vec::new(),
            allowhost: Vec::new(),
            allowgroup: Vec::new(),
            smartmem: true,
            smartcpu: true,
            smartshare: true,
            verbose: DEFAULT_VERBOSE,
            announce_addr: DEFAULT_ANNOUNCE_ADDR,
            announce_port: DEFAULT_ANNOUNCE_PORT,
            maxblob: DEFAULT_MAXBLOB,
        }
    }
}

impl PeerConfig {
    /// Effective host name: override, then environment, then `localhost`.
    pub fn effective_hostname(&self) -> String {
        if let Some(name) = &self.hostname {
            return name.clone();
        }
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".into())
    }

    /// Effective user: from the environment, `unknown` otherwise.
    pub fn effective_user(&self) -> String {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".into())
    }

    /// Effective group identity.
    pub fn effective_group(&self) -> String {
        self.group.clone().unwrap_or_else(|| "unknown".into())
    }

    /// Renders this config back into command-line flags.
    ///
    /// The supervisor uses this to hand a child its exact configuration.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(format!("--{flag}"));
            args.push(value);
        };
        if let Some(v) = &self.hostname {
            push("hostname", v.clone());
        }
        if let Some(v) = &self.group {
            push("group", v.clone());
        }
        if let Some(v) = self.memavail {
            push("memavail", render_avail(v));
        }
        if let Some(v) = self.cpuavail {
            push("cpuavail", render_avail(v));
        }
        if let Some(v) = self.timavail {
            push("timavail", render_avail(v));
        }
        push("matlab", self.matlab.clone());
        push("timeout", self.timeout.to_string());
        if !self.allowuser.is_empty() {
            push("allowuser", self.allowuser.join(","));
        }
        if !self.allowhost.is_empty() {
            push("allowhost", self.allowhost.join(","));
        }
        if !self.allowgroup.is_empty() {
            push("allowgroup", self.allowgroup.join(","));
        }
        push("smartmem", u8::from(self.smartmem).to_string());
        push("smartcpu", u8::from(self.smartcpu).to_string());
        push("smartshare", u8::from(self.smartshare).to_string());
        push("verbose", self.verbose.to_string());
        push("announce-addr", self.announce_addr.to_string());
        push("announce-port", self.announce_port.to_string());
        push("maxblob", self.maxblob.to_string());
        args
    }
}

/// Loads a config file: one named section per slave, in file order.
pub fn load_file(path: &Path) -> Result<Vec<PeerConfig>, ConfigError> {
    let ini = Ini::load_from_file(path)?;
    let mut configs = Vec::new();

    for (section, props) in &ini {
        let Some(section) = section else {
            // The sectionless prologue carries no slave of its own.
            continue;
        };
        let mut config = PeerConfig::default();
        for (key, value) in props.iter() {
            apply_key(&mut config, section, key, value)?;
        }
        configs.push(config);
    }

    if configs.is_empty() {
        return Err(ConfigError::Empty);
    }
    Ok(configs)
}

fn apply_key(
    config: &mut PeerConfig,
    section: &str,
    key: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason,
    };

    match key {
        "hostname" => config.hostname = Some(value.to_string()),
        "group" => config.group = Some(value.to_string()),
        "memavail" => config.memavail = Some(parse_avail(value).ok_or_else(|| invalid("expected a number or 'inf'"))?),
        "cpuavail" => config.cpuavail = Some(parse_avail(value).ok_or_else(|| invalid("expected a number or 'inf'"))?),
        "timavail" => config.timavail = Some(parse_avail(value).ok_or_else(|| invalid("expected a number or 'inf'"))?),
        "matlab" => config.matlab = value.to_string(),
        "timeout" => {
            config.timeout = value.parse().map_err(|_| invalid("expected seconds"))?;
        }
        "allowuser" => config.allowuser = parse_list(value),
        "allowhost" => config.allowhost = parse_list(value),
        "allowgroup" => config.allowgroup = parse_list(value),
        "smartmem" => config.smartmem = parse_switch(value).ok_or_else(|| invalid("expected 0 or 1"))?,
        "smartcpu" => config.smartcpu = parse_switch(value).ok_or_else(|| invalid("expected 0 or 1"))?,
        "smartshare" => config.smartshare = parse_switch(value).ok_or_else(|| invalid("expected 0 or 1"))?,
        "verbose" => {
            let level: u8 = value.parse().map_err(|_| invalid("expected 0..7"))?;
            if level > 7 {
                return Err(invalid("expected 0..7"));
            }
            config.verbose = level;
        }
        "announce-addr" => {
            config.announce_addr = value.parse().map_err(|_| invalid("expected an ip address"))?;
        }
        "announce-port" => {
            config.announce_port = value.parse().map_err(|_| invalid("expected a port"))?;
        }
        "maxblob" => {
            config.maxblob = parse_avail(value).ok_or_else(|| invalid("expected a number or 'inf'"))?;
        }
        _ => return Err(invalid("unknown key")),
    }
    Ok(())
}

/// Parses a resource amount; `inf` means unlimited.
pub fn parse_avail(value: &str) -> Option<u64> {
    if value.eq_ignore_ascii_case("inf") {
        return Some(u64::MAX);
    }
    value.parse().ok()
}

fn render_avail(value: u64) -> String {
    if value == u64::MAX {
        "inf".into()
    } else {
        value.to_string()
    }
}

/// Parses a 0/1 switch.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Splits a comma-separated list, dropping empty items.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn avail_accepts_inf_and_numbers() {
        assert_eq!(parse_avail("inf"), Some(u64::MAX));
        assert_eq!(parse_avail("INF"), Some(u64::MAX));
        assert_eq!(parse_avail("1024"), Some(1024));
        assert_eq!(parse_avail("lots"), None);
    }

    #[test]
    fn lists_split_on_commas() {
        assert_eq!(parse_list("alice,bob"), vec!["alice", "bob"]);
        assert_eq!(parse_list(" alice , bob "), vec!["alice", "bob"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn switches_are_strict() {
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("1"), Some(true));
        assert_eq!(parse_switch("yes"), None);
    }

    #[test]
    fn config_file_yields_one_config_per_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[slave1]\nmemavail = 1024\nallowuser = alice,bob\nverbose = 2\n\n\
             [slave2]\ntimavail = inf\nsmartshare = 0\nmatlab = octave --engine"
        )
        .unwrap();

        let configs = load_file(file.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].memavail, Some(1024));
        assert_eq!(configs[0].allowuser, vec!["alice", "bob"]);
        assert_eq!(configs[0].verbose, 2);
        assert_eq!(configs[1].timavail, Some(u64::MAX));
        assert!(!configs[1].smartshare);
        assert_eq!(configs[1].matlab, "octave --engine");
    }

    #[test]
    fn unknown_keys_are_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[slave]\nbogus = 1").unwrap();
        assert!(matches!(
            load_file(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn sectionless_file_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "verbose = 2").unwrap();
        assert!(matches!(load_file(file.path()), Err(ConfigError::Empty)));
    }

    #[test]
    fn args_roundtrip_through_the_flag_renderer() {
        let config = PeerConfig {
            hostname: Some("node7".into()),
            memavail: Some(u64::MAX),
            allowuser: vec!["alice".into()],
            smartshare: false,
            ..PeerConfig::default()
        };
        let args = config.to_args();
        assert!(args.contains(&"--hostname".to_string()));
        assert!(args.contains(&"inf".to_string()));
        let i = args.iter().position(|a| a == "--smartshare").unwrap();
        assert_eq!(args[i + 1], "0");
    }
}
