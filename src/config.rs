//! Protocol settings and the membership file.

use crate::{Error, PeerId, Result, QUOTA, RATE};
use std::{fs, path::Path, time::Duration};

/// Settings shared by every peer of a ring.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Critical-section entries across the whole ring before shutdown.
    pub quota: u32,
    /// Rate (events per second) at which a peer starts wanting access.
    pub access_rate: f64,
    /// Upper bound on every remote call.
    pub rpc_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            quota: QUOTA,
            access_rate: RATE,
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

impl ProtocolConfig {
    pub fn with_quota(mut self, quota: u32) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_access_rate(mut self, access_rate: f64) -> Self {
        self.access_rate = access_rate;
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }
}

/// Parses a newline-delimited list of peer ports. Blank lines are skipped.
pub fn parse_members(contents: &str) -> Result<Vec<PeerId>> {
    let mut members = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let id = line.parse::<PeerId>().map_err(|e| {
            Error::Config(format!("line {}: `{}` is not a port ({e})", number + 1, line.trim()))
        })?;
        members.push(id);
    }

    if members.is_empty() {
        return Err(Error::Config("the membership list is empty".into()));
    }

    Ok(members)
}

/// Reads the membership file at `path`.
pub fn read_members(path: impl AsRef<Path>) -> Result<Vec<PeerId>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("couldn't read `{}`: {e}", path.display())))?;

    parse_members(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.quota, 5);
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
    }

    #[test]
    fn builder() {
        let config = ProtocolConfig::default()
            .with_quota(9)
            .with_access_rate(200.)
            .with_rpc_timeout(Duration::from_millis(300));

        assert_eq!(config.quota, 9);
        assert_eq!(config.access_rate, 200.);
        assert_eq!(config.rpc_timeout, Duration::from_millis(300));
    }

    #[test]
    fn parses_ports_and_skips_blank_lines() {
        let members = parse_members("5001\n5002\r\n\n5003\n").unwrap();
        assert_eq!(members, vec![PeerId(5001), PeerId(5002), PeerId(5003)]);
    }

    #[test]
    fn reports_the_bad_line() {
        match parse_members("5001\nfive\n") {
            Err(Error::Config(message)) => assert!(message.starts_with("line 2"), "{message}"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(parse_members("\n\n"), Err(Error::Config(_))));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "6001\n6000").unwrap();

        assert_eq!(read_members(file.path()).unwrap(), vec![PeerId(6001), PeerId(6000)]);
        assert!(matches!(read_members("/definitely/not/here.txt"), Err(Error::Config(_))));
    }
}
