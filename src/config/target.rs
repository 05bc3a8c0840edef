// ABOUTME: Connection target parsing for the command line.
// ABOUTME: Parses formats like "host", "user@host", "host:port", "user@host:port".

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
}

impl Target {
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s;
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };
        if s.is_empty() {
            return Err(invalid("target cannot be empty"));
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.rfind('@') {
            Some(at_pos) => (Some(&s[..at_pos]), &s[at_pos + 1..]),
            None => (None, s),
        };
        if user_part.is_some_and(str::is_empty) {
            return Err(invalid("user cannot be empty"));
        }

        let (host, port) = match rest.rfind(':') {
            Some(colon_pos) => {
                let port_str = &rest[colon_pos + 1..];
                let port = port_str
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| invalid(&format!("invalid port: {}", port_str)))?;
                (&rest[..colon_pos], Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(invalid("hostname cannot be empty"));
        }

        Ok(Target {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only() {
        let t = Target::parse("10.0.0.7").unwrap();
        assert_eq!(t.host, "10.0.0.7");
        assert_eq!(t.port, None);
        assert_eq!(t.user, None);
    }

    #[test]
    fn full_form() {
        let t = Target::parse("admin@db.example.com:2222").unwrap();
        assert_eq!(t.host, "db.example.com");
        assert_eq!(t.port, Some(2222));
        assert_eq!(t.user.as_deref(), Some("admin"));
    }

    #[test]
    fn rejects_bad_port_and_empty_parts() {
        assert!(Target::parse("host:ssh").is_err());
        assert!(Target::parse("host:0").is_err());
        assert!(Target::parse("@host").is_err());
        assert!(Target::parse("root@:22").is_err());
        assert!(Target::parse("   ").is_err());
    }
}
