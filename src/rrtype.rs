//! DNS record type and response code definitions.

use std::fmt;

/// RecordType identifies a DNS resource record type.
///
/// Covers the types that appear in rule modifiers and rewrite directives;
/// `Other` carries any remaining numeric type so queries are never lossy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Svcb,
    Https,
    Any,
    /// Any other type, by its RFC 1035 numeric value
    Other(u16),
}

impl RecordType {
    /// Parse a record type from its presentation name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "NS" => Some(RecordType::Ns),
            "CNAME" => Some(RecordType::Cname),
            "SOA" => Some(RecordType::Soa),
            "PTR" => Some(RecordType::Ptr),
            "MX" => Some(RecordType::Mx),
            "TXT" => Some(RecordType::Txt),
            "AAAA" => Some(RecordType::Aaaa),
            "SRV" => Some(RecordType::Srv),
            "SVCB" => Some(RecordType::Svcb),
            "HTTPS" => Some(RecordType::Https),
            "ANY" => Some(RecordType::Any),
            _ => None,
        }
    }

    /// Get the canonical presentation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Ns => "NS",
            RecordType::Cname => "CNAME",
            RecordType::Soa => "SOA",
            RecordType::Ptr => "PTR",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Aaaa => "AAAA",
            RecordType::Srv => "SRV",
            RecordType::Svcb => "SVCB",
            RecordType::Https => "HTTPS",
            RecordType::Any => "ANY",
            RecordType::Other(_) => "TYPE",
        }
    }

    /// Convert to the numeric value used on the wire.
    pub fn as_u16(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Ptr => 12,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
            RecordType::Srv => 33,
            RecordType::Svcb => 64,
            RecordType::Https => 65,
            RecordType::Any => 255,
            RecordType::Other(v) => *v,
        }
    }

    /// Convert from a numeric value.
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => RecordType::A,
            2 => RecordType::Ns,
            5 => RecordType::Cname,
            6 => RecordType::Soa,
            12 => RecordType::Ptr,
            15 => RecordType::Mx,
            16 => RecordType::Txt,
            28 => RecordType::Aaaa,
            33 => RecordType::Srv,
            64 => RecordType::Svcb,
            65 => RecordType::Https,
            255 => RecordType::Any,
            other => RecordType::Other(other),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Other(v) => write!(f, "TYPE{}", v),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// RCode is a DNS response code usable in a rewrite directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RCode {
    #[default]
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NxDomain = 3,
    NotImpl = 4,
    Refused = 5,
}

impl RCode {
    /// Parse a response code from its presentation name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NOERROR" => Some(RCode::NoError),
            "FORMERR" => Some(RCode::FormErr),
            "SERVFAIL" => Some(RCode::ServFail),
            "NXDOMAIN" => Some(RCode::NxDomain),
            "NOTIMPL" => Some(RCode::NotImpl),
            "REFUSED" => Some(RCode::Refused),
            _ => None,
        }
    }

    /// Get the canonical presentation name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RCode::NoError => "NOERROR",
            RCode::FormErr => "FORMERR",
            RCode::ServFail => "SERVFAIL",
            RCode::NxDomain => "NXDOMAIN",
            RCode::NotImpl => "NOTIMPL",
            RCode::Refused => "REFUSED",
        }
    }
}

impl fmt::Display for RCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
