//! `$dnsrewrite` directive parsing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::RuleError;
use crate::rrtype::{RCode, RecordType};

/// Record types accepted in a long-form rewrite.
const REWRITABLE_TYPES: [RecordType; 8] = [
    RecordType::A,
    RecordType::Aaaa,
    RecordType::Cname,
    RecordType::Mx,
    RecordType::Txt,
    RecordType::Ptr,
    RecordType::Https,
    RecordType::Svcb,
];

/// Typed rdata of a rewrite directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteValue {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ptr(String),
    Txt(String),
    Mx {
        preference: u16,
        exchange: String,
    },
    /// Serves both SVCB and HTTPS records
    Svcb {
        priority: u16,
        target: String,
        params: Vec<(String, String)>,
    },
}

/// A parsed `$dnsrewrite` directive.
///
/// Short forms expand to a full directive: an IPv4 literal becomes
/// `NOERROR;A;<ip>`, an IPv6 literal `NOERROR;AAAA;<ip>`, and a domain name
/// `NOERROR;CNAME;<name>`. A bare response code keeps `rtype` and `value`
/// empty, as does the exception form that removes every rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRewrite {
    pub rcode: RCode,
    pub rtype: Option<RecordType>,
    pub value: Option<RewriteValue>,
}

impl DnsRewrite {
    /// Parse the parameter string of a `$dnsrewrite` modifier.
    pub fn parse(spec: &str, is_exception: bool) -> Result<Self, RuleError> {
        if spec.is_empty() {
            // `@@...$dnsrewrite` with no value removes matching rewrites
            if is_exception {
                return Ok(DnsRewrite {
                    rcode: RCode::NoError,
                    rtype: None,
                    value: None,
                });
            }
            return Err(RuleError::InvalidRewrite(spec.to_string()));
        }

        if spec.contains(';') {
            Self::parse_long(spec, is_exception)
        } else {
            Self::parse_short(spec)
        }
    }

    fn parse_short(spec: &str) -> Result<Self, RuleError> {
        if let Some(rcode) = RCode::parse(spec) {
            return Ok(DnsRewrite {
                rcode,
                rtype: None,
                value: None,
            });
        }

        match spec.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => Ok(DnsRewrite {
                rcode: RCode::NoError,
                rtype: Some(RecordType::A),
                value: Some(RewriteValue::A(ip)),
            }),
            Ok(IpAddr::V6(ip)) => Ok(DnsRewrite {
                rcode: RCode::NoError,
                rtype: Some(RecordType::Aaaa),
                value: Some(RewriteValue::Aaaa(ip)),
            }),
            Err(_) => {
                if is_plausible_domain(spec) {
                    Ok(DnsRewrite {
                        rcode: RCode::NoError,
                        rtype: Some(RecordType::Cname),
                        value: Some(RewriteValue::Cname(spec.to_lowercase())),
                    })
                } else {
                    Err(RuleError::InvalidRewrite(spec.to_string()))
                }
            }
        }
    }

    fn parse_long(spec: &str, is_exception: bool) -> Result<Self, RuleError> {
        let mut parts = spec.splitn(3, ';');
        let rcode_str = parts.next().unwrap_or("");
        let rtype_str = parts.next().unwrap_or("");
        let rdata_str = parts.next().unwrap_or("");

        let rcode =
            RCode::parse(rcode_str).ok_or_else(|| RuleError::InvalidRewrite(spec.to_string()))?;

        if rtype_str.is_empty() {
            if !rdata_str.is_empty() {
                return Err(RuleError::InvalidRewrite(spec.to_string()));
            }
            return Ok(DnsRewrite {
                rcode,
                rtype: None,
                value: None,
            });
        }

        let rtype = RecordType::parse(rtype_str)
            .filter(|t| REWRITABLE_TYPES.contains(t))
            .ok_or_else(|| RuleError::InvalidRewrite(spec.to_string()))?;

        if rdata_str.is_empty() {
            // only the exception form may omit rdata (it removes by type)
            if is_exception {
                return Ok(DnsRewrite {
                    rcode,
                    rtype: Some(rtype),
                    value: None,
                });
            }
            return Err(RuleError::InvalidRewrite(spec.to_string()));
        }

        let value = parse_rdata(rtype, rdata_str)
            .ok_or_else(|| RuleError::InvalidRewrite(spec.to_string()))?;

        Ok(DnsRewrite {
            rcode,
            rtype: Some(rtype),
            value: Some(value),
        })
    }
}

fn parse_rdata(rtype: RecordType, rdata: &str) -> Option<RewriteValue> {
    match rtype {
        RecordType::A => rdata.parse::<Ipv4Addr>().ok().map(RewriteValue::A),
        RecordType::Aaaa => rdata.parse::<Ipv6Addr>().ok().map(RewriteValue::Aaaa),
        RecordType::Cname => {
            is_plausible_domain(rdata).then(|| RewriteValue::Cname(rdata.to_lowercase()))
        }
        RecordType::Ptr => {
            is_plausible_domain(rdata.trim_end_matches('.'))
                .then(|| RewriteValue::Ptr(rdata.to_lowercase()))
        }
        RecordType::Txt => Some(RewriteValue::Txt(rdata.to_string())),
        RecordType::Mx => {
            let (prio, host) = rdata.split_once(' ')?;
            let preference = prio.parse::<u16>().ok()?;
            is_plausible_domain(host).then(|| RewriteValue::Mx {
                preference,
                exchange: host.to_lowercase(),
            })
        }
        RecordType::Https | RecordType::Svcb => {
            let mut fields = rdata.split_whitespace();
            let priority = fields.next()?.parse::<u16>().ok()?;
            let target = fields.next()?.to_lowercase();
            let mut params = Vec::new();
            for field in fields {
                let (k, v) = field.split_once('=')?;
                params.push((k.to_string(), v.to_string()));
            }
            Some(RewriteValue::Svcb {
                priority,
                target,
                params,
            })
        }
        _ => None,
    }
}

fn is_plausible_domain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 255
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
        && s.split('.').all(|label| !label.is_empty() && label.len() <= 63)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_ipv4() {
        let rw = DnsRewrite::parse("1.2.3.4", false).unwrap();
        assert_eq!(rw.rcode, RCode::NoError);
        assert_eq!(rw.rtype, Some(RecordType::A));
        assert_eq!(rw.value, Some(RewriteValue::A("1.2.3.4".parse().unwrap())));
    }

    #[test]
    fn test_short_form_ipv6() {
        let rw = DnsRewrite::parse("::1", false).unwrap();
        assert_eq!(rw.rtype, Some(RecordType::Aaaa));
    }

    #[test]
    fn test_short_form_cname() {
        let rw = DnsRewrite::parse("Safe.Example.ORG", false).unwrap();
        assert_eq!(rw.rtype, Some(RecordType::Cname));
        assert_eq!(
            rw.value,
            Some(RewriteValue::Cname("safe.example.org".to_string()))
        );
    }

    #[test]
    fn test_short_form_rcode() {
        let rw = DnsRewrite::parse("NXDOMAIN", false).unwrap();
        assert_eq!(rw.rcode, RCode::NxDomain);
        assert_eq!(rw.rtype, None);
        assert_eq!(rw.value, None);
    }

    #[test]
    fn test_long_form_a() {
        let rw = DnsRewrite::parse("NOERROR;A;10.0.0.1", false).unwrap();
        assert_eq!(rw.rcode, RCode::NoError);
        assert_eq!(rw.rtype, Some(RecordType::A));
        assert_eq!(rw.value, Some(RewriteValue::A("10.0.0.1".parse().unwrap())));
    }

    #[test]
    fn test_long_form_mx() {
        let rw = DnsRewrite::parse("NOERROR;MX;10 mail.example.org", false).unwrap();
        assert_eq!(
            rw.value,
            Some(RewriteValue::Mx {
                preference: 10,
                exchange: "mail.example.org".to_string(),
            })
        );
    }

    #[test]
    fn test_long_form_https() {
        let rw = DnsRewrite::parse("NOERROR;HTTPS;1 . alpn=h3", false).unwrap();
        match rw.value {
            Some(RewriteValue::Svcb {
                priority, params, ..
            }) => {
                assert_eq!(priority, 1);
                assert_eq!(params, vec![("alpn".to_string(), "h3".to_string())]);
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_long_form_rcode_only() {
        let rw = DnsRewrite::parse("REFUSED;;", false).unwrap();
        assert_eq!(rw.rcode, RCode::Refused);
        assert_eq!(rw.rtype, None);
    }

    #[test]
    fn test_exception_without_value() {
        assert!(DnsRewrite::parse("", true).is_ok());
        assert!(DnsRewrite::parse("", false).is_err());
        assert!(DnsRewrite::parse("NOERROR;A;", true).is_ok());
        assert!(DnsRewrite::parse("NOERROR;A;", false).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(DnsRewrite::parse("NOERROR;A;not-an-ip", false).is_err());
        assert!(DnsRewrite::parse("BOGUS;A;1.2.3.4", false).is_err());
        assert!(DnsRewrite::parse("NOERROR;NS;ns1.example.org", false).is_err());
        assert!(DnsRewrite::parse("***", false).is_err());
    }
}
