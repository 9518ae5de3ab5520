//! # OpenSSL Invocations
//!
//! Argument vectors for the `openssl` subcommands the pipeline runs, and
//! parsers for the text they print back. Certificate math stays inside
//! `openssl`; this module only builds argv and reads results.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn subject(common_name: &str) -> String {
    format!("/CN={common_name}")
}

/// `req -x509 -newkey`: self-signed root with a fresh RSA key
#[must_use]
pub fn self_signed_ca_args(
    key_path: &Path,
    cert_path: &Path,
    common_name: &str,
    validity_days: u32,
    key_bits: u32,
) -> Vec<String> {
    vec![
        "req".into(),
        "-x509".into(),
        "-newkey".into(),
        format!("rsa:{key_bits}"),
        "-nodes".into(),
        "-sha256".into(),
        "-keyout".into(),
        path_arg(key_path),
        "-out".into(),
        path_arg(cert_path),
        "-days".into(),
        validity_days.to_string(),
        "-subj".into(),
        subject(common_name),
        "-addext".into(),
        "basicConstraints=critical,CA:TRUE".into(),
        "-addext".into(),
        "keyUsage=critical,keyCertSign,cRLSign".into(),
    ]
}

/// `genpkey`: fresh RSA private key
#[must_use]
pub fn generate_key_args(key_path: &Path, key_bits: u32) -> Vec<String> {
    vec![
        "genpkey".into(),
        "-algorithm".into(),
        "RSA".into(),
        "-pkeyopt".into(),
        format!("rsa_keygen_bits:{key_bits}"),
        "-out".into(),
        path_arg(key_path),
    ]
}

/// `req -new`: CSR for `common_name`
#[must_use]
pub fn csr_args(key_path: &Path, csr_path: &Path, common_name: &str) -> Vec<String> {
    vec![
        "req".into(),
        "-new".into(),
        "-key".into(),
        path_arg(key_path),
        "-out".into(),
        path_arg(csr_path),
        "-subj".into(),
        subject(common_name),
    ]
}

/// `x509 -req`: sign a CSR with the CA, applying the extension file
#[must_use]
pub fn sign_args(
    csr_path: &Path,
    ca_cert: &Path,
    ca_key: &Path,
    cert_path: &Path,
    ext_path: &Path,
    validity_days: u32,
    serial: &str,
) -> Vec<String> {
    vec![
        "x509".into(),
        "-req".into(),
        "-sha256".into(),
        "-in".into(),
        path_arg(csr_path),
        "-CA".into(),
        path_arg(ca_cert),
        "-CAkey".into(),
        path_arg(ca_key),
        "-set_serial".into(),
        format!("0x{serial}"),
        "-out".into(),
        path_arg(cert_path),
        "-days".into(),
        validity_days.to_string(),
        "-extfile".into(),
        path_arg(ext_path),
    ]
}

/// `x509 -noout -ext subjectAltName`: print the SAN extension
#[must_use]
pub fn read_sans_args(cert_path: &Path) -> Vec<String> {
    vec![
        "x509".into(),
        "-in".into(),
        path_arg(cert_path),
        "-noout".into(),
        "-ext".into(),
        "subjectAltName".into(),
    ]
}

/// `x509 -noout -startdate -enddate`: print the validity window
#[must_use]
pub fn read_dates_args(cert_path: &Path) -> Vec<String> {
    vec![
        "x509".into(),
        "-in".into(),
        path_arg(cert_path),
        "-noout".into(),
        "-startdate".into(),
        "-enddate".into(),
    ]
}

/// Extension file for a server/client leaf carrying every SAN verbatim
///
/// IP literals go into `IP.n` entries, everything else into `DNS.n`.
///
/// # Errors
///
/// Returns the offending name when it is empty or contains characters that
/// would break the config syntax.
pub fn leaf_extensions(subject_alt_names: &BTreeSet<String>) -> Result<String, String> {
    let mut ext = String::from(
        "basicConstraints=CA:FALSE\n\
         keyUsage=critical,digitalSignature,keyEncipherment\n\
         extendedKeyUsage=serverAuth,clientAuth\n",
    );
    if subject_alt_names.is_empty() {
        return Ok(ext);
    }

    ext.push_str("subjectAltName=@alt_names\n\n[alt_names]\n");
    let (mut dns, mut ip) = (0, 0);
    for name in subject_alt_names {
        if name.is_empty() || name.contains(['\n', '\r', ',', '[', ']', '=', '#']) {
            return Err(name.clone());
        }
        if name.parse::<IpAddr>().is_ok() {
            ip += 1;
            ext.push_str(&format!("IP.{ip}={name}\n"));
        } else {
            dns += 1;
            ext.push_str(&format!("DNS.{dns}={name}\n"));
        }
    }
    Ok(ext)
}

/// Parse `-ext subjectAltName` output into the set of names
///
/// ```text
/// X509v3 Subject Alternative Name:
///     DNS:edge.local, IP Address:10.0.0.5
/// ```
///
/// IP literals are normalised through [`IpAddr`] since `openssl` prints IPv6
/// addresses uncompressed.
#[must_use]
pub fn parse_san_output(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter(|line| !line.contains("Subject Alternative Name"))
        .flat_map(|line| line.split(','))
        .filter_map(|item| {
            let item = item.trim();
            if let Some(dns) = item.strip_prefix("DNS:") {
                Some(dns.trim().to_string())
            } else if let Some(ip) = item.strip_prefix("IP Address:") {
                Some(normalise_name(ip.trim()))
            } else {
                None
            }
        })
        .collect()
}

/// Canonical form of a SAN for comparison: IP literals re-rendered, DNS as is
#[must_use]
pub fn normalise_name(name: &str) -> String {
    name.parse::<IpAddr>()
        .map_or_else(|_| name.to_string(), |ip| ip.to_string())
}

/// Parse `notBefore=...`/`notAfter=...` lines
///
/// Returns `None` when either date is missing or unparseable.
#[must_use]
pub fn parse_dates_output(output: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut not_before = None;
    let mut not_after = None;
    for line in output.lines() {
        if let Some((field, value)) = line.trim().split_once('=') {
            match field {
                "notBefore" => not_before = parse_openssl_time(value),
                "notAfter" => not_after = parse_openssl_time(value),
                _ => {}
            }
        }
    }
    Some((not_before?, not_after?))
}

/// `Jan  1 00:00:00 2026 GMT` (day is space padded)
fn parse_openssl_time(value: &str) -> Option<DateTime<Utc>> {
    let normalised = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalised, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_leaf_extensions_embed_every_name() {
        let sans = BTreeSet::from([
            "edge.local".to_string(),
            "10.0.0.5".to_string(),
            "::1".to_string(),
            "api.edge.local".to_string(),
        ]);
        let ext = leaf_extensions(&sans).expect("valid names");
        assert!(ext.contains("subjectAltName=@alt_names"));
        assert!(ext.contains("DNS.1=api.edge.local"));
        assert!(ext.contains("DNS.2=edge.local"));
        assert!(ext.contains("IP.1=10.0.0.5"));
        assert!(ext.contains("IP.2=::1"));
    }

    #[test]
    fn test_leaf_extensions_rejects_injection() {
        let sans = BTreeSet::from(["edge.local\nbasicConstraints=CA:TRUE".to_string()]);
        assert!(leaf_extensions(&sans).is_err());
    }

    #[test]
    fn test_parse_san_output() {
        let output = "X509v3 Subject Alternative Name: \n    DNS:edge.local, DNS:api.edge.local, IP Address:10.0.0.5, IP Address:0:0:0:0:0:0:0:1\n";
        let sans = parse_san_output(output);
        assert_eq!(
            sans,
            BTreeSet::from([
                "edge.local".to_string(),
                "api.edge.local".to_string(),
                "10.0.0.5".to_string(),
                "::1".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_san_output_without_extension() {
        assert!(parse_san_output("No extensions in certificate\n").is_empty());
    }

    #[test]
    fn test_parse_dates_output() {
        let output = "notBefore=Jan  5 09:30:00 2026 GMT\nnotAfter=Jan  5 09:30:00 2027 GMT\n";
        let (nb, na) = parse_dates_output(output).expect("dates should parse");
        assert_eq!(nb, Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap());
        assert_eq!(na, Utc.with_ymd_and_hms(2027, 1, 5, 9, 30, 0).unwrap());
        assert!(parse_dates_output("notBefore=garbage").is_none());
    }

    #[test]
    fn test_sign_args_reference_extfile_and_ca() {
        let args = sign_args(
            Path::new("/pki/edge.csr"),
            Path::new("/pki/ca.crt"),
            Path::new("/pki/ca.key"),
            Path::new("/pki/edge.crt.new"),
            Path::new("/pki/edge.ext"),
            365,
            "abcd",
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("x509 -req"));
        assert!(joined.contains("-CA /pki/ca.crt -CAkey /pki/ca.key"));
        assert!(joined.contains("-set_serial 0xabcd"));
        assert!(joined.contains("-extfile /pki/edge.ext"));
    }
}
