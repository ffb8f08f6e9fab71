//! Certificate utilities.

use color_eyre::eyre::WrapErr as _;
use sha1::{Digest as _, Sha1};

/// Headers a TLS-terminating gateway uses to forward the client certificate, in lookup order.
pub const CLIENT_CERT_HEADERS: [&str; 3] = ["x-ssl-client-cert", "x-client-cert", "ssl-client-cert"];

/// SHA-1 fingerprint of a DER certificate as uppercase hex.
///
/// This is the form Windows uses to key certificates in the provisioning document.
pub fn sha1_fingerprint(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// Parse a certificate from PEM format.
pub fn parse_pem_cert(pem_str: &str) -> color_eyre::eyre::Result<Vec<u8>> {
    let pem_data =
        ::pem::parse(pem_str).map_err(|e| color_eyre::eyre::eyre!("failed to parse PEM: {}", e))?;

    if pem_data.tag() != "CERTIFICATE" {
        color_eyre::eyre::bail!("PEM is not a certificate, got: {}", pem_data.tag());
    }

    Ok(pem_data.into_contents())
}

/// Extract certificate from RFC 9440 header format (colon-delimited base64 DER).
///
/// Format: `:base64EncodedDERCert:`
pub fn extract_rfc9440_cert(header: &str) -> color_eyre::eyre::Result<Vec<u8>> {
    let header = header.trim();

    if header.len() < 2 || !header.starts_with(':') || !header.ends_with(':') {
        color_eyre::eyre::bail!("invalid RFC 9440 format: must be :base64:");
    }

    let b64 = &header[1..header.len() - 1];

    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .wrap_err("failed to decode base64 certificate")
}

/// Extract certificate from URL-escaped PEM header.
pub fn extract_pem_header(header: &str) -> color_eyre::eyre::Result<Vec<u8>> {
    let pem_str = urlencoding::decode(header).wrap_err("failed to URL-decode PEM header")?;

    parse_pem_cert(&pem_str)
}

/// Decode a forwarded client certificate header in either supported format.
pub fn extract_client_cert(header: &str) -> color_eyre::eyre::Result<Vec<u8>> {
    if header.trim_start().starts_with(':') {
        extract_rfc9440_cert(header)
    } else {
        extract_pem_header(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc9440_extraction() {
        // Base64 of "test"
        let header = ":dGVzdA==:";
        let result = extract_rfc9440_cert(header).unwrap();
        assert_eq!(result, b"test");
        assert!(extract_rfc9440_cert(":").is_err());
    }

    #[test]
    fn test_pem_header_extraction() {
        let pem = "-----BEGIN CERTIFICATE-----\ndGVzdA==\n-----END CERTIFICATE-----\n";
        let header = urlencoding::encode(pem);
        assert_eq!(extract_client_cert(&header).unwrap(), b"test");
    }

    #[test]
    fn test_fingerprint_is_uppercase_sha1() {
        assert_eq!(
            sha1_fingerprint(b"abc"),
            "A9993E364706816ABA3E25717850C26C9CD0D89D"
        );
        assert_eq!(sha1_fingerprint(b"abc"), sha1_fingerprint(b"abc"));
    }
}
