//! Client-certificate identity construction.
//!
//! MoSAPI credentials arrive as PEM text from the secret store, sometimes with
//! the BEGIN/END guard lines already stripped by whatever copied them around.
//! This module normalises that material back into well-formed PEM and builds
//! the [`reqwest::Identity`] presented on every connection. The private key is
//! accepted in PKCS#8, PKCS#1 or SEC1 form; the expected algorithm is derived
//! from the certificate's SubjectPublicKeyInfo rather than assumed to be RSA.

use crate::transport::TransportError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl KeyAlgorithm {
    pub const fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ec => "EC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs8,
    Pkcs1,
    Sec1,
}

impl KeyFormat {
    const fn pem_label(&self) -> &'static str {
        match self {
            KeyFormat::Pkcs8 => "PRIVATE KEY",
            KeyFormat::Pkcs1 => "RSA PRIVATE KEY",
            KeyFormat::Sec1 => "EC PRIVATE KEY",
        }
    }
}

// DER-encoded OID values for rsaEncryption and id-ecPublicKey.
const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_EXPLICIT_0: u8 = 0xA0;

/// Builds the client identity from PEM certificate and private key text.
///
/// The key's algorithm is cross-checked against the certificate before the
/// identity is handed to the TLS stack, so a mismatched pair fails here with
/// a readable error instead of deep inside the handshake.
pub fn client_identity(
    cert_pem: &str,
    key_pem: &str,
) -> Result<reqwest::Identity, TransportError> {
    let cert_ders: Vec<Vec<u8>> = pem_payloads(cert_pem)
        .iter()
        .map(|payload| decode_payload(payload, "certificate"))
        .collect::<Result<_, _>>()?;
    let Some(leaf_der) = cert_ders.first() else {
        return Err(TransportError::Tls("certificate PEM is empty".into()));
    };
    let cert_algorithm = certificate_key_algorithm(leaf_der)?;

    let key_payloads = pem_payloads(key_pem);
    let key_payload = key_payloads
        .first()
        .ok_or_else(|| TransportError::Tls("private key PEM is empty".into()))?;
    let key_der = decode_payload(key_payload, "private key")?;
    let (key_format, key_algorithm) = classify_key(&key_der)?;

    if key_algorithm != cert_algorithm {
        return Err(TransportError::Tls(format!(
            "certificate public key is {} but the private key is {}",
            cert_algorithm.as_str(),
            key_algorithm.as_str()
        )));
    }

    let mut bundle = String::new();
    for der in &cert_ders {
        write_pem_block(&mut bundle, "CERTIFICATE", der);
    }
    write_pem_block(&mut bundle, key_format.pem_label(), &key_der);

    reqwest::Identity::from_pem(bundle.as_bytes())
        .map_err(|e| TransportError::Tls(format!("failed to build client identity: {e}")))
}

/// Extracts the Base64 payloads of every PEM block. Input without any guard
/// lines is treated as a single bare payload after whitespace stripping.
fn pem_payloads(input: &str) -> Vec<String> {
    if !input.contains("-----BEGIN") {
        let bare: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        return if bare.is_empty() { vec![] } else { vec![bare] };
    }

    let mut payloads = Vec::new();
    let mut current: Option<String> = None;
    for line in input.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN") {
            current = Some(String::new());
        } else if line.starts_with("-----END") {
            if let Some(payload) = current.take()
                && !payload.is_empty()
            {
                payloads.push(payload);
            }
        } else if let Some(payload) = current.as_mut() {
            payload.push_str(line);
        }
    }
    payloads
}

fn decode_payload(payload: &str, what: &str) -> Result<Vec<u8>, TransportError> {
    BASE64
        .decode(payload)
        .map_err(|e| TransportError::Tls(format!("{what} is not valid Base64: {e}")))
}

fn write_pem_block(out: &mut String, label: &str, der: &[u8]) {
    let payload = BASE64.encode(der);
    out.push_str(&format!("-----BEGIN {label}-----\n"));
    for chunk in payload.as_bytes().chunks(64) {
        // chunks of a pure-ASCII base64 string stay valid UTF-8
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
}

/// Reads the SubjectPublicKeyInfo algorithm OID out of an X.509 certificate.
pub fn certificate_key_algorithm(cert_der: &[u8]) -> Result<KeyAlgorithm, TransportError> {
    let mut outer = DerReader::new(cert_der);
    let (_, cert_body) = outer.expect_element(TAG_SEQUENCE, "Certificate")?;

    let mut cert = DerReader::new(cert_body);
    let (_, tbs_body) = cert.expect_element(TAG_SEQUENCE, "TBSCertificate")?;

    let mut tbs = DerReader::new(tbs_body);
    // version is an optional EXPLICIT [0] before the serial number
    if tbs.peek_tag() == Some(TAG_EXPLICIT_0) {
        tbs.read_element()?;
    }
    for field in ["serialNumber", "signature", "issuer", "validity", "subject"] {
        tbs.read_element()
            .map_err(|e| TransportError::Tls(format!("malformed {field}: {e}")))?;
    }

    let (_, spki_body) = tbs.expect_element(TAG_SEQUENCE, "SubjectPublicKeyInfo")?;
    let mut spki = DerReader::new(spki_body);
    let (_, alg_body) = spki.expect_element(TAG_SEQUENCE, "AlgorithmIdentifier")?;
    let mut alg = DerReader::new(alg_body);
    let (tag, oid) = alg.read_element()?;
    if tag != TAG_OID {
        return Err(TransportError::Tls(
            "AlgorithmIdentifier does not start with an OID".into(),
        ));
    }

    match oid {
        _ if oid == OID_RSA_ENCRYPTION => Ok(KeyAlgorithm::Rsa),
        _ if oid == OID_EC_PUBLIC_KEY => Ok(KeyAlgorithm::Ec),
        _ => Err(TransportError::Tls(format!(
            "unsupported certificate key algorithm OID: {oid:02X?}"
        ))),
    }
}

/// Classifies a DER private key blob by structure.
///
/// PKCS#8 and PKCS#1 both open with INTEGER 0, distinguished by whether an
/// AlgorithmIdentifier SEQUENCE or the RSA modulus INTEGER follows; SEC1 opens
/// with INTEGER 1 followed by the key octets.
pub fn classify_key(key_der: &[u8]) -> Result<(KeyFormat, KeyAlgorithm), TransportError> {
    let mut outer = DerReader::new(key_der);
    let (_, body) = outer.expect_element(TAG_SEQUENCE, "private key")?;

    let mut reader = DerReader::new(body);
    let (tag, version) = reader.read_element()?;
    if tag != TAG_INTEGER {
        return Err(TransportError::Tls(
            "private key does not start with a version INTEGER".into(),
        ));
    }

    match version {
        [0] => {
            let (tag, content) = reader.read_element()?;
            match tag {
                TAG_INTEGER => Ok((KeyFormat::Pkcs1, KeyAlgorithm::Rsa)),
                TAG_SEQUENCE => {
                    let mut alg = DerReader::new(content);
                    let (tag, oid) = alg.read_element()?;
                    if tag != TAG_OID {
                        return Err(TransportError::Tls(
                            "PKCS#8 AlgorithmIdentifier does not start with an OID".into(),
                        ));
                    }
                    match oid {
                        _ if oid == OID_RSA_ENCRYPTION => Ok((KeyFormat::Pkcs8, KeyAlgorithm::Rsa)),
                        _ if oid == OID_EC_PUBLIC_KEY => Ok((KeyFormat::Pkcs8, KeyAlgorithm::Ec)),
                        _ => Err(TransportError::Tls(format!(
                            "unsupported private key algorithm OID: {oid:02X?}"
                        ))),
                    }
                }
                _ => Err(TransportError::Tls(format!(
                    "unrecognised private key structure (tag {tag:#04X} after version 0)"
                ))),
            }
        }
        [1] => {
            let (tag, _) = reader.read_element()?;
            if tag == TAG_OCTET_STRING {
                Ok((KeyFormat::Sec1, KeyAlgorithm::Ec))
            } else {
                Err(TransportError::Tls(format!(
                    "unrecognised private key structure (tag {tag:#04X} after version 1)"
                )))
            }
        }
        _ => Err(TransportError::Tls(
            "unsupported private key version".into(),
        )),
    }
}

/// Minimal TLV reader, just enough to walk the structures above.
struct DerReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        DerReader { bytes, pos: 0 }
    }

    fn peek_tag(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn read_element(&mut self) -> Result<(u8, &'a [u8]), TransportError> {
        let tag = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| TransportError::Tls("truncated DER element".into()))?;
        self.pos += 1;

        let first = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| TransportError::Tls("truncated DER length".into()))?;
        self.pos += 1;

        let len = if first < 0x80 {
            first as usize
        } else {
            let num_bytes = (first & 0x7F) as usize;
            if num_bytes == 0 || num_bytes > 4 {
                return Err(TransportError::Tls("unsupported DER length".into()));
            }
            let mut len = 0usize;
            for _ in 0..num_bytes {
                let b = *self
                    .bytes
                    .get(self.pos)
                    .ok_or_else(|| TransportError::Tls("truncated DER length".into()))?;
                self.pos += 1;
                len = (len << 8) | b as usize;
            }
            len
        };

        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| TransportError::Tls("DER element overruns the buffer".into()))?;
        let content = &self.bytes[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect_element(&mut self, tag: u8, what: &str) -> Result<(u8, &'a [u8]), TransportError> {
        let (actual, content) = self
            .read_element()
            .map_err(|e| TransportError::Tls(format!("malformed {what}: {e}")))?;
        if actual != tag {
            return Err(TransportError::Tls(format!(
                "expected {what} (tag {tag:#04X}), found tag {actual:#04X}"
            )));
        }
        Ok((actual, content))
    }
}
