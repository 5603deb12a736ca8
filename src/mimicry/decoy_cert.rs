//! Throwaway identity that looks like a stock Windows host certificate.

use rand::distributions::Uniform;
use rand::Rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};

use crate::net::tls::ServerIdentity;

const VALIDITY_DAYS: i64 = 180;
const ALPHANUMERIC_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Hostname plus the self-signed certificate presented for it.
#[derive(Debug)]
pub struct DecoyIdentity {
    pub hostname: String,
    pub identity: ServerIdentity,
}

impl DecoyIdentity {
    /// Generate a fresh hostname, key pair and certificate.
    pub fn generate() -> Result<Self, rcgen::Error> {
        let mut rng = rand::thread_rng();
        let hostname = random_hostname(&mut rng);

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname.as_str());
        params.distinguished_name = dn;

        let backdate = Duration::days(rng.gen_range(1..=VALIDITY_DAYS));
        params.not_before = OffsetDateTime::now_utc() - backdate;
        params.not_after = params.not_before + Duration::days(VALIDITY_DAYS);

        let mut serial: [u8; 16] = rng.gen();
        serial[0] &= 0x7f;
        serial[0] |= 0x01;
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DataEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;
        tracing::info!(hostname = %hostname, "Generated decoy certificate");

        Ok(Self {
            hostname,
            identity: ServerIdentity {
                cert_chain: vec![cert.der().clone()],
                key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
            },
        })
    }
}

/// `WIN-` + 11 or `DESKTOP-` + 7 uppercase alphanumerics.
fn random_hostname<R: Rng>(rng: &mut R) -> String {
    let (prefix, len) = if rng.gen_bool(0.5) {
        ("WIN-", 11)
    } else {
        ("DESKTOP-", 7)
    };
    let charset = Uniform::from(0..ALPHANUMERIC_UPPER.len());
    let suffix: String = (0..len)
        .map(|_| ALPHANUMERIC_UPPER[rng.sample(charset)] as char)
        .collect();
    format!("{prefix}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_follow_windows_patterns() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let name = random_hostname(&mut rng);
            let suffix = name
                .strip_prefix("WIN-")
                .filter(|s| s.len() == 11)
                .or_else(|| name.strip_prefix("DESKTOP-").filter(|s| s.len() == 7))
                .unwrap_or_else(|| panic!("unexpected hostname {name}"));
            assert!(suffix
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn generates_usable_identity() {
        let decoy = DecoyIdentity::generate().unwrap();
        assert_eq!(decoy.identity.cert_chain.len(), 1);
        assert!(!decoy.identity.cert_chain[0].is_empty());
        assert!(decoy.hostname.starts_with("WIN-") || decoy.hostname.starts_with("DESKTOP-"));
    }
}
