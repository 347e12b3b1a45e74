//! Certificate authority operations.
//!
//! The CA signs the node certificate securing traffic between database
//! cluster members and one client certificate per logical SQL user. Key
//! material is held PEM-encoded; `KeyPair` is rebuilt from PEM on each
//! signing operation since it is not `Clone`.

use std::convert::TryFrom;

use anyhow::{Context, Result};
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    SanType,
};

/// Validity period for the CA certificate.
const CA_VALIDITY_YEARS: i64 = 10;
/// Validity period for node and client certificates.
const LEAF_VALIDITY_YEARS: i64 = 1;

/// A CA keypair plus the operations deriving leaf certificates from it.
#[derive(Clone)]
pub struct CertificateAuthority {
    ca_key_pem: String,
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Generate a fresh self-signed CA.
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = base_params(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity(CA_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().context("error generating ca key pair")?;
        let ca_key_pem = key_pair.serialize_pem();
        let cert = params.self_signed(&key_pair).context("error self-signing ca certificate")?;

        Ok(Self { ca_key_pem, ca_cert_pem: cert.pem() })
    }

    /// Rehydrate a CA from persisted PEM material.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let _ = KeyPair::from_pem(key_pem).context("error parsing ca key")?;
        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Derive the node certificate for the database cluster.
    ///
    /// The certificate carries both server and client auth usages, since
    /// cluster members authenticate to each other in both directions. SANs
    /// cover the service names under which peers and clients reach a node.
    pub fn generate_node_cert(&self, cluster_name: &str, namespace: &str, cluster_dns: &str) -> Result<(String, String)> {
        let mut params = base_params("node");
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        params.subject_alt_names = dns_sans(&[
            "localhost".to_string(),
            cluster_name.to_string(),
            format!("{}-public", cluster_name),
            format!("{}-public.{}", cluster_name, namespace),
            format!("{}-public.{}.svc.{}", cluster_name, namespace, cluster_dns),
            format!("*.{}", cluster_name),
            format!("*.{}.{}", cluster_name, namespace),
            format!("*.{}.{}.svc.{}", cluster_name, namespace, cluster_dns),
        ])?;
        self.sign_leaf(params)
    }

    /// Derive a client certificate for the given SQL user.
    ///
    /// The database authenticates clients by the certificate's common name,
    /// so the CN is the user name verbatim.
    pub fn generate_client_cert(&self, user: &str) -> Result<(String, String)> {
        let mut params = base_params(user);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.sign_leaf(params)
    }

    /// Generate a fresh keypair and sign it with this CA.
    fn sign_leaf(&self, mut params: CertificateParams) -> Result<(String, String)> {
        let (not_before, not_after) = validity(LEAF_VALIDITY_YEARS);
        params.not_before = not_before;
        params.not_after = not_after;

        let leaf_key = KeyPair::generate().context("error generating leaf key pair")?;
        let ca_key = KeyPair::from_pem(&self.ca_key_pem).context("error loading ca key")?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key).context("error building issuer from ca material")?;
        let cert = params.signed_by(&leaf_key, &issuer).context("error signing certificate")?;
        Ok((cert.pem(), leaf_key.serialize_pem()))
    }
}

fn base_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String("Corral".to_string()));
    params.distinguished_name = dn;
    params
}

fn validity(years: i64) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(years * 365))
}

fn dns_sans(names: &[String]) -> Result<Vec<SanType>> {
    names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.clone())
                .map(SanType::DnsName)
                .with_context(|| format!("invalid dns name {}", name))
        })
        .collect()
}
