//! Detached CAdES `SignedData` assembly.
//!
//! Two steps: [`CmsBuilder::signed_attributes`] produces the DER `SET` the key
//! signs, [`CmsBuilder::assemble`] wraps the signature, certificates, CRLs and
//! an optional timestamp token into a `ContentInfo`.

use crate::domain::asn1::{
    algorithm_identifier, context_constructed, octet_string, oid, sequence, set_of, small_integer,
    tlv,
};
use crate::domain::certificate::{CertificateChain, KeyAlgorithm, SigningCertificate};
use crate::domain::constants::{
    ASN1_CONTEXT_0_CONSTRUCTED, ASN1_CONTEXT_1_CONSTRUCTED, ECDSA_WITH_SHA256_OID, PKCS7_DATA_OID,
    PKCS7_SIGNED_DATA_OID, PKCS9_CONTENT_TYPE_OID, PKCS9_MESSAGE_DIGEST_OID, SHA256_OID,
    SHA256_WITH_RSA_OID, SIGNATURE_TIMESTAMP_TOKEN_OID, SIGNING_CERTIFICATE_V2_OID,
};
use crate::infra::error::{SigningError, SigningResult};
use der::Encode;
use sha2::{Digest, Sha256};

/// Canonical signed attributes.
#[derive(Debug, Clone)]
pub struct SignedAttributes {
    set_der: Vec<u8>,
}

impl SignedAttributes {
    /// `SET OF Attribute` with the universal tag; these are the bytes signed.
    #[must_use]
    pub fn to_be_signed(&self) -> &[u8] {
        &self.set_der
    }

    /// Same content re-tagged `[0] IMPLICIT` for the `SignerInfo`.
    fn embedded(&self) -> SigningResult<Vec<u8>> {
        let mut out = self.set_der.clone();
        match out.first_mut() {
            Some(tag) => *tag = ASN1_CONTEXT_0_CONSTRUCTED,
            None => {
                return Err(SigningError::Asn1Error(
                    "empty signed attributes".to_string(),
                ))
            }
        }
        Ok(out)
    }
}

pub struct CmsBuilder<'a> {
    chain: &'a CertificateChain,
    algorithm: KeyAlgorithm,
}

impl<'a> CmsBuilder<'a> {
    #[must_use]
    pub fn new(chain: &'a CertificateChain, algorithm: KeyAlgorithm) -> Self {
        Self { chain, algorithm }
    }

    fn signer(&self) -> &SigningCertificate {
        self.chain.leaf()
    }

    /// contentType, messageDigest and signingCertificateV2, DER-sorted.
    pub fn signed_attributes(&self, content_digest: &[u8]) -> SigningResult<SignedAttributes> {
        if content_digest.len() != 32 {
            return Err(SigningError::CryptographicError(format!(
                "expected a SHA-256 digest, got {} bytes",
                content_digest.len()
            )));
        }
        let content_type = attribute(PKCS9_CONTENT_TYPE_OID, &oid(PKCS7_DATA_OID));
        let message_digest = attribute(PKCS9_MESSAGE_DIGEST_OID, &octet_string(content_digest));
        let signing_certificate =
            attribute(SIGNING_CERTIFICATE_V2_OID, &self.signing_certificate_v2()?);

        let set_der = set_of(vec![content_type, message_digest, signing_certificate]);
        log::debug!("Signed attributes: {} bytes", set_der.len());
        Ok(SignedAttributes { set_der })
    }

    /// `SigningCertificateV2 ::= SEQUENCE { certs SEQUENCE OF ESSCertIDv2 }`
    /// with the default SHA-256 hash algorithm omitted.
    fn signing_certificate_v2(&self) -> SigningResult<Vec<u8>> {
        let cert = self.signer();
        let cert_hash = Sha256::digest(cert.as_der());
        let issuer_serial = sequence(&[
            &sequence(&[&context_constructed(4, &cert.issuer_der()?)]),
            &serial_der(cert)?,
        ]);
        let ess_cert_id = sequence(&[&octet_string(&cert_hash), &issuer_serial]);
        Ok(sequence(&[&sequence(&[&ess_cert_id])]))
    }

    fn signature_algorithm(&self) -> Vec<u8> {
        match self.algorithm {
            KeyAlgorithm::Rsa => algorithm_identifier(SHA256_WITH_RSA_OID, true),
            KeyAlgorithm::Ec => algorithm_identifier(ECDSA_WITH_SHA256_OID, false),
        }
    }

    /// Build the final `ContentInfo`.
    pub fn assemble(
        &self,
        attributes: &SignedAttributes,
        signature: &[u8],
        crls: &[Vec<u8>],
        timestamp_token: Option<&[u8]>,
    ) -> SigningResult<Vec<u8>> {
        let signer = self.signer();
        let sid = sequence(&[&signer.issuer_der()?, &serial_der(signer)?]);

        let mut signer_fields = vec![
            small_integer(1),
            sid,
            algorithm_identifier(SHA256_OID, true),
            attributes.embedded()?,
            self.signature_algorithm(),
            octet_string(signature),
        ];
        if let Some(token) = timestamp_token {
            // [1] IMPLICIT SET OF Attribute, one member
            let unsigned = attribute(SIGNATURE_TIMESTAMP_TOKEN_OID, token);
            signer_fields.push(tlv(ASN1_CONTEXT_1_CONSTRUCTED, &unsigned));
        }
        let signer_info = sequence(&signer_fields.iter().map(Vec::as_slice).collect::<Vec<_>>());

        let certificates: Vec<u8> = self
            .chain
            .certificates()
            .iter()
            .flat_map(|c| c.as_der().iter().copied())
            .collect();

        let mut signed_data_fields = vec![
            small_integer(1),
            set_of(vec![algorithm_identifier(SHA256_OID, true)]),
            sequence(&[&oid(PKCS7_DATA_OID)]),
            tlv(ASN1_CONTEXT_0_CONSTRUCTED, &certificates),
        ];
        if !crls.is_empty() {
            signed_data_fields.push(tlv(ASN1_CONTEXT_1_CONSTRUCTED, &crls.concat()));
        }
        signed_data_fields.push(set_of(vec![signer_info]));
        let signed_data =
            sequence(&signed_data_fields.iter().map(Vec::as_slice).collect::<Vec<_>>());

        let content_info = sequence(&[
            &oid(PKCS7_SIGNED_DATA_OID),
            &context_constructed(0, &signed_data),
        ]);
        log::debug!(
            "CMS container: {} bytes ({} certificate(s), {} CRL(s), timestamp: {})",
            content_info.len(),
            self.chain.len(),
            crls.len(),
            timestamp_token.is_some()
        );
        Ok(content_info)
    }
}

/// `Attribute ::= SEQUENCE { attrType OID, attrValues SET OF ANY }` with one value.
fn attribute(attr_oid: &[u8], value: &[u8]) -> Vec<u8> {
    sequence(&[&oid(attr_oid), &set_of(vec![value.to_vec()])])
}

fn serial_der(cert: &SigningCertificate) -> SigningResult<Vec<u8>> {
    Ok(cert.x509().tbs_certificate.serial_number.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asn1::DerReader;
    use crate::domain::constants::{ASN1_OCTET_STRING_TAG, ASN1_SEQUENCE_TAG, ASN1_SET_TAG};
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::cms::{CMSOptions, CmsContentInfo};
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::sign::Signer;
    use openssl::x509::{X509NameBuilder, X509};

    fn self_signed() -> (PKey<Private>, SigningCertificate) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "CMS Test").unwrap();
        let name = name.build();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(0x1234).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = SigningCertificate::from_openssl(&builder.build()).unwrap();
        (key, cert)
    }

    fn sign(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
        let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
        signer.update(data).unwrap();
        signer.sign_to_vec().unwrap()
    }

    #[test]
    fn rejects_non_sha256_digest() {
        let (_, cert) = self_signed();
        let chain = CertificateChain::leaf_only(cert);
        let builder = CmsBuilder::new(&chain, KeyAlgorithm::Rsa);
        assert!(builder.signed_attributes(&[0u8; 20]).is_err());
    }

    #[test]
    fn signed_attributes_are_sorted_set() {
        let (_, cert) = self_signed();
        let chain = CertificateChain::leaf_only(cert);
        let attrs = CmsBuilder::new(&chain, KeyAlgorithm::Rsa)
            .signed_attributes(&[7u8; 32])
            .unwrap();

        let mut outer = DerReader::new(attrs.to_be_signed());
        let set = outer.expect(ASN1_SET_TAG).unwrap();
        let mut members = DerReader::new(set.content);
        let mut raws = Vec::new();
        while !members.is_empty() {
            raws.push(members.expect(ASN1_SEQUENCE_TAG).unwrap().raw.to_vec());
        }
        assert_eq!(raws.len(), 3);
        let mut sorted = raws.clone();
        sorted.sort();
        assert_eq!(raws, sorted);
    }

    #[test]
    fn detached_container_verifies_with_openssl() {
        let (key, cert) = self_signed();
        let chain = CertificateChain::leaf_only(cert);
        let content = b"%PDF-1.7 signed range bytes";
        let builder = CmsBuilder::new(&chain, KeyAlgorithm::Rsa);
        let attrs = builder
            .signed_attributes(&Sha256::digest(content))
            .unwrap();
        let signature = sign(&key, attrs.to_be_signed());
        let der = builder.assemble(&attrs, &signature, &[], None).unwrap();

        let mut cms = CmsContentInfo::from_der(&der).unwrap();
        cms.verify(
            None,
            None,
            Some(content),
            None,
            CMSOptions::NO_SIGNER_CERT_VERIFY | CMSOptions::BINARY,
        )
        .unwrap();

        let mut tampered = CmsContentInfo::from_der(&der).unwrap();
        assert!(tampered
            .verify(
                None,
                None,
                Some(b"other bytes"),
                None,
                CMSOptions::NO_SIGNER_CERT_VERIFY | CMSOptions::BINARY,
            )
            .is_err());
    }

    #[test]
    fn timestamp_token_lands_in_unsigned_attributes() {
        let (key, cert) = self_signed();
        let chain = CertificateChain::leaf_only(cert);
        let builder = CmsBuilder::new(&chain, KeyAlgorithm::Rsa);
        let attrs = builder.signed_attributes(&[1u8; 32]).unwrap();
        let signature = sign(&key, attrs.to_be_signed());
        let token = sequence(&[&octet_string(b"token")]);

        let der = builder
            .assemble(&attrs, &signature, &[], Some(&token))
            .unwrap();
        let oid_der = oid(SIGNATURE_TIMESTAMP_TOKEN_OID);
        let position = der
            .windows(oid_der.len())
            .position(|w| w == oid_der.as_slice())
            .expect("timestamp attribute present");
        // the signature value precedes the unsigned attributes
        let sig_octets = tlv(ASN1_OCTET_STRING_TAG, &signature);
        let sig_position = der
            .windows(sig_octets.len())
            .position(|w| w == sig_octets.as_slice())
            .unwrap();
        assert!(sig_position < position);

        let plain = builder.assemble(&attrs, &signature, &[], None).unwrap();
        assert!(der.len() > plain.len());
    }
}
