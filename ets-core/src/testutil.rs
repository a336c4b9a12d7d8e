//! Test utilities for building timestamp token fixtures.
//!
//! Enabled via the `test-util` feature flag.

use base64::{engine::general_purpose::STANDARD, Engine};
use der::asn1::ObjectIdentifier;
use der::{AnyRef, Encode, Tag, TagNumber};
use ets_types::HashAlgorithm;

use crate::token::{OID_SIGNED_DATA, OID_TST_INFO};

const POLICY_OID: &str = "1.3.6.1.4.1.4146.2.3";

/// Builder for DER-encoded `TimeStampResp` / `TimeStampToken` fixtures.
///
/// The produced token carries no certificates and an empty signer set; it
/// is structurally valid for decoding but not signed.
#[derive(Debug, Clone)]
pub struct TokenFixture {
    imprint: Vec<u8>,
    hash_oid: String,
    gen_time: String,
    status: i64,
    status_text: Option<String>,
    include_token: bool,
    bare: bool,
    policy_as_integer: bool,
}

impl TokenFixture {
    /// A granted SHA-256 response over `imprint`
    pub fn new(imprint: impl Into<Vec<u8>>) -> Self {
        Self {
            imprint: imprint.into(),
            hash_oid: HashAlgorithm::Sha256.oid().to_string(),
            gen_time: "20240102030405Z".to_string(),
            status: 0,
            status_text: None,
            include_token: true,
            bare: false,
            policy_as_integer: false,
        }
    }

    pub fn hash_oid(mut self, oid: &str) -> Self {
        self.hash_oid = oid.to_string();
        self
    }

    pub fn gen_time(mut self, time: &str) -> Self {
        self.gen_time = time.to_string();
        self
    }

    pub fn status(mut self, code: i64, text: Option<&str>) -> Self {
        self.status = code;
        self.status_text = text.map(str::to_string);
        self
    }

    /// Omit the `TimeStampToken` from the response
    pub fn without_token(mut self) -> Self {
        self.include_token = false;
        self
    }

    /// Emit only the `TimeStampToken` (`ContentInfo`)
    pub fn bare(mut self) -> Self {
        self.bare = true;
        self
    }

    /// Encode the TSTInfo policy as an INTEGER, which strict parsing rejects
    pub fn policy_as_integer(mut self) -> Self {
        self.policy_as_integer = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let token = self.content_info();
        if self.bare {
            return token;
        }

        let mut status_info = integer(self.status);
        if let Some(text) = &self.status_text {
            status_info.extend(tlv(Tag::Sequence, &tlv(Tag::Utf8String, text.as_bytes())));
        }
        let mut body = tlv(Tag::Sequence, &status_info);
        if self.include_token {
            body.extend(token);
        }
        tlv(Tag::Sequence, &body)
    }

    pub fn to_pem(&self) -> String {
        let encoded = STANDARD.encode(self.build());
        let mut pem = String::from("-----BEGIN TIMESTAMP RESPONSE-----\n");
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(chunk));
            pem.push('\n');
        }
        pem.push_str("-----END TIMESTAMP RESPONSE-----\n");
        pem
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.build())
    }

    fn tst_info(&self) -> Vec<u8> {
        let mut alg = oid(&self.hash_oid);
        alg.extend(tlv(Tag::Null, &[]));
        let mut imprint = tlv(Tag::Sequence, &alg);
        imprint.extend(tlv(Tag::OctetString, &self.imprint));

        let mut body = integer(1);
        if self.policy_as_integer {
            body.extend(integer(7));
        } else {
            body.extend(oid(POLICY_OID));
        }
        body.extend(tlv(Tag::Sequence, &imprint));
        body.extend(tlv(Tag::Integer, &[0x01, 0x23, 0x45]));
        body.extend(tlv(Tag::GeneralizedTime, self.gen_time.as_bytes()));
        body.extend(tlv(Tag::Integer, &[0x3a, 0x5c]));
        tlv(Tag::Sequence, &body)
    }

    fn content_info(&self) -> Vec<u8> {
        let mut encap = oid_value(OID_TST_INFO);
        encap.extend(explicit(0, &tlv(Tag::OctetString, &self.tst_info())));

        let mut digest_alg = oid(HashAlgorithm::Sha256.oid());
        digest_alg.extend(tlv(Tag::Null, &[]));

        let mut signed = integer(3);
        signed.extend(tlv(Tag::Set, &tlv(Tag::Sequence, &digest_alg)));
        signed.extend(tlv(Tag::Sequence, &encap));
        signed.extend(tlv(Tag::Set, &[]));

        let mut content_info = oid_value(OID_SIGNED_DATA);
        content_info.extend(explicit(0, &tlv(Tag::Sequence, &signed)));
        tlv(Tag::Sequence, &content_info)
    }
}

fn tlv(tag: Tag, value: &[u8]) -> Vec<u8> {
    AnyRef::new(tag, value)
        .and_then(|any| any.to_der())
        .expect("fixture element encodes")
}

fn explicit(number: u8, inner: &[u8]) -> Vec<u8> {
    tlv(
        Tag::ContextSpecific {
            constructed: true,
            number: TagNumber::new(number),
        },
        inner,
    )
}

fn integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    // minimal two's complement encoding
    let mut start = 0;
    while start < 7
        && ((bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0))
    {
        start += 1;
    }
    tlv(Tag::Integer, &bytes[start..])
}

fn oid(dotted: &str) -> Vec<u8> {
    let parsed: ObjectIdentifier = dotted.parse().expect("fixture OID parses");
    oid_value(parsed)
}

fn oid_value(oid: ObjectIdentifier) -> Vec<u8> {
    tlv(Tag::ObjectIdentifier, oid.as_bytes())
}
