//! Signed timestamp token decoding
//!
//! Authorities answer with an RFC 3161 `TimeStampResp`, but tokens also reach
//! us as a bare `TimeStampToken`, PEM-armoured, or as bare base64 text. The
//! decoder runs an ordered list of strategies and keeps every failure reason
//! so a final error explains what was tried.
//!
//! Only the parts needed to locate the message imprint and the generation
//! time are interpreted; the CMS signature is carried but never checked.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use der::asn1::ObjectIdentifier;
use der::{AnyRef, Decode, Encode, Reader, SliceReader, Tag, Tagged};
use ets_types::{HashAlgorithm, TokenInfo};
use thiserror::Error;
use tracing::debug;

/// id-signedData
pub const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");

/// id-ct-TSTInfo
pub const OID_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

const PREVIEW_LEN: usize = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("TSA response empty")]
    Empty,

    #[error("tsa response is binary but not RFC3161 TimeStampResp: {reason}")]
    MalformedBinaryToken { reason: String },

    #[error("tsa response is not base64 or ASN.1 data: illegal character {byte:?} at offset {offset}")]
    InvalidBase64Alphabet { offset: usize, byte: char },

    #[error("base64 decode failed: {0}")]
    Base64(String),

    #[error("ASN.1 decode failed: {0}")]
    Der(String),

    #[error("message imprint could not be determined: {0}")]
    DecodeAmbiguous(String),

    #[error("authority returned {status}{}", status_suffix(.text))]
    NotGranted { status: String, text: Option<String> },

    #[error("all decode strategies failed: {}", .0.join("; "))]
    AllStrategiesFailed(Vec<String>),
}

fn status_suffix(text: &Option<String>) -> String {
    text.as_deref().map(|t| format!(": {}", t)).unwrap_or_default()
}

impl From<der::Error> for TokenError {
    fn from(e: der::Error) -> Self {
        TokenError::Der(e.to_string())
    }
}

impl From<der::oid::Error> for TokenError {
    fn from(e: der::oid::Error) -> Self {
        TokenError::Der(format!("bad object identifier: {}", e))
    }
}

/// Which strategy produced the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    Der,
    Pem,
    Base64,
}

impl TokenEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenEncoding::Der => "der",
            TokenEncoding::Pem => "pem",
            TokenEncoding::Base64 => "base64",
        }
    }
}

/// `Tsr` for a full `TimeStampResp`, `Tst` for a bare `TimeStampToken`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFormat {
    Tsr,
    Tst,
}

impl TokenFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenFormat::Tsr => "tsr",
            TokenFormat::Tst => "tst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
    Waiting,
    RevocationWarning,
    RevocationNotification,
    Other(i64),
}

impl PkiStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => PkiStatus::Granted,
            1 => PkiStatus::GrantedWithMods,
            2 => PkiStatus::Rejection,
            3 => PkiStatus::Waiting,
            4 => PkiStatus::RevocationWarning,
            5 => PkiStatus::RevocationNotification,
            other => PkiStatus::Other(other),
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, PkiStatus::Granted | PkiStatus::GrantedWithMods)
    }

    pub fn name(self) -> String {
        match self {
            PkiStatus::Granted => "granted".to_string(),
            PkiStatus::GrantedWithMods => "grantedWithMods".to_string(),
            PkiStatus::Rejection => "rejection".to_string(),
            PkiStatus::Waiting => "waiting".to_string(),
            PkiStatus::RevocationWarning => "revocationWarning".to_string(),
            PkiStatus::RevocationNotification => "revocationNotification".to_string(),
            PkiStatus::Other(code) => format!("status {}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageImprint {
    pub hash_algorithm_oid: String,
    pub hashed_message: Vec<u8>,
}

impl MessageImprint {
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        HashAlgorithm::from_oid(&self.hash_algorithm_oid)
    }

    /// Known algorithm and an imprint of exactly its output length
    pub fn is_well_formed(&self) -> bool {
        self.hash_algorithm()
            .map(|alg| alg.digest_len() == self.hashed_message.len())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    pub policy: String,
    pub message_imprint: MessageImprint,
    pub serial_hex: String,
    pub gen_time: DateTime<Utc>,
    pub nonce: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub format: TokenFormat,
    pub encoding: TokenEncoding,
    pub status: PkiStatus,
    pub status_text: Option<String>,
    /// DER of the `TimeStampToken` (`ContentInfo`), absent when the
    /// authority refused to issue one
    pub token_der: Option<Vec<u8>>,
    pub tst_info: Option<TstInfo>,
    /// Why `tst_info` could not be parsed, if it could not
    pub tst_info_error: Option<String>,
}

impl SignedToken {
    pub fn generation_time(&self) -> Option<DateTime<Utc>> {
        self.tst_info.as_ref().map(|info| info.gen_time)
    }

    pub fn message_imprint(&self) -> Option<&MessageImprint> {
        self.tst_info.as_ref().map(|info| &info.message_imprint)
    }

    /// Fails unless the authority granted the request
    pub fn check_granted(&self) -> Result<(), TokenError> {
        if self.status.is_granted() {
            return Ok(());
        }
        Err(TokenError::NotGranted {
            status: self.status.name(),
            text: self.status_text.clone(),
        })
    }

    pub fn to_info(&self) -> TokenInfo {
        let imprint = self.message_imprint();
        TokenInfo {
            status: self.status.name(),
            format: self.format.as_str().to_string(),
            encoding: self.encoding.as_str().to_string(),
            time: self.generation_time().map(|t| t.to_rfc3339()),
            hash_oid: imprint.map(|i| i.hash_algorithm_oid.clone()),
            hash_alg: imprint
                .and_then(MessageImprint::hash_algorithm)
                .map(|alg| alg.name().to_string()),
            imprint_hex: imprint.map(|i| hex::encode(&i.hashed_message)),
            policy: self.tst_info.as_ref().map(|info| info.policy.clone()),
            serial_hex: self.tst_info.as_ref().map(|info| info.serial_hex.clone()),
            nonce_hex: self
                .tst_info
                .as_ref()
                .and_then(|info| info.nonce.as_deref())
                .map(hex::encode),
            hash_match: None,
        }
    }
}

/// Lossy text preview of a response, for error reports
pub fn preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(PREVIEW_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

enum Attempt {
    Decoded(SignedToken),
    Skipped,
    Failed(TokenError),
    Stop(TokenError),
}

type Strategy = fn(&[u8], &[String]) -> Attempt;

/// Strategies in the order they are tried
const DECODE_CHAIN: &[(&str, Strategy)] = &[
    ("der", decode_der_strategy),
    ("binary", binary_guard),
    ("pem", decode_pem_strategy),
    ("base64", decode_base64_strategy),
];

/// Decode an authority response or token in any supported encoding
pub fn decode_token(bytes: &[u8]) -> Result<SignedToken, TokenError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(TokenError::Empty);
    }
    let mut failures: Vec<String> = Vec::new();
    for (name, strategy) in DECODE_CHAIN {
        match strategy(bytes, &failures) {
            Attempt::Decoded(token) => {
                debug!(strategy = name, format = token.format.as_str(), "decoded timestamp token");
                return Ok(token);
            }
            Attempt::Skipped => {}
            Attempt::Failed(e) => failures.push(format!("{}: {}", name, e)),
            Attempt::Stop(e) => return Err(e),
        }
    }
    Err(TokenError::AllStrategiesFailed(failures))
}

fn decode_der_strategy(bytes: &[u8], _: &[String]) -> Attempt {
    match decode_der(bytes, TokenEncoding::Der) {
        Ok(token) => Attempt::Decoded(token),
        Err(e) => Attempt::Failed(e),
    }
}

fn binary_guard(bytes: &[u8], failures: &[String]) -> Attempt {
    if bytes.is_ascii() {
        return Attempt::Skipped;
    }
    Attempt::Stop(TokenError::MalformedBinaryToken {
        reason: failures.join("; "),
    })
}

fn decode_pem_strategy(bytes: &[u8], _: &[String]) -> Attempt {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if !text.starts_with("-----BEGIN") {
        return Attempt::Skipped;
    }
    let body: String = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let result = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| TokenError::Base64(e.to_string()))
        .and_then(|der| decode_der(&der, TokenEncoding::Pem));
    match result {
        Ok(token) => Attempt::Decoded(token),
        Err(e) => Attempt::Stop(e),
    }
}

fn decode_base64_strategy(bytes: &[u8], _: &[String]) -> Attempt {
    let text = String::from_utf8_lossy(bytes);
    let cleaned: String = text.trim().chars().filter(|c| *c != '\r' && *c != '\n').collect();

    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=';
    if let Some((offset, byte)) = cleaned.char_indices().find(|(_, c)| !allowed(*c)) {
        return Attempt::Stop(TokenError::InvalidBase64Alphabet { offset, byte });
    }

    let mut padded = cleaned;
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let result = STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| TokenError::Base64(e.to_string()))
        .and_then(|der| decode_der(&der, TokenEncoding::Base64));
    match result {
        Ok(token) => Attempt::Decoded(token),
        Err(e) => Attempt::Stop(e),
    }
}

/// Strict DER decode of a `TimeStampResp` or a bare `TimeStampToken`
pub fn decode_der(bytes: &[u8], encoding: TokenEncoding) -> Result<SignedToken, TokenError> {
    let root = AnyRef::from_der(bytes)?;
    expect_tag(&root, Tag::Sequence, "top level")?;
    let items = elements(root.value())?;

    match items.first().map(Tagged::tag) {
        // TimeStampResp starts with PKIStatusInfo
        Some(Tag::Sequence) => decode_response(&items, encoding),
        // ContentInfo starts with its content type
        Some(Tag::ObjectIdentifier) => {
            let (tst_info, tst_info_error) = split(parse_content_info(&items));
            Ok(SignedToken {
                format: TokenFormat::Tst,
                encoding,
                status: PkiStatus::Granted,
                status_text: None,
                token_der: Some(bytes.to_vec()),
                tst_info,
                tst_info_error,
            })
        }
        Some(other) => Err(TokenError::Der(format!(
            "neither TimeStampResp nor TimeStampToken (first element {})",
            other
        ))),
        None => Err(TokenError::Der("empty top-level sequence".to_string())),
    }
}

fn decode_response(items: &[AnyRef<'_>], encoding: TokenEncoding) -> Result<SignedToken, TokenError> {
    let status_info = elements(items[0].value())?;
    let code = status_info
        .first()
        .ok_or_else(|| TokenError::Der("PKIStatusInfo is empty".to_string()))?;
    expect_tag(code, Tag::Integer, "PKIStatus")?;
    let status = PkiStatus::from_code(parse_small_int(code.value())?);

    let status_text = status_info
        .iter()
        .skip(1)
        .find(|item| item.tag() == Tag::Sequence)
        .map(|free_text| -> Result<String, TokenError> {
            let parts = elements(free_text.value())?;
            Ok(parts
                .iter()
                .map(|p| String::from_utf8_lossy(p.value()).into_owned())
                .collect::<Vec<_>>()
                .join("; "))
        })
        .transpose()?;

    let mut token = SignedToken {
        format: TokenFormat::Tsr,
        encoding,
        status,
        status_text,
        token_der: None,
        tst_info: None,
        tst_info_error: None,
    };

    if let Some(content_info) = items.get(1) {
        expect_tag(content_info, Tag::Sequence, "TimeStampToken")?;
        let (tst_info, tst_info_error) = split(parse_content_info(&elements(content_info.value())?));
        token.token_der = Some(content_info.to_der()?);
        token.tst_info = tst_info;
        token.tst_info_error = tst_info_error;
    }
    if items.len() > 2 {
        return Err(TokenError::Der(format!(
            "TimeStampResp has {} elements",
            items.len()
        )));
    }
    Ok(token)
}

fn split(result: Result<TstInfo, TokenError>) -> (Option<TstInfo>, Option<String>) {
    match result {
        Ok(info) => (Some(info), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

/// Walk `ContentInfo -> SignedData -> EncapsulatedContentInfo -> eContent`
/// and return the DER of the enclosed TSTInfo
fn encapsulated_tst_info<'a>(content_info: &[AnyRef<'a>]) -> Result<&'a [u8], TokenError> {
    let content_type = content_info
        .first()
        .ok_or_else(|| TokenError::Der("ContentInfo is empty".to_string()))?;
    expect_tag(content_type, Tag::ObjectIdentifier, "ContentInfo.contentType")?;
    let oid = ObjectIdentifier::from_bytes(content_type.value())?;
    if oid != OID_SIGNED_DATA {
        return Err(TokenError::Der(format!("content type {} is not signedData", oid)));
    }

    let explicit = content_info
        .get(1)
        .ok_or_else(|| TokenError::Der("ContentInfo has no content".to_string()))?;
    expect_context(explicit, 0, "ContentInfo.content")?;
    let signed_data = AnyRef::from_der(explicit.value())?;
    expect_tag(&signed_data, Tag::Sequence, "SignedData")?;
    let signed_items = elements(signed_data.value())?;

    let encap = signed_items
        .get(2)
        .ok_or_else(|| TokenError::Der("SignedData has no encapContentInfo".to_string()))?;
    expect_tag(encap, Tag::Sequence, "EncapsulatedContentInfo")?;
    let encap_items = elements(encap.value())?;

    let econtent_type = encap_items
        .first()
        .ok_or_else(|| TokenError::Der("EncapsulatedContentInfo is empty".to_string()))?;
    expect_tag(econtent_type, Tag::ObjectIdentifier, "eContentType")?;
    let econtent_oid = ObjectIdentifier::from_bytes(econtent_type.value())?;
    if econtent_oid != OID_TST_INFO {
        return Err(TokenError::Der(format!("eContentType {} is not TSTInfo", econtent_oid)));
    }

    let wrapper = encap_items
        .get(1)
        .ok_or_else(|| TokenError::Der("EncapsulatedContentInfo has no eContent".to_string()))?;
    expect_context(wrapper, 0, "eContent")?;
    let octets = AnyRef::from_der(wrapper.value())?;
    expect_tag(&octets, Tag::OctetString, "eContent")?;
    Ok(octets.value())
}

fn parse_content_info(content_info: &[AnyRef<'_>]) -> Result<TstInfo, TokenError> {
    let tst_der = encapsulated_tst_info(content_info)?;
    parse_tst_info(tst_der)
}

fn parse_tst_info(tst_der: &[u8]) -> Result<TstInfo, TokenError> {
    let tst = AnyRef::from_der(tst_der)?;
    expect_tag(&tst, Tag::Sequence, "TSTInfo")?;
    let items = elements(tst.value())?;
    if items.len() < 5 {
        return Err(TokenError::Der(format!("TSTInfo has {} elements", items.len())));
    }

    expect_tag(&items[0], Tag::Integer, "TSTInfo.version")?;
    expect_tag(&items[1], Tag::ObjectIdentifier, "TSTInfo.policy")?;
    let policy = ObjectIdentifier::from_bytes(items[1].value())?.to_string();
    let message_imprint = parse_message_imprint(&items[2])?;
    expect_tag(&items[3], Tag::Integer, "TSTInfo.serialNumber")?;
    let serial_hex = hex::encode(items[3].value());
    expect_tag(&items[4], Tag::GeneralizedTime, "TSTInfo.genTime")?;
    let gen_time = parse_generalized_time(items[4].value())?;

    // accuracy and ordering may precede the nonce
    let nonce = items[5..]
        .iter()
        .find(|item| item.tag() == Tag::Integer)
        .map(|item| item.value().to_vec());

    Ok(TstInfo {
        policy,
        message_imprint,
        serial_hex,
        gen_time,
        nonce,
    })
}

fn parse_message_imprint(any: &AnyRef<'_>) -> Result<MessageImprint, TokenError> {
    expect_tag(any, Tag::Sequence, "MessageImprint")?;
    let parts = elements(any.value())?;
    if parts.len() != 2 {
        return Err(TokenError::Der(format!("MessageImprint has {} elements", parts.len())));
    }
    expect_tag(&parts[0], Tag::Sequence, "MessageImprint.hashAlgorithm")?;
    let alg = elements(parts[0].value())?;
    let oid = alg
        .first()
        .ok_or_else(|| TokenError::Der("AlgorithmIdentifier is empty".to_string()))?;
    expect_tag(oid, Tag::ObjectIdentifier, "AlgorithmIdentifier.algorithm")?;
    expect_tag(&parts[1], Tag::OctetString, "MessageImprint.hashedMessage")?;
    Ok(MessageImprint {
        hash_algorithm_oid: ObjectIdentifier::from_bytes(oid.value())?.to_string(),
        hashed_message: parts[1].value().to_vec(),
    })
}

/// Lenient search for the message imprint inside a bare token
///
/// Follows the encapsulation path, then takes the first element of TSTInfo
/// shaped like `SEQUENCE { SEQUENCE { OID, .. }, OCTET STRING }` without
/// insisting on the surrounding field layout.
pub fn locate_message_imprint(token_der: &[u8]) -> Result<MessageImprint, TokenError> {
    let root = AnyRef::from_der(token_der)?;
    expect_tag(&root, Tag::Sequence, "TimeStampToken")?;
    let tst_der = encapsulated_tst_info(&elements(root.value())?)?;
    let tst = AnyRef::from_der(tst_der)?;
    expect_tag(&tst, Tag::Sequence, "TSTInfo")?;
    elements(tst.value())?
        .iter()
        .filter(|item| item.tag() == Tag::Sequence)
        .find_map(|item| parse_message_imprint(item).ok())
        .ok_or_else(|| TokenError::Der("no MessageImprint in TSTInfo".to_string()))
}

fn elements(body: &[u8]) -> Result<Vec<AnyRef<'_>>, TokenError> {
    let mut reader = SliceReader::new(body)?;
    let mut out = Vec::new();
    while !reader.is_finished() {
        out.push(reader.decode::<AnyRef<'_>>()?);
    }
    Ok(out)
}

fn expect_tag(any: &AnyRef<'_>, tag: Tag, what: &str) -> Result<(), TokenError> {
    if any.tag() != tag {
        return Err(TokenError::Der(format!(
            "{}: expected {} but found {}",
            what,
            tag,
            any.tag()
        )));
    }
    Ok(())
}

fn expect_context(any: &AnyRef<'_>, number: u8, what: &str) -> Result<(), TokenError> {
    match any.tag() {
        Tag::ContextSpecific {
            constructed: true,
            number: n,
        } if n.value() == number => Ok(()),
        other => Err(TokenError::Der(format!(
            "{}: expected [{}] but found {}",
            what, number, other
        ))),
    }
}

fn parse_small_int(value: &[u8]) -> Result<i64, TokenError> {
    if value.is_empty() || value.len() > 8 {
        return Err(TokenError::Der(format!("integer of {} bytes", value.len())));
    }
    let negative = value[0] & 0x80 != 0;
    let mut out: i64 = if negative { -1 } else { 0 };
    for byte in value {
        out = (out << 8) | i64::from(*byte);
    }
    Ok(out)
}

/// `YYYYMMDDHHMMSS[.f+]Z`
fn parse_generalized_time(value: &[u8]) -> Result<DateTime<Utc>, TokenError> {
    let bad = || {
        TokenError::Der(format!(
            "malformed GeneralizedTime {:?}",
            String::from_utf8_lossy(value)
        ))
    };
    let body = value.strip_suffix(b"Z").ok_or_else(bad)?;
    if body.len() < 14 || !body[..14].iter().all(u8::is_ascii_digit) {
        return Err(bad());
    }
    let (whole, fraction) = body.split_at(14);
    let field = |range: std::ops::Range<usize>| {
        whole[range]
            .iter()
            .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'))
    };

    let nanos = match fraction {
        [] => 0,
        [b'.', digits @ ..]
            if !digits.is_empty() && digits.len() <= 9 && digits.iter().all(u8::is_ascii_digit) =>
        {
            let value = digits
                .iter()
                .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));
            value * 10u32.pow(9 - digits.len() as u32)
        }
        _ => return Err(bad()),
    };

    let year = i32::try_from(field(0..4)).map_err(|_| bad())?;
    NaiveDate::from_ymd_opt(year, field(4..6), field(6..8))
        .and_then(|date| date.and_hms_nano_opt(field(8..10), field(10..12), field(12..14), nanos))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(bad)
}
