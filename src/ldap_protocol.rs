// LDAP protocol operations and their BER decoding (RFC 4511)
// Every decode failure is a ProtocolError naming the step that failed.

use crate::ber::{BerReader, UNIVERSAL_BOOLEAN_TYPE, UNIVERSAL_OCTET_STRING_TYPE};
use crate::dn::Dn;
use crate::entry::ModificationType;
use crate::error::{DecodeStep, ProtocolError, ResultCode};
use crate::filter::SearchFilter;

// LDAP Control (request or response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }
}

// LDAP Message structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub protocol_op: ProtocolOp,
    pub controls: Option<Vec<Control>>,
}

impl LdapMessage {
    pub fn new(message_id: i32, protocol_op: ProtocolOp) -> Self {
        Self {
            message_id,
            protocol_op,
            controls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    UnbindRequest,
    AbandonRequest(AbandonRequest),
    DeleteRequest(DeleteRequest),
    DeleteResponse(LdapResult),
    AddRequest(AddRequest),
    AddResponse(LdapResult),
    BindRequest(BindRequest),
    BindResponse(BindResponse),
    CompareRequest(CompareRequest),
    CompareResponse(LdapResult),
    ModifyRequest(ModifyRequest),
    ModifyResponse(LdapResult),
    ModifyDNRequest(ModifyDNRequest),
    ModifyDNResponse(LdapResult),
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchResultEntry),
    SearchResultDone(LdapResult),
    SearchResultReference(SearchResultReference),
    ExtendedRequest(ExtendedRequest),
    ExtendedResponse(ExtendedResponse),
    IntermediateResponse(IntermediateResponse),
}

impl ProtocolOp {
    /// BER application tag of this operation.
    pub fn tag(&self) -> u8 {
        match self {
            ProtocolOp::UnbindRequest => OP_TYPE_UNBIND_REQUEST,
            ProtocolOp::AbandonRequest(_) => OP_TYPE_ABANDON_REQUEST,
            ProtocolOp::DeleteRequest(_) => OP_TYPE_DELETE_REQUEST,
            ProtocolOp::DeleteResponse(_) => OP_TYPE_DELETE_RESPONSE,
            ProtocolOp::AddRequest(_) => OP_TYPE_ADD_REQUEST,
            ProtocolOp::AddResponse(_) => OP_TYPE_ADD_RESPONSE,
            ProtocolOp::BindRequest(_) => OP_TYPE_BIND_REQUEST,
            ProtocolOp::BindResponse(_) => OP_TYPE_BIND_RESPONSE,
            ProtocolOp::CompareRequest(_) => OP_TYPE_COMPARE_REQUEST,
            ProtocolOp::CompareResponse(_) => OP_TYPE_COMPARE_RESPONSE,
            ProtocolOp::ModifyRequest(_) => OP_TYPE_MODIFY_REQUEST,
            ProtocolOp::ModifyResponse(_) => OP_TYPE_MODIFY_RESPONSE,
            ProtocolOp::ModifyDNRequest(_) => OP_TYPE_MODIFY_DN_REQUEST,
            ProtocolOp::ModifyDNResponse(_) => OP_TYPE_MODIFY_DN_RESPONSE,
            ProtocolOp::SearchRequest(_) => OP_TYPE_SEARCH_REQUEST,
            ProtocolOp::SearchResultEntry(_) => OP_TYPE_SEARCH_RESULT_ENTRY,
            ProtocolOp::SearchResultDone(_) => OP_TYPE_SEARCH_RESULT_DONE,
            ProtocolOp::SearchResultReference(_) => OP_TYPE_SEARCH_RESULT_REFERENCE,
            ProtocolOp::ExtendedRequest(_) => OP_TYPE_EXTENDED_REQUEST,
            ProtocolOp::ExtendedResponse(_) => OP_TYPE_EXTENDED_RESPONSE,
            ProtocolOp::IntermediateResponse(_) => OP_TYPE_INTERMEDIATE_RESPONSE,
        }
    }

    /// Short operation name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::UnbindRequest => "unbind",
            ProtocolOp::AbandonRequest(_) => "abandon",
            ProtocolOp::DeleteRequest(_) => "delete",
            ProtocolOp::DeleteResponse(_) => "delete_response",
            ProtocolOp::AddRequest(_) => "add",
            ProtocolOp::AddResponse(_) => "add_response",
            ProtocolOp::BindRequest(_) => "bind",
            ProtocolOp::BindResponse(_) => "bind_response",
            ProtocolOp::CompareRequest(_) => "compare",
            ProtocolOp::CompareResponse(_) => "compare_response",
            ProtocolOp::ModifyRequest(_) => "modify",
            ProtocolOp::ModifyResponse(_) => "modify_response",
            ProtocolOp::ModifyDNRequest(_) => "modify_dn",
            ProtocolOp::ModifyDNResponse(_) => "modify_dn_response",
            ProtocolOp::SearchRequest(_) => "search",
            ProtocolOp::SearchResultEntry(_) => "search_entry",
            ProtocolOp::SearchResultDone(_) => "search_done",
            ProtocolOp::SearchResultReference(_) => "search_reference",
            ProtocolOp::ExtendedRequest(_) => "extended",
            ProtocolOp::ExtendedResponse(_) => "extended_response",
            ProtocolOp::IntermediateResponse(_) => "intermediate_response",
        }
    }
}

/// The common result fields of every response operation.
///
/// An empty matchedDN or diagnosticMessage on the wire decodes to `None`.
/// Referrals are `None` when the element is absent and `Some` (possibly
/// empty) when it is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub result_code: ResultCode,
    pub matched_dn: Option<Dn>,
    pub diagnostic_message: Option<String>,
    pub referral_urls: Option<Vec<String>>,
}

impl LdapResult {
    pub fn new(result_code: ResultCode) -> Self {
        Self {
            result_code,
            matched_dn: None,
            diagnostic_message: None,
            referral_urls: None,
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS)
    }

    pub fn with_message(result_code: ResultCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            result_code,
            matched_dn: None,
            diagnostic_message: (!message.is_empty()).then_some(message),
            referral_urls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonRequest {
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub dn: String,
}

/// Attribute as carried on the wire; values are not deduplicated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub attr_type: String,
    pub values: Vec<Vec<u8>>,
}

impl PartialAttribute {
    pub fn new(attr_type: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            attr_type: attr_type.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<PartialAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i32,
    pub dn: String,
    pub authentication: BindAuthentication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    Simple(Vec<u8>),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindResponse {
    pub result: LdapResult,
    pub server_sasl_credentials: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute_type: String,
    pub assertion_value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<ModifyChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyChange {
    pub operation: ModificationType,
    pub modification: PartialAttribute,
}

/// ModifyDNRequest ::= [APPLICATION 12] SEQUENCE { entry, newrdn, deleteoldrdn, newSuperior [0] OPTIONAL }
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDNRequest {
    pub entry_dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub deref_policy: DerefPolicy,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    pub filter: SearchFilter,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
    Subordinates = 3,
}

impl TryFrom<i64> for SearchScope {
    type Error = ProtocolError;
    fn try_from(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(SearchScope::BaseObject),
            1 => Ok(SearchScope::SingleLevel),
            2 => Ok(SearchScope::WholeSubtree),
            3 => Ok(SearchScope::Subordinates),
            _ => Err(ProtocolError::new(format!("invalid search scope {}", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefPolicy {
    Never = 0,
    InSearching = 1,
    FindingBase = 2,
    Always = 3,
}

impl TryFrom<i64> for DerefPolicy {
    type Error = ProtocolError;
    fn try_from(value: i64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(DerefPolicy::Never),
            1 => Ok(DerefPolicy::InSearching),
            2 => Ok(DerefPolicy::FindingBase),
            3 => Ok(DerefPolicy::Always),
            _ => Err(ProtocolError::new(format!("invalid alias dereferencing policy {}", value))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<PartialAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultReference {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    pub oid: Option<String>,
    pub value: Option<Vec<u8>>,
}

// Protocol op application tags
pub const OP_TYPE_UNBIND_REQUEST: u8 = 0x42;
pub const OP_TYPE_DELETE_REQUEST: u8 = 0x4A;
pub const OP_TYPE_ABANDON_REQUEST: u8 = 0x50;
pub const OP_TYPE_BIND_REQUEST: u8 = 0x60;
pub const OP_TYPE_BIND_RESPONSE: u8 = 0x61;
pub const OP_TYPE_SEARCH_REQUEST: u8 = 0x63;
pub const OP_TYPE_SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const OP_TYPE_SEARCH_RESULT_DONE: u8 = 0x65;
pub const OP_TYPE_MODIFY_REQUEST: u8 = 0x66;
pub const OP_TYPE_MODIFY_RESPONSE: u8 = 0x67;
pub const OP_TYPE_ADD_REQUEST: u8 = 0x68;
pub const OP_TYPE_ADD_RESPONSE: u8 = 0x69;
pub const OP_TYPE_DELETE_RESPONSE: u8 = 0x6B;
pub const OP_TYPE_MODIFY_DN_REQUEST: u8 = 0x6C;
pub const OP_TYPE_MODIFY_DN_RESPONSE: u8 = 0x6D;
pub const OP_TYPE_COMPARE_REQUEST: u8 = 0x6E;
pub const OP_TYPE_COMPARE_RESPONSE: u8 = 0x6F;
pub const OP_TYPE_SEARCH_RESULT_REFERENCE: u8 = 0x73;
pub const OP_TYPE_EXTENDED_REQUEST: u8 = 0x77;
pub const OP_TYPE_EXTENDED_RESPONSE: u8 = 0x78;
pub const OP_TYPE_INTERMEDIATE_RESPONSE: u8 = 0x79;

/// Context [0] SEQUENCE OF Control
pub const TYPE_CONTROL_SEQUENCE: u8 = 0xA0;
/// Context [3] referral URLs in an LDAPResult
pub const TYPE_REFERRAL_SEQUENCE: u8 = 0xA3;
pub const TYPE_AUTHENTICATION_SIMPLE: u8 = 0x80;
pub const TYPE_AUTHENTICATION_SASL: u8 = 0xA3;
pub const TYPE_SERVER_SASL_CREDENTIALS: u8 = 0x87;
pub const TYPE_EXTENDED_REQUEST_OID: u8 = 0x80;
pub const TYPE_EXTENDED_REQUEST_VALUE: u8 = 0x81;
pub const TYPE_EXTENDED_RESPONSE_OID: u8 = 0x8A;
pub const TYPE_EXTENDED_RESPONSE_VALUE: u8 = 0x8B;
pub const TYPE_INTERMEDIATE_RESPONSE_OID: u8 = 0x80;
pub const TYPE_INTERMEDIATE_RESPONSE_VALUE: u8 = 0x81;
pub const TYPE_MODIFY_DN_NEW_SUPERIOR: u8 = 0x80;

/// Parse only the LDAP message header (SEQUENCE, messageID, protocolOp tag).
/// Returns (message_id, request_tag) for building error responses when full parse fails.
pub fn parse_message_header(data: &[u8]) -> Result<(i32, u8), ProtocolError> {
    let mut reader = BerReader::new(data);
    reader
        .read_start_sequence()
        .step("could not decode LDAP message sequence")?;
    let message_id = reader.read_integer().step("could not decode message ID")? as i32;
    let tag = reader
        .peek_type()
        .step("could not decode protocol op type")?;
    Ok((message_id, tag))
}

/// Decode one complete LDAP message held in `data`.
pub fn parse_ldap_message(data: &[u8]) -> Result<LdapMessage, ProtocolError> {
    let mut reader = BerReader::new(data);
    decode_message(&mut reader)
}

/// LDAPMessage ::= SEQUENCE { messageID, protocolOp, controls [0] OPTIONAL }
pub fn decode_message(reader: &mut BerReader) -> Result<LdapMessage, ProtocolError> {
    reader
        .read_start_sequence()
        .step("could not decode LDAP message sequence")?;
    let message_id = reader.read_integer().step("could not decode message ID")? as i32;
    let protocol_op =
        decode_protocol_op(reader).map_err(|e| e.within("could not decode protocol op"))?;
    let controls = if reader.has_next_element() {
        Some(decode_controls(reader).map_err(|e| e.within("could not decode controls"))?)
    } else {
        None
    };
    reader
        .read_end_sequence()
        .step("could not decode end of LDAP message sequence")?;
    Ok(LdapMessage {
        message_id,
        protocol_op,
        controls,
    })
}

fn reserved_op_type(tag: u8) -> ProtocolError {
    ProtocolError::new(format!("invalid protocol op type 0x{:02X}: reserved tag", tag))
}

/// Peek the operation tag and dispatch to the matching decoder.
pub fn decode_protocol_op(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let tag = reader
        .peek_type()
        .step("could not decode protocol op type")?;
    match tag {
        OP_TYPE_UNBIND_REQUEST => decode_unbind_request(reader),
        0x43..=0x49 => Err(reserved_op_type(tag)),
        OP_TYPE_DELETE_REQUEST => decode_delete_request(reader),
        0x4B..=0x4F => Err(reserved_op_type(tag)),
        OP_TYPE_ABANDON_REQUEST => decode_abandon_request(reader),
        0x51..=0x5F => Err(reserved_op_type(tag)),
        OP_TYPE_BIND_REQUEST => decode_bind_request(reader),
        OP_TYPE_BIND_RESPONSE => decode_bind_response(reader),
        0x62 => Err(reserved_op_type(tag)),
        OP_TYPE_SEARCH_REQUEST => decode_search_request(reader),
        OP_TYPE_SEARCH_RESULT_ENTRY => decode_search_result_entry(reader),
        OP_TYPE_SEARCH_RESULT_DONE => {
            decode_result_op(reader, "search result done").map(ProtocolOp::SearchResultDone)
        }
        OP_TYPE_MODIFY_REQUEST => decode_modify_request(reader),
        OP_TYPE_MODIFY_RESPONSE => {
            decode_result_op(reader, "modify response").map(ProtocolOp::ModifyResponse)
        }
        OP_TYPE_ADD_REQUEST => decode_add_request(reader),
        OP_TYPE_ADD_RESPONSE => decode_result_op(reader, "add response").map(ProtocolOp::AddResponse),
        0x6A => Err(reserved_op_type(tag)),
        OP_TYPE_DELETE_RESPONSE => {
            decode_result_op(reader, "delete response").map(ProtocolOp::DeleteResponse)
        }
        OP_TYPE_MODIFY_DN_REQUEST => decode_modify_dn_request(reader),
        OP_TYPE_MODIFY_DN_RESPONSE => {
            decode_result_op(reader, "modify DN response").map(ProtocolOp::ModifyDNResponse)
        }
        OP_TYPE_COMPARE_REQUEST => decode_compare_request(reader),
        OP_TYPE_COMPARE_RESPONSE => {
            decode_result_op(reader, "compare response").map(ProtocolOp::CompareResponse)
        }
        0x70..=0x72 => Err(reserved_op_type(tag)),
        OP_TYPE_SEARCH_RESULT_REFERENCE => decode_search_result_reference(reader),
        0x74..=0x76 => Err(reserved_op_type(tag)),
        OP_TYPE_EXTENDED_REQUEST => decode_extended_request(reader),
        OP_TYPE_EXTENDED_RESPONSE => decode_extended_response(reader),
        OP_TYPE_INTERMEDIATE_RESPONSE => decode_intermediate_response(reader),
        other => Err(ProtocolError::new(format!(
            "unknown protocol op type 0x{:02X}",
            other
        ))),
    }
}

/// Read the next element with `read` only when one is left in the current
/// sequence and its tag is `expected`.
fn read_if_tag<'a, T>(
    reader: &mut BerReader<'a>,
    expected: u8,
    read: impl FnOnce(&mut BerReader<'a>) -> Result<T, ProtocolError>,
) -> Result<Option<T>, ProtocolError> {
    if reader.has_next_element() && reader.peek_type().ok() == Some(expected) {
        read(reader).map(Some)
    } else {
        Ok(None)
    }
}

/// Controls ::= SEQUENCE OF Control
pub fn decode_controls(reader: &mut BerReader) -> Result<Vec<Control>, ProtocolError> {
    reader
        .read_start_sequence()
        .step("could not decode controls sequence")?;
    let mut controls = Vec::new();
    while reader.has_next_element() {
        controls.push(decode_control(reader)?);
    }
    reader
        .read_end_sequence()
        .step("could not decode end of controls sequence")?;
    Ok(controls)
}

/// Control ::= SEQUENCE { controlType, criticality BOOLEAN DEFAULT FALSE, controlValue OCTET STRING OPTIONAL }
pub fn decode_control(reader: &mut BerReader) -> Result<Control, ProtocolError> {
    reader
        .read_start_sequence()
        .step("could not decode control sequence")?;
    let oid = reader
        .read_octet_string_as_string()
        .step("could not decode control OID")?;
    let critical = read_if_tag(reader, UNIVERSAL_BOOLEAN_TYPE, |r| {
        r.read_boolean().step("could not decode control criticality")
    })?
    .unwrap_or(false);
    let value = read_if_tag(reader, UNIVERSAL_OCTET_STRING_TYPE, |r| {
        r.read_octet_string().step("could not decode control value")
    })?;
    reader
        .read_end_sequence()
        .step("could not decode end of control sequence")?;
    Ok(Control {
        oid,
        critical,
        value,
    })
}

fn decode_unbind_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    reader.read_null().step("could not decode unbind request")?;
    Ok(ProtocolOp::UnbindRequest)
}

fn decode_abandon_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let message_id = reader
        .read_integer()
        .step("could not decode abandon request")?;
    Ok(ProtocolOp::AbandonRequest(AbandonRequest {
        message_id: message_id as i32,
    }))
}

fn decode_delete_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode delete request")?;
    Ok(ProtocolOp::DeleteRequest(DeleteRequest { dn }))
}

/// PartialAttribute ::= SEQUENCE { type, vals SET OF value }
fn decode_partial_attribute(reader: &mut BerReader, step: &str) -> Result<PartialAttribute, ProtocolError> {
    reader.read_start_sequence().step(step)?;
    let attr_type = reader.read_octet_string_as_string().step(step)?;
    reader.read_start_sequence().step(step)?;
    let mut values = Vec::new();
    while reader.has_next_element() {
        values.push(reader.read_octet_string().step(step)?);
    }
    reader.read_end_sequence().step(step)?;
    reader.read_end_sequence().step(step)?;
    Ok(PartialAttribute { attr_type, values })
}

fn decode_add_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode add request";
    reader.read_start_sequence().step(step)?;
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode add request entry DN")?;
    reader.read_start_sequence().step(step)?;
    let mut attributes = Vec::new();
    while reader.has_next_element() {
        attributes.push(decode_partial_attribute(reader, "could not decode add request attribute")?);
    }
    reader.read_end_sequence().step(step)?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::AddRequest(AddRequest { dn, attributes }))
}

fn decode_bind_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode bind request";
    reader.read_start_sequence().step(step)?;
    let version = reader
        .read_integer()
        .step("could not decode bind request version")? as i32;
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode bind request DN")?;
    let auth_type = reader
        .peek_type()
        .step("could not decode bind request authentication type")?;
    let authentication = match auth_type {
        TYPE_AUTHENTICATION_SIMPLE => BindAuthentication::Simple(
            reader
                .read_octet_string()
                .step("could not decode simple bind password")?,
        ),
        TYPE_AUTHENTICATION_SASL => {
            let sasl_step = "could not decode SASL credentials";
            reader.read_start_sequence().step(sasl_step)?;
            let mechanism = reader.read_octet_string_as_string().step(sasl_step)?;
            let credentials = if reader.has_next_element() {
                Some(reader.read_octet_string().step(sasl_step)?)
            } else {
                None
            };
            reader.read_end_sequence().step(sasl_step)?;
            BindAuthentication::Sasl {
                mechanism,
                credentials,
            }
        }
        other => {
            return Err(ProtocolError::with_code(
                ResultCode::AUTH_METHOD_NOT_SUPPORTED,
                format!("invalid bind authentication type 0x{:02X}", other),
            ))
        }
    };
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::BindRequest(BindRequest {
        version,
        dn,
        authentication,
    }))
}

/// resultCode, matchedDN, diagnosticMessage
fn decode_result_fields(reader: &mut BerReader, step: &str) -> Result<LdapResult, ProtocolError> {
    let result_code = reader
        .read_enumerated()
        .step(&format!("{}: could not decode result code", step))?;
    let matched_dn_str = reader
        .read_octet_string_as_string()
        .step(&format!("{}: could not decode matched DN", step))?;
    let matched_dn = if matched_dn_str.is_empty() {
        None
    } else {
        Some(
            Dn::parse(&matched_dn_str)
                .step(&format!("{}: could not decode matched DN", step))?,
        )
    };
    let diagnostic = reader
        .read_octet_string_as_string()
        .step(&format!("{}: could not decode diagnostic message", step))?;
    Ok(LdapResult {
        result_code: ResultCode(result_code as i32),
        matched_dn,
        diagnostic_message: (!diagnostic.is_empty()).then_some(diagnostic),
        referral_urls: None,
    })
}

fn decode_referrals(reader: &mut BerReader, step: &str) -> Result<Vec<String>, ProtocolError> {
    let step = format!("{}: could not decode referrals", step);
    reader.read_start_sequence().step(&step)?;
    let mut urls = Vec::new();
    while reader.has_next_element() {
        urls.push(reader.read_octet_string_as_string().step(&step)?);
    }
    reader.read_end_sequence().step(&step)?;
    Ok(urls)
}

/// Shared decoder for the responses that only carry an LDAPResult.
fn decode_result_op(reader: &mut BerReader, op_name: &str) -> Result<LdapResult, ProtocolError> {
    let step = format!("could not decode {}", op_name);
    reader.read_start_sequence().step(&step)?;
    let mut result = decode_result_fields(reader, &step)?;
    if reader.has_next_element() {
        result.referral_urls = Some(decode_referrals(reader, &step)?);
    }
    reader.read_end_sequence().step(&step)?;
    Ok(result)
}

fn decode_bind_response(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode bind response";
    reader.read_start_sequence().step(step)?;
    let mut result = decode_result_fields(reader, step)?;
    result.referral_urls = read_if_tag(reader, TYPE_REFERRAL_SEQUENCE, |r| decode_referrals(r, step))?;
    let server_sasl_credentials = read_if_tag(reader, TYPE_SERVER_SASL_CREDENTIALS, |r| {
        r.read_octet_string()
            .step("could not decode server SASL credentials")
    })?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::BindResponse(BindResponse {
        result,
        server_sasl_credentials,
    }))
}

fn decode_compare_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode compare request";
    reader.read_start_sequence().step(step)?;
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode compare request DN")?;
    let ava_step = "could not decode compare request assertion";
    reader.read_start_sequence().step(ava_step)?;
    let attribute_type = reader.read_octet_string_as_string().step(ava_step)?;
    let assertion_value = reader.read_octet_string().step(ava_step)?;
    reader.read_end_sequence().step(ava_step)?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::CompareRequest(CompareRequest {
        dn,
        attribute_type,
        assertion_value,
    }))
}

fn decode_modify_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode modify request";
    reader.read_start_sequence().step(step)?;
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode modify request DN")?;
    reader.read_start_sequence().step(step)?;
    let mut changes = Vec::new();
    while reader.has_next_element() {
        let change_step = "could not decode modification";
        reader.read_start_sequence().step(change_step)?;
        let op = reader.read_enumerated().step(change_step)?;
        let operation = ModificationType::try_from(op)
            .map_err(|v| ProtocolError::new(format!("invalid modification type {}", v)))?;
        let modification = decode_partial_attribute(reader, change_step)?;
        reader.read_end_sequence().step(change_step)?;
        changes.push(ModifyChange {
            operation,
            modification,
        });
    }
    reader.read_end_sequence().step(step)?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::ModifyRequest(ModifyRequest { dn, changes }))
}

fn decode_modify_dn_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode modify DN request";
    reader.read_start_sequence().step(step)?;
    let entry_dn = reader
        .read_octet_string_as_string()
        .step("could not decode modify DN request entry DN")?;
    let new_rdn = reader
        .read_octet_string_as_string()
        .step("could not decode modify DN request new RDN")?;
    let delete_old_rdn = reader
        .read_boolean()
        .step("could not decode modify DN request delete old RDN flag")?;
    let new_superior = read_if_tag(reader, TYPE_MODIFY_DN_NEW_SUPERIOR, |r| {
        r.read_octet_string_as_string()
            .step("could not decode modify DN request new superior")
    })?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::ModifyDNRequest(ModifyDNRequest {
        entry_dn,
        new_rdn,
        delete_old_rdn,
        new_superior,
    }))
}

fn decode_search_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode search request";
    reader.read_start_sequence().step(step)?;
    let base_dn = reader
        .read_octet_string_as_string()
        .step("could not decode search request base DN")?;
    let scope = SearchScope::try_from(
        reader
            .read_enumerated()
            .step("could not decode search request scope")?,
    )?;
    let deref_policy = DerefPolicy::try_from(
        reader
            .read_enumerated()
            .step("could not decode search request alias dereferencing policy")?,
    )?;
    let size_limit = reader
        .read_integer()
        .step("could not decode search request size limit")? as i32;
    let time_limit = reader
        .read_integer()
        .step("could not decode search request time limit")? as i32;
    let types_only = reader
        .read_boolean()
        .step("could not decode search request types only flag")?;
    let filter = SearchFilter::decode(reader).map_err(|e| e.within("could not decode search request filter"))?;
    let attrs_step = "could not decode search request attributes";
    reader.read_start_sequence().step(attrs_step)?;
    let mut attributes = Vec::new();
    while reader.has_next_element() {
        attributes.push(reader.read_octet_string_as_string().step(attrs_step)?);
    }
    reader.read_end_sequence().step(attrs_step)?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::SearchRequest(SearchRequest {
        base_dn,
        scope,
        deref_policy,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    }))
}

fn decode_search_result_entry(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode search result entry";
    reader.read_start_sequence().step(step)?;
    let dn = reader
        .read_octet_string_as_string()
        .step("could not decode search result entry DN")?;
    reader.read_start_sequence().step(step)?;
    let mut attributes = Vec::new();
    while reader.has_next_element() {
        attributes.push(decode_partial_attribute(reader, "could not decode search result entry attribute")?);
    }
    reader.read_end_sequence().step(step)?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::SearchResultEntry(SearchResultEntry { dn, attributes }))
}

/// SearchResultReference ::= [APPLICATION 19] SEQUENCE SIZE (1..MAX) OF uri URI
fn decode_search_result_reference(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode search result reference";
    reader.read_start_sequence().step(step)?;
    let mut urls = Vec::new();
    loop {
        urls.push(reader.read_octet_string_as_string().step(step)?);
        if !reader.has_next_element() {
            break;
        }
    }
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::SearchResultReference(SearchResultReference { urls }))
}

fn decode_extended_request(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode extended request";
    reader.read_start_sequence().step(step)?;
    let oid = reader
        .read_octet_string_as_string()
        .step("could not decode extended request OID")?;
    let value = read_if_tag(reader, TYPE_EXTENDED_REQUEST_VALUE, |r| {
        r.read_octet_string()
            .step("could not decode extended request value")
    })?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::ExtendedRequest(ExtendedRequest { oid, value }))
}

fn decode_extended_response(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode extended response";
    reader.read_start_sequence().step(step)?;
    let mut result = decode_result_fields(reader, step)?;
    result.referral_urls = read_if_tag(reader, TYPE_REFERRAL_SEQUENCE, |r| decode_referrals(r, step))?;
    let oid = read_if_tag(reader, TYPE_EXTENDED_RESPONSE_OID, |r| {
        r.read_octet_string_as_string()
            .step("could not decode extended response OID")
    })?;
    let value = read_if_tag(reader, TYPE_EXTENDED_RESPONSE_VALUE, |r| {
        r.read_octet_string()
            .step("could not decode extended response value")
    })?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::ExtendedResponse(ExtendedResponse { result, oid, value }))
}

fn decode_intermediate_response(reader: &mut BerReader) -> Result<ProtocolOp, ProtocolError> {
    let step = "could not decode intermediate response";
    reader.read_start_sequence().step(step)?;
    let oid = read_if_tag(reader, TYPE_INTERMEDIATE_RESPONSE_OID, |r| {
        r.read_octet_string_as_string()
            .step("could not decode intermediate response OID")
    })?;
    let value = read_if_tag(reader, TYPE_INTERMEDIATE_RESPONSE_VALUE, |r| {
        r.read_octet_string()
            .step("could not decode intermediate response value")
    })?;
    reader.read_end_sequence().step(step)?;
    Ok(ProtocolOp::IntermediateResponse(IntermediateResponse { oid, value }))
}
