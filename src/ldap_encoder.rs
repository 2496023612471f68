// BER encoding of LDAP messages, protocol ops and controls

use crate::ber::{
    BerWriter, UNIVERSAL_BOOLEAN_TYPE, UNIVERSAL_INTEGER_TYPE, UNIVERSAL_OCTET_STRING_TYPE,
    UNIVERSAL_SEQUENCE_TYPE, UNIVERSAL_SET_TYPE,
};
use crate::error::{DecodeStep, ProtocolError, ResultCode};
use crate::ldap_protocol::*;

/// OID of the unsolicited Notice of Disconnection (RFC 4511 section 4.4.1).
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

pub fn encode_message(message: &LdapMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = BerWriter::new();
    writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
    writer.write_integer(UNIVERSAL_INTEGER_TYPE, message.message_id as i64);
    encode_protocol_op(&mut writer, &message.protocol_op)?;
    if let Some(controls) = &message.controls {
        writer.start_sequence(TYPE_CONTROL_SEQUENCE);
        for control in controls {
            encode_control(&mut writer, control)?;
        }
        close(&mut writer)?;
    }
    close(&mut writer)?;
    Ok(writer.into_vec())
}

fn close(writer: &mut BerWriter) -> Result<(), ProtocolError> {
    writer.end_sequence().step("could not encode sequence")
}

/// Control ::= SEQUENCE { controlType, criticality DEFAULT FALSE, controlValue OPTIONAL }
pub fn encode_control(writer: &mut BerWriter, control: &Control) -> Result<(), ProtocolError> {
    writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
    writer.write_string(&control.oid);
    if control.critical {
        writer.write_boolean(UNIVERSAL_BOOLEAN_TYPE, true);
    }
    if let Some(value) = &control.value {
        writer.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, value);
    }
    close(writer)
}

pub fn encode_protocol_op(writer: &mut BerWriter, op: &ProtocolOp) -> Result<(), ProtocolError> {
    match op {
        ProtocolOp::UnbindRequest => {
            writer.write_null(OP_TYPE_UNBIND_REQUEST);
            Ok(())
        }
        ProtocolOp::AbandonRequest(req) => {
            writer.write_integer(OP_TYPE_ABANDON_REQUEST, req.message_id as i64);
            Ok(())
        }
        ProtocolOp::DeleteRequest(req) => {
            writer.write_octet_string(OP_TYPE_DELETE_REQUEST, req.dn.as_bytes());
            Ok(())
        }
        ProtocolOp::AddRequest(req) => {
            writer.start_sequence(OP_TYPE_ADD_REQUEST);
            writer.write_string(&req.dn);
            encode_attribute_list(writer, &req.attributes)?;
            close(writer)
        }
        ProtocolOp::BindRequest(req) => {
            writer.start_sequence(OP_TYPE_BIND_REQUEST);
            writer.write_integer(UNIVERSAL_INTEGER_TYPE, req.version as i64);
            writer.write_string(&req.dn);
            match &req.authentication {
                BindAuthentication::Simple(password) => {
                    writer.write_octet_string(TYPE_AUTHENTICATION_SIMPLE, password);
                }
                BindAuthentication::Sasl {
                    mechanism,
                    credentials,
                } => {
                    writer.start_sequence(TYPE_AUTHENTICATION_SASL);
                    writer.write_string(mechanism);
                    if let Some(credentials) = credentials {
                        writer.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, credentials);
                    }
                    close(writer)?;
                }
            }
            close(writer)
        }
        ProtocolOp::BindResponse(resp) => {
            writer.start_sequence(OP_TYPE_BIND_RESPONSE);
            encode_result_fields(writer, &resp.result)?;
            if let Some(credentials) = &resp.server_sasl_credentials {
                writer.write_octet_string(TYPE_SERVER_SASL_CREDENTIALS, credentials);
            }
            close(writer)
        }
        ProtocolOp::CompareRequest(req) => {
            writer.start_sequence(OP_TYPE_COMPARE_REQUEST);
            writer.write_string(&req.dn);
            writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
            writer.write_string(&req.attribute_type);
            writer.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, &req.assertion_value);
            close(writer)?;
            close(writer)
        }
        ProtocolOp::ModifyRequest(req) => {
            writer.start_sequence(OP_TYPE_MODIFY_REQUEST);
            writer.write_string(&req.dn);
            writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
            for change in &req.changes {
                writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
                writer.write_enumerated(change.operation as i64);
                encode_partial_attribute(writer, &change.modification)?;
                close(writer)?;
            }
            close(writer)?;
            close(writer)
        }
        ProtocolOp::ModifyDNRequest(req) => {
            writer.start_sequence(OP_TYPE_MODIFY_DN_REQUEST);
            writer.write_string(&req.entry_dn);
            writer.write_string(&req.new_rdn);
            writer.write_boolean(UNIVERSAL_BOOLEAN_TYPE, req.delete_old_rdn);
            if let Some(new_superior) = &req.new_superior {
                writer.write_octet_string(TYPE_MODIFY_DN_NEW_SUPERIOR, new_superior.as_bytes());
            }
            close(writer)
        }
        ProtocolOp::SearchRequest(req) => {
            writer.start_sequence(OP_TYPE_SEARCH_REQUEST);
            writer.write_string(&req.base_dn);
            writer.write_enumerated(req.scope as i64);
            writer.write_enumerated(req.deref_policy as i64);
            writer.write_integer(UNIVERSAL_INTEGER_TYPE, req.size_limit as i64);
            writer.write_integer(UNIVERSAL_INTEGER_TYPE, req.time_limit as i64);
            writer.write_boolean(UNIVERSAL_BOOLEAN_TYPE, req.types_only);
            req.filter.encode(writer)?;
            writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
            for attr in &req.attributes {
                writer.write_string(attr);
            }
            close(writer)?;
            close(writer)
        }
        ProtocolOp::SearchResultEntry(entry) => {
            writer.start_sequence(OP_TYPE_SEARCH_RESULT_ENTRY);
            writer.write_string(&entry.dn);
            encode_attribute_list(writer, &entry.attributes)?;
            close(writer)
        }
        ProtocolOp::SearchResultReference(reference) => {
            writer.start_sequence(OP_TYPE_SEARCH_RESULT_REFERENCE);
            for url in &reference.urls {
                writer.write_string(url);
            }
            close(writer)
        }
        ProtocolOp::ExtendedRequest(req) => {
            writer.start_sequence(OP_TYPE_EXTENDED_REQUEST);
            writer.write_octet_string(TYPE_EXTENDED_REQUEST_OID, req.oid.as_bytes());
            if let Some(value) = &req.value {
                writer.write_octet_string(TYPE_EXTENDED_REQUEST_VALUE, value);
            }
            close(writer)
        }
        ProtocolOp::ExtendedResponse(resp) => {
            writer.start_sequence(OP_TYPE_EXTENDED_RESPONSE);
            encode_result_fields(writer, &resp.result)?;
            if let Some(oid) = &resp.oid {
                writer.write_octet_string(TYPE_EXTENDED_RESPONSE_OID, oid.as_bytes());
            }
            if let Some(value) = &resp.value {
                writer.write_octet_string(TYPE_EXTENDED_RESPONSE_VALUE, value);
            }
            close(writer)
        }
        ProtocolOp::IntermediateResponse(resp) => {
            writer.start_sequence(OP_TYPE_INTERMEDIATE_RESPONSE);
            if let Some(oid) = &resp.oid {
                writer.write_octet_string(TYPE_INTERMEDIATE_RESPONSE_OID, oid.as_bytes());
            }
            if let Some(value) = &resp.value {
                writer.write_octet_string(TYPE_INTERMEDIATE_RESPONSE_VALUE, value);
            }
            close(writer)
        }
        ProtocolOp::AddResponse(result)
        | ProtocolOp::DeleteResponse(result)
        | ProtocolOp::ModifyResponse(result)
        | ProtocolOp::ModifyDNResponse(result)
        | ProtocolOp::CompareResponse(result)
        | ProtocolOp::SearchResultDone(result) => {
            writer.start_sequence(op.tag());
            encode_result_fields(writer, result)?;
            close(writer)
        }
    }
}

/// resultCode, matchedDN, diagnosticMessage and the optional referrals.
/// Absent strings are written as empty octet strings.
fn encode_result_fields(writer: &mut BerWriter, result: &LdapResult) -> Result<(), ProtocolError> {
    writer.write_enumerated(result.result_code.value() as i64);
    let matched_dn = result
        .matched_dn
        .as_ref()
        .map(|dn| dn.to_string())
        .unwrap_or_default();
    writer.write_string(&matched_dn);
    writer.write_string(result.diagnostic_message.as_deref().unwrap_or(""));
    if let Some(urls) = &result.referral_urls {
        writer.start_sequence(TYPE_REFERRAL_SEQUENCE);
        for url in urls {
            writer.write_string(url);
        }
        close(writer)?;
    }
    Ok(())
}

fn encode_partial_attribute(writer: &mut BerWriter, attr: &PartialAttribute) -> Result<(), ProtocolError> {
    writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
    writer.write_string(&attr.attr_type);
    writer.start_sequence(UNIVERSAL_SET_TYPE);
    for value in &attr.values {
        writer.write_octet_string(UNIVERSAL_OCTET_STRING_TYPE, value);
    }
    close(writer)?;
    close(writer)
}

fn encode_attribute_list(writer: &mut BerWriter, attrs: &[PartialAttribute]) -> Result<(), ProtocolError> {
    writer.start_sequence(UNIVERSAL_SEQUENCE_TYPE);
    for attr in attrs {
        encode_partial_attribute(writer, attr)?;
    }
    close(writer)
}

/// Build the LDAPResult-only response of type `response_tag`.
pub fn result_response(response_tag: u8, result: LdapResult) -> Option<ProtocolOp> {
    Some(match response_tag {
        OP_TYPE_BIND_RESPONSE => ProtocolOp::BindResponse(BindResponse {
            result,
            server_sasl_credentials: None,
        }),
        OP_TYPE_SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(result),
        OP_TYPE_MODIFY_RESPONSE => ProtocolOp::ModifyResponse(result),
        OP_TYPE_ADD_RESPONSE => ProtocolOp::AddResponse(result),
        OP_TYPE_DELETE_RESPONSE => ProtocolOp::DeleteResponse(result),
        OP_TYPE_MODIFY_DN_RESPONSE => ProtocolOp::ModifyDNResponse(result),
        OP_TYPE_COMPARE_RESPONSE => ProtocolOp::CompareResponse(result),
        OP_TYPE_EXTENDED_RESPONSE => ProtocolOp::ExtendedResponse(ExtendedResponse {
            result,
            oid: None,
            value: None,
        }),
        _ => return None,
    })
}

/// Encode an error response of the given type (e.g. protocolError for a
/// request that could not be decoded).
pub fn encode_error_response(
    message_id: i32,
    response_tag: u8,
    result_code: ResultCode,
    diagnostic_message: &str,
) -> Result<Vec<u8>, ProtocolError> {
    let result = LdapResult::with_message(result_code, diagnostic_message);
    let op = result_response(response_tag, result).ok_or_else(|| {
        ProtocolError::new(format!("0x{:02X} is not a response type", response_tag))
    })?;
    encode_message(&LdapMessage::new(message_id, op))
}

/// Unsolicited Notice of Disconnection (message ID 0).
pub fn notice_of_disconnection(result_code: ResultCode, diagnostic_message: &str) -> LdapMessage {
    LdapMessage::new(
        0,
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result: LdapResult::with_message(result_code, diagnostic_message),
            oid: Some(NOTICE_OF_DISCONNECTION_OID.to_string()),
            value: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::entry::ModificationType;
    use crate::filter::SearchFilter;

    fn assert_round_trip(message: LdapMessage) {
        let bytes = encode_message(&message).unwrap();
        let decoded = parse_ldap_message(&bytes)
            .unwrap_or_else(|e| panic!("{}: {}", message.protocol_op.name(), e));
        assert_eq!(decoded, message);
    }

    fn sample_ops() -> Vec<ProtocolOp> {
        let referral_result = LdapResult {
            result_code: ResultCode(10),
            matched_dn: Some(Dn::parse("ou=People,dc=example,dc=com").unwrap()),
            diagnostic_message: Some("see other server".into()),
            referral_urls: Some(vec!["ldap://other:389/dc=example,dc=com".into()]),
        };
        vec![
            ProtocolOp::UnbindRequest,
            ProtocolOp::AbandonRequest(AbandonRequest { message_id: 7 }),
            ProtocolOp::DeleteRequest(DeleteRequest { dn: "cn=x,dc=example".into() }),
            ProtocolOp::DeleteResponse(LdapResult::success()),
            ProtocolOp::AddRequest(AddRequest {
                dn: String::new(),
                attributes: vec![PartialAttribute::new("objectClass", vec![b"top".to_vec()])],
            }),
            ProtocolOp::AddResponse(referral_result.clone()),
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                dn: "cn=admin".into(),
                authentication: BindAuthentication::Simple(b"secret".to_vec()),
            }),
            ProtocolOp::BindRequest(BindRequest {
                version: 3,
                dn: String::new(),
                authentication: BindAuthentication::Sasl {
                    mechanism: "PLAIN".into(),
                    credentials: Some(b"\0user\0pw".to_vec()),
                },
            }),
            ProtocolOp::BindResponse(BindResponse {
                result: LdapResult::new(ResultCode(14)),
                server_sasl_credentials: Some(b"challenge".to_vec()),
            }),
            ProtocolOp::CompareRequest(CompareRequest {
                dn: "uid=a,dc=example".into(),
                attribute_type: "mail".into(),
                assertion_value: b"a@example.com".to_vec(),
            }),
            ProtocolOp::CompareResponse(LdapResult::new(ResultCode::COMPARE_TRUE)),
            ProtocolOp::ModifyRequest(ModifyRequest {
                dn: "uid=a,dc=example".into(),
                changes: vec![
                    ModifyChange {
                        operation: ModificationType::Replace,
                        modification: PartialAttribute::new("sn", vec![b"B".to_vec()]),
                    },
                    ModifyChange {
                        operation: ModificationType::Increment,
                        modification: PartialAttribute::new("uidNumber", vec![b"1".to_vec()]),
                    },
                ],
            }),
            ProtocolOp::ModifyResponse(LdapResult::with_message(ResultCode::NO_SUCH_OBJECT, "gone")),
            ProtocolOp::ModifyDNRequest(ModifyDNRequest {
                entry_dn: "cn=old,dc=example".into(),
                new_rdn: "cn=new".into(),
                delete_old_rdn: true,
                new_superior: Some("ou=moved,dc=example".into()),
            }),
            ProtocolOp::ModifyDNResponse(LdapResult {
                referral_urls: Some(vec![]),
                ..LdapResult::success()
            }),
            ProtocolOp::SearchRequest(SearchRequest {
                base_dn: "dc=example".into(),
                scope: SearchScope::WholeSubtree,
                deref_policy: DerefPolicy::FindingBase,
                size_limit: 500,
                time_limit: 0,
                types_only: false,
                filter: SearchFilter::parse("(&(objectClass=person)(cn=J*))").unwrap(),
                attributes: vec!["cn".into(), "+".into()],
            }),
            ProtocolOp::SearchResultEntry(SearchResultEntry {
                dn: "uid=a,dc=example".into(),
                attributes: vec![PartialAttribute::new("cn", vec![b"A".to_vec(), b"B".to_vec()])],
            }),
            ProtocolOp::SearchResultDone(LdapResult::success()),
            ProtocolOp::SearchResultReference(SearchResultReference {
                urls: vec!["ldap://a/".into(), "ldap://b/".into()],
            }),
            ProtocolOp::ExtendedRequest(ExtendedRequest {
                oid: "1.3.6.1.4.1.4203.1.11.3".into(),
                value: None,
            }),
            ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: referral_result,
                oid: Some("1.2.3".into()),
                value: Some(vec![0x00, 0xFF]),
            }),
            ProtocolOp::IntermediateResponse(IntermediateResponse {
                oid: None,
                value: Some(b"v".to_vec()),
            }),
        ]
    }

    #[test]
    fn test_every_op_survives_encode_decode() {
        for (i, op) in sample_ops().into_iter().enumerate() {
            assert_round_trip(LdapMessage::new(i as i32 + 1, op));
        }
    }

    #[test]
    fn test_absent_referrals_stay_absent() {
        let bytes = encode_message(&LdapMessage::new(3, ProtocolOp::AddResponse(LdapResult::success()))).unwrap();
        match parse_ldap_message(&bytes).unwrap().protocol_op {
            ProtocolOp::AddResponse(result) => {
                assert!(result.referral_urls.is_none());
                assert!(result.matched_dn.is_none());
                assert!(result.diagnostic_message.is_none());
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_controls_round_trip() {
        let mut message = LdapMessage::new(
            9,
            ProtocolOp::DeleteRequest(DeleteRequest { dn: "cn=a".into() }),
        );
        message.controls = Some(vec![
            Control::new("1.2.840.113556.1.4.805", true, None),
            Control::new("1.3.6.1.1.13.1", false, Some(b"value".to_vec())),
        ]);
        assert_round_trip(message);
    }

    #[test]
    fn test_encode_error_response() {
        let bytes = encode_error_response(5, OP_TYPE_ADD_RESPONSE, ResultCode::PROTOCOL_ERROR, "bad").unwrap();
        assert_eq!(
            bytes,
            vec![
                0x30, 0x0F, 0x02, 0x01, 0x05, 0x69, 0x0A, 0x0A, 0x01, 0x02, 0x04, 0x00, 0x04, 0x03,
                b'b', b'a', b'd'
            ]
        );
        assert!(encode_error_response(5, OP_TYPE_ADD_REQUEST, ResultCode::PROTOCOL_ERROR, "").is_err());
    }

    #[test]
    fn test_notice_of_disconnection() {
        let notice = notice_of_disconnection(ResultCode::PROTOCOL_ERROR, "malformed message");
        let bytes = encode_message(&notice).unwrap();
        let decoded = parse_ldap_message(&bytes).unwrap();
        assert_eq!(decoded.message_id, 0);
        match decoded.protocol_op {
            ProtocolOp::ExtendedResponse(resp) => {
                assert_eq!(resp.oid.as_deref(), Some(NOTICE_OF_DISCONNECTION_OID));
                assert_eq!(resp.result.result_code, ResultCode::PROTOCOL_ERROR);
            }
            other => panic!("unexpected op {:?}", other),
        }
    }
}
