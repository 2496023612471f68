use crate::backend::{MemoryBackend, SearchParams, WHO_AM_I_OID};
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::{OperationError, ResultCode};
use crate::ldap_protocol::*;
use crate::ldif_reader::parse_attr_description;
use crate::schema::Schema;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-connection state.
#[derive(Debug, Default)]
pub struct Session {
    /// `None` while anonymous.
    pub bound_dn: Option<Dn>,
}

/// What the connection should do after a request.
#[derive(Debug, PartialEq)]
pub enum Reply {
    /// Send these operations, in order. Empty for abandon.
    Send(Vec<ProtocolOp>),
    /// Unbind: close without answering.
    Close,
    /// The client sent something that is not a request; notify and close.
    Disconnect(String),
}

pub struct LdapHandler {
    backend: Arc<MemoryBackend>,
    schema: Arc<Schema>,
    /// Check added entries against the schema.
    validate_schema: bool,
}

fn parse_dn(dn: &str) -> Result<Dn, OperationError> {
    Dn::parse(dn).map_err(|e| OperationError::new(ResultCode::INVALID_DN_SYNTAX, e.to_string()))
}

fn error_result(e: OperationError) -> LdapResult {
    LdapResult::with_message(e.result_code, e.message)
}

/// Result code carried by a response operation.
pub fn result_code_of(op: &ProtocolOp) -> Option<ResultCode> {
    match op {
        ProtocolOp::BindResponse(r) => Some(r.result.result_code),
        ProtocolOp::ExtendedResponse(r) => Some(r.result.result_code),
        ProtocolOp::SearchResultDone(r)
        | ProtocolOp::AddResponse(r)
        | ProtocolOp::DeleteResponse(r)
        | ProtocolOp::ModifyResponse(r)
        | ProtocolOp::ModifyDNResponse(r)
        | ProtocolOp::CompareResponse(r) => Some(r.result_code),
        _ => None,
    }
}

impl LdapHandler {
    pub fn new(backend: Arc<MemoryBackend>, schema: Arc<Schema>, validate_schema: bool) -> Self {
        Self {
            backend,
            schema,
            validate_schema,
        }
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn handle(&self, session: &mut Session, op: ProtocolOp) -> Reply {
        let single = |op: ProtocolOp| Reply::Send(vec![op]);
        match op {
            ProtocolOp::UnbindRequest => Reply::Close,
            ProtocolOp::AbandonRequest(req) => {
                debug!("Abandon request for msgid {} (nothing to abandon)", req.message_id);
                Reply::Send(Vec::new())
            }
            ProtocolOp::BindRequest(req) => single(ProtocolOp::BindResponse(BindResponse {
                result: self.handle_bind(session, req),
                server_sasl_credentials: None,
            })),
            ProtocolOp::SearchRequest(req) => Reply::Send(self.handle_search(req)),
            ProtocolOp::AddRequest(req) => single(ProtocolOp::AddResponse(self.handle_add(req))),
            ProtocolOp::DeleteRequest(req) => single(ProtocolOp::DeleteResponse(self.handle_delete(req))),
            ProtocolOp::ModifyRequest(req) => single(ProtocolOp::ModifyResponse(self.handle_modify(req))),
            ProtocolOp::ModifyDNRequest(req) => {
                single(ProtocolOp::ModifyDNResponse(self.handle_modify_dn(req)))
            }
            ProtocolOp::CompareRequest(req) => single(ProtocolOp::CompareResponse(self.handle_compare(req))),
            ProtocolOp::ExtendedRequest(req) => single(self.handle_extended(session, req)),
            other => Reply::Disconnect(format!("{} is not a request", other.name())),
        }
    }

    fn handle_bind(&self, session: &mut Session, req: BindRequest) -> LdapResult {
        debug!("Handling BIND request for: {}", req.dn);
        if req.version != 3 {
            return LdapResult::with_message(
                ResultCode::PROTOCOL_ERROR,
                format!("LDAP version {} is not supported", req.version),
            );
        }
        let password = match req.authentication {
            BindAuthentication::Simple(password) => password,
            BindAuthentication::Sasl { mechanism, .. } => {
                return LdapResult::with_message(
                    ResultCode::AUTH_METHOD_NOT_SUPPORTED,
                    format!("SASL mechanism {} is not supported", mechanism),
                );
            }
        };
        // A new bind always drops the previous identity.
        session.bound_dn = None;
        if req.dn.is_empty() && password.is_empty() {
            return LdapResult::success();
        }
        if password.is_empty() {
            return LdapResult::with_message(
                ResultCode::UNWILLING_TO_PERFORM,
                "unauthenticated binds are not allowed",
            );
        }
        let dn = match parse_dn(&req.dn) {
            Ok(dn) => dn,
            Err(e) => return error_result(e),
        };
        let authenticated = self.backend.get(&dn).is_some_and(|entry| {
            entry
                .get("userPassword")
                .is_some_and(|attrs| attrs.iter().any(|a| a.values().iter().any(|v| *v == password)))
        });
        if !authenticated {
            return LdapResult::new(ResultCode::INVALID_CREDENTIALS);
        }
        info!("BIND successful for: {}", dn);
        session.bound_dn = Some(dn);
        LdapResult::success()
    }

    fn handle_search(&self, req: SearchRequest) -> Vec<ProtocolOp> {
        debug!("Handling SEARCH request: base={}, filter={}", req.base_dn, req.filter);
        let base = match parse_dn(&req.base_dn) {
            Ok(base) => base,
            Err(e) => return vec![ProtocolOp::SearchResultDone(error_result(e))],
        };
        let params = SearchParams {
            base: &base,
            scope: req.scope,
            filter: &req.filter,
            size_limit: usize::try_from(req.size_limit).unwrap_or(0),
            types_only: req.types_only,
            attributes: &req.attributes,
        };
        match self.backend.search(params) {
            Ok(results) => {
                let code = if results.size_limit_exceeded {
                    ResultCode::SIZE_LIMIT_EXCEEDED
                } else {
                    ResultCode::SUCCESS
                };
                debug!("SEARCH returned {} entries", results.entries.len());
                let mut ops: Vec<ProtocolOp> = results
                    .entries
                    .into_iter()
                    .map(ProtocolOp::SearchResultEntry)
                    .collect();
                ops.push(ProtocolOp::SearchResultDone(LdapResult::new(code)));
                ops
            }
            Err(e) => vec![ProtocolOp::SearchResultDone(error_result(e))],
        }
    }

    /// Build the entry carried by an add request.
    fn entry_from_request(&self, req: &AddRequest) -> Result<Entry, OperationError> {
        let mut entry = Entry::new(parse_dn(&req.dn)?);
        for attr in &req.attributes {
            let description = parse_attr_description(&attr.attr_type, &self.schema);
            if description.name().eq_ignore_ascii_case("objectclass") {
                for value in &attr.values {
                    entry.add_object_class(&String::from_utf8_lossy(value));
                }
                continue;
            }
            let attr_type = self.schema.attribute_type_or_default(description.name());
            for value in &attr.values {
                if !entry.add_typed_value(&attr_type, description.options(), value.clone()) {
                    return Err(OperationError::new(
                        ResultCode::ATTRIBUTE_OR_VALUE_EXISTS,
                        format!(
                            "duplicate value {} for attribute {}",
                            String::from_utf8_lossy(value),
                            attr.attr_type
                        ),
                    ));
                }
            }
        }
        entry.add_rdn_attributes_if_missing(&self.schema);
        if self.validate_schema {
            self.schema
                .check_entry(&entry)
                .map_err(|reason| OperationError::new(ResultCode::OBJECT_CLASS_VIOLATION, reason))?;
            let superiors = self
                .schema
                .superior_closure(entry.object_classes.values().map(String::as_str));
            for superior in superiors {
                entry.add_object_class(&superior);
            }
        }
        Ok(entry)
    }

    fn handle_add(&self, req: AddRequest) -> LdapResult {
        debug!("Handling ADD request: dn={}", req.dn);
        match self.entry_from_request(&req).and_then(|entry| self.backend.add(entry)) {
            Ok(()) => {
                info!("ADD successful for: {}", req.dn);
                LdapResult::success()
            }
            Err(e) => error_result(e),
        }
    }

    fn handle_delete(&self, req: DeleteRequest) -> LdapResult {
        debug!("Handling DELETE request: dn={}", req.dn);
        match parse_dn(&req.dn).and_then(|dn| self.backend.delete(&dn)) {
            Ok(()) => LdapResult::success(),
            Err(e) => error_result(e),
        }
    }

    fn handle_modify(&self, req: ModifyRequest) -> LdapResult {
        debug!("Handling MODIFY request: dn={}", req.dn);
        let modifications: Vec<Modification> = req
            .changes
            .into_iter()
            .map(|change| {
                let mut attribute = parse_attr_description(&change.modification.attr_type, &self.schema);
                for value in change.modification.values {
                    attribute.add(value);
                }
                Modification::new(change.operation, attribute)
            })
            .collect();
        match parse_dn(&req.dn).and_then(|dn| self.backend.modify(&dn, &modifications)) {
            Ok(()) => LdapResult::success(),
            Err(e) => error_result(e),
        }
    }

    fn handle_modify_dn(&self, req: ModifyDNRequest) -> LdapResult {
        debug!("Handling MODIFYDN request: dn={}, newrdn={}", req.entry_dn, req.new_rdn);
        let result = self.rename(&req);
        match result {
            Ok(new_dn) => {
                info!("MODIFYDN successful: {} -> {}", req.entry_dn, new_dn);
                LdapResult::success()
            }
            Err(e) => error_result(e),
        }
    }

    fn rename(&self, req: &ModifyDNRequest) -> Result<Dn, OperationError> {
        let dn = parse_dn(&req.entry_dn)?;
        let new_rdn = Rdn::parse(&req.new_rdn)
            .map_err(|e| OperationError::new(ResultCode::INVALID_DN_SYNTAX, e.to_string()))?;
        let new_superior = req.new_superior.as_deref().map(parse_dn).transpose()?;
        self.backend
            .modify_dn(&dn, new_rdn, req.delete_old_rdn, new_superior.as_ref())
    }

    fn handle_compare(&self, req: CompareRequest) -> LdapResult {
        debug!("Handling COMPARE request: dn={}, attr={}", req.dn, req.attribute_type);
        let result = parse_dn(&req.dn)
            .and_then(|dn| self.backend.compare(&dn, &req.attribute_type, &req.assertion_value));
        match result {
            Ok(true) => LdapResult::new(ResultCode::COMPARE_TRUE),
            Ok(false) => LdapResult::new(ResultCode::COMPARE_FALSE),
            Err(e) => error_result(e),
        }
    }

    fn handle_extended(&self, session: &Session, req: ExtendedRequest) -> ProtocolOp {
        if req.oid != WHO_AM_I_OID {
            return ProtocolOp::ExtendedResponse(ExtendedResponse {
                result: LdapResult::with_message(
                    ResultCode::PROTOCOL_ERROR,
                    format!("unsupported extended operation {}", req.oid),
                ),
                oid: None,
                value: None,
            });
        }
        let authz_id = match &session.bound_dn {
            Some(dn) => format!("dn:{}", dn),
            None => String::new(),
        };
        ProtocolOp::ExtendedResponse(ExtendedResponse {
            result: LdapResult::success(),
            oid: None,
            value: Some(authz_id.into_bytes()),
        })
    }
}
