use crate::ber::decode_length;
use crate::error::{BerError, ResultCode};
use crate::ldap_encoder::{encode_error_response, encode_message, notice_of_disconnection};
use crate::ldap_handler::{result_code_of, LdapHandler, Reply, Session};
use crate::ldap_protocol::*;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Top-level LDAP message is always a SEQUENCE (BER tag 0x30).
const LDAP_MESSAGE_SEQUENCE_TAG: u8 = 0x30;

/// Largest message accepted from a client.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub struct LdapServer {
    listen_url: String,
    handler: Arc<LdapHandler>,
    metrics: Arc<Metrics>,
}

impl LdapServer {
    pub fn new(listen_url: String, handler: Arc<LdapHandler>, metrics: Arc<Metrics>) -> Self {
        Self {
            listen_url,
            handler,
            metrics,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let addr = parse_listen_url(&self.listen_url)?;
        info!("Starting LDAP directory server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until it fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "LDAP directory server listening on {} ({} entries loaded)",
            listener.local_addr()?,
            self.handler.backend().len()
        );
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);
                    let handler = Arc::clone(&self.handler);
                    let metrics = Arc::clone(&self.metrics);
                    metrics.inc_connections();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, peer_addr, handler, metrics).await {
                            error!("Error handling client {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Parse `ldap://host:port`; `ldap://:port` binds every interface.
pub fn parse_listen_url(url: &str) -> Result<SocketAddr> {
    if url.starts_with("ldaps://") {
        anyhow::bail!("ldaps:// is not supported, use ldap://");
    }
    let url = url
        .strip_prefix("ldap://")
        .ok_or_else(|| anyhow::anyhow!("Invalid URL scheme, expected ldap://"))?;
    let url = url.trim_start_matches('/');

    if let Some(port) = url.strip_prefix(':') {
        let port: u16 = port.parse().context("Invalid port number")?;
        Ok(SocketAddr::from(([0, 0, 0, 0], port)))
    } else {
        url.parse()
            .with_context(|| format!("Failed to parse address: {}", url))
    }
}

/// One step of framing the client byte stream.
#[derive(Debug)]
enum Frame {
    /// Not enough data yet.
    Incomplete,
    Message(LdapMessage),
    /// A complete frame that did not decode. It has been consumed.
    Invalid {
        message_id: i32,
        request_tag: Option<u8>,
        diagnostic: String,
    },
    /// The stream cannot be resynchronized.
    Fatal(String),
}

fn hex_preview(data: &[u8]) -> String {
    data.iter()
        .take(64)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn try_parse_message(buffer: &mut BytesMut) -> Frame {
    let Some(&first_byte) = buffer.first() else {
        return Frame::Incomplete;
    };
    if first_byte != LDAP_MESSAGE_SEQUENCE_TAG {
        return Frame::Fatal(format!(
            "expected an LDAP message SEQUENCE, got tag 0x{:02X}",
            first_byte
        ));
    }
    let (content_len, length_len) = match decode_length(buffer, 1) {
        Ok(decoded) => decoded,
        Err(BerError::Truncated { .. }) => return Frame::Incomplete,
        Err(e) => return Frame::Fatal(format!("invalid message length: {}", e)),
    };
    let total = 1 + length_len + content_len;
    if total > MAX_MESSAGE_SIZE {
        return Frame::Fatal(format!(
            "message of {} bytes exceeds the {} byte limit",
            total, MAX_MESSAGE_SIZE
        ));
    }
    if buffer.len() < total {
        return Frame::Incomplete;
    }

    let frame = buffer.split_to(total);
    match parse_ldap_message(&frame) {
        Ok(message) => Frame::Message(message),
        Err(e) => {
            warn!(
                "Failed to parse LDAP message: {} (first 64 bytes: {})",
                e,
                hex_preview(&frame)
            );
            let (message_id, request_tag) = match parse_message_header(&frame) {
                Ok((id, tag)) => (id, Some(tag)),
                Err(_) => (0, None),
            };
            Frame::Invalid {
                message_id,
                request_tag,
                diagnostic: e.to_string(),
            }
        }
    }
}

/// Response type answering a request type; `None` for requests that get no
/// response and for tags that are not requests.
fn response_tag_for_request(request_tag: u8) -> Option<u8> {
    match request_tag {
        OP_TYPE_BIND_REQUEST => Some(OP_TYPE_BIND_RESPONSE),
        OP_TYPE_SEARCH_REQUEST => Some(OP_TYPE_SEARCH_RESULT_DONE),
        OP_TYPE_MODIFY_REQUEST => Some(OP_TYPE_MODIFY_RESPONSE),
        OP_TYPE_ADD_REQUEST => Some(OP_TYPE_ADD_RESPONSE),
        OP_TYPE_DELETE_REQUEST => Some(OP_TYPE_DELETE_RESPONSE),
        OP_TYPE_MODIFY_DN_REQUEST => Some(OP_TYPE_MODIFY_DN_RESPONSE),
        OP_TYPE_COMPARE_REQUEST => Some(OP_TYPE_COMPARE_RESPONSE),
        OP_TYPE_EXTENDED_REQUEST => Some(OP_TYPE_EXTENDED_RESPONSE),
        _ => None,
    }
}

fn is_failure(code: ResultCode) -> bool {
    !matches!(
        code,
        ResultCode::SUCCESS | ResultCode::COMPARE_TRUE | ResultCode::COMPARE_FALSE
    )
}

async fn send_notice(stream: &mut TcpStream, metrics: &Metrics, code: ResultCode, message: &str) {
    metrics.inc_disconnect();
    match encode_message(&notice_of_disconnection(code, message)) {
        Ok(data) => {
            if let Err(e) = stream.write_all(&data).await {
                debug!("Failed to send notice of disconnection: {}", e);
            }
            let _ = stream.flush().await;
        }
        Err(e) => warn!("Failed to encode notice of disconnection: {}", e),
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<LdapHandler>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    debug!("Handling client connection from {}", peer_addr);
    let mut session = Session::default();
    let mut buffer = BytesMut::with_capacity(4096);

    'read_loop: loop {
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            if !buffer.is_empty() {
                debug!("Client {} disconnected with {} unparsed bytes", peer_addr, buffer.len());
            } else {
                debug!("Client {} disconnected", peer_addr);
            }
            break;
        }

        loop {
            match try_parse_message(&mut buffer) {
                Frame::Incomplete => break,
                Frame::Fatal(reason) => {
                    warn!("Closing connection from {}: {}", peer_addr, reason);
                    metrics.inc_decode_error();
                    send_notice(&mut stream, &metrics, ResultCode::PROTOCOL_ERROR, &reason).await;
                    break 'read_loop;
                }
                Frame::Invalid {
                    message_id,
                    request_tag,
                    diagnostic,
                } => {
                    metrics.inc_decode_error();
                    match request_tag {
                        Some(OP_TYPE_UNBIND_REQUEST) => break 'read_loop,
                        Some(OP_TYPE_ABANDON_REQUEST) => continue,
                        _ => {}
                    }
                    let Some(response_tag) = request_tag.and_then(response_tag_for_request) else {
                        send_notice(&mut stream, &metrics, ResultCode::PROTOCOL_ERROR, &diagnostic).await;
                        break 'read_loop;
                    };
                    let data = encode_error_response(
                        message_id,
                        response_tag,
                        ResultCode::PROTOCOL_ERROR,
                        &diagnostic,
                    )?;
                    stream.write_all(&data).await?;
                    stream.flush().await?;
                }
                Frame::Message(message) => {
                    if !process_message(&mut stream, &handler, &metrics, &mut session, message).await? {
                        break 'read_loop;
                    }
                }
            }
        }
    }
    debug!("Connection from {} closed", peer_addr);
    Ok(())
}

/// Handle one decoded request. Returns `false` when the connection should close.
async fn process_message(
    stream: &mut TcpStream,
    handler: &LdapHandler,
    metrics: &Metrics,
    session: &mut Session,
    message: LdapMessage,
) -> Result<bool> {
    let LdapMessage {
        message_id,
        protocol_op,
        controls,
    } = message;
    let op_name = protocol_op.name();
    let start = Instant::now();

    let critical = controls
        .iter()
        .flatten()
        .find(|c| c.critical)
        .map(|c| c.oid.clone());
    let reply = match (critical, response_tag_for_request(protocol_op.tag())) {
        (Some(oid), Some(response_tag)) => {
            debug!("Refusing {} with unsupported critical control {}", op_name, oid);
            let data = encode_error_response(
                message_id,
                response_tag,
                ResultCode::UNAVAILABLE_CRITICAL_EXTENSION,
                &format!("critical control {} is not supported", oid),
            )?;
            stream.write_all(&data).await?;
            stream.flush().await?;
            metrics.observe_request(op_name, start.elapsed(), true);
            return Ok(true);
        }
        _ => handler.handle(session, protocol_op),
    };

    match reply {
        Reply::Close => {
            debug!("Unbind received (msgid {})", message_id);
            Ok(false)
        }
        Reply::Disconnect(reason) => {
            warn!("Unexpected {} from client: {}", op_name, reason);
            metrics.inc_decode_error();
            send_notice(stream, metrics, ResultCode::PROTOCOL_ERROR, &reason).await;
            Ok(false)
        }
        Reply::Send(ops) => {
            let failed = ops
                .last()
                .and_then(result_code_of)
                .is_some_and(is_failure);
            for op in ops {
                let data = encode_message(&LdapMessage::new(message_id, op))?;
                stream.write_all(&data).await?;
            }
            stream.flush().await?;
            metrics.observe_request(op_name, start.elapsed(), failed);
            Ok(true)
        }
    }
}
