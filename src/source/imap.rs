//! IMAP message source over implicit TLS.
//!
//! The protocol work is blocking (rustls over a `TcpStream`) and runs on the
//! blocking pool. One logged-in session is kept between calls and dropped
//! after any I/O failure so the next call reconnects.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::pipeline::types::RawMessage;
use crate::source::MessageSource;

/// Subject used when a message has none.
pub const DEFAULT_SUBJECT: &str = "(sans objet)";

/// Largest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Socket read/write timeout.
    pub timeout: Duration,
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One untagged response line with the literals embedded in it.
#[derive(Debug, Default, PartialEq)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// A logged-in session with the folder selected.
struct ImapSession {
    reader: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, SourceError> {
        let connection_error = |reason: String| SourceError::Connection {
            host: config.host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| connection_error(e.to_string()))?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| connection_error(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connection_error(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            reader: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = read_line(&mut session.reader)?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(connection_error(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        match session.command(&login) {
            Ok(_) => {}
            Err(SourceError::CommandFailed { .. }) => {
                return Err(SourceError::AuthFailed {
                    username: config.username.clone(),
                });
            }
            Err(e) => return Err(e),
        }

        session.command(&format!("SELECT {}", quote(&config.folder)))?;
        info!(host = %config.host, folder = %config.folder, "IMAP session established");
        Ok(session)
    }

    /// Send one tagged command and collect its untagged responses.
    fn command(&mut self, command: &str) -> Result<Vec<ResponseLine>, SourceError> {
        let tag = format!("T{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        read_response(&mut self.reader, &tag, command_name(command))
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// IMAP-backed [`MessageSource`]; identifiers are message UIDs.
pub struct ImapSource {
    config: ImapConfig,
    session: Arc<Mutex<Option<ImapSession>>>,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` against the shared session, connecting first if needed.
    async fn with_session<T, F>(&self, op: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> Result<T, SourceError> + Send + 'static,
    {
        let config = self.config.clone();
        let slot = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| SourceError::Protocol("IMAP session lock poisoned".into()))?;
            if guard.is_none() {
                *guard = Some(ImapSession::connect(&config)?);
            }
            let Some(session) = guard.as_mut() else {
                return Err(SourceError::Protocol("IMAP session unavailable".into()));
            };

            let result = op(session);
            if let Err(SourceError::Io(e)) = &result {
                warn!(error = %e, "IMAP I/O failure, dropping session");
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| SourceError::Protocol(format!("IMAP task failed: {e}")))?
    }

    /// Log out and drop the session, if any.
    pub async fn disconnect(&self) {
        let slot = Arc::clone(&self.session);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = slot.lock()
                && let Some(mut session) = guard.take()
            {
                let _ = session.command("LOGOUT");
                debug!("IMAP session closed");
            }
        })
        .await;
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    async fn list_unread(&self, max: usize) -> Result<Vec<String>, SourceError> {
        let uids = self
            .with_session(|session| {
                let lines = session.command("UID SEARCH UNSEEN")?;
                Ok(parse_search(&lines))
            })
            .await?;

        debug!(unseen = uids.len(), max, "IMAP search complete");
        Ok(uids.into_iter().take(max).map(|uid| uid.to_string()).collect())
    }

    async fn get_content(&self, id: &str) -> Result<RawMessage, SourceError> {
        let uid = parse_uid(id)?;
        self.with_session(move |session| {
            // PEEK leaves \Seen untouched.
            let lines = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
            let raw = fetched_literal(&lines).ok_or_else(|| SourceError::NotFound {
                id: uid.to_string(),
            })?;
            parse_message(&uid.to_string(), raw)
        })
        .await
    }

    async fn mark_read(&self, id: &str) -> Result<(), SourceError> {
        let uid = parse_uid(id)?;
        self.with_session(move |session| {
            session.command(&format!("UID STORE {uid} +FLAGS.SILENT (\\Seen)"))?;
            Ok(())
        })
        .await
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, SourceError> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Err(SourceError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "IMAP connection closed",
        )));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read one logical response line, pulling in any `{n}` literals.
fn read_response_line<R: BufRead>(reader: &mut R) -> Result<ResponseLine, SourceError> {
    let mut line = ResponseLine::default();
    loop {
        let segment = read_line(reader)?;
        let literal = literal_size(&segment);
        line.text.push_str(&segment);

        let Some(size) = literal else {
            return Ok(line);
        };
        if size > MAX_LITERAL_BYTES {
            return Err(SourceError::Protocol(format!(
                "literal of {size} bytes exceeds limit"
            )));
        }
        let mut buf = vec![0u8; size];
        reader.read_exact(&mut buf)?;
        line.literals.push(buf);
    }
}

/// Read until the tagged completion for `tag`.
fn read_response<R: BufRead>(
    reader: &mut R,
    tag: &str,
    command: &str,
) -> Result<Vec<ResponseLine>, SourceError> {
    let mut untagged = Vec::new();
    loop {
        let line = read_response_line(reader)?;
        if let Some(status) = line
            .text
            .strip_prefix(tag)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            if status.starts_with("OK") {
                return Ok(untagged);
            }
            return Err(SourceError::CommandFailed {
                command: command.to_string(),
                response: status.trim_end().to_string(),
            });
        }
        if !line.text.starts_with('+') {
            untagged.push(line);
        }
    }
}

/// Size of a literal announced at the end of a line (`{123}` or `{123+}`).
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].trim_end_matches('+').parse().ok()
}

/// UIDs from `* SEARCH` responses, ascending.
fn parse_search(lines: &[ResponseLine]) -> Vec<u32> {
    let mut uids: Vec<u32> = lines
        .iter()
        .filter(|l| l.text.starts_with("* SEARCH"))
        .flat_map(|l| l.text.split_whitespace().skip(2))
        .filter_map(|token| token.parse().ok())
        .collect();
    uids.sort_unstable();
    uids.dedup();
    uids
}

fn fetched_literal(lines: &[ResponseLine]) -> Option<&[u8]> {
    lines
        .iter()
        .filter(|l| l.text.contains("FETCH"))
        .find_map(|l| l.literals.first())
        .map(Vec::as_slice)
}

fn parse_uid(id: &str) -> Result<u32, SourceError> {
    id.trim().parse().map_err(|_| SourceError::NotFound { id: id.to_string() })
}

/// Quote a string argument.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Command name for error reporting (never includes arguments).
fn command_name(command: &str) -> &str {
    let words: Vec<&str> = command.splitn(3, ' ').collect();
    let len = match words.as_slice() {
        ["UID", verb, ..] => 4 + verb.len(),
        [name, ..] => name.len(),
        [] => command.len(),
    };
    &command[..len]
}

// ── MIME ────────────────────────────────────────────────────────────

/// Parse an RFC 822 message into subject and readable body.
fn parse_message(id: &str, raw: &[u8]) -> Result<RawMessage, SourceError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| SourceError::Unparsable { id: id.to_string() })?;

    let subject = parsed
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string();
    Ok(RawMessage::new(id, subject, extract_text(&parsed)))
}

fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(data: &str) -> Cursor<Vec<u8>> {
        Cursor::new(data.as_bytes().to_vec())
    }

    // ── Response reading ────────────────────────────────────────────

    #[test]
    fn literal_size_detects_announcements() {
        assert_eq!(literal_size("* 1 FETCH (UID 7 BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_size("* 1 FETCH (BODY[] {8+}\r\n"), Some(8));
        assert_eq!(literal_size("* SEARCH 1 2 3\r\n"), None);
        assert_eq!(literal_size("T1 OK done\r\n"), None);
    }

    #[test]
    fn response_reads_literal_containing_tag_lookalike() {
        let literal = "Subject: x\r\nT3 OK not really\r\n";
        let data = format!(
            "* 1 FETCH (UID 9 BODY[] {{{}}}\r\n{literal})\r\nT3 OK FETCH completed\r\n",
            literal.len()
        );
        let lines = read_response(&mut reader(&data), "T3", "UID FETCH").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].literals.len(), 1);
        assert_eq!(lines[0].literals[0], literal.as_bytes());
        assert_eq!(fetched_literal(&lines), Some(literal.as_bytes()));
    }

    #[test]
    fn response_tagged_no_is_command_failure() {
        let data = "* BAD noise\r\nT2 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n";
        let err = read_response(&mut reader(data), "T2", "LOGIN").unwrap_err();
        match err {
            SourceError::CommandFailed { command, response } => {
                assert_eq!(command, "LOGIN");
                assert!(response.starts_with("NO"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn response_eof_is_io_error() {
        let err = read_response(&mut reader("* SEARCH 1\r\n"), "T1", "UID SEARCH").unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn response_ignores_continuations() {
        let data = "+ go ahead\r\n* SEARCH 4\r\nT1 OK\r\n";
        let lines = read_response(&mut reader(data), "T1", "UID SEARCH").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn oversized_literal_rejected() {
        let data = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_BYTES + 1);
        let err = read_response_line(&mut reader(&data)).unwrap_err();
        assert!(matches!(err, SourceError::Protocol(_)));
    }

    #[test]
    fn search_parsing_sorts_and_dedups() {
        let data = "* SEARCH 12 3 7 3\r\n* OK still here\r\nT1 OK SEARCH completed\r\n";
        let lines = read_response(&mut reader(data), "T1", "UID SEARCH").unwrap();
        assert_eq!(parse_search(&lines), vec![3, 7, 12]);
    }

    #[test]
    fn search_parsing_empty_mailbox() {
        let data = "* SEARCH\r\nT1 OK\r\n";
        let lines = read_response(&mut reader(data), "T1", "UID SEARCH").unwrap();
        assert!(parse_search(&lines).is_empty());
    }

    #[test]
    fn fetch_without_literal_has_no_body() {
        let data = "* 1 FETCH (UID 5 FLAGS (\\Seen))\r\nT1 OK\r\n";
        let lines = read_response(&mut reader(data), "T1", "UID FETCH").unwrap();
        assert!(fetched_literal(&lines).is_none());
    }

    // ── Argument helpers ────────────────────────────────────────────

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("INBOX"), "\"INBOX\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn command_name_hides_arguments() {
        assert_eq!(command_name("LOGIN \"user\" \"secret\""), "LOGIN");
        assert_eq!(command_name("UID FETCH 4 BODY.PEEK[]"), "UID FETCH");
        assert_eq!(command_name("UID SEARCH UNSEEN"), "UID SEARCH");
        assert_eq!(command_name("LOGOUT"), "LOGOUT");
    }

    #[test]
    fn uid_must_be_numeric() {
        assert_eq!(parse_uid(" 42 ").unwrap(), 42);
        assert!(matches!(parse_uid("abc"), Err(SourceError::NotFound { .. })));
    }

    // ── MIME ────────────────────────────────────────────────────────

    #[test]
    fn parse_plain_text_message() {
        let raw = "From: alice@example.com\r\n\
                   Subject: Impossible de se connecter\r\n\
                   Content-Type: text/plain; charset=utf-8\r\n\
                   \r\n\
                   Bonjour, mon mot de passe ne fonctionne plus.\r\n";
        let msg = parse_message("17", raw.as_bytes()).unwrap();
        assert_eq!(msg.id, "17");
        assert_eq!(msg.subject, "Impossible de se connecter");
        assert_eq!(msg.body, "Bonjour, mon mot de passe ne fonctionne plus.");
    }

    #[test]
    fn parse_html_only_message() {
        let raw = "From: bob@example.com\r\n\
                   Subject: Facture\r\n\
                   Content-Type: text/html; charset=utf-8\r\n\
                   \r\n\
                   <html><body><p>Bonjour,</p><p>la facture est fausse</p></body></html>\r\n";
        let msg = parse_message("3", raw.as_bytes()).unwrap();
        assert_eq!(msg.subject, "Facture");
        assert!(msg.body.contains("facture est fausse"));
        assert!(!msg.body.contains('<'));
    }

    #[test]
    fn parse_message_without_subject_uses_default() {
        let raw = "From: carol@example.com\r\n\r\nCorps seul\r\n";
        let msg = parse_message("8", raw.as_bytes()).unwrap();
        assert_eq!(msg.subject, DEFAULT_SUBJECT);
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Gras</b> et <i>italique</i></div>"),
            "Gras et italique"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  Bonjour   le monde  </p>"), "Bonjour le monde");
    }
}
