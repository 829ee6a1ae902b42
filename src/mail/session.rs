//! Mail sessions: open, list unseen, fetch and close.
//!
//! `MailConnector` / `MailSession` are the seams the pipeline talks to;
//! `ImapConnector` is the production implementation (implicit TLS via rustls).
//! Everything here is blocking; run it inside `spawn_blocking`.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, FetchError};
use crate::mail::protocol::{self, Completion, ImapStream};
use crate::mail::types::{MailCredential, MessageHandle};

/// Opens authenticated sessions to a mail server.
pub trait MailConnector: Send + Sync {
    fn open(&self, credential: &MailCredential) -> Result<Box<dyn MailSession>, ConnectionError>;
}

/// An authenticated mailbox session.
pub trait MailSession: Send {
    /// At most `limit` unseen messages in INBOX, most recent first.
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<MessageHandle>, ConnectionError>;

    /// Raw RFC 822 bytes of one message.
    fn fetch(&mut self, handle: MessageHandle) -> Result<Vec<u8>, FetchError>;

    /// Stable UID of a message, if the server will tell us.
    fn fetch_uid(&mut self, handle: MessageHandle) -> Option<u32>;

    /// Log out. Failures are swallowed.
    fn close(self: Box<Self>);
}

/// Keep the newest `limit` sequence numbers, newest first.
pub fn most_recent_first(mut seqs: Vec<u32>, limit: usize) -> Vec<MessageHandle> {
    seqs.sort_unstable();
    seqs.dedup();
    seqs.into_iter()
        .rev()
        .take(limit)
        .map(MessageHandle::new)
        .collect()
}

// ── IMAP session ────────────────────────────────────────────────────

/// IMAP session over any stream (TLS in production, scripted in tests).
pub struct ImapSession<S: Read + Write> {
    stream: ImapStream<S>,
    login: String,
    selected: bool,
}

impl<S: Read + Write> ImapSession<S> {
    /// Consume the greeting and authenticate with LOGIN.
    pub fn login(stream: S, credential: &MailCredential) -> Result<Self, ConnectionError> {
        let mut stream = ImapStream::new(stream);
        stream.read_greeting()?;

        let resp = stream.command(&format!(
            "LOGIN {} {}",
            protocol::quote(&credential.login),
            protocol::quote(credential.password.expose_secret())
        ))?;
        if !resp.is_ok() {
            return Err(ConnectionError::AuthFailed {
                login: credential.login.clone(),
            });
        }

        debug!(login = %credential.login, "IMAP login succeeded");
        Ok(Self {
            stream,
            login: credential.login.clone(),
            selected: false,
        })
    }

    fn select_inbox(&mut self) -> Result<(), ConnectionError> {
        if self.selected {
            return Ok(());
        }
        let resp = self.stream.command("SELECT INBOX")?;
        if !resp.is_ok() {
            return Err(ConnectionError::Rejected {
                command: "SELECT".into(),
                reason: resp.text,
            });
        }
        self.selected = true;
        Ok(())
    }
}

impl<S: Read + Write + Send> MailSession for ImapSession<S> {
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<MessageHandle>, ConnectionError> {
        self.select_inbox()?;
        let resp = self.stream.command("SEARCH UNSEEN")?;
        if !resp.is_ok() {
            return Err(ConnectionError::Rejected {
                command: "SEARCH".into(),
                reason: resp.text,
            });
        }
        let seqs = protocol::parse_search(&resp.untagged);
        debug!(login = %self.login, unseen = seqs.len(), "Unseen messages listed");
        Ok(most_recent_first(seqs, limit))
    }

    fn fetch(&mut self, handle: MessageHandle) -> Result<Vec<u8>, FetchError> {
        self.select_inbox()?;
        // RFC822 (not BODY.PEEK) so the server flags the message \Seen
        let resp = self
            .stream
            .command(&format!("FETCH {} (RFC822)", handle.seq))?;
        match resp.status {
            Completion::Ok => protocol::parse_fetch_body(&resp.untagged, handle.seq)
                .ok_or(FetchError::MissingBody { seq: handle.seq }),
            Completion::No | Completion::Bad => Err(FetchError::Rejected {
                seq: handle.seq,
                reason: resp.text,
            }),
        }
    }

    fn fetch_uid(&mut self, handle: MessageHandle) -> Option<u32> {
        let resp = match self.stream.command(&format!("FETCH {} (UID)", handle.seq)) {
            Ok(resp) if resp.is_ok() => resp,
            Ok(resp) => {
                debug!(seq = handle.seq, reason = %resp.text, "UID fetch refused");
                return None;
            }
            Err(e) => {
                debug!(seq = handle.seq, error = %e, "UID fetch failed");
                return None;
            }
        };
        protocol::parse_uid(&resp.untagged, handle.seq)
    }

    fn close(mut self: Box<Self>) {
        match self.stream.command("LOGOUT") {
            Ok(_) => debug!(login = %self.login, "IMAP session closed"),
            Err(e) => debug!(login = %self.login, error = %e, "IMAP logout failed (ignored)"),
        }
    }
}

// ── Connector ───────────────────────────────────────────────────────

/// Opens IMAP sessions over implicit TLS.
pub struct ImapConnector {
    timeout: Duration,
    tls: Arc<rustls::ClientConfig>,
}

impl ImapConnector {
    /// Build a connector trusting the webpki root set.
    pub fn new(timeout: Duration) -> Result<Self, ConnectionError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            timeout,
            tls: Arc::new(tls),
        })
    }

    fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| ConnectionError::Resolve {
                host: host.to_string(),
                port,
            })?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(self.timeout))?;
                    tcp.set_write_timeout(Some(self.timeout))?;
                    return Ok(tcp);
                }
                Err(e) => {
                    warn!(%addr, error = %e, "IMAP connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.map_or_else(
            || ConnectionError::Resolve {
                host: host.to_string(),
                port,
            },
            ConnectionError::from,
        ))
    }
}

impl MailConnector for ImapConnector {
    fn open(&self, credential: &MailCredential) -> Result<Box<dyn MailSession>, ConnectionError> {
        let tcp = self.connect_tcp(&credential.server_host, credential.server_port)?;

        let server_name = ServerName::try_from(credential.server_host.clone())
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(Arc::clone(&self.tls), server_name)
            .map_err(|e| ConnectionError::Tls(e.to_string()))?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let session = ImapSession::login(tls, credential)?;
        info!(
            login = %credential.login,
            host = %credential.server_host,
            "Connected to mail server"
        );
        Ok(Box::new(session))
    }
}
