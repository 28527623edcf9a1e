//! Newest roster email from an IMAP mailbox over TLS.
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{mail, RosterError, RosterSource};
use crate::config::Imap as ImapConfig;

#[derive(Clone)]
pub struct ImapSource {
    server: String,
    port: u16,
    email: String,
    password: String,
    mailbox: String,
    sender: String,
    subject: String,
}

impl std::fmt::Debug for ImapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSource")
            .field("server", &self.server)
            .field("mailbox", &self.mailbox)
            .finish_non_exhaustive()
    }
}

fn mailbox_err(err: imap::Error) -> RosterError {
    RosterError::Mailbox(err.to_string())
}

impl ImapSource {
    pub fn from_config(cfg: &ImapConfig) -> Self {
        Self {
            server: cfg.server.clone(),
            port: cfg.port,
            email: cfg.email.clone(),
            password: cfg.password.clone(),
            mailbox: cfg.mailbox.clone(),
            sender: cfg.sender.clone(),
            subject: cfg.subject.clone(),
        }
    }

    fn search_query(&self) -> String {
        format!(
            "FROM \"{}\" SUBJECT \"{}\"",
            self.sender.replace('"', ""),
            self.subject.replace('"', "")
        )
    }

    fn fetch_blocking(&self) -> Result<Vec<u8>, RosterError> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|err| RosterError::Mailbox(err.to_string()))?;
        let client = imap::connect((self.server.as_str(), self.port), &self.server, &tls)
            .map_err(mailbox_err)?;
        let mut session = client
            .login(&self.email, &self.password)
            .map_err(|(err, _client)| RosterError::Login(err.to_string()))?;

        let result = self.newest_attachment(&mut session);
        if let Err(err) = session.logout() {
            warn!(%err, "imap logout failed");
        }
        result
    }

    fn newest_attachment<T>(&self, session: &mut imap::Session<T>) -> Result<Vec<u8>, RosterError>
    where
        T: std::io::Read + std::io::Write,
    {
        session.select(&self.mailbox).map_err(mailbox_err)?;
        let mut ids: Vec<u32> = session
            .search(self.search_query())
            .map_err(mailbox_err)?
            .into_iter()
            .collect();
        ids.sort_unstable();
        debug!(matches = ids.len(), "roster messages found");

        for id in ids.iter().rev() {
            let fetches = match session.fetch(id.to_string(), "RFC822") {
                Ok(fetches) => fetches,
                Err(err) => {
                    warn!(id, %err, "could not fetch message");
                    continue;
                }
            };
            for fetch in fetches.iter() {
                let Some(body) = fetch.body() else { continue };
                if let Some(bytes) = mail::first_attachment(body)? {
                    return Ok(bytes);
                }
            }
        }
        Err(RosterError::NoAttachment)
    }
}

#[async_trait]
impl RosterSource for ImapSource {
    async fn fetch_attachment(&self) -> Result<Vec<u8>, RosterError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.fetch_blocking())
            .await
            .map_err(|err| RosterError::Mailbox(err.to_string()))?
    }
}
