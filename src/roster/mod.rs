//! Campus roster: fetch the emailed CSV, parse it, load the PID table.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use csv::StringRecord;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::{Config, RosterColumns, RosterSourceKind};
use crate::db::{self, Pool, RosterRow};

#[cfg(feature = "imap")]
pub mod imap_source;
pub mod mail;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("roster has no `{0}` column")]
    MissingColumn(&'static str),
    #[error("roster message could not be parsed: {0}")]
    Mail(#[from] mailparse::MailParseError),
    #[error("no attachment found in roster message")]
    NoAttachment,
    #[error("mailbox login failed: {0}")]
    Login(String),
    #[error("mailbox error: {0}")]
    Mailbox(String),
}

/// Where the roster attachment comes from.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Raw bytes of the CSV attachment.
    async fn fetch_attachment(&self) -> Result<Vec<u8>, RosterError>;
}

/// The CSV itself, already saved to disk.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    pub path: PathBuf,
}

#[async_trait]
impl RosterSource for CsvFileSource {
    async fn fetch_attachment(&self) -> Result<Vec<u8>, RosterError> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

/// A roster email saved as an RFC 822 message.
#[derive(Debug, Clone)]
pub struct EmlFileSource {
    pub path: PathBuf,
}

#[async_trait]
impl RosterSource for EmlFileSource {
    async fn fetch_attachment(&self) -> Result<Vec<u8>, RosterError> {
        let raw = tokio::fs::read(&self.path).await?;
        mail::first_attachment(&raw)?.ok_or(RosterError::NoAttachment)
    }
}

/// Build the source selected in `roster.source`.
pub fn source_from_config(cfg: &Config) -> Result<Box<dyn RosterSource>> {
    let path = || {
        cfg.roster
            .path
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("roster.path is not configured"))
    };
    match cfg.roster.source {
        RosterSourceKind::Csv => Ok(Box::new(CsvFileSource { path: path()? })),
        RosterSourceKind::Eml => Ok(Box::new(EmlFileSource { path: path()? })),
        #[cfg(feature = "imap")]
        RosterSourceKind::Imap => {
            let imap = cfg
                .roster
                .imap
                .as_ref()
                .ok_or_else(|| anyhow!("roster.imap is not configured"))?;
            Ok(Box::new(imap_source::ImapSource::from_config(imap)))
        }
        #[cfg(not(feature = "imap"))]
        RosterSourceKind::Imap => Err(anyhow!(
            "roster.source is imap but this build lacks the `imap` feature"
        )),
    }
}

/// Header positions of the three roster fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub pid: usize,
    pub first_name: usize,
    pub last_name: usize,
}

fn clean_header(h: &str) -> String {
    h.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Locate the roster columns, by declared names when given, otherwise by
/// sniffing headers for `pid`, `first` and `last`.
pub fn resolve_columns(headers: &StringRecord, declared: Option<&RosterColumns>) -> Result<ColumnMap, RosterError> {
    let cleaned: Vec<String> = headers.iter().map(clean_header).collect();

    if let Some(cols) = declared {
        let find = |name: &str, role: &'static str| {
            let wanted = clean_header(name);
            cleaned
                .iter()
                .position(|h| *h == wanted)
                .ok_or(RosterError::MissingColumn(role))
        };
        return Ok(ColumnMap {
            pid: find(&cols.pid, "pid")?,
            first_name: find(&cols.first_name, "first name")?,
            last_name: find(&cols.last_name, "last name")?,
        });
    }

    let (mut pid, mut first, mut last) = (None, None, None);
    for (i, h) in cleaned.iter().enumerate() {
        if h.contains("pid") {
            pid = pid.or(Some(i));
        } else if h.contains("first") {
            first = first.or(Some(i));
        } else if h.contains("last") {
            last = last.or(Some(i));
        }
    }
    Ok(ColumnMap {
        pid: pid.ok_or(RosterError::MissingColumn("pid"))?,
        first_name: first.ok_or(RosterError::MissingColumn("first name"))?,
        last_name: last.ok_or(RosterError::MissingColumn("last name"))?,
    })
}

fn cell(record: &StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse roster CSV bytes. Rows without a PID are skipped; duplicates are
/// kept here and collapsed on load.
pub fn parse_roster(bytes: &[u8], declared: Option<&RosterColumns>) -> Result<Vec<RosterRow>, RosterError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let columns = resolve_columns(reader.headers()?, declared)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(pid) = cell(&record, columns.pid) else {
            continue;
        };
        rows.push(RosterRow {
            pid,
            first_name: cell(&record, columns.first_name),
            last_name: cell(&record, columns.last_name),
        });
    }
    Ok(rows)
}

/// Fetch, parse and load the roster. Fails closed: any source or parse
/// problem is logged and the previous roster stays. Only database errors
/// are returned.
#[instrument(skip_all)]
pub async fn sync_roster(
    pool: &Pool,
    source: &dyn RosterSource,
    declared: Option<&RosterColumns>,
) -> Result<bool> {
    let bytes = match source.fetch_attachment().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(%err, "could not fetch roster");
            return Ok(false);
        }
    };
    let rows = match parse_roster(&bytes, declared) {
        Ok(rows) => rows,
        Err(err) => {
            error!(%err, "could not read roster");
            return Ok(false);
        }
    };
    let stored = db::replace_roster(pool, &rows).await?;
    info!(parsed = rows.len(), stored, "roster refreshed");
    Ok(true)
}
