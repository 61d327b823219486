// src/catalog.rs
// ServerFileCatalog: browse, select, import, and delete files already
// stored server-side. The entry list is a cache of the last fetch and is
// re-fetched after anything that could change it.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::backend::DocumentBackend;
use crate::model::{Document, ServerFileEntry};
use crate::notice::{Notice, NoticeBoard};
use crate::session::DocumentSession;

/// Result of a confirmed delete fan-out. Deletions are independent;
/// partial success is reported, not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub requested: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// No confirmation (or nothing selected): nothing was issued.
    Cancelled,
    Completed(DeleteReport),
}

pub struct ServerFileCatalog {
    entries: Vec<ServerFileEntry>,
    selected: Vec<String>,
    search_query: String,
    is_open: bool,
    notices: NoticeBoard,
    backend: Arc<dyn DocumentBackend>,
}

impl ServerFileCatalog {
    pub fn new(backend: Arc<dyn DocumentBackend>, notice_ttl: std::time::Duration) -> Self {
        Self {
            entries: Vec::new(),
            selected: Vec::new(),
            search_query: String::new(),
            is_open: false,
            notices: NoticeBoard::new(notice_ttl),
            backend,
        }
    }

    // === Accessors ===

    pub fn entries(&self) -> &[ServerFileEntry] {
        &self.entries
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn open(&mut self) {
        self.is_open = true;
    }

    pub fn close(&mut self) {
        self.is_open = false;
    }

    pub fn notice(&mut self) -> Option<&Notice> {
        self.notices.active()
    }

    // === Listing ===

    /// Fetch the full server listing and keep the entries whose names
    /// contain `query` (case-insensitive). Failures leave an empty cache
    /// and a banner; they never propagate.
    pub async fn refresh(&mut self, query: &str) {
        self.search_query = query.to_string();
        match self.backend.list_files().await {
            Ok(all) => {
                let needle = query.to_lowercase();
                self.entries = if needle.is_empty() {
                    all
                } else {
                    all.into_iter()
                        .filter(|entry| entry.name.to_lowercase().contains(&needle))
                        .collect()
                };
                debug!(count = self.entries.len(), query, "catalog refreshed");
            }
            Err(err) => {
                warn!(error = %err, "failed to list server files");
                self.entries.clear();
                self.notices
                    .raise(Notice::error("Could not load the server file list."));
            }
        }
    }

    // === Selection ===

    pub fn toggle_select(&mut self, name: &str) {
        if let Some(pos) = self.selected.iter().position(|n| n == name) {
            self.selected.remove(pos);
        } else {
            self.selected.push(name.to_string());
        }
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selected.iter().any(|n| n == name)
    }

    pub fn selected_names(&self) -> &[String] {
        &self.selected
    }

    // === Import ===

    /// Bring every selected entry the session does not already hold into
    /// it as a remote-backed document. The first newly imported document
    /// becomes active. Selection and the browse view are always reset,
    /// even when nothing was imported.
    pub fn import_selected(&mut self, session: &mut DocumentSession) -> usize {
        let mut imported = 0usize;
        let mut first_new: Option<String> = None;

        for name in &self.selected {
            if session.adopt_remote(Document::remote_backed(name.clone())) {
                if first_new.is_none() {
                    first_new = Some(name.clone());
                }
                imported += 1;
            }
        }
        if let Some(name) = first_new {
            session.set_active(&name);
        }

        info!(imported, "catalog import finished");
        self.selected.clear();
        self.close();
        imported
    }

    // === Delete ===

    /// Delete every selected file, one call per name, all in parallel.
    /// Destructive and irreversible, so the caller must pass the user's
    /// explicit confirmation; without it nothing is issued. Waits for all
    /// deletes to settle, reports the count, and re-fetches the listing
    /// regardless of outcome.
    pub async fn delete_selected(&mut self, confirmed: bool) -> DeleteOutcome {
        if !confirmed {
            debug!("delete not confirmed, nothing issued");
            return DeleteOutcome::Cancelled;
        }
        if self.selected.is_empty() {
            return DeleteOutcome::Cancelled;
        }

        let names = self.selected.clone();
        let requested = names.len();
        let results = join_all(names.iter().map(|name| self.backend.delete_file(name))).await;
        let succeeded = results.iter().filter(|r| r.is_ok()).count();

        for (name, result) in names.iter().zip(&results) {
            if let Err(err) = result {
                warn!(name = %name, error = %err, "delete failed");
            }
        }

        let text = format!("Deleted {} of {} file(s).", succeeded, requested);
        if succeeded == requested {
            info!(requested, "all deletes succeeded");
            self.notices.raise(Notice::info(text));
        } else {
            self.notices.raise(Notice::error(text));
        }

        self.selected.clear();
        let query = self.search_query.clone();
        self.refresh(&query).await;

        DeleteOutcome::Completed(DeleteReport {
            requested,
            succeeded,
        })
    }
}
