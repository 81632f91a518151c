use anyhow::Result;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use sto_audit::JournalWriter;
use uuid::Uuid;

use crate::{CollaboratorError, EventSink, SaleEvent};

/// Writes every event to a hash-chained JSONL journal.
pub struct JournalSink {
    writer: Mutex<JournalWriter>,
}

impl JournalSink {
    pub fn open(path: impl AsRef<Path>, sale_id: Uuid) -> Result<Self> {
        Ok(Self {
            writer: Mutex::new(JournalWriter::open(path, sale_id)?),
        })
    }

    pub fn entries(&self) -> u64 {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl EventSink for JournalSink {
    fn emit(&self, event: &SaleEvent) -> Result<(), CollaboratorError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| CollaboratorError::new("journal", e.to_string()))?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .append(event.kind(), payload)
            .map(|_| ())
            .map_err(|e| CollaboratorError::new("journal", format!("{e:#}")))
    }
}
