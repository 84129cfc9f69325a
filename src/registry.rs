//! In-flight request registry: cancellation and callback rebinding by
//! identity + owner token, from any thread.
//!
//! The worker owns each request value; the registry holds only the shared
//! pieces (cancel token, completion slot), so a higher-level component being
//! torn down can cancel exactly its own outstanding fetches without keeping
//! a reference to any request.

use crate::request::{CancelToken, CompletionFn, CompletionSlot, DownloadRequest, OwnerToken, RequestId};
use std::sync::Mutex;

struct Entry {
    id: RequestId,
    owner: OwnerToken,
    cancel: CancelToken,
    completion: CompletionSlot,
}

/// Registry of requests between submission and completion, under one lock.
#[derive(Default)]
pub struct RequestRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `request`. Idempotent: a second insert of the same id is a
    /// no-op.
    pub fn insert(&self, request: &DownloadRequest) {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.id == request.id()) {
            return;
        }
        entries.push(Entry {
            id: request.id(),
            owner: request.owner,
            cancel: request.cancel_token(),
            completion: request.completion_slot(),
        });
    }

    /// Deregisters a completed request.
    pub fn remove(&self, id: RequestId) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.id != id);
    }

    /// Cancels the request matching both `id` and `owner`. Returns whether a
    /// match was found.
    pub fn cancel(&self, id: RequestId, owner: OwnerToken) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.iter().find(|e| e.id == id && e.owner == owner) {
            Some(e) => {
                e.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight request, regardless of owner.
    pub fn cancel_all(&self) {
        let entries = self.entries.lock().unwrap();
        for e in entries.iter() {
            e.cancel.cancel();
        }
    }

    /// Rebinds the completion callback of the request matching `id` and
    /// `owner`. Returns whether a match was found.
    pub fn set_completion(&self, id: RequestId, owner: OwnerToken, f: CompletionFn) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.iter().find(|e| e.id == id && e.owner == owner) {
            Some(e) => {
                e.completion.replace(Some(f));
                true
            }
            None => false,
        }
    }

    /// Cancellation status of the request matching `id` and `owner`; false
    /// when no such request is in flight.
    pub fn is_canceled(&self, id: RequestId, owner: OwnerToken) -> bool {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.id == id && e.owner == owner)
            .map(|e| e.cancel.is_canceled())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
