//! In-process directory with scripted answers, for tests, benches and demos.
//!
//! Answers are keyed by the exact filter string a search arrives with.
//! Filters without a scripted answer find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::{Connector, DirectoryClient, DirectoryEntry, SearchFuture, SearchInput};
use crate::error::{DictError, Result};
use crate::settings::ClientSettings;

#[derive(Debug, Clone)]
enum Answer {
    Entries(Vec<DirectoryEntry>),
    Failure(String),
}

#[derive(Debug, Clone)]
struct Scripted {
    answer: Answer,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    answers: HashMap<String, Scripted>,
    searches: Vec<SearchInput>,
    closed: bool,
}

/// Cloning shares the script, the search log and the closed flag.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script(&self, filter: &str, answer: Answer, latency: Option<Duration>) -> &Self {
        self.state()
            .answers
            .insert(filter.to_string(), Scripted { answer, latency });
        self
    }

    pub fn respond(&self, filter: &str, entries: Vec<DirectoryEntry>) -> &Self {
        self.script(filter, Answer::Entries(entries), None)
    }

    /// Like [`respond`](Self::respond), but the answer arrives after `latency`.
    pub fn respond_after(&self, filter: &str, latency: Duration, entries: Vec<DirectoryEntry>) -> &Self {
        self.script(filter, Answer::Entries(entries), Some(latency))
    }

    pub fn fail(&self, filter: &str, message: &str) -> &Self {
        self.script(filter, Answer::Failure(message.to_string()), None)
    }

    /// Every search received so far, in arrival order.
    pub fn searches(&self) -> Vec<SearchInput> {
        self.state().searches.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl DirectoryClient for MemoryDirectory {
    fn search(&self, input: SearchInput) -> SearchFuture {
        let scripted = {
            let mut state = self.state();
            if state.closed {
                return Box::pin(async { Err(DictError::Directory("connection closed".into())) });
            }
            state.searches.push(input.clone());
            state.answers.get(&input.filter).cloned()
        };
        debug!(filter = %input.filter, scripted = scripted.is_some(), "memory directory search");
        Box::pin(async move {
            let Some(Scripted { answer, latency }) = scripted else {
                return Ok(Vec::new());
            };
            if let Some(latency) = latency {
                tokio::time::timeout(input.timeout, tokio::time::sleep(latency))
                    .await
                    .map_err(|_| DictError::Directory(format!("search timed out after {:?}", input.timeout)))?;
            }
            match answer {
                Answer::Entries(entries) => Ok(entries),
                Answer::Failure(message) => Err(DictError::Directory(message)),
            }
        })
    }

    fn close(&self) {
        self.state().closed = true;
    }
}

/// Hands out one [`MemoryDirectory`] per URI and counts connects.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    directories: Arc<Mutex<HashMap<String, MemoryDirectory>>>,
    connects: Arc<Mutex<usize>>,
    refuse: Arc<Mutex<Option<String>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory that clients connecting to `uri` talk to.
    pub fn directory(&self, uri: &str) -> MemoryDirectory {
        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(uri.to_string())
            .or_default()
            .clone()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following connect fail with `message`.
    pub fn refuse_connections(&self, message: &str) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, settings: &ClientSettings) -> Result<Arc<dyn DirectoryClient>> {
        if let Some(message) = self.refuse.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(DictError::Connect(message));
        }
        *self.connects.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(Arc::new(self.directory(&settings.uri)))
    }
}
