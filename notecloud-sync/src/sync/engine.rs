use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::backend::{BackendError, SyncBackend};
use crate::model::{Note, RemoteDocument, Settings, SettingsGroup};
use crate::store::{self, LocalStore, StoreError};
use crate::sync::debounce::{DEFAULT_DEBOUNCE_WINDOW, Debounce};
use crate::sync::externalize::externalize_attachments;
use crate::sync::merge::merge_notes;
use crate::sync::partition;

pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub debounce_window: Duration,
    pub gate_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            gate_timeout: DEFAULT_GATE_TIMEOUT,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            debounce_window: Duration::from_millis(read_u64_env("NOTECLOUD_DEBOUNCE_MS", 3_000)),
            gate_timeout: Duration::from_millis(read_u64_env("NOTECLOUD_GATE_TIMEOUT_MS", 5_000)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    CheckingGates,
    Uploading,
    Downloading,
    Disabled,
}

/// A failed gate is a silent no-op, never an error surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    CloudSyncOff,
    PortableDeployment,
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Passive sync (debounced upload, startup download): failures are
    /// logged and swallowed.
    Background,
    /// Explicit user action ("sync now", login): failures reach the caller
    /// and an empty remote document bootstraps from local state.
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Completed,
    SkippedGate(Gate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Merged {
        notes_merged: bool,
        language_changed: Option<String>,
    },
    /// The remote document was absent or empty and local state was pushed up
    /// instead (first sync for this account).
    Bootstrapped,
    NoRemoteData,
    SkippedGate(Gate),
}

/// Orchestrates when uploads and downloads run: gate checks, debounced
/// uploads after local mutations, download-then-merge at startup/login.
pub struct SyncEngine<B, S> {
    backend: B,
    store: S,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl<B, S> SyncEngine<B, S>
where
    B: SyncBackend,
    S: LocalStore,
{
    pub fn new(backend: B, store: S) -> Self {
        Self::with_config(backend, store, SyncConfig::default())
    }

    pub fn with_config(backend: B, store: S, config: SyncConfig) -> Self {
        Self {
            backend,
            store,
            config,
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Uploads local settings and notes into the account's remote document.
    /// Gates short-circuit in order: cloud sync flag, portable deployment,
    /// authentication. No gate failure ever reaches the backend.
    pub async fn push(&self) -> Result<PushOutcome, EngineError> {
        self.set_state(SyncState::CheckingGates);
        let settings = store::load_settings(&self.store)?;
        if let Some(gate) = self.push_gate(&settings).await {
            self.set_state(SyncState::Disabled);
            return Ok(PushOutcome::SkippedGate(gate));
        }

        self.set_state(SyncState::Uploading);
        let result = self.push_inner(&settings).await;
        self.set_state(SyncState::Idle);
        result.map(|_| PushOutcome::Completed)
    }

    async fn push_gate(&self, settings: &Settings) -> Option<Gate> {
        if !settings.cloud_sync_enabled() {
            return Some(Gate::CloudSyncOff);
        }

        // A hung capability check fails the gate instead of blocking sync.
        let portable = timeout(
            self.config.gate_timeout,
            self.backend.is_portable_deployment(),
        )
        .await
        .unwrap_or(true);
        if portable {
            return Some(Gate::PortableDeployment);
        }

        let account = timeout(self.config.gate_timeout, self.backend.account())
            .await
            .ok()
            .flatten();
        match account {
            Some(account) if !account.id.is_empty() => None,
            _ => Some(Gate::NotAuthenticated),
        }
    }

    async fn push_inner(&self, settings: &Settings) -> Result<(), EngineError> {
        // Always merge into a fresh copy of the remote document so fields
        // owned by other features survive the full-document write.
        let loaded = self.backend.load_blob().await?;
        let mut document = parse_document(loaded.data);

        document.settings = Some(partition::filter_for_upload(settings));

        let mut externalized: Option<Vec<Note>> = None;
        if settings.sync_preferences.includes(SettingsGroup::Notes) {
            let notes = store::load_notes(&self.store)?;
            let mut resolved = Vec::with_capacity(notes.len());
            for mut note in notes {
                note.attachments =
                    externalize_attachments(&self.backend, &note.attachments).await;
                resolved.push(note);
            }
            document.notes = Some(resolved.clone());
            externalized = Some(resolved);
        }
        // With note sync disabled the loaded document's notes are left as-is.

        self.backend.save_blob(&document).await?;

        // Attachment URLs become the local truth only once the blob write
        // has succeeded.
        if let Some(notes) = externalized {
            store::save_notes(&self.store, &notes)?;
        }
        Ok(())
    }

    /// Downloads the remote document and merges it into local state. Gated
    /// only on the cloud sync flag.
    pub async fn pull(&self, trigger: Trigger) -> Result<PullOutcome, EngineError> {
        self.set_state(SyncState::CheckingGates);
        let settings = store::load_settings(&self.store)?;
        if !settings.cloud_sync_enabled() {
            self.set_state(SyncState::Disabled);
            return Ok(PullOutcome::SkippedGate(Gate::CloudSyncOff));
        }

        self.set_state(SyncState::Downloading);
        let result = self.pull_inner(&settings, trigger).await;
        self.set_state(SyncState::Idle);
        result
    }

    async fn pull_inner(
        &self,
        settings: &Settings,
        trigger: Trigger,
    ) -> Result<PullOutcome, EngineError> {
        let loaded = self.backend.load_blob().await?;
        let document = parse_document(loaded.data);

        if document.is_empty() {
            return match trigger {
                Trigger::Interactive => {
                    self.push().await?;
                    Ok(PullOutcome::Bootstrapped)
                }
                Trigger::Background => Ok(PullOutcome::NoRemoteData),
            };
        }

        let mut language_changed = None;
        if let Some(remote_settings) = &document.settings {
            let merged = partition::merge_from_download(settings, remote_settings);
            language_changed = merged.language_changed;
            store::save_settings(&self.store, &merged.settings)?;
        }

        // Note sync is gated by the device-local preference, which the
        // settings merge above can never have changed.
        let mut notes_merged = false;
        if settings.sync_preferences.includes(SettingsGroup::Notes)
            && let Some(remote_notes) = &document.notes
        {
            let local_notes = store::load_notes(&self.store)?;
            let merged = merge_notes(&local_notes, remote_notes);
            store::save_notes(&self.store, &merged)?;
            notes_merged = true;
        }

        Ok(PullOutcome::Merged {
            notes_merged,
            language_changed,
        })
    }

    /// Login flow: the full download-merge completes and is applied before
    /// control returns, so no later upload can start from stale local state.
    pub async fn on_login(&self) -> Result<PullOutcome, EngineError> {
        self.pull(Trigger::Interactive).await
    }
}

/// A malformed remote document degrades to "no data"; it never fails a sync.
fn parse_document(data: Option<Value>) -> RemoteDocument {
    match data {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            eprintln!("[notecloud-sync] malformed remote document treated as empty: {err}");
            RemoteDocument::default()
        }),
        None => RemoteDocument::default(),
    }
}

/// Drives debounced background uploads: each mutation signal resets the
/// deadline, and a full window of quiescence fires exactly one push. An
/// already-started push runs to completion; a superseded pending one simply
/// never fires.
pub fn spawn_auto_push<B, S>(
    engine: Arc<SyncEngine<B, S>>,
    mut mutations: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()>
where
    B: SyncBackend + 'static,
    S: LocalStore + 'static,
{
    let window = engine.config.debounce_window;
    tokio::spawn(async move {
        let mut debounce = Debounce::new(window);
        loop {
            let wait = debounce
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                mutated = mutations.recv() => match mutated {
                    Some(()) => debounce.poke(Instant::now()),
                    None => break,
                },
                _ = sleep_maybe(wait) => {
                    if debounce.fire(Instant::now()) {
                        run_background_push(&engine).await;
                    }
                }
            }
        }
        // Flush a still-pending upload when the mutation source shuts down.
        if debounce.is_pending() {
            run_background_push(&engine).await;
        }
    })
}

async fn sleep_maybe(wait: Option<Duration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn run_background_push<B, S>(engine: &SyncEngine<B, S>)
where
    B: SyncBackend,
    S: LocalStore,
{
    if let Err(err) = engine.push().await {
        eprintln!("[notecloud-sync] background push failed: {err}");
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
