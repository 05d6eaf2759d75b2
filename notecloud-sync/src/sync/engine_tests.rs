use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use notecloud_core::CloudError;
use serde_json::{Map, Value, json};

use super::*;
use crate::backend::{AccountInfo, BlobLoad};
use crate::model::{Attachment, AttachmentKind, Stamp, SyncPreferences};
use crate::sync::externalize::INLINE_UPLOAD_THRESHOLD;

#[derive(Clone, Default)]
struct MockBackend {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    account: StdMutex<Option<AccountInfo>>,
    portable: AtomicBool,
    hang_portable_check: AtomicBool,
    blob: StdMutex<Option<Value>>,
    saved: StdMutex<Vec<RemoteDocument>>,
    save_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    fail_save: AtomicBool,
    fail_uploads: StdMutex<HashSet<String>>,
}

impl MockBackend {
    fn authenticated() -> Self {
        let backend = Self::default();
        *backend.inner.account.lock().unwrap() = Some(AccountInfo {
            id: "acct-1".into(),
        });
        backend
    }

    fn set_blob(&self, value: Value) {
        *self.inner.blob.lock().unwrap() = Some(value);
    }

    fn last_saved(&self) -> RemoteDocument {
        self.inner.saved.lock().unwrap().last().cloned().unwrap()
    }

    fn save_calls(&self) -> usize {
        self.inner.save_calls.load(Ordering::SeqCst)
    }

    fn upload_calls(&self) -> usize {
        self.inner.upload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for MockBackend {
    async fn account(&self) -> Option<AccountInfo> {
        self.inner.account.lock().unwrap().clone()
    }

    async fn is_portable_deployment(&self) -> bool {
        if self.inner.hang_portable_check.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.portable.load(Ordering::SeqCst)
    }

    async fn load_blob(&self) -> Result<BlobLoad, BackendError> {
        Ok(BlobLoad {
            data: self.inner.blob.lock().unwrap().clone(),
        })
    }

    async fn save_blob(&self, document: &RemoteDocument) -> Result<(), BackendError> {
        self.inner.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_save.load(Ordering::SeqCst) {
            return Err(BackendError::Cloud(CloudError::Rejected {
                message: "save refused".into(),
            }));
        }
        let value = serde_json::to_value(document)?;
        *self.inner.blob.lock().unwrap() = Some(value);
        self.inner.saved.lock().unwrap().push(document.clone());
        Ok(())
    }

    async fn upload_file(&self, _content: Vec<u8>, filename: &str) -> Result<String, BackendError> {
        self.inner.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_uploads.lock().unwrap().contains(filename) {
            return Err(BackendError::Cloud(CloudError::Rejected {
                message: "upload refused".into(),
            }));
        }
        Ok(format!("https://files.example/{filename}"))
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    entries: Arc<StdMutex<Map<String, Value>>>,
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

fn settings_with(cloud_sync: bool, prefs: SyncPreferences) -> Settings {
    Settings {
        cloud_sync: Some(cloud_sync),
        sync_preferences: prefs,
        ..Settings::default()
    }
}

fn note(id: &str, title: &str, stamp_ms: i64) -> Note {
    Note {
        id: id.to_string(),
        title: title.to_string(),
        content: String::new(),
        attachments: Vec::new(),
        updated_at: Some(Stamp::Millis(stamp_ms)),
    }
}

fn seeded(
    backend: MockBackend,
    settings: &Settings,
    notes: &[Note],
) -> SyncEngine<MockBackend, MemoryStore> {
    let local = MemoryStore::default();
    store::save_settings(&local, settings).unwrap();
    store::save_notes(&local, notes).unwrap();
    SyncEngine::new(backend, local)
}

#[tokio::test]
async fn push_with_cloud_sync_off_touches_nothing() {
    let backend = MockBackend::authenticated();
    let engine = seeded(
        backend.clone(),
        &settings_with(false, SyncPreferences::default()),
        &[note("1", "a", 100)],
    );

    let outcome = engine.push().await.unwrap();

    assert_eq!(outcome, PushOutcome::SkippedGate(Gate::CloudSyncOff));
    assert_eq!(backend.save_calls(), 0);
    assert_eq!(backend.upload_calls(), 0);
    assert_eq!(engine.state(), SyncState::Disabled);
}

#[tokio::test]
async fn push_is_skipped_on_portable_deployments() {
    let backend = MockBackend::authenticated();
    backend.inner.portable.store(true, Ordering::SeqCst);
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[],
    );

    let outcome = engine.push().await.unwrap();

    assert_eq!(outcome, PushOutcome::SkippedGate(Gate::PortableDeployment));
    assert_eq!(backend.save_calls(), 0);
}

#[tokio::test]
async fn push_is_skipped_without_an_account() {
    let backend = MockBackend::default(); // no account
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[],
    );

    let outcome = engine.push().await.unwrap();

    assert_eq!(outcome, PushOutcome::SkippedGate(Gate::NotAuthenticated));
    assert_eq!(backend.save_calls(), 0);
}

#[tokio::test]
async fn hung_capability_check_fails_the_gate_instead_of_blocking() {
    let backend = MockBackend::authenticated();
    backend.inner.hang_portable_check.store(true, Ordering::SeqCst);
    let local = MemoryStore::default();
    store::save_settings(&local, &settings_with(true, SyncPreferences::default())).unwrap();
    let engine = SyncEngine::with_config(
        backend.clone(),
        local,
        SyncConfig {
            gate_timeout: Duration::from_millis(50),
            ..SyncConfig::default()
        },
    );

    let outcome = engine.push().await.unwrap();

    assert_eq!(outcome, PushOutcome::SkippedGate(Gate::PortableDeployment));
    assert_eq!(backend.save_calls(), 0);
}

#[tokio::test]
async fn push_writes_filtered_settings_and_preserves_foreign_fields() {
    let backend = MockBackend::authenticated();
    backend.set_blob(json!({
        "profile": { "name": "someone" },
        "trialStarted": true
    }));
    let mut settings = settings_with(
        true,
        SyncPreferences {
            ai: Some(false),
            ..SyncPreferences::default()
        },
    );
    settings.ai_api_key = Some("secret".into());
    settings.theme = Some("dark".into());
    settings.audio_input_id = Some("mic-7".into());
    let engine = seeded(backend.clone(), &settings, &[note("1", "a", 100)]);

    engine.push().await.unwrap();

    let saved = backend.last_saved();
    let saved_settings = saved.settings.unwrap();
    assert!(saved_settings.ai_api_key.is_none());
    assert!(saved_settings.audio_input_id.is_none());
    assert_eq!(saved_settings.theme.as_deref(), Some("dark"));
    // fields this engine does not own survive the full-document write
    assert_eq!(saved.extra["profile"]["name"], "someone");
    assert_eq!(saved.extra["trialStarted"], true);
    assert_eq!(saved.notes.unwrap()[0].id, "1");
}

#[tokio::test]
async fn push_externalizes_attachments_and_persists_urls_locally() {
    let backend = MockBackend::authenticated();
    let mut local_note = note("1", "with attachment", 100);
    local_note.attachments.push(Attachment {
        id: "a1".into(),
        kind: AttachmentKind::Pdf,
        data: format!(
            "data:application/pdf;base64,{}",
            "A".repeat(INLINE_UPLOAD_THRESHOLD)
        ),
        name: "report".into(),
        mime_type: "application/pdf".into(),
        width: None,
        sync_error: None,
    });
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[local_note],
    );

    engine.push().await.unwrap();

    assert_eq!(backend.upload_calls(), 1);
    let saved_notes = backend.last_saved().notes.unwrap();
    assert_eq!(saved_notes[0].attachments[0].data, "https://files.example/report.pdf");

    // the externalized URL became the local truth as well
    let stored = store::load_notes(&engine.store).unwrap();
    assert_eq!(stored[0].attachments[0].data, "https://files.example/report.pdf");
}

#[tokio::test]
async fn failed_save_keeps_local_attachments_unexternalized() {
    let backend = MockBackend::authenticated();
    backend.inner.fail_save.store(true, Ordering::SeqCst);
    let uri = format!(
        "data:application/pdf;base64,{}",
        "A".repeat(INLINE_UPLOAD_THRESHOLD)
    );
    let mut local_note = note("1", "a", 100);
    local_note.attachments.push(Attachment {
        id: "a1".into(),
        kind: AttachmentKind::Pdf,
        data: uri.clone(),
        name: "report".into(),
        mime_type: "application/pdf".into(),
        width: None,
        sync_error: None,
    });
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[local_note],
    );

    assert!(engine.push().await.is_err());

    // the blob write failed, so local notes were not rewritten
    let stored = store::load_notes(&engine.store).unwrap();
    assert_eq!(stored[0].attachments[0].data, uri);
}

#[tokio::test]
async fn push_with_notes_disabled_leaves_remote_notes_alone() {
    let backend = MockBackend::authenticated();
    backend.set_blob(json!({
        "notes": [{ "id": "other-device", "title": "keep", "content": "" }]
    }));
    let engine = seeded(
        backend.clone(),
        &settings_with(
            true,
            SyncPreferences {
                notes: Some(false),
                ..SyncPreferences::default()
            },
        ),
        &[note("local-only", "mine", 100)],
    );

    engine.push().await.unwrap();

    assert_eq!(backend.upload_calls(), 0);
    let saved = backend.last_saved();
    // local notes were not attached; the loaded document's notes survived
    let saved_notes = saved.notes.unwrap();
    assert_eq!(saved_notes.len(), 1);
    assert_eq!(saved_notes[0].id, "other-device");
}

#[tokio::test]
async fn pull_merges_notes_and_settings() {
    let backend = MockBackend::authenticated();
    backend.set_blob(json!({
        "settings": {
            "theme": "light",
            "language": "fr",
            "syncPreferences": { "ai": true, "notes": false }
        },
        "notes": [
            { "id": "1", "title": "remote", "content": "", "updatedAt": 200 },
            { "id": "2", "title": "new here", "content": "", "updatedAt": 50 }
        ]
    }));
    let mut settings = settings_with(true, SyncPreferences::default());
    settings.theme = Some("dark".into());
    settings.language = Some("en".into());
    let engine = seeded(backend.clone(), &settings, &[note("1", "local", 100)]);

    let outcome = engine.pull(Trigger::Background).await.unwrap();

    assert_eq!(
        outcome,
        PullOutcome::Merged {
            notes_merged: true,
            language_changed: Some("fr".into()),
        }
    );

    let merged_settings = store::load_settings(&engine.store).unwrap();
    assert_eq!(merged_settings.theme.as_deref(), Some("light"));
    // remote can never dictate this device's sync policy
    assert_eq!(merged_settings.sync_preferences, SyncPreferences::default());

    let merged_notes = store::load_notes(&engine.store).unwrap();
    assert_eq!(merged_notes.len(), 2);
    assert_eq!(merged_notes[0].title, "remote");
    assert_eq!(merged_notes[1].id, "2");
}

#[tokio::test]
async fn pull_with_notes_disabled_keeps_local_notes() {
    let backend = MockBackend::authenticated();
    backend.set_blob(json!({
        "settings": { "theme": "light" },
        "notes": [{ "id": "9", "title": "remote", "content": "" }]
    }));
    let engine = seeded(
        backend.clone(),
        &settings_with(
            true,
            SyncPreferences {
                notes: Some(false),
                ..SyncPreferences::default()
            },
        ),
        &[note("1", "local", 100)],
    );

    let outcome = engine.pull(Trigger::Background).await.unwrap();

    assert_eq!(
        outcome,
        PullOutcome::Merged {
            notes_merged: false,
            language_changed: None,
        }
    );
    let notes = store::load_notes(&engine.store).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, "1");
}

#[tokio::test]
async fn interactive_pull_of_empty_account_bootstraps_from_local_state() {
    let backend = MockBackend::authenticated();
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[note("1", "seed", 100)],
    );

    let outcome = engine.on_login().await.unwrap();

    assert_eq!(outcome, PullOutcome::Bootstrapped);
    assert_eq!(backend.save_calls(), 1);
    assert_eq!(backend.last_saved().notes.unwrap()[0].title, "seed");
}

#[tokio::test]
async fn background_pull_of_empty_account_is_a_no_op() {
    let backend = MockBackend::authenticated();
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[note("1", "seed", 100)],
    );

    let outcome = engine.pull(Trigger::Background).await.unwrap();

    assert_eq!(outcome, PullOutcome::NoRemoteData);
    assert_eq!(backend.save_calls(), 0);
}

#[tokio::test]
async fn malformed_remote_document_degrades_to_no_data() {
    let backend = MockBackend::authenticated();
    backend.set_blob(json!("not an object"));
    let engine = seeded(
        backend.clone(),
        &settings_with(true, SyncPreferences::default()),
        &[note("1", "local", 100)],
    );

    let outcome = engine.pull(Trigger::Background).await.unwrap();

    assert_eq!(outcome, PullOutcome::NoRemoteData);
    // local state untouched
    assert_eq!(store::load_notes(&engine.store).unwrap()[0].title, "local");
}

#[tokio::test]
async fn rapid_mutations_collapse_into_one_push() {
    let backend = MockBackend::authenticated();
    let engine = Arc::new(SyncEngine::with_config(
        backend.clone(),
        {
            let local = MemoryStore::default();
            store::save_settings(&local, &settings_with(true, SyncPreferences::default()))
                .unwrap();
            store::save_notes(&local, &[note("1", "a", 100)]).unwrap();
            local
        },
        SyncConfig {
            debounce_window: Duration::from_millis(100),
            ..SyncConfig::default()
        },
    ));

    let (mutations_tx, mutations_rx) = mpsc::unbounded_channel();
    let handle = spawn_auto_push(Arc::clone(&engine), mutations_rx);

    for _ in 0..5 {
        mutations_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(backend.save_calls(), 1);

    drop(mutations_tx);
    handle.await.unwrap();
    // no pending upload was left behind
    assert_eq!(backend.save_calls(), 1);
}
