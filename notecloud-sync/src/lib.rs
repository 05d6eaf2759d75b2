pub mod backend;
pub mod model;
pub mod store;
pub mod sync;

pub use backend::{AccountInfo, BackendError, BlobLoad, CloudSession, SyncBackend};
pub use model::{
    Attachment, AttachmentKind, Note, RemoteDocument, Settings, SettingsGroup, Stamp,
    SyncPreferences,
};
pub use store::{JsonFileStore, LocalStore, StoreError};
pub use sync::engine::{
    EngineError, Gate, PullOutcome, PushOutcome, SyncConfig, SyncEngine, SyncState, Trigger,
    spawn_auto_push,
};
