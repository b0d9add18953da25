//! `fieldsync` - An offline-first form collection client
//!
//! This library renders forms from JSON definitions, keeps submissions in a
//! durable local queue while offline, and syncs them in batches to a remote
//! endpoint, reconciling the queue with per-record results.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod form;
pub mod id;
pub mod logging;
pub mod notice;
pub mod queue;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use controller::{Controller, Event, PendingItem, PendingList, Transition, View};
pub use error::{Error, Result};
pub use form::{FormDefinition, FormLoader, FormView, Payload};
pub use logging::init_logging;
pub use notice::{Notice, NoticeLevel};
pub use queue::{PendingSubmission, SharedQueue, SubmissionQueue};
pub use session::{Session, SessionInfo};
pub use storage::{Storage, StorageStats};
pub use sync::{HttpTransport, SyncEngine, SyncReport, Transport, TransportResponse};
