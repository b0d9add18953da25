//! The view controller.
//!
//! User interaction arrives as [`Event`] values. Each handler performs its
//! effects (loading forms, touching the queue, syncing) and then moves the
//! [`View`] through [`View::apply`], which is a pure function of the
//! current view and a [`Transition`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::form::{FormDefinition, FormLoader, FormMeta, FormView, Payload};
use crate::notice::Notice;
use crate::queue::{PendingSubmission, SharedQueue, SubmissionQueue};
use crate::session::Session;
use crate::storage::{Storage, LAST_ACTIVE_FORM_KEY};
use crate::sync::SyncEngine;

/// Which screen is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    /// Nothing selected yet.
    Welcome,
    /// A form, blank or pre-filled from a queued record.
    Form {
        /// Catalog key of the form.
        form_key: String,
        /// Id of the queued record being edited.
        editing: Option<String>,
    },
    /// The list of queued records.
    PendingList,
}

/// A completed step that moves the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A form was opened, optionally for editing a record.
    OpenForm {
        /// Catalog key.
        form_key: String,
        /// Record being edited.
        editing: Option<String>,
    },
    /// The pending list was requested, or an edit was abandoned.
    ShowPending,
    /// The open form was saved or submitted.
    Saved,
}

impl View {
    /// The view that follows `transition`.
    #[must_use]
    pub fn apply(&self, transition: &Transition) -> Self {
        match (self, transition) {
            (_, Transition::OpenForm { form_key, editing }) => Self::Form {
                form_key: form_key.clone(),
                editing: editing.clone(),
            },
            (_, Transition::ShowPending)
            | (
                Self::Form {
                    editing: Some(_), ..
                },
                Transition::Saved,
            ) => Self::PendingList,
            (
                Self::Form {
                    form_key,
                    editing: None,
                },
                Transition::Saved,
            ) => Self::Form {
                form_key: form_key.clone(),
                editing: None,
            },
            (Self::Welcome | Self::PendingList, Transition::Saved) => self.clone(),
        }
    }

    /// Id of the record being edited, if any.
    #[must_use]
    pub fn editing(&self) -> Option<&str> {
        match self {
            Self::Form { editing, .. } => editing.as_deref(),
            _ => None,
        }
    }
}

/// Something the user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Open a form from the catalog.
    Navigate(String),
    /// Submit the open form.
    Submit {
        /// Raw input keyed by field name.
        values: HashMap<String, String>,
        /// Keep the record locally even when online.
        save_offline: bool,
    },
    /// Open a queued record for editing.
    Edit(String),
    /// Delete a queued record; nothing happens unless confirmed.
    Delete {
        /// Record id.
        id: String,
        /// Whether the user confirmed.
        confirmed: bool,
    },
    /// Leave edit mode.
    CancelEdit,
    /// Show the queued records.
    ViewPending,
    /// Sync every queued record.
    SyncAll,
    /// Connectivity changed; `true` means online.
    ConnectivityChanged(bool),
}

/// One line of the pending list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingItem {
    /// Record id.
    pub id: String,
    /// Form title, or the form id when blank.
    pub title: String,
    /// First payload value, or the id.
    pub label: String,
    /// When the record was saved.
    pub saved_at: DateTime<Utc>,
}

impl PendingItem {
    fn from_record(record: &PendingSubmission) -> Self {
        Self {
            id: record.id.clone(),
            title: record.display_title().to_string(),
            label: record.display_label(),
            saved_at: record.submitted_at,
        }
    }

    /// Save time in the local time zone.
    #[must_use]
    pub fn saved_local(&self) -> String {
        self.saved_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

/// The pending list screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingList {
    /// `Pending Offline Submissions (<n>)`.
    pub heading: String,
    /// Queued records in order.
    pub items: Vec<PendingItem>,
}

#[derive(Debug)]
struct OpenForm {
    definition: FormDefinition,
    meta: FormMeta,
    view: FormView,
}

/// Routes events to the loader, queue and sync engine.
#[derive(Debug)]
pub struct Controller {
    loader: FormLoader,
    sync: SyncEngine,
    store: Arc<Storage>,
    session: Session,
    queue: SharedQueue,
    online: bool,
    view: View,
    form: Option<OpenForm>,
    notices: Vec<Notice>,
}

impl Controller {
    /// Create a controller over an opened store.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be loaded.
    pub fn new(
        loader: FormLoader,
        sync: SyncEngine,
        store: Arc<Storage>,
        online: bool,
    ) -> Result<Self> {
        let queue = SubmissionQueue::load(Arc::clone(&store))?.into_shared();
        Ok(Self {
            loader,
            sync,
            session: Session::new(Arc::clone(&store)),
            store,
            queue,
            online,
            view: View::Welcome,
            form: None,
            notices: Vec::new(),
        })
    }

    /// Create a controller from configuration, opening the database it names.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the queue loaded.
    pub fn from_config(config: &Config, online: bool) -> Result<Self> {
        let store = Arc::new(Storage::open(config.database_path())?);
        Self::new(
            FormLoader::from_config(config),
            SyncEngine::from_config(config),
            store,
            online,
        )
    }

    /// Reopen the last active form if it is still in the catalog.
    ///
    /// Returns the notices produced while loading it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn startup(&mut self) -> Result<Vec<Notice>> {
        let Some(key) = self.store.get(LAST_ACTIVE_FORM_KEY)? else {
            return Ok(Vec::new());
        };
        if self.loader.entry(&key).is_some() {
            info!("Restoring last active form '{}'", key);
            self.open_form(&key, None).await?;
        } else {
            debug!("Last active form '{}' is no longer in the catalog", key);
        }
        Ok(self.take_notices())
    }

    /// Handle one event and return the notices it produced.
    ///
    /// # Errors
    ///
    /// Returns an error only if local storage fails. Network and server
    /// problems are reported as notices.
    pub async fn handle(&mut self, event: Event) -> Result<Vec<Notice>> {
        debug!("Handling {:?}", event);
        match event {
            Event::Navigate(key) => {
                if self.open_form(&key, None).await? {
                    self.store.set(LAST_ACTIVE_FORM_KEY, &key)?;
                }
            }
            Event::Submit {
                values,
                save_offline,
            } => self.submit(&values, save_offline).await?,
            Event::Edit(id) => self.edit(&id).await?,
            Event::Delete { id, confirmed } => self.delete(&id, confirmed)?,
            Event::CancelEdit | Event::ViewPending => self.show_pending(),
            Event::SyncAll => {
                let report = self.sync.sync_all(&self.queue, self.online, true).await;
                self.notices.extend(report.notices);
            }
            Event::ConnectivityChanged(online) => {
                let came_online = online && !self.online;
                self.online = online;
                if came_online {
                    info!("Back online; syncing pending submissions");
                    let report = self.sync.sync_all(&self.queue, true, false).await;
                    self.notices.extend(report.notices);
                }
            }
        }
        Ok(self.take_notices())
    }

    /// The current view.
    #[must_use]
    pub fn view(&self) -> &View {
        &self.view
    }

    /// The rendered form, when a form is showing.
    #[must_use]
    pub fn form(&self) -> Option<&FormView> {
        self.form.as_ref().map(|open| &open.view)
    }

    /// Whether the controller believes it is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// The shared queue.
    #[must_use]
    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Number of queued records.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().count()
    }

    /// The pending list as it stands now.
    #[must_use]
    pub fn pending_list(&self) -> PendingList {
        let queue = self.queue.lock();
        PendingList {
            heading: format!("Pending Offline Submissions ({})", queue.count()),
            items: queue.records().iter().map(PendingItem::from_record).collect(),
        }
    }

    /// The form loader.
    #[must_use]
    pub fn loader(&self) -> &FormLoader {
        &self.loader
    }

    /// The local key-value store.
    #[must_use]
    pub fn store(&self) -> &Storage {
        &self.store
    }

    /// The session store.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The sync engine.
    #[must_use]
    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn transition(&mut self, transition: &Transition) {
        let next = self.view.apply(transition);
        debug!("View {:?} -> {:?}", self.view, next);
        if !matches!(next, View::Form { .. }) {
            self.form = None;
        }
        self.view = next;
    }

    /// Load and render a form. Returns `false` if it could not be loaded.
    async fn open_form(&mut self, key: &str, editing: Option<&PendingSubmission>) -> Result<bool> {
        let definition = match self.loader.load(key).await {
            Ok(definition) => definition,
            Err(Error::FormNotFound { .. }) => {
                self.notices.push(Notice::error(format!(
                    "Form definition for '{key}' not found in config."
                )));
                return Ok(false);
            }
            Err(e) if matches!(e, Error::FormFetch { .. } | Error::FormParse { .. }) => {
                let title = self.loader.entry(key).map_or(key, |entry| entry.title.as_str());
                self.notices
                    .push(Notice::error(format!("Error loading form '{title}': {e}")));
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let fallback_sheet = self
            .loader
            .entry(key)
            .map(|entry| entry.sheet_name.as_str())
            .filter(|sheet| !sheet.is_empty());
        let meta = definition.meta(fallback_sheet);

        let ctx = self
            .session
            .render_context(&definition, Local::now().naive_local())?;
        let view = FormView::render(&definition, editing.map(|record| &record.payload), &ctx);

        self.form = Some(OpenForm {
            definition,
            meta,
            view,
        });
        self.transition(&Transition::OpenForm {
            form_key: key.to_string(),
            editing: editing.map(|record| record.id.clone()),
        });
        Ok(true)
    }

    async fn submit(&mut self, values: &HashMap<String, String>, save_offline: bool) -> Result<()> {
        let View::Form { form_key, editing } = self.view.clone() else {
            self.notices.push(Notice::warning("No form is open."));
            return Ok(());
        };
        let Some(open) = self.form.as_ref() else {
            return Err(Error::internal("form view without a rendered form"));
        };

        let payload: Payload = match open.view.collect(values) {
            Ok(payload) => payload,
            Err(e) if e.is_validation() => {
                warn!("Rejected submission: {}", e);
                self.notices
                    .push(Notice::warning("Please fill all required fields correctly."));
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let meta = open.meta.clone();
        let title = open.definition.title.clone();

        if save_offline || !self.online {
            {
                let mut queue = self.queue.lock();
                match &editing {
                    Some(id) => queue.update(id, payload, &meta)?,
                    None => {
                        queue.append(payload, &meta)?;
                    }
                }
            }
            self.notices.push(Notice::info(format!(
                "'{title}' data saved locally. Sync when online."
            )));
        } else {
            let record = match &editing {
                Some(id) => {
                    // Persist the edit first so a failed sync cannot revert it.
                    self.queue.lock().update(id, payload.clone(), &meta)?;
                    PendingSubmission::with_id(id.clone(), payload, &meta)
                }
                None => PendingSubmission::new(payload, &meta),
            };
            let report = self
                .sync
                .submit_batch(&self.queue, self.online, vec![record])
                .await;
            self.notices.extend(report.notices);
        }

        if editing.is_some() {
            self.transition(&Transition::Saved);
        } else {
            // Re-render blank so ids and auto-populated values are fresh.
            self.open_form(&form_key, None).await?;
        }
        Ok(())
    }

    async fn edit(&mut self, id: &str) -> Result<()> {
        let Some(record) = self.queue.lock().get(id).cloned() else {
            self.notices
                .push(Notice::warning(format!("Pending submission '{id}' not found.")));
            return Ok(());
        };

        let Some(key) = self
            .loader
            .entry_for_submission(&record.form_id, &record.form_title)
            .map(|entry| entry.key.clone())
        else {
            self.notices.push(Notice::error(format!(
                "Cannot edit: Form definition for '{}' not found.",
                record.display_title()
            )));
            return Ok(());
        };

        self.open_form(&key, Some(&record)).await?;
        Ok(())
    }

    fn delete(&mut self, id: &str, confirmed: bool) -> Result<()> {
        if !confirmed {
            debug!("Delete of {} not confirmed", id);
            return Ok(());
        }
        let removed = self
            .queue
            .lock()
            .remove(&std::iter::once(id.to_string()).collect())?;
        if removed == 0 {
            warn!("Delete requested for unknown submission {}", id);
            self.notices
                .push(Notice::warning(format!("Pending submission '{id}' not found.")));
        } else {
            self.notices.push(Notice::info("Submission deleted locally."));
        }
        self.show_pending();
        Ok(())
    }

    fn show_pending(&mut self) {
        self.transition(&Transition::ShowPending);
    }
}
