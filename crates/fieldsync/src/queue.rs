//! The pending submission queue.
//!
//! Records that have not been confirmed by the remote endpoint live here,
//! persisted as one JSON array under [`PENDING_SUBMISSIONS_KEY`]. Every
//! mutation writes the whole array before the in-memory copy changes, so a
//! reload always reflects the last completed mutation.
//!
//! Ids are unique within the queue. `append` mints fresh ids, `update`
//! replaces in place, and `ensure_present` only inserts absent ids.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::form::{FormMeta, Payload};
use crate::id;
use crate::storage::{Storage, PENDING_SUBMISSIONS_KEY};

/// Key that receives an unreadable queue value before it is replaced.
const CORRUPT_BACKUP_KEY: &str = "pendingSubmissions.corrupt";

/// A record waiting to be synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    /// Queue-unique identifier.
    pub id: String,
    /// Form the record belongs to.
    pub form_id: String,
    /// Form title at the time of saving.
    #[serde(default)]
    pub form_title: String,
    /// Remote sheet name.
    #[serde(default)]
    pub sheet_name: String,
    /// Field values.
    pub payload: Payload,
    /// When the record was last saved.
    pub submitted_at: DateTime<Utc>,
}

impl PendingSubmission {
    /// Create a record with a freshly generated id.
    #[must_use]
    pub fn new(payload: Payload, meta: &FormMeta) -> Self {
        Self::with_id(id::submission_id(), payload, meta)
    }

    /// Create a record with a known id, stamped now.
    #[must_use]
    pub fn with_id(id: impl Into<String>, payload: Payload, meta: &FormMeta) -> Self {
        Self {
            id: id.into(),
            form_id: meta.form_id.clone(),
            form_title: meta.form_title.clone(),
            sheet_name: meta.sheet_name.clone(),
            payload,
            submitted_at: Utc::now(),
        }
    }

    /// Title shown in lists: the form title, or the form id if it was blank.
    #[must_use]
    pub fn display_title(&self) -> &str {
        if self.form_title.is_empty() {
            &self.form_id
        } else {
            &self.form_title
        }
    }

    /// Short label: the first payload value, or the id when that is empty.
    #[must_use]
    pub fn display_label(&self) -> String {
        self.payload
            .values()
            .next()
            .and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::String(_) | serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Queue handle shared between the controller and in-flight syncs.
///
/// Never hold the lock across an `.await`.
pub type SharedQueue = Arc<Mutex<SubmissionQueue>>;

/// Repository of pending submissions backed by the key-value store.
#[derive(Debug)]
pub struct SubmissionQueue {
    store: Arc<Storage>,
    records: Vec<PendingSubmission>,
}

impl SubmissionQueue {
    /// Load the queue from `store`.
    ///
    /// A missing key is an empty queue. An unreadable value is copied to a
    /// backup key and the queue starts empty. Duplicate ids in stored data
    /// keep their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn load(store: Arc<Storage>) -> Result<Self> {
        let records = match store.get(PENDING_SUBMISSIONS_KEY)? {
            None => Vec::new(),
            Some(text) => match serde_json::from_str::<Vec<PendingSubmission>>(&text) {
                Ok(records) => dedupe(records),
                Err(e) => {
                    warn!(
                        "Stored queue is unreadable ({}); moving it to '{}'",
                        e, CORRUPT_BACKUP_KEY
                    );
                    store.set(CORRUPT_BACKUP_KEY, &text)?;
                    store.remove(PENDING_SUBMISSIONS_KEY)?;
                    Vec::new()
                }
            },
        };

        info!("Loaded {} pending submission(s)", records.len());
        Ok(Self { store, records })
    }

    /// Wrap the queue for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedQueue {
        Arc::new(Mutex::new(self))
    }

    /// Number of pending records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pending records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[PendingSubmission] {
        &self.records
    }

    /// An owned copy of every pending record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingSubmission> {
        self.records.clone()
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PendingSubmission> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Whether a record with `id` is queued.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Queue a new record and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn append(&mut self, payload: Payload, meta: &FormMeta) -> Result<String> {
        let mut record = PendingSubmission::new(payload, meta);
        while self.contains(&record.id) {
            record.id = id::submission_id();
        }
        let id = record.id.clone();

        let mut next = self.records.clone();
        next.push(record);
        self.commit(next)?;

        debug!("Queued submission {}", id);
        Ok(id)
    }

    /// Replace the record with `id`, keeping the id.
    ///
    /// If no record has that id, one is appended under it instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn update(&mut self, id: &str, payload: Payload, meta: &FormMeta) -> Result<()> {
        let record = PendingSubmission::with_id(id, payload, meta);
        let mut next = self.records.clone();
        match next.iter_mut().find(|r| r.id == id) {
            Some(slot) => *slot = record,
            None => {
                warn!("Submission {} not in queue; appending it", id);
                next.push(record);
            }
        }
        self.commit(next)?;
        debug!("Updated submission {}", id);
        Ok(())
    }

    /// Remove every record whose id is in `ids`.
    ///
    /// Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn remove(&mut self, ids: &HashSet<String>) -> Result<usize> {
        let next: Vec<_> = self
            .records
            .iter()
            .filter(|r| !ids.contains(&r.id))
            .cloned()
            .collect();
        let removed = self.records.len() - next.len();
        if removed > 0 {
            self.commit(next)?;
            debug!("Removed {} submission(s)", removed);
        }
        Ok(removed)
    }

    /// Insert each record whose id is not already queued.
    ///
    /// Records already present are left untouched, so a newer local edit is
    /// never overwritten by an older copy. Returns how many were inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn ensure_present<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a PendingSubmission>,
    ) -> Result<usize> {
        let mut next = self.records.clone();
        let mut inserted = 0;
        for record in records {
            if !next.iter().any(|r| r.id == record.id) {
                next.push(record.clone());
                inserted += 1;
            }
        }
        if inserted > 0 {
            self.commit(next)?;
            debug!("Re-queued {} submission(s)", inserted);
        }
        Ok(inserted)
    }

    fn commit(&mut self, next: Vec<PendingSubmission>) -> Result<()> {
        let text = serde_json::to_string(&next)?;
        self.store.set(PENDING_SUBMISSIONS_KEY, &text)?;
        self.records = next;
        Ok(())
    }
}

fn dedupe(records: Vec<PendingSubmission>) -> Vec<PendingSubmission> {
    let mut seen = HashSet::new();
    let before = records.len();
    let unique: Vec<_> = records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect();
    if unique.len() != before {
        warn!(
            "Dropped {} duplicate submission id(s) from stored queue",
            before - unique.len()
        );
    }
    unique
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn health_meta() -> FormMeta {
        FormMeta {
            form_id: "health".to_string(),
            form_title: "Health".to_string(),
            sheet_name: "Health".to_string(),
        }
    }

    pub(crate) fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::from(*v)))
            .collect()
    }

    fn open_queue() -> (Arc<Storage>, SubmissionQueue) {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        let queue = SubmissionQueue::load(Arc::clone(&store)).unwrap();
        (store, queue)
    }

    fn persisted(store: &Storage) -> Vec<PendingSubmission> {
        let text = store.get(PENDING_SUBMISSIONS_KEY).unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn ids(queue: &SubmissionQueue) -> Vec<String> {
        queue.records().iter().map(|r| r.id.clone()).collect()
    }

    fn assert_unique(queue: &SubmissionQueue) {
        let all = ids(queue);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len(), "duplicate ids: {all:?}");
    }

    #[test]
    fn test_load_empty_store() {
        let (_store, queue) = open_queue();
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_append_persists_immediately() {
        let (store, mut queue) = open_queue();
        let id = queue
            .append(payload(&[("patientId", "abc")]), &health_meta())
            .unwrap();

        assert!(id.starts_with("sub-"));
        assert_eq!(queue.count(), 1);

        let stored = persisted(&store);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].payload["patientId"], "abc");
        assert_eq!(stored[0].form_title, "Health");
    }

    #[test]
    fn test_persisted_format_is_camel_case() {
        let (store, mut queue) = open_queue();
        queue.append(payload(&[("a", "1")]), &health_meta()).unwrap();

        let text = store.get(PENDING_SUBMISSIONS_KEY).unwrap().unwrap();
        for key in ["\"id\"", "\"formId\"", "\"formTitle\"", "\"sheetName\"", "\"payload\"", "\"submittedAt\""] {
            assert!(text.contains(key), "missing {key} in {text}");
        }
    }

    #[test]
    fn test_reload_reflects_last_mutation() {
        let (store, mut queue) = open_queue();
        let a = queue.append(payload(&[("n", "1")]), &health_meta()).unwrap();
        let b = queue.append(payload(&[("n", "2")]), &health_meta()).unwrap();
        queue.remove(&HashSet::from([a])).unwrap();

        let reloaded = SubmissionQueue::load(store).unwrap();
        assert_eq!(ids(&reloaded), vec![b]);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let (_store, mut queue) = open_queue();
        let first = queue.append(payload(&[("n", "1")]), &health_meta()).unwrap();
        let second = queue.append(payload(&[("n", "2")]), &health_meta()).unwrap();

        queue
            .update(&first, payload(&[("n", "edited")]), &health_meta())
            .unwrap();

        assert_eq!(ids(&queue), vec![first.clone(), second]);
        assert_eq!(queue.get(&first).unwrap().payload["n"], "edited");
    }

    #[test]
    fn test_update_missing_id_appends() {
        let (_store, mut queue) = open_queue();
        queue
            .update("sub-1-lost", payload(&[("n", "1")]), &health_meta())
            .unwrap();

        assert_eq!(ids(&queue), vec!["sub-1-lost".to_string()]);
    }

    #[test]
    fn test_edit_twice_yields_single_record() {
        let (_store, mut queue) = open_queue();
        let id = queue.append(payload(&[("n", "1")]), &health_meta()).unwrap();

        queue.update(&id, payload(&[("n", "2")]), &health_meta()).unwrap();
        queue.update(&id, payload(&[("n", "3")]), &health_meta()).unwrap();

        assert_eq!(queue.records().iter().filter(|r| r.id == id).count(), 1);
        assert_eq!(queue.get(&id).unwrap().payload["n"], "3");
    }

    #[test]
    fn test_remove_matching_only() {
        let (_store, mut queue) = open_queue();
        let a = queue.append(payload(&[("n", "1")]), &health_meta()).unwrap();
        let b = queue.append(payload(&[("n", "2")]), &health_meta()).unwrap();
        let c = queue.append(payload(&[("n", "3")]), &health_meta()).unwrap();

        let removed = queue
            .remove(&HashSet::from([a, c, "sub-unknown".to_string()]))
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(ids(&queue), vec![b]);
    }

    #[test]
    fn test_ensure_present_skips_existing() {
        let (_store, mut queue) = open_queue();
        let id = queue.append(payload(&[("n", "local edit")]), &health_meta()).unwrap();

        let stale = PendingSubmission::with_id(id.clone(), payload(&[("n", "stale")]), &health_meta());
        let fresh = PendingSubmission::new(payload(&[("n", "new")]), &health_meta());

        let inserted = queue.ensure_present([&stale, &fresh, &fresh]).unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(queue.count(), 2);
        assert_eq!(queue.get(&id).unwrap().payload["n"], "local edit");
        assert_unique(&queue);
    }

    #[test]
    fn test_ids_stay_unique_across_mixed_operations() {
        let (_store, mut queue) = open_queue();
        let mut known = Vec::new();

        for round in 0..20 {
            let id = queue
                .append(payload(&[("round", round.to_string().as_str())]), &health_meta())
                .unwrap();
            known.push(id.clone());

            if round % 3 == 0 {
                queue.update(&id, payload(&[("edited", "yes")]), &health_meta()).unwrap();
            }
            if round % 4 == 0 {
                let victim = known.remove(0);
                queue.remove(&HashSet::from([victim.clone()])).unwrap();
                queue.update(&victim, payload(&[("revived", "yes")]), &health_meta()).unwrap();
                known.push(victim);
            }
            let snapshot = queue.snapshot();
            queue.ensure_present(snapshot.iter()).unwrap();
            assert_unique(&queue);
        }
        assert_eq!(queue.count(), known.len());
    }

    #[test]
    fn test_corrupt_value_is_backed_up() {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        store.set(PENDING_SUBMISSIONS_KEY, "{not json").unwrap();

        let queue = SubmissionQueue::load(Arc::clone(&store)).unwrap();

        assert!(queue.is_empty());
        assert_eq!(store.get(CORRUPT_BACKUP_KEY).unwrap().as_deref(), Some("{not json"));
        assert!(store.get(PENDING_SUBMISSIONS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_load_drops_duplicate_ids() {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        let record = PendingSubmission::with_id("sub-1-a", payload(&[("n", "1")]), &health_meta());
        let text = serde_json::to_string(&vec![record.clone(), record]).unwrap();
        store.set(PENDING_SUBMISSIONS_KEY, &text).unwrap();

        let queue = SubmissionQueue::load(store).unwrap();
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn test_load_legacy_record_without_title() {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        store
            .set(
                PENDING_SUBMISSIONS_KEY,
                r#"[{"id": "sub-1-x", "formId": "wash", "payload": {"site": "A"}, "submittedAt": "2024-03-05T10:00:00.000Z"}]"#,
            )
            .unwrap();

        let queue = SubmissionQueue::load(store).unwrap();
        let record = queue.get("sub-1-x").unwrap();
        assert_eq!(record.display_title(), "wash");
        assert_eq!(record.display_label(), "A");
    }

    #[test]
    fn test_display_label_falls_back_to_id() {
        let record = PendingSubmission::with_id("sub-9-z", payload(&[("n", "")]), &health_meta());
        assert_eq!(record.display_label(), "sub-9-z");
    }
}
