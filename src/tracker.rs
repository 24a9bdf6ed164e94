use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache_key::short_hash;
use crate::db::{self, KeyValueStore, TRACKER_KEY};
use crate::error::{MatchaError, Result};
use crate::models::{cap_notes, JobEntry, JobRecord, JobStatus, JobUpdate};

pub const MAX_TRACKER_ITEMS: usize = 200;

/// The kanban board of tracked jobs, newest first.
pub struct Tracker<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> Tracker<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub fn entries(&self) -> Result<Vec<JobRecord>> {
        let raw: Vec<Value> = db::load(self.store, TRACKER_KEY)?.unwrap_or_default();
        raw.into_iter()
            .map(|mut value| -> Result<JobRecord> {
                backfill_timestamps(&mut value);
                Ok(serde_json::from_value(value)?)
            })
            .collect()
    }

    fn write(&self, entries: &[JobRecord]) -> Result<()> {
        db::save(self.store, TRACKER_KEY, &entries)
    }

    pub fn get_entry(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.entries()?.into_iter().find(|e| e.id == id))
    }

    /// Save by URL: an existing record for the same URL is merged with the
    /// fields present in `entry`; otherwise a new record goes to the front
    /// and the oldest records beyond capacity are dropped.
    pub fn save_job_entry(&self, entry: JobEntry) -> Result<JobRecord> {
        let mut entries = self.entries()?;
        let now = Utc::now();

        let saved = if let Some(idx) = entries.iter().position(|e| e.url == entry.url) {
            let existing = &mut entries[idx];
            merge_entry(existing, entry);
            existing.updated_at_utc = now;
            debug!(id = %existing.id, "merged into existing tracker entry");
            existing.clone()
        } else {
            let mut entry = entry;
            if let Some(id) = entry.id.as_deref().filter(|id| entries.iter().any(|e| e.id == *id)) {
                debug!(id, "requested id already in use, generating a new one");
                entry.id = None;
            }
            let record = new_record(entry, now);
            entries.insert(0, record.clone());
            if entries.len() > MAX_TRACKER_ITEMS {
                let evicted = entries.len() - MAX_TRACKER_ITEMS;
                entries.truncate(MAX_TRACKER_ITEMS);
                info!(evicted, "tracker at capacity, dropped oldest entries");
            }
            record
        };

        self.write(&entries)?;
        Ok(saved)
    }

    /// Insert-only save used by quick actions; an already tracked URL is
    /// reported as `Duplicate` instead of being merged.
    pub fn quick_save(&self, entry: JobEntry) -> Result<JobRecord> {
        if self.entries()?.iter().any(|e| e.url == entry.url) {
            return Err(MatchaError::duplicate(entry.url));
        }
        self.save_job_entry(entry)
    }

    pub fn update_job_entry(&self, id: &str, updates: JobUpdate) -> Result<JobRecord> {
        let mut entries = self.entries()?;
        let existing = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| MatchaError::not_found("Job entry", id))?;

        if let Some(status) = updates.status {
            existing.status = status;
        }
        if let Some(notes) = updates.notes {
            existing.notes = cap_notes(&notes);
        }
        if let Some(company) = updates.company {
            existing.company = company;
        }
        if let Some(role_title) = updates.role_title {
            existing.role_title = role_title;
        }
        existing.updated_at_utc = Utc::now();

        let updated = existing.clone();
        self.write(&entries)?;
        Ok(updated)
    }

    /// Remove by id. Removing an unknown id is not an error.
    pub fn delete_job_entry(&self, id: &str) -> Result<()> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() != before {
            self.write(&entries)?;
        }
        Ok(())
    }

    /// `None` returns every entry.
    pub fn entries_by_status(&self, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        let entries = self.entries()?;
        Ok(match status {
            Some(status) => entries.into_iter().filter(|e| e.status == status).collect(),
            None => entries,
        })
    }

    /// Case-insensitive substring search over title and company.
    pub fn search(&self, query: &str) -> Result<Vec<JobRecord>> {
        let entries = self.entries()?;
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(entries);
        }

        Ok(entries
            .into_iter()
            .filter(|e| {
                e.display_title().to_lowercase().contains(&query)
                    || e.company.to_lowercase().contains(&query)
            })
            .collect())
    }
}

/// Older entries carry only `updatedAtUtc` or `lastUpdated`; fill the
/// missing timestamps so they still load.
fn backfill_timestamps(value: &mut Value) {
    let Some(fields) = value.as_object_mut() else {
        return;
    };
    if !fields.contains_key("updatedAtUtc") {
        let updated = fields
            .get("lastUpdated")
            .cloned()
            .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339()));
        fields.insert("updatedAtUtc".to_string(), updated);
    }
    if !fields.contains_key("createdAtUtc") {
        let created = fields["updatedAtUtc"].clone();
        fields.insert("createdAtUtc".to_string(), created);
    }
}

pub fn generate_job_id(url: &str) -> String {
    format!("{}-{}", short_hash(url), Utc::now().timestamp_millis())
}

fn new_record(entry: JobEntry, now: chrono::DateTime<Utc>) -> JobRecord {
    JobRecord {
        id: entry.id.unwrap_or_else(|| generate_job_id(&entry.url)),
        url: entry.url,
        company: entry.company.unwrap_or_default(),
        role_title: entry.role_title.unwrap_or_default(),
        page_title: entry.page_title.unwrap_or_default(),
        status: entry.status.unwrap_or_default(),
        notes: entry.notes.map(|n| cap_notes(&n)).unwrap_or_default(),
        match_score: entry.match_score,
        match_label: entry.match_label,
        explanation: entry.explanation,
        gap_analysis: entry.gap_analysis,
        tailored_bullets: entry.tailored_bullets,
        created_at_utc: now,
        updated_at_utc: now,
    }
}

// The record keeps its id; a re-save never renames it.
fn merge_entry(existing: &mut JobRecord, entry: JobEntry) {
    if let Some(company) = entry.company {
        existing.company = company;
    }
    if let Some(role_title) = entry.role_title {
        existing.role_title = role_title;
    }
    if let Some(page_title) = entry.page_title {
        existing.page_title = page_title;
    }
    if let Some(status) = entry.status {
        existing.status = status;
    }
    if let Some(notes) = entry.notes {
        existing.notes = cap_notes(&notes);
    }
    if entry.match_score.is_some() {
        existing.match_score = entry.match_score;
    }
    if entry.match_label.is_some() {
        existing.match_label = entry.match_label;
    }
    if entry.explanation.is_some() {
        existing.explanation = entry.explanation;
    }
    if entry.gap_analysis.is_some() {
        existing.gap_analysis = entry.gap_analysis;
    }
    if entry.tailored_bullets.is_some() {
        existing.tailored_bullets = entry.tailored_bullets;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{MatchLabel, NOTES_MAX_CHARS};

    fn entry(url: &str) -> JobEntry {
        JobEntry {
            role_title: Some("Backend Engineer".into()),
            company: Some("Acme".into()),
            ..JobEntry::new(url)
        }
    }

    #[test]
    fn test_save_new_entry_defaults() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);

        let record = tracker.save_job_entry(entry("https://acme.example/1")).unwrap();
        assert_eq!(record.status, JobStatus::Inbox);
        assert_eq!(record.notes, "");
        assert_eq!(record.created_at_utc, record.updated_at_utc);
        assert!(record.id.contains('-'));
        assert_eq!(tracker.entries().unwrap(), vec![record]);
    }

    #[test]
    fn test_resave_same_url_merges() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);

        let first = tracker
            .save_job_entry(JobEntry {
                notes: Some("Referred by Sam".into()),
                ..entry("https://acme.example/1")
            })
            .unwrap();

        let second = tracker
            .save_job_entry(JobEntry {
                match_score: Some(77),
                match_label: Some(MatchLabel::High),
                ..JobEntry::new("https://acme.example/1")
            })
            .unwrap();

        let entries = tracker.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.notes, "Referred by Sam");
        assert_eq!(second.company, "Acme");
        assert_eq!(second.match_score, Some(77));
        assert_eq!(second.created_at_utc, first.created_at_utc);
        assert!(second.updated_at_utc >= first.updated_at_utc);
    }

    #[test]
    fn test_new_entries_go_to_front() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        tracker.save_job_entry(entry("https://a.example")).unwrap();
        tracker.save_job_entry(entry("https://b.example")).unwrap();

        let urls: Vec<_> = tracker.entries().unwrap().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["https://b.example", "https://a.example"]);
    }

    #[test]
    fn test_capacity_evicts_exactly_the_oldest() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        for i in 0..MAX_TRACKER_ITEMS {
            tracker
                .save_job_entry(JobEntry {
                    id: Some(format!("job-{i}")),
                    ..JobEntry::new(format!("https://jobs.example/{i}"))
                })
                .unwrap();
        }
        assert_eq!(tracker.entries().unwrap().len(), MAX_TRACKER_ITEMS);

        tracker
            .save_job_entry(JobEntry::new("https://jobs.example/new"))
            .unwrap();

        let entries = tracker.entries().unwrap();
        assert_eq!(entries.len(), MAX_TRACKER_ITEMS);
        assert_eq!(entries[0].url, "https://jobs.example/new");
        assert!(entries.iter().all(|e| e.id != "job-0"));
        assert!(entries.iter().any(|e| e.id == "job-1"));
    }

    #[test]
    fn test_quick_save_duplicate_is_distinct() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        tracker.quick_save(entry("https://acme.example/1")).unwrap();

        let err = tracker.quick_save(entry("https://acme.example/1")).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(tracker.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_update_changes_fields_and_timestamp() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        let record = tracker.save_job_entry(entry("https://acme.example/1")).unwrap();

        let updated = tracker
            .update_job_entry(
                &record.id,
                JobUpdate {
                    status: Some(JobStatus::Interview),
                    notes: Some("Onsite on Friday".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, JobStatus::Interview);
        assert_eq!(updated.notes, "Onsite on Friday");
        assert_eq!(updated.company, "Acme");
        assert!(updated.updated_at_utc >= record.updated_at_utc);
        assert_eq!(tracker.get_entry(&record.id).unwrap(), Some(updated));
    }

    #[test]
    fn test_status_moves_freely_backwards() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        let record = tracker.save_job_entry(entry("https://acme.example/1")).unwrap();

        for status in [JobStatus::Offer, JobStatus::Inbox, JobStatus::Hidden, JobStatus::Applied] {
            let updated = tracker
                .update_job_entry(&record.id, JobUpdate { status: Some(status), ..Default::default() })
                .unwrap();
            assert_eq!(updated.status, status);
        }
    }

    #[test]
    fn test_update_missing_id_is_not_found_and_leaves_collection() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        tracker.save_job_entry(entry("https://acme.example/1")).unwrap();
        let before = tracker.entries().unwrap();

        let err = tracker
            .update_job_entry("nope", JobUpdate { notes: Some("x".into()), ..Default::default() })
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(tracker.entries().unwrap(), before);
    }

    #[test]
    fn test_notes_are_capped() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        let record = tracker
            .save_job_entry(JobEntry {
                notes: Some("n".repeat(NOTES_MAX_CHARS * 2)),
                ..entry("https://acme.example/1")
            })
            .unwrap();
        assert_eq!(record.notes.chars().count(), NOTES_MAX_CHARS);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        let record = tracker.save_job_entry(entry("https://acme.example/1")).unwrap();

        tracker.delete_job_entry(&record.id).unwrap();
        tracker.delete_job_entry(&record.id).unwrap();
        tracker.delete_job_entry("never-existed").unwrap();
        assert!(tracker.entries().unwrap().is_empty());
    }

    #[test]
    fn test_caller_id_already_in_use_is_replaced() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        let first = tracker
            .save_job_entry(JobEntry {
                id: Some("x".into()),
                ..JobEntry::new("https://a.example")
            })
            .unwrap();
        let second = tracker
            .save_job_entry(JobEntry {
                id: Some("x".into()),
                ..JobEntry::new("https://b.example")
            })
            .unwrap();
        assert_eq!(first.id, "x");
        assert_ne!(second.id, "x");

        tracker.delete_job_entry("x").unwrap();
        let remaining = tracker.entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url, "https://b.example");
    }

    #[test]
    fn test_entries_without_timestamps_still_load() {
        let store = MemoryStore::new();
        db::save(
            &store,
            TRACKER_KEY,
            &serde_json::json!([
                {
                    "id": "seed-1",
                    "url": "https://acme.example/1",
                    "status": "Applied",
                    "updatedAtUtc": "2024-03-01T10:00:00Z"
                },
                {
                    "id": "seed-2",
                    "url": "https://acme.example/2",
                    "lastUpdated": "2024-02-01T09:30:00.000Z"
                }
            ]),
        )
        .unwrap();

        let tracker = Tracker::new(&store);
        let entries = tracker.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].created_at_utc, entries[0].updated_at_utc);
        assert_eq!(entries[0].updated_at_utc.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(entries[1].updated_at_utc.to_rfc3339(), "2024-02-01T09:30:00+00:00");

        tracker.save_job_entry(entry("https://acme.example/3")).unwrap();
        assert_eq!(tracker.entries().unwrap().len(), 3);
    }

    #[test]
    fn test_filter_by_status() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        tracker.save_job_entry(entry("https://a.example")).unwrap();
        tracker
            .save_job_entry(JobEntry {
                status: Some(JobStatus::Applied),
                ..entry("https://b.example")
            })
            .unwrap();

        let applied = tracker.entries_by_status(Some(JobStatus::Applied)).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].url, "https://b.example");
        assert_eq!(tracker.entries_by_status(None).unwrap().len(), 2);
        assert!(tracker.entries_by_status(Some(JobStatus::Offer)).unwrap().is_empty());
    }

    #[test]
    fn test_search_title_and_company() {
        let store = MemoryStore::new();
        let tracker = Tracker::new(&store);
        tracker
            .save_job_entry(JobEntry {
                page_title: Some("Data Scientist - Globex".into()),
                company: Some("Globex".into()),
                ..JobEntry::new("https://globex.example/1")
            })
            .unwrap();
        tracker.save_job_entry(entry("https://acme.example/1")).unwrap();

        assert_eq!(tracker.search("BACKEND").unwrap().len(), 1);
        assert_eq!(tracker.search("scientist").unwrap()[0].company, "Globex");
        assert_eq!(tracker.search("acme").unwrap().len(), 1);
        assert_eq!(tracker.search("   ").unwrap().len(), 2);
        assert!(tracker.search("nothing like this").unwrap().is_empty());
    }

    #[test]
    fn test_generated_ids_are_hash_and_millis() {
        let id = generate_job_id("https://acme.example/1");
        let (hash, millis) = id.split_once('-').unwrap();
        assert_eq!(hash, short_hash("https://acme.example/1"));
        assert!(millis.parse::<i64>().is_ok());
    }
}
