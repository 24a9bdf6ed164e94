use rand::seq::SliceRandom;
use tracing::info;

use crate::ai::AnalysisProvider;
use crate::analysis_cache::AnalysisCache;
use crate::cache_key::derive_cache_key;
use crate::db::KeyValueStore;
use crate::error::{MatchaError, Result};
use crate::extract::role_title_from_page_title;
use crate::models::{Analysis, JobEntry, JobRecord, JobStatus, PageContent};
use crate::settings::Profile;
use crate::tracker::Tracker;

/// Pages with less readable text than this are not worth analyzing.
pub const MIN_ANALYZABLE_CHARS: usize = 100;

const ALREADY_TRACKED: [&str; 8] = [
    "Looks like you already saved this one!",
    "This job is already in your tracker!",
    "Already got this one covered!",
    "This gem is already saved!",
    "You're already tracking this opportunity!",
    "Great minds think alike, already saved!",
    "This one's already on your radar!",
    "Already bookmarked this beauty!",
];

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis: Analysis,
    pub cache_key: String,
    pub cache_hit: bool,
}

/// Score the stored CV against a page, reusing a cached analysis when the
/// same CV and job text were analyzed before.
pub fn analyze_page(
    store: &dyn KeyValueStore,
    provider: &dyn AnalysisProvider,
    page: &PageContent,
) -> Result<AnalysisOutcome> {
    let cv_text = Profile::new(store).cv_text()?.ok_or_else(|| {
        MatchaError::config("No CV uploaded. Save your CV first with `matcha cv set <file>`.")
    })?;

    if page.main_text.chars().count() < MIN_ANALYZABLE_CHARS {
        return Err(MatchaError::extraction(
            "not enough text on this page to analyze. Make sure you're on a job description page",
        ));
    }

    let cache = AnalysisCache::new(store);
    let cache_key = derive_cache_key(&cv_text, &page.main_text);
    if let Some(cached) = cache.lookup(&cache_key)? {
        info!(%cache_key, "using cached analysis");
        return Ok(AnalysisOutcome {
            analysis: cached.analysis,
            cache_key,
            cache_hit: true,
        });
    }

    let analysis = provider.analyze(&cv_text, &page.main_text, &page.page_url)?;
    cache.store(&cache_key, analysis.clone(), &page.page_url)?;
    info!(%cache_key, score = analysis.match_score, model = provider.model_name(), "analysis complete");

    Ok(AnalysisOutcome {
        analysis,
        cache_key,
        cache_hit: false,
    })
}

/// Save an analyzed page to the tracker, merging into an existing record
/// for the same URL.
pub fn save_analyzed(
    store: &dyn KeyValueStore,
    page: &PageContent,
    analysis: &Analysis,
) -> Result<JobRecord> {
    let entry = JobEntry {
        company: Some(page.company.clone()),
        role_title: Some(role_title_from_page_title(&page.page_title)),
        page_title: Some(page.page_title.clone()),
        match_score: Some(analysis.match_score),
        match_label: Some(analysis.match_label),
        explanation: Some(analysis.explanation.clone()),
        gap_analysis: Some(analysis.gap_analysis.clone()),
        tailored_bullets: Some(analysis.tailored_bullets.clone()),
        ..JobEntry::new(page.page_url.clone())
    };
    Tracker::new(store).save_job_entry(entry)
}

/// Save a page straight to the Inbox without analysis.
pub fn quick_save_page(store: &dyn KeyValueStore, page: &PageContent) -> Result<JobRecord> {
    let entry = JobEntry {
        company: Some(page.company.clone()),
        role_title: Some(role_title_from_page_title(&page.page_title)),
        page_title: Some(page.page_title.clone()),
        status: Some(JobStatus::Inbox),
        notes: Some(String::new()),
        ..JobEntry::new(page.page_url.clone())
    };
    Tracker::new(store).quick_save(entry)
}

pub fn already_tracked_message() -> &'static str {
    ALREADY_TRACKED
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(ALREADY_TRACKED[0])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::TargetRole;
    use crate::analysis_cache::tests::sample_analysis;
    use crate::db::MemoryStore;
    use chrono::Utc;
    use std::cell::Cell;

    /// Returns a fixed analysis and counts calls.
    pub(crate) struct ScriptedProvider {
        pub score: u8,
        pub calls: Cell<usize>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(score: u8) -> Self {
            Self {
                score,
                calls: Cell::new(0),
            }
        }
    }

    impl AnalysisProvider for ScriptedProvider {
        fn analyze(&self, _cv: &str, _job: &str, _url: &str) -> Result<Analysis> {
            self.calls.set(self.calls.get() + 1);
            Ok(sample_analysis(self.score))
        }

        fn test_connection(&self) -> Result<()> {
            Ok(())
        }

        fn tailor_cv(&self, cv_text: &str, bullets: &[String], _target: &TargetRole) -> Result<String> {
            Ok(format!("{}\n{}", cv_text, bullets.join("\n")))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn job_page(url: &str) -> PageContent {
        PageContent {
            page_title: "Senior Rust Engineer | Acme Corp".into(),
            page_url: url.into(),
            main_text: "We are looking for a Rust engineer to build storage engines. ".repeat(5),
            company: "Acme Corp".into(),
            job_level: None,
            extracted_at: Utc::now(),
        }
    }

    #[test]
    fn test_analyze_requires_cv() {
        let store = MemoryStore::new();
        let provider = ScriptedProvider::new(80);
        let err = analyze_page(&store, &provider, &job_page("https://acme.example/1")).unwrap_err();
        assert!(matches!(err, MatchaError::Config(_)));
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn test_analyze_rejects_short_pages() {
        let store = MemoryStore::new();
        Profile::new(&store).save_cv_text("My CV").unwrap();
        let provider = ScriptedProvider::new(80);
        let mut page = job_page("https://acme.example/1");
        page.main_text = "too short".into();

        let err = analyze_page(&store, &provider, &page).unwrap_err();
        assert!(err.is_extraction());
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn test_second_analysis_is_served_from_cache() {
        let store = MemoryStore::new();
        Profile::new(&store).save_cv_text("My CV").unwrap();
        let provider = ScriptedProvider::new(64);
        let page = job_page("https://acme.example/1");

        let first = analyze_page(&store, &provider, &page).unwrap();
        assert!(!first.cache_hit);
        let second = analyze_page(&store, &provider, &page).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.analysis, first.analysis);
        assert_eq!(second.cache_key, first.cache_key);
        assert_eq!(provider.calls.get(), 1);
    }

    #[test]
    fn test_new_cv_forces_fresh_analysis() {
        let store = MemoryStore::new();
        let profile = Profile::new(&store);
        profile.save_cv_text("My CV").unwrap();
        let provider = ScriptedProvider::new(64);
        let page = job_page("https://acme.example/1");

        analyze_page(&store, &provider, &page).unwrap();
        profile.save_cv_text("My CV").unwrap();
        let again = analyze_page(&store, &provider, &page).unwrap();
        assert!(!again.cache_hit);
        assert_eq!(provider.calls.get(), 2);
    }

    #[test]
    fn test_save_analyzed_then_resave_merges() {
        let store = MemoryStore::new();
        let page = job_page("https://acme.example/1");

        let first = save_analyzed(&store, &page, &sample_analysis(40)).unwrap();
        assert_eq!(first.role_title, "Senior Rust Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.match_score, Some(40));

        let second = save_analyzed(&store, &page, &sample_analysis(75)).unwrap();
        assert_eq!(second.id, first.id);
        let all = Tracker::new(&store).entries().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].match_score, Some(75));
    }

    #[test]
    fn test_quick_save_twice_is_duplicate() {
        let store = MemoryStore::new();
        let page = job_page("https://acme.example/1");

        let saved = quick_save_page(&store, &page).unwrap();
        assert_eq!(saved.status, JobStatus::Inbox);
        assert!(saved.match_score.is_none());

        let err = quick_save_page(&store, &page).unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(Tracker::new(&store).entries().unwrap().len(), 1);
    }

    #[test]
    fn test_already_tracked_message_is_one_of_the_set() {
        for _ in 0..20 {
            assert!(ALREADY_TRACKED.contains(&already_tracked_message()));
        }
    }
}
