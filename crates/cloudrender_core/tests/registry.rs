use cloudrender_core::{Job, JobRegistry, Stage};
use serde_json::json;

fn job(id: &str, index: usize, stage: &str) -> Job {
    Job::from_payload(&json!({"id": id, "name": id, "stage": stage}), index).unwrap()
}

fn fetch(ids: &[&str]) -> Vec<Job> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| job(id, index, "UPLOADED"))
        .collect()
}

#[test]
fn first_fetch_selects_last_job() {
    let mut registry = JobRegistry::new();
    registry.absorb_fetch(fetch(&["a", "b", "c"]));

    assert_eq!(registry.len(), 3);
    assert_eq!(registry.selected_id(), Some("c"));
    assert_eq!(registry.selected().map(Job::id), Some("c"));
}

#[test]
fn refetch_keeps_previous_selection() {
    let mut registry = JobRegistry::new();
    registry.absorb_fetch(fetch(&["a", "b"]));
    assert!(registry.select("a"));

    registry.absorb_fetch(fetch(&["x", "y", "z"]));

    assert_eq!(registry.selected_id(), Some("a"));
}

#[test]
fn empty_fetch_on_empty_registry_selects_nothing() {
    let mut registry = JobRegistry::new();
    registry.absorb_fetch(Vec::new());
    assert!(registry.is_empty());
    assert_eq!(registry.selected(), None);
}

#[test]
fn repeated_fetch_replaces_instead_of_duplicating() {
    let mut registry = JobRegistry::new();
    registry.absorb_fetch(vec![job("a", 0, "UPLOADED"), job("b", 1, "QUEUED")]);
    registry.absorb_fetch(vec![job("a", 0, "RENDERING"), job("b", 1, "QUEUED")]);

    let ids: Vec<_> = registry.list().iter().map(Job::id).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(registry.get("a").unwrap().stage, Stage::Rendering);
}

#[test]
fn selecting_unknown_id_keeps_cursor() {
    let mut registry = JobRegistry::new();
    registry.absorb_fetch(fetch(&["a"]));

    assert!(!registry.select("missing"));
    assert_eq!(registry.selected_id(), Some("a"));
}

#[test]
fn append_returns_stored_record() {
    let mut registry = JobRegistry::new();
    let stored = registry.append(job("n", 0, "FINISHED"));
    assert_eq!(stored.id(), "n");
    assert_eq!(stored.stage, Stage::Finished);
    // append alone never moves the cursor
    assert_eq!(registry.selected_id(), None);
}
