//! Notebook behaviour through the public API: live queries over note
//! writes and persistence across reopen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tideline_client::{Direction, Note, Notebook, Snapshot};

fn ticking_notebook() -> Notebook {
    let now = Arc::new(AtomicU64::new(1_706_745_600_000));
    Notebook::in_memory()
        .unwrap()
        .with_clock(move || now.fetch_add(1, Ordering::SeqCst))
}

fn titles(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .records
        .iter()
        .filter_map(Note::from_document)
        .map(|note| note.title)
        .collect()
}

#[tokio::test]
async fn test_live_query_follows_create_update_delete() {
    let notebook = ticking_notebook();
    let mut notes = notebook.notes(Direction::Ascending, None).unwrap();
    assert!(notes.next().await.unwrap().is_empty());

    let id = notebook.create("A", "x").unwrap();
    assert_eq!(titles(&notes.next().await.unwrap()), vec!["A"]);

    notebook.update(&id, "B", "x").unwrap();
    assert_eq!(titles(&notes.next().await.unwrap()), vec!["B"]);

    notebook.delete(&id).unwrap();
    assert!(notes.next().await.unwrap().is_empty());

    notebook.shutdown().await;
}

#[tokio::test]
async fn test_live_query_orders_by_creation_and_filters_by_title() {
    let notebook = ticking_notebook();
    notebook.create("Zebra crossing", "").unwrap();
    notebook.create("Élan vital", "").unwrap();
    notebook.create("apple pie", "").unwrap();

    let mut descending = notebook.notes(Direction::Descending, None).unwrap();
    assert_eq!(
        titles(&descending.next().await.unwrap()),
        vec!["apple pie", "Élan vital", "Zebra crossing"]
    );

    let mut search = notebook.notes(Direction::Ascending, Some("ela")).unwrap();
    assert_eq!(titles(&search.next().await.unwrap()), vec!["Élan vital"]);

    // Blank search text means no filter
    let mut all = notebook.notes(Direction::Ascending, Some("   ")).unwrap();
    assert_eq!(all.next().await.unwrap().len(), 3);

    notebook.shutdown().await;
}

#[tokio::test]
async fn test_notebook_reopens_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let (kept, removed) = {
        let notebook = Notebook::open(dir.path()).unwrap();
        let kept = notebook.create("Keep", "me").unwrap();
        let removed = notebook.create("Drop", "me").unwrap();
        notebook.update(&kept, "Keep", "me, edited").unwrap();
        notebook.delete(&removed).unwrap();
        notebook.shutdown().await;
        (kept, removed)
    };

    let notebook = Notebook::open(dir.path()).unwrap();
    let note = notebook.get(&kept).unwrap();
    assert_eq!(note.content, "me, edited");
    assert_eq!(note.revision, 2);
    assert!(notebook.get(&removed).is_err());

    let mut notes = notebook.notes(Direction::Ascending, None).unwrap();
    assert_eq!(titles(&notes.next().await.unwrap()), vec!["Keep"]);

    notebook.shutdown().await;
}
