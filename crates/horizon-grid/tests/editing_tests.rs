//! Cell editing tests, including asynchronous commits.

use std::sync::Arc;
use std::time::Duration;

use horizon_grid::model::{
    CellEditState, CellKey, CellValue, Column, CommitOutcome, GridStore, GridStoreBuilder, Record, RowId,
    row_id_from_field,
};
use horizon_grid::GridError;
use parking_lot::Mutex;
use tokio::sync::Notify;

fn builder() -> GridStoreBuilder<Record> {
    GridStore::builder(row_id_from_field("id"))
        .column(Column::new("name").editable(true))
        .column(
            Column::new("salary")
                .editable(true)
                .validator(|value: CellValue, _row: Record| async move {
                    match value.to_number() {
                        Some(n) if n >= 0.0 => None,
                        _ => Some("Salary must be a positive number".to_string()),
                    }
                }),
        )
        .column(Column::new("locked").editable_when(|row: &Record| row.get("status") != CellValue::from("closed")))
        .rows(vec![
            Record::new().with("id", 1).with("name", "Alice").with("salary", 95000).with("locked", "x"),
            Record::new()
                .with("id", 2)
                .with("name", "Bob")
                .with("salary", 60000)
                .with("locked", "y")
                .with("status", "closed"),
        ])
}

fn id(n: i64) -> RowId {
    RowId::Int(n)
}

async fn wait_for_state(store: &GridStore<Record>, row: &RowId, field: &str, state: CellEditState) {
    for _ in 0..200 {
        if store.cell_state(row, field) == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cell never reached {}", state);
}

#[test]
fn test_dynamic_editability() {
    let store = builder().build();
    assert!(store.start_cell_edit(&id(1), "locked").unwrap());
    assert!(!store.start_cell_edit(&id(2), "locked").unwrap());
}

#[test]
fn test_start_twice_keeps_working_value() {
    let store = builder().build();
    assert!(store.start_cell_edit(&id(1), "name").unwrap());
    store.update_cell_value(&id(1), "name", "Alicia");

    assert!(!store.start_cell_edit(&id(1), "name").unwrap());
    let cell = store.editing_cell(&id(1), "name").unwrap();
    assert_eq!(cell.value, CellValue::from("Alicia"));
    assert_eq!(cell.original_value, CellValue::from("Alice"));
    assert!(cell.is_dirty());
}

#[test]
fn test_update_without_session_is_ignored() {
    let store = builder().build();
    assert!(!store.update_cell_value(&id(1), "name", "Nobody"));
    assert!(store.editing_cells().is_empty());
}

#[tokio::test]
async fn test_async_commit_through_processor() {
    let store = builder()
        .process_row_update(|new: Record, _old: Record| async move {
            Ok::<_, String>(new.with("version", 2))
        })
        .build();

    let states = Arc::new(Mutex::new(Vec::new()));
    let s = states.clone();
    store
        .signals()
        .edit_state_changed
        .connect(move |(_, state)| s.lock().push(*state));

    store.start_cell_edit(&id(1), "name").unwrap();
    store.update_cell_value(&id(1), "name", "Alicia");

    let outcome = store.commit_cell_edit_async(&id(1), "name").await;
    assert!(outcome.is_committed());

    let row = store.row(&id(1)).unwrap();
    assert_eq!(row.get("name"), CellValue::from("Alicia"));
    assert_eq!(row.get("version"), CellValue::Int(2));
    assert_eq!(store.cell_state(&id(1), "name"), CellEditState::Pristine);
    assert_eq!(
        *states.lock(),
        vec![CellEditState::Editing, CellEditState::Saving, CellEditState::Pristine]
    );
}

#[tokio::test]
async fn test_async_commit_failure_keeps_session() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let e = errors.clone();
    let store = builder()
        .process_row_update(|_new: Record, _old: Record| async move { Err::<Record, _>("server unavailable") })
        .on_commit_error(move |key: &CellKey, message: &str| e.lock().push(format!("{} {}", key, message)))
        .build();

    store.start_cell_edit(&id(1), "name").unwrap();
    store.update_cell_value(&id(1), "name", "Alicia");

    let outcome = store.commit_cell_edit_async(&id(1), "name").await;
    assert_eq!(outcome, CommitOutcome::Failed("server unavailable".into()));

    let cell = store.editing_cell(&id(1), "name").unwrap();
    assert_eq!(cell.state, CellEditState::Error);
    assert_eq!(cell.error.as_deref(), Some("server unavailable"));
    assert_eq!(cell.value, CellValue::from("Alicia"));
    assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alice"));
    assert_eq!(*errors.lock(), vec!["1:name server unavailable".to_string()]);

    // Editing resumes from the error state.
    assert!(store.start_cell_edit(&id(1), "name").unwrap());
    assert_eq!(store.cell_state(&id(1), "name"), CellEditState::Editing);
    assert_eq!(store.editing_cell(&id(1), "name").unwrap().value, CellValue::from("Alicia"));
}

#[tokio::test]
async fn test_validator_rejects_value() {
    let store = builder().build();

    store.start_cell_edit(&id(1), "salary").unwrap();
    store.update_cell_value(&id(1), "salary", -5);

    let outcome = store.commit_cell_edit_async(&id(1), "salary").await;
    assert_eq!(outcome.error(), Some("Salary must be a positive number"));
    assert_eq!(store.cell_state(&id(1), "salary"), CellEditState::Error);
    assert_eq!(store.row(&id(1)).unwrap().get("salary"), CellValue::Int(95000));

    // A new value clears the error.
    assert!(store.update_cell_value(&id(1), "salary", 99000));
    assert_eq!(store.cell_state(&id(1), "salary"), CellEditState::Editing);

    let outcome = store.commit_cell_edit_async(&id(1), "salary").await;
    assert!(outcome.is_committed());
    assert_eq!(store.row(&id(1)).unwrap().get("salary"), CellValue::Int(99000));
}

#[tokio::test]
async fn test_commit_then_start_snapshots_new_value() {
    let store = builder().build();

    store.start_cell_edit(&id(2), "name").unwrap();
    store.update_cell_value(&id(2), "name", "Robert");
    assert!(store.commit_cell_edit_async(&id(2), "name").await.is_committed());

    store.start_cell_edit(&id(2), "name").unwrap();
    let cell = store.editing_cell(&id(2), "name").unwrap();
    assert_eq!(cell.original_value, CellValue::from("Robert"));
    assert!(!cell.is_dirty());
}

#[tokio::test]
async fn test_commit_without_session_is_skipped() {
    let store = builder().build();
    assert_eq!(store.commit_cell_edit_async(&id(1), "name").await, CommitOutcome::Skipped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_while_saving_is_rejected() {
    let gate = Arc::new(Notify::new());
    let g = gate.clone();
    let store = Arc::new(
        builder()
            .process_row_update(move |new: Record, _old: Record| {
                let gate = g.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, String>(new)
                }
            })
            .build(),
    );

    store.start_cell_edit(&id(1), "name").unwrap();
    store.update_cell_value(&id(1), "name", "Alicia");

    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.commit_cell_edit_async(&id(1), "name").await })
    };
    wait_for_state(&store, &id(1), "name", CellEditState::Saving).await;

    let err = store.start_cell_edit(&id(1), "name").unwrap_err();
    assert!(matches!(err, GridError::IllegalEditTransition { .. }));
    assert!(!store.cancel_cell_edit(&id(1), "name"));
    assert!(!store.update_cell_value(&id(1), "name", "Other"));
    assert!(!store.commit_cell_edit(&id(1), "name"));

    gate.notify_one();
    assert!(task.await.unwrap().is_committed());
    assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alicia"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_row_removed_while_saving() {
    let gate = Arc::new(Notify::new());
    let g = gate.clone();
    let store = Arc::new(
        builder()
            .process_row_update(move |new: Record, _old: Record| {
                let gate = g.clone();
                async move {
                    gate.notified().await;
                    Ok::<_, String>(new)
                }
            })
            .build(),
    );

    store.start_cell_edit(&id(1), "name").unwrap();
    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.commit_cell_edit_async(&id(1), "name").await })
    };
    wait_for_state(&store, &id(1), "name", CellEditState::Saving).await;

    assert!(store.remove_row(&id(1)));
    gate.notify_one();

    assert_eq!(task.await.unwrap(), CommitOutcome::Skipped);
    assert!(store.row(&id(1)).is_none());
    assert_eq!(store.row_count(), 1);
}

#[tokio::test]
async fn test_processor_cannot_change_row_id() {
    let store = builder()
        .process_row_update(|new: Record, _old: Record| async move { Ok::<_, String>(new.with("id", 2)) })
        .build();

    store.start_cell_edit(&id(1), "name").unwrap();
    store.update_cell_value(&id(1), "name", "Alicia");

    let outcome = store.commit_cell_edit_async(&id(1), "name").await;
    assert!(matches!(outcome, CommitOutcome::Failed(_)));
    assert_eq!(store.cell_state(&id(1), "name"), CellEditState::Error);
    assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alice"));
    assert_eq!(store.row(&id(2)).unwrap().get("name"), CellValue::from("Bob"));
    assert_eq!(store.row_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_value_written_during_validation_is_kept() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (e, r) = (entered.clone(), release.clone());
    let store = Arc::new(
        GridStore::builder(row_id_from_field("id"))
            .column(Column::new("name").editable(true).validator(move |_value: CellValue, _row: Record| {
                let (entered, release) = (e.clone(), r.clone());
                async move {
                    entered.notify_one();
                    release.notified().await;
                    None
                }
            }))
            .rows(vec![Record::new().with("id", 1).with("name", "Alice")])
            .build(),
    );

    store.start_cell_edit(&id(1), "name").unwrap();
    store.update_cell_value(&id(1), "name", "Alicia");

    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.commit_cell_edit_async(&id(1), "name").await })
    };
    entered.notified().await;
    assert!(store.update_cell_value(&id(1), "name", "Ali"));
    release.notify_one();

    assert_eq!(task.await.unwrap(), CommitOutcome::Skipped);
    assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Alice"));
    let cell = store.editing_cell(&id(1), "name").unwrap();
    assert_eq!(cell.state, CellEditState::Editing);
    assert_eq!(cell.value, CellValue::from("Ali"));

    // The newer value commits once revalidated.
    let commit = {
        let store = store.clone();
        tokio::spawn(async move { store.commit_cell_edit_async(&id(1), "name").await })
    };
    entered.notified().await;
    release.notify_one();
    assert!(commit.await.unwrap().is_committed());
    assert_eq!(store.row(&id(1)).unwrap().get("name"), CellValue::from("Ali"));
}
