use std::fs;

use taskdeck_core::cli::{Command, ViewArgs};
use taskdeck_core::commands::dispatch;
use taskdeck_core::config::Config;
use taskdeck_core::datastore::LocalBackend;
use taskdeck_core::filter::{CategoryFilter, FilterState, StatusFilter};
use taskdeck_core::memory::InMemoryBackend;
use taskdeck_core::render::Renderer;
use taskdeck_core::store::{AppState, NewTask, NoticeLevel};
use taskdeck_core::task::{Priority, Profile};
use tempfile::tempdir;
use uuid::Uuid;

async fn add<B: taskdeck_core::backend::Backend>(state: &mut AppState<B>, title: &str) -> Uuid {
    state
        .create_task(NewTask {
            title: title.to_string(),
            ..NewTask::default()
        })
        .await
        .expect("create task")
        .id
}

fn titles<B: taskdeck_core::backend::Backend>(state: &AppState<B>) -> Vec<String> {
    state.tasks().iter().map(|t| t.title.clone()).collect()
}

#[tokio::test]
async fn local_session_and_tasks_survive_a_restart() {
    let temp = tempdir().expect("tempdir");

    {
        let backend = LocalBackend::open(temp.path()).expect("open local backend");
        let mut state = AppState::new(backend);
        state
            .register("sam@example.com", "hunter22", Profile::default())
            .await
            .expect("register");
        state.load().await.expect("load");

        let work = state.create_category("Work").await.expect("category");
        state
            .create_task(NewTask {
                title: "Buy groceries".to_string(),
                priority: Priority::High,
                category_id: Some(work.id),
                ..NewTask::default()
            })
            .await
            .expect("create groceries");
        add(&mut state, "Call the plumber").await;
        add(&mut state, "Groceries budget").await;

        state.set_filters(FilterState {
            search: "groc".to_string(),
            category: CategoryFilter::Only(work.id),
            ..FilterState::default()
        });
        let visible: Vec<&str> = state.visible().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(visible, vec!["Buy groceries"]);
    }

    let backend = LocalBackend::open(temp.path()).expect("reopen local backend");
    let mut state = AppState::new(backend);
    let session = state.restore_session().await.expect("restore");
    assert_eq!(session.map(|s| s.email).as_deref(), Some("sam@example.com"));

    state.load().await.expect("load");
    assert_eq!(
        titles(&state),
        vec!["Buy groceries", "Call the plumber", "Groceries budget"]
    );
    assert_eq!(state.categories().len(), 1);
}

#[tokio::test]
async fn filtered_reorder_keeps_hidden_tasks_in_place_on_disk() {
    let temp = tempdir().expect("tempdir");
    let backend = LocalBackend::open(temp.path()).expect("open local backend");
    let mut state = AppState::new(backend);
    state
        .register("kim@example.com", "hunter22", Profile::default())
        .await
        .expect("register");
    state.load().await.expect("load");

    add(&mut state, "A").await;
    let b = add(&mut state, "B").await;
    add(&mut state, "C").await;
    add(&mut state, "D").await;
    state.set_completed(b, true).await.expect("complete B");

    state.set_filters(FilterState {
        status: StatusFilter::Pending,
        ..FilterState::default()
    });
    let outcome = state.reorder_visible(2, 0).await.expect("reorder");
    assert!(outcome.is_success());
    assert_eq!(outcome.attempted, 4);
    assert_eq!(titles(&state), vec!["D", "B", "A", "C"]);

    let reopened = LocalBackend::open(temp.path()).expect("reopen");
    let mut fresh = AppState::new(reopened);
    fresh.restore_session().await.expect("restore");
    fresh.load().await.expect("load");
    assert_eq!(titles(&fresh), vec!["D", "B", "A", "C"]);
    let positions: Vec<i64> = fresh.tasks().iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn failed_position_write_does_not_stop_the_others() {
    let mut state = AppState::new(InMemoryBackend::new());
    state
        .register("lee@example.com", "hunter22", Profile::default())
        .await
        .expect("register");
    state.load().await.expect("load");

    let a = add(&mut state, "a").await;
    let b = add(&mut state, "b").await;
    let c = add(&mut state, "c").await;
    state.take_notices();
    state.backend().fail_position_writes_for(b);

    let outcome = state.reorder_visible(2, 0).await.expect("reorder");

    assert_eq!(outcome.attempted, 3);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, b);
    assert_eq!(state.backend().position_writes(), vec![(c, 0), (a, 1)]);
    assert_eq!(titles(&state), vec!["c", "a", "b"]);
    assert_eq!(
        state.notices().last().map(|n| n.level),
        Some(NoticeLevel::Error)
    );
}

#[tokio::test]
async fn move_command_reports_partial_save_as_error() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("taskdeckrc");
    fs::write(&rc, "color = off\n").expect("write rc");
    let cfg = Config::load(Some(&rc)).expect("config");

    let mut state = AppState::new(InMemoryBackend::new());
    state
        .register("ana@example.com", "hunter22", Profile::default())
        .await
        .expect("register");
    state.load().await.expect("load");
    add(&mut state, "first").await;
    let second = add(&mut state, "second").await;
    state.backend().fail_position_writes_for(second);

    let err = dispatch(
        &mut state,
        &cfg,
        &Renderer::plain(),
        Command::Move {
            from: 2,
            to: 1,
            view: ViewArgs::default(),
        },
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("1 of 2 position updates failed"));
    assert!(state.notices().is_empty());
}

#[tokio::test]
async fn list_far_past_the_last_page_is_empty_not_a_crash() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("taskdeckrc");
    fs::write(&rc, "color = off\nlist.page_size = 10\n").expect("write rc");
    let cfg = Config::load(Some(&rc)).expect("config");

    let mut state = AppState::new(InMemoryBackend::new());
    state
        .register("max@example.com", "hunter22", Profile::default())
        .await
        .expect("register");
    state.load().await.expect("load");
    add(&mut state, "only task").await;

    dispatch(
        &mut state,
        &cfg,
        &Renderer::plain(),
        Command::List {
            view: ViewArgs {
                page: Some(usize::MAX),
                ..ViewArgs::default()
            },
        },
    )
    .await
    .expect("list succeeds");
}
