use booktime::aggregate::{self, Completion, ReportFilter};
use booktime::db::StoreOptions;
use booktime::model::{self, Book, TaskAssignment, TaskId};
use booktime::{Error, RequestContext, Store, TimerEngine};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn assign(store: &mut Store, book: &Book, stage: &str, user: &str, estimate: i64) -> TaskId {
    store
        .write("assign stage", |db| {
            model::upsert_task(
                db,
                &TaskAssignment {
                    book_id: book.id,
                    stage,
                    user: Some(user),
                    estimate_seconds: Some(estimate),
                },
            )
        })
        .unwrap()
        .id
}

fn work(store: &mut Store, task: TaskId, user: &str, from: DateTime<Utc>, seconds: i64) {
    let engine = TimerEngine::default();
    engine
        .start(store, &RequestContext::new(user, from), task)
        .unwrap();
    engine
        .stop(store, task, from + Duration::seconds(seconds))
        .unwrap();
}

#[test]
fn book_progress_follows_logged_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let mut store =
        Store::open(&dir.path().join("booktime.sqlite"), StoreOptions::default()).unwrap();
    let book = store
        .write("save book", |db| {
            model::upsert_book(db, "Volcanoes", Some("Earth Science"), at(1, 8))
        })
        .unwrap();

    let writing = assign(&mut store, &book, "Editorial Writing", "Rebecca", 3600);
    let layout = assign(&mut store, &book, "Page Layout", "Noah", 0);

    work(&mut store, writing, "Rebecca", at(4, 9), 1200);
    work(&mut store, writing, "Charis", at(4, 13), 600);
    work(&mut store, layout, "Noah", at(5, 10), 900);

    let snapshot = store
        .read("load book", |db| model::book_snapshot(db, book.clone()))
        .unwrap();
    let summary = aggregate::summarize(&snapshot.book, &snapshot.tasks, &snapshot.entries);

    assert_eq!(summary.total_seconds, 2700);
    assert_eq!(summary.total_estimate_seconds, 3600);
    assert_eq!(summary.completion, Completion::Percent(75.0));
    assert!(!summary.complete);

    let stages: Vec<_> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, ["Editorial Writing", "Page Layout"]);
    assert_eq!(summary.stages[0].completion, Completion::Percent(50.0));
    assert_eq!(summary.stages[0].by_user.get("Rebecca"), Some(&1200));
    assert_eq!(summary.stages[0].by_user.get("Charis"), Some(&600));
    assert_eq!(summary.stages[1].completion, Completion::NoEstimate);

    let recent = summary.most_recent.expect("recent activity");
    assert_eq!(recent.stage, "Page Layout");
    assert_eq!(recent.user, "Noah");
    assert_eq!(summary.main_user.as_deref(), Some("Rebecca"));

    for task in [writing, layout] {
        store
            .write("complete stage", |db| model::set_task_completed(db, task, true))
            .unwrap();
    }
    let snapshot = store
        .read("load book", |db| model::book_snapshot(db, book.clone()))
        .unwrap();
    assert!(aggregate::summarize(&snapshot.book, &snapshot.tasks, &snapshot.entries).complete);
}

#[test]
fn report_and_cleanup() {
    let mut store = Store::open_in_memory().unwrap();
    let tides = store
        .write("save book", |db| model::upsert_book(db, "Tides", Some("Nature"), at(1, 8)))
        .unwrap();
    let moons = store
        .write("save book", |db| model::upsert_book(db, "Moons", Some("Space"), at(1, 8)))
        .unwrap();
    let tides_proof = assign(&mut store, &tides, "1st Proof", "Rebecca", 7200);
    let moons_proof = assign(&mut store, &moons, "1st Proof", "Rebecca", 7200);

    work(&mut store, tides_proof, "Rebecca", at(2, 9), 1800);
    work(&mut store, tides_proof, "Rebecca", at(6, 9), 1800);
    work(&mut store, moons_proof, "Rebecca", at(8, 9), 3600);

    let rows = store.read("build report", model::entry_rows).unwrap();
    let report = aggregate::user_report(
        &rows,
        &ReportFilter {
            user: Some("Rebecca".to_string()),
            to: NaiveDate::from_ymd_opt(2024, 3, 7),
            ..ReportFilter::default()
        },
    )
    .unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].book, "Tides");
    assert_eq!(report.rows[0].seconds, 3600);
    assert_eq!(report.rows[0].first_date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    assert_eq!(report.total_books, 1);

    let engine = TimerEngine::default();
    engine
        .start(&mut store, &RequestContext::new("Rebecca", at(9, 9)), moons_proof)
        .unwrap();
    assert!(store
        .write("delete book", |db| model::delete_book(db, moons.id))
        .unwrap());
    assert!(store.read("list timers", model::active_timers).unwrap().is_empty());
    assert!(model::entries_for_task(store.connection(), moons_proof)
        .unwrap()
        .is_empty());

    let err = engine
        .start(&mut store, &RequestContext::new("Rebecca", at(9, 10)), moons_proof)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn reassigning_a_stage_keeps_its_estimate() {
    let mut store = Store::open_in_memory().unwrap();
    let book = store
        .write("save book", |db| model::upsert_book(db, "Glaciers", None, at(1, 8)))
        .unwrap();
    let proof = assign(&mut store, &book, "1st Proof", "Rebecca", 3600);
    work(&mut store, proof, "Rebecca", at(2, 9), 1800);

    store
        .write("assign stage", |db| {
            model::upsert_task(
                db,
                &TaskAssignment {
                    book_id: book.id,
                    stage: "1st Proof",
                    user: Some("Amy"),
                    estimate_seconds: None,
                },
            )
        })
        .unwrap();

    let snapshot = store
        .read("load book", |db| model::book_snapshot(db, book.clone()))
        .unwrap();
    assert_eq!(snapshot.tasks[0].user.as_deref(), Some("Amy"));
    let summary = aggregate::summarize(&snapshot.book, &snapshot.tasks, &snapshot.entries);
    assert_eq!(summary.total_estimate_seconds, 3600);
    assert_eq!(summary.completion, Completion::Percent(50.0));
}
