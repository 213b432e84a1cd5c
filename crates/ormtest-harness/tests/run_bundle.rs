//! Run bundles written by the executor.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ormtest_harness::log::{LifecycleEventKind, RunStatus, validate_bundle};
use ormtest_harness::matrix::{MatrixAxis, MatrixOptions, OptOutRule};
use ormtest_harness::runner::{MatrixRunSummary, RunOptions, run_matrix};
use ormtest_harness::schema::RelationSchema;
use ormtest_harness::suite::setup_test_suite;
use ormtest_harness::{ExpectationTable, HarnessError, Provider, ProviderTable, ReferentialIntegrity};
use tempfile::tempdir;

fn two_providers() -> MatrixOptions {
    MatrixOptions::new()
        .axis(MatrixAxis::providers([Provider::Postgresql, Provider::Sqlite]))
        .axis(MatrixAxis::referential_integrity(ReferentialIntegrity::ALL))
        .opt_out(OptOutRule::providers(
            [Provider::Cockroachdb, Provider::Mysql, Provider::Sqlserver, Provider::Mongodb],
            "embedded and postgres lanes only",
        ))
}

#[test]
fn passing_run_writes_framed_bundle_with_summary() {
    let dir = tempdir().expect("tempdir");
    let matrix = setup_test_suite(
        "bundle smoke",
        &two_providers(),
        &RelationSchema::header_only(),
        |_config, _meta, suite| {
            suite.before_all(|_| Ok(()));
            suite.test("connects", |ctx| {
                ormtest_harness::assertion::expect_true(
                    !ctx.meta().schema.is_empty(),
                    "schema rendered",
                )
            });
            Ok(())
        },
    )
    .expect("matrix");

    let options = RunOptions {
        bundle_dir: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let summary = run_matrix(&matrix, &options).expect("run");
    assert_eq!(summary.passed_tests, 4);

    let root = dir.path().join("bundle_smoke-run");
    let events = validate_bundle(&root).expect("bundle validates");
    assert_eq!(events.last().and_then(|event| event.status), Some(RunStatus::Passed));
    let setups = events
        .iter()
        .filter(|event| event.kind == LifecycleEventKind::Setup)
        .count();
    let teardowns = events
        .iter()
        .filter(|event| event.kind == LifecycleEventKind::Teardown)
        .count();
    assert_eq!(setups, 4);
    assert_eq!(teardowns, 4);
    let steps: Vec<u64> = events.iter().map(|event| event.step).collect();
    assert!(steps.windows(2).all(|pair| pair[0] + 1 == pair[1]), "{steps:?}");

    let stored: MatrixRunSummary = serde_json::from_str(
        &std::fs::read_to_string(root.join("summary.json")).expect("summary.json"),
    )
    .expect("summary parses");
    assert_eq!(stored, summary);
}

#[test]
fn authoring_error_aborts_after_teardown_and_marks_bundle_failed() {
    let dir = tempdir().expect("tempdir");
    let teardowns = Rc::new(Cell::new(0_u32));
    let counter = Rc::clone(&teardowns);
    let matrix = setup_test_suite(
        "late authoring",
        &two_providers(),
        &RelationSchema::header_only(),
        move |_config, _meta, suite| {
            // Not checked with `require_mode`, so the gap surfaces at run time.
            let fk_only: ExpectationTable = ExpectationTable::by_mode("fk only").mode(
                ReferentialIntegrity::ForeignKeys,
                ProviderTable::new().with_default("Foreign key constraint failed"),
            );
            suite.test("resolves", move |ctx| {
                ctx.conditional_error().snapshot(&fk_only)?;
                Ok(())
            });
            suite.test("after the abort", |_| Ok(()));
            let counter = Rc::clone(&counter);
            suite.after_all(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            });
            Ok(())
        },
    )
    .expect("matrix");

    let options = RunOptions {
        bundle_dir: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let err = run_matrix(&matrix, &options).expect_err("prisma mode missing");
    assert!(matches!(err, HarnessError::MissingExpectationMode { ref mode, .. } if mode == "prisma"), "{err}");
    // postgresql/foreignKeys passes, postgresql/prisma aborts after its teardown.
    assert_eq!(teardowns.get(), 2);

    let events = validate_bundle(&dir.path().join("late_authoring-run")).expect("bundle validates");
    assert_eq!(events.last().and_then(|event| event.status), Some(RunStatus::Failed));
}

#[test]
fn lost_bundle_directory_surfaces_io_error_after_teardown() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("vanishing_bundle-run");
    let hooks = Rc::new(RefCell::new(Vec::<String>::new()));
    let log = Rc::clone(&hooks);
    let matrix = setup_test_suite(
        "vanishing bundle",
        &two_providers(),
        &RelationSchema::header_only(),
        move |_config, _meta, suite| {
            let bundle_root = root.clone();
            let setup_log = Rc::clone(&log);
            suite.before_all(move |ctx| {
                setup_log
                    .borrow_mut()
                    .push(format!("before_all {}", ctx.config().provider()));
                std::fs::remove_dir_all(&bundle_root)
                    .map_err(|err| ormtest_harness::assertion::fail(err.to_string()))
            });
            let test_log = Rc::clone(&log);
            suite.test("still executes", move |_| {
                test_log.borrow_mut().push("test".to_owned());
                Ok(())
            });
            let teardown_log = Rc::clone(&log);
            suite.after_all(move |ctx| {
                teardown_log
                    .borrow_mut()
                    .push(format!("after_all {}", ctx.config().provider()));
                Ok(())
            });
            Ok(())
        },
    )
    .expect("matrix");

    let options = RunOptions {
        bundle_dir: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let err = run_matrix(&matrix, &options).expect_err("bundle directory removed mid-run");
    assert!(matches!(err, HarnessError::Io(_)), "{err}");
    assert!(!err.is_authoring_error());

    let hooks = hooks.borrow();
    assert_eq!(*hooks, ["before_all postgresql", "test", "after_all postgresql"]);
    assert!(!dir.path().join("vanishing_bundle-run").exists());
}
