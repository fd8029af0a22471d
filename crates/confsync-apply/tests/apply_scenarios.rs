//! Validate-then-apply flows against a real directory tree

use std::sync::Arc;

use confsync_apply::{
    ApplyError, ConfigUpdater, FileLockRegistry, LineBuffer, LocalBackupDir, SafetyValidator,
    Violation,
};
use confsync_model::{ChangeOperation, ConfigTree, ReasonCode};
use confsync_test_utils::{request, set_key, NodeFixture, INSTANCE};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const CONFIG: &str = "plugins/Essentials/config.yml";

fn engine(node: &NodeFixture) -> (SafetyValidator, ConfigUpdater) {
    let locks = FileLockRegistry::new();
    let validator = SafetyValidator::new(Arc::clone(&locks)).with_min_free_bytes(0);
    let updater = ConfigUpdater::new(Arc::new(LocalBackupDir::new(node.backup_root())), locks);
    (validator, updater)
}

#[tokio::test]
async fn expected_value_matches_then_one_backup() {
    let node = NodeFixture::new().with_file(INSTANCE, CONFIG, "x: 2\n");
    let (validator, updater) = engine(&node);
    let req = request(vec![set_key(CONFIG, "x", ConfigTree::int(3), Some(ConfigTree::int(2)))]);

    validator.validate(&node.instances_root(), &req).unwrap();
    let report = updater.apply(&node.instance_dir(INSTANCE), &req).await.unwrap();

    assert_eq!(node.read(INSTANCE, CONFIG), "x: 3\n");
    assert_eq!(report.backups.len(), 1);
    assert_eq!(report.backups[0].file, CONFIG);
    assert_eq!(node.backup_files().len(), 1);
}

#[tokio::test]
async fn stale_expected_value_is_a_conflict_and_nothing_changes() {
    let node = NodeFixture::new().with_file(INSTANCE, CONFIG, "x: 5\n");
    let (validator, _) = engine(&node);
    let req = request(vec![set_key(CONFIG, "x", ConfigTree::int(3), Some(ConfigTree::int(2)))]);

    let err = validator.validate(&node.instances_root(), &req).unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::ConcurrencyConflict);
    assert!(matches!(
        &err.violations[..],
        [Violation::ConcurrencyConflict { observed: Some(o), .. }] if *o == ConfigTree::int(5)
    ));
    assert_eq!(node.read(INSTANCE, CONFIG), "x: 5\n");
    assert!(node.backup_files().is_empty());
}

#[tokio::test]
async fn failing_second_operation_restores_first_file_exactly() {
    let original = "# Essentials\nx: 2   # spacing kept\nlist:\n  - a\n";
    let node = NodeFixture::new().with_file(INSTANCE, CONFIG, original);
    let (_, updater) = engine(&node);
    let req = request(vec![
        set_key(CONFIG, "x", ConfigTree::int(3), None),
        set_key("plugins/Missing/config.yml", "y", ConfigTree::int(1), None),
    ]);

    let failure = updater.apply(&node.instance_dir(INSTANCE), &req).await.unwrap_err();

    assert_eq!(failure.failed_index, Some(1));
    assert_eq!(failure.error.reason_code(), ReasonCode::NotFound);
    assert!(failure.rollback_errors.is_empty());
    assert_eq!(node.read_bytes(INSTANCE, CONFIG), original.as_bytes());
}

#[tokio::test]
async fn validator_rejects_missing_file_before_any_write() {
    let node = NodeFixture::new().with_file(INSTANCE, CONFIG, "x: 2\n");
    let (validator, _) = engine(&node);
    let req = request(vec![
        set_key(CONFIG, "x", ConfigTree::int(3), None),
        set_key("plugins/Missing/config.yml", "y", ConfigTree::int(1), None),
    ]);

    let err = validator.validate(&node.instances_root(), &req).unwrap_err();
    assert_eq!(
        err.violations,
        vec![Violation::FileNotFound {
            file: "plugins/Missing/config.yml".into()
        }]
    );
}

#[tokio::test]
async fn replace_line_without_match_leaves_file_untouched() {
    let original = "motd=Welcome\r\nmax-players=20\r\n";
    let node = NodeFixture::new().with_file(INSTANCE, "server.properties", original);
    let (validator, updater) = engine(&node);
    let req = request(vec![ChangeOperation::replace_line(
        "server.properties",
        "^white-list=",
        "white-list=true",
    )]);

    validator.validate(&node.instances_root(), &req).unwrap();
    let failure = updater.apply(&node.instance_dir(INSTANCE), &req).await.unwrap_err();

    assert!(matches!(failure.error, ApplyError::NoMatch { .. }));
    assert_eq!(failure.error.reason_code(), ReasonCode::NoMatch);
    assert_eq!(node.read_bytes(INSTANCE, "server.properties"), original.as_bytes());
}

#[tokio::test]
async fn crlf_files_keep_their_endings() {
    let node = NodeFixture::new().with_file(INSTANCE, "server.properties", "pvp=true\r\nmotd=hi\r\n");
    let (_, updater) = engine(&node);
    let req = request(vec![
        ChangeOperation::replace_line("server.properties", "^pvp=", "pvp=false"),
        ChangeOperation::add_line("server.properties", "difficulty=hard", "^motd="),
    ]);

    updater.apply(&node.instance_dir(INSTANCE), &req).await.unwrap();
    assert_eq!(
        node.read(INSTANCE, "server.properties"),
        "pvp=false\r\nmotd=hi\r\ndifficulty=hard\r\n"
    );
}

proptest! {
    #[test]
    fn untouched_text_renders_identically(
        lines in prop::collection::vec("[a-z=# ]{0,12}", 0..8),
        crlf in any::<bool>(),
        trailing in any::<bool>(),
    ) {
        let ending = if crlf { "\r\n" } else { "\n" };
        let mut text = lines.join(ending);
        if trailing && !lines.is_empty() {
            text.push_str(ending);
        }
        prop_assert_eq!(LineBuffer::parse(&text).render(), text);
    }
}
