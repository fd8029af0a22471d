//! Comparison properties and end-to-end scans

use chrono::Utc;
use confsync_drift::{diff_trees, Baseline, BaselineLoader, DriftDetector};
use confsync_model::{ConfigTree, DriftKind, Scalar};
use confsync_test_utils::{NodeFixture, INSTANCE};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn scalar() -> impl Strategy<Value = ConfigTree> {
    prop_oneof![
        Just(ConfigTree::Scalar(Scalar::Null)),
        any::<bool>().prop_map(|b| ConfigTree::Scalar(Scalar::Bool(b))),
        any::<i64>().prop_map(ConfigTree::int),
        "[a-z0-9 ]{0,8}".prop_map(ConfigTree::string),
    ]
}

fn tree() -> impl Strategy<Value = ConfigTree> {
    scalar().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(ConfigTree::List),
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4)
                .prop_map(|entries| ConfigTree::Map(entries.into_iter().collect::<IndexMap<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn tree_against_itself_is_clean(t in tree()) {
        prop_assert!(diff_trees(&t, &t).is_empty());
    }

    #[test]
    fn scalar_against_container_is_one_mismatch(s in scalar(), other in tree()) {
        prop_assume!(!matches!(other, ConfigTree::Scalar(_)));
        for (b, c) in [(&s, &other), (&other, &s)] {
            let items = diff_trees(b, c);
            prop_assert_eq!(items.len(), 1);
            prop_assert_eq!(items[0].kind, DriftKind::ValueMismatch);
            prop_assert!(items[0].key_path.is_empty());
        }
    }

    #[test]
    fn nested_shape_change_stays_local(s in scalar(), other in tree()) {
        prop_assume!(!matches!(other, ConfigTree::Scalar(_)));
        let mut b = IndexMap::new();
        b.insert("key".to_string(), s);
        let mut c = IndexMap::new();
        c.insert("key".to_string(), other);
        let items = diff_trees(&ConfigTree::Map(b), &ConfigTree::Map(c));
        prop_assert_eq!(items.len(), 1);
        prop_assert_eq!(items[0].key_path.to_string(), "key");
    }
}

#[tokio::test]
async fn single_value_change_is_one_item() {
    let node = NodeFixture::new()
        .with_baseline("Essentials", "a.yml", "x: 1\n")
        .with_file(INSTANCE, "plugins/Essentials/a.yml", "x: 2\n");
    let baseline = BaselineLoader::new(node.baseline_root()).load().await.unwrap();
    let report = DriftDetector::default()
        .scan(INSTANCE, &node.instance_dir(INSTANCE), &baseline, Utc::now())
        .await;

    assert_eq!(report.items.len(), 1);
    let item = &report.items[0];
    assert_eq!(item.key_path.to_string(), "x");
    assert_eq!(item.baseline_value, Some(ConfigTree::int(1)));
    assert_eq!(item.current_value, Some(ConfigTree::int(2)));
    assert_eq!(item.kind, DriftKind::ValueMismatch);
}

#[tokio::test]
async fn baseline_copy_scans_clean() {
    let text = "chat:\n  radius: 0\nworlds:\n  - world\n  - nether\n";
    let node = NodeFixture::new()
        .with_baseline("Essentials", "config.yml", text)
        .with_file(INSTANCE, "plugins/Essentials/config.yml", text);
    let baseline = BaselineLoader::new(node.baseline_root()).load().await.unwrap();
    let report = DriftDetector::default()
        .scan(INSTANCE, &node.instance_dir(INSTANCE), &baseline, Utc::now())
        .await;
    assert!(report.is_clean());
}

#[tokio::test]
async fn empty_baseline_scans_clean() {
    let node = NodeFixture::new().with_file(INSTANCE, "plugins/X/a.yml", "x: 1\n");
    let report = DriftDetector::default()
        .scan(INSTANCE, &node.instance_dir(INSTANCE), &Baseline::default(), Utc::now())
        .await;
    assert!(report.is_clean());
}
