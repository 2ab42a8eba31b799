//! Property tests for the text transforms and the patch store.

use proptest::prelude::*;
use std::path::Path;
use unicorn_patcher::patch::{
    InsertionRule, LineInserter, PatchOutcome, PatchStore, TextReplacer, Transform,
};
use unicorn_patcher::store::MemoryStore;

proptest! {
    #[test]
    fn prop_apply_is_idempotent(original in "[abc\n]{0,80}") {
        let mut patches = PatchStore::new(MemoryStore::new().with_file("f.c", original.clone()));
        let path = Path::new("f.c");

        let first = patches.apply(path, &mut TextReplacer::literal([("ab", "ba")])).unwrap();
        prop_assert!(first.modified_tree());
        let patched = patches.store().get(path).unwrap().to_string();
        let writes = patches.store().writes();

        let second = patches.apply(path, &mut TextReplacer::literal([("ab", "ba")])).unwrap();
        prop_assert_eq!(second, PatchOutcome::AlreadyApplied);
        prop_assert_eq!(patches.store().get(path).unwrap(), patched.as_str());
        prop_assert_eq!(patches.store().writes(), writes);
        prop_assert_eq!(patches.store().get("f.c.bak").unwrap(), original.as_str());
    }

    #[test]
    fn prop_replacement_removes_every_match(input in "[ab\n]{0,80}") {
        let output = TextReplacer::literal([("ab", "X")]).run(&input);

        prop_assert!(!output.contains("ab"));
        prop_assert_eq!(output.matches('X').count(), input.matches("ab").count());
        prop_assert_eq!(output.lines().count(), input.lines().count());
    }

    #[test]
    fn prop_missing_pattern_is_identity(input in "[ab \n]{0,80}") {
        prop_assert_eq!(TextReplacer::literal([("zz", "y")]).run(&input), input.clone());
        let mut inserter = LineInserter::new(InsertionRule::new("zz", ["y"]));
        prop_assert_eq!(inserter.run(&input), input);
        prop_assert!(!inserter.inserted());
    }

    #[test]
    fn prop_insertion_after_first_anchor_only(
        before in prop::collection::vec("[ab]{0,4}", 0..6),
        after in prop::collection::vec("[ab]{0,4}|anchor", 0..6),
    ) {
        let mut lines = before.clone();
        lines.push("anchor".to_string());
        lines.extend(after.iter().cloned());
        let input: String = lines.iter().map(|l| format!("{l}\n")).collect();

        let mut inserter = LineInserter::new(InsertionRule::new("anchor", ["new 1", "new 2"]));
        let output = inserter.run(&input);

        let out_lines: Vec<&str> = output.lines().collect();
        prop_assert_eq!(out_lines.len(), lines.len() + 2);
        prop_assert_eq!(out_lines[before.len() + 1], "new 1");
        prop_assert_eq!(out_lines[before.len() + 2], "new 2");
        prop_assert_eq!(output.matches("new 1").count(), 1);
    }

    #[test]
    fn prop_transforms_are_deterministic(input in "[abc\n]{0,80}") {
        let mut replacer = TextReplacer::literal([("a", "bb"), ("bb", "c")]);
        let first = replacer.run(&input);
        prop_assert_eq!(replacer.run(&input), first);
    }
}
