//! Property tests for in-memory block application.

use proptest::prelude::*;
use safe_edit::{apply_blocks, DiffBlock, DiffError};

fn lines_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z][a-z0-9 =]{0,12}", 1..20)
}

fn render(lines: &[String]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

proptest! {
    /// Replacing a range with its own text is a no-op.
    #[test]
    fn identity_block_preserves_content(
        lines in lines_strategy(),
        start_seed in any::<usize>(),
        len_seed in any::<usize>(),
    ) {
        let content = render(&lines);
        let start = start_seed % lines.len();
        let len = 1 + len_seed % (lines.len() - start);
        let anchored = lines[start..start + len].join("\n");
        let block = DiffBlock::new(start + 1, Some(start + len), anchored.clone(), anchored);

        let output = apply_blocks(&content, &[block]).unwrap();
        prop_assert_eq!(output.content, content);
    }

    /// Replacing a range with new lines and then the new lines with the old
    /// ones restores the original.
    #[test]
    fn replace_then_revert_round_trips(
        lines in lines_strategy(),
        replacement in prop::collection::vec("[A-Z][A-Z0-9]{0,8}", 1..5),
        start_seed in any::<usize>(),
        len_seed in any::<usize>(),
    ) {
        let content = render(&lines);
        let start = start_seed % lines.len();
        let len = 1 + len_seed % (lines.len() - start);
        let anchored = lines[start..start + len].join("\n");
        let new_text = replacement.join("\n");

        let forward = apply_blocks(
            &content,
            &[DiffBlock::new(start + 1, Some(start + len), anchored.clone(), new_text.clone())],
        )
        .unwrap();
        prop_assert_eq!(forward.ranges[0].new_len, replacement.len());
        let new_lines: Vec<&str> = forward.content.lines().collect();
        let at = forward.ranges[0].new_start - 1;
        let expected: Vec<&str> = replacement.iter().map(String::as_str).collect();
        prop_assert_eq!(&new_lines[at..at + replacement.len()], &expected[..]);

        let back = apply_blocks(
            &forward.content,
            &[DiffBlock::new(start + 1, Some(start + replacement.len()), new_text, anchored)],
        )
        .unwrap();
        prop_assert_eq!(back.content, content);
    }

    /// Overlapping blocks are rejected regardless of the order they arrive in.
    #[test]
    fn overlap_is_always_rejected(
        lines in prop::collection::vec("[a-z]{1,6}", 3..15),
        start_seed in any::<usize>(),
        reversed in any::<bool>(),
    ) {
        let content = render(&lines);
        let start = start_seed % (lines.len() - 1);
        let first = DiffBlock::new(
            start + 1,
            Some(start + 2),
            lines[start..start + 2].join("\n"),
            "x",
        );
        let second = DiffBlock::new(start + 2, None, lines[start + 1].clone(), "y");
        let blocks = if reversed { vec![second, first] } else { vec![first, second] };

        let is_overlap = matches!(apply_blocks(&content, &blocks), Err(DiffError::Overlap { .. }));
        prop_assert!(is_overlap);
    }

    /// Disjoint single-line edits give the same result in any order.
    #[test]
    fn disjoint_blocks_commute(
        lines in prop::collection::vec("[a-z]{1,6}", 2..15),
        a_seed in any::<usize>(),
        b_seed in any::<usize>(),
    ) {
        let content = render(&lines);
        let a = a_seed % lines.len();
        let b = b_seed % lines.len();
        prop_assume!(a != b);

        let block_a = DiffBlock::new(a + 1, None, lines[a].clone(), "A1\nA2");
        let block_b = DiffBlock::new(b + 1, None, lines[b].clone(), "");

        let one = apply_blocks(&content, &[block_a.clone(), block_b.clone()]).unwrap();
        let two = apply_blocks(&content, &[block_b, block_a]).unwrap();
        prop_assert_eq!(&one.content, &two.content);
        prop_assert_eq!(
            one.content.lines().count(),
            lines.len()
        );
    }
}
