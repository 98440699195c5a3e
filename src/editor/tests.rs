//! Tests for the line editor against a real backup store.

#[cfg(test)]
mod tests {
    use crate::backup::BackupStore;
    use crate::editor::LineEditor;
    use crate::error::RepairError;
    use crate::workspace::SourceTree;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        src: TempDir,
        _backups: TempDir,
        store: Arc<BackupStore>,
        editor: LineEditor,
    }

    fn fixture(content: &[u8]) -> Fixture {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("main.tex"), content).unwrap();
        let backups = TempDir::new().unwrap();
        let tree = SourceTree::open(src.path()).unwrap();
        let store = Arc::new(BackupStore::open(&tree, backups.path()).unwrap());
        let editor = LineEditor::new(tree, store.clone(), 0.01);
        Fixture {
            src,
            _backups: backups,
            store,
            editor,
        }
    }

    impl Fixture {
        fn bytes(&self) -> Vec<u8> {
            fs::read(self.src.path().join("main.tex")).unwrap()
        }
    }

    const DOC: &[u8] = b"\\documentclass{article}\r\n\\begin{document}\r\nHello {world\r\n\\end{document}\r\n";

    #[test]
    fn test_read_whole_file_and_slices() {
        let fx = fixture(DOC);

        let all = fx.editor.read("main.tex", None, None).unwrap();
        assert_eq!(all.total, 4);
        assert_eq!(all.lines[2], "Hello {world");

        let slice = fx.editor.read("main.tex", Some(2), Some(99)).unwrap();
        assert_eq!((slice.start, slice.end), (2, 4));
        assert_eq!(slice.lines.len(), 3);
        assert!(slice.numbered().starts_with("2: \\begin{document}\n"));
    }

    #[test]
    fn test_read_start_past_end_is_out_of_range() {
        let fx = fixture(DOC);
        let err = fx.editor.read("main.tex", Some(5), None).unwrap_err();
        assert!(matches!(err, RepairError::OutOfRange { line: 5, total: 4, .. }));
    }

    #[test]
    fn test_replace_line_bounds() {
        let fx = fixture(DOC);
        for line in [0, 5] {
            let err = fx.editor.replace_line("main.tex", line, "x").unwrap_err();
            assert!(matches!(err, RepairError::OutOfRange { .. }));
        }
        // Rejected edits neither touch the file nor take a snapshot.
        assert_eq!(fx.bytes(), DOC);
        assert!(fx.store.records().is_empty());

        let outcome = fx.editor.replace_line("main.tex", 3, "Hello {world}").unwrap();
        assert_eq!(outcome.total_lines, 4);
        assert_eq!(
            fx.editor.read("main.tex", Some(3), Some(3)).unwrap().lines,
            vec!["Hello {world}"]
        );
    }

    #[test]
    fn test_multiline_content_is_rejected() {
        let fx = fixture(DOC);
        let err = fx.editor.insert_line("main.tex", 1, "a\nb").unwrap_err();
        assert!(matches!(err, RepairError::InvalidArgument(_)));
    }

    #[test]
    fn test_insert_then_delete_restores_original_for_every_position() {
        let fx = fixture(DOC);
        for k in 1..=5 {
            fx.editor.insert_line("main.tex", k, "% marker").unwrap();
            assert_eq!(fx.editor.read("main.tex", Some(k), Some(k)).unwrap().lines, vec!["% marker"]);
            fx.editor.delete_line("main.tex", k).unwrap();
            assert_eq!(fx.bytes(), DOC, "position {}", k);
        }
    }

    #[test]
    fn test_insert_past_append_position_is_out_of_range() {
        let fx = fixture(DOC);
        let err = fx.editor.insert_line("main.tex", 6, "x").unwrap_err();
        assert!(matches!(err, RepairError::OutOfRange { line: 6, .. }));
    }

    #[test]
    fn test_restore_of_first_backup_reproduces_original_bytes() {
        let original = b"\xEF\xBB\xBFa\nb\nc";
        let fx = fixture(original);

        fx.editor.replace_line("main.tex", 2, "B").unwrap();
        fx.editor.insert_line("main.tex", 1, "first").unwrap();
        fx.editor.delete_line("main.tex", 4).unwrap();
        fx.editor.insert_line("main.tex", 4, "last").unwrap();
        assert_ne!(fx.bytes(), original);

        let first = fx.store.earliest("main.tex").unwrap();
        fx.store.restore("main.tex", &first).unwrap();
        assert_eq!(fx.bytes(), original);
    }

    #[test]
    fn test_edit_on_unnormalized_file_fails() {
        let (gbk, _, _) = encoding_rs::GBK.encode("中文内容\n");
        let fx = fixture(&gbk);
        let err = fx.editor.delete_line("main.tex", 1).unwrap_err();
        assert!(matches!(err, RepairError::NotNormalized { .. }));
        assert_eq!(fx.bytes(), &gbk[..]);
    }

    #[test]
    fn test_edit_on_missing_file_is_recoverable_io_failure() {
        let fx = fixture(DOC);
        let err = fx.editor.read("nope.tex", None, None).unwrap_err();
        assert!(matches!(err, RepairError::Io { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_replace_lines_range() {
        let fx = fixture(DOC);

        let err = fx
            .editor
            .replace_lines("main.tex", 3, 5, &["x".to_string()])
            .unwrap_err();
        assert!(matches!(err, RepairError::OutOfRange { line: 5, .. }));
        let err = fx
            .editor
            .replace_lines("main.tex", 3, 2, &["x".to_string()])
            .unwrap_err();
        assert!(matches!(err, RepairError::InvalidArgument(_)));
        assert!(fx.store.records().is_empty());

        let outcome = fx
            .editor
            .replace_lines(
                "main.tex",
                2,
                3,
                &["\\begin{document}".to_string(), "Hello".to_string(), "{world}".to_string()],
            )
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.total_lines, 5);
        assert_eq!(
            fx.bytes(),
            b"\\documentclass{article}\r\n\\begin{document}\r\nHello\r\n{world}\r\n\\end{document}\r\n"
        );

        let same = fx
            .editor
            .replace_lines("main.tex", 3, 4, &["Hello".to_string(), "{world}".to_string()])
            .unwrap();
        assert!(!same.changed);

        let first = fx.store.earliest("main.tex").unwrap();
        assert_eq!(fx.store.content(&first).unwrap(), DOC);
    }
}
