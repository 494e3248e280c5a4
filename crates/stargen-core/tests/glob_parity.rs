//! Parity test for the shape-classified glob matcher.
//!
//! Any shortcut the classifier takes must preserve the behaviour of the
//! reference doublestar matcher. Only agreement is checked, not the match
//! results themselves, so the corpus can freely mix positive and negative
//! cases per pattern.

use stargen_core::glob::{parse_glob_expression, parse_glob_expressions, reference_matcher};

fn corpus() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        // Exact matches
        (
            "file.txt",
            vec!["file.txt", "./file.txt", "file", ".file", "file.", "a/file.txt"],
        ),
        (
            "WORKSPACE",
            vec!["WORKSPACE", "WORKSPACE.bazel", "a/WORKSPACE", "WORKSPACE.txt"],
        ),
        ("@foo/bar", vec!["@foo/bar/baz", "@foo/bar", "foo/bar", "a/@foo/bar"]),
        (
            "@foo/*@1.2.3",
            vec!["@foo/bar/baz@1.2.3", "@foo/bar@1.2.3", "foo/bar@1.2.3", "@foo/baz@1.2.3"],
        ),
        // Exact matches with paths
        (
            "path/to/file.txt",
            vec!["path/to/file.txt", "a/path/to/file.txt", "path/to/file.txt2"],
        ),
        // Doublestar with prefix
        (
            "src/**/*.go",
            vec!["src/main.go", "src/deep/nested/file.go", "src/foo.go", "src/", "src/.go"],
        ),
        (
            "src/foo/**/*.go",
            vec![
                "src/main.go",
                "src/foo/main.go",
                "src/foo/bar/main.go",
                "foo/src/main.go",
                "main.go",
                "src/foo/src/main.go",
            ],
        ),
        // Prefix and suffix that are equal
        (
            "foo/**/foo",
            vec!["foo", "foo/foo", "foo/bar/foo", "foo/bar/NOTfoo", "foo/foo/foo"],
        ),
        (
            "src/**/important.ts",
            vec![
                "important.ts",
                "NOTimportant.ts",
                "NOT.important.ts",
                "important.NOT.ts",
                "src/important.ts",
                "src/NOTimportant.ts",
                "src/NOT.important.ts",
                "src/important.NOT.ts",
            ],
        ),
        // Body with doublestars
        (
            "**/foo/**",
            vec!["foo/bar", "a/foo/baz", "a/b/c/foo/d/e", "foo", "a/b/c/foo", "foo/a/b/c"],
        ),
        // Starting doublestars
        (
            "**/WORKSPACE",
            vec![
                "WORKSPACE",
                "notWORKSPACE",
                "notWORKSPACE.bazel",
                "WORKSPACE.bazel",
                "a/WORKSPACE",
                "a/notWORKSPACE",
                "WORKSPACE.txt",
                "a/WORKSPACE.bazel",
            ],
        ),
        ("**/@foo/bar", vec!["@foo/bar/baz", "@foo/bar", "foo/bar", "a/@foo/bar"]),
        ("**/*.go", vec!["main.go", "src/main.go", "src/deep/nested/file.go"]),
        (
            "**/*_test.go",
            vec!["src/file_test.go", "src/path/file_test.go", "deep/nested/test_file.go"],
        ),
        ("**/*.pb.go", vec!["generated.pb.go", "src/generated.pb.go", "pb.go"]),
        ("**/*.d.ts", vec!["src/types.d.ts", "types.d.ts", "d.ts", "x.ts"]),
        // Prefix without doublestars
        (
            "src/*.go",
            vec!["src/main.go", "main.go", "src/a/b/main.go", "foo/src/main.go"],
        ),
        (
            "src/*/test_*.go",
            vec!["src/path/test_file.go", "src/a/test_b/c.go", "src/test_file.go"],
        ),
        ("**/*.test.js", vec!["src/test.main.js", "src/main.test.js"]),
        (
            "src/**/test_*.spec.ts",
            vec!["src/path/test_file.spec.ts", "src/test_foo.spec.ts"],
        ),
        (
            "very/long/path/with/many/segments/file.go",
            vec!["very/long/path/with/many/segments/file.go"],
        ),
        // Unicode paths
        (
            "path/with/unicode/测试文件.txt",
            vec!["path/with/unicode/测试文件.txt", "path/with/unicode/other.txt"],
        ),
        // Odd cases
        ("**", vec!["a", "a/b/c"]),
        ("**/*", vec!["a", "a.b", "a/b/c", "a/b/c.d"]),
    ]
}

#[test]
fn fast_matcher_agrees_with_reference() {
    for (pattern, cases) in corpus() {
        let expr = parse_glob_expression(pattern)
            .unwrap_or_else(|e| panic!("pattern {pattern:?} failed to parse: {e}"));
        let reference = reference_matcher(pattern).unwrap();

        for case in cases {
            assert_eq!(
                expr.matches(case),
                reference.is_match(case),
                "pattern {pattern:?} disagreed with the reference on {case:?}",
            );
        }
    }
}

#[test]
fn single_and_multi_pattern_agree() {
    for (pattern, cases) in corpus() {
        let single = parse_glob_expression(pattern).unwrap();
        let multi = parse_glob_expressions(&[pattern.to_string(), "zz-no-match".to_string()])
            .unwrap();

        for case in cases {
            // The extra exact pattern never matches the corpus cases, so the
            // multi matcher must agree with the single-pattern matcher.
            assert_eq!(
                single.matches(case),
                multi.matches(case),
                "pattern {pattern:?} disagreed between single and multi on {case:?}",
            );
        }
    }
}

#[test]
fn multi_pattern_union_matches_any() {
    let patterns: Vec<String> = corpus().iter().map(|(p, _)| p.to_string()).collect();
    let multi = parse_glob_expressions(&patterns).unwrap();

    for (pattern, cases) in corpus() {
        let reference = reference_matcher(pattern).unwrap();
        for case in cases {
            if reference.is_match(case) {
                assert!(
                    multi.matches(case),
                    "union matcher missed {case:?} claimed by {pattern:?}",
                );
            }
        }
    }
}
