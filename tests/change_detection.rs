use adf_roundtrip::{
    Document, MacroDenylist, MacroMode, MatchConfig, MatchWarning, NodePath, PatchError, Score,
    TextNodeRef, apply_changes, detect_changes, detect_text_node_changes, render, word_overlap,
};
use serde_json::json;

fn node(indices: &[usize], text: &str) -> TextNodeRef {
    TextNodeRef {
        path: NodePath::from_indices(indices.to_vec()),
        text: text.to_string(),
    }
}

#[test]
fn overlap_of_exactly_thirty_percent_matches() {
    let original = "alpha bravo charlie delta echo foxtrot golf";
    let edited = "alpha bravo charlie xray yankee zulu";
    assert_eq!(word_overlap(original, edited), Score(3000));

    let found = detect_text_node_changes(&[node(&[0, 0], original)], edited, &MatchConfig::default());
    assert_eq!(found.changes.len(), 1);
    assert_eq!(found.changes[0].path, NodePath::from_indices(vec![0, 0]));
    assert_eq!(found.changes[0].new_text, edited);
    assert!(found.warnings.is_empty());
}

#[test]
fn overlap_below_thirty_percent_is_left_alone() {
    let original = "alpha bravo charlie delta echo foxtrot golf hotel";
    let edited = "alpha bravo charlie xray yankee zulu";
    assert!(word_overlap(original, edited) < Score(3000));

    let found = detect_text_node_changes(&[node(&[0, 0], original)], edited, &MatchConfig::default());
    assert!(found.changes.is_empty());
    assert_eq!(
        found.warnings,
        vec![
            MatchWarning::AmbiguousMatch {
                paths: vec![NodePath::from_indices(vec![0, 0])],
                text: original.to_string(),
                best_score: Score(2727),
            },
            MatchWarning::UnplacedText {
                text: edited.to_string(),
            },
        ]
    );
}

#[test]
fn whitespace_only_edits_are_not_changes() {
    let found = detect_text_node_changes(
        &[node(&[0, 0], "Ship the release")],
        "   Ship the release   \n",
        &MatchConfig::default(),
    );
    assert!(found.is_empty());
    assert!(found.warnings.is_empty());
}

#[test]
fn case_only_edits_are_changes() {
    let found = detect_text_node_changes(
        &[node(&[0, 0], "ship the release")],
        "Ship the Release",
        &MatchConfig::default(),
    );
    assert_eq!(found.changes.len(), 1);
    assert_eq!(found.changes[0].old_text, "ship the release");
    assert_eq!(found.changes[0].new_text, "Ship the Release");
}

#[test]
fn custom_threshold_is_honoured() {
    let original = "alpha bravo charlie delta";
    let edited = "alpha bravo xray yankee";
    let strict = MatchConfig {
        min_overlap: Score::from_ratio(0.5),
    };
    assert!(detect_text_node_changes(&[node(&[0, 0], original)], edited, &strict).is_empty());
    assert_eq!(
        detect_text_node_changes(&[node(&[0, 0], original)], edited, &MatchConfig::default())
            .changes
            .len(),
        1
    );
}

#[test]
fn edits_to_several_paragraphs_land_in_their_own_nodes() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": "Kickoff meeting is on Monday"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "Design review happens after kickoff"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "Launch depends on the review"}]}
        ]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);

    let edited = "Kickoff meeting is on Monday\n\n\
                  Design review happens two days after kickoff\n\n\
                  Launch depends on the final review\n";
    let found = detect_changes(&rendering.fragments, edited, &MatchConfig::default());
    let paths: Vec<_> = found.changes.iter().map(|c| c.path.to_string()).collect();
    assert_eq!(paths, vec!["/1/0", "/2/0"]);

    let patched = apply_changes(&doc, &found.changes, &denylist, MacroMode::Safe).unwrap();
    assert_eq!(
        patched.as_value()["content"][2]["content"][0]["text"],
        "Launch depends on the final review"
    );
}

#[test]
fn formatted_runs_keep_their_marks() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [{"type": "paragraph", "content": [
            {"type": "text", "text": "Deadline is "},
            {"type": "text", "text": "Friday", "marks": [{"type": "strong"}]},
            {"type": "text", "text": " at noon"}
        ]}]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);
    assert_eq!(rendering.text, "Deadline is Friday at noon\n");

    let found = detect_changes(
        &rendering.fragments,
        "Deadline is Friday at three",
        &MatchConfig::default(),
    );
    assert_eq!(found.changes.len(), 1);
    assert_eq!(found.changes[0].path.to_string(), "/0/2");
    assert_eq!(found.changes[0].new_text, " at three");

    let patched = apply_changes(&doc, &found.changes, &denylist, MacroMode::Safe).unwrap();
    let runs = &patched.as_value()["content"][0]["content"];
    assert_eq!(runs[1]["marks"][0]["type"], "strong");
    assert_eq!(runs[1]["text"], "Friday");
}

#[test]
fn patching_is_all_or_nothing() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [{"type": "paragraph", "content": [{"type": "text", "text": "one"}]}]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let changes = vec![
        adf_roundtrip::ChangeRecord {
            path: NodePath::from_indices(vec![0, 0]),
            old_text: "one".to_string(),
            new_text: "uno".to_string(),
        },
        adf_roundtrip::ChangeRecord {
            path: NodePath::from_indices(vec![0, 5]),
            old_text: "two".to_string(),
            new_text: "dos".to_string(),
        },
    ];

    let err = apply_changes(&doc, &changes, &denylist, MacroMode::Safe).unwrap_err();
    assert_eq!(
        err,
        PatchError::PathNotFound {
            path: NodePath::from_indices(vec![0, 5])
        }
    );
    assert_eq!(doc.as_value()["content"][0]["content"][0]["text"], "one");
}

#[test]
fn unedited_code_with_crlf_is_left_alone() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "codeBlock", "attrs": {"language": "sh"}, "content": [
                {"type": "text", "text": "make deploy\r\nmake verify"}
            ]}
        ]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);

    let found = detect_changes(&rendering.fragments, &rendering.text, &MatchConfig::default());
    assert!(found.is_empty());
    assert!(found.warnings.is_empty());

    let edited = rendering.text.replace("make verify", "make verify smoke");
    let found = detect_changes(&rendering.fragments, &edited, &MatchConfig::default());
    assert_eq!(found.changes.len(), 1);
    assert_eq!(found.changes[0].new_text, "make deploy\r\nmake verify smoke");
}

#[test]
fn crlf_saved_edits_do_not_add_carriage_returns() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": "Standup moves to ten"}]},
            {"type": "codeBlock", "content": [{"type": "text", "text": "cargo build\ncargo test"}]}
        ]
    }))
    .unwrap();
    let rendering = render(&doc, &MacroDenylist::default(), MacroMode::Safe);

    let edited = rendering
        .text
        .replace("ten", "eleven")
        .replace("cargo test", "cargo test --all")
        .replace('\n', "\r\n");
    let found = detect_changes(&rendering.fragments, &edited, &MatchConfig::default());
    let texts: Vec<_> = found.changes.iter().map(|c| c.new_text.as_str()).collect();
    assert_eq!(texts, vec!["Standup moves to eleven", "cargo build\ncargo test --all"]);
    assert!(found.warnings.is_empty());
}

#[test]
fn paragraph_starting_with_a_fence_keeps_later_edits() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": "```bash is how you open a fence"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "The launch is on Monday"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "<!-- is not a macro here"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "---"}]}
        ]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);

    let unchanged = detect_changes(&rendering.fragments, &rendering.text, &MatchConfig::default());
    assert!(unchanged.is_empty());
    assert!(unchanged.warnings.is_empty());

    let edited = rendering.text.replace("Monday", "Tuesday");
    let found = detect_changes(&rendering.fragments, &edited, &MatchConfig::default());
    assert!(found.warnings.is_empty());
    assert_eq!(found.changes.len(), 1);
    assert_eq!(found.changes[0].path.to_string(), "/1/0");
    assert_eq!(found.changes[0].new_text, "The launch is on Tuesday");
}

#[test]
fn edits_around_hard_breaks_and_mentions() {
    let doc = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "paragraph", "content": [
                {"type": "text", "text": "Owner: "},
                {"type": "mention", "attrs": {"id": "u-1", "text": "@Alice"}},
                {"type": "text", "text": " reviews"}
            ]},
            {"type": "paragraph", "content": [
                {"type": "text", "text": "Line one"},
                {"type": "hardBreak"},
                {"type": "text", "text": "Line two"}
            ]}
        ]
    }))
    .unwrap();
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);

    let edited = "Owner: @Alice reviews today\n\nLine one\nLine two revised\n";
    let found = detect_changes(&rendering.fragments, edited, &MatchConfig::default());
    let paths: Vec<_> = found.changes.iter().map(|c| c.path.to_string()).collect();
    assert_eq!(paths, vec!["/0/2", "/1/2"]);

    let patched = apply_changes(&doc, &found.changes, &denylist, MacroMode::Safe).unwrap();
    let content = &patched.as_value()["content"];
    assert_eq!(content[0]["content"][1]["attrs"]["text"], "@Alice");
    assert_eq!(content[0]["content"][2]["text"], " reviews today");
    assert_eq!(content[1]["content"][1]["type"], "hardBreak");
    assert_eq!(content[1]["content"][2]["text"], "Line two revised");

    let renamed = detect_changes(
        &rendering.fragments,
        "Owner: @Bob reviews\n\nLine one\nLine two\n",
        &MatchConfig::default(),
    );
    assert!(renamed.is_empty());
    assert!(matches!(
        renamed.warnings.as_slice(),
        [MatchWarning::SpansMultipleNodes { .. }]
    ));
}
