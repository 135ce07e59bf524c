#![no_main]

use adf_roundtrip::{
    Document, MacroDenylist, MacroMode, MatchConfig, apply_changes, detect_changes, render,
};
use libfuzzer_sys::fuzz_target;
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let edited = String::from_utf8_lossy(data);
    let Ok(doc) = Document::from_value(json!({
        "type": "doc",
        "content": [
            {"type": "heading", "attrs": {"level": 2}, "content": [{"type": "text", "text": "Status update"}]},
            {"type": "paragraph", "content": [
                {"type": "text", "text": "The rollout is "},
                {"type": "text", "text": "on track", "marks": [{"type": "em"}]},
                {"type": "text", "text": " for Thursday"}
            ]},
            {"type": "bulletList", "content": [
                {"type": "listItem", "content": [{"type": "paragraph", "content": [{"type": "text", "text": "migrate billing"}]}]}
            ]},
            {"type": "codeBlock", "content": [{"type": "text", "text": "make deploy\nmake verify"}]}
        ]
    })) else {
        return;
    };
    let denylist = MacroDenylist::default();
    let rendering = render(&doc, &denylist, MacroMode::Safe);
    let found = detect_changes(&rendering.fragments, &edited, &MatchConfig::default());
    // Every detected change must apply cleanly to the tree it came from.
    assert!(apply_changes(&doc, &found.changes, &denylist, MacroMode::Safe).is_ok());
});
