#![no_main]

use adf_roundtrip::{Document, MacroDenylist, MacroMode, extract_text_nodes, render, validate};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice(data) else {
        return;
    };
    let Ok(doc) = Document::from_value(value) else {
        return;
    };
    let denylist = MacroDenylist::default();
    let _ = validate(&doc, &denylist);
    for mode in [MacroMode::Safe, MacroMode::IncludeBodies] {
        let rendering = render(&doc, &denylist, mode);
        let covered: usize = rendering.fragments.iter().map(|f| f.spans.len()).sum();
        assert_eq!(covered, extract_text_nodes(&doc, &denylist, mode).len());
    }
});
