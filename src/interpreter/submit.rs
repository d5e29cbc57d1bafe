/// The reserved marker generated code calls to declare a final answer.
pub const SUBMIT_MARKER: &str = "SUBMIT(";

/// Whether a code fragment invokes the submission marker anywhere in its
/// raw text. This is a literal scan: a marker inside a string literal or a
/// comment still counts.
pub fn contains_marker(code: &str) -> bool {
    code.contains(SUBMIT_MARKER)
}

/// Extract the submitted expression: the text between the marker's opening
/// parenthesis and the first `)` that follows it.
///
/// Known limitation: this is a text scan, not a parser. A literal `)` inside
/// the expression's own nested calls or string literals closes the scan
/// early, e.g. `SUBMIT(f(x))` extracts `f(x`. Returns `None` when the marker
/// is absent or no closing parenthesis follows it.
pub fn extract_expression(code: &str) -> Option<&str> {
    let start = code.find(SUBMIT_MARKER)?;
    let open = start + SUBMIT_MARKER.len();
    let close = code[open..].find(')')?;
    Some(code[open..open + close].trim())
}
