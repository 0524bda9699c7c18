//! Inline literal discovery in JavaScript sources.
//!
//! [`scan_anchored_literals`] makes one pass over a script, tracking strings,
//! comments, and the bracket stack, and yields every object literal that
//! directly owns a scene-collection key. [`js_to_json`] then rewrites
//! JavaScript literal syntax into strict JSON so `serde_json` can parse it.
//!
//! Regex literals are not recognized; a quote inside one can desynchronize
//! the scanner for the rest of that script. That only costs recall.

use serde_json::Value;

use super::shape::is_scene_key;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Code,
    Str(u8),
    LineComment,
    BlockComment,
}

struct Frame {
    start: usize,
    object: bool,
    anchored: bool,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Object literals in `src` that have a scene key as a direct member.
///
/// Results come out in closing order (inner literals before the literals that
/// contain them). Literals longer than `max_bytes` are skipped.
pub fn scan_anchored_literals(src: &str, max_bytes: usize) -> Vec<&str> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut mode = Mode::Code;
    let mut str_start = 0usize;
    // Last identifier or string token, if nothing but whitespace followed it.
    let mut pending: Option<(usize, usize)> = None;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match mode {
            Mode::Str(q) => {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    mode = Mode::Code;
                    pending = (q != b'`').then_some((str_start, i));
                }
            }
            Mode::LineComment => {
                if b == b'\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    mode = Mode::Code;
                    i += 1;
                }
            }
            Mode::Code => match b {
                b'"' | b'\'' | b'`' => {
                    mode = Mode::Str(b);
                    str_start = i + 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    mode = Mode::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    mode = Mode::BlockComment;
                    i += 1;
                }
                b'{' | b'[' => {
                    stack.push(Frame {
                        start: i,
                        object: b == b'{',
                        anchored: false,
                    });
                    pending = None;
                }
                b'}' | b']' => {
                    if let Some(frame) = stack.pop() {
                        let len = i + 1 - frame.start;
                        if frame.object && frame.anchored && b == b'}' && len <= max_bytes {
                            out.push(&src[frame.start..=i]);
                        }
                    }
                    pending = None;
                }
                b':' => {
                    if let (Some((s, e)), Some(top)) = (pending, stack.last_mut()) {
                        if top.object && is_scene_key(&src[s..e]) {
                            top.anchored = true;
                        }
                    }
                    pending = None;
                }
                _ if is_ident_start(b) => {
                    let start = i;
                    while i < bytes.len() && is_ident_char(bytes[i]) {
                        i += 1;
                    }
                    pending = Some((start, i));
                    continue;
                }
                _ if b.is_ascii_whitespace() => {}
                _ => pending = None,
            },
        }
        i += 1;
    }
    out
}

/// Rewrite a JavaScript object/array literal into strict JSON.
///
/// Handles unquoted and numeric keys, single-quoted and template strings
/// (without interpolation), comments, trailing commas, `!0`/`!1`,
/// `undefined`, `void 0`, `NaN`, and `Infinity`.
pub fn js_to_json(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' | '`' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            '}' | ']' => {
                drop_trailing_comma(&mut out);
                out.push(c);
            }
            '!' if matches!(chars.get(i + 1), Some('0') | Some('1')) => {
                out.push_str(if chars[i + 1] == '0' { "true" } else { "false" });
                i += 2;
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if next_non_ws(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else if word == "void" && next_non_ws(&chars, i) == Some('0') {
                    while chars[i] != '0' {
                        i += 1;
                    }
                    i += 1;
                    out.push_str("null");
                } else {
                    out.push_str(match word.as_str() {
                        "undefined" | "NaN" | "Infinity" => "null",
                        other => other,
                    });
                }
                continue;
            }
            c if c.is_ascii_digit() && key_position(&out) => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                if next_non_ws(&chars, i) == Some(':') {
                    out.push('"');
                    out.push_str(&digits);
                    out.push('"');
                } else {
                    out.push_str(&digits);
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Convert a literal and parse it.
pub fn parse_literal(src: &str) -> Option<Value> {
    serde_json::from_str(src)
        .or_else(|_| serde_json::from_str(&js_to_json(src)))
        .ok()
}

fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('\'') => out.push('\''),
                Some('`') => out.push('`'),
                Some(&n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => {}
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push('"');
            return i + 1;
        }
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }
    out.push('"');
    i
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

fn next_non_ws(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}

fn key_position(out: &str) -> bool {
    matches!(out.trim_end().chars().last(), Some('{') | Some(','))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finds_anchored_object() {
        let src = r#"var a = 1; window.game = {"pages":[{"text":"one"},{"text":"two"}]}; f({x:1});"#;
        let found = scan_anchored_literals(src, usize::MAX);
        assert_eq!(found, vec![r#"{"pages":[{"text":"one"},{"text":"two"}]}"#]);
    }

    #[test]
    fn test_unquoted_keys_in_minified_store() {
        let src = r#"new Vuex.Store({state:{app:{rows:[{title:'A',titleText:"x"}],backpack:[]}},getters:{}})"#;
        let found = scan_anchored_literals(src, usize::MAX);
        assert_eq!(found.len(), 1);
        let value = parse_literal(found[0]).unwrap();
        assert_eq!(value["rows"][0]["title"], json!("A"));
    }

    #[test]
    fn test_ignores_keys_inside_strings_and_comments() {
        let src = r#"var s = "{pages: [1]}"; // {scenes: []}
            /* {rows: []} */ var o = {other: 1};"#;
        assert!(scan_anchored_literals(src, usize::MAX).is_empty());
    }

    #[test]
    fn test_nested_anchors_come_inner_first() {
        let src = r#"x = {pages:[{scenes:[{text:"a"}]}]}"#;
        let found = scan_anchored_literals(src, usize::MAX);
        assert_eq!(found.len(), 2);
        assert!(found[0].starts_with("{scenes"));
        assert!(found[1].starts_with("{pages"));
    }

    #[test]
    fn test_size_cap() {
        let src = r#"x = {pages:[{text:"aaaaaaaaaaaaaaaaaaaa"}]}"#;
        assert!(scan_anchored_literals(src, 10).is_empty());
    }

    #[test]
    fn test_js_to_json_syntax() {
        let src = "{a:!0,b:!1,'c':'it\\'s',d:undefined,e:void 0,f:[1,2,],7:`multi\nline`, /* c */ g:\"q\\\"q\",}";
        let value: Value = serde_json::from_str(&js_to_json(src)).unwrap();
        assert_eq!(
            value,
            json!({ "a": true, "b": false, "c": "it's", "d": null, "e": null,
                    "f": [1, 2], "7": "multi\nline", "g": "q\"q" })
        );
    }

    #[test]
    fn test_strict_json_passes_through() {
        let value = parse_literal(r#"{"pages": [{"text": "x, }"}]}"#).unwrap();
        assert_eq!(value["pages"][0]["text"], json!("x, }"));
    }
}
