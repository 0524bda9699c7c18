//! Key-shape matching: turns an arbitrary JSON value into canonical scenes.
//!
//! Bundles never agree on a schema. What they share is a recognizable
//! shape: an array of scene-like objects under a key such as `rows` or
//! `pages`, each carrying title/text keys and often a nested array of
//! choices. Matching is purely on key names.

use std::collections::{HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::types::{ChoiceBlock, Confidence, SceneBlock};

/// Keys whose array value is a scene collection.
pub const SCENE_KEYS: &[&str] = &[
    "scenes", "pages", "rows", "passages", "sections", "chapters", "nodes", "cards",
];

const CHOICE_KEYS: &[&str] = &["objects", "choices", "options", "answers", "links"];
const TITLE_KEYS: &[&str] = &["title", "name", "heading"];
const TEXT_KEYS: &[&str] = &["titleText", "text", "content", "body", "description", "passage"];

/// Directory prefixes that mark a string as a media reference.
pub const MEDIA_PREFIXES: &[&str] = &[
    "images/", "img/", "music/", "audio/", "videos/", "fonts/", "css/", "js/", "assets/",
];

const MEDIA_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".avif", ".svg", ".mp3", ".ogg", ".wav", ".mp4",
    ".webm",
];

/// How deep to search for a scene collection.
const MAX_DEPTH: usize = 8;

pub fn is_scene_key(key: &str) -> bool {
    SCENE_KEYS.contains(&key)
}

/// Result of matching a value against the scene/choice shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMatch {
    pub title: Option<String>,
    pub scenes: Vec<SceneBlock>,
    pub media: Vec<String>,
    pub confidence: Confidence,
}

impl ShapeMatch {
    pub fn weight(&self) -> usize {
        self.scenes.len() + self.scenes.iter().map(|s| s.choices.len()).sum::<usize>()
    }
}

/// Match `value` against the scene shape.
///
/// Searches breadth-first for the shallowest scene collection; among
/// collections at the same depth the longest wins. A root object without any
/// scene collection but with a text key becomes a single weak scene.
pub fn canonicalize(value: &Value) -> Option<ShapeMatch> {
    let (scenes, confidence) = match find_scene_array(value) {
        Some(items) => {
            let scenes: Vec<SceneBlock> = items.iter().filter_map(scene_from).collect();
            if scenes.is_empty() {
                return None;
            }
            let structured = scenes
                .iter()
                .filter(|s| s.text.is_some() || !s.choices.is_empty())
                .count();
            let confidence = if structured * 2 > items.len() {
                Confidence::Structural
            } else {
                Confidence::Weak
            };
            (scenes, confidence)
        }
        None => {
            let obj = value.as_object()?;
            let text = first_string(obj, TEXT_KEYS)?;
            let scene = SceneBlock {
                title: first_string(obj, TITLE_KEYS),
                text: Some(text),
                choices: Vec::new(),
            };
            (vec![scene], Confidence::Weak)
        }
    };

    let title = value.as_object().and_then(|o| first_string(o, &["title", "name"]));
    let mut media = Vec::new();
    collect_media(value, &mut media, &mut HashSet::new());

    Some(ShapeMatch {
        title,
        scenes,
        media,
        confidence,
    })
}

/// Pick the best match: highest confidence, then largest scene+choice count.
/// Earlier candidates win exact ties.
pub fn pick_best<I>(matches: I) -> Option<ShapeMatch>
where
    I: IntoIterator<Item = ShapeMatch>,
{
    let mut best: Option<ShapeMatch> = None;
    for m in matches {
        let better = match &best {
            None => true,
            Some(b) => (m.confidence, m.weight()) > (b.confidence, b.weight()),
        };
        if better {
            best = Some(m);
        }
    }
    best
}

fn find_scene_array(root: &Value) -> Option<&Vec<Value>> {
    let mut queue: VecDeque<(&Value, usize)> = VecDeque::new();
    queue.push_back((root, 0));
    let mut found: Option<(&Vec<Value>, usize)> = None;

    while let Some((value, depth)) = queue.pop_front() {
        if let Some((_, found_depth)) = found {
            if depth > found_depth {
                break;
            }
        }
        if depth > MAX_DEPTH {
            break;
        }
        match value {
            Value::Object(obj) => {
                for (key, child) in obj {
                    if let (true, Value::Array(items)) = (is_scene_key(key), child) {
                        if items.iter().any(|i| i.is_object() || i.is_string()) {
                            let longer = found.map(|(f, _)| items.len() > f.len()).unwrap_or(true);
                            if longer {
                                found = Some((items, depth));
                            }
                        }
                    }
                    if child.is_object() || child.is_array() {
                        queue.push_back((child, depth + 1));
                    }
                }
            }
            Value::Array(items) => {
                for child in items.iter().filter(|c| c.is_object() || c.is_array()) {
                    queue.push_back((child, depth + 1));
                }
            }
            _ => {}
        }
    }
    found.map(|(items, _)| items)
}

fn scene_from(value: &Value) -> Option<SceneBlock> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(SceneBlock {
            title: None,
            text: Some(s.clone()),
            choices: Vec::new(),
        }),
        Value::Object(obj) => {
            let choices = CHOICE_KEYS
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_array))
                .map(|items| items.iter().filter_map(choice_from).collect())
                .unwrap_or_default();
            let scene = SceneBlock {
                title: first_string(obj, TITLE_KEYS),
                text: first_string(obj, TEXT_KEYS),
                choices,
            };
            let empty = scene.title.is_none() && scene.text.is_none() && scene.choices.is_empty();
            (!empty).then_some(scene)
        }
        _ => None,
    }
}

fn choice_from(value: &Value) -> Option<ChoiceBlock> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(ChoiceBlock {
            title: None,
            text: Some(s.clone()),
        }),
        Value::Object(obj) => {
            let choice = ChoiceBlock {
                title: first_string(obj, TITLE_KEYS),
                text: first_string(obj, TEXT_KEYS),
            };
            (choice.title.is_some() || choice.text.is_some()).then_some(choice)
        }
        _ => None,
    }
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        obj.get(*k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Whether a string value points at a media file.
pub fn is_media_ref(s: &str) -> bool {
    if s.starts_with("data:") || s.len() > 2048 {
        return false;
    }
    let lower = s.to_lowercase();
    MEDIA_PREFIXES.iter().any(|p| lower.starts_with(p))
        || MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn collect_media(value: &Value, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    match value {
        Value::String(s) if is_media_ref(s) => {
            if seen.insert(s.clone()) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_media(v, out, seen)),
        Value::Object(obj) => obj.values().for_each(|v| collect_media(v, out, seen)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_with_objects() {
        let value = json!({
            "rows": [
                { "title": "Origin", "titleText": "Pick where you come from.",
                  "objects": [ { "title": "Noble", "text": "Born rich.", "image": "images/noble.png" },
                               { "title": "Orphan", "text": "Born poor." } ] },
                { "title": "Powers", "titleText": "Pick a power.", "objects": [] }
            ]
        });
        let m = canonicalize(&value).unwrap();
        assert_eq!(m.scenes.len(), 2);
        assert_eq!(m.scenes[0].choices.len(), 2);
        assert_eq!(m.scenes[0].text.as_deref(), Some("Pick where you come from."));
        assert_eq!(m.confidence, Confidence::Structural);
        assert_eq!(m.media, vec!["images/noble.png"]);
        assert_eq!(m.weight(), 4);
    }

    #[test]
    fn test_nested_scene_collection() {
        let value = json!({ "state": { "app": { "pages": [ { "text": "a" }, { "text": "b" } ] } } });
        let m = canonicalize(&value).unwrap();
        assert_eq!(m.scenes.len(), 2);
        assert_eq!(m.scenes[1].text.as_deref(), Some("b"));
    }

    #[test]
    fn test_titles_only_is_weak() {
        let value = json!({ "nodes": [ { "name": "a" }, { "name": "b" }, { "name": "c" } ] });
        let m = canonicalize(&value).unwrap();
        assert_eq!(m.confidence, Confidence::Weak);
    }

    #[test]
    fn test_content_document_fallback() {
        let value = json!({ "title": "Solo", "content": "Just one page." });
        let m = canonicalize(&value).unwrap();
        assert_eq!(m.scenes.len(), 1);
        assert_eq!(m.title.as_deref(), Some("Solo"));
        assert_eq!(m.confidence, Confidence::Weak);
    }

    #[test]
    fn test_no_shape() {
        assert!(canonicalize(&json!({ "width": 3, "height": 4 })).is_none());
        assert!(canonicalize(&json!({ "pages": [1, 2, 3] })).is_none());
    }

    #[test]
    fn test_pick_best_prefers_confidence_then_weight() {
        let nodes = json!({ "nodes": [ {"name":"a"},{"name":"b"},{"name":"c"} ] });
        let weak_big = canonicalize(&nodes).unwrap();
        let strong_small = canonicalize(&json!({ "pages": [ {"text":"a"} ] })).unwrap();
        let strong_big = canonicalize(&json!({ "pages": [ {"text":"a"}, {"text":"b"} ] })).unwrap();
        let best = pick_best(vec![weak_big, strong_small, strong_big.clone()]).unwrap();
        assert_eq!(best, strong_big);
    }

    #[test]
    fn test_media_detection() {
        assert!(is_media_ref("images/cover.png"));
        assert!(is_media_ref("https://cdn.example.com/a.webp"));
        assert!(!is_media_ref("data:image/png;base64,AAAA"));
        assert!(!is_media_ref("hello world"));
    }
}
