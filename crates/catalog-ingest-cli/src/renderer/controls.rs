//! Operator control panel injected into the game page.
//!
//! Buttons push `{kind, data}` records onto `window.__ingestSignals`; the
//! surface drains that array on every poll.

use base64::Engine;
use serde::Deserialize;

use catalog_ingest::OperatorSignal;

pub(crate) const PANEL_ID: &str = "__ingest_panel";

pub(crate) const INSTALL_JS: &str = r#"(() => {
  window.__ingestSignals = window.__ingestSignals || [];
  if (document.getElementById('__ingest_panel')) return false;
  const push = (kind, data) => window.__ingestSignals.push({ kind, data: data || null });
  const panel = document.createElement('div');
  panel.id = '__ingest_panel';
  panel.style.cssText = 'position:fixed;top:8px;right:8px;z-index:2147483647;display:flex;gap:6px;' +
    'padding:6px;background:rgba(20,20,20,.85);border-radius:6px;font:12px sans-serif';
  const button = (label, onClick) => {
    const b = document.createElement('button');
    b.textContent = label;
    b.style.cssText = 'padding:4px 8px;cursor:pointer';
    b.addEventListener('click', (e) => { e.stopPropagation(); onClick(b); });
    panel.appendChild(b);
    return b;
  };
  let paused = false;
  button('Pause', (b) => {
    paused = !paused;
    b.textContent = paused ? 'Resume' : 'Pause';
    push(paused ? 'pause' : 'resume');
  });
  button('Finish', () => push('auto_finish'));
  button('Save', () => push('save_manual'));
  const input = document.createElement('input');
  input.type = 'file';
  input.accept = 'image/*';
  input.style.display = 'none';
  input.addEventListener('change', () => {
    const file = input.files && input.files[0];
    if (!file) return;
    const reader = new FileReader();
    reader.onload = () => push('upload', reader.result);
    reader.readAsDataURL(file);
    input.value = '';
  });
  panel.appendChild(input);
  button('Upload', () => input.click());
  document.body.appendChild(panel);
  return true;
})()"#;

pub(crate) const REMOVE_JS: &str = r#"(() => {
  const panel = document.getElementById('__ingest_panel');
  if (panel) panel.remove();
  return !!panel;
})()"#;

pub(crate) const DRAIN_JS: &str = r#"(() => {
  const out = window.__ingestSignals || [];
  window.__ingestSignals = [];
  return out;
})()"#;

pub(crate) fn scroll_step_js(step: u32) -> String {
    format!(
        "(() => {{ const before = window.scrollY; window.scrollBy(0, {step}); return window.scrollY > before; }})()"
    )
}

pub(crate) fn download_js(file_name: &str, bytes: &[u8]) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    let name = serde_json::Value::String(file_name.to_string());
    format!(
        "(() => {{ const a = document.createElement('a'); a.href = 'data:image/webp;base64,{data}'; \
         a.download = {name}; document.body.appendChild(a); a.click(); a.remove(); return true; }})()"
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSignal {
    kind: String,
    #[serde(default)]
    data: Option<String>,
}

/// Convert drained panel records to signals, dropping anything malformed.
pub(crate) fn parse_signals(raw: Vec<RawSignal>) -> Vec<OperatorSignal> {
    raw.into_iter()
        .filter_map(|r| match r.kind.as_str() {
            "pause" => Some(OperatorSignal::Pause),
            "resume" => Some(OperatorSignal::Resume),
            "auto_finish" => Some(OperatorSignal::AutoFinish),
            "save_manual" => Some(OperatorSignal::SaveManual),
            "upload" => {
                let bytes = r.data.as_deref().and_then(decode_data_url);
                if bytes.is_none() {
                    tracing::warn!("Ignoring upload with unreadable data");
                }
                bytes.map(|bytes| OperatorSignal::UploadReplace { bytes })
            }
            other => {
                tracing::debug!("Unknown panel signal {other:?}");
                None
            }
        })
        .collect()
}

/// Decode the payload of a `data:<mime>;base64,<payload>` URL.
pub(crate) fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let (header, payload) = url.strip_prefix("data:")?.split_once(',')?;
    if !header.ends_with(";base64") {
        return None;
    }
    base64::engine::general_purpose::STANDARD.decode(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, data: Option<&str>) -> RawSignal {
        RawSignal {
            kind: kind.to_string(),
            data: data.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_signals() {
        let signals = parse_signals(vec![
            raw("pause", None),
            raw("resume", None),
            raw("save_manual", None),
            raw("upload", Some("data:image/png;base64,AQID")),
            raw("upload", Some("not a data url")),
            raw("wiggle", None),
            raw("auto_finish", None),
        ]);
        assert_eq!(
            signals,
            vec![
                OperatorSignal::Pause,
                OperatorSignal::Resume,
                OperatorSignal::SaveManual,
                OperatorSignal::UploadReplace { bytes: vec![1, 2, 3] },
                OperatorSignal::AutoFinish,
            ]
        );
    }

    #[test]
    fn test_decode_data_url_requires_base64() {
        assert_eq!(decode_data_url("data:text/plain,hello"), None);
        assert_eq!(decode_data_url("data:image/webp;base64,AAE="), Some(vec![0, 1]));
    }

    #[test]
    fn test_download_js_escapes_name() {
        let js = download_js("Quest \"2\".webp", &[0, 1]);
        assert!(js.contains(r#"a.download = "Quest \"2\".webp""#));
        assert!(js.contains("base64,AAE="));
    }

    #[test]
    fn test_panel_scripts_share_id() {
        assert!(INSTALL_JS.contains(PANEL_ID));
        assert!(REMOVE_JS.contains(PANEL_ID));
    }
}
