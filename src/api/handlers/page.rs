//! HTML pages.

use axum::{extract::State, response::Html};

use crate::api::state::AppState;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>LongCat Keygen</title>
<style>
body { font-family: ui-monospace, Menlo, Consolas, monospace; margin: 24px; }
button { margin-right: 8px; padding: 6px 14px; }
pre { background: #111; color: #ddd; padding: 12px; white-space: pre-wrap; word-break: break-all; }
</style>
</head>
<body>
<h3>LongCat Keygen</h3>
<button id="run">Run Job</button>
<button id="refresh">Refresh</button>
<a href="/log">log</a>
<pre id="status">loading...</pre>
<script>
async function refresh() {
  try {
    const r = await fetch('/status');
    document.getElementById('status').textContent = JSON.stringify(await r.json(), null, 2);
  } catch (e) {
    document.getElementById('status').textContent = String(e);
  }
}
document.getElementById('run').onclick = async () => {
  const r = await fetch('/run', { method: 'POST' });
  alert(JSON.stringify(await r.json()));
  refresh();
};
document.getElementById('refresh').onclick = refresh;
refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;

/// `GET /`: control page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /log`: log tail, reloading every 5 seconds.
pub async fn log_page(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"5\"><title>log</title></head>\
         <body style=\"font-family: monospace\"><a href=\"/\">back</a>\
         <pre style=\"white-space: pre-wrap\">{}</pre></body></html>",
        escape_html(&state.log_tail.tail())
    ))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"a\" & b</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; b&lt;/b&gt;"
        );
    }
}
