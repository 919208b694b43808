//! HTML error responses written back to plaintext clients

use crate::directory::RunningInstance;

const NOT_FOUND_HTML: &str = include_str!("../templates/not-found.html");
const TIMEOUT_HTML: &str = include_str!("../templates/timeout.html");
const CONNECTION_REFUSED_HTML: &str = include_str!("../templates/connection-refused.html");

const TARGET_PLACEHOLDER: &str = "loading...";
const TIMEOUT_PLACEHOLDER: &str = "TIMEOUT_MS";
const BODY_END: &str = "</div></body>";

fn reason_phrase(status: u16) -> &'static str {
  match status {
    404 => "Not Found",
    502 => "Bad Gateway",
    504 => "Gateway Timeout",
    _ => "Error",
  }
}

fn escape_html(s: &str) -> String {
  let mut escaped = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&#39;"),
      c => escaped.push(c),
    }
  }
  escaped
}

/// Full HTTP/1.1 response with the given status and HTML body
pub(crate) fn http_response(status: u16, body: &str) -> Vec<u8> {
  format!(
    "HTTP/1.1 {status} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
    reason_phrase(status),
    body.len()
  )
  .into_bytes()
}

fn running_instances_table(running: &[RunningInstance], domain: &str) -> String {
  let rows = running
    .iter()
    .map(|instance| {
      let name = escape_html(&instance.name);
      format!(
        r#"
      <tr style="border-bottom: 1px solid #34c75920;">
        <td style="padding: 0.5rem;"><code>{name}</code></td>
        <td style="padding: 0.5rem;"><code>{}</code></td>
        <td style="padding: 0.5rem;"><code>https://{name}.{}</code></td>
      </tr>"#,
        instance.ip,
        escape_html(domain)
      )
    })
    .collect::<String>();
  format!(
    r#"
<div class="tip" style="background: #34c75915; border-left-color: #34c759;">
  <strong>Running Instances:</strong><br>
  <table style="width: 100%; border-collapse: collapse; margin-top: 0.5rem;">
    <tr style="text-align: left; border-bottom: 1px solid #34c75940;">
      <th style="padding: 0.5rem;">Name</th>
      <th style="padding: 0.5rem;">IP</th>
      <th style="padding: 0.5rem;">URL</th>
    </tr>{rows}
  </table>
  <small style="display: block; margin-top: 0.5rem;">These are your currently running instances.</small>
</div>"#
  )
}

/// 404 page for an instance that could not be resolved, listing the running ones if any
pub(crate) fn not_found_page(instance: &str, running: &[RunningInstance], domain: &str) -> Vec<u8> {
  let mut html = NOT_FOUND_HTML.replace(TARGET_PLACEHOLDER, &escape_html(instance));
  if !running.is_empty() {
    let table = running_instances_table(running, domain);
    html = html.replacen(BODY_END, &format!("{table}{BODY_END}"), 1);
  }
  http_response(404, &html)
}

/// 504 page for a backend dial that did not complete in time
pub(crate) fn timeout_page(target: &str, timeout_ms: u64) -> Vec<u8> {
  let html = TIMEOUT_HTML
    .replace(TARGET_PLACEHOLDER, &escape_html(target))
    .replace(TIMEOUT_PLACEHOLDER, &timeout_ms.to_string());
  http_response(504, &html)
}

/// 502 page for a backend refusing the connection
pub(crate) fn refused_page(target: &str) -> Vec<u8> {
  let html = CONNECTION_REFUSED_HTML.replace(TARGET_PLACEHOLDER, &escape_html(target));
  http_response(502, &html)
}

/// 502 response for any other backend failure
pub(crate) fn bad_gateway() -> Vec<u8> {
  http_response(502, "Bad Gateway")
}
