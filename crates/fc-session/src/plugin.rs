//! Plugin transform channel.
//!
//! User-supplied hook code never runs in-process. It lives behind an
//! `Isolate`, reachable only through request/response messages:
//!
//! ```text
//! → Request  { id, hook, payload }
//! ← Response { id, result | error }
//! ```
//!
//! Requests go out in batches of at most `MAX_BATCH`. A failed call only
//! loses that call's value; the rest of the batch is kept.

use crate::error::{SessionError, TransformError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on requests per message.
pub const MAX_BATCH: usize = 300;

/// Globals the isolate exposes to plugin code. Nothing else is bound.
pub const BINDING_ALLOWLIST: &[&str] = &[
    "JSON",
    "Math",
    "String",
    "Number",
    "Boolean",
    "Array",
    "Object",
    "RegExp",
    "parseInt",
    "parseFloat",
];

/// Globals rejected before the code reaches the isolate. Property names
/// (`cache.fetch`) are not affected.
const DISALLOWED_GLOBALS: &[&str] = &[
    "import",
    "require",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "setTimeout",
    "setInterval",
    "eval",
    "Function",
    "document",
    "window",
    "globalThis",
];

/// Keywords after which `/` opens a regular expression.
const REGEX_PRECEDERS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    Transform,
    TransformVariable,
    TransformPx,
    TransformComponent,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::Transform,
        HookKind::TransformVariable,
        HookKind::TransformPx,
        HookKind::TransformComponent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Transform => "transform",
            HookKind::TransformVariable => "transformVariable",
            HookKind::TransformPx => "transformPx",
            HookKind::TransformComponent => "transformComponent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub hook: HookKind,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// An isolated execution context for plugin code.
#[async_trait]
pub trait Isolate: Send + Sync {
    /// Evaluate `code` with only `bindings` in scope. Returns the names of
    /// the hooks the code defines.
    async fn load(&self, code: &str, bindings: &[&str]) -> Result<Vec<String>, String>;

    /// Run one batch of hook calls.
    async fn exchange(&self, batch: Vec<Request>) -> Result<Vec<Response>, String>;
}

/// Creates fresh isolates for the session.
pub trait IsolateFactory: Send + Sync {
    fn spawn(&self) -> Result<Box<dyn Isolate>, String>;
}

/// Lowercase hex SHA-256 of the plugin source.
pub fn fingerprint(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Reject code that references a global outside the allowlist.
pub fn check_source(code: &str) -> Result<(), SessionError> {
    let masked = mask_literals(code).map_err(SessionError::PluginLoad)?;
    for (start, word) in identifiers(&masked) {
        let before = masked[..start].trim_end();
        let member = before.ends_with('.') && !before.ends_with("...");
        if !member && DISALLOWED_GLOBALS.contains(&word) {
            return Err(SessionError::PluginLoad(format!("`{word}` is not allowed")));
        }
    }
    Ok(())
}

// ─── Source scanning ──────────────────────────────────────────────────────

fn is_js_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn blank(out: &mut String, c: char) {
    out.push(if c == '\n' { '\n' } else { ' ' });
}

/// Identifiers of masked source with their byte offsets.
fn identifiers(code: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in code.char_indices().chain(std::iter::once((code.len(), ' '))) {
        match (start, is_js_ident_char(c)) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                let word = &code[s..i];
                if !word.starts_with(|c: char| c.is_ascii_digit()) {
                    out.push((s, word));
                }
                start = None;
            }
            _ => {}
        }
    }
    out
}

/// Source with the contents of comments and of string, template and regex
/// literals replaced by spaces. Template `${…}` expressions stay code.
fn mask_literals(code: &str) -> Result<String, String> {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    // Brace depth at which each open template expression started.
    let mut templates: Vec<usize> = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    blank(&mut out, chars[i]);
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let end = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
                    .ok_or("unterminated comment")?;
                for &ch in &chars[i..end + 2] {
                    blank(&mut out, ch);
                }
                i = end + 2;
            }
            '/' if regex_allowed(&out) => {
                out.push(c);
                i = skip_regex(&chars, i + 1, &mut out)?;
            }
            '\'' | '"' => {
                out.push(c);
                i = skip_quoted(&chars, i + 1, c, &mut out)?;
            }
            '`' => {
                out.push(c);
                i = resume_template(&chars, i + 1, &mut out, &mut templates, &mut depth)?;
            }
            '{' => {
                depth += 1;
                out.push(c);
                i += 1;
            }
            '}' if templates.last().is_some_and(|d| d + 1 == depth) => {
                templates.pop();
                depth -= 1;
                out.push(c);
                i = resume_template(&chars, i + 1, &mut out, &mut templates, &mut depth)?;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                out.push(c);
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    if !templates.is_empty() {
        return Err("unterminated template literal".into());
    }
    Ok(out)
}

/// Whether a `/` after the code emitted so far starts a regex literal.
fn regex_allowed(emitted: &str) -> bool {
    let code = emitted.trim_end();
    match code.chars().next_back() {
        None => true,
        Some(')' | ']') => false,
        Some(c) if is_js_ident_char(c) => {
            let word_start = code
                .char_indices()
                .rev()
                .take_while(|(_, c)| is_js_ident_char(*c))
                .last()
                .map_or(code.len(), |(i, _)| i);
            REGEX_PRECEDERS.contains(&&code[word_start..])
        }
        Some(_) => true,
    }
}

fn skip_quoted(chars: &[char], mut i: usize, quote: char, out: &mut String) -> Result<usize, String> {
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                blank(out, '\\');
                if let Some(&escaped) = chars.get(i + 1) {
                    blank(out, escaped);
                }
                i += 2;
            }
            '\n' => return Err("unterminated string literal".into()),
            c if c == quote => {
                out.push(c);
                return Ok(i + 1);
            }
            c => {
                blank(out, c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".into())
}

fn skip_regex(chars: &[char], mut i: usize, out: &mut String) -> Result<usize, String> {
    let mut in_class = false;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                blank(out, '\\');
                if let Some(&escaped) = chars.get(i + 1) {
                    blank(out, escaped);
                }
                i += 2;
            }
            '\n' => return Err("unterminated regular expression".into()),
            '/' if !in_class => {
                out.push('/');
                return Ok(i + 1);
            }
            c => {
                match c {
                    '[' => in_class = true,
                    ']' => in_class = false,
                    _ => {}
                }
                blank(out, c);
                i += 1;
            }
        }
    }
    Err("unterminated regular expression".into())
}

/// Scan template text up to the closing backtick or the next `${`.
fn resume_template(
    chars: &[char],
    mut i: usize,
    out: &mut String,
    templates: &mut Vec<usize>,
    depth: &mut usize,
) -> Result<usize, String> {
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                blank(out, '\\');
                if let Some(&escaped) = chars.get(i + 1) {
                    blank(out, escaped);
                }
                i += 2;
            }
            '`' => {
                out.push('`');
                return Ok(i + 1);
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                out.push_str("${");
                templates.push(*depth);
                *depth += 1;
                return Ok(i + 2);
            }
            c => {
                blank(out, c);
                i += 1;
            }
        }
    }
    Err("unterminated template literal".into())
}

// ─── Channel ──────────────────────────────────────────────────────────────

/// A loaded plugin: an isolate plus the hooks its code defines.
pub struct PluginChannel {
    isolate: Box<dyn Isolate>,
    hooks: HashSet<HookKind>,
    fingerprint: String,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PluginChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginChannel")
            .field("hooks", &self.hooks)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl PluginChannel {
    /// Pre-check and load `code` into `isolate`.
    pub async fn load(isolate: Box<dyn Isolate>, code: &str) -> Result<Self, SessionError> {
        check_source(code)?;
        let names = isolate
            .load(code, BINDING_ALLOWLIST)
            .await
            .map_err(SessionError::PluginLoad)?;

        let mut hooks = HashSet::new();
        for name in &names {
            match HookKind::from_name(name) {
                Some(hook) => {
                    hooks.insert(hook);
                }
                None => log::debug!("plugin: ignoring unknown export `{name}`"),
            }
        }
        let fingerprint = fingerprint(code);
        log::debug!("plugin: loaded {} hooks ({})", hooks.len(), &fingerprint[..12]);
        Ok(Self {
            isolate,
            hooks,
            fingerprint,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn has_hook(&self, hook: HookKind) -> bool {
        self.hooks.contains(&hook)
    }

    /// One hook call.
    pub async fn call(&self, hook: HookKind, payload: Value) -> Result<Value, TransformError> {
        self.call_batch(hook, vec![payload])
            .await
            .pop()
            .unwrap_or(Err(TransformError::Channel("empty response".into())))
    }

    /// Many calls of one hook, chunked into batches. The result vector lines
    /// up with `payloads`.
    pub async fn call_batch(
        &self,
        hook: HookKind,
        payloads: Vec<Value>,
    ) -> Vec<Result<Value, TransformError>> {
        if !self.has_hook(hook) {
            return payloads
                .iter()
                .map(|_| Err(TransformError::BadOutput(hook.as_str())))
                .collect();
        }

        let mut results = Vec::with_capacity(payloads.len());
        let mut payloads = payloads.into_iter().peekable();
        while payloads.peek().is_some() {
            let batch: Vec<Request> = payloads
                .by_ref()
                .take(MAX_BATCH)
                .map(|payload| Request {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    hook,
                    payload,
                })
                .collect();
            let ids: Vec<u64> = batch.iter().map(|r| r.id).collect();

            match self.isolate.exchange(batch).await {
                Ok(responses) => {
                    let mut by_id: HashMap<u64, Response> =
                        responses.into_iter().map(|r| (r.id, r)).collect();
                    for id in ids {
                        results.push(match by_id.remove(&id) {
                            Some(Response { error: Some(message), .. }) => Err(TransformError::Hook {
                                hook: hook.as_str(),
                                message,
                            }),
                            Some(Response {
                                result: Some(value), ..
                            }) => Ok(value),
                            Some(_) => Err(TransformError::BadOutput(hook.as_str())),
                            None => Err(TransformError::Channel(format!("no response for request {id}"))),
                        });
                    }
                }
                Err(e) => {
                    log::warn!("plugin: batch of {} `{}` calls failed: {e}", ids.len(), hook.as_str());
                    results.extend(ids.iter().map(|_| Err(TransformError::Channel(e.clone()))));
                }
            }
        }
        results
    }
}

/// Accept a hook result only when it is a string.
pub fn expect_string(hook: HookKind, value: Value) -> Result<String, TransformError> {
    match value {
        Value::String(s) => Ok(s),
        _ => Err(TransformError::BadOutput(hook.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Uppercases string payloads; rejects payloads equal to "boom".
    struct UpperIsolate {
        hooks: Vec<String>,
        batch_sizes: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Isolate for UpperIsolate {
        async fn load(&self, _code: &str, bindings: &[&str]) -> Result<Vec<String>, String> {
            assert!(bindings.contains(&"JSON"));
            Ok(self.hooks.clone())
        }

        async fn exchange(&self, batch: Vec<Request>) -> Result<Vec<Response>, String> {
            self.batch_sizes.lock().unwrap().push(batch.len());
            Ok(batch
                .into_iter()
                .rev()
                .map(|r| match r.payload.as_str() {
                    Some("boom") => Response::err(r.id, "TypeError: boom"),
                    Some(s) => Response::ok(r.id, json!(s.to_uppercase())),
                    None => Response::ok(r.id, Value::Null),
                })
                .collect())
        }
    }

    fn isolate(hooks: &[&str]) -> (Box<dyn Isolate>, Arc<Mutex<Vec<usize>>>) {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let iso = UpperIsolate {
            hooks: hooks.iter().map(|s| s.to_string()).collect(),
            batch_sizes: sizes.clone(),
        };
        (Box::new(iso), sizes)
    }

    #[test]
    fn static_check_rejects_escapes() {
        assert!(check_source("export function transformPx({value}) { return value }").is_ok());
        for bad in [
            "import x from 'y'",
            "const fs = require('fs')",
            "fetch('https://x')",
            "setTimeout(f, 1)",
            "eval('1')",
            "const send = fetch; send(v)",
            "globalThis[\"fetch\"]('https://x')",
            "function transform(v) { return `${fetch(v.code)}` }",
            "const q = /\"/.test(v); fetch(v)",
            "function transform(v) { return v.code.replace(/[/]/g, '') + window.name }",
            "const s = 'unterminated",
        ] {
            assert!(matches!(check_source(bad), Err(SessionError::PluginLoad(_))), "{bad}");
        }
    }

    #[test]
    fn static_check_ignores_strings_comments_and_members() {
        for ok in [
            "function transform(v) { return parseFunction(v.code) }",
            "function transform(v) { return v.code + \"window.\" }",
            "// import nothing here\nfunction transform(v) { return v.code }",
            "/* fetch( */ function transformPx(v) { return v.value }",
            "function transformPx(v) { return cache.fetch(v.value) ?? v.value }",
            "function transformVariable(v) { return `var(--${v.name.replace(/\\//g, '-')})` }",
            "function transformPx(v) { const half = v.scale / 2; return `${half}px` }",
        ] {
            assert!(check_source(ok).is_ok(), "{ok}");
        }
    }

    #[tokio::test]
    async fn batches_are_bounded_and_ordered() {
        let (iso, sizes) = isolate(&["transformVariable"]);
        let channel = PluginChannel::load(iso, "function transformVariable() {}")
            .await
            .unwrap();
        let payloads: Vec<Value> = (0..650).map(|i| json!(format!("v{i}"))).collect();
        let results = channel.call_batch(HookKind::TransformVariable, payloads).await;

        assert_eq!(*sizes.lock().unwrap(), vec![300, 300, 50]);
        assert_eq!(results.len(), 650);
        assert_eq!(results[0], Ok(json!("V0")));
        assert_eq!(results[649], Ok(json!("V649")));
    }

    #[tokio::test]
    async fn failed_call_is_isolated() {
        let (iso, _) = isolate(&["transformPx", "somethingElse"]);
        let channel = PluginChannel::load(iso, "function transformPx() {}").await.unwrap();
        assert!(channel.has_hook(HookKind::TransformPx));
        assert!(!channel.has_hook(HookKind::Transform));

        let results = channel
            .call_batch(HookKind::TransformPx, vec![json!("a"), json!("boom"), json!("c")])
            .await;
        assert_eq!(results[0], Ok(json!("A")));
        assert!(matches!(results[1], Err(TransformError::Hook { .. })));
        assert_eq!(results[2], Ok(json!("C")));

        let missing = channel.call(HookKind::Transform, json!("x")).await;
        assert!(missing.is_err());
    }

    #[test]
    fn fingerprints_are_stable_hex() {
        let a = fingerprint("code");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("code"));
        assert_ne!(a, fingerprint("code "));
    }
}
