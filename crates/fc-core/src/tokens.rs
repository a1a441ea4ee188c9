//! Design-token index: raw variable bindings → canonical token names.
//!
//! Building the index is split in two so the async side can run the
//! optional `transformVariable` hook in between:
//!
//! 1. `token_candidates` collects every variable bound in the visible tree
//!    and derives its raw name.
//! 2. `TokenIndex::build` takes the hook outputs (one per candidate, `None`
//!    when the hook is absent or failed) and canonicalizes.
//!
//! Resolution to literals follows alias chains with a hard depth bound, and
//! rewriting substitutes raw names inside style values.

use crate::id::{NodeId, VariableId};
use crate::model::{SceneGraph, Variable, VariableValue};
use crate::options::format_num;
use crate::syntax::{is_ident_char, parse_token_expression, var_reference_prefix};
use crate::tree::VisibleTree;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Maximum number of alias hops followed before giving up.
pub const MAX_ALIAS_DEPTH: usize = 20;

/// Sentinel for values that cannot be resolved.
pub const UNRESOLVED: &str = "unknown";

/// Per-node style declarations: node → (property → value).
pub type StyleMap = BTreeMap<NodeId, BTreeMap<String, String>>;

/// A variable bound somewhere in the tree, ready for canonicalization.
#[derive(Debug, Clone, Serialize)]
pub struct TokenCandidate {
    pub id: VariableId,
    pub raw_name: String,
    /// Resolved default-mode value, passed to the transform hook.
    pub value: Option<String>,
}

/// Raw name of a variable: its declared code syntax when that is a valid
/// token expression, otherwise the display name.
pub fn raw_name(variable: &Variable) -> String {
    variable
        .code_syntax
        .as_deref()
        .and_then(parse_token_expression)
        .map(|expr| expr.name.to_string())
        .unwrap_or_else(|| variable.name.clone())
}

/// Normalized fallback form: lowercase, non-identifier runs → `-`.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() { "token".to_string() } else { out }
}

/// Canonical name for one candidate given the hook output.
pub fn canonicalize(raw: &str, transformed: Option<&str>) -> String {
    transformed
        .and_then(parse_token_expression)
        .map(|expr| expr.name.trim_start_matches('-').to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| normalize_name(raw))
}

/// Every variable bound on a node of the tree, in tree order, deduplicated.
pub fn token_candidates(scene: &SceneGraph, tree: &VisibleTree) -> Vec<TokenCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in &tree.order {
        let Some(node) = scene.get_by_id(*id) else {
            continue;
        };
        for var_id in &node.bound_variables {
            if !seen.insert(*var_id) {
                continue;
            }
            let Some(variable) = scene.variables.get(var_id) else {
                log::debug!("tokens: node {id} binds unknown variable {var_id}");
                continue;
            };
            out.push(TokenCandidate {
                id: *var_id,
                raw_name: raw_name(variable),
                value: Some(resolve_variable(&scene.variables, *var_id, None)),
            });
        }
    }
    out
}

/// Every variable declared in the document, ordered by id.
pub fn document_candidates(scene: &SceneGraph) -> Vec<TokenCandidate> {
    let mut vars: Vec<&Variable> = scene.variables.values().collect();
    vars.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    vars.into_iter()
        .map(|v| TokenCandidate {
            id: v.id,
            raw_name: raw_name(v),
            value: Some(resolve_variable(&scene.variables, v.id, None)),
        })
        .collect()
}

// ─── Index ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenIndex {
    pub canonical_name_by_id: HashMap<VariableId, String>,
    /// Collision buckets: every variable that canonicalized to a name.
    pub by_canonical_name: BTreeMap<String, SmallVec<[VariableId; 1]>>,
    pub raw_name_by_id: HashMap<VariableId, String>,
}

impl TokenIndex {
    /// Build from candidates and the per-candidate hook outputs.
    pub fn build(candidates: &[TokenCandidate], transformed: &[Option<String>]) -> Self {
        let mut index = TokenIndex::default();
        index.extend(candidates, transformed);
        index
    }

    /// Add candidates not indexed yet. Already indexed ids keep their name.
    pub fn extend(&mut self, candidates: &[TokenCandidate], transformed: &[Option<String>]) {
        for (i, candidate) in candidates.iter().enumerate() {
            if self.canonical_name_by_id.contains_key(&candidate.id) {
                continue;
            }
            let output = transformed.get(i).and_then(|o| o.as_deref());
            let name = canonicalize(&candidate.raw_name, output);
            self.by_canonical_name
                .entry(name.clone())
                .or_default()
                .push(candidate.id);
            self.canonical_name_by_id.insert(candidate.id, name);
            self.raw_name_by_id
                .insert(candidate.id, candidate.raw_name.clone());
        }
        let collisions = self
            .by_canonical_name
            .values()
            .filter(|ids| ids.len() > 1)
            .count();
        if collisions > 0 {
            log::debug!("tokens: {collisions} canonical names shared by several variables");
        }
    }

    /// Candidates this index has not seen.
    pub fn missing<'a>(&self, candidates: &'a [TokenCandidate]) -> Vec<&'a TokenCandidate> {
        candidates
            .iter()
            .filter(|c| !self.canonical_name_by_id.contains_key(&c.id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical_name_by_id.is_empty()
    }

    /// Resolve a canonical name to a literal in `mode` (default mode when `None`).
    pub fn resolve_name(
        &self,
        variables: &HashMap<VariableId, Variable>,
        name: &str,
        mode: Option<&str>,
    ) -> String {
        match self.by_canonical_name.get(name).and_then(|ids| ids.first()) {
            Some(id) => resolve_variable(variables, *id, mode),
            None => UNRESOLVED.to_string(),
        }
    }

    /// Every mode's literal for a canonical name.
    pub fn values_by_mode(
        &self,
        variables: &HashMap<VariableId, Variable>,
        name: &str,
    ) -> BTreeMap<String, String> {
        let Some(var) = self
            .by_canonical_name
            .get(name)
            .and_then(|ids| ids.first())
            .and_then(|id| variables.get(id))
        else {
            return BTreeMap::new();
        };
        var.values_by_mode
            .keys()
            .map(|mode| (mode.clone(), resolve_variable(variables, var.id, Some(mode))))
            .collect()
    }

    /// Substitution table for `rewrite_styles`.
    pub fn rewrite_table(&self) -> RewriteTable {
        let mut expr = HashMap::new();
        let mut bare = Vec::new();
        // Ordered by id: when raw names collide, the lowest id wins.
        let mut raws: Vec<(&VariableId, &String)> = self.raw_name_by_id.iter().collect();
        raws.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        for (id, raw) in raws {
            let Some(canonical) = self.canonical_name_by_id.get(id) else {
                continue;
            };
            expr.entry(raw.clone()).or_insert_with(|| canonical.clone());
            expr.entry(normalize_name(raw))
                .or_insert_with(|| canonical.clone());
            if raw != canonical {
                bare.push((raw.clone(), canonical.clone()));
            }
        }
        // Longest first, then lexicographic so equal lengths stay deterministic.
        bare.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        bare.dedup_by(|a, b| a.0 == b.0);
        RewriteTable { expr, bare }
    }
}

// ─── Resolution ───────────────────────────────────────────────────────────

/// Follow alias chains to a literal. Chains longer than `MAX_ALIAS_DEPTH`
/// hops, and references to missing variables, resolve to `UNRESOLVED`.
pub fn resolve_variable(
    variables: &HashMap<VariableId, Variable>,
    id: VariableId,
    mode: Option<&str>,
) -> String {
    let mut current = id;
    let mut requested_mode = mode;
    for _ in 0..=MAX_ALIAS_DEPTH {
        let Some(var) = variables.get(&current) else {
            return UNRESOLVED.to_string();
        };
        let value = requested_mode
            .and_then(|m| var.values_by_mode.get(m))
            .or_else(|| var.values_by_mode.get(&var.default_mode))
            .or_else(|| var.values_by_mode.values().next());
        match value {
            Some(VariableValue::Alias(next)) => {
                current = *next;
                // Aliases may cross collections; their modes do not carry over.
                requested_mode = None;
            }
            Some(literal) => return format_value(literal),
            None => return UNRESOLVED.to_string(),
        }
    }
    log::warn!("tokens: alias chain from {id} exceeds {MAX_ALIAS_DEPTH} hops");
    UNRESOLVED.to_string()
}

/// Literal CSS form of a non-alias value.
pub fn format_value(value: &VariableValue) -> String {
    match value {
        VariableValue::Color(c) => c.to_hex(),
        VariableValue::Float(n) => format_num(*n),
        VariableValue::Str(s) => s.clone(),
        VariableValue::Bool(b) => b.to_string(),
        VariableValue::Alias(_) => UNRESOLVED.to_string(),
    }
}

// ─── Rewriting ────────────────────────────────────────────────────────────

/// Raw → canonical substitutions.
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    /// Identifiers inside `var(--…)` expressions (raw and normalized raw).
    expr: HashMap<String, String>,
    /// Bare occurrences, longest raw name first.
    bare: Vec<(String, String)>,
}

impl RewriteTable {
    /// Rewrite one value in a single left-to-right scan so substituted text
    /// is never rewritten again.
    pub fn rewrite(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut pos = 0;
        while pos < value.len() {
            let rest = &value[pos..];

            if let Some((ident, offset)) = var_reference_prefix(rest)
                && let Some(canonical) = self.expr.get(ident)
            {
                out.push_str(&rest[..offset]);
                out.push_str(canonical);
                pos += offset + ident.len();
                continue;
            }

            let prev = value[..pos].chars().next_back();
            if prev.is_none_or(|c| !is_ident_char(c))
                && let Some((raw, canonical)) = self.bare.iter().find(|(raw, _)| {
                    rest.starts_with(raw.as_str())
                        && rest[raw.len()..].chars().next().is_none_or(|c| !is_ident_char(c))
                })
            {
                out.push_str(canonical);
                pos += raw.len();
                continue;
            }

            let c = rest.chars().next().unwrap_or_default();
            out.push(c);
            pos += c.len_utf8().max(1);
        }
        out
    }
}

/// Rewrite every style value in place.
pub fn rewrite_styles(styles: &mut StyleMap, table: &RewriteTable) {
    for decls in styles.values_mut() {
        for value in decls.values_mut() {
            let rewritten = table.rewrite(value);
            if rewritten != *value {
                *value = rewritten;
            }
        }
    }
}

/// Canonical names referenced through `var(--…)` anywhere in the styles.
pub fn referenced_tokens(styles: &StyleMap, index: &TokenIndex) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for decls in styles.values() {
        for value in decls.values() {
            let mut from = 0;
            while let Some(pos) = value[from..].find("var(") {
                let at = from + pos;
                if let Some((ident, _)) = var_reference_prefix(&value[at..])
                    && index.by_canonical_name.contains_key(ident)
                    && seen.insert(ident.to_string())
                {
                    found.push(ident.to_string());
                }
                from = at + 4;
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Color;
    use pretty_assertions::assert_eq;

    fn var(id: &str, name: &str, value: VariableValue) -> Variable {
        Variable {
            id: VariableId::intern(id),
            name: name.to_string(),
            collection: "Primitives".into(),
            code_syntax: None,
            resolved_type: Default::default(),
            default_mode: "light".into(),
            values_by_mode: BTreeMap::from([("light".to_string(), value)]),
        }
    }

    fn table(vars: Vec<Variable>) -> HashMap<VariableId, Variable> {
        vars.into_iter().map(|v| (v.id, v)).collect()
    }

    #[test]
    fn raw_name_prefers_valid_code_syntax() {
        let mut v = var("tk:1", "Colors/Primary 500", VariableValue::Float(1.0));
        assert_eq!(raw_name(&v), "Colors/Primary 500");
        v.code_syntax = Some("var(--color-primary-500)".into());
        assert_eq!(raw_name(&v), "color-primary-500");
        v.code_syntax = Some("not a token!".into());
        assert_eq!(raw_name(&v), "Colors/Primary 500");
    }

    #[test]
    fn normalization_and_canonicalization() {
        assert_eq!(normalize_name("Colors/Primary 500"), "colors-primary-500");
        assert_eq!(normalize_name("  --"), "token");
        assert_eq!(canonicalize("Colors/Primary", Some("var(--brand-primary)")), "brand-primary");
        assert_eq!(canonicalize("Colors/Primary", Some("$brand")), "brand");
        assert_eq!(canonicalize("Colors/Primary", Some("oops: {}")), "colors-primary");
        assert_eq!(canonicalize("Colors/Primary", None), "colors-primary");
    }

    #[test]
    fn collisions_share_a_bucket() {
        let candidates = vec![
            TokenCandidate {
                id: VariableId::intern("tk:a"),
                raw_name: "Space/Small".into(),
                value: None,
            },
            TokenCandidate {
                id: VariableId::intern("tk:b"),
                raw_name: "space small".into(),
                value: None,
            },
        ];
        let index = TokenIndex::build(&candidates, &[None, None]);
        assert_eq!(
            index.by_canonical_name["space-small"].as_slice(),
            &[VariableId::intern("tk:a"), VariableId::intern("tk:b")]
        );
    }

    #[test]
    fn alias_chains_resolve_and_terminate() {
        let mut vars = vec![var(
            "ch:0",
            "base",
            VariableValue::Color(Color { r: 1.0, g: 0.0, b: 0.0, a: 1.0 }),
        )];
        for i in 1..=25 {
            vars.push(var(
                &format!("ch:{i}"),
                &format!("alias{i}"),
                VariableValue::Alias(VariableId::intern(&format!("ch:{}", i - 1))),
            ));
        }
        let vars = table(vars);
        assert_eq!(resolve_variable(&vars, VariableId::intern("ch:20"), None), "#FF0000");
        assert_eq!(resolve_variable(&vars, VariableId::intern("ch:21"), None), UNRESOLVED);
        assert_eq!(resolve_variable(&vars, VariableId::intern("ch:missing"), None), UNRESOLVED);
    }

    #[test]
    fn alias_cycle_hits_the_depth_bound() {
        let vars = table(vec![
            var("cy:a", "a", VariableValue::Alias(VariableId::intern("cy:b"))),
            var("cy:b", "b", VariableValue::Alias(VariableId::intern("cy:a"))),
        ]);
        assert_eq!(resolve_variable(&vars, VariableId::intern("cy:a"), None), UNRESOLVED);
    }

    #[test]
    fn rewrite_handles_expressions_bare_names_and_prefixes() {
        let candidates = vec![
            TokenCandidate {
                id: VariableId::intern("rw:1"),
                raw_name: "gap".into(),
                value: None,
            },
            TokenCandidate {
                id: VariableId::intern("rw:2"),
                raw_name: "gap-large".into(),
                value: None,
            },
        ];
        let index = TokenIndex::build(
            &candidates,
            &[Some("var(--space-md)".into()), Some("var(--space-lg)".into())],
        );
        let t = index.rewrite_table();
        assert_eq!(t.rewrite("var(--gap-large, 24px)"), "var(--space-lg, 24px)");
        assert_eq!(t.rewrite("var(--gap)"), "var(--space-md)");
        assert_eq!(t.rewrite("calc(gap-large + gap)"), "calc(space-lg + space-md)");
        assert_eq!(t.rewrite("gapless biggap"), "gapless biggap");
    }

    #[test]
    fn shared_raw_names_rewrite_to_the_lowest_id() {
        let candidates = vec![
            TokenCandidate {
                id: VariableId::intern("rc:2"),
                raw_name: "gap".into(),
                value: None,
            },
            TokenCandidate {
                id: VariableId::intern("rc:1"),
                raw_name: "gap".into(),
                value: None,
            },
        ];
        let index = TokenIndex::build(
            &candidates,
            &[Some("var(--space-b)".into()), Some("var(--space-a)".into())],
        );
        for _ in 0..8 {
            let t = index.clone().rewrite_table();
            assert_eq!(t.rewrite("var(--gap)"), "var(--space-a)");
            assert_eq!(t.rewrite("calc(gap * 2)"), "calc(space-a * 2)");
        }
    }
}
