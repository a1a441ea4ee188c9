//! Compilation options and size limits.
//!
//! Every field has a safe default so hosts can send a partial JSON object.

use serde::{Deserialize, Serialize};

// ─── Depth policy ─────────────────────────────────────────────────────────

/// Heuristic thresholds for capping oversized trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthPolicy {
    /// Trees with at most this many reachable visible nodes are never capped.
    pub cap_threshold: usize,
    /// Node budget the capped prefix should stay under.
    pub target_budget: usize,
}

impl Default for DepthPolicy {
    fn default() -> Self {
        Self {
            cap_threshold: 2000,
            target_budget: 400,
        }
    }
}

// ─── Units ────────────────────────────────────────────────────────────────

/// Output length unit for emitted dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Px,
    Rem {
        base: f32,
    },
}

impl Unit {
    /// Format a pixel length in this unit, e.g. `24px` or `1.5rem`.
    pub fn format_length(self, px: f32) -> String {
        match self {
            Unit::Px => format!("{}px", format_num(px)),
            Unit::Rem { base } if base > 0.0 => format!("{}rem", format_num(px / base)),
            Unit::Rem { .. } => format!("{}px", format_num(px)),
        }
    }
}

/// Shortest decimal form with at most 3 fractional digits.
pub fn format_num(n: f32) -> String {
    if n == n.floor() && n.abs() < 1e9 {
        format!("{}", n as i64)
    } else {
        format!("{n:.3}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

// ─── Compile options ──────────────────────────────────────────────────────

/// Options accepted by `get_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Export / raster scale. Also part of the token-index cache key.
    pub scale: f32,
    /// Unit for SVG dimensions.
    pub unit: Unit,
    /// Language tag of the component block when no hook overrides it.
    pub language: String,
    /// Per-block byte limit; larger blocks are truncated with a warning.
    pub max_code_bytes: usize,
    pub depth_policy: DepthPolicy,
    /// Base URL for raster placeholders (`{base}/{w}x{h}`).
    pub placeholder_base: String,
    /// Emit a `:root` block defining every referenced token.
    pub emit_tokens: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            unit: Unit::Px,
            language: "html".into(),
            max_code_bytes: 200_000,
            depth_policy: DepthPolicy::default(),
            placeholder_base: "https://placehold.co".into(),
            emit_tokens: true,
        }
    }
}

/// Transport-driven limits for the non-code operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub structure_max_nodes: usize,
    pub structure_max_name_chars: usize,
    pub structure_default_depth: usize,
    pub max_screenshot_bytes: usize,
    pub min_screenshot_scale: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            structure_max_nodes: 240,
            structure_max_name_chars: 48,
            structure_default_depth: 8,
            max_screenshot_bytes: 4 * 1024 * 1024,
            min_screenshot_scale: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let opts: CompileOptions =
            serde_json::from_str(r#"{"scale": 2, "unit": {"kind": "rem", "base": 16}}"#).unwrap();
        assert_eq!(opts.scale, 2.0);
        assert_eq!(opts.unit, Unit::Rem { base: 16.0 });
        assert_eq!(opts.depth_policy.cap_threshold, 2000);
        assert_eq!(opts.language, "html");
    }

    #[test]
    fn lengths_format_in_unit() {
        assert_eq!(Unit::Px.format_length(24.0), "24px");
        assert_eq!(Unit::Px.format_length(0.5), "0.5px");
        assert_eq!(Unit::Rem { base: 16.0 }.format_length(24.0), "1.5rem");
        assert_eq!(format_num(1.23456), "1.235");
    }
}
