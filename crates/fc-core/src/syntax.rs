//! Small `winnow` parsers for the textual bits the pipeline inspects:
//! token expressions (`var(--name, fallback)`), px literals inside style
//! values, and the opening tag of exported SVG markup.

use winnow::ascii::{space0, space1};
use winnow::combinator::{opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

// ─── Token expressions ──────────────────────────────────────────────────

/// A recognized token reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenExpr<'a> {
    pub name: &'a str,
    pub fallback: Option<&'a str>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-'
}

/// Characters that may continue an identifier-like token.
pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_identifier<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(is_ident_start),
        take_while(0.., |c: char| is_ident_char(c) || c == '.'),
    )
        .take()
        .parse_next(input)
}

/// Consume up to (not including) the `)` that balances an already-open paren.
fn parse_balanced<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    let mut depth = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                let (taken, rest) = input.split_at(i);
                *input = rest;
                return Ok(taken);
            }
            ')' => depth -= 1,
            _ => {}
        }
    }
    Err(ErrMode::Backtrack(ContextError::new()))
}

/// `var(--name)` or `var(--name, fallback)`.
fn parse_var_expression<'a>(input: &mut &'a str) -> ModalResult<TokenExpr<'a>> {
    let _ = "var(".parse_next(input)?;
    let _ = space0.parse_next(input)?;
    let name = preceded("--", parse_identifier).parse_next(input)?;
    let _ = space0.parse_next(input)?;
    let fallback = opt(preceded((',', space0), parse_balanced)).parse_next(input)?;
    let _ = ')'.parse_next(input)?;
    Ok(TokenExpr {
        name,
        fallback: fallback.map(str::trim).filter(|f| !f.is_empty()),
    })
}

/// `--name`, `$name`, `@name` or a bare identifier.
fn parse_sigil_expression<'a>(input: &mut &'a str) -> ModalResult<TokenExpr<'a>> {
    let _ = opt(winnow::combinator::alt(("--", "$", "@"))).parse_next(input)?;
    let name = parse_identifier.parse_next(input)?;
    Ok(TokenExpr {
        name,
        fallback: None,
    })
}

/// Parse a whole string as a token expression. Returns `None` unless the
/// entire (trimmed) input is consumed.
pub fn parse_token_expression(input: &str) -> Option<TokenExpr<'_>> {
    let mut rest = input.trim();
    let expr = if rest.starts_with("var(") {
        parse_var_expression.parse_next(&mut rest).ok()?
    } else {
        parse_sigil_expression.parse_next(&mut rest).ok()?
    };
    if rest.is_empty() { Some(expr) } else { None }
}

fn parse_var_opening(input: &mut &str) -> ModalResult<()> {
    let _ = "var(".parse_next(input)?;
    let _ = space0.parse_next(input)?;
    let _ = "--".parse_next(input)?;
    Ok(())
}

/// If `input` starts with `var(--ident`, return the identifier and the byte
/// offset at which it starts.
pub fn var_reference_prefix(input: &str) -> Option<(&str, usize)> {
    let mut rest = input;
    parse_var_opening.parse_next(&mut rest).ok()?;
    let offset = input.len() - rest.len();
    let name = parse_identifier.parse_next(&mut rest).ok()?;
    Some((name, offset))
}

// ─── Px literals ────────────────────────────────────────────────────────

fn parse_number<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        opt('-'),
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt(('.', take_while(1.., |c: char| c.is_ascii_digit()))),
    )
        .take()
        .parse_next(input)
}

fn parse_px_literal<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (parse_number, "px").take().parse_next(input)
}

/// Numeric value of a `12px` / `-0.5px` literal.
pub fn parse_px(literal: &str) -> Option<f32> {
    literal.strip_suffix("px")?.parse().ok()
}

/// All px literals in a style value, with their byte ranges.
pub fn px_literals(value: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut offset = 0;
    while offset < value.len() {
        let prev = value[..offset].chars().next_back();
        let at_boundary = prev.is_none_or(|c| !is_ident_char(c) && c != '.');
        let mut rest = &value[offset..];
        if at_boundary && let Ok(literal) = parse_px_literal.parse_next(&mut rest) {
            let after_ok = rest.chars().next().is_none_or(|c| !is_ident_char(c));
            if after_ok {
                found.push((offset, offset + literal.len()));
                offset += literal.len();
                continue;
            }
        }
        offset += value[offset..].chars().next().map_or(1, char::len_utf8);
    }
    found
}

// ─── SVG root tag ───────────────────────────────────────────────────────

/// The opening `<svg ...>` tag of a markup string.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgRoot {
    /// Byte range of the whole opening tag, including `<` and `>`.
    pub start: usize,
    pub end: usize,
    pub attrs: Vec<(String, String)>,
    pub self_closing: bool,
}

impl SvgRoot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_attr_name<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        .parse_next(input)
}

fn parse_attr_value<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    if input.starts_with('"') {
        winnow::combinator::delimited('"', take_till(0.., '"'), '"').parse_next(input)
    } else {
        winnow::combinator::delimited('\'', take_till(0.., '\''), '\'').parse_next(input)
    }
}

fn parse_svg_open_tag(input: &mut &str) -> ModalResult<(Vec<(String, String)>, bool)> {
    let _ = "<svg".parse_next(input)?;
    let mut attrs = Vec::new();
    loop {
        *input = input.trim_start();
        if input.starts_with("/>") {
            let _ = "/>".parse_next(input)?;
            return Ok((attrs, true));
        }
        if input.starts_with('>') {
            let _ = '>'.parse_next(input)?;
            return Ok((attrs, false));
        }
        let name = parse_attr_name.parse_next(input)?;
        let _ = space0.parse_next(input)?;
        let value = if input.starts_with('=') {
            let _ = '='.parse_next(input)?;
            let _ = space0.parse_next(input)?;
            parse_attr_value.parse_next(input)?
        } else {
            ""
        };
        attrs.push((name.to_string(), value.to_string()));
    }
}

/// Locate and parse the first `<svg ...>` opening tag.
pub fn parse_svg_root(markup: &str) -> Option<SvgRoot> {
    let start = find_svg_tag(markup)?;
    let mut rest = &markup[start..];
    let (attrs, self_closing) = parse_svg_open_tag.parse_next(&mut rest).ok()?;
    let end = markup.len() - rest.len();
    Some(SvgRoot {
        start,
        end,
        attrs,
        self_closing,
    })
}

fn find_svg_tag(markup: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = markup[from..].find("<svg") {
        let at = from + pos;
        let mut after = &markup[at + 4..];
        let boundary = after.starts_with('>')
            || after.starts_with("/>")
            || space1::<_, ContextError>.parse_next(&mut after).is_ok();
        if boundary {
            return Some(at);
        }
        from = at + 4;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_expressions() {
        assert_eq!(
            parse_token_expression("var(--color-primary)"),
            Some(TokenExpr {
                name: "color-primary",
                fallback: None
            })
        );
        assert_eq!(
            parse_token_expression("var(--gap, var(--space-2, 8px))"),
            Some(TokenExpr {
                name: "gap",
                fallback: Some("var(--space-2, 8px)")
            })
        );
        assert_eq!(parse_token_expression("$brand.primary").unwrap().name, "brand.primary");
        assert_eq!(parse_token_expression("  surface_bg ").unwrap().name, "surface_bg");
        assert_eq!(parse_token_expression("Colors/Primary 500"), None);
        assert_eq!(parse_token_expression("var(--x) + 2"), None);
        assert_eq!(parse_token_expression(""), None);
    }

    #[test]
    fn var_prefix_reports_identifier_offset() {
        assert_eq!(var_reference_prefix("var(--a-b, 2px)"), Some(("a-b", 6)));
        assert_eq!(var_reference_prefix("var( --x)"), Some(("x", 7)));
        assert_eq!(var_reference_prefix("vars(--x)"), None);
    }

    #[test]
    fn finds_px_literals_on_boundaries() {
        let value = "0 4px -2.5px calc(100% - 12px) a1px";
        let found: Vec<&str> = px_literals(value)
            .into_iter()
            .map(|(s, e)| &value[s..e])
            .collect();
        assert_eq!(found, vec!["4px", "-2.5px", "12px"]);
        assert_eq!(parse_px("-2.5px"), Some(-2.5));
    }

    #[test]
    fn parses_svg_root_tag() {
        let markup = r#"<?xml version="1.0"?><svg width="24" height='16' fill="none" xmlns="http://www.w3.org/2000/svg"><path d="M0 0"/></svg>"#;
        let root = parse_svg_root(markup).unwrap();
        assert_eq!(root.attr("width"), Some("24"));
        assert_eq!(root.attr("height"), Some("16"));
        assert_eq!(root.attr("viewBox"), None);
        assert!(!root.self_closing);
        assert_eq!(&markup[root.start..root.start + 4], "<svg");
        assert!(markup[..root.end].ends_with('>'));
    }
}
