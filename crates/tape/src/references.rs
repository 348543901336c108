//! Static discovery of module references in compiled Luau
//!
//! This is pattern matching over the compiler's output, not a parser. Two
//! call shapes are recognised:
//!
//! - `TS.import(script, <base>, "a", "b")`, where `<base>` is an instance path
//!   such as `script.Parent` or a `TS.getModule(script, "@scope", "pkg")` call;
//! - `require(<instance path>)`, e.g. `require(script.include.RuntimeLib)`.
//!
//! Anything else (string requires, `game:GetService(...)` chains, computed
//! expressions) is not a bundle reference and is left alone.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

static CALL_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(TS\.import|require)\s*\(").expect("call pattern is a valid regex")
});

/// One step of an instance path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// The calling module itself
    Script,
    Parent,
    Child(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
    /// Path rooted at `script`
    Instance(Vec<Segment>),
    /// Package name segments followed by an optional subpath
    Package(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Source text of the call, for diagnostics
    pub expression: String,
    pub target: ReferenceTarget,
}

/// Every recognised reference in `contents`, in source order
pub fn scan_references(contents: &str) -> Vec<Reference> {
    let code = mask_non_code(contents);
    let text = code.text.as_str();

    let mut references = Vec::new();
    for captures in CALL_START.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let start = whole.start();
        if code.in_quoted_string(start)
            || is_member_access(text, start)
            || is_function_definition(text, start)
        {
            continue;
        }
        let Some(close) = find_closing_paren(text, whole.end()) else {
            continue;
        };
        let arguments = split_arguments(&text[whole.end()..close]);
        let target = match &captures[1] {
            "TS.import" => parse_import(&arguments),
            _ => parse_require(&arguments),
        };
        if let Some(target) = target {
            references.push(Reference {
                expression: contents[start..=close].to_owned(),
                target,
            });
        }
    }
    references
}

/// Source text with comments and long strings blanked out.
///
/// Blanked bytes become spaces (newlines are kept), so offsets into `text`
/// are offsets into the original source. Quoted strings stay in place because
/// call arguments are read from them; their byte ranges are recorded instead.
struct MaskedSource {
    text: String,
    quoted: Vec<Range<usize>>,
}

impl MaskedSource {
    fn in_quoted_string(&self, offset: usize) -> bool {
        self.quoted.iter().any(|range| range.contains(&offset))
    }
}

fn mask_non_code(contents: &str) -> MaskedSource {
    let bytes = contents.as_bytes();
    let mut masked = bytes.to_vec();
    let mut quoted = Vec::new();
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                let end = match long_bracket_level(bytes, index + 2) {
                    Some(level) => long_bracket_end(contents, index + 2, level),
                    None => contents[index..]
                        .find('\n')
                        .map_or(contents.len(), |offset| index + offset),
                };
                blank(&mut masked[index..end]);
                index = end;
            }
            b'[' => match long_bracket_level(bytes, index) {
                Some(level) => {
                    let end = long_bracket_end(contents, index, level);
                    blank(&mut masked[index..end]);
                    index = end;
                }
                None => index += 1,
            },
            quote @ (b'"' | b'\'') => {
                let start = index;
                index += 1;
                while index < bytes.len() && bytes[index] != quote && bytes[index] != b'\n' {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
                index = (index + 1).min(bytes.len());
                quoted.push(start..index);
            }
            _ => index += 1,
        }
    }

    MaskedSource {
        text: String::from_utf8_lossy(&masked).into_owned(),
        quoted,
    }
}

/// Number of `=` in a long bracket opening at `at` (`[[`, `[==[`)
fn long_bracket_level(bytes: &[u8], at: usize) -> Option<usize> {
    if bytes.get(at) != Some(&b'[') {
        return None;
    }
    let level = bytes[at + 1..].iter().take_while(|b| **b == b'=').count();
    (bytes.get(at + 1 + level) == Some(&b'[')).then_some(level)
}

/// Offset just past the long bracket closing the one opened at `at`, or the
/// end of input when it is never closed
fn long_bracket_end(contents: &str, at: usize, level: usize) -> usize {
    let body = at + level + 2;
    let closer = format!("]{}]", "=".repeat(level));
    contents[body..]
        .find(&closer)
        .map_or(contents.len(), |offset| body + offset + closer.len())
}

/// Replace everything but newlines with spaces
fn blank(bytes: &mut [u8]) {
    for byte in bytes.iter_mut().filter(|byte| **byte != b'\n') {
        *byte = b' ';
    }
}

fn is_member_access(contents: &str, start: usize) -> bool {
    matches!(
        contents[..start].chars().next_back(),
        Some('.' | ':' | '_')
    )
}

fn is_function_definition(contents: &str, start: usize) -> bool {
    contents[..start].trim_end().ends_with("function")
}

/// `TS.import(script, base, "a", ...)`
fn parse_import(arguments: &[&str]) -> Option<ReferenceTarget> {
    let (_caller, rest) = arguments.split_first()?;
    let (base, names) = rest.split_first()?;
    let names = names
        .iter()
        .map(|name| parse_string_literal(name))
        .collect::<Option<Vec<_>>>()?;

    match parse_instance_expression(base)? {
        ReferenceTarget::Instance(mut segments) => {
            segments.extend(names.into_iter().map(Segment::Child));
            Some(ReferenceTarget::Instance(segments))
        }
        ReferenceTarget::Package(mut segments) => {
            segments.extend(names);
            Some(ReferenceTarget::Package(segments))
        }
    }
}

fn parse_require(arguments: &[&str]) -> Option<ReferenceTarget> {
    match arguments {
        [argument] => parse_instance_expression(argument),
        _ => None,
    }
}

/// Parse `script.Parent:WaitForChild("x")["y"]` style expressions, or a
/// `TS.getModule(script, "@scope", "name")` package lookup optionally followed
/// by child accesses (`.src`)
pub fn parse_instance_expression(expression: &str) -> Option<ReferenceTarget> {
    let expression = expression.trim();

    if let Some(rest) = expression.strip_prefix("TS.getModule") {
        let mut cursor = Cursor::new(rest);
        let arguments = cursor.call_arguments()?;
        let (_caller, names) = arguments.split_first()?;
        let mut names = names
            .iter()
            .map(|name| parse_string_literal(name))
            .collect::<Option<Vec<_>>>()?;
        if names.is_empty() {
            return None;
        }
        for segment in parse_chain(&mut cursor)? {
            match segment {
                Segment::Child(name) => names.push(name),
                Segment::Script | Segment::Parent => return None,
            }
        }
        return Some(ReferenceTarget::Package(names));
    }

    let mut cursor = Cursor::new(expression);
    if cursor.identifier()? != "script" {
        return None;
    }
    let mut segments = vec![Segment::Script];
    segments.extend(parse_chain(&mut cursor)?);
    Some(ReferenceTarget::Instance(segments))
}

/// Member accesses after the root of an instance path, up to the end of input
fn parse_chain(cursor: &mut Cursor<'_>) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            None => return Some(segments),
            Some('.') => {
                cursor.bump();
                cursor.skip_whitespace();
                let name = cursor.identifier()?;
                segments.push(if name == "Parent" {
                    Segment::Parent
                } else {
                    Segment::Child(name.to_owned())
                });
            }
            Some(':') => {
                cursor.bump();
                let method = cursor.identifier()?;
                if method != "WaitForChild" && method != "FindFirstChild" {
                    return None;
                }
                let arguments = cursor.call_arguments()?;
                let name = parse_string_literal(arguments.first()?)?;
                segments.push(Segment::Child(name));
            }
            Some('[') => {
                cursor.bump();
                let close = cursor.rest().find(']')?;
                let name = parse_string_literal(&cursor.rest()[..close])?;
                cursor.advance(close + 1);
                segments.push(Segment::Child(name));
            }
            Some(_) => return None,
        }
    }
}

/// Decode a single- or double-quoted Lua string literal
pub fn parse_string_literal(text: &str) -> Option<String> {
    let text = text.trim();
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;

    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == quote {
            // An unescaped quote means this was not one literal
            return None;
        }
        if ch != '\\' {
            value.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            other => value.push(other),
        }
    }
    Some(value)
}

/// Index of the `)` matching an already-consumed `(`, skipping string literals
fn find_closing_paren(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut index = from;
    while index < bytes.len() {
        match bytes[index] {
            quote @ (b'"' | b'\'') => {
                index += 1;
                while index < bytes.len() && bytes[index] != quote {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' if depth == 0 => return Some(index),
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        index += 1;
    }
    None
}

/// Split call arguments on top-level commas
fn split_arguments(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut arguments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            quote @ (b'"' | b'\'') => {
                index += 1;
                while index < bytes.len() && bytes[index] != quote {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                arguments.push(text[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
        index += 1;
    }
    let last = text[start..].trim();
    if !last.is_empty() || !arguments.is_empty() {
        arguments.push(last);
    }
    arguments
}

struct Cursor<'a> {
    text: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, position: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.position..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.peek() {
            self.position += ch.len_utf8();
        }
    }

    fn advance(&mut self, bytes: usize) {
        self.position = (self.position + bytes).min(self.text.len());
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.position += rest.len() - rest.trim_start().len();
    }

    fn identifier(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let length = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if length == 0 || rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        self.position += length;
        Some(&rest[..length])
    }

    /// Consume `( ... )` and return its top-level arguments
    fn call_arguments(&mut self) -> Option<Vec<&'a str>> {
        self.skip_whitespace();
        let rest = self.rest().strip_prefix('(')?;
        let close = find_closing_paren(rest, 0)?;
        self.advance(close + 2);
        Some(split_arguments(&rest[..close]))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn child(name: &str) -> Segment {
        Segment::Child(name.to_owned())
    }

    #[test]
    fn test_ts_import_with_parent_base() {
        let refs = scan_references(r#"local util = TS.import(script, script.Parent, "shared", "util")"#);
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Instance(vec![
                Segment::Script,
                Segment::Parent,
                child("shared"),
                child("util"),
            ])
        );
        assert_eq!(
            refs[0].expression,
            r#"TS.import(script, script.Parent, "shared", "util")"#
        );
    }

    #[test]
    fn test_runtime_lib_require() {
        let refs = scan_references("local TS = require(script.include.RuntimeLib)\n");
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Instance(vec![Segment::Script, child("include"), child("RuntimeLib")])
        );
    }

    #[test]
    fn test_wait_for_child_and_index_syntax() {
        let refs = scan_references(
            r#"local x = require(script.Parent:WaitForChild("lib", 5)["node_modules"].Util)"#,
        );
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Instance(vec![
                Segment::Script,
                Segment::Parent,
                child("lib"),
                child("node_modules"),
                child("Util"),
            ])
        );
    }

    #[test]
    fn test_get_module_base_is_a_package_reference() {
        let refs = scan_references(
            r#"local Services = TS.import(script, TS.getModule(script, "@rbxts", "services"))"#,
        );
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Package(vec!["@rbxts".into(), "services".into()])
        );

        let refs = scan_references(
            r#"local Roact = TS.import(script, TS.getModule(script, "@rbxts", "roact").src)"#,
        );
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Package(vec!["@rbxts".into(), "roact".into(), "src".into()])
        );

        assert!(scan_references(r#"TS.import(script, TS.getModule(script).Parent)"#).is_empty());
    }

    #[test]
    fn test_ignores_non_bundle_requires() {
        let source = r#"
local Players = game:GetService("Players")
local a = require(game:GetService("ReplicatedStorage").Shared)
local b = require("./relative")
local c = __.require(script.Parent.x)
-- local d = require(script.Parent.commented)
local function require(module) return module end
"#;
        assert!(scan_references(source).is_empty());
    }

    #[test]
    fn test_dashes_inside_string_do_not_start_a_comment() {
        let refs = scan_references(
            r#"local sep = "--" local TS = require(script.include.RuntimeLib)"#,
        );
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].expression, "require(script.include.RuntimeLib)");
    }

    #[test]
    fn test_block_comments_and_long_strings_are_skipped() {
        let source = r#"--[[
 usage: local x = require(script.example)
]]
--[==[ TS.import(script, script.Parent, "gone") ]] still a comment ]==]
local doc = [[require(script.inside_long_string)]]
local level = [=[ ]] require(script.still_inside) ]=]
local quoted = "require(script.inside_quotes)"
local kept = require(script.kept)
"#;
        let refs = scan_references(source);
        assert_eq!(refs.len(), 1);
        assert_eq!(
            refs[0].target,
            ReferenceTarget::Instance(vec![Segment::Script, child("kept")])
        );
    }

    #[test]
    fn test_unclosed_block_comment_runs_to_end_of_input() {
        assert!(scan_references("--[[ require(script.a)\nrequire(script.b)").is_empty());
    }

    #[test]
    fn test_masking_keeps_offsets() {
        let source = "--[[é]] require(script.a) -- tail";
        let masked = mask_non_code(source);
        assert_eq!(masked.text.len(), source.len());
        assert_eq!(masked.text.find("require"), source.find("require"));
        assert!(!masked.text.contains("tail"));
    }

    #[test]
    fn test_multiple_references_in_order() {
        let source = r#"
local TS = require(script.Parent.include.RuntimeLib)
local a = TS.import(script, script.Parent, "a")
local b = TS.import(script, script.Parent, 'b')
"#;
        let expressions: Vec<String> = scan_references(source)
            .into_iter()
            .map(|r| r.expression)
            .collect();
        assert_eq!(
            expressions,
            vec![
                "require(script.Parent.include.RuntimeLib)",
                r#"TS.import(script, script.Parent, "a")"#,
                "TS.import(script, script.Parent, 'b')",
            ]
        );
    }

    #[test]
    fn test_parse_string_literal() {
        assert_eq!(parse_string_literal(r#""@rbxts""#).as_deref(), Some("@rbxts"));
        assert_eq!(parse_string_literal("'a\\'b'").as_deref(), Some("a'b"));
        assert_eq!(parse_string_literal("name"), None);
        assert_eq!(parse_string_literal(r#""a" .. "b""#), None);
    }

    #[test]
    fn test_split_arguments_respects_nesting() {
        assert_eq!(
            split_arguments(r#"script, TS.getModule(script, "@a", "b"), "c,d""#),
            vec!["script", r#"TS.getModule(script, "@a", "b")"#, r#""c,d""#]
        );
        assert!(split_arguments("  ").is_empty());
    }
}
