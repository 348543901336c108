//! Rendering of bundle statements in Luau syntax
//!
//! Every function here is pure. The orchestrator concatenates their output in
//! a fixed order: prelude, chunk registrations, tree, footer. Registrations
//! only store functions, the tree call builds the runtime proxies that the
//! registrations refer to, and the footer starts execution, so that order is
//! load-bearing.

use cow_utils::CowUtils;

use crate::{namer::NamerEntry, types::ModuleId};

/// Runtime loader embedded at the top of every bundle.
///
/// `require` accepts either a chunk identifier or a proxy instance created by
/// the tree builder. Results are cached per identifier after the first
/// successful run. A chunk that requires itself (directly or through other
/// chunks) before finishing raises a "circular require" error instead of
/// running twice. A failing chunk leaves no cache entry behind, so a later
/// `require` retries it.
const PRELUDE: &str = r#"local __ = {
	chunks = {},
	cache = {},
	loading = {},
	scripts = {},
	require = require,
}

local function require(module)
	if typeof(module) == "Instance" then
		module = __.scripts[module] or module
	end
	if typeof(module) ~= "string" then
		return __.require(module)
	end

	local cached = __.cache[module]
	if cached then
		return cached.value
	end

	local chunk = __.chunks[module]
	if not chunk then
		error(string.format("module %q is not part of this bundle", module), 2)
	end
	if __.loading[module] then
		error(string.format("circular require of module %q", module), 2)
	end

	__.loading[module] = true
	local ok, result = pcall(chunk, __.scripts[module])
	__.loading[module] = nil
	if not ok then
		error(string.format("module %q failed to load: %s", module, tostring(result)), 0)
	end

	__.cache[module] = { value = result }
	task.wait()
	return result
end

function __.decode(str)
	return game:GetService("HttpService"):JSONDecode(str)
end

function __.json(str)
	return function()
		return __.decode(str)
	end
end

function __.build(entry, parent)
	local pair, children = table.unpack(entry)
	local name, link = table.unpack(pair)
	local proxy = Instance.new(link and "ModuleScript" or "Folder")
	proxy.Name = name
	proxy.Parent = parent
	if link then
		__.scripts[proxy] = link
		__.scripts[link] = proxy
	end
	for _, child in ipairs(children) do
		__.build(child, proxy)
	end
	return proxy
end

function __.tree(str)
	return __.build(__.decode(str))
end"#;

pub fn render_prelude() -> &'static str {
    PRELUDE
}

/// Wrap a code module in a chunk registration.
///
/// Carriage returns are dropped and every non-empty line gains one tab so the
/// body nests inside the generated function.
pub fn render_module(id: ModuleId, body: &str) -> String {
    let body = body.cow_replace("\r", "");
    let indented = body
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("\t{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "__.chunks[{}] = function(script)\n{}\nend",
        chunk_key(id),
        indented.trim_end()
    )
}

/// Register a chunk that decodes an embedded JSON document when required.
///
/// The document is normalised to compact JSON first, then embedded as a
/// Luau string literal.
pub fn render_json_asset(id: ModuleId, json_text: &str) -> serde_json::Result<String> {
    let value: serde_json::Value = serde_json::from_str(json_text)?;
    let compact = serde_json::to_string(&value)?;
    Ok(format!(
        "__.chunks[{}] = __.json({})",
        chunk_key(id),
        lua_string(&compact)
    ))
}

/// Register a chunk that returns the given text, via a JSON string document
pub fn render_text_asset(id: ModuleId, text: &str) -> serde_json::Result<String> {
    render_json_asset(id, &serde_json::to_string(text)?)
}

pub fn render_tree(tree: &NamerEntry) -> serde_json::Result<String> {
    let json = serde_json::to_string(tree)?;
    Ok(format!("__.tree({})", lua_string(&json)))
}

pub fn render_footer(entry: ModuleId) -> String {
    format!("return require({})", chunk_key(entry))
}

fn chunk_key(id: ModuleId) -> String {
    lua_string(&id.to_string())
}

/// Quote `value` as a double-quoted Luau string literal.
///
/// Control characters use decimal escapes (`\ddd`), which every Lua dialect
/// accepts, unlike JSON's `\uXXXX`. Bytes at or above 0x80 pass through
/// unchanged.
pub fn lua_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\{:03}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
