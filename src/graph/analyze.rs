//! Static source analyzer feeding the code knowledge graph (C8 step 3).
//!
//! The reference corpus only ever points this at Python, so the heuristics
//! here are Python-shaped: indentation tracks class/method nesting, `def`/
//! `class` lines are read with regexes rather than a real parser, and
//! docstrings are whatever immediately follows as a triple-quoted string.
//! The design stays language-agnostic at the trait boundary
//! ([`crate::models::FileAnalysis`]) — a future analyzer for another
//! language plugs in here without touching the graph ingest pipeline.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AttributeNode, ClassNode, FileAnalysis, FunctionNode, MethodNode, ParamDetail};

static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>\s*)class\s+(?P<name>\w+)\s*(\([^)]*\))?\s*:").unwrap());
static DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?P<async>async\s+)?def\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)\s*(->\s*(?P<ret>[^:]+))?:").unwrap()
});
static ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<indent>\s+)self\.(?P<name>\w+)\s*(:\s*(?P<ty>[\w\[\], \.]+))?\s*=").unwrap());
static DECORATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*@(\w+)").unwrap());
static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

/// Keywords that parse as call-shaped (`if (`, `while (`, ...) but aren't calls.
const CALL_KEYWORDS: &[&str] = &[
    "if", "while", "for", "return", "elif", "print", "def", "class", "with", "except", "lambda", "yield",
];

/// Extracts candidate call-expression names from source text (§4.11/§6
/// supplement, `check_ai_script_hallucinations`). Heuristic, language-agnostic
/// enough for the Python-shaped corpus this analyzer already targets: any
/// `identifier(`, method calls included (resolved by bare name, same as
/// [`GraphStore::find_method`](crate::graph::GraphStore::find_method)'s
/// own lookup), excluding control-flow keywords.
pub fn extract_call_names(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in source.lines() {
        for caps in CALL_RE.captures_iter(line) {
            let name = caps[1].to_string();
            if CALL_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }
    names
}

/// One open `class` block during the scan, tracked by indentation depth.
struct ClassScope {
    indent: usize,
    name: String,
}

/// Analyzes a single file's Python source, if `path` looks like one
/// (`.py` suffix) — all other extensions return an empty [`FileAnalysis`],
/// since only the reference corpus's Python trees are statically analyzed.
pub fn analyze_file(path: &str, source: &str) -> FileAnalysis {
    if !path.ends_with(".py") {
        return FileAnalysis::default();
    }

    let lines: Vec<&str> = source.lines().collect();
    let mut analysis = FileAnalysis::default();
    let mut class_stack: Vec<ClassScope> = Vec::new();
    let mut pending_decorators: Vec<String> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = DECORATOR_RE.captures(line) {
            pending_decorators.push(caps[1].to_string());
            continue;
        }

        if let Some(caps) = CLASS_RE.captures(line) {
            let indent = indent_width(&caps["indent"]);
            pop_scopes_at_or_below(&mut class_stack, indent);
            let name = caps["name"].to_string();
            let qualified_name = qualify(&class_stack, &name);
            let docstring = docstring_after(&lines, i);
            analysis.classes.push(ClassNode {
                name: name.clone(),
                qualified_name,
                file_path: path.to_string(),
                line_number: (i + 1) as u32,
                docstring,
            });
            class_stack.push(ClassScope { indent, name });
            pending_decorators.clear();
            continue;
        }

        if let Some(caps) = DEF_RE.captures(line) {
            let indent = indent_width(&caps["indent"]);
            pop_scopes_at_or_below(&mut class_stack, indent);
            let name = caps["name"].to_string();
            let is_async = caps.name("async").is_some();
            let return_type = caps.name("ret").map(|m| m.as_str().trim().to_string());
            let params_raw = caps["params"].to_string();
            let params_detail = parse_params(&params_raw);
            let docstring = docstring_after(&lines, i);
            let is_static = pending_decorators.iter().any(|d| d == "staticmethod");
            let is_classmethod = pending_decorators.iter().any(|d| d == "classmethod");

            match class_stack.last() {
                Some(scope) if scope.indent < indent => {
                    let qualified_name = format!("{}.{}", qualify(&class_stack, &scope.name), name);
                    analysis.methods.push(MethodNode {
                        name,
                        qualified_name,
                        class_name: scope.name.clone(),
                        line_number: (i + 1) as u32,
                        params_raw,
                        params_detail,
                        return_type,
                        docstring,
                        is_async,
                        is_static,
                        is_classmethod,
                    });
                }
                _ => {
                    analysis.functions.push(FunctionNode {
                        qualified_name: name.clone(),
                        name,
                        file_path: path.to_string(),
                        line_number: (i + 1) as u32,
                        params_raw,
                        params_detail,
                        return_type,
                        docstring,
                        is_async,
                    });
                }
            }
            pending_decorators.clear();
            continue;
        }

        if let Some(caps) = ASSIGN_RE.captures(line) {
            if let Some(scope) = class_stack.last() {
                let indent = indent_width(&caps["indent"]);
                if indent > scope.indent {
                    analysis.attributes.push(AttributeNode {
                        name: caps["name"].to_string(),
                        class_name: scope.name.clone(),
                        type_annotation: caps.name("ty").map(|m| m.as_str().trim().to_string()),
                    });
                }
            }
        }

        pending_decorators.clear();
    }

    analysis.attributes.sort_by(|a, b| (&a.class_name, &a.name).cmp(&(&b.class_name, &b.name)));
    analysis.attributes.dedup_by(|a, b| a.class_name == b.class_name && a.name == b.name);
    analysis
}

fn indent_width(s: &str) -> usize {
    s.chars().count()
}

fn pop_scopes_at_or_below(stack: &mut Vec<ClassScope>, indent: usize) {
    while matches!(stack.last(), Some(scope) if scope.indent >= indent) {
        stack.pop();
    }
}

fn qualify(stack: &[ClassScope], name: &str) -> String {
    if stack.is_empty() {
        name.to_string()
    } else {
        let prefix: Vec<&str> = stack.iter().map(|s| s.name.as_str()).collect();
        format!("{}.{}", prefix.join("."), name)
    }
}

fn docstring_after(lines: &[&str], def_line: usize) -> Option<String> {
    let next = lines.get(def_line + 1)?.trim();
    let quote = if next.starts_with("\"\"\"") {
        "\"\"\""
    } else if next.starts_with("'''") {
        "'''"
    } else {
        return None;
    };
    let rest = &next[quote.len()..];
    if let Some(end) = rest.find(quote) {
        let text = rest[..end].trim();
        return Some(text.to_string());
    }
    // Multi-line docstring: collect until the closing triple-quote.
    let mut collected = vec![rest.to_string()];
    for line in &lines[def_line + 2..] {
        if let Some(end) = line.find(quote) {
            collected.push(line[..end].to_string());
            break;
        }
        collected.push(line.to_string());
    }
    let joined = collected.join("\n").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn parse_params(raw: &str) -> Vec<ParamDetail> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "self" && *p != "cls")
        .map(|p| {
            let (name_and_type, default_value) = match p.split_once('=') {
                Some((a, b)) => (a.trim(), Some(b.trim().to_string())),
                None => (p, None),
            };
            let (name, type_annotation) = match name_and_type.split_once(':') {
                Some((a, b)) => (a.trim().to_string(), Some(b.trim().to_string())),
                None => (name_and_type.trim_start_matches(['*']).to_string(), None),
            };
            ParamDetail {
                name,
                type_annotation,
                default_value,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
class Greeter:
    """Greets people."""

    def __init__(self, name: str):
        self.name = name
        self.loud = False

    @staticmethod
    def shout(text: str) -> str:
        """Uppercases text."""
        return text.upper()

def top_level(x, y=1):
    return x + y
"#;

    #[test]
    fn non_python_files_are_skipped() {
        let analysis = analyze_file("main.rs", SAMPLE);
        assert!(analysis.classes.is_empty());
    }

    #[test]
    fn extracts_class_method_function_and_attribute() {
        let analysis = analyze_file("greeter.py", SAMPLE);
        assert_eq!(analysis.classes.len(), 1);
        assert_eq!(analysis.classes[0].name, "Greeter");
        assert_eq!(analysis.classes[0].docstring.as_deref(), Some("Greets people."));

        assert_eq!(analysis.methods.len(), 2);
        let shout = analysis.methods.iter().find(|m| m.name == "shout").unwrap();
        assert!(shout.is_static);
        assert_eq!(shout.return_type.as_deref(), Some("str"));

        assert_eq!(analysis.functions.len(), 1);
        assert_eq!(analysis.functions[0].name, "top_level");
        assert_eq!(analysis.functions[0].params_detail.len(), 2);

        assert!(analysis.attributes.iter().any(|a| a.name == "name"));
        assert!(analysis.attributes.iter().any(|a| a.name == "loud"));
    }

    #[test]
    fn extract_call_names_skips_keywords_and_dedupes() {
        let source = "if check(x):\n    result = helper(x)\n    helper(y)\n    obj.method(z)";
        let calls = extract_call_names(source);
        assert!(calls.contains(&"check".to_string()));
        assert!(calls.contains(&"helper".to_string()));
        assert!(calls.contains(&"method".to_string()));
        assert!(!calls.contains(&"if".to_string()));
        assert_eq!(calls.iter().filter(|c| *c == "helper").count(), 1);
    }
}
