//! XPath extraction from captured response bodies.
//!
//! Name tests follow the loose matching SOAP integrations expect:
//! - an unprefixed name (`//Status`) matches on local name in any
//!   namespace, including a default `xmlns="..."`
//! - a prefixed name (`//ns:Status`) resolves `ns` against the
//!   declarations in the response itself
//!
//! Paths are rewritten before compilation so that unprefixed steps become
//! `*[local-name()='Status']`; everything else passes through unchanged.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::name::PrefixDeclaration;
use quick_xml::Reader;
use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value, XPath};

use crate::hooks::HookError;

/// Check that `xpath` compiles.
pub fn check_path(xpath: &str) -> Result<(), HookError> {
    compile(&relax_name_tests(xpath).path, xpath)?;
    Ok(())
}

/// Evaluate `xpath` against the XML in `body` and return the text of the
/// first match in document order, trimmed.
pub fn extract_value(body: &[u8], xpath: &str) -> Result<String, HookError> {
    let text = std::str::from_utf8(body).map_err(|e| HookError::Parse(e.to_string()))?;
    let text = text.trim_start_matches('\u{feff}');
    let package = parser::parse(text).map_err(|e| HookError::Parse(format!("{e:?}")))?;
    let document = package.as_document();

    let not_found = || HookError::NotFound {
        path: xpath.to_string(),
    };

    let relaxed = relax_name_tests(xpath);
    let bindings = declared_prefixes(body);
    // A prefix the response never declares cannot match anything.
    if relaxed.prefixes.iter().any(|p| !bindings.contains_key(p)) {
        return Err(not_found());
    }

    let compiled = compile(&relaxed.path, xpath)?;
    let mut context = Context::new();
    for (prefix, uri) in &bindings {
        context.set_namespace(prefix, uri);
    }

    let value = compiled
        .evaluate(&context, document.root())
        .map_err(|e| HookError::InvalidPath {
            path: xpath.to_string(),
            reason: format!("{e:?}"),
        })?;

    let matched = match value {
        Value::Nodeset(nodes) => nodes
            .document_order_first()
            .map(|node| node.string_value())
            .ok_or_else(not_found)?,
        other => other.string(),
    };

    Ok(matched.trim().to_string())
}

fn compile(path: &str, original: &str) -> Result<XPath, HookError> {
    Factory::new()
        .build(path)
        .map_err(|e| HookError::InvalidPath {
            path: original.to_string(),
            reason: format!("{e:?}"),
        })?
        .ok_or_else(|| HookError::InvalidPath {
            path: original.to_string(),
            reason: "empty expression".to_string(),
        })
}

/// Every `xmlns:prefix` declared anywhere in the document. The first
/// declaration of a prefix wins.
fn declared_prefixes(body: &[u8]) -> HashMap<String, String> {
    let mut bindings = HashMap::new();
    let mut reader = Reader::from_reader(body);

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                for attr in element.attributes().flatten() {
                    let Some(PrefixDeclaration::Named(prefix)) = attr.key.as_namespace_binding()
                    else {
                        continue;
                    };
                    let Ok(uri) = attr.unescape_value() else {
                        continue;
                    };
                    bindings
                        .entry(String::from_utf8_lossy(prefix).into_owned())
                        .or_insert_with(|| uri.into_owned());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }

    bindings
}

/// A path with unprefixed name tests rewritten to local-name matches.
#[derive(Debug, PartialEq, Eq)]
struct RelaxedPath {
    path: String,
    /// Prefixes used by name tests, in order of appearance.
    prefixes: Vec<String>,
}

/// What the previous token leaves the lexer expecting.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Prev {
    /// Start of the expression, `(`, `[`, `,`, `@` or `::`.
    Open,
    /// An operator; an operand must follow.
    Operator,
    /// An operand; `*` and names that follow are operators.
    Operand,
}

/// Rewrite `path` so unprefixed element and attribute names match on
/// local name. Follows the XPath 1.0 lexical rules for telling name tests
/// apart from operator names, function names and axis names.
fn relax_name_tests(path: &str) -> RelaxedPath {
    let chars: Vec<char> = path.chars().collect();
    let mut out = String::with_capacity(path.len() + 32);
    let mut prefixes = Vec::new();
    let mut prev = Prev::Open;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            out.push(ch);
            i += 1;
            continue;
        }

        match ch {
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ch)
                    .map_or(chars.len(), |p| i + p + 2);
                out.extend(&chars[i..end]);
                i = end;
                prev = Prev::Operand;
            }
            '(' | '[' | ',' | '@' => {
                out.push(ch);
                i += 1;
                prev = Prev::Open;
            }
            ')' | ']' => {
                out.push(ch);
                i += 1;
                prev = Prev::Operand;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
                prev = Prev::Open;
            }
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                let len = if chars.get(i + 1) == Some(&'.') { 2 } else { 1 };
                out.extend(&chars[i..i + len]);
                i += len;
                prev = Prev::Operand;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let end = scan(&chars, i, |c| c.is_ascii_digit() || c == '.');
                out.extend(&chars[i..end]);
                i = end;
                prev = Prev::Operand;
            }
            '$' => {
                let end = scan(&chars, i + 1, |c| is_name_char(c) || c == ':');
                out.extend(&chars[i..end]);
                i = end;
                prev = Prev::Operand;
            }
            '*' => {
                out.push('*');
                i += 1;
                prev = if prev == Prev::Operand {
                    Prev::Operator
                } else {
                    Prev::Operand
                };
            }
            '/' | '|' | '+' | '-' | '=' | '!' | '<' | '>' => {
                let doubled = matches!(
                    (ch, chars.get(i + 1)),
                    ('/', Some('/')) | ('!' | '<' | '>', Some('='))
                );
                let len = if doubled { 2 } else { 1 };
                out.extend(&chars[i..i + len]);
                i += len;
                prev = Prev::Operator;
            }
            c if is_name_start(c) => {
                let start = i;
                i = scan(&chars, i, is_name_char);
                let mut prefix = None;
                if chars.get(i) == Some(&':') && chars.get(i + 1) != Some(&':') {
                    match chars.get(i + 1) {
                        Some('*') => {
                            prefix = Some(chars[start..i].iter().collect::<String>());
                            i += 2;
                        }
                        Some(&n) if is_name_start(n) => {
                            prefix = Some(chars[start..i].iter().collect::<String>());
                            i = scan(&chars, i + 1, is_name_char);
                        }
                        _ => {}
                    }
                }
                let name: String = chars[start..i].iter().collect();

                if prev == Prev::Operand {
                    // `and`, `or`, `div`, `mod`
                    out.push_str(&name);
                    prev = Prev::Operator;
                    continue;
                }
                prev = Prev::Operand;

                let next = chars[i..].iter().find(|c| !c.is_whitespace()).copied();
                let after_next = chars[i..]
                    .iter()
                    .skip_while(|c| c.is_whitespace())
                    .nth(1)
                    .copied();
                let is_function = next == Some('(');
                let is_axis = next == Some(':') && after_next == Some(':');

                if is_function || is_axis {
                    out.push_str(&name);
                } else if let Some(prefix) = prefix {
                    prefixes.push(prefix);
                    out.push_str(&name);
                } else {
                    out.push_str("*[local-name()='");
                    out.push_str(&name);
                    out.push_str("']");
                }
            }
            other => {
                // Not XPath; left for the compiler to reject.
                out.push(other);
                i += 1;
                prev = Prev::Operator;
            }
        }
    }

    RelaxedPath {
        path: out,
        prefixes,
    }
}

fn scan(chars: &[char], from: usize, accept: impl Fn(char) -> bool) -> usize {
    chars[from..]
        .iter()
        .position(|&c| !accept(c))
        .map_or(chars.len(), |p| from + p)
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || c == '-' || c == '.'
}
