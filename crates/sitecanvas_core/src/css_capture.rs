//! Layered CSS capture from the editor.
//!
//! Layers are applied in order and concatenated: the generated stylesheet,
//! every style rule the editor tracks, the wrapper's own block, and finally a
//! per-component walk when nothing else produced CSS. A block is skipped only
//! when an identical block is already present. When two layers emit rules for
//! the same selector, the later block wins through the cascade.

use std::collections::HashSet;

use regex::Regex;

use crate::WRAPPER_CLASS;
use crate::editor::{ComponentNode, EditorHandle, StyleRule, WrapperStyle};

pub fn capture_css(editor: &dyn EditorHandle) -> String {
    let mut blocks = CssBlocks::default();

    if let Some(generated) = editor.generated_css() {
        blocks.push(&generated);
    }

    for rule in editor.style_rules() {
        if let Some(text) = serialize_rule(&rule) {
            blocks.push(&text);
        }
    }

    if let Some(wrapper) = editor.wrapper() {
        blocks.rewrite_id_selector(&wrapper.element_id);
        if let Some(text) = wrapper_block(&wrapper) {
            blocks.push(&text);
        }
    }

    if blocks.is_empty() {
        for component in editor.components() {
            if let Some(text) = component_rule(&component) {
                blocks.push(&text);
            }
        }
    }

    blocks.finish()
}

/// Top-level rule blocks, deduplicated on their normalized text.
#[derive(Default)]
struct CssBlocks {
    blocks: Vec<String>,
    keys: HashSet<String>,
}

impl CssBlocks {
    fn push(&mut self, css: &str) {
        for block in top_level_blocks(css) {
            if self.keys.insert(block_key(block)) {
                self.blocks.push(block.to_string());
            }
        }
    }

    fn rewrite_id_selector(&mut self, element_id: &str) {
        if element_id.trim().is_empty() {
            return;
        }
        let blocks = std::mem::take(&mut self.blocks);
        self.keys.clear();
        for block in blocks {
            self.push(&rewrite_id_selector(&block, element_id));
        }
    }

    fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn finish(self) -> String {
        self.blocks.join("\n")
    }
}

/// Splits a stylesheet into top-level statements: `prelude { ... }` blocks
/// and `@rule ...;` lines. Braces inside strings and comments are skipped.
fn top_level_blocks<'a>(css: &'a str) -> Vec<&'a str> {
    let mut blocks = Vec::new();
    let mut push = |text: &'a str| {
        let text = text.trim();
        if !text.is_empty() {
            blocks.push(text);
        }
    };
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = css.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        if let Some(open) = quote {
            if ch == '\\' {
                chars.next();
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '/' if chars.peek().map(|(_, next)| *next) == Some('*') => {
                chars.next();
                let mut prev = ' ';
                for (_, inner) in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    push(&css[start..=index]);
                    start = index + 1;
                }
            }
            ';' if depth == 0 => {
                push(&css[start..=index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    push(&css[start..]);
    blocks
}

/// Whitespace-insensitive form of one block. Whitespace between selector
/// tokens is kept as a single space, so `.card a` and `.carda` stay distinct.
fn block_key(block: &str) -> String {
    let mut key = String::with_capacity(block.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    let is_punct = |ch: char, depth: usize| match ch {
        '{' | '}' | ',' | '>' => true,
        ';' | ':' => depth > 0,
        _ => false,
    };
    for ch in block.chars() {
        if let Some(open) = quote {
            key.push(ch);
            if ch == open {
                quote = None;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            let after_punct = key.chars().last().is_none_or(|last| is_punct(last, depth));
            if !after_punct && !is_punct(ch, depth) {
                key.push(' ');
            }
            pending_space = false;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if key.ends_with(';') {
                    key.pop();
                }
            }
            _ => {}
        }
        key.push(ch);
    }
    key
}

pub fn serialize_rule(rule: &StyleRule) -> Option<String> {
    if let Some(own) = rule.serialized.as_deref().map(str::trim).filter(|text| !text.is_empty()) {
        return Some(own.to_string());
    }
    declaration_block(&rule.selector, &rule.declarations)
}

fn declaration_block(selector: &str, declarations: &[(String, String)]) -> Option<String> {
    let selector = selector.trim();
    if selector.is_empty() {
        return None;
    }
    let body: Vec<String> = declarations
        .iter()
        .filter(|(prop, value)| !prop.trim().is_empty() && !value.trim().is_empty())
        .map(|(prop, value)| format!("{}: {};", prop.trim(), value.trim()))
        .collect();
    if body.is_empty() {
        return None;
    }
    Some(format!("{selector} {{ {} }}", body.join(" ")))
}

fn wrapper_block(wrapper: &WrapperStyle) -> Option<String> {
    declaration_block(&format!(".{WRAPPER_CLASS}"), &wrapper.declarations)
}

/// Replaces `#<id>` in selectors with the fixed wrapper class. Declaration
/// values are left alone, so a hex colour equal to the id survives.
pub fn rewrite_id_selector(css: &str, element_id: &str) -> String {
    let pattern = format!(r"#{}([^A-Za-z0-9_-]|$)", regex::escape(element_id));
    let Ok(re) = Regex::new(&pattern) else {
        return css.to_string();
    };
    rewrite_blocks(css, &re, "\n")
}

fn rewrite_blocks(css: &str, re: &Regex, separator: &str) -> String {
    top_level_blocks(css)
        .into_iter()
        .map(|block| rewrite_block(block, re))
        .collect::<Vec<_>>()
        .join(separator)
}

fn rewrite_block(block: &str, re: &Regex) -> String {
    let Some(open) = block.find('{') else {
        return block.to_string();
    };
    let (prelude, body) = block.split_at(open);
    if prelude.trim_start().starts_with('@') {
        let Some(inner) = body.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) else {
            return block.to_string();
        };
        return format!("{prelude}{{ {} }}", rewrite_blocks(inner, re, " "));
    }
    let replacement = format!(".{WRAPPER_CLASS}${{1}}");
    format!("{}{body}", re.replace_all(prelude, replacement.as_str()))
}

fn component_rule(component: &ComponentNode) -> Option<String> {
    if component.style.is_empty() {
        return None;
    }
    let selector = match component.classes.iter().find(|class| !class.trim().is_empty()) {
        Some(class) => format!(".{}", class.trim()),
        None if !component.id.trim().is_empty() => format!("#{}", component.id.trim()),
        None => return None,
    };
    declaration_block(&selector, &component.style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MemoryEditor;
    use std::collections::BTreeMap;

    fn decls(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn layers_are_concatenated_without_duplicates() {
        let mut editor = MemoryEditor::new();
        editor.generated_css = Some(".hero { color: red; }".to_string());
        editor.rules = vec![
            StyleRule {
                selector: ".hero".to_string(),
                declarations: decls(&[("color", "red")]),
                serialized: Some(".hero{color:red;}".to_string()),
            },
            StyleRule {
                selector: ".cta".to_string(),
                declarations: decls(&[("padding", "4px")]),
                serialized: None,
            },
        ];
        let css = capture_css(&editor);
        assert_eq!(css.matches(".hero").count(), 1);
        assert!(css.contains(".cta { padding: 4px; }"));
    }

    #[test]
    fn wrapper_id_rules_become_class_rules() {
        let mut editor = MemoryEditor::new();
        editor.generated_css = Some("#wrapper-1a { background: #fff; } #wrapper-1ab { x: y; }".to_string());
        editor.wrapper = Some(WrapperStyle {
            element_id: "wrapper-1a".to_string(),
            declarations: decls(&[("min-height", "100vh")]),
        });
        let css = capture_css(&editor);
        assert!(css.contains(".sc-wrapper { background: #fff; }"));
        assert!(css.contains("#wrapper-1ab"));
        assert!(css.contains(".sc-wrapper { min-height: 100vh; }"));
    }

    #[test]
    fn descendant_rule_does_not_hide_a_standalone_rule() {
        let mut editor = MemoryEditor::new();
        editor.generated_css = Some(".card a { color: red; }".to_string());
        editor.rules = vec![StyleRule {
            selector: "a".to_string(),
            declarations: decls(&[("color", "red")]),
            serialized: None,
        }];
        assert_eq!(capture_css(&editor), ".card a { color: red; }\na { color: red; }");
    }

    #[test]
    fn rule_inside_a_larger_layer_is_kept_once() {
        let mut editor = MemoryEditor::new();
        editor.generated_css = Some(".a { x: 1; }\n.b  {\n  y: 2;\n}".to_string());
        editor.rules = vec![StyleRule {
            selector: ".b".to_string(),
            declarations: decls(&[("y", "2")]),
            serialized: None,
        }];
        let css = capture_css(&editor);
        assert_eq!(css.matches(".b").count(), 1);
        assert!(css.starts_with(".a { x: 1; }"));
    }

    #[test]
    fn blocks_split_at_top_level_only() {
        let css = r#"@import url("x.css"); .a::after { content: "}"; } /* { */ .b { c: d; } @media (min-width: 1px) { .c { e: f; } }"#;
        assert_eq!(
            top_level_blocks(css),
            vec![
                r#"@import url("x.css");"#,
                r#".a::after { content: "}"; }"#,
                "/* { */ .b { c: d; }",
                "@media (min-width: 1px) { .c { e: f; } }",
            ]
        );
    }

    #[test]
    fn id_rewrite_leaves_declaration_values_alone() {
        assert_eq!(
            rewrite_id_selector("#abc { color: #abc; }", "abc"),
            ".sc-wrapper { color: #abc; }"
        );
        let css = rewrite_id_selector(
            "@media (max-width: 600px) { #abc .x { border-color: #abc; } }",
            "abc",
        );
        assert_eq!(css, "@media (max-width: 600px) { .sc-wrapper .x { border-color: #abc; } }");
    }

    #[test]
    fn component_walk_runs_only_when_nothing_else_produced_css() {
        let mut editor = MemoryEditor::new();
        editor.components = vec![
            ComponentNode::new(
                "i1",
                "div",
                vec!["box".to_string()],
                BTreeMap::new(),
                decls(&[("margin", "0")]),
            ),
            ComponentNode::new("i2", "p", Vec::new(), BTreeMap::new(), decls(&[("color", "blue")])),
        ];
        let css = capture_css(&editor);
        assert!(css.contains(".box { margin: 0; }"));
        assert!(css.contains("#i2 { color: blue; }"));

        editor.generated_css = Some("p { color: green; }".to_string());
        let css = capture_css(&editor);
        assert_eq!(css, "p { color: green; }");
    }
}
