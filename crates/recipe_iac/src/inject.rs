//! Best-effort injection of platform credentials into provider blocks.
//!
//! The generated provider fragments already carry credentials, but module
//! authors may declare their own `provider` blocks. Every `.tf` and
//! `.tf.json` file under the working tree (downloaded modules included) is
//! patched so those blocks receive the platform values too.
//!
//! Failures never propagate: they are logged and recorded in the
//! [`InjectionReport`]. Running the injector twice leaves the tree unchanged
//! the second time.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::credentials::{CredentialValue, ProviderAttributes, ProviderCredentialSet, ScalarValue};
use crate::hcl::{self, Block};

/// What the injector did.
#[derive(Debug, Default, Clone)]
pub struct InjectionReport {
    pub files_scanned: usize,
    pub files_modified: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

impl InjectionReport {
    pub fn modified(&self) -> bool {
        !self.files_modified.is_empty()
    }
}

/// Patches provider blocks in a file tree.
pub struct CredentialInjector<'a> {
    credentials: &'a ProviderCredentialSet,
}

impl<'a> CredentialInjector<'a> {
    pub fn new(credentials: &'a ProviderCredentialSet) -> Self {
        Self { credentials }
    }

    /// Inject into every configuration file under `root`.
    pub fn inject_tree(&self, root: &Path) -> InjectionReport {
        let mut report = InjectionReport::default();
        if self.credentials.is_empty() {
            info!("No platform provider credentials available to inject");
            return report;
        }

        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            let result = if name.ends_with(".tf.json") {
                self.inject_json_file(path)
            } else if name.ends_with(".tf") {
                self.inject_hcl_file(path)
            } else {
                continue;
            };

            report.files_scanned += 1;
            match result {
                Ok(true) => {
                    debug!("Injected provider credentials into {:?}", path);
                    report.files_modified.push(path.to_path_buf());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Skipping credential injection for {:?}: {}", path, e);
                    report.failures.push((path.to_path_buf(), e));
                }
            }
        }

        info!(
            "Credential injection scanned {} files, modified {}",
            report.files_scanned,
            report.files_modified.len()
        );
        report
    }

    fn inject_hcl_file(&self, path: &Path) -> Result<bool, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let updated = self.inject_hcl(&content).map_err(|e| e.to_string())?;
        if updated == content {
            return Ok(false);
        }
        fs::write(path, updated).map_err(|e| e.to_string())?;
        Ok(true)
    }

    fn inject_json_file(&self, path: &Path) -> Result<bool, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut document: Value = serde_json::from_str(&content).map_err(|e| e.to_string())?;
        if !self.inject_json(&mut document) {
            return Ok(false);
        }
        let rendered = serde_json::to_string_pretty(&document).map_err(|e| e.to_string())?;
        if rendered == content {
            return Ok(false);
        }
        fs::write(path, rendered).map_err(|e| e.to_string())?;
        Ok(true)
    }

    /// Patch HCL text, returning the new text.
    pub fn inject_hcl(&self, src: &str) -> Result<String, hcl::ParseError> {
        let body = hcl::parse(src)?;
        let mut edits: Vec<Edit> = Vec::new();

        for block in body.blocks_of("provider") {
            let Some(attributes) = block.label(0).and_then(|name| self.credentials.get(name)) else {
                continue;
            };
            edits.extend(plan_block_edits(src, block, attributes));
        }

        // Apply back to front so earlier offsets stay valid.
        edits.sort_by(|a, b| b.start.cmp(&a.start));
        let mut out = src.to_string();
        for edit in edits {
            out.replace_range(edit.start..edit.end, &edit.text);
        }
        Ok(out)
    }

    /// Merge credentials into `provider.<name>` entries. Returns whether anything changed.
    pub fn inject_json(&self, document: &mut Value) -> bool {
        let Some(providers) = document.get_mut("provider").and_then(Value::as_object_mut) else {
            return false;
        };

        let mut changed = false;
        for (name, attributes) in self.credentials.iter() {
            match providers.get_mut(name) {
                Some(Value::Array(entries)) => {
                    for entry in entries.iter_mut() {
                        if let Some(object) = entry.as_object_mut() {
                            changed |= merge_json(object, attributes);
                        }
                    }
                }
                Some(Value::Object(object)) => changed |= merge_json(object, attributes),
                _ => {}
            }
        }
        changed
    }
}

fn merge_json(object: &mut serde_json::Map<String, Value>, attributes: &ProviderAttributes) -> bool {
    let mut changed = false;
    for (key, value) in attributes {
        let rendered = value.to_json();
        if value.is_group() {
            if !object.contains_key(key) {
                object.insert(key.clone(), rendered);
                changed = true;
            }
        } else if object.get(key) != Some(&rendered) {
            object.insert(key.clone(), rendered);
            changed = true;
        }
    }
    changed
}

/// Text replacement over `start..end`.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

fn plan_block_edits(src: &str, block: &Block, attributes: &ProviderAttributes) -> Vec<Edit> {
    let mut edits = Vec::new();
    let block_indent = block.indent(src);
    let inner_indent = block
        .attributes
        .first()
        .map(|a| a.indent(src).to_string())
        .filter(|indent| !indent.is_empty())
        .unwrap_or_else(|| format!("{block_indent}  "));

    let mut appended: Vec<String> = Vec::new();
    for (key, value) in attributes {
        match value {
            CredentialValue::Group(entries) => {
                if block.block(key).is_none() && block.attribute(key).is_none() {
                    appended.push(render_group(&inner_indent, key, entries));
                }
            }
            scalar => {
                let rendered = render_value(scalar);
                match block.attribute(key) {
                    Some(existing) if existing.value(src) == rendered => {}
                    Some(existing) => edits.push(Edit {
                        start: existing.value_start,
                        end: existing.value_end,
                        text: rendered,
                    }),
                    None => appended.push(format!("{inner_indent}{key} = {rendered}")),
                }
            }
        }
    }

    if appended.is_empty() {
        return edits;
    }

    let mut text = appended.join("\n");
    text.push('\n');

    let close_line = src[..block.close].rfind('\n').map_or(0, |i| i + 1);
    if close_line > block.open && src[close_line..block.close].trim().is_empty() {
        edits.push(Edit {
            start: close_line,
            end: close_line,
            text,
        });
    } else {
        edits.push(Edit {
            start: block.close,
            end: block.close,
            text: format!("\n{text}{block_indent}"),
        });
    }
    edits
}

fn render_group(indent: &str, key: &str, entries: &std::collections::BTreeMap<String, ScalarValue>) -> String {
    let mut lines = vec![format!("{indent}{key} {{")];
    for (name, value) in entries {
        lines.push(format!("{indent}  {name} = {}", render_scalar(value)));
    }
    lines.push(format!("{indent}}}"));
    lines.join("\n")
}

fn render_value(value: &CredentialValue) -> String {
    match value {
        CredentialValue::Bool(b) => b.to_string(),
        CredentialValue::Number(n) => n.to_string(),
        CredentialValue::String(s) => render_string(s),
        CredentialValue::Group(_) => String::new(),
    }
}

fn render_scalar(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Number(n) => n.to_string(),
        ScalarValue::String(s) => render_string(s),
    }
}

/// Quote a literal string; template sequences are escaped so values are never interpolated.
pub fn render_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
