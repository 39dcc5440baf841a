// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 cork contributors

//! Template engine for step arguments.
//!
//! Resolves `{{ ... }}` placeholders against three namespaces: user
//! parameters (`{{ param "name" }}`), prior-step outputs
//! (`{{ output "step.key" }}`), and the built-in directory lookups
//! (`{{ WORK_DIR }}`, `{{ HOST_WORK_DIR }}`, `{{ CACHE_DIR }}`).
//!
//! Every successful lookup is recorded as a [`TemplateVar`] so the
//! dependency validator can discover, ahead of execution, which parameters
//! and outputs a stage needs. Lookups of still-undefined values resolve to
//! an empty string at render time; the validator is the authoritative guard
//! against consuming an output before it exists.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};

use crate::errors::{CorkError, CorkResult};

/// Which namespace a template variable was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarKind {
    User,
    Output,
}

/// A variable reference discovered while rendering
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateVar {
    pub kind: VarKind,
    /// Parameter name for `User`, `stepName.outputKey` for `Output`
    pub lookup: String,
}

/// Options for constructing a [`TemplateRenderer`]
#[derive(Debug, Clone, Default)]
pub struct RendererOptions {
    pub work_dir: String,
    pub host_work_dir: String,
    pub cache_dir: String,
    pub user_params: HashMap<String, String>,
}

/// Resolves placeholders and tracks the variables each render referenced
pub struct TemplateRenderer {
    work_dir: String,
    host_work_dir: String,
    cache_dir: String,
    user_params: HashMap<String, String>,
    outputs: HashMap<String, HashMap<String, String>>,
    // Keyed "kind:lookup" to dedupe repeated references within one render
    required_vars: BTreeMap<String, TemplateVar>,
    block_re: Regex,
    call_re: Regex,
}

impl TemplateRenderer {
    pub fn with_options(options: RendererOptions) -> Self {
        Self {
            work_dir: options.work_dir,
            host_work_dir: options.host_work_dir,
            cache_dir: options.cache_dir,
            user_params: options.user_params,
            outputs: HashMap::new(),
            required_vars: BTreeMap::new(),
            block_re: Regex::new(r"\{\{(.*?)\}\}").expect("valid block regex"),
            call_re: Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:"([^"]*)"\s*)?$"#)
                .expect("valid call regex"),
        }
    }

    /// Record an output produced by a completed step
    pub fn add_output(&mut self, step_name: &str, var_name: &str, value: &str) {
        self.outputs
            .entry(step_name.to_string())
            .or_default()
            .insert(var_name.to_string(), value.to_string());
    }

    /// Resolve all placeholders in `template`.
    ///
    /// Unknown placeholder functions are errors rather than passing through
    /// silently. Rendering is idempotent: the same template against an
    /// unchanged context yields the same output and the same recorded
    /// variable set.
    pub fn render(&mut self, template: &str) -> CorkResult<String> {
        let blocks: Vec<(usize, usize, String)> = self
            .block_re
            .captures_iter(template)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                Some((whole.start(), whole.end(), inner.to_string()))
            })
            .collect();

        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for (start, end, inner) in blocks {
            rendered.push_str(&template[last..start]);
            rendered.push_str(&self.eval(&inner)?);
            last = end;
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Evaluate one placeholder body
    fn eval(&mut self, inner: &str) -> CorkResult<String> {
        let caps = self.call_re.captures(inner).ok_or_else(|| {
            CorkError::UnknownTemplateFunction {
                function: inner.trim().to_string(),
            }
        })?;
        let function = match caps.get(1) {
            Some(m) => m.as_str().to_string(),
            None => {
                return Err(CorkError::UnknownTemplateFunction {
                    function: inner.trim().to_string(),
                })
            }
        };
        let argument = caps.get(2).map(|m| m.as_str().to_string());

        match function.as_str() {
            "param" => {
                let lookup = argument.ok_or(CorkError::MissingTemplateArgument {
                    function,
                })?;
                self.track(VarKind::User, &lookup);
                Ok(self.user_params.get(&lookup).cloned().unwrap_or_default())
            }
            "output" => {
                let lookup = argument.ok_or(CorkError::MissingTemplateArgument {
                    function,
                })?;
                self.track(VarKind::Output, &lookup);
                let mut parts = lookup.splitn(2, '.');
                let step_name = parts.next().unwrap_or_default();
                let var_name = parts.next().unwrap_or_default();
                Ok(self
                    .outputs
                    .get(step_name)
                    .and_then(|outputs| outputs.get(var_name))
                    .cloned()
                    .unwrap_or_default())
            }
            "WORK_DIR" => Ok(self.work_dir.clone()),
            "HOST_WORK_DIR" => Ok(self.host_work_dir.clone()),
            "CACHE_DIR" => Ok(self.cache_dir.clone()),
            _ => Err(CorkError::UnknownTemplateFunction { function }),
        }
    }

    fn track(&mut self, kind: VarKind, lookup: &str) {
        let key = match kind {
            VarKind::User => format!("user:{lookup}"),
            VarKind::Output => format!("output:{lookup}"),
        };
        self.required_vars.insert(
            key,
            TemplateVar {
                kind,
                lookup: lookup.to_string(),
            },
        );
    }

    /// Variables referenced since the last reset, in a stable order
    pub fn required_vars(&self) -> Vec<TemplateVar> {
        self.required_vars.values().cloned().collect()
    }

    /// Clear the variable tracker. Callers reset between steps to avoid
    /// cross-step contamination of the dependency analysis.
    pub fn reset_var_tracker(&mut self) {
        self.required_vars.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer_with_dirs() -> TemplateRenderer {
        TemplateRenderer::with_options(RendererOptions {
            work_dir: "workDir".to_string(),
            host_work_dir: "hostWorkDir".to_string(),
            cache_dir: "cacheDir".to_string(),
            user_params: HashMap::new(),
        })
    }

    #[test]
    fn test_render_outputs() {
        let mut renderer = renderer_with_dirs();
        renderer.add_output("foo", "bar", "baz");
        renderer.add_output("foo", "fie", "foe");
        renderer.add_output("blah", "blah", "blah");

        assert_eq!(renderer.render(r#"{{ output "foo.bar" }}"#).unwrap(), "baz");
        assert_eq!(renderer.render(r#"{{ output "foo.fie" }}"#).unwrap(), "foe");
        assert_eq!(renderer.render(r#"{{ output "blah.blah" }}"#).unwrap(), "blah");
    }

    #[test]
    fn test_render_constants() {
        let mut renderer = renderer_with_dirs();
        assert_eq!(renderer.render("{{ WORK_DIR }}").unwrap(), "workDir");
        assert_eq!(renderer.render("{{ HOST_WORK_DIR }}").unwrap(), "hostWorkDir");
        assert_eq!(renderer.render("{{ CACHE_DIR }}").unwrap(), "cacheDir");
    }

    #[test]
    fn test_render_user_params() {
        let mut renderer = TemplateRenderer::with_options(RendererOptions {
            user_params: [
                ("one".to_string(), "1".to_string()),
                ("foo".to_string(), "bar".to_string()),
            ]
            .into(),
            ..Default::default()
        });
        assert_eq!(renderer.render(r#"{{ param "one" }}"#).unwrap(), "1");
        assert_eq!(renderer.render(r#"{{ param "foo" }}"#).unwrap(), "bar");
    }

    #[test]
    fn test_render_mixed_text() {
        let mut renderer = renderer_with_dirs();
        renderer.add_output("build", "image", "app:v1");
        let rendered = renderer
            .render(r#"docker run -v {{ WORK_DIR }}:/src {{ output "build.image" }}"#)
            .unwrap();
        assert_eq!(rendered, "docker run -v workDir:/src app:v1");
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let mut renderer = renderer_with_dirs();
        let err = renderer.render(r#"{{ bogus "x" }}"#).unwrap_err();
        assert!(matches!(err, CorkError::UnknownTemplateFunction { .. }));
    }

    #[test]
    fn test_function_without_argument_is_an_error() {
        let mut renderer = renderer_with_dirs();
        let err = renderer.render("{{ param }}").unwrap_err();
        assert!(matches!(err, CorkError::MissingTemplateArgument { .. }));
    }

    #[test]
    fn test_unavailable_lookups_resolve_empty_but_are_tracked() {
        let mut renderer = renderer_with_dirs();
        assert_eq!(renderer.render(r#"{{ output "nope.key" }}"#).unwrap(), "");
        assert_eq!(renderer.render(r#"{{ param "missing" }}"#).unwrap(), "");

        let vars = renderer.required_vars();
        assert_eq!(vars.len(), 2);
        assert!(vars.contains(&TemplateVar {
            kind: VarKind::Output,
            lookup: "nope.key".to_string(),
        }));
        assert!(vars.contains(&TemplateVar {
            kind: VarKind::User,
            lookup: "missing".to_string(),
        }));
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut renderer = renderer_with_dirs();
        renderer.add_output("foo", "bar", "baz");
        let template = r#"{{ output "foo.bar" }} and {{ param "p" }}"#;

        let first = renderer.render(template).unwrap();
        let first_vars = renderer.required_vars();
        let second = renderer.render(template).unwrap();
        let second_vars = renderer.required_vars();

        assert_eq!(first, second);
        assert_eq!(first_vars, second_vars);
    }

    #[test]
    fn test_reset_var_tracker() {
        let mut renderer = renderer_with_dirs();
        renderer.render(r#"{{ param "p" }}"#).unwrap();
        assert_eq!(renderer.required_vars().len(), 1);
        renderer.reset_var_tracker();
        assert!(renderer.required_vars().is_empty());
    }
}
