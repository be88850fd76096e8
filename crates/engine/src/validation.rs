//! Parse-time template validation.
//!
//! Static analysis only: the template is parsed, never executed. Three
//! kinds of problems are reported. Syntax errors carry the offending
//! line. Undeclared variables are names that are neither `scene_info`,
//! nor registered in the environment, nor assigned earlier in the same
//! template. Unsupported references are include/extends/import
//! statements, which the engine's dialect does not have.

use crate::{
    Error, Result, StaticFetcher,
    environment::{EXPECTED_VARS, REGISTERED_GLOBALS, build_environment},
};
use std::{fmt::Display, sync::Arc};

/// Kinds of problems a template can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateValidationErrorKind {
    /// Reserved for execution-based validation.
    SecurityError,

    /// The template does not parse.
    SyntaxError,

    /// A variable that nothing declares.
    UndeclaredVariable,

    /// An include, extends, or import statement.
    UnsupportedReference,
}

impl Display for TemplateValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TemplateValidationErrorKind::SecurityError => "SecurityError",
            TemplateValidationErrorKind::SyntaxError => "SyntaxError",
            TemplateValidationErrorKind::UndeclaredVariable => "UndeclaredVariable",
            TemplateValidationErrorKind::UnsupportedReference => "UnsupportedReference",
        })
    }
}

/// A validation problem found in a template.
#[derive(Clone, Debug)]
pub struct TemplateValidationError {
    /// What kind of problem this is.
    pub kind: TemplateValidationErrorKind,

    /// A human-readable description.
    pub message: String,

    /// The line the problem was found on, when known.
    pub line: Option<usize>,
}

/// Validates a template without executing it.
///
/// Returns whether the template is valid and the list of problems found.
/// Passing a scene for execution-based validation is not supported and
/// returns an error.
///
/// # Examples
///
/// ```
/// let (valid, errors) = stacforge_engine::validate_template("{{ scene_info }}", None).unwrap();
/// assert!(valid);
/// assert!(errors.is_empty());
/// ```
pub fn validate_template(
    source: &str,
    scene_info: Option<&serde_json::Value>,
) -> Result<(bool, Vec<TemplateValidationError>)> {
    if scene_info.is_some() {
        tracing::warn!("template execution is not yet supported");
        return Err(Error::NotImplemented("template execution"));
    }

    let mut env = build_environment(Arc::new(StaticFetcher::default()));
    let mut errors = Vec::new();

    // Reference statements are reported from the source directly, one
    // error per occurrence; the parser stops at the first of them.
    let references = regex::Regex::new(r"\{%-?\s*(include|extends|import|from)\b")
        .expect("the pattern is valid");
    for (index, line) in source.lines().enumerate() {
        for capture in references.captures_iter(line) {
            let error = TemplateValidationError {
                kind: TemplateValidationErrorKind::UnsupportedReference,
                message: format!("found unsupported '{}' statement", &capture[1]),
                line: Some(index + 1),
            };
            tracing::warn!("{} at line {}", error.message, index + 1);
            errors.push(error);
        }
    }
    if !errors.is_empty() {
        tracing::warn!("template is invalid: {} errors found", errors.len());
        return Ok((false, errors));
    }

    match env.add_template_owned("validation".to_string(), source.to_string()) {
        Ok(()) => {
            let template = env
                .get_template("validation")
                .expect("the template was just added");
            let mut undeclared: Vec<String> =
                template.undeclared_variables(false).into_iter().collect();
            undeclared.sort();
            for variable in undeclared {
                if EXPECTED_VARS.contains(&variable.as_str())
                    || REGISTERED_GLOBALS.contains(&variable.as_str())
                {
                    continue;
                }
                let error = TemplateValidationError {
                    kind: TemplateValidationErrorKind::UndeclaredVariable,
                    message: format!("found undeclared variable '{variable}'"),
                    line: first_occurrence(source, &variable),
                };
                tracing::warn!(
                    "{}{}",
                    error.message,
                    error
                        .line
                        .map(|line| format!(" at line {line}"))
                        .unwrap_or_default()
                );
                errors.push(error);
            }
        }
        Err(err) => {
            let error = TemplateValidationError {
                kind: TemplateValidationErrorKind::SyntaxError,
                message: err
                    .detail()
                    .map(String::from)
                    .unwrap_or_else(|| "syntax error detected".to_string()),
                line: err.line(),
            };
            tracing::warn!(
                "{}{}",
                error.message,
                error
                    .line
                    .map(|line| format!(" at line {line}"))
                    .unwrap_or_default()
            );
            errors.push(error);
        }
    }

    let valid = errors.is_empty();
    if valid {
        tracing::info!("template is valid");
    } else {
        tracing::warn!("template is invalid: {} errors found", errors.len());
    }
    Ok((valid, errors))
}

fn first_occurrence(source: &str, variable: &str) -> Option<usize> {
    let pattern = regex::Regex::new(&format!(r"\b{}\b", regex::escape(variable))).ok()?;
    source
        .lines()
        .position(|line| pattern.is_match(line))
        .map(|index| index + 1)
}

#[cfg(test)]
mod tests {
    use super::{TemplateValidationErrorKind, validate_template};
    use serde_json::json;

    const VALID: &str = r#"
{%- set parts = scene_info | regex_split("/") -%}
{
    "id": "{{ parts | last }}",
    "generated": "{{ now() }}"
}
"#;

    #[test]
    fn valid_template() {
        let (valid, errors) = validate_template(VALID, None).unwrap();
        assert!(valid, "{errors:?}");
        assert!(errors.is_empty());
    }

    #[test]
    fn undeclared_variables() {
        let source = "line one {{ scene_info }}\n{{ foo }}\n{{ bar }}";
        let (valid, errors) = validate_template(source, None).unwrap();
        assert!(!valid);
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .all(|error| error.kind == TemplateValidationErrorKind::UndeclaredVariable)
        );
        let bar = errors.iter().find(|e| e.message.contains("bar")).unwrap();
        assert_eq!(bar.line, Some(3));
        let foo = errors.iter().find(|e| e.message.contains("foo")).unwrap();
        assert_eq!(foo.line, Some(2));
    }

    #[test]
    fn assigned_variables_are_declared() {
        let source = "{% set name = scene_info %}{{ name }}";
        let (valid, errors) = validate_template(source, None).unwrap();
        assert!(valid, "{errors:?}");
    }

    #[test]
    fn syntax_error_with_line() {
        let source = "fine\n{% if %}";
        let (valid, errors) = validate_template(source, None).unwrap();
        assert!(!valid);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, TemplateValidationErrorKind::SyntaxError);
        assert_eq!(errors[0].line, Some(2));
    }

    #[test]
    fn referenced_templates_are_unsupported() {
        let source = "{% extends \"base_template\" %}\n{% import \"some_import\" as helpers %}\n{% include \"some_include\" %}";
        let (valid, errors) = validate_template(source, None).unwrap();
        assert!(!valid);
        assert_eq!(errors.len(), 3);
        for (error, line) in errors.iter().zip(1..) {
            assert_eq!(error.kind, TemplateValidationErrorKind::UnsupportedReference);
            assert_eq!(error.line, Some(line));
        }
        assert!(errors[0].message.contains("extends"));
        assert!(errors[1].message.contains("import"));
        assert!(errors[2].message.contains("include"));
    }

    #[test]
    fn execution_is_not_implemented() {
        assert!(validate_template("{{ scene_info }}", Some(&json!("scene"))).is_err());
    }
}
