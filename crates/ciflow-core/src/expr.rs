//! `${{ context.property }}` substitution for workflow and action values.
//!
//! Only plain property access is supported. A context can be left
//! unresolved, in which case its references are copied through verbatim;
//! planning uses this to keep `secrets.*` symbolic until execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    Matrix,
    Secrets,
    Inputs,
    Github,
    Env,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Matrix => "matrix",
            Context::Secrets => "secrets",
            Context::Inputs => "inputs",
            Context::Github => "github",
            Context::Env => "env",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matrix" => Some(Context::Matrix),
            "secrets" => Some(Context::Secrets),
            "inputs" => Some(Context::Inputs),
            "github" => Some(Context::Github),
            "env" => Some(Context::Env),
            _ => None,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `${{ context.property }}` reference found in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub context: Context,
    pub property: String,
}

/// Values available to substitution, keyed by context.
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    values: HashMap<Context, HashMap<String, String>>,
}

impl ExprContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `context` resolvable with the given values. Contexts that were
    /// never bound are left verbatim by [`substitute`].
    pub fn bind<I, K, V>(mut self, context: Context, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entry = self.values.entry(context).or_default();
        for (k, v) in values {
            entry.insert(k.into(), v.into());
        }
        self
    }

    pub fn is_bound(&self, context: Context) -> bool {
        self.values.contains_key(&context)
    }

    fn lookup(&self, reference: &Reference) -> Option<&str> {
        self.values
            .get(&reference.context)
            .map(|vals| vals.get(&reference.property).map(String::as_str).unwrap_or(""))
    }
}

static EXPR_RE: OnceLock<Regex> = OnceLock::new();
static PROPERTY_RE: OnceLock<Regex> = OnceLock::new();

fn expr_re() -> &'static Regex {
    EXPR_RE.get_or_init(|| Regex::new(r"\$\{\{\s*(.*?)\s*\}\}").unwrap())
}

fn property_re() -> &'static Regex {
    PROPERTY_RE.get_or_init(|| Regex::new(r"^([A-Za-z_]+)\.([A-Za-z0-9_\-]+)$").unwrap())
}

fn parse_reference(expr: &str) -> Result<Reference> {
    let caps = property_re().captures(expr).ok_or_else(|| CiError::Expression {
        expr: expr.to_string(),
        reason: "only `context.property` expressions are supported".into(),
    })?;
    let context = Context::parse(&caps[1]).ok_or_else(|| CiError::Expression {
        expr: expr.to_string(),
        reason: format!("unknown context '{}'", &caps[1]),
    })?;
    Ok(Reference {
        context,
        property: caps[2].to_string(),
    })
}

/// Every reference in `input`, in order of appearance.
pub fn references(input: &str) -> Result<Vec<Reference>> {
    expr_re()
        .captures_iter(input)
        .map(|caps| parse_reference(&caps[1]))
        .collect()
}

/// Replace every reference whose context is bound in `ctx`.
///
/// A missing property of a bound context evaluates to the empty string.
pub fn substitute(input: &str, ctx: &ExprContext) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in expr_re().captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let reference = parse_reference(&caps[1])?;
        out.push_str(&input[last..whole.start()]);
        match ctx.lookup(&reference) {
            Some(value) => out.push_str(value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_ctx() -> ExprContext {
        ExprContext::new().bind(
            Context::Matrix,
            [("python-version", "3.11"), ("django-version", "4.2.*")],
        )
    }

    #[test]
    fn substitutes_matrix_values() {
        let out = substitute("py${{ matrix.python-version }}", &matrix_ctx()).unwrap();
        assert_eq!(out, "py3.11");
        let out = substitute("${{matrix.django-version}}", &matrix_ctx()).unwrap();
        assert_eq!(out, "4.2.*");
    }

    #[test]
    fn unbound_context_is_left_verbatim() {
        let input = "token=${{ secrets.GITHUB_TOKEN }} py=${{ matrix.python-version }}";
        let out = substitute(input, &matrix_ctx()).unwrap();
        assert_eq!(out, "token=${{ secrets.GITHUB_TOKEN }} py=3.11");
    }

    #[test]
    fn missing_property_is_empty() {
        let out = substitute("[${{ matrix.os }}]", &matrix_ctx()).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn unknown_context_is_an_error() {
        let err = substitute("${{ steps.x }}", &matrix_ctx()).unwrap_err();
        assert!(matches!(err, CiError::Expression { .. }));
    }

    #[test]
    fn function_calls_are_rejected() {
        assert!(references("${{ toJSON(matrix) }}").is_err());
    }

    #[test]
    fn collects_references_in_order() {
        let refs = references("${{ inputs.a }} and ${{ secrets.B }}").unwrap();
        assert_eq!(
            refs,
            vec![
                Reference {
                    context: Context::Inputs,
                    property: "a".into()
                },
                Reference {
                    context: Context::Secrets,
                    property: "B".into()
                },
            ]
        );
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(substitute("make test", &ExprContext::new()).unwrap(), "make test");
    }
}
