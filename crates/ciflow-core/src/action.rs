//! Local composite actions (`uses: ./path/to/action`).
//!
//! Only `run` steps are supported inside a composite action. Inputs are
//! resolved from the caller's `with:` block over the declared defaults and
//! exposed both as `${{ inputs.<name> }}` and as `INPUT_<NAME>` variables.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CiError, Result};
use crate::expr::{self, Context, ExprContext};
use crate::matrix::scalar_to_string;
use crate::paths;

#[derive(Debug, Clone, Deserialize)]
pub struct CompositeAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, ActionInput>,
    pub runs: ActionRuns,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "deserialize_opt_scalar")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionRuns {
    pub using: String,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// An action step with every `${{ … }}` it can see already substituted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStep {
    pub name: String,
    pub run: String,
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl CompositeAction {
    pub fn parse(yaml: &str) -> Result<Self> {
        let action: CompositeAction = serde_yaml::from_str(yaml)?;
        action.check()?;
        Ok(action)
    }

    /// Load `action.yml` (or `action.yaml`) from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = paths::action_manifest(dir)
            .ok_or_else(|| CiError::ActionNotFound(dir.display().to_string()))?;
        let data = std::fs::read_to_string(&manifest)?;
        Self::parse(&data)
    }

    fn check(&self) -> Result<()> {
        if self.runs.using != "composite" {
            return Err(CiError::InvalidAction(format!(
                "runs.using must be 'composite', found '{}'",
                self.runs.using
            )));
        }
        for (idx, step) in self.runs.steps.iter().enumerate() {
            if let Some(uses) = &step.uses {
                return Err(CiError::InvalidAction(format!(
                    "step {idx} uses '{uses}': only `run` steps are supported in composite actions"
                )));
            }
            if step.run.is_none() {
                return Err(CiError::InvalidAction(format!("step {idx} has no `run`")));
            }
        }
        Ok(())
    }

    /// Merge provided inputs over declared defaults.
    ///
    /// Undeclared provided inputs are passed through unchanged.
    pub fn resolve_inputs(
        &self,
        provided: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for (name, input) in &self.inputs {
            let value = match (provided.get(name), &input.default) {
                (Some(v), _) => v.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) if input.required => {
                    return Err(CiError::MissingInput {
                        action: self.name.clone(),
                        input: name.clone(),
                    })
                }
                (None, None) => String::new(),
            };
            resolved.insert(name.clone(), value);
        }
        for (name, value) in provided {
            resolved
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        Ok(resolved)
    }

    /// Render every step with `inputs` bound on top of `base`.
    pub fn render_steps(
        &self,
        inputs: &BTreeMap<String, String>,
        base: &ExprContext,
    ) -> Result<Vec<RenderedStep>> {
        let ctx = base.clone().bind(Context::Inputs, inputs.clone());
        self.runs
            .steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                let run = step.run.as_deref().unwrap_or_default();
                let env = step
                    .env
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), expr::substitute(v, &ctx)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(RenderedStep {
                    name: step
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{} step {}", self.name, idx + 1)),
                    run: expr::substitute(run, &ctx)?,
                    shell: step.shell.clone(),
                    working_directory: step.working_directory.clone(),
                    env,
                })
            })
            .collect()
    }
}

/// `INPUT_<NAME>` variables for resolved inputs (`python-version` → `INPUT_PYTHON_VERSION`).
pub fn input_env(inputs: &BTreeMap<String, String>) -> Vec<(String, String)> {
    inputs
        .iter()
        .map(|(name, value)| {
            (
                format!("INPUT_{}", name.to_uppercase().replace([' ', '-'], "_")),
                value.clone(),
            )
        })
        .collect()
}

fn deserialize_opt_scalar<'de, D>(d: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_yaml::Value::deserialize(d)?;
    if value.is_null() {
        return Ok(None);
    }
    scalar_to_string(&value)
        .map(Some)
        .ok_or_else(|| D::Error::custom("input default must be a scalar"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::DEFAULT_SETUP_ACTION_YAML;
    use tempfile::TempDir;

    fn provided(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_setup_action_parses() {
        let action = CompositeAction::parse(DEFAULT_SETUP_ACTION_YAML).unwrap();
        assert_eq!(action.name, "Setup");
        assert_eq!(action.runs.steps.len(), 2);
        assert_eq!(
            action.inputs["python-version"].default.as_deref(),
            Some("3.11")
        );
    }

    #[test]
    fn defaults_apply_when_inputs_omitted() {
        let action = CompositeAction::parse(DEFAULT_SETUP_ACTION_YAML).unwrap();
        let inputs = action.resolve_inputs(&BTreeMap::new()).unwrap();
        assert_eq!(inputs["python-version"], "3.11");
        assert_eq!(inputs["django-version"], "4.2.*");
    }

    #[test]
    fn provided_inputs_override_defaults() {
        let action = CompositeAction::parse(DEFAULT_SETUP_ACTION_YAML).unwrap();
        let inputs = action
            .resolve_inputs(&provided(&[("python-version", "3.12")]))
            .unwrap();
        assert_eq!(inputs["python-version"], "3.12");
        assert_eq!(inputs["django-version"], "4.2.*");
    }

    #[test]
    fn missing_required_input_fails() {
        let yaml = "name: needs\ninputs:\n  token:\n    required: true\nruns:\n  using: composite\n  steps: []\n";
        let action = CompositeAction::parse(yaml).unwrap();
        let err = action.resolve_inputs(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CiError::MissingInput { .. }));
    }

    #[test]
    fn render_substitutes_inputs() {
        let action = CompositeAction::parse(DEFAULT_SETUP_ACTION_YAML).unwrap();
        let inputs = action.resolve_inputs(&BTreeMap::new()).unwrap();
        let steps = action.render_steps(&inputs, &ExprContext::new()).unwrap();
        assert!(steps[1].run.contains("django==4.2.*"));
        assert!(!steps[1].run.contains("${{"));
    }

    #[test]
    fn non_composite_actions_are_rejected() {
        let yaml = "name: js\nruns:\n  using: node20\n";
        assert!(matches!(
            CompositeAction::parse(yaml),
            Err(CiError::InvalidAction(_))
        ));
    }

    #[test]
    fn nested_uses_is_rejected() {
        let yaml = "name: n\nruns:\n  using: composite\n  steps:\n    - uses: actions/setup-python@v5\n";
        assert!(CompositeAction::parse(yaml).is_err());
    }

    #[test]
    fn input_env_names() {
        let env = input_env(&provided(&[("python-version", "3.11")]));
        assert_eq!(
            env,
            vec![("INPUT_PYTHON_VERSION".to_string(), "3.11".to_string())]
        );
    }

    #[test]
    fn load_from_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CompositeAction::load(dir.path()),
            Err(CiError::ActionNotFound(_))
        ));
        std::fs::write(dir.path().join("action.yaml"), DEFAULT_SETUP_ACTION_YAML).unwrap();
        assert_eq!(CompositeAction::load(dir.path()).unwrap().name, "Setup");
    }
}
