use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use super::condition::{Condition, ConditionEvaluator};
use super::value::{number_value, to_display_string, to_number};

/// Variable holding the zero-based iteration count of the innermost loop.
pub const LOOP_INDEX_VARIABLE: &str = "_loopIndex";

/// An executable step. The expander never looks inside it; every field other
/// than `id` and `type` is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Value,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// Control-flow step description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionalStep {
    #[serde(rename_all = "camelCase")]
    If {
        condition: Condition,
        #[serde(default)]
        then_steps: Vec<WorkflowStep>,
        #[serde(default)]
        else_steps: Vec<WorkflowStep>,
    },
    #[serde(rename_all = "camelCase")]
    Switch {
        switch_value: String,
        #[serde(default)]
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default_case: Vec<WorkflowStep>,
    },
    #[serde(rename_all = "camelCase")]
    While {
        condition: Condition,
        #[serde(default)]
        then_steps: Vec<WorkflowStep>,
        #[serde(default)]
        max_iterations: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    For {
        #[serde(default)]
        loop_variable: Option<String>,
        #[serde(default)]
        loop_start: Option<Value>,
        #[serde(default)]
        loop_end: Option<Value>,
        #[serde(default)]
        loop_step: Option<Value>,
        #[serde(default)]
        then_steps: Vec<WorkflowStep>,
        #[serde(default)]
        max_iterations: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    ForEach {
        #[serde(default)]
        loop_variable: Option<String>,
        loop_items: Value,
        #[serde(default)]
        then_steps: Vec<WorkflowStep>,
        #[serde(default)]
        max_iterations: Option<usize>,
    },
}

impl ConditionalStep {
    /// Interpret a workflow step as a control-flow step, if its type is one.
    pub fn from_workflow_step(step: &WorkflowStep) -> Option<Self> {
        match step.step_type.as_str() {
            "if" | "switch" | "while" | "for" | "forEach" => {
                let value = serde_json::to_value(step).ok()?;
                serde_json::from_value(value).ok()
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::If { .. } => "if",
            Self::Switch { .. } => "switch",
            Self::While { .. } => "while",
            Self::For { .. } => "for",
            Self::ForEach { .. } => "forEach",
        }
    }
}

/// Loop variable values written for one iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopIteration {
    pub index: usize,
    pub bindings: Map<String, Value>,
    pub step_count: usize,
}

/// Result of expanding a control-flow step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Expansion {
    pub steps: Vec<WorkflowStep>,
    pub iterations: Vec<LoopIteration>,
    /// An iteration cap stopped a loop that would otherwise have continued.
    pub truncated: bool,
}

impl Expansion {
    fn branch(steps: &[WorkflowStep]) -> Self {
        Self {
            steps: steps.to_vec(),
            ..Self::default()
        }
    }

    fn push_iteration(&mut self, index: usize, bindings: Map<String, Value>, body: &[WorkflowStep]) {
        self.steps.extend_from_slice(body);
        self.iterations.push(LoopIteration {
            index,
            bindings,
            step_count: body.len(),
        });
    }

    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }
}

/// Turns control-flow steps into the ordered list of steps to execute.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowExpander {
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

impl ControlFlowExpander {
    pub fn new(evaluator: ConditionEvaluator, config: EngineConfig) -> Self {
        Self { evaluator, config }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(ConditionEvaluator::default(), config)
    }

    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    /// Expand a step against the current context. Loops write their loop
    /// variable and `_loopIndex` into the context as they iterate.
    pub fn expand(&self, step: &ConditionalStep, context: &mut EvaluationContext) -> Expansion {
        let expansion = match step {
            ConditionalStep::If { condition, then_steps, else_steps } => {
                if self.evaluator.evaluate(condition, context) {
                    Expansion::branch(then_steps)
                } else {
                    Expansion::branch(else_steps)
                }
            }
            ConditionalStep::Switch { switch_value, cases, default_case } => {
                let resolved = self.evaluator.resolver().resolve(switch_value, context);
                let key = to_display_string(resolved.as_ref());
                match cases.iter().find(|case| to_display_string(Some(&case.value)) == key) {
                    Some(case) => Expansion::branch(&case.steps),
                    None => Expansion::branch(default_case),
                }
            }
            ConditionalStep::While { condition, then_steps, max_iterations } => {
                let max = max_iterations.unwrap_or(self.config.while_max_iterations);
                self.expand_while(condition, then_steps, max, context)
            }
            ConditionalStep::For {
                loop_variable,
                loop_start,
                loop_end,
                loop_step,
                then_steps,
                max_iterations,
            } => {
                let variable = loop_variable.as_deref().unwrap_or("i");
                let start = self.bound(loop_start.as_ref(), 0.0, context);
                let end = self.bound(loop_end.as_ref(), 10.0, context);
                let step_by = self.bound(loop_step.as_ref(), 1.0, context);
                let max = max_iterations.unwrap_or(self.config.for_max_iterations);
                self.expand_for(variable, start, end, step_by, then_steps, max, context)
            }
            ConditionalStep::ForEach { loop_variable, loop_items, then_steps, max_iterations } => {
                let variable = loop_variable.as_deref().unwrap_or("item");
                let max = max_iterations.unwrap_or(self.config.for_each_max_iterations);
                self.expand_for_each(variable, loop_items, then_steps, max, context)
            }
        };

        if expansion.truncated {
            warn!(
                "{} loop stopped by its iteration cap after {} iterations",
                step.kind(),
                expansion.iteration_count()
            );
        }
        debug!("Expanded {} step into {} steps", step.kind(), expansion.steps.len());

        expansion
    }

    fn expand_while(
        &self,
        condition: &Condition,
        body: &[WorkflowStep],
        max: usize,
        context: &mut EvaluationContext,
    ) -> Expansion {
        let mut expansion = Expansion::default();
        let mut index = 0;

        while self.evaluator.evaluate(condition, context) {
            if index >= max {
                expansion.truncated = true;
                break;
            }
            context.set_variable(LOOP_INDEX_VARIABLE, number_value(index as f64));

            let mut bindings = Map::new();
            bindings.insert(LOOP_INDEX_VARIABLE.to_string(), number_value(index as f64));
            expansion.push_iteration(index, bindings, body);
            index += 1;
        }

        expansion
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_for(
        &self,
        variable: &str,
        start: f64,
        end: f64,
        step_by: f64,
        body: &[WorkflowStep],
        max: usize,
        context: &mut EvaluationContext,
    ) -> Expansion {
        let mut expansion = Expansion::default();
        let mut counter = start;
        let mut index = 0;

        while counter < end {
            if index >= max {
                expansion.truncated = true;
                break;
            }
            let bindings = loop_bindings(variable, number_value(counter), index);
            apply_bindings(context, &bindings);
            expansion.push_iteration(index, bindings, body);

            index += 1;
            counter += step_by;
        }

        expansion
    }

    fn expand_for_each(
        &self,
        variable: &str,
        source: &Value,
        body: &[WorkflowStep],
        max: usize,
        context: &mut EvaluationContext,
    ) -> Expansion {
        let resolved = match source {
            Value::String(token) => self.evaluator.resolver().resolve(token, context),
            other => Some(other.clone()),
        };

        let items = match resolved {
            Some(Value::Array(items)) => items,
            other => {
                warn!(
                    "forEach source {} did not resolve to an array (got {}), skipping loop",
                    source,
                    other.map(|v| type_name(&v)).unwrap_or("undefined")
                );
                return Expansion::default();
            }
        };

        let mut expansion = Expansion {
            truncated: items.len() > max,
            ..Expansion::default()
        };

        for (index, item) in items.into_iter().take(max).enumerate() {
            let bindings = loop_bindings(variable, item, index);
            apply_bindings(context, &bindings);
            expansion.push_iteration(index, bindings, body);
        }

        expansion
    }

    /// Numeric loop bound: a number, or a token resolved through the context.
    fn bound(&self, raw: Option<&Value>, default: f64, context: &EvaluationContext) -> f64 {
        let value = match raw {
            None | Some(Value::Null) => return default,
            Some(Value::String(token)) => self.evaluator.resolver().resolve(token, context),
            Some(other) => Some(other.clone()),
        };
        let number = to_number(value.as_ref());
        if number.is_nan() {
            warn!("Loop bound {:?} is not numeric, using {}", raw, default);
            default
        } else {
            number
        }
    }
}

fn loop_bindings(variable: &str, value: Value, index: usize) -> Map<String, Value> {
    let mut bindings = Map::new();
    bindings.insert(variable.to_string(), value);
    bindings.insert(LOOP_INDEX_VARIABLE.to_string(), number_value(index as f64));
    bindings
}

fn apply_bindings(context: &mut EvaluationContext, bindings: &Map<String, Value>) {
    for (name, value) in bindings {
        context.set_variable(name.clone(), value.clone());
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::condition::Operator;
    use serde_json::json;

    fn step(id: &str) -> WorkflowStep {
        WorkflowStep::new(id, "click").with_param("selector", json!("#item-${i}"))
    }

    fn expander() -> ControlFlowExpander {
        ControlFlowExpander::default()
    }

    #[test]
    fn test_if_branches() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("loggedIn", json!(true));

        let if_step = ConditionalStep::If {
            condition: Condition::unary("${loggedIn}", Operator::IsTrue),
            then_steps: vec![step("a")],
            else_steps: vec![step("b"), step("c")],
        };

        let expansion = expander().expand(&if_step, &mut ctx);
        assert_eq!(expansion.steps, vec![step("a")]);

        ctx.set_variable("loggedIn", json!(false));
        let expansion = expander().expand(&if_step, &mut ctx);
        assert_eq!(expansion.steps.len(), 2);
        assert!(!expansion.truncated);
    }

    #[test]
    fn test_if_without_else_is_empty() {
        let step: ConditionalStep = serde_json::from_value(json!({
            "type": "if",
            "condition": {"type": "expression", "expression": "false"},
            "thenSteps": [{"id": "x", "type": "wait", "duration": 100}]
        }))
        .unwrap();

        let expansion = expander().expand(&step, &mut EvaluationContext::new());
        assert!(expansion.steps.is_empty());
    }

    #[test]
    fn test_switch_matches_first_case_by_string_form() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("code", json!(2));

        let switch: ConditionalStep = serde_json::from_value(json!({
            "type": "switch",
            "switchValue": "${code}",
            "cases": [
                {"value": "1", "steps": [{"id": "one", "type": "log"}]},
                {"value": 2, "steps": [{"id": "two", "type": "log"}]},
                {"value": "2", "steps": [{"id": "two-again", "type": "log"}]}
            ],
            "defaultCase": [{"id": "fallback", "type": "log"}]
        }))
        .unwrap();

        let expansion = expander().expand(&switch, &mut ctx);
        assert_eq!(expansion.steps.len(), 1);
        assert_eq!(expansion.steps[0].id, "two");

        ctx.set_variable("code", json!(9));
        let expansion = expander().expand(&switch, &mut ctx);
        assert_eq!(expansion.steps[0].id, "fallback");
    }

    #[test]
    fn test_for_loop_writes_counter() {
        let mut ctx = EvaluationContext::new();
        let for_step = ConditionalStep::For {
            loop_variable: None,
            loop_start: Some(json!(0)),
            loop_end: Some(json!(3)),
            loop_step: Some(json!(1)),
            then_steps: vec![step("visit")],
            max_iterations: None,
        };

        let expansion = expander().expand(&for_step, &mut ctx);

        assert_eq!(expansion.steps.len(), 3);
        let counters: Vec<Value> = expansion.iterations.iter().map(|it| it.bindings["i"].clone()).collect();
        assert_eq!(counters, vec![json!(0), json!(1), json!(2)]);
        let indexes: Vec<Value> = expansion
            .iterations
            .iter()
            .map(|it| it.bindings[LOOP_INDEX_VARIABLE].clone())
            .collect();
        assert_eq!(indexes, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(ctx.variable("i"), Some(&json!(2)));
        assert_eq!(ctx.variable(LOOP_INDEX_VARIABLE), Some(&json!(2)));
        assert!(!expansion.truncated);
    }

    #[test]
    fn test_for_loop_defaults_and_references() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("pages", json!("4"));

        let step: ConditionalStep = serde_json::from_value(json!({
            "type": "for",
            "loopVariable": "page",
            "loopStart": 1,
            "loopEnd": "${pages}",
            "thenSteps": [{"id": "open", "type": "navigate", "url": "/p/${page}"}]
        }))
        .unwrap();

        let expansion = expander().expand(&step, &mut ctx);
        assert_eq!(expansion.steps.len(), 3);
        assert_eq!(ctx.variable("page"), Some(&json!(3)));
        assert_eq!(expansion.steps[0].params["url"], json!("/p/${page}"));
    }

    #[test]
    fn test_for_loop_with_bad_step_is_capped() {
        let mut ctx = EvaluationContext::new();
        let for_step = ConditionalStep::For {
            loop_variable: Some("n".to_string()),
            loop_start: Some(json!(0)),
            loop_end: Some(json!(5)),
            loop_step: Some(json!(0)),
            then_steps: vec![step("spin")],
            max_iterations: Some(7),
        };

        let expansion = expander().expand(&for_step, &mut ctx);
        assert_eq!(expansion.steps.len(), 7);
        assert!(expansion.truncated);
    }

    #[test]
    fn test_while_always_true_is_capped() {
        let mut ctx = EvaluationContext::new();
        let while_step = ConditionalStep::While {
            condition: Condition::expression("true"),
            then_steps: vec![step("a"), step("b")],
            max_iterations: Some(5),
        };

        let expansion = expander().expand(&while_step, &mut ctx);
        assert_eq!(expansion.steps.len(), 10);
        assert_eq!(expansion.iteration_count(), 5);
        assert!(expansion.truncated);
        assert_eq!(ctx.variable(LOOP_INDEX_VARIABLE), Some(&json!(4)));
    }

    #[test]
    fn test_while_sees_live_loop_index() {
        let mut ctx = EvaluationContext::new();
        let while_step = ConditionalStep::While {
            condition: Condition::expression("${_loopIndex} == undefined || ${_loopIndex} < 2"),
            then_steps: vec![step("a")],
            max_iterations: None,
        };

        let expansion = expander().expand(&while_step, &mut ctx);
        assert_eq!(expansion.iteration_count(), 3);
        assert!(!expansion.truncated);
    }

    #[test]
    fn test_while_false_condition_yields_nothing() {
        let mut ctx = EvaluationContext::new();
        let while_step = ConditionalStep::While {
            condition: Condition::expression("false"),
            then_steps: vec![step("a")],
            max_iterations: None,
        };

        let expansion = expander().expand(&while_step, &mut ctx);
        assert!(expansion.steps.is_empty());
        assert!(ctx.variable(LOOP_INDEX_VARIABLE).is_none());
    }

    #[test]
    fn test_for_each_over_reference() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("urls", json!(["a", "b", "c"]));

        let for_each = ConditionalStep::ForEach {
            loop_variable: Some("url".to_string()),
            loop_items: json!("${urls}"),
            then_steps: vec![step("open")],
            max_iterations: Some(2),
        };

        let expansion = expander().expand(&for_each, &mut ctx);
        assert_eq!(expansion.steps.len(), 2);
        assert!(expansion.truncated);
        assert_eq!(ctx.variable("url"), Some(&json!("b")));
        assert_eq!(ctx.variable(LOOP_INDEX_VARIABLE), Some(&json!(1)));
    }

    #[test]
    fn test_for_each_inline_array_default_variable() {
        let mut ctx = EvaluationContext::new();
        let for_each = ConditionalStep::ForEach {
            loop_variable: None,
            loop_items: json!([{"sku": 1}, {"sku": 2}]),
            then_steps: vec![step("open")],
            max_iterations: None,
        };

        let expansion = expander().expand(&for_each, &mut ctx);
        assert_eq!(expansion.steps.len(), 2);
        assert_eq!(ctx.variable("item"), Some(&json!({"sku": 2})));
    }

    #[test]
    fn test_for_each_non_array_is_empty() {
        let mut ctx = EvaluationContext::new();
        ctx.set_variable("notAList", json!({"a": 1}));

        for source in [json!("${notAList}"), json!("${missing}"), json!(42)] {
            let for_each = ConditionalStep::ForEach {
                loop_variable: None,
                loop_items: source,
                then_steps: vec![step("open")],
                max_iterations: None,
            };
            let expansion = expander().expand(&for_each, &mut ctx);
            assert!(expansion.steps.is_empty());
            assert!(!expansion.truncated);
        }
    }

    #[test]
    fn test_from_workflow_step() {
        let raw: WorkflowStep = serde_json::from_value(json!({
            "id": "loop",
            "type": "forEach",
            "loopItems": [1, 2],
            "thenSteps": [{"id": "inner", "type": "log"}]
        }))
        .unwrap();

        let parsed = ConditionalStep::from_workflow_step(&raw).unwrap();
        assert_eq!(parsed.kind(), "forEach");

        let plain = WorkflowStep::new("s1", "click");
        assert!(ConditionalStep::from_workflow_step(&plain).is_none());
    }
}
