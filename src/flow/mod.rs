//! Control-flow interpretation: value resolution, conditions, the expression
//! language and the expansion of `if`/`switch`/`while`/`for`/`forEach` steps.

pub mod condition;
pub mod expander;
pub mod expression;
pub mod resolver;
pub mod value;

pub use condition::{Condition, ConditionEvaluator, Logic, Operator};
pub use expander::{
    ConditionalStep, ControlFlowExpander, Expansion, LoopIteration, SwitchCase, WorkflowStep,
    LOOP_INDEX_VARIABLE,
};
pub use expression::{evaluate_expression, Expression};
pub use resolver::ValueResolver;
