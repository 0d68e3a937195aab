//! WinScrape Flow - declarative web automation interpreter
//!
//! This library provides the interpretation engines behind WinScrape workflows:
//! - Value resolution, conditions and a small boolean expression language
//! - Expansion of `if`/`switch`/`while`/`for`/`forEach` control-flow steps
//! - Extraction schemas interpreted against a page capability
//! - Pagination over "next page" affordances
//! - JSON, JSON Lines and CSV export of extraction sessions

pub mod config;
pub mod context;
pub mod dsl;
pub mod error;
pub mod export;
pub mod extract;
pub mod flow;
pub mod logging;
pub mod page;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::context::EvaluationContext;
pub use crate::dsl::{ExtractionRule, ExtractionSchema, RuleType};
pub use crate::error::{FlowError, FlowResult};
pub use crate::extract::{ExtractionEngine, ExtractionResult};
pub use crate::flow::{Condition, ConditionEvaluator, ConditionalStep, ControlFlowExpander, ValueResolver};
pub use crate::page::{HtmlPage, PageCapability};
