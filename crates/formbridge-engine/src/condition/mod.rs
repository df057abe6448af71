//! Condition engine
//!
//! Compiles recursive boolean predicate trees into a closed operator enum
//! and evaluates them against records. Compilation is schema-bound and may
//! suspend (field-name resolution); evaluation is synchronous and reusable
//! across any number of records.

pub mod operators;

use crate::context::{CompileContext, EvalContext};
use crate::operand::Operand;
use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use formbridge_core::config::{ConditionConf, ConditionNodeConf};
use formbridge_core::{EngineError, Record, Result, Value};
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use regex::Regex;

/// Default date format for the date-valued operators.
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Units accepted by the `expired` operator's increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
    /// Calendar months
    Months,
    /// Calendar years
    Years,
}

impl DateUnit {
    /// Parse a configuration string into a unit.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "minutes" => Some(DateUnit::Minutes),
            "hours" => Some(DateUnit::Hours),
            "days" => Some(DateUnit::Days),
            "months" => Some(DateUnit::Months),
            "years" => Some(DateUnit::Years),
            _ => None,
        }
    }
}

/// A compiled predicate node: the canonical shape always carries the
/// operator, the negation flag and the diagnostic description.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    /// The operator and its compiled inputs
    pub op: ConditionOp,
    /// Negate the base result
    pub not: bool,
    /// Diagnostic label, logged when the condition evaluates false
    pub description: Option<String>,
}

/// The closed operator registry.
#[derive(Debug, Clone)]
pub enum ConditionOp {
    /// Short-circuit conjunction; an empty operand list is false
    And(Vec<CompiledCondition>),
    /// Short-circuit disjunction; an empty operand list is false
    Or(Vec<CompiledCondition>),
    /// Boolean coercion of a single operand
    IsTrue(Operand),
    /// Negated boolean coercion of a single operand
    IsFalse(Operand),
    /// Emptiness test
    Empty {
        /// Tested operand
        operand: Operand,
        /// Trim strings first
        trim: bool,
        /// Treat empty arrays/objects as empty
        empty_collections: bool,
    },
    /// Date-expiry test: `now >= date + increment`
    Expired {
        /// Date-valued operand
        operand: Operand,
        /// chrono format of the date value
        format: String,
        /// Optional increment amount, itself an operand
        increment: Option<Operand>,
        /// Unit of the increment
        unit: DateUnit,
    },
    /// Current status against an allow-set
    FormStatus {
        /// Allowed statuses, by id or name
        statuses: Vec<Value>,
        /// Short-circuit to false when the previous status equals this
        unless_previous: Option<Value>,
    },
    /// Membership in a fixed value set
    OneOfValues {
        /// Tested operand
        operand: Operand,
        /// Allowed values
        values: Vec<Value>,
    },
    /// Pairwise equality with numeric coercion
    EqualNumbers {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
    /// Pairwise equality with boolean coercion
    EqualBooleans {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
    /// Pairwise date-semantic equality
    EqualDates {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
        /// chrono format of both values
        format: String,
    },
    /// Pairwise loose equality
    Equal {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
    /// Temporal strict-after, optionally inclusive
    DateAfter {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
        /// chrono format of both values
        format: String,
        /// Accept equality as well
        inclusive: bool,
    },
    /// Existential quantifier over an array operand
    Exists {
        /// Array-valued operand
        operand: Operand,
        /// Per-element predicate, evaluated under `{parent, child}`
        item: Box<CompiledCondition>,
    },
    /// Universal quantifier over an array operand
    ForAll {
        /// Array-valued operand
        operand: Operand,
        /// Per-element predicate, evaluated under `{parent, child}`
        item: Box<CompiledCondition>,
    },
    /// Pattern test against the string form of an operand
    Regexp {
        /// Tested operand
        operand: Operand,
        /// Pattern source
        pattern: String,
        /// Compiled lazily on first evaluation, owned by this node
        compiled: OnceCell<Regex>,
    },
    /// Relaxed key equality: exact, or case/punctuation-insensitive for
    /// strings
    EqualKeys {
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
    /// Delegated to the extensible pairwise operator table
    Pairwise {
        /// Registered operator name
        name: String,
        /// Left operand
        left: Operand,
        /// Right operand
        right: Operand,
    },
}

/// Compile a condition configuration.
///
/// `Ok(None)` means "no restriction": the configuration was disabled and
/// every caller treats the result as vacuously true. Unknown operator
/// names fail immediately.
pub fn compile<'a>(
    conf: &'a ConditionConf,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<Option<CompiledCondition>>> {
    Box::pin(async move {
        match conf {
            ConditionConf::Operator(name) => {
                let node = ConditionNodeConf::operator(name.clone());
                compile_node(&node, cx).await
            }
            ConditionConf::All(list) => {
                let mut children = Vec::new();
                for sub in list {
                    if let Some(compiled) = compile(sub, cx).await? {
                        children.push(compiled);
                    }
                }
                if children.is_empty() {
                    // A literally empty list and an all-disabled list
                    // both mean "no restriction". An explicit and/or
                    // node with empty operands evaluates false instead.
                    return Ok(None);
                }
                Ok(Some(CompiledCondition {
                    op: ConditionOp::And(children),
                    not: false,
                    description: None,
                }))
            }
            ConditionConf::Node(node) => compile_node(node, cx).await,
        }
    })
}

fn compile_node<'a>(
    node: &'a ConditionNodeConf,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<Option<CompiledCondition>>> {
    Box::pin(async move {
        if node.enabled == Some(false) {
            return Ok(None);
        }

        let op = match node.operator.as_str() {
            "and" | "or" => {
                let mut children = Vec::new();
                if let Some(subs) = &node.operands {
                    for sub in subs {
                        if let Some(compiled) = compile(sub, cx).await? {
                            children.push(compiled);
                        }
                    }
                }
                if node.operator == "and" {
                    ConditionOp::And(children)
                } else {
                    ConditionOp::Or(children)
                }
            }
            "true" => ConditionOp::IsTrue(require_operand(node, cx).await?),
            "false" => ConditionOp::IsFalse(require_operand(node, cx).await?),
            "empty" => ConditionOp::Empty {
                operand: require_operand(node, cx).await?,
                trim: node.trim,
                empty_collections: node.empty_collections,
            },
            "expired" => {
                let increment = match &node.increment {
                    Some(conf) => Some(Operand::compile(conf, cx).await?),
                    None => None,
                };
                let unit = match &node.unit {
                    Some(name) => DateUnit::parse(name)
                        .ok_or_else(|| EngineError::Schema(format!("unknown date unit: {name}")))?,
                    None => DateUnit::Days,
                };
                ConditionOp::Expired {
                    operand: require_operand(node, cx).await?,
                    format: date_format(node),
                    increment,
                    unit,
                }
            }
            "formStatus" => ConditionOp::FormStatus {
                statuses: node
                    .statuses
                    .clone()
                    .ok_or_else(|| EngineError::Schema("formStatus requires statuses".to_string()))?,
                unless_previous: node.unless_previous.clone(),
            },
            "oneOfValues" => ConditionOp::OneOfValues {
                operand: require_operand(node, cx).await?,
                values: node
                    .values
                    .clone()
                    .ok_or_else(|| EngineError::Schema("oneOfValues requires values".to_string()))?,
            },
            "equalNumbers" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::EqualNumbers { left, right }
            }
            "equalBooleans" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::EqualBooleans { left, right }
            }
            "equalDates" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::EqualDates {
                    left,
                    right,
                    format: date_format(node),
                }
            }
            "equal" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::Equal { left, right }
            }
            "dateAfter" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::DateAfter {
                    left,
                    right,
                    format: date_format(node),
                    inclusive: node.inclusive,
                }
            }
            "equalKeys" => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::EqualKeys { left, right }
            }
            "exists" | "all" => {
                let operand = require_operand(node, cx).await?;
                let nested_conf = node.condition.as_ref().ok_or_else(|| {
                    EngineError::Schema(format!("{} requires a condition", node.operator))
                })?;
                let item = compile(nested_conf, cx).await?.ok_or_else(|| {
                    EngineError::Schema(format!("{} requires an enabled condition", node.operator))
                })?;
                if node.operator == "exists" {
                    ConditionOp::Exists {
                        operand,
                        item: Box::new(item),
                    }
                } else {
                    ConditionOp::ForAll {
                        operand,
                        item: Box::new(item),
                    }
                }
            }
            "regexp" => ConditionOp::Regexp {
                operand: require_operand(node, cx).await?,
                pattern: node
                    .pattern
                    .clone()
                    .ok_or_else(|| EngineError::Schema("regexp requires a pattern".to_string()))?,
                compiled: OnceCell::new(),
            },
            other if cx.operators.contains(other) => {
                let (left, right) = pair_operands(node, cx).await?;
                ConditionOp::Pairwise {
                    name: other.to_string(),
                    left,
                    right,
                }
            }
            other => return Err(EngineError::Schema(format!("unknown operator: {other}"))),
        };

        Ok(Some(CompiledCondition {
            op,
            not: node.not,
            description: node.description.clone(),
        }))
    })
}

fn date_format(node: &ConditionNodeConf) -> String {
    node.format
        .clone()
        .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string())
}

async fn require_operand(node: &ConditionNodeConf, cx: &CompileContext<'_>) -> Result<Operand> {
    let conf = node.operand.as_ref().ok_or_else(|| {
        EngineError::Schema(format!("operator {} requires an operand", node.operator))
    })?;
    Operand::compile(conf, cx).await
}

async fn pair_operands(
    node: &ConditionNodeConf,
    cx: &CompileContext<'_>,
) -> Result<(Operand, Operand)> {
    let first = node.operand1.as_ref().ok_or_else(|| {
        EngineError::Schema(format!("operator {} requires operand1", node.operator))
    })?;
    let second = node.operand2.as_ref().ok_or_else(|| {
        EngineError::Schema(format!("operator {} requires operand2", node.operator))
    })?;
    Ok((
        Operand::compile(first, cx).await?,
        Operand::compile(second, cx).await?,
    ))
}

/// Evaluate an optional compiled condition; an absent condition ("no
/// restriction") is vacuously true.
pub fn evaluate(
    compiled: Option<&CompiledCondition>,
    record: &Record,
    cx: &EvalContext<'_>,
) -> Result<bool> {
    match compiled {
        None => Ok(true),
        Some(condition) => condition.evaluate(record, cx),
    }
}

impl CompiledCondition {
    /// Evaluate the predicate against a record. Negation applies after
    /// the base result; a named condition coming out false is logged.
    pub fn evaluate(&self, record: &Record, cx: &EvalContext<'_>) -> Result<bool> {
        let base = self.op.evaluate(record, cx)?;
        let result = if self.not { !base } else { base };
        if !result {
            if let Some(description) = &self.description {
                tracing::debug!(condition = %description, "condition evaluated false");
            }
        }
        Ok(result)
    }
}

impl ConditionOp {
    fn evaluate(&self, record: &Record, cx: &EvalContext<'_>) -> Result<bool> {
        match self {
            // An empty operand list evaluates to false for both and/or;
            // this is observed platform behavior, not an identity.
            ConditionOp::And(items) => {
                if items.is_empty() {
                    return Ok(false);
                }
                for item in items {
                    if !item.evaluate(record, cx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionOp::Or(items) => {
                for item in items {
                    if item.evaluate(record, cx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionOp::IsTrue(operand) => Ok(resolved_truthy(operand, record)?),
            ConditionOp::IsFalse(operand) => Ok(!resolved_truthy(operand, record)?),
            ConditionOp::Empty {
                operand,
                trim,
                empty_collections,
            } => Ok(match operand.resolve(record)? {
                None => true,
                Some(value) => value.is_empty_value(*trim, *empty_collections),
            }),
            ConditionOp::Expired {
                operand,
                format,
                increment,
                unit,
            } => evaluate_expired(operand, format, increment.as_ref(), *unit, record, cx),
            ConditionOp::FormStatus {
                statuses,
                unless_previous,
            } => evaluate_form_status(statuses, unless_previous.as_ref(), record),
            ConditionOp::OneOfValues { operand, values } => match operand.resolve(record)? {
                None => Ok(false),
                Some(value) => Ok(values.iter().any(|allowed| allowed.loose_eq(&value))),
            },
            ConditionOp::EqualNumbers { left, right } => {
                let a = resolve_or_null(left, record)?;
                let b = resolve_or_null(right, record)?;
                Ok(match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                })
            }
            ConditionOp::EqualBooleans { left, right } => {
                let a = resolve_or_null(left, record)?;
                let b = resolve_or_null(right, record)?;
                Ok(a.as_bool_coerce() == b.as_bool_coerce())
            }
            ConditionOp::EqualDates {
                left,
                right,
                format,
            } => Ok(match resolved_date_pair(left, right, format, record)? {
                Some((a, b)) => a == b,
                None => false,
            }),
            ConditionOp::Equal { left, right } => {
                let a = resolve_or_null(left, record)?;
                let b = resolve_or_null(right, record)?;
                Ok(a.loose_eq(&b))
            }
            ConditionOp::DateAfter {
                left,
                right,
                format,
                inclusive,
            } => Ok(match resolved_date_pair(left, right, format, record)? {
                Some((a, b)) => {
                    if *inclusive {
                        a >= b
                    } else {
                        a > b
                    }
                }
                None => false,
            }),
            ConditionOp::Exists { operand, item } => {
                evaluate_quantifier(operand, item, true, record, cx)
            }
            ConditionOp::ForAll { operand, item } => {
                evaluate_quantifier(operand, item, false, record, cx)
            }
            ConditionOp::Regexp {
                operand,
                pattern,
                compiled,
            } => {
                let value = match operand.resolve(record)? {
                    Some(value) => value,
                    None => return Ok(false),
                };
                let regex = compiled.get_or_try_init(|| {
                    Regex::new(pattern).map_err(|err| {
                        EngineError::ValueFormat(format!("invalid pattern '{pattern}': {err}"))
                    })
                })?;
                Ok(regex.is_match(&value.to_display_string()))
            }
            ConditionOp::EqualKeys { left, right } => {
                let a = resolve_or_null(left, record)?;
                let b = resolve_or_null(right, record)?;
                if a == b {
                    return Ok(true);
                }
                Ok(match (a.as_str(), b.as_str()) {
                    (Some(x), Some(y)) => normalize_key(x) == normalize_key(y),
                    _ => false,
                })
            }
            ConditionOp::Pairwise { name, left, right } => {
                let func = cx
                    .operators
                    .get(name)
                    .ok_or_else(|| EngineError::Schema(format!("unknown operator: {name}")))?;
                let a = resolve_or_null(left, record)?;
                let b = resolve_or_null(right, record)?;
                func(&a, &b)
            }
        }
    }
}

fn resolved_truthy(operand: &Operand, record: &Record) -> Result<bool> {
    Ok(operand
        .resolve(record)?
        .map(|value| value.as_bool_coerce())
        .unwrap_or(false))
}

fn resolve_or_null(operand: &Operand, record: &Record) -> Result<Value> {
    Ok(operand.resolve(record)?.unwrap_or(Value::Null))
}

fn evaluate_expired(
    operand: &Operand,
    format: &str,
    increment: Option<&Operand>,
    unit: DateUnit,
    record: &Record,
    cx: &EvalContext<'_>,
) -> Result<bool> {
    let raw = resolve_or_null(operand, record)?;
    let text = raw
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::ValueFormat(format!("expired: not a date value: {raw:?}")))?;
    let mut moment = parse_date(text, format).ok_or_else(|| {
        EngineError::ValueFormat(format!("expired: cannot parse '{text}' with format '{format}'"))
    })?;

    let amount = match increment {
        Some(operand) => operand
            .resolve(record)?
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0) as i64,
        None => 0,
    };
    if amount != 0 {
        moment = advance_date(moment, amount, unit).ok_or_else(|| {
            EngineError::ValueFormat("expired: date increment out of range".to_string())
        })?;
    }
    Ok(cx.now.naive_utc() >= moment)
}

fn evaluate_form_status(
    statuses: &[Value],
    unless_previous: Option<&Value>,
    record: &Record,
) -> Result<bool> {
    let current = record
        .props
        .get("StatusID")
        .or_else(|| record.props.get("StatusName"));
    let current = match current {
        Some(value) => value,
        None => return Ok(false),
    };
    if let Some(unless) = unless_previous {
        let previous = record
            .props
            .get("PreviousStatusID")
            .or_else(|| record.props.get("PreviousStatusName"));
        if let Some(previous) = previous {
            if previous.loose_eq(unless) {
                return Ok(false);
            }
        }
    }
    Ok(statuses.iter().any(|allowed| allowed.loose_eq(current)))
}

fn evaluate_quantifier(
    operand: &Operand,
    item: &CompiledCondition,
    existential: bool,
    record: &Record,
    cx: &EvalContext<'_>,
) -> Result<bool> {
    let value = resolve_or_null(operand, record)?;
    let elements = value.as_array().ok_or_else(|| {
        EngineError::ValueFormat("quantifier demands an array-typed operand".to_string())
    })?;
    let parent = record.to_value();
    for element in elements {
        let scope = Record::scoped([("parent", parent.clone()), ("child", element.clone())]);
        let holds = item.evaluate(&scope, cx)?;
        if existential && holds {
            return Ok(true);
        }
        if !existential && !holds {
            return Ok(false);
        }
    }
    Ok(!existential)
}

fn resolved_date_pair(
    left: &Operand,
    right: &Operand,
    format: &str,
    record: &Record,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
    let a = resolve_or_null(left, record)?;
    let b = resolve_or_null(right, record)?;
    let parsed = match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => match (parse_date(x, format), parse_date(y, format)) {
            (Some(px), Some(py)) => Some((px, py)),
            _ => None,
        },
        _ => None,
    };
    if parsed.is_none() {
        tracing::debug!(left = ?a, right = ?b, format, "date comparison on unparseable values");
    }
    Ok(parsed)
}

fn parse_date(text: &str, format: &str) -> Option<NaiveDateTime> {
    if let Ok(moment) = NaiveDateTime::parse_from_str(text, format) {
        return Some(moment);
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn advance_date(moment: NaiveDateTime, amount: i64, unit: DateUnit) -> Option<NaiveDateTime> {
    match unit {
        DateUnit::Minutes => moment.checked_add_signed(Duration::minutes(amount)),
        DateUnit::Hours => moment.checked_add_signed(Duration::hours(amount)),
        DateUnit::Days => moment.checked_add_signed(Duration::days(amount)),
        DateUnit::Months => add_months(moment, amount),
        DateUnit::Years => add_months(moment, amount.checked_mul(12)?),
    }
}

fn add_months(moment: NaiveDateTime, amount: i64) -> Option<NaiveDateTime> {
    if amount >= 0 {
        moment.checked_add_months(Months::new(u32::try_from(amount).ok()?))
    } else {
        moment.checked_sub_months(Months::new(u32::try_from(-amount).ok()?))
    }
}

fn normalize_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}
