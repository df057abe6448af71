//! Conversion pipeline
//!
//! A pipeline is an ordered list of stages, each transforming a batch of
//! records. Stages are compiled once against the schema and then run over
//! any number of batches. An empty batch short-circuits the remaining
//! stages; a break sentinel raised inside a stage aborts the run
//! unconditionally, regardless of any per-stage error policy.

use crate::condition::{self, CompiledCondition};
use crate::context::{CompileContext, EvalContext};
use crate::getter::{self, CompiledGetter};
use crate::setter::{self, CompiledSetter};
use async_trait::async_trait;
use formbridge_core::config::StageConf;
use formbridge_core::{EngineError, Record, Result, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Converter used when a stage names none.
pub const DEFAULT_CONVERTER: &str = "getter";

/// Property under which a setter stage attaches its computed patches.
pub const PATCH_PROPERTY: &str = "Patch";

/// A custom pipeline stage supplied by the host.
#[async_trait]
pub trait StageImpl: Send + Sync {
    /// Transform a batch of records.
    async fn execute(&self, batch: Vec<Record>, cx: &EvalContext<'_>) -> Result<Vec<Record>>;
}

/// Host-registered custom converters, keyed by converter name.
#[derive(Default)]
pub struct StageRegistry {
    converters: HashMap<String, Arc<dyn StageImpl>>,
}

impl StageRegistry {
    /// Empty registry; only the built-in converters are available.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom converter under a name.
    pub fn register(&mut self, name: impl Into<String>, stage: Arc<dyn StageImpl>) {
        self.converters.insert(name.into(), stage);
    }

    fn get(&self, name: &str) -> Option<Arc<dyn StageImpl>> {
        self.converters.get(name).cloned()
    }
}

/// One compiled pipeline stage.
pub struct CompiledStage {
    /// Stage name for logs
    pub name: String,
    kind: StageKind,
    /// Abort the run when the stage fails (default)
    throw_error: bool,
    /// Capture a failure under this property and continue
    error_property: Option<String>,
    /// Fan out per-item work concurrently
    parallel: bool,
}

enum StageKind {
    /// Map each record to a fresh record of named getter outputs
    Getter {
        outputs: Vec<(String, CompiledGetter)>,
    },
    /// Keep only the records satisfying the predicate
    Filter {
        condition: Option<CompiledCondition>,
    },
    /// Attach computed field patches to each record
    Setter { setters: Vec<CompiledSetter> },
    /// Host-supplied converter
    Custom { converter: Arc<dyn StageImpl> },
}

/// Compile a pipeline definition. Disabled stages are dropped; unknown
/// converter names fail compilation.
pub async fn compile_stages(
    stages: &[StageConf],
    registry: &StageRegistry,
    cx: &CompileContext<'_>,
) -> Result<Vec<CompiledStage>> {
    let mut compiled = Vec::new();
    for (index, conf) in stages.iter().enumerate() {
        if conf.enabled == Some(false) {
            continue;
        }
        let name = conf
            .name
            .clone()
            .unwrap_or_else(|| format!("stage-{index}"));
        let converter = conf.converter.as_deref().unwrap_or(DEFAULT_CONVERTER);

        let kind = match converter {
            "getter" => {
                let mut outputs = Vec::new();
                if let Some(getters) = &conf.getters {
                    for (output, getter_conf) in getters {
                        let getter = getter::compile(getter_conf, cx).await?;
                        outputs.push((output.clone(), getter));
                    }
                }
                StageKind::Getter { outputs }
            }
            "filter" => {
                let condition = match &conf.condition {
                    Some(c) => condition::compile(c, cx).await?,
                    None => None,
                };
                StageKind::Filter { condition }
            }
            "setter" => {
                let mut setters = Vec::new();
                if let Some(confs) = &conf.setters {
                    for setter_conf in confs {
                        setters.push(setter::compile(setter_conf, cx).await?);
                    }
                }
                StageKind::Setter { setters }
            }
            other => match registry.get(other) {
                Some(converter) => StageKind::Custom { converter },
                None => {
                    return Err(EngineError::Schema(format!(
                        "unknown converter: {other}"
                    )))
                }
            },
        };

        // Fan-out only exists for the getter stage; other kinds run the
        // whole batch as one unit.
        let parallel = conf.parallel && matches!(kind, StageKind::Getter { .. });
        if conf.parallel && !parallel {
            tracing::warn!(stage = %name, converter, "parallel flag ignored for this stage kind");
        }

        compiled.push(CompiledStage {
            name,
            kind,
            throw_error: conf.throw_error.unwrap_or(true),
            error_property: conf.error_property.clone(),
            parallel,
        });
    }
    Ok(compiled)
}

/// Run the stages in order over a batch.
///
/// An empty batch short-circuits. Per-stage failures follow the stage's
/// error policy, except the break sentinel, which always aborts.
pub async fn execute(
    stages: &[CompiledStage],
    mut batch: Vec<Record>,
    cx: &EvalContext<'_>,
) -> Result<Vec<Record>> {
    for stage in stages {
        if batch.is_empty() {
            tracing::debug!(stage = %stage.name, "batch empty, remaining stages skipped");
            return Ok(batch);
        }
        match stage.run(&batch, cx).await {
            Ok(next) => batch = next,
            Err(err) if err.is_break() => return Err(err),
            Err(err) => {
                if let Some(property) = &stage.error_property {
                    tracing::warn!(stage = %stage.name, error = %err,
                        "stage failed, error captured on batch items");
                    let message = Value::String(err.to_string());
                    for record in &mut batch {
                        record.props.insert(property.clone(), message.clone());
                    }
                } else if stage.throw_error {
                    return Err(err);
                } else {
                    tracing::warn!(stage = %stage.name, error = %err,
                        "stage failed, batch passed through unchanged");
                }
            }
        }
    }
    Ok(batch)
}

/// Run the stages, treating the break sentinel as a clean empty result.
pub async fn execute_breakable(
    stages: &[CompiledStage],
    batch: Vec<Record>,
    cx: &EvalContext<'_>,
) -> Result<Vec<Record>> {
    match execute(stages, batch, cx).await {
        Err(err) if err.is_break() => {
            tracing::debug!("pipeline break, run ends with an empty batch");
            Ok(Vec::new())
        }
        other => other,
    }
}

impl CompiledStage {
    /// Run one stage over a batch. The input batch is borrowed so the
    /// caller keeps it intact when the stage fails.
    async fn run(&self, batch: &[Record], cx: &EvalContext<'_>) -> Result<Vec<Record>> {
        match &self.kind {
            StageKind::Getter { outputs } => {
                if self.parallel {
                    let mapped = futures::future::try_join_all(
                        batch.iter().map(|record| map_record(outputs, record, cx)),
                    )
                    .await?;
                    Ok(mapped)
                } else {
                    let mut mapped = Vec::with_capacity(batch.len());
                    for record in batch {
                        mapped.push(map_record(outputs, record, cx).await?);
                    }
                    Ok(mapped)
                }
            }

            StageKind::Filter { condition } => {
                let mut kept = Vec::new();
                for record in batch {
                    if condition::evaluate(condition.as_ref(), record, cx)? {
                        kept.push(record.clone());
                    }
                }
                tracing::debug!(stage = %self.name, input = batch.len(), kept = kept.len(),
                    "filter stage");
                Ok(kept)
            }

            StageKind::Setter { setters } => {
                let mut out = Vec::with_capacity(batch.len());
                for record in batch {
                    let mut patches = Vec::new();
                    for setter in setters {
                        if let Some(patch) = setter.evaluate(record, None, cx).await? {
                            patches.push(patch);
                        }
                    }
                    let mut record = record.clone();
                    let serialized = serde_json::to_value(&patches).map_err(|err| {
                        EngineError::ValueFormat(format!("patch serialization: {err}"))
                    })?;
                    record
                        .props
                        .insert(PATCH_PROPERTY.to_string(), Value::from(serialized));
                    out.push(record);
                }
                Ok(out)
            }

            StageKind::Custom { converter } => converter.execute(batch.to_vec(), cx).await,
        }
    }
}

/// Map one record through the getter outputs of a getter stage.
/// Undefined outputs are omitted from the resulting record.
async fn map_record(
    outputs: &[(String, CompiledGetter)],
    record: &Record,
    cx: &EvalContext<'_>,
) -> Result<Record> {
    let mut mapped = Record::new();
    for (property, getter) in outputs {
        if let Some(value) = getter.evaluate(record, cx).await? {
            mapped.props.insert(property.clone(), value);
        }
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::operators::PairwiseOps;
    use crate::context::EngineCaches;
    use crate::test_support::{eval_context, StubData, StubSchema};
    use formbridge_core::config::{ConditionConf, ConditionNodeConf, GetterConf, OperandConf};
    use std::collections::BTreeMap;

    fn record_with_prop(name: &str, value: Value) -> Record {
        let mut record = Record::new();
        record.props.insert(name.to_string(), value);
        record
    }

    fn getter_stage_conf(outputs: BTreeMap<String, GetterConf>) -> StageConf {
        StageConf {
            getters: Some(outputs),
            ..Default::default()
        }
    }

    async fn compile_one(conf: StageConf) -> Vec<CompiledStage> {
        let schema = StubSchema::default();
        let operators = PairwiseOps::default();
        let cx = CompileContext::new(1, &schema, &operators);
        compile_stages(&[conf], &StageRegistry::new(), &cx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_getter_stage_maps_records() {
        let outputs = BTreeMap::from([(
            "doubledName".to_string(),
            GetterConf {
                property: Some("name".to_string()),
                ..Default::default()
            },
        )]);
        let stages = compile_one(getter_stage_conf(outputs)).await;

        let schema = StubSchema::default();
        let data = StubData::default();
        let operators = PairwiseOps::default();
        let caches = EngineCaches::new();
        let cx = eval_context(&schema, &data, &operators, &caches);

        let batch = vec![record_with_prop("name", Value::String("x".to_string()))];
        let out = execute(&stages, batch, &cx).await.unwrap();
        assert_eq!(
            out[0].props.get("doubledName"),
            Some(&Value::String("x".to_string()))
        );
        // Getter-stage output records carry only the mapped properties.
        assert!(out[0].props.get("name").is_none());
    }

    #[tokio::test]
    async fn test_filter_stage_drops_non_matching() {
        let condition = ConditionConf::Node(Box::new(ConditionNodeConf {
            operator: "true".to_string(),
            operand: Some(OperandConf::property("keep")),
            ..Default::default()
        }));
        let stages = compile_one(StageConf {
            converter: Some("filter".to_string()),
            condition: Some(condition),
            ..Default::default()
        })
        .await;

        let schema = StubSchema::default();
        let data = StubData::default();
        let operators = PairwiseOps::default();
        let caches = EngineCaches::new();
        let cx = eval_context(&schema, &data, &operators, &caches);

        let batch = vec![
            record_with_prop("keep", Value::Bool(true)),
            record_with_prop("keep", Value::Bool(false)),
        ];
        let out = execute(&stages, batch, &cx).await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        struct Panics;
        #[async_trait]
        impl StageImpl for Panics {
            async fn execute(&self, _: Vec<Record>, _: &EvalContext<'_>) -> Result<Vec<Record>> {
                panic!("must never run on an empty batch");
            }
        }

        let schema = StubSchema::default();
        let operators = PairwiseOps::default();
        let cx = CompileContext::new(1, &schema, &operators);
        let mut registry = StageRegistry::new();
        registry.register("explode", Arc::new(Panics));
        let stages = compile_stages(
            &[StageConf {
                converter: Some("explode".to_string()),
                ..Default::default()
            }],
            &registry,
            &cx,
        )
        .await
        .unwrap();

        let data = StubData::default();
        let caches = EngineCaches::new();
        let eval = eval_context(&schema, &data, &operators, &caches);
        let out = execute(&stages, Vec::new(), &eval).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_error_property_captures_and_continues() {
        struct Fails;
        #[async_trait]
        impl StageImpl for Fails {
            async fn execute(&self, _: Vec<Record>, _: &EvalContext<'_>) -> Result<Vec<Record>> {
                Err(EngineError::Collaborator("remote down".to_string()))
            }
        }

        let schema = StubSchema::default();
        let operators = PairwiseOps::default();
        let cx = CompileContext::new(1, &schema, &operators);
        let mut registry = StageRegistry::new();
        registry.register("remote", Arc::new(Fails));
        let stages = compile_stages(
            &[StageConf {
                converter: Some("remote".to_string()),
                error_property: Some("StageError".to_string()),
                ..Default::default()
            }],
            &registry,
            &cx,
        )
        .await
        .unwrap();

        let data = StubData::default();
        let caches = EngineCaches::new();
        let eval = eval_context(&schema, &data, &operators, &caches);
        let out = execute(&stages, vec![Record::new()], &eval).await.unwrap();
        assert!(matches!(
            out[0].props.get("StageError"),
            Some(Value::String(_))
        ));
    }

    #[tokio::test]
    async fn test_break_sentinel_overrides_error_policy() {
        struct Breaks;
        #[async_trait]
        impl StageImpl for Breaks {
            async fn execute(&self, _: Vec<Record>, _: &EvalContext<'_>) -> Result<Vec<Record>> {
                Err(EngineError::PipelineBreak)
            }
        }

        let schema = StubSchema::default();
        let operators = PairwiseOps::default();
        let cx = CompileContext::new(1, &schema, &operators);
        let mut registry = StageRegistry::new();
        registry.register("breaker", Arc::new(Breaks));
        // error_property would normally swallow the failure; the break
        // sentinel must still abort.
        let stages = compile_stages(
            &[StageConf {
                converter: Some("breaker".to_string()),
                error_property: Some("StageError".to_string()),
                throw_error: Some(false),
                ..Default::default()
            }],
            &registry,
            &cx,
        )
        .await
        .unwrap();

        let data = StubData::default();
        let caches = EngineCaches::new();
        let eval = eval_context(&schema, &data, &operators, &caches);

        let err = execute(&stages, vec![Record::new()], &eval)
            .await
            .unwrap_err();
        assert!(err.is_break());

        let softened = execute_breakable(&stages, vec![Record::new()], &eval)
            .await
            .unwrap();
        assert!(softened.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_converter_fails_compilation() {
        let schema = StubSchema::default();
        let operators = PairwiseOps::default();
        let cx = CompileContext::new(1, &schema, &operators);
        let result = compile_stages(
            &[StageConf {
                converter: Some("nonsense".to_string()),
                ..Default::default()
            }],
            &StageRegistry::new(),
            &cx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_parallel_flag_applies_to_getter_stages_only() {
        let stages = compile_one(StageConf {
            converter: Some("filter".to_string()),
            parallel: true,
            ..Default::default()
        })
        .await;
        assert_eq!(stages.len(), 1);
        assert!(!stages[0].parallel);

        let outputs = BTreeMap::from([(
            "name".to_string(),
            GetterConf {
                property: Some("name".to_string()),
                ..Default::default()
            },
        )]);
        let stages = compile_one(StageConf {
            parallel: true,
            getters: Some(outputs),
            ..Default::default()
        })
        .await;
        assert!(stages[0].parallel);
    }

    #[tokio::test]
    async fn test_disabled_stage_is_dropped() {
        let stages = compile_one(StageConf {
            enabled: Some(false),
            converter: Some("filter".to_string()),
            ..Default::default()
        })
        .await;
        assert!(stages.is_empty());
    }
}
