//! Main execution engine - runs the pipeline's steps in document order

use crate::{
    catalog::{BuiltinConnectionFactory, CallArgs, OperationCatalog},
    core::{
        context::{ConnectionFactory, ConnectionPool, ExecutionContext, StepRecord},
        error::{ExecutionError, PipelineError},
        pipeline::Pipeline,
        state::{ExecutionStatus, OutputSource, StepState},
        step::{FunctionSpec, Step},
        value::{Callable, Value},
    },
    execution::{
        checkpoint::{CheckpointDecision, CheckpointManager},
        function::FunctionResolver,
        preflight::{ScriptRunner, ShellScriptRunner},
    },
    expression::{ExpressionResolver, FieldPath},
    persistence::CheckpointStore,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    PreflightCompleted,
    StepStarted {
        step: String,
        index: usize,
        description: Option<String>,
    },
    StepRestored {
        step: String,
        path: String,
    },
    CheckpointSaved {
        step: String,
        path: String,
        overwrite: bool,
    },
    StepCompleted {
        step: String,
        source: OutputSource,
    },
    StepFailed {
        step: String,
        error: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Everything a step needs once its fields are resolved
struct PreparedStep {
    args: Value,
    callable: Callable,
    checkpoint: Option<String>,
}

/// Main pipeline execution engine
pub struct ExecutionEngine {
    catalog: Arc<OperationCatalog>,
    checkpoints: CheckpointManager,
    connector: Arc<dyn ConnectionFactory>,
    script_runner: Arc<dyn ScriptRunner>,
    event_handlers: Vec<EventHandler>,
}

impl ExecutionEngine {
    pub fn new(catalog: Arc<OperationCatalog>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            catalog,
            checkpoints: CheckpointManager::new(store),
            connector: Arc::new(BuiltinConnectionFactory::new()),
            script_runner: Arc::new(ShellScriptRunner::default()),
            event_handlers: Vec::new(),
        }
    }

    /// Replace the factory that opens declared connections
    pub fn with_connection_factory(mut self, connector: Arc<dyn ConnectionFactory>) -> Self {
        self.connector = connector;
        self
    }

    /// Replace the runner for the preflight script
    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.script_runner = runner;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    ///
    /// Returns the final context holding every step's output. The first
    /// error aborts the run; steps after it stay pending.
    pub async fn execute(&self, pipeline: &mut Pipeline) -> Result<ExecutionContext, PipelineError> {
        let run_id = pipeline.state.run_id;
        let pipeline_name = pipeline.name.clone();

        info!("Starting pipeline execution: {} ({})", pipeline_name, run_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline_name.clone(),
            total_steps: pipeline.steps.len(),
        });

        pipeline.state.start(pipeline.steps.len());

        let result = self.run(pipeline).await;

        let status = match &result {
            Ok(_) => {
                pipeline.state.complete();
                ExecutionStatus::Completed
            }
            Err(e) => {
                error!("Pipeline {} failed: {}", pipeline_name, e);
                pipeline.state.fail();
                ExecutionStatus::Failed
            }
        };

        info!(
            "Pipeline execution finished: {} - {:?} ({} computed, {} restored)",
            pipeline_name, status, pipeline.state.computed_steps, pipeline.state.restored_steps
        );
        self.emit_event(ExecutionEvent::PipelineCompleted { run_id, status });

        result
    }

    async fn run(&self, pipeline: &mut Pipeline) -> Result<ExecutionContext, PipelineError> {
        let mut context = self.build_context(pipeline)?;

        if let Some(script) = &pipeline.preflight {
            info!("Running preflight script");
            self.script_runner.run(script).await?;
            self.emit_event(ExecutionEvent::PreflightCompleted);
        }

        for index in 0..pipeline.steps.len() {
            self.execute_step(pipeline, index, &mut context).await?;
        }

        Ok(context)
    }

    /// Substitute variables into connection strings and declare them;
    /// nothing is opened until a step references it
    fn build_context(&self, pipeline: &Pipeline) -> Result<ExecutionContext, PipelineError> {
        let variables_only = ExecutionContext::new(
            pipeline.variables.clone(),
            ConnectionPool::new(self.connector.clone()),
        );
        let resolver = ExpressionResolver::new(&variables_only, &self.catalog);
        let field = FieldPath::new("connections");

        let mut pool = ConnectionPool::new(self.connector.clone());
        for (name, template) in &pipeline.connections {
            let url = resolver.resolve_text(template, &field.key(name))?;
            pool.declare(name.clone(), url);
        }

        Ok(ExecutionContext::new(pipeline.variables.clone(), pool))
    }

    /// Execute a single step
    async fn execute_step(
        &self,
        pipeline: &mut Pipeline,
        index: usize,
        context: &mut ExecutionContext,
    ) -> Result<(), PipelineError> {
        let step = pipeline.steps[index].clone();
        let started_at = Utc::now();
        pipeline.steps[index].state = StepState::Running { started_at };

        info!("Running step {}/{}: {}", index + 1, pipeline.steps.len(), step.name);
        self.emit_event(ExecutionEvent::StepStarted {
            step: step.name.clone(),
            index,
            description: step.description.clone(),
        });

        match self.run_step(&step, index, context).await {
            Ok(source) => {
                pipeline.steps[index].state = StepState::Completed {
                    source,
                    started_at,
                    completed_at: Utc::now(),
                };
                pipeline.state.record_completion(source);
                self.emit_event(ExecutionEvent::StepCompleted {
                    step: step.name,
                    source,
                });
                Ok(())
            }
            Err(e) => {
                pipeline.steps[index].state = StepState::Failed {
                    error: e.to_string(),
                    started_at,
                    failed_at: Utc::now(),
                };
                pipeline.state.failed_steps += 1;
                self.emit_event(ExecutionEvent::StepFailed {
                    step: step.name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_step(
        &self,
        step: &Step,
        index: usize,
        context: &mut ExecutionContext,
    ) -> Result<OutputSource, PipelineError> {
        let prepared = self.prepare(step, index, context)?;
        debug!(step = %step.name, args = %CallArgs::from_value(prepared.args.clone()).render(), "Resolved arguments");

        let path = prepared.checkpoint.as_deref();
        let decision = self
            .checkpoints
            .plan(path, step.resume_from_saved)
            .await
            .map_err(|source| PipelineError::Checkpoint {
                step: step.name.clone(),
                source,
            })?;
        debug!(step = %step.name, ?decision, "Checkpoint decision");

        let (output, source) = match (decision, path) {
            (CheckpointDecision::Restore, Some(path)) => {
                let output = self.checkpoints.restore(path).await.map_err(|source| {
                    PipelineError::Checkpoint {
                        step: step.name.clone(),
                        source,
                    }
                })?;
                info!("Restored step {} from {}", step.name, path);
                self.emit_event(ExecutionEvent::StepRestored {
                    step: step.name.clone(),
                    path: path.to_string(),
                });
                (output, OutputSource::Restored)
            }
            _ => (self.invoke(step, &prepared)?, OutputSource::Computed),
        };

        context.bind_step(
            &step.name,
            &step.aliases,
            StepRecord {
                output: output.clone(),
                args: prepared.args,
            },
        );

        if let (CheckpointDecision::ComputeAndSave { overwrite }, Some(path)) = (decision, path) {
            if overwrite {
                warn!("Overwriting checkpoint {} for step {}", path, step.name);
            }
            self.checkpoints
                .persist(path, &output)
                .await
                .map_err(|source| PipelineError::Checkpoint {
                    step: step.name.clone(),
                    source,
                })?;
            self.emit_event(ExecutionEvent::CheckpointSaved {
                step: step.name.clone(),
                path: path.to_string(),
                overwrite,
            });
        }

        Ok(source)
    }

    /// Resolve args, function and checkpoint path against the context as it
    /// stands before the step runs
    fn prepare(
        &self,
        step: &Step,
        index: usize,
        context: &ExecutionContext,
    ) -> Result<PreparedStep, PipelineError> {
        let resolver = ExpressionResolver::new(context, &self.catalog);
        let functions = FunctionResolver::new(&self.catalog);

        let args = match &step.args {
            Some(args) => resolver.resolve(args, &FieldPath::step(index, "args"))?,
            None => Value::Null,
        };

        let callable = match &step.function {
            FunctionSpec::Path(path) => functions.resolve_path(path),
            FunctionSpec::Expression(text) => {
                let value =
                    resolver.resolve(&Value::str(text.as_str()), &FieldPath::step(index, "function"))?;
                functions.resolve_value(value, text)
            }
            FunctionSpec::Bound { object, attribute } => {
                let receiver = resolver.resolve(object, &FieldPath::step(index, "function.object"))?;
                functions.resolve_bound(receiver, attribute)
            }
        }
        .map_err(|source| PipelineError::FunctionResolution {
            step: step.name.clone(),
            source,
        })?;

        let checkpoint = step
            .save_progress
            .as_ref()
            .map(|template| resolver.resolve_text(template, &FieldPath::step(index, "saveProgress")))
            .transpose()?;

        Ok(PreparedStep {
            args,
            callable,
            checkpoint,
        })
    }

    fn invoke(&self, step: &Step, prepared: &PreparedStep) -> Result<Value, PipelineError> {
        let args = CallArgs::from_value(prepared.args.clone());
        let rendered = args.render();

        prepared.callable.invoke(args).map_err(|source| {
            ExecutionError {
                step: step.name.clone(),
                function: step.function.reference_text(),
                args: rendered,
                source,
            }
            .into()
        })
    }
}
