//! Two-phase block execution around the render step.
//!
//! `Idle -> PreRun -> Rendered -> PostRun -> Done`; `Rendered` is skipped
//! when the template renders to whitespace. The context is passed by
//! value from step to step and replaced by the merged result, so every
//! block sees exactly the deltas of the blocks before it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::script::{ScriptError, ScriptOutput, ScriptRunner};
use crate::core::template::{Phase, ScriptBlock};

/// Variables visible to blocks and the template.
pub type ExecutionContext = Map<String, Value>;

/// What to do when a block fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop the run and return the error
    #[default]
    Abort,
    /// Log, record and continue with the next block
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Idle,
    PreRun,
    Rendered,
    PostRun,
    Done,
}

/// Runs a single block. Implemented by [`ScriptRunner`]; tests plug in
/// closures.
pub trait BlockExecutor {
    fn execute(&self, block: &ScriptBlock, ctx: &ExecutionContext) -> Result<ScriptOutput, ScriptError>;
}

impl BlockExecutor for ScriptRunner {
    fn execute(&self, block: &ScriptBlock, ctx: &ExecutionContext) -> Result<ScriptOutput, ScriptError> {
        self.run(block, ctx)
    }
}

impl<F> BlockExecutor for F
where
    F: Fn(&ScriptBlock, &ExecutionContext) -> Result<ScriptOutput, ScriptError>,
{
    fn execute(&self, block: &ScriptBlock, ctx: &ExecutionContext) -> Result<ScriptOutput, ScriptError> {
        self(block, ctx)
    }
}

/// The render-dependent middle of a run.
pub trait RenderStep {
    /// Render the stripped template with the pre-phase context.
    fn render(&mut self, ctx: &ExecutionContext) -> Result<String>;

    /// Called only for non-blank rendered text. Returned bindings are
    /// merged before the post phase.
    fn rendered(&mut self, _text: &str, _ctx: &ExecutionContext) -> Result<ExecutionContext> {
        Ok(Map::new())
    }
}

/// Result of one run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub context: ExecutionContext,
    /// Rendered template text, when it was not blank
    pub rendered: Option<String>,
    /// Stages entered, in order
    pub stages: Vec<Stage>,
    /// Failures tolerated under [`OnError::Skip`]
    pub skipped: Vec<ScriptError>,
}

pub struct Pipeline<'a> {
    executor: &'a dyn BlockExecutor,
    on_error: OnError,
}

impl<'a> Pipeline<'a> {
    pub fn new(executor: &'a dyn BlockExecutor, on_error: OnError) -> Self {
        Self { executor, on_error }
    }

    pub fn run(
        &self,
        blocks: &[ScriptBlock],
        ctx: ExecutionContext,
        step: &mut dyn RenderStep,
    ) -> Result<PipelineOutcome> {
        let mut stages = vec![Stage::Idle];
        let mut skipped = Vec::new();

        stages.push(Stage::PreRun);
        let ctx = self.run_phase(Phase::Pre, blocks, ctx, &mut skipped)?;

        let text = step.render(&ctx)?;
        let (ctx, rendered) = if text.trim().is_empty() {
            debug!("template rendered blank, skipping render step");
            (ctx, None)
        } else {
            stages.push(Stage::Rendered);
            let delta = step.rendered(&text, &ctx)?;
            (merge(ctx, delta), Some(text))
        };

        stages.push(Stage::PostRun);
        let ctx = self.run_phase(Phase::Post, blocks, ctx, &mut skipped)?;
        stages.push(Stage::Done);

        Ok(PipelineOutcome {
            context: ctx,
            rendered,
            stages,
            skipped,
        })
    }

    fn run_phase(
        &self,
        phase: Phase,
        blocks: &[ScriptBlock],
        mut ctx: ExecutionContext,
        skipped: &mut Vec<ScriptError>,
    ) -> Result<ExecutionContext> {
        for block in blocks.iter().filter(|b| b.phase == phase) {
            match self.executor.execute(block, &ctx) {
                Ok(output) => {
                    if let Some(delta) = output.into_delta() {
                        debug!(index = block.index, keys = delta.len(), "merging block result");
                        ctx = merge(ctx, delta);
                    }
                }
                Err(err) if self.on_error == OnError::Skip => {
                    warn!("{err}; continuing");
                    skipped.push(err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(ctx)
    }
}

/// Top-level merge, later keys win.
pub fn merge(mut ctx: ExecutionContext, delta: ExecutionContext) -> ExecutionContext {
    ctx.extend(delta);
    ctx
}
