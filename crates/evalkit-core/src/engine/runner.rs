use crate::engine::prompt;
use crate::errors::RunHalted;
use crate::fingerprint::source_revision;
use crate::grader_api::Grader;
use crate::model::{GenerationParams, GenerationResult, GradeOutcome, Pack};
use crate::providers::llm::ModelAdapter;
use crate::storage::rows::{ModelRecord, NewOutput};
use crate::storage::store::Store;
use std::sync::Arc;

/// Sequential orchestrator: every case, every repetition, every adapter, in
/// order, with each row committed as soon as it exists.
pub struct Runner {
    pub store: Store,
    pub grader: Option<Arc<dyn Grader>>,
    pub repetitions: u32,
    pub params: GenerationParams,
}

impl Runner {
    pub fn new(store: Store, params: GenerationParams) -> Self {
        Self {
            store,
            grader: None,
            repetitions: 1,
            params,
        }
    }

    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = Some(grader);
        self
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Returns one run id per adapter. A fatal provider fault stops the whole
    /// invocation with [`RunHalted`]; rows written before it stay.
    pub async fn run_pack(
        &self,
        pack: &Pack,
        adapters: &[Arc<dyn ModelAdapter>],
    ) -> anyhow::Result<Vec<String>> {
        let git_sha = source_revision().await;
        let params_json = serde_json::to_value(&self.params)?;
        let mut run_ids = Vec::with_capacity(adapters.len());

        for adapter in adapters {
            let model_id = adapter.model_id();
            self.store.upsert_model(&ModelRecord {
                model_id: model_id.clone(),
                name: adapter.model_name().to_string(),
                provider: adapter.provider().to_string(),
                version: None,
            })?;
            let run_id =
                self.store
                    .create_run(&pack.id, &model_id, git_sha.as_deref(), &params_json)?;
            run_ids.push(run_id.clone());

            let total = pack.cases.len() * self.repetitions as usize;
            tracing::info!(
                event = "run.started",
                run_id = %run_id,
                model_id = %model_id,
                pack_id = %pack.id,
                total
            );

            let mut completed = 0usize;
            for case in &pack.cases {
                let case_id = self.store.upsert_case(&pack.id, case)?;

                for rep in 0..self.repetitions {
                    let prompt = prompt::render(&case.prompt, &case.metadata);
                    let result = match adapter
                        .generate(&prompt, &pack.system_prompt, &self.params)
                        .await
                    {
                        Ok(result) => result,
                        Err(fault) if !fault.is_fatal() => GenerationResult::safety_blocked(),
                        Err(fault) => {
                            tracing::error!(
                                event = "run.halted",
                                run_id = %run_id,
                                case_id = %case_id,
                                repetition = rep + 1,
                                code = fault.code(),
                                error = %fault
                            );
                            return Err(RunHalted {
                                run_id,
                                case_id,
                                repetition: rep + 1,
                                source: fault,
                            }
                            .into());
                        }
                    };

                    let output_id = self.store.append_output(&NewOutput::from_generation(
                        &run_id, &case_id, &result,
                    ))?;

                    let grade = match &self.grader {
                        Some(g) => g.grade(&result.text, case.expected.as_deref(), &case.metadata),
                        None => GradeOutcome::zero(),
                    };
                    self.store.append_score(&output_id, &grade)?;

                    completed += 1;
                    tracing::info!(
                        event = "run.progress",
                        run_id = %run_id,
                        case_id = %case_id,
                        repetition = rep + 1,
                        completed,
                        total,
                        score = grade.score,
                        latency_ms = result.latency_ms,
                        tool_calls = result.tool_meta.as_ref().map(|m| m.tool_calls).unwrap_or(0)
                    );
                }
            }

            tracing::info!(event = "run.finished", run_id = %run_id, outputs = completed);
        }

        Ok(run_ids)
    }
}
