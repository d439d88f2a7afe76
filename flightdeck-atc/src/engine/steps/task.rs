//! Task: run a configured process with named input/output volumes
//!
//! The process id inside the container is fixed, so a resumed task step that
//! finds its container reattaches to the still-running process instead of
//! starting a second one. Output volumes are named with a build/plan-scoped
//! key so reattach can recover them for the artifact repository.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use flightdeck_core::domain::container::{Container, ContainerIdentifier, StepType};
use flightdeck_core::domain::volume::{Volume, VolumeIdentifier};
use flightdeck_core::domain::worker::Worker;
use flightdeck_core::plan::{PlanId, TaskPlan};
use flightdeck_worker::{ContainerSpec, MountSpec, ProcessSpec, RootFs, VolumeSpec, VolumeStrategy};

use crate::engine::repository::ArtifactSource;
use crate::repository::volume as volume_repository;
use crate::worker_pool::WorkerSpec;

use super::{Step, StepCtx, StepError, StepResult, origin};

const TASK_WORKING_DIRECTORY: &str = "/tmp/build/src";

/// The stable in-container process id tasks run under.
const TASK_PROCESS_ID: &str = "task";

pub struct TaskStep {
    plan_id: PlanId,
    plan: TaskPlan,
    ctx: StepCtx,
}

impl TaskStep {
    pub fn new(plan_id: PlanId, plan: TaskPlan, ctx: StepCtx) -> Self {
        Self { plan_id, plan, ctx }
    }

    fn identifier(&self) -> ContainerIdentifier {
        ContainerIdentifier::Step {
            build_id: self.ctx.build.build_id,
            plan_id: self.plan_id.clone(),
            step_type: StepType::Task,
            step_name: self.plan.name.clone(),
        }
    }

    /// Build/plan-scoped name an output volume is stored under, recoverable
    /// on reattach.
    fn output_volume_name(&self, output: &str) -> String {
        format!("{}:{}:{}", self.ctx.build.build_id, self.plan_id, output)
    }

    fn mount_path(config_path: Option<&str>, name: &str) -> String {
        match config_path {
            Some(path) if !path.is_empty() => format!("{}/{}", TASK_WORKING_DIRECTORY, path),
            _ => format!("{}/{}", TASK_WORKING_DIRECTORY, name),
        }
    }

    fn process_env(&self) -> Vec<String> {
        let mut env = self.ctx.build.env();
        for (key, value) in &self.plan.config.params {
            env.push(format!("{}={}", key, value));
        }
        env
    }

    /// Place a fresh container: input artifacts mounted read-through, one new
    /// volume per declared output.
    async fn create_container(&self) -> Result<(Container, Worker, Vec<(String, Volume)>), StepError> {
        let mut input_mounts = Vec::new();
        let mut input_handles = Vec::new();

        for input in &self.plan.config.inputs {
            let artifact_name = self
                .plan
                .input_mappings
                .get(&input.name)
                .cloned()
                .unwrap_or_else(|| input.name.clone());

            let source = self
                .ctx
                .repo
                .source_for(&artifact_name)
                .ok_or_else(|| StepError::MissingArtifact(artifact_name.clone()))?;

            input_handles.push(source.volume_handle.clone());
            input_mounts.push(MountSpec {
                volume_handle: source.volume_handle,
                mount_path: Self::mount_path(input.path.as_deref(), &input.name),
            });
        }

        let worker = self
            .ctx
            .workers
            .select_worker(&WorkerSpec {
                platform: Some(self.plan.config.platform.clone()),
                tags: self.plan.tags.clone(),
                mounts: input_handles,
                ..Default::default()
            })
            .await?;

        let volumes_addr = worker.volumes_addr.clone().ok_or_else(|| {
            StepError::InvalidPlan(format!(
                "worker {} cannot host task outputs without a volume manager",
                worker.name
            ))
        })?;

        let mut outputs = Vec::new();
        let mut output_mounts = Vec::new();

        for output in &self.plan.config.outputs {
            let handle = uuid::Uuid::new_v4().to_string();

            self.ctx
                .workers
                .host()
                .create_volume(
                    &volumes_addr,
                    VolumeSpec {
                        handle: handle.clone(),
                        strategy: VolumeStrategy::Empty,
                        properties: Default::default(),
                        ttl_seconds: None,
                    },
                )
                .await?;

            let volume = Volume {
                handle: handle.clone(),
                worker_name: worker.name.clone(),
                identifier: VolumeIdentifier::Output {
                    name: self.output_volume_name(&output.name),
                },
                ttl_seconds: None,
                size_in_bytes: None,
                initialized: true,
            };
            volume_repository::insert(&self.ctx.pool, &volume).await?;

            output_mounts.push(MountSpec {
                volume_handle: handle,
                mount_path: Self::mount_path(output.path.as_deref(), &output.name),
            });
            outputs.push((output.name.clone(), volume));
        }

        let mut mounts = input_mounts;
        mounts.extend(output_mounts);

        let container = self
            .ctx
            .workers
            .create_container(
                &worker,
                self.identifier(),
                ContainerSpec {
                    handle: String::new(),
                    root: RootFs::Image {
                        reference: self.plan.config.image.clone(),
                    },
                    env: self.process_env(),
                    working_directory: TASK_WORKING_DIRECTORY.to_string(),
                    mounts,
                    ttl_seconds: None,
                },
            )
            .await?;

        Ok((container, worker, outputs))
    }

    /// Recover this step's output volumes by their scoped names.
    async fn recover_outputs(&self) -> Result<Vec<(String, Volume)>, StepError> {
        let mut outputs = Vec::new();

        for output in &self.plan.config.outputs {
            let scoped = self.output_volume_name(&output.name);
            if let Some(volume) = volume_repository::find_output(&self.ctx.pool, &scoped).await? {
                outputs.push((output.name.clone(), volume));
            } else {
                warn!(step = %self.plan.name, output = %output.name,
                    "output volume missing on reattach");
            }
        }

        Ok(outputs)
    }

    fn register_outputs(&self, worker: &Worker, outputs: &[(String, Volume)]) {
        for (name, volume) in outputs {
            let artifact_name = self
                .plan
                .output_mappings
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.clone());

            self.ctx.repo.register(
                artifact_name,
                ArtifactSource {
                    worker_name: worker.name.clone(),
                    worker_addr: worker.addr.clone(),
                    volumes_addr: worker.volumes_addr.clone(),
                    volume_handle: volume.handle.clone(),
                },
            );
        }
    }

    /// Stream process output into the event stream until it exits or the
    /// build aborts.
    async fn wait_for_exit(
        &self,
        worker: &Worker,
        container: &Container,
        abort: &CancellationToken,
    ) -> Result<Option<i32>, StepError> {
        let origin = origin(&self.plan_id, &self.plan.name);
        let host = self.ctx.workers.host().clone();
        let mut cursor = 0u64;

        loop {
            let update = tokio::select! {
                update = host.poll_process(&worker.addr, &container.handle, TASK_PROCESS_ID, cursor) => {
                    update?
                }
                _ = abort.cancelled() => {
                    if let Err(e) = host
                        .stop_process(&worker.addr, &container.handle, TASK_PROCESS_ID)
                        .await
                    {
                        warn!(step = %self.plan.name, "failed to stop process on abort: {}", e);
                    }
                    return Ok(None);
                }
            };

            for line in &update.logs {
                self.ctx.delegate.log(&origin, &line.text).await?;
            }
            cursor = update.cursor;

            if let Some(exit_status) = update.exit_status {
                return Ok(Some(exit_status));
            }
        }
    }
}

#[async_trait]
impl Step for TaskStep {
    async fn run(&mut self, abort: &CancellationToken) -> Result<StepResult, StepError> {
        let origin = origin(&self.plan_id, &self.plan.name);
        self.ctx.delegate.initialize(&origin).await?;

        let host = self.ctx.workers.host().clone();

        let (container, worker, outputs) = match self
            .ctx
            .workers
            .find_container_for_identifier(&self.identifier())
            .await?
        {
            Some((container, worker)) => {
                let outputs = self.recover_outputs().await?;

                let attached = host
                    .find_process(&worker.addr, &container.handle, TASK_PROCESS_ID)
                    .await?;

                if !attached {
                    // Container survived but the process never started;
                    // spawn it now.
                    self.spawn(&worker, &container).await?;
                } else {
                    debug!(step = %self.plan.name, container = %container.handle,
                        "reattached to running process");
                }

                (container, worker, outputs)
            }
            None => {
                let (container, worker, outputs) = self.create_container().await?;
                self.ctx.delegate.start(&origin).await?;
                self.spawn(&worker, &container).await?;
                (container, worker, outputs)
            }
        };

        let Some(exit_status) = self.wait_for_exit(&worker, &container, abort).await? else {
            return Ok(StepResult::aborted());
        };

        if exit_status == 0 {
            self.register_outputs(&worker, &outputs);
        }

        self.ctx.delegate.finish(&origin, exit_status).await?;

        Ok(StepResult {
            succeeded: exit_status == 0,
            aborted: false,
        })
    }
}

impl TaskStep {
    async fn spawn(&self, worker: &Worker, container: &Container) -> Result<(), StepError> {
        self.ctx
            .workers
            .host()
            .spawn_process(
                &worker.addr,
                &container.handle,
                ProcessSpec {
                    id: TASK_PROCESS_ID.to_string(),
                    path: self.plan.config.run.path.clone(),
                    args: self.plan.config.run.args.clone(),
                    dir: TASK_WORKING_DIRECTORY.to_string(),
                    env: self.process_env(),
                },
            )
            .await?;

        Ok(())
    }
}
