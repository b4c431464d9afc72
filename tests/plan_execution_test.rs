//! 编排器集成测试：完整计划执行、自动修订、暂停 / 恢复 / 取消

mod common;

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use bee_plan::agents::{AgentRegistry, EchoAgent};
    use bee_plan::core::{Orchestrator, OrchestratorConfig, OrchestratorError, PlanError};
    use bee_plan::executor::{SentinelConfig, SentinelExecutor, StepExecutor, StepExecutorConfig};
    use bee_plan::llm::{Completion, MockLlmClient};
    use bee_plan::plan::{Plan, PlanHandle, PlanStatus, SentinelCondition, SentinelStep, Step};
    use bee_plan::planner::PlanGenerator;
    use tokio_util::sync::CancellationToken;

    use crate::common::{FailingAgent, GateAgent, ScriptedPlanner, StallingPlanner};

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        registry: Arc<AgentRegistry>,
    }

    fn fixture(planner: Arc<dyn PlanGenerator>, config: OrchestratorConfig, llm: Arc<MockLlmClient>) -> Fixture {
        let registry = Arc::new(AgentRegistry::new());
        registry.register_agent(EchoAgent).unwrap();
        registry.register_agent(FailingAgent).unwrap();

        let step_executor = Arc::new(StepExecutor::new(
            registry.clone(),
            StepExecutorConfig {
                max_retries: 2,
                step_timeout: Duration::from_secs(5),
                retry_delay: Duration::from_millis(5),
                ..StepExecutorConfig::default()
            },
        ));
        let sentinel_executor = Arc::new(SentinelExecutor::new(
            llm,
            SentinelConfig {
                min_sleep: Duration::ZERO,
                max_sleep: Duration::from_secs(30),
                max_execution_time: Duration::from_secs(60),
                error_backoff_step: Duration::from_millis(5),
                allow_zero_sleep: true,
                ..SentinelConfig::default()
            },
        ));
        Fixture {
            orchestrator: Arc::new(Orchestrator::new(step_executor, sentinel_executor, planner, config)),
            registry,
        }
    }

    fn default_fixture(planner: Arc<dyn PlanGenerator>, config: OrchestratorConfig) -> Fixture {
        fixture(planner, config, Arc::new(MockLlmClient::new()))
    }

    fn echo_plan() -> Plan {
        Plan::new("Greet", "say things")
            .with_step(Step::new("hello", "hello", "echo"))
            .with_step(Step::new("world", "world", "echo"))
    }

    fn failing_second_step_plan() -> Plan {
        Plan::new("Deploy", "build then ship")
            .with_step(Step::new("build", "build it", "echo"))
            .with_step(Step::new("ship", "ship it", "failing"))
    }

    async fn wait_for_status(handle: &PlanHandle, status: PlanStatus) {
        for _ in 0..400 {
            if handle.read().await.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("plan never reached {status:?}");
    }

    #[tokio::test]
    async fn test_plan_completes_and_publishes_progress() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());
        let progress = f.orchestrator.subscribe();
        let handle = PlanHandle::new(echo_plan());

        let result = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.plan.status, PlanStatus::Completed);
        assert_eq!(result.plan.current_step_index(), 2);
        assert_eq!(result.plan.steps[0].step().result.as_deref(), Some("hello"));
        assert!(result.started_at <= result.completed_at);

        let latest = progress.borrow().clone();
        assert_eq!(latest.plan_id, handle.id());
        assert_eq!(latest.status, PlanStatus::Completed);
        assert_eq!(latest.completed_steps, 2);
        assert!(!f.orchestrator.is_running(handle.id()));
    }

    #[tokio::test]
    async fn test_sentinel_step_in_plan_records_iterations() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());
        let plan = Plan::new("Wait", "wait a bit")
            .with_step(Step::new("prepare", "prepare", "echo"))
            .with_step(SentinelStep::new(
                Step::new("poll", "poll twice", "monitor"),
                0,
                SentinelCondition::Iterations(2),
            ));
        let handle = PlanHandle::new(plan);

        let result = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(result.success);
        let sentinel = result.plan.steps[1].as_sentinel().unwrap();
        assert!(sentinel.step.is_completed);
        assert_eq!(sentinel.current_iteration, 2);
        assert_eq!(sentinel.step.metadata["iterations"], 2);
    }

    #[tokio::test]
    async fn test_revision_budget_of_one_stops_on_second_failure() {
        let planner = Arc::new(ScriptedPlanner::new(failing_second_step_plan()));
        let config = OrchestratorConfig {
            max_revision_attempts: 1,
            ..OrchestratorConfig::default()
        };
        let f = default_fixture(planner.clone(), config);
        let handle = PlanHandle::new(failing_second_step_plan());

        let result = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(planner.revisions.load(Ordering::SeqCst), 1);
        assert_eq!(result.plan.revision_attempts, 1);
        assert_eq!(result.plan.status, PlanStatus::Failed);
        assert_eq!(result.plan.current_step_index(), 1);
        assert!(result.plan.steps[0].step().is_completed);
        let error = result.error.unwrap();
        assert!(error.contains("cannot do 'ship it'"), "unexpected error: {error}");

        let feedback = planner.feedback.lock().unwrap();
        assert_eq!(feedback.len(), 1);
        assert!(feedback[0].starts_with("Step 2 'ship' failed"));
    }

    #[tokio::test]
    async fn test_failure_without_revision_stops_plan() {
        let config = OrchestratorConfig {
            auto_revision: false,
            ..OrchestratorConfig::default()
        };
        let planner = Arc::new(ScriptedPlanner::new(echo_plan()));
        let f = default_fixture(planner.clone(), config);
        let plan = Plan::new("Three", "three steps")
            .with_step(Step::new("a", "a", "failing"))
            .with_step(Step::new("b", "b", "echo"));
        let handle = PlanHandle::new(plan);

        let result = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(planner.revisions.load(Ordering::SeqCst), 0);
        assert_eq!(result.plan.status, PlanStatus::Failed);
        assert_eq!(result.plan.current_step_index(), 0);
        assert!(result.plan.steps[1].step().started_at.is_none());
    }

    #[tokio::test]
    async fn test_continue_on_failure_runs_remaining_steps() {
        let config = OrchestratorConfig {
            continue_on_failure: true,
            skip_revision_when_continuing: true,
            ..OrchestratorConfig::default()
        };
        let planner = Arc::new(ScriptedPlanner::new(echo_plan()));
        let f = default_fixture(planner.clone(), config);
        let plan = Plan::new("Three", "three steps")
            .with_step(Step::new("a", "a", "echo"))
            .with_step(Step::new("b", "b", "failing"))
            .with_step(Step::new("c", "c", "echo"));
        let handle = PlanHandle::new(plan);

        let result = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(planner.revisions.load(Ordering::SeqCst), 0);
        // 错误状态是粘滞的
        assert_eq!(result.plan.status, PlanStatus::Failed);
        assert_eq!(result.plan.current_step_index(), 3);
        assert!(result.plan.steps[2].step().is_completed);
        assert!(result.plan.steps[1].step().has_error());
    }

    #[tokio::test]
    async fn test_pause_interrupts_step_and_resume_continues_from_cursor() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());
        let gate = Arc::new(GateAgent::default());
        f.registry.register("gate", gate.clone()).unwrap();

        let plan = Plan::new("Gated", "wait at the gate")
            .with_step(Step::new("first", "first", "echo"))
            .with_step(Step::new("gate", "the gate", "gate"))
            .with_step(Step::new("last", "last", "echo"));
        let handle = PlanHandle::new(plan);

        let run = {
            let orchestrator = f.orchestrator.clone();
            let handle = handle.clone();
            tokio::spawn(async move { orchestrator.execute_plan(&handle, CancellationToken::new()).await })
        };

        gate.started.notified().await;
        assert!(f.orchestrator.is_running(handle.id()));
        assert!(f.orchestrator.pause_plan(&handle).await);
        let paused = run.await.unwrap();

        assert!(!paused.success);
        assert_eq!(paused.plan.status, PlanStatus::Paused);
        assert_eq!(paused.plan.current_step_index(), 1);
        let gate_step = paused.plan.steps[1].step();
        assert!(!gate_step.is_completed);
        assert!(gate_step.error.is_none());
        assert!(!f.orchestrator.is_running(handle.id()));

        let resumed = f.orchestrator.resume_plan(&handle, CancellationToken::new()).await;
        assert!(resumed.success);
        assert_eq!(resumed.plan.status, PlanStatus::Completed);
        assert_eq!(resumed.plan.steps[1].step().result.as_deref(), Some("passed the gate"));
        assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_plan_stops_running_sentinel() {
        let llm = Arc::new(MockLlmClient::with_fallback(Ok(Completion::ok("false"))));
        let f = fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default(), llm);
        let sentinel = SentinelStep::new(
            Step::new("watch", "watch the queue", "monitor"),
            20,
            SentinelCondition::Expression("queue is empty".into()),
        );
        let sentinel_id = sentinel.sentinel_id().to_string();
        let handle = PlanHandle::new(Plan::new("Watch", "watch").with_step(sentinel));

        let run = {
            let orchestrator = f.orchestrator.clone();
            let handle = handle.clone();
            tokio::spawn(async move { orchestrator.execute_plan(&handle, CancellationToken::new()).await })
        };

        let sentinels = f.orchestrator.sentinel_executor().clone();
        for _ in 0..400 {
            if sentinels.is_running(&sentinel_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(sentinels.is_running(&sentinel_id));

        assert!(f.orchestrator.cancel_plan(&handle).await);
        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("cancelled plan did not stop promptly")
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.plan.status, PlanStatus::Cancelled);
        assert!(!sentinels.is_running(&sentinel_id));
        assert!(result.plan.steps[0].step().error.is_none());
        // 已取消的计划不能再次取消
        assert!(!f.orchestrator.cancel_plan(&handle).await);
    }

    #[tokio::test]
    async fn test_caller_cancellation_marks_plan_cancelled() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());
        let gate = Arc::new(GateAgent::default());
        f.registry.register("gate", gate.clone()).unwrap();
        let handle = PlanHandle::new(Plan::new("Gated", "g").with_step(Step::new("gate", "gate", "gate")));
        let cancel = CancellationToken::new();

        let run = {
            let orchestrator = f.orchestrator.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.execute_plan(&handle, cancel).await })
        };

        gate.started.notified().await;
        cancel.cancel();
        let result = run.await.unwrap();

        assert_eq!(result.plan.status, PlanStatus::Cancelled);
        assert!(result.plan.steps[0].step().error.is_none());
        wait_for_status(&handle, PlanStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn test_pause_finished_plan_is_rejected() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());
        let handle = PlanHandle::new(echo_plan());
        f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;

        assert!(!f.orchestrator.pause_plan(&handle).await);
        assert_eq!(handle.read().await.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_pause_running_plan_after_skipped_failure() {
        let config = OrchestratorConfig {
            continue_on_failure: true,
            auto_revision: false,
            ..OrchestratorConfig::default()
        };
        let llm = Arc::new(MockLlmClient::with_fallback(Ok(Completion::ok("false"))));
        let f = fixture(Arc::new(ScriptedPlanner::empty()), config, llm);
        let sentinel = SentinelStep::new(
            Step::new("watch", "watch the queue", "monitor"),
            20,
            SentinelCondition::Expression("queue is empty".into()),
        );
        let sentinel_id = sentinel.sentinel_id().to_string();
        let plan = Plan::new("Skip then watch", "w")
            .with_step(Step::new("broken", "broken", "failing"))
            .with_step(sentinel);
        let handle = PlanHandle::new(plan);

        let run = {
            let orchestrator = f.orchestrator.clone();
            let handle = handle.clone();
            tokio::spawn(async move { orchestrator.execute_plan(&handle, CancellationToken::new()).await })
        };

        let sentinels = f.orchestrator.sentinel_executor().clone();
        for _ in 0..400 {
            if sentinels.is_running(&sentinel_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(sentinels.is_running(&sentinel_id));
        // 跳过失败步骤后计划仍是 Failed，但还在运行
        assert_eq!(handle.read().await.status, PlanStatus::Failed);

        assert!(f.orchestrator.pause_plan(&handle).await);
        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("paused plan did not stop promptly")
            .unwrap();

        assert_eq!(result.plan.status, PlanStatus::Paused);
        assert_eq!(result.plan.current_step_index(), 1);
        assert!(!sentinels.is_running(&sentinel_id));
        assert!(!f.orchestrator.is_running(handle.id()));
        // 运行结束后的 Failed 计划不能再暂停
        let finished = PlanHandle::new(Plan::new("Done", "d").with_step(Step::new("x", "x", "failing")));
        f.orchestrator.execute_plan(&finished, CancellationToken::new()).await;
        assert!(!f.orchestrator.pause_plan(&finished).await);
        assert_eq!(finished.read().await.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_resume_at_end_settles_failed_plan() {
        let config = OrchestratorConfig {
            continue_on_failure: true,
            skip_revision_when_continuing: true,
            ..OrchestratorConfig::default()
        };
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), config);
        let plan = Plan::new("Two", "t")
            .with_step(Step::new("broken", "broken", "failing"))
            .with_step(Step::new("fine", "fine", "echo"));
        let handle = PlanHandle::new(plan);

        let first = f.orchestrator.execute_plan(&handle, CancellationToken::new()).await;
        assert_eq!(first.plan.status, PlanStatus::Failed);
        assert_eq!(first.plan.current_step_index(), 2);

        let mut progress = f.orchestrator.subscribe();
        let resumed = f.orchestrator.resume_plan(&handle, CancellationToken::new()).await;
        assert!(!resumed.success);
        assert_eq!(resumed.plan.status, PlanStatus::Failed);
        assert_eq!(handle.read().await.status, PlanStatus::Failed);
        assert_eq!(progress.borrow_and_update().status, PlanStatus::Failed);
        assert!(!f.orchestrator.is_running(handle.id()));
    }

    #[tokio::test]
    async fn test_caller_cancellation_during_revision_marks_plan_cancelled() {
        let planner = Arc::new(StallingPlanner::default());
        let f = default_fixture(planner.clone(), OrchestratorConfig::default());
        let handle = PlanHandle::new(Plan::new("Broken", "b").with_step(Step::new("broken", "broken", "failing")));
        let cancel = CancellationToken::new();

        let run = {
            let orchestrator = f.orchestrator.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.execute_plan(&handle, cancel).await })
        };

        planner.revising.notified().await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("cancelled plan did not stop promptly")
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.plan.status, PlanStatus::Cancelled);
        assert_eq!(result.plan.revision_attempts, 0);
    }

    #[tokio::test]
    async fn test_execute_task_generates_then_runs() {
        let f = default_fixture(Arc::new(ScriptedPlanner::new(echo_plan())), OrchestratorConfig::default());

        let result = f
            .orchestrator
            .execute_task("greet the world", CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.plan.title, "Greet");
        assert_eq!(result.plan.completed_count(), 2);
    }

    #[tokio::test]
    async fn test_execute_task_propagates_generation_failure() {
        let f = default_fixture(Arc::new(ScriptedPlanner::empty()), OrchestratorConfig::default());

        let err = f
            .orchestrator
            .execute_task("anything", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Plan(PlanError::PlanGenerationFailed { attempts: 1, .. })
        ));
    }
}
