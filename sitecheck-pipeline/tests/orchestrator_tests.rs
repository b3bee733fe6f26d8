//! End-to-end pipeline runs over in-memory stores

mod helpers;

use helpers::*;
use sitecheck_common::events::PipelineEvent;
use sitecheck_pipeline::models::{
    ArtifactKind, DepthMode, InputFile, JobStatus, RunOptions, StageId,
};
use sitecheck_pipeline::serializer::from_transport;
use sitecheck_pipeline::services::{PipelineError, StagePlan};
use sitecheck_pipeline::stages::StageRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_standard_run_completes_every_stage() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let job = context
        .jobs
        .create(vec!["tower.ifc".into(), "boq.csv".into()], RunOptions::default())
        .await
        .unwrap();

    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.stages_completed.len(), 11);
    assert_eq!(result.skipped_stages, vec![StageId::DocumentContext]);
    assert!(!result.from_cache);
    assert_eq!(result.project.name, "tower");
    assert_eq!(result.project.elements.len(), 5);
    for kind in [
        ArtifactKind::Quantities,
        ArtifactKind::Compliance,
        ArtifactKind::Sequence,
        ArtifactKind::BillOfQuantities,
        ArtifactKind::PricedBoq,
        ArtifactKind::Schedule,
        ArtifactKind::SpreadsheetExport,
        ArtifactKind::XmlExport,
        ArtifactKind::Review,
    ] {
        assert!(result.artifacts.get(kind).is_some(), "missing {:?}", kind);
    }
    assert_eq!(result.artifacts.review().unwrap().source, "heuristic");
    assert!(result.token_usage.is_zero());

    let stored = context.jobs.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100.0);
    assert_eq!(stored.stages_completed.len(), 11);

    // Stored transport form decodes back to the same result
    let decoded = from_transport(stored.result.unwrap()).unwrap();
    assert_eq!(decoded.fingerprint, result.fingerprint);
    assert_eq!(decoded.source_files[0].data.as_deref(), Some(TOWER_IFC.as_bytes()));
}

#[tokio::test]
async fn test_two_models_and_a_table_run_cleanly_in_declared_order() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let files = vec![
        InputFile::from_bytes("tower.ifc", TOWER_IFC.as_bytes().to_vec()),
        InputFile::from_bytes("annex.ifc", ANNEX_IFC.as_bytes().to_vec()),
        InputFile::from_bytes("boq.csv", BOQ_CSV.as_bytes().to_vec()),
    ];
    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();

    let result = context
        .orchestrator
        .run(job.job_id, files, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.project.elements.len(), 8);
    assert_eq!(result.stages_completed, StageId::declared_order());
    assert_eq!(result.stage_order, StageId::declared_order());
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert!(result.artifacts.priced_boq().unwrap().unpriced.is_empty());

    let stored = context.jobs.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 100.0);
    assert!(stored.warnings.is_empty());
}

#[tokio::test]
async fn test_identical_batch_is_served_from_cache() {
    let (registry, log) = recorded_registry();
    let context = test_context(registry);

    let first = context.orchestrator.submit(tower_files(), RunOptions::default()).await.unwrap();
    wait_for_terminal(&context.jobs, first.job_id).await;
    let runs_after_first = log.entries().len();
    assert!(runs_after_first > 0);

    let second_job = context
        .jobs
        .create(vec!["tower.ifc".into(), "boq.csv".into()], RunOptions::default())
        .await
        .unwrap();
    // Upload order does not matter
    let mut files = tower_files();
    files.reverse();
    let second = context
        .orchestrator
        .run(second_job.job_id, files, RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(second.from_cache);
    assert_eq!(second.job_id, second_job.job_id);
    assert_eq!(log.entries().len(), runs_after_first);
    // Cached copies carry no raw bytes
    assert!(second.source_files.iter().all(|f| f.data.is_none()));

    let stored = context.jobs.get(second_job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_same_size_edit_is_not_served_from_cache() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let edited_ifc = TOWER_IFC.replace("IFCWALL(", "IFCSLAB(");
    assert_eq!(edited_ifc.len(), TOWER_IFC.len());

    let mut ifc_types = Vec::new();
    for text in [TOWER_IFC.to_string(), edited_ifc] {
        let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
        let result = context
            .orchestrator
            .run(
                job.job_id,
                vec![InputFile::from_bytes("tower.ifc", text.into_bytes())],
                RunOptions::default(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.from_cache);
        let wall = result
            .project
            .elements
            .iter()
            .find(|e| e.id == "1wall")
            .unwrap();
        ifc_types.push(wall.ifc_type.clone());
    }

    assert_eq!(ifc_types, vec!["IFCWALL", "IFCSLAB"]);
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let (registry, log) = recorded_registry();
    let context = test_context(registry);

    for force_refresh in [false, true] {
        let options = RunOptions {
            force_refresh,
            ..RunOptions::default()
        };
        let job = context.jobs.create(vec![], options.clone()).await.unwrap();
        let result = context
            .orchestrator
            .run(job.job_id, tower_files(), options, CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.from_cache);
    }

    let model_parses = log
        .entries()
        .into_iter()
        .filter(|id| *id == StageId::ModelParse)
        .count();
    assert_eq!(model_parses, 2);
}

#[tokio::test]
async fn test_deep_run_reads_documents_before_sequencing() {
    let (registry, log) = recorded_registry();
    let context = test_context(registry);

    let mut files = tower_files();
    files.push(InputFile::from_bytes(
        "notes.txt",
        b"- Fire doors shall be installed before finishes\n".to_vec(),
    ));
    let options = RunOptions::with_depth(DepthMode::Deep);
    let job = context.jobs.create(vec![], options.clone()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, files, options, CancellationToken::new())
        .await
        .unwrap();

    let plan = StagePlan::for_depth(DepthMode::Deep);
    assert_eq!(result.stage_order, plan.stages().to_vec());

    let foreground: Vec<StageId> = log
        .entries()
        .into_iter()
        .filter(|id| *id != StageId::Review)
        .collect();
    let expected: Vec<StageId> = plan
        .stages()
        .iter()
        .copied()
        .filter(|id| *id != StageId::Review)
        .collect();
    assert_eq!(foreground, expected);
    assert_eq!(result.project.document_notes.len(), 1);
    assert!(result.skipped_stages.is_empty());
}

#[tokio::test]
async fn test_failing_stage_becomes_warning() {
    let mut registry = StageRegistry::builtin(None, 1024);
    registry.register(Arc::new(FailingStage(StageId::ComplianceCheck)));
    let context = test_context(registry);

    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result
        .warnings
        .contains(&"compliance_check failed: boom".to_string()));
    assert!(result.artifacts.compliance().is_none());
    assert!(result.artifacts.schedule().is_some());
    assert_eq!(result.stages_completed.len(), 11);

    let stored = context.jobs.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(
        stored.stage_progress[&StageId::ComplianceCheck].message,
        "Failed"
    );
}

#[tokio::test]
async fn test_panicking_stage_is_contained() {
    let mut registry = StageRegistry::builtin(None, 1024);
    registry.register(Arc::new(PanickingStage(StageId::Sequencing)));
    let context = test_context(registry);

    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(result
        .warnings
        .iter()
        .any(|w| w == "sequencing failed: panic: stage exploded"));
    // Nothing downstream can build on a missing sequence
    assert!(result.skipped_stages.contains(&StageId::Scheduling));
    assert!(result.skipped_stages.contains(&StageId::XmlExport));
    assert!(result.artifacts.priced_boq().is_some());

    let stored = context.jobs.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_background_review_is_joined() {
    let mut registry = StageRegistry::builtin(None, 1024);
    registry.register(Arc::new(SlowStage {
        id: StageId::Review,
        delay: Duration::from_millis(100),
        warning: "review done",
    }));
    let context = test_context(registry);

    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.warnings.last().map(String::as_str), Some("review done"));
    assert_eq!(result.stages_completed.last(), Some(&StageId::Review));
    assert_eq!(result.stages_completed.len(), 11);
}

#[tokio::test]
async fn test_review_overlaps_foreground_stages() {
    let spans = StageSpans::default();
    let registry = timed_registry(
        &[
            (StageId::PriceMatching, Duration::ZERO),
            (StageId::Scheduling, Duration::from_millis(300)),
            (StageId::Review, Duration::from_millis(300)),
        ],
        &spans,
    );
    let context = test_context(registry);

    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let (_, pricing_end) = spans.span(StageId::PriceMatching);
    let (review_start, _) = spans.span(StageId::Review);
    let (_, scheduling_end) = spans.span(StageId::Scheduling);

    // Launched once prices exist, running while scheduling is still busy
    assert!(review_start >= pricing_end);
    assert!(review_start < scheduling_end);

    assert!(result.artifacts.review().is_some());
    assert_eq!(result.stages_completed.last(), Some(&StageId::Review));
    assert_eq!(result.stages_completed.len(), 11);
}

#[tokio::test]
async fn test_review_runs_inline_when_pricing_fails() {
    let spans = StageSpans::default();
    let mut registry = timed_registry(
        &[
            (StageId::XmlExport, Duration::ZERO),
            (StageId::Review, Duration::ZERO),
        ],
        &spans,
    );
    registry.register(Arc::new(FailingStage(StageId::PriceMatching)));
    let context = test_context(registry);

    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let (_, xml_end) = spans.span(StageId::XmlExport);
    let (review_start, _) = spans.span(StageId::Review);
    assert!(review_start >= xml_end);

    assert!(result
        .warnings
        .contains(&"price_matching failed: boom".to_string()));
    assert!(result.artifacts.review().is_some());
    assert_eq!(result.stages_completed.last(), Some(&StageId::Review));
}

#[tokio::test]
async fn test_background_progress_never_steps_back() {
    let mut registry = StageRegistry::builtin(None, 1024);
    registry.register(Arc::new(ReportingStage {
        id: StageId::Review,
        delay: Duration::from_millis(100),
    }));
    let context = test_context(registry);
    let mut rx = context.event_bus.subscribe();

    let job = context.orchestrator.submit(tower_files(), RunOptions::default()).await.unwrap();

    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        if event.job_id() != job.job_id {
            continue;
        }
        match event {
            PipelineEvent::StageProgress { stage, percent, .. } => events.push((stage, percent)),
            PipelineEvent::JobCompleted { .. } => break,
            PipelineEvent::JobFailed { error, .. } => panic!("job failed: {}", error),
            PipelineEvent::JobSubmitted { .. } => {}
        }
    }

    assert!(events.iter().any(|(stage, _)| stage == "review"));
    assert!(events.windows(2).all(|w| w[0].1 <= w[1].1), "{:?}", events);
    assert_eq!(events.last().map(|(_, p)| *p), Some(100.0));
}

#[tokio::test]
async fn test_progress_events_are_monotonic() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let mut rx = context.event_bus.subscribe();

    let job = context.orchestrator.submit(tower_files(), RunOptions::default()).await.unwrap();

    let mut percents = Vec::new();
    let mut completed = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        if event.job_id() != job.job_id {
            continue;
        }
        match event {
            PipelineEvent::StageProgress { percent, .. } => percents.push(percent),
            PipelineEvent::JobCompleted { from_cache, .. } => {
                assert!(!from_cache);
                completed = true;
                break;
            }
            PipelineEvent::JobFailed { error, .. } => panic!("job failed: {}", error),
            PipelineEvent::JobSubmitted { .. } => {}
        }
    }

    assert!(completed);
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(percents.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_empty_batch_fails_job() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();

    let result = context
        .orchestrator
        .run(job.job_id, Vec::new(), RunOptions::default(), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(PipelineError::NothingToProcess)));
    let stored = context.jobs.get(job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("No files to process"));
}

#[tokio::test]
async fn test_unrecognised_files_complete_with_warning() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();

    let result = context
        .orchestrator
        .run(
            job.job_id,
            vec![InputFile::from_bytes("photo.jpg", vec![0xff, 0xd8])],
            RunOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.skipped_stages.len(), 11);
    assert!(result.warnings[0].contains("recognised type"));
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn test_cancelled_run_still_completes() {
    let context = test_context(StageRegistry::builtin(None, 1024));
    let job = context.jobs.create(vec![], RunOptions::default()).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = context
        .orchestrator
        .run(job.job_id, tower_files(), RunOptions::default(), cancel)
        .await
        .unwrap();

    assert!(result
        .warnings
        .contains(&"model_parse failed: cancelled".to_string()));
    assert!(result.project.elements.is_empty());
}

#[tokio::test]
async fn test_cancel_submitted_job() {
    let mut registry = StageRegistry::builtin(None, 1024);
    registry.register(Arc::new(SlowStage {
        id: StageId::ModelParse,
        delay: Duration::from_millis(200),
        warning: "slow parse",
    }));
    let context = test_context(registry);

    let job = context.orchestrator.submit(tower_files(), RunOptions::default()).await.unwrap();
    assert!(context.orchestrator.cancel(job.job_id).await);

    let finished = wait_for_terminal(&context.jobs, job.job_id).await;
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished
        .warnings
        .contains(&"boq_parse failed: cancelled".to_string()));

    // Finished runs are no longer cancellable
    for _ in 0..100 {
        if context.orchestrator.active_runs().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!context.orchestrator.cancel(job.job_id).await);
}
