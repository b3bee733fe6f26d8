//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sitecheck_common::config::ReasoningConfig;
use sitecheck_common::events::EventBus;
use sitecheck_pipeline::cache::ResultCache;
use sitecheck_pipeline::config::PipelineSettings;
use sitecheck_pipeline::context::ServiceContext;
use sitecheck_pipeline::jobs::{JobStore, MemoryJobStore};
use sitecheck_pipeline::models::{InputFile, JobStatus, PipelineJob, StageId};
use sitecheck_pipeline::stages::{Stage, StageInput, StageOutput, StageRegistry};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Two storeys, five elements, one of them without GlobalId or storey
pub const TOWER_IFC: &str = "ISO-10303-21;
HEADER;
FILE_NAME('tower.ifc','2024-01-01',(''),(''),'','','');
ENDSEC;
DATA;
#1=IFCPROJECT('0proj',$,'Tower',$,$,$,$,$,$);
#50=IFCBUILDINGSTOREY('0lvl1',#2,'Level 1',$,$,$,$,$,.ELEMENT.,0.);
#51=IFCBUILDINGSTOREY('0lvl2',#2,'Level 2',$,$,$,$,$,.ELEMENT.,3000.);
#100=IFCFOOTING('1foot',#2,'Pad footing',$,$,#10,#11,$,.PAD_FOOTING.);
#101=IFCWALL('1wall',#2,'Basic Wall:Exterior',$,$,#10,#11,$,$);
#102=IFCSLAB('1slab',#2,'Floor slab',$,$,#10,#11,$,.FLOOR.);
#103=IFCCOLUMN($,#2,$,$,$,#10,#11,$,$);
#104=IFCWINDOW('1win',#2,'Window',$,$,#10,#11,$,1200.,900.,$,$,$);
#200=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel1',#2,$,$,(#100,#101),#50);
#201=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel2',#2,$,$,(#102,#104),#51);
ENDSEC;
END-ISO-10303-21;
";

/// Single-storey annex with its own element ids
pub const ANNEX_IFC: &str = "ISO-10303-21;
HEADER;
FILE_NAME('annex.ifc','2024-01-01',(''),(''),'','','');
ENDSEC;
DATA;
#60=IFCBUILDINGSTOREY('2lvl0',#2,'Ground',$,$,$,$,$,.ELEMENT.,0.);
#300=IFCFOOTING('2foot',#2,'Strip footing',$,$,#10,#11,$,.STRIP_FOOTING.);
#301=IFCWALL('2wall',#2,'Annex wall',$,$,#10,#11,$,$);
#302=IFCDOOR('2door',#2,'Entrance door',$,$,#10,#11,$,2100.,900.,$,$,$);
#400=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel3',#2,$,$,(#300,#301,#302),#60);
ENDSEC;
END-ISO-10303-21;
";

pub const BOQ_CSV: &str = "code,description,unit,quantity,unit_price
A1,Concrete pad footing,nr,1,900
A2,External wall,m2,2,1250
A3,Window,nr,1,
";

pub fn tower_files() -> Vec<InputFile> {
    vec![
        InputFile::from_bytes("tower.ifc", TOWER_IFC.as_bytes().to_vec()),
        InputFile::from_bytes("boq.csv", BOQ_CSV.as_bytes().to_vec()),
    ]
}

pub fn test_settings(data_dir: PathBuf) -> PipelineSettings {
    PipelineSettings {
        bind_address: "127.0.0.1:0".to_string(),
        cache_path: data_dir.join("result_cache.db"),
        data_dir,
        database_url: None,
        job_capacity: 50,
        cache_max_entries: 10,
        log_level: "info".to_string(),
        reasoning: ReasoningConfig::default(),
    }
}

/// Context over in-memory stores
pub fn test_context(registry: StageRegistry) -> ServiceContext {
    let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(50));
    let cache = Arc::new(ResultCache::in_memory(10));
    ServiceContext::from_parts(
        test_settings(std::env::temp_dir().join("sitecheck-tests")),
        EventBus::new(1024),
        jobs,
        cache,
        registry,
    )
}

/// Poll until the job reaches a terminal status
pub async fn wait_for_terminal(jobs: &Arc<dyn JobStore>, job_id: Uuid) -> PipelineJob {
    for _ in 0..500 {
        if let Some(job) = jobs.get(job_id).await.unwrap() {
            if job.status == JobStatus::Completed || job.status == JobStatus::Failed {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

/// Shared log of stage invocations
#[derive(Clone, Default)]
pub struct StageLog(Arc<Mutex<Vec<StageId>>>);

impl StageLog {
    pub fn entries(&self) -> Vec<StageId> {
        self.0.lock().unwrap().clone()
    }

    fn push(&self, id: StageId) {
        self.0.lock().unwrap().push(id);
    }
}

/// Wraps a real stage and logs each invocation
pub struct Recording {
    inner: Arc<dyn Stage>,
    log: StageLog,
}

#[async_trait]
impl Stage for Recording {
    fn id(&self) -> StageId {
        self.inner.id()
    }

    fn dependencies(&self) -> &'static [sitecheck_pipeline::models::ArtifactKind] {
        self.inner.dependencies()
    }

    fn has_input(&self, input: &StageInput) -> bool {
        self.inner.has_input(input)
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        self.log.push(self.inner.id());
        self.inner.run(input).await
    }
}

/// Builtin registry with every stage wrapped in [`Recording`]
pub fn recorded_registry() -> (StageRegistry, StageLog) {
    let builtin = StageRegistry::builtin(None, 1024);
    let log = StageLog::default();
    let mut registry = StageRegistry::new();
    for id in StageId::declared_order() {
        if let Some(inner) = builtin.get(id) {
            registry.register(Arc::new(Recording {
                inner,
                log: log.clone(),
            }));
        }
    }
    (registry, log)
}

/// Always returns an error
pub struct FailingStage(pub StageId);

#[async_trait]
impl Stage for FailingStage {
    fn id(&self) -> StageId {
        self.0
    }

    fn has_input(&self, _input: &StageInput) -> bool {
        true
    }

    async fn run(&self, _input: StageInput) -> anyhow::Result<StageOutput> {
        anyhow::bail!("boom")
    }
}

/// Panics inside `run`
pub struct PanickingStage(pub StageId);

#[async_trait]
impl Stage for PanickingStage {
    fn id(&self) -> StageId {
        self.0
    }

    fn has_input(&self, _input: &StageInput) -> bool {
        true
    }

    async fn run(&self, _input: StageInput) -> anyhow::Result<StageOutput> {
        panic!("stage exploded")
    }
}

/// Slow stage that reports a fixed warning
pub struct SlowStage {
    pub id: StageId,
    pub delay: Duration,
    pub warning: &'static str,
}

#[async_trait]
impl Stage for SlowStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn has_input(&self, _input: &StageInput) -> bool {
        true
    }

    async fn run(&self, _input: StageInput) -> anyhow::Result<StageOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutput::new().with_warning(self.warning))
    }
}

/// Start and end instants of each stage run
#[derive(Clone, Default)]
pub struct StageSpans(Arc<Mutex<Vec<(StageId, Instant, Instant)>>>);

impl StageSpans {
    pub fn span(&self, id: StageId) -> (Instant, Instant) {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|(stage, _, _)| *stage == id)
            .map(|(_, start, end)| (*start, *end))
            .unwrap_or_else(|| panic!("{} did not run", id))
    }
}

/// Delays a real stage and records when it ran
pub struct Timed {
    pub inner: Arc<dyn Stage>,
    pub delay: Duration,
    pub spans: StageSpans,
}

#[async_trait]
impl Stage for Timed {
    fn id(&self) -> StageId {
        self.inner.id()
    }

    fn dependencies(&self) -> &'static [sitecheck_pipeline::models::ArtifactKind] {
        self.inner.dependencies()
    }

    fn has_input(&self, input: &StageInput) -> bool {
        self.inner.has_input(input)
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        let output = self.inner.run(input).await;
        self.spans
            .0
            .lock()
            .unwrap()
            .push((self.inner.id(), start, Instant::now()));
        output
    }
}

/// Wrap builtin stages in [`Timed`] with the given delays
pub fn timed_registry(
    delays: &[(StageId, Duration)],
    spans: &StageSpans,
) -> StageRegistry {
    let mut registry = StageRegistry::builtin(None, 1024);
    for &(id, delay) in delays {
        if let Some(inner) = registry.get(id) {
            registry.register(Arc::new(Timed {
                inner,
                delay,
                spans: spans.clone(),
            }));
        }
    }
    registry
}

/// Sleeps, then reports partial progress through its handle
pub struct ReportingStage {
    pub id: StageId,
    pub delay: Duration,
}

#[async_trait]
impl Stage for ReportingStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn has_input(&self, _input: &StageInput) -> bool {
        true
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        tokio::time::sleep(self.delay).await;
        input.progress.report(0.5, "halfway");
        Ok(StageOutput::new())
    }
}
