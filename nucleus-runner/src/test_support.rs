//! In-memory collaborators for driver and pipeline tests
//!
//! Every mock appends what it was asked to do to a shared [`Recorder`], so tests
//! can assert on the order of side effects across services.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use clap::Parser;
use nucleus_core::domain::diff::Diff;
use nucleus_core::domain::payload::{Oauth, Payload};
use nucleus_core::domain::result::{DiscoveryResult, ExecutionResults};
use nucleus_core::domain::tas::Run;
use nucleus_core::domain::task::{TaskPayload, TaskStatus, TaskType};
use nucleus_core::dto::{OauthRefreshRequest, TestReportResponse};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::{Cli, Config};
use crate::context::TaskContext;
use crate::driver::{Builder, Collaborators, DriverSettings};
use crate::env::TaskEnv;
use crate::error::NucleusError;
use crate::layout::WorkspaceLayout;
use crate::pipeline::{Pipeline, PipelineServices};
use crate::repository::TaskRepository;
use crate::service::{
    BlocklistService, CacheStore, CommandType, CoverageService, DiffManager, DiscoveryArgs,
    ExecutionArgs, ExecutionManager, GitManager, LogBuffer, LogStore, PayloadManager,
    SecretParser, Secrets, TestDiscoveryService, TestExecutionService, YamlTasConfigManager,
};

pub const V1_YAML: &str = r#"
framework: jest
nodeVersion: "18.12.0"
blocklist:
  - "test/flaky.spec.js"
preRun:
  command:
    - npm ci
postRun:
  command:
    - npm run report
postMerge:
  pattern:
    - "test/**/*.spec.js"
  env:
    API_KEY: "${{ secrets.KEY }}"
preMerge:
  pattern:
    - "test/**/*.spec.js"
parallelism: 2
"#;

pub const V2_YAML: &str = r#"
version: 2
nodeVersion: "18"
postMerge:
  env:
    SHARED: root
    OVERRIDE: block
  preRun:
    command:
      - npm ci
  subModules:
    - name: a
      path: ./pkg/a
      framework: jest
      pattern:
        - "test/**/*.spec.js"
      parallelism: 2
      preRun:
        command:
          - npm ci
        env:
          OVERRIDE: module
    - name: b
      path: pkg/b/
      framework: mocha
      pattern:
        - "**/*.test.js"
      preRun:
        command:
          - npm ci
      postRun:
        command:
          - npm run report
      runPrerunEveryTime: true
    - name: c
      path: "."
      framework: jasmine
      pattern:
        - "spec/**/*.js"
preMerge:
  subModules:
    - name: web
      path: ./web
      framework: jest
      pattern:
        - "src/**/*.test.js"
"#;

/// Ordered log of side effects shared by every mock
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

pub struct MockExecutor {
    recorder: Recorder,
    failing_pre_run: Mutex<HashSet<PathBuf>>,
    delays: Mutex<BTreeMap<PathBuf, u64>>,
}

impl MockExecutor {
    fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            failing_pre_run: Mutex::new(HashSet::new()),
            delays: Mutex::new(BTreeMap::new()),
        }
    }

    /// Pre-run commands run in `dir` exit non-zero
    pub fn fail_pre_run_in(&self, dir: PathBuf) {
        self.failing_pre_run.lock().unwrap().insert(dir);
    }

    /// User commands run in `dir` take `millis` longer
    pub fn delay_in(&self, dir: PathBuf, millis: u64) {
        self.delays.lock().unwrap().insert(dir, millis);
    }
}

#[async_trait]
impl ExecutionManager for MockExecutor {
    async fn execute_user_commands(
        &self,
        kind: CommandType,
        run: &Run,
        _secrets: &Secrets,
        _env: &TaskEnv,
        cwd: &Path,
        output: &mut LogBuffer,
    ) -> Result<()> {
        let delay = self.delays.lock().unwrap().get(cwd).copied();
        if let Some(millis) = delay {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        self.recorder.record(format!("user:{}:{}", kind, cwd.display()));
        for command in &run.commands {
            output.write_line(format!("$ {}", command));
        }
        let fails = kind == CommandType::PreRun && self.failing_pre_run.lock().unwrap().contains(cwd);
        if fails {
            output.write_line("exit status 1");
            return Err(anyhow!("{} command failed in {}", kind, cwd.display()));
        }
        Ok(())
    }

    async fn execute_internal_commands(
        &self,
        kind: CommandType,
        _commands: &[String],
        cwd: &Path,
        _env: &TaskEnv,
    ) -> Result<()> {
        self.recorder.record(format!("internal:{}:{}", kind, cwd.display()));
        Ok(())
    }

    async fn run_program(
        &self,
        kind: CommandType,
        program: &str,
        _args: &[String],
        _cwd: &Path,
        _env: &TaskEnv,
        _secrets: &Secrets,
        _output: &mut LogBuffer,
    ) -> Result<()> {
        self.recorder.record(format!("program:{}:{}", kind, program));
        Ok(())
    }
}

pub struct MockCache {
    recorder: Recorder,
    upload_fails: Mutex<bool>,
}

impl MockCache {
    pub fn fail_upload(&self) {
        *self.upload_fails.lock().unwrap() = true;
    }
}

#[async_trait]
impl CacheStore for MockCache {
    async fn download(&self, key: &str) -> Result<()> {
        self.recorder.record(format!("download:{}", key));
        Ok(())
    }

    async fn upload(&self, key: &str, _paths: &[String]) -> Result<()> {
        self.recorder.record(format!("upload:{}", key));
        if *self.upload_fails.lock().unwrap() {
            return Err(anyhow!("cache store unavailable"));
        }
        Ok(())
    }

    async fn cache_workspace(&self, submodule: &str) -> Result<()> {
        self.recorder.record(format!("cache_workspace:{}", submodule));
        Ok(())
    }

    async fn extract_workspace(&self, submodule: &str) -> Result<()> {
        self.recorder.record(format!("extract_workspace:{}", submodule));
        Ok(())
    }
}

#[derive(Clone)]
pub enum DiffOutcome {
    Found(Diff),
    NotFound,
    Fails,
}

pub struct MockDiff {
    outcome: Mutex<DiffOutcome>,
}

impl MockDiff {
    pub fn set(&self, outcome: DiffOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }
}

#[async_trait]
impl DiffManager for MockDiff {
    async fn get_changed_files(&self, _payload: &Payload, _oauth: &Oauth) -> Result<Diff, NucleusError> {
        let outcome = self.outcome.lock().unwrap().clone();
        match outcome {
            DiffOutcome::Found(diff) => Ok(diff),
            DiffOutcome::NotFound => Err(NucleusError::DiffNotFound),
            DiffOutcome::Fails => Err(NucleusError::Other(anyhow!("git diff exited with 128"))),
        }
    }
}

pub struct MockBlocklist {
    recorder: Recorder,
}

#[async_trait]
impl BlocklistService for MockBlocklist {
    async fn get_blocked_tests(&self, _payload: &Payload, _yml: &[String], dest: &Path) -> Result<()> {
        self.recorder.record(format!("blocklist:{}", dest.display()));
        Ok(())
    }
}

pub struct MockDiscovery {
    recorder: Recorder,
    seen: Mutex<Vec<DiscoveryArgs>>,
    failing: Mutex<HashSet<String>>,
    panics: Mutex<bool>,
}

impl MockDiscovery {
    pub fn seen(&self) -> Vec<DiscoveryArgs> {
        self.seen.lock().unwrap().clone()
    }

    /// Discovery of submodule `name` fails
    pub fn fail_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn panic_on_discover(&self) {
        *self.panics.lock().unwrap() = true;
    }
}

#[async_trait]
impl TestDiscoveryService for MockDiscovery {
    async fn discover(&self, args: DiscoveryArgs, output: &mut LogBuffer) -> Result<DiscoveryResult> {
        if *self.panics.lock().unwrap() {
            panic!("discovery runner crashed");
        }
        let name = args.meta.sub_module.clone();
        self.recorder.record(format!("discover:{}", name));
        output.write_line(format!("discovered tests in {}", args.cwd.display()));
        self.seen.lock().unwrap().push(args.clone());

        if self.failing.lock().unwrap().contains(&name) {
            return Err(anyhow!("runner exited with status 1"));
        }
        Ok(DiscoveryResult {
            task_id: args.payload.task_id.clone(),
            sub_module: name,
            parallelism: args.meta.parallelism,
            ..Default::default()
        })
    }

    async fn send_result(&self, result: &DiscoveryResult) -> Result<()> {
        self.recorder.record(format!("send_discovery:{}", result.sub_module));
        Ok(())
    }
}

pub struct MockExecution {
    recorder: Recorder,
    seen: Mutex<Vec<ExecutionArgs>>,
    response: Mutex<TaskStatus>,
    runs_fail: Mutex<bool>,
}

impl MockExecution {
    pub fn seen(&self) -> Vec<ExecutionArgs> {
        self.seen.lock().unwrap().clone()
    }

    /// Status the control plane answers with
    pub fn respond_with(&self, status: TaskStatus) {
        *self.response.lock().unwrap() = status;
    }

    pub fn fail_runs(&self) {
        *self.runs_fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl TestExecutionService for MockExecution {
    async fn run(&self, args: ExecutionArgs, output: &mut LogBuffer) -> Result<ExecutionResults> {
        self.recorder.record(format!("execute:{}", args.cwd.display()));
        output.write_line(format!("executing {} runs", args.runs));
        self.seen.lock().unwrap().push(args.clone());
        if *self.runs_fail.lock().unwrap() {
            return Err(anyhow!("test runner reported no results for run 1"));
        }
        let payload = &args.payload;
        Ok(ExecutionResults {
            task_id: payload.task_id.clone(),
            build_id: payload.build_id.clone(),
            repo_id: payload.repo_id.clone(),
            org_id: payload.org_id.clone(),
            commit_id: payload.build_target_commit.clone(),
            task_type: args.task_type,
            results: Vec::new(),
        })
    }

    async fn send_results(&self, results: &ExecutionResults) -> Result<TestReportResponse> {
        self.recorder.record(format!("send_results:{}", results.task_id));
        Ok(TestReportResponse {
            task_status: *self.response.lock().unwrap(),
            remark: String::new(),
        })
    }
}

pub struct MockTasks {
    recorder: Recorder,
    statuses: Mutex<Vec<TaskPayload>>,
}

impl MockTasks {
    /// Every status report, in the order received
    pub fn statuses(&self) -> Vec<TaskPayload> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskRepository for MockTasks {
    async fn update_status(&self, task: &TaskPayload) -> Result<()> {
        self.statuses.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn send_submodule_count(&self, _build_id: &str, total: usize) -> Result<()> {
        self.recorder.record(format!("submodule_count:{}", total));
        Ok(())
    }

    async fn refresh_oauth(&self, _request: &OauthRefreshRequest) -> Result<Oauth> {
        self.recorder.record("refresh_oauth");
        Ok(fresh_oauth("refreshed-token"))
    }
}

#[derive(Default)]
pub struct MockLogs {
    stored: Mutex<BTreeMap<String, String>>,
}

impl MockLogs {
    /// Contents stored under `purpose`
    pub fn stored(&self, purpose: &str) -> Option<String> {
        self.stored.lock().unwrap().get(purpose).cloned()
    }
}

#[async_trait]
impl LogStore for MockLogs {
    async fn store(&self, _task_id: &str, purpose: &str, contents: &str) -> Result<()> {
        self.stored
            .lock()
            .unwrap()
            .entry(purpose.to_string())
            .or_default()
            .push_str(contents);
        Ok(())
    }
}

pub struct MockPayloads {
    payload: Payload,
}

#[async_trait]
impl PayloadManager for MockPayloads {
    async fn fetch_payload(&self, _address: &str) -> Result<Payload> {
        Ok(self.payload.clone())
    }

    fn validate_payload(&self, _payload: &Payload) -> Result<()> {
        Ok(())
    }
}

pub struct MockSecrets {
    oauth: Mutex<Oauth>,
    secrets: Secrets,
}

impl MockSecrets {
    pub fn expire_token(&self) {
        let mut oauth = self.oauth.lock().unwrap();
        oauth.expiry = chrono::Utc::now() - chrono::Duration::hours(1);
        oauth.refresh_token = "refresh".to_string();
    }
}

#[async_trait]
impl SecretParser for MockSecrets {
    async fn get_oauth_secret(&self, _path: &Path) -> Result<Oauth> {
        Ok(self.oauth.lock().unwrap().clone())
    }

    async fn get_repo_secrets(&self, _path: &Path) -> Result<Secrets> {
        Ok(self.secrets.clone())
    }
}

pub struct MockGit {
    recorder: Recorder,
    clone_fails: Mutex<bool>,
}

impl MockGit {
    pub fn fail_clone(&self) {
        *self.clone_fails.lock().unwrap() = true;
    }
}

#[async_trait]
impl GitManager for MockGit {
    async fn clone_repo(&self, payload: &Payload, _oauth: &Oauth) -> Result<()> {
        self.recorder.record(format!("clone:{}", payload.repo_link));
        if *self.clone_fails.lock().unwrap() {
            return Err(anyhow!("authentication failed"));
        }
        Ok(())
    }
}

pub struct MockCoverage {
    recorder: Recorder,
}

#[async_trait]
impl CoverageService for MockCoverage {
    async fn merge_and_upload(&self, payload: &Payload) -> Result<()> {
        self.recorder.record(format!("coverage:{}", payload.build_id));
        Ok(())
    }
}

fn fresh_oauth(token: &str) -> Oauth {
    Oauth {
        access_token: token.to_string(),
        expiry: chrono::Utc::now() + chrono::Duration::hours(1),
        refresh_token: String::new(),
        token_type: "Bearer".to_string(),
    }
}

fn payload(event: &str) -> Payload {
    serde_json::from_value(serde_json::json!({
        "repo_link": "https://github.com/acme/app",
        "repo_slug": "acme/app",
        "git_provider": "github",
        "build_id": "build-1",
        "repo_id": "repo-1",
        "org_id": "org-1",
        "task_id": "task-1",
        "branch_name": "main",
        "tas_file_name": ".tas.yml",
        "build_target_commit": "def456",
        "build_base_commit": "abc123",
        "event_type": event,
        "commits": [{ "Sha": "def456" }],
    }))
    .unwrap()
}

/// A temporary workspace wired to in-memory collaborators
pub struct Harness {
    _dir: TempDir,
    secrets_dir: PathBuf,
    pub layout: WorkspaceLayout,
    pub recorder: Recorder,
    pub executor: Arc<MockExecutor>,
    pub cache: Arc<MockCache>,
    pub diff: Arc<MockDiff>,
    pub blocklist: Arc<MockBlocklist>,
    pub discovery: Arc<MockDiscovery>,
    pub execution: Arc<MockExecution>,
    pub tasks: Arc<MockTasks>,
    pub logs: Arc<MockLogs>,
    pub secrets: Arc<MockSecrets>,
    pub git: Arc<MockGit>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home_dir = dir.path().join("home");
        let secrets_dir = dir.path().join("secrets");
        let layout = WorkspaceLayout::new(&home_dir, &secrets_dir);
        std::fs::create_dir_all(layout.repo_dir()).unwrap();
        std::fs::write(
            layout.repo_dir().join("package.json"),
            r#"{"name":"app","version":"1.0.0"}"#,
        )
        .unwrap();

        let recorder = Recorder::default();
        Self {
            _dir: dir,
            secrets_dir,
            layout,
            executor: Arc::new(MockExecutor::new(recorder.clone())),
            cache: Arc::new(MockCache {
                recorder: recorder.clone(),
                upload_fails: Mutex::new(false),
            }),
            diff: Arc::new(MockDiff {
                outcome: Mutex::new(DiffOutcome::Found(Diff::new())),
            }),
            blocklist: Arc::new(MockBlocklist {
                recorder: recorder.clone(),
            }),
            discovery: Arc::new(MockDiscovery {
                recorder: recorder.clone(),
                seen: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                panics: Mutex::new(false),
            }),
            execution: Arc::new(MockExecution {
                recorder: recorder.clone(),
                seen: Mutex::new(Vec::new()),
                response: Mutex::new(TaskStatus::Passed),
                runs_fail: Mutex::new(false),
            }),
            tasks: Arc::new(MockTasks {
                recorder: recorder.clone(),
                statuses: Mutex::new(Vec::new()),
            }),
            logs: Arc::new(MockLogs::default()),
            secrets: Arc::new(MockSecrets {
                oauth: Mutex::new(fresh_oauth("token")),
                secrets: Secrets::from([("KEY".to_string(), "s3cr3t".to_string())]),
            }),
            git: Arc::new(MockGit {
                recorder: recorder.clone(),
                clone_fails: Mutex::new(false),
            }),
            recorder,
            cancel: CancellationToken::new(),
        }
    }

    pub fn tas_path(&self) -> PathBuf {
        self.layout.repo_dir().join(".tas.yml")
    }

    pub fn write_config(&self, yaml: &str) {
        std::fs::write(self.tas_path(), yaml).unwrap();
    }

    pub fn settings(&self) -> DriverSettings {
        DriverSettings {
            layout: self.layout.clone(),
            max_parallel_submodules: 2,
            consecutive_runs: 3,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            tas_config: Arc::new(YamlTasConfigManager::new(self.layout.repo_dir())),
            executor: self.executor.clone(),
            cache: self.cache.clone(),
            diff: self.diff.clone(),
            blocklist: self.blocklist.clone(),
            discovery: self.discovery.clone(),
            execution: self.execution.clone(),
            tasks: self.tasks.clone(),
            logs: self.logs.clone(),
        }
    }

    pub fn builder(&self) -> Builder {
        Builder::new(self.collaborators(), self.settings())
    }

    /// Context and running status for a task triggered by `event`
    pub fn context(&self, event: &str, task_type: TaskType) -> (TaskContext, TaskPayload) {
        let payload = Arc::new(payload(event));
        let env = TaskEnv::for_task(
            &payload,
            Path::new(""),
            &self.layout.repo_dir(),
            "test",
            "http://localhost:9876",
        );
        let status = TaskPayload::running(&payload, task_type);
        let ctx = TaskContext::new(
            payload,
            Arc::new(fresh_oauth("token")),
            PathBuf::new(),
            Arc::new(Secrets::from([("KEY".to_string(), "s3cr3t".to_string())])),
            env,
        );
        (ctx, status)
    }

    /// Pipeline for a push payload, configured with `flags`
    pub fn pipeline(&self, flags: &[&str]) -> Pipeline {
        let home_dir = self.layout.home_dir().to_string_lossy().to_string();
        let secrets_dir = self.secrets_dir.to_string_lossy().to_string();
        let mut argv = vec![
            "nucleus",
            "--payload-address",
            "payload.json",
            "--home-dir",
            home_dir.as_str(),
            "--secrets-dir",
            secrets_dir.as_str(),
            "--consecutive-runs",
            "3",
            "--max-parallel-submodules",
            "2",
        ];
        argv.extend_from_slice(flags);
        let config = Config::from_cli(Cli::try_parse_from(argv).unwrap()).unwrap();

        let services = PipelineServices {
            payloads: Arc::new(MockPayloads {
                payload: payload("push"),
            }),
            secrets: self.secrets.clone(),
            git: self.git.clone(),
            coverage: Arc::new(MockCoverage {
                recorder: self.recorder.clone(),
            }),
        };
        Pipeline::new(config, self.collaborators(), services, self.cancel.clone())
    }
}
