//! Deploy pipeline domain types
//!
//! The deploy pipeline is a state machine with explicit stages; each one
//! reports a start line to the caller and ends with a [`StageResult`] that
//! is both logged and rendered as the stage's closing line.

use std::time::Duration;

use super::app::App;

/// Stages of a deploy, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStage {
    PermissionCheck,
    /// Procfile, nginx.conf and teresa.yaml from the tarball
    ConfigExtraction,
    Build,
    /// Procfile `release` entry, only when present
    ReleaseCommand,
    ApplyDeploy,
    /// Service and ingress, web apps only
    Expose,
    /// Wait for the rolling update of a deployment to settle
    RolloutMonitor,
}

impl DeployStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PermissionCheck => "Permission check",
            Self::ConfigExtraction => "Config extraction",
            Self::Build => "Build",
            Self::ReleaseCommand => "Release command",
            Self::ApplyDeploy => "Apply deploy",
            Self::Expose => "Expose",
            Self::RolloutMonitor => "Rollout monitor",
        }
    }

    /// Line written to the caller when the stage starts
    pub fn start_line(&self, app: &str) -> String {
        match self {
            Self::PermissionCheck => format!("Checking permissions on {}", app),
            Self::ConfigExtraction => "Reading config files".to_string(),
            Self::Build => "Building app".to_string(),
            Self::ReleaseCommand => "Running release command".to_string(),
            Self::ApplyDeploy => format!("Deploying {}", app),
            Self::Expose => format!("Exposing {}", app),
            Self::RolloutMonitor => "Monitoring rolling update...(hit Ctrl-C to quit)".to_string(),
        }
    }

    /// Line written to the caller when the stage ends cleanly
    pub fn done_line(&self, app: &str) -> String {
        match self {
            Self::PermissionCheck => format!("Permission granted on {}", app),
            Self::ConfigExtraction => "Config files read".to_string(),
            Self::Build => "Build finished".to_string(),
            Self::ReleaseCommand => "Release command finished".to_string(),
            Self::ApplyDeploy => format!("{} applied", app),
            Self::Expose => format!("{} exposed", app),
            Self::RolloutMonitor => "Rolling update finished successfully".to_string(),
        }
    }

    /// Stages that run for `app`.
    ///
    /// Cron jobs never run a release command, are never exposed and have no
    /// rolling update to watch.
    pub fn plan(app: &App, release: bool, monitor: bool) -> Vec<Self> {
        let cron = app.is_cron();
        let mut stages = vec![Self::PermissionCheck, Self::ConfigExtraction, Self::Build];
        if release && !cron {
            stages.push(Self::ReleaseCommand);
        }
        stages.push(Self::ApplyDeploy);
        if app.is_web() && !cron {
            stages.push(Self::Expose);
        }
        if monitor && !cron {
            stages.push(Self::RolloutMonitor);
        }
        stages
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Done,
    /// Finished, but something the caller should know about went wrong
    Warning(String),
    Failed(String),
}

/// Result of one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub stage: DeployStage,
    pub duration: Duration,
    pub outcome: StageOutcome,
}

impl StageResult {
    pub fn success(stage: DeployStage, duration: Duration) -> Self {
        Self {
            stage,
            duration,
            outcome: StageOutcome::Done,
        }
    }

    pub fn warning(stage: DeployStage, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            stage,
            duration,
            outcome: StageOutcome::Warning(message.into()),
        }
    }

    /// `message` reaches the caller, keep it free of internal detail
    pub fn failure(stage: DeployStage, duration: Duration, message: impl Into<String>) -> Self {
        Self {
            stage,
            duration,
            outcome: StageOutcome::Failed(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, StageOutcome::Failed(_))
    }

    /// Closing line of the stage
    pub fn line(&self, app: &str) -> String {
        match &self.outcome {
            StageOutcome::Done => self.stage.done_line(app),
            StageOutcome::Warning(message) => format!("Warning: {}", message),
            StageOutcome::Failed(message) => failure_line(self.stage, message),
        }
    }
}

/// Caller inputs of a deploy besides the tarball
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    pub app_name: String,
    /// Recorded as the change cause of the new revision
    pub description: String,
}

impl DeployOptions {
    pub fn new(app_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            description: description.into(),
        }
    }
}

/// Final line of a successful deploy
pub fn success_line(app: &str) -> String {
    format!("The app {} has been successfully deployed", app)
}

/// Final line of a successful cron job deploy
pub fn cron_success_line(app: &str) -> String {
    format!("The CronJob {} has been successfully deployed", app)
}

/// Last line of a failed deploy
pub fn failure_line(stage: DeployStage, error: &str) -> String {
    format!("Deploy failed at {}: {}", stage.name().to_lowercase(), error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web() -> App {
        App::new("myapp", "luizalabs")
    }

    #[test]
    fn test_plan_web_with_release() {
        let stages = DeployStage::plan(&web(), true, true);
        assert_eq!(
            stages,
            vec![
                DeployStage::PermissionCheck,
                DeployStage::ConfigExtraction,
                DeployStage::Build,
                DeployStage::ReleaseCommand,
                DeployStage::ApplyDeploy,
                DeployStage::Expose,
                DeployStage::RolloutMonitor,
            ]
        );
        assert!(!DeployStage::plan(&web(), false, false).contains(&DeployStage::RolloutMonitor));
    }

    #[test]
    fn test_plan_worker_skips_expose() {
        let worker = web().with_process_type("worker");
        let stages = DeployStage::plan(&worker, true, true);
        assert!(!stages.contains(&DeployStage::Expose));
        assert!(stages.contains(&DeployStage::ReleaseCommand));
        assert!(stages.contains(&DeployStage::RolloutMonitor));
    }

    #[test]
    fn test_plan_cron_ignores_release_and_monitor() {
        let cron = web().with_process_type("cron");
        assert_eq!(
            DeployStage::plan(&cron, true, true),
            vec![
                DeployStage::PermissionCheck,
                DeployStage::ConfigExtraction,
                DeployStage::Build,
                DeployStage::ApplyDeploy,
            ]
        );
    }

    #[test]
    fn test_lines() {
        assert_eq!(
            success_line("myapp"),
            "The app myapp has been successfully deployed"
        );
        assert_eq!(
            failure_line(DeployStage::ReleaseCommand, "Release command failed"),
            "Deploy failed at release command: Release command failed"
        );
        assert_eq!(DeployStage::Build.done_line("myapp"), "Build finished");
    }

    #[test]
    fn test_stage_result_lines() {
        let d = Duration::from_millis(10);
        let done = StageResult::success(DeployStage::Expose, d);
        assert_eq!(done.line("myapp"), "myapp exposed");
        assert!(!done.is_failure());

        let warned = StageResult::warning(DeployStage::Expose, d, "no quota");
        assert_eq!(warned.line("myapp"), "Warning: no quota");

        let failed = StageResult::failure(DeployStage::Build, d, "Build failed");
        assert!(failed.is_failure());
        assert_eq!(failed.line("myapp"), "Deploy failed at build: Build failed");
    }
}
