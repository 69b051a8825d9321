//! Framework runner invocations
//!
//! Every framework ships a runner program speaking the same command-line protocol
//! (`--command discover|execute`, `--pattern`, `--config`, ...). Java runners are
//! packaged as a jar and additionally need the framework version.

use nucleus_core::domain::tas::{Framework, Language};

pub const ARG_COMMAND: &str = "--command";
pub const ARG_PATTERN: &str = "--pattern";
pub const ARG_CONFIG: &str = "--config";
pub const ARG_DIFF: &str = "--diff";
pub const ARG_LOCATOR: &str = "--locator-file";
pub const ARG_FRAMEWORK_VERSION: &str = "--frameworkVersion";

const JAVA_RUNNER_JAR: &str = "/test-at-scale-java.jar";

/// Program plus leading arguments for one runner command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl RunnerInvocation {
    /// Starts an invocation of `command` for `framework`
    pub fn new(framework: Framework, framework_version: Option<u32>, command: &str) -> Self {
        let mut args = Vec::new();
        if framework.language() == Language::Java {
            args.push("-jar".to_string());
            args.push(JAVA_RUNNER_JAR.to_string());
        }
        args.push(ARG_COMMAND.to_string());
        args.push(command.to_string());
        if framework.language() == Language::Java {
            if let Some(version) = framework_version {
                args.push(ARG_FRAMEWORK_VERSION.to_string());
                args.push(version.to_string());
            }
        }

        Self {
            program: framework.runner().to_string(),
            args,
        }
    }

    pub fn arg(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    pub fn flag(&mut self, flag: &str) -> &mut Self {
        self.args.push(flag.to_string());
        self
    }

    /// Appends `--config` (when set) and one `--pattern` per pattern
    pub fn with_targets(&mut self, config_file: Option<&str>, patterns: &[String]) -> &mut Self {
        if let Some(config) = config_file.filter(|c| !c.is_empty()) {
            self.arg(ARG_CONFIG, config);
        }
        for pattern in patterns {
            self.arg(ARG_PATTERN, pattern.as_str());
        }
        self
    }

    /// Wraps the runner in `nyc` so istanbul collects coverage
    pub fn under_nyc(self) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "nyc".to_string(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_javascript_invocation() {
        let mut inv = RunnerInvocation::new(Framework::Mocha, None, "discover");
        inv.with_targets(Some(".mocharc.yml"), &["test/**/*.js".to_string()]);
        assert_eq!(inv.program, "./node_modules/.bin/mocha-runner");
        assert_eq!(
            inv.args,
            vec!["--command", "discover", "--config", ".mocharc.yml", "--pattern", "test/**/*.js"]
        );
    }

    #[test]
    fn test_java_invocation() {
        let inv = RunnerInvocation::new(Framework::Junit, Some(5), "execute");
        assert_eq!(inv.program, "java");
        assert_eq!(
            inv.args,
            vec![
                "-jar",
                "/test-at-scale-java.jar",
                "--command",
                "execute",
                "--frameworkVersion",
                "5"
            ]
        );
    }

    #[test]
    fn test_under_nyc() {
        let inv = RunnerInvocation::new(Framework::Jasmine, None, "execute").under_nyc();
        assert_eq!(inv.program, "nyc");
        assert_eq!(inv.args[0], "./node_modules/.bin/jasmine-runner");
        assert_eq!(inv.args[1], "--command");
    }
}
