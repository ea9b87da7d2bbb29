//! Agent Driver Registry (spec.md §4.3): one driver per agent family, each
//! a bundle of pure data describing how to invoke and resume a black-box
//! agent binary.

pub mod stream;

use std::collections::HashMap;

/// Pure-data description of one agent family's invocation convention.
#[derive(Debug, Clone)]
pub struct DriverDefinition {
    pub name: &'static str,
    pub command: &'static str,
    pub default_args: Vec<&'static str>,
    pub prompt_args: Vec<&'static str>,
    pub default_env: Vec<(&'static str, &'static str)>,
    pub model_arg: Option<&'static str>,
    pub supports_resume: bool,
}

impl DriverDefinition {
    /// `[command] + defaultArgs + (modelArg? [modelArg, model] : []) +
    /// promptArgs + [prompt]` (spec.md §4.4 step 2). Positional-prompt
    /// drivers declare an empty `prompt_args`, so the prompt still lands
    /// last.
    pub fn build_argv(&self, model: Option<&str>, prompt: &str) -> Vec<String> {
        let mut argv: Vec<String> = vec![self.command.to_string()];
        argv.extend(self.default_args.iter().map(|s| s.to_string()));
        if let (Some(flag), Some(model)) = (self.model_arg, model) {
            argv.push(flag.to_string());
            argv.push(model.to_string());
        }
        argv.extend(self.prompt_args.iter().map(|s| s.to_string()));
        argv.push(prompt.to_string());
        argv
    }

    /// Resume argv for a driver that supports it (spec.md §4.3
    /// `resumeArgs`/`resumeCommand`).
    pub fn resume_argv(&self, session_id: &str) -> Option<Vec<String>> {
        if !self.supports_resume {
            return None;
        }
        Some(vec![self.command.to_string(), "--resume".to_string(), session_id.to_string()])
    }

    /// Resume-with-new-prompt argv (spec.md §4.3 `resumeWithPromptCommand`).
    pub fn resume_with_prompt_argv(&self, session_id: &str, prompt: &str) -> Option<Vec<String>> {
        let mut argv = self.resume_argv(session_id)?;
        argv.push(prompt.to_string());
        Some(argv)
    }
}

fn claude_driver() -> DriverDefinition {
    DriverDefinition {
        name: "claude",
        command: "claude",
        default_args: vec!["--print", "--output-format", "stream-json", "--verbose"],
        prompt_args: vec![],
        default_env: vec![],
        model_arg: Some("--model"),
        supports_resume: true,
    }
}

fn cursor_agent_driver() -> DriverDefinition {
    DriverDefinition {
        name: "cursor-agent",
        command: "cursor-agent",
        default_args: vec!["--output-format", "stream-json"],
        prompt_args: vec!["-p"],
        default_env: vec![],
        model_arg: Some("--model"),
        supports_resume: false,
    }
}

fn opencode_driver() -> DriverDefinition {
    DriverDefinition {
        name: "opencode",
        command: "opencode",
        default_args: vec!["run", "--print-logs"],
        prompt_args: vec![],
        default_env: vec![],
        model_arg: Some("--model"),
        supports_resume: false,
    }
}

fn amp_driver() -> DriverDefinition {
    DriverDefinition {
        name: "amp",
        command: "amp",
        default_args: vec!["--stream-json"],
        prompt_args: vec!["-x"],
        default_env: vec![],
        model_arg: None,
        supports_resume: false,
    }
}

fn codex_driver() -> DriverDefinition {
    DriverDefinition {
        name: "codex",
        command: "codex",
        default_args: vec!["exec", "--json"],
        prompt_args: vec![],
        default_env: vec![],
        model_arg: Some("--model"),
        supports_resume: true,
    }
}

/// Keyed by canonical driver name (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    drivers: HashMap<&'static str, DriverDefinition>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut drivers = HashMap::new();
        for driver in [
            claude_driver(),
            cursor_agent_driver(),
            opencode_driver(),
            amp_driver(),
            codex_driver(),
        ] {
            drivers.insert(driver.name, driver);
        }
        Self { drivers }
    }
}

impl DriverRegistry {
    pub fn get(&self, name: &str) -> Option<&DriverDefinition> {
        self.drivers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_argv_places_model_and_prompt_correctly() {
        let registry = DriverRegistry::default();
        let driver = registry.get("claude").unwrap();
        let argv = driver.build_argv(Some("claude-sonnet-4"), "do the thing");
        assert_eq!(
            argv,
            vec![
                "claude",
                "--print",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "claude-sonnet-4",
                "do the thing",
            ]
        );
    }

    #[test]
    fn amp_has_no_model_arg_but_has_prompt_flag() {
        let registry = DriverRegistry::default();
        let driver = registry.get("amp").unwrap();
        let argv = driver.build_argv(None, "prompt text");
        assert_eq!(argv, vec!["amp", "--stream-json", "-x", "prompt text"]);
    }

    #[test]
    fn resume_argv_absent_for_non_resumable_driver() {
        let registry = DriverRegistry::default();
        let driver = registry.get("cursor-agent").unwrap();
        assert!(driver.resume_argv("session-1").is_none());
    }

    #[test]
    fn resume_with_prompt_appends_prompt_after_resume_args() {
        let registry = DriverRegistry::default();
        let driver = registry.get("claude").unwrap();
        let argv = driver.resume_with_prompt_argv("session-1", "continue").unwrap();
        assert_eq!(argv, vec!["claude", "--resume", "session-1", "continue"]);
    }

    #[test]
    fn unknown_driver_name_is_none() {
        let registry = DriverRegistry::default();
        assert!(registry.get("nonexistent").is_none());
    }
}
