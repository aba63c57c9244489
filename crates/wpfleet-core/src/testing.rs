//! Test doubles shared by the unit tests.

use crate::error::Result;
use crate::executor::{CommandOutput, CommandSpec, ProcessExecutor};
use std::cell::RefCell;

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutput>;

/// Records every command and answers from scripted rules.
///
/// A rule matches when its pattern is a substring of the rendered command
/// line. The most recently added matching rule wins; unmatched commands
/// succeed with empty output.
pub(crate) struct MockExecutor {
    calls: RefCell<Vec<CommandSpec>>,
    rules: RefCell<Vec<(String, Handler)>>,
    missing: Vec<String>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            rules: RefCell::new(Vec::new()),
            missing: Vec::new(),
        }
    }

    /// Pretend these programs are not installed.
    pub fn without(mut self, programs: &[&str]) -> Self {
        self.missing = programs.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.on(pattern, move |_| output.clone());
    }

    pub fn on(&self, pattern: &str, handler: impl Fn(&CommandSpec) -> CommandOutput + 'static) {
        self.rules
            .borrow_mut()
            .push((pattern.to_string(), Box::new(handler)));
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// Index of the first command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }
}

impl ProcessExecutor for MockExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(cmd.clone());
        let line = cmd.to_string();
        let rules = self.rules.borrow();
        let output = rules
            .iter()
            .rev()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, handler)| handler(cmd))
            .unwrap_or_default();
        Ok(output)
    }

    fn is_available(&self, program: &str) -> bool {
        !self.missing.iter().any(|m| m == program)
    }
}
