//! In-process runtime for tests: each image is answered by a closure.

use super::{ExecOutput, Invocation, Runtime};
use crate::error::{Error, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub image: String,
    pub args: Vec<String>,
    pub stdin: Value,
}

impl Call {
    /// First argument, which is the action name unless args were overridden.
    pub fn action(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

type Handler = Box<dyn Fn(&Call) -> ExecOutput>;

#[derive(Default)]
pub struct ScriptedRuntime {
    plugins: HashMap<String, Handler>,
    calls: RefCell<Vec<Call>>,
    pulls: RefCell<Vec<String>>,
    unreachable: bool,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn plugin(mut self, image: &str, handler: impl Fn(&Call) -> ExecOutput + 'static) -> Self {
        self.plugins.insert(image.to_string(), Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// `image action` strings for every call, in order.
    pub fn trace(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| format!("{} {}", c.image, c.action()))
            .collect()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.pulls.borrow().clone()
    }
}

/// Successful JSON reply.
pub fn reply(doc: Value) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: doc.to_string(),
        stderr: String::new(),
    }
}

/// Successful free-form reply.
pub fn text(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Failed reply.
pub fn fail(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl Runtime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    fn check(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::Runtime("scripted runtime is unreachable".into()));
        }
        Ok(())
    }

    fn pull(&self, image: &str) -> Result<()> {
        self.pulls.borrow_mut().push(image.to_string());
        Ok(())
    }

    fn run(&self, invocation: &Invocation<'_>) -> Result<ExecOutput> {
        let call = Call {
            image: invocation.image.to_string(),
            args: invocation.args.to_vec(),
            stdin: serde_json::from_slice(invocation.stdin).unwrap_or(Value::Null),
        };
        self.calls.borrow_mut().push(call.clone());
        let handler = self
            .plugins
            .get(invocation.image)
            .ok_or_else(|| Error::Runtime(format!("no scripted plugin for {}", invocation.image)))?;
        Ok(handler(&call))
    }
}
