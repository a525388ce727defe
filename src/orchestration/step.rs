//! Step definitions.
//!
//! The argument contract of a handler is declared when the step is built,
//! by choosing one of the [`StepHandler`] variants.

use std::fmt;

/// Handler contract of a step.
pub enum StepHandler<C> {
    NoArgs(Box<dyn FnOnce() -> anyhow::Result<()>>),
    /// Receives the step's 1-based number. Used by meta and debug steps.
    WithStepNumber(Box<dyn FnOnce(usize) -> anyhow::Result<()>>),
    /// Receives a connection opened for this step only. The runner closes it
    /// afterwards whatever the outcome.
    WithConnection(Box<dyn FnOnce(&mut C) -> anyhow::Result<()>>),
}

impl<C> StepHandler<C> {
    pub fn kind(&self) -> &'static str {
        match self {
            StepHandler::NoArgs(_) => "no_args",
            StepHandler::WithStepNumber(_) => "with_step_number",
            StepHandler::WithConnection(_) => "with_connection",
        }
    }
}

impl<C> fmt::Debug for StepHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// One named stage of a pipeline. Its number is its position in the list
/// handed to the runner.
#[derive(Debug)]
pub struct Step<C> {
    name: String,
    doc: String,
    handler: StepHandler<C>,
}

impl<C> Step<C> {
    pub fn new(name: impl Into<String>, doc: impl Into<String>, handler: StepHandler<C>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            handler,
        }
    }

    pub fn no_args<F>(name: impl Into<String>, doc: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + 'static,
    {
        Self::new(name, doc, StepHandler::NoArgs(Box::new(handler)))
    }

    pub fn with_step_number<F>(name: impl Into<String>, doc: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce(usize) -> anyhow::Result<()> + 'static,
    {
        Self::new(name, doc, StepHandler::WithStepNumber(Box::new(handler)))
    }

    pub fn with_connection<F>(name: impl Into<String>, doc: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce(&mut C) -> anyhow::Result<()> + 'static,
    {
        Self::new(name, doc, StepHandler::WithConnection(Box::new(handler)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    /// First paragraph of the doc text, lines joined by spaces. `None` when
    /// the doc is blank.
    pub fn description(&self) -> Option<String> {
        let paragraph: Vec<&str> = self
            .doc
            .trim()
            .lines()
            .map(str::trim)
            .take_while(|line| !line.is_empty())
            .collect();
        if paragraph.is_empty() {
            None
        } else {
            Some(paragraph.join(" "))
        }
    }

    /// Display name for generated docs: `step_merge_chunks` becomes `MergeChunks`.
    pub fn doc_name(&self) -> String {
        let base = self.name.strip_prefix("step_").unwrap_or(&self.name);
        base.split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect()
    }

    /// Markdown list entry for generated docs.
    pub fn doc_markdown(&self) -> String {
        let body = self
            .doc
            .replace('\t', "")
            .trim()
            .lines()
            .map(|line| format!("     {}", line.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        format!("1. **{}**\n\n{}\n", self.doc_name(), body)
    }

    pub(crate) fn into_handler(self) -> StepHandler<C> {
        self.handler
    }
}
