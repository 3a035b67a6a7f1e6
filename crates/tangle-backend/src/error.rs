use std::{
    borrow::Cow,
    cell::{Ref, RefCell},
    fmt::Display,
};

pub type Error = Cow<'static, str>;

/// A grammar compilation problem, attributed to a rule when there is one.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub rule: Option<String>,
    pub message: Error,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "rule `{rule}`: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Default)]
pub struct ErrorAccumulator {
    errors: RefCell<Vec<Diagnostic>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn error_static(&self, rule: &str, err: &'static str) {
        self.push(Some(rule), err.into());
    }
    pub fn error(&self, rule: &str, err: impl ToString) {
        self.push(Some(rule), err.to_string().into());
    }
    pub fn error_global(&self, err: impl ToString) {
        self.push(None, err.to_string().into());
    }
    fn push(&self, rule: Option<&str>, message: Error) {
        self.errors.borrow_mut().push(Diagnostic {
            rule: rule.map(str::to_owned),
            message,
        });
    }
    pub fn get(&self) -> Ref<Vec<Diagnostic>> {
        self.errors.borrow()
    }
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }
    pub fn finish(self) -> Result<(), CompileErrors> {
        let diagnostics = self.errors.into_inner();
        match diagnostics.is_empty() {
            true => Ok(()),
            false => Err(CompileErrors { diagnostics }),
        }
    }
}

/// Every diagnostic of a failed compilation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompileErrors {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileErrors {
    /// Whether some diagnostic is attributed to `rule` and mentions `needle`.
    pub fn mentions(&self, rule: &str, needle: &str) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.rule.as_deref() == Some(rule) && d.message.contains(needle))
    }
}

impl Display for CompileErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "grammar compilation failed:")?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}
