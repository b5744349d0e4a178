//! Live editing: debounced rebuilds feeding a running surface.

use std::time::Instant;

use debounce::Debouncer;
use diagnostics::{CompileDiagnostic, Locale};
use engineconfig::PreviewConfig;
use tracing::{debug, warn};

use crate::compile::BuildFailure;
use crate::gpu::{CompiledProgram, PreviewSurface};
use crate::types::ShaderSource;

/// Something that can build programs and swap them in.
pub trait ProgramSink {
    type Program;

    fn build(&mut self, source: &ShaderSource) -> Result<Self::Program, BuildFailure>;

    fn install(&mut self, program: Self::Program);
}

impl ProgramSink for PreviewSurface {
    type Program = CompiledProgram;

    fn build(&mut self, source: &ShaderSource) -> Result<CompiledProgram, BuildFailure> {
        self.build_program(source)
    }

    fn install(&mut self, program: CompiledProgram) {
        self.install_program(program);
    }
}

/// Result of one compile attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileAttempt {
    pub generation: u64,
    /// `None` when the source compiled and was installed.
    pub diagnostic: Option<CompileDiagnostic>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl CompileAttempt {
    pub fn succeeded(&self) -> bool {
        self.diagnostic.is_none() && self.diagnostics.is_empty()
    }
}

#[derive(Debug)]
pub struct LiveShader {
    debouncer: Debouncer<ShaderSource>,
    locale: Locale,
}

impl LiveShader {
    pub fn new(config: &PreviewConfig) -> Self {
        Self {
            debouncer: Debouncer::from_config(config),
            locale: Locale::from_tag(&config.locale),
        }
    }

    pub fn with_debouncer(debouncer: Debouncer<ShaderSource>, locale: Locale) -> Self {
        Self { debouncer, locale }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn set_locale(&mut self, locale: Locale) {
        self.locale = locale;
    }

    pub fn last_attempt_failed(&self) -> bool {
        self.debouncer.last_attempt_failed()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Records an edit. Nothing compiles until the quiet interval passes.
    pub fn edit(&mut self, source: ShaderSource, now: Instant) {
        self.debouncer.on_source_changed(source, now);
    }

    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }

    /// Compiles the pending edit once it has settled. A superseded build yields `None`.
    pub fn poll<S: ProgramSink>(&mut self, now: Instant, sink: &mut S) -> Option<CompileAttempt> {
        let ticket = self.debouncer.poll(now)?;
        self.attempt(ticket.generation, &ticket.value, sink)
    }

    /// Compiles `source` immediately, replacing any pending edit.
    pub fn compile_now<S: ProgramSink>(
        &mut self,
        source: ShaderSource,
        now: Instant,
        sink: &mut S,
    ) -> Option<CompileAttempt> {
        self.debouncer.on_source_changed(source, now);
        let ticket = self.debouncer.flush()?;
        self.attempt(ticket.generation, &ticket.value, sink)
    }

    fn attempt<S: ProgramSink>(
        &mut self,
        generation: u64,
        source: &ShaderSource,
        sink: &mut S,
    ) -> Option<CompileAttempt> {
        let outcome = sink.build(source);
        if let Err(err) = self.debouncer.record_outcome(generation, outcome.is_ok()) {
            debug!(error = %err, "dropping superseded build");
            return None;
        }
        let attempt = match outcome {
            Ok(program) => {
                sink.install(program);
                debug!(generation, "program installed");
                CompileAttempt {
                    generation,
                    diagnostic: None,
                    diagnostics: Vec::new(),
                }
            }
            Err(failure) => {
                let all = failure.diagnostics(self.locale);
                let diagnostic = diagnostics::primary(&all).cloned();
                warn!(
                    generation,
                    kind = diagnostic.as_ref().map(|d| d.kind.id()),
                    error = %failure,
                    "compile failed; keeping previous program"
                );
                CompileAttempt {
                    generation,
                    diagnostic,
                    diagnostics: all,
                }
            }
        };
        Some(attempt)
    }
}
