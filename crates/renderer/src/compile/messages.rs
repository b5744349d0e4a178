//! Formats compiler output as glslang-style lines against the user's source.
//!
//! Everything leaving this module reads `ERROR: 0:<line>: <text>` with the
//! wrapper's internal names rewritten back to what the learner typed, which is
//! the shape the `diagnostics` table classifies.

use std::error::Error as _;

use wgpu::naga::front::glsl::{ErrorKind, ParseErrors};
use wgpu::naga::valid::ValidationError;
use wgpu::naga::{Span, WithSpan};

use super::wrap::WrappedStage;

/// Formats one message; `None` becomes glslang's file-scope line 0.
pub fn located(line: Option<u32>, body: &str) -> String {
    format!("ERROR: 0:{}: {}", line.unwrap_or(0), user_facing(body))
}

/// Rewrites wrapper identifiers to the names used in the user's code.
pub fn user_facing(text: &str) -> String {
    text.replace("shaderlab_user_main", "main")
        .replace("shaderlab_FragColor", "gl_FragColor")
        .replace("shaderlab_FragCoord", "gl_FragCoord")
        .replace("shaderlab_params._", "")
        .replace("shaderlab_builtins._", "")
}

fn user_line(span: Span, wrapped: &WrappedStage) -> Option<u32> {
    if !span.is_defined() {
        return None;
    }
    wrapped.user_line(span.location(&wrapped.source).line_number)
}

pub fn parse_messages(errors: &ParseErrors, wrapped: &WrappedStage) -> Vec<String> {
    errors
        .errors
        .iter()
        .map(|error| located(user_line(error.meta, wrapped), &describe_parse_error(&error.kind)))
        .collect()
}

fn describe_parse_error(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::EndOfFile => "'' : syntax error, unexpected end of file".to_string(),
        ErrorKind::InvalidToken(..) => format!("syntax error: {}", user_facing(&kind.to_string())),
        ErrorKind::UnknownVariable(name) => format!("'{}' : undeclared identifier", user_facing(name)),
        ErrorKind::VariableAlreadyDeclared(name) => format!("'{}' : redefinition", user_facing(name)),
        ErrorKind::SemanticError(message) => describe_semantic(message),
        other => describe_semantic(&other.to_string()),
    }
}

/// Appends the glslang phrase for naga wording the classifier would miss.
fn describe_semantic(message: &str) -> String {
    let message = user_facing(message);
    let lowered = message.to_ascii_lowercase();
    let has = |needle: &str| lowered.contains(needle);

    if has("literal is infinite") || has("literal is nan") {
        return format!("{message} : division by zero");
    }
    if has("unknown function") {
        if has("'main'") {
            return "'main' : missing entry point".to_string();
        }
        return format!("{message} : no matching overloaded function found");
    }
    if has("already") && (has("defined") || has("declared")) {
        return format!("{message} : redefinition");
    }
    if has("argument count") || (has("expects") && has("component")) {
        return format!("{message} : wrong number of arguments");
    }
    if has("doesn't match") || has("does not match") {
        return format!("{message} : type mismatch");
    }
    if has("argument") {
        return format!("{message} : wrong number of arguments");
    }
    if ["type", "cannot apply", "can't apply", "cannot convert", "can't work with", "mismatch"]
        .iter()
        .any(|needle| has(needle))
    {
        return format!("{message} : type mismatch");
    }
    message
}

/// Flattens a validation error and its causes into one line.
pub fn validation_message(error: &WithSpan<ValidationError>, wrapped: &WrappedStage) -> String {
    let line = error
        .spans()
        .find_map(|(span, _)| user_line(*span, wrapped));

    let inner = error.as_inner();
    let mut text = inner.to_string();
    let mut cause = inner.source();
    while let Some(current) = cause {
        text.push_str(": ");
        text.push_str(&current.to_string());
        cause = current.source();
    }
    located(line, &describe_semantic(&text))
}

/// Remaps a shaderc log (`user.frag:12: error: ...`) onto user lines.
#[cfg(any(feature = "shaderc", test))]
pub fn remap_shaderc_log(log: &str, wrapped: &WrappedStage) -> Vec<String> {
    let mut messages = Vec::new();
    for line in log.lines() {
        let Some((location, message)) = line.split_once(": error: ") else {
            continue;
        };
        let wrapped_line = location
            .rsplit(':')
            .next()
            .and_then(|number| number.trim().parse::<u32>().ok());
        let user = wrapped_line.and_then(|number| wrapped.user_line(number));
        messages.push(located(user, message.trim()));
    }
    if messages.is_empty() {
        messages.push(located(None, log.trim()));
    }
    messages
}
