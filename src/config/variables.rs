//! `${env:NAME}` / `${file:PATH}` resolution for configuration values
//!
//! Providers are consulted in a fixed order: **file first, then environment**.
//! The first provider that supports a reference and yields a non-blank value
//! wins. A reference nobody resolves degrades to the literal string, except in
//! strict mode (credentials), where it is a configuration error.

use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Variable resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    /// `${ }` with a blank interior
    #[error("Invalid variable format [{0}]")]
    InvalidFormat(String),

    /// Strict resolution found no provider able to resolve the reference
    #[error("Unable to resolve variable [{0}]")]
    Unresolved(String),
}

/// A source of variable values
pub trait VariableProvider: Send + Sync + fmt::Debug {
    /// Whether this provider understands `spec` (the trimmed `${...}` interior)
    fn supports(&self, spec: &str) -> bool;

    /// Resolve `spec`; `None` falls through to the next provider
    fn resolve(&self, spec: &str) -> Option<String>;
}

/// Strip a case-insensitive `prefix:` from `spec`
fn strip_scheme<'a>(spec: &'a str, scheme: &str) -> Option<&'a str> {
    let head = spec.get(..scheme.len())?;
    if head.eq_ignore_ascii_case(scheme) {
        spec.get(scheme.len()..)
    } else {
        None
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolves `file:/path/to/secret` to the trimmed file contents
#[derive(Debug, Default, Clone, Copy)]
pub struct FileVariableProvider;

impl VariableProvider for FileVariableProvider {
    fn supports(&self, spec: &str) -> bool {
        strip_scheme(spec, "file:").is_some()
    }

    fn resolve(&self, spec: &str) -> Option<String> {
        let path = strip_scheme(spec, "file:")?.trim();
        if path.is_empty() {
            return None;
        }
        std::fs::read_to_string(Path::new(path))
            .ok()
            .and_then(non_blank)
    }
}

/// Resolves `env:NAME` to the trimmed environment variable value
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvironmentVariableProvider;

impl VariableProvider for EnvironmentVariableProvider {
    fn supports(&self, spec: &str) -> bool {
        strip_scheme(spec, "env:").is_some()
    }

    fn resolve(&self, spec: &str) -> Option<String> {
        let name = strip_scheme(spec, "env:")?.trim();
        if name.is_empty() {
            return None;
        }
        std::env::var(name).ok().and_then(non_blank)
    }
}

/// Ordered provider chain
#[derive(Debug)]
pub struct VariableResolver {
    providers: Vec<Box<dyn VariableProvider>>,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(FileVariableProvider),
            Box::new(EnvironmentVariableProvider),
        ])
    }
}

impl VariableResolver {
    /// Build a resolver with a custom provider order
    pub fn new(providers: Vec<Box<dyn VariableProvider>>) -> Self {
        Self { providers }
    }

    /// Resolve `raw`, degrading unresolved references to the literal
    pub fn resolve(&self, raw: &str) -> Result<String, VariableError> {
        Ok(self.lookup(raw)?.unwrap_or_else(|| {
            warn!(
                variable = %raw,
                "Variable reference could not be resolved, using it as a literal"
            );
            raw.to_string()
        }))
    }

    /// Resolve `raw`, failing when a reference cannot be resolved
    pub fn resolve_strict(&self, raw: &str) -> Result<String, VariableError> {
        self.lookup(raw)?
            .ok_or_else(|| VariableError::Unresolved(raw.to_string()))
    }

    /// `Ok(None)` means "a reference that no provider resolved"
    fn lookup(&self, raw: &str) -> Result<Option<String>, VariableError> {
        if raw.trim().is_empty() {
            return Ok(Some(raw.to_string()));
        }

        let trimmed = raw.trim();
        if trimmed == "${}" {
            return Ok(Some(trimmed.to_string()));
        }

        let Some(interior) = trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return Ok(Some(trimmed.to_string()));
        };

        let spec = interior.trim();
        if spec.is_empty() {
            return Err(VariableError::InvalidFormat(raw.to_string()));
        }

        Ok(self
            .providers
            .iter()
            .filter(|provider| provider.supports(spec))
            .find_map(|provider| provider.resolve(spec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug)]
    struct Fixed(&'static str, Option<&'static str>);

    impl VariableProvider for Fixed {
        fn supports(&self, spec: &str) -> bool {
            spec.starts_with(self.0)
        }

        fn resolve(&self, _spec: &str) -> Option<String> {
            self.1.map(str::to_string)
        }
    }

    #[test]
    fn test_blank_returned_unchanged() {
        let resolver = VariableResolver::default();
        assert_eq!(resolver.resolve("").unwrap(), "");
        assert_eq!(resolver.resolve("   ").unwrap(), "   ");
    }

    #[test]
    fn test_empty_reference_is_literal() {
        let resolver = VariableResolver::default();
        assert_eq!(resolver.resolve("${}").unwrap(), "${}");
    }

    #[test]
    fn test_plain_literal_trimmed() {
        let resolver = VariableResolver::default();
        assert_eq!(resolver.resolve(" plain ").unwrap(), "plain");
    }

    #[test]
    fn test_blank_spec_is_error() {
        let resolver = VariableResolver::default();
        let err = resolver.resolve("${  }").unwrap_err();
        assert_eq!(err.to_string(), "Invalid variable format [${  }]");
    }

    #[test]
    fn test_unset_env_falls_back_to_literal() {
        let resolver = VariableResolver::default();
        assert_eq!(
            resolver.resolve("${env:RJMX_BRIDGE_TEST_UNSET_VAR}").unwrap(),
            "${env:RJMX_BRIDGE_TEST_UNSET_VAR}"
        );
    }

    #[test]
    fn test_env_variable_resolved_and_trimmed() {
        std::env::set_var("RJMX_BRIDGE_TEST_USER", "  admin  ");
        let resolver = VariableResolver::default();
        assert_eq!(
            resolver.resolve("${ ENV:RJMX_BRIDGE_TEST_USER }").unwrap(),
            "admin"
        );
    }

    #[test]
    fn test_file_variable_resolved() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();
        let raw = format!("${{file:{}}}", file.path().display());

        let resolver = VariableResolver::default();
        assert_eq!(resolver.resolve(&raw).unwrap(), "s3cret");
    }

    #[test]
    fn test_missing_file_falls_back_to_literal() {
        let resolver = VariableResolver::default();
        let raw = "${file:/nonexistent/rjmx-bridge/secret}";
        assert_eq!(resolver.resolve(raw).unwrap(), raw);
    }

    #[test]
    fn test_first_resolving_provider_wins() {
        let resolver = VariableResolver::new(vec![
            Box::new(Fixed("x:", None)),
            Box::new(Fixed("x:", Some("second"))),
            Box::new(Fixed("x:", Some("third"))),
        ]);
        assert_eq!(resolver.resolve("${x:anything}").unwrap(), "second");
    }

    #[test]
    fn test_unsupported_scheme_is_literal() {
        let resolver = VariableResolver::default();
        assert_eq!(resolver.resolve("${vault:db}").unwrap(), "${vault:db}");
    }

    #[test]
    fn test_strict_resolution_fails_on_fallthrough() {
        let resolver = VariableResolver::default();
        let err = resolver
            .resolve_strict("${env:RJMX_BRIDGE_TEST_UNSET_PASSWORD}")
            .unwrap_err();
        assert_eq!(
            err,
            VariableError::Unresolved("${env:RJMX_BRIDGE_TEST_UNSET_PASSWORD}".to_string())
        );
        assert_eq!(resolver.resolve_strict("literal").unwrap(), "literal");
    }
}
