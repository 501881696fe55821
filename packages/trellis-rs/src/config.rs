use anyhow::{Context, Result};
use std::env;

/// Tuning knobs for a workflow runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of the root output channel. The loop waits when it is full.
    pub output_buffer: usize,
    /// Capacity of the props input channel.
    pub props_buffer: usize,
    /// Emissions a worker may queue before `emit` waits.
    pub worker_buffer: usize,
    /// Turn panics in user code run by the loop into `WorkflowError::Panicked`.
    ///
    /// Covers `initial_state`, `on_props_changed`, `render`, actions,
    /// `snapshot_state`, output and worker mappers, and each poll of a worker.
    /// Lazy snapshot encoders run wherever the bytes are first read, so they
    /// are not covered.
    pub catch_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_buffer: 64,
            props_buffer: 16,
            worker_buffer: 1,
            catch_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Reads `TRELLIS_OUTPUT_BUFFER`, `TRELLIS_PROPS_BUFFER`,
    /// `TRELLIS_WORKER_BUFFER` and `TRELLIS_CATCH_PANICS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let buffer = |name: &str, default: usize| -> Result<usize> {
            match lookup(name) {
                Some(raw) => {
                    let value: usize = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{name} must be a positive number"))?;
                    anyhow::ensure!(value > 0, "{name} must be a positive number");
                    Ok(value)
                }
                None => Ok(default),
            }
        };

        Ok(Self {
            output_buffer: buffer("TRELLIS_OUTPUT_BUFFER", defaults.output_buffer)?,
            props_buffer: buffer("TRELLIS_PROPS_BUFFER", defaults.props_buffer)?,
            worker_buffer: buffer("TRELLIS_WORKER_BUFFER", defaults.worker_buffer)?,
            catch_panics: match lookup("TRELLIS_CATCH_PANICS") {
                Some(raw) => parse_bool(&raw).context("TRELLIS_CATCH_PANICS must be true or false")?,
                None => defaults.catch_panics,
            },
        })
    }

    pub fn with_output_buffer(mut self, output_buffer: usize) -> Self {
        self.output_buffer = output_buffer.max(1);
        self
    }

    pub fn with_props_buffer(mut self, props_buffer: usize) -> Self {
        self.props_buffer = props_buffer.max(1);
        self
    }

    pub fn with_worker_buffer(mut self, worker_buffer: usize) -> Self {
        self.worker_buffer = worker_buffer.max(1);
        self
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognised boolean {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.output_buffer, 64);
        assert_eq!(config.worker_buffer, 1);
        assert!(config.catch_panics);
    }

    #[test]
    fn test_reads_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("TRELLIS_OUTPUT_BUFFER", "8"),
            ("TRELLIS_WORKER_BUFFER", " 4 "),
            ("TRELLIS_CATCH_PANICS", "off"),
        ]))
        .unwrap();
        assert_eq!(config.output_buffer, 8);
        assert_eq!(config.props_buffer, 16);
        assert_eq!(config.worker_buffer, 4);
        assert!(!config.catch_panics);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = RuntimeConfig::from_lookup(lookup(&[("TRELLIS_PROPS_BUFFER", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRELLIS_PROPS_BUFFER"));

        assert!(RuntimeConfig::from_lookup(lookup(&[("TRELLIS_OUTPUT_BUFFER", "0")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[("TRELLIS_CATCH_PANICS", "maybe")])).is_err());
    }

    #[test]
    fn test_builder_setters_clamp_to_one() {
        let config = RuntimeConfig::default()
            .with_output_buffer(0)
            .with_worker_buffer(3)
            .with_catch_panics(false);
        assert_eq!(config.output_buffer, 1);
        assert_eq!(config.worker_buffer, 3);
        assert!(!config.catch_panics);
    }
}
