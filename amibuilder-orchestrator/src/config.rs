use std::env;
use std::str::FromStr;
use std::time::Duration;

use amibuilder_common::bus::DEFAULT_REGISTRY;
use amibuilder_common::QueueNames;

use crate::error::BuildError;

/// What a bounded wait does once its budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Log a warning and continue as if the resource were visible.
    ProceedAnyway,
    /// Surface an error to the caller.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub interval: Duration,
    pub on_exhausted: ExhaustionPolicy,
}

impl RetryBudget {
    pub const fn new(max_attempts: u32, interval: Duration, on_exhausted: ExhaustionPolicy) -> Self {
        Self {
            max_attempts,
            interval,
            on_exhausted,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Eventual-consistency waits, one budget per call site.
#[derive(Debug, Clone)]
pub struct WaitSettings {
    pub instance_profile: RetryBudget,
    pub results_queue: RetryBudget,
    /// Queue lookup right before dispatch / collection.
    pub queue_resolve: RetryBudget,
    pub policy_detach: RetryBudget,
    pub bucket: RetryBudget,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            instance_profile: RetryBudget::new(10, Duration::from_secs(3), ExhaustionPolicy::ProceedAnyway),
            results_queue: RetryBudget::new(10, Duration::from_secs(3), ExhaustionPolicy::ProceedAnyway),
            queue_resolve: RetryBudget::new(10, Duration::from_secs(3), ExhaustionPolicy::Fail),
            policy_detach: RetryBudget::new(10, Duration::from_secs(2), ExhaustionPolicy::ProceedAnyway),
            bucket: RetryBudget::new(12, Duration::from_secs(5), ExhaustionPolicy::Fail),
        }
    }
}

/// How the collector treats results that do not echo a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Accept uncorrelated results (workers that predate correlation ids).
    Lenient,
    /// Only accept results echoing the order's correlation id.
    Strict,
}

impl FromStr for CorrelationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(CorrelationMode::Lenient),
            "strict" => Ok(CorrelationMode::Strict),
            other => Err(format!("unknown correlation mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub max_polls: u32,
    /// Provider-side long-poll wait per receive call.
    pub wait_seconds: i32,
    pub empty_poll_sleep: Duration,
    pub max_messages: i32,
    pub correlation: CorrelationMode,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            max_polls: 15,
            wait_seconds: 20,
            empty_poll_sleep: Duration::from_secs(1),
            max_messages: 10,
            correlation: CorrelationMode::Lenient,
        }
    }
}

pub const DEFAULT_WORKER_URL: &str =
    "https://raw.githubusercontent.com/ralucapelin/kraftkit/staging/amibuilder/amibuilderd";

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub instance_type: String,
    pub base_image: String,
    pub key_name: Option<String>,
    pub worker_url: String,
    pub tag_value: String,
    /// Pause between instance launch and dispatching the order.
    pub worker_grace: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            instance_type: "t3.micro".to_string(),
            base_image: "ami-0f673487d7e5f89ca".to_string(),
            key_name: Some("ssh-pair-central".to_string()),
            worker_url: DEFAULT_WORKER_URL.to_string(),
            tag_value: "my-ami".to_string(),
            worker_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingScheme {
    /// Legacy process-wide names; one build in flight per account/region.
    Fixed,
    /// Every resource name suffixed with the run id.
    PerRun,
}

impl FromStr for NamingScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(NamingScheme::Fixed),
            "per-run" | "per_run" | "perrun" => Ok(NamingScheme::PerRun),
            other => Err(format!("unknown naming scheme '{}'", other)),
        }
    }
}

/// Names of every cloud object a run creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub role: String,
    pub instance_profile: String,
    pub inline_policy: String,
    pub operator_policy: String,
    pub queues: QueueNames,
}

impl ResourceNames {
    pub fn fixed() -> Self {
        Self {
            role: "amibuilder-role".to_string(),
            instance_profile: "kraftkit-role".to_string(),
            inline_policy: "amibuilder-policy".to_string(),
            operator_policy: "kraftkit-package-manager".to_string(),
            queues: QueueNames::fixed(),
        }
    }

    pub fn for_run(run_id: &str) -> Self {
        let base = Self::fixed();
        Self {
            role: format!("{}-{}", base.role, run_id),
            instance_profile: format!("{}-{}", base.instance_profile, run_id),
            inline_policy: base.inline_policy,
            operator_policy: format!("{}-{}", base.operator_policy, run_id),
            queues: QueueNames::for_run(run_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overrides the provider's region when set.
    pub region: Option<String>,
    pub registry: String,
    pub naming: NamingScheme,
    pub launch: LaunchSettings,
    pub waits: WaitSettings,
    pub collect: CollectSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            region: None,
            registry: DEFAULT_REGISTRY.to_string(),
            naming: NamingScheme::PerRun,
            launch: LaunchSettings::default(),
            waits: WaitSettings::default(),
            collect: CollectSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, BuildError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key/value source (env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BuildError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let mut cfg = OrchestratorConfig::default();

        cfg.region = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION"));
        if let Some(registry) = get("AMIBUILDER_REGISTRY") {
            cfg.registry = registry;
        }
        cfg.naming = parse_or(get("AMIBUILDER_NAMING"), "AMIBUILDER_NAMING", cfg.naming)?;

        if let Some(v) = get("AMIBUILDER_INSTANCE_TYPE") {
            cfg.launch.instance_type = v;
        }
        if let Some(v) = get("AMIBUILDER_BASE_IMAGE") {
            cfg.launch.base_image = v;
        }
        // Present-but-empty disables the key pair.
        if let Some(raw) = lookup("AMIBUILDER_KEY_NAME") {
            let raw = raw.trim();
            cfg.launch.key_name = if raw.is_empty() { None } else { Some(raw.to_string()) };
        }
        if let Some(v) = get("AMIBUILDER_WORKER_URL") {
            cfg.launch.worker_url = v;
        }
        if let Some(v) = get("AMIBUILDER_TAG_VALUE") {
            cfg.launch.tag_value = v;
        }
        let grace: u64 = parse_or(
            get("AMIBUILDER_WORKER_GRACE_SECS"),
            "AMIBUILDER_WORKER_GRACE_SECS",
            cfg.launch.worker_grace.as_secs(),
        )?;
        cfg.launch.worker_grace = Duration::from_secs(grace);

        cfg.collect.max_polls = parse_or(
            get("AMIBUILDER_COLLECT_MAX_POLLS"),
            "AMIBUILDER_COLLECT_MAX_POLLS",
            cfg.collect.max_polls,
        )?;
        cfg.collect.wait_seconds = parse_or(
            get("AMIBUILDER_COLLECT_WAIT_SECS"),
            "AMIBUILDER_COLLECT_WAIT_SECS",
            cfg.collect.wait_seconds,
        )?;
        // Provider long-poll is capped at 20 seconds.
        cfg.collect.wait_seconds = cfg.collect.wait_seconds.clamp(0, 20);
        cfg.collect.correlation = parse_or(
            get("AMIBUILDER_CORRELATION"),
            "AMIBUILDER_CORRELATION",
            cfg.collect.correlation,
        )?;

        Ok(cfg)
    }

    pub fn resource_names(&self, run_id: &str) -> ResourceNames {
        match self.naming {
            NamingScheme::Fixed => ResourceNames::fixed(),
            NamingScheme::PerRun => ResourceNames::for_run(run_id),
        }
    }

    /// Same budgets, no sleeping. Used by tests and local mock runs.
    pub fn without_delays(mut self) -> Self {
        let w = &mut self.waits;
        w.instance_profile = w.instance_profile.with_interval(Duration::ZERO);
        w.results_queue = w.results_queue.with_interval(Duration::ZERO);
        w.queue_resolve = w.queue_resolve.with_interval(Duration::ZERO);
        w.policy_detach = w.policy_detach.with_interval(Duration::ZERO);
        w.bucket = w.bucket.with_interval(Duration::ZERO);
        self.collect.empty_poll_sleep = Duration::ZERO;
        self.launch.worker_grace = Duration::ZERO;
        self
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, BuildError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|e| BuildError::ProviderUnavailable(format!("invalid {}='{}': {}", key, v, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.registry, "index.unikraft.io");
        assert_eq!(cfg.naming, NamingScheme::PerRun);
        assert_eq!(cfg.collect.max_polls, 15);
        assert_eq!(cfg.collect.wait_seconds, 20);
        assert_eq!(cfg.collect.correlation, CorrelationMode::Lenient);
        assert_eq!(cfg.launch.key_name.as_deref(), Some("ssh-pair-central"));
        assert_eq!(
            cfg.waits.instance_profile.on_exhausted,
            ExhaustionPolicy::ProceedAnyway
        );
        assert_eq!(cfg.waits.queue_resolve.on_exhausted, ExhaustionPolicy::Fail);
    }

    #[test]
    fn env_overrides() {
        let cfg = OrchestratorConfig::from_lookup(lookup(&[
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("AMIBUILDER_NAMING", "fixed"),
            ("AMIBUILDER_KEY_NAME", ""),
            ("AMIBUILDER_COLLECT_MAX_POLLS", "3"),
            ("AMIBUILDER_COLLECT_WAIT_SECS", "45"),
            ("AMIBUILDER_CORRELATION", "Strict"),
        ]))
        .unwrap();
        assert_eq!(cfg.region.as_deref(), Some("eu-west-1"));
        assert_eq!(cfg.naming, NamingScheme::Fixed);
        assert_eq!(cfg.launch.key_name, None);
        assert_eq!(cfg.collect.max_polls, 3);
        assert_eq!(cfg.collect.wait_seconds, 20);
        assert_eq!(cfg.collect.correlation, CorrelationMode::Strict);
    }

    #[test]
    fn invalid_values_are_fatal() {
        let err = OrchestratorConfig::from_lookup(lookup(&[("AMIBUILDER_COLLECT_MAX_POLLS", "many")]))
            .unwrap_err();
        assert!(matches!(err, BuildError::ProviderUnavailable(_)));
    }

    #[test]
    fn names_per_scheme() {
        let fixed = ResourceNames::fixed();
        assert_eq!(fixed.queues.orders, "Orders");
        assert_eq!(fixed.instance_profile, "kraftkit-role");

        let run = ResourceNames::for_run("ab12cd34");
        assert_eq!(run.role, "amibuilder-role-ab12cd34");
        assert_eq!(run.instance_profile, "kraftkit-role-ab12cd34");
        assert_eq!(run.queues.results, "Results-ab12cd34");
    }
}
