use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -----------------------------------------------------------------------------
// Queues
// -----------------------------------------------------------------------------

pub const QUEUE_ORDERS: &str = "Orders";
pub const QUEUE_RESULTS: &str = "Results";

/// Message attribute carrying the correlation id of a build order.
pub const ATTR_CORRELATION_ID: &str = "CorrelationId";

pub const DEFAULT_REGISTRY: &str = "index.unikraft.io";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("result body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("result body has no result.amiId")]
    MissingImageId,
}

/// Names of the queue pair used by one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    pub orders: String,
    pub results: String,
}

impl QueueNames {
    /// The process-wide names the worker expects by default.
    pub fn fixed() -> Self {
        Self {
            orders: QUEUE_ORDERS.to_string(),
            results: QUEUE_RESULTS.to_string(),
        }
    }

    /// Queue pair namespaced by a run id, so concurrent runs never share a queue.
    pub fn for_run(run_id: &str) -> Self {
        Self {
            orders: format!("{}-{}", QUEUE_ORDERS, run_id),
            results: format!("{}-{}", QUEUE_RESULTS, run_id),
        }
    }
}

/// Address of a queue derived from account + region + name.
///
/// This is not the endpoint returned by the queue service; the worker receives
/// the ARN form on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAddress {
    pub region: String,
    pub account_id: String,
    pub name: String,
}

impl QueueAddress {
    pub fn new(region: &str, account_id: &str, name: &str) -> Self {
        Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn arn(&self) -> String {
        format!("arn:aws:sqs:{}:{}:{}", self.region, self.account_id, self.name)
    }

    pub fn url(&self) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.region, self.account_id, self.name
        )
    }
}

// -----------------------------------------------------------------------------
// Orders
// -----------------------------------------------------------------------------

/// Request consumed by the build worker from the Orders queue.
///
/// Field order is the wire order: `{"image":..,"os":..,"arch":..}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BuildOrder {
    pub image: String,
    pub os: String,
    pub arch: String,
}

impl BuildOrder {
    /// Build an order for `name` hosted in `registry`. Names that already carry
    /// the registry host are kept as is.
    pub fn new(registry: &str, name: &str, os: &str, arch: &str) -> Self {
        let registry = registry.trim().trim_end_matches('/');
        let name = name.trim();
        let image = if registry.is_empty() || name.starts_with(&format!("{}/", registry)) {
            name.to_string()
        } else {
            format!("{}/{}", registry, name)
        };
        Self {
            image,
            os: os.trim().to_string(),
            arch: arch.trim().to_string(),
        }
    }

    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// -----------------------------------------------------------------------------
// Results
// -----------------------------------------------------------------------------

/// Envelope published by the worker on the Results queue.
///
/// Only `result.amiId` is contractual; the rest is kept verbatim.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub body: serde_json::Value,
}

impl BuildResult {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let body: serde_json::Value = serde_json::from_str(raw)?;
        Ok(Self { body })
    }

    pub fn image_id(&self) -> Result<&str, ProtocolError> {
        self.body
            .get("result")
            .and_then(|r| r.get("amiId"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ProtocolError::MissingImageId)
    }

    /// Correlation id echoed in the body, either top-level or under `result`.
    pub fn correlation_id(&self) -> Option<Uuid> {
        let top = self.body.get("correlationId");
        let nested = self.body.get("result").and_then(|r| r.get("correlationId"));
        top.or(nested)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    }
}

/// Pull the produced image id out of a raw result body.
pub fn extract_image_id(raw: &str) -> Result<String, ProtocolError> {
    let result = BuildResult::parse(raw)?;
    result.image_id().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_wire_body_is_exact() {
        let order = BuildOrder::new(DEFAULT_REGISTRY, "org/app", "linux", "x86_64");
        assert_eq!(
            order.to_wire().unwrap(),
            r#"{"image":"index.unikraft.io/org/app","os":"linux","arch":"x86_64"}"#
        );
    }

    #[test]
    fn order_keeps_qualified_names() {
        let order = BuildOrder::new("index.unikraft.io/", "index.unikraft.io/org/app", "linux", "arm64");
        assert_eq!(order.image, "index.unikraft.io/org/app");
    }

    #[test]
    fn extract_nested_image_id() {
        let raw = r#"{"result":{"amiId":"ami-0123","status":"done"},"worker":"w1"}"#;
        assert_eq!(extract_image_id(raw).unwrap(), "ami-0123");
    }

    #[test]
    fn missing_or_invalid_result() {
        assert!(matches!(
            extract_image_id(r#"{"result":{}}"#),
            Err(ProtocolError::MissingImageId)
        ));
        assert!(matches!(
            extract_image_id(r#"{"amiId":"ami-1"}"#),
            Err(ProtocolError::MissingImageId)
        ));
        assert!(matches!(
            extract_image_id("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn correlation_from_body() {
        let id = Uuid::new_v4();
        let top = BuildResult::parse(&format!(
            r#"{{"correlationId":"{}","result":{{"amiId":"ami-1"}}}}"#,
            id
        ))
        .unwrap();
        assert_eq!(top.correlation_id(), Some(id));

        let nested = BuildResult::parse(&format!(
            r#"{{"result":{{"amiId":"ami-1","correlationId":"{}"}}}}"#,
            id
        ))
        .unwrap();
        assert_eq!(nested.correlation_id(), Some(id));

        let none = BuildResult::parse(r#"{"result":{"amiId":"ami-1"}}"#).unwrap();
        assert_eq!(none.correlation_id(), None);
    }

    #[test]
    fn queue_addresses() {
        let addr = QueueAddress::new("eu-central-1", "123456789012", "Orders");
        assert_eq!(addr.arn(), "arn:aws:sqs:eu-central-1:123456789012:Orders");
        assert_eq!(
            addr.url(),
            "https://sqs.eu-central-1.amazonaws.com/123456789012/Orders"
        );
        let run = QueueNames::for_run("1a2b3c4d");
        assert_eq!(run.orders, "Orders-1a2b3c4d");
        assert_eq!(run.results, "Results-1a2b3c4d");
        assert_eq!(QueueNames::fixed().orders, "Orders");
    }
}
