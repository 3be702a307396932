//! Buffer draining and rule evaluation.
//!
//! The `Pipeline` periodically drains the subscriber's message buffer and
//! runs every configured rule against each message. A payload is parsed once
//! per message no matter how many rules apply to it. Matches are logged;
//! misses are traced.
//!
//! Like the subscriber it follows, the pipeline waits until the connection
//! is first established before it starts draining.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use iotdatatunnel_mqtt::{BufferedMessage, LifecycleState, MessageBuffer};
use tokio::{
    sync::watch,
    time::{sleep, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::pipeline::{PipelineConfig, RuleConfig, TargetKind},
    json::{self, Value},
    path::PathFilter,
};

/// How long to wait for the first connection before logging again.
const READINESS_REMINDER: Duration = Duration::from_secs(30);

/// Whether `topic` matches the MQTT topic filter `filter` (`+` matches one
/// level, a trailing `#` matches any remainder including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    topic: Option<String>,
    filter: PathFilter,
    target: TargetKind,
}

impl Rule {
    pub fn from_config(config: &RuleConfig) -> Self {
        Self {
            name: config.name.clone(),
            topic: config.topic.clone(),
            filter: config.to_filter(),
            target: config.target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic filter, `None` for all topics.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn applies_to(&self, topic: &str) -> bool {
        self.topic
            .as_deref()
            .map_or(true, |filter| topic_matches(filter, topic))
    }

    /// Evaluates the rule and converts the result to the target kind.
    pub fn apply(&self, root: &Value) -> Option<Value> {
        let filter = &self.filter;
        match self.target {
            TargetKind::Bool => filter.evaluate_parsed::<bool>(root).map(Value::from),
            TargetKind::String => filter.evaluate_parsed::<String>(root).map(Value::from),
            TargetKind::I8 => filter.evaluate_parsed::<i8>(root).map(Value::from),
            TargetKind::I16 => filter.evaluate_parsed::<i16>(root).map(Value::from),
            TargetKind::I32 => filter.evaluate_parsed::<i32>(root).map(Value::from),
            TargetKind::I64 => filter.evaluate_parsed::<i64>(root).map(Value::from),
            TargetKind::F32 => filter.evaluate_parsed::<f32>(root).map(Value::from),
            TargetKind::F64 => filter.evaluate_parsed::<f64>(root).map(Value::from),
            TargetKind::Value => filter.evaluate_parsed::<Value>(root),
        }
    }
}

/// A value a rule extracted from one message.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: String,
    pub topic: String,
    pub value: Value,
}

/// Drains a message buffer and applies rules to each message.
pub struct Pipeline {
    buffer: Arc<dyn MessageBuffer>,
    rules: Vec<Rule>,
    interval: Duration,
    batch_size: usize,
    processed: AtomicU64,
    matched: AtomicU64,
}

impl Pipeline {
    pub fn new(buffer: Arc<dyn MessageBuffer>, config: &PipelineConfig) -> Self {
        Self {
            buffer,
            rules: config.rules.iter().map(Rule::from_config).collect(),
            interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
            processed: AtomicU64::new(0),
            matched: AtomicU64::new(0),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Messages handled so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Rule matches so far.
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    /// Runs every applicable rule against one message.
    pub fn process(&self, message: &BufferedMessage) -> Vec<RuleMatch> {
        self.processed.fetch_add(1, Ordering::Relaxed);

        let applicable: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(&message.topic))
            .collect();
        if applicable.is_empty() {
            trace!("No rule applies to '{}'", message.topic);
            return Vec::new();
        }

        let root = match json::parse(&message.payload) {
            Ok(root) => root,
            Err(e) => {
                debug!("Skipping unparseable payload on '{}': {}", message.topic, e);
                return Vec::new();
            }
        };

        let matches: Vec<RuleMatch> = applicable
            .into_iter()
            .filter_map(|rule| {
                let value = rule.apply(&root);
                if value.is_none() {
                    trace!("Rule '{}' did not match on '{}'", rule.name, message.topic);
                }
                value.map(|value| RuleMatch {
                    rule: rule.name.clone(),
                    topic: message.topic.clone(),
                    value,
                })
            })
            .collect();

        self.matched
            .fetch_add(matches.len() as u64, Ordering::Relaxed);
        matches
    }

    /// Handles up to one batch of buffered messages. Returns how many were
    /// taken from the buffer.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        while handled < self.batch_size {
            let Some(message) = self.buffer.poll() else {
                break;
            };
            handled += 1;
            for found in self.process(&message) {
                info!(
                    "Rule '{}' matched on '{}': {}",
                    found.rule, found.topic, found.value
                );
            }
        }
        if handled > 0 {
            debug!("Drained {} message(s), {} still buffered", handled, self.buffer.len());
        }
        handled
    }

    /// Drains the buffer every poll interval until `cancel` fires or the
    /// subscriber is disconnected before it ever connected.
    pub async fn run(&self, mut state: watch::Receiver<LifecycleState>, cancel: CancellationToken) {
        if !wait_until_connected(&mut state, &cancel).await {
            return;
        }

        info!(
            "Pipeline started ({} rule(s), interval: {} ms)",
            self.rules.len(),
            self.interval.as_millis()
        );

        loop {
            self.drain();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
        }

        // one last pass so nothing already buffered is left behind
        self.drain();
        info!(
            "Pipeline stopped ({} processed, {} matched)",
            self.processed(),
            self.matched()
        );
    }
}

/// Returns false if cancelled, or if the subscriber reached a terminal state
/// first.
async fn wait_until_connected(
    state: &mut watch::Receiver<LifecycleState>,
    cancel: &CancellationToken,
) -> bool {
    let initial = state.borrow_and_update().clone();
    if initial.is_connected() {
        info!("Subscriber is already connected, starting pipeline");
        return true;
    }
    if initial.is_terminal() {
        warn!("Subscriber is disconnected, pipeline not started");
        return false;
    }
    warn!("Waiting for subscriber connection... Current: {}", initial);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = state.changed() => {
                if changed.is_err() {
                    return false;
                }
                let current = state.borrow_and_update().clone();
                if current.is_connected() {
                    info!("Subscriber connected, starting pipeline");
                    return true;
                }
                if current.is_terminal() {
                    warn!("Subscriber disconnected before the pipeline could start");
                    return false;
                }
                debug!("Still not connected: {}", current);
            }
            _ = sleep(READINESS_REMINDER) => {
                warn!("Still waiting for subscriber connection... Current: {}", *state.borrow());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use iotdatatunnel_mqtt::InMemoryMessageBuffer;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::pipeline::{Literal, PredicateConfig};

    const SAMPLE: &str = r#"{"id":1,"sensor":[{"type":"temp","value":39},{"type":"rh","value":57}]}"#;

    fn rule(name: &str, topic: Option<&str>, extract: &str, target: TargetKind) -> RuleConfig {
        RuleConfig {
            name: name.into(),
            topic: topic.map(str::to_string),
            predicates: vec![PredicateConfig {
                path: "$.id".into(),
                equals: Literal::Int(1),
            }],
            extract: vec![extract.into()],
            target,
        }
    }

    fn pipeline(rules: Vec<RuleConfig>) -> (Pipeline, Arc<InMemoryMessageBuffer>) {
        let buffer = Arc::new(InMemoryMessageBuffer::new());
        let config = PipelineConfig {
            poll_interval_ms: 10,
            batch_size: 2,
            rules,
        };
        (Pipeline::new(buffer.clone(), &config), buffer)
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("sensors/+/telemetry", "sensors/a1/telemetry"));
        assert!(!topic_matches("sensors/+/telemetry", "sensors/a1/b/telemetry"));
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("sensors/#", "sensors/a/b"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_process_applies_rules_by_topic_and_target() {
        let (pipeline, _) = pipeline(vec![
            rule("temp", Some("sensors/#"), "$.sensor[0].value", TargetKind::F64),
            rule("humidity", None, "$.sensor[1].value", TargetKind::I32),
            rule("other", Some("alarms/#"), "$.id", TargetKind::I64),
        ]);

        let matches = pipeline.process(&BufferedMessage::new("sensors/a1", SAMPLE));
        assert_eq!(
            matches,
            vec![
                RuleMatch {
                    rule: "temp".into(),
                    topic: "sensors/a1".into(),
                    value: Value::from(39.0),
                },
                RuleMatch {
                    rule: "humidity".into(),
                    topic: "sensors/a1".into(),
                    value: Value::from(57),
                },
            ]
        );
        assert_eq!(pipeline.processed(), 1);
        assert_eq!(pipeline.matched(), 2);
    }

    #[test]
    fn test_unparseable_payload_yields_nothing() {
        let (pipeline, _) = pipeline(vec![rule("r", None, "$.id", TargetKind::Value)]);
        assert!(pipeline
            .process(&BufferedMessage::new("t", "{\"id\":"))
            .is_empty());
        assert_eq!(pipeline.matched(), 0);
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let (pipeline, buffer) = pipeline(vec![rule("r", None, "$.id", TargetKind::I8)]);
        for _ in 0..3 {
            buffer.add("t", SAMPLE);
        }

        assert_eq!(pipeline.drain(), 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(pipeline.drain(), 1);
        assert_eq!(pipeline.drain(), 0);
        assert_eq!(pipeline.matched(), 3);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_run_waits_for_connection_then_drains() {
        let (pipeline, buffer) = pipeline(vec![rule("r", None, "$.sensor[0].value", TargetKind::I32)]);
        buffer.add("t", SAMPLE);

        let (state_tx, state_rx) = watch::channel(LifecycleState::Connecting);
        let cancel = CancellationToken::new();
        let driver = async {
            sleep(Duration::from_millis(50)).await;
            assert_eq!(pipeline.processed(), 0);

            state_tx.send_replace(LifecycleState::Connected);
            tokio::time::timeout(Duration::from_secs(5), async {
                while pipeline.processed() == 0 {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
            cancel.cancel();
        };

        tokio::join!(pipeline.run(state_rx, cancel.clone()), driver);
        assert_eq!(pipeline.matched(), 1);
        assert!(logs_contain("Rule 'r' matched on 't': 39"));
    }

    #[tokio::test]
    async fn test_run_gives_up_when_disconnected_first() {
        let (pipeline, buffer) = pipeline(Vec::new());
        buffer.add("t", SAMPLE);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Idle);

        state_tx.send_replace(LifecycleState::Disconnected);
        pipeline.run(state_rx, CancellationToken::new()).await;

        assert_eq!(pipeline.processed(), 0);
        assert_eq!(buffer.len(), 1);
    }
}
