//! Relay between the local broker under test and a remote endpoint.
//!
//! The local broker handle is injected at construction; there is no
//! process-wide broker. Reconnection uses a capped exponential backoff with an
//! attempt ceiling, after which the bridge fails with `BridgeUnreachable`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use suitegen_error::{GenError, Result};
use tracing::{debug, info, warn};

/// Which way messages flow across the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeDirection {
    #[default]
    Both,
    /// Remote to local only.
    In,
    /// Local to remote only.
    Out,
}

impl BridgeDirection {
    #[must_use]
    pub fn inbound(self) -> bool {
        matches!(self, Self::Both | Self::In)
    }

    #[must_use]
    pub fn outbound(self) -> bool {
        matches!(self, Self::Both | Self::Out)
    }
}

impl FromStr for BridgeDirection {
    type Err = GenError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "both" => Ok(Self::Both),
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(GenError::config(format!("unknown bridge direction '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Client identifier used on both ends.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Topic filter subscribed on both ends.
    pub topic: String,
    pub direction: BridgeDirection,
    /// Prepended to topics of messages arriving from the remote end.
    pub local_prefix: String,
    /// Prepended to topics of messages sent to the remote end.
    pub remote_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "local".to_owned(),
            host: "localhost".to_owned(),
            port: 1883,
            topic: "+".to_owned(),
            direction: BridgeDirection::Both,
            local_prefix: String::new(),
            remote_prefix: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Empty host means localhost; prefixes lose surrounding quotes.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.host.is_empty() {
            "localhost".clone_into(&mut self.host);
        }
        self.local_prefix = self.local_prefix.trim_matches('"').to_owned();
        self.remote_prefix = self.remote_prefix.trim_matches('"').to_owned();
        self
    }
}

/// Capped exponential backoff with an attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Total connect attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// A message crossing the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

impl BridgeMessage {
    fn with_topic_prefix(&self, prefix: &str) -> Self {
        Self {
            topic: format!("{prefix}{}", self.topic),
            ..self.clone()
        }
    }
}

/// Client connection to the remote broker.
pub trait RemoteEndpoint {
    fn connect(&mut self, host: &str, port: u16) -> std::result::Result<(), String>;

    /// Subscribe with no-local and retain-as-published set, so bridged
    /// messages do not echo back.
    fn subscribe(&mut self, topic: &str) -> std::result::Result<(), String>;

    fn publish(&mut self, message: &BridgeMessage) -> std::result::Result<(), String>;
}

/// The in-process broker the bridge feeds.
pub trait LocalBroker: Send + Sync {
    /// Register the bridge as a local client subscribed to `topic`.
    fn attach(&self, client_id: &str, topic: &str);

    fn publish(&self, origin: &str, message: BridgeMessage);
}

type Sleeper = Box<dyn FnMut(Duration) + Send>;

/// Bridges one remote endpoint to the injected local broker.
pub struct Bridge<R: RemoteEndpoint, L: LocalBroker> {
    config: BridgeConfig,
    policy: ReconnectPolicy,
    remote: R,
    local: Arc<L>,
    sleep: Sleeper,
    connected: bool,
}

impl<R: RemoteEndpoint, L: LocalBroker> fmt::Debug for Bridge<R, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl<R: RemoteEndpoint, L: LocalBroker> Bridge<R, L> {
    /// Create the bridge and attach it to the local broker.
    pub fn new(config: BridgeConfig, policy: ReconnectPolicy, remote: R, local: Arc<L>) -> Self {
        let config = config.normalized();
        info!(
            bridge = %config.name,
            host = %config.host,
            port = config.port,
            "starting bridge"
        );
        local.attach(&config.name, &config.topic);
        Self {
            config,
            policy,
            remote,
            local,
            sleep: Box::new(thread::sleep),
            connected: false,
        }
    }

    /// Replace the backoff sleep, e.g. to record delays instead of waiting.
    #[must_use]
    pub fn with_sleeper(mut self, sleep: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Connect to the remote end, retrying with backoff. Returns the number
    /// of attempts used.
    pub fn connect(&mut self) -> Result<u32> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.remote.connect(&self.config.host, self.config.port) {
                Ok(()) => {
                    self.connected = true;
                    info!(bridge = %self.config.name, attempt, "bridge connected");
                    self.subscribe_remote()?;
                    return Ok(attempt);
                }
                Err(err) => {
                    debug!(
                        bridge = %self.config.name,
                        attempt,
                        error = %err,
                        "bridge connect failed"
                    );
                    last_error = err;
                    if attempt < max_attempts {
                        (self.sleep)(self.policy.delay_after(attempt));
                    }
                }
            }
        }
        warn!(
            bridge = %self.config.name,
            attempts = max_attempts,
            "bridge remote unreachable"
        );
        Err(GenError::BridgeUnreachable {
            name: self.config.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            attempts: max_attempts,
            last_error,
        })
    }

    fn subscribe_remote(&mut self) -> Result<()> {
        if !self.config.direction.inbound() {
            info!(bridge = %self.config.name, "not subscribing to remote");
            return Ok(());
        }
        self.remote
            .subscribe(&self.config.topic)
            .map_err(|detail| self.forward_error(&self.config.topic, detail))
    }

    /// A message arrived from the remote end.
    pub fn on_remote_publish(&self, message: &BridgeMessage) {
        if !self.config.direction.inbound() {
            return;
        }
        debug!(bridge = %self.config.name, topic = %message.topic, "bridge: publish arrived");
        self.local.publish(
            &self.config.name,
            message.with_topic_prefix(&self.config.local_prefix),
        );
    }

    /// A message for the bridge arrived from the local broker. Returns
    /// whether it was sent on.
    pub fn on_local_publish(&mut self, message: &BridgeMessage) -> Result<bool> {
        if !self.config.direction.outbound() || !self.connected {
            return Ok(false);
        }
        let outgoing = message.with_topic_prefix(&self.config.remote_prefix);
        debug!(bridge = %self.config.name, topic = %outgoing.topic, "bridge: sending on");
        if let Err(detail) = self.remote.publish(&outgoing) {
            self.connected = false;
            return Err(self.forward_error(&outgoing.topic, detail));
        }
        Ok(true)
    }

    fn forward_error(&self, topic: &str, detail: String) -> GenError {
        GenError::BridgeForward {
            name: self.config.name.clone(),
            topic: topic.to_owned(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FlakyRemote {
        failures_before_success: u32,
        connects: u32,
        subscriptions: Vec<String>,
        published: Vec<BridgeMessage>,
        reject_publish: bool,
    }

    impl RemoteEndpoint for FlakyRemote {
        fn connect(&mut self, _host: &str, _port: u16) -> std::result::Result<(), String> {
            self.connects += 1;
            if self.connects <= self.failures_before_success {
                Err("connection refused".to_owned())
            } else {
                Ok(())
            }
        }

        fn subscribe(&mut self, topic: &str) -> std::result::Result<(), String> {
            self.subscriptions.push(topic.to_owned());
            Ok(())
        }

        fn publish(&mut self, message: &BridgeMessage) -> std::result::Result<(), String> {
            if self.reject_publish {
                return Err("socket closed".to_owned());
            }
            self.published.push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBroker {
        attached: Mutex<Vec<(String, String)>>,
        published: Mutex<Vec<(String, BridgeMessage)>>,
    }

    impl LocalBroker for RecordingBroker {
        fn attach(&self, client_id: &str, topic: &str) {
            self.attached
                .lock()
                .expect("lock")
                .push((client_id.to_owned(), topic.to_owned()));
        }

        fn publish(&self, origin: &str, message: BridgeMessage) {
            self.published
                .lock()
                .expect("lock")
                .push((origin.to_owned(), message));
        }
    }

    fn message(topic: &str) -> BridgeMessage {
        BridgeMessage {
            topic: topic.to_owned(),
            payload: b"hello".to_vec(),
            qos: 1,
            retained: false,
        }
    }

    fn recorded_delays() -> (Arc<Mutex<Vec<Duration>>>, impl FnMut(Duration) + Send + 'static) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delays);
        (delays, move |delay| sink.lock().expect("lock").push(delay))
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(10),
            max_attempts: 6,
        };
        let delays: Vec<u64> = (1..=5).map(|n| policy.delay_after(n).as_secs()).collect();
        assert_eq!(delays, [2, 4, 8, 10, 10]);
    }

    #[test]
    fn connect_retries_then_subscribes() {
        let broker = Arc::new(RecordingBroker::default());
        let remote = FlakyRemote {
            failures_before_success: 2,
            ..FlakyRemote::default()
        };
        let (delays, sleeper) = recorded_delays();
        let mut bridge = Bridge::new(
            BridgeConfig::default(),
            ReconnectPolicy::default(),
            remote,
            Arc::clone(&broker),
        )
        .with_sleeper(sleeper);

        assert_eq!(bridge.connect().expect("should connect"), 3);
        assert!(bridge.is_connected());
        assert_eq!(bridge.remote().subscriptions, ["+"]);
        assert_eq!(
            *delays.lock().expect("lock"),
            [Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!(
            *broker.attached.lock().expect("lock"),
            [("local".to_owned(), "+".to_owned())]
        );
    }

    #[test]
    fn connect_gives_up_after_ceiling() {
        let remote = FlakyRemote {
            failures_before_success: u32::MAX,
            ..FlakyRemote::default()
        };
        let policy = ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        };
        let (delays, sleeper) = recorded_delays();
        let mut bridge = Bridge::new(
            BridgeConfig::default(),
            policy,
            remote,
            Arc::new(RecordingBroker::default()),
        )
        .with_sleeper(sleeper);

        let err = bridge.connect().expect_err("should give up");
        assert!(matches!(err, GenError::BridgeUnreachable { attempts: 3, .. }));
        assert_eq!(delays.lock().expect("lock").len(), 2);
        assert!(!bridge.is_connected());
    }

    #[test]
    fn outbound_only_bridge_does_not_subscribe_or_import() {
        let broker = Arc::new(RecordingBroker::default());
        let config = BridgeConfig {
            direction: BridgeDirection::Out,
            remote_prefix: "\"edge/\"".to_owned(),
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::new(
            config,
            ReconnectPolicy::default(),
            FlakyRemote::default(),
            Arc::clone(&broker),
        );
        bridge.connect().expect("should connect");
        assert!(bridge.remote().subscriptions.is_empty());

        bridge.on_remote_publish(&message("a"));
        assert!(broker.published.lock().expect("lock").is_empty());

        assert!(bridge.on_local_publish(&message("a")).expect("forward"));
        assert_eq!(bridge.remote().published[0].topic, "edge/a");
    }

    #[test]
    fn inbound_messages_get_local_prefix() {
        let broker = Arc::new(RecordingBroker::default());
        let config = BridgeConfig {
            local_prefix: "remote/".to_owned(),
            ..BridgeConfig::default()
        };
        let bridge = Bridge::new(
            config,
            ReconnectPolicy::default(),
            FlakyRemote::default(),
            Arc::clone(&broker),
        );
        bridge.on_remote_publish(&message("sensors/1"));
        let published = broker.published.lock().expect("lock");
        assert_eq!(published[0].0, "local");
        assert_eq!(published[0].1.topic, "remote/sensors/1");
    }

    #[test]
    fn failed_forward_marks_bridge_disconnected() {
        let remote = FlakyRemote {
            reject_publish: true,
            ..FlakyRemote::default()
        };
        let mut bridge = Bridge::new(
            BridgeConfig::default(),
            ReconnectPolicy::default(),
            remote,
            Arc::new(RecordingBroker::default()),
        );
        assert!(!bridge.on_local_publish(&message("a")).expect("not connected yet"));
        bridge.connect().expect("should connect");
        let err = bridge
            .on_local_publish(&message("a"))
            .expect_err("publish should fail");
        assert!(matches!(err, GenError::BridgeForward { .. }));
        assert!(!bridge.is_connected());
    }

    #[test]
    fn direction_parses_and_host_defaults() {
        assert_eq!("in".parse::<BridgeDirection>().expect("parse"), BridgeDirection::In);
        assert!("sideways".parse::<BridgeDirection>().is_err());
        let config = BridgeConfig {
            host: String::new(),
            ..BridgeConfig::default()
        }
        .normalized();
        assert_eq!(config.host, "localhost");
    }
}
