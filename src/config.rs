use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{bing, google, moses, LanguagePair};

/// Which backend a worker fronts, with its engine-specific settings.
///
/// Serialized as JSON and handed to every isolated execution through
/// `--adapter-spec`, so the child process builds the exact same adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "kebab-case")]
pub enum AdapterConfig {
    Dummy {
        #[serde(default)]
        delay_ms: u64,
    },
    Moses {
        command: PathBuf,
        config: PathBuf,
        source_language: String,
        target_language: String,
    },
    /// One decoder binary serving many pairs, each with its own config.
    MosesMulti {
        command: PathBuf,
        /// Config path with `{source}` and `{target}` standing for the
        /// engine codes of the requested pair.
        config_template: String,
        #[serde(default = "moses::default_multi_pairs")]
        pairs: Vec<LanguagePair>,
        #[serde(default = "moses::default_multi_codes")]
        codes: BTreeMap<String, String>,
    },
    MosesServer {
        url: String,
        source_language: String,
        target_language: String,
    },
    Lucy {
        url: String,
    },
    Google {
        url: String,
        max_lines: usize,
        max_chars: usize,
    },
    Bing {
        url: String,
        app_id: String,
        max_lines: usize,
    },
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig::Dummy { delay_ms: 0 }
    }
}

impl AdapterConfig {
    pub fn google() -> Self {
        AdapterConfig::Google {
            url: google::DEFAULT_URL.to_string(),
            max_lines: google::DEFAULT_MAX_LINES,
            max_chars: google::DEFAULT_MAX_CHARS,
        }
    }

    pub fn bing(app_id: impl Into<String>) -> Self {
        AdapterConfig::Bing {
            url: bing::DEFAULT_URL.to_string(),
            app_id: app_id.into(),
            max_lines: bing::DEFAULT_MAX_LINES,
        }
    }

    /// Name the variant is registered under.
    pub fn name(&self) -> &'static str {
        match self {
            AdapterConfig::Dummy { .. } => "dummy",
            AdapterConfig::Moses { .. } => "moses",
            AdapterConfig::MosesMulti { .. } => "moses-multi",
            AdapterConfig::MosesServer { .. } => "moses-server",
            AdapterConfig::Lucy { .. } => "lucy",
            AdapterConfig::Google { .. } => "google",
            AdapterConfig::Bing { .. } => "bing",
        }
    }

    /// Busy policy a worker gets unless told otherwise. Multi-pair decoders
    /// load a full model per job, so they run one job at a time.
    pub fn default_busy_policy(&self) -> BusyPolicy {
        match self {
            AdapterConfig::MosesMulti { .. } => BusyPolicy::CapacityLimited { max_running: 1 },
            _ => BusyPolicy::Unbounded,
        }
    }

    /// Fails only for paths that are not valid UTF-8.
    pub fn to_spec(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_spec(spec: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(spec)
    }
}

/// When a worker reports itself busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Busy while any job runs; submissions are still accepted.
    #[default]
    Unbounded,
    /// Busy once `max_running` jobs run; further submissions are refused.
    CapacityLimited { max_running: usize },
}

impl BusyPolicy {
    pub fn is_busy(&self, running: usize) -> bool {
        match self {
            BusyPolicy::Unbounded => running > 0,
            BusyPolicy::CapacityLimited { max_running } => running >= *max_running,
        }
    }

    /// Whether a new job may start with `running` jobs in flight.
    pub fn admits(&self, running: usize) -> bool {
        match self {
            BusyPolicy::Unbounded => true,
            BusyPolicy::CapacityLimited { .. } => !self.is_busy(running),
        }
    }
}

/// How each job is isolated from the service loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationMode {
    /// Re-execute the worker binary, one child process per job.
    #[default]
    Process,
    /// Supervised tokio task in the worker process.
    Task,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    pub message_dir: PathBuf,
    pub adapter: AdapterConfig,
    pub isolation: IsolationMode,
    pub busy_policy: BusyPolicy,
    /// Binary re-executed for process isolation. Defaults to the running
    /// executable.
    pub program: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8100)),
            message_dir: default_message_dir("worker"),
            adapter: AdapterConfig::default(),
            isolation: IsolationMode::default(),
            busy_policy: BusyPolicy::default(),
            program: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(listen_addr: SocketAddr, adapter: AdapterConfig) -> Self {
        Self {
            listen_addr,
            busy_policy: adapter.default_busy_policy(),
            adapter,
            ..Default::default()
        }
    }

    pub fn with_message_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.message_dir = dir.into();
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }
}

/// A worker as seen from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub message_dir: PathBuf,
    pub workers: Vec<WorkerDescriptor>,
    /// Upper bound on a single RPC to a worker.
    pub rpc_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            message_dir: default_message_dir("broker"),
            workers: Vec::new(),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfig {
    pub fn new(message_dir: impl Into<PathBuf>) -> Self {
        Self {
            message_dir: message_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_worker(mut self, worker: WorkerDescriptor) -> Self {
        self.workers.push(worker);
        self
    }
}

fn default_message_dir(role: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mtland-{}", role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8100");
        assert_eq!(cfg.adapter, AdapterConfig::Dummy { delay_ms: 0 });
        assert_eq!(cfg.isolation, IsolationMode::Process);
        assert_eq!(cfg.busy_policy, BusyPolicy::Unbounded);
        assert!(cfg.program.is_none());
        assert!(cfg.message_dir.ends_with("mtland-worker"));
    }

    #[test]
    fn worker_config_builders() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = WorkerConfig::new(addr, AdapterConfig::google())
            .with_message_dir("/var/lib/mtland")
            .with_isolation(IsolationMode::Task)
            .with_busy_policy(BusyPolicy::CapacityLimited { max_running: 2 });
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.adapter.name(), "google");
        assert_eq!(cfg.message_dir, PathBuf::from("/var/lib/mtland"));
        assert_eq!(cfg.isolation, IsolationMode::Task);
        assert_eq!(
            cfg.busy_policy,
            BusyPolicy::CapacityLimited { max_running: 2 }
        );
    }

    #[test]
    fn unbounded_policy_is_busy_with_any_job_but_admits_all() {
        let policy = BusyPolicy::Unbounded;
        assert!(!policy.is_busy(0));
        assert!(policy.is_busy(1));
        assert!(policy.admits(100));
    }

    #[test]
    fn capacity_limited_policy_refuses_at_cap() {
        let policy = BusyPolicy::CapacityLimited { max_running: 2 };
        assert!(!policy.is_busy(1));
        assert!(policy.is_busy(2));
        assert!(policy.admits(1));
        assert!(!policy.admits(2));
    }

    #[test]
    fn adapter_spec_round_trips_through_json() {
        let cfg = AdapterConfig::Moses {
            command: PathBuf::from("/opt/moses/bin/moses"),
            config: PathBuf::from("/opt/moses/de-en/moses.ini"),
            source_language: "ger".to_string(),
            target_language: "eng".to_string(),
        };
        let spec = cfg.to_spec().unwrap();
        assert!(spec.contains("\"adapter\":\"moses\""));
        assert_eq!(AdapterConfig::from_spec(&spec).unwrap(), cfg);
    }

    #[test]
    fn adapter_spec_tags_use_kebab_case() {
        let spec = r#"{"adapter":"moses-server","url":"http://mt:8080/RPC2","source_language":"ger","target_language":"eng"}"#;
        let cfg = AdapterConfig::from_spec(spec).unwrap();
        assert_eq!(cfg.name(), "moses-server");

        let dummy = AdapterConfig::from_spec(r#"{"adapter":"dummy"}"#).unwrap();
        assert_eq!(dummy, AdapterConfig::Dummy { delay_ms: 0 });
    }

    #[test]
    fn multi_pair_moses_defaults_to_one_job_at_a_time() {
        let spec = r#"{"adapter":"moses-multi","command":"/opt/moses/bin/moses","config_template":"/opt/moses/{source}-{target}/moses.ini.bin"}"#;
        let cfg = AdapterConfig::from_spec(spec).unwrap();
        let AdapterConfig::MosesMulti { pairs, codes, .. } = &cfg else {
            panic!("wrong variant: {:?}", cfg);
        };
        assert_eq!(pairs.len(), 17);
        assert_eq!(codes.get("ger").map(String::as_str), Some("de"));

        let worker = WorkerConfig::new("127.0.0.1:8100".parse().unwrap(), cfg);
        assert_eq!(
            worker.busy_policy,
            BusyPolicy::CapacityLimited { max_running: 1 }
        );
        assert_eq!(
            WorkerConfig::new("127.0.0.1:8100".parse().unwrap(), AdapterConfig::google()).busy_policy,
            BusyPolicy::Unbounded
        );
    }

    #[test]
    fn worker_descriptor_base_url() {
        let worker = WorkerDescriptor::new("w1", "mt.example.com", 8100);
        assert_eq!(worker.base_url(), "http://mt.example.com:8100");
    }
}
