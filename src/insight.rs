use anyhow::{anyhow, Context};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const NO_DATA_NARRATIVE: &str =
    "Welcome to the attendance system. Record a few sessions and the analysis will appear here.";
pub const FALLBACK_NARRATIVE: &str = "Attendance analysis is unavailable right now.";

const ENDPOINT_ENV: &str = "ATTENDANCED_INSIGHT_URL";
const API_KEY_ENV: &str = "ATTENDANCED_INSIGHT_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DATASET_CHARS: usize = 8_000;

/// The external text-generation boundary: serialized dataset in, one block
/// of narrative text out, or failure.
pub trait InsightProvider: Send + Sync {
    fn analyze(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct HttpInsightProvider {
    endpoint: Option<String>,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpInsightProvider {
    pub fn from_env() -> Self {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        HttpInsightProvider {
            endpoint,
            api_key,
            client,
        }
    }
}

impl InsightProvider for HttpInsightProvider {
    fn analyze(&self, prompt: &str) -> anyhow::Result<String> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(anyhow!("no insight endpoint configured ({})", ENDPOINT_ENV));
        };
        let mut req = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "prompt": prompt }));
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .context("insight request failed")?
            .error_for_status()
            .context("insight service returned an error status")?;
        let body: serde_json::Value = resp.json().context("insight response is not JSON")?;
        let text = body
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("insight response carries no text"))?;
        Ok(text.to_string())
    }
}

/// Prompt sent to the text-generation service. The dataset is truncated so
/// the request stays bounded no matter how large the record set grows.
pub fn build_prompt(dataset_json: &str) -> String {
    let mut dataset = dataset_json;
    if dataset.len() > MAX_DATASET_CHARS {
        let mut cut = MAX_DATASET_CHARS;
        while !dataset.is_char_boundary(cut) {
            cut -= 1;
        }
        dataset = &dataset[..cut];
    }
    format!(
        "Given the following school attendance records: {}. Provide a short \
         analysis (a single paragraph) of the main trends, such as the day \
         with the most absences and the most disciplined class, plus \
         suggestions for improving attendance.",
        dataset
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightStatus {
    Idle,
    Loading,
    Ready,
}

impl InsightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightStatus::Idle => "idle",
            InsightStatus::Loading => "loading",
            InsightStatus::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightSnapshot {
    pub status: InsightStatus,
    pub narrative: Option<String>,
    pub generation: u64,
}

struct Shared {
    generation: u64,
    status: InsightStatus,
    narrative: Option<String>,
}

/// Holds the latest narrative plus a monotonic generation counter. A worker
/// publishes only while its generation still matches, so a response that
/// raced a newer refresh is discarded instead of overwriting it.
pub struct InsightHub {
    shared: Arc<Mutex<Shared>>,
    provider: Arc<dyn InsightProvider>,
}

impl InsightHub {
    pub fn new() -> Self {
        Self::with_provider(Arc::new(HttpInsightProvider::from_env()))
    }

    pub fn with_provider(provider: Arc<dyn InsightProvider>) -> Self {
        InsightHub {
            shared: Arc::new(Mutex::new(Shared {
                generation: 0,
                status: InsightStatus::Idle,
                narrative: None,
            })),
            provider,
        }
    }

    pub fn snapshot(&self) -> InsightSnapshot {
        let Ok(guard) = self.shared.lock() else {
            return InsightSnapshot {
                status: InsightStatus::Idle,
                narrative: None,
                generation: 0,
            };
        };
        InsightSnapshot {
            status: guard.status,
            narrative: guard.narrative.clone(),
            generation: guard.generation,
        }
    }

    /// Empty dataset: publish the static message without any request.
    pub fn publish_no_data(&self) -> u64 {
        let Ok(mut guard) = self.shared.lock() else {
            return 0;
        };
        guard.generation += 1;
        guard.status = InsightStatus::Ready;
        guard.narrative = Some(NO_DATA_NARRATIVE.to_string());
        guard.generation
    }

    /// Mark a new in-flight request and hand back its generation.
    pub fn begin_refresh(&self) -> u64 {
        let Ok(mut guard) = self.shared.lock() else {
            return 0;
        };
        guard.generation += 1;
        guard.status = InsightStatus::Loading;
        guard.generation
    }

    pub fn spawn_request(&self, generation: u64, prompt: String) {
        let shared = Arc::clone(&self.shared);
        let provider = Arc::clone(&self.provider);
        thread::spawn(move || {
            let narrative = match provider.analyze(&prompt) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("insight request failed: {:#}", e);
                    FALLBACK_NARRATIVE.to_string()
                }
            };
            let Ok(mut guard) = shared.lock() else {
                return;
            };
            if guard.generation != generation {
                // A newer refresh superseded this request.
                return;
            }
            guard.status = InsightStatus::Ready;
            guard.narrative = Some(narrative);
        });
    }
}
