use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Values threaded from upstream pipeline steps into handler tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParameters {
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    pub job_id: Option<String>,
    pub flow_step_id: Option<String>,
}

impl EngineParameters {
    pub const KEYS: [&'static str; 4] = ["source_url", "image_url", "job_id", "flow_step_id"];

    /// Every engine key, with `null` for the ones that are unset.
    pub fn to_map(&self) -> Map<String, Value> {
        let values = [
            &self.source_url,
            &self.image_url,
            &self.job_id,
            &self.flow_step_id,
        ];
        Self::KEYS
            .iter()
            .zip(values)
            .map(|(key, value)| {
                let value = value.clone().map(Value::String).unwrap_or(Value::Null);
                (key.to_string(), value)
            })
            .collect()
    }
}

/// One unit of content produced by an upstream step (a fetched post, a
/// generated draft, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPacket {
    pub title: Option<String>,
    pub body: Option<String>,
    pub source_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DataPacket {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }
}

/// Everything a single conversation run knows about its invocation.
///
/// Opaque to the engine apart from the parameter builder and the
/// environment directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationContext {
    pub engine: EngineParameters,
    /// Key/value context every tool call starts from.
    #[serde(default)]
    pub unified: Map<String, Value>,
    /// Data context in production order; the latest packet is the last.
    #[serde(default)]
    pub data: Vec<DataPacket>,
    pub requested_at: DateTime<Utc>,
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            engine: EngineParameters::default(),
            unified: Map::new(),
            data: Vec::new(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_engine(mut self, engine: EngineParameters) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.unified.insert(key.into(), value);
        self
    }

    pub fn with_data_packet(mut self, packet: DataPacket) -> Self {
        self.data.push(packet);
        self
    }

    pub fn latest_packet(&self) -> Option<&DataPacket> {
        self.data.last()
    }
}
