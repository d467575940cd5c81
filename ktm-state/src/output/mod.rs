use serde_json::{
    Map,
    Value,
    json,
};
use tracing::warn;

const SCHEMA_TEXT: &str = include_str!("schema.json");

/// Wraps `fields` (plus the envelope's discriminant `type`) in the
/// `{"kube_transition_metrics": {...}, "message": ...}` shape every emitted record shares.
pub fn envelope(record_type: &str, mut fields: Map<String, Value>, message: Option<&str>) -> Value {
    fields.insert("type".into(), json!(record_type));

    let mut record = Map::new();
    record.insert("kube_transition_metrics".into(), Value::Object(fields));
    if let Some(message) = message {
        record.insert("message".into(), json!(message));
    }
    Value::Object(record)
}

/// A sink that an emitted record is forked to. Sinks never propagate errors to the caller --
/// failures are logged and counted, never allowed to stop emission for other pods.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &Value);
}

/// Writes each record as newline-delimited JSON on standard output.
pub struct StdoutSink;

impl RecordSink for StdoutSink {
    fn emit(&self, record: &Value) {
        println!("{record}");
    }
}

/// Decodes and validates every record against the embedded schema, discarding the payload.
/// Exists as a correctness tripwire: a validation failure here means the record shape drifted
/// from what downstream log consumers expect, without affecting emission to stdout.
pub struct SchemaValidatingSink {
    schema: jsonschema::JSONSchema,
}

impl SchemaValidatingSink {
    pub fn new() -> anyhow::Result<Self> {
        let schema_value: Value = serde_json::from_str(SCHEMA_TEXT)?;
        let schema = jsonschema::JSONSchema::compile(&schema_value)
            .map_err(|e| anyhow::anyhow!("failed to compile embedded record schema: {e}"))?;
        Ok(SchemaValidatingSink { schema })
    }
}

impl RecordSink for SchemaValidatingSink {
    fn emit(&self, record: &Value) {
        if let Err(errors) = self.schema.validate(record) {
            for error in errors {
                warn!(%error, "emitted record failed schema validation");
            }
        }
    }
}

/// Forks every emitted record to all configured sinks.
pub struct MultiSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        MultiSink { sinks }
    }

    /// The standard production configuration: stdout plus the schema-validation tripwire.
    pub fn standard() -> anyhow::Result<Self> {
        Ok(MultiSink::new(vec![Box::new(StdoutSink), Box::new(SchemaValidatingSink::new()?)]))
    }

    pub fn emit(&self, record: Value) {
        for sink in &self.sinks {
            sink.emit(&record);
        }
    }

    pub fn emit_all(&self, records: Vec<Value>) {
        for record in records {
            self.emit(record);
        }
    }
}
