use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::{json, Value};
use typewire::messages::{Ping, SensorReading, StringCommand};
use typewire_frame::{Envelope, TypeId};
use typewire_pipeline::PipelineStats;
use typewire_registry::{TypeDescriptor, TypeRegistry};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Printable view of one received message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub type_id: TypeId,
    pub name: String,
    pub version: u8,
    pub fields: Value,
    pub timestamp: String,
}

impl MessageRecord {
    /// Describe `envelope` using the names known to `registry`.
    pub fn describe(envelope: &Envelope, registry: &TypeRegistry) -> Self {
        let id = envelope.id();
        let (name, version) = registry
            .descriptors()
            .into_iter()
            .find(|d| d.id == id)
            .map_or_else(|| ("unknown".to_string(), 0), |d| (d.name, d.version));
        Self {
            type_id: id,
            name,
            version,
            fields: fields_of(envelope),
            timestamp: now_unix_seconds(),
        }
    }
}

fn fields_of(envelope: &Envelope) -> Value {
    if let Some(cmd) = envelope.downcast_ref::<StringCommand>() {
        json!({ "text": cmd.text })
    } else if let Some(ping) = envelope.downcast_ref::<Ping>() {
        json!({ "timestamp_ms": ping.timestamp_ms })
    } else if let Some(reading) = envelope.downcast_ref::<SensorReading>() {
        json!({ "x": reading.x, "y": reading.y, "z": reading.z })
    } else {
        json!({ "debug": format!("{:?}", envelope.message()) })
    }
}

fn compact(fields: &Value) -> String {
    match fields {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

pub fn print_message(record: &MessageRecord, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "TYPE", "VERSION", "FIELDS"])
                .add_row(vec![
                    record.type_id.to_string(),
                    record.name.clone(),
                    record.version.to_string(),
                    compact(&record.fields),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} type={} v{} {}",
                record.type_id,
                record.name,
                record.version,
                compact(&record.fields)
            );
        }
    }
}

#[derive(Serialize)]
struct ManifestOutput<'a> {
    types: &'a [TypeDescriptor],
}

pub fn print_manifest(types: &[TypeDescriptor], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ManifestOutput { types }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "NAME", "VERSION"]);
            for desc in types {
                table.add_row(vec![
                    desc.id.to_string(),
                    desc.name.clone(),
                    desc.version.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for desc in types {
                println!("{:>3}  {} v{}", desc.id, desc.name, desc.version);
            }
        }
    }
}

pub fn print_stats(stats: &PipelineStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in stat_rows(stats) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = stat_rows(stats)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
    }
}

fn stat_rows(stats: &PipelineStats) -> [(&'static str, u64); 8] {
    [
        ("frames_decoded", stats.link.frames_decoded),
        ("dispatched", stats.dispatched),
        ("manifests_applied", stats.manifests_applied),
        ("header_rejects", stats.link.header_rejects),
        ("checksum_failures", stats.link.checksum_failures),
        ("bytes_discarded", stats.link.bytes_discarded),
        ("inbound_drops", stats.inbound_drops),
        ("sent", stats.sent),
    ]
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
