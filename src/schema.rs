use std::{fs, path::Path};

use anyhow::{Context, Result};
use schemars::{Schema, schema_for};

use crate::config::BridgeConfig;
use crate::events::{EngineEvent, SceneLoaded};
use crate::view::ViewRequest;

/// Write one `<name>.schema.json` per public payload type into `out_dir`.
/// Returns the file names written, in order.
pub fn write_schema(out_dir: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let schemas: [(&str, Schema); 4] = [
        ("event", schema_for!(EngineEvent)),
        ("scene-loaded", schema_for!(SceneLoaded)),
        ("view-request", schema_for!(ViewRequest)),
        ("bridge-config", schema_for!(BridgeConfig)),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (name, schema) in schemas {
        let file = format!("{name}.schema.json");
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(&file), json).with_context(|| format!("writing {file}"))?;
        written.push(file);
    }
    Ok(written)
}
