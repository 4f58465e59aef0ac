//! The architecture/system model (C3): core types with per-thread CPI
//! tables and per-core frequencies, and the configuration file reader that
//! produces it.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Cpi, Freq, Tid};
use crate::error::{Result, RhythmError};

/// A core type found in the modeled multiprocessor: the CPI rate a thread
/// runs at on this core type, and the frequency levels it supports.
#[derive(Debug, Clone)]
pub struct CoreType {
    pub cpi_rates: HashMap<Tid, Cpi>,
    pub frequencies: Vec<Freq>,
}

/// A physical or virtual core. Refers to its type by index into
/// [`Architecture::core_types`] rather than by reference, so that
/// `Architecture` owns a single flat table and cores never need a
/// back-pointer into it.
#[derive(Debug, Clone)]
pub struct Core {
    pub type_index: usize,
    pub frequency: Freq,
}

/// A multiprocessor: a collection of cores, each with a type.
#[derive(Debug, Clone, Default)]
pub struct Architecture {
    pub core_types: Vec<CoreType>,
    pub cores: Vec<Core>,
}

impl Architecture {
    pub fn core_type(&self, core: &Core) -> &CoreType {
        &self.core_types[core.type_index]
    }
}

// --- Configuration file shape (JSON) -----------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    architecture: ConfigArchitecture,
}

#[derive(Debug, Deserialize)]
struct ConfigArchitecture {
    #[serde(rename = "core.types")]
    core_types: Vec<ConfigCoreType>,
    cores: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigCoreType {
    id: String,
    threads: Vec<ConfigThreadCpi>,
    #[serde(rename = "frequency.levels")]
    frequency_levels: Vec<ConfigFrequencyLevel>,
}

#[derive(Debug, Deserialize)]
struct ConfigThreadCpi {
    tid: Tid,
    #[serde(rename = "cpi.rate")]
    cpi_rate: Cpi,
}

#[derive(Debug, Deserialize)]
struct ConfigFrequencyLevel {
    frequency: Freq,
}

/// Parse an architecture configuration file, producing the resulting
/// [`Architecture`].
pub fn parse_config_file(path: &Path) -> Result<Architecture> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RhythmError::Configuration(format!("could not read {}: {e}", path.display()))
    })?;

    parse_config_str(&content)
}

fn parse_config_str(content: &str) -> Result<Architecture> {
    let config: ConfigFile = serde_json::from_str(content)?;

    let mut arch = Architecture::default();
    let mut type_index_by_id: HashMap<String, usize> = HashMap::new();

    for core_type_config in config.architecture.core_types {
        let mut cpi_rates = HashMap::new();
        for thread in core_type_config.threads {
            cpi_rates.insert(thread.tid, thread.cpi_rate);
        }

        let frequencies: Vec<Freq> = core_type_config
            .frequency_levels
            .iter()
            .map(|l| l.frequency)
            .collect();

        if frequencies.is_empty() {
            return Err(RhythmError::Configuration(format!(
                "core type '{}' has no frequency levels",
                core_type_config.id
            )));
        }

        type_index_by_id.insert(core_type_config.id, arch.core_types.len());
        arch.core_types.push(CoreType {
            cpi_rates,
            frequencies,
        });
    }

    for core_type_id in config.architecture.cores {
        let type_index = *type_index_by_id.get(&core_type_id).ok_or_else(|| {
            RhythmError::Configuration(format!("undefined core type '{core_type_id}'"))
        })?;

        let frequency = arch.core_types[type_index].frequencies[0];
        arch.cores.push(Core {
            type_index,
            frequency,
        });
    }

    Ok(arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "architecture": {
        "core.types": [
          { "id": "fast",
            "threads": [ { "tid": 0, "cpi.rate": 1.0 } ],
            "frequency.levels": [ { "frequency": 1000000000 } ] },
          { "id": "slow",
            "threads": [ { "tid": 1, "cpi.rate": 2.0 } ],
            "frequency.levels": [ { "frequency": 500000000 } ] }
        ],
        "cores": ["fast", "slow"]
      }
    }"#;

    #[test]
    fn parses_heterogeneous_cores() {
        let arch = parse_config_str(SAMPLE).unwrap();

        assert_eq!(arch.cores.len(), 2);
        assert_eq!(arch.cores[0].frequency, 1_000_000_000);
        assert_eq!(arch.cores[1].frequency, 500_000_000);
        assert_eq!(arch.core_types[0].cpi_rates[&0], 1.0);
        assert_eq!(arch.core_types[1].cpi_rates[&1], 2.0);
    }

    #[test]
    fn undefined_core_type_is_a_configuration_error() {
        let bad = SAMPLE.replace("\"fast\", \"slow\"", "\"fast\", \"nonexistent\"");
        let err = parse_config_str(&bad).unwrap_err();

        assert!(matches!(err, RhythmError::Configuration(_)));
    }
}
