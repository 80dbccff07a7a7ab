//! Loading the YAML configuration document.
//!
//! The document has one `nimbus` section (façade settings) and one section per
//! identity protocol version holding credentials:
//!
//! ```yaml
//! nimbus:
//!   request_timeout_secs: 30
//!   interface: public
//! v3:
//!   username: alice
//!   auth_url: http://id.example/v3
//!   project_name: ops
//!   user_domain_name: default
//!   project_domain_name: default
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use facade::StaticConfigStore;
use serde_json::Value;
use tracing::debug;

/// Reads `path` into a config store; no path means an empty document.
pub fn load(path: Option<&Path>) -> Result<StaticConfigStore> {
    let Some(path) = path else {
        debug!("No configuration file given; using an empty document");
        return Ok(StaticConfigStore::empty());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration file {}", path.display()))?;
    parse(&text).with_context(|| format!("invalid configuration file {}", path.display()))
}

/// Parses a YAML document. An empty document is allowed; a non-mapping root
/// is not.
pub fn parse(text: &str) -> Result<StaticConfigStore> {
    let document: Value = serde_yaml::from_str(text)?;
    match document {
        Value::Null => Ok(StaticConfigStore::empty()),
        Value::Object(_) => Ok(StaticConfigStore::new(document)),
        _ => bail!("the configuration root must be a mapping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facade::{ConfigStore, FacadeConfig, Interface};

    #[test]
    fn yaml_sections_are_visible_to_the_facade() {
        let store = parse(
            r#"
nimbus:
  interface: internal
  client_retry:
    max_attempts: 3
v3:
  username: alice
  auth_url: http://id.example/v3
"#,
        )
        .unwrap();

        let config = FacadeConfig::from_store(&store).unwrap();
        assert_eq!(config.interface, Interface::Internal);
        assert_eq!(config.client_retry.max_attempts, 3);
        assert_eq!(store.dump_config()["v3"]["username"], "alice");
    }

    #[test]
    fn empty_document_is_empty_store() {
        let store = parse("").unwrap();
        assert!(store.dump_config().as_object().unwrap().is_empty());
    }

    #[test]
    fn scalar_root_is_rejected() {
        assert!(parse("just a string").is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load(Some(Path::new("/nonexistent/nimbus.yaml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/nimbus.yaml"));
    }
}
