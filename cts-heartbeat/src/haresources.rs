//! Parser for heartbeat's `haresources` file
//!
//! Each non-empty line defines one resource group:
//!
//! ```text
//! node1  10.0.0.50  Filesystem::/dev/sda1::/data  httpd   # comment
//! ```
//!
//! The first token names the group's preferred node and is ignored. Every
//! other token is a resource: `type::instance` names a type and its first
//! argument (any further `::` fields are dropped), a bare dotted quad is an `IPaddr` instance, and anything else is a type
//! without an instance.

use std::path::{Path, PathBuf};
use thiserror::Error;

use cts_core::{CtsError, ResourceGroup, ResourceSpec};

pub const IP_RESOURCE_TYPE: &str = "IPaddr";

#[derive(Error, Debug)]
pub enum HaresourcesError {
    #[error("cannot read resource file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<HaresourcesError> for CtsError {
    fn from(err: HaresourcesError) -> Self {
        CtsError::configuration("heartbeat.resource_file", err.to_string())
    }
}

/// Four dot-separated runs of digits, the form heartbeat treats as an address
fn is_dotted_quad(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse one resource token
pub fn parse_resource(token: &str) -> ResourceSpec {
    let mut fields = token.split("::");
    match (fields.next(), fields.next()) {
        (Some(kind), Some(instance)) if !kind.is_empty() => {
            ResourceSpec::new(kind, Some(instance.to_string()))
        }
        _ if is_dotted_quad(token) => {
            ResourceSpec::new(IP_RESOURCE_TYPE, Some(token.to_string()))
        }
        _ => ResourceSpec::new(token, None),
    }
}

/// Parse the contents of an `haresources` file
///
/// Lines that are empty once comments are stripped are skipped.
pub fn parse_haresources(text: &str) -> Vec<ResourceGroup> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            let mut tokens = line.split_whitespace();
            // preferred node
            tokens.next()?;
            Some(ResourceGroup::new(tokens.map(parse_resource).collect()))
        })
        .collect()
}

/// Read and parse an `haresources` file
pub async fn load_haresources(path: &Path) -> Result<Vec<ResourceGroup>, HaresourcesError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| HaresourcesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(parse_haresources(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn res(kind: &str, instance: Option<&str>) -> ResourceSpec {
        ResourceSpec::new(kind, instance.map(str::to_string))
    }

    #[test]
    fn test_resource_tokens() {
        assert_eq!(parse_resource("10.0.0.50"), res("IPaddr", Some("10.0.0.50")));
        assert_eq!(
            parse_resource("IPaddr::10.0.0.51/24"),
            res("IPaddr", Some("10.0.0.51/24"))
        );
        assert_eq!(
            parse_resource("Filesystem::/dev/sda1::/data"),
            res("Filesystem", Some("/dev/sda1"))
        );
        assert_eq!(parse_resource("httpd"), res("httpd", None));
        assert_eq!(parse_resource("10.0.0"), res("10.0.0", None));
    }

    #[test]
    fn test_groups() {
        let text = "\
# primary web service
node1 10.0.0.50 httpd   # trailing comment

   # indented comment only
node2 Filesystem::/dev/sda1::/data nfs
node3
";
        let groups = parse_haresources(text);
        assert_eq!(groups.len(), 3);
        assert_eq!(
            groups[0].resources,
            vec![res("IPaddr", Some("10.0.0.50")), res("httpd", None)]
        );
        assert_eq!(groups[1].primary(), Some(&res("Filesystem", Some("/dev/sda1"))));
        assert!(groups[2].is_empty());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_haresources(Path::new("/no/such/haresources"))
            .await
            .unwrap_err();
        let err: CtsError = err.into();
        assert!(err.is_configuration());
    }
}
