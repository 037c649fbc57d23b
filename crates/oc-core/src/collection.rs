//! Collections, folders and items

use crate::environment::{Environment, Variable};
use crate::request::{Auth, HttpHeader, HttpRequest, HttpRequestSettings, Scripts};
use serde::{Deserialize, Serialize};

/// Root of a parsed collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenCollection {
    /// Collection name (exposed to scripts via `bru.getCollectionName()`)
    #[serde(default)]
    pub name: String,

    /// Collection configuration
    #[serde(default)]
    pub config: CollectionConfig,

    /// Top-level items
    #[serde(default)]
    pub items: Vec<Item>,

    /// Collection-level request defaults
    #[serde(default)]
    pub request: RequestDefaults,
}

/// Collection configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Environments shipped with the collection
    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// Defaults applied to every request below the owning node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDefaults {
    /// Default headers (request headers win)
    #[serde(default)]
    pub headers: Vec<HttpHeader>,
    /// Default auth, used when a request inherits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Variables of this scope
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Scripts of this scope
    #[serde(default)]
    pub scripts: Scripts,
    /// Transport settings
    #[serde(default)]
    pub settings: RequestSettings,
}

/// Per-protocol default settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    /// HTTP settings
    #[serde(default)]
    pub http: HttpRequestSettings,
}

/// A folder of items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder name
    #[serde(default)]
    pub name: String,
    /// Ordering within the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    /// Child items
    #[serde(default)]
    pub items: Vec<Item>,
    /// Folder-level request defaults
    #[serde(default)]
    pub request: RequestDefaults,
}

/// A collection item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    /// HTTP request
    Http(HttpRequest),
    /// Folder
    Folder(Folder),
    /// Free-standing script
    Script {
        /// Script text
        #[serde(default)]
        script: Option<String>,
    },
    /// GraphQL, gRPC, WebSocket and future item kinds
    #[serde(other)]
    Unsupported,
}

/// A request located in a collection together with its enclosing folders
#[derive(Debug, Clone)]
pub struct ResolvedItem<'a> {
    /// The request itself
    pub request: &'a HttpRequest,
    /// Enclosing folders, outermost first
    pub folders: Vec<&'a Folder>,
}

impl OpenCollection {
    /// Create an empty collection
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an item (builder style)
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Find an environment by name
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.config.environments.iter().find(|e| e.name == name)
    }

    /// Find an HTTP request by name, depth-first in declaration order
    pub fn find_request(&self, name: &str) -> Option<ResolvedItem<'_>> {
        let mut folders = Vec::new();
        find_in(&self.items, name, &mut folders)
    }

    /// Every HTTP request in the collection, depth-first
    pub fn requests(&self) -> Vec<ResolvedItem<'_>> {
        let mut out = Vec::new();
        collect(&self.items, &mut Vec::new(), &mut out);
        out
    }
}

fn find_in<'a>(
    items: &'a [Item],
    name: &str,
    folders: &mut Vec<&'a Folder>,
) -> Option<ResolvedItem<'a>> {
    for item in items {
        match item {
            Item::Http(request) if request.name.as_deref() == Some(name) => {
                return Some(ResolvedItem {
                    request,
                    folders: folders.clone(),
                });
            }
            Item::Folder(folder) => {
                folders.push(folder);
                if let Some(found) = find_in(&folder.items, name, folders) {
                    return Some(found);
                }
                folders.pop();
            }
            _ => {}
        }
    }
    None
}

fn collect<'a>(items: &'a [Item], folders: &mut Vec<&'a Folder>, out: &mut Vec<ResolvedItem<'a>>) {
    for item in items {
        match item {
            Item::Http(request) => out.push(ResolvedItem {
                request,
                folders: folders.clone(),
            }),
            Item::Folder(folder) => {
                folders.push(folder);
                collect(&folder.items, folders, out);
                folders.pop();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = r#"
name: Demo
config:
  environments:
    - name: local
      variables:
        - name: host
          value: http://localhost:3000
request:
  headers:
    - name: X-Client
      value: oc
items:
  - type: folder
    name: users
    request:
      variables:
        - name: resource
          value: users
    items:
      - type: http
        name: List users
        url: "{{host}}/{{resource}}"
  - type: graphql
    name: Query
  - type: http
    name: Health
    url: "{{host}}/health"
"#;

    #[test]
    fn test_find_nested_request() {
        let collection: OpenCollection = serde_yaml::from_str(COLLECTION).unwrap();
        let found = collection.find_request("List users").unwrap();
        assert_eq!(found.folders.len(), 1);
        assert_eq!(found.folders[0].name, "users");
        assert_eq!(found.request.url, "{{host}}/{{resource}}");
    }

    #[test]
    fn test_unsupported_items_are_skipped() {
        let collection: OpenCollection = serde_yaml::from_str(COLLECTION).unwrap();
        assert!(collection.items.contains(&Item::Unsupported));
        let names: Vec<_> = collection
            .requests()
            .iter()
            .filter_map(|r| r.request.name.clone())
            .collect();
        assert_eq!(names, vec!["List users".to_string(), "Health".to_string()]);
    }

    #[test]
    fn test_environment_lookup() {
        let collection: OpenCollection = serde_yaml::from_str(COLLECTION).unwrap();
        assert!(collection.environment("local").is_some());
        assert!(collection.environment("prod").is_none());
    }
}
